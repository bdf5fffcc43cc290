//! Scenario tests for the dedup-engine crate.

mod helpers;
