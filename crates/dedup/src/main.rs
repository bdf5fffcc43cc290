//! `dedup`: deduplicating file uploader.
//!
//! Splits a file into content-defined chunks, uploads the chunks the store
//! does not already hold and publishes a composite manifest that reads back
//! as the original file.
//!
//! # Usage
//!
//! ```text
//! dedup run ./backup.tar /tmp/dedup-stage           # upload one file
//! dedup run ./backup.tar /tmp/stage -c dedup.toml   # with a config file
//! dedup get backup.tar ./restored.tar               # read a file back
//! dedup plan ./backup.tar                           # print the segment list only
//! ```

mod config;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dedup_cas::{
    Chunker, ManifestBuilder, deserialize_manifest, serialize_manifest, to_slo_json,
    verify_reassembly,
};
use dedup_engine::{Cancellation, DedupPipeline, reassemble};
use dedup_store::{BlobStore, FileStore, MemoryStore};
use tracing::{info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "dedup", version, about = "Deduplicating file uploader")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "DEDUP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deduplicate and upload one file.
    Run {
        /// File to upload.
        source: PathBuf,

        /// Staging directory for chunk files. Must be absent or empty.
        temp: PathBuf,

        /// Also keep the manifest locally at this path.
        #[arg(long)]
        manifest_out: Option<PathBuf>,

        /// Run against an in-memory store (nothing persists).
        #[arg(short, long)]
        memory: bool,
    },

    /// Reassemble an uploaded file.
    Get {
        /// Manifest object name (the source file's base name).
        name: String,

        /// Where to write the reassembled file.
        out: PathBuf,

        /// Verify the result against a manifest written by `run --manifest-out`.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Chunk a file and print its segment list without uploading.
    Plan {
        /// File to chunk.
        source: PathBuf,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Run {
            source,
            temp,
            manifest_out,
            memory,
        } => {
            if memory {
                config.store.backend = "memory".to_string();
            }
            cmd_run(&config, &source, &temp, manifest_out.as_deref()).await
        }
        Commands::Get {
            name,
            out,
            manifest,
        } => cmd_get(&config, &name, &out, manifest.as_deref()).await,
        Commands::Plan { source } => cmd_plan(&config, &source),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_store(config: &CliConfig) -> Result<Arc<dyn BlobStore>> {
    match config.store.backend.as_str() {
        "memory" => {
            let store = if config.store.create_containers {
                MemoryStore::new()
            } else {
                MemoryStore::strict()
            };
            Ok(Arc::new(store))
        }
        "file" => {
            let store = FileStore::new(&config.store.root, config.store.create_containers)
                .with_context(|| {
                    format!("failed to open store at {}", config.store.root.display())
                })?;
            Ok(Arc::new(store))
        }
        other => bail!("unknown store backend {other:?} (expected \"file\" or \"memory\")"),
    }
}

// -----------------------------------------------------------------------
// dedup run
// -----------------------------------------------------------------------

async fn cmd_run(
    config: &CliConfig,
    source: &Path,
    temp: &Path,
    manifest_out: Option<&Path>,
) -> Result<()> {
    let upload = config.upload_config()?;
    info!(
        backend = %config.store.backend,
        engine = %upload.engine,
        workers = upload.workers,
        chunks = %upload.chunk_container,
        manifests = %upload.manifest_container,
        "upload configuration"
    );

    let store = build_store(config)?;
    let manifest_container = upload.manifest_container.clone();
    let pipeline = DedupPipeline::new(store, upload).context("invalid configuration")?;

    let (handle, cancel) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });
    let pipeline = pipeline.with_cancellation(cancel);

    let summary = match pipeline.run(source, temp).await {
        Ok(summary) => summary,
        Err(e) => {
            let orphans = e.orphans();
            if !orphans.is_empty() {
                warn!(
                    phase = %e.phase(),
                    count = orphans.len(),
                    "chunks stored by this run are not referenced by any manifest"
                );
                for fingerprint in orphans {
                    warn!(%fingerprint, "unreferenced chunk");
                }
            }
            return Err(e).with_context(|| format!("failed to upload {}", source.display()));
        }
    };

    if let Some(path) = manifest_out {
        let bytes = serialize_manifest(&summary.manifest)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write manifest to {}", path.display()))?;
        info!(path = %path.display(), "manifest written");
    }

    println!(
        "Uploaded {} as {}/{} ({} bytes, {} segments, {} new chunks, {} already stored)",
        source.display(),
        manifest_container,
        summary.manifest_name,
        summary.manifest.total_size,
        summary.manifest.segment_count(),
        summary.report.uploaded.len(),
        summary.report.skipped.len(),
    );
    Ok(())
}

// -----------------------------------------------------------------------
// dedup get
// -----------------------------------------------------------------------

async fn cmd_get(
    config: &CliConfig,
    name: &str,
    out: &Path,
    manifest: Option<&Path>,
) -> Result<()> {
    let store = build_store(config)?;
    let container = &config.containers.manifests;

    let data = reassemble(store.as_ref(), container, name)
        .await
        .with_context(|| format!("failed to read {container}/{name}"))?;

    if let Some(path) = manifest {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest = deserialize_manifest(&bytes)?;
        verify_reassembly(&manifest, &data)
            .with_context(|| format!("{container}/{name} does not match {}", path.display()))?;
        info!(file_hash = %manifest.file_hash, "reassembly verified");
    }

    std::fs::write(out, &data).with_context(|| format!("failed to write {}", out.display()))?;
    println!("Wrote {} bytes to {}", data.len(), out.display());
    Ok(())
}

// -----------------------------------------------------------------------
// dedup plan
// -----------------------------------------------------------------------

fn cmd_plan(config: &CliConfig, source: &Path) -> Result<()> {
    let upload = config.upload_config()?;
    upload.validate().context("invalid configuration")?;

    let file =
        File::open(source).with_context(|| format!("failed to open {}", source.display()))?;
    let len = file.metadata()?.len();
    let chunker = Chunker::new(upload.engine, upload.params_for(len))?;

    let mut builder = ManifestBuilder::new(upload.chunk_container.as_str());
    let summary = chunker.chunk_reader(BufReader::new(file), |chunk| {
        builder.push(chunk.fingerprint, chunk.data.len() as u64);
        Ok(())
    })?;
    let manifest = builder.build(summary.file_hash)?;

    println!("{}", to_slo_json(&manifest)?);
    eprintln!(
        "{} segments, {} distinct, {} bytes",
        manifest.segment_count(),
        manifest.distinct_fingerprints().len(),
        manifest.total_size
    );
    Ok(())
}
