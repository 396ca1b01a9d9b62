//! Server binary for pdf2md-serve.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` and starts the HTTP server.

use anyhow::{Context, Result};
use clap::Parser;
use pdf2md_serve::{server, PdfExtractEngine, ServiceConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Upload a PDF, get shareable Markdown.
#[derive(Debug, Parser)]
#[command(name = "pdf2md-serve", version, about)]
struct Cli {
    /// Bind address.
    #[arg(long, env = "PDF2MD_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Bind port.
    #[arg(long, env = "PDF2MD_PORT", default_value_t = 8000)]
    port: u16,

    /// Root directory for converted documents and the cache index.
    #[arg(long, env = "PDF2MD_STORAGE_ROOT", default_value = "storage/output")]
    storage_root: PathBuf,

    /// Maximum number of conversions running at once.
    #[arg(long, env = "PDF2MD_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Per-conversion timeout in seconds.
    #[arg(long, env = "PDF2MD_TIMEOUT_SECS", default_value_t = 600)]
    timeout_secs: u64,

    /// Maximum upload size in mebibytes.
    #[arg(long, env = "PDF2MD_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Keep the cache index in memory only (cached results will not
    /// survive a restart).
    #[arg(long)]
    no_cache_persistence: bool,
}

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ServiceConfig::builder()
        .host(cli.host)
        .port(cli.port)
        .storage_root(cli.storage_root)
        .worker_concurrency(cli.workers)
        .conversion_timeout_secs(cli.timeout_secs)
        .max_upload_bytes(cli.max_upload_mb * 1024 * 1024)
        .persist_cache_index(!cli.no_cache_persistence)
        .build()
        .context("invalid configuration")?;

    server::run(config, Arc::new(PdfExtractEngine::new()))
        .await
        .context("server failed")
}
