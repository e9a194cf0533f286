use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use exporter::cli::{version_banner, Cli};
use exporter::config::ExporterConfig;
use exporter::runtime::boot::{boot, init_tracing_basic, init_tracing_from_config};
use exporter::runtime::serve::serve;
use exporter::source::VarnishlogSource;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", version_banner());
        return Ok(());
    }

    // Phase 1: Basic tracing so we can log during config loading
    let basic_tracing = init_tracing_basic();

    info!("Starting varnishlog exporter v{}", env!("CARGO_PKG_VERSION"));

    let config = ExporterConfig::load(&cli).context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    let addr = config.listen_addr().context("Invalid listen address")?;

    // Phase 2: Re-initialize tracing with config (format, level)
    drop(basic_tracing);
    init_tracing_from_config(&config).context("Failed to initialize logging")?;

    info!("Configuration loaded successfully");
    info!(
        instance = %config.source.instance,
        varnishlog = %config.source.varnishlog_path,
        "Server will bind to: {}",
        addr
    );

    let source = Arc::new(VarnishlogSource::new(config.source.varnishlog_path.clone()));
    let state = boot(config, source).context("Failed to start log pipeline")?;

    serve(state, addr).await.context("Server error")?;

    Ok(())
}
