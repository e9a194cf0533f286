//! Command-line flags. Flags override file and environment configuration.

use clap::Parser;

use crate::config::ExporterConfig;

pub const BINARY_NAME: &str = "varnishlog_exporter";

#[derive(Parser, Debug, Default)]
#[command(
    name = "varnishlog_exporter",
    about = "Prometheus exporter for Varnish transaction logs",
    disable_version_flag = true
)]
pub struct Cli {
    /// Address to listen on for web interface and telemetry [default: :9132]
    #[arg(long = "web.listen-address", value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Path under which to expose metrics [default: /metrics]
    #[arg(long = "web.telemetry-path", value_name = "PATH")]
    pub metrics_path: Option<String>,

    /// Varnish instance name
    #[arg(long = "varnish.name", value_name = "NAME")]
    pub instance: Option<String>,

    /// Path to the varnishlog binary [default: varnishlog]
    #[arg(long = "varnishlog.path", value_name = "PATH")]
    pub varnishlog_path: Option<String>,

    /// Extra configuration file (toml, yaml or json)
    #[arg(long = "config.file", value_name = "FILE")]
    pub config_file: Option<String>,

    /// Request header to export (repeatable)
    #[arg(long = "reqheader", value_name = "HEADER")]
    pub request_headers: Vec<String>,

    /// Response header to export (repeatable)
    #[arg(long = "respheader", value_name = "HEADER")]
    pub response_headers: Vec<String>,

    /// Track response status codes
    #[arg(long = "statuscode")]
    pub status_codes: bool,

    /// Track request HTTP versions
    #[arg(long = "httpversion")]
    pub http_version: bool,

    /// Track backend probe response times
    #[arg(long = "probes")]
    pub probes: bool,

    /// Log every varnishlog record at debug level
    #[arg(long)]
    pub debug: bool,

    /// Print version information and exit
    #[arg(long)]
    pub version: bool,
}

impl Cli {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut ExporterConfig) {
        if let Some(address) = &self.listen_address {
            config.server.listen_address = address.clone();
        }
        if let Some(path) = &self.metrics_path {
            config.server.metrics_path = path.clone();
        }
        if let Some(instance) = &self.instance {
            config.source.instance = instance.clone();
        }
        if let Some(path) = &self.varnishlog_path {
            config.source.varnishlog_path = path.clone();
        }

        config
            .tracking
            .request_headers
            .extend(self.request_headers.iter().cloned());
        config
            .tracking
            .response_headers
            .extend(self.response_headers.iter().cloned());

        config.tracking.status_codes |= self.status_codes;
        config.tracking.http_version |= self.http_version;
        config.tracking.probes |= self.probes;

        if self.debug {
            config.logging.debug = true;
            config.logging.level = "debug".to_string();
        }
    }
}

/// `varnishlog_exporter, version 0.1.0 (package exporter)`
pub fn version_banner() -> String {
    format!(
        "{}, version {} (package {})",
        BINARY_NAME,
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_NAME")
    )
}
