use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::cli::Cli;
use crate::error::{ConfigError, ConfigResult};
use crate::filter::{AttributeFilters, HeaderFilter};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    pub server: ServerConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// `host:port`; a bare `:port` listens on all interfaces.
    pub listen_address: String,
    pub metrics_path: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Varnish instance name (`varnishlog -n`); empty means the default instance.
    #[serde(default)]
    pub instance: String,
    pub varnishlog_path: String,
    /// Delay before reopening after a failed open.
    pub reconnect_delay_secs: u64,
    /// Bounded queue size of each metric accumulator.
    pub queue_capacity: usize,
}

/// Which attributes become metrics. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub request_headers: Vec<String>,
    pub response_headers: Vec<String>,
    pub status_codes: bool,
    pub http_version: bool,
    pub probes: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log every record seen by the classifier and probe monitor.
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File { path: String },
}

/// Feature flags derived from [`TrackingConfig`]; decide which families
/// exist and their label schemas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet {
    /// At least one request or response header filter is configured.
    pub headers: bool,
    pub status_codes: bool,
    pub http_version: bool,
    pub probes: bool,
}

impl ExporterConfig {
    /// Load configuration: defaults, then files, then `EXPORTER__*`
    /// environment variables, then command-line flags.
    pub fn load(cli: &Cli) -> ConfigResult<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&ExporterConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        // 1. /etc/varnishlog-exporter/exporter.toml (packaged installs)
        // 2. config/exporter.toml (local development)
        for path in ["/etc/varnishlog-exporter/exporter", "config/exporter"] {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        if let Some(path) = &cli.config_file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        // Double underscore for nested keys: EXPORTER__SOURCE__INSTANCE
        builder = builder.add_source(
            config::Environment::with_prefix("EXPORTER")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("tracking.request_headers")
                .with_list_parse_key("tracking.response_headers"),
        );

        let mut config: ExporterConfig = builder.build()?.try_deserialize()?;
        cli.apply(&mut config);
        config.server.listen_address = normalize_listen_address(&config.server.listen_address);
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.listen_addr()?;

        let path = &self.server.metrics_path;
        if !path.starts_with('/') || path == "/" || path == "/health" {
            return Err(ConfigError::MetricsPath(path.clone()));
        }

        if self.source.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "source.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.source.reconnect_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "source.reconnect_delay_secs must be greater than 0".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.source.varnishlog_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "source.varnishlog_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> ConfigResult<SocketAddr> {
        let address = normalize_listen_address(&self.server.listen_address);
        address
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::ListenAddress {
                address: self.server.listen_address.clone(),
                reason: e.to_string(),
            })
    }

    pub fn features(&self) -> FeatureSet {
        let filters = self.filters();
        FeatureSet {
            headers: !filters.is_empty(),
            status_codes: self.tracking.status_codes,
            http_version: self.tracking.http_version,
            probes: self.tracking.probes,
        }
    }

    pub fn filters(&self) -> AttributeFilters {
        AttributeFilters::new(
            HeaderFilter::new(&self.tracking.request_headers),
            HeaderFilter::new(&self.tracking.response_headers),
        )
    }
}

/// `:9132` → `0.0.0.0:9132`; anything else is returned unchanged.
pub fn normalize_listen_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_address: "0.0.0.0:9132".to_string(),
                metrics_path: "/metrics".to_string(),
                request_timeout_secs: 30,
            },
            source: SourceConfig {
                instance: String::new(),
                varnishlog_path: "varnishlog".to_string(),
                reconnect_delay_secs: 5,
                queue_capacity: 1000,
            },
            tracking: TrackingConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
                output: LogOutput::Stdout,
                debug: false,
            },
        }
    }
}
