//! Configuration for the logger.
//!
//! Every option can be given as a flag or through the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use crate::source::DeriverConfig;

/// Supported log shippers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShipperKind {
    Fluentbit,
    Promtail,
}

/// Logger configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "nomad-logger", version, about)]
pub struct Config {
    /// The address of the Nomad API.
    #[arg(long = "nomad-addr", env = "NOMAD_ADDR", default_value = "http://localhost:4646")]
    pub nomad_address: String,

    /// Nomad ACL token, if ACLs are enabled.
    #[arg(long = "nomad-token", env = "NOMAD_TOKEN", hide_env_values = true)]
    pub nomad_token: Option<String>,

    /// Location of the Nomad allocations data. Used to build log file paths.
    #[arg(long, env = "NOMAD_ALLOCS_DIR", default_value = "/var/lib/nomad/alloc")]
    pub nomad_allocs_dir: String,

    /// Node to generate config for. When empty the node is looked up through
    /// the allocation this process runs in (NOMAD_ALLOC_ID).
    #[arg(long, env = "NOMAD_NODE_ID", default_value = "")]
    pub nomad_node_id: String,

    /// Task meta keys starting with `<prefix>.` are read as overrides.
    #[arg(long, env = "NOMAD_META_PREFIX", default_value = "nomad-logger")]
    pub nomad_meta_prefix: String,

    /// Command to run after the generated config changed, e.g. to signal the
    /// shipper to reload.
    #[arg(long, env = "RELOAD_CMD", default_value = "")]
    pub reload_cmd: String,

    /// The log shipper to generate config for.
    #[arg(long, env = "LOG_SHIPPER", value_enum, default_value = "promtail")]
    pub log_shipper: ShipperKind,

    /// File for the generated Fluent Bit inputs. Completely overwritten;
    /// `@INCLUDE` it from the main config.
    #[arg(long, env = "FLUENTBIT_CONF_FILE", default_value = "/etc/fluent-bit/nomad.conf")]
    pub fluentbit_conf_file: PathBuf,

    /// Default Fluent Bit tag prefix. Full tag is `<prefix>.<alloc>.<task>.<stream>`.
    #[arg(long, env = "FLUENTBIT_TAG_PREFIX", default_value = "nomad")]
    pub fluentbit_tag_prefix: String,

    /// Default parser for every input. Empty for none.
    #[arg(long, env = "FLUENTBIT_PARSER", default_value = "")]
    pub fluentbit_parser: String,

    /// Promtail file_sd_config file. Completely overwritten.
    #[arg(long, env = "PROMTAIL_TARGETS_FILE", default_value = "/etc/promtail/nomad.yaml")]
    pub promtail_targets_file: PathBuf,

    /// Port to serve metrics on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 2112)]
    pub metrics_port: u16,

    /// Path to serve metrics on.
    #[arg(long, env = "METRICS_PATH", default_value = "/metrics")]
    pub metrics_path: String,

    /// Seconds between allocation checks.
    #[arg(long, env = "CHECK_INTERVAL", default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub check_interval: u64,

    /// Run a single poll cycle and exit.
    #[arg(long, env = "NOMAD_LOGGER_ONCE")]
    pub once: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from arguments and environment, validating it.
    pub fn load() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.metrics_path.starts_with('/') {
            anyhow::bail!("Metrics path must start with '/': {}", self.metrics_path);
        }
        if self.nomad_meta_prefix.is_empty() {
            anyhow::bail!("Nomad meta prefix must not be empty");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.metrics_port))
    }

    /// File the selected shipper writes.
    pub fn target_file(&self) -> PathBuf {
        match self.log_shipper {
            ShipperKind::Fluentbit => self.fluentbit_conf_file.clone(),
            ShipperKind::Promtail => self.promtail_targets_file.clone(),
        }
    }

    pub fn deriver_config(&self) -> DeriverConfig {
        DeriverConfig {
            allocs_dir: self.nomad_allocs_dir.clone(),
            meta_prefix: self.nomad_meta_prefix.clone(),
            default_tag_prefix: self.fluentbit_tag_prefix.clone(),
            default_parser: self.fluentbit_parser.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["nomad-logger"]).unwrap();

        assert_eq!(config.nomad_address, "http://localhost:4646");
        assert_eq!(config.nomad_allocs_dir, "/var/lib/nomad/alloc");
        assert_eq!(config.nomad_meta_prefix, "nomad-logger");
        assert_eq!(config.log_shipper, ShipperKind::Promtail);
        assert_eq!(config.target_file(), PathBuf::from("/etc/promtail/nomad.yaml"));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.metrics_addr().port(), 2112);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fluentbit_selection() {
        let config = Config::try_parse_from([
            "nomad-logger",
            "--log-shipper",
            "fluentbit",
            "--fluentbit-conf-file",
            "/tmp/nomad.conf",
            "--fluentbit-parser",
            "json",
            "--check-interval",
            "15",
        ])
        .unwrap();

        assert_eq!(config.target_file(), PathBuf::from("/tmp/nomad.conf"));
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        let deriver = config.deriver_config();
        assert_eq!(deriver.default_parser, "json");
        assert_eq!(deriver.default_tag_prefix, "nomad");
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Config::try_parse_from(["nomad-logger", "--check-interval", "0"]).is_err());
        assert!(Config::try_parse_from(["nomad-logger", "--log-shipper", "vector"]).is_err());

        let config =
            Config::try_parse_from(["nomad-logger", "--metrics-path", "metrics"]).unwrap();
        assert!(config.validate().is_err());
    }
}
