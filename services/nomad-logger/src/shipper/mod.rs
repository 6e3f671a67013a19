//! Log shipper backends.
//!
//! Both backends share derivation and materialization and differ only in the
//! format they render:
//!
//! - `fluentbit`: templated `[INPUT]`/`[FILTER]` stanzas meant to be
//!   `@INCLUDE`d from the main Fluent Bit config
//! - `promtail`: a `file_sd_configs` targets document

pub mod fluentbit;
pub mod promtail;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{Config, ShipperKind};
use crate::error::Result;
use crate::materialize::{ApplyOutcome, CommandRunner, ConfigWriter};
use crate::nomad::Allocation;
use crate::source::{LogSource, LogSourceDeriver};

pub use fluentbit::Fluentbit;
pub use promtail::Promtail;

/// Derivation and file handling shared by every backend.
pub struct Pipeline {
    deriver: LogSourceDeriver,
    writer: ConfigWriter,
}

impl Pipeline {
    pub fn new(deriver: LogSourceDeriver, writer: ConfigWriter) -> Self {
        Self { deriver, writer }
    }

    pub fn deriver(&self) -> &LogSourceDeriver {
        &self.deriver
    }

    pub fn writer(&self) -> &ConfigWriter {
        &self.writer
    }
}

/// A log shipper whose config is generated from node allocations.
#[async_trait]
pub trait LogShipper: Send + Sync {
    /// Backend name, used in logs.
    fn name(&self) -> &'static str;

    /// Serialize sources into the backend's config format.
    fn render(&self, sources: &[LogSource]) -> Result<String>;

    fn pipeline(&self) -> &Pipeline;

    /// Derive sources for all allocations, render them and write the result.
    ///
    /// All-or-nothing: if any allocation fails to derive, the file is left
    /// untouched.
    async fn derive_and_apply(&self, allocs: &[Allocation]) -> Result<ApplyOutcome> {
        let pipeline = self.pipeline();
        let sources = pipeline.deriver().derive_all(allocs)?;
        debug!(
            shipper = self.name(),
            alloc_count = allocs.len(),
            source_count = sources.len(),
            "Derived log sources"
        );

        let content = self.render(&sources)?;
        pipeline.writer().apply(&content).await
    }
}

/// Build the backend selected in `config`.
pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Result<Arc<dyn LogShipper>> {
    let deriver = LogSourceDeriver::new(config.deriver_config())?;
    let writer = ConfigWriter::new(config.target_file(), config.reload_cmd.clone(), runner);
    let pipeline = Pipeline::new(deriver, writer);

    Ok(match config.log_shipper {
        ShipperKind::Fluentbit => Arc::new(Fluentbit::new(pipeline)?),
        ShipperKind::Promtail => Arc::new(Promtail::new(pipeline)),
    })
}
