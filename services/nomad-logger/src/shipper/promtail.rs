//! Promtail backend.
//!
//! Writes a `file_sd_configs` document: one static target per log source,
//! with the Nomad labels and the `__path__` glob promtail tails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{LogShipper, Pipeline};
use crate::error::Result;
use crate::source::LogSource;

/// One entry of a promtail file service discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl From<&LogSource> for ScrapeTarget {
    fn from(source: &LogSource) -> Self {
        let l = &source.labels;
        let labels = [
            ("nomad_namespace", l.namespace.as_str()),
            ("nomad_job", l.job.as_str()),
            ("nomad_task_group", l.task_group.as_str()),
            ("nomad_task", l.task.as_str()),
            ("nomad_alloc_id", l.alloc_id.as_str()),
            ("nomad_alloc_name", l.alloc_name.as_str()),
            ("nomad_node_id", l.node_id.as_str()),
            ("nomad_log_stream", l.stream.as_str()),
            ("__path__", source.path.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            targets: vec!["localhost".to_string()],
            labels,
        }
    }
}

pub struct Promtail {
    pipeline: Pipeline,
}

impl Promtail {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}

impl LogShipper for Promtail {
    fn name(&self) -> &'static str {
        "promtail"
    }

    fn render(&self, sources: &[LogSource]) -> Result<String> {
        let targets: Vec<ScrapeTarget> = sources.iter().map(ScrapeTarget::from).collect();
        Ok(serde_yaml::to_string(&targets)?)
    }

    fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}
