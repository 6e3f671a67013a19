//! Log sources derived from allocations.
//!
//! A [`LogSource`] describes one output stream of one task in one allocation:
//! where Nomad writes its log files and how the log shipper should label and
//! parse them. Sources are rebuilt from scratch on every poll cycle.

use std::fmt;

use serde::Serialize;

use crate::error::{LoggerError, Result};
use crate::meta::MetaResolver;
use crate::nomad::{Allocation, Task};

/// Metadata override for the tag prefix.
pub const TAG_PREFIX_KEY: &str = "tag-prefix";

/// Metadata override for the input parser.
pub const PARSER_KEY: &str = "parser";

/// Metadata override for per-field parser filters (`key:parser,key:parser`).
pub const FILTER_PARSERS_KEY: &str = "filter-parsers";

/// Output stream of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Both streams, in the order sources are emitted.
    pub const ALL: [Stream; 2] = [Stream::Stdout, Stream::Stderr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parser applied to a single field of a record after ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterParser {
    pub key: String,
    pub parser: String,
}

/// Nomad labels attached to every log line of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLabels {
    pub namespace: String,
    pub job: String,
    pub task_group: String,
    pub task: String,
    pub alloc_id: String,
    pub alloc_name: String,
    pub node_id: String,
    pub stream: Stream,
}

/// One task stream the log shipper should ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSource {
    pub tag_prefix: String,
    pub stream: Stream,
    /// Glob matching the rotated log files of the stream.
    pub path: String,
    /// Parser for the whole line; empty means none.
    pub parser: String,
    pub filter_parsers: Vec<FilterParser>,
    pub labels: SourceLabels,
}

impl LogSource {
    /// Shipper tag: `<tag_prefix>.<alloc_id>.<task>.<stream>`.
    pub fn tag(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.tag_prefix, self.labels.alloc_id, self.labels.task, self.stream
        )
    }
}

/// Settings that shape derived sources.
#[derive(Debug, Clone)]
pub struct DeriverConfig {
    /// Root of Nomad's allocation directories on the node.
    pub allocs_dir: String,

    /// Metadata prefix for per-task overrides.
    pub meta_prefix: String,

    /// Tag prefix used when a task has no override.
    pub default_tag_prefix: String,

    /// Parser used when a task has no override. Empty for none.
    pub default_parser: String,
}

impl Default for DeriverConfig {
    fn default() -> Self {
        Self {
            allocs_dir: "/var/lib/nomad/alloc".to_string(),
            meta_prefix: "nomad-logger".to_string(),
            default_tag_prefix: "nomad".to_string(),
            default_parser: String::new(),
        }
    }
}

/// Turns allocations into log sources.
#[derive(Debug, Clone)]
pub struct LogSourceDeriver {
    config: DeriverConfig,
    meta: MetaResolver,
}

impl LogSourceDeriver {
    pub fn new(config: DeriverConfig) -> Result<Self> {
        let meta = MetaResolver::new(&config.meta_prefix)?;
        Ok(Self { config, meta })
    }

    /// Derive two sources (stdout, stderr) for every task of the allocation's
    /// task group, in task declaration order.
    pub fn derive(&self, alloc: &Allocation) -> Result<Vec<LogSource>> {
        let tasks = alloc.tasks().ok_or_else(|| LoggerError::Lookup {
            alloc_id: alloc.id.clone(),
            task_group: alloc.task_group.clone(),
        })?;

        let mut sources = Vec::with_capacity(tasks.len() * Stream::ALL.len());
        for task in tasks {
            let overrides = self.task_overrides(task)?;
            for stream in Stream::ALL {
                sources.push(self.source(alloc, task, stream, &overrides));
            }
        }

        Ok(sources)
    }

    /// Derive sources for all allocations. The first failure aborts the lot.
    pub fn derive_all(&self, allocs: &[Allocation]) -> Result<Vec<LogSource>> {
        let mut sources = Vec::new();
        for alloc in allocs {
            sources.extend(self.derive(alloc)?);
        }
        Ok(sources)
    }

    fn task_overrides(&self, task: &Task) -> Result<TaskOverrides> {
        let filter_parsers = self.meta.get(&task.meta, FILTER_PARSERS_KEY, "");
        Ok(TaskOverrides {
            tag_prefix: self
                .meta
                .get(&task.meta, TAG_PREFIX_KEY, &self.config.default_tag_prefix),
            parser: self
                .meta
                .get(&task.meta, PARSER_KEY, &self.config.default_parser),
            filter_parsers: parse_filter_parsers(&filter_parsers).map_err(|reason| {
                LoggerError::Validation {
                    task: task.name.clone(),
                    key: format!("{}.{}", self.config.meta_prefix, FILTER_PARSERS_KEY),
                    reason,
                }
            })?,
        })
    }

    fn source(
        &self,
        alloc: &Allocation,
        task: &Task,
        stream: Stream,
        overrides: &TaskOverrides,
    ) -> LogSource {
        let path = format!(
            "{}/{}/alloc/logs/{}.{}.[0-9]*",
            self.config.allocs_dir.trim_end_matches('/'),
            alloc.id,
            task.name,
            stream
        );

        LogSource {
            tag_prefix: overrides.tag_prefix.clone(),
            stream,
            path,
            parser: overrides.parser.clone(),
            filter_parsers: overrides.filter_parsers.clone(),
            labels: SourceLabels {
                namespace: alloc.namespace.clone(),
                job: alloc.job_id.clone(),
                task_group: alloc.task_group.clone(),
                task: task.name.clone(),
                alloc_id: alloc.id.clone(),
                alloc_name: alloc.name.clone(),
                node_id: alloc.node_id.clone(),
                stream,
            },
        }
    }
}

struct TaskOverrides {
    tag_prefix: String,
    parser: String,
    filter_parsers: Vec<FilterParser>,
}

/// Parse `key:parser[,key:parser...]`.
///
/// Segments are trimmed and blank ones skipped, so trailing commas and
/// spacing in job files are accepted. Both names must be non-empty: an empty
/// parser name would render a `[FILTER]` Fluent Bit rejects at startup.
pub fn parse_filter_parsers(raw: &str) -> std::result::Result<Vec<FilterParser>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut parts = segment.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(parser), None) if !key.is_empty() && !parser.is_empty() => {
                    Ok(FilterParser {
                        key: key.to_string(),
                        parser: parser.to_string(),
                    })
                }
                _ => Err(format!("expected `key:parser`, got {segment:?}")),
            }
        })
        .collect()
}
