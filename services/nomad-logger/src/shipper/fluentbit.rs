//! Fluent Bit backend.
//!
//! Every log source becomes a `tail` input, one `parser` filter per
//! configured filter parser, and a `record_modifier` filter adding the Nomad
//! labels to each record.

use handlebars::Handlebars;
use serde::Serialize;

use super::{LogShipper, Pipeline};
use crate::error::{LoggerError, Result};
use crate::source::{FilterParser, LogSource, SourceLabels};

const TEMPLATE_NAME: &str = "fluentbit-conf";
const TEMPLATE: &str = include_str!("../../templates/fluentbit.conf.hbs");

#[derive(Serialize)]
struct InputContext<'a> {
    tag: String,
    path: &'a str,
    parser: &'a str,
    filter_parsers: &'a [FilterParser],
    labels: &'a SourceLabels,
}

impl<'a> From<&'a LogSource> for InputContext<'a> {
    fn from(source: &'a LogSource) -> Self {
        Self {
            tag: source.tag(),
            path: &source.path,
            parser: &source.parser,
            filter_parsers: &source.filter_parsers,
            labels: &source.labels,
        }
    }
}

pub struct Fluentbit {
    pipeline: Pipeline,
    templates: Handlebars<'static>,
}

impl Fluentbit {
    pub fn new(pipeline: Pipeline) -> Result<Self> {
        let mut templates = Handlebars::new();
        // Config values are written verbatim
        templates.register_escape_fn(handlebars::no_escape);
        templates
            .register_template_string(TEMPLATE_NAME, TEMPLATE)
            .map_err(|e| LoggerError::Template(format!("invalid fluentbit template: {e}")))?;

        Ok(Self {
            pipeline,
            templates,
        })
    }
}

impl LogShipper for Fluentbit {
    fn name(&self) -> &'static str {
        "fluentbit"
    }

    fn render(&self, sources: &[LogSource]) -> Result<String> {
        let mut config = String::new();
        for source in sources {
            let rendered = self
                .templates
                .render(TEMPLATE_NAME, &InputContext::from(source))
                .map_err(|e| {
                    LoggerError::Template(format!("failed to render {}: {e}", source.tag()))
                })?;
            config.push_str(&rendered);
        }
        Ok(config)
    }

    fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::{ConfigWriter, ShellRunner};
    use crate::source::{DeriverConfig, LogSourceDeriver, Stream};
    use std::sync::Arc;

    fn fluentbit() -> Fluentbit {
        let deriver = LogSourceDeriver::new(DeriverConfig::default()).unwrap();
        let writer = ConfigWriter::new("/nonexistent/nomad.conf", "", Arc::new(ShellRunner));
        Fluentbit::new(Pipeline::new(deriver, writer)).unwrap()
    }

    fn source(stream: Stream, parser: &str, filter_parsers: Vec<FilterParser>) -> LogSource {
        LogSource {
            tag_prefix: "nomad".to_string(),
            stream,
            path: format!("/var/lib/nomad/alloc/alloc-123/alloc/logs/server.{stream}.[0-9]*"),
            parser: parser.to_string(),
            filter_parsers,
            labels: SourceLabels {
                namespace: "default".to_string(),
                job: "web".to_string(),
                task_group: "api".to_string(),
                task: "server".to_string(),
                alloc_id: "alloc-123".to_string(),
                alloc_name: "web.api[0]".to_string(),
                node_id: "node-1".to_string(),
                stream,
            },
        }
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(fluentbit().render(&[]).unwrap(), "");
    }

    #[test]
    fn test_render_input_without_parser() {
        let out = fluentbit()
            .render(&[source(Stream::Stdout, "", vec![])])
            .unwrap();

        assert!(out.starts_with("[INPUT]\n    Name              tail\n"));
        assert!(out.contains("    Tag               nomad.alloc-123.server.stdout\n"));
        assert!(out.contains(
            "    Path              /var/lib/nomad/alloc/alloc-123/alloc/logs/server.stdout.[0-9]*\n    Path_Key"
        ));
        assert!(!out.contains("    Parser "));
        assert!(!out.contains("Name              parser"));
        assert!(out.contains("    Record            nomad_alloc_name web.api[0]\n"));
        assert!(out.contains("    Record            nomad_log_stream stdout\n"));
    }

    #[test]
    fn test_render_parser_and_filters() {
        let filters = vec![
            FilterParser {
                key: "log".to_string(),
                parser: "logfmt".to_string(),
            },
            FilterParser {
                key: "msg".to_string(),
                parser: "json".to_string(),
            },
        ];
        let out = fluentbit()
            .render(&[source(Stream::Stderr, "json", filters)])
            .unwrap();

        assert!(out.contains("server.stderr.[0-9]*\n    Parser            json\n    Path_Key"));
        assert_eq!(out.matches("Name              parser").count(), 2);
        assert!(out.contains(
            "    Match             nomad.alloc-123.server.stderr\n    Key_Name          log\n    Parser            logfmt\n"
        ));
        assert!(out.contains("    Key_Name          msg\n    Parser            json\n"));
    }

    #[test]
    fn test_render_concatenates_in_order() {
        let out = fluentbit()
            .render(&[
                source(Stream::Stdout, "", vec![]),
                source(Stream::Stderr, "", vec![]),
            ])
            .unwrap();

        assert_eq!(out.matches("[INPUT]").count(), 2);
        let stdout = out.find("Tag               nomad.alloc-123.server.stdout").unwrap();
        let stderr = out.find("Tag               nomad.alloc-123.server.stderr").unwrap();
        assert!(stdout < stderr);
    }
}
