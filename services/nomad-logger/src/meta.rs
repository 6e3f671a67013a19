//! Per-task overrides read from Nomad task metadata.
//!
//! Overrides live under `<prefix>.<key>` in a task's `meta` block, e.g. with
//! the default prefix `nomad-logger.parser = "json"`.

use std::collections::HashMap;

use regex::Regex;

/// Extracts overrides for one configured metadata prefix.
#[derive(Debug, Clone)]
pub struct MetaResolver {
    pattern: Regex,
}

impl MetaResolver {
    /// Build a resolver for `prefix`. The prefix is matched literally.
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!("^{}\\.", regex::escape(prefix)))?;
        Ok(Self { pattern })
    }

    /// All overrides of a task, keyed by the metadata key without its prefix.
    ///
    /// Recomputed on every call. If two source keys strip to the same key the
    /// last one visited wins.
    pub fn overrides(&self, meta: &HashMap<String, String>) -> HashMap<String, String> {
        meta.iter()
            .filter_map(|(key, value)| {
                let matched = self.pattern.find(key)?;
                Some((key[matched.end()..].to_string(), value.clone()))
            })
            .collect()
    }

    /// Value of override `key`, or `default` when the task does not set it.
    pub fn get(&self, meta: &HashMap<String, String>, key: &str, default: &str) -> String {
        self.overrides(meta)
            .remove(key)
            .unwrap_or_else(|| default.to_string())
    }
}

/// One-shot form of [`MetaResolver::get`].
pub fn resolve(meta: &HashMap<String, String>, prefix: &str, key: &str, default: &str) -> String {
    match MetaResolver::new(prefix) {
        Ok(resolver) => resolver.get(meta, key, default),
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case::present(&[("nomad-logger.parser", "json")], "parser", "json")]
    #[case::absent(&[("other", "x")], "parser", "default")]
    #[case::empty_value(&[("nomad-logger.parser", "")], "parser", "")]
    #[case::prefix_not_at_start(&[("x.nomad-logger.parser", "json")], "parser", "default")]
    #[case::missing_dot(&[("nomad-loggerparser", "json")], "parser", "default")]
    #[case::nested_key(&[("nomad-logger.fluentbit.parser", "logfmt")], "fluentbit.parser", "logfmt")]
    fn test_resolve(#[case] pairs: &[(&str, &str)], #[case] key: &str, #[case] expected: &str) {
        assert_eq!(resolve(&meta(pairs), "nomad-logger", key, "default"), expected);
    }

    #[test]
    fn test_empty_meta_uses_default() {
        assert_eq!(resolve(&HashMap::new(), "log", "parser", "none"), "none");
    }

    #[test]
    fn test_prefix_is_literal() {
        // `.` in the prefix must not match arbitrary characters
        let resolver = MetaResolver::new("a.b").unwrap();
        let m = meta(&[("axb.parser", "wrong"), ("a.b.tag-prefix", "right")]);

        assert_eq!(resolver.get(&m, "parser", "default"), "default");
        assert_eq!(resolver.get(&m, "tag-prefix", "default"), "right");
    }

    #[test]
    fn test_overrides_strip_prefix() {
        let resolver = MetaResolver::new("log").unwrap();
        let m = meta(&[
            ("log.parser", "json"),
            ("log.filter-parsers", "msg:json"),
            ("owner", "team-a"),
        ]);

        let overrides = resolver.overrides(&m);
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides["parser"], "json");
        assert_eq!(overrides["filter-parsers"], "msg:json");
    }
}
