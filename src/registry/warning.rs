//! Registry warning headers and their per-registry deduplication

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use reqwest::header::{HeaderMap, WARNING};

use crate::logging::Logger;

/// Only `299` ("miscellaneous persistent warning") is surfaced by registries
const WARNING_CODE: u16 = 299;
const WARNING_AGENT: &str = "-";

/// A server-supplied advisory from a `Warning` header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Warning {
    pub code: u16,
    pub agent: String,
    pub text: String,
}

/// Callback a repository hands every warning it receives
pub type WarningHandler = Arc<dyn Fn(&Warning) + Send + Sync>;

/// Parse `299 - "text"`; other codes, agents or shapes are ignored
pub fn parse_warning(value: &str) -> Option<Warning> {
    let mut parts = value.trim().splitn(3, ' ');
    let code: u16 = parts.next()?.parse().ok()?;
    let agent = parts.next()?;
    let quoted = parts.next()?.trim();
    if code != WARNING_CODE || agent != WARNING_AGENT {
        return None;
    }
    let text = quoted.strip_prefix('"')?.strip_suffix('"')?;
    if text.is_empty() {
        return None;
    }
    Some(Warning {
        code,
        agent: agent.to_string(),
        text: text.replace("\\\"", "\"").replace("\\\\", "\\"),
    })
}

/// All well-formed warnings in a response's headers
pub fn warnings_from_headers(headers: &HeaderMap) -> Vec<Warning> {
    headers
        .get_all(WARNING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_warning)
        .collect()
}

/// Remembers which warning texts each registry has already shown.
///
/// Clones share one set, so a source and destination targeting the same
/// registry print each warning once between them.
#[derive(Debug, Clone, Default)]
pub struct WarningDeduplicator {
    seen: Arc<Mutex<HashMap<String, HashSet<String>>>>,
}

impl WarningDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `text` is offered for `registry`
    pub fn first_seen(&self, registry: &str, text: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.entry(registry.to_string())
            .or_default()
            .insert(text.to_string())
    }

    /// Handler that logs each distinct warning from `registry` once
    pub fn handler_for(&self, registry: &str, logger: Logger) -> WarningHandler {
        let dedup = self.clone();
        let registry = registry.to_string();
        Arc::new(move |warning: &Warning| {
            if dedup.first_seen(&registry, &warning.text) {
                logger.warning(&format!("{} (registry: {})", warning.text, registry));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Level, MemorySink};
    use reqwest::header::HeaderValue;

    fn warning(text: &str) -> Warning {
        Warning {
            code: 299,
            agent: "-".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_warning() {
        assert_eq!(parse_warning(r#"299 - "deprecated API""#), Some(warning("deprecated API")));
        assert_eq!(parse_warning(r#"199 - "other code""#), None);
        assert_eq!(parse_warning(r#"299 agent "text""#), None);
        assert_eq!(parse_warning("299 - unquoted"), None);
        assert_eq!(parse_warning(r#"299 - """#), None);
    }

    #[test]
    fn test_warnings_from_headers() {
        let mut headers = HeaderMap::new();
        headers.append(WARNING, HeaderValue::from_static(r#"299 - "first""#));
        headers.append(WARNING, HeaderValue::from_static("garbage"));
        headers.append(WARNING, HeaderValue::from_static(r#"299 - "second""#));
        let texts: Vec<String> = warnings_from_headers(&headers)
            .into_iter()
            .map(|w| w.text)
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_same_warning_surfaces_once() {
        let sink = MemorySink::new();
        let dedup = WarningDeduplicator::new();
        let handler = dedup.handler_for("registry.example.com", Logger::with_sink(false, sink.clone()));

        handler(&warning("quota almost reached"));
        handler(&warning("quota almost reached"));
        handler(&warning("repository is read-only"));

        let shown = sink.messages(Level::Warning);
        assert_eq!(shown.len(), 2);
        assert!(shown[0].contains("quota almost reached"));
        assert!(shown[1].contains("repository is read-only"));
    }

    #[test]
    fn test_registries_are_tracked_separately() {
        let dedup = WarningDeduplicator::new();
        assert!(dedup.first_seen("a.example.com", "text"));
        assert!(dedup.first_seen("b.example.com", "text"));
        assert!(!dedup.clone().first_seen("a.example.com", "text"));
    }

    #[test]
    fn test_concurrent_first_seen_is_exclusive() {
        let dedup = WarningDeduplicator::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dedup = dedup.clone();
                std::thread::spawn(move || dedup.first_seen("r.example.com", "same"))
            })
            .collect();
        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|first| *first)
            .count();
        assert_eq!(firsts, 1);
    }
}
