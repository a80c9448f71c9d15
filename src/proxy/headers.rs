//! Per-experiment response header injection.
//!
//! An experiment directory may carry a `headers.json` document:
//!
//! ```json
//! [{"key": "Content-Security-Policy", "value": "default-src 'self'"}]
//! ```
//!
//! The document is read on every request. Missing or broken documents never
//! fail the request; they only produce log entries.

use std::path::{Path, PathBuf};

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use thiserror::Error;

/// Supplies extra response headers for a resolved experiment directory.
pub trait ResponseEnricher: Send + Sync {
    /// Headers in application order. Duplicate keys are allowed; the last
    /// one wins when applied.
    fn enrich(&self, resolved_dir: &Path) -> Vec<(String, String)>;
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no header metadata at {}", path.display())]
    Absent { path: PathBuf },

    #[error("failed to read header metadata {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed header metadata {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One record of the metadata document. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct HeaderRecord {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// Reads header metadata from a JSON file inside the experiment directory.
#[derive(Debug, Clone)]
pub struct HeaderFileEnricher {
    file_name: String,
}

impl HeaderFileEnricher {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Loads the document, keeping only records with a non-empty key and
    /// value.
    pub fn load(&self, dir: &Path) -> Result<Vec<(String, String)>, MetadataError> {
        let path = dir.join(&self.file_name);
        let contents = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MetadataError::Absent { path });
            }
            Err(source) => return Err(MetadataError::Unreadable { path, source }),
        };

        let records: Vec<HeaderRecord> = serde_json::from_slice(&contents)
            .map_err(|source| MetadataError::Malformed { path, source })?;

        Ok(records
            .into_iter()
            .filter_map(|r| Some((r.key?, r.value?)))
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .collect())
    }
}

impl ResponseEnricher for HeaderFileEnricher {
    fn enrich(&self, resolved_dir: &Path) -> Vec<(String, String)> {
        match self.load(resolved_dir) {
            Ok(headers) => {
                tracing::debug!(
                    dir = %resolved_dir.display(),
                    count = headers.len(),
                    "header metadata loaded"
                );
                headers
            }
            Err(e @ MetadataError::Absent { .. }) => {
                tracing::warn!(error = %e, "header metadata missing");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(error = %e, "header metadata ignored");
                Vec::new()
            }
        }
    }
}

/// Applies headers in order. Repeated keys overwrite earlier ones.
/// Framing headers are owned by the response body and never replaced.
/// Returns the number of headers applied.
pub fn apply_headers(target: &mut HeaderMap, headers: Vec<(String, String)>) -> usize {
    let mut applied = 0;
    for (key, value) in headers {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                tracing::warn!(key = %key, "skipping invalid header name");
                continue;
            }
        };
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            tracing::warn!(key = %key, "skipping framing header");
            continue;
        }
        let value = match HeaderValue::from_str(&value) {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = %key, "skipping invalid header value");
                continue;
            }
        };
        target.insert(name, value);
        applied += 1;
    }
    applied
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Records the level of every event emitted while installed.
    #[derive(Clone, Default)]
    pub(crate) struct LevelRecorder(Arc<Mutex<Vec<Level>>>);

    impl<S: Subscriber> Layer<S> for LevelRecorder {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0.lock().unwrap().push(*event.metadata().level());
        }
    }

    pub(crate) fn record_levels<R>(f: impl FnOnce() -> R) -> (R, Vec<Level>) {
        let recorder = LevelRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let out = tracing::subscriber::with_default(subscriber, f);
        let levels = recorder.0.lock().unwrap().clone();
        (out, levels)
    }

    fn write_metadata(dir: &Path, contents: &str) {
        std::fs::write(dir.join("headers.json"), contents).unwrap();
    }

    // ========== Phase 1: Loading ==========

    #[test]
    fn test_load_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(
            dir.path(),
            r#"[{"key":"X-A","value":"1"},{"key":"X-B","value":"2"}]"#,
        );

        let headers = HeaderFileEnricher::new("headers.json").load(dir.path()).unwrap();
        assert_eq!(
            headers,
            vec![("X-A".to_string(), "1".to_string()), ("X-B".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_load_skips_incomplete_records() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(
            dir.path(),
            r#"[{"key":"X-A"},{"value":"orphan"},{"key":null,"value":"x"},{"key":"X-C","value":"3","note":"ignored"}]"#,
        );

        let headers = HeaderFileEnricher::new("headers.json").load(dir.path()).unwrap();
        assert_eq!(headers, vec![("X-C".to_string(), "3".to_string())]);
    }

    #[test]
    fn test_load_drops_empty_key_or_value_silently() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(
            dir.path(),
            r#"[{"key":"X-Empty","value":""},{"key":"","value":"x"},{"key":"X-A","value":"1"}]"#,
        );
        let enricher = HeaderFileEnricher::new("headers.json");

        let (headers, levels) = record_levels(|| enricher.enrich(dir.path()));

        assert_eq!(headers, vec![("X-A".to_string(), "1".to_string())]);
        assert!(!levels.contains(&Level::WARN));
        assert!(!levels.contains(&Level::ERROR));

        let mut map = HeaderMap::new();
        let (_, levels) = record_levels(|| apply_headers(&mut map, headers));
        assert!(map.get("x-empty").is_none());
        assert!(levels.is_empty());
    }

    #[test]
    fn test_load_absent() {
        let dir = tempfile::tempdir().unwrap();
        let err = HeaderFileEnricher::new("headers.json")
            .load(dir.path())
            .unwrap_err();
        assert!(matches!(err, MetadataError::Absent { .. }));
    }

    #[test]
    fn test_load_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path(), "[{\"key\": \"X-A\",");
        let err = HeaderFileEnricher::new("headers.json")
            .load(dir.path())
            .unwrap_err();
        assert!(matches!(err, MetadataError::Malformed { .. }));
    }

    #[test]
    fn test_load_wrong_shape_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path(), r#"{"key":"X-A","value":"1"}"#);
        let err = HeaderFileEnricher::new("headers.json")
            .load(dir.path())
            .unwrap_err();
        assert!(matches!(err, MetadataError::Malformed { .. }));
    }

    #[test]
    fn test_load_custom_file_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meta.json"), r#"[{"key":"X-A","value":"1"}]"#).unwrap();
        let headers = HeaderFileEnricher::new("meta.json").load(dir.path()).unwrap();
        assert_eq!(headers.len(), 1);
    }

    // ========== Phase 2: Enrichment Logging ==========

    #[test]
    fn test_enrich_absent_logs_warning() {
        let dir = tempfile::tempdir().unwrap();
        let enricher = HeaderFileEnricher::new("headers.json");

        let (headers, levels) = record_levels(|| enricher.enrich(dir.path()));

        assert!(headers.is_empty());
        assert!(levels.contains(&Level::WARN));
        assert!(!levels.contains(&Level::ERROR));
    }

    #[test]
    fn test_enrich_malformed_logs_error() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path(), "not json");
        let enricher = HeaderFileEnricher::new("headers.json");

        let (headers, levels) = record_levels(|| enricher.enrich(dir.path()));

        assert!(headers.is_empty());
        assert!(levels.contains(&Level::ERROR));
        assert!(!levels.contains(&Level::WARN));
    }

    #[test]
    fn test_enrich_unreadable_logs_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("headers.json")).unwrap();
        let enricher = HeaderFileEnricher::new("headers.json");

        let err = enricher.load(dir.path()).unwrap_err();
        assert!(matches!(err, MetadataError::Unreadable { .. }));

        let (headers, levels) = record_levels(|| enricher.enrich(dir.path()));
        assert!(headers.is_empty());
        assert!(levels.contains(&Level::ERROR));
        assert!(!levels.contains(&Level::WARN));
    }

    #[test]
    fn test_enrich_valid_logs_no_warning() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path(), r#"[{"key":"X-A","value":"1"}]"#);
        let enricher = HeaderFileEnricher::new("headers.json");

        let (headers, levels) = record_levels(|| enricher.enrich(dir.path()));

        assert_eq!(headers.len(), 1);
        assert!(!levels.contains(&Level::WARN));
        assert!(!levels.contains(&Level::ERROR));
    }

    // ========== Phase 3: Application ==========

    #[test]
    fn test_apply_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(
            dir.path(),
            r#"[{"key":"X-A","value":"1"},{"key":"X-A","value":"2"},{"key":"X-B"}]"#,
        );
        let headers = HeaderFileEnricher::new("headers.json").enrich(dir.path());

        let mut map = HeaderMap::new();
        apply_headers(&mut map, headers);

        assert_eq!(map.get("x-a").unwrap(), "2");
        assert_eq!(map.get_all("x-a").iter().count(), 1);
        assert!(map.get("x-b").is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_apply_skips_invalid_tokens() {
        let mut map = HeaderMap::new();
        let applied = apply_headers(
            &mut map,
            vec![
                ("Bad Name".to_string(), "1".to_string()),
                ("X-Newline".to_string(), "a\nb".to_string()),
                ("X-Ok".to_string(), "1".to_string()),
            ],
        );
        assert_eq!(applied, 1);
        assert_eq!(map.get("x-ok").unwrap(), "1");
    }

    #[test]
    fn test_apply_keeps_framing_headers() {
        let mut map = HeaderMap::new();
        map.insert(CONTENT_LENGTH, HeaderValue::from(5usize));

        let (applied, levels) = record_levels(|| {
            apply_headers(
                &mut map,
                vec![
                    ("Content-Length".to_string(), "999".to_string()),
                    ("Transfer-Encoding".to_string(), "chunked".to_string()),
                    ("X-A".to_string(), "1".to_string()),
                ],
            )
        });

        assert_eq!(applied, 1);
        assert_eq!(map.get(CONTENT_LENGTH).unwrap(), "5");
        assert!(map.get(TRANSFER_ENCODING).is_none());
        assert!(levels.contains(&Level::WARN));
    }

    #[test]
    fn test_enricher_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HeaderFileEnricher>();
    }
}
