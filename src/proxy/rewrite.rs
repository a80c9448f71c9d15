//! Experiment path rewriting.
//!
//! `/{group}/{experiment}/{variant}/...` requested on host `H` lives on disk
//! at `{group}/{experiment}/{H}/{variant}/...`. `rewrite` consumes an
//! `ExperimentPath` and returns a `CanonicalPath`, which cannot be fed back
//! in: rewriting the string form of a canonical path again would insert the
//! host a second time.

use crate::error::RouteError;
use crate::routes::RequestPath;

/// Segments before the inserted host.
const HOST_SEGMENT_INDEX: usize = 2;

/// A validated, lowercased hostname usable as a single path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostName(String);

impl HostName {
    /// Validates a host with the port already stripped.
    ///
    /// Only `[a-z0-9.-]` is accepted, so the result can never escape its
    /// directory when joined onto the asset root.
    pub fn parse(host: &str) -> Result<Self, RouteError> {
        let host = host.to_ascii_lowercase();
        let valid = !host.is_empty()
            && host.len() <= 253
            && !host.starts_with('.')
            && !host.ends_with('.')
            && !host.contains("..")
            && host
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.');
        if valid {
            Ok(Self(host))
        } else {
            Err(RouteError::InvalidHost(host))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A request path with at least three segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentPath {
    segments: Vec<String>,
    directory: bool,
}

impl ExperimentPath {
    /// Returns `None` for paths with fewer than three segments; those are
    /// never rewritten.
    pub fn from_request(path: &RequestPath) -> Option<Self> {
        (path.segments().len() > HOST_SEGMENT_INDEX).then(|| Self {
            segments: path.segments().to_vec(),
            directory: path.is_directory(),
        })
    }
}

/// Host-qualified experiment path, relative to the pages root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPath {
    segments: Vec<String>,
    directory: bool,
}

impl CanonicalPath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// URL form, e.g. `/g/e/a.test/v/`.
    pub fn as_url_path(&self) -> String {
        let mut out = format!("/{}", self.segments.join("/"));
        if self.directory {
            out.push('/');
        }
        out
    }
}

/// Inserts the host as the third segment.
pub fn rewrite(path: ExperimentPath, host: &HostName) -> CanonicalPath {
    let mut segments = path.segments;
    segments.insert(HOST_SEGMENT_INDEX, host.as_str().to_string());
    CanonicalPath {
        segments,
        directory: path.directory,
    }
}
