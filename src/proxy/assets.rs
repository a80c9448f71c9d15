//! Static asset lookup and response construction.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};

use crate::error::RouteError;

/// A file found on disk for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub file: PathBuf,
    /// Directory the header metadata document is looked up in.
    pub dir: PathBuf,
}

/// A fully built static response.
#[derive(Debug, Clone)]
pub struct StaticResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Finds the file for `segments` under `root`.
///
/// Directory-style requests try each index file in order; the first
/// regular file wins.
pub fn resolve_file(
    root: &Path,
    segments: &[String],
    directory: bool,
    index_files: &[String],
) -> Result<ResolvedFile, RouteError> {
    let base: PathBuf = root.join(segments.iter().collect::<PathBuf>());
    let not_found = || RouteError::NotFound {
        path: base.display().to_string(),
    };

    if directory {
        return index_files
            .iter()
            .map(|name| base.join(name))
            .find(|candidate| candidate.is_file())
            .map(|file| ResolvedFile {
                file,
                dir: base.clone(),
            })
            .ok_or_else(not_found);
    }

    if !base.is_file() {
        return Err(not_found());
    }
    let dir = base.parent().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    Ok(ResolvedFile { file: base, dir })
}

/// Reads the file and builds a `200` response with type and length set.
pub fn load(resolved: &ResolvedFile) -> Result<StaticResponse, RouteError> {
    let body = std::fs::read(&resolved.file).map_err(|source| RouteError::Io {
        path: resolved.file.clone(),
        source,
    })?;

    let mime = mime_guess::from_path(&resolved.file).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    Ok(StaticResponse {
        status: 200,
        headers,
        body: Bytes::from(body),
    })
}

/// Plain-text error response. The body never names on-disk paths.
pub fn error_response(err: &RouteError) -> StaticResponse {
    let body = Bytes::from(format!("{}\n", err.client_message()));
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    StaticResponse {
        status: err.status(),
        headers,
        body,
    }
}
