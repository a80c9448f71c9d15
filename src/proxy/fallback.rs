//! Fallback path transformation.
//!
//! When a static path signals a gateway timeout, the request is
//! re-dispatched once against a transformed path. Which transformation
//! applies is operator policy.

use serde::Deserialize;

/// How a timed-out path is rewritten before the single retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// `/a/b/c` -> `/a/b/c/`
    #[default]
    AppendSlash,
    /// `/a/b/c` -> `/a/b/`
    StripLastSegment,
}

impl FallbackPolicy {
    /// Returns the retry path, or `None` when the policy cannot make
    /// progress on this path.
    pub fn apply(&self, path: &str) -> Option<String> {
        match self {
            FallbackPolicy::AppendSlash => {
                if path.ends_with('/') {
                    None
                } else {
                    Some(format!("{}/", path))
                }
            }
            FallbackPolicy::StripLastSegment => {
                let trimmed = path.trim_end_matches('/');
                if trimmed.is_empty() {
                    return None;
                }
                trimmed
                    .rfind('/')
                    .map(|idx| trimmed[..=idx].to_string())
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackPolicy::AppendSlash => "append_slash",
            FallbackPolicy::StripLastSegment => "strip_last_segment",
        }
    }
}
