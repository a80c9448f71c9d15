//! Path predicates used by route rules.
//!
//! Supports exact, prefix (segment-aware), suffix and multi-segment
//! wildcard patterns. Wildcard patterns are written as paths:
//! - `*` matches exactly one non-empty segment
//! - `py-*` matches one segment starting with `py-` followed by at least one char
//! - `**` matches one or more remaining segments (last token only)
//! - a trailing `/` requires a directory-style path, its absence forbids one

use std::fmt;

use crate::error::{ConfigError, RouteError};

/// A normalized request path split into segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    normalized: String,
    segments: Vec<String>,
    directory: bool,
}

impl RequestPath {
    /// Normalizes a raw URI path.
    ///
    /// Collapses duplicate slashes. Rejects `.` and `..` segments, backslashes
    /// and NUL bytes, since the result may be joined onto an on-disk root.
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        if !raw.starts_with('/') || raw.contains('\\') || raw.contains('\0') {
            return Err(RouteError::BadPath(raw.to_string()));
        }

        let segments: Vec<String> = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        if segments.iter().any(|s| s == "." || s == "..") {
            return Err(RouteError::BadPath(raw.to_string()));
        }

        let directory = segments.is_empty() || raw.ends_with('/');
        let mut normalized = String::with_capacity(raw.len());
        normalized.push('/');
        normalized.push_str(&segments.join("/"));
        if directory && !segments.is_empty() {
            normalized.push('/');
        }

        Ok(Self {
            normalized,
            segments,
            directory,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when the path ends with `/` (or is the root).
    pub fn is_directory(&self) -> bool {
        self.directory
    }
}

/// One token of a wildcard segment pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    /// Matches a segment that starts with the prefix and is longer than it.
    Glob(String),
    Rest,
}

/// Multi-segment wildcard pattern, e.g. `/*/*/**/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPattern {
    source: String,
    tokens: Vec<Token>,
    directory: bool,
}

impl SegmentPattern {
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let body = pattern
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;
        let (body, directory) = match body.strip_suffix('/') {
            Some(stripped) => (stripped, true),
            None => (body, body.is_empty()),
        };

        let mut tokens = Vec::new();
        if !body.is_empty() {
            let parts: Vec<&str> = body.split('/').collect();
            for (i, part) in parts.iter().enumerate() {
                let token = match *part {
                    "" => return Err(invalid("empty segment")),
                    "**" if i + 1 != parts.len() => {
                        return Err(invalid("'**' must be the last segment"))
                    }
                    "**" => Token::Rest,
                    p if p.ends_with('*') => {
                        let prefix = &p[..p.len() - 1];
                        if prefix.contains('*') {
                            return Err(invalid("'*' is only allowed at the end of a segment"));
                        }
                        Token::Glob(prefix.to_string())
                    }
                    p if p.contains('*') => {
                        return Err(invalid("'*' is only allowed at the end of a segment"))
                    }
                    p => Token::Literal(p.to_string()),
                };
                tokens.push(token);
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
            directory,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Matches the path, returning captured wildcard segments in order.
    /// `**` captures the remaining segments joined with `/`.
    fn captures(&self, path: &RequestPath) -> Option<Vec<String>> {
        if path.is_directory() != self.directory {
            return None;
        }

        let segments = path.segments();
        let mut captures = Vec::new();

        for (i, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Rest => {
                    let rest = segments.get(i..).filter(|r| !r.is_empty())?;
                    captures.push(rest.join("/"));
                    return Some(captures);
                }
                Token::Literal(lit) => {
                    if segments.get(i)? != lit {
                        return None;
                    }
                }
                Token::Glob(prefix) => {
                    let seg = segments.get(i)?;
                    if !seg.starts_with(prefix.as_str()) || seg.len() <= prefix.len() {
                        return None;
                    }
                    captures.push(seg.clone());
                }
            }
        }

        (segments.len() == self.tokens.len()).then_some(captures)
    }
}

/// Path predicate of a route rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches every path.
    Any,
    Exact(String),
    /// Segment-aware prefix: `/api` matches `/api`, `/api/`, `/api/x` but not `/apikeys`.
    Prefix(String),
    /// Matches when the path ends with any of the suffixes.
    Suffix(Vec<String>),
    Segments(SegmentPattern),
}

impl PathPattern {
    /// Returns the captured segments when the pattern matches.
    ///
    /// Only `Segments` patterns capture anything; the others return an
    /// empty capture list on a match.
    pub fn matches(&self, path: &RequestPath) -> Option<Vec<String>> {
        let p = path.as_str();
        match self {
            PathPattern::Any => Some(Vec::new()),
            PathPattern::Exact(value) => (p == value.as_str()).then(Vec::new),
            PathPattern::Prefix(prefix) => prefix_matches(prefix, p).then(Vec::new),
            PathPattern::Suffix(suffixes) => suffixes
                .iter()
                .any(|s| p.ends_with(s.as_str()))
                .then(Vec::new),
            PathPattern::Segments(pattern) => pattern.captures(path),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Any => write!(f, "any"),
            PathPattern::Exact(value) => write!(f, "exact {}", value),
            PathPattern::Prefix(prefix) => write!(f, "prefix {}", prefix),
            PathPattern::Suffix(suffixes) => write!(f, "suffix {}", suffixes.join("|")),
            PathPattern::Segments(pattern) => write!(f, "segments {}", pattern.as_str()),
        }
    }
}

/// Prefix matching respecting segment boundaries.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if path == prefix {
        return true;
    }
    if path.starts_with(prefix) {
        if prefix.ends_with('/') {
            return true;
        }
        return path.as_bytes().get(prefix.len()) == Some(&b'/');
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> RequestPath {
        RequestPath::parse(raw).unwrap()
    }

    fn segments(pattern: &str) -> PathPattern {
        PathPattern::Segments(SegmentPattern::parse(pattern).unwrap())
    }

    // ========== Phase 1: Path Normalization ==========

    #[test]
    fn test_parse_root() {
        let p = path("/");
        assert_eq!(p.as_str(), "/");
        assert!(p.segments().is_empty());
        assert!(p.is_directory());
    }

    #[test]
    fn test_parse_collapses_duplicate_slashes() {
        let p = path("//a///b//c/");
        assert_eq!(p.as_str(), "/a/b/c/");
        assert_eq!(p.segments(), ["a", "b", "c"]);
        assert!(p.is_directory());
    }

    #[test]
    fn test_parse_file_path() {
        let p = path("/a/b/c");
        assert_eq!(p.as_str(), "/a/b/c");
        assert!(!p.is_directory());
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert!(RequestPath::parse("/a/../etc/passwd").is_err());
        assert!(RequestPath::parse("/a/./b/").is_err());
        assert!(RequestPath::parse("/..").is_err());
    }

    #[test]
    fn test_parse_rejects_backslash_and_nul() {
        assert!(RequestPath::parse("/a\\b").is_err());
        assert!(RequestPath::parse("/a\0b").is_err());
    }

    #[test]
    fn test_parse_requires_leading_slash() {
        assert!(RequestPath::parse("a/b").is_err());
        assert!(RequestPath::parse("").is_err());
    }

    #[test]
    fn test_parse_keeps_dots_inside_segments() {
        let p = path("/res/app.min.js");
        assert_eq!(p.segments(), ["res", "app.min.js"]);
    }

    // ========== Phase 2: Literal Patterns ==========

    #[test]
    fn test_any_matches_everything() {
        assert!(PathPattern::Any.matches(&path("/")).is_some());
        assert!(PathPattern::Any.matches(&path("/x/y/z")).is_some());
    }

    #[test]
    fn test_exact_match() {
        let pattern = PathPattern::Exact("/report/".into());
        assert!(pattern.matches(&path("/report/")).is_some());
        assert!(pattern.matches(&path("/report")).is_none());
        assert!(pattern.matches(&path("/report/x/")).is_none());
    }

    #[test]
    fn test_prefix_requires_segment_boundary() {
        let pattern = PathPattern::Prefix("/res".into());
        assert!(pattern.matches(&path("/res")).is_some());
        assert!(pattern.matches(&path("/res/")).is_some());
        assert!(pattern.matches(&path("/res/app.js")).is_some());
        assert!(pattern.matches(&path("/resources")).is_none());
    }

    #[test]
    fn test_prefix_with_trailing_slash() {
        let pattern = PathPattern::Prefix("/report/".into());
        assert!(pattern.matches(&path("/report/")).is_some());
        assert!(pattern.matches(&path("/report/if/X-Test/")).is_some());
        assert!(pattern.matches(&path("/report")).is_none());
    }

    #[test]
    fn test_suffix_any_of() {
        let pattern = PathPattern::Suffix(vec!["/index.html".into(), "/index.js".into()]);
        assert!(pattern.matches(&path("/g/e/a.test/v/index.html")).is_some());
        assert!(pattern.matches(&path("/g/e/a.test/v/index.js")).is_some());
        assert!(pattern.matches(&path("/g/e/a.test/v/myindex.html")).is_none());
        assert!(pattern.matches(&path("/g/e/a.test/v/")).is_none());
    }

    // ========== Phase 3: Segment Patterns ==========

    #[test]
    fn test_segment_pattern_parse_errors() {
        assert!(SegmentPattern::parse("*/*").is_err());
        assert!(SegmentPattern::parse("/a//b/").is_err());
        assert!(SegmentPattern::parse("/**/a/").is_err());
        assert!(SegmentPattern::parse("/a*b/").is_err());
        assert!(SegmentPattern::parse("/*a*/").is_err());
    }

    #[test]
    fn test_single_wildcards_capture_segments() {
        let pattern = segments("/*/*/py-*/");
        assert_eq!(
            pattern.matches(&path("/proj/exp/py-check/")),
            Some(vec!["proj".into(), "exp".into(), "py-check".into()])
        );
    }

    #[test]
    fn test_glob_prefix_requires_more_than_prefix() {
        let pattern = segments("/*/*/py-*/");
        assert!(pattern.matches(&path("/proj/exp/py-/")).is_none());
        assert!(pattern.matches(&path("/proj/exp/check/")).is_none());
    }

    #[test]
    fn test_directory_flag_must_agree() {
        let dir = segments("/*/*/*/");
        let file = segments("/*/*/*");
        assert!(dir.matches(&path("/a/b/c/")).is_some());
        assert!(dir.matches(&path("/a/b/c")).is_none());
        assert!(file.matches(&path("/a/b/c")).is_some());
        assert!(file.matches(&path("/a/b/c/")).is_none());
    }

    #[test]
    fn test_segment_count_must_match_without_rest() {
        let pattern = segments("/*/*/*/");
        assert!(pattern.matches(&path("/a/b/")).is_none());
        assert!(pattern.matches(&path("/a/b/c/d/")).is_none());
    }

    #[test]
    fn test_rest_matches_one_or_more() {
        let pattern = segments("/*/*/**/");
        assert!(pattern.matches(&path("/a/b/")).is_none());
        assert_eq!(
            pattern.matches(&path("/a/b/c/")),
            Some(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(
            pattern.matches(&path("/a/b/c/d/e/")),
            Some(vec!["a".into(), "b".into(), "c/d/e".into()])
        );
    }

    #[test]
    fn test_literal_segments() {
        let pattern = segments("/report/if/*/");
        assert!(pattern.matches(&path("/report/if/X-Test/")).is_some());
        assert!(pattern.matches(&path("/report/else/X-Test/")).is_none());
    }

    #[test]
    fn test_root_segment_pattern() {
        let pattern = segments("/");
        assert!(pattern.matches(&path("/")).is_some());
        assert!(pattern.matches(&path("/a/")).is_none());
    }

    #[test]
    fn test_display_names_pattern() {
        let segments = PathPattern::Segments(SegmentPattern::parse("/*/*/py-*/").unwrap());
        assert_eq!(segments.to_string(), "segments /*/*/py-*/");
        let suffix = PathPattern::Suffix(vec!["/index.html".into(), "/index.js".into()]);
        assert_eq!(suffix.to_string(), "suffix /index.html|/index.js");
        assert_eq!(PathPattern::Prefix("/res".into()).to_string(), "prefix /res");
    }
}
