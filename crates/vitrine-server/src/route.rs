//! Route patterns for exhibit request dispatch
//!
//! A pattern is a `/`-separated list of segments:
//! - `name` matches the literal segment
//! - `{name}` captures exactly one segment
//! - `>>` captures the rest of the path and may only appear last
//!
//! Without a trailing `>>` the path must have as many segments as the
//! pattern. With one, the path may be longer, or omit the rest entirely:
//! `/exhibit/{id}/>>` matches `/exhibit/abc` with an empty rest.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static CAPTURE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{(\w+)\}$").expect("valid capture pattern"));

static LITERAL_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.-]+$").expect("valid literal pattern"));

const REST_SEGMENT: &str = ">>";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern '{0}' must start with '/'")]
    NotAbsolute(String),
    #[error("'>>' must be the last segment of '{0}'")]
    RestNotLast(String),
    #[error("capture '{name}' appears twice in '{pattern}'")]
    DuplicateCapture { pattern: String, name: String },
    #[error("illegal segment '{segment}' in '{pattern}'")]
    IllegalSegment { pattern: String, segment: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
    Rest,
}

/// Values bound by a successful match
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteMatch {
    params: HashMap<String, String>,
    rest: Option<String>,
}

impl RouteMatch {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Remainder captured by `>>`, without a leading slash
    pub fn rest(&self) -> Option<&str> {
        self.rest.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPattern {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let Some(body) = pattern.strip_prefix('/') else {
            return Err(PatternError::NotAbsolute(pattern.to_string()));
        };

        let parts: Vec<&str> = body.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == REST_SEGMENT {
                if i != parts.len() - 1 {
                    return Err(PatternError::RestNotLast(pattern.to_string()));
                }
                Segment::Rest
            } else if let Some(captures) = CAPTURE_SEGMENT.captures(part) {
                let name = captures[1].to_string();
                if segments.contains(&Segment::Capture(name.clone())) {
                    return Err(PatternError::DuplicateCapture {
                        pattern: pattern.to_string(),
                        name,
                    });
                }
                Segment::Capture(name)
            } else if LITERAL_SEGMENT.is_match(part) {
                Segment::Literal(part.to_string())
            } else {
                return Err(PatternError::IllegalSegment {
                    pattern: pattern.to_string(),
                    segment: part.to_string(),
                });
            };
            segments.push(segment);
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, path: &str) -> Option<RouteMatch> {
        let parts: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
        let has_rest = matches!(self.segments.last(), Some(Segment::Rest));
        let min_len = if has_rest {
            self.segments.len() - 1
        } else {
            self.segments.len()
        };
        if parts.len() < min_len || (!has_rest && parts.len() != self.segments.len()) {
            return None;
        }

        let mut matched = RouteMatch::default();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) if literal == parts[i] => {}
                Segment::Literal(_) => return None,
                Segment::Capture(name) => {
                    matched.params.insert(name.clone(), parts[i].to_string());
                }
                Segment::Rest => {
                    matched.rest = Some(parts[i..].join("/"));
                }
            }
        }
        Some(matched)
    }
}
