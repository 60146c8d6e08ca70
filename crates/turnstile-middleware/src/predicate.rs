//! Path predicates for stage activation.
//!
//! A [`PathPredicate`] decides whether a stage applies to a request path.
//! Patterns are matched segment by segment:
//!
//! | Pattern        | Matches                                    |
//! |----------------|--------------------------------------------|
//! | `/info`        | exactly `/info`                            |
//! | `/api/**`      | `/api` and everything below it             |
//! | `/users/*`     | one segment below `/users`                 |
//! | `/files/*.txt` | one segment ending in `.txt`               |
//! | `/v?/health`   | `/v1/health`, `/v2/health`, ...            |
//!
//! Empty segments are ignored, so `/api/data/` and `/api//data` both match
//! `/api/data`.
//!
//! # Example
//!
//! ```
//! use turnstile_middleware::PathPredicate;
//!
//! let api = PathPredicate::parse("/api/**").unwrap();
//! assert!(api.matches("/api/data"));
//! assert!(api.matches("/api"));
//! assert!(!api.matches("/apix"));
//! ```

use std::fmt;
use thiserror::Error;

/// Errors produced while parsing a path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    /// The pattern was empty.
    #[error("path pattern is empty")]
    Empty,

    /// The pattern did not start with `/`.
    #[error("path pattern `{0}` must start with `/`")]
    MissingLeadingSlash(String),

    /// `**` appeared inside a segment instead of as a whole segment.
    #[error("path pattern `{0}`: `**` must be a whole segment")]
    MisplacedDoubleStar(String),

    /// A predicate set was built from no patterns.
    #[error("path predicate needs at least one pattern")]
    NoPatterns,
}

/// Decides which request paths a stage applies to.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum PathPredicate {
    /// Matches every path.
    #[default]
    Any,
    /// Matches one exact path.
    Exact(String),
    /// Matches a path and everything below it, on segment boundaries.
    Prefix(String),
    /// Matches a wildcard pattern.
    Glob(GlobPattern),
    /// Matches if any inner predicate matches.
    AnyOf(Vec<PathPredicate>),
}

impl PathPredicate {
    /// Parses a single pattern.
    ///
    /// `/**` becomes [`PathPredicate::Any`]. A pattern whose only wildcard is a
    /// trailing `/**` becomes a [`PathPredicate::Prefix`]. Other wildcard
    /// patterns become globs; everything else matches exactly.
    pub fn parse(pattern: &str) -> Result<Self, PredicateError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(PredicateError::Empty);
        }
        if !pattern.starts_with('/') {
            return Err(PredicateError::MissingLeadingSlash(pattern.to_string()));
        }

        let glob = GlobPattern::parse(pattern)?;
        Ok(glob.simplify())
    }

    /// Parses a set of patterns into one predicate.
    ///
    /// A single pattern yields that pattern's predicate; several yield
    /// [`PathPredicate::AnyOf`].
    pub fn parse_all<I, S>(patterns: I) -> Result<Self, PredicateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = patterns
            .into_iter()
            .map(|p| Self::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        match parsed.len() {
            0 => Err(PredicateError::NoPatterns),
            1 => Ok(parsed.remove(0)),
            _ if parsed.contains(&Self::Any) => Ok(Self::Any),
            _ => Ok(Self::AnyOf(parsed)),
        }
    }

    /// Matches one exact path.
    pub fn exact(path: impl Into<String>) -> Self {
        Self::Exact(normalize(&path.into()))
    }

    /// Matches a path and everything below it.
    pub fn prefix(path: impl Into<String>) -> Self {
        Self::Prefix(normalize(&path.into()))
    }

    /// Returns `true` if the predicate applies to `path`.
    ///
    /// Pure and deterministic.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => segments(expected).eq(segments(path)),
            Self::Prefix(prefix) => {
                let mut actual = segments(path);
                segments(prefix).all(|want| actual.next() == Some(want))
            }
            Self::Glob(glob) => glob.matches(path),
            Self::AnyOf(inner) => inner.iter().any(|p| p.matches(path)),
        }
    }
}

impl fmt::Debug for PathPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathPredicate({self})")
    }
}

impl fmt::Display for PathPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("/**"),
            Self::Exact(path) => f.write_str(path),
            Self::Prefix(path) if path == "/" => f.write_str("/**"),
            Self::Prefix(path) => write!(f, "{path}/**"),
            Self::Glob(glob) => f.write_str(&glob.source),
            Self::AnyOf(inner) => {
                for (i, p) in inner.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                Ok(())
            }
        }
    }
}

/// A compiled wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard(Vec<char>),
    DoubleStar,
}

fn literal(segment: &Segment) -> Option<&str> {
    match segment {
        Segment::Literal(s) => Some(s),
        _ => None,
    }
}

impl GlobPattern {
    fn parse(pattern: &str) -> Result<Self, PredicateError> {
        let segments = segments(pattern)
            .map(|seg| {
                if seg == "**" {
                    Ok(Segment::DoubleStar)
                } else if seg.contains("**") {
                    Err(PredicateError::MisplacedDoubleStar(pattern.to_string()))
                } else if seg.contains(['*', '?']) {
                    Ok(Segment::Wildcard(seg.chars().collect()))
                } else {
                    Ok(Segment::Literal(seg.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// Returns the pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if `path` matches the pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let path: Vec<&str> = segments(path).collect();
        match_segments(&self.segments, &path)
    }

    fn simplify(self) -> PathPredicate {
        match self.segments.split_last() {
            None => PathPredicate::Exact("/".to_string()),
            Some((Segment::DoubleStar, head)) if head.iter().all(|s| literal(s).is_some()) => {
                if head.is_empty() {
                    PathPredicate::Any
                } else {
                    let joined: Vec<&str> = head.iter().filter_map(literal).collect();
                    PathPredicate::Prefix(format!("/{}", joined.join("/")))
                }
            }
            _ if self.segments.iter().all(|s| literal(s).is_some()) => {
                PathPredicate::Exact(normalize(&self.source))
            }
            _ => PathPredicate::Glob(self),
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn normalize(path: &str) -> String {
    let joined: Vec<&str> = segments(path).collect();
    format!("/{}", joined.join("/"))
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::DoubleStar, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((segment, rest)) => path.split_first().is_some_and(|(first, tail)| {
            segment_matches(segment, first) && match_segments(rest, tail)
        }),
    }
}

fn segment_matches(segment: &Segment, value: &str) -> bool {
    match segment {
        Segment::Literal(expected) => expected == value,
        Segment::Wildcard(pattern) => wildcard_matches(pattern, &value.chars().collect::<Vec<_>>()),
        Segment::DoubleStar => true,
    }
}

// Greedy `*` with single backtrack point.
fn wildcard_matches(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
