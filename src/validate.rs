//! Route path grammar.
//!
//! A path is either exactly `/`, or a `/`-separated list of non-empty,
//! pairwise distinct segments built from `[a-zA-Z0-9{}]`. A segment that
//! contains a brace must be a parameter of the exact form `{name}`. Trailing
//! slashes are rejected, never normalized: `/users` and `/users/` are
//! different strings and only the first is a valid route.

use std::collections::HashSet;

/// Why a route path was rejected.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path must start with `/`")]
    MissingLeadingSlash,
    #[error("path must not end with `/`")]
    TrailingSlash,
    #[error("path contains invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("path contains an empty segment")]
    EmptySegment,
    #[error("path segment `{0}` appears more than once")]
    DuplicateSegment(String),
    #[error("malformed parameter segment `{0}`, expected `{{name}}`")]
    MalformedParameter(String),
}

/// Checks `path` against the route grammar.
pub fn validate_path(path: &str) -> Result<(), PathError> {
    if path == "/" {
        return Ok(());
    }
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if !path.starts_with('/') {
        return Err(PathError::MissingLeadingSlash);
    }
    if path.ends_with('/') {
        return Err(PathError::TrailingSlash);
    }
    if let Some(c) = path.chars().find(|c| !is_path_char(*c)) {
        return Err(PathError::InvalidCharacter(c));
    }

    let mut seen = HashSet::new();
    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(PathError::EmptySegment);
        }
        if !seen.insert(segment) {
            return Err(PathError::DuplicateSegment(segment.to_owned()));
        }
        if segment.contains(['{', '}']) && !is_parameter(segment) {
            return Err(PathError::MalformedParameter(segment.to_owned()));
        }
    }
    Ok(())
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '{' | '}')
}

fn is_parameter(segment: &str) -> bool {
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .is_some_and(|name| !name.is_empty() && !name.contains(['{', '}']))
}
