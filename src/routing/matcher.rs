//! Request matching logic.
//!
//! # Responsibilities
//! - Match the request method against a route's method filter
//! - Match route patterns (`/users/:id`, `/files/*`) and capture parameters
//! - Match mount prefixes for `use` layers
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - A trailing slash is not significant (`/users/` matches `/users`)
//! - Mount prefixes match on segment boundaries only (`/api` never matches `/apix`)
//! - No regex: patterns compile to a segment list, matching is O(segments)

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use axum::http::Method;

use crate::http::request::PathParams;
use crate::routing::error::RouteError;

/// Method constraint of a route layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    /// `ALL`: any method.
    Any,
    Only(Method),
}

impl MethodFilter {
    /// Method tokens accepted as route node keys.
    pub const TOKENS: [&'static str; 6] = ["GET", "POST", "PUT", "DELETE", "PATCH", "ALL"];

    /// Returns true if a request with `method` is accepted.
    /// `GET` routes also answer `HEAD`.
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(expected) => {
                expected == method || (*expected == Method::GET && *method == Method::HEAD)
            }
        }
    }

    /// Returns true if both filters can accept the same method.
    pub fn overlaps(&self, other: &MethodFilter) -> bool {
        match (self, other) {
            (MethodFilter::Any, _) | (_, MethodFilter::Any) => true,
            (MethodFilter::Only(a), MethodFilter::Only(b)) => a == b,
        }
    }
}

impl FromStr for MethodFilter {
    type Err = ();

    /// Parse a method token, case-insensitively.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.to_ascii_uppercase().as_str() {
            "GET" => Ok(MethodFilter::Only(Method::GET)),
            "POST" => Ok(MethodFilter::Only(Method::POST)),
            "PUT" => Ok(MethodFilter::Only(Method::PUT)),
            "DELETE" => Ok(MethodFilter::Only(Method::DELETE)),
            "PATCH" => Ok(MethodFilter::Only(Method::PATCH)),
            "ALL" => Ok(MethodFilter::Any),
            _ => Err(()),
        }
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        MethodFilter::Only(method)
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodFilter::Any => f.write_str("ALL"),
            MethodFilter::Only(method) => write!(f, "{}", method),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// Compiled route path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a route path. A missing leading separator is added.
    pub fn parse(path: &str) -> Result<Self, RouteError> {
        let source = normalize_path(path);
        let parts: Vec<&str> = split_segments(&source).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut names: Vec<&str> = Vec::new();

        for (i, part) in parts.iter().enumerate() {
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(invalid(path, format!("bad parameter name `{}`", part)));
                }
                if names.contains(&name) {
                    return Err(invalid(path, format!("duplicate parameter `{}`", name)));
                }
                names.push(name);
                segments.push(Segment::Param(name.to_string()));
            } else if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(invalid(path, "wildcard must be the last segment".to_string()));
                }
                segments.push(Segment::Wildcard);
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self { source, segments })
    }

    /// The normalized path this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a request path, returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let parts: Vec<&str> = split_segments(path).collect();
        let mut params = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    let rest = parts.get(i..).unwrap_or_default().join("/");
                    params.insert("*".to_string(), decode(&rest));
                    return Some(PathParams(params));
                }
                Segment::Literal(expected) => {
                    if parts.get(i) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), decode(value));
                }
            }
        }

        if parts.len() == self.segments.len() {
            Some(PathParams(params))
        } else {
            None
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Matches the mount prefix of a `use` layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountMatcher {
    prefix: String,
}

impl MountMatcher {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: normalize_path(prefix),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// Returns true if `path` lies under the mount prefix.
    pub fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// The part of `path` below the mount prefix, always starting with `/`.
    pub fn strip<'a>(&self, path: &'a str) -> &'a str {
        if self.prefix == "/" {
            return path;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some("") | None => "/",
            Some(rest) => rest,
        }
    }
}

/// Ensure a leading separator and drop one trailing separator (root excepted).
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut out = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn invalid(path: &str, reason: String) -> RouteError {
    RouteError::InvalidPath {
        path: path.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_filter() {
        let get: MethodFilter = "get".parse().unwrap();
        assert!(get.matches(&Method::GET));
        assert!(get.matches(&Method::HEAD));
        assert!(!get.matches(&Method::POST));

        let all: MethodFilter = "ALL".parse().unwrap();
        assert!(all.matches(&Method::OPTIONS));

        assert!("fetch".parse::<MethodFilter>().is_err());
        assert!("head".parse::<MethodFilter>().is_err());
    }

    #[test]
    fn test_pattern_params() {
        let pattern = PathPattern::parse("/users/:id").unwrap();
        let params = pattern.matches("/users/42").unwrap();
        assert_eq!(params.get("id"), Some("42"));

        assert!(pattern.matches("/users/42/").is_some()); // trailing slash
        assert!(pattern.matches("/users").is_none());
        assert!(pattern.matches("/users/42/posts").is_none());
        assert!(pattern.matches("/Users/42").is_none()); // case-sensitive
    }

    #[test]
    fn test_pattern_decodes_params() {
        let pattern = PathPattern::parse("/files/:name").unwrap();
        let params = pattern.matches("/files/a%20b").unwrap();
        assert_eq!(params.get("name"), Some("a b"));
    }

    #[test]
    fn test_pattern_wildcard() {
        let pattern = PathPattern::parse("/static/*").unwrap();
        let params = pattern.matches("/static/css/site.css").unwrap();
        assert_eq!(params.get("*"), Some("css/site.css"));
        assert!(PathPattern::parse("/a/*/b").is_err());
    }

    #[test]
    fn test_pattern_rejects_bad_params() {
        assert!(PathPattern::parse("/users/:").is_err());
        assert!(PathPattern::parse("/:id/:id").is_err());
        assert!(PathPattern::parse("/users/:user-id").is_err());
    }

    #[test]
    fn test_root_pattern() {
        let root = PathPattern::parse("/").unwrap();
        assert!(root.matches("/").is_some());
        assert!(root.matches("/x").is_none());
        assert_eq!(PathPattern::parse("users").unwrap().as_str(), "/users");
    }

    #[test]
    fn test_mount_matcher() {
        let mount = MountMatcher::new("/api");
        assert!(mount.matches("/api"));
        assert!(mount.matches("/api/v1"));
        assert!(!mount.matches("/apix"));
        assert!(!mount.matches("/images"));
        assert_eq!(mount.strip("/api/v1/users"), "/v1/users");
        assert_eq!(mount.strip("/api"), "/");

        let root = MountMatcher::new("/");
        assert!(root.matches("/anything"));
        assert_eq!(root.strip("/anything"), "/anything");
    }
}
