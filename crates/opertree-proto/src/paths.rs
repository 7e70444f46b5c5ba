//! Path strings and extended path elements.
//!
//! Path string form: `/token/token/...`. In extended paths the token `*`
//! matches any key and a token starting with `~` is a regular expression
//! that must match the whole key (e.g. `/ports/~eth[0-9]+/state`).

use serde::{Deserialize, Serialize};

/// One element of an extended path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtPathElem {
    /// Matches exactly this token
    Raw(String),
    /// Matches any token
    Any,
    /// Matches tokens fully matched by this regular expression
    Regex(String),
}

impl ExtPathElem {
    /// Check if this element is an exact literal.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, ExtPathElem::Raw(_))
    }

    /// The literal token, if this element is one.
    #[must_use]
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            ExtPathElem::Raw(token) => Some(token),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtPathElem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtPathElem::Raw(token) => f.write_str(token),
            ExtPathElem::Any => f.write_str("*"),
            ExtPathElem::Regex(pattern) => write!(f, "~{pattern}"),
        }
    }
}

/// A path whose elements may be wildcards or regular expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExtendedPath {
    /// Path elements from the root
    pub elems: Vec<ExtPathElem>,
}

impl ExtendedPath {
    /// Create an extended path from elements.
    #[must_use]
    pub fn new(elems: Vec<ExtPathElem>) -> Self {
        Self { elems }
    }

    /// Create an extended path made only of literals.
    #[must_use]
    pub fn exact<S: AsRef<str>>(tokens: &[S]) -> Self {
        Self {
            elems: tokens
                .iter()
                .map(|t| ExtPathElem::Raw(t.as_ref().to_string()))
                .collect(),
        }
    }

    /// Parse the string form.
    ///
    /// # Errors
    ///
    /// Returns error if the path does not start with `/` or contains an
    /// empty token.
    pub fn parse(path: &str) -> Result<Self, PathParseError> {
        let elems = split_path(path)?
            .into_iter()
            .map(|token| {
                if token == "*" {
                    ExtPathElem::Any
                } else if let Some(pattern) = token.strip_prefix('~') {
                    ExtPathElem::Regex(pattern.to_string())
                } else {
                    ExtPathElem::Raw(token)
                }
            })
            .collect();
        Ok(Self { elems })
    }

    /// Check if every element is a literal.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.elems.iter().all(ExtPathElem::is_raw)
    }

    /// The literal tokens, if every element is a literal.
    #[must_use]
    pub fn to_exact(&self) -> Option<Vec<String>> {
        self.elems
            .iter()
            .map(|e| e.as_raw().map(ToString::to_string))
            .collect()
    }

    /// Number of leading literal elements.
    #[must_use]
    pub fn literal_prefix_len(&self) -> usize {
        self.elems.iter().take_while(|e| e.is_raw()).count()
    }
}

impl std::fmt::Display for ExtendedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.elems.is_empty() {
            return f.write_str("/");
        }
        for elem in &self.elems {
            write!(f, "/{elem}")?;
        }
        Ok(())
    }
}

/// Split a `/a/b/c` path string into tokens.
///
/// # Errors
///
/// Returns error if the path does not start with `/` or contains an empty
/// token.
pub fn split_path(path: &str) -> Result<Vec<String>, PathParseError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PathParseError::MissingLeadingSlash(path.to_string()));
    };
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    rest.split('/')
        .map(|token| {
            if token.is_empty() {
                Err(PathParseError::EmptyToken(path.to_string()))
            } else {
                Ok(token.to_string())
            }
        })
        .collect()
}

/// Render tokens in `/a/b/c` form.
#[must_use]
pub fn join_path<S: AsRef<str>>(tokens: &[S]) -> String {
    if tokens.is_empty() {
        return "/".to_string();
    }
    tokens.iter().fold(String::new(), |mut out, t| {
        out.push('/');
        out.push_str(t.as_ref());
        out
    })
}

/// The publisher root a path belongs to: its first token.
///
/// Returns `None` for the empty path or when the first element is not a
/// literal.
#[must_use]
pub fn publisher_root(path: &ExtendedPath) -> Option<String> {
    path.elems.first().and_then(ExtPathElem::as_raw).map(ToString::to_string)
}

/// Errors parsing path strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    /// Path did not start with `/`
    #[error("path must start with '/': {0}")]
    MissingLeadingSlash(String),
    /// Path contained `//` or a trailing `/`
    #[error("path contains an empty token: {0}")]
    EmptyToken(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extended_path() {
        let path = ExtendedPath::parse("/ports/*/~eth[0-9]+/state").unwrap();
        assert_eq!(
            path.elems,
            vec![
                ExtPathElem::Raw("ports".to_string()),
                ExtPathElem::Any,
                ExtPathElem::Regex("eth[0-9]+".to_string()),
                ExtPathElem::Raw("state".to_string()),
            ]
        );
        assert_eq!(path.literal_prefix_len(), 1);
        assert!(!path.is_exact());
        assert_eq!(path.to_string(), "/ports/*/~eth[0-9]+/state");
    }

    #[test]
    fn parse_root_and_errors() {
        assert!(ExtendedPath::parse("/").unwrap().elems.is_empty());
        assert_eq!(
            ExtendedPath::parse("a/b"),
            Err(PathParseError::MissingLeadingSlash("a/b".to_string()))
        );
        assert!(matches!(
            ExtendedPath::parse("/a//b"),
            Err(PathParseError::EmptyToken(_))
        ));
    }

    #[test]
    fn exact_paths() {
        let path = ExtendedPath::exact(&["b", "x"]);
        assert!(path.is_exact());
        assert_eq!(path.to_exact(), Some(vec!["b".to_string(), "x".to_string()]));
        assert_eq!(join_path(&["b", "x"]), "/b/x");
        assert_eq!(join_path::<&str>(&[]), "/");
    }

    #[test]
    fn publisher_roots() {
        assert_eq!(
            publisher_root(&ExtendedPath::parse("/agent/ports").unwrap()),
            Some("agent".to_string())
        );
        assert_eq!(publisher_root(&ExtendedPath::parse("/*/ports").unwrap()), None);
        assert_eq!(publisher_root(&ExtendedPath::default()), None);
    }
}
