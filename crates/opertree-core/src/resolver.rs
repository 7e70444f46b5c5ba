//! Name-to-path resolution.
//!
//! Resolves string tokens against a schema into typed steps: member indices
//! for structs and unions, indices for lists, parsed keys for maps and sets.
//! Resolution depends only on the schema, never on tree contents, so a path
//! can resolve successfully and still be absent from a given tree.

use crate::error::PathError;
use crate::node::Key;
use crate::schema::{SchemaKind, SchemaRef};
use opertree_proto::{join_path, ExtPathElem, ExtendedPath};
use regex::Regex;
use std::sync::Arc;

/// A token resolved against the schema of its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Struct member at declaration index
    Field(usize),
    /// Union member at declaration index
    Member(usize),
    /// List element
    Index(usize),
    /// Map key or set member
    Key(Key),
}

/// A fully resolved path.
#[derive(Debug, Clone)]
pub struct TypedPath {
    /// Tokens as given
    pub tokens: Vec<String>,
    /// One step per token
    pub steps: Vec<Step>,
    /// Schema of the addressed node
    pub schema: SchemaRef,
}

impl TypedPath {
    /// Whether this path addresses the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Resolve a single token against `schema`, returning the step and the
/// child schema. `prefix` is used for error reporting.
///
/// # Errors
///
/// Returns an error if the token does not address a child of `schema`.
pub fn resolve_step<S: AsRef<str>>(
    schema: &SchemaRef,
    token: &str,
    prefix: &[S],
) -> Result<(Step, SchemaRef), PathError> {
    match &schema.kind {
        SchemaKind::Struct(members) | SchemaKind::Union(members) => {
            let idx = members
                .lookup(token)
                .ok_or_else(|| PathError::UnknownMember {
                    path: join_path(prefix),
                    token: token.to_string(),
                })?;
            let child = members
                .get(idx)
                .map(|field| Arc::clone(&field.schema))
                .ok_or_else(|| PathError::UnknownMember {
                    path: join_path(prefix),
                    token: token.to_string(),
                })?;
            let step = if matches!(schema.kind, SchemaKind::Struct(_)) {
                Step::Field(idx)
            } else {
                Step::Member(idx)
            };
            Ok((step, child))
        }
        SchemaKind::List { element } => {
            let idx = token.parse::<usize>().map_err(|_| PathError::InvalidIndex {
                path: join_path(prefix),
                token: token.to_string(),
            })?;
            Ok((Step::Index(idx), Arc::clone(element)))
        }
        SchemaKind::Map { key, value } => {
            let key = parse_key(key, token, prefix)?;
            Ok((Step::Key(key), Arc::clone(value)))
        }
        SchemaKind::Set { element } => {
            let key = parse_key(element, token, prefix)?;
            Ok((Step::Key(key), Arc::clone(element)))
        }
        SchemaKind::Primitive { .. } => Err(PathError::PastLeaf {
            path: join_path(prefix),
        }),
    }
}

fn parse_key<S: AsRef<str>>(
    key_schema: &SchemaRef,
    token: &str,
    prefix: &[S],
) -> Result<Key, PathError> {
    let invalid = |reason: String| PathError::InvalidKey {
        path: join_path(prefix),
        token: token.to_string(),
        reason,
    };
    let primitive = key_schema
        .as_primitive()
        .ok_or_else(|| invalid(format!("{} is not a key type", key_schema.name)))?;
    Key::parse(primitive, token).map_err(invalid)
}

/// Resolve a full path against `schema`.
///
/// # Errors
///
/// Returns the error for the first token that cannot be resolved.
pub fn resolve<S: AsRef<str>>(schema: &SchemaRef, path: &[S]) -> Result<TypedPath, PathError> {
    let mut current = Arc::clone(schema);
    let mut steps = Vec::with_capacity(path.len());
    for (depth, token) in path.iter().enumerate() {
        let (step, child) = resolve_step(&current, token.as_ref(), &path[..depth])?;
        steps.push(step);
        current = child;
    }
    Ok(TypedPath {
        tokens: path.iter().map(|t| t.as_ref().to_string()).collect(),
        steps,
        schema: current,
    })
}

/// A compiled extended path element.
#[derive(Debug, Clone)]
pub enum ExtMatcher {
    /// Literal token
    Raw(String),
    /// Any token
    Any,
    /// Tokens fully matching the pattern
    Regex(Regex),
}

impl ExtMatcher {
    /// Whether `token` matches this element.
    #[must_use]
    pub fn matches(&self, token: &str) -> bool {
        match self {
            Self::Raw(raw) => raw == token,
            Self::Any => true,
            Self::Regex(re) => re.is_match(token),
        }
    }

    /// Whether this element is a literal token.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

/// An extended path validated against a schema with its regexes compiled.
#[derive(Debug, Clone)]
pub struct CompiledExtPath {
    /// The path with literal tokens in canonical form
    pub path: ExtendedPath,
    /// One matcher per element
    pub matchers: Vec<ExtMatcher>,
}

impl CompiledExtPath {
    /// Whether a concrete path of the same length matches element-wise.
    #[must_use]
    pub fn matches<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        tokens.len() == self.matchers.len() && self.matches_prefix(tokens)
    }

    /// Whether the first `tokens.len()` elements match `tokens`.
    ///
    /// Tokens beyond the extended path's length never match.
    #[must_use]
    pub fn matches_prefix<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        tokens.len() <= self.matchers.len()
            && tokens
                .iter()
                .zip(&self.matchers)
                .all(|(token, matcher)| matcher.matches(token.as_ref()))
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Whether the path addresses the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// Validate an extended path against `schema` and compile its regexes.
///
/// Literal tokens are canonicalized, so a member id, a padded integer or a
/// numeric enum value compiles to the token tree walks report.
/// Wildcards and regexes are only allowed below lists, maps and sets.
/// Regexes must match the whole token.
///
/// # Errors
///
/// Returns an error for invalid literals, wildcards below structs or unions,
/// and patterns that fail to compile.
pub fn compile_extended(
    schema: &SchemaRef,
    path: &ExtendedPath,
) -> Result<CompiledExtPath, PathError> {
    let mut current = Arc::clone(schema);
    let mut prefix: Vec<String> = Vec::with_capacity(path.elems.len());
    let mut matchers = Vec::with_capacity(path.elems.len());
    let mut elems = Vec::with_capacity(path.elems.len());

    for elem in &path.elems {
        let (elem, matcher) = match elem {
            ExtPathElem::Raw(token) => {
                let (step, child) = resolve_step(&current, token, &prefix)?;
                let token = canonical_token(&current, &step, token);
                current = child;
                (ExtPathElem::Raw(token.clone()), ExtMatcher::Raw(token))
            }
            wildcard => {
                let child = match &current.kind {
                    SchemaKind::List { element } | SchemaKind::Set { element } => {
                        Arc::clone(element)
                    }
                    SchemaKind::Map { value, .. } => Arc::clone(value),
                    SchemaKind::Struct(_) | SchemaKind::Union(_) => {
                        return Err(PathError::UnsupportedWildcardPath {
                            path: join_path(&prefix),
                        })
                    }
                    SchemaKind::Primitive { .. } => {
                        return Err(PathError::PastLeaf {
                            path: join_path(&prefix),
                        })
                    }
                };
                current = child;
                let matcher = match wildcard {
                    ExtPathElem::Regex(pattern) => ExtMatcher::Regex(compile_full_match(pattern)?),
                    _ => ExtMatcher::Any,
                };
                (wildcard.clone(), matcher)
            }
        };
        prefix.push(elem.to_string());
        elems.push(elem);
        matchers.push(matcher);
    }

    Ok(CompiledExtPath {
        path: ExtendedPath::new(elems),
        matchers,
    })
}

/// The token tree walks report for `step`: member names, decimal indices
/// and key tokens. Ids, padded integers and numeric enum values all map
/// back to this form.
#[must_use]
pub fn canonical_token(parent: &SchemaRef, step: &Step, given: &str) -> String {
    match (step, &parent.kind) {
        (Step::Field(idx) | Step::Member(idx), SchemaKind::Struct(members) | SchemaKind::Union(members)) => {
            members.token(*idx, false)
        }
        (Step::Index(idx), _) => idx.to_string(),
        (Step::Key(key), SchemaKind::Map { key: key_schema, .. } | SchemaKind::Set { element: key_schema }) => {
            key_schema
                .as_primitive()
                .map_or_else(|| given.to_string(), |primitive| key.to_token(primitive))
        }
        _ => given.to_string(),
    }
}

/// Rewrite `path` into the tokens tree walks report.
///
/// # Errors
///
/// Returns the error for the first token that cannot be resolved.
pub fn canonicalize<S: AsRef<str>>(schema: &SchemaRef, path: &[S]) -> Result<Vec<String>, PathError> {
    let mut current = Arc::clone(schema);
    let mut tokens = Vec::with_capacity(path.len());
    for token in path {
        let (step, child) = resolve_step(&current, token.as_ref(), &tokens)?;
        tokens.push(canonical_token(&current, &step, token.as_ref()));
        current = child;
    }
    Ok(tokens)
}

fn compile_full_match(pattern: &str) -> Result<Regex, PathError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| PathError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, PrimitiveType, Schema};

    fn schema() -> SchemaRef {
        let i32_ty = Schema::primitive(PrimitiveType::I32);
        let inner = Schema::structure(
            "Inner",
            vec![
                Field::new(1, "min", Arc::clone(&i32_ty)),
                Field::new(2, "max", Arc::clone(&i32_ty)),
            ],
        )
        .unwrap();
        Schema::structure(
            "Root",
            vec![
                Field::new(1, "a", Arc::clone(&i32_ty)),
                Field::new(
                    2,
                    "b",
                    Schema::map(Schema::primitive(PrimitiveType::String), Arc::clone(&i32_ty))
                        .unwrap(),
                ),
                Field::new(3, "l", Schema::list(Arc::clone(&i32_ty))),
                Field::new(4, "inner", inner),
            ],
        )
        .unwrap()
    }

    #[test]
    fn resolves_members_by_name_and_id() {
        let s = schema();
        let by_name = resolve(&s, &["inner", "max"]).unwrap();
        let by_id = resolve(&s, &["4", "2"]).unwrap();
        assert_eq!(by_name.steps, by_id.steps);
        assert_eq!(by_name.steps, vec![Step::Field(3), Step::Field(1)]);
        assert!(by_name.schema.is_primitive());
    }

    #[test]
    fn resolution_ignores_contents() {
        let s = schema();
        let path = resolve(&s, &["b", "z"]).unwrap();
        assert_eq!(path.steps[1], Step::Key(Key::String("z".into())));
    }

    #[test]
    fn resolution_errors() {
        let s = schema();
        assert!(matches!(
            resolve(&s, &["nope"]),
            Err(PathError::UnknownMember { .. })
        ));
        assert!(matches!(
            resolve(&s, &["l", "x"]),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            resolve(&s, &["a", "deeper"]),
            Err(PathError::PastLeaf { .. })
        ));
    }

    #[test]
    fn wildcard_under_struct_rejected() {
        let s = schema();
        let path = ExtendedPath::parse("/inner/*").unwrap();
        assert!(matches!(
            compile_extended(&s, &path),
            Err(PathError::UnsupportedWildcardPath { .. })
        ));
    }

    #[test]
    fn regex_matches_whole_token() {
        let s = schema();
        let compiled = compile_extended(&s, &ExtendedPath::parse("/b/~x.").unwrap()).unwrap();
        assert!(compiled.matches(&["b", "xy"]));
        assert!(!compiled.matches(&["b", "xyz"]));
        assert!(!compiled.matches(&["b"]));
        assert!(compiled.matches_prefix(&["b"]));
    }

    #[test]
    fn literals_compile_to_canonical_tokens() {
        let s = schema();
        let by_id = compile_extended(&s, &ExtendedPath::parse("/4/2").unwrap()).unwrap();
        assert_eq!(by_id.path, ExtendedPath::exact(&["inner", "max"]));
        assert!(by_id.matches(&["inner", "max"]));
        assert!(!by_id.matches(&["4", "2"]));

        let padded = compile_extended(&s, &ExtendedPath::parse("/3/007").unwrap()).unwrap();
        assert_eq!(padded.path, ExtendedPath::exact(&["l", "7"]));

        let wildcard = compile_extended(&s, &ExtendedPath::parse("/2/*").unwrap()).unwrap();
        assert_eq!(wildcard.path.to_exact(), None);
        assert_eq!(wildcard.path.elems[0], ExtPathElem::Raw("b".into()));

        assert_eq!(canonicalize(&s, &["2", "x"]).unwrap(), vec!["b", "x"]);
        assert!(canonicalize(&s, &["9"]).is_err());
    }

    #[test]
    fn invalid_regex_reported() {
        let s = schema();
        let path = ExtendedPath::parse("/b/~(").unwrap();
        assert!(matches!(
            compile_extended(&s, &path),
            Err(PathError::InvalidRegex { .. })
        ));
    }
}
