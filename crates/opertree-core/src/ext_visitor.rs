//! Extended path visitor.
//!
//! Like the path visitor, but wildcard and regex elements expand to every
//! present child whose token matches. A literal element that is absent from
//! the tree simply yields no match.

use crate::error::{PathError, TraverseError};
use crate::node::NodeRef;
use crate::resolver::{canonical_token, resolve_step, CompiledExtPath, ExtMatcher, Step};
use crate::schema::{SchemaKind, SchemaRef};
use opertree_proto::join_path;
use std::fmt::Display;

/// Options for [`visit_extended`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtPathVisitOptions {
    /// Report struct and union members by id instead of name
    pub output_id_paths: bool,
}

/// Visit every node matching `path`, in traversal order.
///
/// The callback receives the concrete matched path, the node's schema and
/// the node.
///
/// # Errors
///
/// Returns `UnsupportedWildcardPath` if a wildcard meets a struct or union,
/// any other resolution error for literal elements, and `VisitorException`
/// if the callback fails.
pub fn visit_extended<E, F>(
    schema: &SchemaRef,
    root: &NodeRef,
    path: &CompiledExtPath,
    options: ExtPathVisitOptions,
    mut f: F,
) -> Result<(), TraverseError>
where
    E: Display,
    F: FnMut(&[String], &SchemaRef, &NodeRef) -> Result<(), E>,
{
    let mut visited = Vec::with_capacity(path.len());
    walk(
        schema,
        root,
        &path.matchers,
        options,
        &mut visited,
        &mut f,
    )
}

fn walk<E, F>(
    schema: &SchemaRef,
    node: &NodeRef,
    matchers: &[ExtMatcher],
    options: ExtPathVisitOptions,
    visited: &mut Vec<String>,
    f: &mut F,
) -> Result<(), TraverseError>
where
    E: Display,
    F: FnMut(&[String], &SchemaRef, &NodeRef) -> Result<(), E>,
{
    let Some((matcher, rest)) = matchers.split_first() else {
        return f(visited.as_slice(), schema, node)
            .map_err(|e| TraverseError::VisitorException(e.to_string()));
    };

    match matcher {
        ExtMatcher::Raw(token) => {
            let (step, child_schema) = resolve_step(schema, token, visited.as_slice())?;
            let Some(child) = node.child(schema, &step) else {
                return Ok(());
            };
            let reported = match &schema.kind {
                SchemaKind::Struct(members) | SchemaKind::Union(members)
                    if options.output_id_paths =>
                {
                    step_member(&step)
                        .map_or_else(|| token.clone(), |idx| members.token(idx, true))
                }
                _ => canonical_token(schema, &step, token),
            };
            visited.push(reported);
            let result = walk(&child_schema, &child, rest, options, visited, f);
            visited.pop();
            result
        }
        wildcard => {
            if matches!(schema.kind, SchemaKind::Struct(_) | SchemaKind::Union(_)) {
                return Err(PathError::UnsupportedWildcardPath {
                    path: join_path(visited.as_slice()),
                }
                .into());
            }
            if schema.is_primitive() {
                return Err(PathError::PastLeaf {
                    path: join_path(visited.as_slice()),
                }
                .into());
            }
            for child in node.children(schema, options.output_id_paths) {
                if !wildcard.matches(&child.token) {
                    continue;
                }
                visited.push(child.token);
                let result = walk(&child.schema, &child.node, rest, options, visited, f);
                visited.pop();
                result?;
            }
            Ok(())
        }
    }
}

fn step_member(step: &Step) -> Option<usize> {
    match step {
        Step::Field(idx) | Step::Member(idx) => Some(*idx),
        _ => None,
    }
}

/// Collect the concrete paths matching `path`.
///
/// # Errors
///
/// Same as [`visit_extended`].
pub fn matching_paths(
    schema: &SchemaRef,
    root: &NodeRef,
    path: &CompiledExtPath,
) -> Result<Vec<Vec<String>>, TraverseError> {
    let mut paths = Vec::new();
    visit_extended(
        schema,
        root,
        path,
        ExtPathVisitOptions::default(),
        |matched, _, _| {
            paths.push(matched.to_vec());
            Ok::<_, std::convert::Infallible>(())
        },
    )?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::resolver::compile_extended;
    use crate::schema::{Field, PrimitiveType, Schema};
    use crate::visitor::{visit_path_mut, PathVisitOptions};
    use opertree_proto::ExtendedPath;
    use std::sync::Arc;

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
            vec![Field::new(
                1,
                "m",
                Schema::map(Schema::primitive(PrimitiveType::String), inner).unwrap(),
            )],
        )
        .unwrap()
    }

    fn populated(s: &SchemaRef, keys: &[&str]) -> NodeRef {
        let mut root = Arc::new(Node::default_for(s));
        for key in keys {
            visit_path_mut(s, &mut root, &["m", *key], PathVisitOptions::create(), |_, _, _| {
                Ok::<_, String>(())
            })
            .unwrap();
        }
        root
    }

    #[test]
    fn wildcard_matches_every_key() {
        let s = schema();
        let root = populated(&s, &["x", "y"]);
        let path = compile_extended(&s, &ExtendedPath::parse("/m/*/max").unwrap()).unwrap();
        let paths = matching_paths(&s, &root, &path).unwrap();
        assert_eq!(
            paths,
            vec![vec!["m", "x", "max"], vec!["m", "y", "max"]]
        );
    }

    #[test]
    fn regex_filters_keys() {
        let s = schema();
        let root = populated(&s, &["x1", "x2", "y1"]);
        let path = compile_extended(&s, &ExtendedPath::parse("/m/~x.*").unwrap()).unwrap();
        let paths = matching_paths(&s, &root, &path).unwrap();
        assert_eq!(paths, vec![vec!["m", "x1"], vec!["m", "x2"]]);
    }

    #[test]
    fn absent_literal_yields_nothing() {
        let s = schema();
        let root = populated(&s, &["x"]);
        let path = compile_extended(&s, &ExtendedPath::parse("/m/z/max").unwrap()).unwrap();
        assert!(matching_paths(&s, &root, &path).unwrap().is_empty());
    }

    #[test]
    fn id_paths_reported() {
        let s = schema();
        let root = populated(&s, &["x"]);
        let path = compile_extended(&s, &ExtendedPath::parse("/m/*/min").unwrap()).unwrap();
        let mut seen = Vec::new();
        visit_extended(
            &s,
            &root,
            &path,
            ExtPathVisitOptions {
                output_id_paths: true,
            },
            |p, _, _| {
                seen.push(join_path(p));
                Ok::<_, String>(())
            },
        )
        .unwrap();
        assert_eq!(seen, vec!["/1/x/1"]);
    }
}
