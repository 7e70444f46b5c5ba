//! Whole-subtree traversal.

use crate::node::NodeRef;
use crate::schema::SchemaRef;

/// Order in which a node and its descendants are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecurseVisitOrder {
    /// A node before its children
    #[default]
    ParentsFirst,
    /// Children before their parent
    ChildrenFirst,
}

/// Options for [`visit_recursive`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecurseVisitOptions {
    /// Report order
    pub order: RecurseVisitOrder,
    /// Report struct and union members by id instead of name
    pub output_id_paths: bool,
}

/// Visit `node` and every present descendant.
///
/// `path` is the path of `node`; descendants are reported with their tokens
/// appended. The path is restored before returning.
pub fn visit_recursive<F>(
    schema: &SchemaRef,
    node: &NodeRef,
    path: &mut Vec<String>,
    options: RecurseVisitOptions,
    f: &mut F,
) where
    F: FnMut(&[String], &SchemaRef, &NodeRef),
{
    if options.order == RecurseVisitOrder::ParentsFirst {
        f(path.as_slice(), schema, node);
    }
    visit_descendants(schema, node, path, options, f);
    if options.order == RecurseVisitOrder::ChildrenFirst {
        f(path.as_slice(), schema, node);
    }
}

/// Visit every present descendant of `node`, excluding `node` itself.
pub fn visit_descendants<F>(
    schema: &SchemaRef,
    node: &NodeRef,
    path: &mut Vec<String>,
    options: RecurseVisitOptions,
    f: &mut F,
) where
    F: FnMut(&[String], &SchemaRef, &NodeRef),
{
    for child in node.children(schema, options.output_id_paths) {
        path.push(child.token);
        visit_recursive(&child.schema, &child.node, path, options, f);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, Value};
    use crate::schema::{Field, PrimitiveType, Schema};
    use opertree_proto::join_path;
    use std::sync::Arc;

    fn tree() -> (SchemaRef, NodeRef) {
        let i32_ty = Schema::primitive(PrimitiveType::I32);
        let schema = Schema::structure(
            "Root",
            vec![
                Field::new(1, "a", Arc::clone(&i32_ty)),
                Field::new(2, "l", Schema::list(i32_ty)),
            ],
        )
        .unwrap();
        let node = Arc::new(Node::Struct(vec![
            Some(Arc::new(Node::Primitive(Value::Int(1)))),
            Some(Arc::new(Node::List(vec![
                Arc::new(Node::Primitive(Value::Int(2))),
                Arc::new(Node::Primitive(Value::Int(3))),
            ]))),
        ]));
        (schema, node)
    }

    fn collect(options: RecurseVisitOptions) -> Vec<String> {
        let (schema, node) = tree();
        let mut seen = Vec::new();
        visit_recursive(&schema, &node, &mut Vec::new(), options, &mut |path, _, _| {
            seen.push(join_path(path));
        });
        seen
    }

    #[test]
    fn parents_first() {
        assert_eq!(
            collect(RecurseVisitOptions::default()),
            vec!["/", "/a", "/l", "/l/0", "/l/1"]
        );
    }

    #[test]
    fn children_first_with_ids() {
        let seen = collect(RecurseVisitOptions {
            order: RecurseVisitOrder::ChildrenFirst,
            output_id_paths: true,
        });
        assert_eq!(seen, vec!["/1", "/2/0", "/2/1", "/2", "/"]);
    }
}
