//! Defines the core abstraction for a navigable, read-only source tree.
//!
//! The transform engine is written exclusively against [`TreeNode`]; any document
//! model (XML DOM, JSON view, an in-memory mock) can be transformed once it implements
//! the trait.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

pub mod names;
// Test utilities - publicly available for integration testing in downstream crates
pub mod tests;

pub use names::{ExpandedName, NameError, NamespaceScope, QualifiedName, XML_NAMESPACE};

/// The type of a node in the source tree, aligned with the XPath 1.0 data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

/// The universal contract for a node handle.
///
/// Handles are lightweight references into a tree owned elsewhere: cloning one must be
/// cheap and must never copy the subtree it points at. Two handles compare equal when
/// they refer to the same node of the same tree instance.
pub trait TreeNode: Debug + Clone + PartialEq + Eq + Hash + 'static {
    fn node_type(&self) -> NodeType;

    /// The qualified name of elements, attributes and processing instructions (for
    /// the latter, the target). `None` for root, text and comment nodes.
    fn name(&self) -> Option<QualifiedName>;

    /// The string value, as defined by the XPath 1.0 `string()` function.
    fn string_value(&self) -> String;

    fn first_child(&self) -> Option<Self>;

    fn next_sibling(&self) -> Option<Self>;

    /// `None` for the root node.
    fn parent(&self) -> Option<Self>;

    /// The attribute nodes of an element, empty for every other node type.
    fn attributes(&self) -> Vec<Self>;

    fn expanded_name(&self) -> Option<ExpandedName> {
        self.name().map(|name| name.expanded())
    }

    /// The root of the tree this node belongs to. Also serves as the tree's identity.
    fn root(&self) -> Self {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    fn children(&self) -> Children<Self> {
        Children {
            next: self.first_child(),
        }
    }

    fn is_text(&self) -> bool {
        self.node_type() == NodeType::Text
    }

    /// The namespace bindings in scope on an element as `(prefix, uri)` pairs, the
    /// default namespace with prefix `None`; the nearest binding of a prefix wins.
    /// Derived from the names used on the element and its ancestors. Trees that keep
    /// the declarations themselves should answer with those.
    fn namespaces_in_scope(&self) -> Vec<(Option<String>, String)> {
        let mut bindings: Vec<(Option<String>, String)> = Vec::new();
        let mut current = Some(self.clone());
        while let Some(node) = current {
            if node.node_type() == NodeType::Element {
                let attributes = node.attributes();
                let names = node
                    .name()
                    .into_iter()
                    .chain(attributes.iter().filter_map(TreeNode::name));
                for name in names {
                    let Some(uri) = name.uri else { continue };
                    let bound = bindings.iter().any(|(prefix, _)| *prefix == name.prefix);
                    if bound || uri == XML_NAMESPACE {
                        continue;
                    }
                    bindings.push((name.prefix, uri));
                }
            }
            current = node.parent();
        }
        bindings
    }
}

/// Iterator over the children of a node, following `next_sibling` links.
#[derive(Debug, Clone)]
pub struct Children<N> {
    next: Option<N>,
}

impl<N: TreeNode> Iterator for Children<N> {
    type Item = N;

    fn next(&mut self) -> Option<N> {
        let current = self.next.take()?;
        self.next = current.next_sibling();
        Some(current)
    }
}
