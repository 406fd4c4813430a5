use super::*;
use std::hash::Hasher;
use std::rc::Rc;

// --- Mock Implementation for TDD ---

#[derive(Debug, Clone)]
struct MockNodeData {
    node_type: NodeType,
    name: Option<QualifiedName>,
    value: String,
    parent: Option<usize>,
    children: Vec<usize>,
    attributes: Vec<usize>,
}

/// An in-memory tree. Node ids are handed out in creation order, so building
/// depth-first keeps ids in document order.
#[derive(Debug, Clone)]
pub struct MockTree {
    nodes: Rc<Vec<MockNodeData>>,
}

/// A handle into a [`MockTree`]. Cloning it only bumps a reference count.
#[derive(Debug, Clone)]
pub struct MockNode {
    pub id: usize,
    tree: Rc<Vec<MockNodeData>>,
}

impl MockTree {
    pub fn root(&self) -> MockNode {
        self.node(0)
    }

    pub fn node(&self, id: usize) -> MockNode {
        MockNode {
            id,
            tree: Rc::clone(&self.nodes),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node in document order: each element, then its attributes, then its
    /// children.
    pub fn document_order(&self) -> Vec<MockNode> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            ordered.push(self.node(id));
            let data = &self.nodes[id];
            ordered.extend(data.attributes.iter().map(|&attr| self.node(attr)));
            stack.extend(data.children.iter().rev());
        }
        ordered
    }
}

impl MockNode {
    fn data(&self) -> &MockNodeData {
        &self.tree[self.id]
    }

    fn sibling_at(&self, offset: usize) -> Option<MockNode> {
        let parent = self.data().parent?;
        if self.data().node_type == NodeType::Attribute {
            return None;
        }
        let siblings = &self.tree[parent].children;
        let index = siblings.iter().position(|&id| id == self.id)?;
        siblings.get(index + offset).map(|&id| MockNode {
            id,
            tree: Rc::clone(&self.tree),
        })
    }
}

impl PartialEq for MockNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Rc::ptr_eq(&self.tree, &other.tree)
    }
}
impl Eq for MockNode {}

impl Hash for MockNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.tree).hash(state);
        self.id.hash(state);
    }
}

impl TreeNode for MockNode {
    fn node_type(&self) -> NodeType {
        self.data().node_type
    }

    fn name(&self) -> Option<QualifiedName> {
        self.data().name.clone()
    }

    fn string_value(&self) -> String {
        match self.data().node_type {
            NodeType::Root | NodeType::Element => {
                let mut value = String::new();
                let mut stack: Vec<usize> = self.data().children.iter().rev().copied().collect();
                while let Some(id) = stack.pop() {
                    let data = &self.tree[id];
                    match data.node_type {
                        NodeType::Text => value.push_str(&data.value),
                        NodeType::Element => stack.extend(data.children.iter().rev()),
                        _ => {}
                    }
                }
                value
            }
            _ => self.data().value.clone(),
        }
    }

    fn first_child(&self) -> Option<Self> {
        self.data().children.first().map(|&id| MockNode {
            id,
            tree: Rc::clone(&self.tree),
        })
    }

    fn next_sibling(&self) -> Option<Self> {
        self.sibling_at(1)
    }

    fn parent(&self) -> Option<Self> {
        self.data().parent.map(|id| MockNode {
            id,
            tree: Rc::clone(&self.tree),
        })
    }

    fn attributes(&self) -> Vec<Self> {
        self.data()
            .attributes
            .iter()
            .map(|&id| MockNode {
                id,
                tree: Rc::clone(&self.tree),
            })
            .collect()
    }
}

/// Builds a [`MockTree`] node by node. Id 0 is the root.
#[derive(Debug)]
pub struct MockTreeBuilder {
    nodes: Vec<MockNodeData>,
}

impl Default for MockTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTreeBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![MockNodeData {
                node_type: NodeType::Root,
                name: None,
                value: String::new(),
                parent: None,
                children: Vec::new(),
                attributes: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> usize {
        0
    }

    fn push(
        &mut self,
        parent: usize,
        node_type: NodeType,
        name: Option<&str>,
        value: &str,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(MockNodeData {
            node_type,
            name: name.map(|n| QualifiedName::parse(n).unwrap_or_else(|_| QualifiedName::new(n))),
            value: value.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            attributes: Vec::new(),
        });
        if node_type == NodeType::Attribute {
            self.nodes[parent].attributes.push(id);
        } else {
            self.nodes[parent].children.push(id);
        }
        id
    }

    pub fn element(&mut self, parent: usize, name: &str) -> usize {
        self.push(parent, NodeType::Element, Some(name), "")
    }

    /// Adds an element whose name is in namespace `uri`.
    pub fn element_ns(&mut self, parent: usize, name: &str, uri: &str) -> usize {
        let id = self.element(parent, name);
        if let Some(name) = self.nodes[id].name.as_mut() {
            name.uri = Some(uri.to_string());
        }
        id
    }

    pub fn attribute(&mut self, element: usize, name: &str, value: &str) -> usize {
        self.push(element, NodeType::Attribute, Some(name), value)
    }

    pub fn text(&mut self, parent: usize, value: &str) -> usize {
        self.push(parent, NodeType::Text, None, value)
    }

    pub fn comment(&mut self, parent: usize, value: &str) -> usize {
        self.push(parent, NodeType::Comment, None, value)
    }

    pub fn processing_instruction(&mut self, parent: usize, target: &str, value: &str) -> usize {
        self.push(parent, NodeType::ProcessingInstruction, Some(target), value)
    }

    /// Adds `<name>text</name>` under `parent`.
    pub fn text_element(&mut self, parent: usize, name: &str, text: &str) -> usize {
        let element = self.element(parent, name);
        self.text(element, text);
        element
    }

    pub fn build(self) -> MockTree {
        MockTree {
            nodes: Rc::new(self.nodes),
        }
    }
}

/// Creates a simple mock tree for testing:
/// ```text
/// <root>                                  <!-- id 0 -->
///   <para id="p1" xml:lang="en">Hello</para> <!-- id 1, attrs 2 & 3, text 4 -->
///   <!-- comment node -->                  <!-- id 5 -->
///   <div/>                                 <!-- id 6 -->
///   <?pi-target pi-value?>                 <!-- id 7 -->
///   <para>World</para>                     <!-- id 8, text 9 -->
/// </root>
/// ```
pub fn create_test_tree() -> MockTree {
    let mut b = MockTreeBuilder::new();
    let root = b.root();
    let para = b.element(root, "para");
    b.attribute(para, "id", "p1");
    b.attribute(para, "xml:lang", "en");
    b.text(para, "Hello");
    b.comment(root, " comment node ");
    b.element(root, "div");
    b.processing_instruction(root, "pi-target", "pi-value");
    b.text_element(root, "para", "World");
    b.build()
}

#[cfg(test)]
mod mock_tests {
    use super::*;

    #[test]
    fn test_navigation_follows_sibling_links() {
        let tree = create_test_tree();
        let names: Vec<NodeType> = tree.root().children().map(|n| n.node_type()).collect();
        assert_eq!(
            names,
            vec![
                NodeType::Element,
                NodeType::Comment,
                NodeType::Element,
                NodeType::ProcessingInstruction,
                NodeType::Element
            ]
        );
        assert_eq!(tree.node(8).parent(), Some(tree.root()));
        assert_eq!(tree.node(2).next_sibling(), None);
    }

    #[test]
    fn test_string_values() {
        let tree = create_test_tree();
        assert_eq!(tree.root().string_value(), "HelloWorld");
        assert_eq!(tree.node(2).string_value(), "p1");
        assert_eq!(tree.node(3).name().unwrap().prefix.as_deref(), Some("xml"));
    }

    #[test]
    fn test_namespaces_in_scope_come_from_element_and_ancestors() {
        let mut b = MockTreeBuilder::new();
        let outer = b.element_ns(b.root(), "h:html", "urn:h");
        let middle = b.element_ns(outer, "body", "urn:default");
        let inner = b.element_ns(middle, "h:p", "urn:h2");
        b.attribute(inner, "xml:lang", "en");
        let tree = b.build();

        assert_eq!(
            tree.node(inner).namespaces_in_scope(),
            vec![
                (Some("h".to_string()), "urn:h2".to_string()),
                (None, "urn:default".to_string()),
            ]
        );
        assert_eq!(tree.node(outer).namespaces_in_scope().len(), 1);
        assert!(create_test_tree().node(1).namespaces_in_scope().is_empty());
    }

    #[test]
    fn test_document_order_and_identity() {
        let tree = create_test_tree();
        let ids: Vec<usize> = tree.document_order().iter().map(|n| n.id).collect();
        assert_eq!(ids, (0..tree.len()).collect::<Vec<_>>());
        assert_eq!(tree.node(4).root(), tree.root());

        let other = create_test_tree();
        assert_ne!(tree.root(), other.root());
    }
}
