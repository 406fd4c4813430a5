//! The lazily built key index.
//!
//! Tables are identified by key name and tree (the tree's root node). A table is
//! created empty, filled by running the key's program over the whole tree, and only
//! answers lookups once that program has returned.

use std::collections::HashMap;
use xslvm_datasource::{ExpandedName, TreeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Missing,
    Building,
    Ready,
}

#[derive(Debug)]
struct KeyTable<N> {
    entries: HashMap<String, Vec<N>>,
    complete: bool,
}

#[derive(Debug)]
pub struct KeyIndex<N> {
    tables: HashMap<(ExpandedName, N), KeyTable<N>>,
}

impl<N: TreeNode> Default for KeyIndex<N> {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }
}

impl<N: TreeNode> KeyIndex<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, name: &ExpandedName, root: &N) -> TableState {
        match self.tables.get(&(name.clone(), root.clone())) {
            None => TableState::Missing,
            Some(table) if table.complete => TableState::Ready,
            Some(_) => TableState::Building,
        }
    }

    /// Creates the empty table that the key program will fill.
    pub fn begin(&mut self, name: &ExpandedName, root: &N) {
        self.tables.insert(
            (name.clone(), root.clone()),
            KeyTable {
                entries: HashMap::new(),
                complete: false,
            },
        );
    }

    /// Adds `node` under `value`. Nodes arrive in document order, so a repeat of the
    /// last node in a bag is the only possible duplicate.
    pub fn insert(&mut self, name: &ExpandedName, root: &N, value: String, node: &N) {
        let Some(table) = self.tables.get_mut(&(name.clone(), root.clone())) else {
            return;
        };
        let bag = table.entries.entry(value).or_default();
        if bag.last() != Some(node) {
            bag.push(node.clone());
        }
    }

    pub fn finish(&mut self, name: &ExpandedName, root: &N) {
        if let Some(table) = self.tables.get_mut(&(name.clone(), root.clone())) {
            table.complete = true;
        }
    }

    /// Drops a table whose build did not run to its end, so the next lookup starts over.
    pub fn abandon(&mut self, name: &ExpandedName, root: &N) {
        self.tables.remove(&(name.clone(), root.clone()));
    }

    /// Nodes indexed under `value`, as independent copies. Empty when the table is
    /// missing or not complete.
    pub fn find(&self, name: &ExpandedName, root: &N, value: &str) -> Vec<N> {
        self.tables
            .get(&(name.clone(), root.clone()))
            .filter(|table| table.complete)
            .and_then(|table| table.entries.get(value))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of tables built or being built.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xslvm_datasource::tests::create_test_tree;

    #[test]
    fn test_table_lifecycle() {
        let tree = create_test_tree();
        let root = tree.root();
        let name = ExpandedName::new("by-id");
        let mut index = KeyIndex::new();

        assert_eq!(index.state(&name, &root), TableState::Missing);
        index.begin(&name, &root);
        index.insert(&name, &root, "p1".into(), &tree.node(1));
        assert_eq!(index.state(&name, &root), TableState::Building);
        assert!(index.find(&name, &root, "p1").is_empty(), "incomplete tables answer nothing");

        index.finish(&name, &root);
        assert_eq!(index.state(&name, &root), TableState::Ready);
        assert_eq!(index.find(&name, &root, "p1"), vec![tree.node(1)]);
        assert_eq!(index.find(&name, &root, "p1"), index.find(&name, &root, "p1"));
        assert!(index.find(&name, &root, "nope").is_empty());
    }

    #[test]
    fn test_abandoned_table_is_missing_again() {
        let tree = create_test_tree();
        let root = tree.root();
        let name = ExpandedName::new("by-id");
        let mut index = KeyIndex::new();

        index.begin(&name, &root);
        index.insert(&name, &root, "p1".into(), &tree.node(1));
        index.abandon(&name, &root);
        assert_eq!(index.state(&name, &root), TableState::Missing);
        assert!(index.is_empty());
    }

    #[test]
    fn test_tables_are_per_tree_and_deduplicated() {
        let first = create_test_tree();
        let second = create_test_tree();
        let name = ExpandedName::new("k");
        let mut index = KeyIndex::new();

        index.begin(&name, &first.root());
        index.insert(&name, &first.root(), "v".into(), &first.node(8));
        index.insert(&name, &first.root(), "v".into(), &first.node(8));
        index.finish(&name, &first.root());

        assert_eq!(index.find(&name, &first.root(), "v").len(), 1);
        assert_eq!(index.state(&name, &second.root()), TableState::Missing);
        assert_eq!(index.len(), 1);
    }
}
