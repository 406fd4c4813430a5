//! An append-only, randomly indexable collection of node handles.
//!
//! Indices are absolute: a list with a read offset of `k` behaves as if its first `k`
//! slots had already been consumed, so a loop that drained part of an iterator can
//! continue numbering positions without re-indexing.

use xslvm_datasource::TreeNode;

#[derive(Debug, Clone)]
pub struct NodeList<N> {
    slots: Vec<Option<N>>,
    offset: usize,
}

impl<N> Default for NodeList<N> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            offset: 0,
        }
    }
}

impl<N: TreeNode> NodeList<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            offset: 0,
        }
    }

    /// Stores a copy of `node`; the caller keeps its own handle.
    pub fn add(&mut self, node: &N) {
        self.slots.push(Some(node.clone()));
    }

    pub fn push(&mut self, node: N) {
        self.slots.push(Some(node));
    }

    /// Total count including the consumed prefix described by the offset.
    pub fn count(&self) -> usize {
        self.offset + self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Declares the first `offset` positions as already consumed. Stored slots keep
    /// their relative order and are now addressed from `offset` upwards.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn get(&self, index: usize) -> Option<&N> {
        index
            .checked_sub(self.offset)
            .and_then(|slot| self.slots.get(slot))
            .and_then(Option::as_ref)
    }

    /// Moves the handle at `index` out of the list, leaving the slot empty.
    pub fn steal(&mut self, index: usize) -> Option<N> {
        let slot = index.checked_sub(self.offset)?;
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Snapshot of every live handle, in list order.
    pub fn to_vec(&self) -> Vec<N> {
        self.slots.iter().flatten().cloned().collect()
    }

    /// Reorders the stored slots: slot `i` of the result is slot `permutation[i]` of
    /// the input. The permutation must cover every stored slot exactly once.
    pub fn permute(&mut self, permutation: &[usize]) {
        let mut taken: Vec<Option<N>> = self.slots.iter_mut().map(Option::take).collect();
        self.slots = permutation
            .iter()
            .map(|&from| taken.get_mut(from).and_then(Option::take))
            .collect();
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.offset = 0;
    }
}

impl<N: TreeNode> FromIterator<N> for NodeList<N> {
    fn from_iter<I: IntoIterator<Item = N>>(iter: I) -> Self {
        Self {
            slots: iter.into_iter().map(Some).collect(),
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xslvm_datasource::tests::create_test_tree;

    #[test]
    fn test_steal_leaves_hole_but_keeps_count() {
        let tree = create_test_tree();
        let mut list: NodeList<_> = tree.root().children().collect();
        assert_eq!(list.count(), 5);

        let first = list.steal(0).unwrap();
        assert_eq!(first, tree.node(1));
        assert!(list.get(0).is_none());
        assert!(list.steal(0).is_none());
        assert_eq!(list.count(), 5);
    }

    #[test]
    fn test_offset_shifts_addressing() {
        let tree = create_test_tree();
        let mut list = NodeList::new();
        list.add(&tree.node(6));
        list.add(&tree.node(8));
        list.set_offset(3);

        assert_eq!(list.count(), 5);
        assert!(list.get(0).is_none());
        assert_eq!(list.get(3), Some(&tree.node(6)));
        assert_eq!(list.steal(4), Some(tree.node(8)));
    }

    #[test]
    fn test_permute_reorders_slots() {
        let tree = create_test_tree();
        let mut list: NodeList<_> = [1, 6, 8].iter().map(|&id| tree.node(id)).collect();
        list.permute(&[2, 0, 1]);
        let ids: Vec<usize> = list.to_vec().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![8, 1, 6]);
    }
}
