/*!
# Mark Store

Named sets of node ids that carry selections from one command to the next.
Marks are an overlay: they never keep a node alive, and ids that have been
retired or detached simply stop showing up in `marked`.
*/

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::ast::{NodeId, Tree};

/// Label used when a command does not name one
pub const DEFAULT_LABEL: &str = "target";

/// Ordered (tree pre-order), de-duplicated list of attached node ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection(Vec<NodeId>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps attached ids only and puts them in pre-order.
    pub fn from_ids(tree: &Tree, ids: impl IntoIterator<Item = NodeId>) -> Self {
        let wanted: HashSet<NodeId> = ids.into_iter().collect();
        if wanted.is_empty() {
            return Self::new();
        }
        Self(
            tree.preorder(tree.root())
                .into_iter()
                .filter(|id| wanted.contains(id))
                .collect(),
        )
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.0.contains(&id)
    }

    pub fn first(&self) -> Option<NodeId> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<NodeId> {
        self.0.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }
}

impl IntoIterator for Selection {
    type Item = NodeId;
    type IntoIter = std::vec::IntoIter<NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Mapping from mark label to the set of marked node ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkStore {
    marks: BTreeMap<String, BTreeSet<NodeId>>,
}

impl MarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, ids: impl IntoIterator<Item = NodeId>, label: &str) {
        self.marks.entry(label.to_string()).or_default().extend(ids);
    }

    pub fn mark_one(&mut self, id: NodeId, label: &str) {
        self.mark([id], label);
    }

    pub fn unmark(&mut self, ids: impl IntoIterator<Item = NodeId>, label: &str) {
        if let Some(set) = self.marks.get_mut(label) {
            for id in ids {
                set.remove(&id);
            }
            if set.is_empty() {
                self.marks.remove(label);
            }
        }
    }

    /// Raw membership, without a liveness check.
    pub fn has(&self, id: NodeId, label: &str) -> bool {
        self.marks.get(label).is_some_and(|set| set.contains(&id))
    }

    /// Live, attached nodes carrying `label`, in pre-order.
    pub fn marked(&self, tree: &Tree, label: &str) -> Selection {
        match self.marks.get(label) {
            Some(set) => Selection::from_ids(tree, set.iter().copied()),
            None => Selection::new(),
        }
    }

    /// `to` becomes a snapshot of `from`'s current contents.
    pub fn copy(&mut self, from: &str, to: &str) {
        match self.marks.get(from).cloned() {
            Some(set) => {
                self.marks.insert(to.to_string(), set);
            }
            None => {
                self.marks.remove(to);
            }
        }
    }

    /// Moves `from` onto `to`, replacing whatever `to` held.
    pub fn rename(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        match self.marks.remove(from) {
            Some(set) => {
                self.marks.insert(to.to_string(), set);
            }
            None => {
                self.marks.remove(to);
            }
        }
    }

    pub fn delete(&mut self, label: &str) {
        self.marks.remove(label);
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.marks.keys().map(String::as_str)
    }

    /// Live view of every label, empty labels omitted.
    pub fn snapshot(&self, tree: &Tree) -> BTreeMap<String, Vec<NodeId>> {
        self.marks
            .keys()
            .map(|label| (label.clone(), self.marked(tree, label).ids().to_vec()))
            .filter(|(_, ids)| !ids.is_empty())
            .collect()
    }
}
