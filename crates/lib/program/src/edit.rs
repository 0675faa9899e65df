//! Editing operations on the arena.
//!
//! Each operation rewrites ids in the node and parent maps. An operation
//! naming a node that does not exist, or a placement the tree cannot hold,
//! leaves the tree untouched and reports `false` / `None`.

use crate::node::{NodeId, NodeKind, NodeTag};
use crate::operator::Operation;
use crate::tree::{NodeRecord, ParentLink, ProgramTree};
use crate::value::ValueKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Above,
    Below,
}

/// Attribute change for a single node. Applied only when the node has the
/// matching kind.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeUpdate {
    /// Literal text of a `value` node.
    Literal(String),
    /// Value kind of a `value` or `input` node.
    ValueKind(ValueKind),
    Operation(Operation),
    /// Variable reference of a `varGet` or `varSet` node.
    VarRef(Option<NodeId>),
    LabelName(String),
}

/// A variable label as listed by the editor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarLabel {
    pub id: NodeId,
    pub name: String,
}

impl ProgramTree {
    /// Append a new node of `tag` to the children of `parent`.
    pub fn add_child(&mut self, parent: &str, tag: NodeTag) -> Option<NodeId> {
        if !self.contains(parent) {
            return None;
        }
        let id = self.insert_detached(tag);
        self.attach_child(parent, &id, None);
        Some(id)
    }

    /// Put a new node of `tag` into the condition slot of an `if` or
    /// `while`, dropping whatever sub-tree was there.
    pub fn set_condition(&mut self, parent: &str, tag: NodeTag) -> Option<NodeId> {
        if !self.get(parent)?.kind.has_condition_slot() {
            return None;
        }
        let id = self.insert_detached(tag);
        self.attach_condition(parent, &id);
        Some(id)
    }

    /// Insert a new node of `tag` right before or after `sibling`.
    pub fn insert_next_to(
        &mut self,
        sibling: &str,
        tag: NodeTag,
        placement: Placement,
    ) -> Option<NodeId> {
        let (parent, index) = self.child_position(sibling)?;
        let id = self.insert_detached(tag);
        let index = match placement {
            Placement::Above => index,
            Placement::Below => index + 1,
        };
        self.attach_child(parent.as_str(), &id, Some(index));
        Some(id)
    }

    /// Remove a node and everything below it. The top node cannot be
    /// deleted.
    pub fn delete(&mut self, id: &str) -> bool {
        if id == self.root.as_str() || !self.contains(id) {
            return false;
        }
        self.detach(id);
        self.drop_subtree(id);
        true
    }

    /// Move a node (with its sub-tree) under `new_parent`, either appended
    /// to its children or into its condition slot.
    pub fn move_to(&mut self, id: &str, new_parent: &str, as_condition: bool) -> bool {
        if !self.can_move(id, new_parent) {
            return false;
        }
        let Some(parent) = self.get(new_parent) else {
            return false;
        };
        let as_condition = as_condition && parent.kind.has_condition_slot();
        let id = NodeId::from(id);

        self.detach(id.as_str());
        if as_condition {
            self.attach_condition(new_parent, &id);
        } else {
            self.attach_child(new_parent, &id, None);
        }
        true
    }

    /// Move a node (with its sub-tree) next to `sibling`.
    pub fn move_next_to(&mut self, id: &str, sibling: &str, placement: Placement) -> bool {
        if id == sibling {
            return false;
        }
        let Some((parent, _)) = self.child_position(sibling) else {
            return false;
        };
        if !self.can_move(id, parent.as_str()) {
            return false;
        }
        let id = NodeId::from(id);

        self.detach(id.as_str());
        // Detaching may have shifted the sibling.
        let Some((parent, index)) = self.child_position(sibling) else {
            return false;
        };
        let index = match placement {
            Placement::Above => index,
            Placement::Below => index + 1,
        };
        self.attach_child(parent.as_str(), &id, Some(index));
        true
    }

    pub fn update(&mut self, id: &str, update: NodeUpdate) -> bool {
        let Some(record) = self.nodes.get_mut(id) else {
            return false;
        };
        match (&mut record.kind, update) {
            (NodeKind::Value { value, .. }, NodeUpdate::Literal(literal)) => *value = literal,
            (NodeKind::Value { value_kind, .. }, NodeUpdate::ValueKind(kind))
            | (NodeKind::Input { value_kind }, NodeUpdate::ValueKind(kind)) => *value_kind = kind,
            (NodeKind::Operator { operation }, NodeUpdate::Operation(next)) => *operation = next,
            (NodeKind::VarGet { variable }, NodeUpdate::VarRef(next))
            | (NodeKind::VarSet { variable }, NodeUpdate::VarRef(next)) => *variable = next,
            (NodeKind::VarLabel { name }, NodeUpdate::LabelName(next)) => *name = next,
            _ => return false,
        }
        true
    }

    /// Variable labels in document order.
    pub fn var_labels(&self) -> Vec<VarLabel> {
        self.walk()
            .into_iter()
            .filter_map(|record| match &record.kind {
                NodeKind::VarLabel { name } => Some(VarLabel {
                    id: record.id.clone(),
                    name: name.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    fn insert_detached(&mut self, tag: NodeTag) -> NodeId {
        let id = NodeId::generate();
        self.nodes.insert(
            id.clone(),
            NodeRecord {
                id: id.clone(),
                kind: NodeKind::default_for(tag),
                children: Vec::new(),
                condition: None,
            },
        );
        id
    }

    fn can_move(&self, id: &str, destination: &str) -> bool {
        id != self.root.as_str()
            && self.contains(id)
            && self.contains(destination)
            && !self.is_within(destination, id)
    }

    fn child_position(&self, id: &str) -> Option<(NodeId, usize)> {
        let link = self.parents.get(id)?;
        if link.as_condition {
            return None;
        }
        let parent = self.nodes.get(&link.parent)?;
        let index = parent
            .children
            .iter()
            .position(|child| child.as_ref().is_some_and(|child| child.as_str() == id))?;
        Some((link.parent.clone(), index))
    }

    fn attach_child(&mut self, parent: &str, id: &NodeId, index: Option<usize>) {
        let Some(record) = self.nodes.get_mut(parent) else {
            return;
        };
        let index = index
            .unwrap_or(record.children.len())
            .min(record.children.len());
        record.children.insert(index, Some(id.clone()));
        self.parents.insert(
            id.clone(),
            ParentLink {
                parent: record.id.clone(),
                as_condition: false,
            },
        );
    }

    fn attach_condition(&mut self, parent: &str, id: &NodeId) {
        let previous = match self.nodes.get_mut(parent) {
            Some(record) => record.condition.replace(id.clone()),
            None => return,
        };
        if let Some(previous) = previous {
            self.parents.remove(previous.as_str());
            self.drop_subtree(previous.as_str());
        }
        self.parents.insert(
            id.clone(),
            ParentLink {
                parent: NodeId::from(parent),
                as_condition: true,
            },
        );
    }

    fn detach(&mut self, id: &str) {
        let Some(link) = self.parents.remove(id) else {
            return;
        };
        let Some(parent) = self.nodes.get_mut(&link.parent) else {
            return;
        };
        if link.as_condition {
            parent.condition = None;
        } else {
            parent
                .children
                .retain(|child| child.as_ref().is_none_or(|child| child.as_str() != id));
        }
    }

    fn drop_subtree(&mut self, id: &str) {
        let mut pending = vec![NodeId::from(id)];
        while let Some(id) = pending.pop() {
            self.parents.remove(&id);
            if let Some(record) = self.nodes.remove(&id) {
                pending.extend(record.children.into_iter().flatten());
                pending.extend(record.condition);
            }
        }
    }
}
