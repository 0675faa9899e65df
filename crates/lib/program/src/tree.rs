//! Id-addressed arena form of a program.

use std::collections::HashMap;

use crate::node::{NodeId, NodeKind, ProgramNode};

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("duplicate node id `{0}`")]
    DuplicateId(NodeId),

    #[error("invalid program document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One node in the arena. Children and condition are referenced by id.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: NodeKind,
    pub children: Vec<Option<NodeId>>,
    pub condition: Option<NodeId>,
}

/// Where a node hangs in the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentLink {
    pub parent: NodeId,
    pub as_condition: bool,
}

/// Arena of program nodes with an explicit parent index.
#[derive(Clone, Debug)]
pub struct ProgramTree {
    pub(crate) root: NodeId,
    pub(crate) nodes: HashMap<NodeId, NodeRecord>,
    pub(crate) parents: HashMap<NodeId, ParentLink>,
}

impl ProgramTree {
    pub fn from_node(top: &ProgramNode) -> Result<Self, TreeError> {
        let mut tree = Self {
            root: top.uuid.clone(),
            nodes: HashMap::new(),
            parents: HashMap::new(),
        };

        let mut pending: Vec<(&ProgramNode, Option<ParentLink>)> = vec![(top, None)];
        while let Some((node, link)) = pending.pop() {
            if tree.nodes.contains_key(&node.uuid) {
                return Err(TreeError::DuplicateId(node.uuid.clone()));
            }
            if let Some(link) = link {
                tree.parents.insert(node.uuid.clone(), link);
            }

            let record = NodeRecord {
                id: node.uuid.clone(),
                kind: node.kind.clone(),
                children: node
                    .children
                    .iter()
                    .map(|child| child.as_ref().map(|child| child.uuid.clone()))
                    .collect(),
                condition: node.condition_node.as_ref().map(|cond| cond.uuid.clone()),
            };
            tree.nodes.insert(node.uuid.clone(), record);

            if let Some(condition) = &node.condition_node {
                pending.push((
                    condition,
                    Some(ParentLink {
                        parent: node.uuid.clone(),
                        as_condition: true,
                    }),
                ));
            }
            for child in node.children.iter().flatten() {
                pending.push((
                    child,
                    Some(ParentLink {
                        parent: node.uuid.clone(),
                        as_condition: false,
                    }),
                ));
            }
        }

        Ok(tree)
    }

    pub fn from_json(document: &str) -> Result<Self, TreeError> {
        let top = ProgramNode::from_json(document)?;
        Self::from_node(&top)
    }

    /// Rebuild the nested interchange form.
    pub fn to_node(&self) -> ProgramNode {
        self.build_node(&self.root)
            .unwrap_or_else(|| ProgramNode::new(self.root.clone(), NodeKind::Root))
    }

    fn build_node(&self, id: &NodeId) -> Option<ProgramNode> {
        let record = self.nodes.get(id)?;
        Some(ProgramNode {
            uuid: record.id.clone(),
            kind: record.kind.clone(),
            children: record
                .children
                .iter()
                .map(|child| child.as_ref().and_then(|child| self.build_node(child)))
                .collect(),
            condition_node: record
                .condition
                .as_ref()
                .and_then(|cond| self.build_node(cond))
                .map(Box::new),
        })
    }

    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    pub fn root(&self) -> Option<&NodeRecord> {
        self.nodes.get(&self.root)
    }

    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn parent_of(&self, id: &str) -> Option<&ParentLink> {
        self.parents.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in document order: a node, its condition, then its children.
    pub fn walk(&self) -> Vec<&NodeRecord> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut pending = vec![&self.root];
        while let Some(id) = pending.pop() {
            let Some(record) = self.nodes.get(id) else {
                continue;
            };
            ordered.push(record);
            for child in record.children.iter().rev().flatten() {
                pending.push(child);
            }
            if let Some(condition) = &record.condition {
                pending.push(condition);
            }
        }
        ordered
    }

    /// True when `candidate` is `ancestor` or lies below it.
    pub fn is_within(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = candidate;
        loop {
            if current == ancestor {
                return true;
            }
            match self.parents.get(current) {
                Some(link) => current = link.parent.as_str(),
                None => return false,
            }
        }
    }
}
