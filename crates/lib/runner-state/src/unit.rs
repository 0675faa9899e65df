//! Persisted record of one durable unit.
//!
//! A unit evaluates exactly one program node. Whatever it is waiting on is
//! held in its [`UnitFrame`], so a unit can be reloaded from storage and
//! continue from the next event.

use chrono::{DateTime, Utc};
use nodeflow_program::{NodeId, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::MessageLedger;
use crate::state::ProgramState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Cancelled,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Completed | UnitStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Suspended => "suspended",
            UnitStatus::Completed => "completed",
            UnitStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit continuation of a unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum UnitFrame {
    /// Spawned with its incoming state, not started yet.
    Pending { state: ProgramState },
    /// `if` or `while` waiting for its condition unit.
    Condition { child_unit_id: Uuid },
    /// Running children in order, then acting on their values.
    Children {
        next_child: usize,
        values: Vec<Value>,
        state: ProgramState,
        awaiting: Option<Uuid>,
    },
    /// `input` suspended until a response for `message_id` arrives.
    AwaitingResponse {
        message_id: Uuid,
        #[serde(default)]
        prompt: String,
        state: ProgramState,
    },
    Completed { state: ProgramState },
    Cancelled,
}

impl UnitFrame {
    /// The child unit this frame is blocked on, if any.
    pub fn awaited_child(&self) -> Option<Uuid> {
        match self {
            UnitFrame::Condition { child_unit_id } => Some(*child_unit_id),
            UnitFrame::Children { awaiting, .. } => *awaiting,
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub unit_id: Uuid,
    pub program_id: Uuid,
    pub node_id: NodeId,
    pub root_unit_id: Uuid,
    pub parent_unit_id: Option<Uuid>,
    pub status: UnitStatus,
    pub frame: UnitFrame,
    /// Present on the root unit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<MessageLedger>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UnitRecord {
    /// Root unit of a program run. It owns the ledger and is the signalling
    /// target of every descendant.
    pub fn root(
        unit_id: Uuid,
        program_id: Uuid,
        node_id: NodeId,
        state: ProgramState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            unit_id,
            program_id,
            node_id,
            root_unit_id: unit_id,
            parent_unit_id: None,
            status: UnitStatus::Pending,
            frame: UnitFrame::Pending { state },
            ledger: Some(MessageLedger::new()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn child(
        parent: &UnitRecord,
        unit_id: Uuid,
        node_id: NodeId,
        state: ProgramState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            unit_id,
            program_id: parent.program_id,
            node_id,
            root_unit_id: parent.root_unit_id,
            parent_unit_id: Some(parent.unit_id),
            status: UnitStatus::Pending,
            frame: UnitFrame::Pending { state },
            ledger: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.unit_id == self.root_unit_id
    }

    /// Final state once the unit completed.
    pub fn result(&self) -> Option<&ProgramState> {
        match &self.frame {
            UnitFrame::Completed { state } => Some(state),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_inherit_root_and_program() {
        let now = Utc::now();
        let root = UnitRecord::root(
            Uuid::new_v4(),
            Uuid::new_v4(),
            NodeId::from("root"),
            ProgramState::default(),
            now,
        );
        let child = UnitRecord::child(
            &root,
            Uuid::new_v4(),
            NodeId::from("print"),
            ProgramState::default(),
            now,
        );

        assert!(root.is_root());
        assert!(root.ledger.is_some());
        assert!(!child.is_root());
        assert!(child.ledger.is_none());
        assert_eq!(child.root_unit_id, root.unit_id);
        assert_eq!(child.parent_unit_id, Some(root.unit_id));
        assert_eq!(child.program_id, root.program_id);
        assert_eq!(child.result(), None);
    }

    #[test]
    fn frame_round_trips_through_json() {
        let frame = UnitFrame::Children {
            next_child: 2,
            values: vec![Value::from(1), Value::from("a")],
            state: ProgramState::default(),
            awaiting: Some(Uuid::nil()),
        };
        let encoded = serde_json::to_value(&frame).expect("encode");
        assert_eq!(encoded["frame"], "children");
        let decoded: UnitFrame = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, frame);
        assert_eq!(decoded.awaited_child(), Some(Uuid::nil()));
    }
}
