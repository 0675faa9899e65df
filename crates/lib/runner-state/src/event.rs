use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::Signal;
use crate::state::ProgramState;

/// Input to a unit. Events are the only way a unit makes progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitEvent {
    pub event_id: Uuid,
    pub unit_id: Uuid,
    pub kind: UnitEventKind,
    pub enqueued_at: DateTime<Utc>,
}

impl UnitEvent {
    pub fn new(unit_id: Uuid, kind: UnitEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            unit_id,
            kind,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitEventKind {
    Start,
    ChildCompleted {
        child_unit_id: Uuid,
        state: ProgramState,
    },
    Signal {
        signal: Signal,
    },
    Cancel,
}

impl UnitEventKind {
    pub fn label(&self) -> &'static str {
        match self {
            UnitEventKind::Start => "start",
            UnitEventKind::ChildCompleted { .. } => "child_completed",
            UnitEventKind::Signal { .. } => "signal",
            UnitEventKind::Cancel => "cancel",
        }
    }
}
