// Models exchanged with storage backends. Backends are free to store them
// however they like as long as commits stay atomic.

use chrono::{DateTime, Utc};
use nodeflow_program::ProgramNode;
use nodeflow_runner_state::{UnitEvent, UnitRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
/// Program submitted for execution.
pub struct ProgramRegistration {
    pub name: String,
    pub program: ProgramNode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
/// Stored program, immutable once registered.
pub struct ProgramVersion {
    pub id: Uuid,
    pub name: String,
    pub program: ProgramNode,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
/// Lease settings for claimed events.
pub struct LeaseClaim {
    pub lease_id: Uuid,
    pub lease_expires_at: DateTime<Utc>,
}

impl LeaseClaim {
    pub fn new(lease_id: Uuid, duration: chrono::Duration) -> Self {
        Self {
            lease_id,
            lease_expires_at: Utc::now() + duration,
        }
    }
}

#[derive(Clone, Debug, Default)]
/// Everything one step produced, applied all-or-nothing.
///
/// When `lease_id` is set, every acknowledged event must still be leased
/// under it or the whole commit is rejected.
pub struct UnitCommit {
    pub units: Vec<UnitRecord>,
    pub events: Vec<UnitEvent>,
    pub acked_event_ids: Vec<Uuid>,
    pub lease_id: Option<Uuid>,
}

impl UnitCommit {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.events.is_empty() && self.acked_event_ids.is_empty()
    }
}
