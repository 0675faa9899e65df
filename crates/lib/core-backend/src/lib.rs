//! Core backend trait for nodeflow.

mod data;

use nodeflow_runner_state::{UnitEvent, UnitRecord};
use uuid::Uuid;

pub use nodeflow_backends_core::{BackendError, BackendResult};

pub use self::data::*;

/// Durable store behind the run loop: program registry, unit records and
/// the event queue.
#[async_trait::async_trait]
pub trait CoreBackend: Send + Sync {
    fn clone_box(&self) -> Box<dyn CoreBackend>;

    /// Store a program and return its id.
    async fn register_program(&self, registration: &ProgramRegistration) -> BackendResult<Uuid>;

    /// Load registered programs. Unknown ids are skipped.
    async fn get_programs(&self, ids: &[Uuid]) -> BackendResult<Vec<ProgramVersion>>;

    /// Load unit records. Unknown ids are skipped.
    async fn get_units(&self, unit_ids: &[Uuid]) -> BackendResult<Vec<UnitRecord>>;

    /// Most recently created root units, newest first.
    async fn list_root_units(&self, limit: usize) -> BackendResult<Vec<UnitRecord>>;

    /// Lease up to `size` visible events without blocking. Leased events
    /// become visible again once the lease expires.
    async fn claim_events(&self, size: usize, claim: LeaseClaim) -> BackendResult<Vec<UnitEvent>>;

    /// Give leased events back before their lease expires.
    async fn release_events(&self, lease_id: Uuid, event_ids: &[Uuid]) -> BackendResult<()>;

    /// Append events for run-loop consumption.
    async fn queue_events(&self, events: &[UnitEvent]) -> BackendResult<()>;

    /// Atomically upsert units, append events and acknowledge handled events.
    async fn commit(&self, commit: &UnitCommit) -> BackendResult<()>;
}

impl Clone for Box<dyn CoreBackend> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
