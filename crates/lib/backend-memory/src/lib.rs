//! In-memory backend for tests and local runs.
//!
//! Optionally mirrors its contents to a JSON snapshot file after every
//! mutation, which lets a later process resume suspended programs. Event
//! leases are process-local and never written to the snapshot. Child units
//! are dropped as soon as they finish, so storage follows the live part of
//! each program rather than its history.

mod core_backend;
mod snapshot;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use nodeflow_core_backend::{BackendResult, ProgramVersion};
use nodeflow_runner_state::{UnitEvent, UnitRecord};

type LeaseStore = HashMap<Uuid, (Uuid, DateTime<Utc>)>;

#[derive(Default)]
pub(crate) struct MemoryState {
    pub(crate) programs: HashMap<Uuid, ProgramVersion>,
    pub(crate) units: HashMap<Uuid, UnitRecord>,
    pub(crate) events: VecDeque<UnitEvent>,
    /// event id -> (lease id, expiry)
    pub(crate) leases: LeaseStore,
}

/// Backend that stores programs, units and events in memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend mirrored to `path`. Existing snapshot contents are loaded.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> BackendResult<Self> {
        let path = path.into();
        let state = snapshot::load(&path)?;
        tracing::debug!(
            path = %path.display(),
            programs = state.programs.len(),
            units = state.units.len(),
            events = state.events.len(),
            "loaded memory backend snapshot"
        );
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            snapshot_path: Some(Arc::new(path)),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref().map(PathBuf::as_path)
    }

    pub fn units(&self) -> Vec<UnitRecord> {
        self.state
            .lock()
            .expect("memory state poisoned")
            .units
            .values()
            .cloned()
            .collect()
    }

    pub fn pending_events(&self) -> Vec<UnitEvent> {
        self.state
            .lock()
            .expect("memory state poisoned")
            .events
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn persist(&self, state: &MemoryState) -> BackendResult<()> {
        match &self.snapshot_path {
            Some(path) => snapshot::store(path, state),
            None => Ok(()),
        }
    }
}
