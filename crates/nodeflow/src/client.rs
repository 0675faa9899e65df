//! Handle for starting programs and talking to their units.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use nodeflow_core_backend::{BackendError, CoreBackend, ProgramRegistration, UnitCommit};
use nodeflow_program::{ProgramNode, ProgramTree, TreeError};
use nodeflow_runner_state::{
    LedgerEntry, ProgramState, Signal, UnitEvent, UnitEventKind, UnitRecord, UnitStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("invalid program: {0}")]
    Program(#[from] TreeError),
    #[error("unit {0} not found")]
    UnknownUnit(Uuid),
    #[error("unit {0} is not the root of a program")]
    NotRoot(Uuid),
    #[error("program {0} was cancelled")]
    Cancelled(Uuid),
}

/// Client over a shared backend. Cheap to clone.
#[derive(Clone)]
pub struct ProgramClient {
    backend: Arc<dyn CoreBackend>,
}

impl ProgramClient {
    pub fn new(backend: impl CoreBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_shared(backend: Arc<dyn CoreBackend>) -> Self {
        Self { backend }
    }

    /// Register `program` and queue its root unit. Returns the root unit id.
    pub async fn start_program(&self, program: &ProgramNode) -> Result<Uuid, ClientError> {
        let tree = ProgramTree::from_node(program)?;
        let program_id = self
            .backend
            .register_program(&ProgramRegistration {
                name: program.uuid.to_string(),
                program: program.clone(),
            })
            .await?;

        let root = UnitRecord::root(
            Uuid::new_v4(),
            program_id,
            tree.root_id().clone(),
            ProgramState::default(),
            Utc::now(),
        );
        let root_unit_id = root.unit_id;
        self.backend
            .commit(&UnitCommit {
                units: vec![root],
                events: vec![UnitEvent::new(root_unit_id, UnitEventKind::Start)],
                ..UnitCommit::default()
            })
            .await?;
        info!(%root_unit_id, %program_id, nodes = tree.len(), "program started");
        Ok(root_unit_id)
    }

    pub async fn signal(&self, unit_id: Uuid, signal: Signal) -> Result<(), ClientError> {
        self.unit(unit_id).await?;
        self.backend
            .queue_events(&[UnitEvent::new(unit_id, UnitEventKind::Signal { signal })])
            .await?;
        Ok(())
    }

    /// Answer the input node evaluated by `unit_id`.
    pub async fn send_input(&self, unit_id: Uuid, text: &str) -> Result<(), ClientError> {
        self.signal(unit_id, Signal::response(text)).await
    }

    /// Cancel a program and, transitively, every unit it is waiting on.
    pub async fn cancel(&self, root_unit_id: Uuid) -> Result<(), ClientError> {
        self.root(root_unit_id).await?;
        self.backend
            .queue_events(&[UnitEvent::new(root_unit_id, UnitEventKind::Cancel)])
            .await?;
        info!(%root_unit_id, "program cancellation requested");
        Ok(())
    }

    pub async fn unit(&self, unit_id: Uuid) -> Result<UnitRecord, ClientError> {
        self.backend
            .get_units(&[unit_id])
            .await?
            .into_iter()
            .next()
            .ok_or(ClientError::UnknownUnit(unit_id))
    }

    pub async fn root(&self, root_unit_id: Uuid) -> Result<UnitRecord, ClientError> {
        let unit = self.unit(root_unit_id).await?;
        if !unit.is_root() {
            return Err(ClientError::NotRoot(root_unit_id));
        }
        Ok(unit)
    }

    /// Ledger of a program, oldest message first.
    pub async fn query_messages(&self, root_unit_id: Uuid) -> Result<Vec<LedgerEntry>, ClientError> {
        let root = self.root(root_unit_id).await?;
        Ok(root
            .ledger
            .map(|ledger| ledger.messages())
            .unwrap_or_default())
    }

    pub async fn result(&self, root_unit_id: Uuid) -> Result<Option<ProgramState>, ClientError> {
        let root = self.root(root_unit_id).await?;
        if root.status == UnitStatus::Cancelled {
            return Err(ClientError::Cancelled(root_unit_id));
        }
        Ok(root.result().cloned())
    }

    /// Poll until the program finishes.
    pub async fn wait_for_result(
        &self,
        root_unit_id: Uuid,
        poll_interval: Duration,
    ) -> Result<ProgramState, ClientError> {
        loop {
            if let Some(state) = self.result(root_unit_id).await? {
                return Ok(state);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Most recent programs, newest first.
    pub async fn list_programs(&self, limit: usize) -> Result<Vec<UnitRecord>, ClientError> {
        Ok(self.backend.list_root_units(limit).await?)
    }
}
