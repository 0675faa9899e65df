//! Runloop that claims unit events and steps units across executor shards.
//!
//! Events are leased from the backend in batches and routed to a shard by
//! unit id, so one unit only ever has one event in progress. Each handled
//! event is persisted together with its acknowledgement in a single commit;
//! events whose commit fails are released and delivered again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nodeflow_core_backend::{BackendError, CoreBackend, LeaseClaim, UnitCommit};
use nodeflow_program::{ProgramTree, TreeError};
use nodeflow_runner_state::{UnitEvent, UnitRecord, UnitStatus};

use crate::runner::advance;

/// Raised when the run loop cannot coordinate execution.
#[derive(Debug, thiserror::Error)]
pub enum RunLoopError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Program(#[from] TreeError),
}

#[derive(Clone, Debug)]
pub struct RunLoopSupervisorConfig {
    pub executor_shards: usize,
    /// Upper bound on events leased at once.
    pub event_batch_size: usize,
    pub poll_interval: Duration,
    pub lease_id: Uuid,
    pub lease_ttl: Duration,
}

impl Default for RunLoopSupervisorConfig {
    fn default() -> Self {
        Self {
            executor_shards: 4,
            event_batch_size: 64,
            poll_interval: Duration::from_millis(25),
            lease_id: Uuid::new_v4(),
            lease_ttl: Duration::from_secs(30),
        }
    }
}

/// Parsed programs, shared by every shard.
#[derive(Clone, Default)]
struct ProgramCache {
    trees: Arc<RwLock<HashMap<Uuid, Arc<ProgramTree>>>>,
}

impl ProgramCache {
    async fn load(
        &self,
        backend: &dyn CoreBackend,
        program_id: Uuid,
    ) -> Result<Arc<ProgramTree>, RunLoopError> {
        let cached = self
            .trees
            .read()
            .expect("program cache poisoned")
            .get(&program_id)
            .cloned();
        if let Some(tree) = cached {
            return Ok(tree);
        }

        let version = backend
            .get_programs(&[program_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RunLoopError::Message(format!("program {program_id} not found")))?;
        let tree = Arc::new(ProgramTree::from_node(&version.program)?);
        self.trees
            .write()
            .expect("program cache poisoned")
            .insert(program_id, Arc::clone(&tree));
        Ok(tree)
    }
}

enum ShardCommand {
    Events(Vec<UnitEvent>),
    Shutdown,
}

enum ShardReport {
    Handled { event_id: Uuid },
    Failed { event_id: Uuid, error: RunLoopError },
}

fn shard_for(unit_id: Uuid, shard_count: usize) -> usize {
    (unit_id.as_u128() % shard_count as u128) as usize
}

/// Load, step and persist the unit an event is addressed to.
async fn handle_event(
    backend: &dyn CoreBackend,
    programs: &ProgramCache,
    units: &mut HashMap<Uuid, UnitRecord>,
    lease_id: Uuid,
    event: &UnitEvent,
) -> Result<(), RunLoopError> {
    let acknowledged = |commit: UnitCommit| UnitCommit {
        acked_event_ids: vec![event.event_id],
        lease_id: Some(lease_id),
        ..commit
    };

    let cached = units.get(&event.unit_id).cloned();
    let unit = match cached {
        Some(unit) => Some(unit),
        None => backend.get_units(&[event.unit_id]).await?.into_iter().next(),
    };
    let Some(mut unit) = unit else {
        warn!(
            unit_id = %event.unit_id,
            kind = event.kind.label(),
            "event for unknown unit; dropping"
        );
        backend.commit(&acknowledged(UnitCommit::default())).await?;
        return Ok(());
    };

    let tree = programs.load(backend, unit.program_id).await?;
    let previous_status = unit.status;
    let now = Utc::now();
    let commit = match advance(&tree, &mut unit, &event.kind, now) {
        Ok(step) => {
            debug!(
                unit_id = %unit.unit_id,
                node_id = %unit.node_id,
                kind = event.kind.label(),
                spawned = step.spawns.len(),
                signals = step.signals.len(),
                "unit stepped"
            );
            step.into_commit(&unit, now)
        }
        Err(err) => {
            // Redelivery would hit the same inconsistency.
            error!(error = %err, event_id = %event.event_id, "unit rejected event; dropping");
            units.remove(&unit.unit_id);
            backend.commit(&acknowledged(UnitCommit::default())).await?;
            return Ok(());
        }
    };

    backend.commit(&acknowledged(commit)).await?;

    if unit.is_root() && previous_status != unit.status {
        match unit.status {
            UnitStatus::Completed => info!(
                root_unit_id = %unit.unit_id,
                program_id = %unit.program_id,
                "program completed"
            ),
            UnitStatus::Cancelled => info!(root_unit_id = %unit.unit_id, "program cancelled"),
            _ => {}
        }
    }
    if unit.status.is_terminal() && !unit.is_root() {
        units.remove(&unit.unit_id);
    } else {
        units.insert(unit.unit_id, unit);
    }
    Ok(())
}

/// Executor shard: handles its events strictly in arrival order.
async fn run_executor_shard(
    shard_id: usize,
    backend: Arc<dyn CoreBackend>,
    programs: ProgramCache,
    lease_id: Uuid,
    mut commands: mpsc::UnboundedReceiver<ShardCommand>,
    reports: mpsc::UnboundedSender<ShardReport>,
) {
    // Only this shard writes the units routed to it, so its copies stay
    // current as long as every write goes through a successful commit.
    let mut units: HashMap<Uuid, UnitRecord> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            ShardCommand::Events(events) => {
                for event in events {
                    let event_id = event.event_id;
                    let report =
                        match handle_event(backend.as_ref(), &programs, &mut units, lease_id, &event)
                            .await
                        {
                            Ok(()) => ShardReport::Handled { event_id },
                            Err(error) => {
                                units.remove(&event.unit_id);
                                ShardReport::Failed { event_id, error }
                            }
                        };
                    if reports.send(report).is_err() {
                        warn!(shard_id, "runloop dropped shard reports");
                        return;
                    }
                }
            }
            ShardCommand::Shutdown => break,
        }
    }
    debug!(shard_id, "executor shard exiting");
}

/// Run loop that fans unit events out across executor shards.
pub struct RunLoop {
    backend: Arc<dyn CoreBackend>,
    programs: ProgramCache,
    shard_count: usize,
    event_batch_size: usize,
    poll_interval: Duration,
    lease_id: Uuid,
    lease_ttl: chrono::Duration,
    shutdown: CancellationToken,
}

impl RunLoop {
    pub fn new(
        backend: impl CoreBackend + 'static,
        config: RunLoopSupervisorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend: Arc::new(backend),
            programs: ProgramCache::default(),
            shard_count: std::cmp::max(1, config.executor_shards),
            event_batch_size: std::cmp::max(1, config.event_batch_size),
            poll_interval: config.poll_interval,
            lease_id: config.lease_id,
            lease_ttl: chrono::Duration::from_std(config.lease_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            shutdown,
        }
    }

    /// Process events until shutdown is requested or the backend fails.
    pub async fn run(&mut self) -> Result<(), RunLoopError> {
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<ShardReport>();
        let mut shard_senders = Vec::with_capacity(self.shard_count);
        let mut shard_handles = Vec::with_capacity(self.shard_count);
        for shard_id in 0..self.shard_count {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            shard_handles.push(tokio::spawn(run_executor_shard(
                shard_id,
                Arc::clone(&self.backend),
                self.programs.clone(),
                self.lease_id,
                command_rx,
                report_tx.clone(),
            )));
            shard_senders.push(command_tx);
        }
        drop(report_tx);

        let mut inflight: HashSet<Uuid> = HashSet::new();
        let result = loop {
            if self.shutdown.is_cancelled() {
                info!("runloop exiting: shutdown requested");
                break Ok(());
            }

            let capacity = self.event_batch_size.saturating_sub(inflight.len());
            let mut claimed = 0;
            if capacity > 0 {
                let claim = LeaseClaim::new(self.lease_id, self.lease_ttl);
                let events = match self.backend.claim_events(capacity, claim).await {
                    Ok(events) => events,
                    Err(err) => break Err(err.into()),
                };
                claimed = events.len();
                if claimed > 0 {
                    debug!(count = claimed, "claimed unit events");
                }
                if let Err(err) = self.dispatch(events, &shard_senders, &mut inflight) {
                    break Err(err);
                }
            }

            if inflight.is_empty() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                continue;
            }
            if claimed > 0 && inflight.len() < self.event_batch_size {
                continue;
            }

            let report = tokio::select! {
                _ = self.shutdown.cancelled() => continue,
                report = report_rx.recv() => report,
            };
            let Some(report) = report else {
                break Err(RunLoopError::Message("executor shards stopped".to_string()));
            };
            let mut failed = Vec::new();
            self.record_report(report, &mut inflight, &mut failed);
            while let Ok(report) = report_rx.try_recv() {
                self.record_report(report, &mut inflight, &mut failed);
            }
            self.release(&failed).await;
        };

        for sender in &shard_senders {
            let _ = sender.send(ShardCommand::Shutdown);
        }
        futures::future::join_all(shard_handles).await;

        let mut failed = Vec::new();
        while let Some(report) = report_rx.recv().await {
            self.record_report(report, &mut inflight, &mut failed);
        }
        failed.extend(inflight.drain());
        self.release(&failed).await;
        result
    }

    fn dispatch(
        &self,
        events: Vec<UnitEvent>,
        shard_senders: &[mpsc::UnboundedSender<ShardCommand>],
        inflight: &mut HashSet<Uuid>,
    ) -> Result<(), RunLoopError> {
        let mut batches: Vec<Vec<UnitEvent>> = vec![Vec::new(); shard_senders.len()];
        for event in events {
            inflight.insert(event.event_id);
            batches[shard_for(event.unit_id, shard_senders.len())].push(event);
        }
        for (shard_id, batch) in batches.into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            shard_senders[shard_id]
                .send(ShardCommand::Events(batch))
                .map_err(|_| RunLoopError::Message(format!("executor shard {shard_id} stopped")))?;
        }
        Ok(())
    }

    fn record_report(
        &self,
        report: ShardReport,
        inflight: &mut HashSet<Uuid>,
        failed: &mut Vec<Uuid>,
    ) {
        match report {
            ShardReport::Handled { event_id } => {
                inflight.remove(&event_id);
            }
            ShardReport::Failed { event_id, error } => {
                inflight.remove(&event_id);
                warn!(error = %error, %event_id, "event handling failed; releasing for redelivery");
                failed.push(event_id);
            }
        }
    }

    async fn release(&self, event_ids: &[Uuid]) {
        if event_ids.is_empty() {
            return;
        }
        if let Err(err) = self.backend.release_events(self.lease_id, event_ids).await {
            // The lease expiry redelivers them anyway.
            warn!(error = %err, count = event_ids.len(), "failed to release event leases");
        }
    }
}

/// Supervise a run loop, restarting on errors until shutdown.
pub async fn runloop_supervisor<B>(
    backend: B,
    config: RunLoopSupervisorConfig,
    shutdown: CancellationToken,
) where
    B: CoreBackend + Clone + 'static,
{
    let mut backoff = Duration::from_millis(200);
    let max_backoff = Duration::from_secs(5);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        info!(
            executor_shards = config.executor_shards,
            event_batch_size = config.event_batch_size,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            lease_id = %config.lease_id,
            "runloop starting"
        );
        let mut runloop = RunLoop::new(backend.clone(), config.clone(), shutdown.clone());
        let result = runloop.run().await;

        if shutdown.is_cancelled() {
            break;
        }

        match result {
            Ok(()) => {
                warn!("runloop exited cleanly (unexpected); restarting");
                backoff = Duration::from_millis(200);
                tokio::time::sleep(config.poll_interval.max(Duration::from_millis(100))).await;
            }
            Err(err) => {
                error!(error = %err, "runloop exited with error; restarting");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = std::cmp::min(backoff * 2, max_backoff);
            }
        }
    }
}
