use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use nodeflow_core_backend::{
    BackendError, BackendResult, CoreBackend, LeaseClaim, ProgramRegistration, ProgramVersion,
    UnitCommit,
};
use nodeflow_runner_state::{UnitEvent, UnitRecord};

#[async_trait::async_trait]
impl CoreBackend for crate::MemoryBackend {
    fn clone_box(&self) -> Box<dyn CoreBackend> {
        Box::new(self.clone())
    }

    async fn register_program(&self, registration: &ProgramRegistration) -> BackendResult<Uuid> {
        let mut guard = self.state.lock().expect("memory state poisoned");
        let id = Uuid::new_v4();
        guard.programs.insert(
            id,
            ProgramVersion {
                id,
                name: registration.name.clone(),
                program: registration.program.clone(),
                created_at: Utc::now(),
            },
        );
        self.persist(&guard)?;
        Ok(id)
    }

    async fn get_programs(&self, ids: &[Uuid]) -> BackendResult<Vec<ProgramVersion>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.state.lock().expect("memory state poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| guard.programs.get(id).cloned())
            .collect())
    }

    async fn get_units(&self, unit_ids: &[Uuid]) -> BackendResult<Vec<UnitRecord>> {
        if unit_ids.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.state.lock().expect("memory state poisoned");
        Ok(unit_ids
            .iter()
            .filter_map(|id| guard.units.get(id).cloned())
            .collect())
    }

    async fn list_root_units(&self, limit: usize) -> BackendResult<Vec<UnitRecord>> {
        let guard = self.state.lock().expect("memory state poisoned");
        let mut roots: Vec<UnitRecord> = guard
            .units
            .values()
            .filter(|unit| unit.is_root())
            .cloned()
            .collect();
        roots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        roots.truncate(limit);
        Ok(roots)
    }

    async fn claim_events(&self, size: usize, claim: LeaseClaim) -> BackendResult<Vec<UnitEvent>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut guard = self.state.lock().expect("memory state poisoned");
        let state = &mut *guard;
        let now = Utc::now();
        state.leases.retain(|_, (_, expires_at)| *expires_at > now);

        // A unit has at most one event in flight, so its events are handled
        // in queue order even across polls.
        let mut busy: HashSet<Uuid> = state
            .events
            .iter()
            .filter(|event| state.leases.contains_key(&event.event_id))
            .map(|event| event.unit_id)
            .collect();

        let mut claimed = Vec::new();
        for event in &state.events {
            if claimed.len() >= size {
                break;
            }
            if !busy.insert(event.unit_id) {
                continue;
            }
            claimed.push(event.clone());
        }
        for event in &claimed {
            state
                .leases
                .insert(event.event_id, (claim.lease_id, claim.lease_expires_at));
        }
        Ok(claimed)
    }

    async fn release_events(&self, lease_id: Uuid, event_ids: &[Uuid]) -> BackendResult<()> {
        let mut guard = self.state.lock().expect("memory state poisoned");
        for event_id in event_ids {
            if let Some((current, _)) = guard.leases.get(event_id)
                && *current == lease_id
            {
                guard.leases.remove(event_id);
            }
        }
        Ok(())
    }

    async fn queue_events(&self, events: &[UnitEvent]) -> BackendResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut guard = self.state.lock().expect("memory state poisoned");
        guard.events.extend(events.iter().cloned());
        self.persist(&guard)?;
        Ok(())
    }

    async fn commit(&self, commit: &UnitCommit) -> BackendResult<()> {
        if commit.is_empty() {
            return Ok(());
        }
        let mut guard = self.state.lock().expect("memory state poisoned");

        if let Some(lease_id) = commit.lease_id {
            let now = Utc::now();
            for event_id in &commit.acked_event_ids {
                let held = guard
                    .leases
                    .get(event_id)
                    .is_some_and(|(current, expires_at)| *current == lease_id && *expires_at > now);
                if !held {
                    return Err(BackendError::Message(format!(
                        "event {event_id} is no longer leased by {lease_id}"
                    )));
                }
            }
        }

        for unit in &commit.units {
            if is_collectable(unit) {
                guard.units.remove(&unit.unit_id);
            } else {
                guard.units.insert(unit.unit_id, unit.clone());
            }
        }
        guard.events.extend(commit.events.iter().cloned());
        if !commit.acked_event_ids.is_empty() {
            let acked: HashSet<&Uuid> = commit.acked_event_ids.iter().collect();
            guard.events.retain(|event| !acked.contains(&event.event_id));
            for event_id in &commit.acked_event_ids {
                guard.leases.remove(event_id);
            }
        }
        self.persist(&guard)?;
        Ok(())
    }
}

/// Finished child units are not kept: the commit that finishes one also
/// carries its result to the parent. Roots stay for result and ledger queries.
pub(crate) fn is_collectable(unit: &UnitRecord) -> bool {
    unit.status.is_terminal() && !unit.is_root()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use nodeflow_program::{NodeId, NodeKind, ProgramNode};
    use nodeflow_runner_state::{ProgramState, UnitEventKind, UnitFrame, UnitStatus};

    use super::*;
    use crate::MemoryBackend;

    fn lease() -> LeaseClaim {
        LeaseClaim::new(Uuid::new_v4(), Duration::seconds(30))
    }

    fn root_unit() -> UnitRecord {
        UnitRecord::root(
            Uuid::new_v4(),
            Uuid::new_v4(),
            NodeId::from("root"),
            ProgramState::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn one_event_per_unit_in_flight() {
        let backend = MemoryBackend::new();
        let unit_a = Uuid::new_v4();
        let unit_b = Uuid::new_v4();
        let first = UnitEvent::new(unit_a, UnitEventKind::Start);
        let second = UnitEvent::new(unit_a, UnitEventKind::Cancel);
        let other = UnitEvent::new(unit_b, UnitEventKind::Start);
        backend
            .queue_events(&[first.clone(), second.clone(), other.clone()])
            .await
            .expect("queue");

        let claim = lease();
        let batch = backend.claim_events(10, claim.clone()).await.expect("claim");
        let ids: Vec<Uuid> = batch.iter().map(|event| event.event_id).collect();
        assert_eq!(ids, vec![first.event_id, other.event_id]);

        // Nothing else is visible until the first event is acknowledged.
        assert!(backend.claim_events(10, lease()).await.expect("claim").is_empty());

        backend
            .commit(&UnitCommit {
                acked_event_ids: vec![first.event_id],
                lease_id: Some(claim.lease_id),
                ..UnitCommit::default()
            })
            .await
            .expect("commit");
        let batch = backend.claim_events(10, lease()).await.expect("claim");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event_id, second.event_id);
    }

    #[tokio::test]
    async fn released_and_expired_events_are_redelivered() {
        let backend = MemoryBackend::new();
        let event = UnitEvent::new(Uuid::new_v4(), UnitEventKind::Start);
        backend.queue_events(&[event.clone()]).await.expect("queue");

        let claim = lease();
        assert_eq!(backend.claim_events(1, claim.clone()).await.expect("claim").len(), 1);
        backend
            .release_events(claim.lease_id, &[event.event_id])
            .await
            .expect("release");
        assert_eq!(backend.claim_events(1, lease()).await.expect("claim").len(), 1);

        let expired = LeaseClaim {
            lease_id: Uuid::new_v4(),
            lease_expires_at: Utc::now() - Duration::seconds(1),
        };
        let backend = MemoryBackend::new();
        backend.queue_events(&[event.clone()]).await.expect("queue");
        assert_eq!(backend.claim_events(1, expired).await.expect("claim").len(), 1);
        assert_eq!(backend.claim_events(1, lease()).await.expect("claim").len(), 1);
    }

    #[tokio::test]
    async fn commit_with_lost_lease_changes_nothing() {
        let backend = MemoryBackend::new();
        let event = UnitEvent::new(Uuid::new_v4(), UnitEventKind::Start);
        backend.queue_events(&[event.clone()]).await.expect("queue");
        backend.claim_events(1, lease()).await.expect("claim");

        let unit = root_unit();
        let result = backend
            .commit(&UnitCommit {
                units: vec![unit.clone()],
                acked_event_ids: vec![event.event_id],
                lease_id: Some(Uuid::new_v4()),
                ..UnitCommit::default()
            })
            .await;
        assert!(matches!(result, Err(BackendError::Message(_))));
        assert!(backend.get_units(&[unit.unit_id]).await.expect("units").is_empty());
        assert_eq!(backend.pending_events().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let backend = MemoryBackend::with_snapshot(&path).expect("open");
        let program_id = backend
            .register_program(&ProgramRegistration {
                name: "demo".to_string(),
                program: ProgramNode::new("root", NodeKind::Root),
            })
            .await
            .expect("register");
        let unit = root_unit();
        let event = UnitEvent::new(unit.unit_id, UnitEventKind::Start);
        backend
            .commit(&UnitCommit {
                units: vec![unit.clone()],
                events: vec![event.clone()],
                ..UnitCommit::default()
            })
            .await
            .expect("commit");
        backend.claim_events(1, lease()).await.expect("claim");

        let reopened = MemoryBackend::with_snapshot(&path).expect("reopen");
        let programs = reopened.get_programs(&[program_id]).await.expect("programs");
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].name, "demo");
        assert_eq!(
            reopened.get_units(&[unit.unit_id]).await.expect("units"),
            vec![unit]
        );
        // Leases are not persisted, so the event is claimable again.
        let batch = reopened.claim_events(1, lease()).await.expect("claim");
        assert_eq!(batch, vec![event]);
    }

    #[tokio::test]
    async fn finished_child_units_are_dropped() {
        let backend = MemoryBackend::new();
        let root = root_unit();
        let mut child = UnitRecord::child(
            &root,
            Uuid::new_v4(),
            NodeId::from("child"),
            ProgramState::default(),
            Utc::now(),
        );
        backend
            .commit(&UnitCommit {
                units: vec![root.clone(), child.clone()],
                ..UnitCommit::default()
            })
            .await
            .expect("commit");
        assert_eq!(backend.units().len(), 2);

        child.status = UnitStatus::Completed;
        child.frame = UnitFrame::Completed {
            state: ProgramState::default(),
        };
        let mut finished_root = root.clone();
        finished_root.status = UnitStatus::Completed;
        finished_root.frame = UnitFrame::Completed {
            state: ProgramState::default(),
        };
        backend
            .commit(&UnitCommit {
                units: vec![child.clone(), finished_root.clone()],
                ..UnitCommit::default()
            })
            .await
            .expect("commit");

        assert!(backend.get_units(&[child.unit_id]).await.expect("units").is_empty());
        assert_eq!(
            backend.get_units(&[root.unit_id]).await.expect("units"),
            vec![finished_root]
        );
    }

    #[tokio::test]
    async fn lists_roots_newest_first() {
        let backend = MemoryBackend::new();
        let older = root_unit();
        let mut newer = root_unit();
        newer.created_at = older.created_at + Duration::seconds(5);
        let child = UnitRecord::child(
            &older,
            Uuid::new_v4(),
            NodeId::from("child"),
            ProgramState::default(),
            Utc::now(),
        );
        backend
            .commit(&UnitCommit {
                units: vec![older.clone(), newer.clone(), child],
                ..UnitCommit::default()
            })
            .await
            .expect("commit");

        let roots = backend.list_root_units(10).await.expect("roots");
        let ids: Vec<Uuid> = roots.iter().map(|unit| unit.unit_id).collect();
        assert_eq!(ids, vec![newer.unit_id, older.unit_id]);
        assert_eq!(backend.list_root_units(1).await.expect("roots").len(), 1);
    }
}
