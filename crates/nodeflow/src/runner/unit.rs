//! Event-driven state machine for a single unit.
//!
//! [`advance`] applies one event to a unit record and describes the effects
//! (spawned children, outgoing signals, completion) as a [`UnitStep`]. The
//! step is pure: identifiers for children and messages are chosen here and
//! stored in the frame, so the caller can persist the record and its effects
//! in one commit and a redelivered event that was never committed starts
//! from the same persisted frame.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use nodeflow_core_backend::UnitCommit;
use nodeflow_program::{NodeId, NodeKind, NodeRecord, ProgramTree, Value};
use nodeflow_runner_state::{
    InputResponse, MessagePayload, MessageSignal, ProgramState, Signal, UnitEvent, UnitEventKind,
    UnitFrame, UnitRecord, UnitStatus,
};

use super::evaluator::{Action, act};

/// Raised when a persisted unit does not agree with its program.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("node {node_id} of unit {unit_id} is missing from its program")]
    MissingNode { unit_id: Uuid, node_id: NodeId },
    #[error("unit {unit_id} is in frame {frame} which node {node_id} cannot be in")]
    FrameMismatch {
        unit_id: Uuid,
        node_id: NodeId,
        frame: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpawnRequest {
    pub child_unit_id: Uuid,
    pub node_id: NodeId,
    pub state: ProgramState,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingSignal {
    pub target_unit_id: Uuid,
    pub signal: Signal,
}

/// Effects of applying one event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitStep {
    pub spawns: Vec<SpawnRequest>,
    pub signals: Vec<OutgoingSignal>,
    /// Final state, reported to the parent.
    pub completed: Option<ProgramState>,
    pub cancelled_children: Vec<Uuid>,
    /// Whether the unit record itself was modified.
    pub changed: bool,
}

impl UnitStep {
    /// Records and follow-up events to persist for this step. `unit` is the
    /// record after [`advance`] ran.
    pub fn into_commit(self, unit: &UnitRecord, now: DateTime<Utc>) -> UnitCommit {
        let mut commit = UnitCommit::default();
        if self.changed {
            commit.units.push(unit.clone());
        }
        for spawn in self.spawns {
            commit.units.push(UnitRecord::child(
                unit,
                spawn.child_unit_id,
                spawn.node_id,
                spawn.state,
                now,
            ));
            commit
                .events
                .push(UnitEvent::new(spawn.child_unit_id, UnitEventKind::Start));
        }
        for outgoing in self.signals {
            commit.events.push(UnitEvent::new(
                outgoing.target_unit_id,
                UnitEventKind::Signal {
                    signal: outgoing.signal,
                },
            ));
        }
        if let (Some(state), Some(parent)) = (self.completed, unit.parent_unit_id) {
            commit.events.push(UnitEvent::new(
                parent,
                UnitEventKind::ChildCompleted {
                    child_unit_id: unit.unit_id,
                    state,
                },
            ));
        }
        for child in self.cancelled_children {
            commit.events.push(UnitEvent::new(child, UnitEventKind::Cancel));
        }
        commit
    }
}

fn frame_name(frame: &UnitFrame) -> &'static str {
    match frame {
        UnitFrame::Pending { .. } => "pending",
        UnitFrame::Condition { .. } => "condition",
        UnitFrame::Children { .. } => "children",
        UnitFrame::AwaitingResponse { .. } => "awaiting_response",
        UnitFrame::Completed { .. } => "completed",
        UnitFrame::Cancelled => "cancelled",
    }
}

/// Apply `event` to `unit`.
///
/// Events that no longer match the unit's frame (a duplicate start, a
/// completion from a child the unit stopped waiting on, a response to an
/// input that is not suspended) leave the unit untouched.
pub fn advance(
    tree: &ProgramTree,
    unit: &mut UnitRecord,
    event: &UnitEventKind,
    now: DateTime<Utc>,
) -> Result<UnitStep, UnitError> {
    let mut step = UnitStep::default();
    let mut driver = Driver {
        tree,
        unit: &mut *unit,
        step: &mut step,
        now,
    };

    match event {
        // The ledger keeps accepting messages after the root finished, so a
        // late retraction still lands.
        UnitEventKind::Signal {
            signal: Signal::SendMessage(message),
        } => driver.record_message(message),
        UnitEventKind::Signal {
            signal: Signal::ReceiveData(payload),
        } => driver.receive_data(payload)?,
        _ if driver.unit.status.is_terminal() => {
            debug!(
                unit_id = %driver.unit.unit_id,
                status = %driver.unit.status,
                event = event.label(),
                "ignoring event for finished unit"
            );
        }
        UnitEventKind::Start => driver.start()?,
        UnitEventKind::ChildCompleted {
            child_unit_id,
            state,
        } => driver.child_completed(*child_unit_id, state)?,
        UnitEventKind::Cancel => driver.cancel(),
    }

    if step.changed {
        unit.updated_at = now;
    }
    Ok(step)
}

struct Driver<'a> {
    tree: &'a ProgramTree,
    unit: &'a mut UnitRecord,
    step: &'a mut UnitStep,
    now: DateTime<Utc>,
}

impl<'a> Driver<'a> {
    fn node(&self) -> Result<&'a NodeRecord, UnitError> {
        self.tree
            .get(self.unit.node_id.as_str())
            .ok_or_else(|| UnitError::MissingNode {
                unit_id: self.unit.unit_id,
                node_id: self.unit.node_id.clone(),
            })
    }

    fn mismatch(&self) -> UnitError {
        UnitError::FrameMismatch {
            unit_id: self.unit.unit_id,
            node_id: self.unit.node_id.clone(),
            frame: frame_name(&self.unit.frame),
        }
    }

    fn start(&mut self) -> Result<(), UnitError> {
        let UnitFrame::Pending { state } = &self.unit.frame else {
            debug!(unit_id = %self.unit.unit_id, "ignoring duplicate start");
            return Ok(());
        };
        let state = state.clone();
        self.unit.status = UnitStatus::Running;
        self.step.changed = true;

        let Some(node) = self.tree.get(self.unit.node_id.as_str()) else {
            warn!(
                unit_id = %self.unit.unit_id,
                node_id = %self.unit.node_id,
                "node missing from program; completing with 0"
            );
            self.complete(state.with_value(Value::default()));
            return Ok(());
        };
        if node.kind.has_condition_slot() {
            self.start_condition(node, state);
            Ok(())
        } else {
            self.start_children(state)
        }
    }

    fn start_condition(&mut self, node: &NodeRecord, state: ProgramState) {
        match &node.condition {
            Some(condition) => {
                let child_unit_id = Uuid::new_v4();
                self.unit.frame = UnitFrame::Condition { child_unit_id };
                self.step.spawns.push(SpawnRequest {
                    child_unit_id,
                    node_id: condition.clone(),
                    state,
                });
                self.step.changed = true;
            }
            None => self.complete(state.with_value(Value::default())),
        }
    }

    fn start_children(&mut self, state: ProgramState) -> Result<(), UnitError> {
        self.unit.frame = UnitFrame::Children {
            next_child: 0,
            values: Vec::new(),
            state,
            awaiting: None,
        };
        self.step.changed = true;
        self.run_children()
    }

    fn child_completed(&mut self, child_id: Uuid, result: &ProgramState) -> Result<(), UnitError> {
        if self.unit.frame.awaited_child() != Some(child_id) {
            debug!(
                unit_id = %self.unit.unit_id,
                child_unit_id = %child_id,
                "ignoring completion from a child this unit is not awaiting"
            );
            return Ok(());
        }

        match &mut self.unit.frame {
            UnitFrame::Condition { .. } => {
                let node = self.node()?;
                if !node.kind.has_condition_slot() {
                    return Err(self.mismatch());
                }
                if result.current_value.is_truthy() {
                    self.start_children(result.clone())
                } else {
                    self.complete(result.clone());
                    Ok(())
                }
            }
            UnitFrame::Children {
                values,
                state,
                awaiting,
                ..
            } => {
                values.push(result.current_value.clone());
                *state = result.clone();
                *awaiting = None;
                self.step.changed = true;
                self.run_children()
            }
            _ => Err(self.mismatch()),
        }
    }

    /// Spawn the next present child, or act once all children reported.
    fn run_children(&mut self) -> Result<(), UnitError> {
        let node = self.node()?;
        let UnitFrame::Children {
            next_child,
            state,
            awaiting,
            ..
        } = &mut self.unit.frame
        else {
            return Err(self.mismatch());
        };

        // Empty child slots are skipped and contribute no value.
        while let Some(slot) = node.children.get(*next_child) {
            *next_child += 1;
            if let Some(child) = slot {
                let child_unit_id = Uuid::new_v4();
                *awaiting = Some(child_unit_id);
                self.step.spawns.push(SpawnRequest {
                    child_unit_id,
                    node_id: child.clone(),
                    state: state.clone(),
                });
                return Ok(());
            }
        }
        self.finish_children(node)
    }

    fn finish_children(&mut self, node: &NodeRecord) -> Result<(), UnitError> {
        let (values, state) = match &self.unit.frame {
            UnitFrame::Children { values, state, .. } => (values.clone(), state.clone()),
            _ => return Err(self.mismatch()),
        };

        if matches!(node.kind, NodeKind::While) {
            self.start_condition(node, state.with_value(Value::default()));
            return Ok(());
        }

        match act(node, values, state) {
            Action::Complete(state) => self.complete(state),
            Action::Print { text, state } => {
                self.send_message(Uuid::new_v4(), MessagePayload::Print { text });
                self.complete(state);
            }
            Action::Prompt {
                prompt,
                expected_kind,
                state,
            } => {
                let message_id = Uuid::new_v4();
                self.send_message(
                    message_id,
                    MessagePayload::Input {
                        show: true,
                        expected_kind,
                        prompt: prompt.clone(),
                    },
                );
                self.unit.frame = UnitFrame::AwaitingResponse {
                    message_id,
                    prompt,
                    state,
                };
                self.unit.status = UnitStatus::Suspended;
                self.step.changed = true;
            }
        }
        Ok(())
    }

    fn receive_data(&mut self, payload: &serde_json::Value) -> Result<(), UnitError> {
        let UnitFrame::AwaitingResponse {
            message_id,
            prompt,
            state,
        } = &self.unit.frame
        else {
            warn!(
                unit_id = %self.unit.unit_id,
                status = %self.unit.status,
                "ignoring data for a unit that is not awaiting input"
            );
            return Ok(());
        };
        let Some(response) = InputResponse::from_payload(payload) else {
            warn!(unit_id = %self.unit.unit_id, "ignoring malformed input response");
            return Ok(());
        };
        let NodeKind::Input { value_kind } = &self.node()?.kind else {
            return Err(self.mismatch());
        };

        let expected_kind = *value_kind;
        let message_id = *message_id;
        let prompt = prompt.clone();
        let state = state.clone();
        self.send_message(
            message_id,
            MessagePayload::Input {
                show: false,
                expected_kind,
                prompt,
            },
        );
        let value = expected_kind.coerce(&Value::Text(response.response));
        self.complete(state.with_value(value));
        Ok(())
    }

    fn record_message(&mut self, message: &MessageSignal) {
        let Some(ledger) = self.unit.ledger.as_mut() else {
            warn!(
                unit_id = %self.unit.unit_id,
                message_id = %message.message_id,
                "message sent to a unit without a ledger"
            );
            return;
        };
        if ledger.upsert(message) {
            self.step.changed = true;
        }
    }

    fn cancel(&mut self) {
        if let Some(child) = self.unit.frame.awaited_child() {
            self.step.cancelled_children.push(child);
        }
        // Withdraw an open prompt so viewers stop offering it.
        if let UnitFrame::AwaitingResponse {
            message_id, prompt, ..
        } = &self.unit.frame
        {
            let expected_kind = match self.tree.get(self.unit.node_id.as_str()).map(|n| &n.kind) {
                Some(NodeKind::Input { value_kind }) => *value_kind,
                _ => Default::default(),
            };
            let (message_id, prompt) = (*message_id, prompt.clone());
            self.send_message(
                message_id,
                MessagePayload::Input {
                    show: false,
                    expected_kind,
                    prompt,
                },
            );
        }
        self.unit.frame = UnitFrame::Cancelled;
        self.unit.status = UnitStatus::Cancelled;
        self.step.changed = true;
    }

    fn send_message(&mut self, message_id: Uuid, payload: MessagePayload) {
        self.step.signals.push(OutgoingSignal {
            target_unit_id: self.unit.root_unit_id,
            signal: Signal::SendMessage(MessageSignal {
                message_id,
                sending_unit_id: self.unit.unit_id,
                last_modified_time: self.now,
                payload,
            }),
        });
    }

    fn complete(&mut self, state: ProgramState) {
        self.unit.frame = UnitFrame::Completed {
            state: state.clone(),
        };
        self.unit.status = UnitStatus::Completed;
        self.step.completed = Some(state);
        self.step.changed = true;
    }
}
