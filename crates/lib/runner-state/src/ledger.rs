//! The root unit's message ledger.
//!
//! Messages are keyed by id and upserted, so redelivering a message never
//! duplicates or reorders it. Readers get entries ordered by the time the
//! message was first seen.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::{MessagePayload, MessageSignal};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub message_id: Uuid,
    pub sending_unit_id: Uuid,
    pub last_modified_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    pub payload: MessagePayload,
}

/// Entries kept in first-insertion order, with a position index by message
/// id. Only the entries are persisted; the index is rebuilt on load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredLedger", into = "StoredLedger")]
pub struct MessageLedger {
    entries: Vec<LedgerEntry>,
    positions: HashMap<Uuid, usize>,
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredLedger {
    entries: Vec<LedgerEntry>,
}

impl From<StoredLedger> for MessageLedger {
    fn from(stored: StoredLedger) -> Self {
        let mut ledger = MessageLedger::new();
        for entry in stored.entries {
            match ledger.positions.get(&entry.message_id) {
                Some(&position) => ledger.entries[position] = entry,
                None => {
                    ledger.positions.insert(entry.message_id, ledger.entries.len());
                    ledger.entries.push(entry);
                }
            }
        }
        ledger
    }
}

impl From<MessageLedger> for StoredLedger {
    fn from(ledger: MessageLedger) -> Self {
        Self {
            entries: ledger.entries,
        }
    }
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a message. `created_time` is fixed by the first
    /// insertion. Returns `true` when the message was new.
    pub fn upsert(&mut self, message: &MessageSignal) -> bool {
        if let Some(&position) = self.positions.get(&message.message_id) {
            let entry = &mut self.entries[position];
            entry.sending_unit_id = message.sending_unit_id;
            entry.last_modified_time = message.last_modified_time;
            entry.payload = message.payload.clone();
            return false;
        }

        self.positions.insert(message.message_id, self.entries.len());
        self.entries.push(LedgerEntry {
            message_id: message.message_id,
            sending_unit_id: message.sending_unit_id,
            last_modified_time: message.last_modified_time,
            created_time: message.last_modified_time,
            payload: message.payload.clone(),
        });
        true
    }

    /// All entries ascending by `created_time`; ties keep insertion order.
    pub fn messages(&self) -> Vec<LedgerEntry> {
        let mut ordered = self.entries.clone();
        ordered.sort_by_key(|entry| entry.created_time);
        ordered
    }

    pub fn get(&self, message_id: Uuid) -> Option<&LedgerEntry> {
        self.positions
            .get(&message_id)
            .map(|&position| &self.entries[position])
    }

    /// Inputs still waiting for a response, oldest first.
    pub fn open_inputs(&self) -> Vec<LedgerEntry> {
        self.messages()
            .into_iter()
            .filter(|entry| matches!(entry.payload, MessagePayload::Input { show: true, .. }))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nodeflow_program::ValueKind;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn print(id: Uuid, time: DateTime<Utc>, text: &str) -> MessageSignal {
        MessageSignal {
            message_id: id,
            sending_unit_id: Uuid::nil(),
            last_modified_time: time,
            payload: MessagePayload::Print {
                text: text.to_string(),
            },
        }
    }

    #[test]
    fn upsert_keeps_first_created_time() {
        let id = Uuid::new_v4();
        let mut ledger = MessageLedger::new();
        assert!(ledger.upsert(&print(id, at(5), "first")));
        assert!(!ledger.upsert(&print(id, at(9), "second")));

        let entry = ledger.get(id).expect("entry");
        assert_eq!(entry.created_time, at(5));
        assert_eq!(entry.last_modified_time, at(9));
        assert_eq!(
            entry.payload,
            MessagePayload::Print {
                text: "second".to_string()
            }
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn redelivery_does_not_reorder() {
        let early = Uuid::new_v4();
        let late = Uuid::new_v4();
        let mut ledger = MessageLedger::new();
        ledger.upsert(&print(late, at(10), "late"));
        ledger.upsert(&print(early, at(1), "early"));
        ledger.upsert(&print(early, at(20), "early again"));

        let ids: Vec<Uuid> = ledger.messages().iter().map(|entry| entry.message_id).collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut ledger = MessageLedger::new();
        ledger.upsert(&print(first, at(3), "a"));
        ledger.upsert(&print(second, at(3), "b"));

        let ids: Vec<Uuid> = ledger.messages().iter().map(|entry| entry.message_id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn many_messages_upsert_in_place() {
        let ids: Vec<Uuid> = (0..2_000).map(|_| Uuid::new_v4()).collect();
        let mut ledger = MessageLedger::new();
        for (offset, id) in ids.iter().enumerate() {
            assert!(ledger.upsert(&print(*id, at(offset as i64), "shown")));
        }
        for id in ids.iter().rev() {
            assert!(!ledger.upsert(&print(*id, at(5_000), "updated")));
        }

        assert_eq!(ledger.len(), ids.len());
        let ordered: Vec<Uuid> = ledger.messages().iter().map(|entry| entry.message_id).collect();
        assert_eq!(ordered, ids);
        let last = ledger.get(ids[1_999]).expect("entry");
        assert_eq!(last.created_time, at(1_999));
        assert_eq!(last.last_modified_time, at(5_000));
    }

    #[test]
    fn reloaded_ledger_keeps_upserting_by_id() {
        let id = Uuid::new_v4();
        let mut ledger = MessageLedger::new();
        ledger.upsert(&print(id, at(1), "before"));

        let json = serde_json::to_value(&ledger).expect("serialize");
        assert_eq!(json["entries"].as_array().map(Vec::len), Some(1));
        let mut reloaded: MessageLedger = serde_json::from_value(json).expect("deserialize");
        assert_eq!(reloaded, ledger);

        assert!(!reloaded.upsert(&print(id, at(2), "after")));
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(id).map(|entry| entry.created_time), Some(at(1)));
    }

    #[test]
    fn retracted_inputs_are_not_open() {
        let id = Uuid::new_v4();
        let input = |show: bool, time| MessageSignal {
            message_id: id,
            sending_unit_id: Uuid::nil(),
            last_modified_time: time,
            payload: MessagePayload::Input {
                show,
                expected_kind: ValueKind::Number,
                prompt: String::new(),
            },
        };

        let mut ledger = MessageLedger::new();
        ledger.upsert(&input(true, at(0)));
        assert_eq!(ledger.open_inputs().len(), 1);
        ledger.upsert(&input(false, at(1)));
        assert!(ledger.open_inputs().is_empty());
        assert_eq!(ledger.messages().len(), 1);
    }
}
