//! Signals exchanged between units and with the outside world.

use chrono::{DateTime, Utc};
use nodeflow_program::ValueKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One-way message delivered to a unit. Delivery is at least once and may
/// be reordered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "camelCase")]
pub enum Signal {
    /// A print or input message bound for the root ledger.
    SendMessage(MessageSignal),
    /// Raw response data for a suspended input; only `{"response": "..."}`
    /// is understood.
    ReceiveData(serde_json::Value),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::SendMessage(_) => "sendMessage",
            Signal::ReceiveData(_) => "receiveData",
        }
    }

    pub fn response(text: impl Into<String>) -> Self {
        Signal::ReceiveData(serde_json::json!({ "response": text.into() }))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSignal {
    pub message_id: Uuid,
    pub sending_unit_id: Uuid,
    pub last_modified_time: DateTime<Utc>,
    pub payload: MessagePayload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessagePayload {
    Print {
        text: String,
    },
    Input {
        show: bool,
        #[serde(rename = "expectedKind")]
        expected_kind: ValueKind,
        #[serde(default)]
        prompt: String,
    },
}

impl MessagePayload {
    pub fn is_visible(&self) -> bool {
        match self {
            MessagePayload::Print { .. } => true,
            MessagePayload::Input { show, .. } => *show,
        }
    }
}

/// The only response shape a suspended input accepts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InputResponse {
    pub response: String,
}

impl InputResponse {
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        Self::deserialize(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_string_responses_parse() {
        assert_eq!(
            InputResponse::from_payload(&json!({"response": "7", "extra": true})),
            Some(InputResponse {
                response: "7".to_string()
            })
        );
        assert_eq!(InputResponse::from_payload(&json!({"response": 7})), None);
        assert_eq!(InputResponse::from_payload(&json!({"answer": "7"})), None);
        assert_eq!(InputResponse::from_payload(&json!("7")), None);
    }

    #[test]
    fn signals_carry_their_name() {
        let signal = Signal::response("hello");
        assert_eq!(signal.name(), "receiveData");
        let encoded = serde_json::to_value(&signal).expect("encode");
        assert_eq!(
            encoded,
            json!({"name": "receiveData", "payload": {"response": "hello"}})
        );
    }

    #[test]
    fn message_payload_shape() {
        let payload = MessagePayload::Input {
            show: true,
            expected_kind: ValueKind::Number,
            prompt: "age?".to_string(),
        };
        let encoded = serde_json::to_value(&payload).expect("encode");
        assert_eq!(
            encoded,
            json!({"kind": "input", "show": true, "expectedKind": "number", "prompt": "age?"})
        );
        assert!(payload.is_visible());
    }
}
