use std::collections::BTreeMap;

use nodeflow_program::{NodeId, Value};
use serde::{Deserialize, Serialize};

/// State handed from one unit to the next: the last produced value and the
/// variables defined so far.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramState {
    #[serde(default)]
    pub current_value: Value,
    #[serde(default)]
    pub variables: BTreeMap<NodeId, VariableState>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableState {
    pub name: String,
    pub value: Value,
}

impl ProgramState {
    pub fn with_value(mut self, value: Value) -> Self {
        self.current_value = value;
        self
    }

    pub fn variable(&self, id: &str) -> Option<&VariableState> {
        self.variables.get(id)
    }

    /// Stored value of a variable, or 0 when the reference does not resolve.
    pub fn lookup(&self, id: Option<&NodeId>) -> Value {
        id.and_then(|id| self.variables.get(id))
            .map(|variable| variable.value.clone())
            .unwrap_or_default()
    }

    /// Register a label under its own id, keeping the stored value when the
    /// variable already exists. Returns the current value.
    pub fn label(&mut self, id: &NodeId, name: &str) -> Value {
        let variable = self
            .variables
            .entry(id.clone())
            .or_insert_with(|| VariableState {
                name: String::new(),
                value: Value::default(),
            });
        variable.name = name.to_string();
        variable.value.clone()
    }

    /// Store a value, creating an unnamed variable if needed.
    pub fn assign(&mut self, id: &NodeId, value: Value) {
        self.variables
            .entry(id.clone())
            .and_modify(|variable| variable.value = value.clone())
            .or_insert(VariableState {
                name: String::new(),
                value,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn label_preserves_existing_value() {
        let id = NodeId::from("x");
        let mut state = ProgramState::default();
        assert_eq!(state.label(&id, "x"), Value::from(0));

        state.assign(&id, Value::from(4));
        assert_eq!(state.label(&id, "renamed"), Value::from(4));
        assert_eq!(state.variable("x").map(|v| v.name.as_str()), Some("renamed"));
    }

    #[test]
    fn assign_creates_unnamed_variable() {
        let id = NodeId::from("ghost");
        let mut state = ProgramState::default();
        state.assign(&id, Value::from("v"));
        assert_eq!(
            state.variable("ghost"),
            Some(&VariableState {
                name: String::new(),
                value: Value::from("v")
            })
        );
    }

    #[test]
    fn lookup_defaults_to_zero() {
        let state = ProgramState::default();
        assert_eq!(state.lookup(None), Value::from(0));
        assert_eq!(state.lookup(Some(&NodeId::from("missing"))), Value::from(0));
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let mut state = ProgramState::default().with_value(Value::from(2));
        state.assign(&NodeId::from("x"), Value::from("hi"));
        let encoded = serde_json::to_value(&state).expect("encode");
        assert_eq!(
            encoded,
            json!({
                "currentValue": 2.0,
                "variables": {"x": {"name": "", "value": "hi"}}
            })
        );
    }
}
