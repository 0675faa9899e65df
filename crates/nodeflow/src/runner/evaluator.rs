//! The action a node performs once its children have produced values.

use nodeflow_program::{NodeKind, NodeRecord, Value, ValueKind};
use nodeflow_runner_state::ProgramState;

/// Outcome of acting on a node.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Complete(ProgramState),
    /// Publish `text` to the ledger, then complete with `state`.
    Print { text: String, state: ProgramState },
    /// Publish a prompt and suspend until a response arrives.
    Prompt {
        prompt: String,
        expected_kind: ValueKind,
        state: ProgramState,
    },
}

/// Joins child values with newlines, the way print and input render them.
pub fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_text)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn act(node: &NodeRecord, values: Vec<Value>, mut state: ProgramState) -> Action {
    match &node.kind {
        NodeKind::Value { value, value_kind } => {
            Action::Complete(state.with_value(value_kind.parse_literal(value)))
        }
        NodeKind::Operator { operation } => Action::Complete(state.with_value(operation.fold(values))),
        NodeKind::Print => {
            let text = join_values(&values);
            let state = state.with_value(Value::Text(text.clone()));
            Action::Print { text, state }
        }
        NodeKind::Input { value_kind } => Action::Prompt {
            prompt: join_values(&values),
            expected_kind: *value_kind,
            state,
        },
        NodeKind::VarLabel { name } => {
            let current = state.label(&node.id, name);
            Action::Complete(state.with_value(current))
        }
        NodeKind::VarGet { variable } => {
            let current = state.lookup(variable.as_ref());
            Action::Complete(state.with_value(current))
        }
        NodeKind::VarSet { variable } => {
            // Nothing is stored without a reference or without a value.
            if let (Some(variable), Some(value)) = (variable, values.into_iter().next()) {
                state.assign(variable, value);
            }
            Action::Complete(state.with_value(Value::default()))
        }
        NodeKind::Root | NodeKind::If | NodeKind::While => {
            Action::Complete(state.with_value(Value::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use nodeflow_program::{NodeId, Operation};

    use super::*;

    fn record(id: &str, kind: NodeKind) -> NodeRecord {
        NodeRecord {
            id: NodeId::from(id),
            kind,
            children: Vec::new(),
            condition: None,
        }
    }

    fn completed(action: Action) -> ProgramState {
        match action {
            Action::Complete(state) => state,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn value_literals_follow_their_kind() {
        let number = record(
            "v",
            NodeKind::Value {
                value: "12abc".to_string(),
                value_kind: ValueKind::Number,
            },
        );
        let text = record(
            "t",
            NodeKind::Value {
                value: "12abc".to_string(),
                value_kind: ValueKind::Text,
            },
        );
        let state = ProgramState::default();
        assert_eq!(
            completed(act(&number, Vec::new(), state.clone())).current_value,
            Value::Number(12.0)
        );
        assert_eq!(
            completed(act(&text, Vec::new(), state)).current_value,
            Value::from("12abc")
        );
    }

    #[test]
    fn operator_folds_child_values() {
        let node = record(
            "op",
            NodeKind::Operator {
                operation: Operation::Subtract,
            },
        );
        let state = completed(act(
            &node,
            vec![Value::from(10), Value::from(3), Value::from(2)],
            ProgramState::default(),
        ));
        assert_eq!(state.current_value, Value::Number(5.0));
    }

    #[test]
    fn print_joins_values_with_newlines() {
        let node = record("p", NodeKind::Print);
        let action = act(
            &node,
            vec![Value::from("a"), Value::from(2)],
            ProgramState::default(),
        );
        let Action::Print { text, state } = action else {
            panic!("expected print");
        };
        assert_eq!(text, "a\n2");
        assert_eq!(state.current_value, Value::from("a\n2"));
    }

    #[test]
    fn input_prompts_with_expected_kind() {
        let node = record(
            "in",
            NodeKind::Input {
                value_kind: ValueKind::Text,
            },
        );
        let action = act(&node, vec![Value::from("name?")], ProgramState::default());
        assert_eq!(
            action,
            Action::Prompt {
                prompt: "name?".to_string(),
                expected_kind: ValueKind::Text,
                state: ProgramState::default(),
            }
        );
    }

    #[test]
    fn variables_label_set_and_get() {
        let label = record(
            "x",
            NodeKind::VarLabel {
                name: "x".to_string(),
            },
        );
        let set = record(
            "set",
            NodeKind::VarSet {
                variable: Some(NodeId::from("x")),
            },
        );
        let get = record(
            "get",
            NodeKind::VarGet {
                variable: Some(NodeId::from("x")),
            },
        );

        let state = completed(act(&label, Vec::new(), ProgramState::default()));
        assert_eq!(state.current_value, Value::Number(0.0));
        let state = completed(act(&set, vec![Value::from(5)], state));
        assert_eq!(state.current_value, Value::Number(0.0));
        let state = completed(act(&get, Vec::new(), state));
        assert_eq!(state.current_value, Value::Number(5.0));
        assert_eq!(state.variable("x").map(|v| v.name.as_str()), Some("x"));
    }

    #[test]
    fn unset_references_are_harmless() {
        let get = record("get", NodeKind::VarGet { variable: None });
        let set = record("set", NodeKind::VarSet { variable: None });
        let state = completed(act(&set, vec![Value::from(9)], ProgramState::default()));
        assert!(state.variables.is_empty());
        let state = completed(act(&get, Vec::new(), state));
        assert_eq!(state.current_value, Value::Number(0.0));
    }

    #[test]
    fn var_set_without_a_value_keeps_the_variable() {
        let set = record(
            "set",
            NodeKind::VarSet {
                variable: Some(NodeId::from("x")),
            },
        );
        let mut state = ProgramState::default();
        state.assign(&NodeId::from("x"), Value::from(5));

        let state = completed(act(&set, Vec::new(), state));
        assert_eq!(state.current_value, Value::Number(0.0));
        assert_eq!(
            state.variable("x").map(|variable| variable.value.clone()),
            Some(Value::Number(5.0))
        );

        let state = completed(act(&set, Vec::new(), ProgramState::default()));
        assert!(state.variable("x").is_none());
    }

    #[test]
    fn structural_nodes_produce_zero() {
        let state = ProgramState::default().with_value(Value::from("leftover"));
        for kind in [NodeKind::Root, NodeKind::If, NodeKind::While] {
            let node = record("n", kind);
            assert_eq!(
                completed(act(&node, vec![Value::from(1)], state.clone())).current_value,
                Value::Number(0.0)
            );
        }
    }
}
