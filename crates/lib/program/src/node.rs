//! Program nodes in their nested interchange form.
//!
//! This is the JSON document a tree editor produces: one object per node,
//! `null` for an absent node, and an optional `conditionNode` on `if` and
//! `while`.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::operator::Operation;
use crate::value::ValueKind;

/// Opaque node identifier, unique within one program.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for nodes created by the editor.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Node kind and its kind-specific attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    #[serde(rename = "root")]
    Root,
    #[serde(rename = "input")]
    Input {
        #[serde(rename = "valueType", default)]
        value_kind: ValueKind,
    },
    #[serde(rename = "print")]
    Print,
    #[serde(rename = "operator")]
    Operator {
        #[serde(alias = "opertation", default)]
        operation: Operation,
    },
    #[serde(rename = "if")]
    If,
    #[serde(rename = "while")]
    While,
    #[serde(rename = "value")]
    Value {
        #[serde(default, deserialize_with = "literal_text")]
        value: String,
        #[serde(rename = "valueType", default)]
        value_kind: ValueKind,
    },
    #[serde(rename = "varGet")]
    VarGet {
        #[serde(
            rename = "varUuid",
            alias = "varuuid",
            default,
            deserialize_with = "optional_reference",
            skip_serializing_if = "Option::is_none"
        )]
        variable: Option<NodeId>,
    },
    #[serde(rename = "varSet")]
    VarSet {
        #[serde(
            rename = "varUuid",
            alias = "varuuid",
            default,
            deserialize_with = "optional_reference",
            skip_serializing_if = "Option::is_none"
        )]
        variable: Option<NodeId>,
    },
    #[serde(rename = "varLabel")]
    VarLabel {
        #[serde(default)]
        name: String,
    },
}

impl NodeKind {
    /// Attributes a freshly created node of the given tag starts with.
    pub fn default_for(tag: NodeTag) -> Self {
        match tag {
            NodeTag::Root => NodeKind::Root,
            NodeTag::Input => NodeKind::Input {
                value_kind: ValueKind::Number,
            },
            NodeTag::Print => NodeKind::Print,
            NodeTag::Operator => NodeKind::Operator {
                operation: Operation::Add,
            },
            NodeTag::If => NodeKind::If,
            NodeTag::While => NodeKind::While,
            NodeTag::Value => NodeKind::Value {
                value: "0".to_string(),
                value_kind: ValueKind::Number,
            },
            NodeTag::VarGet => NodeKind::VarGet { variable: None },
            NodeTag::VarSet => NodeKind::VarSet { variable: None },
            NodeTag::VarLabel => NodeKind::VarLabel {
                name: String::new(),
            },
        }
    }

    pub fn tag(&self) -> NodeTag {
        match self {
            NodeKind::Root => NodeTag::Root,
            NodeKind::Input { .. } => NodeTag::Input,
            NodeKind::Print => NodeTag::Print,
            NodeKind::Operator { .. } => NodeTag::Operator,
            NodeKind::If => NodeTag::If,
            NodeKind::While => NodeTag::While,
            NodeKind::Value { .. } => NodeTag::Value,
            NodeKind::VarGet { .. } => NodeTag::VarGet,
            NodeKind::VarSet { .. } => NodeTag::VarSet,
            NodeKind::VarLabel { .. } => NodeTag::VarLabel,
        }
    }

    /// Only `if` and `while` carry a condition slot.
    pub fn has_condition_slot(&self) -> bool {
        matches!(self, NodeKind::If | NodeKind::While)
    }
}

/// Attribute-free discriminant of [`NodeKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeTag {
    Root,
    Input,
    Print,
    Operator,
    If,
    While,
    Value,
    VarGet,
    VarSet,
    VarLabel,
}

impl NodeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeTag::Root => "root",
            NodeTag::Input => "input",
            NodeTag::Print => "print",
            NodeTag::Operator => "operator",
            NodeTag::If => "if",
            NodeTag::While => "while",
            NodeTag::Value => "value",
            NodeTag::VarGet => "varGet",
            NodeTag::VarSet => "varSet",
            NodeTag::VarLabel => "varLabel",
        }
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a nested program document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgramNode {
    pub uuid: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub children: Vec<Option<ProgramNode>>,
    #[serde(
        rename = "conditionNode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub condition_node: Option<Box<ProgramNode>>,
}

impl ProgramNode {
    pub fn new(uuid: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            uuid: uuid.into(),
            kind,
            children: Vec::new(),
            condition_node: None,
        }
    }

    pub fn with_children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = ProgramNode>,
    {
        self.children = children.into_iter().map(Some).collect();
        self
    }

    pub fn with_condition(mut self, condition: ProgramNode) -> Self {
        self.condition_node = Some(Box::new(condition));
        self
    }

    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }
}

fn literal_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Literal {
        Text(String),
        Number(f64),
    }

    Ok(match Literal::deserialize(deserializer)? {
        Literal::Text(text) => text,
        Literal::Number(number) => crate::value::format_number(number),
    })
}

// Editors store an unset reference as the empty string.
fn optional_reference<'de, D>(deserializer: D) -> Result<Option<NodeId>, D::Error>
where
    D: Deserializer<'de>,
{
    let reference = Option::<String>::deserialize(deserializer)?;
    Ok(reference.filter(|id| !id.is_empty()).map(NodeId::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_editor_documents() {
        let document = json!({
            "type": "root",
            "uuid": "root",
            "children": [
                {"type": "varLabel", "uuid": "x", "name": "counter", "children": []},
                null,
                {
                    "type": "while",
                    "uuid": "loop",
                    "conditionNode": {
                        "type": "operator",
                        "uuid": "cmp",
                        "opertation": "<",
                        "children": [
                            {"type": "varGet", "uuid": "get", "varuuid": "x", "children": []},
                            {"type": "value", "uuid": "three", "value": "3", "valueType": "number", "children": []}
                        ]
                    },
                    "children": [
                        {"type": "input", "uuid": "ask", "valueType": "string", "children": []},
                        {"type": "varSet", "uuid": "set", "varuuid": "", "children": []}
                    ]
                }
            ]
        });

        let root: ProgramNode = serde_json::from_value(document).expect("parse program");
        assert_eq!(root.kind, NodeKind::Root);
        assert_eq!(root.children.len(), 3);
        assert!(root.children[1].is_none());

        let looping = root.children[2].as_ref().expect("while node");
        assert_eq!(looping.kind, NodeKind::While);
        let condition = looping.condition_node.as_ref().expect("condition");
        assert_eq!(
            condition.kind,
            NodeKind::Operator {
                operation: Operation::LessThan
            }
        );
        assert_eq!(
            condition.children[0].as_ref().map(|node| &node.kind),
            Some(&NodeKind::VarGet {
                variable: Some(NodeId::from("x"))
            })
        );
        assert_eq!(
            looping.children[0].as_ref().map(|node| &node.kind),
            Some(&NodeKind::Input {
                value_kind: ValueKind::Text
            })
        );
        assert_eq!(
            looping.children[1].as_ref().map(|node| &node.kind),
            Some(&NodeKind::VarSet { variable: None })
        );
    }

    #[test]
    fn missing_children_default_to_empty() {
        let node: ProgramNode =
            serde_json::from_value(json!({"type": "print", "uuid": "p"})).expect("parse");
        assert!(node.children.is_empty());
        assert!(node.condition_node.is_none());
    }

    #[test]
    fn numeric_literals_are_stored_as_text() {
        let node: ProgramNode = serde_json::from_value(
            json!({"type": "value", "uuid": "v", "value": 2.5, "valueType": "number"}),
        )
        .expect("parse");
        assert_eq!(
            node.kind,
            NodeKind::Value {
                value: "2.5".to_string(),
                value_kind: ValueKind::Number
            }
        );
    }

    #[test]
    fn serializes_back_to_the_same_shape() {
        let node = ProgramNode::new("if", NodeKind::If)
            .with_condition(ProgramNode::new(
                "c",
                NodeKind::Value {
                    value: "1".to_string(),
                    value_kind: ValueKind::Number,
                },
            ))
            .with_children([ProgramNode::new("p", NodeKind::Print)]);

        let encoded = serde_json::to_value(&node).expect("encode");
        assert_eq!(encoded["type"], "if");
        assert_eq!(encoded["conditionNode"]["valueType"], "number");
        assert_eq!(encoded["children"][0]["type"], "print");

        let decoded: ProgramNode = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, node);
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        let result = ProgramNode::from_json(r#"{"type": "goto", "uuid": "g"}"#);
        assert!(result.is_err());
    }
}
