//! The closed operator table and its left fold.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Operation carried by an `operator` node.
///
/// Serialized with the ASCII spellings; the typographic glyphs are accepted
/// on input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[default]
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-", alias = "−")]
    Subtract,
    #[serde(rename = "*", alias = "×")]
    Multiply,
    #[serde(rename = "/", alias = "÷")]
    Divide,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=", alias = "≠")]
    NotEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=", alias = "≥")]
    GreaterOrEqual,
    #[serde(rename = "<=", alias = "≤")]
    LessOrEqual,
    #[serde(rename = "||", alias = "∨")]
    Or,
    #[serde(rename = "&&", alias = "∧")]
    And,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Divide,
        Operation::Equal,
        Operation::NotEqual,
        Operation::GreaterThan,
        Operation::LessThan,
        Operation::GreaterOrEqual,
        Operation::LessOrEqual,
        Operation::Or,
        Operation::And,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Operation::Add => "+",
            Operation::Subtract => "-",
            Operation::Multiply => "*",
            Operation::Divide => "/",
            Operation::Equal => "=",
            Operation::NotEqual => "!=",
            Operation::GreaterThan => ">",
            Operation::LessThan => "<",
            Operation::GreaterOrEqual => ">=",
            Operation::LessOrEqual => "<=",
            Operation::Or => "||",
            Operation::And => "&&",
        }
    }

    /// Combine the running accumulator with the next operand.
    ///
    /// `+` and `-` pick text or numeric semantics from the accumulator alone,
    /// so a fold can switch to text mid-way and stay there.
    pub fn apply(self, acc: Value, next: &Value) -> Value {
        match self {
            Operation::Add => match acc {
                Value::Text(mut text) => {
                    text.push_str(&next.to_text());
                    Value::Text(text)
                }
                Value::Number(number) => Value::Number(number + next.to_number()),
            },
            Operation::Subtract => match acc {
                Value::Text(text) => Value::Text(text.replacen(&next.to_text(), "", 1)),
                Value::Number(number) => Value::Number(number - next.to_number()),
            },
            Operation::Multiply => Value::Number(acc.to_number() * next.to_number()),
            Operation::Divide => Value::Number(acc.to_number() / next.to_number()),
            Operation::Equal => Value::from(acc.strict_eq(next)),
            Operation::NotEqual => Value::from(!acc.strict_eq(next)),
            Operation::GreaterThan => {
                Value::from(matches!(acc.compare(next), Some(Ordering::Greater)))
            }
            Operation::LessThan => Value::from(matches!(acc.compare(next), Some(Ordering::Less))),
            Operation::GreaterOrEqual => Value::from(matches!(
                acc.compare(next),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            Operation::LessOrEqual => Value::from(matches!(
                acc.compare(next),
                Some(Ordering::Less | Ordering::Equal)
            )),
            Operation::Or => Value::from(acc.is_truthy() || next.is_truthy()),
            Operation::And => Value::from(acc.is_truthy() && next.is_truthy()),
        }
    }

    /// Left fold over the operands: no operands is 0, a single operand is
    /// returned unchanged.
    pub fn fold<I>(self, values: I) -> Value
    where
        I: IntoIterator<Item = Value>,
    {
        let mut values = values.into_iter();
        let Some(first) = values.next() else {
            return Value::default();
        };
        values.fold(first, |acc, next| self.apply(acc, &next))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation `{0}`")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(symbol: &str) -> Result<Self, Self::Err> {
        let operation = match symbol {
            "+" => Operation::Add,
            "-" | "−" => Operation::Subtract,
            "*" | "×" => Operation::Multiply,
            "/" | "÷" => Operation::Divide,
            "=" => Operation::Equal,
            "!=" | "≠" => Operation::NotEqual,
            ">" => Operation::GreaterThan,
            "<" => Operation::LessThan,
            ">=" | "≥" => Operation::GreaterOrEqual,
            "<=" | "≤" => Operation::LessOrEqual,
            "||" | "∨" => Operation::Or,
            "&&" | "∧" => Operation::And,
            other => return Err(UnknownOperation(other.to_string())),
        };
        Ok(operation)
    }
}
