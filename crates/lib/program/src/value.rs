//! Runtime values and the coercion rules shared by every node kind.
//!
//! Programs only know two primitive kinds: numbers and text. Conversions
//! between them never fail; unparsable text is the number zero.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value produced by evaluating a node.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Number(0.0)
    }
}

impl Value {
    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }

    /// Numeric view of the value. Text is parsed from its leading numeric
    /// prefix; anything unparsable is zero.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(number) => *number,
            Value::Text(text) => parse_number_prefix(text).unwrap_or(0.0),
        }
    }

    /// Textual view of the value, rendering numbers in base 10.
    pub fn to_text(&self) -> String {
        match self {
            Value::Number(number) => format_number(*number),
            Value::Text(text) => text.clone(),
        }
    }

    /// A value is truthy when its numeric view is strictly positive, so
    /// `"0"`, `""` and `-1` are all falsy.
    pub fn is_truthy(&self) -> bool {
        self.to_number() > 0.0
    }

    /// Identity comparison: values of different kinds are never equal.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(lhs), Value::Number(rhs)) => lhs == rhs,
            (Value::Text(lhs), Value::Text(rhs)) => lhs == rhs,
            _ => false,
        }
    }

    /// Ordering on raw values. Two texts compare lexically; any other pair
    /// compares numerically after whole-string conversion of the text side.
    /// Returns `None` when either side is not a number.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(lhs), Value::Text(rhs)) => Some(lhs.cmp(rhs)),
            _ => self.loose_number().partial_cmp(&other.loose_number()),
        }
    }

    fn loose_number(&self) -> f64 {
        match self {
            Value::Number(number) => *number,
            Value::Text(text) => parse_whole_number(text),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Number(if value { 1.0 } else { 0.0 })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(number) => f.write_str(&format_number(*number)),
            Value::Text(text) => f.write_str(text),
        }
    }
}

// JSON has no representation for NaN or the infinities, so those travel as a
// small tagged object instead of silently turning into `null`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ValueRepr {
    Number(f64),
    Text(String),
    NonFinite {
        #[serde(rename = "nonFinite")]
        non_finite: String,
    },
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(number) if number.is_finite() => {
                ValueRepr::Number(*number).serialize(serializer)
            }
            Value::Number(number) => ValueRepr::NonFinite {
                non_finite: format_number(*number),
            }
            .serialize(serializer),
            Value::Text(text) => serializer.serialize_str(text),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match ValueRepr::deserialize(deserializer)? {
            ValueRepr::Number(number) => Value::Number(number),
            ValueRepr::Text(text) => Value::Text(text),
            ValueRepr::NonFinite { non_finite } => match non_finite.as_str() {
                "Infinity" => Value::Number(f64::INFINITY),
                "-Infinity" => Value::Number(f64::NEG_INFINITY),
                _ => Value::Number(f64::NAN),
            },
        })
    }
}

/// Which primitive kind a literal, an input, or a coercion targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    #[default]
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "string", alias = "text")]
    Text,
}

impl ValueKind {
    pub fn coerce(self, value: &Value) -> Value {
        match self {
            ValueKind::Number => Value::Number(value.to_number()),
            ValueKind::Text => Value::Text(value.to_text()),
        }
    }

    /// Interpret stored literal text as this kind.
    pub fn parse_literal(self, literal: &str) -> Value {
        match self {
            ValueKind::Number => Value::Number(parse_number_prefix(literal).unwrap_or(0.0)),
            ValueKind::Text => Value::Text(literal.to_string()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Text => "string",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a number the way users expect to read it back: shortest decimal
/// that round-trips, no trailing `.0`, and named infinities. Magnitudes of
/// at least 1e21 or below 1e-6 use exponent notation with a signed exponent,
/// as in `1e+21` and `1.5e-7`.
pub fn format_number(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_string()
    } else if number.is_infinite() {
        let name = if number > 0.0 { "Infinity" } else { "-Infinity" };
        name.to_string()
    } else if number == 0.0 {
        "0".to_string()
    } else if (1e-6..1e21).contains(&number.abs()) {
        format!("{number}")
    } else {
        let scientific = format!("{number:e}");
        match scientific.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => scientific,
        }
    }
}

/// Parse the longest numeric prefix of `text`, skipping leading whitespace.
///
/// `"12px"` is 12, `" .5e1x"` is 5, `"abc"` is `None`.
pub fn parse_number_prefix(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if trimmed[end..].starts_with("Infinity") {
        let negative = end == 1 && bytes[0] == b'-';
        return Some(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }

    let integer_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - integer_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let fraction_start = end + 1;
        let mut fraction_end = fraction_start;
        while fraction_end < bytes.len() && bytes[fraction_end].is_ascii_digit() {
            fraction_end += 1;
        }
        let fraction_digits = fraction_end - fraction_start;
        if digits > 0 || fraction_digits > 0 {
            end = fraction_end;
            digits += fraction_digits;
        }
    }
    if digits == 0 {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exponent_end = end + 1;
        if exponent_end < bytes.len() && matches!(bytes[exponent_end], b'+' | b'-') {
            exponent_end += 1;
        }
        let exponent_digits_start = exponent_end;
        while exponent_end < bytes.len() && bytes[exponent_end].is_ascii_digit() {
            exponent_end += 1;
        }
        if exponent_end > exponent_digits_start {
            end = exponent_end;
        }
    }

    trimmed[..end].parse::<f64>().ok()
}

/// Whole-string numeric conversion used when ordering text against a number.
/// Blank text is zero; anything that is not entirely a number is NaN.
fn parse_whole_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let radix = [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| trimmed.strip_prefix(prefix).map(|rest| (rest, radix)));
    if let Some((digits, radix)) = radix {
        return u64::from_str_radix(digits, radix)
            .map(|value| value as f64)
            .unwrap_or(f64::NAN);
    }
    // `f64::from_str` also accepts "inf" and "nan" spellings; only plain
    // decimal notation counts here.
    if !trimmed
        .bytes()
        .all(|byte| byte.is_ascii_digit() || matches!(byte, b'+' | b'-' | b'.' | b'e' | b'E'))
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}
