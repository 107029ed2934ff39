//! Dynamic values used by the expression evaluator and the schema interpreter.

use std::fmt;

use crate::error::{CodecError, Result};

/// A decoded or computed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent optional field or `null` literal.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer up to 64 bits, signed or unsigned.
    Int(i128),
    /// Floating point.
    Float(f64),
    /// Text.
    String(String),
    /// Enum member: `Type.SYMBOL` with its raw wire value.
    Enum {
        /// Enum type name.
        type_name: String,
        /// Member symbol.
        symbol: String,
        /// Raw value on the wire.
        value: i128,
    },
    /// Array field contents.
    List(Vec<Value>),
    /// Nested message.
    Message(Box<ParsedMessage>),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Enum { .. } => "enum",
            Self::List(_) => "list",
            Self::Message(_) => "message",
        }
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view: ints, bools, enum raw values and integral floats.
    pub fn as_int(&self) -> Result<i128> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::Bool(b) => Ok(i128::from(*b)),
            Self::Enum { value, .. } => Ok(*value),
            Self::Float(f) if f.fract() == 0.0 => Ok(*f as i128),
            other => Err(CodecError::invalid_expression(format!("expected an integer, got {}", other.kind()))),
        }
    }

    /// Unsigned 64-bit view.
    pub fn as_u64(&self) -> Result<u64> {
        let v = self.as_int()?;
        u64::try_from(v).map_err(|_| CodecError::invalid_expression(format!("{} is not a valid unsigned value", v)))
    }

    /// Floating point view of any number.
    pub fn as_float(&self) -> Result<f64> {
        match self {
            Self::Float(f) => Ok(*f),
            Self::Int(v) => Ok(*v as f64),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Enum { value, .. } => Ok(*value as f64),
            other => Err(CodecError::invalid_expression(format!("expected a number, got {}", other.kind()))),
        }
    }

    /// Boolean view. Numbers are true when non-zero.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Int(v) => Ok(*v != 0),
            Self::Float(f) => Ok(*f != 0.0),
            Self::Null => Ok(false),
            other => Err(CodecError::invalid_expression(format!("expected a boolean, got {}", other.kind()))),
        }
    }

    /// String view.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Self::String(s) => Ok(s),
            Self::Enum { symbol, .. } => Ok(symbol),
            other => Err(CodecError::invalid_expression(format!("expected a string, got {}", other.kind()))),
        }
    }

    /// List view.
    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(CodecError::invalid_expression(format!("expected a list, got {}", other.kind()))),
        }
    }

    /// Nested message view.
    pub fn as_message(&self) -> Result<&ParsedMessage> {
        match self {
            Self::Message(m) => Ok(m),
            other => Err(CodecError::invalid_expression(format!("expected a message, got {}", other.kind()))),
        }
    }

    /// Convenience constructor for a byte array.
    pub fn bytes(bytes: &[u8]) -> Self {
        Self::List(bytes.iter().map(|b| Self::Int(i128::from(*b))).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "'{}'", s),
            Self::Enum { type_name, symbol, .. } => write!(f, "{}.{}", type_name, symbol),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Message(m) => write!(f, "{}", m.display_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<ParsedMessage> for Value {
    fn from(m: ParsedMessage) -> Self {
        Self::Message(Box::new(m))
    }
}

/// An immutable decoded instance of a registered type.
///
/// Only retained fields are stored, in declaration order. Implicit,
/// discriminator and virtual fields are recomputed when needed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    type_name: String,
    case_name: Option<String>,
    fields: Vec<(String, Value)>,
}

impl ParsedMessage {
    /// Creates an instance of a flat type.
    pub fn new(type_name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self {
            type_name: type_name.into(),
            case_name: None,
            fields,
        }
    }

    /// Creates an instance of one concrete case of a discriminated family.
    pub fn with_case(type_name: impl Into<String>, case_name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self {
            type_name: type_name.into(),
            case_name: Some(case_name.into()),
            fields,
        }
    }

    /// Family or flat type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Concrete case, for discriminated families.
    pub fn case_name(&self) -> Option<&str> {
        self.case_name.as_deref()
    }

    /// Case name if present, otherwise the type name.
    pub fn display_name(&self) -> &str {
        self.case_name.as_deref().unwrap_or(&self.type_name)
    }

    /// Retained fields in declaration order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Looks up a retained field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Looks up a retained field, failing if it is missing.
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| {
            CodecError::invalid_expression(format!("'{}' has no field '{}'", self.display_name(), name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(5).as_float().unwrap(), 5.0);
        assert_eq!(Value::Float(4.0).as_int().unwrap(), 4);
        assert!(Value::Float(4.5).as_int().is_err());
        assert!(Value::Int(-1).as_u64().is_err());
        assert!(Value::Int(2).as_bool().unwrap());
        assert!(!Value::Null.as_bool().unwrap());
    }

    #[test]
    fn test_message_lookup() {
        let msg = ParsedMessage::with_case(
            "S7Message",
            "S7MessageResponse",
            vec![("errorClass".to_string(), Value::Int(0x85))],
        );
        assert_eq!(msg.display_name(), "S7MessageResponse");
        assert_eq!(msg.get("errorClass"), Some(&Value::Int(0x85)));
        assert!(msg.require("errorCode").is_err());
    }

    #[test]
    fn test_display() {
        let list = Value::List(vec![Value::Int(1), Value::Bool(true)]);
        assert_eq!(list.to_string(), "[1, true]");
        let member = Value::Enum {
            type_name: "MemoryArea".to_string(),
            symbol: "DATA_BLOCKS".to_string(),
            value: 0x84,
        };
        assert_eq!(member.to_string(), "MemoryArea.DATA_BLOCKS");
    }
}
