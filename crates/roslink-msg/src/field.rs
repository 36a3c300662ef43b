//! Field, constant, and primitive-type descriptors for parsed schemas.

use std::fmt;
use std::sync::Arc;

use roslink_types::RosError;

use crate::descriptor::MessageDescriptor;

/// The fixed set of wire primitives a schema line may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    String,
    Time,
    Duration,
    // Legacy aliases still found in older schema files.
    Byte,
    Char,
}

impl PrimitiveType {
    /// Look up a primitive by its schema spelling. Returns `None` for
    /// anything that is not a primitive (i.e. a message type reference).
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Self::Bool,
            "int8" => Self::Int8,
            "uint8" => Self::Uint8,
            "int16" => Self::Int16,
            "uint16" => Self::Uint16,
            "int32" => Self::Int32,
            "uint32" => Self::Uint32,
            "int64" => Self::Int64,
            "uint64" => Self::Uint64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            "string" => Self::String,
            "time" => Self::Time,
            "duration" => Self::Duration,
            "byte" => Self::Byte,
            "char" => Self::Char,
            _ => return None,
        })
    }

    /// The schema spelling of this primitive.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Time => "time",
            Self::Duration => "duration",
            Self::Byte => "byte",
            Self::Char => "char",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Uint8
                | Self::Int16
                | Self::Uint16
                | Self::Int32
                | Self::Uint32
                | Self::Int64
                | Self::Uint64
                | Self::Byte
                | Self::Char
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// Array-ness of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySpec {
    /// Scalar field.
    None,
    /// `basetype[]`
    Dynamic,
    /// `basetype[N]`
    Fixed(usize),
}

/// What a field holds: a wire primitive or a nested message type.
///
/// Nested message fields carry their fully resolved descriptor so the digest
/// and the codec never need a second registry lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Primitive(PrimitiveType),
    Message(Arc<MessageDescriptor>),
}

/// One `<type> <name>` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// The type exactly as written in the schema (message types normalized
    /// to `pkg/Name`, array suffix preserved). This spelling, not the parsed
    /// form, is what enters the digest signature for primitives.
    pub type_name: String,
    pub kind: FieldKind,
    pub array: ArraySpec,
}

/// Parsed value of a `<type> <name>=<literal>` declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Booleans re-print as the 0/1 the schema accepted.
            Self::Bool(b) => write!(f, "{}", i32::from(*b)),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// One `<type> <name>=<literal>` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDescriptor {
    pub name: String,
    pub type_name: String,
    pub value: ConstantValue,
    /// Literal text as written (trimmed). Used verbatim in the digest
    /// signature so peer implementations hash the identical string.
    pub literal: String,
}

/// Parse a constant literal according to its declared primitive type.
///
/// Booleans accept `0`/`1` only. String constants take the remainder of the
/// line verbatim, including any `#`.
pub fn parse_constant_literal(
    ty: PrimitiveType,
    literal: &str,
) -> Result<ConstantValue, RosError> {
    let parse_err = |reason: String| RosError::SchemaParse {
        line: literal.to_string(),
        reason,
    };

    if ty.is_integer() {
        let v: i64 = literal
            .parse()
            .map_err(|e| parse_err(format!("invalid integer constant: {e}")))?;
        Ok(ConstantValue::Int(v))
    } else if ty.is_float() {
        let v: f64 = literal
            .parse()
            .map_err(|e| parse_err(format!("invalid float constant: {e}")))?;
        Ok(ConstantValue::Float(v))
    } else {
        match ty {
            PrimitiveType::Bool => match literal {
                "0" => Ok(ConstantValue::Bool(false)),
                "1" => Ok(ConstantValue::Bool(true)),
                other => Err(parse_err(format!(
                    "boolean constants accept 0 or 1, got '{other}'"
                ))),
            },
            PrimitiveType::String => Ok(ConstantValue::Str(literal.to_string())),
            other => Err(parse_err(format!(
                "type '{}' cannot declare a constant",
                other.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_names_round_trip() {
        for name in ["bool", "int32", "uint64", "float64", "string", "time"] {
            let ty = PrimitiveType::from_name(name).unwrap();
            assert_eq!(ty.name(), name);
        }
        assert!(PrimitiveType::from_name("std_msgs/Header").is_none());
    }

    #[test]
    fn integer_constant_parses() {
        let v = parse_constant_literal(PrimitiveType::Int32, "5").unwrap();
        assert_eq!(v, ConstantValue::Int(5));
    }

    #[test]
    fn bool_constant_accepts_only_zero_and_one() {
        assert_eq!(
            parse_constant_literal(PrimitiveType::Bool, "1").unwrap(),
            ConstantValue::Bool(true)
        );
        assert_eq!(
            parse_constant_literal(PrimitiveType::Bool, "0").unwrap(),
            ConstantValue::Bool(false)
        );
        assert!(parse_constant_literal(PrimitiveType::Bool, "true").is_err());
    }

    #[test]
    fn string_constant_keeps_hash() {
        let v = parse_constant_literal(PrimitiveType::String, "hello # not a comment").unwrap();
        assert_eq!(v, ConstantValue::Str("hello # not a comment".to_string()));
    }

    #[test]
    fn time_constant_is_rejected() {
        assert!(parse_constant_literal(PrimitiveType::Time, "0").is_err());
    }

    #[test]
    fn constant_value_display_matches_literals() {
        assert_eq!(ConstantValue::Int(5).to_string(), "5");
        assert_eq!(ConstantValue::Float(1.5).to_string(), "1.5");
        assert_eq!(ConstantValue::Bool(true).to_string(), "1");
        assert_eq!(ConstantValue::Str("abc".into()).to_string(), "abc");
    }
}
