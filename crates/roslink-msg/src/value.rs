//! Schema-bound message instances.
//!
//! Rather than generating a type per schema, a single generic
//! [`MessageValue`] carries an `Arc` to its descriptor and a field-name to
//! value mapping. Construction pre-populates declared constants and
//! zero/empty defaults, then applies caller overrides.

use std::collections::HashMap;
use std::sync::Arc;

use roslink_types::RosError;

use crate::descriptor::MessageDescriptor;
use crate::field::{ArraySpec, ConstantValue, FieldDescriptor, FieldKind, PrimitiveType};

/// A dynamically typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Message(MessageValue),
}

impl Value {
    /// Zero/empty default for a declared field.
    fn default_for(field: &FieldDescriptor) -> Value {
        if field.array != ArraySpec::None {
            return Value::Array(Vec::new());
        }
        match &field.kind {
            FieldKind::Message(nested) => Value::Message(MessageValue::new(nested.clone())),
            FieldKind::Primitive(ty) => match ty {
                PrimitiveType::Bool => Value::Bool(false),
                PrimitiveType::String => Value::Str(String::new()),
                ty if ty.is_float() => Value::Float(0.0),
                _ => Value::Int(0),
            },
        }
    }
}

impl From<&ConstantValue> for Value {
    fn from(c: &ConstantValue) -> Self {
        match c {
            ConstantValue::Bool(b) => Value::Bool(*b),
            ConstantValue::Int(i) => Value::Int(*i),
            ConstantValue::Float(x) => Value::Float(*x),
            ConstantValue::Str(s) => Value::Str(s.clone()),
        }
    }
}

/// An instance of a described message type.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageValue {
    descriptor: Arc<MessageDescriptor>,
    values: HashMap<String, Value>,
}

impl MessageValue {
    /// Build an instance holding declared constants and field defaults.
    pub fn new(descriptor: Arc<MessageDescriptor>) -> Self {
        let mut values = HashMap::new();
        for c in &descriptor.constants {
            values.insert(c.name.clone(), Value::from(&c.value));
        }
        for f in &descriptor.fields {
            values.insert(f.name.clone(), Value::default_for(f));
        }
        Self { descriptor, values }
    }

    /// Build an instance and override defaults with `overrides`.
    pub fn with_values(
        descriptor: Arc<MessageDescriptor>,
        overrides: HashMap<String, Value>,
    ) -> Self {
        let mut value = Self::new(descriptor);
        for (name, v) in overrides {
            value.values.insert(name, v);
        }
        value
    }

    pub fn descriptor(&self) -> &Arc<MessageDescriptor> {
        &self.descriptor
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Check candidate keys against the declared constants and fields.
    /// Strict mode fails on unknown keys; lenient mode accepts anything.
    pub fn validate<I, S>(descriptor: &MessageDescriptor, keys: I, strict: bool) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !strict {
            return true;
        }
        keys.into_iter().all(|key| {
            let key = key.as_ref();
            descriptor.constant(key).is_some() || descriptor.field(key).is_some()
        })
    }

    /// Field values in declared wire order.
    pub fn ordered_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.descriptor
            .fields
            .iter()
            .filter_map(|f| self.values.get(&f.name).map(|v| (f.name.as_str(), v)))
    }

    /// Build a message from a JSON object, mapping each member onto the
    /// declared field of the same name. Unknown members are rejected
    /// (strict validation), since they would silently be dropped from the
    /// wire otherwise.
    pub fn from_json(
        descriptor: Arc<MessageDescriptor>,
        json: &serde_json::Value,
    ) -> Result<Self, RosError> {
        let Some(object) = json.as_object() else {
            return Err(RosError::SchemaParse {
                line: json.to_string(),
                reason: "expected a JSON object".to_string(),
            });
        };

        let mut overrides = HashMap::new();
        for (key, member) in object {
            let field = descriptor.field(key).ok_or_else(|| RosError::SchemaParse {
                line: key.clone(),
                reason: format!("unknown field '{}' for {}", key, descriptor.full_name),
            })?;
            overrides.insert(key.clone(), json_to_value(field, member)?);
        }
        Ok(Self::with_values(descriptor, overrides))
    }

    /// Render the declared fields (not constants) as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (name, value) in self.ordered_fields() {
            object.insert(name.to_string(), value_to_json(value));
        }
        serde_json::Value::Object(object)
    }
}

fn json_to_value(field: &FieldDescriptor, json: &serde_json::Value) -> Result<Value, RosError> {
    let type_err = |expected: &str| RosError::SchemaParse {
        line: json.to_string(),
        reason: format!("field '{}' expects {expected}", field.name),
    };

    if field.array != ArraySpec::None {
        let Some(items) = json.as_array() else {
            return Err(type_err("an array"));
        };
        let scalar = FieldDescriptor {
            array: ArraySpec::None,
            ..field.clone()
        };
        let converted = items
            .iter()
            .map(|item| json_to_value(&scalar, item))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(converted));
    }

    match &field.kind {
        FieldKind::Message(nested) => {
            Ok(Value::Message(MessageValue::from_json(nested.clone(), json)?))
        }
        FieldKind::Primitive(PrimitiveType::Bool) => {
            json.as_bool().map(Value::Bool).ok_or_else(|| type_err("a boolean"))
        }
        FieldKind::Primitive(PrimitiveType::String) => json
            .as_str()
            .map(|s| Value::Str(s.to_string()))
            .ok_or_else(|| type_err("a string")),
        FieldKind::Primitive(ty) if ty.is_float() => {
            json.as_f64().map(Value::Float).ok_or_else(|| type_err("a number"))
        }
        FieldKind::Primitive(_) => {
            json.as_i64().map(Value::Int).ok_or_else(|| type_err("an integer"))
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(x) => serde_json::Value::from(*x),
        Value::Str(s) => serde_json::Value::from(s.clone()),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Message(m) => m.to_json(),
    }
}
