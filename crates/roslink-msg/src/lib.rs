//! `roslink-msg` – The message type system.
//!
//! Turns human-authored schema text into validated field layouts with a
//! content-derived MD5 type digest, and builds schema-bound
//! [`MessageValue`]s from those layouts.
//!
//! # Modules
//!
//! - [`schema`] – line-level parsing and type-name normalization.
//! - [`digest`] – the signature string and its MD5 digest.
//! - [`descriptor`] – resolved [`MessageDescriptor`]s and [`Role`]s.
//! - [`registry`] – the process-wide, never-evicted descriptor cache with
//!   coalesced first-time resolution.
//! - [`value`] – generic [`MessageValue`] instances.

pub mod descriptor;
pub mod digest;
pub mod field;
pub mod registry;
pub mod schema;
pub mod value;

use std::sync::Arc;

use roslink_types::RosError;

pub use descriptor::{Digest, MessageDescriptor, Role};
pub use field::{ArraySpec, ConstantDescriptor, ConstantValue, FieldDescriptor, FieldKind, PrimitiveType};
pub use registry::TypeRegistry;
pub use value::{MessageValue, Value};

/// Register schema text with the process-wide registry.
pub fn register_schema(type_name: &str, text: &str) {
    registry::global().register_schema(type_name, text);
}

/// Resolve a topic message type from the process-wide registry.
pub async fn get_message(type_name: &str) -> Result<Arc<MessageDescriptor>, RosError> {
    registry::global().resolve(type_name, Role::Message).await
}

/// Resolve the request half of a service type.
pub async fn get_service_request(type_name: &str) -> Result<Arc<MessageDescriptor>, RosError> {
    registry::global().resolve(type_name, Role::Request).await
}

/// Resolve the response half of a service type.
pub async fn get_service_response(type_name: &str) -> Result<Arc<MessageDescriptor>, RosError> {
    registry::global().resolve(type_name, Role::Response).await
}
