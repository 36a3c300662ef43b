//! Resolved message type descriptors.

use std::fmt;

use crate::field::{ConstantDescriptor, FieldDescriptor};

/// Which half of a schema document a descriptor was parsed from.
///
/// Topics use [`Role::Message`]; services split a combined `.srv` document
/// into [`Role::Request`] and [`Role::Response`] at the `---` divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Message,
    Request,
    Response,
}

/// 16-byte content digest of a type's constant/field signature.
///
/// Peers compare digests during the connection handshake to detect schema
/// drift, so the construction in [`crate::digest`] must match the other
/// implementations of this protocol byte for byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 16]);

impl Digest {
    /// Lowercase hex form, as carried in the `md5sum` header field.
    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// A fully resolved message type: identity, ordered declarations, digest.
///
/// Descriptors are immutable once built and always handed out behind an
/// `Arc` from the process-wide registry.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    /// Package half of the type name (`std_msgs` of `std_msgs/String`).
    /// Empty for unqualified ad hoc types.
    pub package: String,
    /// Type half of the name (`String` of `std_msgs/String`).
    pub name: String,
    /// Full `pkg/Name` spelling presented to the registry and in headers.
    pub full_name: String,
    pub role: Role,
    pub fields: Vec<FieldDescriptor>,
    pub constants: Vec<ConstantDescriptor>,
    pub digest: Digest,
    /// The schema text this descriptor was parsed from, offered to peers as
    /// the optional `message_definition` header field.
    pub text: String,
}

impl MessageDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn constant(&self, name: &str) -> Option<&ConstantDescriptor> {
        self.constants.iter().find(|c| c.name == name)
    }

    /// Declared field names in wire order.
    pub fn field_order(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}
