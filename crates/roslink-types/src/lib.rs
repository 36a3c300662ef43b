//! `roslink-types` – shared vocabulary of the roslink workspace.
//!
//! Holds the workspace-wide [`RosError`] enum and the graph resource name
//! helpers that every other crate agrees on. Nothing in here performs I/O.

use thiserror::Error;

/// Global error type spanning schema resolution, registry traffic, wire
/// framing, and peer negotiation.
#[derive(Error, Debug)]
pub enum RosError {
    /// No schema text could be located for the requested type.
    #[error("schema not found for message type '{type_name}'")]
    SchemaNotFound { type_name: String },

    /// Schema text was located but a line failed to parse.
    #[error("schema parse error on line '{line}': {reason}")]
    SchemaParse { line: String, reason: String },

    /// The registry replied with something other than a
    /// `(status, message, value)` triple.
    #[error("master returned an invalid response: {0}")]
    InvalidResponse(String),

    /// The registry reported failure (status code <= 0).
    #[error("master error {code}: {message}")]
    Registry { code: i32, message: String },

    /// Malformed or truncated wire data.
    #[error("frame error: {0}")]
    Frame(String),

    /// A specific peer could not be negotiated with or connected to.
    #[error("peer '{uri}' unreachable: {reason}")]
    PeerUnreachable { uri: String, reason: String },

    /// XML-RPC transport or document failure.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The remote XML-RPC endpoint returned a declared fault.
    #[error("rpc fault {code}: {message}")]
    RpcFault { code: i32, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Canonicalize a topic/service/node name to a graph resource name by
/// prepending `/` when absent. Idempotent.
pub fn graph_resource_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

/// Strip the leading `/` from a graph resource name, the form peers use in
/// connection headers and `requestTopic` exchanges.
pub fn bare_resource_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_resource_name_prepends_slash() {
        assert_eq!(graph_resource_name("foo"), "/foo");
        assert_eq!(graph_resource_name("/foo"), "/foo");
    }

    #[test]
    fn graph_resource_name_is_idempotent() {
        let once = graph_resource_name("chatter");
        let twice = graph_resource_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn bare_resource_name_strips_one_slash() {
        assert_eq!(bare_resource_name("/chatter"), "chatter");
        assert_eq!(bare_resource_name("chatter"), "chatter");
    }

    #[test]
    fn registry_error_display_carries_code_and_message() {
        let err = RosError::Registry {
            code: 0,
            message: "boom".to_string(),
        };
        assert!(err.to_string().contains("boom"));
        assert!(err.to_string().contains('0'));
    }
}
