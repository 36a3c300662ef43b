//! TCPROS wire codec.
//!
//! Pure encode/decode over byte buffers; no I/O. Both the connection
//! handshake header and message bodies share one framing structure: a
//! 4-byte little-endian total length followed by length-prefixed entries.
//! Peers reject frames whose declared and actual lengths disagree, so every
//! byte count here is exact.

use std::sync::Arc;

use roslink_msg::{
    ArraySpec, FieldDescriptor, FieldKind, MessageDescriptor, MessageValue, PrimitiveType, Value,
};
use roslink_types::RosError;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Upper bound on a single wire frame; larger declared lengths are treated
/// as corruption rather than allocated.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Handshake metadata exchanged once per peer socket, before any payload
/// frame. Only present fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionHeader {
    pub caller_id: Option<String>,
    pub topic: Option<String>,
    pub service: Option<String>,
    pub type_name: Option<String>,
    pub md5sum: Option<String>,
    pub message_definition: Option<String>,
    pub latching: Option<i32>,
}

impl ConnectionHeader {
    /// Header a node presents for `topic` traffic with type `descriptor`.
    pub fn for_topic(caller_id: &str, topic: &str, descriptor: &MessageDescriptor) -> Self {
        Self {
            caller_id: Some(caller_id.to_string()),
            topic: Some(topic.to_string()),
            type_name: Some(descriptor.full_name.clone()),
            md5sum: Some(descriptor.digest.to_hex()),
            message_definition: Some(descriptor.text.clone()),
            ..Self::default()
        }
    }

    /// Header a node presents when calling `service`. The request
    /// descriptor supplies the type identity.
    pub fn for_service(caller_id: &str, service: &str, request: &MessageDescriptor) -> Self {
        Self {
            caller_id: Some(caller_id.to_string()),
            service: Some(service.to_string()),
            type_name: Some(request.full_name.clone()),
            md5sum: Some(request.digest.to_hex()),
            ..Self::default()
        }
    }
}

/// Read one length-prefixed frame off a stream, returning the payload
/// without its prefix.
pub async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, RosError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(frame_err(format!("frame of {len} bytes exceeds limit")));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

fn frame_err(reason: impl Into<String>) -> RosError {
    RosError::Frame(reason.into())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u32(&mut self) -> Result<u32, RosError> {
        if self.remaining() < 4 {
            return Err(frame_err("truncated length prefix"));
        }
        let v = u32::from_le_bytes(
            self.buf[self.pos..self.pos + 4]
                .try_into()
                .expect("4-byte slice"),
        );
        self.pos += 4;
        Ok(v)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], RosError> {
        if self.remaining() < n {
            return Err(frame_err(format!(
                "declared {n} bytes but only {} remain",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

fn push_entry(out: &mut Vec<u8>, entry: &str) {
    out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
    out.extend_from_slice(entry.as_bytes());
}

/// Encode a connection header: total-length prefix, then one
/// length-prefixed `key=value` entry per present field.
pub fn encode_header(header: &ConnectionHeader) -> Vec<u8> {
    let mut entries = Vec::new();
    let mut push = |key: &str, value: &Option<String>| {
        if let Some(v) = value {
            entries.push(format!("{key}={v}"));
        }
    };
    push("callerid", &header.caller_id);
    push("topic", &header.topic);
    push("service", &header.service);
    push("type", &header.type_name);
    push("md5sum", &header.md5sum);
    push("message_definition", &header.message_definition);
    if let Some(latching) = header.latching {
        entries.push(format!("latching={latching}"));
    }

    let body_len: usize = entries.iter().map(|e| 4 + e.len()).sum();
    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    for entry in &entries {
        push_entry(&mut out, entry);
    }
    out
}

/// Decode the `key=value` entries of a header whose total-length prefix has
/// already been consumed. Unrecognized keys are ignored.
pub fn decode_header_entries(payload: &[u8]) -> Result<ConnectionHeader, RosError> {
    let mut cursor = Cursor::new(payload);
    let mut header = ConnectionHeader::default();
    while cursor.remaining() > 0 {
        let len = cursor.read_u32()? as usize;
        let entry = cursor.read_bytes(len)?;
        let entry = std::str::from_utf8(entry)
            .map_err(|e| frame_err(format!("non-utf8 header entry: {e}")))?;
        // Values may themselves contain '='; split on the first one only.
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        match key {
            "callerid" => header.caller_id = Some(value.to_string()),
            "topic" => header.topic = Some(value.to_string()),
            "service" => header.service = Some(value.to_string()),
            "type" => header.type_name = Some(value.to_string()),
            "md5sum" => header.md5sum = Some(value.to_string()),
            "message_definition" => header.message_definition = Some(value.to_string()),
            "latching" => {
                header.latching = Some(
                    value
                        .parse()
                        .map_err(|e| frame_err(format!("bad latching value: {e}")))?,
                );
            }
            _ => {}
        }
    }
    Ok(header)
}

/// Decode a complete header buffer, length prefix included.
pub fn decode_header(buf: &[u8]) -> Result<ConnectionHeader, RosError> {
    let mut cursor = Cursor::new(buf);
    let len = cursor.read_u32()? as usize;
    decode_header_entries(cursor.read_bytes(len)?)
}

fn serialize_scalar(ty: PrimitiveType, value: &Value) -> Result<String, RosError> {
    match (ty, value) {
        (PrimitiveType::Bool, Value::Bool(b)) => Ok(if *b { "1" } else { "0" }.to_string()),
        (PrimitiveType::String, Value::Str(s)) => Ok(s.clone()),
        (t, Value::Int(i)) if t.is_integer() || t == PrimitiveType::Time || t == PrimitiveType::Duration => {
            Ok(i.to_string())
        }
        (t, Value::Float(x)) if t.is_float() => Ok(x.to_string()),
        (t, v) => Err(frame_err(format!(
            "field of type {} cannot carry {v:?}",
            t.name()
        ))),
    }
}

fn parse_scalar(ty: PrimitiveType, text: &str) -> Result<Value, RosError> {
    match ty {
        PrimitiveType::Bool => match text {
            "0" => Ok(Value::Bool(false)),
            "1" => Ok(Value::Bool(true)),
            other => Err(frame_err(format!("bad bool '{other}'"))),
        },
        PrimitiveType::String => Ok(Value::Str(text.to_string())),
        t if t.is_float() => text
            .parse()
            .map(Value::Float)
            .map_err(|e| frame_err(format!("bad float '{text}': {e}"))),
        _ => text
            .parse()
            .map(Value::Int)
            .map_err(|e| frame_err(format!("bad integer '{text}': {e}"))),
    }
}

/// Serialize one field value to its wire bytes (without length prefix).
///
/// Primitives travel as ASCII text, arrays of primitives as comma-joined
/// text, nested messages as their own framed body.
fn serialize_field(field: &FieldDescriptor, value: &Value) -> Result<Vec<u8>, RosError> {
    if field.array != ArraySpec::None {
        let Value::Array(items) = value else {
            return Err(frame_err(format!("field '{}' expects an array", field.name)));
        };
        let FieldKind::Primitive(ty) = field.kind else {
            return Err(frame_err("message arrays are not supported on the wire"));
        };
        let parts = items
            .iter()
            .map(|item| serialize_scalar(ty, item))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(parts.join(",").into_bytes());
    }
    match &field.kind {
        FieldKind::Message(_) => {
            let Value::Message(nested) = value else {
                return Err(frame_err(format!("field '{}' expects a message", field.name)));
            };
            encode_message(nested)
        }
        FieldKind::Primitive(ty) => Ok(serialize_scalar(*ty, value)?.into_bytes()),
    }
}

fn parse_field(field: &FieldDescriptor, bytes: &[u8]) -> Result<Value, RosError> {
    if field.array != ArraySpec::None {
        let FieldKind::Primitive(ty) = field.kind else {
            return Err(frame_err("message arrays are not supported on the wire"));
        };
        let text = std::str::from_utf8(bytes)
            .map_err(|e| frame_err(format!("non-utf8 array field: {e}")))?;
        if text.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        let items = text
            .split(',')
            .map(|part| parse_scalar(ty, part))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(items));
    }
    match &field.kind {
        FieldKind::Message(nested) => Ok(Value::Message(decode_message(bytes, nested)?)),
        FieldKind::Primitive(ty) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| frame_err(format!("non-utf8 field: {e}")))?;
            parse_scalar(*ty, text)
        }
    }
}

/// Encode a message body: total-length prefix, then each field in declared
/// order as a length-prefixed entry.
pub fn encode_message(message: &MessageValue) -> Result<Vec<u8>, RosError> {
    let descriptor = message.descriptor();
    let mut entries = Vec::with_capacity(descriptor.fields.len());
    for field in &descriptor.fields {
        let value = message.get(&field.name).ok_or_else(|| {
            frame_err(format!("message is missing declared field '{}'", field.name))
        })?;
        entries.push(serialize_field(field, value)?);
    }

    let body_len: usize = entries.iter().map(|e| 4 + e.len()).sum();
    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    for entry in &entries {
        out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        out.extend_from_slice(entry);
    }
    Ok(out)
}

/// Decode message field entries whose total-length prefix has already been
/// consumed. Trailing declared fields absent from the buffer keep their
/// defaults.
pub fn decode_message_body(
    payload: &[u8],
    descriptor: &Arc<MessageDescriptor>,
) -> Result<MessageValue, RosError> {
    let mut cursor = Cursor::new(payload);
    let mut message = MessageValue::new(descriptor.clone());
    for field in &descriptor.fields {
        if cursor.remaining() == 0 {
            break;
        }
        let len = cursor.read_u32()? as usize;
        let bytes = cursor.read_bytes(len)?;
        message.set(field.name.clone(), parse_field(field, bytes)?);
    }
    Ok(message)
}

/// Decode a message buffer, skipping a leading connection-header block when
/// one is present.
///
/// The leading length is taken as a header length if a second
/// length-prefixed block still fits within the buffer after it; otherwise
/// the buffer is a bare message frame.
pub fn decode_message(
    buf: &[u8],
    descriptor: &Arc<MessageDescriptor>,
) -> Result<MessageValue, RosError> {
    let mut cursor = Cursor::new(buf);
    let first_len = cursor.read_u32()? as usize;
    let body_len = if first_len < buf.len().saturating_sub(4) {
        // Header block first: skip it and re-read the message length.
        cursor.read_bytes(first_len)?;
        cursor.read_u32()? as usize
    } else {
        first_len
    };
    decode_message_body(cursor.read_bytes(body_len)?, descriptor)
}

/// Encode a connection header immediately followed by a message body, the
/// first frame a publisher sends on a new connection.
pub fn encode_publish(
    header: &ConnectionHeader,
    message: &MessageValue,
) -> Result<Vec<u8>, RosError> {
    let mut out = encode_header(header);
    out.extend_from_slice(&encode_message(message)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roslink_msg::{Role, TypeRegistry};
    use std::collections::HashMap;

    async fn descriptor(schema: &str) -> Arc<MessageDescriptor> {
        let reg = TypeRegistry::new();
        reg.register_schema("wire_msgs/Test", schema);
        reg.resolve("wire_msgs/Test", Role::Message).await.unwrap()
    }

    fn header() -> ConnectionHeader {
        ConnectionHeader {
            caller_id: Some("/talker".to_string()),
            topic: Some("/chatter".to_string()),
            type_name: Some("std_msgs/String".to_string()),
            md5sum: Some("992ce8a1687cec8c8bd883ec73ca41d1".to_string()),
            ..ConnectionHeader::default()
        }
    }

    #[test]
    fn header_round_trip() {
        let h = header();
        let decoded = decode_header(&encode_header(&h)).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn header_skips_absent_fields_and_unknown_keys() {
        let h = ConnectionHeader {
            caller_id: Some("/n".to_string()),
            ..ConnectionHeader::default()
        };
        let encoded = encode_header(&h);
        // One entry only: 4 (prefix) + 4 (entry len) + len("callerid=/n").
        assert_eq!(encoded.len(), 4 + 4 + "callerid=/n".len());

        // Splice in an unrecognized entry; decode must ignore it.
        let mut raw = Vec::new();
        let entries = [b"callerid=/n".as_slice(), b"tcp_nodelay=1".as_slice()];
        let body_len: usize = entries.iter().map(|e| 4 + e.len()).sum();
        raw.extend_from_slice(&(body_len as u32).to_le_bytes());
        for e in entries {
            raw.extend_from_slice(&(e.len() as u32).to_le_bytes());
            raw.extend_from_slice(e);
        }
        let decoded = decode_header(&raw).unwrap();
        assert_eq!(decoded.caller_id.as_deref(), Some("/n"));
    }

    #[test]
    fn header_latching_parses_as_integer() {
        let h = ConnectionHeader {
            latching: Some(1),
            ..ConnectionHeader::default()
        };
        let decoded = decode_header(&encode_header(&h)).unwrap();
        assert_eq!(decoded.latching, Some(1));
    }

    #[test]
    fn header_value_may_contain_equals() {
        let h = ConnectionHeader {
            message_definition: Some("int32 LIMIT=7".to_string()),
            ..ConnectionHeader::default()
        };
        let decoded = decode_header(&encode_header(&h)).unwrap();
        assert_eq!(decoded.message_definition.as_deref(), Some("int32 LIMIT=7"));
    }

    #[test]
    fn truncated_header_is_frame_error() {
        let h = header();
        let mut encoded = encode_header(&h);
        encoded.truncate(encoded.len() - 3);
        assert!(matches!(decode_header(&encoded), Err(RosError::Frame(_))));
    }

    #[tokio::test]
    async fn message_round_trip_strings() {
        let d = descriptor("string greeting\nstring name\n").await;
        let mut overrides = HashMap::new();
        overrides.insert("greeting".to_string(), Value::Str("hello".to_string()));
        overrides.insert("name".to_string(), Value::Str("world".to_string()));
        let m = MessageValue::with_values(d.clone(), overrides);

        let decoded = decode_message(&encode_message(&m).unwrap(), &d).unwrap();
        assert_eq!(decoded, m);
    }

    #[tokio::test]
    async fn message_round_trip_mixed_primitives() {
        let d = descriptor("int32 count\nfloat64 ratio\nbool flag\nstring label\n").await;
        let mut overrides = HashMap::new();
        overrides.insert("count".to_string(), Value::Int(-5));
        overrides.insert("ratio".to_string(), Value::Float(2.5));
        overrides.insert("flag".to_string(), Value::Bool(true));
        overrides.insert("label".to_string(), Value::Str("ok".to_string()));
        let m = MessageValue::with_values(d.clone(), overrides);

        let decoded = decode_message(&encode_message(&m).unwrap(), &d).unwrap();
        assert_eq!(decoded, m);
    }

    #[tokio::test]
    async fn message_round_trip_primitive_array() {
        let d = descriptor("int32[] values\n").await;
        let mut overrides = HashMap::new();
        overrides.insert(
            "values".to_string(),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
        let m = MessageValue::with_values(d.clone(), overrides);
        let decoded = decode_message(&encode_message(&m).unwrap(), &d).unwrap();
        assert_eq!(decoded, m);

        let empty = MessageValue::new(d.clone());
        let decoded = decode_message(&encode_message(&empty).unwrap(), &d).unwrap();
        assert_eq!(decoded.get("values"), Some(&Value::Array(Vec::new())));
    }

    #[tokio::test]
    async fn message_round_trip_nested() {
        let reg = TypeRegistry::new();
        reg.register_schema("std_msgs/Header", "uint32 seq\ntime stamp\nstring frame_id\n");
        reg.register_schema("wire_msgs/Stamped", "Header header\nstring payload\n");
        let d = reg.resolve("wire_msgs/Stamped", Role::Message).await.unwrap();

        let mut m = MessageValue::new(d.clone());
        m.set("payload", Value::Str("data".to_string()));
        let decoded = decode_message(&encode_message(&m).unwrap(), &d).unwrap();
        assert_eq!(decoded, m);
    }

    #[tokio::test]
    async fn combined_header_and_body_decodes() {
        let d = descriptor("string data\n").await;
        let mut m = MessageValue::new(d.clone());
        m.set("data", Value::Str("payload".to_string()));

        let combined = encode_publish(&header(), &m).unwrap();
        let decoded = decode_message(&combined, &d).unwrap();
        assert_eq!(decoded.get("data"), Some(&Value::Str("payload".to_string())));
    }

    #[tokio::test]
    async fn truncated_message_is_frame_error() {
        let d = descriptor("string data\n").await;
        let mut m = MessageValue::new(d.clone());
        m.set("data", Value::Str("payload".to_string()));
        let mut encoded = encode_message(&m).unwrap();
        encoded.truncate(6);
        assert!(matches!(decode_message(&encoded, &d), Err(RosError::Frame(_))));
    }

    #[tokio::test]
    async fn empty_buffer_is_frame_error() {
        let d = descriptor("string data\n").await;
        assert!(matches!(decode_message(&[], &d), Err(RosError::Frame(_))));
    }
}
