//! Service calls: one request, one response, one short-lived connection.
//!
//! The caller resolves the provider through the master, dials its
//! `rosrpc://host:port` address, exchanges handshake headers, sends the
//! framed request, and reads a status byte followed by the framed reply.
//! A zero status byte means the provider rejected the call; its frame then
//! carries an error message instead of a response body.

use std::sync::Arc;

use roslink_msg::{MessageDescriptor, MessageValue};
use roslink_types::{RosError, graph_resource_name};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::master::MasterClient;
use crate::tcpros::{self, ConnectionHeader};

/// Split a `rosrpc://host:port` service URI into its socket address.
pub fn service_address(uri: &str) -> Result<(String, u16), RosError> {
    let bad = || RosError::InvalidResponse(format!("malformed service URI: {uri}"));
    let rest = uri.strip_prefix("rosrpc://").ok_or_else(bad)?;
    let rest = rest.trim_end_matches('/');
    let (host, port) = rest.rsplit_once(':').ok_or_else(bad)?;
    if host.is_empty() {
        return Err(bad());
    }
    let port = port.parse::<u16>().map_err(|_| bad())?;
    Ok((host.to_string(), port))
}

/// Call `service` with `request`, decoding the reply as `response_type`.
pub async fn call(
    master: &MasterClient,
    caller_id: &str,
    service: &str,
    request: MessageValue,
    response_type: &Arc<MessageDescriptor>,
) -> Result<MessageValue, RosError> {
    let service = graph_resource_name(service);
    let uri = master.lookup_service(&service).await?;
    let (host, port) = service_address(&uri)?;
    debug!(service = %service, uri = %uri, "calling service");

    let mut stream = TcpStream::connect((host.as_str(), port)).await?;

    let header = ConnectionHeader::for_service(caller_id, &service, request.descriptor());
    stream.write_all(&tcpros::encode_header(&header)).await?;
    let peer_header = tcpros::read_frame(&mut stream).await?;
    tcpros::decode_header_entries(&peer_header)?;

    stream.write_all(&tcpros::encode_message(&request)?).await?;

    // One status byte precedes the reply frame.
    let mut status = [0u8; 1];
    stream.read_exact(&mut status).await?;
    let payload = tcpros::read_frame(&mut stream).await?;
    if status[0] == 0 {
        return Err(RosError::Rpc(format!(
            "service {service} failed: {}",
            error_text(&payload)
        )));
    }
    tcpros::decode_message_body(&payload, response_type)
}

/// A failure frame carries one length-prefixed text entry; fall back to the
/// raw bytes if the prefix does not line up.
fn error_text(payload: &[u8]) -> String {
    if payload.len() >= 4 {
        let len = u32::from_le_bytes(payload[..4].try_into().expect("4-byte slice")) as usize;
        if len == payload.len() - 4 {
            return String::from_utf8_lossy(&payload[4..]).into_owned();
        }
    }
    String::from_utf8_lossy(payload).into_owned()
}
