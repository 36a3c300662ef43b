//! `roslink-rpc` – the generic XML-RPC request/response transport.
//!
//! Deliberately knows nothing about ROS: it moves [`RpcValue`]s between
//! HTTP endpoints. The master client and every topic endpoint's embedded
//! slave server are built on top of it.
//!
//! # Modules
//!
//! - [`value`] – [`RpcValue`] and the XML document codec (`roxmltree`).
//! - [`client`] – [`RpcClient`] over `reqwest`.
//! - [`server`] – [`RpcServer`]: a minimal HTTP/1.1 POST loop on
//!   `tokio::net::TcpListener`, one task per connection.

pub mod client;
pub mod server;
pub mod value;

pub use client::RpcClient;
pub use server::{Handler, RpcServer, RpcServerBuilder};
pub use value::{
    RpcValue, decode_request, decode_response, encode_fault, encode_request, encode_response,
};
