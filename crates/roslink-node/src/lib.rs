//! Node-side runtime: the wire codec, the master client, topic endpoints,
//! and service calls.
//!
//! The shape of a session: build a [`Node`], ask it for a [`Topic`], then
//! publish or subscribe. Registration with the master and the embedded
//! peer-facing RPC server are both lazy; nothing touches the network until
//! the first operation that needs it.

pub mod environment;
pub mod master;
pub mod node;
pub mod service;
pub mod tcpros;
pub mod topic;

pub use master::MasterClient;
pub use node::Node;
pub use tcpros::ConnectionHeader;
pub use topic::{Topic, TopicEvent};
