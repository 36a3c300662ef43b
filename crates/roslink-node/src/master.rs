//! Master (registry) RPC client.
//!
//! Every call canonicalizes names to graph resource form, goes out over the
//! generic XML-RPC transport, and runs the shared
//! `(statusCode, statusMessage, value)` response convention exactly once,
//! in [`parse_master_response`].

use roslink_rpc::{RpcClient, RpcValue};
use roslink_types::{RosError, graph_resource_name};
use tracing::debug;

use crate::environment;

/// Typed client for the master's registration and lookup API.
#[derive(Debug, Clone)]
pub struct MasterClient {
    master_uri: String,
    caller_id: String,
    rpc: RpcClient,
}

impl MasterClient {
    /// Client against an explicit master URI. The caller id is
    /// canonicalized once here.
    pub fn new(master_uri: impl Into<String>, caller_id: &str) -> Self {
        Self {
            master_uri: master_uri.into(),
            caller_id: graph_resource_name(caller_id),
            rpc: RpcClient::new(),
        }
    }

    /// Client against the master resolved from `ROS_MASTER_URI`.
    pub fn from_environment(caller_id: &str) -> Self {
        Self::new(environment::master_uri(), caller_id)
    }

    pub fn master_uri(&self) -> &str {
        &self.master_uri
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    async fn call(&self, method: &str, params: Vec<RpcValue>) -> Result<RpcValue, RosError> {
        debug!(method, master = %self.master_uri, "master call");
        let raw = self.rpc.call(&self.master_uri, method, &params).await?;
        parse_master_response(raw)
    }

    /// `registerPublisher(callerId, topic, type, callerUri)`
    pub async fn register_publisher(
        &self,
        topic: &str,
        type_name: &str,
        caller_uri: &str,
    ) -> Result<RpcValue, RosError> {
        self.call(
            "registerPublisher",
            vec![
                RpcValue::from(self.caller_id.as_str()),
                RpcValue::from(graph_resource_name(topic)),
                RpcValue::from(type_name),
                RpcValue::from(caller_uri),
            ],
        )
        .await
    }

    /// `unregisterPublisher(callerId, topic, callerUri)`
    pub async fn unregister_publisher(
        &self,
        topic: &str,
        caller_uri: &str,
    ) -> Result<RpcValue, RosError> {
        self.call(
            "unregisterPublisher",
            vec![
                RpcValue::from(self.caller_id.as_str()),
                RpcValue::from(graph_resource_name(topic)),
                RpcValue::from(caller_uri),
            ],
        )
        .await
    }

    /// `registerSubscriber(callerId, topic, type, callerUri)`: the success
    /// value is the list of current publisher URIs for the topic.
    pub async fn register_subscriber(
        &self,
        topic: &str,
        type_name: &str,
        caller_uri: &str,
    ) -> Result<Vec<String>, RosError> {
        let value = self
            .call(
                "registerSubscriber",
                vec![
                    RpcValue::from(self.caller_id.as_str()),
                    RpcValue::from(graph_resource_name(topic)),
                    RpcValue::from(type_name),
                    RpcValue::from(caller_uri),
                ],
            )
            .await?;
        match value {
            RpcValue::Array(items) => Ok(items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()),
            // A master that returned only (status, message) yields no peers.
            RpcValue::Bool(_) => Ok(Vec::new()),
            other => Err(RosError::InvalidResponse(format!(
                "registerSubscriber value should be a URI list, got {other:?}"
            ))),
        }
    }

    /// `unregisterSubscriber(callerId, topic, callerUri)`
    pub async fn unregister_subscriber(
        &self,
        topic: &str,
        caller_uri: &str,
    ) -> Result<RpcValue, RosError> {
        self.call(
            "unregisterSubscriber",
            vec![
                RpcValue::from(self.caller_id.as_str()),
                RpcValue::from(graph_resource_name(topic)),
                RpcValue::from(caller_uri),
            ],
        )
        .await
    }

    /// `lookupService(callerId, service)`: the success value is the
    /// service's URI.
    pub async fn lookup_service(&self, service: &str) -> Result<String, RosError> {
        let value = self
            .call(
                "lookupService",
                vec![
                    RpcValue::from(self.caller_id.as_str()),
                    RpcValue::from(graph_resource_name(service)),
                ],
            )
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                RosError::InvalidResponse(format!(
                    "lookupService value should be a URI, got {value:?}"
                ))
            })
    }
}

/// Interpret the registry's `(statusCode, statusMessage, value)` triple.
///
/// Status codes <= 0 are errors carrying the code and message. On success,
/// a two-element response defaults the value to boolean true; with exactly
/// three elements the third is the value.
pub fn parse_master_response(response: RpcValue) -> Result<RpcValue, RosError> {
    let RpcValue::Array(items) = response else {
        return Err(RosError::InvalidResponse(
            "response is not an ordered sequence".to_string(),
        ));
    };
    if items.len() < 2 {
        return Err(RosError::InvalidResponse(format!(
            "response has {} elements, expected at least 2",
            items.len()
        )));
    }
    let Some(code) = items[0].as_i32() else {
        return Err(RosError::InvalidResponse(
            "status code is not an integer".to_string(),
        ));
    };
    if code <= 0 {
        let message = items[1].as_str().unwrap_or_default().to_string();
        return Err(RosError::Registry { code, message });
    }
    if items.len() == 3 {
        Ok(items.into_iter().nth(2).expect("third element present"))
    } else {
        Ok(RpcValue::Bool(true))
    }
}
