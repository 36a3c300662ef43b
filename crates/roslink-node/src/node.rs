//! Node identity: a name, a master, and the factories that hang off them.
//!
//! A [`Node`] owns no sockets itself. Topics bind their own endpoints
//! lazily and service calls open short-lived connections, so the node is a
//! cheap handle that stamps its canonical name onto everything it creates.

use roslink_msg::MessageValue;
use roslink_types::{RosError, graph_resource_name};
use tracing::info;

use crate::master::MasterClient;
use crate::service;
use crate::topic::Topic;

/// A named participant in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    master: MasterClient,
    hostname: String,
}

impl Node {
    /// Node using the master URI and hostname from process environment.
    pub fn new(name: &str) -> Self {
        let name = graph_resource_name(name);
        let master = MasterClient::from_environment(&name);
        let hostname = crate::environment::hostname();
        info!(node = %name, master = %master.master_uri(), "node created");
        Self { name, master, hostname }
    }

    /// Node with an explicit master URI and advertised hostname.
    pub fn with_master_uri(name: &str, master_uri: &str, hostname: &str) -> Self {
        let name = graph_resource_name(name);
        let master = MasterClient::new(master_uri, &name);
        Self {
            name,
            master,
            hostname: hostname.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> &MasterClient {
        &self.master
    }

    /// Topic endpoint for `topic_name` carrying `type_name` messages. The
    /// type is resolved through the process-wide registry; registration
    /// with the master happens on first publish or subscribe.
    pub async fn topic(&self, topic_name: &str, type_name: &str) -> Result<Topic, RosError> {
        let descriptor = roslink_msg::get_message(type_name).await?;
        Ok(Topic::with_hostname(
            &self.name,
            topic_name,
            descriptor,
            self.master.clone(),
            self.hostname.clone(),
        ))
    }

    /// Call a service, resolving its response type from the request's.
    pub async fn call_service(
        &self,
        service_name: &str,
        request: MessageValue,
    ) -> Result<MessageValue, RosError> {
        let response_type =
            roslink_msg::get_service_response(&request.descriptor().full_name).await?;
        service::call(&self.master, &self.name, service_name, request, &response_type).await
    }
}
