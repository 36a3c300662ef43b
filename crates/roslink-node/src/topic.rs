//! Topic endpoint: registration, the peer-facing slave API, and the live
//! publisher/subscriber socket connections.
//!
//! One [`Topic`] drives one named data stream. The endpoint binds lazily:
//! the first operation that needs this node's own address starts the
//! embedded XML-RPC slave server on a free port, and every later caller
//! reuses it. Publisher and subscriber roles are tracked independently, so
//! one endpoint may do both.
//!
//! Lifecycle is reported as [`TopicEvent`]s over a broadcast channel;
//! dropping a receiver unsubscribes it. Received messages flow over their
//! own broadcast channel, handed out by [`Topic::subscribe`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use roslink_msg::{MessageDescriptor, MessageValue};
use roslink_rpc::{RpcClient, RpcServer, RpcServerBuilder, RpcValue};
use roslink_types::{RosError, graph_resource_name};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OnceCell, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::master::{MasterClient, parse_master_response};
use crate::tcpros::{self, ConnectionHeader};

/// The single transport this protocol family negotiates.
pub const TRANSPORT: &str = "TCPROS";

const EVENT_CAPACITY: usize = 64;
const MESSAGE_CAPACITY: usize = 256;

/// Closed set of lifecycle events a topic endpoint emits.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    RegisteredPublisher,
    RegisteredSubscriber { publisher_uris: Vec<String> },
    UnregisteredPublisher,
    UnregisteredSubscriber,
    /// A peer completed the wire handshake against our outbound listener;
    /// any deferred publishes have been flushed to it.
    PublisherReady,
    Error(String),
}

struct OutboundPeer {
    tx: mpsc::UnboundedSender<MessageValue>,
    task: JoinHandle<()>,
}

struct InboundPeer {
    task: JoinHandle<()>,
}

#[derive(Default)]
struct TopicState {
    /// Live publisher-side connections, keyed by our per-peer listener
    /// address.
    outbound: HashMap<String, OutboundPeer>,
    /// Live subscriber-side connections, keyed by the peer's slave URI.
    inbound: HashMap<String, InboundPeer>,
    /// Messages published before the first peer connection existed.
    pending: Vec<MessageValue>,
    publisher_registered: bool,
    subscriber_registered: bool,
    /// Bumped on every unregister; late negotiation callbacks compare it
    /// and discard their connection instead of repopulating state.
    generation: u64,
}

struct SlaveEndpoint {
    uri: String,
    _server: RpcServer,
}

struct TopicInner {
    node_name: String,
    topic_name: String,
    descriptor: Arc<MessageDescriptor>,
    master: MasterClient,
    hostname: String,
    rpc: RpcClient,
    slave: OnceCell<SlaveEndpoint>,
    state: Mutex<TopicState>,
    events: broadcast::Sender<TopicEvent>,
    messages: broadcast::Sender<MessageValue>,
}

impl TopicInner {
    fn emit(&self, event: TopicEvent) {
        // No listeners is a normal condition.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TopicState> {
        self.state.lock().expect("topic state lock poisoned")
    }
}

impl Drop for TopicInner {
    fn drop(&mut self) {
        let mut state = self.state.lock().expect("topic state lock poisoned");
        for (_, peer) in state.outbound.drain() {
            peer.task.abort();
        }
        for (_, peer) in state.inbound.drain() {
            peer.task.abort();
        }
    }
}

/// A named, typed data channel bound to one node. Clone freely; clones
/// share the endpoint.
#[derive(Clone)]
pub struct Topic {
    inner: Arc<TopicInner>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("node_name", &self.inner.node_name)
            .field("topic_name", &self.inner.topic_name)
            .finish_non_exhaustive()
    }
}

impl Topic {
    /// Endpoint advertising the address from process environment.
    pub fn new(
        node_name: &str,
        topic_name: &str,
        descriptor: Arc<MessageDescriptor>,
        master: MasterClient,
    ) -> Self {
        Self::with_hostname(
            node_name,
            topic_name,
            descriptor,
            master,
            crate::environment::hostname(),
        )
    }

    /// Endpoint advertising an explicit host address.
    pub fn with_hostname(
        node_name: &str,
        topic_name: &str,
        descriptor: Arc<MessageDescriptor>,
        master: MasterClient,
        hostname: String,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (messages, _) = broadcast::channel(MESSAGE_CAPACITY);
        Self {
            inner: Arc::new(TopicInner {
                node_name: graph_resource_name(node_name),
                topic_name: graph_resource_name(topic_name),
                descriptor,
                master,
                hostname,
                rpc: RpcClient::new(),
                slave: OnceCell::new(),
                state: Mutex::new(TopicState::default()),
                events,
                messages,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.topic_name
    }

    pub fn message_type(&self) -> &Arc<MessageDescriptor> {
        &self.inner.descriptor
    }

    /// Lifecycle event stream. Dropping the receiver unsubscribes.
    pub fn events(&self) -> broadcast::Receiver<TopicEvent> {
        self.inner.events.subscribe()
    }

    /// This endpoint's own slave URI, binding the embedded RPC server on
    /// first use. Concurrent first callers share one bind.
    pub async fn uri(&self) -> Result<String, RosError> {
        let endpoint = self
            .inner
            .slave
            .get_or_try_init(|| async {
                let server = build_slave_server(&self.inner).await?;
                let uri = server.url();
                info!(topic = %self.inner.topic_name, uri = %uri, "slave endpoint bound");
                Ok::<_, RosError>(SlaveEndpoint { uri, _server: server })
            })
            .await?;
        Ok(endpoint.uri.clone())
    }

    /// Peer slave URIs currently connected on the subscriber side.
    pub fn inbound_peers(&self) -> Vec<String> {
        self.inner.lock().inbound.keys().cloned().collect()
    }

    /// Listener addresses currently serving subscribers of this topic.
    pub fn outbound_peers(&self) -> Vec<String> {
        self.inner.lock().outbound.keys().cloned().collect()
    }

    /// Register this endpoint as a publisher with the master.
    pub async fn register_publisher(&self) -> Result<(), RosError> {
        let uri = self.uri().await?;
        match self
            .inner
            .master
            .register_publisher(&self.inner.topic_name, &self.inner.descriptor.full_name, &uri)
            .await
        {
            Ok(_) => {
                self.inner.lock().publisher_registered = true;
                info!(topic = %self.inner.topic_name, "registered publisher");
                self.inner.emit(TopicEvent::RegisteredPublisher);
                Ok(())
            }
            Err(e) => {
                self.inner.emit(TopicEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Register as a subscriber and negotiate a connection to every
    /// publisher the master reports. Per-peer negotiation failures are
    /// logged and skipped; they never fail the registration.
    pub async fn register_subscriber(&self) -> Result<Vec<String>, RosError> {
        let uri = self.uri().await?;
        match self
            .inner
            .master
            .register_subscriber(&self.inner.topic_name, &self.inner.descriptor.full_name, &uri)
            .await
        {
            Ok(publisher_uris) => {
                self.inner.lock().subscriber_registered = true;
                info!(
                    topic = %self.inner.topic_name,
                    publishers = publisher_uris.len(),
                    "registered subscriber"
                );
                self.inner.emit(TopicEvent::RegisteredSubscriber {
                    publisher_uris: publisher_uris.clone(),
                });
                connect_to_publishers(&self.inner, &publisher_uris).await;
                Ok(publisher_uris)
            }
            Err(e) => {
                self.inner.emit(TopicEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Publish a message to every connected peer. With no connections yet,
    /// the message is held back and flushed when the first peer completes
    /// the handshake (registration is triggered if still missing).
    pub async fn publish(&self, message: MessageValue) -> Result<(), RosError> {
        let needs_registration = {
            let mut state = self.inner.lock();
            if state.outbound.is_empty() {
                state.pending.push(message);
                !state.publisher_registered
            } else {
                for peer in state.outbound.values() {
                    let _ = peer.tx.send(message.clone());
                }
                false
            }
        };
        if needs_registration {
            self.register_publisher().await?;
        }
        Ok(())
    }

    /// Start receiving messages, registering with the master on first use.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<MessageValue>, RosError> {
        let receiver = self.inner.messages.subscribe();
        let already = self.inner.lock().subscriber_registered;
        if !already {
            self.register_subscriber().await?;
        }
        Ok(receiver)
    }

    /// Tear down the publisher role: close every outbound connection, drop
    /// deferred messages, and tell the master. With nothing registered the
    /// completion event fires without a network round-trip.
    pub async fn unregister_publisher(&self) -> Result<(), RosError> {
        let was_registered = {
            let mut state = self.inner.lock();
            let was = state.publisher_registered;
            for (_, peer) in state.outbound.drain() {
                peer.task.abort();
            }
            state.pending.clear();
            state.publisher_registered = false;
            state.generation += 1;
            was
        };
        if was_registered {
            let uri = self.uri().await?;
            if let Err(e) = self
                .inner
                .master
                .unregister_publisher(&self.inner.topic_name, &uri)
                .await
            {
                self.inner.emit(TopicEvent::Error(e.to_string()));
                return Err(e);
            }
        }
        self.inner.emit(TopicEvent::UnregisteredPublisher);
        Ok(())
    }

    /// Tear down the subscriber role, symmetric to
    /// [`Topic::unregister_publisher`].
    pub async fn unregister_subscriber(&self) -> Result<(), RosError> {
        let was_registered = {
            let mut state = self.inner.lock();
            let was = state.subscriber_registered;
            for (_, peer) in state.inbound.drain() {
                peer.task.abort();
            }
            state.subscriber_registered = false;
            state.generation += 1;
            was
        };
        if was_registered {
            let uri = self.uri().await?;
            if let Err(e) = self
                .inner
                .master
                .unregister_subscriber(&self.inner.topic_name, &uri)
                .await
            {
                self.inner.emit(TopicEvent::Error(e.to_string()));
                return Err(e);
            }
        }
        self.inner.emit(TopicEvent::UnregisteredSubscriber);
        Ok(())
    }
}

fn triple(code: i32, message: &str, value: RpcValue) -> RpcValue {
    RpcValue::Array(vec![RpcValue::Int(code), RpcValue::from(message), value])
}

/// Register the ten slave API methods and bind the server. Handlers hold a
/// `Weak` back-reference so a dropped topic cannot be resurrected by a
/// late RPC.
async fn build_slave_server(inner: &Arc<TopicInner>) -> Result<RpcServer, RosError> {
    fn with_topic<F>(
        weak: &Weak<TopicInner>,
        handler: F,
    ) -> impl Fn(Vec<RpcValue>) -> futures_util::future::BoxFuture<'static, Result<RpcValue, RosError>>
    + Send
    + Sync
    + 'static
    where
        F: Fn(Arc<TopicInner>, Vec<RpcValue>) -> futures_util::future::BoxFuture<'static, Result<RpcValue, RosError>>
            + Send
            + Sync
            + Copy
            + 'static,
    {
        let weak = weak.clone();
        move |params| -> futures_util::future::BoxFuture<'static, Result<RpcValue, RosError>> {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return Err(RosError::Rpc("topic endpoint shut down".to_string()));
                };
                handler(inner, params).await
            })
        }
    }

    let weak = Arc::downgrade(inner);
    let builder = RpcServerBuilder::new()
        .register(
            "requestTopic",
            with_topic(&weak, |inner, params| {
                Box::pin(async move { handle_request_topic(&inner, params).await })
            }),
        )
        .register(
            "publisherUpdate",
            with_topic(&weak, |inner, params| {
                Box::pin(async move { handle_publisher_update(&inner, params) })
            }),
        )
        .register(
            "getBusStats",
            with_topic(&weak, |_inner, _params| {
                Box::pin(async { Ok(triple(1, "", RpcValue::Array(Vec::new()))) })
            }),
        )
        .register(
            "getBusInfo",
            with_topic(&weak, |_inner, _params| {
                Box::pin(async { Ok(triple(1, "", RpcValue::Array(Vec::new()))) })
            }),
        )
        .register(
            "getMasterUri",
            with_topic(&weak, |inner, _params| {
                Box::pin(async move {
                    Ok(triple(1, "", RpcValue::from(inner.master.master_uri())))
                })
            }),
        )
        .register(
            "shutdown",
            with_topic(&weak, |_inner, params| {
                Box::pin(async move {
                    let reason = params
                        .first()
                        .and_then(|p| p.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Ok(triple(1, "shutdown notice received", RpcValue::from(reason)))
                })
            }),
        )
        .register(
            "getPid",
            with_topic(&weak, |_inner, _params| {
                Box::pin(async { Ok(triple(1, "", RpcValue::Int(std::process::id() as i32))) })
            }),
        )
        .register(
            "getSubscriptions",
            with_topic(&weak, |inner, _params| {
                Box::pin(async move {
                    let mut subscriptions = Vec::new();
                    if inner.lock().subscriber_registered {
                        subscriptions.push(RpcValue::Array(vec![
                            RpcValue::from(inner.topic_name.as_str()),
                            RpcValue::from(inner.descriptor.full_name.as_str()),
                        ]));
                    }
                    Ok(triple(1, "", RpcValue::Array(subscriptions)))
                })
            }),
        )
        .register(
            "getPublications",
            with_topic(&weak, |inner, _params| {
                Box::pin(async move {
                    let mut publications = Vec::new();
                    if inner.lock().publisher_registered {
                        publications.push(RpcValue::Array(vec![
                            RpcValue::from(inner.topic_name.as_str()),
                            RpcValue::from(inner.descriptor.full_name.as_str()),
                        ]));
                    }
                    Ok(triple(1, "", RpcValue::Array(publications)))
                })
            }),
        )
        .register(
            "paramUpdate",
            with_topic(&weak, |_inner, _params| {
                // Always reports success without validating content.
                Box::pin(async { Ok(triple(1, "", RpcValue::Int(0))) })
            }),
        );
    builder.bind(&inner.hostname).await
}

/// Slave `requestTopic`: allocate a listener for the caller, reply with the
/// single supported transport and our host/port.
async fn handle_request_topic(
    inner: &Arc<TopicInner>,
    _params: Vec<RpcValue>,
) -> Result<RpcValue, RosError> {
    let listener = TcpListener::bind((inner.hostname.as_str(), 0)).await?;
    let port = listener.local_addr()?.port();
    let key = format!("tcpros://{}:{}", inner.hostname, port);
    let (tx, rx) = mpsc::unbounded_channel();

    let generation = inner.lock().generation;
    let task = tokio::spawn(run_outbound(
        Arc::downgrade(inner),
        listener,
        rx,
        key.clone(),
        generation,
    ));
    {
        let mut state = inner.lock();
        if state.generation != generation {
            task.abort();
            return Ok(triple(0, "topic is unregistering", RpcValue::Int(0)));
        }
        state.outbound.insert(key.clone(), OutboundPeer { tx, task });
    }
    debug!(topic = %inner.topic_name, listener = %key, "opened outbound listener");

    Ok(triple(
        1,
        &format!("ready on {key}"),
        RpcValue::Array(vec![
            RpcValue::from(TRANSPORT),
            RpcValue::from(inner.hostname.as_str()),
            RpcValue::Int(i32::from(port)),
        ]),
    ))
}

/// Slave `publisherUpdate`: negotiate with any newly listed peer. The
/// negotiation runs detached so the master gets its reply immediately.
fn handle_publisher_update(
    inner: &Arc<TopicInner>,
    params: Vec<RpcValue>,
) -> Result<RpcValue, RosError> {
    let uris: Vec<String> = params
        .get(2)
        .and_then(|p| p.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        if let Some(inner) = weak.upgrade() {
            connect_to_publishers(&inner, &uris).await;
        }
    });
    Ok(triple(1, "", RpcValue::Int(0)))
}

/// Negotiate with every listed publisher we are not already connected to.
/// Failures are per-peer: logged, skipped, no retry.
async fn connect_to_publishers(inner: &Arc<TopicInner>, publisher_uris: &[String]) {
    let generation = inner.lock().generation;
    for uri in publisher_uris {
        let already_connected = inner.lock().inbound.contains_key(uri);
        if already_connected {
            continue;
        }
        if let Err(e) = connect_to_publisher(inner, uri, generation).await {
            warn!(topic = %inner.topic_name, peer = %uri, error = %e, "skipping publisher");
        }
    }
}

async fn connect_to_publisher(
    inner: &Arc<TopicInner>,
    uri: &str,
    generation: u64,
) -> Result<(), RosError> {
    let unreachable = |reason: String| RosError::PeerUnreachable {
        uri: uri.to_string(),
        reason,
    };

    // Offer our one transport; the peer answers with (host, port).
    let params = [
        RpcValue::from(inner.node_name.as_str()),
        RpcValue::from(inner.topic_name.as_str()),
        RpcValue::Array(vec![RpcValue::Array(vec![RpcValue::from(TRANSPORT)])]),
    ];
    let response = inner
        .rpc
        .call(uri, "requestTopic", &params)
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    let value = parse_master_response(response).map_err(|e| unreachable(e.to_string()))?;

    let endpoint = value.as_array().filter(|items| items.len() == 3);
    let (host, port) = match endpoint {
        Some([_proto, host, port]) => match (host.as_str(), port.as_i32()) {
            (Some(h), Some(p)) => (h.to_string(), p as u16),
            _ => return Err(unreachable("malformed transport endpoint".to_string())),
        },
        _ => return Err(unreachable("malformed requestTopic reply".to_string())),
    };

    let mut stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| unreachable(e.to_string()))?;

    // Handshake: our header out, the publisher's header back.
    let header =
        ConnectionHeader::for_topic(&inner.node_name, &inner.topic_name, &inner.descriptor);
    stream
        .write_all(&tcpros::encode_header(&header))
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    let payload = tcpros::read_frame(&mut stream)
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    let remote = tcpros::decode_header_entries(&payload)?;
    if let Some(md5) = &remote.md5sum {
        let ours = inner.descriptor.digest.to_hex();
        if *md5 != ours {
            return Err(unreachable(format!(
                "type digest mismatch: peer {md5}, ours {ours}"
            )));
        }
    }

    let key = uri.to_string();
    let task = tokio::spawn(run_inbound(Arc::downgrade(inner), stream, key.clone()));
    let mut state = inner.lock();
    // Unregistered while we negotiated, or a concurrent negotiation for
    // the same peer won: this connection must not enter the map.
    if state.generation != generation || state.inbound.contains_key(&key) {
        task.abort();
        return Ok(());
    }
    state.inbound.insert(key, InboundPeer { task });
    Ok(())
}

/// Publisher side of one peer connection: accept, handshake, flush any
/// deferred publishes, then stream queued messages until the peer hangs up.
async fn run_outbound(
    weak: Weak<TopicInner>,
    listener: TcpListener,
    mut rx: mpsc::UnboundedReceiver<MessageValue>,
    key: String,
    generation: u64,
) {
    let drop_peer = |weak: &Weak<TopicInner>| {
        if let Some(inner) = weak.upgrade() {
            inner.lock().outbound.remove(&key);
        }
    };

    let Ok((mut stream, peer)) = listener.accept().await else {
        drop_peer(&weak);
        return;
    };
    debug!(peer = %peer, "subscriber connected");

    // The subscriber leads the handshake with its header.
    if let Err(e) = tcpros::read_frame(&mut stream)
        .await
        .and_then(|payload| tcpros::decode_header_entries(&payload))
    {
        warn!(peer = %peer, error = %e, "bad subscriber handshake");
        drop_peer(&weak);
        return;
    }

    let Some(inner) = weak.upgrade() else { return };
    let pending = {
        let mut state = inner.lock();
        if state.generation != generation {
            return;
        }
        std::mem::take(&mut state.pending)
    };

    // The first reply frame carries our header, combined with the first
    // deferred message when one is waiting.
    let header =
        ConnectionHeader::for_topic(&inner.node_name, &inner.topic_name, &inner.descriptor);
    let mut rest = pending.iter();
    let first_frame = match rest.next() {
        Some(first) => match tcpros::encode_publish(&header, first) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "dropping unencodable deferred message");
                tcpros::encode_header(&header)
            }
        },
        None => tcpros::encode_header(&header),
    };
    if stream.write_all(&first_frame).await.is_err() {
        drop_peer(&weak);
        return;
    }
    for message in rest {
        match tcpros::encode_message(message) {
            Ok(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    drop_peer(&weak);
                    return;
                }
            }
            Err(e) => warn!(error = %e, "dropping unencodable deferred message"),
        }
    }
    inner.emit(TopicEvent::PublisherReady);
    drop(inner);

    while let Some(message) = rx.recv().await {
        match tcpros::encode_message(&message) {
            Ok(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "dropping unencodable message"),
        }
    }
    drop_peer(&weak);
}

/// Subscriber side of one peer connection: read frames, decode, fan out.
async fn run_inbound(weak: Weak<TopicInner>, mut stream: TcpStream, key: String) {
    loop {
        let payload = match tcpros::read_frame(&mut stream).await {
            Ok(payload) => payload,
            Err(_) => break,
        };
        let Some(inner) = weak.upgrade() else { return };
        match tcpros::decode_message_body(&payload, &inner.descriptor) {
            Ok(message) => {
                let _ = inner.messages.send(message);
            }
            Err(e) => warn!(peer = %key, error = %e, "dropping malformed frame"),
        }
    }
    if let Some(inner) = weak.upgrade() {
        inner.lock().inbound.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roslink_msg::{Role, TypeRegistry, Value};
    use std::time::Duration;

    const LOCALHOST: &str = "127.0.0.1";

    async fn string_descriptor() -> Arc<MessageDescriptor> {
        let reg = TypeRegistry::new();
        reg.register_schema("std_msgs/String", "string data\n");
        reg.resolve("std_msgs/String", Role::Message).await.unwrap()
    }

    /// A miniature master: records publisher URIs handed to
    /// `registerPublisher` and replays them from `registerSubscriber`.
    async fn fake_master(preset_publishers: Vec<String>) -> RpcServer {
        let publishers = Arc::new(Mutex::new(preset_publishers));
        let record = publishers.clone();
        let replay = publishers.clone();
        RpcServerBuilder::new()
            .register("registerPublisher", move |params| {
                let record = record.clone();
                Box::pin(async move {
                    if let Some(uri) = params.get(3).and_then(|p| p.as_str()) {
                        record.lock().unwrap().push(uri.to_string());
                    }
                    Ok(RpcValue::Array(vec![
                        RpcValue::Int(1),
                        RpcValue::from(""),
                        RpcValue::Array(Vec::new()),
                    ]))
                })
            })
            .register("registerSubscriber", move |_params| {
                let replay = replay.clone();
                Box::pin(async move {
                    let uris = replay
                        .lock()
                        .unwrap()
                        .iter()
                        .map(|u| RpcValue::from(u.as_str()))
                        .collect();
                    Ok(RpcValue::Array(vec![
                        RpcValue::Int(1),
                        RpcValue::from(""),
                        RpcValue::Array(uris),
                    ]))
                })
            })
            .register("unregisterPublisher", move |_params| {
                Box::pin(async { Ok(RpcValue::Array(vec![RpcValue::Int(1), RpcValue::from("")])) })
            })
            .register("unregisterSubscriber", move |_params| {
                Box::pin(async { Ok(RpcValue::Array(vec![RpcValue::Int(1), RpcValue::from("")])) })
            })
            .bind(LOCALHOST)
            .await
            .unwrap()
    }

    fn topic(name: &str, node: &str, d: Arc<MessageDescriptor>, master_url: &str) -> Topic {
        Topic::with_hostname(
            node,
            name,
            d,
            MasterClient::new(master_url, node),
            LOCALHOST.to_string(),
        )
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn string_message(d: &Arc<MessageDescriptor>, text: &str) -> MessageValue {
        let mut m = MessageValue::new(d.clone());
        m.set("data", Value::Str(text.to_string()));
        m
    }

    #[tokio::test]
    async fn deferred_publish_reaches_subscriber() {
        let d = string_descriptor().await;
        let master = fake_master(Vec::new()).await;

        let publisher = topic("/chatter", "/talker", d.clone(), &master.url());
        let mut pub_events = publisher.events();

        // No peer yet: this defers and registers.
        publisher
            .publish(string_message(&d, "hello"))
            .await
            .unwrap();

        let subscriber = topic("/chatter", "/listener", d.clone(), &master.url());
        let mut rx = subscriber.subscribe().await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .unwrap();
        assert_eq!(received.get("data"), Some(&Value::Str("hello".to_string())));
        assert_eq!(received.to_json(), serde_json::json!({"data": "hello"}));

        // Exactly one connection per side.
        assert_eq!(subscriber.inbound_peers().len(), 1);
        assert_eq!(publisher.outbound_peers().len(), 1);

        // The publisher observed the handshake.
        let saw_ready = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match pub_events.recv().await {
                    Ok(TopicEvent::PublisherReady) => break true,
                    Ok(_) => continue,
                    Err(_) => break false,
                }
            }
        })
        .await
        .unwrap_or(false);
        assert!(saw_ready, "expected a PublisherReady event");
    }

    #[tokio::test]
    async fn immediate_publish_goes_to_connected_peers() {
        let d = string_descriptor().await;
        let master = fake_master(Vec::new()).await;

        let publisher = topic("/stream", "/talker", d.clone(), &master.url());
        publisher.publish(string_message(&d, "first")).await.unwrap();

        let subscriber = topic("/stream", "/listener", d.clone(), &master.url());
        let mut rx = subscriber.subscribe().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.get("data"), Some(&Value::Str("first".to_string())));

        // Connections now exist; this send takes the immediate path.
        publisher.publish(string_message(&d, "second")).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.get("data"), Some(&Value::Str("second".to_string())));
    }

    #[tokio::test]
    async fn unreachable_peer_is_skipped_without_error() {
        let d = string_descriptor().await;
        // A master that reports one dead publisher.
        let master = fake_master(vec!["http://127.0.0.1:9/".to_string()]).await;

        let subscriber = topic("/lonely", "/listener", d, &master.url());
        // Registration succeeds even though negotiation fails.
        let uris = subscriber.register_subscriber().await.unwrap();
        assert_eq!(uris.len(), 1);
        assert!(subscriber.inbound_peers().is_empty());
    }

    #[tokio::test]
    async fn unregister_without_registration_is_local() {
        let d = string_descriptor().await;
        // Master that would fail every call; it must never be contacted.
        let t = topic("/quiet", "/node", d, "http://127.0.0.1:9/");
        let mut events = t.events();

        t.unregister_publisher().await.unwrap();
        t.unregister_subscriber().await.unwrap();

        assert!(matches!(
            events.try_recv().unwrap(),
            TopicEvent::UnregisteredPublisher
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            TopicEvent::UnregisteredSubscriber
        ));
    }

    #[tokio::test]
    async fn unregister_subscriber_clears_connections() {
        let d = string_descriptor().await;
        let master = fake_master(Vec::new()).await;

        let publisher = topic("/clear", "/talker", d.clone(), &master.url());
        publisher.publish(string_message(&d, "x")).await.unwrap();

        let subscriber = topic("/clear", "/listener", d.clone(), &master.url());
        let _rx = subscriber.subscribe().await.unwrap();
        wait_for("inbound connection", || subscriber.inbound_peers().len() == 1).await;

        subscriber.unregister_subscriber().await.unwrap();
        assert!(subscriber.inbound_peers().is_empty());
    }

    #[tokio::test]
    async fn publisher_update_triggers_negotiation() {
        let d = string_descriptor().await;
        let master = fake_master(Vec::new()).await;

        let publisher = topic("/update", "/talker", d.clone(), &master.url());
        publisher.publish(string_message(&d, "late")).await.unwrap();
        let publisher_uri = publisher.uri().await.unwrap();

        let subscriber = topic("/update", "/listener", d.clone(), &master.url());
        let mut rx = subscriber.subscribe().await.unwrap();
        // Registration may already have connected us; pushing the update
        // again must be harmless either way.
        let slave_uri = subscriber.uri().await.unwrap();

        let client = RpcClient::new();
        let reply = client
            .call(
                &slave_uri,
                "publisherUpdate",
                &[
                    RpcValue::from("/master"),
                    RpcValue::from("/update"),
                    RpcValue::Array(vec![RpcValue::from(publisher_uri.as_str())]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            reply.as_array().and_then(|r| r[0].as_i32()),
            Some(1)
        );

        wait_for("negotiated connection", || {
            subscriber.inbound_peers().len() == 1
        })
        .await;
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.get("data"), Some(&Value::Str("late".to_string())));
    }

    #[tokio::test]
    async fn duplicate_negotiation_keeps_single_connection() {
        let d = string_descriptor().await;
        let master = fake_master(Vec::new()).await;

        let publisher = topic("/dup", "/talker", d.clone(), &master.url());
        publisher.publish(string_message(&d, "one")).await.unwrap();
        let publisher_uri = publisher.uri().await.unwrap();

        let subscriber = topic("/dup", "/listener", d.clone(), &master.url());
        let mut rx = subscriber.subscribe().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.get("data"), Some(&Value::Str("one".to_string())));
        wait_for("inbound connection", || subscriber.inbound_peers().len() == 1).await;

        // Negotiate the same publisher again, as a publisherUpdate racing
        // the registration would. The existing connection must survive.
        let generation = subscriber.inner.lock().generation;
        connect_to_publisher(&subscriber.inner, &publisher_uri, generation)
            .await
            .unwrap();
        assert_eq!(subscriber.inbound_peers().len(), 1);

        publisher.publish(string_message(&d, "two")).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.get("data"), Some(&Value::Str("two".to_string())));
    }

    #[tokio::test]
    async fn introspection_methods_answer_triples() {
        let d = string_descriptor().await;
        let master = fake_master(Vec::new()).await;
        let t = topic("/intro", "/node", d.clone(), &master.url());
        t.register_publisher().await.unwrap();
        let slave_uri = t.uri().await.unwrap();

        let client = RpcClient::new();

        let pid = client.call(&slave_uri, "getPid", &[]).await.unwrap();
        let items = pid.as_array().unwrap();
        assert_eq!(items[0].as_i32(), Some(1));
        assert_eq!(items[2].as_i32(), Some(std::process::id() as i32));

        let pubs = client.call(&slave_uri, "getPublications", &[]).await.unwrap();
        let listed = pubs.as_array().unwrap()[2].as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].as_array().unwrap()[0].as_str(), Some("/intro"));

        let subs = client.call(&slave_uri, "getSubscriptions", &[]).await.unwrap();
        assert!(subs.as_array().unwrap()[2].as_array().unwrap().is_empty());

        let master_uri = client.call(&slave_uri, "getMasterUri", &[]).await.unwrap();
        assert_eq!(
            master_uri.as_array().unwrap()[2].as_str(),
            Some(master.url().as_str())
        );

        // paramUpdate always reports success, content unseen.
        let param = client
            .call(
                &slave_uri,
                "paramUpdate",
                &[RpcValue::from("/k"), RpcValue::Int(3)],
            )
            .await
            .unwrap();
        assert_eq!(param.as_array().and_then(|r| r[0].as_i32()), Some(1));
    }

    #[tokio::test]
    async fn uri_is_stable_across_calls() {
        let d = string_descriptor().await;
        let t = topic("/stable", "/node", d, "http://127.0.0.1:9/");
        let first = t.uri().await.unwrap();
        let second = t.uri().await.unwrap();
        assert_eq!(first, second);
    }
}
