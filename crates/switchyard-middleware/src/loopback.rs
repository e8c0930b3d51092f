//! In-process loopback backend.
//!
//! A [`LoopbackBus`] is a set of named lanes shared by every clone:
//!
//! | Lane | Channel | Direction |
//! |---|---|---|
//! | topic | [`tokio::sync::broadcast`] | anyone → every subscriber |
//! | client request | [`tokio::sync::mpsc`] + [`tokio::sync::oneshot`] | external caller → bridge |
//! | service handler | plain callback | bridge → external server |
//!
//! A [`LoopbackSystem`] attaches to one bus and exposes all four
//! capabilities to the bridge.  Nothing happens on a callback thread:
//! inbound messages, requests and provider calls are queued and processed by
//! [`SystemHandle::spin_once`].
//!
//! The backend has no IDL of its own, so `configure` only succeeds when every
//! required type is already registered (usually through the `[[types]]`
//! section of the configuration).
//!
//! # Configuration
//!
//! ```toml
//! [systems.a]
//! type = "loopback"
//! [systems.a.config]
//! echo = ["ping"]   # answer these services with their own request
//! emit = [{ topic = "chatter", period_ms = 500 }]   # publish a default-valued message
//! ```
//!
//! `emit` only fires for topics this system is the source of; the message is
//! built from the route's type and its declared field defaults.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use switchyard_types::{
    BridgeError, CallHandle, ConfigNode, DynamicData, DynamicType, RequiredTypes, ServiceType,
    TypeRegistry,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::system::{
    RequestCallback, ServiceClient, ServiceClientSystem, ServiceProvider, ServiceProviderSystem,
    SubscriptionCallback, SystemHandle, TopicPublisher, TopicPublisherSystem,
    TopicSubscriberSystem,
};

/// Default topic lane capacity (messages buffered before slow subscribers
/// start losing the oldest ones).
const DEFAULT_CAPACITY: usize = 256;

/// Origin tag for messages published from outside any system.
const EXTERNAL_ORIGIN: u64 = 0;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// Answers one loopback service.
pub type ServiceHandler = Arc<dyn Fn(DynamicData) -> DynamicData + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Envelope {
    origin: u64,
    message: DynamicData,
}

/// A request queued by [`LoopbackBus::call`].
struct PendingCall {
    request: DynamicData,
    reply: oneshot::Sender<DynamicData>,
}

struct BusInner {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    client_lanes: Mutex<HashMap<String, mpsc::UnboundedSender<PendingCall>>>,
    handlers: RwLock<HashMap<String, ServiceHandler>>,
    shutdown: AtomicBool,
}

/// Shared loopback bus.  Clone it cheaply; all clones share the same lanes.
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    /// Create a bus whose topic lanes each buffer `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                topics: Mutex::new(HashMap::new()),
                client_lanes: Mutex::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Publish `message` on `topic` from outside the bridge.
    ///
    /// Returns the number of receivers handed the message; `Ok(0)` when no
    /// one listens is a normal condition.
    pub fn publish(&self, topic: &str, message: DynamicData) -> Result<usize, BridgeError> {
        self.send(topic, EXTERNAL_ORIGIN, message)
    }

    /// Listen on `topic` from outside the bridge.
    pub fn subscribe(&self, topic: &str) -> TopicReceiver {
        TopicReceiver {
            topic: topic.to_string(),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Send a request into the bridge through the client proxy created for
    /// `service`.  The response arrives on the returned receiver once the
    /// owning system has been spun and the remote provider has answered.
    pub fn call(
        &self,
        service: &str,
        request: DynamicData,
    ) -> Result<oneshot::Receiver<DynamicData>, BridgeError> {
        if self.is_shut_down() {
            return Err(BridgeError::ServiceUnavailable(service.to_string()));
        }
        let lanes = self.inner.client_lanes.lock();
        let lane = lanes
            .get(service)
            .ok_or_else(|| BridgeError::ServiceUnavailable(service.to_string()))?;
        let (reply, response) = oneshot::channel();
        lane.send(PendingCall { request, reply })
            .map_err(|_| BridgeError::ServiceUnavailable(service.to_string()))?;
        Ok(response)
    }

    /// Answer calls the bridge forwards to `service` with `handler`.
    ///
    /// Replaces any handler previously registered for `service`.
    pub fn serve<F>(&self, service: &str, handler: F)
    where
        F: Fn(DynamicData) -> DynamicData + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .insert(service.to_string(), Arc::new(handler));
    }

    /// Stop the bus.  Every attached system reports `okay() == false`.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn send(&self, topic: &str, origin: u64, message: DynamicData) -> Result<usize, BridgeError> {
        if self.is_shut_down() {
            return Err(BridgeError::PublishFailed {
                topic: topic.to_string(),
                reason: "loopback bus is shut down".to_string(),
            });
        }
        // No receivers is not an error on a loopback topic.
        Ok(self
            .topic_sender(topic)
            .send(Envelope { origin, message })
            .unwrap_or(0))
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<Envelope> {
        self.inner
            .topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }

    fn open_client_lane(&self, service: &str) -> Result<mpsc::UnboundedReceiver<PendingCall>, BridgeError> {
        let mut lanes = self.inner.client_lanes.lock();
        if lanes.get(service).is_some_and(|lane| !lane.is_closed()) {
            return Err(BridgeError::Config(format!(
                "loopback service '{service}' already has a client proxy"
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lanes.insert(service.to_string(), tx);
        Ok(rx)
    }

    fn handler(&self, service: &str) -> Option<ServiceHandler> {
        self.inner.handlers.read().get(service).cloned()
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// External receiver
// ─────────────────────────────────────────────────────────────────────────────

/// External receiver bound to one loopback topic.
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<Envelope>,
}

impl TopicReceiver {
    /// Next queued message, if any, without waiting.
    ///
    /// Lag is logged and skipped; the oldest retained message is returned.
    pub fn try_next(&mut self) -> Option<DynamicData> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => return Some(envelope.message),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, skipped = n, "loopback receiver lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Wait for the next message.  `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<DynamicData> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope.message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, skipped = n, "loopback receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// System
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoopbackOptions {
    /// Services answered by echoing the request back.
    #[serde(default)]
    echo: Vec<String>,
    #[serde(default)]
    emit: Vec<EmitOption>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmitOption {
    topic: String,
    period_ms: u64,
}

/// Periodic publisher configured through `emit`.
struct Emitter {
    topic: String,
    period: Duration,
    next_due: Instant,
    /// Bound when the bridge subscribes to `topic` on this system.
    message_type: Option<Arc<DynamicType>>,
}

struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Envelope>,
    message_type: Arc<DynamicType>,
    callback: SubscriptionCallback,
}

struct ClientLane {
    service: String,
    requests: mpsc::UnboundedReceiver<PendingCall>,
    proxy: Arc<LoopbackClient>,
    callback: RequestCallback,
}

/// Work queued by a [`LoopbackProvider`] for the next spin.
struct ProviderCall {
    service: String,
    response_type: Arc<DynamicType>,
    request: DynamicData,
    client: Arc<dyn ServiceClient>,
    call: CallHandle,
}

/// Client proxy: routes responses back to the external caller that is
/// waiting on [`LoopbackBus::call`].
struct LoopbackClient {
    service: String,
    pending: Mutex<HashMap<CallHandle, oneshot::Sender<DynamicData>>>,
}

impl ServiceClient for LoopbackClient {
    fn receive_response(&self, call: CallHandle, response: DynamicData) {
        let Some(reply) = self.pending.lock().remove(&call) else {
            warn!(service = %self.service, %call, "response for unknown loopback call");
            return;
        };
        if reply.send(response).is_err() {
            debug!(service = %self.service, %call, "loopback caller went away before the response");
        }
    }

    /// Dropping the sender closes the caller's receiver.
    fn abandon(&self, call: CallHandle) {
        if self.pending.lock().remove(&call).is_some() {
            debug!(service = %self.service, %call, "loopback call abandoned");
        }
    }
}

struct LoopbackPublisher {
    topic: String,
    origin: u64,
    bus: LoopbackBus,
}

impl TopicPublisher for LoopbackPublisher {
    fn publish(&self, message: DynamicData) -> Result<(), BridgeError> {
        self.bus.send(&self.topic, self.origin, message).map(|_| ())
    }
}

struct LoopbackProvider {
    service: String,
    response_type: Arc<DynamicType>,
    queue: mpsc::UnboundedSender<ProviderCall>,
}

impl ServiceProvider for LoopbackProvider {
    fn call_service(&self, request: DynamicData, client: Arc<dyn ServiceClient>, call: CallHandle) {
        let queued = self.queue.send(ProviderCall {
            service: self.service.clone(),
            response_type: Arc::clone(&self.response_type),
            request,
            client,
            call,
        });
        if queued.is_err() {
            warn!(service = %self.service, %call, "loopback system gone; call dropped");
        }
    }
}

/// A full-capability system living on a [`LoopbackBus`].
pub struct LoopbackSystem {
    origin: u64,
    bus: LoopbackBus,
    own_types: Vec<Arc<DynamicType>>,
    subscriptions: Vec<Subscription>,
    clients: Vec<ClientLane>,
    emitters: Vec<Emitter>,
    provider_tx: mpsc::UnboundedSender<ProviderCall>,
    provider_rx: mpsc::UnboundedReceiver<ProviderCall>,
}

impl LoopbackSystem {
    pub fn new(bus: LoopbackBus) -> Self {
        let (provider_tx, provider_rx) = mpsc::unbounded_channel();
        Self {
            origin: NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed),
            bus,
            own_types: Vec::new(),
            subscriptions: Vec::new(),
            clients: Vec::new(),
            emitters: Vec::new(),
            provider_tx,
            provider_rx,
        }
    }

    /// Types this system contributes to the registry during `configure`.
    pub fn with_types(mut self, types: impl IntoIterator<Item = DynamicType>) -> Self {
        self.own_types.extend(types.into_iter().map(Arc::new));
        self
    }

    fn fire_emitters(&mut self, now: Instant) {
        for emitter in &mut self.emitters {
            let Some(message_type) = &emitter.message_type else {
                continue;
            };
            if now < emitter.next_due {
                continue;
            }
            emitter.next_due = now + emitter.period;
            if let Err(e) = self.bus.publish(&emitter.topic, DynamicData::new(message_type)) {
                warn!(topic = %emitter.topic, error = %e, "loopback emit failed");
            }
        }
    }

    fn drain_topics(&mut self) {
        for sub in &mut self.subscriptions {
            loop {
                let envelope = match sub.receiver.try_recv() {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!(topic = %sub.topic, skipped = n, "loopback subscription lagged");
                        continue;
                    }
                    Err(_) => break,
                };
                if envelope.origin == self.origin {
                    continue;
                }
                match envelope.message.convert_to(&sub.message_type) {
                    Ok(message) => (sub.callback)(message),
                    Err(e) => {
                        warn!(topic = %sub.topic, error = %e, "dropping unconvertible loopback message");
                    }
                }
            }
        }
    }

    fn drain_requests(&mut self) {
        for lane in &mut self.clients {
            while let Ok(pending) = lane.requests.try_recv() {
                let call = CallHandle::mint();
                lane.proxy.pending.lock().insert(call, pending.reply);
                debug!(service = %lane.service, %call, "loopback request");
                let client: Arc<dyn ServiceClient> = lane.proxy.clone();
                (lane.callback)(pending.request, client, call);
            }
        }
    }

    fn drain_provider_calls(&mut self) {
        while let Ok(work) = self.provider_rx.try_recv() {
            let Some(handler) = self.bus.handler(&work.service) else {
                warn!(service = %work.service, call = %work.call, "no loopback handler; call left unanswered");
                continue;
            };
            match handler(work.request).convert_to(&work.response_type) {
                Ok(response) => work.client.receive_response(work.call, response),
                Err(e) => {
                    warn!(service = %work.service, call = %work.call, error = %e, "loopback handler returned an unusable response");
                }
            }
        }
    }
}

impl SystemHandle for LoopbackSystem {
    fn configure(
        &mut self,
        required: &RequiredTypes,
        config: &ConfigNode,
        registry: &TypeRegistry,
    ) -> Result<(), BridgeError> {
        let failed = |reason: String| BridgeError::ConfigurationFailed {
            system: format!("loopback#{}", self.origin),
            reason,
        };
        let options: LoopbackOptions = if config.is_null() {
            LoopbackOptions::default()
        } else {
            serde_json::from_value(config.clone()).map_err(|e| failed(format!("invalid options: {e}")))?
        };

        for ty in &self.own_types {
            registry
                .register(Arc::clone(ty))
                .map_err(|e| failed(e.to_string()))?;
        }
        let missing: Vec<&str> = required
            .messages
            .iter()
            .filter(|name| !registry.contains(name))
            .chain(
                required
                    .services
                    .iter()
                    .filter(|name| !registry.contains_service(name)),
            )
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(failed(format!("no schema for {}", missing.join(", "))));
        }

        for service in options.echo {
            debug!(%service, "loopback echo service");
            self.bus.serve(&service, |request| request);
        }
        let now = Instant::now();
        for emit in options.emit {
            if emit.period_ms == 0 {
                return Err(failed(format!("emit on '{}' needs a non-zero period_ms", emit.topic)));
            }
            let period = Duration::from_millis(emit.period_ms);
            self.emitters.push(Emitter {
                topic: emit.topic,
                period,
                next_due: now,
                message_type: None,
            });
        }
        Ok(())
    }

    fn okay(&self) -> bool {
        !self.bus.is_shut_down()
    }

    fn spin_once(&mut self) -> bool {
        if !self.okay() {
            return false;
        }
        self.fire_emitters(Instant::now());
        self.drain_topics();
        self.drain_requests();
        self.drain_provider_calls();
        true
    }

    fn as_topic_subscriber(&mut self) -> Option<&mut dyn TopicSubscriberSystem> {
        Some(self)
    }

    fn as_topic_publisher(&mut self) -> Option<&mut dyn TopicPublisherSystem> {
        Some(self)
    }

    fn as_service_client(&mut self) -> Option<&mut dyn ServiceClientSystem> {
        Some(self)
    }

    fn as_service_provider(&mut self) -> Option<&mut dyn ServiceProviderSystem> {
        Some(self)
    }
}

impl TopicSubscriberSystem for LoopbackSystem {
    fn subscribe(
        &mut self,
        topic: &str,
        message_type: &Arc<DynamicType>,
        callback: SubscriptionCallback,
        _config: &ConfigNode,
    ) -> Result<(), BridgeError> {
        for emitter in self.emitters.iter_mut().filter(|e| e.topic == topic) {
            emitter.message_type = Some(Arc::clone(message_type));
        }
        self.subscriptions.push(Subscription {
            topic: topic.to_string(),
            receiver: self.bus.topic_sender(topic).subscribe(),
            message_type: Arc::clone(message_type),
            callback,
        });
        Ok(())
    }
}

impl TopicPublisherSystem for LoopbackSystem {
    fn advertise(
        &mut self,
        topic: &str,
        _message_type: &Arc<DynamicType>,
        _config: &ConfigNode,
    ) -> Result<Arc<dyn TopicPublisher>, BridgeError> {
        Ok(Arc::new(LoopbackPublisher {
            topic: topic.to_string(),
            origin: self.origin,
            bus: self.bus.clone(),
        }))
    }
}

impl ServiceClientSystem for LoopbackSystem {
    fn create_client_proxy(
        &mut self,
        service: &str,
        _service_type: &Arc<ServiceType>,
        callback: RequestCallback,
        _config: &ConfigNode,
    ) -> Result<(), BridgeError> {
        let requests = self.bus.open_client_lane(service)?;
        self.clients.push(ClientLane {
            service: service.to_string(),
            requests,
            proxy: Arc::new(LoopbackClient {
                service: service.to_string(),
                pending: Mutex::new(HashMap::new()),
            }),
            callback,
        });
        Ok(())
    }
}

impl ServiceProviderSystem for LoopbackSystem {
    fn create_service_proxy(
        &mut self,
        service: &str,
        service_type: &Arc<ServiceType>,
        _config: &ConfigNode,
    ) -> Result<Arc<dyn ServiceProvider>, BridgeError> {
        Ok(Arc::new(LoopbackProvider {
            service: service.to_string(),
            response_type: Arc::clone(service_type.response()),
            queue: self.provider_tx.clone(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
