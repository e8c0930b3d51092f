//! Hand-written test doubles shared by the router tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use switchyard_types::{
    BridgeError, CallHandle, ConfigNode, DynamicData, DynamicType, FieldKind, RequiredTypes,
    ServiceType, TypeRegistry,
};

use crate::system::{
    RequestCallback, ServiceClient, ServiceClientSystem, ServiceProvider, ServiceProviderSystem,
    SubscriptionCallback, SystemHandle, TopicPublisher, TopicPublisherSystem,
    TopicSubscriberSystem,
};

pub(crate) fn string_type(name: &str) -> Arc<DynamicType> {
    Arc::new(
        DynamicType::builder(name)
            .field("data", FieldKind::string())
            .build()
            .unwrap(),
    )
}

pub(crate) fn string_message(ty: &Arc<DynamicType>, data: &str) -> DynamicData {
    DynamicData::new(ty).with("data", data).unwrap()
}

pub(crate) fn string_service(name: &str) -> Arc<ServiceType> {
    Arc::new(ServiceType::new(
        name,
        string_type(&format!("{name}Request")),
        string_type(&format!("{name}Response")),
    ))
}

/// A provider call captured by [`MockSystem`] and not answered yet.
pub(crate) struct CapturedCall {
    pub request: DynamicData,
    pub client: Arc<dyn ServiceClient>,
    pub call: CallHandle,
}

#[derive(Default)]
struct ProbeState {
    subscriptions: Mutex<HashMap<String, SubscriptionCallback>>,
    published: Mutex<Vec<(String, DynamicData)>>,
    fail_publish: AtomicBool,
    clients: Mutex<HashMap<String, RequestCallback>>,
    provider_calls: Mutex<Vec<CapturedCall>>,
    alive: AtomicBool,
    spins: Mutex<usize>,
}

/// Test-side view of a [`MockSystem`], still usable after the system itself
/// has been handed to a router or scheduler.
#[derive(Clone)]
pub(crate) struct MockProbe(Arc<ProbeState>);

impl MockProbe {
    /// Simulate an inbound backend message on `topic`.
    pub fn deliver(&self, topic: &str, message: DynamicData) {
        let callback = self.0.subscriptions.lock().get(topic).cloned();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    pub fn published(&self, topic: &str) -> Vec<DynamicData> {
        self.0
            .published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.0.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Simulate an inbound client request; returns the minted handle.
    pub fn request(
        &self,
        service: &str,
        request: DynamicData,
        client: Arc<dyn ServiceClient>,
    ) -> CallHandle {
        let call = CallHandle::mint();
        self.request_with(service, request, client, call);
        call
    }

    pub fn request_with(
        &self,
        service: &str,
        request: DynamicData,
        client: Arc<dyn ServiceClient>,
        call: CallHandle,
    ) {
        let callback = self.0.clients.lock().get(service).cloned();
        if let Some(callback) = callback {
            callback(request, client, call);
        }
    }

    pub fn take_provider_calls(&self) -> Vec<CapturedCall> {
        std::mem::take(&mut *self.0.provider_calls.lock())
    }

    pub fn kill(&self) {
        self.0.alive.store(false, Ordering::SeqCst);
    }

    pub fn spins(&self) -> usize {
        *self.0.spins.lock()
    }
}

/// Full-capability system that records everything the routers do to it.
pub(crate) struct MockSystem {
    probe: MockProbe,
}

impl MockSystem {
    pub fn new() -> (Self, MockProbe) {
        let state = ProbeState {
            alive: AtomicBool::new(true),
            ..ProbeState::default()
        };
        let probe = MockProbe(Arc::new(state));
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl SystemHandle for MockSystem {
    fn configure(
        &mut self,
        _required: &RequiredTypes,
        _config: &ConfigNode,
        _registry: &TypeRegistry,
    ) -> Result<(), BridgeError> {
        Ok(())
    }

    fn okay(&self) -> bool {
        self.probe.0.alive.load(Ordering::SeqCst)
    }

    fn spin_once(&mut self) -> bool {
        *self.probe.0.spins.lock() += 1;
        self.okay()
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

impl TopicSubscriberSystem for MockSystem {
    fn subscribe(
        &mut self,
        topic: &str,
        _message_type: &Arc<DynamicType>,
        callback: SubscriptionCallback,
        _config: &ConfigNode,
    ) -> Result<(), BridgeError> {
        self.probe
            .0
            .subscriptions
            .lock()
            .insert(topic.to_string(), callback);
        Ok(())
    }
}

struct MockPublisher {
    topic: String,
    state: Arc<ProbeState>,
}

impl TopicPublisher for MockPublisher {
    fn publish(&self, message: DynamicData) -> Result<(), BridgeError> {
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::PublishFailed {
                topic: self.topic.clone(),
                reason: "mock failure".to_string(),
            });
        }
        self.state
            .published
            .lock()
            .push((self.topic.clone(), message));
        Ok(())
    }
}

impl TopicPublisherSystem for MockSystem {
    fn advertise(
        &mut self,
        topic: &str,
        _message_type: &Arc<DynamicType>,
        _config: &ConfigNode,
    ) -> Result<Arc<dyn TopicPublisher>, BridgeError> {
        Ok(Arc::new(MockPublisher {
            topic: topic.to_string(),
            state: Arc::clone(&self.probe.0),
        }))
    }
}

impl ServiceClientSystem for MockSystem {
    fn create_client_proxy(
        &mut self,
        service: &str,
        _service_type: &Arc<ServiceType>,
        callback: RequestCallback,
        _config: &ConfigNode,
    ) -> Result<(), BridgeError> {
        self.probe
            .0
            .clients
            .lock()
            .insert(service.to_string(), callback);
        Ok(())
    }
}

struct MockProvider {
    state: Arc<ProbeState>,
}

impl ServiceProvider for MockProvider {
    fn call_service(&self, request: DynamicData, client: Arc<dyn ServiceClient>, call: CallHandle) {
        self.state.provider_calls.lock().push(CapturedCall {
            request,
            client,
            call,
        });
    }
}

impl ServiceProviderSystem for MockSystem {
    fn create_service_proxy(
        &mut self,
        _service: &str,
        _service_type: &Arc<ServiceType>,
        _config: &ConfigNode,
    ) -> Result<Arc<dyn ServiceProvider>, BridgeError> {
        Ok(Arc::new(MockProvider {
            state: Arc::clone(&self.probe.0),
        }))
    }
}

/// Client proxy that records every response and abandonment it receives.
#[derive(Default)]
pub(crate) struct RecordingClient {
    responses: Mutex<Vec<(CallHandle, DynamicData)>>,
    abandoned: Mutex<Vec<CallHandle>>,
}

impl RecordingClient {
    pub fn responses(&self) -> Vec<(CallHandle, DynamicData)> {
        self.responses.lock().clone()
    }

    pub fn abandoned(&self) -> Vec<CallHandle> {
        self.abandoned.lock().clone()
    }
}

impl ServiceClient for RecordingClient {
    fn receive_response(&self, call: CallHandle, response: DynamicData) {
        self.responses.lock().push((call, response));
    }

    fn abandon(&self, call: CallHandle) {
        self.abandoned.lock().push(call);
    }
}
