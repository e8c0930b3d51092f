//! The System Handle contract.
//!
//! Every backend implements [`SystemHandle`].  On top of that it exposes any
//! subset of four independent capabilities, discovered at runtime through the
//! `as_*` queries rather than through a fixed type hierarchy:
//!
//! | Capability | Trait | Proxy object |
//! |---|---|---|
//! | topic-subscribe | [`TopicSubscriberSystem`] | – |
//! | topic-publish | [`TopicPublisherSystem`] | [`TopicPublisher`] |
//! | service-client | [`ServiceClientSystem`] | [`ServiceClient`] |
//! | service-provider | [`ServiceProviderSystem`] | [`ServiceProvider`] |
//!
//! # Threading
//!
//! `configure` and `spin_once` are only ever called from the scheduler's
//! driver loop.  Callbacks handed to a backend, and every proxy method, may
//! be invoked from any thread and must not block.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use switchyard_types::{
    BridgeError, CallHandle, Capability, ConfigNode, DynamicData, DynamicType, RequiredTypes,
    ServiceType, TypeRegistry,
};

/// Invoked once per inbound message with an owned, fully-formed value.
pub type SubscriptionCallback = Arc<dyn Fn(DynamicData) + Send + Sync>;

/// Invoked once per inbound request with the request, the proxy that must
/// eventually receive the response, and the handle minted for the call.
pub type RequestCallback = Arc<dyn Fn(DynamicData, Arc<dyn ServiceClient>, CallHandle) + Send + Sync>;

/// One configured backend endpoint.
pub trait SystemHandle: Send {
    /// Register every type this handle will use into `registry`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConfigurationFailed`] when a required type cannot be
    /// supported.
    fn configure(
        &mut self,
        required: &RequiredTypes,
        config: &ConfigNode,
        registry: &TypeRegistry,
    ) -> Result<(), BridgeError>;

    /// Pure health query.
    fn okay(&self) -> bool;

    /// Perform one unit of backend progress.  Returning `false` is terminal.
    fn spin_once(&mut self) -> bool;

    fn as_topic_subscriber(&mut self) -> Option<&mut dyn TopicSubscriberSystem> {
        None
    }

    fn as_topic_publisher(&mut self) -> Option<&mut dyn TopicPublisherSystem> {
        None
    }

    fn as_service_client(&mut self) -> Option<&mut dyn ServiceClientSystem> {
        None
    }

    fn as_service_provider(&mut self) -> Option<&mut dyn ServiceProviderSystem> {
        None
    }

    /// The capabilities this handle declares.
    fn capabilities(&mut self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.as_topic_subscriber().is_some() {
            caps.push(Capability::TopicSubscribe);
        }
        if self.as_topic_publisher().is_some() {
            caps.push(Capability::TopicPublish);
        }
        if self.as_service_client().is_some() {
            caps.push(Capability::ServiceClient);
        }
        if self.as_service_provider().is_some() {
            caps.push(Capability::ServiceProvider);
        }
        caps
    }

    fn require_topic_subscriber(
        &mut self,
        system: &str,
    ) -> Result<&mut dyn TopicSubscriberSystem, BridgeError> {
        self.as_topic_subscriber()
            .ok_or_else(|| unsupported(system, Capability::TopicSubscribe))
    }

    fn require_topic_publisher(
        &mut self,
        system: &str,
    ) -> Result<&mut dyn TopicPublisherSystem, BridgeError> {
        self.as_topic_publisher()
            .ok_or_else(|| unsupported(system, Capability::TopicPublish))
    }

    fn require_service_client(
        &mut self,
        system: &str,
    ) -> Result<&mut dyn ServiceClientSystem, BridgeError> {
        self.as_service_client()
            .ok_or_else(|| unsupported(system, Capability::ServiceClient))
    }

    fn require_service_provider(
        &mut self,
        system: &str,
    ) -> Result<&mut dyn ServiceProviderSystem, BridgeError> {
        self.as_service_provider()
            .ok_or_else(|| unsupported(system, Capability::ServiceProvider))
    }
}

fn unsupported(system: &str, capability: Capability) -> BridgeError {
    BridgeError::CapabilityUnsupported {
        system: system.to_string(),
        capability,
    }
}

/// topic-subscribe capability.
pub trait TopicSubscriberSystem {
    fn subscribe(
        &mut self,
        topic: &str,
        message_type: &Arc<DynamicType>,
        callback: SubscriptionCallback,
        config: &ConfigNode,
    ) -> Result<(), BridgeError>;
}

/// Publisher proxy returned by [`TopicPublisherSystem::advertise`].
pub trait TopicPublisher: Send + Sync {
    /// Best-effort, non-blocking send.
    fn publish(&self, message: DynamicData) -> Result<(), BridgeError>;
}

/// topic-publish capability.
pub trait TopicPublisherSystem {
    fn advertise(
        &mut self,
        topic: &str,
        message_type: &Arc<DynamicType>,
        config: &ConfigNode,
    ) -> Result<Arc<dyn TopicPublisher>, BridgeError>;
}

/// The side of a call that is waiting for a response.
pub trait ServiceClient: Send + Sync {
    /// Deliver the response for `call`.
    ///
    /// May be invoked concurrently from several threads; implementations must
    /// be reentrant.
    fn receive_response(&self, call: CallHandle, response: DynamicData);

    /// `call` will never be answered: it was rejected, timed out, or a
    /// system it depended on stopped.  Release whatever is held for it.
    fn abandon(&self, call: CallHandle) {
        let _ = call;
    }
}

/// service-client capability.
pub trait ServiceClientSystem {
    fn create_client_proxy(
        &mut self,
        service: &str,
        service_type: &Arc<ServiceType>,
        callback: RequestCallback,
        config: &ConfigNode,
    ) -> Result<(), BridgeError>;
}

/// Provider proxy returned by [`ServiceProviderSystem::create_service_proxy`].
pub trait ServiceProvider: Send + Sync {
    /// Start a call.
    ///
    /// Must not block, and must eventually cause exactly one
    /// `client.receive_response(call, ..)`.  `call` is opaque and must be
    /// passed back unmodified.
    fn call_service(&self, request: DynamicData, client: Arc<dyn ServiceClient>, call: CallHandle);
}

/// service-provider capability.
pub trait ServiceProviderSystem {
    fn create_service_proxy(
        &mut self,
        service: &str,
        service_type: &Arc<ServiceType>,
        config: &ConfigNode,
    ) -> Result<Arc<dyn ServiceProvider>, BridgeError>;
}

/// Shared liveness flag of one system handle.
///
/// The scheduler owns the authority to stop a handle; routers hold clones and
/// treat every route touching a stopped handle as dead.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_stopped(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PublishOnly;

    impl SystemHandle for PublishOnly {
        fn configure(
            &mut self,
            _required: &RequiredTypes,
            _config: &ConfigNode,
            _registry: &TypeRegistry,
        ) -> Result<(), BridgeError> {
            Ok(())
        }

        fn okay(&self) -> bool {
            true
        }

        fn spin_once(&mut self) -> bool {
            true
        }

        fn as_topic_publisher(&mut self) -> Option<&mut dyn TopicPublisherSystem> {
            Some(self)
        }
    }

    impl TopicPublisherSystem for PublishOnly {
        fn advertise(
            &mut self,
            topic: &str,
            _message_type: &Arc<DynamicType>,
            _config: &ConfigNode,
        ) -> Result<Arc<dyn TopicPublisher>, BridgeError> {
            Err(BridgeError::PublishFailed {
                topic: topic.to_string(),
                reason: "test double".to_string(),
            })
        }
    }

    #[test]
    fn capabilities_reflect_interface_queries() {
        let mut handle = PublishOnly;
        assert_eq!(handle.capabilities(), vec![Capability::TopicPublish]);
    }

    #[test]
    fn missing_capability_is_reported() {
        let mut handle = PublishOnly;
        let err = handle.require_topic_subscriber("web").err().unwrap();
        assert_eq!(
            err,
            BridgeError::CapabilityUnsupported {
                system: "web".to_string(),
                capability: Capability::TopicSubscribe,
            }
        );
        assert!(handle.require_topic_publisher("web").is_ok());
    }

    #[test]
    fn liveness_clones_share_state() {
        let liveness = Liveness::new();
        let observer = liveness.clone();
        assert!(observer.is_alive());
        liveness.mark_stopped();
        assert!(!observer.is_alive());
    }
}
