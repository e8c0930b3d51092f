//! `switchyard-middleware` – The Mediation Engine
//!
//! Moves messages and service calls between backends without caring about
//! their meaning or their wire format.
//!
//! # Modules
//!
//! - [`system`] – the [`SystemHandle`] contract and its four independent
//!   capability traits (topic-subscribe, topic-publish, service-client,
//!   service-provider).
//! - [`plugin`] – [`PluginRegistry`]: backend name → handle factory.
//! - [`topic_router`] – [`TopicRouter`]: one subscription fanned out to N
//!   publisher proxies with per-destination failure isolation.
//! - [`service_router`] – [`ServiceRouter`]: pairs a client proxy with a
//!   provider proxy and relays responses back to the original caller.
//! - [`correlation`] – [`CallCorrelationTable`]: the synchronized table of
//!   in-flight calls.
//! - [`loopback`] – [`LoopbackSystem`]: an in-process backend offering every
//!   capability, built on Tokio channels.

pub mod correlation;
pub mod loopback;
pub mod plugin;
pub mod service_router;
pub mod system;
pub mod topic_router;

#[cfg(test)]
mod testing;

pub use correlation::{CallCorrelationTable, InFlightCall};
pub use loopback::{LoopbackBus, LoopbackSystem};
pub use plugin::PluginRegistry;
pub use service_router::{ResponseRelay, ServiceRouter, ServiceStats};
pub use system::{
    Liveness, RequestCallback, ServiceClient, ServiceClientSystem, ServiceProvider,
    ServiceProviderSystem, SubscriptionCallback, SystemHandle, TopicPublisher,
    TopicPublisherSystem, TopicSubscriberSystem,
};
pub use topic_router::{RouteStats, TopicRouter};
