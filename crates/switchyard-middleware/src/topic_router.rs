//! [`TopicRouter`] – one subscription fanned out to N publisher proxies.
//!
//! Wiring happens in two steps so that no two system handles are borrowed
//! mutably at once:
//!
//! 1. [`TopicRouter::attach_destination`] advertises on each destination and
//!    keeps the returned [`TopicPublisher`].
//! 2. [`TopicRouter::subscribe`] registers the fan-out callback on the source
//!    and hands back the route's [`RouteStats`].
//!
//! After that the router has no state of its own apart from the counters;
//! everything lives inside the callback held by the source backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use switchyard_types::{BridgeError, DynamicData, DynamicType, TopicRoute, TypeRegistry};
use tracing::{debug, info, trace, warn};

use crate::system::{Liveness, SubscriptionCallback, SystemHandle, TopicPublisher};

// ─────────────────────────────────────────────────────────────────────────────
// Counters
// ─────────────────────────────────────────────────────────────────────────────

/// Per-route counters.
#[derive(Debug, Default)]
pub struct RouteStats {
    forwarded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl RouteStats {
    /// Successful publishes, counted per destination.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Conversion or publish failures, counted per destination.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Deliveries skipped because a handle on the route had stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fan-out
// ─────────────────────────────────────────────────────────────────────────────

struct Destination {
    /// Position in the route's destination list.
    index: usize,
    system: String,
    topic: String,
    message_type: Arc<DynamicType>,
    publisher: Arc<dyn TopicPublisher>,
    liveness: Liveness,
    dead_reported: AtomicBool,
}

/// The state captured by the subscription callback.
struct FanOut {
    route: String,
    source_liveness: Liveness,
    destinations: Vec<Destination>,
    stats: Arc<RouteStats>,
}

impl FanOut {
    fn deliver(&self, message: DynamicData) {
        if !self.source_liveness.is_alive() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        for dest in &self.destinations {
            if !dest.liveness.is_alive() {
                if !dest.dead_reported.swap(true, Ordering::Relaxed) {
                    warn!(
                        route = %self.route,
                        system = %dest.system,
                        "destination stopped; dropping its messages"
                    );
                }
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match self.forward(dest, &message) {
                Ok(()) => {
                    self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                    trace!(route = %self.route, system = %dest.system, "forwarded message");
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        route = %self.route,
                        system = %dest.system,
                        topic = %dest.topic,
                        error = %e,
                        "failed to forward message"
                    );
                }
            }
        }
    }

    fn forward(&self, dest: &Destination, message: &DynamicData) -> Result<(), BridgeError> {
        let converted = message.convert_to(&dest.message_type)?;
        dest.publisher.publish(converted)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

pub struct TopicRouter {
    route: TopicRoute,
    destinations: Vec<Destination>,
    stats: Arc<RouteStats>,
}

impl TopicRouter {
    pub fn new(route: TopicRoute) -> Self {
        Self {
            route,
            destinations: Vec::new(),
            stats: Arc::new(RouteStats::default()),
        }
    }

    /// Advertise on the destination owned by `system`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::RouteWiringFailed`] if `system` is the route's source,
    ///   is not a destination of the route, was already attached, or its
    ///   backend refused to advertise.
    /// - [`BridgeError::CapabilityUnsupported`] if the handle cannot publish.
    /// - [`BridgeError::UnknownType`] if the destination type is not
    ///   registered.
    pub fn attach_destination(
        &mut self,
        system: &str,
        handle: &mut dyn SystemHandle,
        liveness: Liveness,
        registry: &TypeRegistry,
    ) -> Result<(), BridgeError> {
        if system == self.route.source.system {
            return Err(self.wiring_failed(format!("system '{system}' is both source and destination")));
        }
        let Some(index) = self.route.destinations.iter().position(|d| d.system == system) else {
            return Err(self.wiring_failed(format!("system '{system}' is not a destination")));
        };
        if self.destinations.iter().any(|d| d.index == index) {
            return Err(self.wiring_failed(format!("destination '{system}' attached twice")));
        }

        let endpoint = &self.route.destinations[index];
        let message_type = registry.require(&endpoint.type_name)?;
        let publisher = handle
            .require_topic_publisher(system)?
            .advertise(&endpoint.name, &message_type, &endpoint.config)
            .map_err(|e| self.wiring_failed(format!("advertise on '{system}': {e}")))?;

        debug!(
            route = %self.route.label(),
            system,
            topic = %endpoint.name,
            message_type = %endpoint.type_name,
            "advertised destination"
        );
        self.destinations.push(Destination {
            index,
            system: system.to_string(),
            topic: endpoint.name.clone(),
            message_type,
            publisher,
            liveness,
            dead_reported: AtomicBool::new(false),
        });
        Ok(())
    }

    /// Subscribe on the source handle, completing the route.
    ///
    /// Every destination must have been attached first.
    pub fn subscribe(
        mut self,
        handle: &mut dyn SystemHandle,
        liveness: Liveness,
        registry: &TypeRegistry,
    ) -> Result<Arc<RouteStats>, BridgeError> {
        if let Some(missing) = self
            .route
            .destinations
            .iter()
            .enumerate()
            .find(|(i, _)| !self.destinations.iter().any(|d| d.index == *i))
            .map(|(_, endpoint)| endpoint.system.clone())
        {
            return Err(self.wiring_failed(format!("destination '{missing}' was never attached")));
        }
        self.destinations.sort_by_key(|d| d.index);

        let source = &self.route.source;
        let message_type = registry.require(&source.type_name)?;
        let label = self.route.label();
        let stats = Arc::clone(&self.stats);
        let fan_out = Arc::new(FanOut {
            route: label.clone(),
            source_liveness: liveness,
            destinations: self.destinations,
            stats: Arc::clone(&stats),
        });
        let callback: SubscriptionCallback = Arc::new(move |message| fan_out.deliver(message));

        handle
            .require_topic_subscriber(&source.system)?
            .subscribe(&source.name, &message_type, callback, &source.config)
            .map_err(|e| BridgeError::RouteWiringFailed {
                route: label.clone(),
                reason: format!("subscribe on '{}': {e}", source.system),
            })?;

        info!(
            route = %label,
            topic = %source.name,
            destinations = ?self.route.destinations.iter().map(|d| d.system.as_str()).collect::<Vec<_>>(),
            "topic route wired"
        );
        Ok(stats)
    }

    fn wiring_failed(&self, reason: String) -> BridgeError {
        BridgeError::RouteWiringFailed {
            route: self.route.label(),
            reason,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
