//! [`Bridge`] – turns a [`BridgeConfig`] into running routes.
//!
//! Setup runs in a fixed order and keeps going after a failure so that every
//! problem is reported at once:
//!
//! 1. structural validation of the configuration;
//! 2. schema declarations are registered;
//! 3. one handle per system is created from the [`PluginRegistry`];
//! 4. each handle is configured with the types its routes require;
//! 5. the type registry is frozen;
//! 6. topic and service routes are wired (routes touching a system that
//!    failed an earlier step are skipped, the cause is already recorded).
//!
//! Any failure makes [`Bridge::build`] return [`BridgeError::Setup`] with the
//! full list.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use switchyard_middleware::{
    CallCorrelationTable, PluginRegistry, RouteStats, ServiceRouter, ServiceStats, TopicRouter,
};
use switchyard_types::declaration::declare_types;
use switchyard_types::{BridgeConfig, BridgeError, ServiceRoute, TopicRoute, TypeRegistry};
use tracing::info;

use crate::scheduler::{Scheduler, SystemState};

pub struct Bridge {
    registry: TypeRegistry,
    scheduler: Scheduler,
    topic_stats: BTreeMap<String, Arc<RouteStats>>,
    service_stats: BTreeMap<String, Arc<ServiceStats>>,
}

impl Bridge {
    pub fn build(config: &BridgeConfig, plugins: &PluginRegistry) -> Result<Self, BridgeError> {
        config.validate()?;

        let mut errors = Vec::new();
        let registry = TypeRegistry::new();
        if let Err(e) = declare_types(config, &registry) {
            errors.push(e);
        }

        let table = Arc::new(CallCorrelationTable::new());
        let mut scheduler = Scheduler::new(table)
            .with_call_timeout(config.settings.call_timeout_ms.map(Duration::from_millis))
            .with_idle_sleep(Duration::from_millis(config.settings.idle_sleep_ms));

        for (name, system) in &config.systems {
            match plugins.create(&system.plugin) {
                Ok(handle) => {
                    if let Err(e) = scheduler.add(name, handle) {
                        errors.push(e);
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        let required = config.required_types();
        for (name, system) in &config.systems {
            if scheduler.state(name).is_none() {
                continue;
            }
            let needs = required.get(name).cloned().unwrap_or_default();
            if let Err(e) = scheduler.configure(name, &needs, &system.config, &registry) {
                errors.push(e);
            }
        }
        registry.freeze();
        info!(types = registry.len(), "type registry frozen");

        let mut bridge = Self {
            registry,
            scheduler,
            topic_stats: BTreeMap::new(),
            service_stats: BTreeMap::new(),
        };

        for route in config.topic_routes() {
            let systems = std::iter::once(&route.source)
                .chain(&route.destinations)
                .map(|e| e.system.as_str());
            if !bridge.all_configured(systems) {
                continue;
            }
            let label = route.label();
            match bridge.wire_topic(route) {
                Ok(stats) => {
                    bridge.topic_stats.insert(label, stats);
                }
                Err(e) => errors.push(e),
            }
        }

        for route in config.service_routes() {
            let systems = [route.client.system.as_str(), route.provider.system.as_str()];
            if !bridge.all_configured(systems) {
                continue;
            }
            let label = route.label();
            match bridge.wire_service(route) {
                Ok(stats) => {
                    bridge.service_stats.insert(label, stats);
                }
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            return Err(BridgeError::Setup(BridgeError::Setup(errors).into_errors()));
        }

        bridge.scheduler.start();
        info!(
            topics = bridge.topic_stats.len(),
            services = bridge.service_stats.len(),
            "bridge ready"
        );
        Ok(bridge)
    }

    fn all_configured<'a>(&self, systems: impl IntoIterator<Item = &'a str>) -> bool {
        systems
            .into_iter()
            .all(|s| self.scheduler.state(s) == Some(SystemState::Configured))
    }

    fn wire_topic(&mut self, route: TopicRoute) -> Result<Arc<RouteStats>, BridgeError> {
        let destinations: Vec<String> = route.destinations.iter().map(|d| d.system.clone()).collect();
        let source = route.source.system.clone();
        let mut router = TopicRouter::new(route);
        for system in &destinations {
            let (handle, liveness) = self.scheduler.handle_mut(system)?;
            router.attach_destination(system, handle, liveness, &self.registry)?;
        }
        let (handle, liveness) = self.scheduler.handle_mut(&source)?;
        router.subscribe(handle, liveness, &self.registry)
    }

    fn wire_service(&mut self, route: ServiceRoute) -> Result<Arc<ServiceStats>, BridgeError> {
        let client = route.client.system.clone();
        let provider = route.provider.system.clone();
        let mut router = ServiceRouter::new(route, Arc::clone(self.scheduler.table()));
        let (handle, liveness) = self.scheduler.handle_mut(&provider)?;
        router.attach_provider(handle, liveness, &self.registry)?;
        let (handle, liveness) = self.scheduler.handle_mut(&client)?;
        router.attach_client(handle, liveness, &self.registry)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn table(&self) -> &Arc<CallCorrelationTable> {
        self.scheduler.table()
    }

    /// Counters of the topic route labelled `topic@source`.
    pub fn topic_stats(&self, label: &str) -> Option<&Arc<RouteStats>> {
        self.topic_stats.get(label)
    }

    /// Counters of the service route labelled `service@client->provider`.
    pub fn service_stats(&self, label: &str) -> Option<&Arc<ServiceStats>> {
        self.service_stats.get(label)
    }

    /// Every topic route with its counters, ordered by label.
    pub fn topic_routes(&self) -> impl Iterator<Item = (&str, &RouteStats)> {
        self.topic_stats.iter().map(|(label, stats)| (label.as_str(), stats.as_ref()))
    }

    /// Every service route with its counters, ordered by label.
    pub fn service_routes(&self) -> impl Iterator<Item = (&str, &ServiceStats)> {
        self.service_stats.iter().map(|(label, stats)| (label.as_str(), stats.as_ref()))
    }

    /// One pass over every running system.  Returns how many still run.
    pub fn spin_once(&mut self) -> usize {
        self.scheduler.spin_once_all()
    }

    pub fn run(&mut self, shutdown: &AtomicBool) {
        self.scheduler.run(shutdown);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
