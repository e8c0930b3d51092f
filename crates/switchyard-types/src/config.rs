//! [`BridgeConfig`] – the deserialised bridge description, and the resolved
//! [`TopicRoute`] / [`ServiceRoute`] values derived from it.
//!
//! The configuration is format-agnostic here; the CLI loads it from TOML.
//! Per-system and per-route blocks are kept as opaque [`ConfigNode`]s and
//! forwarded untouched to the backend that owns them.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::declaration::{EnumDeclaration, ServiceTypeDeclaration, TypeDeclaration};
use crate::error::BridgeError;
use crate::{ConfigNode, RequiredTypes};

// ─────────────────────────────────────────────────────────────────────────────
// Description
// ─────────────────────────────────────────────────────────────────────────────

/// Root of a bridge description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Scheduler tuning.
    #[serde(default)]
    pub settings: Settings,

    /// Backend endpoints keyed by system name.
    #[serde(default)]
    pub systems: BTreeMap<String, SystemConfig>,

    /// Message schemas declared inline, registered before any backend
    /// configures.
    #[serde(default)]
    pub types: Vec<TypeDeclaration>,

    #[serde(default)]
    pub enums: Vec<EnumDeclaration>,

    #[serde(default)]
    pub service_types: Vec<ServiceTypeDeclaration>,

    /// Topic routes keyed by topic name.
    #[serde(default)]
    pub topics: BTreeMap<String, TopicConfig>,

    /// Service routes keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Milliseconds after which an unanswered service call is dropped and
    /// reported as unresolved.  Absent: calls wait until a handle stops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,

    /// Milliseconds the driver loop sleeps between passes.
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
}

fn default_idle_sleep_ms() -> u64 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            call_timeout_ms: None,
            idle_sleep_ms: default_idle_sleep_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Name of the plugin that builds this system's handle.
    #[serde(rename = "type")]
    pub plugin: String,

    /// Opaque block passed to the handle's `configure`.
    #[serde(default)]
    pub config: ConfigNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TopicConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    /// Source system.
    pub from: String,
    /// Destination systems, in fan-out order.
    pub to: Vec<String>,
    /// Per-system renames of the topic and its type.
    #[serde(default)]
    pub remap: BTreeMap<String, Remap>,
    /// Per-system opaque route blocks.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    /// Provider system.
    pub server: String,
    /// Client systems; each yields one service route to `server`.
    pub clients: Vec<String>,
    #[serde(default)]
    pub remap: BTreeMap<String, Remap>,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigNode>,
}

/// How one system names a topic/service and its type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Remap {
    #[serde(default, alias = "service", skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved routes
// ─────────────────────────────────────────────────────────────────────────────

/// One side of a route, as seen by the system that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub system: String,
    /// Topic or service name on this system.
    pub name: String,
    pub type_name: String,
    pub config: ConfigNode,
}

impl Endpoint {
    fn resolve(
        system: &str,
        name: &str,
        type_name: &str,
        remap: &BTreeMap<String, Remap>,
        config: &BTreeMap<String, ConfigNode>,
    ) -> Self {
        let remap = remap.get(system);
        Self {
            system: system.to_string(),
            name: remap
                .and_then(|r| r.topic.clone())
                .unwrap_or_else(|| name.to_string()),
            type_name: remap
                .and_then(|r| r.type_name.clone())
                .unwrap_or_else(|| type_name.to_string()),
            config: config.get(system).cloned().unwrap_or_default(),
        }
    }
}

/// One subscription fanned out to N publishers.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRoute {
    pub topic: String,
    pub source: Endpoint,
    pub destinations: Vec<Endpoint>,
}

impl TopicRoute {
    /// `topic@source`, used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}@{}", self.topic, self.source.system)
    }
}

/// One client proxy paired with one provider proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRoute {
    pub service: String,
    pub client: Endpoint,
    pub provider: Endpoint,
}

impl ServiceRoute {
    /// `service@client->provider`, used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}@{}->{}", self.service, self.client.system, self.provider.system)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

impl BridgeConfig {
    /// Resolve every topic entry into a [`TopicRoute`], applying remaps.
    pub fn topic_routes(&self) -> Vec<TopicRoute> {
        self.topics
            .iter()
            .map(|(topic, t)| TopicRoute {
                topic: topic.clone(),
                source: Endpoint::resolve(&t.from, topic, &t.type_name, &t.remap, &t.config),
                destinations: t
                    .to
                    .iter()
                    .map(|dest| Endpoint::resolve(dest, topic, &t.type_name, &t.remap, &t.config))
                    .collect(),
            })
            .collect()
    }

    /// Resolve every service entry into one [`ServiceRoute`] per client.
    pub fn service_routes(&self) -> Vec<ServiceRoute> {
        self.services
            .iter()
            .flat_map(|(service, s)| {
                let provider =
                    Endpoint::resolve(&s.server, service, &s.type_name, &s.remap, &s.config);
                s.clients.iter().map(move |client| ServiceRoute {
                    service: service.clone(),
                    client: Endpoint::resolve(client, service, &s.type_name, &s.remap, &s.config),
                    provider: provider.clone(),
                })
            })
            .collect()
    }

    /// The message and service types each system must support, derived from
    /// the routes that touch it.
    pub fn required_types(&self) -> BTreeMap<String, RequiredTypes> {
        let mut required: BTreeMap<String, RequiredTypes> = self
            .systems
            .keys()
            .map(|name| (name.clone(), RequiredTypes::default()))
            .collect();
        for route in self.topic_routes() {
            for endpoint in std::iter::once(&route.source).chain(&route.destinations) {
                required
                    .entry(endpoint.system.clone())
                    .or_default()
                    .messages
                    .insert(endpoint.type_name.clone());
            }
        }
        for route in self.service_routes() {
            for endpoint in [&route.client, &route.provider] {
                required
                    .entry(endpoint.system.clone())
                    .or_default()
                    .services
                    .insert(endpoint.type_name.clone());
            }
        }
        required
    }

    /// Structural checks that do not need any backend: every route names a
    /// declared system, has at least one destination/client, and lists each
    /// destination/client once.
    ///
    /// All problems are reported together in a [`BridgeError::Setup`].
    pub fn validate(&self) -> Result<(), BridgeError> {
        let mut errors = Vec::new();
        let mut check_system = |route: &str, system: &str| {
            if !self.systems.contains_key(system) {
                errors.push(BridgeError::Config(format!(
                    "route '{route}' references undeclared system '{system}'"
                )));
            }
        };
        for (topic, t) in &self.topics {
            check_system(topic, &t.from);
            for dest in &t.to {
                check_system(topic, dest);
            }
        }
        for (service, s) in &self.services {
            check_system(service, &s.server);
            for client in &s.clients {
                check_system(service, client);
            }
        }
        for (topic, t) in &self.topics {
            if t.to.is_empty() {
                errors.push(BridgeError::Config(format!(
                    "topic '{topic}' has no destinations"
                )));
            }
            for dest in repeated(&t.to) {
                errors.push(BridgeError::Config(format!(
                    "topic '{topic}' lists destination '{dest}' more than once"
                )));
            }
        }
        for (service, s) in &self.services {
            if s.clients.is_empty() {
                errors.push(BridgeError::Config(format!(
                    "service '{service}' has no clients"
                )));
            }
            for client in repeated(&s.clients) {
                errors.push(BridgeError::Config(format!(
                    "service '{service}' lists client '{client}' more than once"
                )));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Setup(errors))
        }
    }
}

/// Names occurring more than once, each reported once, in first-seen order.
fn repeated(names: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    names
        .iter()
        .filter(|name| !seen.insert(name.as_str()) && reported.insert(name.as_str()))
        .map(String::as_str)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [settings]
        call_timeout_ms = 500

        [systems.ros2]
        type = "loopback"

        [systems.fleet]
        type = "loopback"
        config = { namespace = "robots" }

        [systems.web]
        type = "loopback"

        [topics.chatter]
        type = "std_msgs/String"
        from = "ros2"
        to = ["fleet", "web"]

        [topics.chatter.remap.web]
        topic = "/ui/chatter"
        type = "web/Text"

        [topics.chatter.config.fleet]
        qos = "reliable"

        [services.ping]
        type = "example/Ping"
        server = "fleet"
        clients = ["ros2", "web"]
    "#;

    fn sample() -> BridgeConfig {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn parses_sample_with_defaults() {
        let cfg = sample();
        assert_eq!(cfg.settings.call_timeout_ms, Some(500));
        assert_eq!(cfg.settings.idle_sleep_ms, 1);
        assert_eq!(cfg.systems.len(), 3);
        assert_eq!(cfg.systems["fleet"].config["namespace"], "robots");
        assert!(cfg.systems["ros2"].config.is_null());
    }

    #[test]
    fn topic_routes_apply_remap_and_route_config() {
        let routes = sample().topic_routes();
        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.source.system, "ros2");
        assert_eq!(route.source.name, "chatter");
        assert_eq!(route.destinations.len(), 2);

        let fleet = &route.destinations[0];
        assert_eq!(fleet.type_name, "std_msgs/String");
        assert_eq!(fleet.config["qos"], "reliable");

        let web = &route.destinations[1];
        assert_eq!(web.name, "/ui/chatter");
        assert_eq!(web.type_name, "web/Text");
        assert!(web.config.is_null());
    }

    #[test]
    fn each_client_yields_a_service_route() {
        let routes = sample().service_routes();
        let labels: Vec<String> = routes.iter().map(ServiceRoute::label).collect();
        assert_eq!(labels, ["ping@ros2->fleet", "ping@web->fleet"]);
    }

    #[test]
    fn required_types_follow_remaps() {
        let required = sample().required_types();
        assert!(required["web"].messages.contains("web/Text"));
        assert!(!required["web"].messages.contains("std_msgs/String"));
        assert!(required["ros2"].messages.contains("std_msgs/String"));
        assert!(required["fleet"].services.contains("example/Ping"));
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut cfg = sample();
        cfg.topics.get_mut("chatter").unwrap().to.push("ghost".into());
        cfg.services.get_mut("ping").unwrap().clients.clear();

        let errors = cfg.validate().unwrap_err().into_errors();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, BridgeError::Config(_))));
    }

    #[test]
    fn repeated_destinations_and_clients_are_one_error_each() {
        let mut cfg = sample();
        cfg.topics.get_mut("chatter").unwrap().to = vec!["fleet".into(), "fleet".into(), "fleet".into()];
        cfg.services.get_mut("ping").unwrap().clients.push("web".into());

        let errors = cfg.validate().unwrap_err().into_errors();
        assert_eq!(
            errors,
            vec![
                BridgeError::Config(
                    "topic 'chatter' lists destination 'fleet' more than once".to_string()
                ),
                BridgeError::Config(
                    "service 'ping' lists client 'web' more than once".to_string()
                ),
            ]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = toml::from_str::<BridgeConfig>("[systems.a]\ntype = \"x\"\nbogus = 1\n");
        assert!(result.is_err());
    }
}
