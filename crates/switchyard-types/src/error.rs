//! [`BridgeError`] – the single error type shared by every Switchyard crate.
//!
//! Variants are grouped by the layer that raises them:
//!
//! | Layer | Variants |
//! |---|---|
//! | Type system | `SchemaConflict`, `InvalidSchema`, `TypeMismatch`, `MissingRequiredField`, `FieldNotFound`, `UnknownType`, `RegistryFrozen` |
//! | Handle setup | `ConfigurationFailed`, `CapabilityUnsupported`, `PluginNotFound`, `DuplicatePlugin`, `Config` |
//! | Route wiring | `RouteWiringFailed` |
//! | Correlation | `UnknownCallHandle`, `DuplicateCallHandle`, `UnresolvedCall` |
//! | Runtime | `HandleStopped`, `PublishFailed`, `ServiceUnavailable` |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handle::CallHandle;

/// The four orthogonal roles a system handle may play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Receive messages from a backend topic.
    TopicSubscribe,
    /// Send messages to a backend topic.
    TopicPublish,
    /// Accept requests from backend clients and route them onward.
    ServiceClient,
    /// Forward requests to a backend service implementation.
    ServiceProvider,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::TopicSubscribe => write!(f, "topic-subscribe"),
            Capability::TopicPublish => write!(f, "topic-publish"),
            Capability::ServiceClient => write!(f, "service-client"),
            Capability::ServiceProvider => write!(f, "service-provider"),
        }
    }
}

/// Global error type spanning schema problems, setup failures and runtime
/// routing faults.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Schema Conflict: type '{0}' is already registered with a different schema")]
    SchemaConflict(String),

    #[error("Invalid Schema for '{type_name}': {details}")]
    InvalidSchema { type_name: String, details: String },

    #[error("Type Mismatch on field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Missing Required Field '{field}' while converting into '{type_name}'")]
    MissingRequiredField { type_name: String, field: String },

    #[error("Field Not Found: '{field}' in '{type_name}'")]
    FieldNotFound { type_name: String, field: String },

    #[error("Unknown Type: '{0}'")]
    UnknownType(String),

    #[error("Type Registry is frozen; cannot register '{0}'")]
    RegistryFrozen(String),

    #[error("Configuration Failed for system '{system}': {reason}")]
    ConfigurationFailed { system: String, reason: String },

    #[error("Capability Unsupported: system '{system}' does not provide {capability}")]
    CapabilityUnsupported {
        system: String,
        capability: Capability,
    },

    #[error("Plugin Not Found: '{0}'")]
    PluginNotFound(String),

    #[error("Duplicate Plugin: '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Route Wiring Failed for '{route}': {reason}")]
    RouteWiringFailed { route: String, reason: String },

    #[error("Unknown Call Handle: {0}")]
    UnknownCallHandle(CallHandle),

    #[error("Duplicate Call Handle: {0} is already in flight")]
    DuplicateCallHandle(CallHandle),

    #[error("Unresolved Call {handle} on service '{service}': {reason}")]
    UnresolvedCall {
        handle: CallHandle,
        service: String,
        reason: String,
    },

    #[error("Handle Stopped: system '{0}' no longer accepts calls")]
    HandleStopped(String),

    #[error("Publish Failed on '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Service Unavailable: nothing is serving '{0}'")]
    ServiceUnavailable(String),

    #[error("Setup failed with {} error(s)", .0.len())]
    Setup(Vec<BridgeError>),
}

impl BridgeError {
    /// Flatten a [`BridgeError::Setup`] aggregate into its individual errors.
    ///
    /// Any other variant is returned as a one-element list.
    pub fn into_errors(self) -> Vec<BridgeError> {
        match self {
            BridgeError::Setup(errors) => errors.into_iter().flat_map(Self::into_errors).collect(),
            other => vec![other],
        }
    }
}
