//! `switchyard-types` – The Shared Vocabulary
//!
//! Everything that crosses a crate boundary inside Switchyard lives here:
//! the runtime type system, the process-wide type registry, the opaque call
//! handle, the global error type and the bridge configuration model.
//!
//! # Modules
//!
//! - [`schema`] – [`DynamicType`], [`FieldKind`], [`EnumType`] and
//!   [`ServiceType`]: immutable runtime schemas.
//! - [`value`] – [`DynamicData`] and [`Value`]: a closed tagged-variant value
//!   model conforming to exactly one [`DynamicType`].
//! - [`convert`] – field-by-field conversion between structurally compatible
//!   schemas owned by different backends.
//! - [`registry`] – [`TypeRegistry`]: name → schema table, write-once per
//!   type and frozen after configuration.
//! - [`config`] – [`BridgeConfig`] and the resolved [`TopicRoute`] /
//!   [`ServiceRoute`] wiring descriptions.
//! - [`declaration`] – schema declarations embedded in the configuration
//!   file, resolved into registry entries.

pub mod config;
pub mod convert;
pub mod declaration;
pub mod error;
pub mod handle;
pub mod registry;
pub mod schema;
pub mod value;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use config::{BridgeConfig, Endpoint, Remap, ServiceRoute, Settings, TopicRoute};
pub use error::{BridgeError, Capability};
pub use handle::CallHandle;
pub use registry::TypeRegistry;
pub use schema::{DynamicType, DynamicTypeBuilder, EnumType, Field, FieldKind, PrimitiveKind, ServiceType};
pub use value::{DynamicData, Value};

/// Opaque, capability-agnostic configuration document.
///
/// The core never interprets these blocks; it forwards them unmodified to the
/// backend that owns them.  An absent block is [`serde_json::Value::Null`].
pub type ConfigNode = serde_json::Value;

/// The set of message and service type names a backend must support.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredTypes {
    pub messages: BTreeSet<String>,
    pub services: BTreeSet<String>,
}

impl RequiredTypes {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.services.is_empty()
    }
}
