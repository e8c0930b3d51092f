//! [`TypeRegistry`] – process-wide table of known schemas.
//!
//! Each backend registers the types it will use while it configures.
//! Registration is idempotent per name: an identical schema returns the
//! existing entry, a different one fails with [`BridgeError::SchemaConflict`].
//! Once every backend has configured, the owner calls
//! [`TypeRegistry::freeze`]; the table is read-only from then on and safe to
//! query from any thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::BridgeError;
use crate::schema::{DynamicType, ServiceType};

#[derive(Default)]
struct Tables {
    types: HashMap<String, Arc<DynamicType>>,
    services: HashMap<String, Arc<ServiceType>>,
    frozen: bool,
}

/// Shared name → schema table.  Share it as `Arc<TypeRegistry>`.
#[derive(Default)]
pub struct TypeRegistry {
    tables: RwLock<Tables>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type together with every struct type it nests.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::SchemaConflict`] – the name (or a nested name) is
    ///   already bound to a different schema.
    /// * [`BridgeError::RegistryFrozen`] – configuration has completed.
    pub fn register(&self, ty: impl Into<Arc<DynamicType>>) -> Result<Arc<DynamicType>, BridgeError> {
        let ty = ty.into();
        let mut tables = self.tables.write();
        Self::insert_type(&mut tables, ty)
    }

    /// Register a service type and its request and response types.
    pub fn register_service(
        &self,
        service: impl Into<Arc<ServiceType>>,
    ) -> Result<Arc<ServiceType>, BridgeError> {
        let service = service.into();
        let mut tables = self.tables.write();
        if tables.frozen {
            return Err(BridgeError::RegistryFrozen(service.name().to_string()));
        }
        if let Some(existing) = tables.services.get(service.name()) {
            return if existing.as_ref() == service.as_ref() {
                Ok(Arc::clone(existing))
            } else {
                Err(BridgeError::SchemaConflict(service.name().to_string()))
            };
        }
        Self::insert_type(&mut tables, Arc::clone(service.request()))?;
        Self::insert_type(&mut tables, Arc::clone(service.response()))?;
        debug!(service = %service.name(), "registered service type");
        tables
            .services
            .insert(service.name().to_string(), Arc::clone(&service));
        Ok(service)
    }

    fn insert_type(tables: &mut Tables, ty: Arc<DynamicType>) -> Result<Arc<DynamicType>, BridgeError> {
        if tables.frozen {
            return Err(BridgeError::RegistryFrozen(ty.name().to_string()));
        }
        if let Some(existing) = tables.types.get(ty.name()) {
            return if existing.as_ref() == ty.as_ref() {
                Ok(Arc::clone(existing))
            } else {
                Err(BridgeError::SchemaConflict(ty.name().to_string()))
            };
        }
        for nested in ty.nested_types() {
            Self::insert_type(tables, nested)?;
        }
        debug!(type_name = %ty.name(), fields = ty.fields().len(), "registered type");
        tables.types.insert(ty.name().to_string(), Arc::clone(&ty));
        Ok(ty)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DynamicType>> {
        self.tables.read().types.get(name).cloned()
    }

    /// Like [`get`][Self::get] but a missing entry is an error.
    pub fn require(&self, name: &str) -> Result<Arc<DynamicType>, BridgeError> {
        self.get(name)
            .ok_or_else(|| BridgeError::UnknownType(name.to_string()))
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceType>> {
        self.tables.read().services.get(name).cloned()
    }

    pub fn require_service(&self, name: &str) -> Result<Arc<ServiceType>, BridgeError> {
        self.service(name)
            .ok_or_else(|| BridgeError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.read().types.contains_key(name)
    }

    pub fn contains_service(&self, name: &str) -> bool {
        self.tables.read().services.contains_key(name)
    }

    /// Registered message type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().types.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the registry to further registration.
    pub fn freeze(&self) {
        self.tables.write().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.tables.read().frozen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, PrimitiveKind};
    use std::thread;

    fn chatter(name: &str, kind: PrimitiveKind) -> DynamicType {
        DynamicType::builder(name).field("data", kind).build().unwrap()
    }

    #[test]
    fn lookup_returns_declared_fields() {
        let registry = TypeRegistry::new();
        registry
            .register(
                DynamicType::builder("sensor/Range")
                    .field("min", PrimitiveKind::Float32)
                    .field("max", PrimitiveKind::Float32)
                    .field("frame", FieldKind::string())
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let found = registry.require("sensor/Range").unwrap();
        let names: Vec<&str> = found.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["min", "max", "frame"]);
    }

    #[test]
    fn identical_reregistration_is_idempotent() {
        let registry = TypeRegistry::new();
        let first = registry.register(chatter("std/String", PrimitiveKind::String)).unwrap();
        let second = registry.register(chatter("std/String", PrimitiveKind::String)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_reregistration_fails() {
        let registry = TypeRegistry::new();
        registry.register(chatter("std/String", PrimitiveKind::String)).unwrap();
        let err = registry
            .register(chatter("std/String", PrimitiveKind::Char))
            .unwrap_err();
        assert_eq!(err, BridgeError::SchemaConflict("std/String".to_string()));
    }

    #[test]
    fn nested_types_are_registered() {
        let registry = TypeRegistry::new();
        let inner = Arc::new(chatter("inner/T", PrimitiveKind::Int8));
        registry
            .register(
                DynamicType::builder("outer/T")
                    .field("inner", FieldKind::Struct(inner))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert!(registry.contains("inner/T"));
        assert_eq!(registry.type_names(), ["inner/T", "outer/T"]);
    }

    #[test]
    fn service_registration_registers_request_and_response() {
        let registry = TypeRegistry::new();
        let request = Arc::new(chatter("srv/PingRequest", PrimitiveKind::String));
        let response = Arc::new(chatter("srv/PingResponse", PrimitiveKind::String));
        registry
            .register_service(ServiceType::new("srv/Ping", request, response))
            .unwrap();

        assert!(registry.contains_service("srv/Ping"));
        assert!(registry.contains("srv/PingRequest"));
        assert!(registry.contains("srv/PingResponse"));
    }

    #[test]
    fn frozen_registry_rejects_new_types() {
        let registry = TypeRegistry::new();
        registry.freeze();
        let err = registry
            .register(chatter("late/T", PrimitiveKind::Bool))
            .unwrap_err();
        assert!(matches!(err, BridgeError::RegistryFrozen(_)));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.require("nope").unwrap_err(),
            BridgeError::UnknownType("nope".to_string())
        );
    }

    #[test]
    fn concurrent_reads_after_freeze() {
        let registry = Arc::new(TypeRegistry::new());
        registry.register(chatter("std/String", PrimitiveKind::String)).unwrap();
        registry.freeze();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..1000).all(|_| registry.get("std/String").is_some())
                })
            })
            .collect();
        for reader in readers {
            assert!(reader.join().unwrap());
        }
    }
}
