//! [`PluginRegistry`] – backend name → system handle factory.
//!
//! The registry is an ordinary value: create it at startup, populate it with
//! explicit [`PluginRegistry::register`] calls, and drop it at shutdown.
//! Whatever mechanism brings plugin code into the process (static linking,
//! dynamic loading) only has to end in a `register` call.

use std::collections::HashMap;

use switchyard_types::BridgeError;
use tracing::debug;

use crate::system::SystemHandle;

/// Constructor for one backend's handles.
pub type SystemFactory = Box<dyn Fn() -> Box<dyn SystemHandle> + Send + Sync>;

#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, SystemFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DuplicatePlugin`] if `name` is already taken; the
    /// existing factory is kept.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), BridgeError>
    where
        F: Fn() -> Box<dyn SystemHandle> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(BridgeError::DuplicatePlugin(name));
        }
        debug!(plugin = %name, "registered system plugin");
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Build a fresh handle from the factory registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn SystemHandle>, BridgeError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| BridgeError::PluginNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
