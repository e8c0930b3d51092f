//! [`CallHandle`] – opaque correlation token for forwarded service calls.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token tying a forwarded request to its eventual response.
///
/// Minted by the client side of a service route and carried unmodified to
/// the provider and back.  The inner identifier is deliberately not exposed:
/// holders may copy and compare a handle but cannot derive meaning from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallHandle(Uuid);

impl CallHandle {
    /// Mint a fresh, process-unique handle.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0.simple())
    }
}
