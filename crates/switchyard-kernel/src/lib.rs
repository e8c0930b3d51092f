//! `switchyard-kernel` – Lifecycle & Orchestration
//!
//! Owns every system handle and decides when each one runs.  It does not
//! move data itself; the routers in `switchyard-middleware` do that.
//!
//! # Modules
//!
//! - [`scheduler`] – [`Scheduler`][scheduler::Scheduler]: the per-handle
//!   state machine (`Unconfigured → Configured → Running → Stopped`) and the
//!   single-threaded driver loop that spins running handles, stops failed
//!   ones and expires overdue calls.
//! - [`bridge`] – [`Bridge`][bridge::Bridge]: builds handles from a
//!   [`BridgeConfig`][switchyard_types::BridgeConfig], configures them, wires
//!   every topic and service route, and reports all setup failures together.

pub mod bridge;
pub mod scheduler;

pub use bridge::Bridge;
pub use scheduler::{Scheduler, SystemState};
