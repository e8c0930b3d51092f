//! [`Scheduler`] – lifecycle and driver loop for every system handle.
//!
//! Each handle moves through
//!
//! ```text
//! Unconfigured ──configure ok──▶ Configured ──start──▶ Running ──▶ Stopped
//! ```
//!
//! A running handle is spun once per pass.  When `okay()` turns false or
//! `spin_once()` returns false the handle is stopped: it is never called
//! again, its [`Liveness`] flag is cleared so routers drop its traffic, and
//! every in-flight call it takes part in is removed from the correlation
//! table, reported as unresolved, and abandoned on its client proxy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use switchyard_middleware::{CallCorrelationTable, InFlightCall, Liveness, SystemHandle};
use switchyard_types::{BridgeError, ConfigNode, RequiredTypes, TypeRegistry};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
}

struct ManagedSystem {
    name: String,
    handle: Box<dyn SystemHandle>,
    state: SystemState,
    liveness: Liveness,
}

impl ManagedSystem {
    /// Move to `Stopped` and drain the calls that can no longer complete.
    fn halt(&mut self, table: &CallCorrelationTable, reason: &str) -> Vec<BridgeError> {
        if self.state == SystemState::Stopped {
            return Vec::new();
        }
        self.state = SystemState::Stopped;
        self.liveness.mark_stopped();
        let orphaned = abandon_all(
            table.close_system(&self.name),
            &format!("system '{}' stopped", self.name),
        );
        info!(system = %self.name, reason, orphaned = orphaned.len(), "system stopped");
        for error in &orphaned {
            warn!(system = %self.name, %error, "in-flight call dropped");
        }
        orphaned
    }
}

/// Tell each client its call is over and turn the records into errors.
fn abandon_all(calls: Vec<InFlightCall>, reason: &str) -> Vec<BridgeError> {
    calls
        .into_iter()
        .map(|call| {
            call.client.abandon(call.handle);
            call.unresolved(reason)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

pub struct Scheduler {
    systems: Vec<ManagedSystem>,
    table: Arc<CallCorrelationTable>,
    call_timeout: Option<Duration>,
    idle_sleep: Duration,
}

impl Scheduler {
    pub fn new(table: Arc<CallCorrelationTable>) -> Self {
        Self {
            systems: Vec::new(),
            table,
            call_timeout: None,
            idle_sleep: Duration::from_millis(1),
        }
    }

    /// Expire in-flight calls older than `timeout` on every pass.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Pause between passes of [`Scheduler::run`].
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn table(&self) -> &Arc<CallCorrelationTable> {
        &self.table
    }

    /// Take ownership of `handle` under `name`, in state `Unconfigured`.
    ///
    /// Returns the liveness flag routers should observe for this system.
    pub fn add(&mut self, name: &str, handle: Box<dyn SystemHandle>) -> Result<Liveness, BridgeError> {
        if self.systems.iter().any(|s| s.name == name) {
            return Err(BridgeError::Config(format!("system '{name}' added twice")));
        }
        let liveness = Liveness::new();
        self.systems.push(ManagedSystem {
            name: name.to_string(),
            handle,
            state: SystemState::Unconfigured,
            liveness: liveness.clone(),
        });
        Ok(liveness)
    }

    /// Configure `name`.  Success moves it to `Configured`; failure leaves it
    /// `Unconfigured`.
    pub fn configure(
        &mut self,
        name: &str,
        required: &RequiredTypes,
        config: &ConfigNode,
        registry: &TypeRegistry,
    ) -> Result<(), BridgeError> {
        let system = self.find_mut(name)?;
        match system.state {
            SystemState::Stopped => return Err(BridgeError::HandleStopped(name.to_string())),
            SystemState::Unconfigured => {}
            SystemState::Configured | SystemState::Running => return Ok(()),
        }
        system.handle.configure(required, config, registry)?;
        system.state = SystemState::Configured;
        debug!(
            system = name,
            messages = required.messages.len(),
            services = required.services.len(),
            "system configured"
        );
        Ok(())
    }

    /// Borrow a configured or running handle for wiring.
    ///
    /// # Errors
    ///
    /// [`BridgeError::HandleStopped`] once the handle has stopped, and
    /// [`BridgeError::Config`] for an unknown name.
    pub fn handle_mut(&mut self, name: &str) -> Result<(&mut dyn SystemHandle, Liveness), BridgeError> {
        let system = self.find_mut(name)?;
        if system.state == SystemState::Stopped {
            return Err(BridgeError::HandleStopped(name.to_string()));
        }
        Ok((system.handle.as_mut(), system.liveness.clone()))
    }

    pub fn state(&self, name: &str) -> Option<SystemState> {
        self.systems.iter().find(|s| s.name == name).map(|s| s.state)
    }

    /// Admit every `Configured` handle into `Running`.
    pub fn start(&mut self) {
        for system in &mut self.systems {
            match system.state {
                SystemState::Configured => {
                    system.state = SystemState::Running;
                    debug!(system = %system.name, "system running");
                }
                SystemState::Unconfigured => {
                    warn!(system = %system.name, "unconfigured system not started");
                }
                SystemState::Running | SystemState::Stopped => {}
            }
        }
    }

    /// Number of handles in `Running`.
    pub fn running(&self) -> usize {
        self.systems
            .iter()
            .filter(|s| s.state == SystemState::Running)
            .count()
    }

    /// Spin every running handle once, stopping the ones that report
    /// failure, then expire overdue calls.  Returns the number still running.
    pub fn spin_once_all(&mut self) -> usize {
        for system in &mut self.systems {
            if system.state != SystemState::Running {
                continue;
            }
            if !system.handle.okay() {
                system.halt(&self.table, "not okay");
            } else if !system.handle.spin_once() {
                system.halt(&self.table, "spin_once returned false");
            }
        }
        if self.call_timeout.is_some() {
            self.sweep_expired(Instant::now());
        }
        self.running()
    }

    /// Stop `name` explicitly.  Returns the calls it orphaned.
    pub fn stop(&mut self, name: &str) -> Result<Vec<BridgeError>, BridgeError> {
        let table = Arc::clone(&self.table);
        Ok(self.find_mut(name)?.halt(&table, "requested"))
    }

    /// Remove and abandon calls older than the configured timeout as of
    /// `now`.
    pub fn sweep_expired(&self, now: Instant) -> Vec<BridgeError> {
        let Some(timeout) = self.call_timeout else {
            return Vec::new();
        };
        let expired = abandon_all(
            self.table.expire(timeout, now),
            &format!("no response within {} ms", timeout.as_millis()),
        );
        for error in &expired {
            warn!(%error, "in-flight call expired");
        }
        expired
    }

    /// Drive every running handle until `shutdown` is raised or nothing is
    /// left running.  All handles are stopped on return.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(systems = self.running(), "scheduler started");
        while !shutdown.load(Ordering::SeqCst) {
            if self.spin_once_all() == 0 {
                info!("every system has stopped");
                break;
            }
            thread::sleep(self.idle_sleep);
        }
        let table = Arc::clone(&self.table);
        for system in &mut self.systems {
            system.halt(&table, "shutdown");
        }
        info!("scheduler finished");
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut ManagedSystem, BridgeError> {
        self.systems
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| BridgeError::Config(format!("unknown system '{name}'")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
