//! [`CallCorrelationTable`] – the book of in-flight service calls.
//!
//! A record is inserted when a request crosses a service route and removed
//! exactly once: when its response is delivered, when one of the handles it
//! depends on stops, or when it outlives the configured call timeout.
//!
//! Requests and responses arrive from arbitrary threads.  A single
//! [`parking_lot::Mutex`] around the book makes insert, resolve and removal
//! linearizable per handle; the lock is never held while calling into a
//! backend.
//!
//! Closing a system and inserting a record touching it are ordered by the
//! same lock, so a record can never slip in after its system was drained.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use switchyard_types::{BridgeError, CallHandle, DynamicType};

use crate::system::ServiceClient;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Bookkeeping for one forwarded request that has not been answered yet.
pub struct InFlightCall {
    pub handle: CallHandle,
    /// The proxy that must receive the response.
    pub client: Arc<dyn ServiceClient>,
    pub client_system: String,
    pub provider_system: String,
    pub service: String,
    /// Type the response is converted to before it reaches `client`.
    pub response_type: Arc<DynamicType>,
    /// Monotonic issue time; the call timeout is measured from here.
    pub started: Instant,
    /// Wall-clock issue time, shown in `Debug` output.
    pub issued_at: DateTime<Utc>,
}

impl InFlightCall {
    /// A record issued now.
    pub fn new(
        handle: CallHandle,
        client: Arc<dyn ServiceClient>,
        client_system: impl Into<String>,
        provider_system: impl Into<String>,
        service: impl Into<String>,
        response_type: Arc<DynamicType>,
    ) -> Self {
        Self {
            handle,
            client,
            client_system: client_system.into(),
            provider_system: provider_system.into(),
            service: service.into(),
            response_type,
            started: Instant::now(),
            issued_at: Utc::now(),
        }
    }

    /// The error reported when this call can no longer be answered.
    pub fn unresolved(&self, reason: impl Into<String>) -> BridgeError {
        BridgeError::UnresolvedCall {
            handle: self.handle,
            service: self.service.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for InFlightCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightCall")
            .field("handle", &self.handle)
            .field("client_system", &self.client_system)
            .field("provider_system", &self.provider_system)
            .field("service", &self.service)
            .field("response_type", &self.response_type.name())
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Book {
    inflight: HashMap<CallHandle, InFlightCall>,
    /// Systems that have stopped; no new record may reference them.
    closed: HashSet<String>,
}

#[derive(Default)]
pub struct CallCorrelationTable {
    book: Mutex<Book>,
}

impl CallCorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new in-flight call.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::HandleStopped`] if the client or provider system has
    ///   already been closed with [`CallCorrelationTable::close_system`].
    /// - [`BridgeError::DuplicateCallHandle`] if a call with the same handle
    ///   is still outstanding; the existing record is left untouched.
    pub fn insert(&self, call: InFlightCall) -> Result<(), BridgeError> {
        let mut book = self.book.lock();
        for system in [&call.client_system, &call.provider_system] {
            if book.closed.contains(system) {
                return Err(BridgeError::HandleStopped(system.clone()));
            }
        }
        if book.inflight.contains_key(&call.handle) {
            return Err(BridgeError::DuplicateCallHandle(call.handle));
        }
        book.inflight.insert(call.handle, call);
        Ok(())
    }

    /// Remove and return the record for `handle`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownCallHandle`] if no such call is outstanding,
    /// including when it was already resolved.
    pub fn resolve(&self, handle: CallHandle) -> Result<InFlightCall, BridgeError> {
        self.book
            .lock()
            .inflight
            .remove(&handle)
            .ok_or(BridgeError::UnknownCallHandle(handle))
    }

    pub fn contains(&self, handle: CallHandle) -> bool {
        self.book.lock().inflight.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.book.lock().inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close `system` and remove every call whose client or provider it is.
    ///
    /// Later inserts touching `system` fail with
    /// [`BridgeError::HandleStopped`].
    pub fn close_system(&self, system: &str) -> Vec<InFlightCall> {
        let mut book = self.book.lock();
        book.closed.insert(system.to_string());
        Self::remove_where(&mut book, |call| {
            call.client_system == system || call.provider_system == system
        })
    }

    pub fn is_closed(&self, system: &str) -> bool {
        self.book.lock().closed.contains(system)
    }

    /// Remove every call started more than `max_age` before `now`.
    pub fn expire(&self, max_age: Duration, now: Instant) -> Vec<InFlightCall> {
        let mut book = self.book.lock();
        Self::remove_where(&mut book, |call| {
            now.saturating_duration_since(call.started) > max_age
        })
    }

    fn remove_where(book: &mut Book, predicate: impl Fn(&InFlightCall) -> bool) -> Vec<InFlightCall> {
        let doomed: Vec<CallHandle> = book
            .inflight
            .values()
            .filter(|call| predicate(*call))
            .map(|call| call.handle)
            .collect();
        doomed
            .into_iter()
            .filter_map(|handle| book.inflight.remove(&handle))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::{DynamicData, FieldKind};
    use std::thread;

    struct NullClient;

    impl ServiceClient for NullClient {
        fn receive_response(&self, _call: CallHandle, _response: DynamicData) {}
    }

    fn record(handle: CallHandle, client_system: &str, provider_system: &str) -> InFlightCall {
        let pong = DynamicType::builder("srv/Pong")
            .field("data", FieldKind::string())
            .build()
            .unwrap();
        InFlightCall::new(
            handle,
            Arc::new(NullClient),
            client_system,
            provider_system,
            "ping",
            Arc::new(pong),
        )
    }

    #[test]
    fn resolve_removes_exactly_once() {
        let table = CallCorrelationTable::new();
        let h = CallHandle::mint();
        table.insert(record(h, "a", "b")).unwrap();
        assert!(table.contains(h));

        let resolved = table.resolve(h).unwrap();
        assert_eq!(resolved.handle, h);
        assert_eq!(table.resolve(h).unwrap_err(), BridgeError::UnknownCallHandle(h));
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let table = CallCorrelationTable::new();
        let h = CallHandle::mint();
        table.insert(record(h, "a", "b")).unwrap();
        let err = table.insert(record(h, "c", "d")).unwrap_err();
        assert_eq!(err, BridgeError::DuplicateCallHandle(h));
        assert_eq!(table.resolve(h).unwrap().client_system, "a");
    }

    #[test]
    fn close_system_matches_either_side() {
        let table = CallCorrelationTable::new();
        table.insert(record(CallHandle::mint(), "a", "b")).unwrap();
        table.insert(record(CallHandle::mint(), "b", "c")).unwrap();
        table.insert(record(CallHandle::mint(), "a", "c")).unwrap();

        let drained = table.close_system("b");
        assert_eq!(drained.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.is_closed("b"));
        let err = drained[0].unresolved("provider stopped");
        assert!(matches!(err, BridgeError::UnresolvedCall { .. }));
    }

    #[test]
    fn closed_system_refuses_late_records() {
        let table = CallCorrelationTable::new();
        assert!(table.close_system("b").is_empty());

        let late = CallHandle::mint();
        assert_eq!(
            table.insert(record(late, "a", "b")).unwrap_err(),
            BridgeError::HandleStopped("b".to_string())
        );
        assert_eq!(
            table.insert(record(late, "b", "c")).unwrap_err(),
            BridgeError::HandleStopped("b".to_string())
        );
        assert!(table.is_empty());
        table.insert(record(late, "a", "c")).unwrap();
    }

    #[test]
    fn expire_measures_age_on_the_monotonic_clock() {
        let table = CallCorrelationTable::new();
        let early = record(CallHandle::mint(), "a", "b");
        let base = early.started;
        table.insert(early).unwrap();
        let mut later = record(CallHandle::mint(), "a", "b");
        later.started = base + Duration::from_secs(4);
        let later_handle = later.handle;
        table.insert(later).unwrap();

        assert!(table.expire(Duration::from_secs(5), base + Duration::from_secs(5)).is_empty());

        let expired = table.expire(Duration::from_secs(5), base + Duration::from_secs(6));
        assert_eq!(expired.len(), 1);
        assert_ne!(expired[0].handle, later_handle);
        assert!(table.contains(later_handle));

        // `now` earlier than the start saturates to zero age.
        assert!(table.expire(Duration::from_secs(5), base).is_empty());
    }

    #[test]
    fn concurrent_insert_and_resolve_do_not_interfere() {
        let table = Arc::new(CallCorrelationTable::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let h = CallHandle::mint();
                        table.insert(record(h, "a", "b")).unwrap();
                        assert_eq!(table.resolve(h).unwrap().handle, h);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(table.is_empty());
    }
}
