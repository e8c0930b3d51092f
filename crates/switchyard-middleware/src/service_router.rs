//! [`ServiceRouter`] – pairs one client proxy with one provider proxy.
//!
//! A request entering through the client side carries a [`CallHandle`]
//! minted by the client backend.  The router records the call in the shared
//! [`CallCorrelationTable`] under that handle and passes it, unchanged, to the
//! provider together with a [`ResponseRelay`].  When the provider answers, the
//! relay resolves the record, converts the response to the client's type and
//! hands it to the original client proxy with the same handle.
//!
//! Wiring mirrors the topic router: [`ServiceRouter::attach_provider`] first,
//! then [`ServiceRouter::attach_client`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use switchyard_types::{
    BridgeError, CallHandle, DynamicData, DynamicType, ServiceRoute, TypeRegistry,
};
use tracing::{debug, info, warn};

use crate::correlation::{CallCorrelationTable, InFlightCall};
use crate::system::{Liveness, RequestCallback, ServiceClient, ServiceProvider, SystemHandle};

// ─────────────────────────────────────────────────────────────────────────────
// Counters
// ─────────────────────────────────────────────────────────────────────────────

/// Per-route counters.
#[derive(Debug, Default)]
pub struct ServiceStats {
    requests: AtomicU64,
    responses: AtomicU64,
    rejected: AtomicU64,
    unknown: AtomicU64,
}

impl ServiceStats {
    /// Requests forwarded to the provider.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Responses delivered to the client.
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Requests or responses that could not be forwarded.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Responses carrying a handle with no outstanding call.
    pub fn unknown(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay
// ─────────────────────────────────────────────────────────────────────────────

/// The [`ServiceClient`] a provider answers to.
///
/// One relay exists per service route.  It never holds a call itself; every
/// response is looked up in the correlation table by handle.
pub struct ResponseRelay {
    route: String,
    table: Arc<CallCorrelationTable>,
    stats: Arc<ServiceStats>,
}

impl ResponseRelay {
    /// Resolve `call` and forward `response` to its client.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnknownCallHandle`] if `call` is not in flight.
    /// - [`BridgeError::UnresolvedCall`] if the response does not convert to
    ///   the client's response type; the record is consumed and the client
    ///   is told to abandon the call.
    pub fn deliver(&self, call: CallHandle, response: DynamicData) -> Result<(), BridgeError> {
        let record = self.table.resolve(call).inspect_err(|_| {
            self.stats.unknown.fetch_add(1, Ordering::Relaxed);
        })?;
        let converted = match response.convert_to(&record.response_type) {
            Ok(converted) => converted,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                record.client.abandon(call);
                return Err(record.unresolved(format!("response conversion failed: {e}")));
            }
        };
        debug!(route = %self.route, %call, "delivering response");
        record.client.receive_response(call, converted);
        self.stats.responses.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl ServiceClient for ResponseRelay {
    fn receive_response(&self, call: CallHandle, response: DynamicData) {
        if let Err(e) = self.deliver(call, response) {
            warn!(route = %self.route, %call, error = %e, "dropped service response");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Forwarding
// ─────────────────────────────────────────────────────────────────────────────

struct AttachedProvider {
    proxy: Arc<dyn ServiceProvider>,
    request_type: Arc<DynamicType>,
    liveness: Liveness,
}

/// The state captured by the client proxy's request callback.
struct Forwarder {
    route: ServiceRoute,
    provider: AttachedProvider,
    client_liveness: Liveness,
    response_type: Arc<DynamicType>,
    table: Arc<CallCorrelationTable>,
    relay: Arc<ResponseRelay>,
    stats: Arc<ServiceStats>,
}

impl Forwarder {
    fn on_request(&self, request: DynamicData, client: Arc<dyn ServiceClient>, call: CallHandle) {
        match self.forward(request, &client, call) {
            Ok(()) => {
                self.stats.requests.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(route = %self.route.label(), %call, error = %e, "rejected service request");
                // A duplicate handle belongs to a call that is still in flight.
                if !matches!(e, BridgeError::DuplicateCallHandle(_)) {
                    client.abandon(call);
                }
            }
        }
    }

    fn forward(
        &self,
        request: DynamicData,
        client: &Arc<dyn ServiceClient>,
        call: CallHandle,
    ) -> Result<(), BridgeError> {
        if !self.client_liveness.is_alive() {
            return Err(BridgeError::HandleStopped(self.route.client.system.clone()));
        }
        if !self.provider.liveness.is_alive() {
            return Err(BridgeError::HandleStopped(self.route.provider.system.clone()));
        }
        let converted = request.convert_to(&self.provider.request_type)?;
        self.table.insert(InFlightCall::new(
            call,
            Arc::clone(client),
            self.route.client.system.as_str(),
            self.route.provider.system.as_str(),
            self.route.service.as_str(),
            Arc::clone(&self.response_type),
        ))?;
        let relay: Arc<dyn ServiceClient> = self.relay.clone();
        self.provider.proxy.call_service(converted, relay, call);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

pub struct ServiceRouter {
    route: ServiceRoute,
    table: Arc<CallCorrelationTable>,
    stats: Arc<ServiceStats>,
    provider: Option<AttachedProvider>,
}

impl ServiceRouter {
    pub fn new(route: ServiceRoute, table: Arc<CallCorrelationTable>) -> Self {
        Self {
            route,
            table,
            stats: Arc::new(ServiceStats::default()),
            provider: None,
        }
    }

    /// Create the provider proxy on the route's provider handle.
    pub fn attach_provider(
        &mut self,
        handle: &mut dyn SystemHandle,
        liveness: Liveness,
        registry: &TypeRegistry,
    ) -> Result<(), BridgeError> {
        if self.provider.is_some() {
            return Err(self.wiring_failed("provider attached twice".to_string()));
        }
        let endpoint = &self.route.provider;
        let service_type = registry.require_service(&endpoint.type_name)?;
        let proxy = handle
            .require_service_provider(&endpoint.system)?
            .create_service_proxy(&endpoint.name, &service_type, &endpoint.config)
            .map_err(|e| self.wiring_failed(format!("service proxy on '{}': {e}", endpoint.system)))?;
        debug!(route = %self.route.label(), service = %endpoint.name, "created service proxy");
        self.provider = Some(AttachedProvider {
            proxy,
            request_type: Arc::clone(service_type.request()),
            liveness,
        });
        Ok(())
    }

    /// Create the client proxy on the route's client handle, completing the
    /// route.
    pub fn attach_client(
        self,
        handle: &mut dyn SystemHandle,
        liveness: Liveness,
        registry: &TypeRegistry,
    ) -> Result<Arc<ServiceStats>, BridgeError> {
        let label = self.route.label();
        let Some(provider) = self.provider else {
            return Err(BridgeError::RouteWiringFailed {
                route: label,
                reason: "provider was never attached".to_string(),
            });
        };
        let endpoint = self.route.client.clone();
        let service_type = registry.require_service(&endpoint.type_name)?;
        let relay = Arc::new(ResponseRelay {
            route: label.clone(),
            table: Arc::clone(&self.table),
            stats: Arc::clone(&self.stats),
        });
        let forwarder = Arc::new(Forwarder {
            route: self.route,
            provider,
            client_liveness: liveness,
            response_type: Arc::clone(service_type.response()),
            table: self.table,
            relay,
            stats: Arc::clone(&self.stats),
        });
        let callback: RequestCallback =
            Arc::new(move |request, client, call| forwarder.on_request(request, client, call));

        handle
            .require_service_client(&endpoint.system)?
            .create_client_proxy(&endpoint.name, &service_type, callback, &endpoint.config)
            .map_err(|e| BridgeError::RouteWiringFailed {
                route: label.clone(),
                reason: format!("client proxy on '{}': {e}", endpoint.system),
            })?;

        info!(route = %label, service = %endpoint.name, "service route wired");
        Ok(self.stats)
    }

    fn wiring_failed(&self, reason: String) -> BridgeError {
        BridgeError::RouteWiringFailed {
            route: self.route.label(),
            reason,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MockProbe, MockSystem, RecordingClient, string_message, string_service, string_type,
    };
    use std::collections::HashMap;
    use std::thread;
    use switchyard_types::{Endpoint, PrimitiveKind, ServiceType};

    fn endpoint(system: &str, name: &str, type_name: &str) -> Endpoint {
        Endpoint {
            system: system.to_string(),
            name: name.to_string(),
            type_name: type_name.to_string(),
            config: serde_json::Value::Null,
        }
    }

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry.register_service(string_service("example/Ping")).unwrap();
        registry
    }

    fn ping_route() -> ServiceRoute {
        ServiceRoute {
            service: "ping".to_string(),
            client: endpoint("a", "ping", "example/Ping"),
            provider: endpoint("b", "ping", "example/Ping"),
        }
    }

    struct Wired {
        client: MockProbe,
        provider: MockProbe,
        provider_liveness: Liveness,
        table: Arc<CallCorrelationTable>,
        stats: Arc<ServiceStats>,
    }

    fn wire(route: ServiceRoute, registry: &TypeRegistry) -> Wired {
        let table = Arc::new(CallCorrelationTable::new());
        let mut router = ServiceRouter::new(route, Arc::clone(&table));
        let (mut provider_system, provider) = MockSystem::new();
        let provider_liveness = Liveness::new();
        router
            .attach_provider(&mut provider_system, provider_liveness.clone(), registry)
            .unwrap();
        let (mut client_system, client) = MockSystem::new();
        let stats = router
            .attach_client(&mut client_system, Liveness::new(), registry)
            .unwrap();
        Wired {
            client,
            provider,
            provider_liveness,
            table,
            stats,
        }
    }

    fn request_type(registry: &TypeRegistry) -> Arc<DynamicType> {
        registry.require("example/PingRequest").unwrap()
    }

    fn response_type(registry: &TypeRegistry) -> Arc<DynamicType> {
        registry.require("example/PingResponse").unwrap()
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let registry = registry();
        let wired = wire(ping_route(), &registry);
        let recorder = Arc::new(RecordingClient::default());

        let call = wired.client.request(
            "ping",
            string_message(&request_type(&registry), "ping"),
            recorder.clone(),
        );
        assert!(wired.table.contains(call));

        let calls = wired.provider.take_provider_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call, call);
        assert_eq!(calls[0].request.get("data").unwrap().as_str(), Some("ping"));
        calls[0]
            .client
            .receive_response(calls[0].call, string_message(&response_type(&registry), "pong"));

        let responses = recorder.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0, call);
        assert_eq!(responses[0].1.get("data").unwrap().as_str(), Some("pong"));
        assert!(wired.table.is_empty());
        assert_eq!(wired.stats.requests(), 1);
        assert_eq!(wired.stats.responses(), 1);
    }

    #[test]
    fn concurrent_responses_reach_their_own_callers() {
        let registry = registry();
        let wired = wire(ping_route(), &registry);
        let req_ty = request_type(&registry);
        let resp_ty = response_type(&registry);

        let mut expected = HashMap::new();
        let recorder = Arc::new(RecordingClient::default());
        for i in 0..64 {
            let call = wired
                .client
                .request("ping", string_message(&req_ty, &format!("req-{i}")), recorder.clone());
            expected.insert(call, format!("req-{i}"));
        }

        // Handles are random, so ordering by them scrambles completion order.
        let mut calls = wired.provider.take_provider_calls();
        calls.sort_by_key(|c| c.call.to_string());
        let workers: Vec<_> = calls
            .chunks(8)
            .map(|chunk| {
                let answers: Vec<_> = chunk
                    .iter()
                    .rev()
                    .map(|c| {
                        let echo = c.request.get("data").unwrap().as_str().unwrap().to_string();
                        (c.call, Arc::clone(&c.client), string_message(&resp_ty, &echo))
                    })
                    .collect();
                thread::spawn(move || {
                    for (call, relay, response) in answers {
                        relay.receive_response(call, response);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let responses = recorder.responses();
        assert_eq!(responses.len(), 64);
        for (call, response) in responses {
            assert_eq!(
                response.get("data").unwrap().as_str(),
                Some(expected[&call].as_str())
            );
        }
        assert!(wired.table.is_empty());
        assert_eq!(wired.stats.responses(), 64);
    }

    #[test]
    fn unknown_handle_is_never_delivered() {
        let registry = registry();
        let wired = wire(ping_route(), &registry);
        let recorder = Arc::new(RecordingClient::default());
        wired
            .client
            .request("ping", string_message(&request_type(&registry), "x"), recorder.clone());
        let calls = wired.provider.take_provider_calls();

        let stray = CallHandle::mint();
        calls[0]
            .client
            .receive_response(stray, string_message(&response_type(&registry), "y"));

        assert!(recorder.responses().is_empty());
        assert_eq!(wired.stats.unknown(), 1);
        assert_eq!(wired.table.len(), 1);
    }

    #[test]
    fn second_response_for_same_call_is_unknown() {
        let registry = registry();
        let wired = wire(ping_route(), &registry);
        let recorder = Arc::new(RecordingClient::default());
        wired
            .client
            .request("ping", string_message(&request_type(&registry), "x"), recorder.clone());
        let calls = wired.provider.take_provider_calls();
        let resp = string_message(&response_type(&registry), "y");

        calls[0].client.receive_response(calls[0].call, resp.clone());
        calls[0].client.receive_response(calls[0].call, resp);

        assert_eq!(recorder.responses().len(), 1);
        assert_eq!(wired.stats.unknown(), 1);
    }

    #[test]
    fn relay_reports_unknown_handle_error() {
        let table = Arc::new(CallCorrelationTable::new());
        let relay = ResponseRelay {
            route: "ping@a->b".to_string(),
            table,
            stats: Arc::new(ServiceStats::default()),
        };
        let call = CallHandle::mint();
        let err = relay
            .deliver(call, string_message(&string_type("x/Resp"), "late"))
            .unwrap_err();
        assert_eq!(err, BridgeError::UnknownCallHandle(call));
    }

    #[test]
    fn duplicate_in_flight_handle_is_rejected() {
        let registry = registry();
        let wired = wire(ping_route(), &registry);
        let recorder = Arc::new(RecordingClient::default());
        let req = string_message(&request_type(&registry), "x");
        let call = CallHandle::mint();

        wired.client.request_with("ping", req.clone(), recorder.clone(), call);
        wired.client.request_with("ping", req, recorder.clone(), call);

        assert_eq!(wired.provider.take_provider_calls().len(), 1);
        assert_eq!(wired.stats.requests(), 1);
        assert_eq!(wired.stats.rejected(), 1);
        assert!(recorder.abandoned().is_empty());
        assert!(wired.table.contains(call));
    }

    #[test]
    fn stopped_provider_rejects_and_abandons_requests() {
        let registry = registry();
        let wired = wire(ping_route(), &registry);
        wired.provider_liveness.mark_stopped();
        let recorder = Arc::new(RecordingClient::default());

        let call = wired.client.request(
            "ping",
            string_message(&request_type(&registry), "x"),
            recorder.clone(),
        );

        assert!(wired.provider.take_provider_calls().is_empty());
        assert!(wired.table.is_empty());
        assert_eq!(wired.stats.rejected(), 1);
        assert_eq!(recorder.abandoned(), [call]);
    }

    #[test]
    fn request_racing_a_provider_stop_is_not_recorded() {
        let registry = registry();
        let wired = wire(ping_route(), &registry);
        let recorder = Arc::new(RecordingClient::default());
        // The provider has been drained but its liveness flag is still seen
        // as alive by the forwarding thread.
        wired.table.close_system("b");

        let call = wired.client.request(
            "ping",
            string_message(&request_type(&registry), "x"),
            recorder.clone(),
        );

        assert!(wired.table.is_empty());
        assert!(wired.provider.take_provider_calls().is_empty());
        assert_eq!(wired.stats.rejected(), 1);
        assert_eq!(recorder.abandoned(), [call]);
    }

    #[test]
    fn unconvertible_response_abandons_the_call() {
        let registry = registry();
        let wired = wire(ping_route(), &registry);
        let recorder = Arc::new(RecordingClient::default());
        let call = wired.client.request(
            "ping",
            string_message(&request_type(&registry), "x"),
            recorder.clone(),
        );
        let numeric = Arc::new(
            DynamicType::builder("x/Numeric")
                .field("data", PrimitiveKind::Int32)
                .build()
                .unwrap(),
        );

        let calls = wired.provider.take_provider_calls();
        calls[0]
            .client
            .receive_response(call, DynamicData::new(&numeric));

        assert!(recorder.responses().is_empty());
        assert_eq!(recorder.abandoned(), [call]);
        assert!(wired.table.is_empty());
        assert_eq!(wired.stats.rejected(), 1);
    }

    #[test]
    fn remapped_service_types_are_converted_both_ways() {
        let registry = registry();
        registry
            .register_service(ServiceType::new(
                "b_srvs/Echo",
                string_type("b_srvs/EchoRequest"),
                string_type("b_srvs/EchoResponse"),
            ))
            .unwrap();
        let route = ServiceRoute {
            service: "ping".to_string(),
            client: endpoint("a", "ping", "example/Ping"),
            provider: endpoint("b", "/echo", "b_srvs/Echo"),
        };
        let wired = wire(route, &registry);
        let recorder = Arc::new(RecordingClient::default());

        wired
            .client
            .request("ping", string_message(&request_type(&registry), "hi"), recorder.clone());
        let calls = wired.provider.take_provider_calls();
        assert_eq!(calls[0].request.type_name(), "b_srvs/EchoRequest");
        let provider_response = string_message(&registry.require("b_srvs/EchoResponse").unwrap(), "hi");
        calls[0].client.receive_response(calls[0].call, provider_response);

        let responses = recorder.responses();
        assert_eq!(responses[0].1.type_name(), "example/PingResponse");
    }

    #[test]
    fn client_without_provider_fails_wiring() {
        let registry = registry();
        let router = ServiceRouter::new(ping_route(), Arc::new(CallCorrelationTable::new()));
        let (mut client, _probe) = MockSystem::new();
        let err = router
            .attach_client(&mut client, Liveness::new(), &registry)
            .unwrap_err();
        assert!(matches!(err, BridgeError::RouteWiringFailed { .. }));
    }
}
