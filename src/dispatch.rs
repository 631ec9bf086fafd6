//! Dispatch Core (C8, §4.8) and Reset Protocol (C9, §4.9): the orchestrator
//! that gates inbound events on consent/configuration/identity, batches
//! compatible ones, builds envelopes via C4, enqueues via C6, and registers
//! completion waiters via C7.

use crate::completion_registry::{CompletionHandler, CompletionRegistry};
use crate::event::ExperienceEvent;
use crate::hit_queue::{EdgeHit, HitQueue};
use crate::hub::{Hub, HubEvent};
use crate::ids::RequestId;
use crate::location_hint::LocationHintStore;
use crate::request_builder::{build_envelope, BatchContext, ImplementationDetails};
use crate::response_parser::EventSummary;
use crate::snapshot::{ConfigurationSnapshot, ConsentSnapshot, ConsentValue, IdentitySnapshot};
use crate::state_store::StateStore;
use crate::url_builder::{build_url, UrlParams};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Key on which compatible events are grouped into one hit (§4.4 batch
/// invariant, §8 law 3: identity, implementation details, location hint,
/// environment, and effective configId must all agree).
#[derive(Clone, Debug, PartialEq)]
struct BatchKey {
    identity_map: Option<std::collections::BTreeMap<String, Value>>,
    location_hint: Option<String>,
    environment: Option<String>,
    effective_config_id: String,
    original_config_id: Option<String>,
    config_overrides: Option<Value>,
}

struct PendingBatch {
    key: BatchKey,
    url: String,
    events: Vec<ExperienceEvent>,
    handlers: Vec<Option<CompletionHandler>>,
}

/// Everything C8 needs injected (Design Notes: constructor-injected
/// collaborators, no global singletons).
pub struct DispatchCore {
    config: Arc<dyn ConfigurationSnapshot>,
    identity: Arc<dyn IdentitySnapshot>,
    consent: Arc<dyn ConsentSnapshot>,
    state_store: Arc<StateStore>,
    location_hints: Arc<LocationHintStore>,
    hit_queue: Arc<HitQueue>,
    registry: Arc<CompletionRegistry>,
    hub: Arc<dyn Hub>,
    implementation_details: ImplementationDetails,
    /// Buffered while consent is `Pending` or absent (§4.8 step 2). Never
    /// touches C6's durable queue.
    pending_consent: Mutex<Vec<(ExperienceEvent, Option<CompletionHandler>)>>,
    /// Buffered while configuration or identity has not yet resolved
    /// (§4.8 steps 3/4).
    pending_shared_state: Mutex<Vec<(ExperienceEvent, Option<CompletionHandler>)>>,
    batch: Mutex<Option<PendingBatch>>,
}

impl DispatchCore {
    pub fn new(
        config: Arc<dyn ConfigurationSnapshot>,
        identity: Arc<dyn IdentitySnapshot>,
        consent: Arc<dyn ConsentSnapshot>,
        state_store: Arc<StateStore>,
        location_hints: Arc<LocationHintStore>,
        hit_queue: Arc<HitQueue>,
        registry: Arc<CompletionRegistry>,
        hub: Arc<dyn Hub>,
        implementation_details: ImplementationDetails,
    ) -> Self {
        Self {
            config,
            identity,
            consent,
            state_store,
            location_hints,
            hit_queue,
            registry,
            hub,
            implementation_details,
            pending_consent: Mutex::new(Vec::new()),
            pending_shared_state: Mutex::new(Vec::new()),
            batch: Mutex::new(None),
        }
    }

    /// §4.8: process one inbound "edge request content" event.
    pub fn submit(&self, event: ExperienceEvent, handler: Option<CompletionHandler>) {
        // Step 1: reject empty payloads.
        if event.is_rejectable() {
            tracing::debug!(event_id = %event.id, "rejecting event with no xdm and no data");
            return;
        }

        // Step 2: consent gate.
        match self.consent.collect_consent() {
            Some(ConsentValue::No) => {
                tracing::debug!(event_id = %event.id, "dropping event: consent = no");
            }
            Some(ConsentValue::Yes) => self.gate_on_shared_state(event, handler),
            Some(ConsentValue::Pending) | None => {
                self.pending_consent.lock().unwrap().push((event, handler));
            }
        }
    }

    fn gate_on_shared_state(&self, event: ExperienceEvent, handler: Option<CompletionHandler>) {
        let configured_id = self.config.configured_id();
        let identity_map = self.identity.identity_map();
        match (configured_id, identity_map) {
            (Some(configured_id), Some(identity_map)) => {
                self.accept(event, handler, configured_id, Some(identity_map))
            }
            _ => {
                self.pending_shared_state.lock().unwrap().push((event, handler));
            }
        }
    }

    /// Re-evaluates events buffered on consent (§4.8 step 2: "buffer... until
    /// consent resolves"). Call whenever `edge-consent / response content`
    /// updates the cached consent value.
    pub fn consent_resolved(&self) {
        let buffered = std::mem::take(&mut *self.pending_consent.lock().unwrap());
        for (event, handler) in buffered {
            self.submit(event, handler);
        }
    }

    /// Re-evaluates events buffered on configuration/identity (§4.8 step 4:
    /// "re-evaluate upon shared-state change"). Call whenever either
    /// snapshot changes.
    pub fn shared_state_changed(&self) {
        let buffered = std::mem::take(&mut *self.pending_shared_state.lock().unwrap());
        for (event, handler) in buffered {
            self.gate_on_shared_state(event, handler);
        }
    }

    fn accept(
        &self,
        event: ExperienceEvent,
        handler: Option<CompletionHandler>,
        configured_id: String,
        identity_map: Option<std::collections::BTreeMap<String, Value>>,
    ) {
        let effective_config_id = event.datastream_id_override.clone().unwrap_or_else(|| configured_id.clone());
        let original_config_id = event
            .datastream_id_override
            .as_ref()
            .filter(|id| !id.is_empty())
            .map(|_| configured_id);
        let location_hint = self.location_hints.get();
        let environment = self.config.environment();

        let key = BatchKey {
            identity_map,
            location_hint: location_hint.clone(),
            environment: environment.clone(),
            effective_config_id: effective_config_id.clone(),
            original_config_id: original_config_id.clone(),
            config_overrides: event.datastream_config_override.clone(),
        };

        let url = match build_url(&UrlParams {
            environment,
            domain_override: self.config.domain(),
            location_hint,
            config_id: effective_config_id.clone(),
            path_override: event.path_override.clone(),
            request_id: None,
        }) {
            Ok(url) => url.to_string(),
            Err(err) => {
                tracing::warn!(event_id = %event.id, error = %err, "dropping event: URL composition failed");
                return;
            }
        };

        // Step 6: a `request.path` override bypasses batching entirely.
        if event.path_override.is_some() {
            self.flush();
            self.send_single(event, handler, key, url);
            return;
        }

        let mut batch = self.batch.lock().unwrap();
        let incompatible = matches!(&*batch, Some(existing) if existing.key != key || existing.url != url);
        if incompatible {
            drop(batch);
            self.flush();
            batch = self.batch.lock().unwrap();
        }

        let entry = batch.get_or_insert_with(|| PendingBatch {
            key,
            url,
            events: Vec::new(),
            handlers: Vec::new(),
        });
        entry.events.push(event);
        entry.handlers.push(handler);
    }

    fn send_single(&self, event: ExperienceEvent, handler: Option<CompletionHandler>, key: BatchKey, url: String) {
        self.dispatch_hit(key, url, vec![event], vec![handler]);
    }

    /// Flushes the in-progress batch (if any), building its envelope and
    /// enqueueing it as a single hit. The host calls this once per
    /// event-loop tick (§5: "single-threaded cooperative event loop"), and
    /// it is also called implicitly whenever an incompatible event arrives.
    pub fn flush(&self) {
        let pending = self.batch.lock().unwrap().take();
        if let Some(batch) = pending {
            self.dispatch_hit(batch.key, batch.url, batch.events, batch.handlers);
        }
    }

    fn dispatch_hit(
        &self,
        key: BatchKey,
        url: String,
        events: Vec<ExperienceEvent>,
        handlers: Vec<Option<CompletionHandler>>,
    ) {
        let request_id = RequestId::new();

        let ctx = BatchContext {
            identity_map: key.identity_map,
            implementation_details: self.implementation_details.clone(),
            state_entries: self.state_store.active_entries(),
            effective_config_id: key.effective_config_id,
            original_config_id: key.original_config_id,
            config_overrides: key.config_overrides,
        };
        let body = build_envelope(&events, &ctx);
        let body_bytes = serde_json::to_vec(&body).unwrap_or_default();

        let mut source_events = Vec::with_capacity(events.len());
        let mut all_source_ids = Vec::new();
        for event in &events {
            source_events.push(EventSummary {
                id: event.id.clone(),
                timestamp: event.timestamp,
                send_completion: event.send_completion,
            });
            all_source_ids.push(event.id.clone());
        }

        let sub_handlers: Vec<CompletionHandler> = handlers.into_iter().flatten().collect();
        let merged_handler: Option<CompletionHandler> = if sub_handlers.is_empty() {
            None
        } else {
            Some(Box::new(move |handles: Vec<crate::handle::EdgeEventHandle>| {
                for handler in sub_handlers {
                    handler(handles.clone());
                }
            }))
        };

        self.registry.register(request_id.clone(), all_source_ids, merged_handler);
        let hit = EdgeHit::new(request_id, url, body_bytes, source_events);
        self.hit_queue.enqueue(hit);
    }

    /// §4.8 step 7: location-hint-get short-circuits, reading C2 directly
    /// and dispatching a paired `response identity` hub event.
    pub fn get_location_hint(&self, request_event_id: crate::ids::EventId) {
        let hint = self.location_hints.get();
        self.hub.dispatch(HubEvent {
            source: "response identity".to_string(),
            payload: serde_json::json!({ "locationHint": hint }),
            request_id: None,
            request_event_id: Some(request_event_id.clone()),
            parent_id: Some(request_event_id),
        });
    }

    /// §4.8 step 8: location-hint-set updates C2 directly; no network call.
    pub fn set_location_hint(&self, hint: Option<String>, ttl_seconds: Option<i64>) {
        self.location_hints.set(hint, ttl_seconds);
    }

    /// §4.9 Reset Protocol: enqueue the reset as a queue marker. The worker
    /// clears C1 and records `lastResetAt` when it processes the marker.
    pub fn identity_reset_complete(&self, at: DateTime<Utc>) {
        self.flush();
        self.hit_queue.enqueue_reset(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::hub::RecordingHub;
    use crate::persistence::{InMemoryQueueStore, InMemoryStateCollection};
    use crate::snapshot::{StaticConfiguration, StaticConsent, StaticIdentity};
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug, Default)]
    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(
            &self,
            _request: crate::transport::TransportRequest,
        ) -> Result<crate::transport::TransportResponse, crate::transport::TransportError> {
            Ok(crate::transport::TransportResponse {
                status: 200,
                body: vec![],
                retry_after_seconds: None,
            })
        }
    }

    fn details() -> ImplementationDetails {
        ImplementationDetails {
            environment: "app".into(),
            name: "edge-dispatch-core".into(),
            host_sdk_version: "3.1.0".into(),
            extension_version: "2.0.0".into(),
        }
    }

    fn core(
        config: StaticConfiguration,
        identity: StaticIdentity,
        consent: StaticConsent,
    ) -> (Arc<DispatchCore>, Arc<HitQueue>, Arc<RecordingHub>) {
        let clock = Arc::new(TestClock::new());
        let state_store = Arc::new(StateStore::new(clock.clone(), Box::new(InMemoryStateCollection::new())));
        let location_hints = Arc::new(LocationHintStore::new(clock, Box::new(InMemoryStateCollection::new())));
        let registry = Arc::new(CompletionRegistry::new());
        let hub = Arc::new(RecordingHub::new());
        let hit_queue = Arc::new(HitQueue::new(
            Box::new(InMemoryQueueStore::new()),
            Arc::new(NullTransport),
            hub.clone(),
            state_store.clone(),
            location_hints.clone(),
            registry.clone(),
        ));
        let dispatch = Arc::new(DispatchCore::new(
            Arc::new(config),
            Arc::new(identity),
            Arc::new(consent),
            state_store,
            location_hints,
            hit_queue.clone(),
            registry,
            hub.clone(),
            details(),
        ));
        (dispatch, hit_queue, hub)
    }

    fn event(key: &str) -> ExperienceEvent {
        let mut xdm = BTreeMap::new();
        xdm.insert(key.to_string(), json!("value"));
        ExperienceEvent::new(xdm)
    }

    #[test]
    fn empty_payload_is_rejected_without_reaching_any_gate() {
        let (dispatch, _queue, _hub) = core(
            StaticConfiguration {
                configured_id: Some("1234abcd".into()),
                ..Default::default()
            },
            StaticIdentity::default(),
            StaticConsent(Some(ConsentValue::Yes)),
        );
        dispatch.submit(ExperienceEvent::new(BTreeMap::new()), None);
        dispatch.flush();
        assert_eq!(dispatch.batch.lock().unwrap().is_none(), true);
    }

    #[test]
    fn pending_consent_buffers_until_resolved() {
        let (dispatch, _queue, _hub) = core(
            StaticConfiguration {
                configured_id: Some("1234abcd".into()),
                ..Default::default()
            },
            StaticIdentity::default(),
            StaticConsent(None),
        );
        dispatch.submit(event("a"), None);
        assert_eq!(dispatch.pending_consent.lock().unwrap().len(), 1);
        dispatch.flush();
        assert!(dispatch.batch.lock().unwrap().is_none());
    }

    #[test]
    fn missing_config_buffers_then_flows_through_on_shared_state_change() {
        let config = StaticConfiguration::default();
        let (dispatch, _queue, _hub) = core(config, StaticIdentity::default(), StaticConsent(Some(ConsentValue::Yes)));
        dispatch.submit(event("a"), None);
        assert_eq!(dispatch.pending_shared_state.lock().unwrap().len(), 1);
        // Configuration arrives; host calls shared_state_changed after updating its snapshot.
        // (StaticConfiguration is immutable here, so this only exercises the no-op path;
        // EdgeConfig's mutable variant is covered in config.rs.)
        dispatch.shared_state_changed();
    }

    #[test]
    fn missing_identity_buffers_event() {
        let (dispatch, _queue, _hub) = core(
            StaticConfiguration {
                configured_id: Some("1234abcd".into()),
                ..Default::default()
            },
            StaticIdentity::default(),
            StaticConsent(Some(ConsentValue::Yes)),
        );
        dispatch.submit(event("a"), None);
        assert_eq!(dispatch.pending_shared_state.lock().unwrap().len(), 1);
        assert!(dispatch.batch.lock().unwrap().is_none());
    }

    #[test]
    fn compatible_events_batch_into_one_hit() {
        let (dispatch, _queue, _hub) = core(
            StaticConfiguration {
                configured_id: Some("1234abcd".into()),
                ..Default::default()
            },
            StaticIdentity {
                identity_map: Some(BTreeMap::new()),
            },
            StaticConsent(Some(ConsentValue::Yes)),
        );
        dispatch.submit(event("a"), None);
        dispatch.submit(event("b"), None);
        let batch = dispatch.batch.lock().unwrap();
        assert_eq!(batch.as_ref().unwrap().events.len(), 2);
    }

    #[test]
    fn path_override_bypasses_batching() {
        let (dispatch, _queue, _hub) = core(
            StaticConfiguration {
                configured_id: Some("1234abcd".into()),
                ..Default::default()
            },
            StaticIdentity {
                identity_map: Some(BTreeMap::new()),
            },
            StaticConsent(Some(ConsentValue::Yes)),
        );
        dispatch.submit(event("a"), None);
        let mut with_path = event("b");
        with_path.path_override = Some("va/v1/sessionstart".into());
        dispatch.submit(with_path, None);
        // The plain event is still sitting in the batch; the path-override
        // event went straight out as its own hit and flushed the batch first.
        assert!(dispatch.batch.lock().unwrap().is_none());
    }

    #[test]
    fn location_hint_get_dispatches_paired_response_identity() {
        let (dispatch, _queue, hub) = core(
            StaticConfiguration::default(),
            StaticIdentity::default(),
            StaticConsent(Some(ConsentValue::Yes)),
        );
        let event_id = crate::ids::EventId::new();
        dispatch.get_location_hint(event_id.clone());
        let events = hub.events();
        assert_eq!(events[0].source, "response identity");
        assert_eq!(events[0].request_event_id, Some(event_id));
    }

    #[test]
    fn location_hint_set_never_touches_the_queue() {
        let (dispatch, _queue, _hub) = core(
            StaticConfiguration::default(),
            StaticIdentity::default(),
            StaticConsent(Some(ConsentValue::Yes)),
        );
        dispatch.set_location_hint(Some("or2".into()), None);
        assert_eq!(dispatch.location_hints.get(), Some("or2".to_string()));
    }
}
