//! Exercises the full C8 -> C4 -> C6 -> C5 -> C7 pipeline against a scripted
//! `Transport`, driving the literal scenarios from spec.md §8 (S1-S6).

use async_trait::async_trait;
use edge_dispatch_core::{
    CompletionRegistry, ConsentValue, DispatchCore, EdgeConfig, ExperienceEvent, HitQueue, ImplementationDetails,
    InMemoryQueueStore, InMemoryStateCollection, LocationHintStore, RecordingHub, StaticConsent, StaticIdentity,
    TestClock, Transport, TransportError, TransportRequest, TransportResponse,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ScriptedTransport {
    responses: Mutex<VecDeque<(u16, Vec<u8>)>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<(u16, &'static [u8])>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|(s, b)| (s, b.to_vec())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request_bodies(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().iter().map(|r| r.body.clone()).collect()
    }

    fn urls(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let (status, body) = self.responses.lock().unwrap().pop_front().unwrap_or((200, vec![]));
        Ok(TransportResponse {
            status,
            body,
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

struct Harness {
    dispatch: Arc<DispatchCore>,
    hit_queue: Arc<HitQueue>,
    hub: Arc<RecordingHub>,
    transport: Arc<ScriptedTransport>,
}

fn harness(configured_id: &str, responses: Vec<(u16, &'static [u8])>) -> Harness {
    let clock = Arc::new(TestClock::new());
    let state_store = Arc::new(edge_dispatch_core::StateStore::new(
        clock.clone(),
        Box::new(InMemoryStateCollection::new()),
    ));
    let location_hints = Arc::new(LocationHintStore::new(clock, Box::new(InMemoryStateCollection::new())));
    let registry = Arc::new(CompletionRegistry::new());
    let hub = Arc::new(RecordingHub::new());
    let transport = Arc::new(ScriptedTransport::new(responses));
    let hit_queue = Arc::new(HitQueue::new(
        Box::new(InMemoryQueueStore::new()),
        transport.clone(),
        hub.clone(),
        state_store.clone(),
        location_hints.clone(),
        registry.clone(),
    ));
    let config = EdgeConfig::new();
    config.update(Some(configured_id.to_string()), None, None);
    let dispatch = Arc::new(DispatchCore::new(
        Arc::new(config.clone()),
        Arc::new(StaticIdentity::default()),
        Arc::new(StaticConsent(Some(ConsentValue::Yes))),
        state_store,
        location_hints,
        hit_queue.clone(),
        registry,
        hub.clone(),
        details(),
    ));
    Harness {
        dispatch,
        hit_queue,
        hub,
        transport,
    }
}

fn event_with(xdm: Vec<(&str, Value)>) -> ExperienceEvent {
    let mut map = BTreeMap::new();
    for (k, v) in xdm {
        map.insert(k.to_string(), v);
    }
    ExperienceEvent::new(map)
}

fn parse_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

/// S1: the outgoing body carries the xdm fields untouched plus the
/// streaming marker.
#[tokio::test]
async fn s1_framing_and_streaming_marker() {
    let h = harness("1234abcd", vec![(200, b"")]);
    h.dispatch.submit(
        event_with(vec![("testString", json!("stringValue")), ("testInt", json!(10))]),
        None,
    );
    h.dispatch.flush();
    assert!(h.hit_queue.process_next().await);

    let sent = parse_body(&h.transport.request_bodies()[0]);
    assert_eq!(sent["events"][0]["xdm"]["testString"], json!("stringValue"));
    assert_eq!(sent["events"][0]["xdm"]["testInt"], json!(10));
    assert_eq!(sent["meta"]["konductorConfig"]["streaming"]["enabled"], json!(true));
    assert_eq!(
        sent["meta"]["konductorConfig"]["streaming"]["recordSeparator"],
        json!("\u{0000}")
    );
}

/// S2: a per-event datastream override changes the URL's `configId` and
/// records the original configured id under `meta.sdkConfig`.
#[tokio::test]
async fn s2_datastream_id_override() {
    let h = harness("1234abcd", vec![(200, b"")]);
    let mut event = event_with(vec![("a", json!(1))]);
    event.datastream_id_override = Some("5678abcd".to_string());
    h.dispatch.submit(event, None);
    h.dispatch.flush();
    assert!(h.hit_queue.process_next().await);

    let url = &h.transport.urls()[0];
    assert!(url.contains("configId=5678abcd"));
    let sent = parse_body(&h.transport.request_bodies()[0]);
    assert_eq!(sent["meta"]["sdkConfig"]["datastream"]["original"], json!("1234abcd"));
}

/// S3: a `state:store` handle merges into the store, `maxAge=0` deletes,
/// and the next hit echoes only the surviving entry.
#[tokio::test]
async fn s3_state_store_round_trips_into_next_hit() {
    let response = br#"{"handle":[{"type":"state:store","payload":[{"key":"k1","value":"v1","maxAge":7200},{"key":"k2","value":"v2","maxAge":0}]}]}"#;
    let h = harness("1234abcd", vec![(200, response.to_vec().leak()), (200, b"")]);
    h.dispatch.submit(event_with(vec![("a", json!(1))]), None);
    h.dispatch.flush();
    assert!(h.hit_queue.process_next().await);

    h.dispatch.submit(event_with(vec![("b", json!(2))]), None);
    h.dispatch.flush();
    assert!(h.hit_queue.process_next().await);

    let second = parse_body(&h.transport.request_bodies()[1]);
    let entries = second["meta"]["state"]["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["key"], json!("k1"));
    assert_eq!(entries[0]["maxAge"], json!(7200));
}

/// S4: a 503 is retried and the subsequent 200 succeeds; both POSTs carry
/// byte-identical bodies (same client-generated requestId).
#[tokio::test]
async fn s4_retries_503_then_succeeds_with_identical_body() {
    let h = harness("1234abcd", vec![(503, b""), (200, b"")]);
    h.dispatch.submit(event_with(vec![("a", json!(1))]), None);
    h.dispatch.flush();
    assert!(h.hit_queue.process_next().await);

    let bodies = h.transport.request_bodies();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], bodies[1]);
}

/// S5: a completion handler is invoked exactly once with both handles, and
/// the warning produces one `error response content` hub event paired to
/// the source event.
#[tokio::test]
async fn s5_completion_handler_and_paired_error_event() {
    let response = br#"{"handle":[{"type":"a","payload":[{"x":1}]},{"type":"b","payload":[{"x":2}]}],"warnings":[{"type":"https://warn","status":200,"title":"careful","report":{"eventIndex":0}}]}"#;
    let h = harness("1234abcd", vec![(200, response.to_vec().leak())]);

    let mut event = event_with(vec![("a", json!(1))]);
    event.send_completion = true;
    let event_id = event.id.clone();

    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    h.dispatch.submit(
        event,
        Some(Box::new(move |handles| {
            *seen_clone.lock().unwrap() = Some(handles.len());
        })),
    );
    h.dispatch.flush();
    assert!(h.hit_queue.process_next().await);

    assert_eq!(*seen.lock().unwrap(), Some(2));
    let events = h.hub.events();
    let error_event = events.iter().find(|e| e.source == "error response content").unwrap();
    assert_eq!(error_event.request_event_id, Some(event_id));
}

/// S6: the location hint, once set, appears as a URL path segment; clearing
/// it (empty string) removes the segment from subsequent hits.
#[tokio::test]
async fn s6_location_hint_lifecycle_reflected_in_urls() {
    let h = harness("1234abcd", vec![(200, b""), (200, b"")]);
    h.dispatch.set_location_hint(Some("or2".to_string()), None);
    h.dispatch.submit(event_with(vec![("a", json!(1))]), None);
    h.dispatch.flush();
    assert!(h.hit_queue.process_next().await);
    assert!(h.transport.urls()[0].starts_with("https://edge.adobedc.net/ee/or2/v1/interact"));

    h.dispatch.set_location_hint(Some(String::new()), None);
    h.dispatch.submit(event_with(vec![("b", json!(2))]), None);
    h.dispatch.flush();
    assert!(h.hit_queue.process_next().await);
    assert!(!h.transport.urls()[1].contains("/or2/"));
}

/// Consent gating (§8 law 4): `consent = n` produces zero network requests
/// regardless of how many events are submitted.
#[tokio::test]
async fn consent_denied_never_reaches_the_queue() {
    let clock = Arc::new(TestClock::new());
    let state_store = Arc::new(edge_dispatch_core::StateStore::new(
        clock.clone(),
        Box::new(InMemoryStateCollection::new()),
    ));
    let location_hints = Arc::new(LocationHintStore::new(clock, Box::new(InMemoryStateCollection::new())));
    let registry = Arc::new(CompletionRegistry::new());
    let hub = Arc::new(RecordingHub::new());
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let hit_queue = Arc::new(HitQueue::new(
        Box::new(InMemoryQueueStore::new()),
        transport.clone(),
        hub.clone(),
        state_store.clone(),
        location_hints.clone(),
        registry.clone(),
    ));
    let config = EdgeConfig::new();
    config.update(Some("1234abcd".to_string()), None, None);
    let dispatch = DispatchCore::new(
        Arc::new(config),
        Arc::new(StaticIdentity::default()),
        Arc::new(StaticConsent(Some(ConsentValue::No))),
        state_store,
        location_hints,
        hit_queue.clone(),
        registry,
        hub,
        details(),
    );
    for i in 0..5 {
        dispatch.submit(event_with(vec![("i", json!(i))]), None);
    }
    dispatch.flush();
    assert!(!hit_queue.process_next().await);
    assert!(transport.request_bodies().is_empty());
}
