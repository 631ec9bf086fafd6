use crate::completion_registry::CompletionRegistry;
use crate::handle::EdgeEventHandle;
use crate::hub::{Hub, HubEvent};
use crate::ids::{EventId, RequestId};
use crate::location_hint::LocationHintStore;
use crate::state_store::{StateStore, StateUpdate};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

pub const RECORD_SEPARATOR_BYTE: u8 = 0u8;

/// Splits a response body on the U+0000 record separator (§4.5, §6
/// "stream of U+0000-terminated JSON records"), trimming the single
/// leading/trailing line feed the server inserts between multipart chunks.
/// Empty segments (a trailing separator with nothing after it) are dropped.
pub fn frame_records(body: &[u8]) -> Vec<&[u8]> {
    body.split(|b| *b == RECORD_SEPARATOR_BYTE)
        .map(|segment| {
            let mut s = segment;
            if s.first() == Some(&b'\n') {
                s = &s[1..];
            }
            if s.last() == Some(&b'\n') {
                s = &s[..s.len() - 1];
            }
            s
        })
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "requestId")]
    #[allow(dead_code)]
    request_id: Option<String>,
    #[serde(default)]
    handle: Vec<RawHandle>,
    #[serde(default)]
    errors: Vec<RawReportEntry>,
    #[serde(default)]
    warnings: Vec<RawReportEntry>,
}

#[derive(Deserialize)]
struct RawHandle {
    #[serde(rename = "type")]
    handle_type: Option<String>,
    #[serde(default)]
    payload: Vec<Value>,
    #[serde(rename = "eventIndex")]
    event_index: Option<i64>,
}

#[derive(Deserialize)]
struct RawReportEntry {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    error_type: Option<String>,
    status: Option<u16>,
    title: Option<String>,
    report: Option<RawReport>,
}

#[derive(Deserialize)]
struct RawReport {
    #[serde(rename = "eventIndex")]
    event_index: Option<i64>,
}

/// One submitted event's identity, as the parser needs it for correlation
/// (§4.5 correlation rules) and reset gating (§4.9).
#[derive(Clone, Debug)]
pub struct EventSummary {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub send_completion: bool,
}

/// Everything the parser needs about the hit whose response it is reading.
/// The client-generated request id is authoritative for correlation even
/// though the server echoes its own (§4.5 step 1, §9 open question).
pub struct ParseContext {
    pub client_request_id: RequestId,
    pub source_events: Vec<EventSummary>,
    /// Most recent identity-reset timestamp (§4.9); `None` if never reset.
    pub reset_at: Option<DateTime<Utc>>,
}

/// The collaborators C5 writes into or dispatches through (§4.5 step 2/3,
/// "Parse passes").
pub struct ResponseSinks<'a> {
    pub hub: &'a dyn Hub,
    pub state_store: &'a StateStore,
    pub location_hints: &'a LocationHintStore,
    pub registry: &'a CompletionRegistry,
}

fn resolve_event<'a>(event_index: Option<i64>, events: &'a [EventSummary]) -> Option<&'a EventSummary> {
    let idx = event_index?;
    if idx < 0 {
        return None;
    }
    events.get(idx as usize)
}

fn source_for(handle_type: &Option<String>) -> String {
    match handle_type {
        Some(t) if !t.is_empty() => t.clone(),
        _ => "response content".to_string(),
    }
}

fn apply_state_store_handle(store: &StateStore, payload: &[Value]) {
    let updates: Vec<StateUpdate> = payload
        .iter()
        .filter_map(|entry| {
            let key = entry.get("key")?.as_str()?.to_string();
            let value = entry.get("value").and_then(Value::as_str).unwrap_or("").to_string();
            let max_age = entry.get("maxAge").and_then(Value::as_i64).unwrap_or(0);
            Some(StateUpdate { key, value, max_age })
        })
        .collect();
    if !updates.is_empty() {
        store.merge(updates);
    }
}

fn apply_location_hint_handle(
    hints: &LocationHintStore,
    payload: &[Value],
    event_index: Option<i64>,
    ctx: &ParseContext,
) {
    let originating = resolve_event(event_index, &ctx.source_events);
    let predates_reset = match (originating, ctx.reset_at) {
        (Some(event), Some(reset_at)) => event.timestamp < reset_at,
        _ => false,
    };

    for entry in payload {
        let scope = entry.get("scope").and_then(Value::as_str).unwrap_or("");
        if scope != "EdgeNetwork" {
            continue;
        }
        let hint = entry.get("hint").and_then(Value::as_str).unwrap_or("");
        if hint.is_empty() {
            tracing::debug!("locationHint:result payload rejected: empty hint");
            continue;
        }
        let ttl = match entry.get("ttlSeconds") {
            None => None,
            Some(Value::Number(n)) if n.is_i64() => n.as_i64(),
            Some(_) => {
                tracing::debug!("locationHint:result payload rejected: ttlSeconds not an integer");
                continue;
            }
        };
        if predates_reset {
            tracing::debug!("locationHint:result ignored: originating event predates reset");
            continue;
        }
        hints.set(Some(hint.to_string()), ttl);
    }
}

/// What a single `parse_response` call produced, beyond the hub events and
/// registry/state-store side effects it already applied directly.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Handles collected, for callers that want to inspect them directly in
    /// addition to what was routed through the completion registry.
    pub handles: Vec<EdgeEventHandle>,
    /// Count of `errors[]`/`warnings[]` entries that produced an
    /// `"error response content"` hub event (§4.5 step 3). The hit queue
    /// uses this to tell a fatal status with per-element detail apart from
    /// one with none (§4.6, §7 FatalHttp).
    pub error_events: usize,
}

/// Interprets one fully-framed response body (C5).
pub fn parse_response(body: &[u8], ctx: &ParseContext, sinks: &ResponseSinks<'_>) -> ParseOutcome {
    let mut collected = Vec::new();
    let mut error_events = 0usize;

    for record in frame_records(body) {
        let parsed: RawRecord = match serde_json::from_slice(record) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed response record");
                continue;
            }
        };

        for handle in parsed.handle {
            match handle.handle_type.as_deref() {
                Some("state:store") => apply_state_store_handle(sinks.state_store, &handle.payload),
                Some("locationHint:result") => {
                    apply_location_hint_handle(sinks.location_hints, &handle.payload, handle.event_index, ctx)
                }
                _ => {}
            }

            let originating = resolve_event(handle.event_index, &ctx.source_events);
            sinks.hub.dispatch(HubEvent {
                source: source_for(&handle.handle_type),
                payload: Value::Array(handle.payload.clone()),
                request_id: Some(ctx.client_request_id.clone()),
                request_event_id: originating.map(|e| e.id.clone()),
                parent_id: originating.map(|e| e.id.clone()),
            });

            let edge_handle = EdgeEventHandle {
                handle_type: handle.handle_type,
                payload: handle.payload,
                event_index: handle.event_index,
            };
            sinks.registry.record_handle(&ctx.client_request_id, edge_handle.clone());
            collected.push(edge_handle);
        }

        for entry in parsed.errors.into_iter().chain(parsed.warnings) {
            let event_index = entry.report.as_ref().and_then(|r| r.event_index);
            let originating = resolve_event(event_index, &ctx.source_events);
            let payload = serde_json::json!({
                "status": entry.status,
                "title": entry.title.unwrap_or_default(),
            });
            sinks.hub.dispatch(HubEvent {
                source: "error response content".to_string(),
                payload,
                request_id: Some(ctx.client_request_id.clone()),
                request_event_id: originating.map(|e| e.id.clone()),
                parent_id: originating.map(|e| e.id.clone()),
            });
            error_events += 1;
        }
    }

    for event in &ctx.source_events {
        if event.send_completion {
            sinks.hub.dispatch(HubEvent {
                source: "content complete".to_string(),
                payload: serde_json::json!({ "requestId": ctx.client_request_id.as_ref() }),
                request_id: Some(ctx.client_request_id.clone()),
                request_event_id: Some(event.id.clone()),
                parent_id: Some(event.id.clone()),
            });
        }
    }

    sinks.registry.complete(&ctx.client_request_id);
    ParseOutcome {
        handles: collected,
        error_events,
    }
}
