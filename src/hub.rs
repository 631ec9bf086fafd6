//! The event-hub seam (§6 "Hub interface"). The hub itself — registration,
//! shared-state publication, the dispatch bus — lives in the surrounding
//! mobile SDK and is out of scope (§1). The core only ever needs to push
//! typed events onto it, so the collaborator is a single narrow trait
//! rather than a full pub/sub implementation.

use crate::ids::{EventId, RequestId};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// One of the outputs listed in §6 "Hub interface (outputs produced)".
#[derive(Clone, Debug, PartialEq)]
pub struct HubEvent {
    /// e.g. `"response content"`, `"error response content"`, or a handle's
    /// own `type` string when it is used verbatim as the source (§4.5 step 2).
    pub source: String,
    pub payload: Value,
    pub request_id: Option<RequestId>,
    /// Set when the originating client event resolved via `eventIndex`
    /// (§4.5 correlation rules); `None` means the event is unpaired.
    pub request_event_id: Option<EventId>,
    /// Hub parent-id linkage for events dispatched as a pair (§4.5 step 4,
    /// §4.8 step 7). Always equal to `request_event_id` when both are set.
    pub parent_id: Option<EventId>,
}

impl HubEvent {
    pub fn unpaired(source: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            payload,
            request_id: None,
            request_event_id: None,
            parent_id: None,
        }
    }
}

/// The single method the dispatch core needs from the surrounding hub:
/// hand it a fully formed event. Delivery semantics (ordering across
/// extensions, shared-state fan-out) are the hub's concern, not ours —
/// we only guarantee the ordering described in §5 ("Ordering guarantees")
/// on the calls we make.
pub trait Hub: Send + Sync {
    fn dispatch(&self, event: HubEvent);
}

/// Test double that keeps every dispatched event in arrival order, so
/// ordering and correlation assertions (§8) can inspect it directly.
#[derive(Clone, Default)]
pub struct RecordingHub {
    events: Arc<Mutex<Vec<HubEvent>>>,
}

impl RecordingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HubEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Hub for RecordingHub {
    fn dispatch(&self, event: HubEvent) {
        self.events.lock().unwrap().push(event);
    }
}
