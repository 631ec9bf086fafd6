use crate::completion_registry::CompletionRegistry;
use crate::hub::{Hub, HubEvent};
use crate::ids::{EventId, RequestId};
use crate::location_hint::LocationHintStore;
use crate::persistence::QueueStore;
use crate::response_parser::{self, EventSummary, ParseContext, ResponseSinks};
use crate::state_store::StateStore;
use crate::transport::{Transport, TransportRequest};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);
const RETRY_AFTER_MIN_SECONDS: u64 = 1;
const RETRY_AFTER_MAX_SECONDS: u64 = 3600;

/// Durable, on-the-wire shape of a queued hit (§3 EdgeHit, §6 "Queue file").
/// `body` is already-serialized UTF-8 JSON; retries resend these exact bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedHit {
    pub request_id: String,
    pub url: String,
    pub body: String,
    pub source_events: Vec<PersistedEventSummary>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedEventSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub send_completion: bool,
}

/// In-memory representation of a queued hit, carrying the same fields as
/// `PersistedHit` plus a retry counter that only needs to live for the
/// current process (§9: retry cap is unbounded, restart just resets it).
#[derive(Clone, Debug)]
pub struct EdgeHit {
    pub request_id: RequestId,
    pub url: String,
    pub body: Vec<u8>,
    pub source_events: Vec<EventSummary>,
    retry_count: u32,
}

impl EdgeHit {
    pub fn new(request_id: RequestId, url: String, body: Vec<u8>, source_events: Vec<EventSummary>) -> Self {
        Self {
            request_id,
            url,
            body,
            source_events,
            retry_count: 0,
        }
    }

    fn to_persisted(&self) -> PersistedHit {
        PersistedHit {
            request_id: self.request_id.as_ref().to_string(),
            url: self.url.clone(),
            body: String::from_utf8_lossy(&self.body).to_string(),
            source_events: self
                .source_events
                .iter()
                .map(|e| PersistedEventSummary {
                    id: e.id.as_ref().to_string(),
                    timestamp: e.timestamp,
                    send_completion: e.send_completion,
                })
                .collect(),
        }
    }

    fn from_persisted(hit: PersistedHit) -> Self {
        Self {
            request_id: RequestId::from(hit.request_id),
            url: hit.url,
            body: hit.body.into_bytes(),
            source_events: hit
                .source_events
                .into_iter()
                .map(|e| EventSummary {
                    id: EventId::from(e.id),
                    timestamp: e.timestamp,
                    send_completion: e.send_completion,
                })
                .collect(),
            retry_count: 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Remove,
    Retry,
}

/// §4.6 status classification.
fn classify(status: u16) -> Outcome {
    match status {
        408 | 429 | 502 | 503 | 504 => Outcome::Retry,
        _ => Outcome::Remove,
    }
}

/// Next backoff delay: `Retry-After` wins when present (clamped to sane
/// bounds); otherwise exponential growth off a 5s base with jitter,
/// matching the teacher's `Ax::do_request` retry loop.
fn next_delay(retry_count: u32, retry_after_seconds: Option<u64>) -> Duration {
    if let Some(seconds) = retry_after_seconds {
        let clamped = seconds.clamp(RETRY_AFTER_MIN_SECONDS, RETRY_AFTER_MAX_SECONDS);
        return Duration::from_secs(clamped);
    }
    let factor = 2u32.saturating_pow(retry_count.min(6));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(10..250));
    (DEFAULT_RETRY_DELAY * factor + jitter).min(MAX_RETRY_DELAY)
}

enum QueueItem {
    Hit(EdgeHit),
    /// §4.9: a reset marker travels through the same FIFO so that hits
    /// enqueued before and after a reset are never reordered around it.
    ResetMarker(DateTime<Utc>),
}

/// Hit Queue (C6): durable FIFO of pending hits, at most one in flight,
/// exponential retry, persisted across restarts.
pub struct HitQueue {
    store: Box<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    hub: Arc<dyn Hub>,
    state_store: Arc<StateStore>,
    location_hints: Arc<LocationHintStore>,
    registry: Arc<CompletionRegistry>,
    pending: Mutex<VecDeque<QueueItem>>,
    reset_at: Mutex<Option<DateTime<Utc>>>,
    #[cfg(feature = "runtime")]
    notify: tokio::sync::Notify,
}

impl HitQueue {
    pub fn new(
        store: Box<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        hub: Arc<dyn Hub>,
        state_store: Arc<StateStore>,
        location_hints: Arc<LocationHintStore>,
        registry: Arc<CompletionRegistry>,
    ) -> Self {
        let resumed: VecDeque<QueueItem> = store
            .load_all()
            .into_iter()
            .map(|p| QueueItem::Hit(EdgeHit::from_persisted(p)))
            .collect();
        Self {
            store,
            transport,
            hub,
            state_store,
            location_hints,
            registry,
            pending: Mutex::new(resumed),
            reset_at: Mutex::new(None),
            #[cfg(feature = "runtime")]
            notify: tokio::sync::Notify::new(),
        }
    }

    pub fn current_reset_at(&self) -> Option<DateTime<Utc>> {
        *self.reset_at.lock().unwrap()
    }

    /// §4.6 enqueue: append, persist, wake worker. New enqueues never
    /// preempt an in-progress retry timer (§4.6 "In-flight invariant").
    pub fn enqueue(&self, hit: EdgeHit) {
        self.store.append(&hit.to_persisted());
        self.pending.lock().unwrap().push_back(QueueItem::Hit(hit));
        self.wake();
    }

    /// §4.9: queue the reset as a marker so the worker clears C1 and
    /// records `lastResetAt` in FIFO order relative to surrounding hits.
    pub fn enqueue_reset(&self, at: DateTime<Utc>) {
        self.pending.lock().unwrap().push_back(QueueItem::ResetMarker(at));
        self.wake();
    }

    /// Hook for the host's network-reachability observer (out of scope,
    /// §1) to cut a backoff timer short once connectivity returns.
    pub fn notify_network_available(&self) {
        self.wake();
    }

    fn wake(&self) {
        #[cfg(feature = "runtime")]
        self.notify.notify_one();
    }

    fn queue_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Processes exactly one item (marker or hit) to completion, retrying a
    /// hit in place until it is removed. Exposed directly so tests can drive
    /// the worker deterministically without spawning a task.
    #[cfg(feature = "runtime")]
    pub async fn process_next(&self) -> bool {
        let item = {
            let pending = self.pending.lock().unwrap();
            match pending.front() {
                Some(QueueItem::ResetMarker(_)) | Some(QueueItem::Hit(_)) => true,
                None => false,
            }
        };
        if !item {
            return false;
        }

        loop {
            let is_marker = matches!(self.pending.lock().unwrap().front(), Some(QueueItem::ResetMarker(_)));
            if is_marker {
                if let Some(QueueItem::ResetMarker(at)) = self.pending.lock().unwrap().pop_front() {
                    self.state_store.clear();
                    *self.reset_at.lock().unwrap() = Some(at);
                    self.store.remove_head();
                }
                return true;
            }

            let hit = match self.pending.lock().unwrap().front() {
                Some(QueueItem::Hit(h)) => h.clone(),
                _ => return false,
            };

            let request = TransportRequest {
                url: hit.url.clone(),
                body: hit.body.clone(),
            };

            match self.transport.send(request).await {
                Ok(response) => match classify(response.status) {
                    Outcome::Remove => {
                        self.finish_hit(&hit, response.status, &response.body);
                        self.pop_and_persist();
                        return true;
                    }
                    Outcome::Retry => {
                        let delay = next_delay(hit.retry_count, response.retry_after_seconds);
                        tracing::debug!(request_id = %hit.request_id, status = response.status, delay_ms = delay.as_millis() as u64, "retrying hit");
                        self.bump_retry_count();
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.notify.notified() => {}
                        }
                    }
                },
                Err(err) => {
                    let error = crate::error::EdgeError::Transport {
                        request_id: hit.request_id.as_ref().to_string(),
                        source: anyhow::Error::from(err),
                    };
                    tracing::debug!(error = %error, "transport failure, retrying");
                    let delay = next_delay(hit.retry_count, None);
                    self.bump_retry_count();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }

    fn bump_retry_count(&self) {
        if let Some(QueueItem::Hit(hit)) = self.pending.lock().unwrap().front_mut() {
            hit.retry_count += 1;
        }
    }

    /// §6 "Queue file": compacted on each successful head-removal, so the
    /// on-disk log never carries more than the hits still outstanding.
    fn pop_and_persist(&self) {
        let mut pending = self.pending.lock().unwrap();
        pending.pop_front();
        let remaining: Vec<PersistedHit> = pending
            .iter()
            .filter_map(|item| match item {
                QueueItem::Hit(hit) => Some(hit.to_persisted()),
                QueueItem::ResetMarker(_) => None,
            })
            .collect();
        drop(pending);
        self.store.compact(&remaining);
    }

    /// Parses the response and, for statuses carrying no per-element detail,
    /// surfaces a single taxonomy error (§4.6, §7 FatalHttp/PartialSuccess).
    fn finish_hit(&self, hit: &EdgeHit, status: u16, body: &[u8]) {
        let ctx = ParseContext {
            client_request_id: hit.request_id.clone(),
            source_events: hit.source_events.clone(),
            reset_at: self.current_reset_at(),
        };
        let sinks = ResponseSinks {
            hub: self.hub.as_ref(),
            state_store: self.state_store.as_ref(),
            location_hints: self.location_hints.as_ref(),
            registry: self.registry.as_ref(),
        };
        let outcome = response_parser::parse_response(body, &ctx, &sinks);

        let is_fatal = !(200..300).contains(&status) && status != 207;
        if is_fatal {
            let error = crate::error::EdgeError::FatalHttp {
                request_id: hit.request_id.as_ref().to_string(),
                status,
                title: String::from_utf8_lossy(body).to_string(),
            };
            tracing::warn!(error = %error, "hit removed after fatal response");

            if outcome.error_events == 0 {
                let originating = match hit.source_events.as_slice() {
                    [only] => Some(only.id.clone()),
                    _ => None,
                };
                self.hub.dispatch(HubEvent {
                    source: "error response content".to_string(),
                    payload: serde_json::json!({ "status": status }),
                    request_id: Some(hit.request_id.clone()),
                    request_event_id: originating.clone(),
                    parent_id: originating,
                });
            }
        } else if status == 207 && outcome.error_events > 0 {
            let error = crate::error::EdgeError::PartialSuccess {
                request_id: hit.request_id.as_ref().to_string(),
                error_count: outcome.error_events,
            };
            tracing::warn!(error = %error, "hit produced a partial success");
        }
    }

    /// Drives the worker forever; intended to be spawned once per
    /// `HitQueue` instance by the host's async runtime.
    #[cfg(feature = "runtime")]
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.queue_len() == 0 {
                self.notify.notified().await;
                continue;
            }
            self.process_next().await;
        }
    }
}
