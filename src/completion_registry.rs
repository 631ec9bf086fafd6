use crate::handle::EdgeEventHandle;
use crate::ids::{EventId, RequestId};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

pub type CompletionHandler = Box<dyn FnOnce(Vec<EdgeEventHandle>) + Send>;

struct Waiting {
    #[allow(dead_code)]
    source_event_ids: Vec<EventId>,
    handles: Vec<EdgeEventHandle>,
    handler: Option<CompletionHandler>,
}

/// Completion Registry (C7): tracks, per request id, the handles collected
/// so far and the handler to invoke exactly once when the hit terminates
/// (§4.7, §8 law 10).
#[derive(Default)]
pub struct CompletionRegistry {
    waiting: Mutex<HashMap<RequestId, Waiting>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        request_id: RequestId,
        source_event_ids: Vec<EventId>,
        handler: Option<CompletionHandler>,
    ) {
        self.waiting.lock().unwrap().insert(
            request_id,
            Waiting {
                source_event_ids,
                handles: Vec::new(),
                handler,
            },
        );
    }

    /// Routes a successfully parsed handle to its request's accumulator
    /// (§4.5 "C5 routes successfully parsed handles to the registry").
    pub fn record_handle(&self, request_id: &RequestId, handle: EdgeEventHandle) {
        if let Some(waiting) = self.waiting.lock().unwrap().get_mut(request_id) {
            waiting.handles.push(handle);
        }
    }

    /// Invokes the handler exactly once with whatever handles were
    /// collected (possibly none). Handler panics are caught and logged,
    /// never allowed to corrupt registry or queue state (§4.7, §7
    /// HandlerException).
    pub fn complete(&self, request_id: &RequestId) {
        let waiting = match self.waiting.lock().unwrap().remove(request_id) {
            Some(w) => w,
            None => return,
        };
        let handles = waiting.handles;
        if let Some(handler) = waiting.handler {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(handles))).is_err() {
                tracing::error!(request_id = %request_id, "completion handler panicked; ignoring");
            }
        }
    }
}
