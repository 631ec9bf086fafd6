use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a single inbound hub event. Assigned at ingest, carried
/// through the whole pipeline so that response handles can be correlated
/// back (§4.5/§8 property 8) and completion handlers can be fired (§4.7).
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies a queued hit end-to-end: generated client-side, sent as the
/// `requestId` query parameter, and used (never the server-echoed one) to
/// correlate the streamed response and to key the completion registry.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize, From)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
