#![doc = include_str!("../README.md")]
#![allow(clippy::too_many_arguments)]

//! Dispatch pipeline for the Edge Network extension: a consent- and
//! identity-gated event queue that batches, frames, and POSTs experience
//! events, interprets the streamed multi-part response, and persists
//! client-side state returned by the server.
//!
//! The surrounding event hub, the identity/consent/configuration
//! extensions, and the host-app-facing façade are out of scope (see
//! `snapshot`/`hub` for the narrow interfaces this crate consumes instead
//! of reaching for global state).

mod clock;
mod completion_registry;
mod config;
mod dispatch;
mod error;
mod event;
mod handle;
mod hit_queue;
mod hub;
mod ids;
mod location_hint;
mod persistence;
mod request_builder;
mod response_parser;
mod snapshot;
mod state_store;
mod transport;
mod url_builder;

pub use clock::{Clock, SystemClock, TestClock};
pub use completion_registry::{CompletionHandler, CompletionRegistry};
pub use config::EdgeConfig;
pub use dispatch::DispatchCore;
pub use error::EdgeError;
pub use event::{ExperienceEvent, XdmMap};
pub use handle::EdgeEventHandle;
pub use hit_queue::{EdgeHit, HitQueue, PersistedEventSummary, PersistedHit};
pub use hub::{Hub, HubEvent, RecordingHub};
pub use ids::{EventId, RequestId};
pub use location_hint::LocationHintStore;
pub use persistence::{InMemoryQueueStore, InMemoryStateCollection, PersistedRow, QueueStore, StateCollection};
pub use request_builder::{BatchContext, ImplementationDetails};
pub use response_parser::{EventSummary, ParseContext, ParseOutcome, ResponseSinks};
pub use snapshot::{
    ConfigurationSnapshot, ConsentSnapshot, ConsentValue, IdentitySnapshot, StaticConfiguration, StaticConsent,
    StaticIdentity,
};
pub use state_store::{StateStore, StateUpdate};
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};
pub use url_builder::{build_url, Environment, UrlParams};

#[cfg(feature = "client")]
pub use transport::reqwest_transport::ReqwestTransport;

#[cfg(feature = "sqlite")]
pub use persistence::sqlite::{SqliteQueueStore, SqliteStateCollection};
