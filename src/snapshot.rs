//! Narrow interfaces onto the shared-state snapshots the dispatch core reads
//! (§6: configuration extension, identity extension, consent extension).
//! The hub, the extensions themselves and their registration machinery are
//! out of scope (§1); the core only ever sees these three read-only views.

use serde_json::Value;
use std::collections::BTreeMap;

/// `edge.configId` (a.k.a. datastream id), plus the optional environment and
/// domain overrides consumed by the URL builder (§4.3).
pub trait ConfigurationSnapshot: Send + Sync {
    /// `None` until the configuration extension has published a datastream id.
    fn configured_id(&self) -> Option<String>;
    fn environment(&self) -> Option<String>;
    fn domain(&self) -> Option<String>;
}

/// The identity extension's ECID map, consumed verbatim by the request
/// builder (§4.4 `xdm.identityMap`).
pub trait IdentitySnapshot: Send + Sync {
    /// `None` while identity is absent or still resolving (§4.8 step 4).
    fn identity_map(&self) -> Option<BTreeMap<String, Value>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsentValue {
    Yes,
    No,
    Pending,
}

pub trait ConsentSnapshot: Send + Sync {
    /// Absent consent is treated identically to `Pending` (§4.8 step 2).
    fn collect_consent(&self) -> Option<ConsentValue>;
}

/// A fixed-value snapshot, for tests and for hosts that just want to hand
/// the core a point-in-time view rather than a live, mutable one.
#[derive(Clone, Debug, Default)]
pub struct StaticConfiguration {
    pub configured_id: Option<String>,
    pub environment: Option<String>,
    pub domain: Option<String>,
}

impl ConfigurationSnapshot for StaticConfiguration {
    fn configured_id(&self) -> Option<String> {
        self.configured_id.clone()
    }
    fn environment(&self) -> Option<String> {
        self.environment.clone()
    }
    fn domain(&self) -> Option<String> {
        self.domain.clone()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticIdentity {
    pub identity_map: Option<BTreeMap<String, Value>>,
}

impl IdentitySnapshot for StaticIdentity {
    fn identity_map(&self) -> Option<BTreeMap<String, Value>> {
        self.identity_map.clone()
    }
}

#[derive(Clone, Debug)]
pub struct StaticConsent(pub Option<ConsentValue>);

impl ConsentSnapshot for StaticConsent {
    fn collect_consent(&self) -> Option<ConsentValue> {
        self.0
    }
}
