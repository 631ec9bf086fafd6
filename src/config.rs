//! Production `ConfigurationSnapshot` (§6, SPEC_FULL §2.1): a shared,
//! mutable view over the configuration extension's shared state, updated by
//! the host whenever `edge.configId`/`edge.environment`/`edge.domain`
//! change, and read by C3/C8 without any global lookup.

use crate::snapshot::ConfigurationSnapshot;
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug, Default)]
struct ConfigValues {
    configured_id: Option<String>,
    environment: Option<String>,
    domain: Option<String>,
}

/// Constructor-injected, host-updated configuration snapshot (Design Notes:
/// replace the global "Mobile Core shared state" lookup with an owned,
/// injectable collaborator).
#[derive(Clone, Debug, Default)]
pub struct EdgeConfig {
    values: Arc<RwLock<ConfigValues>>,
}

impl EdgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the host when the configuration extension's shared state
    /// changes (§4.8 step 3: "Read configuration snapshot").
    pub fn update(&self, configured_id: Option<String>, environment: Option<String>, domain: Option<String>) {
        let mut values = self.values.write().unwrap();
        values.configured_id = configured_id;
        values.environment = environment;
        values.domain = domain;
    }
}

impl ConfigurationSnapshot for EdgeConfig {
    fn configured_id(&self) -> Option<String> {
        self.values.read().unwrap().configured_id.clone()
    }

    fn environment(&self) -> Option<String> {
        self.values.read().unwrap().environment.clone()
    }

    fn domain(&self) -> Option<String> {
        self.values.read().unwrap().domain.clone()
    }
}
