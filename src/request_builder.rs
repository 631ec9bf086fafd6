use crate::event::ExperienceEvent;
use crate::state_store::StateUpdate;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const RECORD_SEPARATOR: char = '\u{0000}';

/// `xdm.implementationDetails` (§4.4): environment name/version of the host
/// SDK concatenated with this extension's own version.
#[derive(Clone, Debug)]
pub struct ImplementationDetails {
    pub environment: String,
    pub name: String,
    pub host_sdk_version: String,
    pub extension_version: String,
}

impl ImplementationDetails {
    fn version(&self) -> String {
        format!("{}+{}", self.host_sdk_version, self.extension_version)
    }

    fn to_json(&self) -> Value {
        json!({
            "environment": self.environment,
            "name": self.name,
            "version": self.version(),
        })
    }
}

/// Everything a batch of events needs beyond the events themselves: the
/// identity/implementation/state snapshots taken at envelope-build time
/// (§5 "Reads from the request builder observe the snapshot at envelope-build
/// time"), plus the resolved datastream targeting for this hit.
#[derive(Clone, Debug)]
pub struct BatchContext {
    pub identity_map: Option<BTreeMap<String, Value>>,
    pub implementation_details: ImplementationDetails,
    pub state_entries: Vec<StateUpdate>,
    /// Effective `configId`: the override if present, else the configured id.
    pub effective_config_id: String,
    /// Set only when a `datastreamIdOverride` is in effect (§4.4 `meta.sdkConfig`).
    pub original_config_id: Option<String>,
    pub config_overrides: Option<Value>,
}

fn event_to_json(event: &ExperienceEvent) -> Value {
    let mut xdm = Map::new();
    for (k, v) in &event.xdm {
        xdm.insert(k.clone(), v.clone());
    }
    xdm.insert("_id".to_string(), json!(event.id.as_ref()));
    xdm.insert("timestamp".to_string(), json!(event.timestamp.to_rfc3339()));

    let mut entry = Map::new();
    entry.insert("xdm".to_string(), Value::Object(xdm));
    if let Some(data) = &event.data {
        if !data.is_empty() {
            entry.insert("data".to_string(), Value::Object(data.clone()));
        }
    }
    if let Some(dataset_id) = &event.dataset_id_override {
        entry.insert(
            "meta".to_string(),
            json!({ "collect": { "datasetId": dataset_id } }),
        );
    }
    Value::Object(entry)
}

/// Assembles the JSON envelope for a batch of events (C4, §4.4). The caller
/// (C8) is responsible for only grouping events that agree on identity,
/// implementation details, location hint, environment and datastream
/// targeting (§4.4 batch invariant, §8 law 3).
pub fn build_envelope(events: &[ExperienceEvent], ctx: &BatchContext) -> Value {
    let events_json: Vec<Value> = events.iter().map(event_to_json).collect();

    let mut xdm = Map::new();
    if let Some(identity_map) = &ctx.identity_map {
        let identity_json: Map<String, Value> =
            identity_map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        xdm.insert("identityMap".to_string(), Value::Object(identity_json));
    }
    xdm.insert("implementationDetails".to_string(), ctx.implementation_details.to_json());

    let mut meta = Map::new();
    meta.insert(
        "konductorConfig".to_string(),
        json!({
            "streaming": {
                "enabled": true,
                "recordSeparator": RECORD_SEPARATOR.to_string(),
                "lineFeed": "\n",
            }
        }),
    );
    if !ctx.state_entries.is_empty() {
        let entries: Vec<Value> = ctx
            .state_entries
            .iter()
            .map(|e| json!({ "key": e.key, "value": e.value, "maxAge": e.max_age }))
            .collect();
        meta.insert("state".to_string(), json!({ "entries": entries }));
    }
    match &ctx.config_overrides {
        Some(Value::Object(m)) if !m.is_empty() => {
            meta.insert("configOverrides".to_string(), Value::Object(m.clone()));
        }
        Some(v) if !v.is_null() => {
            meta.insert("configOverrides".to_string(), v.clone());
        }
        _ => {}
    }
    if let Some(original) = &ctx.original_config_id {
        if !original.is_empty() {
            meta.insert(
                "sdkConfig".to_string(),
                json!({ "datastream": { "original": original } }),
            );
        }
    }

    json!({
        "events": events_json,
        "xdm": Value::Object(xdm),
        "meta": Value::Object(meta),
    })
}
