use crate::ids::EventId;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type XdmMap = BTreeMap<String, Value>;

/// Boundary input (§3 ExperienceEvent): created by the host, immutable once
/// built, freed after its hit is acknowledged.
#[derive(Clone, Debug)]
pub struct ExperienceEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub xdm: XdmMap,
    pub data: Option<Map<String, Value>>,
    pub dataset_id_override: Option<String>,
    pub datastream_id_override: Option<String>,
    pub datastream_config_override: Option<Value>,
    /// Verbatim `request.path` override (§4.3, §4.8 step 6).
    pub path_override: Option<String>,
    pub send_completion: bool,
}

impl ExperienceEvent {
    pub fn new(xdm: XdmMap) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            xdm,
            data: None,
            dataset_id_override: None,
            datastream_id_override: None,
            datastream_config_override: None,
            path_override: None,
            send_completion: false,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    /// §4.8 step 1: reject if `xdm` AND `data` are both missing or empty.
    pub fn is_rejectable(&self) -> bool {
        self.xdm.is_empty() && self.data.as_ref().map(Map::is_empty).unwrap_or(true)
    }
}
