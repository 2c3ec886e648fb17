// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Journal input and the normalized records produced from it.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// A journal entry exactly as the game wrote it.
pub type RawEvent = Map<String, Value>;

/// Journal event written on arrival in a new system.
pub const SYSTEM_ARRIVAL_EVENT: &str = "FSDJump";
/// Journal event written when a body is scanned.
pub const BODY_SCAN_EVENT: &str = "Scan";

/// Returns true for the only two journal events the relay consumes.
pub fn is_exploration_event(name: &str) -> bool {
    name == SYSTEM_ARRIVAL_EVENT || name == BODY_SCAN_EVENT
}

/// Host state that accompanies every journal entry.
#[derive(Debug, Clone, Copy)]
pub struct JournalContext<'a> {
    pub commander: &'a str,
    pub is_beta: bool,
    pub system: Option<&'a str>,
    pub station: Option<&'a str>,
    pub state: Option<&'a Value>,
}

impl<'a> JournalContext<'a> {
    pub fn new(commander: &'a str) -> Self {
        Self {
            commander,
            is_beta: false,
            system: None,
            station: None,
            state: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordKind {
    SystemEntry,
    StellarBodyScan,
    PlanetaryBodyScan,
    AsteroidClusterScan,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SystemEntry => "SystemEntry",
            Self::StellarBodyScan => "StellarBodyScan",
            Self::PlanetaryBodyScan => "PlanetaryBodyScan",
            Self::AsteroidClusterScan => "AsteroidClusterScan",
        };
        f.write_str(name)
    }
}

/// One normalized exploration event, as posted to the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredRecord {
    commander_name: String,
    event_timestamp: String,
    event_type: RecordKind,
    system_address: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_id: Option<Value>,
    data: Map<String, Value>,
}

impl StructuredRecord {
    pub(crate) fn new(
        commander_name: &str,
        event_timestamp: String,
        event_type: RecordKind,
        system_address: Value,
        body_id: Option<Value>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            commander_name: commander_name.to_string(),
            event_timestamp,
            event_type,
            system_address,
            body_id,
            data,
        }
    }

    pub fn commander_name(&self) -> &str {
        &self.commander_name
    }

    pub fn event_timestamp(&self) -> &str {
        &self.event_timestamp
    }

    pub fn kind(&self) -> RecordKind {
        self.event_type
    }

    pub fn system_address(&self) -> &Value {
        &self.system_address
    }

    pub fn body_id(&self) -> Option<&Value> {
        self.body_id.as_ref()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_arrival_and_scan_are_exploration_events() {
        assert!(is_exploration_event("FSDJump"));
        assert!(is_exploration_event("Scan"));
        assert!(!is_exploration_event("Docked"));
        assert!(!is_exploration_event("scan"));
    }

    #[test]
    fn test_system_entry_serializes_without_body_id() {
        let mut data = Map::new();
        data.insert("SystemAddress".to_string(), json!(100));
        let record = StructuredRecord::new(
            "Jameson",
            "3310-01-01T00:00:00Z".to_string(),
            RecordKind::SystemEntry,
            json!(100),
            None,
            data,
        );

        let value = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(
            value,
            json!({
                "commander_name": "Jameson",
                "event_timestamp": "3310-01-01T00:00:00Z",
                "event_type": "SystemEntry",
                "system_address": 100,
                "data": {"SystemAddress": 100}
            })
        );
    }

    #[test]
    fn test_scan_record_keeps_null_body_id() {
        let record = StructuredRecord::new(
            "Jameson",
            "3310-01-01T00:00:00Z".to_string(),
            RecordKind::AsteroidClusterScan,
            json!(7),
            Some(Value::Null),
            Map::new(),
        );
        let value = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(value["body_id"], Value::Null);
        assert!(value.as_object().is_some_and(|o| o.contains_key("body_id")));
        assert_eq!(value["event_type"], "AsteroidClusterScan");
    }
}
