// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification and projection of journal entries into [`StructuredRecord`]s.
//!
//! Arrival events always produce a `SystemEntry`. Scan events are classified as a star, a
//! planet/moon or an asteroid cluster (a body whose parent chain contains a ring), in that order
//! of precedence; anything else is ignored. Missing journal fields are projected as `null`.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::error;

use crate::error::TransformError;
use crate::event::{RawEvent, RecordKind, StructuredRecord, BODY_SCAN_EVENT, SYSTEM_ARRIVAL_EVENT};

const UNIVERSAL_SCAN_FIELDS: [&str; 6] = [
    "BodyName",
    "BodyID",
    "SystemAddress",
    "DistanceFromArrivalLS",
    "WasDiscovered",
    "WasMapped",
];

const STELLAR_FIELDS: [&str; 10] = [
    "StarType",
    "Subclass",
    "StellarMass",
    "Radius",
    "AbsoluteMagnitude",
    "Age_MY",
    "SurfaceTemperature",
    "Luminosity",
    "RotationPeriod",
    "AxialTilt",
];

const PLANETARY_FIELDS: [&str; 11] = [
    "PlanetClass",
    "TerraformState",
    "AtmosphereType",
    "Volcanism",
    "MassEM",
    "Radius",
    "SurfaceGravity",
    "SurfaceTemperature",
    "SurfacePressure",
    "Landable",
    "TidalLock",
];

const ORBITAL_FIELDS: [&str; 5] = [
    "SemiMajorAxis",
    "Eccentricity",
    "OrbitalInclination",
    "Periapsis",
    "OrbitalPeriod",
];

const RING_FIELDS: [&str; 5] = ["Name", "RingClass", "MassMT", "InnerRad", "OuterRad"];

/// Builds the record for one journal entry, or `None` if the entry is not of interest.
///
/// Never fails: a malformed entry is logged and dropped.
pub fn transform(entry: &RawEvent, commander: &str) -> Option<StructuredRecord> {
    match try_transform(entry, commander) {
        Ok(record) => record,
        Err(e) => {
            error!("Error building exploration record: {e}");
            None
        }
    }
}

pub fn try_transform(
    entry: &RawEvent,
    commander: &str,
) -> Result<Option<StructuredRecord>, TransformError> {
    let timestamp = event_timestamp(entry)?;
    match entry.get("event").and_then(Value::as_str) {
        Some(SYSTEM_ARRIVAL_EVENT) => Ok(Some(system_entry(entry, commander, timestamp))),
        Some(BODY_SCAN_EVENT) => body_scan(entry, commander, timestamp),
        _ => Ok(None),
    }
}

fn event_timestamp(entry: &RawEvent) -> Result<String, TransformError> {
    match entry.get("timestamp") {
        None | Some(Value::Null) => Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        Some(Value::String(ts)) => Ok(ts.clone()),
        Some(_) => Err(TransformError::MalformedField {
            field: "timestamp",
            expected: "a string",
        }),
    }
}

fn system_entry(entry: &RawEvent, commander: &str, timestamp: String) -> StructuredRecord {
    let mut data = Map::new();
    copy_fields(&mut data, entry, &["SystemAddress", "StarSystem", "StarPos"]);
    // Usually null on arrival; the API fills it from later scans.
    data.insert("WasDiscovered".to_string(), field(entry, "WasDiscovered"));
    data.insert("BodyName".to_string(), field(entry, "Body"));
    data.insert("BodyID".to_string(), field(entry, "BodyID"));
    data.insert("Commander".to_string(), Value::from(commander));

    StructuredRecord::new(
        commander,
        timestamp,
        RecordKind::SystemEntry,
        field(entry, "SystemAddress"),
        None,
        data,
    )
}

fn body_scan(
    entry: &RawEvent,
    commander: &str,
    timestamp: String,
) -> Result<Option<StructuredRecord>, TransformError> {
    let Some(kind) = classify_scan(entry) else {
        return Ok(None);
    };

    let mut data = Map::new();
    copy_fields(&mut data, entry, &UNIVERSAL_SCAN_FIELDS);
    data.insert("Commander".to_string(), Value::from(commander));

    match kind {
        RecordKind::StellarBodyScan => {
            copy_fields(&mut data, entry, &STELLAR_FIELDS);
            copy_parents(&mut data, entry);
            copy_orbit(&mut data, entry);
            copy_rings(&mut data, entry)?;
        }
        RecordKind::PlanetaryBodyScan => {
            copy_fields(&mut data, entry, &PLANETARY_FIELDS);
            copy_or(&mut data, entry, "AtmosphereComposition", Value::Array(Vec::new()));
            copy_or(&mut data, entry, "Materials", Value::Array(Vec::new()));
            copy_or(&mut data, entry, "Composition", Value::Object(Map::new()));
            copy_parents(&mut data, entry);
            copy_orbit(&mut data, entry);
            if has_value(entry, "RotationPeriod") {
                copy_fields(&mut data, entry, &["RotationPeriod", "AxialTilt"]);
            }
            if copy_rings(&mut data, entry)? && is_truthy(entry.get("ReserveLevel")) {
                copy_fields(&mut data, entry, &["ReserveLevel"]);
            }
        }
        RecordKind::AsteroidClusterScan => copy_parents(&mut data, entry),
        RecordKind::SystemEntry => return Ok(None),
    }

    Ok(Some(StructuredRecord::new(
        commander,
        timestamp,
        kind,
        field(entry, "SystemAddress"),
        Some(field(entry, "BodyID")),
        data,
    )))
}

/// Star beats planet beats ring-parented cluster.
pub fn classify_scan(entry: &RawEvent) -> Option<RecordKind> {
    if is_truthy(entry.get("StarType")) {
        Some(RecordKind::StellarBodyScan)
    } else if is_truthy(entry.get("PlanetClass")) {
        Some(RecordKind::PlanetaryBodyScan)
    } else if has_ring_parent(entry) {
        Some(RecordKind::AsteroidClusterScan)
    } else {
        None
    }
}

fn has_ring_parent(entry: &RawEvent) -> bool {
    entry
        .get("Parents")
        .and_then(Value::as_array)
        .is_some_and(|parents| {
            parents
                .iter()
                .any(|parent| parent.as_object().is_some_and(|p| p.contains_key("Ring")))
        })
}

fn copy_parents(data: &mut Map<String, Value>, entry: &RawEvent) {
    if is_truthy(entry.get("Parents")) {
        copy_fields(data, entry, &["Parents"]);
    }
}

// Orbital elements only make sense for bodies that orbit something.
fn copy_orbit(data: &mut Map<String, Value>, entry: &RawEvent) {
    if has_value(entry, "SemiMajorAxis") {
        copy_fields(data, entry, &ORBITAL_FIELDS);
    }
}

/// Returns whether ring summaries were attached.
fn copy_rings(data: &mut Map<String, Value>, entry: &RawEvent) -> Result<bool, TransformError> {
    let Some(rings) = entry.get("Rings").filter(|rings| is_truthy(Some(*rings))) else {
        return Ok(false);
    };
    let malformed = || TransformError::MalformedField {
        field: "Rings",
        expected: "an array of objects",
    };

    let summaries = rings
        .as_array()
        .ok_or_else(malformed)?
        .iter()
        .map(|ring| {
            let ring = ring.as_object().ok_or_else(malformed)?;
            let mut summary = Map::new();
            copy_fields(&mut summary, ring, &RING_FIELDS);
            Ok(Value::Object(summary))
        })
        .collect::<Result<Vec<_>, TransformError>>()?;

    data.insert("Rings".to_string(), Value::Array(summaries));
    Ok(true)
}

fn copy_fields(data: &mut Map<String, Value>, entry: &Map<String, Value>, keys: &[&str]) {
    for key in keys {
        data.insert((*key).to_string(), field(entry, key));
    }
}

fn copy_or(data: &mut Map<String, Value>, entry: &RawEvent, key: &str, default: Value) {
    let value = entry.get(key).cloned().unwrap_or(default);
    data.insert(key.to_string(), value);
}

fn field(entry: &Map<String, Value>, key: &str) -> Value {
    entry.get(key).cloned().unwrap_or(Value::Null)
}

fn has_value(entry: &RawEvent, key: &str) -> bool {
    !matches!(entry.get(key), None | Some(Value::Null))
}

/// Journal convention: null, false, zero and empty values count as absent.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}
