// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use exploration_relay::{JournalContext, RawEvent};
use serde_json::Value;
use tracing::{debug, warn};

/// Parses one journal line. Blank lines are skipped silently, anything else that is not a JSON
/// object is logged and skipped.
pub fn parse_line(line: &str) -> Option<RawEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(entry)) => Some(entry),
        Ok(other) => {
            warn!("Skipping journal line that is not an object: {other}");
            None
        }
        Err(e) => {
            warn!("Skipping malformed journal line: {e}");
            None
        }
    }
}

/// What the host knows about the session, rebuilt from the journal as it is read.
#[derive(Debug, Default)]
pub struct HostContext {
    commander: Option<String>,
    is_beta: bool,
    system: Option<String>,
    station: Option<String>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the tracked session state from a journal entry.
    pub fn observe(&mut self, entry: &RawEvent) {
        let Some(event) = entry.get("event").and_then(Value::as_str) else {
            return;
        };
        match event {
            "Fileheader" => {
                self.is_beta = text(entry, "gameversion")
                    .is_some_and(|version| version.to_lowercase().contains("beta"));
                if self.is_beta {
                    debug!("Beta journal detected, exploration events will be ignored");
                }
            }
            "Commander" => self.set_commander(text(entry, "Name")),
            "LoadGame" => self.set_commander(text(entry, "Commander")),
            "Location" | "FSDJump" | "CarrierJump" => {
                if let Some(system) = text(entry, "StarSystem") {
                    self.system = Some(system.to_string());
                }
            }
            "Docked" => self.station = text(entry, "StationName").map(str::to_string),
            "Undocked" => self.station = None,
            _ => {}
        }
    }

    /// The context handed to the relay, or `None` until a commander has been seen.
    pub fn journal_context(&self) -> Option<JournalContext<'_>> {
        let commander = self.commander.as_deref()?;
        Some(JournalContext {
            is_beta: self.is_beta,
            system: self.system.as_deref(),
            station: self.station.as_deref(),
            ..JournalContext::new(commander)
        })
    }

    fn set_commander(&mut self, name: Option<&str>) {
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            if self.commander.as_deref() != Some(name) {
                debug!("Journal commander is {name}");
            }
            self.commander = Some(name.to_string());
        }
    }
}

fn text<'a>(entry: &'a RawEvent, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}
