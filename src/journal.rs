//! Event journal
//!
//! Append-only JSONL audit trail. Every entry carries a timestamp, a system
//! name, an event name and the event payload. Event types can be disabled
//! when the journal is opened; disabled events are never written.

use crate::events::JournalEvent;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventType {
    pub system: String,
    pub event: String,
}

impl EventType {
    pub fn new(system: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            event: event.into(),
        }
    }

    pub fn of<E: JournalEvent>() -> Self {
        Self::new(E::SYSTEM, E::EVENT)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.system, self.event)
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        match parts.as_slice() {
            [system, event] if !system.is_empty() && !event.is_empty() => {
                Ok(Self::new(system.trim(), event.trim()))
            }
            _ => Err(Error::Config(format!("Invalid event type: '{}'", s))),
        }
    }
}

/// Event types whose journaling is suppressed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisabledEvents(HashSet<EventType>);

impl DisabledEvents {
    /// Parse `"system1:event1,system1:event2"`; an empty string disables nothing
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        s.split(',')
            .map(EventType::from_str)
            .collect::<Result<HashSet<_>>>()
            .map(Self)
    }

    pub fn contains(&self, event: &EventType) -> bool {
        self.0.contains(event)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub system: String,
    pub event: String,
    pub data: Value,
}

struct JournalWriter {
    path: PathBuf,
}

impl JournalWriter {
    fn write(&self, entry: &JournalEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Journal {
    writer: Option<Arc<Mutex<JournalWriter>>>,
    disabled: DisabledEvents,
}

impl Journal {
    pub fn open(path: impl Into<PathBuf>, disabled: DisabledEvents) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: Some(Arc::new(Mutex::new(JournalWriter { path }))),
            disabled,
        })
    }

    /// Journal that drops everything
    pub fn null() -> Self {
        Self {
            writer: None,
            disabled: DisabledEvents::default(),
        }
    }

    pub fn is_enabled(&self, event_type: &EventType) -> bool {
        self.writer.is_some() && !self.disabled.contains(event_type)
    }

    /// Record a typed event; write failures are logged, never returned
    pub async fn record<E: JournalEvent>(&self, event: &E) {
        let event_type = EventType::of::<E>();
        if !self.is_enabled(&event_type) {
            return;
        }
        match serde_json::to_value(event) {
            Ok(data) => self.record_value(&event_type, data).await,
            Err(e) => tracing::warn!(event = %event_type, error = %e, "Failed to encode journal event"),
        }
    }

    pub async fn record_value(&self, event_type: &EventType, data: Value) {
        let Some(writer) = &self.writer else {
            return;
        };
        if self.disabled.contains(event_type) {
            return;
        }

        let entry = JournalEntry {
            timestamp: Utc::now(),
            system: event_type.system.clone(),
            event: event_type.event.clone(),
            data,
        };
        let writer = writer.lock().await;
        if let Err(e) = writer.write(&entry) {
            tracing::warn!(error = %e, "Failed to write journal entry");
        }
    }
}

/// Read every entry back from a journal file
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
    let file = std::fs::File::open(path.as_ref())?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}
