/// Data models for stored events
///
/// Rows map to the `events` table; env pairs live in `event_env` and are attached
/// after the fact. Attribute bags are stored as JSON text.

use crate::core::Event;
use crate::error::{RecallError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// One `events` row plus its computed relevance score
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: i64,
    pub command: String,
    pub argv: String, // JSON array
    pub cwd: Option<String>,
    pub return_code: i32,
    pub start_timestamp: String, // RFC 3339, microseconds, UTC
    pub end_timestamp: Option<String>,
    pub path: Option<String>,
    pub realpath: Option<String>,
    pub hostname: Option<String>,
    pub subject: Option<String>,        // JSON object
    pub return_status: Option<String>,  // JSON object
    pub audit_metadata: Option<String>, // JSON object
    pub score: f64,
}

impl EventRow {
    /// Rebuild the event with its env pairs
    pub fn into_event(self, env: BTreeMap<String, String>) -> Result<Event> {
        Ok(Event {
            command: self.command,
            argv: serde_json::from_str(&self.argv)?,
            env,
            cwd: self.cwd,
            return_code: self.return_code,
            start_timestamp: parse_stored_timestamp(&self.start_timestamp)?,
            end_timestamp: self
                .end_timestamp
                .as_deref()
                .map(parse_stored_timestamp)
                .transpose()?,
            path: self.path,
            realpath: self.realpath,
            hostname: self.hostname,
            subject: bag_from_json(self.subject.as_deref())?,
            return_status: bag_from_json(self.return_status.as_deref())?,
            audit_metadata: bag_from_json(self.audit_metadata.as_deref())?,
        })
    }
}

/// A search result: the event and the score the store gave it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub score: f64,
    pub event: Event,
}

/// Fixed-width so that text order is time order
pub fn format_stored_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_stored_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RecallError::Generic(format!("corrupt timestamp {:?} in store: {}", raw, e)))
}

/// Empty bags are stored as NULL
pub fn bag_to_json(bag: &BTreeMap<String, String>) -> Result<Option<String>> {
    if bag.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(bag)?))
    }
}

fn bag_from_json(raw: Option<&str>) -> Result<BTreeMap<String, String>> {
    match raw {
        Some(text) => Ok(serde_json::from_str(text)?),
        None => Ok(BTreeMap::new()),
    }
}
