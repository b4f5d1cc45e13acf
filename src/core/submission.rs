/// Command submissions from the shell hook
///
/// The hook sends the command text (usually base64 so it survives shell quoting), the
/// return code, timestamps and the shell's environment. This module validates that
/// payload and turns it into an [`Event`].

use crate::core::env_filter::EnvFilter;
use crate::core::event::Event;
use crate::error::{RecallError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// Don't let anyone record a 10MB command. that's just weird.
pub const MAX_COMMAND_LENGTH: usize = 10_000;

/// How the `command` field is encoded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandEncoding {
    Base64,
    Plain,
}

/// Wire payload of one captured command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_encoding: Option<CommandEncoding>,
    pub return_code: i32,
    pub start_timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Submission {
    /// Validate and normalize into an event. `now` is the ingestion time.
    pub fn into_event(self, env_filter: &EnvFilter, now: DateTime<Utc>) -> Result<Event> {
        let command = decode_command(&self.command, self.command_encoding)?;
        validate_command(&command)?;

        // unbalanced quotes etc. leave argv empty; the event is still kept
        let argv = shlex::split(&command).unwrap_or_else(|| {
            debug!("command could not be tokenized, argv left empty");
            Vec::new()
        });

        let env = env_filter.apply(self.env);

        let start_timestamp = parse_timestamp(&self.start_timestamp).unwrap_or_else(|| {
            warn!(raw = %self.start_timestamp, "bad start timestamp, using ingestion time");
            now
        });
        let end_timestamp = match self.end_timestamp.as_deref() {
            Some(raw) => parse_timestamp(raw).or_else(|| {
                warn!(%raw, "bad end timestamp, using ingestion time");
                Some(now)
            }),
            None => Some(now),
        };

        let mut event = Event::new(command, argv, env, self.return_code, start_timestamp);
        event.end_timestamp = end_timestamp;
        event.hostname = self.hostname;
        Ok(event)
    }
}

/// Decode the command text; without an explicit encoding, base64 is tried first
pub fn decode_command(raw: &str, encoding: Option<CommandEncoding>) -> Result<String> {
    let decoded = match encoding {
        Some(CommandEncoding::Plain) => raw.to_string(),
        Some(CommandEncoding::Base64) => {
            let bytes = STANDARD
                .decode(raw.trim())
                .map_err(|e| RecallError::InvalidSubmission(format!("bad base64: {}", e)))?;
            String::from_utf8(bytes).map_err(|_| {
                RecallError::InvalidSubmission("command is not valid UTF-8".to_string())
            })?
        }
        None => try_base64(raw).unwrap_or_else(|| raw.to_string()),
    };

    Ok(decoded.trim().to_string())
}

// Only accept a base64 reading that yields printable text
fn try_base64(raw: &str) -> Option<String> {
    let bytes = STANDARD.decode(raw.trim()).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let printable = text
        .chars()
        .all(|c| !c.is_control() || c.is_whitespace());
    (printable && !text.trim().is_empty()).then_some(text)
}

fn validate_command(command: &str) -> Result<()> {
    if command.is_empty() {
        return Err(RecallError::InvalidSubmission("empty command".to_string()));
    }
    if command.chars().count() > MAX_COMMAND_LENGTH {
        return Err(RecallError::CommandTooLong(MAX_COMMAND_LENGTH));
    }
    Ok(())
}

/// RFC 3339, with or without the `T`, or a naive UTC date-time
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    // `date --rfc-3339=ns` style: a space where the T goes
    if raw.len() > 10 && raw.as_bytes()[10] == b' ' {
        let with_t = format!("{}T{}", &raw[..10], &raw[11..]);
        if let Ok(ts) = DateTime::parse_from_rfc3339(&with_t) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
