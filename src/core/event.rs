/// Canonical event shape
///
/// Every producer (audit trail, shell hook) ends up here. Events are built once by the
/// normalizer and never mutated afterwards.

use crate::core::env_filter::EnvFilter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The env key that defines the working directory of an event or a query
pub const PWD_KEY: &str = "PWD";

/// One executed command and the context it ran in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub command: String,
    /// Position-significant; empty when the command could not be tokenized
    #[serde(default)]
    pub argv: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Always `env["PWD"]` at capture time
    #[serde(default)]
    pub cwd: Option<String>,
    pub return_code: i32,
    #[serde(alias = "@timestamp")]
    pub start_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub end_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subject: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub return_status: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub audit_metadata: BTreeMap<String, String>,
}

impl Event {
    /// Minimal event; `cwd` is taken from the env's PWD
    pub fn new(
        command: impl Into<String>,
        argv: Vec<String>,
        env: BTreeMap<String, String>,
        return_code: i32,
        start_timestamp: DateTime<Utc>,
    ) -> Self {
        let cwd = env.get(PWD_KEY).cloned();
        Self {
            command: command.into(),
            argv,
            env,
            cwd,
            return_code,
            start_timestamp,
            end_timestamp: None,
            path: None,
            realpath: None,
            hostname: None,
            subject: BTreeMap::new(),
            return_status: BTreeMap::new(),
            audit_metadata: BTreeMap::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }
}

/// Environment of the shell asking for recall. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShellContext {
    pub env: BTreeMap<String, String>,
}

impl ShellContext {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self { env }
    }

    /// Context from a raw environment, cleaned the same way captured events are
    /// so hashed and dropped keys line up with what the store holds
    pub fn filtered<I>(env: I, filter: &EnvFilter) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            env: filter.apply(env),
        }
    }

    /// Context of the current process
    pub fn from_process(filter: &EnvFilter) -> Self {
        Self::filtered(std::env::vars(), filter)
    }

    /// Context a captured event ran in
    pub fn from_event(event: &Event) -> Self {
        Self {
            env: event.env.clone(),
        }
    }

    pub fn pwd(&self) -> Option<&str> {
        self.env.get(PWD_KEY).map(String::as_str)
    }
}
