/// Error types for totalrecall
///
/// This module defines all possible errors that can occur in the application.
/// Uses thiserror for ergonomic error handling.

use thiserror::Error;

/// Main error type for totalrecall operations
#[derive(Error, Debug)]
pub enum RecallError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O errors (file operations, sockets, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command submission that cannot become an event
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// Command exceeds maximum length
    #[error("Command exceeds maximum allowed length of {0} characters")]
    CommandTooLong(usize),

    /// Relay bus publish/subscribe failure
    #[error("Bus error: {0}")]
    Bus(String),

    /// Collector or client transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Result type alias for totalrecall operations
pub type Result<T> = std::result::Result<T, RecallError>;

impl From<reqwest::Error> for RecallError {
    fn from(e: reqwest::Error) -> Self {
        RecallError::Transport(e.to_string())
    }
}

/// Convert RecallError to a user-friendly error message
impl RecallError {
    /// The caller sent something unusable, as opposed to us failing to handle it
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            RecallError::InvalidSubmission(_)
                | RecallError::CommandTooLong(_)
                | RecallError::Serialization(_)
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            RecallError::Database(e) => {
                format!("Event store error. Is the store path writable? Details: {}", e)
            }
            RecallError::Io(e) => {
                format!("File system or socket error. Details: {}", e)
            }
            RecallError::Serialization(e) => {
                format!("Data format error: {}", e)
            }
            RecallError::ConfigParse(e) => {
                format!("Could not read config file: {}", e)
            }
            RecallError::Config(msg) => {
                format!("Configuration issue: {}", msg)
            }
            RecallError::InvalidSubmission(reason) => {
                format!("Command was not recorded: {}", reason)
            }
            RecallError::CommandTooLong(max) => {
                format!("Command exceeds maximum length of {} characters", max)
            }
            RecallError::Bus(msg) => {
                format!("Relay bus unavailable: {}", msg)
            }
            RecallError::Transport(msg) => {
                format!("Could not reach the collector: {}", msg)
            }
            RecallError::Generic(msg) => msg.clone(),
        }
    }
}
