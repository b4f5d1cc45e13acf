/// totalrecall library
///
/// Shell command capture pipeline: normalize captured commands, drop excluded ones,
/// relay them over a pub/sub bus into an event store, and recall the ones that fit
/// the current shell context.

pub mod bus;
pub mod collector;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod shell;

// Re-exports for convenience
pub use config::Config;
pub use db::{Database, EventStore};
pub use error::{RecallError, Result};
