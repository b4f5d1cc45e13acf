/// Event store
///
/// Persists normalized events in SQLite via sqlx and answers boolean
/// must/should searches over them.

pub mod connection;
pub mod models;
pub mod queries;
pub mod query;

pub use connection::{Database, DatabaseStats};
pub use models::{EventRow, SearchHit};
pub use query::{Clause, SearchQuery, SortField, SortKey, SortOrder};

use crate::core::Event;
use crate::error::Result;
use async_trait::async_trait;

/// Document store the indexer writes to and the retriever reads from
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store one event, returning its id
    async fn index(&self, event: &Event) -> Result<i64>;

    /// Hits in result order, at most `query.size` of them
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}
