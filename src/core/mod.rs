/// Core functionality modules
///
/// The capture side (normalization, exclusion, recording), the indexer that
/// feeds the store, and the recall side (retrieval and ranking).

pub mod audit;
pub mod env_filter;
pub mod event;
pub mod exclusion;
pub mod indexer;
pub mod normalizer;
pub mod recorder;
pub mod retriever;
pub mod submission;

pub use env_filter::EnvFilter;
pub use event::{Event, ShellContext};
pub use exclusion::ExclusionFilter;
pub use indexer::{Indexer, IndexerStats, RetryPolicy};
pub use normalizer::Normalizer;
pub use recorder::{RecordOutcome, Recorder};
pub use retriever::{RankMode, RankedCommand, Retriever};
pub use submission::Submission;
