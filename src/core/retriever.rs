/// Command retriever
///
/// Turns a shell context into a store query and the hits into a short, deduplicated
/// list of commands. Only successful commands are ever suggested.

use crate::config::RecallConfig;
use crate::core::event::{ShellContext, PWD_KEY};
use crate::db::{Clause, EventStore, SearchHit, SearchQuery, SortField, SortKey};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// How recall results are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RankMode {
    /// Best context match first
    #[default]
    Relevance,
    /// Most recent first, context match breaks ties
    Chronological,
}

impl FromStr for RankMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relevance" => Ok(RankMode::Relevance),
            "chronological" | "recent" => Ok(RankMode::Chronological),
            other => Err(format!("unknown rank mode: {}", other)),
        }
    }
}

impl fmt::Display for RankMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankMode::Relevance => write!(f, "relevance"),
            RankMode::Chronological => write!(f, "chronological"),
        }
    }
}

/// One row of recall output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCommand {
    pub score: f64,
    pub command: String,
}

pub struct Retriever {
    store: Arc<dyn EventStore>,
    config: RecallConfig,
}

impl Retriever {
    pub fn new(store: Arc<dyn EventStore>, config: RecallConfig) -> Self {
        Self { store, config }
    }

    /// Store query for `ctx`
    ///
    /// PWD must match exactly, every other env key only adds to the score.
    pub fn build_query(&self, ctx: &ShellContext, mode: RankMode) -> SearchQuery {
        let mut query = SearchQuery::new(self.config.window).must(Clause::ReturnCode(0));

        for (key, value) in &ctx.env {
            let clause = Clause::env(key.as_str(), value.as_str());
            query = if key == PWD_KEY {
                query.must(clause)
            } else {
                query.should(clause)
            };
        }

        if mode == RankMode::Chronological {
            query = query
                .sort_by(SortKey::desc(SortField::StartTimestamp))
                .sort_by(SortKey::desc(SortField::Score));
        }

        query
    }

    /// Ranked, deduplicated commands for `ctx`
    ///
    /// A failing store yields an empty list; the error is only logged.
    pub async fn rank(&self, ctx: &ShellContext, mode: RankMode) -> Vec<RankedCommand> {
        let query = self.build_query(ctx, mode);
        debug!(%mode, query = %query.to_dsl(), "recall query");

        match self.store.search(&query).await {
            Ok(hits) => dedupe_capped(hits, self.config.max_rows),
            Err(e) => {
                error!(%mode, error = %e, "recall search failed");
                Vec::new()
            }
        }
    }
}

/// First occurrence of each command wins; stops after `cap` distinct rows
pub fn dedupe_capped<I>(hits: I, cap: usize) -> Vec<RankedCommand>
where
    I: IntoIterator<Item = SearchHit>,
{
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for hit in hits {
        if rows.len() >= cap {
            break;
        }
        if !seen.insert(hit.event.command.clone()) {
            continue;
        }
        rows.push(RankedCommand {
            score: hit.score,
            command: hit.event.command,
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::submission::CommandEncoding;
    use crate::core::{Event, Normalizer, Submission};
    use crate::db::Database;
    use crate::error::{RecallError, Result};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn hit(score: f64, command: &str) -> SearchHit {
        SearchHit {
            score,
            event: Event::new(command, vec![], BTreeMap::new(), 0, Utc::now()),
        }
    }

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn commands(rows: &[RankedCommand]) -> Vec<&str> {
        rows.iter().map(|r| r.command.as_str()).collect()
    }

    /// Returns canned hits and remembers the last query
    #[derive(Default)]
    struct FakeStore {
        hits: Vec<SearchHit>,
        fail: bool,
        last_query: Mutex<Option<SearchQuery>>,
    }

    #[async_trait]
    impl EventStore for FakeStore {
        async fn index(&self, _event: &Event) -> Result<i64> {
            Ok(1)
        }

        async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
            *self.last_query.lock().unwrap() = Some(query.clone());
            if self.fail {
                return Err(RecallError::Generic("store is down".to_string()));
            }
            Ok(self.hits.clone())
        }
    }

    fn retriever(store: Arc<dyn EventStore>, max_rows: usize) -> Retriever {
        Retriever::new(
            store,
            RecallConfig {
                max_rows,
                window: 500,
            },
        )
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let hits = vec![hit(0.9, "ls -la"), hit(0.8, "ls -la"), hit(0.5, "pwd")];
        let rows = dedupe_capped(hits, 30);

        assert_eq!(commands(&rows), vec!["ls -la", "pwd"]);
        assert_eq!(rows[0].score, 0.9);
    }

    #[test]
    fn test_cap_bounds_distinct_rows() {
        let hits = vec![
            hit(5.0, "a"),
            hit(4.0, "a"),
            hit(3.0, "b"),
            hit(2.0, "c"),
            hit(1.0, "d"),
        ];
        let rows = dedupe_capped(hits, 2);
        assert_eq!(commands(&rows), vec!["a", "b"]);
    }

    #[test]
    fn test_query_shape() {
        let r = retriever(Arc::new(FakeStore::default()), 30);
        let ctx = ShellContext::new(env(&[("PWD", "/x"), ("USER", "bob")]));

        let query = r.build_query(&ctx, RankMode::Relevance);
        assert_eq!(
            query.must,
            vec![Clause::ReturnCode(0), Clause::env("PWD", "/x")]
        );
        assert_eq!(query.should, vec![Clause::env("USER", "bob")]);
        assert!(query.sort.is_empty());
        assert_eq!(query.size, 500);
    }

    #[test]
    fn test_chronological_only_adds_sort() {
        let r = retriever(Arc::new(FakeStore::default()), 30);
        let ctx = ShellContext::new(env(&[("PWD", "/x"), ("USER", "bob")]));

        let relevance = r.build_query(&ctx, RankMode::Relevance);
        let chrono = r.build_query(&ctx, RankMode::Chronological);

        assert_eq!(relevance.must, chrono.must);
        assert_eq!(relevance.should, chrono.should);
        assert_eq!(
            chrono.sort,
            vec![
                SortKey::desc(SortField::StartTimestamp),
                SortKey::desc(SortField::Score)
            ]
        );
    }

    #[test]
    fn test_context_without_pwd() {
        let r = retriever(Arc::new(FakeStore::default()), 30);
        let ctx = ShellContext::new(env(&[("USER", "bob")]));

        let query = r.build_query(&ctx, RankMode::Relevance);
        assert_eq!(query.must, vec![Clause::ReturnCode(0)]);
        assert_eq!(query.should.len(), 1);
    }

    #[tokio::test]
    async fn test_rank_uses_store_order() {
        let store = Arc::new(FakeStore {
            hits: vec![hit(0.9, "ls -la"), hit(0.8, "ls -la"), hit(0.5, "pwd")],
            ..Default::default()
        });
        let r = retriever(store.clone(), 30);
        let ctx = ShellContext::new(env(&[("PWD", "/x")]));

        let rows = r.rank(&ctx, RankMode::Relevance).await;
        assert_eq!(commands(&rows), vec!["ls -la", "pwd"]);
        assert!(store.last_query.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_failure_is_empty_result() {
        let store = Arc::new(FakeStore {
            fail: true,
            ..Default::default()
        });
        let r = retriever(store, 30);

        let rows = r.rank(&ShellContext::default(), RankMode::Chronological).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_rank_against_database() {
        let db = Arc::new(Database::new_test().await.unwrap());
        let at = |minute| Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap();

        let here = env(&[("PWD", "/proj"), ("USER", "bob")]);
        let other_user = env(&[("PWD", "/proj"), ("USER", "eve")]);
        let elsewhere = env(&[("PWD", "/tmp"), ("USER", "bob")]);

        db.index_event(&Event::new("cargo test", vec![], here.clone(), 0, at(1)))
            .await
            .unwrap();
        db.index_event(&Event::new("cargo build", vec![], other_user, 0, at(2)))
            .await
            .unwrap();
        db.index_event(&Event::new("cargo test", vec![], here.clone(), 0, at(3)))
            .await
            .unwrap();
        db.index_event(&Event::new("cargo fmt", vec![], here.clone(), 1, at(4)))
            .await
            .unwrap();
        db.index_event(&Event::new("rm -rf *", vec![], elsewhere, 0, at(5)))
            .await
            .unwrap();

        let r = retriever(db, 30);
        let ctx = ShellContext::new(here);

        let relevance = r.rank(&ctx, RankMode::Relevance).await;
        assert_eq!(commands(&relevance), vec!["cargo test", "cargo build"]);
        assert_eq!(relevance[0].score, 3.0);

        let recent = r.rank(&ctx, RankMode::Chronological).await;
        assert_eq!(commands(&recent), vec!["cargo test", "cargo build"]);
    }

    #[tokio::test]
    async fn test_sensitive_keys_score_after_filtering() {
        let db = Arc::new(Database::new_test().await.unwrap());
        let normalizer = Normalizer::default();
        let raw = env(&[("PWD", "/p"), ("GITHUB_TOKEN", "abc")]);

        let event = normalizer
            .submission(Submission {
                command: "gh pr list".to_string(),
                command_encoding: Some(CommandEncoding::Plain),
                return_code: 0,
                start_timestamp: "2024-05-01T09:00:00Z".to_string(),
                end_timestamp: None,
                env: raw.clone(),
                hostname: None,
            })
            .unwrap();
        db.index_event(&event).await.unwrap();

        let r = retriever(db, 30);
        let ctx = ShellContext::filtered(raw, normalizer.env_filter());
        let rows = r.rank(&ctx, RankMode::Relevance).await;

        assert_eq!(commands(&rows), vec!["gh pr list"]);
        assert_eq!(rows[0].score, 3.0);
    }

    #[test]
    fn test_rank_mode_parse() {
        assert_eq!("relevance".parse::<RankMode>().unwrap(), RankMode::Relevance);
        assert_eq!(
            "Chronological".parse::<RankMode>().unwrap(),
            RankMode::Chronological
        );
        assert!("random".parse::<RankMode>().is_err());
    }
}
