/// Event store queries
///
/// Indexing writes one event (and its env pairs) per transaction. Searching compiles
/// a [`SearchQuery`] to SQL: must clauses become the WHERE filter, and every clause
/// that matches adds 1.0 to the score.

use crate::core::Event;
use crate::db::models::{
    bag_to_json, format_stored_timestamp, EventRow, SearchHit,
};
use crate::db::query::{Clause, SearchQuery, SortField, SortOrder};
use crate::db::{Database, EventStore};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const EVENT_COLUMNS: &str = "e.id, e.command, e.argv, e.cwd, e.return_code, \
     e.start_timestamp, e.end_timestamp, e.path, e.realpath, e.hostname, \
     e.subject, e.return_status, e.audit_metadata";

impl Database {
    /// Store one event
    ///
    /// # Returns
    /// * `Ok(i64)` - The new event's row id
    pub async fn index_event(&self, event: &Event) -> Result<i64> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO events (command, argv, cwd, return_code, start_timestamp, end_timestamp,
                                path, realpath, hostname, subject, return_status, audit_metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&event.command)
        .bind(serde_json::to_string(&event.argv)?)
        .bind(&event.cwd)
        .bind(event.return_code)
        .bind(format_stored_timestamp(&event.start_timestamp))
        .bind(event.end_timestamp.as_ref().map(format_stored_timestamp))
        .bind(&event.path)
        .bind(&event.realpath)
        .bind(&event.hostname)
        .bind(bag_to_json(&event.subject)?)
        .bind(bag_to_json(&event.return_status)?)
        .bind(bag_to_json(&event.audit_metadata)?)
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.get(0);

        for (key, value) in &event.env {
            sqlx::query("INSERT INTO event_env (event_id, key, value) VALUES (?, ?, ?)")
                .bind(id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// Run a search and return hits in result order
    pub async fn search_events(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        qb.push(EVENT_COLUMNS);

        qb.push(", (0.0");
        for clause in query.must.iter().chain(query.should.iter()) {
            qb.push(" + (CASE WHEN ");
            push_clause(&mut qb, clause);
            qb.push(" THEN 1.0 ELSE 0.0 END)");
        }
        qb.push(") AS score FROM events e");

        for (i, clause) in query.must.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            push_clause(&mut qb, clause);
        }

        qb.push(" ORDER BY ");
        if query.sort.is_empty() {
            qb.push("score DESC, e.start_timestamp DESC");
        } else {
            for (i, key) in query.sort.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(match key.field {
                    SortField::Score => "score",
                    SortField::StartTimestamp => "e.start_timestamp",
                });
                qb.push(match key.order {
                    SortOrder::Asc => " ASC",
                    SortOrder::Desc => " DESC",
                });
            }
        }
        qb.push(", e.id DESC");

        qb.push(" LIMIT ");
        qb.push_bind(query.size as i64);
        qb.push(" OFFSET ");
        qb.push_bind(query.from as i64);

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(self.pool()).await?;
        debug!(hits = rows.len(), "search finished");

        let mut env_by_event = self.load_env(rows.iter().map(|r| r.id)).await?;

        rows.into_iter()
            .map(|row| {
                let env = env_by_event.remove(&row.id).unwrap_or_default();
                let score = row.score;
                Ok(SearchHit {
                    score,
                    event: row.into_event(env)?,
                })
            })
            .collect()
    }

    async fn load_env<I>(&self, ids: I) -> Result<HashMap<i64, BTreeMap<String, String>>>
    where
        I: IntoIterator<Item = i64>,
    {
        let ids: Vec<i64> = ids.into_iter().collect();
        let mut env_by_event: HashMap<i64, BTreeMap<String, String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(env_by_event);
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT event_id, key, value FROM event_env WHERE event_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let pairs: Vec<(i64, String, String)> = qb.build_query_as().fetch_all(self.pool()).await?;
        for (event_id, key, value) in pairs {
            env_by_event.entry(event_id).or_default().insert(key, value);
        }

        Ok(env_by_event)
    }
}

fn push_clause(qb: &mut QueryBuilder<'_, Sqlite>, clause: &Clause) {
    match clause {
        Clause::ReturnCode(code) => {
            qb.push("e.return_code = ");
            qb.push_bind(*code);
        }
        Clause::Command(command) => {
            qb.push("e.command = ");
            qb.push_bind(command.clone());
        }
        Clause::Cwd(cwd) => {
            qb.push("e.cwd = ");
            qb.push_bind(cwd.clone());
        }
        Clause::Env { key, value } => {
            qb.push("EXISTS (SELECT 1 FROM event_env v WHERE v.event_id = e.id AND v.key = ");
            qb.push_bind(key.clone());
            qb.push(" AND v.value = ");
            qb.push_bind(value.clone());
            qb.push(")");
        }
    }
}

#[async_trait]
impl EventStore for Database {
    async fn index(&self, event: &Event) -> Result<i64> {
        self.index_event(event).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.search_events(query).await
    }
}
