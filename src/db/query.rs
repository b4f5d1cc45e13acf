/// Search query model for the event store
///
/// Mirrors a boolean document query: `must` clauses filter, `should` clauses only add
/// to the relevance score, results are ordered by score unless explicit sort keys are
/// given, and a from/size window pages through them.

use serde::Serialize;
use serde_json::{json, Value};

/// Exact-match condition on one indexed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Clause {
    ReturnCode(i32),
    Command(String),
    Cwd(String),
    /// `env.<key> == value`
    Env { key: String, value: String },
}

impl Clause {
    pub fn env(key: impl Into<String>, value: impl Into<String>) -> Self {
        Clause::Env {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Indexed field name, as in a document query
    pub fn field(&self) -> String {
        match self {
            Clause::ReturnCode(_) => "return_code".to_string(),
            Clause::Command(_) => "command".to_string(),
            Clause::Cwd(_) => "cwd".to_string(),
            Clause::Env { key, .. } => format!("env.{}", key),
        }
    }

    fn to_dsl(&self) -> Value {
        let value = match self {
            Clause::ReturnCode(code) => json!(code),
            Clause::Command(v) | Clause::Cwd(v) | Clause::Env { value: v, .. } => json!(v),
        };
        json!({ "match": { self.field(): value } })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortField {
    Score,
    StartTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: SortField,
    pub order: SortOrder,
}

impl SortKey {
    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub must: Vec<Clause>,
    pub should: Vec<Clause>,
    /// Empty means relevance order
    pub sort: Vec<SortKey>,
    pub from: usize,
    pub size: usize,
}

impl SearchQuery {
    pub fn new(size: usize) -> Self {
        Self {
            must: Vec::new(),
            should: Vec::new(),
            sort: Vec::new(),
            from: 0,
            size,
        }
    }

    pub fn must(mut self, clause: Clause) -> Self {
        self.must.push(clause);
        self
    }

    pub fn should(mut self, clause: Clause) -> Self {
        self.should.push(clause);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn from(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    /// The query as a JSON document query body, for logs and debugging
    pub fn to_dsl(&self) -> Value {
        let mut body = json!({
            "from": self.from,
            "size": self.size,
            "query": {
                "bool": {
                    "must": self.must.iter().map(Clause::to_dsl).collect::<Vec<_>>(),
                    "should": self.should.iter().map(Clause::to_dsl).collect::<Vec<_>>(),
                }
            }
        });

        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|key| {
                    let field = match key.field {
                        SortField::Score => "_score",
                        SortField::StartTimestamp => "start_timestamp",
                    };
                    let order = match key.order {
                        SortOrder::Asc => "asc",
                        SortOrder::Desc => "desc",
                    };
                    json!({ field: { "order": order } })
                })
                .collect();
            body["sort"] = Value::Array(sort);
        }

        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let q = SearchQuery::new(10)
            .must(Clause::ReturnCode(0))
            .should(Clause::env("USER", "bob"))
            .sort_by(SortKey::desc(SortField::StartTimestamp))
            .from(20);

        assert_eq!(q.must, vec![Clause::ReturnCode(0)]);
        assert_eq!(q.should[0].field(), "env.USER");
        assert_eq!(q.from, 20);
        assert_eq!(q.size, 10);
    }

    #[test]
    fn test_dsl_shape() {
        let q = SearchQuery::new(500)
            .must(Clause::ReturnCode(0))
            .must(Clause::env("PWD", "/x"))
            .sort_by(SortKey::desc(SortField::StartTimestamp))
            .sort_by(SortKey::desc(SortField::Score));
        let dsl = q.to_dsl();

        assert_eq!(dsl["size"], 500);
        assert_eq!(dsl["query"]["bool"]["must"][0]["match"]["return_code"], 0);
        assert_eq!(dsl["query"]["bool"]["must"][1]["match"]["env.PWD"], "/x");
        assert_eq!(dsl["sort"][0]["start_timestamp"]["order"], "desc");
        assert_eq!(dsl["sort"][1]["_score"]["order"], "desc");
    }

    #[test]
    fn test_relevance_query_has_no_sort() {
        let dsl = SearchQuery::new(5).to_dsl();
        assert!(dsl.get("sort").is_none());
    }
}
