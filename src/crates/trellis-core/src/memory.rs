//! Long-term memory adapter contract.
//!
//! Memory nodes call `store` and `query`; how text is embedded, indexed,
//! and ranked is entirely the adapter's concern. The in-memory reference
//! implementation ranks by naive token overlap so the engine runs with zero
//! wiring.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record written to long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A semantic query against long-term memory.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub text: String,
    pub limit: usize,
    pub session_id: Option<String>,
}

/// One query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    pub text: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Memory adapter contract consumed by memory nodes.
#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    /// Persist a record.
    async fn store(&self, record: MemoryRecord) -> Result<()>;

    /// Return up to `query.limit` hits, best first.
    async fn query(&self, query: MemoryQuery) -> Result<Vec<MemoryHit>>;
}

/// Reference adapter: keeps records in memory and ranks by word overlap.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (test/introspection helper).
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn overlap_score(query: &str, text: &str) -> f32 {
    let query_words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let text_words: std::collections::HashSet<&str> = text_lower.split_whitespace().collect();
    let matched = query_words
        .iter()
        .filter(|w| text_words.contains(w.as_str()))
        .count();
    matched as f32 / query_words.len() as f32
}

#[async_trait]
impl MemoryAdapter for InMemoryMemoryStore {
    async fn store(&self, record: MemoryRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn query(&self, query: MemoryQuery) -> Result<Vec<MemoryHit>> {
        let records = self.records.read();
        let mut hits: Vec<MemoryHit> = records
            .iter()
            .filter(|r| match (&query.session_id, &r.session_id) {
                (Some(wanted), Some(actual)) => wanted == actual,
                _ => true,
            })
            .map(|r| MemoryHit {
                text: r.text.clone(),
                score: overlap_score(&query.text, &r.text),
                metadata: r.metadata.clone(),
            })
            .filter(|h| h.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(query.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str, session: Option<&str>) -> MemoryRecord {
        MemoryRecord {
            text: text.into(),
            metadata: None,
            session_id: session.map(Into::into),
        }
    }

    #[tokio::test]
    async fn query_ranks_by_overlap() {
        let store = InMemoryMemoryStore::new();
        store.store(record("the cat sat on the mat", None)).await.unwrap();
        store.store(record("dogs chase cars", None)).await.unwrap();
        store.store(record("the cat chased the dog", None)).await.unwrap();

        let hits = store
            .query(MemoryQuery {
                text: "cat mat".into(),
                limit: 2,
                session_id: None,
            })
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "the cat sat on the mat");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn query_respects_limit_and_drops_misses() {
        let store = InMemoryMemoryStore::new();
        store.store(record("alpha beta", None)).await.unwrap();
        store.store(record("gamma delta", None)).await.unwrap();

        let hits = store
            .query(MemoryQuery {
                text: "alpha".into(),
                limit: 5,
                session_id: None,
            })
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "alpha beta");
    }

    #[tokio::test]
    async fn session_scoping_filters_records() {
        let store = InMemoryMemoryStore::new();
        store.store(record("note one", Some("s1"))).await.unwrap();
        store.store(record("note two", Some("s2"))).await.unwrap();
        store.store(record("note three", None)).await.unwrap();

        let hits = store
            .query(MemoryQuery {
                text: "note".into(),
                limit: 10,
                session_id: Some("s1".into()),
            })
            .await
            .unwrap();

        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert!(texts.contains(&"note one"));
        assert!(texts.contains(&"note three"));
        assert!(!texts.contains(&"note two"));
    }
}
