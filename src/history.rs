//! Per-session query history
//!
//! Kept in memory only; lost on restart. Each session keeps its newest
//! entries, and the least recently used sessions are dropped past a limit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 5;
pub const MAX_ENTRIES_PER_SESSION: usize = 50;
pub const MAX_SESSIONS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub response: String,
    pub processing_time_ms: u64,
}

impl HistoryEntry {
    pub fn new(query: impl Into<String>, response: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: query.into(),
            response: response.into(),
            processing_time_ms,
        }
    }
}

#[derive(Clone)]
pub struct QueryHistory {
    entries: Arc<RwLock<HashMap<Uuid, VecDeque<HistoryEntry>>>>,
    max_entries: usize,
    max_sessions: usize,
}

impl Default for QueryHistory {
    fn default() -> Self {
        Self::with_limits(MAX_ENTRIES_PER_SESSION, MAX_SESSIONS)
    }
}

impl QueryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_entries: usize, max_sessions: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries: max_entries.max(1),
            max_sessions: max_sessions.max(1),
        }
    }

    pub async fn record(&self, session_id: Uuid, entry: HistoryEntry) {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&session_id) && entries.len() >= self.max_sessions {
            let stalest = entries
                .iter()
                .min_by_key(|(_, list)| list.back().map(|e| e.timestamp))
                .map(|(id, _)| *id);
            if let Some(id) = stalest {
                entries.remove(&id);
            }
        }

        let list = entries.entry(session_id).or_default();
        list.push_back(entry);
        while list.len() > self.max_entries {
            list.pop_front();
        }
    }

    /// Most recent entries first.
    pub async fn recent(&self, session_id: Uuid, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read().await;
        entries
            .get(&session_id)
            .map(|list| list.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn clear(&self, session_id: Uuid) {
        self.entries.write().await.remove(&session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.entries.read().await.len()
    }
}
