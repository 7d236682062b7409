//! Bounded, newest-first record of inbound events and generated replies.

use chrono::{DateTime, Utc};
use pw_channels::PlatformEvent;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntryPayload {
    Event(PlatformEvent),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub received_at: DateTime<Utc>,
    pub arrival_order: u64,
    pub source_address: Option<String>,
    pub role: EntryRole,
    pub payload: EntryPayload,
    pub model_id: Option<String>,
}

/// An entry before the ledger stamps its time and order.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    source_address: Option<String>,
    role: EntryRole,
    payload: EntryPayload,
    model_id: Option<String>,
}

impl EntryDraft {
    pub fn inbound(source_address: Option<String>, event: PlatformEvent) -> Self {
        Self {
            source_address,
            role: EntryRole::User,
            payload: EntryPayload::Event(event),
            model_id: None,
        }
    }

    pub fn reply(text: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            source_address: None,
            role: EntryRole::Assistant,
            payload: EntryPayload::Text(text.into()),
            model_id: Some(model_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerUsage {
    pub used: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct Ledger {
    entries: VecDeque<Arc<LedgerEntry>>,
    capacity: usize,
    next_order: u64,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.saturating_add(1)),
            capacity,
            next_order: 1,
        }
    }

    /// Insert at the head. Never fails; overflow is left for `evict_overflow`.
    pub fn append(&mut self, draft: EntryDraft) -> Arc<LedgerEntry> {
        let entry = Arc::new(LedgerEntry {
            received_at: Utc::now(),
            arrival_order: self.next_order,
            source_address: draft.source_address,
            role: draft.role,
            payload: draft.payload,
            model_id: draft.model_id,
        });
        self.next_order += 1;
        self.entries.push_front(entry.clone());
        entry
    }

    /// Drop tail entries until the ledger fits its capacity. Returns the number removed.
    pub fn evict_overflow(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
            evicted += 1;
        }
        evicted
    }

    pub fn snapshot(&self) -> Vec<Arc<LedgerEntry>> {
        self.entries.iter().cloned().collect()
    }

    pub fn usage(&self) -> LedgerUsage {
        LedgerUsage {
            used: self.entries.len(),
            capacity: self.capacity,
        }
    }
}

/// Process-wide handle. Every read and write goes through one lock, which is
/// never held across an await on the network.
#[derive(Debug, Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
}

impl SharedLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ledger::new(capacity))),
        }
    }

    pub async fn append(&self, draft: EntryDraft) -> Arc<LedgerEntry> {
        self.inner.lock().await.append(draft)
    }

    pub async fn evict_overflow(&self) -> usize {
        self.inner.lock().await.evict_overflow()
    }

    pub async fn snapshot(&self) -> Vec<Arc<LedgerEntry>> {
        self.inner.lock().await.snapshot()
    }

    pub async fn usage(&self) -> LedgerUsage {
        self.inner.lock().await.usage()
    }

    /// Entries and usage read under the same lock.
    pub async fn snapshot_with_usage(&self) -> (Vec<Arc<LedgerEntry>>, LedgerUsage) {
        let ledger = self.inner.lock().await;
        (ledger.snapshot(), ledger.usage())
    }
}
