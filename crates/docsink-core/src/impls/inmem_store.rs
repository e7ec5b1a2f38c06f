//! InMemoryBucket - 開発・テスト用のドキュメントストア
//!
//! # 学習ポイント
//! - insert は「存在しなければ作る」だけ（上書きしない）
//! - expiry の判定は Clock 経由（FixedClock で決定的にテストできる）
//! - 期限切れの entry は insert 数回ごとにまとめて掃除する

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::DocKey;
use crate::ports::{Clock, DocumentStore, Expiry, StoreError, SystemClock};

/// Expired entries are swept once per this many inserts.
const PRUNE_EVERY: u64 = 128;

#[derive(Debug, Clone)]
struct StoredDoc {
    body: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredDoc {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// InMemoryBucket は HashMap ベースの bucket
pub struct InMemoryBucket {
    docs: Mutex<HashMap<DocKey, StoredDoc>>,
    clock: Arc<dyn Clock>,
    inserts: AtomicU64,
}

impl InMemoryBucket {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            clock,
            inserts: AtomicU64::new(0),
        }
    }

    fn docs(&self) -> MutexGuard<'_, HashMap<DocKey, StoredDoc>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.docs().values().filter(|doc| doc.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        prune(&mut self.docs(), now)
    }

    /// Keys of live documents, sorted.
    pub fn keys(&self) -> Vec<DocKey> {
        let now = self.clock.now();
        let mut keys: Vec<DocKey> = self
            .docs()
            .iter()
            .filter(|(_, doc)| doc.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for InMemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryBucket {
    async fn insert(&self, key: &DocKey, body: &[u8], expiry: Expiry) -> Result<(), StoreError> {
        if key.as_str().is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }

        let now = self.clock.now();
        let expires_at = match expiry {
            Expiry::Never => None,
            // 範囲外の TTL は実質無期限として扱う
            Expiry::After(ttl) => TimeDelta::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl)),
        };

        let mut docs = self.docs();
        if self.inserts.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            prune(&mut docs, now);
        }
        if let Some(existing) = docs.get(key)
            && existing.is_live(now)
        {
            return Err(StoreError::AlreadyExists(key.clone()));
        }
        docs.insert(
            key.clone(),
            StoredDoc {
                body: body.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &DocKey) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .docs()
            .get(key)
            .filter(|doc| doc.is_live(now))
            .map(|doc| doc.body.clone()))
    }
}

fn prune(docs: &mut HashMap<DocKey, StoredDoc>, now: DateTime<Utc>) -> usize {
    let before = docs.len();
    docs.retain(|_, doc| doc.is_live(now));
    before - docs.len()
}
