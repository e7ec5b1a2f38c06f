//! DeliveryHandler - 1 件のメッセージを 1 回の保存試行に変換する
//!
//! # フロー
//! 1. 自動 ack を止める（disposition はこの handler が明示的に行う）
//! 2. KeyResolver でキーを決める（失敗 → finish して drop）
//! 3. DocumentStore::insert（成功 → finish / 失敗 → 即時 requeue）
//!
//! disposition は `HandleOutcome::disposition()` の 1 箇所で決まり、
//! `handle()` はそれを 1 回だけ実行する。

use std::sync::Arc;

use tracing::{debug, trace};

use super::resolver::KeyResolver;
use crate::domain::{DeliveryState, Disposition, HandleError, HandleOutcome, ResolvedKey};
use crate::ports::{Delivery, DocumentStore, Expiry};

/// DeliveryHandler は不変の設定と store への参照だけを持つ
///
/// `handle` は再入可能で、共有状態を書き換えない。
pub struct DeliveryHandler {
    resolver: KeyResolver,
    store: Arc<dyn DocumentStore>,
    expiry: Expiry,
}

impl DeliveryHandler {
    pub fn new(resolver: KeyResolver, store: Arc<dyn DocumentStore>, expiry: Expiry) -> Self {
        Self {
            resolver,
            store,
            expiry,
        }
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Resolve, store, then dispose of the delivery exactly once.
    ///
    /// The returned error is for logging only: the message has already been
    /// finished or requeued when this returns.
    pub async fn handle(&self, mut delivery: Box<dyn Delivery>) -> Result<ResolvedKey, HandleError> {
        delivery.disable_auto_ack();

        let message_id = delivery.id();
        let mut state = DeliveryState::Received;
        let outcome = self.process_tracked(delivery.body(), &mut state).await;
        advance(&mut state, outcome.final_state());

        let disposition = outcome.disposition();
        trace!(%message_id, ?state, ?disposition, "disposing");
        match disposition {
            Disposition::Finish => delivery.finish().await?,
            Disposition::Requeue { delay } => delivery.requeue(delay).await?,
        }

        outcome.into_result()
    }

    /// Resolve the key and attempt the insert, without touching the queue.
    pub async fn process(&self, body: &[u8]) -> HandleOutcome {
        let mut state = DeliveryState::Received;
        self.process_tracked(body, &mut state).await
    }

    async fn process_tracked(&self, body: &[u8], state: &mut DeliveryState) -> HandleOutcome {
        advance(state, DeliveryState::Resolving);
        let resolved = match self.resolver.resolve(body) {
            Ok(resolved) => resolved,
            Err(err) => return HandleOutcome::Dropped(err),
        };
        debug!(key = %resolved.key, origin = %resolved.origin, "key resolved");

        advance(state, DeliveryState::Storing);
        match self.store.insert(&resolved.key, body, self.expiry).await {
            Ok(()) => HandleOutcome::Stored(resolved),
            Err(error) => HandleOutcome::StoreFailed {
                key: resolved.key,
                error,
            },
        }
    }
}

fn advance(state: &mut DeliveryState, next: DeliveryState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid delivery transition {state:?} -> {next:?}"
    );
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DocKey, KeyError, KeyOrigin, MessageId};
    use crate::impls::InMemoryBucket;
    use crate::ports::{QueueError, StoreError, SystemClock, UlidKeyGenerator};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::time::Duration;
    use ulid::Ulid;

    /// 呼ばれた disposition を記録するだけの Delivery
    #[derive(Debug, Clone, PartialEq)]
    enum Recorded {
        AutoAckDisabled,
        Finished,
        Requeued(Duration),
    }

    struct RecordingDelivery {
        body: Vec<u8>,
        log: Arc<Mutex<Vec<Recorded>>>,
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        fn id(&self) -> MessageId {
            MessageId::from_ulid(Ulid::nil())
        }

        fn body(&self) -> &[u8] {
            &self.body
        }

        fn attempts(&self) -> u16 {
            1
        }

        fn timestamp(&self) -> DateTime<Utc> {
            Utc::now()
        }

        fn disable_auto_ack(&mut self) {
            self.log.lock().unwrap().push(Recorded::AutoAckDisabled);
        }

        async fn finish(self: Box<Self>) -> Result<(), QueueError> {
            self.log.lock().unwrap().push(Recorded::Finished);
            Ok(())
        }

        async fn requeue(self: Box<Self>, delay: Duration) -> Result<(), QueueError> {
            self.log.lock().unwrap().push(Recorded::Requeued(delay));
            Ok(())
        }
    }

    /// 常に失敗する store
    struct DownStore;

    #[async_trait]
    impl DocumentStore for DownStore {
        async fn insert(&self, _key: &DocKey, _body: &[u8], _expiry: Expiry) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn get(&self, _key: &DocKey) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }
    }

    fn handler(json: bool, fields: &[&str], store: Arc<dyn DocumentStore>) -> DeliveryHandler {
        let resolver = KeyResolver::new(
            json,
            fields.iter().copied().collect(),
            Arc::new(UlidKeyGenerator::new(SystemClock)),
        );
        DeliveryHandler::new(resolver, store, Expiry::Never)
    }

    fn delivery(body: &str) -> (Box<dyn Delivery>, Arc<Mutex<Vec<Recorded>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = RecordingDelivery {
            body: body.as_bytes().to_vec(),
            log: Arc::clone(&log),
        };
        (Box::new(d), log)
    }

    #[tokio::test]
    async fn stored_message_is_finished() {
        let store = Arc::new(InMemoryBucket::new());
        let h = handler(true, &[], store.clone());
        let (d, log) = delivery(r#"{"messageId":"abc123"}"#);

        let resolved = h.handle(d).await.unwrap();

        assert_eq!(resolved.key.as_str(), "abc123");
        assert_eq!(resolved.origin, KeyOrigin::DefaultIdentity);
        assert_eq!(
            *log.lock().unwrap(),
            vec![Recorded::AutoAckDisabled, Recorded::Finished]
        );
        let stored = store.get(&DocKey::new("abc123")).await.unwrap();
        assert_eq!(stored.as_deref(), Some(&br#"{"messageId":"abc123"}"#[..]));
    }

    #[tokio::test]
    async fn unparseable_message_is_finished_not_requeued() {
        let store = Arc::new(InMemoryBucket::new());
        let h = handler(true, &[], store.clone());
        let (d, log) = delivery("not json");

        let err = h.handle(d).await.unwrap_err();

        assert!(matches!(err, HandleError::Dropped(KeyError::Parse(_))));
        assert_eq!(
            *log.lock().unwrap(),
            vec![Recorded::AutoAckDisabled, Recorded::Finished]
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn mistyped_key_field_is_finished_not_requeued() {
        let store = Arc::new(InMemoryBucket::new());
        let h = handler(true, &["uid", "id"], store.clone());
        let (d, log) = delivery(r#"{"uid":42}"#);

        let err = h.handle(d).await.unwrap_err();

        assert!(matches!(err, HandleError::Dropped(KeyError::Type { .. })));
        assert_eq!(log.lock().unwrap().last(), Some(&Recorded::Finished));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn conflict_is_requeued_immediately() {
        let store = Arc::new(InMemoryBucket::new());
        let h = handler(true, &["id"], store.clone());

        let (first, _) = delivery(r#"{"id":"dup"}"#);
        h.handle(first).await.unwrap();

        let (second, log) = delivery(r#"{"id":"dup","v":2}"#);
        let err = h.handle(second).await.unwrap_err();

        match err {
            HandleError::StoreFailed { key, source } => {
                assert_eq!(key.as_str(), "dup");
                assert!(source.is_conflict());
            }
            other => panic!("expected StoreFailed, got {other:?}"),
        }
        assert_eq!(
            *log.lock().unwrap(),
            vec![Recorded::AutoAckDisabled, Recorded::Requeued(Duration::ZERO)]
        );
        // 最初のドキュメントは上書きされない
        let stored = store.get(&DocKey::new("dup")).await.unwrap().unwrap();
        assert_eq!(stored, br#"{"id":"dup"}"#);
    }

    #[tokio::test]
    async fn empty_string_key_is_rejected_by_store_and_requeued() {
        let store = Arc::new(InMemoryBucket::new());
        let h = handler(true, &["id"], store.clone());
        let (d, log) = delivery(r#"{"id":""}"#);

        let err = h.handle(d).await.unwrap_err();

        assert!(matches!(
            err,
            HandleError::StoreFailed {
                source: StoreError::InvalidKey(_),
                ..
            }
        ));
        assert_eq!(
            *log.lock().unwrap(),
            vec![Recorded::AutoAckDisabled, Recorded::Requeued(Duration::ZERO)]
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_outage_is_requeued() {
        let h = handler(false, &[], Arc::new(DownStore));
        let (d, log) = delivery("raw bytes");

        let err = h.handle(d).await.unwrap_err();

        assert!(matches!(
            err,
            HandleError::StoreFailed {
                source: StoreError::Unavailable(_),
                ..
            }
        ));
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&Recorded::Requeued(Duration::ZERO))
        );
    }

    #[tokio::test]
    async fn every_outcome_disposes_exactly_once() {
        let store = Arc::new(InMemoryBucket::new());
        let h = handler(true, &["id"], store);
        let bodies = [
            r#"{"id":"a"}"#,
            r#"{"id":"a"}"#,
            r#"{"id":1}"#,
            "not json",
            r#"{"other":"x"}"#,
        ];
        for body in bodies {
            let (d, log) = delivery(body);
            let _ = h.handle(d).await;
            let dispositions = log
                .lock()
                .unwrap()
                .iter()
                .filter(|r| !matches!(r, Recorded::AutoAckDisabled))
                .count();
            assert_eq!(dispositions, 1, "body={body}");
        }
    }
}
