use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::handler::DeliveryHandler;
use super::status::DeliveryStats;
use crate::domain::{ErrorKind, HandleError, MessageId, ResolvedKey};
use crate::ports::MessageSource;

/// Consumer handle.
/// - `request_shutdown()` で新規 receive を止める（処理中の handler は最後まで走る）
/// - `join()` で receive ループと全 handler の終了を待てる
pub struct ConsumerGroup {
    shutdown_tx: Arc<watch::Sender<bool>>,
    join: JoinHandle<()>,
    stats: Arc<DeliveryStats>,
}

impl ConsumerGroup {
    /// Spawn the receive loop. Each delivery is handled on its own task;
    /// concurrency is bounded by the source's in-flight limit.
    pub fn spawn(source: Arc<dyn MessageSource>, handler: Arc<DeliveryHandler>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(DeliveryStats::default());

        let join = tokio::spawn(consume_loop(
            source,
            handler,
            Arc::clone(&stats),
            shutdown_rx,
        ));

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            join,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    /// Stop taking new deliveries. In-flight handlers are not cancelled.
    pub fn request_shutdown(&self) {
        self.shutdown_handle().request();
    }

    /// Handle that can stop the loop from another task while `join()` owns the group.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Wait until the loop exits (source drained or shutdown requested).
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(error = %e, "consumer loop panicked");
        }
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }
}

#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn request(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.0.send(true);
    }
}

async fn consume_loop(
    source: Arc<dyn MessageSource>,
    handler: Arc<DeliveryHandler>,
    stats: Arc<DeliveryStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        if *shutdown_rx.borrow() {
            info!("shutdown requested, no longer receiving");
            break;
        }

        // receive は待つ可能性があるので shutdown と完了済み handler の回収を競合させる
        let delivery = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender が drop された = 誰も止められないので止める
                    break;
                }
                continue;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "handler task failed");
                }
                continue;
            }
            delivery = source.receive() => delivery,
        };

        let Some(delivery) = delivery else {
            info!("message source drained");
            break;
        };

        let handler = Arc::clone(&handler);
        let stats = Arc::clone(&stats);
        in_flight.spawn(async move {
            let message_id = delivery.id();
            let attempts = delivery.attempts();
            let result = handler.handle(delivery).await;
            report(message_id, attempts, &result);
            stats.record(&result);
        });
    }

    // 処理中の handler は最後まで走らせる
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "handler task failed");
        }
    }
}

fn report(message_id: MessageId, attempts: u16, result: &Result<ResolvedKey, HandleError>) {
    match result {
        Ok(resolved) => {
            debug!(%message_id, key = %resolved.key, origin = %resolved.origin, "document stored");
        }
        Err(err) => match err.kind() {
            ErrorKind::Permanent => {
                warn!(%message_id, attempts, error = %err, "dropping message");
            }
            ErrorKind::Transient => {
                warn!(%message_id, attempts, error = %err, "requeueing message");
            }
            ErrorKind::Infrastructure => {
                error!(%message_id, attempts, error = %err, "could not dispose message");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::KeyResolver;
    use crate::config::ConsumerOptions;
    use crate::impls::{InMemoryBucket, InMemoryMessageSource};
    use crate::ports::{Expiry, SystemClock, UlidKeyGenerator};
    use std::time::Duration;

    fn setup(fields: &[&str]) -> (Arc<InMemoryMessageSource>, Arc<InMemoryBucket>, Arc<DeliveryHandler>) {
        let source = Arc::new(InMemoryMessageSource::new(
            "events",
            "archive",
            ConsumerOptions {
                max_in_flight: 4,
                ..ConsumerOptions::default()
            },
        ));
        let store = Arc::new(InMemoryBucket::new());
        let resolver = KeyResolver::new(
            true,
            fields.iter().copied().collect(),
            Arc::new(UlidKeyGenerator::new(SystemClock)),
        );
        let handler = Arc::new(DeliveryHandler::new(resolver, store.clone(), Expiry::Never));
        (source, store, handler)
    }

    #[tokio::test]
    async fn drains_source_then_exits() {
        let (source, store, handler) = setup(&["id"]);
        for i in 0..20 {
            source.publish(format!(r#"{{"id":"doc-{i}"}}"#).into_bytes()).unwrap();
        }
        source.publish(b"not json".to_vec()).unwrap();
        source.close();

        let group = ConsumerGroup::spawn(source.clone(), handler);
        let stats = group.stats();
        tokio::time::timeout(Duration::from_secs(5), group.join())
            .await
            .unwrap();

        assert_eq!(store.len(), 20);
        let counts = stats.snapshot();
        assert_eq!(counts.stored, 20);
        assert_eq!(counts.dropped, 1);
        assert_eq!(source.counts().finished, 21);
    }

    #[tokio::test]
    async fn shutdown_stops_receiving() {
        let (source, _store, handler) = setup(&[]);
        let group = ConsumerGroup::spawn(source.clone(), handler);

        tokio::time::timeout(Duration::from_secs(1), group.shutdown_and_join())
            .await
            .unwrap();

        source.publish(br#"{"messageId":"late"}"#.to_vec()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.counts().delivered, 0);
    }
}
