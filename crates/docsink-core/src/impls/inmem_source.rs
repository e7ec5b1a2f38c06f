//! InMemoryMessageSource - プロセス内のループバック queue transport
//!
//! # 学習ポイント
//! - Mutex + Notify による待機付き receive
//! - in-flight 上限による admission control（transport 側の責務）
//! - BinaryHeap による遅延 requeue（最も早い期限が先頭）
//! - Drop による「disposition されなかったハンドル」の後始末
//!
//! ロックは同期処理の中で完結させ、await を跨いで保持しない。

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::{ConsumerOptions, TransportAddrs};
use crate::domain::{Message, MessageId};
use crate::ports::{Clock, Delivery, MessageSource, QueueError, SystemClock};

/// Scheduled (delayed requeue) entry.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledMessage {
    due: Instant,
    id: MessageId,
}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub published: u64,
    pub delivered: u64,
    pub finished: u64,
    pub requeued: u64,
    /// Finished by the transport after exceeding `max_attempts`.
    /// These are also counted in `finished`.
    pub given_up: u64,
    pub ready: usize,
    pub scheduled: usize,
    pub in_flight: usize,
}

struct SourceState {
    /// Every message not yet finished (ready, scheduled or in flight).
    messages: HashMap<MessageId, Message>,
    ready: VecDeque<MessageId>,
    scheduled: BinaryHeap<ScheduledMessage>,
    in_flight: HashSet<MessageId>,
    closed: bool,
    counts: SourceCounts,
}

impl SourceState {
    fn new() -> Self {
        Self {
            messages: HashMap::new(),
            ready: VecDeque::new(),
            scheduled: BinaryHeap::new(),
            in_flight: HashSet::new(),
            closed: false,
            counts: SourceCounts::default(),
        }
    }

    /// Move messages whose delay has elapsed to the ready queue.
    fn promote_scheduled(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.due > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.id);
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.scheduled.is_empty() && self.in_flight.is_empty()
    }

    fn snapshot(&self) -> SourceCounts {
        SourceCounts {
            ready: self.ready.len(),
            scheduled: self.scheduled.len(),
            in_flight: self.in_flight.len(),
            ..self.counts.clone()
        }
    }
}

enum Settle {
    Finish,
    Requeue(Duration),
}

struct Shared {
    state: Mutex<SourceState>,
    notify: Notify,
    options: ConsumerOptions,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, id: MessageId, settle: Settle) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if !state.in_flight.remove(&id) {
                return Err(QueueError::OperationFailed(format!(
                    "{id} is not in flight"
                )));
            }
            match settle {
                Settle::Finish => {
                    state.messages.remove(&id);
                    state.counts.finished += 1;
                }
                Settle::Requeue(delay) => {
                    state.counts.requeued += 1;
                    let delay = delay.min(self.options.requeue_delay_cap);
                    if delay.is_zero() {
                        state.ready.push_back(id);
                    } else {
                        state.scheduled.push(ScheduledMessage {
                            due: Instant::now() + delay,
                            id,
                        });
                    }
                }
            }
        } // Lock released here

        self.notify.notify_waiters();
        Ok(())
    }
}

/// InMemoryMessageSource は 1 つの topic/channel を表すループバック transport
///
/// # 使用例
/// ```ignore
/// let source = InMemoryMessageSource::connect("events", "archive", &addrs, options)?;
/// source.publish(br#"{"messageId":"a"}"#.to_vec())?;
/// let delivery = source.receive().await;
/// ```
pub struct InMemoryMessageSource {
    topic: String,
    channel: String,
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
}

impl InMemoryMessageSource {
    /// Subscribe to `topic`/`channel`.
    ///
    /// The loopback transport lives inside this process, so the addresses are
    /// only checked for presence and logged.
    pub fn connect(
        topic: &str,
        channel: &str,
        addrs: &TransportAddrs,
        options: ConsumerOptions,
    ) -> Result<Self, QueueError> {
        if addrs.addresses().is_empty() {
            return Err(QueueError::OperationFailed(
                "no transport address given".to_string(),
            ));
        }
        info!(
            topic,
            channel,
            mode = addrs.mode(),
            addresses = ?addrs.addresses(),
            user_agent = %options.user_agent,
            max_in_flight = options.max_in_flight,
            "consumer connected"
        );
        Ok(Self::new(topic, channel, options))
    }

    pub fn new(topic: &str, channel: &str, options: ConsumerOptions) -> Self {
        Self::with_clock(topic, channel, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        topic: &str,
        channel: &str,
        options: ConsumerOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            channel: channel.to_string(),
            shared: Arc::new(Shared {
                state: Mutex::new(SourceState::new()),
                notify: Notify::new(),
                options,
            }),
            clock,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.shared.options
    }

    /// Publish a message body to this topic.
    pub fn publish(&self, body: Vec<u8>) -> Result<MessageId, QueueError> {
        let now = self.clock.now();
        let id = MessageId::from_ulid(Ulid::from_parts(
            now.timestamp_millis().max(0) as u64,
            rand::random(),
        ));
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.messages.insert(id, Message::new(id, body, now));
            state.ready.push_back(id);
            state.counts.published += 1;
        }
        self.shared.notify.notify_waiters();
        Ok(id)
    }

    /// Stop accepting publishes. `receive` returns `None` once everything
    /// already published has been finished.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
    }

    pub fn counts(&self) -> SourceCounts {
        self.shared.lock().snapshot()
    }
}

#[async_trait]
impl MessageSource for InMemoryMessageSource {
    async fn receive(&self) -> Option<Box<dyn Delivery>> {
        loop {
            // 状態を見る前に登録しておけば、その後の notify_waiters を取りこぼさない
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.shared.lock();
                state.promote_scheduled(Instant::now());

                if state.in_flight.len() < self.shared.options.max_in_flight {
                    while let Some(id) = state.ready.pop_front() {
                        let Some(message) = state.messages.get(&id) else {
                            continue;
                        };

                        let max_attempts = self.shared.options.max_attempts;
                        if max_attempts > 0 && message.attempts >= max_attempts {
                            warn!(
                                message_id = %id,
                                attempts = message.attempts,
                                max_attempts,
                                "giving up on message after max attempts"
                            );
                            state.messages.remove(&id);
                            state.counts.finished += 1;
                            state.counts.given_up += 1;
                            continue;
                        }

                        let Some(message) = state.messages.get_mut(&id) else {
                            continue;
                        };
                        message.attempts = message.attempts.saturating_add(1);
                        let message = message.clone();
                        state.in_flight.insert(id);
                        state.counts.delivered += 1;

                        return Some(Box::new(InMemoryDelivery {
                            message,
                            shared: Arc::clone(&self.shared),
                            auto_ack: true,
                            disposed: false,
                        }));
                    }
                }

                if state.closed && state.is_drained() {
                    return None;
                }

                state.scheduled.peek().map(|entry| entry.due)
            };

            // 通知 または 次の遅延 requeue の期限まで待つ
            match next_wake {
                Some(due) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(due) => {},
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Delivery handle of the loopback transport.
struct InMemoryDelivery {
    message: Message,
    shared: Arc<Shared>,
    auto_ack: bool,
    disposed: bool,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn id(&self) -> MessageId {
        self.message.id
    }

    fn body(&self) -> &[u8] {
        &self.message.body
    }

    fn attempts(&self) -> u16 {
        self.message.attempts
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.message.timestamp
    }

    fn disable_auto_ack(&mut self) {
        self.auto_ack = false;
    }

    async fn finish(mut self: Box<Self>) -> Result<(), QueueError> {
        self.disposed = true;
        self.shared.settle(self.message.id, Settle::Finish)
    }

    async fn requeue(mut self: Box<Self>, delay: Duration) -> Result<(), QueueError> {
        self.disposed = true;
        self.shared.settle(self.message.id, Settle::Requeue(delay))
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        let settle = if self.auto_ack {
            Settle::Finish
        } else {
            warn!(message_id = %self.message.id, "delivery dropped without disposition, requeueing");
            Settle::Requeue(Duration::ZERO)
        };
        if let Err(e) = self.shared.settle(self.message.id, settle) {
            warn!(message_id = %self.message.id, error = %e, "implicit disposition failed");
        }
    }
}
