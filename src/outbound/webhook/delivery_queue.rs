use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, sleep_until};
use tracing::debug;
use uuid::Uuid;

use super::schemas::WebhookPayload;
use crate::domain::Webhook;

/// Time-ordered queue for webhook deliveries.
///
/// Immediate work and delayed retries share one heap keyed by the instant the
/// delivery becomes due; consumers sleep until the earliest entry or until a
/// new entry is pushed.
#[derive(Debug, Clone, Default)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: Mutex<BinaryHeap<Scheduled>>,
    notify: Notify,
    seq: AtomicU64,
}

/// A queued webhook delivery
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedDelivery {
    /// Configuration snapshot taken at dispatch time
    pub webhook: Webhook,

    pub payload: WebhookPayload,

    /// Number of the attempt this entry will make (1-based)
    pub attempt: u32,
}

impl QueuedDelivery {
    /// First attempt of a fresh delivery
    pub fn new(webhook: Webhook, payload: WebhookPayload) -> Self {
        Self {
            webhook,
            payload,
            attempt: 1,
        }
    }

    pub fn delivery_id(&self) -> Uuid {
        self.payload.delivery_id
    }

    pub fn webhook_id(&self) -> &str {
        &self.webhook.id
    }

    /// Entry for the following attempt, carrying the spent retry budget
    pub fn next_attempt(mut self, retry_count: u32) -> Self {
        self.attempt += 1;
        self.webhook.retry_count = retry_count;
        self
    }
}

#[derive(Debug)]
struct Scheduled {
    ready_at: Instant,
    seq: u64,
    delivery: QueuedDelivery,
}

impl Eq for Scheduled {}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest first
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a delivery that is due now
    pub async fn enqueue(&self, delivery: QueuedDelivery) {
        self.schedule(delivery, Duration::ZERO).await;
    }

    /// Enqueue a delivery that becomes due after `delay`
    pub async fn schedule(&self, delivery: QueuedDelivery, delay: Duration) {
        debug!(
            webhook_id = %delivery.webhook_id(),
            delivery_id = %delivery.delivery_id(),
            attempt = delivery.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling delivery"
        );

        let entry = Scheduled {
            ready_at: Instant::now() + delay,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            delivery,
        };

        self.inner.heap.lock().await.push(entry);
        self.inner.notify.notify_one();
    }

    /// Wait for the next due delivery and take it off the queue
    pub async fn next_due(&self) -> QueuedDelivery {
        loop {
            let next_ready = {
                let mut heap = self.inner.heap.lock().await;
                match heap.peek().map(|s| s.ready_at) {
                    Some(ready_at) if ready_at <= Instant::now() => {
                        if let Some(entry) = heap.pop() {
                            return entry.delivery;
                        }
                        None
                    }
                    other => other,
                }
            };

            match next_ready {
                Some(ready_at) => {
                    tokio::select! {
                        _ = self.inner.notify.notified() => {}
                        _ = sleep_until(ready_at) => {}
                    }
                }
                None => self.inner.notify.notified().await,
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.heap.lock().await.is_empty()
    }

    /// Deliveries still waiting for a given webhook
    pub async fn pending_for_webhook(&self, webhook_id: &str) -> Vec<QueuedDelivery> {
        let heap = self.inner.heap.lock().await;
        heap.iter()
            .filter(|e| e.delivery.webhook_id() == webhook_id)
            .map(|e| e.delivery.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SurveyEventKind;
    use crate::outbound::webhook::schemas::SurveySummary;
    use time::OffsetDateTime;

    fn make_delivery(webhook_id: &str) -> QueuedDelivery {
        let webhook = Webhook::new(
            webhook_id.to_string(),
            "srv-1".to_string(),
            "https://example.com/hook".to_string(),
        );
        let payload = WebhookPayload {
            delivery_id: Uuid::new_v4(),
            event: SurveyEventKind::SurveyPublished,
            timestamp: OffsetDateTime::now_utc(),
            survey: SurveySummary {
                id: "srv-1".to_string(),
                name: "Survey".to_string(),
                status: "published".to_string(),
            },
            response: None,
            question_mappings: None,
        };
        QueuedDelivery::new(webhook, payload)
    }

    #[tokio::test]
    async fn test_enqueue_and_take() {
        let queue = DeliveryQueue::new();
        let delivery = make_delivery("wh-1");

        assert!(queue.is_empty().await);

        queue.enqueue(delivery.clone()).await;
        assert_eq!(queue.len().await, 1);

        let taken = queue.next_due().await;
        assert_eq!(taken, delivery);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_fifo_for_equal_due_time() {
        let queue = DeliveryQueue::new();
        let d1 = make_delivery("wh-1");
        let d2 = make_delivery("wh-2");

        queue.enqueue(d1.clone()).await;
        queue.enqueue(d2.clone()).await;

        assert_eq!(queue.next_due().await, d1);
        assert_eq!(queue.next_due().await, d2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_entry_waits() {
        let queue = DeliveryQueue::new();
        let delayed = make_delivery("wh-late");
        let immediate = make_delivery("wh-now");

        queue.schedule(delayed.clone(), Duration::from_secs(30)).await;
        queue.enqueue(immediate.clone()).await;

        assert_eq!(queue.next_due().await, immediate);
        assert_eq!(queue.len().await, 1);

        let start = Instant::now();
        assert_eq!(queue.next_due().await, delayed);
        assert!(start.elapsed() >= Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_entry_wakes_sleeping_consumer() {
        let queue = DeliveryQueue::new();
        queue
            .schedule(make_delivery("wh-late"), Duration::from_secs(60))
            .await;

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_due().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        let early = make_delivery("wh-early");
        queue.schedule(early.clone(), Duration::from_secs(1)).await;

        let taken = consumer.await;
        assert!(matches!(taken, Ok(d) if d == early));
    }

    #[test]
    fn test_next_attempt_carries_retry_count() {
        let delivery = make_delivery("wh-1");
        let delivery_id = delivery.delivery_id();

        let next = delivery.next_attempt(1).next_attempt(2);
        assert_eq!(next.attempt, 3);
        assert_eq!(next.webhook.retry_count, 2);
        assert_eq!(next.delivery_id(), delivery_id);
    }

    #[tokio::test]
    async fn test_pending_for_webhook() {
        let queue = DeliveryQueue::new();

        queue.enqueue(make_delivery("wh-1")).await;
        queue.enqueue(make_delivery("wh-2")).await;
        queue
            .schedule(make_delivery("wh-1"), Duration::from_secs(60))
            .await;

        assert_eq!(queue.pending_for_webhook("wh-1").await.len(), 2);
        assert_eq!(queue.pending_for_webhook("wh-3").await.len(), 0);
        assert_eq!(queue.len().await, 3);
    }
}
