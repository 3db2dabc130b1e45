use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::domain::{
    DeliveryAttempt, DeliveryLogStore, DeliveryState, RegistryError, StoreError, WebhookRegistry,
};
use crate::outbound::webhook::delivery_queue::{DeliveryQueue, QueuedDelivery};
use crate::outbound::webhook::executor::{DeliveryExecutor, unsent_attempt};
use crate::outbound::webhook::http_client::WebhookHttpClient;
use crate::outbound::webhook::retry_strategy::{RetryDecision, RetryStrategy};
use crate::outbound::webhook::schemas::WebhookPayload;

const NOTIFICATION_CAPACITY: usize = 1024;

/// Progress events emitted by the delivery service
#[derive(Debug, Clone)]
pub enum DeliveryNotification {
    /// An attempt was written to the log
    AttemptRecorded {
        attempt: Box<DeliveryAttempt>,
        state: DeliveryState,
    },

    /// The webhook was deactivated or removed before the attempt ran
    Cancelled {
        webhook_id: String,
        delivery_id: Uuid,
        attempt_number: u32,
    },

    /// The attempt could not be persisted; the delivery stops here
    StoreFault {
        webhook_id: String,
        delivery_id: Uuid,
        attempt_number: u32,
        error: String,
    },

    /// The webhook cannot be attempted as configured
    ConfigurationFault {
        webhook_id: String,
        delivery_id: Uuid,
        error: String,
    },
}

impl DeliveryNotification {
    pub fn delivery_id(&self) -> Uuid {
        match self {
            Self::AttemptRecorded { attempt, .. } => attempt.delivery_id,
            Self::Cancelled { delivery_id, .. }
            | Self::StoreFault { delivery_id, .. }
            | Self::ConfigurationFault { delivery_id, .. } => *delivery_id,
        }
    }

    /// Whether no further attempts will follow for this delivery
    pub fn is_final(&self) -> bool {
        match self {
            Self::AttemptRecorded { state, .. } => state.is_terminal(),
            _ => true,
        }
    }
}

/// Drains the delivery queue and sends webhooks with retry logic.
///
/// `DeliveryService` is designed to run as a long-lived background task.
/// Call [`DeliveryService::start`] to launch the processing loop inside a
/// `tokio::spawn`.
///
/// Responsibilities:
/// 1. Take due deliveries off the [`DeliveryQueue`], at most `worker_concurrency`
///    in flight at once.
/// 2. Re-check that the webhook is still active before every attempt.
/// 3. Call the endpoint through the [`DeliveryExecutor`].
/// 4. Consult the [`RetryStrategy`], record the attempt in the log, and only
///    then schedule the next attempt.
pub struct DeliveryService {
    queue: DeliveryQueue,

    registry: Arc<dyn WebhookRegistry>,

    store: Arc<dyn DeliveryLogStore>,

    executor: DeliveryExecutor,

    retry_strategy: RetryStrategy,

    worker_concurrency: usize,

    permits: Arc<Semaphore>,

    notifications: broadcast::Sender<DeliveryNotification>,

    shutdown: watch::Sender<bool>,
}

impl DeliveryService {
    /// Create a `DeliveryService` with the default retry strategy and
    /// concurrency.
    pub fn new(
        queue: DeliveryQueue,
        registry: Arc<dyn WebhookRegistry>,
        store: Arc<dyn DeliveryLogStore>,
        executor: DeliveryExecutor,
    ) -> Self {
        let worker_concurrency = DeliveryConfig::default().worker_concurrency;
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Self {
            queue,
            registry,
            store,
            executor,
            retry_strategy: RetryStrategy::default(),
            worker_concurrency,
            permits: Arc::new(Semaphore::new(worker_concurrency)),
            notifications,
            shutdown,
        }
    }

    /// Build the service, its HTTP client and retry strategy from configuration
    pub fn from_config(
        config: &DeliveryConfig,
        queue: DeliveryQueue,
        registry: Arc<dyn WebhookRegistry>,
        store: Arc<dyn DeliveryLogStore>,
    ) -> Result<Self, DeliveryServiceError> {
        let client = WebhookHttpClient::with_timeout(config.timeout(), config.user_agent.clone())
            .map_err(|e| DeliveryServiceError::Initialisation(e.to_string()))?;

        Ok(
            Self::new(queue, registry, store, DeliveryExecutor::new(Arc::new(client)))
                .with_retry_strategy(config.retry_strategy())
                .with_concurrency(config.worker_concurrency),
        )
    }

    /// Override the retry strategy.
    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Cap the number of attempts in flight (at least one).
    pub fn with_concurrency(mut self, worker_concurrency: usize) -> Self {
        self.worker_concurrency = worker_concurrency.max(1);
        self.permits = Arc::new(Semaphore::new(self.worker_concurrency));
        self
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Executor sharing this service's HTTP client
    pub fn executor(&self) -> &DeliveryExecutor {
        &self.executor
    }

    /// Stream of progress notifications from this point on
    pub fn notifications(&self) -> BroadcastStream<DeliveryNotification> {
        BroadcastStream::new(self.notifications.subscribe())
    }

    /// Start the processing loop.
    ///
    /// Returns immediately; the actual work happens inside a `tokio::spawn`.
    /// The task ends after [`DeliveryService::shutdown`] once in-flight
    /// attempts have finished.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            worker_concurrency = self.worker_concurrency,
            "Webhook delivery service starting"
        );

        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    /// Stop taking new work. Queued deliveries stay in the queue.
    pub fn shutdown(&self) {
        info!("Webhook delivery service shutting down");
        self.shutdown.send_replace(true);
    }

    /// Re-schedule deliveries whose retry was pending when the log was last
    /// written, honouring the persisted `next_retry_at`.
    pub async fn resume(&self) -> Result<usize, DeliveryServiceError> {
        let pending = self.store.pending_retries().await?;
        let mut resumed = 0usize;

        for last in pending {
            let Some(webhook) = self.registry.find(&last.webhook_id).await? else {
                warn!(
                    webhook_id = %last.webhook_id,
                    delivery_id = %last.delivery_id,
                    "Webhook no longer exists, not resuming delivery"
                );
                continue;
            };

            let payload = match WebhookPayload::from_json(&last.request.body) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(
                        webhook_id = %last.webhook_id,
                        delivery_id = %last.delivery_id,
                        error = %e,
                        "Recorded request body is not a webhook payload, not resuming"
                    );
                    continue;
                }
            };

            let delay = last
                .next_retry_at
                .and_then(|at| Duration::try_from(at - OffsetDateTime::now_utc()).ok())
                .unwrap_or(Duration::ZERO);

            // Attempt k scheduled retry k
            let mut webhook = webhook.snapshot_for_delivery();
            webhook.retry_count = last.attempt_number;

            let delivery = QueuedDelivery {
                webhook,
                payload,
                attempt: last.attempt_number + 1,
            };
            self.queue.schedule(delivery, delay).await;
            resumed += 1;
        }

        info!(resumed_count = resumed, "Resumed pending webhook retries");
        Ok(resumed)
    }

    /// Inner processing loop
    async fn run_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Wait for a free slot before taking work, so saturated pools
            // leave deliveries in the queue.
            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = shutdown.changed() => break,
                delivery = self.queue.next_due() => delivery,
            };

            let worker = WorkerContext::from(self);
            tokio::spawn(async move {
                worker.process(delivery).await;
                drop(permit);
            });
        }

        // Wait for in-flight attempts to finish
        let slots = u32::try_from(self.worker_concurrency).unwrap_or(u32::MAX);
        if self.permits.acquire_many(slots).await.is_ok() {
            debug!("All in-flight deliveries finished");
        }
        info!("Webhook delivery service stopped");
    }

    /// Process one queued delivery to completion of its current attempt
    pub async fn process(&self, delivery: QueuedDelivery) {
        WorkerContext::from(self).process(delivery).await;
    }
}

/// Cloned handles a spawned worker needs
#[derive(Clone)]
struct WorkerContext {
    queue: DeliveryQueue,
    registry: Arc<dyn WebhookRegistry>,
    store: Arc<dyn DeliveryLogStore>,
    executor: DeliveryExecutor,
    retry_strategy: RetryStrategy,
    notifications: broadcast::Sender<DeliveryNotification>,
}

impl From<&DeliveryService> for WorkerContext {
    fn from(service: &DeliveryService) -> Self {
        Self {
            queue: service.queue.clone(),
            registry: service.registry.clone(),
            store: service.store.clone(),
            executor: service.executor.clone(),
            retry_strategy: service.retry_strategy.clone(),
            notifications: service.notifications.clone(),
        }
    }
}

impl WorkerContext {
    async fn process(&self, delivery: QueuedDelivery) {
        let webhook_id = delivery.webhook_id().to_string();
        let delivery_id = delivery.delivery_id();
        let attempt_number = delivery.attempt;

        debug!(
            webhook_id = %webhook_id,
            delivery_id = %delivery_id,
            attempt = attempt_number,
            "Processing delivery"
        );

        // Deactivation only stops attempts that have not started yet
        match self.registry.find(&webhook_id).await {
            Ok(Some(current)) if current.is_active => {}
            Ok(_) => {
                info!(
                    webhook_id = %webhook_id,
                    delivery_id = %delivery_id,
                    attempt = attempt_number,
                    "Webhook inactive or removed, closing delivery"
                );
                let record = unsent_attempt(
                    &delivery.webhook,
                    &delivery.payload,
                    attempt_number,
                    "Webhook inactive or removed".to_string(),
                );
                self.close_unsent(
                    record,
                    DeliveryNotification::Cancelled {
                        webhook_id,
                        delivery_id,
                        attempt_number,
                    },
                )
                .await;
                return;
            }
            Err(e) => {
                let delay = self.retry_strategy.backoff(1);
                warn!(
                    webhook_id = %webhook_id,
                    delivery_id = %delivery_id,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Registry lookup failed, postponing attempt"
                );
                self.queue.schedule(delivery, delay).await;
                return;
            }
        }

        let attempt = match self
            .executor
            .attempt(&delivery.webhook, &delivery.payload, attempt_number)
            .await
        {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(
                    webhook_id = %webhook_id,
                    delivery_id = %delivery_id,
                    error = %e,
                    "Webhook cannot be attempted"
                );
                let record = unsent_attempt(
                    &delivery.webhook,
                    &delivery.payload,
                    attempt_number,
                    e.to_string(),
                );
                self.close_unsent(
                    record,
                    DeliveryNotification::ConfigurationFault {
                        webhook_id,
                        delivery_id,
                        error: e.to_string(),
                    },
                )
                .await;
                return;
            }
        };

        let decision = self.retry_strategy.decide(
            &attempt,
            delivery.webhook.retry_count,
            delivery.webhook.max_retries,
        );
        let attempt = finalize(attempt, decision);
        let state = attempt.state();

        if let Err(e) = self.store.append(attempt.clone()).await {
            self.store_fault(&attempt, e);
            return;
        }

        match decision {
            RetryDecision::Succeeded => info!(
                webhook_id = %webhook_id,
                delivery_id = %delivery_id,
                attempt = attempt_number,
                status_code = attempt.status_code(),
                duration_ms = attempt.duration_ms,
                "Webhook delivered successfully"
            ),
            RetryDecision::Retry { retry_count, delay } => warn!(
                webhook_id = %webhook_id,
                delivery_id = %delivery_id,
                attempt = attempt_number,
                retry_count,
                max_retries = delivery.webhook.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = attempt.error.as_deref().unwrap_or_default(),
                "Webhook delivery failed, will retry"
            ),
            RetryDecision::Exhausted => error!(
                webhook_id = %webhook_id,
                delivery_id = %delivery_id,
                attempt = attempt_number,
                error = attempt.error.as_deref().unwrap_or_default(),
                "Webhook delivery permanently failed"
            ),
        }

        self.notify(DeliveryNotification::AttemptRecorded {
            attempt: Box::new(attempt),
            state,
        });

        if let RetryDecision::Retry { retry_count, delay } = decision {
            self.queue
                .schedule(delivery.next_attempt(retry_count), delay)
                .await;
        }
    }

    /// Log the terminal record of an attempt that was never sent, then report `outcome`
    async fn close_unsent(&self, record: DeliveryAttempt, outcome: DeliveryNotification) {
        match self.store.append(record.clone()).await {
            Ok(()) => self.notify(outcome),
            Err(e) => self.store_fault(&record, e),
        }
    }

    fn store_fault(&self, attempt: &DeliveryAttempt, e: StoreError) {
        error!(
            webhook_id = %attempt.webhook_id,
            delivery_id = %attempt.delivery_id,
            attempt = attempt.attempt_number,
            error = %e,
            "Failed to record delivery attempt, stopping delivery"
        );
        self.notify(DeliveryNotification::StoreFault {
            webhook_id: attempt.webhook_id.clone(),
            delivery_id: attempt.delivery_id,
            attempt_number: attempt.attempt_number,
            error: e.to_string(),
        });
    }

    fn notify(&self, notification: DeliveryNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }
}

/// Stamp the scheduling outcome onto the attempt before it is logged
fn finalize(mut attempt: DeliveryAttempt, decision: RetryDecision) -> DeliveryAttempt {
    match decision {
        RetryDecision::Succeeded => {
            attempt.can_retry = false;
            attempt.next_retry_at = None;
        }
        RetryDecision::Retry { delay, .. } => {
            attempt.can_retry = true;
            attempt.next_retry_at = Some(OffsetDateTime::now_utc() + delay);
        }
        RetryDecision::Exhausted => {
            attempt.can_retry = false;
            attempt.next_retry_at = None;
        }
    }
    attempt
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or resuming the `DeliveryService`.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryServiceError {
    #[error("Initialisation failed: {0}")]
    Initialisation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
