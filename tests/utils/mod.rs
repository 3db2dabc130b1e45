#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use survey_webhooks::config::Config;
use survey_webhooks::domain::{
    DeliveryAttempt, DeliveryLogStore, RegistryError, StoreError, SurveyEvent, SurveyEventKind,
    SurveyResponse, SurveySnapshot, Webhook, WebhookRegistry,
};
use survey_webhooks::outbound::webhook::http_client::default_user_agent;
use survey_webhooks::outbound::webhook::{
    DeliveryExecutor, DeliveryNotification, DeliveryQueue, DeliveryService, Dispatcher,
    EventListener, InMemoryDeliveryLog, InMemoryWebhookRegistry, RetryStrategy,
    WebhookHttpClient,
};
use survey_webhooks::server::{Server, ServerContext};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Upper bound for any single end-to-end wait
const WAIT: Duration = Duration::from_secs(10);

/// HTTP server over a fresh engine that reads `store`
pub async fn spawn_server(store: Arc<dyn DeliveryLogStore>) -> TestResult<String> {
    Engine::with_store(store)?.spawn_server().await
}

// ---------------------------------------------------------------------------
// Engine wiring
// ---------------------------------------------------------------------------

/// Knobs for [`Engine::with_options`]
pub struct EngineOptions {
    pub registry: InMemoryWebhookRegistry,
    pub store: Arc<dyn DeliveryLogStore>,
    pub retry_strategy: RetryStrategy,
    pub concurrency: usize,
    /// Registry the workers consult before each attempt; the engine's own
    /// registry when `None`
    pub worker_registry: Option<Arc<dyn WebhookRegistry>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            registry: InMemoryWebhookRegistry::new(),
            store: Arc::new(InMemoryDeliveryLog::new()),
            retry_strategy: RetryStrategy::new(1, 10).with_jitter(0.0),
            concurrency: 4,
            worker_registry: None,
        }
    }
}

/// A full delivery engine with millisecond backoff
pub struct Engine {
    pub registry: InMemoryWebhookRegistry,
    pub store: Arc<dyn DeliveryLogStore>,
    pub service: Arc<DeliveryService>,
    pub dispatcher: Dispatcher,
}

impl Engine {
    pub fn new() -> TestResult<Self> {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_store(store: Arc<dyn DeliveryLogStore>) -> TestResult<Self> {
        Self::with_options(EngineOptions {
            store,
            ..EngineOptions::default()
        })
    }

    pub fn with_parts(
        store: Arc<dyn DeliveryLogStore>,
        retry_strategy: RetryStrategy,
    ) -> TestResult<Self> {
        Self::with_options(EngineOptions {
            store,
            retry_strategy,
            ..EngineOptions::default()
        })
    }

    pub fn with_options(options: EngineOptions) -> TestResult<Self> {
        let registry = options.registry;
        let queue = DeliveryQueue::new();
        let client = WebhookHttpClient::with_timeout(Duration::from_secs(5), default_user_agent())?;

        let worker_registry = options
            .worker_registry
            .unwrap_or_else(|| Arc::new(registry.clone()));

        let service = DeliveryService::new(
            queue.clone(),
            worker_registry,
            options.store.clone(),
            DeliveryExecutor::new(Arc::new(client)),
        )
        .with_retry_strategy(options.retry_strategy)
        .with_concurrency(options.concurrency);

        let dispatcher = Dispatcher::new(
            Arc::new(registry.clone()),
            queue,
            service.executor().clone(),
        );

        Ok(Self {
            registry,
            store: options.store,
            service: Arc::new(service),
            dispatcher,
        })
    }

    pub fn start(&self) -> JoinHandle<()> {
        self.service.clone().start()
    }

    /// Serve this engine over HTTP with a running event listener
    pub async fn spawn_server(&self) -> TestResult<String> {
        let config = {
            let mut config = Config::load()?;
            config.server.host = "localhost".to_string();
            config.server.port = 0;
            config
        };

        let (events, listener) = EventListener::channel(self.dispatcher.clone(), 64);
        listener.start();

        let context = ServerContext {
            store: self.store.clone(),
            registry: Arc::new(self.registry.clone()),
            dispatcher: self.dispatcher.clone(),
            events,
        };
        let server = Server::new(&config, context)
            .await
            .map_err(|e| e.to_string())?;

        let port = server.port();
        tokio::spawn(server.run());

        Ok(format!("http://{}:{}", config.server.host, port))
    }

    pub async fn attempts(&self, delivery_id: Uuid) -> TestResult<Vec<DeliveryAttempt>> {
        Ok(self.store.attempts_for_delivery(delivery_id).await?)
    }
}

/// Collect notifications for `delivery_id` until one says the delivery is over
pub async fn until_final(
    notifications: &mut BroadcastStream<DeliveryNotification>,
    delivery_id: Uuid,
) -> TestResult<Vec<DeliveryNotification>> {
    let mut seen = Vec::new();

    loop {
        let next = tokio::time::timeout(WAIT, notifications.next())
            .await?
            .ok_or("notification stream closed")??;

        if next.delivery_id() != delivery_id {
            continue;
        }

        let done = next.is_final();
        seen.push(next);
        if done {
            return Ok(seen);
        }
    }
}

/// Wait until `count` deliveries have finished, in whatever order
pub async fn finished_deliveries(
    notifications: &mut BroadcastStream<DeliveryNotification>,
    count: usize,
) -> TestResult<Vec<Uuid>> {
    let mut finished = Vec::new();

    while finished.len() < count {
        let next = tokio::time::timeout(WAIT, notifications.next())
            .await?
            .ok_or("notification stream closed")??;
        if next.is_final() {
            finished.push(next.delivery_id());
        }
    }
    Ok(finished)
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// A log store whose writes always fail
#[derive(Default)]
pub struct FailingLog;

#[async_trait]
impl DeliveryLogStore for FailingLog {
    async fn append(&self, _attempt: DeliveryAttempt) -> Result<(), StoreError> {
        Err(StoreError::WriteFailed("disk full".to_string()))
    }

    async fn attempts_for_webhook(
        &self,
        _webhook_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        Err(StoreError::ReadFailed("disk full".to_string()))
    }

    async fn attempts_for_delivery(
        &self,
        _delivery_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        Ok(Vec::new())
    }

    async fn pending_retries(&self) -> Result<Vec<DeliveryAttempt>, StoreError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// A registry whose first `failures` lookups by id are unavailable
pub struct FlakyRegistry {
    inner: InMemoryWebhookRegistry,
    failures: AtomicU32,
    lookups: AtomicU32,
}

impl FlakyRegistry {
    pub fn new(inner: InMemoryWebhookRegistry, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            lookups: AtomicU32::new(0),
        }
    }

    /// Lookups by id so far, failed ones included
    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookRegistry for FlakyRegistry {
    async fn active_webhooks_for(
        &self,
        survey_id: &str,
        kind: SurveyEventKind,
    ) -> Result<Vec<Webhook>, RegistryError> {
        self.inner.active_webhooks_for(survey_id, kind).await
    }

    async fn find(&self, webhook_id: &str) -> Result<Option<Webhook>, RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RegistryError::Unavailable("connection refused".to_string()));
        }
        self.inner.find(webhook_id).await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn survey() -> SurveySnapshot {
    SurveySnapshot {
        id: "srv-1".to_string(),
        name: "Customer pulse".to_string(),
        status: "published".to_string(),
    }
}

pub fn response_submitted() -> SurveyEvent {
    SurveyEvent::response(
        SurveyEventKind::ResponseSubmitted,
        survey(),
        SurveyResponse {
            id: "resp-1".to_string(),
            submitted_at: Some(time::OffsetDateTime::now_utc()),
            completed_at: None,
            is_complete: true,
            answers: [
                ("q1".to_string(), serde_json::json!("Yes")),
                ("q2".to_string(), serde_json::json!(4)),
            ]
            .into_iter()
            .collect(),
            metadata: None,
        },
    )
}

pub fn webhook_for(id: &str, server: &MockServer) -> Webhook {
    Webhook::new(id.to_string(), "srv-1".to_string(), format!("{}/hook", server.uri()))
        .subscribe_all()
}

/// Endpoint answering every POST with `status`
pub async fn endpoint(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}
