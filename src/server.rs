mod handlers;
mod responses;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::domain::{DeliveryLogStore, WebhookRegistry};
use crate::outbound::webhook::{Dispatcher, EventSender, StatusAggregator};
use crate::server::handlers::delivery_status::delivery_status;
use crate::server::handlers::health_check;
use crate::server::handlers::intake::{send_test_delivery, submit_event};
use axum::http::Method;
use axum::{
    Router,
    routing::{get, post},
};
use color_eyre::eyre::{Context, Result};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
/// The global application state shared between all request handlers.
pub(crate) struct AppState {
    pub(crate) status: StatusAggregator,
    pub(crate) registry: Arc<dyn WebhookRegistry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) events: EventSender,
}

/// Engine handles the HTTP layer is built on
#[derive(Clone)]
pub struct ServerContext {
    pub store: Arc<dyn DeliveryLogStore>,
    pub registry: Arc<dyn WebhookRegistry>,
    pub dispatcher: Dispatcher,
    pub events: EventSender,
}

impl From<ServerContext> for AppState {
    fn from(context: ServerContext) -> Self {
        Self {
            status: StatusAggregator::new(context.store),
            registry: context.registry,
            dispatcher: context.dispatcher,
            events: context.events,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// State over the given parts; the returned listener is not started
    pub(crate) fn for_tests(
        store: Arc<dyn DeliveryLogStore>,
        registry: Arc<dyn WebhookRegistry>,
        event_capacity: usize,
    ) -> std::result::Result<
        (Self, crate::outbound::webhook::EventListener),
        crate::outbound::webhook::HttpClientError,
    > {
        use crate::outbound::webhook::{
            DeliveryExecutor, DeliveryQueue, EventListener, WebhookHttpClient,
        };

        let executor = DeliveryExecutor::new(Arc::new(WebhookHttpClient::new()?));
        let dispatcher = Dispatcher::new(registry.clone(), DeliveryQueue::new(), executor);
        let (events, listener) = EventListener::channel(dispatcher.clone(), event_capacity);

        let context = ServerContext {
            store,
            registry,
            dispatcher,
            events,
        };
        Ok((context.into(), listener))
    }
}

pub struct Server {
    router: Router,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Creates the HTTP server on top of a running delivery engine.
    pub async fn new(config: &Config, context: ServerContext) -> Result<Self> {
        let trace_layer =
            TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
                let uri = request.uri().to_string();
                tracing::info_span!("request", method = %request.method(), uri)
            });

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

        let state = AppState::from(context);

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/events", post(submit_event))
            .route("/webhooks/{id}/delivery-status", get(delivery_status))
            .route("/webhooks/{id}/test", post(send_test_delivery))
            .layer(cors_layer)
            .layer(trace_layer)
            .with_state(state);

        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            router,
            listener,
            local_addr,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Runs the HTTP server.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Server listening on {}", self.local_addr);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    /// Runs the HTTP server until `signal` resolves, then drains open requests.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Server listening on {}", self.local_addr);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }
}
