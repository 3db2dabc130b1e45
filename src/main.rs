use std::sync::Arc;

use survey_webhooks::config::Config;
use survey_webhooks::outbound::webhook::event_listener::EVENT_CHANNEL_CAPACITY;
use survey_webhooks::outbound::webhook::{
    DeliveryQueue, DeliveryService, Dispatcher, EventListener, InMemoryDeliveryLog,
    InMemoryWebhookRegistry,
};
use survey_webhooks::server::{Server, ServerContext};
use survey_webhooks::telemetry;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    let registry = Arc::new(InMemoryWebhookRegistry::new());
    for webhook in config.webhooks.iter().cloned().map(|w| w.into_webhook()) {
        if let Err(fault) = webhook.validate() {
            tracing::warn!(
                webhook_id = %webhook.id,
                error = %fault,
                "Configured webhook is misconfigured, deliveries to it will be rejected"
            );
        }
        registry.register(webhook).await;
    }

    let store = Arc::new(InMemoryDeliveryLog::new());
    let queue = DeliveryQueue::new();

    let service = Arc::new(DeliveryService::from_config(
        &config.delivery,
        queue.clone(),
        registry.clone(),
        store.clone(),
    )?);
    service.resume().await?;

    let dispatcher = Dispatcher::new(registry.clone(), queue, service.executor().clone());
    let (events, listener) = EventListener::channel(dispatcher.clone(), EVENT_CHANNEL_CAPACITY);

    let worker = service.clone().start();
    let _listener = listener.start();

    let server = Server::new(
        &config,
        ServerContext {
            store,
            registry,
            dispatcher,
            events,
        },
    )
    .await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    service.shutdown();
    worker.await?;
    Ok(())
}
