// Webhook delivery engine
//
// Leaf components:
//   hmac_signer, payload_builder (+ schemas), http_client, retry_strategy
//
// Delivery pipeline:
//   event_listener    – channel of survey events feeding the dispatcher
//   dispatcher        – resolves matching webhooks and enqueues deliveries
//   delivery_queue    – time-ordered queue shared by new work and retries
//   delivery_service  – bounded worker loop: executor → retry decision → log
//   executor          – one signed POST, classified into a DeliveryAttempt
//
// Bookkeeping:
//   delivery_log, registry – in-memory implementations of the domain ports
//   status                 – per-webhook summary folded from the attempt log

pub mod delivery_log;
pub mod delivery_queue;
pub mod delivery_service;
pub mod dispatcher;
pub mod event_listener;
pub mod executor;
pub mod hmac_signer;
pub mod http_client;
pub mod payload_builder;
pub mod registry;
pub mod retry_strategy;
pub mod schemas;
pub mod status;

// Re-export commonly used types
pub use delivery_log::InMemoryDeliveryLog;
pub use delivery_queue::{DeliveryQueue, QueuedDelivery};
pub use delivery_service::{DeliveryNotification, DeliveryService, DeliveryServiceError};
pub use dispatcher::{
    DispatchError, DispatchReceipt, DispatchedDelivery, Dispatcher, RejectedWebhook,
};
pub use event_listener::{EventListener, EventSender, ListenerError};
pub use executor::{DeliveryError, DeliveryExecutor};
pub use hmac_signer::{
    HmacSigner, SignatureHeader, format_signature_header, parse_signature_header,
};
pub use http_client::{HttpClientError, WebhookHttpClient};
pub use registry::InMemoryWebhookRegistry;
pub use retry_strategy::{RetryDecision, RetryStrategy};
pub use schemas::{ResponseSummary, SurveySummary, WebhookPayload};
pub use status::StatusAggregator;
