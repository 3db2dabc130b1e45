pub mod delivery;
pub mod events;
pub mod ports;
pub mod webhook;

pub use delivery::{
    DeliveryAttempt, DeliveryState, RequestSnapshot, ResponseSnapshot, WebhookDeliveryStatus,
};
pub use events::{SurveyEvent, SurveyEventKind, SurveyResponse, SurveySnapshot};
pub use ports::{DeliveryLogStore, RegistryError, StoreError, WebhookRegistry};
pub use webhook::{ConfigurationFault, QuestionMapping, Webhook};
