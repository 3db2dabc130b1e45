use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::SurveyEvent;
use crate::outbound::webhook::dispatcher::Dispatcher;

/// Default number of events buffered between producers and the listener
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Producer side of the event channel. Cheap to clone.
#[derive(Clone)]
pub struct EventSender {
    events: mpsc::Sender<SurveyEvent>,
}

impl EventSender {
    /// Hand an event to the listener without waiting for room in the buffer
    pub fn try_send(&self, event: SurveyEvent) -> Result<(), ListenerError> {
        self.events.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ListenerError::Full,
            mpsc::error::TrySendError::Closed(_) => ListenerError::Closed,
        })
    }

    /// Hand an event to the listener, waiting while the buffer is full
    pub async fn send(&self, event: SurveyEvent) -> Result<(), ListenerError> {
        self.events
            .send(event)
            .await
            .map_err(|_| ListenerError::Closed)
    }
}

/// Bridges survey events to the [`Dispatcher`].
///
/// Events are dispatched one at a time in arrival order; dispatch only
/// enqueues, so HTTP never runs on this task.
pub struct EventListener {
    dispatcher: Dispatcher,
    events: mpsc::Receiver<SurveyEvent>,
}

impl EventListener {
    /// Create a listener and the sender that feeds it
    pub fn channel(dispatcher: Dispatcher, capacity: usize) -> (EventSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            EventSender { events: tx },
            Self {
                dispatcher,
                events: rx,
            },
        )
    }

    /// Start listening. The task ends once every [`EventSender`] is dropped
    /// and the buffer is drained.
    pub fn start(self) -> JoinHandle<()> {
        info!("Starting survey event listener");
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            debug!(
                survey_id = %event.survey_id(),
                event = %event.kind,
                "Received survey event"
            );

            if let Err(e) = self.dispatcher.dispatch(&event).await {
                error!(
                    survey_id = %event.survey_id(),
                    event = %event.kind,
                    error = %e,
                    "Failed to dispatch survey event, skipping"
                );
            }
        }

        warn!("Event channel closed, listener exiting");
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error("Event buffer is full")]
    Full,

    #[error("Event listener has stopped")]
    Closed,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
