//! Change feed and live subscriptions
//!
//! Every committed write publishes a [`ChangeEvent`]. Listeners re-run their
//! query whenever a relevant event arrives and hand the full, freshly
//! materialized result to their callback. A [`Subscription`] owns the
//! listener task; unsubscribing (or dropping the handle) stops it.

use std::future::Future;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;

/// A committed change to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Conversation row created or its summary/counters updated
    Conversation {
        conversation_id: String,
        participants: Vec<String>,
    },
    /// Message appended to a conversation
    Message {
        conversation_id: String,
        message_id: String,
    },
}

impl ChangeEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            ChangeEvent::Conversation {
                conversation_id, ..
            }
            | ChangeEvent::Message {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Broadcast fan-out of change events
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no listeners is not an error
    pub fn publish(&self, event: ChangeEvent) {
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!("Published change event to {} listener(s)", receivers);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Handle to a live listener. Stops the listener when unsubscribed or dropped.
#[must_use = "dropping a Subscription stops the listener"]
#[derive(Debug)]
pub struct Subscription {
    label: String,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Release the listener
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Subscription '{}' released", self.label);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Deliver the initial snapshot, then keep re-querying on relevant changes.
///
/// The receiver must be created before the initial query runs so that no
/// change committed in between is missed.
pub(crate) async fn listen<T, P, Q, Fut, F>(
    label: String,
    mut receiver: broadcast::Receiver<ChangeEvent>,
    is_relevant: P,
    query: Q,
    mut callback: F,
) -> Result<Subscription>
where
    T: Send + 'static,
    P: Fn(&ChangeEvent) -> bool + Send + 'static,
    Q: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let initial = query().await?;
    callback(initial);

    let task_label = label.clone();
    let handle = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) if is_relevant(&event) => {}
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        "Subscription '{}' lagged by {} events, refreshing",
                        task_label, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }

            match query().await {
                Ok(snapshot) => callback(snapshot),
                Err(e) => warn!("Subscription '{}' failed to refresh: {}", task_label, e),
            }
        }
        debug!("Subscription '{}' finished", task_label);
    });

    Ok(Subscription {
        label,
        handle: Some(handle),
    })
}
