//! Subscription sessions.
//!
//! A session owns one live view and drives it from a tokio task: it waits for
//! change events, the heartbeat deadline or cancellation, re-evaluates the
//! view against the store when needed and forwards whatever the view decides
//! to emit.

use std::sync::Arc;
use std::time::Duration;

use liveset_engine::{
    ChangeEvent, Error as EngineError, ListView, RecordStore, RecordView, StreamMessage,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::notify::{Listener, Notification};

/// The live view a session drives.
#[derive(Debug)]
pub enum Subscription {
    List(ListView),
    Record(RecordView),
}

impl Subscription {
    pub fn collection(&self) -> &str {
        match self {
            Subscription::List(view) => view.collection(),
            Subscription::Record(view) => view.collection(),
        }
    }

    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        match self {
            Subscription::List(view) => view.is_relevant(event),
            Subscription::Record(view) => view.is_relevant(event),
        }
    }

    fn close(&mut self) {
        match self {
            Subscription::List(view) => view.close(),
            Subscription::Record(view) => view.close(),
        }
    }

    /// Evaluate against the store and let the view decide what to emit.
    fn evaluate(&mut self, store: &dyn RecordStore) -> Result<Option<StreamMessage>, EngineError> {
        match self {
            Subscription::List(view) => {
                let current = store.query(view.collection(), view.spec())?;
                Ok(view.refresh(current))
            }
            Subscription::Record(view) => {
                let current = match store.get(view.collection(), view.id()) {
                    Ok(record) => Some(record),
                    Err(EngineError::RecordNotFound(_)) => None,
                    Err(e) => return Err(e),
                };
                view.refresh(current)
            }
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The client went away
    Disconnected,
    /// The server is shutting down
    Cancelled,
    /// Evaluation failed; the client was sent an error message
    Failed(String),
}

/// One live subscription.
pub struct Session {
    id: String,
    subscription: Subscription,
    store: Arc<dyn RecordStore>,
    listener: Listener,
    outbound: mpsc::Sender<StreamMessage>,
    heartbeat: Duration,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session. The listener must already be subscribed so that no
    /// write between subscription and the first evaluation goes unnoticed.
    pub fn new(
        subscription: Subscription,
        store: Arc<dyn RecordStore>,
        listener: Listener,
        outbound: mpsc::Sender<StreamMessage>,
        heartbeat: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription,
            store,
            listener,
            outbound,
            heartbeat,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the session on its own task.
    pub fn spawn(self) -> JoinHandle<SessionOutcome> {
        tokio::spawn(self.run())
    }

    /// Drive the session until the client leaves, the token is cancelled or
    /// evaluation fails.
    pub async fn run(mut self) -> SessionOutcome {
        tracing::info!(
            session_id = %self.id,
            listener_id = %self.listener.id(),
            collection = %self.subscription.collection(),
            "Session started"
        );

        let outcome = self.run_inner().await;
        self.subscription.close();

        tracing::info!(session_id = %self.id, outcome = ?outcome, "Session ended");
        outcome
    }

    async fn run_inner(&mut self) -> SessionOutcome {
        if let Err(outcome) = self.refresh().await {
            return outcome;
        }

        let mut deadline = Instant::now() + self.heartbeat;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return SessionOutcome::Cancelled,

                _ = self.outbound.closed() => return SessionOutcome::Disconnected,

                notification = self.listener.recv() => {
                    match notification {
                        None => return SessionOutcome::Cancelled,
                        Some(Notification::Change(event)) => {
                            if !self.subscription.is_relevant(&event) {
                                tracing::trace!(session_id = %self.id, id = %event.id, "Irrelevant change skipped");
                                continue;
                            }
                        }
                        // Dropped events may have been relevant.
                        Some(Notification::Lagged) => {
                            tracing::debug!(session_id = %self.id, "Listener lagged, re-evaluating");
                        }
                    }

                    match self.refresh().await {
                        Ok(true) => deadline = Instant::now() + self.heartbeat,
                        Ok(false) => {}
                        Err(outcome) => return outcome,
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    if !self.send(StreamMessage::Heartbeat).await {
                        return SessionOutcome::Disconnected;
                    }
                    deadline = Instant::now() + self.heartbeat;
                }
            }
        }
    }

    /// Evaluate and emit. `Ok(true)` when something was sent; `Err` when the
    /// session must end.
    async fn refresh(&mut self) -> Result<bool, SessionOutcome> {
        match self.subscription.evaluate(self.store.as_ref()) {
            Ok(Some(message)) => {
                tracing::debug!(session_id = %self.id, kind = message.kind(), "Emitting");
                if self.send(message).await {
                    Ok(true)
                } else {
                    Err(SessionOutcome::Disconnected)
                }
            }
            Ok(None) => {
                tracing::trace!(session_id = %self.id, "Result unchanged, emission suppressed");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Session evaluation failed");
                let message = e.to_string();
                self.send(StreamMessage::error(message.clone())).await;
                Err(SessionOutcome::Failed(message))
            }
        }
    }

    /// Queue a message for the client. Returns false once the client is gone.
    async fn send(&self, message: StreamMessage) -> bool {
        tokio::select! {
            result = self.outbound.send(message) => result.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }
}
