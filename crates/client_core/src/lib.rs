use std::sync::Arc;

use anyhow::Result;
use shared::domain::{
    ChannelState, ConnectionStatus, QuestionId, QuizId, SubmissionId, SubmissionStatus, UnitKey,
};
use shared::protocol::CommentPayload;
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod config;
pub mod notifications;
pub mod reconciler;
pub mod reconnect;
pub mod registry;
pub mod transport;

use config::Settings;
use notifications::{NotificationEntry, NotificationStore, ThreadKey};
use reconciler::EventReconciler;
use reconnect::ReconnectController;
use registry::{SubmissionRecord, SubmissionRegistry};
use transport::{
    BackendError, ChannelConnector, FinishOutcome, GradingBackend, HttpBackend, WsConnector,
};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Local admission-control rejection; no network call was made.
    #[error("a submission for this question is already being checked")]
    AlreadyPending,
    /// Server returned a non-success response; the optimistic record
    /// was rolled back and the unit is resubmittable immediately.
    #[error("submission rejected: {0}")]
    SubmissionRejected(String),
    /// Request failed before a response; rolled back identically.
    #[error("network error: {0}")]
    NetworkError(String),
}

#[derive(Debug, Error)]
pub enum FinishError {
    /// Finish-gate refusal carrying the blocking units. No network
    /// call was made.
    #[error("waiting on {} pending submissions", .0.len())]
    PendingWork(Vec<UnitKey>),
    #[error("finish rejected: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    NetworkError(String),
}

/// One-way notifications to the UI. Purely informational; consumers
/// observe state without owning it.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SubmissionStatusChanged {
        unit: UnitKey,
        status: SubmissionStatus,
        is_correct: Option<bool>,
        error_log: Option<String>,
    },
    /// A rejected or failed submit cleared its optimistic record.
    SubmissionRolledBack {
        unit: UnitKey,
    },
    ConnectionChanged(ConnectionStatus),
    UnreadCountChanged(u64),
    NotificationReceived(NotificationEntry),
    /// An open line thread received new history and needs a re-render.
    ThreadUpdated {
        unit: UnitKey,
        line_number: u32,
        history: Vec<CommentPayload>,
    },
    Error(String),
}

/// Client of the asynchronous grading service for one quiz session.
///
/// Owns the submission registry and notification store; events from
/// the live channel or the poll loop mutate them only through the
/// reconciler, and the UI reads them through the accessors here. One
/// instance per session, torn down with [`QuizSession::close`].
pub struct QuizSession {
    quiz_id: QuizId,
    backend: Arc<dyn GradingBackend>,
    registry: Arc<Mutex<SubmissionRegistry>>,
    store: Arc<Mutex<NotificationStore>>,
    controller: Arc<ReconnectController>,
    events: broadcast::Sender<ClientEvent>,
    connection: Arc<watch::Sender<ConnectionStatus>>,
    channel_state: Arc<watch::Sender<ChannelState>>,
    delivery_task: Mutex<Option<JoinHandle<()>>>,
}

impl QuizSession {
    /// Builds a session against the real HTTP and websocket endpoints
    /// described by `settings`.
    pub fn new(quiz_id: QuizId, settings: Settings) -> Result<Arc<Self>> {
        let backend = Arc::new(HttpBackend::new(
            &settings.server_url,
            settings.auth_token.clone(),
        )?);
        let connector = Arc::new(WsConnector::new(&settings.server_url, quiz_id)?);
        Ok(Self::new_with_dependencies(
            quiz_id, settings, backend, connector,
        ))
    }

    pub fn new_with_dependencies(
        quiz_id: QuizId,
        settings: Settings,
        backend: Arc<dyn GradingBackend>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_buffer);
        let registry = Arc::new(Mutex::new(SubmissionRegistry::new()));
        let store = Arc::new(Mutex::new(NotificationStore::default()));
        let reconciler = Arc::new(EventReconciler::new(
            quiz_id,
            Arc::clone(&registry),
            Arc::clone(&store),
            events.clone(),
        ));
        let connection = Arc::new(watch::channel(ConnectionStatus::Disconnected).0);
        let channel_state = Arc::new(watch::channel(ChannelState::Connecting).0);
        let controller = Arc::new(ReconnectController::new(
            connector,
            Arc::clone(&backend),
            reconciler,
            Arc::clone(&registry),
            settings,
            events.clone(),
            Arc::clone(&connection),
            Arc::clone(&channel_state),
        ));

        Arc::new(Self {
            quiz_id,
            backend,
            registry,
            store,
            controller,
            events,
            connection,
            channel_state,
            delivery_task: Mutex::new(None),
        })
    }

    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    pub fn unit(&self, question_id: QuestionId) -> UnitKey {
        UnitKey::new(self.quiz_id, question_id)
    }

    /// Starts event delivery (live channel with reconnect, then
    /// polling once the attempt budget is spent). Idempotent.
    pub async fn start(&self) {
        let mut task = self.delivery_task.lock().await;
        if task.is_some() {
            return;
        }
        let controller = Arc::clone(&self.controller);
        *task = Some(tokio::spawn(controller.run()));
    }

    /// Tears the session down: stops the delivery task (live channel
    /// or poll timers, whichever is active) and marks the channel
    /// closed.
    pub async fn close(&self) {
        if let Some(task) = self.delivery_task.lock().await.take() {
            task.abort();
        }
        self.channel_state.send_replace(ChannelState::Closed);
        self.connection.send_replace(ConnectionStatus::Disconnected);
        let _ = self
            .events
            .send(ClientEvent::ConnectionChanged(ConnectionStatus::Disconnected));
        info!(quiz_id = self.quiz_id.0, "session closed");
    }

    /// Submits code for grading. At most one submission per question
    /// is in flight: the optimistic Pending record is created before
    /// the network call and rolled back if the call fails, so a
    /// rejected unit is resubmittable immediately.
    pub async fn try_submit(
        &self,
        question_id: QuestionId,
        code: &str,
    ) -> Result<SubmissionId, SubmitError> {
        let unit = self.unit(question_id);
        self.registry
            .lock()
            .await
            .begin(unit)
            .map_err(|_| SubmitError::AlreadyPending)?;
        let _ = self.events.send(ClientEvent::SubmissionStatusChanged {
            unit,
            status: SubmissionStatus::Pending,
            is_correct: None,
            error_log: None,
        });

        match self.backend.submit(unit, code).await {
            Ok(id) => {
                self.registry.lock().await.assign_submission_id(unit, id);
                info!(
                    question_id = question_id.0,
                    submission_id = id.0,
                    "submission accepted"
                );
                Ok(id)
            }
            Err(err) => {
                self.registry.lock().await.rollback(unit);
                let _ = self.events.send(ClientEvent::SubmissionRolledBack { unit });
                warn!(question_id = question_id.0, "submission failed: {err}");
                Err(match err {
                    BackendError::Rejected(message) => SubmitError::SubmissionRejected(message),
                    BackendError::Network(message) => SubmitError::NetworkError(message),
                })
            }
        }
    }

    /// Finishes the quiz. Refused locally with the blocking units while
    /// grading is outstanding, unless `force` is set (timer expiry).
    /// The server stays the final authority on the outcome.
    pub async fn finish(
        &self,
        answers: serde_json::Value,
        force: bool,
    ) -> Result<FinishOutcome, FinishError> {
        if !force {
            let pending = self.registry.lock().await.pending_units();
            if !pending.is_empty() {
                return Err(FinishError::PendingWork(pending));
            }
        }
        self.backend
            .finish(self.quiz_id, &answers, force)
            .await
            .map_err(|err| match err {
                BackendError::Rejected(message) => FinishError::Rejected(message),
                BackendError::Network(message) => FinishError::NetworkError(message),
            })
    }

    pub async fn pending_units(&self) -> Vec<UnitKey> {
        self.registry.lock().await.pending_units()
    }

    pub async fn has_pending(&self) -> bool {
        self.registry.lock().await.has_pending()
    }

    pub async fn submission(&self, question_id: QuestionId) -> Option<SubmissionRecord> {
        self.registry
            .lock()
            .await
            .record(self.unit(question_id))
            .cloned()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.connection.borrow()
    }

    pub fn channel_state(&self) -> ChannelState {
        *self.channel_state.borrow()
    }

    pub async fn unread_count(&self) -> u64 {
        self.store.lock().await.unread()
    }

    pub async fn notifications(&self) -> Vec<NotificationEntry> {
        self.store.lock().await.recent()
    }

    /// Opens a line thread and returns its merged history, or closes
    /// it when it is already open. A thread is open or absent, never
    /// duplicated.
    pub async fn toggle_thread(
        &self,
        question_id: QuestionId,
        line_number: u32,
    ) -> Option<Vec<CommentPayload>> {
        let key = ThreadKey::new(self.unit(question_id), line_number);
        let mut store = self.store.lock().await;
        if store.close_thread(key) {
            return None;
        }
        store.open_thread(key);
        Some(store.thread_history(key))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
