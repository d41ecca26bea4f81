use std::sync::Arc;

use shared::{
    domain::{QuizId, SubmissionStatus, UnitKey},
    protocol::{CommentPayload, ServerEvent},
};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::{
    notifications::{NotificationEntry, NotificationStore, ThreadKey},
    registry::SubmissionRegistry,
    ClientEvent,
};

/// Single entry point for events from either transport. Every update
/// is applied as a commutative, idempotent merge: duplicates and
/// cross-transport reordering during a handover leave the registry and
/// notification store in the same observable state.
pub struct EventReconciler {
    quiz_id: QuizId,
    registry: Arc<Mutex<SubmissionRegistry>>,
    store: Arc<Mutex<NotificationStore>>,
    events: broadcast::Sender<ClientEvent>,
}

impl EventReconciler {
    pub fn new(
        quiz_id: QuizId,
        registry: Arc<Mutex<SubmissionRegistry>>,
        store: Arc<Mutex<NotificationStore>>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            quiz_id,
            registry,
            store,
            events,
        }
    }

    pub async fn apply(&self, event: ServerEvent) {
        match event {
            ServerEvent::SubmissionUpdate {
                question_id,
                status,
                is_correct,
                error_log,
            } => {
                let unit = UnitKey::new(self.quiz_id, question_id);
                self.apply_submission_update(unit, status, is_correct, error_log)
                    .await;
            }
            ServerEvent::ActiveSubmissions { submissions } => {
                self.registry
                    .lock()
                    .await
                    .hydrate(self.quiz_id, &submissions);
                for sub in submissions {
                    let _ = self.events.send(ClientEvent::SubmissionStatusChanged {
                        unit: UnitKey::new(self.quiz_id, sub.question_id),
                        status: sub.status,
                        is_correct: None,
                        error_log: None,
                    });
                }
            }
            ServerEvent::HelpComment {
                question_id,
                comment,
                status: _,
                unread_count,
            } => {
                let unit = UnitKey::new(self.quiz_id, question_id);
                self.apply_help_comment(unit, comment, unread_count).await;
            }
            ServerEvent::UnreadCountUpdate { unread_count }
            | ServerEvent::HelpNotification { unread_count } => {
                self.set_unread(unread_count).await;
            }
        }
    }

    async fn apply_submission_update(
        &self,
        unit: UnitKey,
        status: SubmissionStatus,
        is_correct: Option<bool>,
        error_log: Option<String>,
    ) {
        if status.is_terminal() {
            let changed = self.registry.lock().await.resolve(
                unit,
                status,
                is_correct,
                error_log.clone(),
            );
            if !changed {
                debug!(
                    question_id = unit.question_id.0,
                    "dropping duplicate or stale submission update"
                );
                return;
            }
        }
        let _ = self.events.send(ClientEvent::SubmissionStatusChanged {
            unit,
            status,
            is_correct,
            error_log,
        });
    }

    async fn apply_help_comment(
        &self,
        unit: UnitKey,
        comment: CommentPayload,
        unread_count: Option<u64>,
    ) {
        let line_number = comment.line_number;
        let (appended, open_thread_history) = {
            let mut store = self.store.lock().await;
            let appended = store.append(unit, comment.clone());
            // A second delivery of the same comment still must not
            // re-render the thread.
            let history = match (appended, line_number) {
                (true, Some(line)) => {
                    let key = ThreadKey::new(unit, line);
                    store
                        .is_thread_open(key)
                        .then(|| store.thread_history(key))
                }
                _ => None,
            };
            if let Some(count) = unread_count {
                store.set_unread(count);
            }
            (appended, history)
        };

        if !appended {
            debug!(
                question_id = unit.question_id.0,
                "dropping duplicate help comment"
            );
        } else {
            let _ = self
                .events
                .send(ClientEvent::NotificationReceived(NotificationEntry {
                    unit,
                    comment,
                }));
        }

        if let (Some(history), Some(line)) = (open_thread_history, line_number) {
            let _ = self.events.send(ClientEvent::ThreadUpdated {
                unit,
                line_number: line,
                history,
            });
        }

        if let Some(count) = unread_count {
            let _ = self.events.send(ClientEvent::UnreadCountChanged(count));
        }
    }

    async fn set_unread(&self, count: u64) {
        self.store.lock().await.set_unread(count);
        let _ = self.events.send(ClientEvent::UnreadCountChanged(count));
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
