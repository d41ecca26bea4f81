use std::sync::Arc;

use futures::StreamExt;
use shared::{
    domain::{ChannelState, ConnectionStatus},
    protocol::ServerEvent,
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    time::{interval, sleep, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    reconciler::EventReconciler,
    registry::SubmissionRegistry,
    transport::{ChannelConnector, EventStream, GradingBackend},
    ClientEvent,
};

/// Owns event delivery for one session. Holds the live channel while
/// it lasts, retries with exponential backoff after every loss, and
/// once the attempt budget is spent switches to the poll loop for the
/// rest of the session. The live channel and the poll timers are never
/// active at the same time; both feed the same reconciler.
pub struct ReconnectController {
    connector: Arc<dyn ChannelConnector>,
    backend: Arc<dyn GradingBackend>,
    reconciler: Arc<EventReconciler>,
    registry: Arc<Mutex<SubmissionRegistry>>,
    settings: Settings,
    events: broadcast::Sender<ClientEvent>,
    connection: Arc<watch::Sender<ConnectionStatus>>,
    channel_state: Arc<watch::Sender<ChannelState>>,
}

impl ReconnectController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        backend: Arc<dyn GradingBackend>,
        reconciler: Arc<EventReconciler>,
        registry: Arc<Mutex<SubmissionRegistry>>,
        settings: Settings,
        events: broadcast::Sender<ClientEvent>,
        connection: Arc<watch::Sender<ConnectionStatus>>,
        channel_state: Arc<watch::Sender<ChannelState>>,
    ) -> Self {
        Self {
            connector,
            backend,
            reconciler,
            registry,
            settings,
            events,
            connection,
            channel_state,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            self.channel_state.send_replace(ChannelState::Connecting);
            match self.connector.connect().await {
                Ok(stream) => {
                    attempt = 0;
                    self.channel_state.send_replace(ChannelState::Open);
                    self.notify_connection(ConnectionStatus::Connected);
                    info!("live channel open");
                    self.pump(stream).await;
                    self.channel_state.send_replace(ChannelState::Closed);
                    self.notify_connection(ConnectionStatus::Disconnected);
                    info!("live channel lost");
                }
                Err(err) => {
                    warn!("live channel connect failed: {err:#}");
                }
            }

            if attempt >= self.settings.max_reconnect_attempts {
                break;
            }
            attempt += 1;
            let factor = 1u32 << (attempt - 1).min(31);
            let delay = self.settings.reconnect_base_delay.saturating_mul(factor);
            info!(
                attempt,
                max_attempts = self.settings.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling live channel reconnect"
            );
            self.notify_connection(ConnectionStatus::Reconnecting);
            sleep(delay).await;
        }

        info!("reconnect attempts exhausted; polling for the rest of the session");
        self.channel_state.send_replace(ChannelState::Polling);
        self.notify_connection(ConnectionStatus::Polling);
        self.poll_loop().await;
    }

    async fn pump(&self, mut stream: EventStream) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => self.reconciler.apply(event).await,
                Err(err) if err.is_fatal() => {
                    warn!("live channel error: {err}");
                    return;
                }
                Err(err) => {
                    let _ = self.events.send(ClientEvent::Error(err.to_string()));
                }
            }
        }
    }

    async fn poll_loop(&self) {
        let mut submissions = interval(self.settings.submission_poll_interval);
        submissions.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut badge = interval(self.settings.badge_poll_interval);
        badge.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = submissions.tick() => self.poll_pending_submissions().await,
                _ = badge.tick() => self.poll_unread_count().await,
            }
        }
    }

    async fn poll_pending_submissions(&self) {
        let pollable = { self.registry.lock().await.pollable() };
        for (unit, id) in pollable {
            match self.backend.submission_status(id).await {
                Ok(response) if response.status.is_terminal() => {
                    // Same event shape the live channel produces, so
                    // everything downstream stays transport-agnostic.
                    self.reconciler
                        .apply(ServerEvent::SubmissionUpdate {
                            question_id: unit.question_id,
                            status: response.status,
                            is_correct: response.is_correct,
                            error_log: response.error_log,
                        })
                        .await;
                }
                Ok(_) => {}
                Err(err) => debug!(submission_id = id.0, "status poll failed: {err}"),
            }
        }
    }

    async fn poll_unread_count(&self) {
        match self.backend.unread_count().await {
            Ok(count) => {
                self.reconciler
                    .apply(ServerEvent::UnreadCountUpdate {
                        unread_count: count,
                    })
                    .await;
            }
            Err(err) => debug!("unread-count poll failed: {err}"),
        }
    }

    fn notify_connection(&self, status: ConnectionStatus) {
        self.connection.send_replace(status);
        let _ = self.events.send(ClientEvent::ConnectionChanged(status));
    }
}

#[cfg(test)]
#[path = "tests/reconnect_tests.rs"]
mod tests;
