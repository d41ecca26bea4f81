use std::pin::Pin;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use reqwest::Client;
use shared::{
    domain::{QuizId, SubmissionId, UnitKey},
    error::ApiError,
    protocol::{
        ClientFrame, FinishRequest, ServerEvent, StatusResponse, SubmitRequest, SubmitResponse,
        UnreadCountResponse,
    },
};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;
use url::Url;

const CSRF_HEADER: &str = "X-CSRFToken";

/// The server's decision payload for a finish request. Opaque: the
/// client-side gate is advisory and the server is the final authority.
pub type FinishOutcome = serde_json::Value;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Server answered with a non-success response and a message.
    #[error("{0}")]
    Rejected(String),
    /// Request failed before a response arrived.
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// A frame that did not parse as a server event. Non-fatal; the
    /// channel stays up.
    #[error("invalid server event: {0}")]
    Garbled(String),
    /// The channel is gone and the controller must take over.
    #[error("live channel closed: {0}")]
    Closed(String),
}

impl ChannelError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ServerEvent, ChannelError>> + Send>>;

/// Opens one live event channel. Implemented over websockets in
/// production and by scripted streams in tests.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<EventStream>;
}

/// HTTP collaborators of the grading service.
#[async_trait]
pub trait GradingBackend: Send + Sync {
    async fn submit(&self, unit: UnitKey, code: &str) -> Result<SubmissionId, BackendError>;
    async fn submission_status(&self, id: SubmissionId) -> Result<StatusResponse, BackendError>;
    async fn finish(
        &self,
        quiz_id: QuizId,
        answers: &serde_json::Value,
        force: bool,
    ) -> Result<FinishOutcome, BackendError>;
    async fn unread_count(&self) -> Result<u64, BackendError>;
}

/// Rewrites the http(s) origin to ws(s) and appends the per-quiz event
/// channel path.
pub fn quiz_socket_url(server_url: &str, quiz_id: QuizId) -> Result<String> {
    let base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    Ok(format!(
        "{}/ws/quiz/{}/",
        base.trim_end_matches('/'),
        quiz_id.0
    ))
}

pub struct WsConnector {
    ws_url: String,
}

impl WsConnector {
    pub fn new(server_url: &str, quiz_id: QuizId) -> Result<Self> {
        Ok(Self {
            ws_url: quiz_socket_url(server_url, quiz_id)?,
        })
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self) -> Result<EventStream> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.ws_url))?;
        let (mut writer, reader) = ws_stream.split();

        // Ask for the active-submissions snapshot in case the server
        // does not push it unsolicited on this reconnect.
        let frame = serde_json::to_string(&ClientFrame::GetStatus)?;
        writer
            .send(Message::Text(frame))
            .await
            .context("failed to send get_status frame")?;

        let stream = reader.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(
                    serde_json::from_str::<ServerEvent>(&text)
                        .map_err(|err| ChannelError::Garbled(err.to_string())),
                ),
                Ok(Message::Close(_)) => {
                    Some(Err(ChannelError::Closed("closed by server".into())))
                }
                Ok(_) => None,
                Err(err) => Some(Err(ChannelError::Closed(err.to_string()))),
            }
        });

        Ok(Box::pin(stream))
    }
}

pub struct HttpBackend {
    http: Client,
    server_url: String,
    csrf_token: String,
}

impl HttpBackend {
    pub fn new(server_url: &str, csrf_token: impl Into<String>) -> Result<Self> {
        let parsed = Url::parse(server_url)
            .with_context(|| format!("invalid server url: {server_url}"))?;
        Ok(Self {
            http: Client::new(),
            server_url: parsed.as_str().trim_end_matches('/').to_string(),
            csrf_token: csrf_token.into(),
        })
    }

    async fn rejection_message(response: reqwest::Response, fallback: &str) -> String {
        match response.json::<ApiError>().await {
            Ok(body) if !body.error.is_empty() => body.error,
            _ => fallback.to_string(),
        }
    }
}

#[async_trait]
impl GradingBackend for HttpBackend {
    async fn submit(&self, unit: UnitKey, code: &str) -> Result<SubmissionId, BackendError> {
        let url = format!(
            "{}/quizzes/{}/question/{}/submit/",
            self.server_url, unit.quiz_id.0, unit.question_id.0
        );
        let response = self
            .http
            .post(url)
            .header(CSRF_HEADER, &self.csrf_token)
            .json(&SubmitRequest {
                code: code.to_string(),
            })
            .send()
            .await
            .map_err(|err| BackendError::Network(err.to_string()))?;

        if !response.status().is_success() {
            let message = Self::rejection_message(response, "submission failed").await;
            return Err(BackendError::Rejected(message));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Network(err.to_string()))?;
        Ok(body.submission_id)
    }

    async fn submission_status(&self, id: SubmissionId) -> Result<StatusResponse, BackendError> {
        let url = format!("{}/quizzes/submission/{}/status/", self.server_url, id.0);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BackendError::Network(err.to_string()))?;
        response
            .json()
            .await
            .map_err(|err| BackendError::Network(err.to_string()))
    }

    async fn finish(
        &self,
        quiz_id: QuizId,
        answers: &serde_json::Value,
        force: bool,
    ) -> Result<FinishOutcome, BackendError> {
        let url = format!("{}/quizzes/{}/finish/", self.server_url, quiz_id.0);
        let response = self
            .http
            .post(url)
            .header(CSRF_HEADER, &self.csrf_token)
            .json(&FinishRequest {
                answers: answers.clone(),
                force,
            })
            .send()
            .await
            .map_err(|err| BackendError::Network(err.to_string()))?;

        if !response.status().is_success() {
            let message = Self::rejection_message(response, "finish rejected").await;
            warn!(quiz_id = quiz_id.0, "finish rejected by server");
            return Err(BackendError::Rejected(message));
        }

        response
            .json()
            .await
            .map_err(|err| BackendError::Network(err.to_string()))
    }

    async fn unread_count(&self) -> Result<u64, BackendError> {
        let url = format!("{}/quizzes/help-requests/unread-count/", self.server_url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| BackendError::Network(err.to_string()))?;
        let body: UnreadCountResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Network(err.to_string()))?;
        Ok(body.unread_count)
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
