use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{QuestionId, SubmissionId, SubmissionStatus};

/// One entry of the active-submissions snapshot the server sends once
/// after every (re)connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSubmission {
    pub id: SubmissionId,
    pub question_id: QuestionId,
    pub status: SubmissionStatus,
}

/// A help-thread comment. Immutable once created; duplicates arriving
/// via both transports are collapsed by [`CommentPayload::identity`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentPayload {
    pub author: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub is_teacher: bool,
}

impl CommentPayload {
    pub fn identity(&self) -> (DateTime<Utc>, &str, &str) {
        (self.created_at, &self.author, &self.text)
    }
}

/// Inbound events. The poll loop synthesizes the same shapes for
/// terminal statuses, so the downstream contract is transport-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SubmissionUpdate {
        question_id: QuestionId,
        status: SubmissionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_correct: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_log: Option<String>,
    },
    ActiveSubmissions {
        submissions: Vec<ActiveSubmission>,
    },
    HelpComment {
        question_id: QuestionId,
        comment: CommentPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unread_count: Option<u64>,
    },
    UnreadCountUpdate {
        unread_count: u64,
    },
    HelpNotification {
        unread_count: u64,
    },
}

/// Outbound frames sent over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Asks the server to resend the active-submissions snapshot.
    GetStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: SubmissionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRequest {
    pub answers: serde_json::Value,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}
