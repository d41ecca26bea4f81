use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(QuizId);
id_newtype!(QuestionId);
id_newtype!(SubmissionId);

/// Key of one gradable submission stream: a question within a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub quiz_id: QuizId,
    pub question_id: QuestionId,
}

impl UnitKey {
    pub fn new(quiz_id: QuizId, question_id: QuestionId) -> Self {
        Self {
            quiz_id,
            question_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Error,
}

impl SubmissionStatus {
    /// Anything other than pending/running closes out a submission.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Informational connectivity signal consumed by the UI. Never gates
/// data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
    Polling,
}

/// Delivery-side state of the session. Exactly one of the live channel
/// and the poll timer is active; `Polling` is terminal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Polling,
}
