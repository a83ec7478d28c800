//! Conversation history entries

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the append-only turn log of a session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,

    /// Position in the session log, strictly increasing
    pub ordinal: u64,

    /// Request that produced this turn; `None` for staged exchanges
    pub request_id: Option<Uuid>,
}

impl ConversationTurn {
    /// A turn that only lives in the history sent to the reasoner
    pub fn transient(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            ordinal: 0,
            request_id: None,
        }
    }
}
