//! Wire model for the query service's thread API.
//!
//! Decoding is deliberately tolerant: every field defaults, unknown fields
//! are ignored, and unknown status values map to [`InteractionStatus::Unknown`]
//! so additive server changes never break the bridge.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateThreadRequest {
    pub user_message: UserMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,
}

impl CreateThreadRequest {
    pub fn new(message: impl Into<String>, system_instructions: Option<&str>) -> Self {
        Self {
            user_message: UserMessage {
                text: message.into(),
            },
            system_instructions: system_instructions.map(String::from),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContinueThreadRequest {
    pub user_message: UserMessage,
}

impl ContinueThreadRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: UserMessage {
                text: message.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Processing,
    Complete,
    Cancelled,
    Error,
    #[serde(other)]
    Unknown,
}

impl Default for InteractionStatus {
    fn default() -> Self {
        Self::Processing
    }
}

impl InteractionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Full thread snapshot as returned by create/status/continue calls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadState {
    #[serde(default)]
    pub thread_id: Option<String>,

    #[serde(default)]
    pub interactions: Vec<InteractionState>,

    #[serde(default)]
    pub modified_artifacts: Vec<Artifact>,
}

impl ThreadState {
    /// Attribute the response to an interaction.
    ///
    /// Matches the tracked id when one is given and present in the response;
    /// otherwise falls back to the last entry in server order. The fallback
    /// is an approximation when interactions interleave on one thread.
    pub fn interaction(&self, tracked_id: Option<&str>) -> Option<&InteractionState> {
        if let Some(id) = tracked_id {
            if let Some(found) = self
                .interactions
                .iter()
                .find(|i| i.interaction_id.as_deref() == Some(id))
            {
                return Some(found);
            }
            tracing::debug!(
                interaction_id = id,
                "Tracked interaction not in response; falling back to latest entry"
            );
        }
        self.interactions.last()
    }

    pub fn latest_interaction_id(&self) -> Option<&str> {
        self.interactions
            .last()
            .and_then(|i| i.interaction_id.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionState {
    #[serde(default)]
    pub interaction_id: Option<String>,

    #[serde(default)]
    pub status: InteractionStatus,

    /// Error detail, populated when `status` is `error`.
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub assistant_actions: Vec<AssistantAction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantAction {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub plan: Option<String>,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub code_output: Option<String>,

    #[serde(default)]
    pub artifact_identifiers: Vec<String>,
}

/// A structured result embedded in a response. Only `table` artifacts are
/// rendered; anything else degrades to an identifier note.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub artifact_type: Option<String>,

    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Acknowledgment body for a cancel call. `status`, when present, reports
/// the state the latest interaction was in when the cancel arrived.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelAck {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub status: Option<InteractionStatus>,
}
