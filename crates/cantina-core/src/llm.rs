use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One conversation message in vendor-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A completed tool invocation parsed out of the model stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as already-parsed JSON
    pub arguments: serde_json::Value,
}

/// Declarative schema for one tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the accepted parameters
    pub parameters: serde_json::Value,
}

/// Incremental unit of a streaming chat completion.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    /// A fragment of response text
    Text(String),
    /// A fragment of a tool call; `arguments` arrive as raw JSON pieces
    ToolCallFragment {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// End of stream
    Done,
    Error { message: String },
}

/// Streaming chat-completion vendor contract.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Open a streaming completion; deltas arrive on the returned channel
    /// until `ChatDelta::Done`.
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatDelta>>;
}
