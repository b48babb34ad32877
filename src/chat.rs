//! Text-completion chat surface
//!
//! The non-voice chat path: one HTTP round trip per message, subject to the
//! same command-extraction convention as the voice transcript. The fenced
//! command block is stripped from what the user sees; a reply that was
//! nothing but the command produces no visible text at all.

use serde::{Deserialize, Serialize};

use crate::command::{extract_command, strip_command_fence, ActionCommand};
use crate::{Error, Result};

/// Request to the text-completion endpoint
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

/// Response from the text-completion endpoint
#[derive(Debug, Deserialize)]
struct ChatResponse {
    text: String,
}

/// A completed chat turn, ready for presentation and dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// User-visible text with the command fence stripped; `None` when the
    /// reply carried nothing but the command
    pub text: Option<String>,

    /// Embedded command, if the reply carried one
    pub command: Option<ActionCommand>,
}

/// Client for the text-completion endpoint
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ChatClient {
    /// Create a chat client
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is empty
    pub fn new(endpoint: String) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(Error::Config(
                "chat endpoint required for the text surface".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    /// Send one message and post-process the reply
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    pub async fn send(&self, message: &str) -> Result<ChatReply> {
        tracing::debug!(chars = message.len(), "sending chat message");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ChatRequest { message })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat endpoint error");
            return Err(Error::Chat(format!("chat endpoint error {status}: {body}")));
        }

        let reply: ChatResponse = response.json().await?;
        Ok(Self::post_process(&reply.text))
    }

    /// Apply the command-extraction convention to a completed reply
    #[must_use]
    fn post_process(text: &str) -> ChatReply {
        let command = extract_command(text);
        let cleaned = strip_command_fence(text);
        ChatReply {
            text: if cleaned.is_empty() { None } else { Some(cleaned) },
            command,
        }
    }
}
