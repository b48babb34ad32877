//! Action-command extraction
//!
//! The model embeds side-effect instructions in otherwise-conversational text
//! as a fenced JSON block. This module finds the block with a small scanner
//! (open marker, tag, body, close marker — deliberately not a regex), parses
//! it into an [`ActionCommand`], and strips it from user-visible text.
//!
//! A fence that never closes yields nothing: extraction only runs against
//! completed turns, so a partially-streamed fence is simply deferred.

pub mod dispatch;

use serde::Deserialize;

/// Opening marker of a structured-command block
const FENCE_OPEN: &str = "```json";

/// Closing marker of a structured-command block
const FENCE_CLOSE: &str = "```";

/// A structured side-effect instruction parsed out of model output
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ActionCommand {
    /// Send a message through the messaging deep link
    Whatsapp {
        /// Contact name to resolve against the directory
        contact: String,
        /// Message body
        message: String,
    },
    /// Place a phone call
    Call {
        /// Contact name to resolve against the directory
        contact: String,
        /// What the call is about, spoken by the assistant on connect
        #[serde(default)]
        context: Option<String>,
    },
}

impl ActionCommand {
    /// The contact name this command targets
    #[must_use]
    pub fn contact(&self) -> &str {
        match self {
            Self::Whatsapp { contact, .. } | Self::Call { contact, .. } => contact,
        }
    }
}

/// Locate the first fenced command block
///
/// Returns the byte span of the whole block and its inner body. An unclosed
/// fence returns `None`.
fn find_fenced_block(text: &str) -> Option<(usize, usize, &str)> {
    let open = text.find(FENCE_OPEN)?;
    let body_start = open + FENCE_OPEN.len();
    let close = text[body_start..].find(FENCE_CLOSE)?;
    let body = &text[body_start..body_start + close];
    let end = body_start + close + FENCE_CLOSE.len();
    Some((open, end, body))
}

/// Extract the action command embedded in a completed response, if any
///
/// At most one extraction per text: the first fenced block wins. Parse
/// failures are logged and discarded — malformed model output must never
/// crash the session.
#[must_use]
pub fn extract_command(text: &str) -> Option<ActionCommand> {
    let (_, _, body) = find_fenced_block(text)?;
    match serde_json::from_str::<ActionCommand>(body.trim()) {
        Ok(command) => {
            tracing::debug!(contact = command.contact(), "extracted action command");
            Some(command)
        }
        Err(e) => {
            tracing::debug!(error = %e, "discarding malformed action command");
            None
        }
    }
}

/// Remove the fenced command block from user-visible text
///
/// Returns the surrounding prose, trimmed. An empty result means the reply
/// was nothing but the command and no message should be shown.
#[must_use]
pub fn strip_command_fence(text: &str) -> String {
    match find_fenced_block(text) {
        Some((start, end, _)) => {
            let mut cleaned = String::with_capacity(text.len());
            cleaned.push_str(&text[..start]);
            cleaned.push_str(&text[end..]);
            cleaned.trim().to_string()
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_whatsapp_command_and_cleans_text() {
        let text = "Ok! ```json\n{\"action\":\"whatsapp\",\"contact\":\"Cris\",\"message\":\"oi\"}\n```";

        let command = extract_command(text).unwrap();
        assert_eq!(
            command,
            ActionCommand::Whatsapp {
                contact: "Cris".to_string(),
                message: "oi".to_string(),
            }
        );
        assert_eq!(strip_command_fence(text), "Ok!");
    }

    #[test]
    fn extracts_call_command_without_context() {
        let text = "```json\n{\"action\":\"call\",\"contact\":\"Filho\"}\n```";
        let command = extract_command(text).unwrap();
        assert_eq!(
            command,
            ActionCommand::Call {
                contact: "Filho".to_string(),
                context: None,
            }
        );
    }

    #[test]
    fn malformed_payload_yields_nothing() {
        let text = "Sure ```json\n{not valid}\n```";
        assert!(extract_command(text).is_none());
    }

    #[test]
    fn unknown_action_kind_is_discarded() {
        let text = "```json\n{\"action\":\"teleport\",\"contact\":\"Cris\"}\n```";
        assert!(extract_command(text).is_none());
    }

    #[test]
    fn unclosed_fence_defers_extraction() {
        let text = "Ok! ```json\n{\"action\":\"whatsapp\",\"contact\":\"Cris\"";
        assert!(extract_command(text).is_none());
        assert_eq!(strip_command_fence(text), text);
    }

    #[test]
    fn first_fence_wins() {
        let text = "```json\n{\"action\":\"call\",\"contact\":\"A\"}\n``` and ```json\n{\"action\":\"call\",\"contact\":\"B\"}\n```";
        let command = extract_command(text).unwrap();
        assert_eq!(command.contact(), "A");
    }

    #[test]
    fn stripping_command_only_reply_leaves_empty_string() {
        let text = "```json\n{\"action\":\"call\",\"contact\":\"Cris\"}\n```";
        assert_eq!(strip_command_fence(text), "");
    }

    #[test]
    fn text_without_fence_is_untouched() {
        assert_eq!(strip_command_fence("just chatting"), "just chatting");
        assert!(extract_command("just chatting").is_none());
    }
}
