//! Action-command dispatch
//!
//! Turns a parsed [`ActionCommand`] into its external effect: a messaging
//! deep link opened after the spoken confirmation has had time to finish, or
//! a phone call placed through the telephony endpoint with a deterministic
//! simulation fallback. Every delayed effect runs under a cancellation token
//! so a stale command never fires after the session is torn down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::command::ActionCommand;
use crate::config::DispatchConfig;
use crate::contacts::ContactDirectory;
use crate::{Error, Result};

/// Spoken fallback when a call command carries no context
const DEFAULT_CALL_MESSAGE: &str = "Olá, esta é uma chamada enviada pelo seu assistente.";

/// Feature name shown by the premium upsell after a simulated call
const CALL_FEATURE_NAME: &str = "Autonomous AI Calling";

/// Progression of a placed call, for the host UI's call overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Dialing the contact
    Dialing {
        /// Contact display name
        contact: String,
    },
    /// The call connected
    Connected {
        /// Contact display name
        contact: String,
        /// False only when the telephony endpoint reported a real call
        simulated: bool,
    },
    /// Simulated call ended; present the premium upsell
    PremiumUpsell {
        /// Feature being upsold
        feature: String,
    },
    /// The call overlay should be dismissed
    Ended,
}

/// External effect signals emitted by dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A messaging deep link was opened
    MessagingLinkOpened {
        /// Resolved contact name
        contact: String,
        /// The opened URL
        url: String,
    },
    /// The named contact could not be resolved; navigate to the contacts
    /// screen so the user can add it
    Navigate {
        /// Destination view name
        view: String,
    },
    /// Call progression update
    Call(CallState),
}

/// Opens URLs in the host environment
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Open the given URL
    ///
    /// # Errors
    ///
    /// Returns error if the URL cannot be opened
    async fn open(&self, url: &str) -> Result<()>;
}

/// Opens URLs with the platform launcher (`xdg-open` / `open`)
pub struct SystemOpener;

#[async_trait]
impl LinkOpener for SystemOpener {
    async fn open(&self, url: &str) -> Result<()> {
        #[cfg(target_os = "macos")]
        let launcher = "open";
        #[cfg(not(target_os = "macos"))]
        let launcher = "xdg-open";

        let status = tokio::process::Command::new(launcher)
            .arg(url)
            .status()
            .await
            .map_err(|e| Error::Command(format!("{launcher} failed: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Command(format!("{launcher} exited with {status}")))
        }
    }
}

/// Telephony endpoint response
#[derive(Debug, Deserialize)]
struct TelephonyResponse {
    /// `"real"` when an actual call was placed
    mode: String,
    /// Provider call identifier
    #[serde(default)]
    sid: Option<String>,
}

/// Telephony endpoint request
#[derive(Debug, Serialize)]
struct TelephonyRequest<'a> {
    to: &'a str,
    message: &'a str,
}

/// Dispatches parsed action commands to their external effects
pub struct CommandDispatcher {
    config: DispatchConfig,
    contacts: ContactDirectory,
    opener: Arc<dyn LinkOpener>,
    effects: mpsc::UnboundedSender<Effect>,
    http: reqwest::Client,
    cancel: CancellationToken,
}

impl CommandDispatcher {
    /// Create a dispatcher
    ///
    /// Effects are emitted through `effects`; delayed work is cancelled when
    /// `cancel` fires (session teardown).
    #[must_use]
    pub fn new(
        config: DispatchConfig,
        contacts: ContactDirectory,
        opener: Arc<dyn LinkOpener>,
        effects: mpsc::UnboundedSender<Effect>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            contacts,
            opener,
            effects,
            http: reqwest::Client::new(),
            cancel,
        }
    }

    /// Cancel all pending delayed effects
    pub fn cancel_pending(&self) {
        self.cancel.cancel();
    }

    /// Dispatch one command, fire-and-forget
    ///
    /// Commands are at-most-once: the caller invokes this once per completed
    /// turn. Dispatch failures never propagate — they fall back to the
    /// simulated presentation or a navigation signal.
    pub fn dispatch(&self, command: ActionCommand) {
        match command {
            ActionCommand::Whatsapp { contact, message } => {
                self.dispatch_whatsapp(contact, &message);
            }
            ActionCommand::Call { contact, context } => {
                self.dispatch_call(contact, context);
            }
        }
    }

    fn dispatch_whatsapp(&self, contact: String, message: &str) {
        let Some(resolved) = self.contacts.resolve(&contact) else {
            tracing::warn!(contact, "contact not found, signaling contacts screen");
            self.navigate_to_contacts_after(self.config.whatsapp_delay);
            return;
        };

        let raw = if resolved.whatsapp.is_empty() {
            &resolved.phone
        } else {
            &resolved.whatsapp
        };
        let number = normalize_phone(raw, &self.config.default_country_code);
        let url = wa_me_url(&number, message);

        let opener = Arc::clone(&self.opener);
        let effects = self.effects.clone();
        let cancel = self.cancel.clone();
        let delay = self.config.whatsapp_delay;
        let name = resolved.name;

        tracing::info!(contact = %name, "opening messaging link after confirmation delay");
        tokio::spawn(async move {
            if !sleep_unless_cancelled(delay, &cancel).await {
                tracing::debug!("messaging dispatch cancelled before firing");
                return;
            }
            match opener.open(&url).await {
                Ok(()) => {
                    let _ = effects.send(Effect::MessagingLinkOpened { contact: name, url });
                }
                Err(e) => tracing::warn!(error = %e, "failed to open messaging link"),
            }
        });
    }

    fn dispatch_call(&self, contact: String, context: Option<String>) {
        let Some(resolved) = self.contacts.resolve(&contact) else {
            tracing::warn!(contact, "contact not found, signaling contacts screen");
            self.navigate_to_contacts_after(self.config.whatsapp_delay);
            return;
        };

        let raw = if resolved.phone.is_empty() {
            &resolved.whatsapp
        } else {
            &resolved.phone
        };
        let number = normalize_phone(raw, &self.config.default_country_code);
        let name = resolved.name;

        // The calling presentation starts immediately; only the outcome is
        // delayed
        let _ = self.effects.send(Effect::Call(CallState::Dialing {
            contact: name.clone(),
        }));

        let effects = self.effects.clone();
        let cancel = self.cancel.clone();
        let connect_delay = self.config.call_connect_delay;
        let upsell_delay = self.config.call_upsell_delay;
        let endpoint = self.config.telephony_endpoint.clone();
        let http = self.http.clone();

        tokio::spawn(async move {
            let message = context.unwrap_or_else(|| DEFAULT_CALL_MESSAGE.to_string());

            if let Some(endpoint) = endpoint {
                match place_call(&http, &endpoint, &number, &message).await {
                    Ok(response) if response.mode == "real" => {
                        tracing::info!(
                            contact = %name,
                            sid = response.sid.as_deref().unwrap_or(""),
                            "telephony endpoint placed a real call"
                        );
                        let _ = effects.send(Effect::Call(CallState::Connected {
                            contact: name,
                            simulated: false,
                        }));
                        return;
                    }
                    Ok(response) => {
                        tracing::info!(mode = %response.mode, "telephony endpoint in simulation mode");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "telephony dispatch failed, falling back to simulation");
                    }
                }
            }

            // Deterministic simulated progression, ending in the upsell
            if !sleep_unless_cancelled(connect_delay, &cancel).await {
                let _ = effects.send(Effect::Call(CallState::Ended));
                return;
            }
            let _ = effects.send(Effect::Call(CallState::Connected {
                contact: name,
                simulated: true,
            }));

            if !sleep_unless_cancelled(upsell_delay, &cancel).await {
                let _ = effects.send(Effect::Call(CallState::Ended));
                return;
            }
            let _ = effects.send(Effect::Call(CallState::PremiumUpsell {
                feature: CALL_FEATURE_NAME.to_string(),
            }));
            let _ = effects.send(Effect::Call(CallState::Ended));
        });
    }

    fn navigate_to_contacts_after(&self, delay: Duration) {
        let effects = self.effects.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if sleep_unless_cancelled(delay, &cancel).await {
                let _ = effects.send(Effect::Navigate {
                    view: "family".to_string(),
                });
            }
        });
    }
}

/// Sleep for `delay`, returning false if cancelled first
async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// POST `{to, message}` to the telephony endpoint
async fn place_call(
    http: &reqwest::Client,
    endpoint: &str,
    to: &str,
    message: &str,
) -> Result<TelephonyResponse> {
    let response = http
        .post(endpoint)
        .json(&TelephonyRequest { to, message })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Command(format!(
            "telephony endpoint error {status}: {body}"
        )));
    }

    Ok(response.json().await?)
}

/// Normalize a phone number for dispatch
///
/// Strips everything but digits and `+`; a number without a leading `+` gets
/// the configured default country code. Applied identically for messaging
/// and calling.
#[must_use]
pub fn normalize_phone(raw: &str, default_country_code: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    if cleaned.starts_with('+') {
        cleaned
    } else {
        format!("+{default_country_code}{cleaned}")
    }
}

/// Build the messaging deep link for a normalized number
#[must_use]
pub fn wa_me_url(number: &str, message: &str) -> String {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    format!("https://wa.me/{digits}?text={}", urlencoding::encode(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_formatting_and_keeps_plus() {
        assert_eq!(normalize_phone("+55 (11) 91234-5678", "55"), "+5511912345678");
    }

    #[test]
    fn normalize_prepends_country_code_without_plus() {
        assert_eq!(normalize_phone("11 91234-5678", "55"), "+5511912345678");
    }

    #[test]
    fn normalize_uses_configured_country_code() {
        assert_eq!(normalize_phone("7911123456", "44"), "+447911123456");
    }

    #[test]
    fn wa_me_url_is_digits_plus_encoded_text() {
        let url = wa_me_url("+5511912345678", "oi, tudo bem?");
        assert_eq!(
            url,
            "https://wa.me/5511912345678?text=oi%2C%20tudo%20bem%3F"
        );
    }
}
