//! Live transport session
//!
//! Owns the WebSocket connection to the conversational endpoint: connect,
//! send captured audio frames, receive server events, close. The rest of the
//! system only sees [`TransportEvent`]s — nothing else reads the wire.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::capture::AudioFrame;
use crate::config::LiveConfig;
use crate::session::protocol::{ConnectConfig, MediaMessage, ServerEvent};
use crate::{Error, Result};

/// Capacity of the outbound frame queue
///
/// Deliberately small: audio is real-time, so a frame the socket cannot take
/// promptly should be dropped by the capture side, not buffered here.
const FRAME_QUEUE_CAPACITY: usize = 8;

/// Lifecycle state of a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection is resolving
    Connecting,
    /// Socket open, setup sent, frames flowing
    Open,
    /// Closed normally (local stop or remote close)
    Closed,
    /// Terminated by a transport error
    Errored,
}

/// Lifecycle and content events surfaced to the orchestrator
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection resolved and the setup message was sent
    Opened,
    /// A server event arrived
    Event(ServerEvent),
    /// The transport failed; the session is no longer usable
    TransportError(String),
    /// The connection is closed (local stop, remote close, or after error)
    Closed,
}

/// Handle to one live session
///
/// At most one live instance exists at a time; the orchestrator owns it.
pub struct SessionHandle {
    id: Uuid,
    created_at: DateTime<Utc>,
    frames: mpsc::Sender<AudioFrame>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    /// Unique session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// When this session was created
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether the session is open for audio
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Transmit one audio frame
    ///
    /// No-op while the connection is still resolving or already closed, and
    /// when the outbound queue is full — real-time audio is never buffered
    /// or retried.
    pub fn send_audio_frame(&self, frame: AudioFrame) {
        if !self.is_open() {
            tracing::trace!("session not open, dropping audio frame");
            return;
        }
        if self.frames.try_send(frame).is_err() {
            tracing::trace!("outbound frame queue full, dropping audio frame");
        }
    }

    /// Clone of the outbound frame sender, for wiring capture directly
    #[must_use]
    pub fn frame_sender(&self) -> mpsc::Sender<AudioFrame> {
        self.frames.clone()
    }

    /// Request graceful shutdown
    ///
    /// Waits for a still-resolving connection first so a socket that only now
    /// finishes connecting is not leaked. Never fails: close is cleanup code
    /// that may run during error recovery, so failures are logged and
    /// swallowed.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "session task ended abnormally during close");
        }
    }
}

/// Connects live sessions to the conversational endpoint
pub struct LiveTransport;

impl LiveTransport {
    /// Open a live session
    ///
    /// Returns a handle immediately; the connection resolves on a background
    /// task. Lifecycle and content arrive through `events`: `Opened` once the
    /// setup message is sent, `Event` per server message, then exactly one
    /// `Closed` (preceded by `TransportError` on failure).
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint URL is unusable
    pub fn connect(
        config: &LiveConfig,
        system_instruction: String,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<SessionHandle> {
        let url = session_url(config)?;
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let cancel = CancellationToken::new();

        let setup = ConnectConfig::audio(system_instruction);
        let task = tokio::spawn(run_session(
            url,
            setup,
            frames_rx,
            events,
            state_tx,
            cancel.clone(),
        ));

        Ok(SessionHandle {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            frames: frames_tx,
            state: state_rx,
            cancel,
            task,
        })
    }
}

/// Build the connection URL, appending the API key when configured
fn session_url(config: &LiveConfig) -> Result<String> {
    let endpoint = config.endpoint.trim();
    if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
        return Err(Error::Session(format!(
            "live endpoint must be a ws:// or wss:// URL, got '{endpoint}'"
        )));
    }
    Ok(match &config.api_key {
        Some(key) => {
            let sep = if endpoint.contains('?') { '&' } else { '?' };
            format!("{endpoint}{sep}key={key}")
        }
        None => endpoint.to_string(),
    })
}

/// Socket task: resolve the connection, send setup, pump frames and events
async fn run_session(
    url: String,
    setup: ConnectConfig,
    mut frames: mpsc::Receiver<AudioFrame>,
    events: mpsc::Sender<TransportEvent>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
) {
    let connecting = tokio_tungstenite::connect_async(url);
    tokio::pin!(connecting);

    let mut ws = tokio::select! {
        () = cancel.cancelled() => {
            // Stopped before the connection resolved; await resolution so a
            // late-arriving socket is closed, not leaked
            if let Ok((mut ws, _)) = connecting.as_mut().await {
                let _ = ws.close(None).await;
            }
            let _ = state.send(SessionState::Closed);
            let _ = events.send(TransportEvent::Closed).await;
            return;
        }
        result = &mut connecting => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::error!(error = %e, "live connection failed");
                let _ = state.send(SessionState::Errored);
                let _ = events
                    .send(TransportEvent::TransportError(format!("connect: {e}")))
                    .await;
                let _ = events.send(TransportEvent::Closed).await;
                return;
            }
        },
    };

    // One-time connect configuration
    match serde_json::to_string(&setup) {
        Ok(payload) => {
            if let Err(e) = ws.send(Message::Text(payload)).await {
                tracing::error!(error = %e, "failed to send connect configuration");
                let _ = state.send(SessionState::Errored);
                let _ = events
                    .send(TransportEvent::TransportError(format!("setup: {e}")))
                    .await;
                let _ = events.send(TransportEvent::Closed).await;
                return;
            }
        }
        Err(e) => {
            let _ = state.send(SessionState::Errored);
            let _ = events
                .send(TransportEvent::TransportError(format!("setup encode: {e}")))
                .await;
            let _ = events.send(TransportEvent::Closed).await;
            return;
        }
    }

    let _ = state.send(SessionState::Open);
    let _ = events.send(TransportEvent::Opened).await;
    tracing::info!("live session open");

    let mut errored = false;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                if let Err(e) = ws.close(None).await {
                    tracing::debug!(error = %e, "graceful close failed");
                }
                break;
            }
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let message = MediaMessage { media: frame };
                    match serde_json::to_string(&message) {
                        Ok(payload) => {
                            if let Err(e) = ws.send(Message::Text(payload)).await {
                                tracing::error!(error = %e, "failed to send audio frame");
                                errored = true;
                                let _ = events
                                    .send(TransportEvent::TransportError(format!("send: {e}")))
                                    .await;
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to encode audio frame"),
                    }
                }
                // Frame sender dropped without an explicit close: shut down
                None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            let _ = events.send(TransportEvent::Event(event)).await;
                        }
                        // Malformed server payloads reflect endpoint quality,
                        // not a session failure
                        Err(e) => tracing::debug!(error = %e, "unparseable server event"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "remote closed live session");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "live socket error");
                    errored = true;
                    let _ = events
                        .send(TransportEvent::TransportError(e.to_string()))
                        .await;
                    break;
                }
                None => break,
            },
        }
    }

    let _ = state.send(if errored {
        SessionState::Errored
    } else {
        SessionState::Closed
    });
    let _ = events.send(TransportEvent::Closed).await;
    tracing::debug!("live session task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_config(endpoint: &str, api_key: Option<&str>) -> LiveConfig {
        LiveConfig {
            endpoint: endpoint.to_string(),
            api_key: api_key.map(ToString::to_string),
        }
    }

    #[test]
    fn session_url_appends_api_key() {
        let url = session_url(&live_config("wss://host/v1/live", Some("k123"))).unwrap();
        assert_eq!(url, "wss://host/v1/live?key=k123");
    }

    #[test]
    fn session_url_respects_existing_query() {
        let url = session_url(&live_config("wss://host/v1/live?alt=sse", Some("k"))).unwrap();
        assert_eq!(url, "wss://host/v1/live?alt=sse&key=k");
    }

    #[test]
    fn session_url_rejects_non_websocket_scheme() {
        assert!(matches!(
            session_url(&live_config("https://host/v1/live", None)),
            Err(Error::Session(_))
        ));
    }
}
