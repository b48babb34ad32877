//! Session orchestration
//!
//! The orchestrator owns the one live session and everything attached to it:
//! the capture pipeline, the playback scheduler, the transcript aggregator,
//! and the command dispatcher. App and voice state are explicit finite-state
//! machines; UI layers observe transitions through a broadcast channel
//! instead of reaching into session internals.

pub mod protocol;
pub mod transcript;
pub mod transport;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::audio::capture::AudioCapture;
use crate::audio::codec::{decode_audio_clip, decode_base64};
use crate::audio::playback::{AudioPlayback, PlaybackEvent};
use crate::command::dispatch::{CommandDispatcher, Effect, LinkOpener};
use crate::command::extract_command;
use crate::config::{Config, PLAYBACK_SAMPLE_RATE};
use crate::contacts::ContactDirectory;
use crate::persona;
use crate::store::KeyValueStore;
use crate::{Error, Result};

pub use transcript::TurnAggregator;
pub use transport::{LiveTransport, SessionHandle, SessionState, TransportEvent};

/// Capacity of the assistant command queue
const COMMAND_QUEUE: usize = 8;

/// Capacity of the transport event queue
const TRANSPORT_QUEUE: usize = 32;

/// App-level power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    /// Resting state; no session resources are held
    #[default]
    Sleeping,
    /// A voice session is live (or starting)
    Active,
}

/// Visual state of the voice interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    /// Nothing is happening
    #[default]
    Idle,
    /// The user is speaking
    Listening,
    /// Response audio is playing
    Speaking,
    /// The model turn has begun but no audio has started yet
    Thinking,
}

/// Explicit state machine for the app/voice states
///
/// Transitions are the only mutation path; observers are notified by the
/// orchestrator, keeping state changes decoupled from any UI framework.
#[derive(Debug, Default)]
pub struct StateMachine {
    app: AppState,
    voice: VoiceState,
}

impl StateMachine {
    /// Create a machine in the sleeping/idle state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current app state
    #[must_use]
    pub const fn app(&self) -> AppState {
        self.app
    }

    /// Current voice state
    #[must_use]
    pub const fn voice(&self) -> VoiceState {
        self.voice
    }

    /// Enter `Active`; returns false when already active (the caller must
    /// stop instead — the single-session invariant)
    pub fn wake(&mut self) -> bool {
        if self.app == AppState::Active {
            return false;
        }
        self.app = AppState::Active;
        true
    }

    /// Enter `Sleeping`, resetting the voice state
    ///
    /// Returns true when the transition changed anything.
    pub fn sleep(&mut self) -> bool {
        let changed = self.app != AppState::Sleeping || self.voice != VoiceState::Idle;
        self.app = AppState::Sleeping;
        self.voice = VoiceState::Idle;
        changed
    }

    /// Set the voice state; returns true on change
    pub fn set_voice(&mut self, voice: VoiceState) -> bool {
        if self.voice == voice {
            return false;
        }
        self.voice = voice;
        true
    }
}

/// Events broadcast to observers (UI layers)
#[derive(Debug, Clone)]
pub enum AssistantEvent {
    /// App state transition
    AppStateChanged(AppState),
    /// Voice state transition
    VoiceStateChanged(VoiceState),
    /// The in-progress user turn grew
    UserTurnUpdated(String),
    /// The in-progress model turn grew
    ModelTurnUpdated(String),
    /// A turn completed and the buffers were flushed
    TurnCompleted,
    /// A session-level error the user should see
    SessionError(String),
    /// A dispatch side effect fired
    Effect(Effect),
}

/// Commands accepted by the orchestrator loop
#[derive(Debug, Clone, Copy)]
enum AssistantCommand {
    Toggle,
    Stop,
    Shutdown,
}

/// Clonable handle for driving the orchestrator from other tasks
#[derive(Clone)]
pub struct AssistantHandle {
    commands: mpsc::Sender<AssistantCommand>,
}

impl AssistantHandle {
    /// Toggle the voice session: start when sleeping, full stop when active
    pub async fn toggle(&self) {
        let _ = self.commands.send(AssistantCommand::Toggle).await;
    }

    /// Stop the voice session if one is live
    pub async fn stop(&self) {
        let _ = self.commands.send(AssistantCommand::Stop).await;
    }

    /// Stop and exit the orchestrator loop
    pub async fn shutdown(&self) {
        let _ = self.commands.send(AssistantCommand::Shutdown).await;
    }
}

/// Everything owned by one live voice session
///
/// All mutable session resources live here so teardown is a single
/// authoritative walk over the fields in a fixed order.
pub struct VoiceSessionContext {
    /// The live connection; `None` once closed
    pub session: Option<SessionHandle>,
    /// Microphone capture pipeline
    pub capture: AudioCapture,
    /// Playback scheduler and output stream
    pub playback: AudioPlayback,
    /// Turn/transcript accumulation
    pub aggregator: TurnAggregator,
    /// Command dispatcher scoped to this session
    pub dispatcher: CommandDispatcher,
    /// Cancels pending dispatch timers on teardown
    cancel: CancellationToken,
}

impl VoiceSessionContext {
    /// Assemble a session context from its parts
    ///
    /// `cancel` must be the token the dispatcher's delayed effects run under,
    /// so that [`VoiceSessionContext::dispose`] can cancel them.
    #[must_use]
    pub fn new(
        session: Option<SessionHandle>,
        capture: AudioCapture,
        playback: AudioPlayback,
        aggregator: TurnAggregator,
        dispatcher: CommandDispatcher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            capture,
            playback,
            aggregator,
            dispatcher,
            cancel,
        }
    }

    /// Tear down every session resource, in order
    ///
    /// Order matters: the session is closed before local resources are
    /// detached so late transport callbacks cannot observe torn-down state,
    /// then input tracks, the capture node, active playback sources, and the
    /// accumulators. Idempotent — each step tolerates having already run,
    /// and cleanup failures are swallowed.
    pub async fn dispose(&mut self) {
        self.cancel.cancel();

        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.capture.stop();
        self.playback.stop_all();
        self.playback.stop();
        self.aggregator.reset();
    }
}

/// The session orchestrator
pub struct VoiceAssistant {
    config: Config,
    contacts: ContactDirectory,
    opener: Arc<dyn LinkOpener>,
    state: StateMachine,
    context: Option<VoiceSessionContext>,

    events: broadcast::Sender<AssistantEvent>,

    commands_tx: mpsc::Sender<AssistantCommand>,
    commands_rx: Option<mpsc::Receiver<AssistantCommand>>,
    transport_tx: mpsc::Sender<TransportEvent>,
    transport_rx: Option<mpsc::Receiver<TransportEvent>>,
    playback_tx: mpsc::UnboundedSender<PlaybackEvent>,
    playback_rx: Option<mpsc::UnboundedReceiver<PlaybackEvent>>,
    effects_tx: mpsc::UnboundedSender<Effect>,
    effects_rx: Option<mpsc::UnboundedReceiver<Effect>>,
}

impl VoiceAssistant {
    /// Create an orchestrator over the injected collaborators
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn KeyValueStore>, opener: Arc<dyn LinkOpener>) -> Self {
        let (events, _) = broadcast::channel(64);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_QUEUE);
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (effects_tx, effects_rx) = mpsc::unbounded_channel();

        Self {
            config,
            contacts: ContactDirectory::new(store),
            opener,
            state: StateMachine::new(),
            context: None,
            events,
            commands_tx,
            commands_rx: Some(commands_rx),
            transport_tx,
            transport_rx: Some(transport_rx),
            playback_tx,
            playback_rx: Some(playback_rx),
            effects_tx,
            effects_rx: Some(effects_rx),
        }
    }

    /// Subscribe to state transitions and effects
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.events.subscribe()
    }

    /// Handle for driving the orchestrator from other tasks
    #[must_use]
    pub fn handle(&self) -> AssistantHandle {
        AssistantHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Current app state
    #[must_use]
    pub const fn app_state(&self) -> AppState {
        self.state.app()
    }

    /// Current voice state
    #[must_use]
    pub const fn voice_state(&self) -> VoiceState {
        self.state.voice()
    }

    /// Run the orchestrator event loop until shutdown
    ///
    /// All session-state mutation happens on this loop; audio threads and the
    /// socket task only communicate through the channels drained here.
    pub async fn run(mut self) {
        let (Some(mut commands), Some(mut transport), Some(mut playback), Some(mut effects)) = (
            self.commands_rx.take(),
            self.transport_rx.take(),
            self.playback_rx.take(),
            self.effects_rx.take(),
        ) else {
            return;
        };

        tracing::info!("assistant ready");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(AssistantCommand::Toggle) => self.toggle().await,
                    Some(AssistantCommand::Stop) => self.stop().await,
                    Some(AssistantCommand::Shutdown) | None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(event) = transport.recv() => self.on_transport_event(event).await,
                Some(event) = playback.recv() => self.on_playback_event(event),
                Some(effect) = effects.recv() => self.on_effect(effect),
            }
        }
        tracing::info!("assistant stopped");
    }

    /// Toggle the voice session
    ///
    /// Starting while already active performs a full stop instead of a second
    /// connect: there is never more than one live session.
    async fn toggle(&mut self) {
        if self.state.app() == AppState::Active {
            tracing::info!("toggle while active: stopping session");
            self.stop().await;
            return;
        }

        self.state.wake();
        self.emit(AssistantEvent::AppStateChanged(AppState::Active));

        match self.try_start() {
            Ok(context) => {
                self.context = Some(context);
                tracing::info!("voice session starting");
            }
            Err(e) => {
                tracing::error!(error = %e, "voice session failed to start");
                self.emit(AssistantEvent::SessionError(e.to_string()));
                self.stop().await;
            }
        }
    }

    /// Build the session context: playback, capture, transport, dispatcher
    fn try_start(&mut self) -> Result<VoiceSessionContext> {
        // Microphone availability is fatal to session start, and better
        // surfaced before connecting than after
        probe_microphone()?;
        let capture = AudioCapture::new(self.config.audio.capture_options());

        let mut playback = AudioPlayback::new(
            PLAYBACK_SAMPLE_RATE,
            self.config.audio.output_device.clone(),
        );
        playback.start(self.playback_tx.clone())?;

        let instruction = persona::system_instruction(self.config.system_instruction.as_deref());
        let session =
            LiveTransport::connect(&self.config.live, instruction, self.transport_tx.clone())?;

        let cancel = CancellationToken::new();
        let dispatcher = CommandDispatcher::new(
            self.config.dispatch.clone(),
            self.contacts.clone(),
            Arc::clone(&self.opener),
            self.effects_tx.clone(),
            cancel.clone(),
        );

        Ok(VoiceSessionContext {
            session: Some(session),
            capture,
            playback,
            aggregator: TurnAggregator::new(),
            dispatcher,
            cancel,
        })
    }

    /// Stop and clear the live session, falling back to sleeping
    ///
    /// Safe to call redundantly from every teardown trigger: explicit stop,
    /// transport error, remote close, and shutdown.
    async fn stop(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.dispose().await;
        }
        if self.state.sleep() {
            self.emit(AssistantEvent::VoiceStateChanged(VoiceState::Idle));
            self.emit(AssistantEvent::AppStateChanged(AppState::Sleeping));
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_session_open().await,
            TransportEvent::Event(server_event) => {
                if let Some(content) = server_event.server_content.clone() {
                    self.on_server_content(&content);
                }
                if let Some(data) = server_event.audio_data() {
                    self.play_audio_chunk(data);
                }
            }
            TransportEvent::TransportError(message) => {
                // Transport failures are never retried automatically
                tracing::error!(error = %message, "transport error, tearing down");
                self.emit(AssistantEvent::SessionError(format!("voice error: {message}")));
                self.stop().await;
            }
            TransportEvent::Closed => {
                // Remote close while we still hold a context is a teardown
                // trigger; after a local stop the context is already gone
                if self.context.is_some() {
                    tracing::info!("session closed remotely");
                    self.stop().await;
                }
            }
        }
    }

    /// The connection resolved: wire capture output into the transport
    async fn on_session_open(&mut self) {
        let wiring = self.context.as_mut().and_then(|context| {
            let frames = context.session.as_ref()?.frame_sender();
            let gate = context.playback.active_flag();
            Some(context.capture.start(frames, gate))
        });

        match wiring {
            Some(Ok(())) => self.set_voice(VoiceState::Listening),
            Some(Err(e)) => {
                tracing::error!(error = %e, "capture failed to start");
                self.emit(AssistantEvent::SessionError(e.to_string()));
                self.stop().await;
            }
            None => {}
        }
    }

    fn on_server_content(&mut self, content: &protocol::ServerContent) {
        if self.context.is_none() {
            return;
        }

        if content.interrupted {
            // Barge-in: hard-stop playback, discard the partial turn, no
            // command extraction
            if let Some(context) = self.context.as_mut() {
                context.playback.stop_all();
                context.aggregator.interrupt();
            }
            self.set_voice(VoiceState::Idle);
            return;
        }

        if let Some(delta) = &content.output_transcription {
            let update = self.context.as_mut().map(|context| {
                context.aggregator.push_model(&delta.text);
                (
                    context.aggregator.model_turn().to_string(),
                    context.playback.active_sources() == 0,
                )
            });
            if let Some((turn, no_audio_yet)) = update {
                self.emit(AssistantEvent::ModelTurnUpdated(turn));
                if no_audio_yet && self.state.voice() != VoiceState::Speaking {
                    self.set_voice(VoiceState::Thinking);
                }
            }
        }

        if let Some(delta) = &content.input_transcription {
            let turn = self.context.as_mut().map(|context| {
                context.aggregator.push_user(&delta.text);
                context.aggregator.user_turn().to_string()
            });
            if let Some(turn) = turn {
                self.emit(AssistantEvent::UserTurnUpdated(turn));
                self.set_voice(VoiceState::Listening);
            }
        }

        if content.turn_complete {
            // The sole moment extraction runs; buffers flush right after
            let drained = self.context.as_mut().map(|context| {
                let completed = context.aggregator.complete_turn();
                if let Some(command) = extract_command(&completed) {
                    context.dispatcher.dispatch(command);
                }
                context.playback.active_sources() == 0
            });
            if let Some(drained) = drained {
                self.emit(AssistantEvent::TurnCompleted);
                if drained {
                    self.set_voice(VoiceState::Idle);
                }
            }
        }
    }

    /// Decode and schedule one streamed audio chunk
    fn play_audio_chunk(&mut self, data: &str) {
        let Some(context) = self.context.as_ref() else {
            return;
        };

        match decode_base64(data)
            .and_then(|bytes| decode_audio_clip(&bytes, PLAYBACK_SAMPLE_RATE, 1))
        {
            Ok(clip) => {
                let start = context.playback.enqueue(&clip);
                tracing::trace!(
                    start_secs = start,
                    duration_secs = clip.duration_secs(),
                    "scheduled response chunk"
                );
            }
            // Malformed audio reflects endpoint output quality, not a
            // session failure
            Err(e) => tracing::warn!(error = %e, "dropping malformed audio chunk"),
        }
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started => self.set_voice(VoiceState::Speaking),
            PlaybackEvent::Drained => {
                // Leave speaking only when no session is open, to avoid
                // flicker between chunk bursts mid-turn
                let session_open = self
                    .context
                    .as_ref()
                    .and_then(|c| c.session.as_ref())
                    .is_some_and(SessionHandle::is_open);
                if !session_open {
                    self.set_voice(VoiceState::Idle);
                }
            }
        }
    }

    fn on_effect(&mut self, effect: Effect) {
        tracing::debug!(effect = ?effect, "dispatch effect");
        self.emit(AssistantEvent::Effect(effect));
    }

    fn set_voice(&mut self, voice: VoiceState) {
        if self.state.set_voice(voice) {
            self.emit(AssistantEvent::VoiceStateChanged(voice));
        }
    }

    fn emit(&self, event: AssistantEvent) {
        // No subscribers is fine; the broadcast is observability, not control
        let _ = self.events.send(event);
    }
}

/// Probe that a usable input device exists before starting a session
///
/// # Errors
///
/// Returns `Error::Audio` when no input device is available
pub fn probe_microphone() -> Result<()> {
    use cpal::traits::HostTrait;
    cpal::default_host()
        .default_input_device()
        .map(|_| ())
        .ok_or_else(|| Error::Audio("no input device available".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_starts_sleeping_and_idle() {
        let machine = StateMachine::new();
        assert_eq!(machine.app(), AppState::Sleeping);
        assert_eq!(machine.voice(), VoiceState::Idle);
    }

    #[test]
    fn wake_refuses_a_second_session() {
        let mut machine = StateMachine::new();
        assert!(machine.wake());
        assert!(!machine.wake(), "second wake must be refused");
        assert_eq!(machine.app(), AppState::Active);
    }

    #[test]
    fn sleep_resets_voice_state() {
        let mut machine = StateMachine::new();
        machine.wake();
        machine.set_voice(VoiceState::Speaking);
        assert!(machine.sleep());
        assert_eq!(machine.app(), AppState::Sleeping);
        assert_eq!(machine.voice(), VoiceState::Idle);
    }

    #[test]
    fn sleep_is_idempotent() {
        let mut machine = StateMachine::new();
        machine.wake();
        assert!(machine.sleep());
        assert!(!machine.sleep(), "second sleep should change nothing");
    }

    #[test]
    fn set_voice_reports_changes_only() {
        let mut machine = StateMachine::new();
        assert!(machine.set_voice(VoiceState::Listening));
        assert!(!machine.set_voice(VoiceState::Listening));
        assert!(machine.set_voice(VoiceState::Speaking));
    }
}
