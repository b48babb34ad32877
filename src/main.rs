use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use hearth_gateway::command::dispatch::SystemOpener;
use hearth_gateway::config::PLAYBACK_SAMPLE_RATE;
use hearth_gateway::{
    AssistantEvent, AudioCapture, AudioPlayback, ChatClient, CommandDispatcher, Config,
    ContactDirectory, JsonFileStore, VoiceAssistant, decode_base64,
};

/// Hearth - realtime voice-session gateway for a home assistant
#[derive(Parser)]
#[command(name = "hearth", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive voice assistant
    Run,
    /// Send one message through the text chat surface
    Chat {
        /// The message to send
        message: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        out: Option<std::path::PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,hearth_gateway=info",
        1 => "info,hearth_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        None | Some(Command::Run) => run_assistant().await,
        Some(Command::Chat { message }) => run_chat(&message).await,
        Some(Command::TestMic { duration, out }) => test_mic(duration, out).await,
        Some(Command::TestSpeaker) => test_speaker().await,
    }
}

/// Interactive loop: Enter toggles the voice session, Ctrl-C exits
async fn run_assistant() -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let opener = Arc::new(SystemOpener);

    let assistant = VoiceAssistant::new(config, store, opener);
    let handle = assistant.handle();
    let mut events = assistant.subscribe();

    // Observer: narrate state transitions and effects
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AssistantEvent::AppStateChanged(state)) => {
                    tracing::info!(state = ?state, "app state");
                }
                Ok(AssistantEvent::VoiceStateChanged(state)) => {
                    tracing::info!(state = ?state, "voice state");
                }
                Ok(AssistantEvent::UserTurnUpdated(text)) => {
                    tracing::debug!(text = %text, "user turn");
                }
                Ok(AssistantEvent::ModelTurnUpdated(text)) => {
                    tracing::debug!(text = %text, "model turn");
                }
                Ok(AssistantEvent::TurnCompleted) => {
                    tracing::debug!("turn completed");
                }
                Ok(AssistantEvent::SessionError(message)) => {
                    tracing::warn!(error = %message, "session error");
                }
                Ok(AssistantEvent::Effect(effect)) => {
                    tracing::info!(effect = ?effect, "effect");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event observer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Stdin: Enter toggles, "q" quits
    let toggle_handle = handle.clone();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().eq_ignore_ascii_case("q") {
                toggle_handle.shutdown().await;
                break;
            }
            toggle_handle.toggle().await;
        }
    });

    // Ctrl-C: orderly shutdown
    let interrupt_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_handle.shutdown().await;
        }
    });

    println!("hearth ready - press Enter to toggle the voice session, q or Ctrl-C to exit");
    assistant.run().await;
    Ok(())
}

/// One text-chat round trip, with command dispatch
async fn run_chat(message: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let endpoint = config
        .chat
        .endpoint
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no chat endpoint configured (set HEARTH_CHAT_ENDPOINT)"))?;

    let client = ChatClient::new(endpoint)?;
    let reply = client.send(message).await?;

    if let Some(text) = &reply.text {
        println!("{text}");
    }

    let Some(command) = reply.command else {
        return Ok(());
    };

    // Dispatch the embedded command and narrate its effects until they settle
    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let contacts = ContactDirectory::new(store);
    let (effects_tx, mut effects_rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = tokio_util::sync::CancellationToken::new();
    let dispatcher = CommandDispatcher::new(
        config.dispatch.clone(),
        contacts,
        Arc::new(SystemOpener),
        effects_tx,
        cancel.clone(),
    );

    dispatcher.dispatch(command);

    let settle = config.dispatch.whatsapp_delay
        + config.dispatch.call_connect_delay
        + config.dispatch.call_upsell_delay
        + Duration::from_millis(500);
    let deadline = tokio::time::Instant::now() + settle;
    while let Ok(Some(effect)) =
        tokio::time::timeout_at(deadline, effects_rx.recv()).await
    {
        println!("-> {effect:?}");
    }
    cancel.cancel();
    Ok(())
}

/// Capture from the microphone, report levels, optionally dump a WAV
async fn test_mic(duration: u64, out: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_else(|_| test_config());
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);

    let mut capture = AudioCapture::new(config.audio.capture_options());
    capture.start(tx, Arc::new(AtomicBool::new(false)))?;
    println!("recording for {duration}s...");

    let mut samples: Vec<i16> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        let bytes = decode_base64(&frame.data)?;
        samples.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
    }
    capture.stop();

    let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
    println!(
        "captured {} samples, peak level {:.1}%",
        samples.len(),
        f64::from(peak) / f64::from(i16::MAX) * 100.0
    );

    if let Some(path) = out {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: hearth_gateway::config::CAPTURE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

/// Play a short sine tone through the playback scheduler
async fn test_speaker() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_else(|_| test_config());
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut playback = AudioPlayback::new(PLAYBACK_SAMPLE_RATE, config.audio.output_device);
    playback.start(events_tx)?;

    let tone: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE)
        .map(|i| {
            let t = f64::from(i) / f64::from(PLAYBACK_SAMPLE_RATE);
            #[allow(clippy::cast_possible_truncation)]
            let sample = (0.3 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as f32;
            sample
        })
        .collect();
    playback.enqueue(&hearth_gateway::AudioClip {
        samples: tone,
        sample_rate: PLAYBACK_SAMPLE_RATE,
        channels: 1,
    });

    println!("playing test tone...");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events_rx.recv()).await {
        if event == hearth_gateway::audio::PlaybackEvent::Drained {
            break;
        }
    }
    playback.stop();
    Ok(())
}

/// Minimal config for hardware tests when no endpoint is configured
fn test_config() -> Config {
    Config {
        live: hearth_gateway::config::LiveConfig {
            endpoint: "wss://unconfigured.invalid/live".to_string(),
            api_key: None,
        },
        audio: hearth_gateway::config::AudioConfig {
            input_device: None,
            output_device: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        },
        dispatch: hearth_gateway::config::DispatchConfig::default(),
        chat: hearth_gateway::config::ChatConfig::default(),
        system_instruction: None,
        data_dir: std::env::temp_dir(),
    }
}
