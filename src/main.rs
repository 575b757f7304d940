use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use s2s_link::audio::{
    CapturePipeline, ChunkSink, MicrophoneInput, PLAYBACK_SAMPLE_RATE, PlaybackPipeline,
    samples_to_pcm16,
};
use s2s_link::protocol::AudioChunk;
use s2s_link::{Config, EventKind, ListenOptions, Session, SessionEvent, codec};

/// s2s-link - Real-time client for speech-to-speech services
#[derive(Parser)]
#[command(name = "s2s-link", version, about)]
struct Cli {
    /// Service endpoint (overrides config file and `S2S_ENDPOINT`)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Config file (defaults to the standard config location)
    #[arg(short, long, env = "S2S_CONFIG")]
    config: Option<PathBuf>,

    /// Recognition language (e.g. "en")
    #[arg(short, long)]
    language: Option<String>,

    /// Do not reconnect after the connection drops
    #[arg(long)]
    no_reconnect: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and stream the microphone (default)
    Run {
        /// Connect without starting a listening turn
        #[arg(long)]
        no_listen: bool,
    },
    /// Test microphone capture
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,s2s_link=info",
        1 => "info,s2s_link=debug",
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
    let mut config = Config::load(cli.config.as_deref())?;

    // Command-line flags take precedence over file and environment
    if let Some(endpoint) = cli.endpoint {
        config.session.endpoint = endpoint;
    }
    if let Some(language) = cli.language {
        config.language = Some(language);
    }
    if cli.no_reconnect {
        config.session.auto_reconnect = false;
    }
    config.validate()?;

    match cli.command {
        Some(Command::TestMic { duration }) => test_mic(&config, duration).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        Some(Command::Run { no_listen }) => run_session(config, !no_listen).await,
        None => run_session(config, true).await,
    }
}

/// Connect, listen, and log the conversation until Ctrl-C
async fn run_session(config: Config, listen: bool) -> anyhow::Result<()> {
    let endpoint = config.session.endpoint.clone();
    let auto_reconnect = config.session.auto_reconnect;

    let session = Session::builder(config.session)
        .audio_config(config.audio)
        .build();

    log_conversation(&session);

    let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
    session.on(EventKind::Connected, move |_| {
        let _ = connected_tx.send(());
    });

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let failed_tx = ended_tx.clone();
    session.on(EventKind::ReconnectFailed, move |_| {
        let _ = failed_tx.send(());
    });
    if !auto_reconnect {
        session.on(EventKind::Disconnected, move |_| {
            let _ = ended_tx.send(());
        });
    }

    tracing::info!(endpoint = %endpoint, listen, "starting s2s link");
    session.connect().await;
    if !auto_reconnect && !session.is_open() {
        anyhow::bail!("could not connect to {endpoint}");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("disconnect requested");
                break;
            }
            Some(()) = connected_rx.recv() => {
                if let Some(language) = &config.language {
                    session.set_language(language);
                }
                if listen {
                    let options = ListenOptions {
                        language: config.language.clone(),
                        ..ListenOptions::default()
                    };
                    if let Err(e) = session.start_listening(options) {
                        tracing::warn!(error = %e, "listening unavailable, continuing without microphone");
                    }
                }
            }
            Some(()) = ended_rx.recv() => {
                session.disconnect();
                anyhow::bail!("connection to {endpoint} lost");
            }
        }
    }

    if session.is_capturing() {
        session.stop_listening();
    }
    session.disconnect();
    Ok(())
}

fn log_conversation(session: &Session) {
    session.on(EventKind::Transcription, |event| {
        if let SessionEvent::Transcription(data) = event {
            tracing::info!(text = text_of(data), "heard");
        }
    });
    session.on(EventKind::Response, |event| {
        if let SessionEvent::Response(data) = event {
            tracing::info!(text = text_of(data), "response");
        }
    });
    session.on(EventKind::StatusUpdate, |event| {
        if let SessionEvent::StatusUpdate(data) = event {
            tracing::debug!(status = %data, "service status");
        }
    });
    session.on(EventKind::Error, |event| {
        if let SessionEvent::Error(report) = event {
            tracing::warn!(kind = ?report.kind, details = ?report.details, "{}", report.message);
        }
    });
    session.on(EventKind::Reconnecting, |event| {
        if let SessionEvent::Reconnecting {
            attempt,
            max_attempts,
        } = event
        {
            tracing::warn!("connection lost, reconnecting ({attempt}/{max_attempts})");
        }
    });
}

fn text_of(data: &Value) -> &str {
    data.get("text").and_then(Value::as_str).unwrap_or_default()
}

/// Test microphone capture through the chunk pipeline
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let chunks = Arc::new(AtomicUsize::new(0));
    let bytes = Arc::new(AtomicUsize::new(0));
    let sink: ChunkSink = {
        let chunks = Arc::clone(&chunks);
        let bytes = Arc::clone(&bytes);
        Arc::new(move |chunk: Vec<u8>| {
            chunks.fetch_add(1, Ordering::Relaxed);
            bytes.fetch_add(chunk.len(), Ordering::Relaxed);
        })
    };

    let mut capture = CapturePipeline::new(Box::new(MicrophoneInput::new()));
    capture.start(&config.audio, sink)?;

    println!(
        "Format: {} @ {} Hz, {} channel(s)",
        config.audio.format, config.audio.sample_rate, config.audio.channels
    );
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let count = chunks.swap(0, Ordering::Relaxed);
        let size = bytes.swap(0, Ordering::Relaxed);
        println!("[{:2}s] chunks: {count} | bytes: {size}", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("About 10 chunks per second means capture is working.");
    println!("If no chunks arrived, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output through the playback pipeline
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let duration_secs = 2_u32;
    let num_samples = PLAYBACK_SAMPLE_RATE * duration_secs;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let chunk = AudioChunk {
        audio: codec::encode(&samples_to_pcm16(&samples)),
        format: Some("pcm16".to_string()),
        sample_rate: Some(PLAYBACK_SAMPLE_RATE),
        channels: Some(1),
        is_last: Some(true),
    };

    println!("Playing {num_samples} samples at {PLAYBACK_SAMPLE_RATE} Hz...");

    let mut playback = PlaybackPipeline::speaker();
    playback.handle_chunk(&chunk)?;
    tokio::time::sleep(Duration::from_secs(u64::from(duration_secs)) + Duration::from_millis(300))
        .await;
    playback.close();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
