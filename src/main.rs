use anyhow::{Context, Result};
use clap::Parser;
use convo_stream::{Config, SessionConfig, SessionEvent, StreamSession, TranscriptUpdate};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Live spoken conversation client: stream the microphone up, get
/// transcript text and synthesized speech back.
#[derive(Debug, Parser)]
#[command(name = "convo-stream")]
struct Args {
    /// Conversation to attach to (generated when omitted)
    #[arg(long)]
    conversation_id: Option<String>,

    /// Model tier
    #[arg(long, default_value = "free")]
    model: String,

    /// Accent/locale for synthesis
    #[arg(long, default_value = "American English")]
    accent: String,

    /// Output volume (0.0 - 1.0)
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Where to write utterance audio artifacts
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Config file (without extension)
    #[arg(long, default_value = "config/convo-stream")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} starting", cfg.service.name);

    let mut session_config = SessionConfig {
        model: args.model,
        accent: args.accent,
        output_volume: args.volume,
        sample_rate: cfg.audio.sample_rate,
        text_url: cfg.channels.text_url,
        tts_url: cfg.channels.tts_url,
        upload_url: cfg.channels.upload_url,
        ..SessionConfig::default()
    };
    if let Some(id) = args.conversation_id {
        session_config.conversation_id = id;
    }

    info!("conversation: {}", session_config.conversation_id);

    let (session, mut events) = StreamSession::open(session_config)
        .await
        .context("Failed to open streaming session")?;

    if let Err(e) = session.start_mic().await {
        session.close().await;
        return Err(e).context("Failed to start microphone");
    }

    let output_dir = args.output_dir;
    let printer = tokio::spawn(async move {
        let mut utterance = 0usize;
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Transcript(TranscriptUpdate::Interim { text, .. }) => {
                    print!("\r{}", text);
                    std::io::stdout().flush().ok();
                }
                SessionEvent::Transcript(TranscriptUpdate::Final { text, .. }) => {
                    println!("\n{}", text);
                }
                SessionEvent::PlaybackStarted => info!("playback started"),
                SessionEvent::PlaybackEnded => info!("playback ended"),
                SessionEvent::ArtifactReady(audio) => {
                    utterance += 1;
                    if let Some(dir) = &output_dir {
                        let ext = if audio.mime.contains("wav") { "wav" } else { "mp3" };
                        let path = dir.join(format!("utterance-{:03}.{}", utterance, ext));
                        match std::fs::write(&path, &audio.bytes) {
                            Ok(()) => info!("wrote {} ({} bytes)", path.display(), audio.bytes.len()),
                            Err(e) => warn!("failed to write {}: {}", path.display(), e),
                        }
                    }
                }
                SessionEvent::ChannelError { kind, message } => {
                    warn!("{} channel error: {}", kind, message);
                }
            }
        }
    });

    println!("recording; 'stop' ends the segment, 'quit' or Ctrl-C exits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "stop" => {
                        if let Err(e) = session.stop_segment().await {
                            warn!("stop failed: {}", e);
                        }
                    }
                    "quit" => break,
                    other => {
                        if let Ok(v) = other.parse::<f32>() {
                            session.set_volume(v);
                        }
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin error: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = session.stop_segment().await;
    session.stop_mic().await;

    let transcript = session.transcript().await;

    session.close().await;
    printer.abort();

    if !transcript.finals.is_empty() {
        println!("\ntranscript: {}", transcript.finals);
    }

    Ok(())
}
