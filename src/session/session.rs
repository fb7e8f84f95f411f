use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::events::{SessionEvent, TranscriptUpdate, UtteranceAudio};
use super::transcript::{TranscriptSnapshot, TranscriptState};
use crate::capture::{CaptureConfig, MicCapture, CHUNK_MS, PCM_FORMAT};
use crate::channel::{
    await_ready, ChannelKind, TextFrame, TextRequest, TtsControl, TtsRequest, UploadControl,
    WsChannel, WsReader,
};
use crate::playback::{AudioChunk, AudioPlayer, PlayerFactory, RodioPlayerFactory, DEFAULT_MIME};
use crate::{Error, Result};

/// How long a channel handshake may wait for the server's ready frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between the TTS stop frame and the artifact/ended events, so
/// trailing playback can finish.
const GRACE_DELAY: Duration = Duration::from_millis(300);

/// How long close waits for each task before aborting it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Routed {
    Text(TextFrame),
    TextClosed { error: Option<String> },
    TtsControl(TtsControl),
    TtsBinary(Bytes),
    TtsClosed { error: Option<String> },
    UploadBroken { error: String },
    GraceElapsed,
}

enum SessionCmd {
    SetVolume(f32),
    Transcript(oneshot::Sender<TranscriptSnapshot>),
    Close(oneshot::Sender<()>),
}

enum UploadCmd {
    Audio(Bytes),
    Stop,
    Close,
}

/// One live spoken-conversation session.
///
/// Owns the three channels, the microphone, and the active playback
/// strategy; nothing is shared between sessions. Callers construct one per
/// interaction with [`StreamSession::open`] and must call
/// [`StreamSession::close`] (idempotent, never fails) when done.
pub struct StreamSession {
    cmd_tx: mpsc::Sender<SessionCmd>,
    upload_tx: mpsc::Sender<UploadCmd>,
    mic: Arc<Mutex<Option<MicCapture>>>,
    mic_pump: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    sample_rate: u32,
}

impl StreamSession {
    /// Open a session with the default rodio/symphonia playback stack.
    pub async fn open(
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        Self::open_with_factory(config, Arc::new(RodioPlayerFactory)).await
    }

    /// Open a session with a caller-provided playback factory.
    ///
    /// Channels open in a fixed order: text first (so recognition results
    /// always have a consumer), then the optional TTS channel, then upload.
    /// Text or upload failure aborts the open after tearing down whatever
    /// already connected; TTS failure only disables playback.
    pub async fn open_with_factory(
        config: SessionConfig,
        factory: Arc<dyn PlayerFactory>,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        info!("opening session for conversation {}", config.conversation_id);

        let (mut text_channel, mut text_reader) =
            WsChannel::connect(ChannelKind::Text, &config.text_url).await?;
        if let Err(e) = async {
            text_channel
                .send_json(&TextRequest::Subscribe {
                    conversation_id: config.conversation_id.clone(),
                })
                .await?;
            await_ready(ChannelKind::Text, &mut text_reader, HANDSHAKE_TIMEOUT).await
        }
        .await
        {
            text_channel.close().await;
            return Err(e);
        }

        let mut tts = None;
        if let Some(url) = &config.tts_url {
            match open_tts(url, &config.conversation_id).await {
                Ok(pair) => tts = Some(pair),
                Err(e) => warn!("tts channel unavailable, playback disabled: {}", e),
            }
        }

        let upload_channel = match open_upload(&config).await {
            Ok(channel) => channel,
            Err(e) => {
                text_channel.close().await;
                if let Some((mut channel, _)) = tts {
                    channel.close().await;
                }
                return Err(e);
            }
        };

        let (route_tx, route_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (upload_tx, upload_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);

        let mic = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_text_reader(text_reader, route_tx.clone())));

        let tts_channel = match tts {
            Some((channel, reader)) => {
                tasks.push(tokio::spawn(run_tts_reader(reader, route_tx.clone())));
                Some(channel)
            }
            None => None,
        };

        tasks.push(tokio::spawn(run_upload_writer(
            upload_channel,
            upload_rx,
            route_tx.clone(),
        )));

        let dispatch = Dispatch {
            route_rx,
            cmd_rx,
            route_tx,
            event_tx,
            factory,
            text_channel,
            tts_channel,
            upload_tx: upload_tx.clone(),
            mic: mic.clone(),
            player: None,
            player_streaming: false,
            transcript: TranscriptState::default(),
            artifact: Vec::new(),
            mime: DEFAULT_MIME.to_string(),
            volume: config.output_volume.clamp(0.0, 1.0),
            next_seq: 0,
            grace: None,
            torn_down: false,
        };
        tasks.push(tokio::spawn(dispatch.run()));

        info!("session opened");

        Ok((
            Self {
                cmd_tx,
                upload_tx,
                mic,
                mic_pump: Mutex::new(None),
                tasks: Mutex::new(tasks),
                closed,
                sample_rate: config.sample_rate,
            },
            event_rx,
        ))
    }

    /// Start microphone capture and forward chunks to the upload channel.
    ///
    /// Device denial or absence surfaces as [`Error::DeviceAccess`].
    /// Already-running capture is a no-op.
    pub async fn start_mic(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if self.mic.lock().unwrap().is_some() {
            return Ok(());
        }

        let capture_config = CaptureConfig {
            sample_rate: self.sample_rate,
            chunk_ms: CHUNK_MS,
        };
        let (capture, mut chunk_rx) =
            tokio::task::spawn_blocking(move || MicCapture::start(capture_config))
                .await
                .map_err(|e| Error::DeviceAccess(e.to_string()))??;

        *self.mic.lock().unwrap() = Some(capture);

        let upload_tx = self.upload_tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(bytes) = chunk_rx.recv().await {
                // Freshness over completeness: drop when the writer lags.
                let _ = upload_tx.try_send(UploadCmd::Audio(bytes));
            }
        });
        *self.mic_pump.lock().unwrap() = Some(pump);

        info!("microphone capture started");
        Ok(())
    }

    /// Stop microphone capture and release the device. No-op if capture was
    /// never started or already stopped.
    pub async fn stop_mic(&self) {
        let capture = self.mic.lock().unwrap().take();
        if let Some(mut capture) = capture {
            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
            info!("microphone capture stopped");
        }
        if let Some(pump) = self.mic_pump.lock().unwrap().take() {
            pump.abort();
        }
    }

    /// Push one already-encoded audio chunk onto the upload channel.
    ///
    /// Used by the microphone pump and available for custom capture
    /// sources. Silently dropped when the channel is not open.
    pub fn send_audio(&self, bytes: Bytes) {
        let _ = self.upload_tx.try_send(UploadCmd::Audio(bytes));
    }

    /// End the current utterance without closing the upload channel.
    pub async fn stop_segment(&self) -> Result<()> {
        self.upload_tx
            .send(UploadCmd::Stop)
            .await
            .map_err(|_| Error::Closed)
    }

    /// Set the output volume, clamped to [0, 1]. Applies immediately to
    /// live streaming playback and to the next decoded unit in fallback.
    pub fn set_volume(&self, volume: f32) {
        let _ = self
            .cmd_tx
            .try_send(SessionCmd::SetVolume(volume.clamp(0.0, 1.0)));
    }

    /// Snapshot of the accumulated transcript.
    pub async fn transcript(&self) -> TranscriptSnapshot {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(SessionCmd::Transcript(tx)).await.is_ok() {
            if let Ok(snapshot) = rx.await {
                return snapshot;
            }
        }
        TranscriptSnapshot::default()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Close the session: all three channels, the microphone, the playback
    /// strategy, and the output binding. Safe to call any number of times
    /// from any state; every release step runs even if earlier ones fail.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing session");

        self.stop_mic().await;

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(SessionCmd::Close(ack_tx)).await.is_ok() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, ack_rx).await;
        }
        let _ = self.upload_tx.send(UploadCmd::Close).await;

        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }

        info!("session closed");
    }
}

async fn open_tts(url: &str, conversation_id: &str) -> Result<(WsChannel, WsReader)> {
    let (mut channel, mut reader) = WsChannel::connect(ChannelKind::Tts, url).await?;
    let handshake = async {
        channel
            .send_json(&TtsRequest::Start {
                conversation_id: conversation_id.to_string(),
            })
            .await?;
        await_ready(ChannelKind::Tts, &mut reader, HANDSHAKE_TIMEOUT).await
    }
    .await;
    match handshake {
        Ok(()) => Ok((channel, reader)),
        Err(e) => {
            channel.close().await;
            Err(e)
        }
    }
}

async fn open_upload(config: &SessionConfig) -> Result<WsChannel> {
    // The reader half is dropped: the backend closes the upload socket
    // after processing a stop frame, and that close is only meaningful if
    // the mic is still sending (surfaced as a write failure).
    let (mut channel, _reader) = WsChannel::connect(ChannelKind::Upload, &config.upload_url).await?;
    channel
        .send_json(&UploadControl::Start {
            conversation_id: config.conversation_id.clone(),
            model: config.model.clone(),
            accent: config.accent.clone(),
            sample_rate: config.sample_rate,
            format: PCM_FORMAT.to_string(),
            asr_provider: config.asr_provider.clone(),
        })
        .await?;
    Ok(channel)
}

async fn run_text_reader(mut reader: WsReader, route_tx: mpsc::Sender<Routed>) {
    while let Some(msg) = reader.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<TextFrame>(&text) {
                Ok(frame) => {
                    if route_tx.send(Routed::Text(frame)).await.is_err() {
                        return;
                    }
                }
                Err(_) => warn!("text channel sent unrecognized frame: {}", text),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                let _ = route_tx
                    .send(Routed::TextClosed {
                        error: Some(e.to_string()),
                    })
                    .await;
                return;
            }
        }
    }
    let _ = route_tx.send(Routed::TextClosed { error: None }).await;
}

async fn run_tts_reader(mut reader: WsReader, route_tx: mpsc::Sender<Routed>) {
    while let Some(msg) = reader.next().await {
        let routed = match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<TtsControl>(&text) {
                Ok(control) => Routed::TtsControl(control),
                Err(_) => {
                    warn!("tts channel sent unrecognized frame: {}", text);
                    continue;
                }
            },
            Ok(Message::Binary(data)) => Routed::TtsBinary(data),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                let _ = route_tx
                    .send(Routed::TtsClosed {
                        error: Some(e.to_string()),
                    })
                    .await;
                return;
            }
        };
        if route_tx.send(routed).await.is_err() {
            return;
        }
    }
    let _ = route_tx.send(Routed::TtsClosed { error: None }).await;
}

async fn run_upload_writer(
    mut channel: WsChannel,
    mut rx: mpsc::Receiver<UploadCmd>,
    route_tx: mpsc::Sender<Routed>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            UploadCmd::Audio(bytes) => {
                if !channel.is_open() {
                    continue;
                }
                if let Err(e) = channel.send_binary(bytes).await {
                    warn!("upload channel write failed: {}", e);
                    let _ = route_tx
                        .send(Routed::UploadBroken {
                            error: e.to_string(),
                        })
                        .await;
                }
            }
            UploadCmd::Stop => {
                debug!("sending upload stop");
                if let Err(e) = channel.send_json(&UploadControl::Stop).await {
                    warn!("upload stop failed: {}", e);
                }
            }
            UploadCmd::Close => break,
        }
    }
    channel.close().await;
}

struct Dispatch {
    route_rx: mpsc::Receiver<Routed>,
    cmd_rx: mpsc::Receiver<SessionCmd>,
    route_tx: mpsc::Sender<Routed>,
    event_tx: mpsc::Sender<SessionEvent>,
    factory: Arc<dyn PlayerFactory>,
    text_channel: WsChannel,
    tts_channel: Option<WsChannel>,
    upload_tx: mpsc::Sender<UploadCmd>,
    mic: Arc<Mutex<Option<MicCapture>>>,
    player: Option<Box<dyn AudioPlayer>>,
    player_streaming: bool,
    transcript: TranscriptState,
    artifact: Vec<Bytes>,
    mime: String,
    volume: f32,
    next_seq: u64,
    grace: Option<JoinHandle<()>>,
    torn_down: bool,
}

impl Dispatch {
    async fn run(mut self) {
        loop {
            tokio::select! {
                routed = self.route_rx.recv() => match routed {
                    Some(routed) => self.handle_routed(routed).await,
                    None => break,
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SessionCmd::SetVolume(volume)) => {
                        self.volume = volume;
                        if let Some(player) = &mut self.player {
                            player.set_volume(volume);
                        }
                    }
                    Some(SessionCmd::Transcript(reply)) => {
                        let _ = reply.send(self.transcript.snapshot());
                    }
                    Some(SessionCmd::Close(ack)) => {
                        self.teardown().await;
                        let _ = ack.send(());
                        return;
                    }
                    None => break,
                },
            }
        }
        self.teardown().await;
    }

    async fn handle_routed(&mut self, routed: Routed) {
        match routed {
            Routed::Text(frame) => self.handle_text(frame).await,
            Routed::TtsControl(control) => self.handle_tts_control(control).await,
            Routed::TtsBinary(data) => self.handle_tts_binary(data).await,
            Routed::GraceElapsed => {
                self.grace = None;
                let bytes = Bytes::from(self.artifact.concat());
                debug!("utterance artifact ready: {} bytes", bytes.len());
                self.emit(SessionEvent::ArtifactReady(UtteranceAudio {
                    mime: self.mime.clone(),
                    bytes,
                }))
                .await;
                self.emit(SessionEvent::PlaybackEnded).await;
            }
            Routed::TextClosed { error } => {
                if self.torn_down {
                    return;
                }
                let message = error.unwrap_or_else(|| "connection closed".to_string());
                warn!("text channel lost: {}", message);
                self.emit(SessionEvent::ChannelError {
                    kind: ChannelKind::Text,
                    message,
                })
                .await;
                // Without a transcript path the session cannot keep
                // capturing; release everything.
                self.teardown().await;
            }
            Routed::TtsClosed { error } => {
                if self.torn_down {
                    return;
                }
                let message = error.unwrap_or_else(|| "connection closed".to_string());
                warn!("tts channel lost, playback disabled: {}", message);
                self.emit(SessionEvent::ChannelError {
                    kind: ChannelKind::Tts,
                    message,
                })
                .await;
                if let Some(mut channel) = self.tts_channel.take() {
                    channel.close().await;
                }
            }
            Routed::UploadBroken { error } => {
                if self.torn_down {
                    return;
                }
                warn!("upload channel lost: {}", error);
                self.emit(SessionEvent::ChannelError {
                    kind: ChannelKind::Upload,
                    message: error,
                })
                .await;
                // Microphone audio has nowhere to go; release everything.
                self.teardown().await;
            }
        }
    }

    async fn handle_text(&mut self, frame: TextFrame) {
        match frame {
            TextFrame::Ready { .. } | TextFrame::Pong => {}
            TextFrame::Interim {
                text,
                ts,
                confidence,
            } => {
                self.transcript.set_interim(&text);
                self.emit(SessionEvent::Transcript(TranscriptUpdate::Interim {
                    text,
                    ts,
                    confidence,
                }))
                .await;
            }
            TextFrame::Final {
                text,
                ts,
                confidence,
            } => {
                self.transcript.push_final(&text);
                self.emit(SessionEvent::Transcript(TranscriptUpdate::Final {
                    text,
                    ts,
                    confidence,
                }))
                .await;
            }
        }
    }

    async fn handle_tts_control(&mut self, control: TtsControl) {
        match control {
            TtsControl::Ready { .. } => {}
            TtsControl::Start { mime } => {
                // A new start implicitly ends any prior playback session.
                if let Some(grace) = self.grace.take() {
                    grace.abort();
                }
                if let Some(mut player) = self.player.take() {
                    player.teardown().await;
                }
                self.artifact.clear();
                self.next_seq = 0;
                self.mime = mime.unwrap_or_else(|| DEFAULT_MIME.to_string());
                info!("tts stream starting ({})", self.mime);

                let mut player = self.factory.streaming(&self.mime, self.volume);
                match player.initialize().await {
                    Ok(()) => {
                        self.player = Some(player);
                        self.player_streaming = true;
                    }
                    Err(e) => {
                        info!("streaming playback unavailable ({}), buffering instead", e);
                        let mut fallback = self.factory.buffered(&self.mime, self.volume);
                        match fallback.initialize().await {
                            Ok(()) => {
                                self.player = Some(fallback);
                                self.player_streaming = false;
                            }
                            Err(e) => {
                                warn!("no playback path available: {}", e);
                                self.player = None;
                            }
                        }
                    }
                }

                self.emit(SessionEvent::PlaybackStarted).await;
            }
            TtsControl::Stop => {
                info!("tts stream stopped");
                if let Some(player) = &mut self.player {
                    let _ = player.signal_end().await;
                }
                let route_tx = self.route_tx.clone();
                self.grace = Some(tokio::spawn(async move {
                    tokio::time::sleep(GRACE_DELAY).await;
                    let _ = route_tx.send(Routed::GraceElapsed).await;
                }));
            }
        }
    }

    async fn handle_tts_binary(&mut self, data: Bytes) {
        self.artifact.push(data.clone());

        let Some(player) = &mut self.player else {
            return;
        };

        let chunk = AudioChunk::new(self.next_seq, data);
        self.next_seq += 1;

        if let Err(e) = player.submit_chunk(chunk.clone()).await {
            if self.player_streaming {
                // Streaming sink failed for good: demote to the buffered
                // strategy for the rest of this utterance.
                info!("streaming playback demoted: {}", e);
                if let Some(mut old) = self.player.take() {
                    old.teardown().await;
                }

                let mut fallback = self.factory.buffered(&self.mime, self.volume);
                match fallback.initialize().await {
                    Ok(()) => {
                        if let Err(e) = fallback.submit_chunk(chunk).await {
                            warn!("fallback playback failed: {}", e);
                        }
                        self.player = Some(fallback);
                        self.player_streaming = false;
                    }
                    Err(e) => {
                        warn!("no playback path available: {}", e);
                        self.player = None;
                    }
                }
            } else {
                warn!("buffered playback failed, disabling playback: {}", e);
                if let Some(mut old) = self.player.take() {
                    old.teardown().await;
                }
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event).await;
    }

    /// Release everything the dispatch owns. Each step is guarded so that
    /// one failure never prevents the next release attempt.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(grace) = self.grace.take() {
            grace.abort();
        }
        if let Some(mut player) = self.player.take() {
            player.teardown().await;
        }
        self.text_channel.close().await;
        if let Some(mut channel) = self.tts_channel.take() {
            channel.close().await;
        }
        let _ = self.upload_tx.try_send(UploadCmd::Close);

        let capture = self.mic.lock().unwrap().take();
        if let Some(mut capture) = capture {
            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
        }

        debug!("session resources released");
    }
}
