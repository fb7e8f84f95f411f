use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AudioChunk, AudioPlayer, OutputHandle, DEFAULT_MIME};
use crate::{Error, Result};

/// Append failures tolerated before the strategy demotes itself.
const MAX_APPEND_FAILURES: u32 = 2;

/// Queued sink sources before the rodio sink reports busy.
const MAX_QUEUED_SOURCES: usize = 32;

/// Delay before re-checking a busy rodio sink.
const READY_RECHECK: Duration = Duration::from_millis(100);

/// Platform facility that accepts compressed audio progressively.
///
/// Feeding is event-driven: when `is_busy` holds, the feeder calls
/// `request_ready` and suspends on the `readiness` notifier instead of
/// spinning.
pub trait StreamSink: Send {
    /// Bind the sink for the negotiated codec.
    fn init(&mut self, mime: &str) -> Result<()>;

    /// True when the sink cannot accept another append right now.
    fn is_busy(&self) -> bool;

    /// Append one compressed chunk.
    fn append(&mut self, chunk: &AudioChunk) -> Result<()>;

    /// Signal end-of-stream so the sink can finish playing out.
    fn finalize(&mut self);

    /// Abort any in-progress work and release the output binding.
    fn abort(&mut self);

    fn set_volume(&mut self, volume: f32);

    /// Notifier the feeder suspends on while the sink is busy.
    fn readiness(&self) -> Arc<Notify>;

    /// Ask the sink to fire `readiness` once it can take more data.
    fn request_ready(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Opening,
    Ready,
    Closed,
}

enum Cmd {
    Chunk(AudioChunk),
    End,
    SetVolume(f32),
    Teardown,
}

/// Streaming append playback: chunks go to the sink as soon as it will
/// take them, in strict arrival order, with end-of-stream deferred until
/// the pending queue has drained.
///
/// A feeder task owns the sink; queueing and draining happen there while
/// the session keeps routing messages. When the sink fails repeatedly the
/// feeder tears the sink down and flags demotion, after which every
/// `submit_chunk` returns an error without consuming the chunk so the
/// session can hand it to the fallback strategy.
pub struct StreamingPlayer {
    sink: Option<Box<dyn StreamSink>>,
    mime: String,
    volume: f32,
    state: State,
    cmd_tx: Option<mpsc::Sender<Cmd>>,
    feeder: Option<JoinHandle<()>>,
    demoted: Arc<AtomicBool>,
}

impl StreamingPlayer {
    pub fn new(sink: Box<dyn StreamSink>, mime: &str, volume: f32) -> Self {
        Self {
            sink: Some(sink),
            mime: mime.to_string(),
            volume: volume.clamp(0.0, 1.0),
            state: State::Uninitialized,
            cmd_tx: None,
            feeder: None,
            demoted: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl AudioPlayer for StreamingPlayer {
    async fn initialize(&mut self) -> Result<()> {
        self.state = State::Opening;

        let mut sink = match self.sink.take() {
            Some(s) => s,
            None => {
                self.state = State::Closed;
                return Err(Error::SinkInit("player already initialized".to_string()));
            }
        };

        if let Err(e) = sink.init(&self.mime) {
            if self.mime == DEFAULT_MIME {
                sink.abort();
                self.state = State::Closed;
                return Err(e);
            }
            // Substitute the default codec before giving up on streaming.
            debug!(
                "sink rejected mime {} ({}), retrying as {}",
                self.mime, e, DEFAULT_MIME
            );
            if let Err(e) = sink.init(DEFAULT_MIME) {
                sink.abort();
                self.state = State::Closed;
                return Err(e);
            }
            self.mime = DEFAULT_MIME.to_string();
        }

        sink.set_volume(self.volume);

        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let demoted = self.demoted.clone();
        self.feeder = Some(tokio::spawn(run_feeder(sink, cmd_rx, demoted)));
        self.cmd_tx = Some(cmd_tx);
        self.state = State::Ready;
        Ok(())
    }

    async fn submit_chunk(&mut self, chunk: AudioChunk) -> Result<()> {
        if self.demoted.load(Ordering::SeqCst) {
            return Err(Error::Append("streaming sink demoted".to_string()));
        }
        if self.state != State::Ready {
            return Err(Error::Append("streaming player not running".to_string()));
        }
        let tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| Error::Append("streaming player not running".to_string()))?;
        tx.send(Cmd::Chunk(chunk))
            .await
            .map_err(|_| Error::Append("streaming feeder stopped".to_string()))
    }

    async fn signal_end(&mut self) -> Result<()> {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(Cmd::End).await;
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        self.state = State::Closed;
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Cmd::Teardown).await;
        }
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.await;
        }
        // Never initialized: release the sink directly.
        if let Some(mut sink) = self.sink.take() {
            sink.abort();
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.try_send(Cmd::SetVolume(self.volume));
        }
    }
}

async fn run_feeder(
    mut sink: Box<dyn StreamSink>,
    mut cmd_rx: mpsc::Receiver<Cmd>,
    demoted: Arc<AtomicBool>,
) {
    let mut queue: VecDeque<AudioChunk> = VecDeque::new();
    let mut ending = false;
    let mut finalized = false;
    let mut failures = 0u32;
    let ready = sink.readiness();

    loop {
        // Feed whatever the sink will take, preserving arrival order.
        while !finalized && !sink.is_busy() {
            let Some(chunk) = queue.pop_front() else { break };
            if let Err(e) = sink.append(&chunk) {
                failures += 1;
                warn!("dropping chunk {}: {}", chunk.sequence, e);
                if failures >= MAX_APPEND_FAILURES {
                    warn!("streaming sink failing repeatedly, demoting strategy");
                    demoted.store(true, Ordering::SeqCst);
                    sink.abort();
                    return;
                }
            }
        }

        // End-of-stream must never cut off unplayed audio: finalize only
        // once the queue has drained.
        if !finalized && ending && queue.is_empty() {
            sink.finalize();
            finalized = true;
        }

        let blocked = !finalized && !queue.is_empty() && sink.is_busy();
        if blocked {
            sink.request_ready();
        }

        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Cmd::Chunk(chunk)) => {
                    if !ending {
                        queue.push_back(chunk);
                    }
                }
                Some(Cmd::End) => ending = true,
                Some(Cmd::SetVolume(v)) => sink.set_volume(v),
                Some(Cmd::Teardown) | None => {
                    sink.abort();
                    return;
                }
            },
            _ = ready.notified(), if blocked => {}
        }
    }
}

/// Streaming sink over a rodio output: each compressed chunk decodes into
/// its own source and is appended to the sink queue, which plays sources
/// back-to-back in append order.
pub struct RodioStreamSink {
    output: Option<OutputHandle>,
    ready: Arc<Notify>,
    volume: f32,
}

impl RodioStreamSink {
    pub fn new() -> Self {
        Self {
            output: None,
            ready: Arc::new(Notify::new()),
            volume: 1.0,
        }
    }

    fn supports(mime: &str) -> bool {
        let mime = mime.to_ascii_lowercase();
        ["mpeg", "mp3", "wav", "ogg", "vorbis", "flac"]
            .iter()
            .any(|codec| mime.contains(codec))
    }
}

impl Default for RodioStreamSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSink for RodioStreamSink {
    fn init(&mut self, mime: &str) -> Result<()> {
        if !Self::supports(mime) {
            return Err(Error::SinkInit(format!("unsupported mime {}", mime)));
        }
        let output = OutputHandle::open()?;
        output.sink().set_volume(self.volume);
        self.output = Some(output);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        match &self.output {
            Some(output) => output.sink().len() >= MAX_QUEUED_SOURCES,
            None => true,
        }
    }

    fn append(&mut self, chunk: &AudioChunk) -> Result<()> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| Error::Append("sink not initialized".to_string()))?;
        let source = rodio::Decoder::new(Cursor::new(chunk.data.clone()))
            .map_err(|e| Error::Append(e.to_string()))?;
        output.sink().append(source);
        Ok(())
    }

    fn finalize(&mut self) {
        // No explicit end-of-stream marker: the sink drains its queue and
        // falls silent once the last appended source finishes.
        if let Some(output) = &self.output {
            output.sink().play();
        }
    }

    fn abort(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.close();
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(output) = &self.output {
            output.sink().set_volume(volume);
        }
    }

    fn readiness(&self) -> Arc<Notify> {
        self.ready.clone()
    }

    fn request_ready(&self) {
        let ready = self.ready.clone();
        tokio::spawn(async move {
            tokio::time::sleep(READY_RECHECK).await;
            ready.notify_one();
        });
    }
}
