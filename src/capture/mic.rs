use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::Chunker;
use crate::{Error, Result};

/// How many chunks may wait for the uploader before new ones are dropped.
const CHUNK_QUEUE: usize = 16;

/// Capture settings fixed at start time.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub chunk_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            chunk_ms: super::CHUNK_MS,
        }
    }
}

/// Captures microphone audio on a dedicated thread.
///
/// The cpal stream is not `Send`, so the thread owns device, stream, and
/// chunker for its whole lifetime and parks until `stop` is called. Chunks
/// leave through an async channel via `try_send`; when the consumer lags,
/// chunks are dropped in favor of fresh audio.
pub struct MicCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicCapture {
    /// Acquire the default input device and start capturing.
    ///
    /// Fails with `Error::DeviceAccess` when no device is available or the
    /// OS refuses access, which callers surface distinctly from network
    /// errors.
    pub fn start(config: CaptureConfig) -> Result<(Self, mpsc::Receiver<Bytes>)> {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);
        let (ready_tx, ready_rx) = std_mpsc::channel::<std::result::Result<(), String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture(config, chunk_tx, ready_tx, stop_rx))
            .map_err(|e| Error::DeviceAccess(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((
                Self {
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                },
                chunk_rx,
            )),
            Ok(Err(msg)) => {
                let _ = thread.join();
                Err(Error::DeviceAccess(msg))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::DeviceAccess("capture thread exited".to_string()))
            }
        }
    }

    /// Stop capturing and release the device. No-op if capture was never
    /// started or already stopped; never panics.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("mic capture thread panicked");
            }
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture(
    config: CaptureConfig,
    chunk_tx: mpsc::Sender<Bytes>,
    ready_tx: std_mpsc::Sender<std::result::Result<(), String>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let host = cpal::default_host();

    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err("no input device available".to_string()));
            return;
        }
    };

    let supported = match device.supported_input_configs() {
        Ok(configs) => configs
            .filter(|c| {
                c.min_sample_rate() <= SampleRate(config.sample_rate)
                    && c.max_sample_rate() >= SampleRate(config.sample_rate)
            })
            .min_by_key(|c| c.channels()),
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    let supported = match supported {
        Some(c) => c,
        None => {
            let _ = ready_tx.send(Err(format!(
                "no input config supports {} Hz",
                config.sample_rate
            )));
            return;
        }
    };

    let channels = supported.channels();
    let stream_config = supported
        .with_sample_rate(SampleRate(config.sample_rate))
        .config();

    let mut chunker = Chunker::new(config.sample_rate, channels, config.chunk_ms);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for chunk in chunker.push(data) {
                // Freshness over completeness: drop when the uploader lags.
                let _ = chunk_tx.try_send(chunk);
            }
        },
        |err| {
            error!("mic capture stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.to_string()));
        return;
    }

    debug!(
        "mic capture started: {} Hz, {} channels, {} ms chunks",
        config.sample_rate, channels, config.chunk_ms
    );

    let _ = ready_tx.send(Ok(()));

    // Hold the stream until stop is requested or the capture is dropped.
    let _ = stop_rx.recv();
    drop(stream);

    debug!("mic capture stopped");
}
