use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AudioChunk, AudioPlayer, OutputHandle};
use crate::{Error, Result};

/// Bytes accumulated before a decode is attempted; smaller fragments
/// frequently fail to decode as valid audio.
pub const MIN_DECODE_BYTES: usize = 24 * 1024;

/// Undecodable bytes tolerated before the buffer is discarded outright.
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// One decoded batch ready for playback.
#[derive(Debug, Clone)]
pub struct PcmUnit {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmUnit {
    /// Wall-clock length of this unit.
    pub fn duration(&self) -> Duration {
        let channels = self.channels.max(1) as usize;
        let rate = self.sample_rate.max(1) as f64;
        let frames = self.samples.len() / channels;
        Duration::from_secs_f64(frames as f64 / rate)
    }
}

/// Decode-and-play backend for the buffered strategy. `play` resolves only
/// when the unit has finished playing; `stop` interrupts it.
#[async_trait]
pub trait DecodePipeline: Send {
    fn decode(&mut self, bytes: &[u8], mime: &str) -> Result<PcmUnit>;

    async fn play(&mut self, unit: PcmUnit, volume: f32) -> Result<()>;

    fn stop(&mut self);
}

struct Shared {
    buf: BytesMut,
    playing: bool,
    ending: bool,
    volume: f32,
}

/// Buffered decode fallback: accumulate compressed bytes, batch-decode once
/// enough has arrived, and play each decoded unit to completion before the
/// next attempt.
///
/// A failed decode returns the bytes to the front of the buffer unchanged
/// so more data can extend them, unless the buffer has outgrown the cap, in
/// which case it is dropped. Only one decode/play cycle runs at a time.
pub struct BufferedPlayer {
    mime: String,
    shared: Arc<Mutex<Shared>>,
    pipeline: Arc<tokio::sync::Mutex<Box<dyn DecodePipeline>>>,
    cycle: Option<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

impl BufferedPlayer {
    pub fn new(pipeline: Box<dyn DecodePipeline>, mime: &str, volume: f32) -> Self {
        Self {
            mime: mime.to_string(),
            shared: Arc::new(Mutex::new(Shared {
                buf: BytesMut::new(),
                playing: false,
                ending: false,
                volume: volume.clamp(0.0, 1.0),
            })),
            pipeline: Arc::new(tokio::sync::Mutex::new(pipeline)),
            cycle: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_cycle(&mut self) {
        let shared = self.shared.clone();
        let pipeline = self.pipeline.clone();
        let closed = self.closed.clone();
        let mime = self.mime.clone();
        self.cycle = Some(tokio::spawn(run_cycle(shared, pipeline, mime, closed)));
    }
}

#[async_trait]
impl AudioPlayer for BufferedPlayer {
    async fn initialize(&mut self) -> Result<()> {
        // Nothing to bind up front; the output opens on first play.
        Ok(())
    }

    async fn submit_chunk(&mut self, chunk: AudioChunk) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Append("buffered player closed".to_string()));
        }

        let start_cycle = {
            let mut g = self.shared.lock().unwrap();
            g.buf.extend_from_slice(&chunk.data);
            // Re-entrancy guard: never start a second cycle while one runs.
            if !g.playing && g.buf.len() >= MIN_DECODE_BYTES {
                g.playing = true;
                true
            } else {
                false
            }
        };

        if start_cycle {
            self.spawn_cycle();
        }
        Ok(())
    }

    async fn signal_end(&mut self) -> Result<()> {
        let start_cycle = {
            let mut g = self.shared.lock().unwrap();
            g.ending = true;
            // Give any short remainder one last chance to play out.
            if !g.playing && !g.buf.is_empty() {
                g.playing = true;
                true
            } else {
                false
            }
        };

        if start_cycle {
            self.spawn_cycle();
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(cycle) = self.cycle.take() {
            cycle.abort();
            let _ = cycle.await;
        }
        self.pipeline.lock().await.stop();
        let mut g = self.shared.lock().unwrap();
        g.buf.clear();
        g.playing = false;
    }

    fn set_volume(&mut self, volume: f32) {
        let mut g = self.shared.lock().unwrap();
        // Takes effect on the next decoded unit.
        g.volume = volume.clamp(0.0, 1.0);
    }
}

async fn run_cycle(
    shared: Arc<Mutex<Shared>>,
    pipeline: Arc<tokio::sync::Mutex<Box<dyn DecodePipeline>>>,
    mime: String,
    closed: Arc<AtomicBool>,
) {
    loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }

        let (bytes, volume, ending) = {
            let mut g = shared.lock().unwrap();
            if g.buf.is_empty() || (g.buf.len() < MIN_DECODE_BYTES && !g.ending) {
                g.playing = false;
                return;
            }
            let len = g.buf.len();
            (g.buf.split_to(len).freeze(), g.volume, g.ending)
        };

        let mut pipeline = pipeline.lock().await;
        match pipeline.decode(&bytes, &mime) {
            Ok(unit) => {
                debug!(
                    "decoded {} bytes into {:.2}s of audio",
                    bytes.len(),
                    unit.duration().as_secs_f64()
                );
                if let Err(e) = pipeline.play(unit, volume).await {
                    warn!("fallback playback failed: {}", e);
                }
            }
            Err(e) => {
                drop(pipeline);
                let mut g = shared.lock().unwrap();
                if ending {
                    warn!(
                        "discarding {} undecodable bytes at end of stream: {}",
                        bytes.len(),
                        e
                    );
                    g.playing = false;
                    return;
                }
                debug!("decode failed with {} bytes buffered: {}", bytes.len(), e);
                // Put the bytes back in front, unchanged, and wait for more.
                let mut restored = BytesMut::with_capacity(bytes.len() + g.buf.len());
                restored.extend_from_slice(&bytes);
                restored.extend_from_slice(&g.buf);
                g.buf = restored;
                if g.buf.len() > MAX_BUFFER_BYTES {
                    warn!(
                        "undecodable audio buffer exceeded {} bytes, dropping",
                        MAX_BUFFER_BYTES
                    );
                    g.buf.clear();
                }
                g.playing = false;
                return;
            }
        }
    }
}

/// Production pipeline: symphonia batch decode into interleaved f32, played
/// through a rodio sink.
pub struct SymphoniaPipeline {
    output: Option<OutputHandle>,
}

impl SymphoniaPipeline {
    pub fn new() -> Self {
        Self { output: None }
    }
}

impl Default for SymphoniaPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecodePipeline for SymphoniaPipeline {
    fn decode(&mut self, bytes: &[u8], mime: &str) -> Result<PcmUnit> {
        decode_bytes(bytes, mime)
    }

    async fn play(&mut self, unit: PcmUnit, volume: f32) -> Result<()> {
        if self.output.is_none() {
            self.output = Some(OutputHandle::open()?);
        }
        let duration = unit.duration();
        if let Some(output) = &self.output {
            output.sink().set_volume(volume);
            output.sink().append(rodio::buffer::SamplesBuffer::new(
                unit.channels.max(1),
                unit.sample_rate.max(1),
                unit.samples,
            ));
        }
        // Strict sequential playback: the next decode waits until this
        // unit has played out.
        tokio::time::sleep(duration + Duration::from_millis(100)).await;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(output) = &self.output {
            output.sink().stop();
        }
    }
}

fn decode_bytes(bytes: &[u8], mime: &str) -> Result<PcmUnit> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.mime_type(mime);
    if let Some(ext) = extension_for(mime) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("no decodable audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut channels: u16 = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(e) => {
                if samples.is_empty() {
                    return Err(Error::Decode(e.to_string()));
                }
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // Corrupt packets are skipped; later packets may still decode.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => {
                if samples.is_empty() {
                    return Err(Error::Decode(e.to_string()));
                }
                break;
            }
        }
    }

    if samples.is_empty() {
        return Err(Error::Decode("no samples decoded".to_string()));
    }

    Ok(PcmUnit {
        samples,
        sample_rate,
        channels: channels.max(1),
    })
}

fn extension_for(mime: &str) -> Option<&'static str> {
    let mime = mime.to_ascii_lowercase();
    if mime.contains("mpeg") || mime.contains("mp3") {
        Some("mp3")
    } else if mime.contains("wav") {
        Some("wav")
    } else if mime.contains("ogg") {
        Some("ogg")
    } else if mime.contains("flac") {
        Some("flac")
    } else {
        None
    }
}
