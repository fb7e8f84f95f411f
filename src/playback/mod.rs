//! TTS audio playback
//!
//! Two interchangeable playback strategies sit behind the `AudioPlayer`
//! trait: `StreamingPlayer` appends compressed chunks to a live output sink
//! as they arrive, and `BufferedPlayer` accumulates bytes and batch-decodes
//! them when streaming append is unavailable or has failed. The session
//! selects and switches strategies through a `PlayerFactory` without
//! knowing which one is active.

mod buffered;
mod output;
mod streaming;

pub use buffered::{BufferedPlayer, DecodePipeline, PcmUnit, SymphoniaPipeline};
pub use output::OutputHandle;
pub use streaming::{RodioStreamSink, StreamSink, StreamingPlayer};

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Fallback codec when the negotiated one is unsupported.
pub const DEFAULT_MIME: &str = "audio/mpeg";

/// One compressed audio chunk as received from the TTS channel.
///
/// Immutable after creation; ownership moves from the channel into exactly
/// one playback strategy. `sequence` is the arrival order within the
/// current playback session.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub sequence: u64,
    pub data: Bytes,
}

impl AudioChunk {
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self { sequence, data }
    }
}

/// A playback strategy for one utterance.
///
/// `submit_chunk` absorbs chunk-local errors internally; an `Err` return
/// means the strategy as a whole is no longer usable and the chunk was not
/// consumed, so the caller may hand it to a fallback strategy. `teardown`
/// must be safe from any state and releases every owned resource.
#[async_trait]
pub trait AudioPlayer: Send {
    async fn initialize(&mut self) -> Result<()>;

    async fn submit_chunk(&mut self, chunk: AudioChunk) -> Result<()>;

    /// Signal that no more chunks will arrive for this utterance. Unplayed
    /// queued audio still plays out before the strategy finalizes.
    async fn signal_end(&mut self) -> Result<()>;

    async fn teardown(&mut self);

    fn set_volume(&mut self, volume: f32);
}

/// Builds playback strategies for a negotiated codec. Tests substitute
/// fakes; production uses `RodioPlayerFactory`.
pub trait PlayerFactory: Send + Sync {
    fn streaming(&self, mime: &str, volume: f32) -> Box<dyn AudioPlayer>;
    fn buffered(&self, mime: &str, volume: f32) -> Box<dyn AudioPlayer>;
}

/// Production factory: rodio-backed streaming append with a symphonia
/// batch-decode fallback.
pub struct RodioPlayerFactory;

impl PlayerFactory for RodioPlayerFactory {
    fn streaming(&self, mime: &str, volume: f32) -> Box<dyn AudioPlayer> {
        Box::new(StreamingPlayer::new(
            Box::new(RodioStreamSink::new()),
            mime,
            volume,
        ))
    }

    fn buffered(&self, mime: &str, volume: f32) -> Box<dyn AudioPlayer> {
        Box::new(BufferedPlayer::new(
            Box::new(SymphoniaPipeline::new()),
            mime,
            volume,
        ))
    }
}
