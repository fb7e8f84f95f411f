//! Microphone capture
//!
//! Acquires raw audio from the default input device, converts it to 16-bit
//! PCM, and slices it into fixed-duration chunks sized for the upload
//! channel. Chunks are forwarded as they become available and dropped when
//! the consumer lags; microphone data is never buffered for later.

mod chunker;
mod mic;

pub use chunker::Chunker;
pub use mic::{CaptureConfig, MicCapture};

/// Encoding announced in the upload handshake. Fixed for the lifetime of
/// the channel.
pub const PCM_FORMAT: &str = "audio/pcm;codec=s16le";

/// Duration of each microphone chunk in milliseconds.
pub const CHUNK_MS: u32 = 40;
