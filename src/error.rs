use crate::channel::ChannelKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the streaming session client.
///
/// Chunk-local playback failures are absorbed and logged where they occur;
/// only conditions that prevent a channel from opening, the microphone from
/// starting, or a store call from completing reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A channel never reached the open state (handshake, timeout, network).
    #[error("{kind} channel failed to open: {message}")]
    ChannelOpen { kind: ChannelKind, message: String },

    /// Microphone permission was denied or no input device is available.
    #[error("microphone unavailable: {0}")]
    DeviceAccess(String),

    /// The streaming playback sink could not be initialized.
    #[error("streaming sink unavailable: {0}")]
    SinkInit(String),

    /// Accumulated audio bytes could not be decoded.
    #[error("audio decode failed: {0}")]
    Decode(String),

    /// The playback sink rejected a chunk.
    #[error("sink rejected audio chunk: {0}")]
    Append(String),

    /// A conversation store request failed.
    #[error("conversation store request failed: {0}")]
    Store(String),

    /// The session was closed while an operation was pending.
    #[error("session is closed")]
    Closed,
}
