pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod store;

pub use capture::{CaptureConfig, Chunker, MicCapture};
pub use channel::{ChannelKind, ChannelState, TextFrame, TtsControl, UploadControl, WsChannel};
pub use config::Config;
pub use error::{Error, Result};
pub use playback::{
    AudioChunk, AudioPlayer, BufferedPlayer, DecodePipeline, PcmUnit, PlayerFactory,
    RodioPlayerFactory, StreamSink, StreamingPlayer,
};
pub use session::{
    SessionConfig, SessionEvent, StreamSession, TranscriptSnapshot, TranscriptUpdate,
    UtteranceAudio,
};
pub use store::{ConversationRecord, ConversationStore, ConversationSummary, NewSegment};
