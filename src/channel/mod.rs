//! WebSocket channels connecting the session to the speech backend
//!
//! Three channel kinds exist, each with its own connection and failure
//! domain:
//! - text: inbound transcript frames (interim/final)
//! - tts: inbound synthesized speech (control frames + binary audio)
//! - upload: outbound microphone audio

mod messages;
mod socket;

pub use messages::{TextFrame, TextRequest, TtsControl, TtsRequest, UploadControl};
pub use socket::{await_ready, ChannelKind, ChannelState, WsChannel, WsReader, WsWriter};
