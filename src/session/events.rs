use bytes::Bytes;

use crate::channel::ChannelKind;

/// A transcript hypothesis delivered to the caller.
///
/// Interim text replaces the previous interim hypothesis; final text is
/// committed and appended to the running transcript.
#[derive(Debug, Clone)]
pub enum TranscriptUpdate {
    Interim {
        text: String,
        ts: Option<f64>,
        confidence: Option<f32>,
    },
    Final {
        text: String,
        ts: Option<f64>,
        confidence: Option<f32>,
    },
}

/// One full utterance of synthesized speech, assembled from every binary
/// chunk received between a start/stop control pair, in arrival order.
#[derive(Debug, Clone)]
pub struct UtteranceAudio {
    pub mime: String,
    pub bytes: Bytes,
}

/// Events surfaced to the session caller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Transcript(TranscriptUpdate),
    PlaybackStarted,
    ArtifactReady(UtteranceAudio),
    PlaybackEnded,
    ChannelError { kind: ChannelKind, message: String },
}
