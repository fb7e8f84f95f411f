use serde::{Deserialize, Serialize};

/// Control frames sent by the client on the upload channel.
///
/// `Start` is the handshake announcing the encoding for the lifetime of the
/// channel; audio follows as raw binary frames. `Stop` ends the utterance
/// without closing the connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UploadControl {
    #[serde(rename_all = "camelCase")]
    Start {
        conversation_id: String,
        model: String,
        accent: String,
        sample_rate: u32,
        format: String,
        asr_provider: String,
    },
    Stop,
}

/// Handshake sent by the client on the text channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TextRequest {
    #[serde(rename_all = "camelCase")]
    Subscribe { conversation_id: String },
}

/// Frames received on the text channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TextFrame {
    #[serde(rename_all = "camelCase")]
    Ready {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Pong,
    Interim {
        text: String,
        #[serde(default)]
        ts: Option<f64>,
        #[serde(default)]
        confidence: Option<f32>,
    },
    Final {
        text: String,
        #[serde(default)]
        ts: Option<f64>,
        #[serde(default)]
        confidence: Option<f32>,
    },
}

/// Handshake sent by the client on the TTS channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TtsRequest {
    #[serde(rename_all = "camelCase")]
    Start { conversation_id: String },
}

/// Control frames received on the TTS channel.
///
/// `Start`/`Stop` delimit one utterance; binary audio frames arrive between
/// them and are not represented here.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TtsControl {
    #[serde(rename_all = "camelCase")]
    Ready {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Start {
        #[serde(default)]
        mime: Option<String>,
    },
    Stop,
}
