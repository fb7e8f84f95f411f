use serde::{Deserialize, Serialize};

/// Configuration for one streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Opaque conversation identifier the backend keys everything on
    pub conversation_id: String,

    /// Selected model tier (e.g. "free", "paid")
    pub model: String,

    /// Selected accent/locale for synthesis
    pub accent: String,

    /// Output volume, clamped to [0.0, 1.0]
    pub output_volume: f32,

    /// Microphone sample rate announced in the upload handshake
    pub sample_rate: u32,

    /// Recognition provider announced in the upload handshake
    pub asr_provider: String,

    /// Text channel endpoint (mandatory)
    pub text_url: String,

    /// TTS channel endpoint; absence disables playback
    pub tts_url: Option<String>,

    /// Upload channel endpoint (mandatory)
    pub upload_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conversation_id: format!("conv-{}", uuid::Uuid::new_v4()),
            model: "free".to_string(),
            accent: "American English".to_string(),
            output_volume: 1.0,
            sample_rate: 48000,
            asr_provider: "whisper".to_string(),
            text_url: "ws://localhost:8000/api/v1/ws/asr-text".to_string(),
            tts_url: Some("ws://localhost:8000/api/v1/ws/tts-audio".to_string()),
            upload_url: "ws://localhost:8000/api/v1/ws/upload-audio".to_string(),
        }
    }
}
