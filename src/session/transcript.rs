use serde::{Deserialize, Serialize};

/// Transcript bookkeeping for the current speech segment: at most one
/// provisional hypothesis, plus committed text that only ever grows.
#[derive(Debug, Default, Clone)]
pub struct TranscriptState {
    interim: Option<String>,
    finals: String,
}

impl TranscriptState {
    /// Replace the provisional hypothesis.
    pub fn set_interim(&mut self, text: &str) {
        self.interim = Some(text.to_string());
    }

    /// Commit text to the segment and clear the provisional hypothesis.
    pub fn push_final(&mut self, text: &str) {
        if !self.finals.is_empty() && !text.is_empty() {
            self.finals.push(' ');
        }
        self.finals.push_str(text);
        self.interim = None;
    }

    pub fn interim(&self) -> Option<&str> {
        self.interim.as_deref()
    }

    pub fn finals(&self) -> &str {
        &self.finals
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            interim: self.interim.clone(),
            finals: self.finals.clone(),
        }
    }
}

/// Point-in-time copy of the transcript state.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TranscriptSnapshot {
    pub interim: Option<String>,
    pub finals: String,
}
