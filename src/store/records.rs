use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// A full conversation record with its recorded segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub segments: Vec<SegmentRecord>,
}

/// One recorded segment of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: String,
    /// Segment start, milliseconds since the epoch
    pub start: i64,
    /// Segment end, milliseconds since the epoch
    pub end: i64,
    pub transcript: String,
    pub audio_url: Option<String>,
}

/// Payload for appending a segment to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSegment {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub transcript: String,
    pub audio_url: Option<String>,
}
