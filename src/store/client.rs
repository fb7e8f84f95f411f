use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::debug;

use super::records::{ConversationRecord, ConversationSummary, NewSegment, SegmentRecord};
use crate::{Error, Result};

/// Client for the conversation store collaborator.
///
/// Every call goes through one envelope: a non-2xx status or a body with
/// `success: false` becomes [`Error::Store`] carrying the server message;
/// otherwise the payload is the `data` field when present, or the body
/// itself.
pub struct ConversationStore {
    base_url: String,
    http: reqwest::Client,
}

impl ConversationStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// List conversations.
    pub async fn list(&self) -> Result<Vec<ConversationSummary>> {
        let data = self
            .request(reqwest::Method::GET, "/conversations?offset=0&limit=100", None)
            .await?;
        let items = data
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items
            .iter()
            .map(|c| ConversationSummary {
                id: string_field(c, "id"),
                title: string_field(c, "title"),
                created_at: parse_timestamp(c.get("startedAt")),
            })
            .collect())
    }

    pub async fn create(&self, title: Option<&str>) -> Result<ConversationRecord> {
        let body = json!({ "title": title });
        let data = self
            .request(reqwest::Method::POST, "/conversations", Some(body))
            .await?;
        Ok(ConversationRecord {
            id: string_field(&data, "id"),
            title: string_field(&data, "title"),
            created_at: data
                .get("createdAtMs")
                .and_then(Value::as_i64)
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now),
            segments: Vec::new(),
        })
    }

    pub async fn get(&self, id: &str) -> Result<ConversationRecord> {
        let data = self
            .request(reqwest::Method::GET, &format!("/conversations/{}", id), None)
            .await?;
        let conversation = data.get("conversation").cloned().unwrap_or_default();
        let segments = data
            .get("transcripts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|t| SegmentRecord {
                id: format!("s_{}", t.get("seq").and_then(Value::as_i64).unwrap_or(0)),
                start: t.get("startMs").and_then(Value::as_i64).unwrap_or(0),
                end: t.get("endMs").and_then(Value::as_i64).unwrap_or(0),
                transcript: string_field(t, "text"),
                audio_url: t
                    .get("audioUrl")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect();
        Ok(ConversationRecord {
            id: string_field(&conversation, "id"),
            title: string_field(&conversation, "title"),
            created_at: parse_timestamp(conversation.get("startedAt")),
            segments,
        })
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<()> {
        let body = json!({ "title": title });
        self.request(
            reqwest::Method::PATCH,
            &format!("/conversations/{}", id),
            Some(body),
        )
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.request(
            reqwest::Method::DELETE,
            &format!("/conversations/{}", id),
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn append_segment(&self, id: &str, segment: &NewSegment) -> Result<SegmentRecord> {
        let body = json!({
            "startMs": segment.start,
            "endMs": segment.end,
            "text": segment.transcript,
            "audioUrl": segment.audio_url,
        });
        let data = self
            .request(
                reqwest::Method::POST,
                &format!("/conversations/{}/segments", id),
                Some(body),
            )
            .await?;
        Ok(SegmentRecord {
            id: string_field(&data, "id"),
            start: data.get("startMs").and_then(Value::as_i64).unwrap_or(0),
            end: data.get("endMs").and_then(Value::as_i64).unwrap_or(0),
            transcript: string_field(&data, "text"),
            audio_url: data
                .get("audioUrl")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("store request: {} {}", method, url);

        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let res = req.send().await.map_err(|e| Error::Store(e.to_string()))?;
        let status = res.status();
        let payload: Value = res.json().await.unwrap_or(Value::Null);

        let failed = !status.is_success()
            || payload.get("success").and_then(Value::as_bool) == Some(false);
        if failed {
            let message = payload
                .pointer("/error/message")
                .or_else(|| payload.get("detail"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(Error::Store(message));
        }

        Ok(payload.get("data").cloned().unwrap_or(payload))
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
