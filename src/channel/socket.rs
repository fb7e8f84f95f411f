use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{Error, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWriter = SplitSink<WsStream, Message>;
pub type WsReader = SplitStream<WsStream>;

/// The three channel roles of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Text,
    Tts,
    Upload,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Text => write!(f, "text"),
            ChannelKind::Tts => write!(f, "tts"),
            ChannelKind::Upload => write!(f, "upload"),
        }
    }
}

/// Connection state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Write half of one WebSocket channel.
///
/// The read half is split off at connect time and consumed by a session
/// reader task. Closing is best-effort and idempotent.
pub struct WsChannel {
    kind: ChannelKind,
    writer: WsWriter,
    state: ChannelState,
}

impl WsChannel {
    /// Connect to the channel endpoint, returning the writer half and the
    /// split-off reader.
    pub async fn connect(kind: ChannelKind, url: &str) -> Result<(Self, WsReader)> {
        debug!("connecting {} channel to {}", kind, url);

        let (stream, _) = connect_async(url).await.map_err(|e| Error::ChannelOpen {
            kind,
            message: e.to_string(),
        })?;

        let (writer, reader) = stream.split();

        debug!("{} channel connected", kind);

        Ok((
            Self {
                kind,
                writer,
                state: ChannelState::Open,
            },
            reader,
        ))
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Send a JSON control frame.
    pub async fn send_json<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        let text = serde_json::to_string(msg).map_err(|e| Error::ChannelOpen {
            kind: self.kind,
            message: e.to_string(),
        })?;
        self.writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                self.state = ChannelState::Errored;
                Error::ChannelOpen {
                    kind: self.kind,
                    message: e.to_string(),
                }
            })
    }

    /// Send a raw binary audio frame.
    pub async fn send_binary(&mut self, bytes: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.writer.send(Message::Binary(bytes)).await.map_err(|e| {
            self.state = ChannelState::Errored;
            Error::ChannelOpen {
                kind: self.kind,
                message: e.to_string(),
            }
        })
    }

    /// Close the channel. Safe to call from any state and more than once;
    /// failures are logged and swallowed so later release steps still run.
    pub async fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.state = ChannelState::Closed;
        if let Err(e) = self.writer.close().await {
            debug!("{} channel close: {}", self.kind, e);
        }
    }
}

/// Wait for the server's `{"type":"ready"}` acknowledgement on a freshly
/// opened channel, skipping any other frames that arrive first.
pub async fn await_ready(kind: ChannelKind, reader: &mut WsReader, wait: Duration) -> Result<()> {
    let scan = async {
        while let Some(msg) = reader.next().await {
            let msg = msg.map_err(|e| Error::ChannelOpen {
                kind,
                message: e.to_string(),
            })?;
            if let Message::Text(text) = msg {
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(v) if v.get("type").and_then(|t| t.as_str()) == Some("ready") => {
                        debug!("{} channel ready", kind);
                        return Ok(());
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("{} channel sent non-JSON during handshake: {}", kind, e);
                        continue;
                    }
                }
            }
        }
        Err(Error::ChannelOpen {
            kind,
            message: "connection closed before ready".to_string(),
        })
    };

    match tokio::time::timeout(wait, scan).await {
        Ok(res) => res,
        Err(_) => Err(Error::ChannelOpen {
            kind,
            message: format!("ready not received within {:?}", wait),
        }),
    }
}
