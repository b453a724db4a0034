//! Voice transport boundary
//!
//! The daemon never touches audio itself: an external voice gateway
//! owns the guild's voice connection, converts a source locator into
//! an audio stream, and reports lifecycle signals back. This module
//! defines the boundary traits plus the HTTP adapter for a gateway
//! sidecar (REST control + SSE signal feed).
//!
//! One connection + one player per guild, created together and
//! destroyed together; handles are never shared across guilds.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use jockey_common::GuildId;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle signal emitted by the transport for one guild's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The active stream played to completion or was stopped
    Finished,
    /// The active stream failed mid-play
    Error(String),
    /// The voice connection itself is gone (fatal for the session)
    ConnectionLost,
}

/// Factory boundary: establish a streaming audio channel to a guild's
/// requested endpoint.
///
/// Signals for the connection are pushed into `signals`; the sender is
/// dropped when the connection dies, closing the receiving side.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        guild: GuildId,
        endpoint: &str,
        signals: mpsc::UnboundedSender<TransportSignal>,
    ) -> Result<Box<dyn VoiceStream>>;
}

/// A live per-guild voice stream handle.
///
/// `stop` ends the active stream (the transport then emits
/// [`TransportSignal::Finished`]); `disconnect` tears the whole
/// connection down.
#[async_trait]
pub trait VoiceStream: Send {
    /// Begin streaming a source locator with an initial gain (0.0-1.0).
    async fn start(&mut self, source: &str, gain: f32) -> Result<()>;

    async fn pause(&mut self) -> Result<()>;

    async fn resume(&mut self) -> Result<()>;

    /// Stop the active stream without leaving the voice channel.
    async fn stop(&mut self) -> Result<()>;

    /// Leave the voice channel and release the player.
    async fn disconnect(&mut self);
}

// ============================================================================
// HTTP gateway adapter
// ============================================================================

/// Signal frame on the gateway's SSE feed.
#[derive(Debug, Deserialize)]
struct SignalFrame {
    signal: String,
    #[serde(default)]
    message: Option<String>,
}

/// Voice gateway sidecar client.
///
/// Control is REST (`POST /sessions`, `POST /sessions/:guild/...`,
/// `DELETE /sessions/:guild`); lifecycle signals arrive on
/// `GET /sessions/:guild/signals` as SSE `data:` frames.
pub struct HttpVoiceGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVoiceGateway {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }

    fn session_url(&self, guild: GuildId) -> String {
        format!("{}/sessions/{}", self.base_url, guild)
    }
}

#[async_trait]
impl VoiceTransport for HttpVoiceGateway {
    async fn connect(
        &self,
        guild: GuildId,
        endpoint: &str,
        signals: mpsc::UnboundedSender<TransportSignal>,
    ) -> Result<Box<dyn VoiceStream>> {
        self.client
            .post(format!("{}/sessions", self.base_url))
            .json(&serde_json::json!({
                "guild_id": guild,
                "endpoint": endpoint,
            }))
            .send()
            .await
            .map_err(|e| Error::TransportFailure(format!("connect: {e}")))?
            .error_for_status()
            .map_err(|e| Error::TransportFailure(format!("connect: {e}")))?;

        // Subscribe to the signal feed before any stream starts so no
        // finish signal can be missed.
        let feed = self
            .client
            .get(format!("{}/signals", self.session_url(guild)))
            .send()
            .await
            .map_err(|e| Error::TransportFailure(format!("signal feed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::TransportFailure(format!("signal feed: {e}")))?;

        let pump = tokio::spawn(pump_signals(guild, feed, signals));

        Ok(Box::new(GatewayStream {
            client: self.client.clone(),
            session_url: self.session_url(guild),
            guild,
            pump: Some(pump),
        }))
    }
}

/// Forward SSE signal frames from the gateway into the engine channel.
///
/// The feed ending without an abort means the gateway dropped the
/// connection, which is reported as ConnectionLost.
async fn pump_signals(
    guild: GuildId,
    response: reqwest::Response,
    signals: mpsc::UnboundedSender<TransportSignal>,
) {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!("Signal feed error for guild {}: {}", guild, e);
                break;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            let line = line.trim();
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };

            let frame: SignalFrame = match serde_json::from_str(payload.trim()) {
                Ok(f) => f,
                Err(e) => {
                    warn!("Unparseable signal frame for guild {}: {}", guild, e);
                    continue;
                }
            };

            let signal = match frame.signal.as_str() {
                "finished" => TransportSignal::Finished,
                "error" => TransportSignal::Error(
                    frame.message.unwrap_or_else(|| "stream error".to_string()),
                ),
                "connection_lost" => TransportSignal::ConnectionLost,
                other => {
                    debug!("Ignoring unknown signal '{}' for guild {}", other, guild);
                    continue;
                }
            };

            let lost = signal == TransportSignal::ConnectionLost;
            if signals.send(signal).is_err() || lost {
                return;
            }
        }
    }

    // Feed closed from the gateway side
    let _ = signals.send(TransportSignal::ConnectionLost);
}

struct GatewayStream {
    client: reqwest::Client,
    session_url: String,
    guild: GuildId,
    pump: Option<JoinHandle<()>>,
}

impl GatewayStream {
    async fn post(&self, path: &str, body: serde_json::Value) -> Result<()> {
        self.client
            .post(format!("{}/{}", self.session_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TransportFailure(format!("{path}: {e}")))?
            .error_for_status()
            .map_err(|e| Error::TransportFailure(format!("{path}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl VoiceStream for GatewayStream {
    async fn start(&mut self, source: &str, gain: f32) -> Result<()> {
        self.post(
            "play",
            serde_json::json!({ "source": source, "gain": gain }),
        )
        .await
    }

    async fn pause(&mut self) -> Result<()> {
        self.post("pause", serde_json::json!({})).await
    }

    async fn resume(&mut self) -> Result<()> {
        self.post("resume", serde_json::json!({})).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.post("stop", serde_json::json!({})).await
    }

    async fn disconnect(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Err(e) = self.client.delete(&self.session_url).send().await {
            warn!("Failed to close gateway session for guild {}: {}", self.guild, e);
        }
    }
}

impl Drop for GatewayStream {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_frame_parsing() {
        let frame: SignalFrame =
            serde_json::from_str(r#"{"signal":"finished"}"#).unwrap();
        assert_eq!(frame.signal, "finished");
        assert!(frame.message.is_none());

        let frame: SignalFrame =
            serde_json::from_str(r#"{"signal":"error","message":"decode failed"}"#)
                .unwrap();
        assert_eq!(frame.signal, "error");
        assert_eq!(frame.message.as_deref(), Some("decode failed"));
    }
}
