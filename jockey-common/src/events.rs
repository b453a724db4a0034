//! Event types for the jockey event system.
//!
//! The daemon uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many notification fan-out,
//!   consumed by the SSE endpoint
//! - **Signal channels** (tokio::mpsc): transport → engine, one handler
//! - **Per-session mutex**: all queue/driver mutations for one guild
//!
//! Events are broadcast via EventBus and serialized for SSE
//! transmission.

use crate::types::{GuildId, Track};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Canonical playback state for one guild session.
///
/// A single enum rather than separate playing/paused flags: `Paused`
/// structurally implies an active playback session, so the two can
/// never desynchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No current track; the queue cycle is not running
    Idle,
    /// A track is streaming
    Playing,
    /// A playback session exists and is suspended
    Paused,
}

impl PlaybackState {
    /// Whether a playback session exists (playing or paused).
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Idle)
    }
}

/// Notification events emitted by the queue daemon.
///
/// Every variant names the guild it concerns; guilds are fully
/// isolated, so SSE consumers filter on `guild_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JockeyEvent {
    /// Playback state transition (Idle/Playing/Paused)
    PlaybackStateChanged {
        guild_id: GuildId,
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track started streaming
    TrackStarted {
        guild_id: GuildId,
        track: Track,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track was appended to the pending queue (1-based position)
    TrackEnqueued {
        guild_id: GuildId,
        track: Track,
        position: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pending queue reordered or truncated (remove/skipto/shuffle/clear)
    QueueChanged {
        guild_id: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The cycle drained the queue; the session is idle
    QueueExhausted {
        guild_id: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track failed to start, or the whole cycle aborted
    PlaybackError {
        guild_id: GuildId,
        message: String,
        /// True when the cycle gave up and settled Idle
        terminal: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stored volume setting changed (0-100)
    VolumeChanged {
        guild_id: GuildId,
        volume: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Loop mode toggled
    LoopToggled {
        guild_id: GuildId,
        enabled: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session torn down (explicit stop or fatal transport error)
    SessionClosed {
        guild_id: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl JockeyEvent {
    /// Event type as string, used as the SSE event field.
    pub fn event_type(&self) -> &'static str {
        match self {
            JockeyEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            JockeyEvent::TrackStarted { .. } => "TrackStarted",
            JockeyEvent::TrackEnqueued { .. } => "TrackEnqueued",
            JockeyEvent::QueueChanged { .. } => "QueueChanged",
            JockeyEvent::QueueExhausted { .. } => "QueueExhausted",
            JockeyEvent::PlaybackError { .. } => "PlaybackError",
            JockeyEvent::VolumeChanged { .. } => "VolumeChanged",
            JockeyEvent::LoopToggled { .. } => "LoopToggled",
            JockeyEvent::SessionClosed { .. } => "SessionClosed",
        }
    }

    /// Guild this event concerns.
    pub fn guild_id(&self) -> GuildId {
        match self {
            JockeyEvent::PlaybackStateChanged { guild_id, .. }
            | JockeyEvent::TrackStarted { guild_id, .. }
            | JockeyEvent::TrackEnqueued { guild_id, .. }
            | JockeyEvent::QueueChanged { guild_id, .. }
            | JockeyEvent::QueueExhausted { guild_id, .. }
            | JockeyEvent::PlaybackError { guild_id, .. }
            | JockeyEvent::VolumeChanged { guild_id, .. }
            | JockeyEvent::LoopToggled { guild_id, .. }
            | JockeyEvent::SessionClosed { guild_id, .. } => *guild_id,
        }
    }
}

/// One-to-many event broadcaster backed by tokio::broadcast.
pub struct EventBus {
    tx: broadcast::Sender<JockeyEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus buffering up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<JockeyEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Ok(subscriber_count)`; errs when no subscriber is
    /// listening, which callers may treat as noteworthy for critical
    /// events.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: JockeyEvent,
    ) -> Result<usize, broadcast::error::SendError<JockeyEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case.
    ///
    /// Notifications are advisory; a daemon with no SSE clients is a
    /// normal condition.
    pub fn emit_lossy(&self, event: JockeyEvent) {
        let _ = self.tx.send(event);
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
