//! Core value types shared between the daemon and its API surface.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant (guild) identifier.
///
/// Every guild owns wholly isolated queue and playback state; this
/// newtype keeps guild ids from being confused with other numeric ids
/// at API and registry boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GuildId {
    fn from(id: u64) -> Self {
        GuildId(id)
    }
}

/// One resolved, playable media item.
///
/// Immutable once constructed. A track is owned by exactly one queue
/// slot (pending list or current slot); ownership transfers on
/// dequeue and loop re-insertion, it is never shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Display title from the resolver
    pub title: String,

    /// Pre-formatted duration ("H:MM:SS" or "M:SS"), or "Unknown"
    pub duration_display: String,

    /// Thumbnail reference, when the resolver provides one
    pub thumbnail: Option<String>,

    /// Opaque playable source locator, resolver-specific
    pub source: String,

    /// Tag of the user who requested the track
    pub requested_by: String,
}
