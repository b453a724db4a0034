//! # Jockey Common Library
//!
//! Shared code for the jockey queue daemon:
//! - Event types (JockeyEvent enum) and the broadcast EventBus
//! - Core value types (GuildId, Track)
//! - Duration display formatting

pub mod events;
pub mod human_time;
pub mod types;

pub use events::{EventBus, JockeyEvent, PlaybackState};
pub use types::{GuildId, Track};
