//! # Jockey Queue Daemon (jockey-qd)
//!
//! Per-guild music playback queue manager.
//!
//! **Purpose:** Track, for each guild, an ordered list of pending
//! tracks, the currently streaming track, and playback settings, and
//! drive a one-track-at-a-time playback cycle reacting to finish
//! signals from an external voice gateway. Media resolution is
//! delegated to an external resolver service; commands arrive over an
//! HTTP/SSE control interface.

pub mod api;
pub mod blacklist;
pub mod config;
pub mod engine;
pub mod error;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
