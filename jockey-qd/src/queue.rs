//! Per-guild playback queue
//!
//! Tracks the ordered pending list, the current track slot, the
//! canonical playback state, and the stored settings for one guild.
//! Pure state: everything async (transport, resolver) lives in the
//! engine. Callers serialize access through the session mutex.

use crate::error::{Error, Result};
use jockey_common::{PlaybackState, Track};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

/// Ordered queue + current slot + settings for one guild.
///
/// Invariants:
/// - at most one current track; `pending` never contains it
/// - `current == None` implies `state == Idle`
/// - `Paused` implies an active session (structural, via the enum)
#[derive(Debug)]
pub struct TrackQueue {
    /// Pending tracks in play order (front = next up)
    pending: VecDeque<Track>,

    /// Track presently streaming, None when idle
    current: Option<Track>,

    /// Canonical playback state
    state: PlaybackState,

    /// When set, a finished current track is re-inserted at the front
    loop_enabled: bool,

    /// Stored volume percent (0-100); applied as initial stream gain
    volume: u8,

    /// Stored bass boost percent (0-100); declared inert
    bass_boost: u8,
}

impl TrackQueue {
    /// New empty queue with the original defaults (volume 50, no loop).
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            state: PlaybackState::Idle,
            loop_enabled: false,
            volume: 50,
            bass_boost: 0,
        }
    }

    /// Append a track; returns the new pending length (the track's
    /// 1-based queue position, used for "position in queue" feedback).
    pub fn enqueue(&mut self, track: Track) -> usize {
        self.pending.push_back(track);
        self.pending.len()
    }

    /// Pop the next track off the front of the pending list.
    ///
    /// `None` signals queue-exhausted: a normal terminal state for the
    /// playback cycle, not an error.
    pub fn dequeue_next(&mut self) -> Option<Track> {
        self.pending.pop_front()
    }

    /// Re-insert a track at the front (loop mode re-insertion).
    pub fn requeue_front(&mut self, track: Track) {
        self.pending.push_front(track);
    }

    /// Remove the track at a 1-based position, preserving the order of
    /// the rest. Fails without mutating on an out-of-range position.
    pub fn remove_at(&mut self, position: usize) -> Result<Track> {
        let len = self.pending.len();
        self.pending
            .remove(position.wrapping_sub(1))
            .ok_or(Error::OutOfRange { position, len })
    }

    /// Discard all pending tracks strictly before a 1-based position,
    /// leaving the target as the new front.
    ///
    /// Does not advance playback itself: the caller stops the current
    /// stream and lets the finish signal drive the cycle onto the new
    /// front.
    pub fn skip_to(&mut self, position: usize) -> Result<()> {
        if position == 0 || position > self.pending.len() {
            return Err(Error::OutOfRange {
                position,
                len: self.pending.len(),
            });
        }
        self.pending.drain(..position - 1);
        Ok(())
    }

    /// Uniformly random permutation of the pending list.
    ///
    /// The current track is untouched. Fails without mutating when
    /// there are fewer than two pending tracks.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        if self.pending.len() < 2 {
            return Err(Error::InsufficientItems);
        }
        self.pending.make_contiguous().shuffle(rng);
        Ok(())
    }

    /// Empty the pending list only; current track and state untouched.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn set_volume(&mut self, volume: u8) -> Result<()> {
        if volume > 100 {
            return Err(Error::InvalidRange(volume));
        }
        self.volume = volume;
        Ok(())
    }

    pub fn set_bass_boost(&mut self, level: u8) -> Result<()> {
        if level > 100 {
            return Err(Error::InvalidRange(level));
        }
        self.bass_boost = level;
        Ok(())
    }

    /// Flip loop mode; returns the new value.
    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        self.loop_enabled
    }

    /// Install a new current track and mark the session Playing.
    pub fn set_current(&mut self, track: Track) {
        self.current = Some(track);
        self.state = PlaybackState::Playing;
    }

    /// Drop the current track and settle Idle.
    ///
    /// Returns the track that was current, if any, so loop mode can
    /// re-insert it before the next advance.
    pub fn take_current(&mut self) -> Option<Track> {
        self.state = PlaybackState::Idle;
        self.current.take()
    }

    pub fn set_state(&mut self, state: PlaybackState) {
        self.state = state;
    }

    // Read accessors

    pub fn pending(&self) -> &VecDeque<Track> {
        &self.pending
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn bass_boost(&self) -> u8 {
        self.bass_boost
    }

    /// True when nothing is pending and nothing is current.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }
}

impl Default for TrackQueue {
    fn default() -> Self {
        Self::new()
    }
}
