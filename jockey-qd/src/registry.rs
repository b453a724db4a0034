//! Tenant registry
//!
//! Owns per-guild session state behind explicit lock boundaries.
//! Every guild is an independent unit of concurrency: sessions share
//! no locks with each other, and within one session all queue
//! mutations and driver transitions serialize through a single
//! tokio::Mutex so command handling and transport signals can never
//! interleave a partial update.

use crate::queue::TrackQueue;
use crate::transport::VoiceStream;
use jockey_common::GuildId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything one guild's playback owns, guarded by the session mutex.
pub struct SessionState {
    /// Queue + current slot + settings
    pub queue: TrackQueue,

    /// Live voice stream handle; None when no voice session is active.
    /// Connection and player live and die together inside this handle.
    pub stream: Option<Box<dyn VoiceStream>>,

    /// Bumped on every stream teardown so signal pumps started against
    /// an older stream are ignored
    pub stream_epoch: u64,

    /// Last command or signal touching this session
    pub last_active: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            queue: TrackQueue::new(),
            stream: None,
            stream_epoch: 0,
            last_active: Instant::now(),
        }
    }

    /// Record activity for the idle sweeper.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

/// One guild's session: the mutual-exclusion boundary for its state.
pub struct Session {
    guild: GuildId,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(guild: GuildId) -> Self {
        Self {
            guild,
            state: Mutex::new(SessionState::new()),
        }
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    /// Take the session lock. Held across driver transitions,
    /// including transport start calls, so an advance can never run
    /// reentrantly for one guild.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

/// Guild → session map; lifecycle owner for per-guild state.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<GuildId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the guild's session, creating an empty one on first access.
    /// Idempotent thereafter.
    pub async fn get_or_create(&self, guild: GuildId) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(&guild) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        // Racing creator may have won between the locks
        Arc::clone(
            sessions
                .entry(guild)
                .or_insert_with(|| {
                    debug!("Creating session for guild {}", guild);
                    Arc::new(Session::new(guild))
                }),
        )
    }

    pub async fn get(&self, guild: GuildId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&guild).cloned()
    }

    /// Drop a guild's session entirely.
    pub async fn remove(&self, guild: GuildId) -> bool {
        self.sessions.write().await.remove(&guild).is_some()
    }

    /// Number of guilds with live sessions.
    pub async fn guild_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Evict abandoned sessions.
    ///
    /// A session is abandoned when it is idle with an empty queue, has
    /// no live stream, and has not been touched for `idle_timeout`.
    /// Sessions with queued tracks or a live stream are never evicted.
    /// Returns the number of evicted sessions.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let candidates: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();

        let mut evicted = Vec::new();
        for session in candidates {
            let state = session.lock().await;
            let abandoned = state.queue.is_empty()
                && !state.queue.state().is_active()
                && state.stream.is_none()
                && state.last_active.elapsed() >= idle_timeout;
            if abandoned {
                evicted.push(session.guild());
            }
        }

        if evicted.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for guild in evicted {
            if sessions.remove(&guild).is_some() {
                info!("Evicted idle session for guild {}", guild);
                count += 1;
            }
        }
        count
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Background sweeper for abandoned sessions. Runs until the daemon
/// shuts down.
pub fn spawn_idle_sweeper(
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        // First tick completes immediately; skip it
        tick.tick().await;
        loop {
            tick.tick().await;
            let evicted = registry.sweep_idle(idle_timeout).await;
            if evicted > 0 {
                debug!("Idle sweep evicted {} session(s)", evicted);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jockey_common::Track;

    fn track(title: &str) -> Track {
        Track {
            title: title.to_string(),
            duration_display: "1:00".to_string(),
            thumbnail: None,
            source: format!("src://{title}"),
            requested_by: "tester#0001".to_string(),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create(GuildId(1)).await;
        let b = registry.get_or_create(GuildId(1)).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.guild_count().await, 1);

        registry.get_or_create(GuildId(2)).await;
        assert_eq!(registry.guild_count().await, 2);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create(GuildId(1)).await;
        let b = registry.get_or_create(GuildId(2)).await;

        a.lock().await.queue.enqueue(track("only in a"));
        assert_eq!(a.lock().await.queue.pending_len(), 1);
        assert_eq!(b.lock().await.queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = SessionRegistry::new();
        registry.get_or_create(GuildId(1)).await;
        assert!(registry.remove(GuildId(1)).await);
        assert!(!registry.remove(GuildId(1)).await);
        assert!(registry.get(GuildId(1)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_abandoned() {
        let registry = SessionRegistry::new();
        registry.get_or_create(GuildId(1)).await;
        let busy = registry.get_or_create(GuildId(2)).await;
        busy.lock().await.queue.enqueue(track("pending"));

        // Not yet past the timeout: nothing evicted
        assert_eq!(registry.sweep_idle(Duration::from_secs(900)).await, 0);

        tokio::time::advance(Duration::from_secs(901)).await;

        // Only the empty idle session goes; the one with queued work stays
        assert_eq!(registry.sweep_idle(Duration::from_secs(900)).await, 1);
        assert!(registry.get(GuildId(1)).await.is_none());
        assert!(registry.get(GuildId(2)).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_defers_eviction() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create(GuildId(1)).await;

        tokio::time::advance(Duration::from_secs(800)).await;
        session.lock().await.touch();
        tokio::time::advance(Duration::from_secs(200)).await;

        // 200s since touch, under the 900s timeout
        assert_eq!(registry.sweep_idle(Duration::from_secs(900)).await, 0);
        assert!(registry.get(GuildId(1)).await.is_some());
    }
}
