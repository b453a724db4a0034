//! Playback driver
//!
//! The per-guild state machine: resolves user input into tracks,
//! mutates the guild's queue, and drives the one-track-at-a-time
//! playback cycle. The cycle only moves forward on transport finish
//! signals; a skip stops the active stream and lets the resulting
//! signal advance the queue.
//!
//! All mutations for one guild run under that guild's session mutex,
//! including transport start calls, so a command and a finish signal
//! can never interleave a partial update. Resolution (network I/O)
//! runs before the lock is taken.

use crate::error::{Error, Result};
use crate::registry::{SessionRegistry, SessionState};
use crate::resolver::{resolve_input, MediaResolver};
use crate::transport::{TransportSignal, VoiceTransport};
use jockey_common::{EventBus, GuildId, JockeyEvent, PlaybackState, Track};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Arguments for the play operation.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayRequest {
    /// Free text or a direct media URL
    pub query: String,
    /// Requesting user's tag
    pub requested_by: String,
    /// Voice endpoint to bind when no connection exists yet
    pub endpoint: String,
}

/// What a play command did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlayOutcome {
    /// The session was idle; the track started streaming immediately
    Started { track: Track },
    /// Appended behind the current track (1-based queue position)
    Queued { track: Track, position: usize },
}

/// Read-only view of a guild's queue for the listing command.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub state: PlaybackState,
    pub loop_enabled: bool,
    pub volume: u8,
    pub bass_boost: u8,
}

/// Orchestrates queues, the resolver, and the voice transport.
pub struct PlaybackEngine {
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn MediaResolver>,
    transport: Arc<dyn VoiceTransport>,
    events: Arc<EventBus>,
    resolution_timeout: Duration,
}

impl PlaybackEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn MediaResolver>,
        transport: Arc<dyn VoiceTransport>,
        events: Arc<EventBus>,
        resolution_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            resolver,
            transport,
            events,
            resolution_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Resolve and enqueue one track; auto-start the cycle when idle.
    pub async fn play(self: &Arc<Self>, guild: GuildId, req: PlayRequest) -> Result<PlayOutcome> {
        // Resolution happens outside the session lock: a slow resolver
        // must not block finish signals for this guild.
        let secs = self.resolution_timeout.as_secs();
        let track = timeout(
            self.resolution_timeout,
            resolve_input(self.resolver.as_ref(), &req.query, &req.requested_by),
        )
        .await
        .map_err(|_| Error::ResolutionTimeout(secs))??;

        let session = self.registry.get_or_create(guild).await;
        let mut state = session.lock().await;
        state.touch();

        if state.queue.state().is_active() {
            let position = state.queue.enqueue(track.clone());
            info!("Guild {}: queued '{}' at position {}", guild, track.title, position);
            self.events.emit_lossy(JockeyEvent::TrackEnqueued {
                guild_id: guild,
                track: track.clone(),
                position,
                timestamp: chrono::Utc::now(),
            });
            return Ok(PlayOutcome::Queued { track, position });
        }

        // Idle: bind the voice endpoint (first play creates connection
        // and player together), then run the cycle.
        self.ensure_stream(guild, &mut state, &req.endpoint).await?;
        state.queue.enqueue(track);
        self.advance(guild, &mut state, PlaybackState::Idle).await;

        match state.queue.current() {
            Some(current) => Ok(PlayOutcome::Started {
                track: current.clone(),
            }),
            None => Err(Error::TransportFailure(
                "no queued track could be started".to_string(),
            )),
        }
    }

    /// Playing → Paused.
    pub async fn pause(&self, guild: GuildId) -> Result<()> {
        let session = self.registry.get(guild).await.ok_or(Error::NotPlaying)?;
        let mut state = session.lock().await;
        state.touch();

        if state.queue.state() != PlaybackState::Playing {
            return Err(Error::NotPlaying);
        }
        let stream = state.stream.as_mut().ok_or(Error::NotPlaying)?;
        stream.pause().await?;
        state.queue.set_state(PlaybackState::Paused);
        self.emit_state_change(guild, PlaybackState::Playing, PlaybackState::Paused);
        Ok(())
    }

    /// Paused → Playing.
    pub async fn resume(&self, guild: GuildId) -> Result<()> {
        let session = self.registry.get(guild).await.ok_or(Error::NotPaused)?;
        let mut state = session.lock().await;
        state.touch();

        if state.queue.state() != PlaybackState::Paused {
            return Err(Error::NotPaused);
        }
        let stream = state.stream.as_mut().ok_or(Error::NotPaused)?;
        stream.resume().await?;
        state.queue.set_state(PlaybackState::Playing);
        self.emit_state_change(guild, PlaybackState::Paused, PlaybackState::Playing);
        Ok(())
    }

    /// Stop the current track; the transport's finish signal advances
    /// the cycle. Never synchronously picks the next track.
    pub async fn skip(&self, guild: GuildId) -> Result<()> {
        let session = self.registry.get(guild).await.ok_or(Error::NotPlaying)?;
        let mut state = session.lock().await;
        state.touch();

        if !state.queue.state().is_active() {
            return Err(Error::NotPlaying);
        }
        let stream = state.stream.as_mut().ok_or(Error::NotPlaying)?;
        stream.stop().await?;
        Ok(())
    }

    /// Tear down transport + player and discard the queue. Idempotent;
    /// succeeds from any state.
    pub async fn stop(&self, guild: GuildId) -> Result<()> {
        let Some(session) = self.registry.get(guild).await else {
            return Ok(());
        };
        let mut state = session.lock().await;
        state.touch();
        self.teardown_locked(guild, &mut state).await;
        self.events.emit_lossy(JockeyEvent::SessionClosed {
            guild_id: guild,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Queue listing: current track plus pending in order.
    pub async fn queue_snapshot(&self, guild: GuildId) -> Result<QueueSnapshot> {
        let session = self.registry.get(guild).await.ok_or(Error::EmptyQueue)?;
        let state = session.lock().await;
        if state.queue.is_empty() {
            return Err(Error::EmptyQueue);
        }
        Ok(QueueSnapshot {
            current: state.queue.current().cloned(),
            pending: state.queue.pending().iter().cloned().collect(),
            state: state.queue.state(),
            loop_enabled: state.queue.loop_enabled(),
            volume: state.queue.volume(),
            bass_boost: state.queue.bass_boost(),
        })
    }

    /// Current track + settings; fails when nothing is playing.
    pub async fn now_playing(&self, guild: GuildId) -> Result<QueueSnapshot> {
        let snapshot = self
            .queue_snapshot(guild)
            .await
            .map_err(|_| Error::NoActivePlayback)?;
        if snapshot.current.is_none() {
            return Err(Error::NoActivePlayback);
        }
        Ok(snapshot)
    }

    /// Empty the pending list only.
    pub async fn clear(&self, guild: GuildId) -> Result<()> {
        let session = self.registry.get_or_create(guild).await;
        let mut state = session.lock().await;
        state.touch();
        state.queue.clear();
        self.emit_queue_changed(guild);
        Ok(())
    }

    /// Store the volume setting. Requires active playback; the value is
    /// applied as initial gain on the next stream start, not to the
    /// stream already playing.
    pub async fn set_volume(&self, guild: GuildId, volume: u8) -> Result<()> {
        let session = self
            .registry
            .get(guild)
            .await
            .ok_or(Error::NoActivePlayback)?;
        let mut state = session.lock().await;
        state.touch();
        if !state.queue.state().is_active() {
            return Err(Error::NoActivePlayback);
        }
        state.queue.set_volume(volume)?;
        self.events.emit_lossy(JockeyEvent::VolumeChanged {
            guild_id: guild,
            volume,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Store the bass boost setting (declared inert).
    pub async fn set_bass_boost(&self, guild: GuildId, level: u8) -> Result<()> {
        let session = self.registry.get_or_create(guild).await;
        let mut state = session.lock().await;
        state.touch();
        state.queue.set_bass_boost(level)
    }

    /// Flip loop mode; returns the new value.
    pub async fn toggle_loop(&self, guild: GuildId) -> Result<bool> {
        let session = self.registry.get_or_create(guild).await;
        let mut state = session.lock().await;
        state.touch();
        let enabled = state.queue.toggle_loop();
        self.events.emit_lossy(JockeyEvent::LoopToggled {
            guild_id: guild,
            enabled,
            timestamp: chrono::Utc::now(),
        });
        Ok(enabled)
    }

    /// One-shot random reorder of the pending list.
    pub async fn shuffle(&self, guild: GuildId) -> Result<()> {
        let session = self.registry.get_or_create(guild).await;
        let mut state = session.lock().await;
        state.touch();
        state.queue.shuffle(&mut rand::thread_rng())?;
        self.emit_queue_changed(guild);
        Ok(())
    }

    /// Remove the pending track at a 1-based position.
    pub async fn remove_track(&self, guild: GuildId, position: usize) -> Result<Track> {
        let session = self.registry.get_or_create(guild).await;
        let mut state = session.lock().await;
        state.touch();
        let removed = state.queue.remove_at(position)?;
        self.emit_queue_changed(guild);
        Ok(removed)
    }

    /// Truncate the pending list down to a 1-based position, then stop
    /// the current stream so the cycle picks up the new front.
    pub async fn skip_to(&self, guild: GuildId, position: usize) -> Result<()> {
        let session = self.registry.get(guild).await.ok_or(Error::NoPlayer)?;
        let mut state = session.lock().await;
        state.touch();
        if state.stream.is_none() {
            return Err(Error::NoPlayer);
        }
        state.queue.skip_to(position)?;
        self.emit_queue_changed(guild);
        let stream = state.stream.as_mut().ok_or(Error::NoPlayer)?;
        stream.stop().await?;
        Ok(())
    }

    // ========================================================================
    // Cycle internals
    // ========================================================================

    /// Connect the voice transport for this guild if absent, wiring
    /// its signal channel into the engine.
    async fn ensure_stream(
        self: &Arc<Self>,
        guild: GuildId,
        state: &mut SessionState,
        endpoint: &str,
    ) -> Result<()> {
        if state.stream.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = self.transport.connect(guild, endpoint, tx).await?;
        state.stream = Some(stream);
        state.stream_epoch += 1;
        let epoch = state.stream_epoch;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                engine.handle_signal(guild, epoch, signal).await;
            }
            debug!("Signal channel closed for guild {} (epoch {})", guild, epoch);
        });
        Ok(())
    }

    /// React to a transport lifecycle signal.
    ///
    /// Signals from a stream that has since been torn down carry a
    /// stale epoch and are dropped.
    async fn handle_signal(&self, guild: GuildId, epoch: u64, signal: TransportSignal) {
        let Some(session) = self.registry.get(guild).await else {
            return;
        };
        let mut state = session.lock().await;
        if state.stream_epoch != epoch || state.stream.is_none() {
            debug!("Dropping stale signal {:?} for guild {}", signal, guild);
            return;
        }
        state.touch();

        let old_state = state.queue.state();
        match signal {
            TransportSignal::Finished => {
                if let Some(track) = state.queue.take_current() {
                    if state.queue.loop_enabled() {
                        state.queue.requeue_front(track);
                    }
                }
                self.advance(guild, &mut state, old_state).await;
            }
            TransportSignal::Error(message) => {
                warn!("Guild {}: stream error: {}", guild, message);
                self.events.emit_lossy(JockeyEvent::PlaybackError {
                    guild_id: guild,
                    message,
                    terminal: false,
                    timestamp: chrono::Utc::now(),
                });
                // The failed track is dropped even in loop mode so a
                // broken source cannot cycle forever.
                state.queue.take_current();
                self.advance(guild, &mut state, old_state).await;
            }
            TransportSignal::ConnectionLost => {
                warn!("Guild {}: voice connection lost", guild);
                self.teardown_locked(guild, &mut state).await;
                self.events.emit_lossy(JockeyEvent::SessionClosed {
                    guild_id: guild,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    /// The cycle body: pop the next track and start it, or declare the
    /// queue exhausted.
    ///
    /// A bounded loop, never recursion: every iteration consumes one
    /// pending track, and a track that fails to start is not
    /// re-inserted, so at most `pending` length attempts happen. When
    /// every candidate fails the cycle reports a terminal transport
    /// failure and settles Idle.
    async fn advance(&self, guild: GuildId, state: &mut SessionState, old_state: PlaybackState) {
        let mut attempts = 0usize;
        let mut failures = 0usize;

        loop {
            let Some(track) = state.queue.dequeue_next() else {
                // Queue exhausted: a normal terminal state
                state.queue.take_current();
                if attempts > 0 && attempts == failures {
                    self.events.emit_lossy(JockeyEvent::PlaybackError {
                        guild_id: guild,
                        message: format!(
                            "playback aborted: all {failures} queued track(s) failed to start"
                        ),
                        terminal: true,
                        timestamp: chrono::Utc::now(),
                    });
                }
                info!("Guild {}: queue exhausted", guild);
                self.events.emit_lossy(JockeyEvent::QueueExhausted {
                    guild_id: guild,
                    timestamp: chrono::Utc::now(),
                });
                self.emit_state_change(guild, old_state, PlaybackState::Idle);
                return;
            };

            let Some(stream) = state.stream.as_mut() else {
                // No live stream to feed; keep the track for a later play
                state.queue.requeue_front(track);
                return;
            };

            attempts += 1;
            let gain = f32::from(state.queue.volume()) / 100.0;
            match stream.start(&track.source, gain).await {
                Ok(()) => {
                    info!("Guild {}: now playing '{}'", guild, track.title);
                    state.queue.set_current(track.clone());
                    self.events.emit_lossy(JockeyEvent::TrackStarted {
                        guild_id: guild,
                        track,
                        timestamp: chrono::Utc::now(),
                    });
                    self.emit_state_change(guild, old_state, PlaybackState::Playing);
                    return;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Guild {}: failed to start '{}': {} (skipping)",
                        guild, track.title, e
                    );
                    self.events.emit_lossy(JockeyEvent::PlaybackError {
                        guild_id: guild,
                        message: format!("error playing '{}', skipping to next", track.title),
                        terminal: false,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        }
    }

    /// Destroy transport + player together and discard pending +
    /// current. The epoch bump invalidates in-flight signals.
    async fn teardown_locked(&self, guild: GuildId, state: &mut SessionState) {
        state.stream_epoch += 1;
        if let Some(mut stream) = state.stream.take() {
            if let Err(e) = stream.stop().await {
                debug!("Guild {}: stop during teardown failed: {}", guild, e);
            }
            stream.disconnect().await;
        }
        let old_state = state.queue.state();
        state.queue.clear();
        state.queue.take_current();
        self.emit_state_change(guild, old_state, PlaybackState::Idle);
    }

    fn emit_state_change(&self, guild: GuildId, old: PlaybackState, new: PlaybackState) {
        if old == new {
            return;
        }
        self.events.emit_lossy(JockeyEvent::PlaybackStateChanged {
            guild_id: guild,
            old_state: old,
            new_state: new,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_queue_changed(&self, guild: GuildId) {
        self.events.emit_lossy(JockeyEvent::QueueChanged {
            guild_id: guild,
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedMedia;
    use crate::transport::VoiceStream;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Resolver that answers every query with a track named after it.
    struct EchoResolver;

    #[async_trait]
    impl MediaResolver for EchoResolver {
        async fn resolve_url(&self, url: &str) -> Result<ResolvedMedia> {
            Ok(ResolvedMedia {
                title: url.to_string(),
                duration_secs: Some(180),
                thumbnail: None,
                source: format!("src://{url}"),
            })
        }

        async fn search(&self, query: &str) -> Result<Option<ResolvedMedia>> {
            Ok(Some(ResolvedMedia {
                title: query.to_string(),
                duration_secs: Some(180),
                thumbnail: None,
                source: format!("src://{query}"),
            }))
        }
    }

    /// Resolver that never answers (for timeout coverage).
    struct HangingResolver;

    #[async_trait]
    impl MediaResolver for HangingResolver {
        async fn resolve_url(&self, _url: &str) -> Result<ResolvedMedia> {
            futures::future::pending().await
        }

        async fn search(&self, _query: &str) -> Result<Option<ResolvedMedia>> {
            futures::future::pending().await
        }
    }

    #[derive(Default)]
    struct TransportLog {
        started: Vec<(String, f32)>,
        stopped: usize,
        paused: usize,
        resumed: usize,
        disconnected: usize,
    }

    /// In-memory transport. Keeps the signal sender alive so tests can
    /// drive the engine's signal handler directly and deterministically.
    struct FakeTransport {
        log: Arc<StdMutex<TransportLog>>,
        fail_starts: AtomicUsize,
        fail_connect: AtomicBool,
        senders: StdMutex<Vec<mpsc::UnboundedSender<TransportSignal>>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                log: Arc::new(StdMutex::new(TransportLog::default())),
                fail_starts: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                senders: StdMutex::new(Vec::new()),
            }
        }

        /// Make the next `n` stream starts fail.
        fn fail_next_starts(&self, n: usize) {
            self.fail_starts.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl VoiceTransport for FakeTransport {
        async fn connect(
            &self,
            _guild: GuildId,
            _endpoint: &str,
            signals: mpsc::UnboundedSender<TransportSignal>,
        ) -> Result<Box<dyn VoiceStream>> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(Error::TransportFailure("connect refused".to_string()));
            }
            self.senders.lock().unwrap().push(signals);
            Ok(Box::new(FakeStream {
                log: Arc::clone(&self.log),
                fail_starts: Arc::new(AtomicUsize::new(
                    self.fail_starts.load(Ordering::SeqCst),
                )),
            }))
        }
    }

    struct FakeStream {
        log: Arc<StdMutex<TransportLog>>,
        fail_starts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VoiceStream for FakeStream {
        async fn start(&mut self, source: &str, gain: f32) -> Result<()> {
            let remaining = self.fail_starts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_starts.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::TransportFailure("start refused".to_string()));
            }
            self.log
                .lock()
                .unwrap()
                .started
                .push((source.to_string(), gain));
            Ok(())
        }

        async fn pause(&mut self) -> Result<()> {
            self.log.lock().unwrap().paused += 1;
            Ok(())
        }

        async fn resume(&mut self) -> Result<()> {
            self.log.lock().unwrap().resumed += 1;
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.log.lock().unwrap().stopped += 1;
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.log.lock().unwrap().disconnected += 1;
        }
    }

    const GUILD: GuildId = GuildId(42);

    fn build_engine(
        resolver: Arc<dyn MediaResolver>,
        transport: Arc<FakeTransport>,
    ) -> Arc<PlaybackEngine> {
        Arc::new(PlaybackEngine::new(
            Arc::new(SessionRegistry::new()),
            resolver,
            transport,
            Arc::new(EventBus::new(100)),
            Duration::from_secs(5),
        ))
    }

    fn play_req(query: &str) -> PlayRequest {
        PlayRequest {
            query: query.to_string(),
            requested_by: "tester#0001".to_string(),
            endpoint: "voice-1".to_string(),
        }
    }

    /// Inject a finish signal the way the transport pump would.
    async fn finish(engine: &Arc<PlaybackEngine>, epoch: u64) {
        engine
            .handle_signal(GUILD, epoch, TransportSignal::Finished)
            .await;
    }

    #[tokio::test]
    async fn test_play_auto_starts_then_queues() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        // First play: idle session auto-starts
        let outcome = engine.play(GUILD, play_req("Song A")).await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Started { ref track } if track.title == "Song A"));

        let snapshot = engine.queue_snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.current.as_ref().unwrap().title, "Song A");
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.state, PlaybackState::Playing);

        // Second play while active: appended at position 1
        let outcome = engine.play(GUILD, play_req("Song B")).await.unwrap();
        assert!(
            matches!(outcome, PlayOutcome::Queued { position: 1, ref track } if track.title == "Song B")
        );

        // Finish signal: Song B becomes current
        finish(&engine, 1).await;
        let snapshot = engine.queue_snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.current.as_ref().unwrap().title, "Song B");
        assert!(snapshot.pending.is_empty());

        // Final finish: queue exhausted, session idle
        finish(&engine, 1).await;
        assert!(matches!(
            engine.queue_snapshot(GUILD).await,
            Err(Error::EmptyQueue)
        ));
        let session = engine.registry().get(GUILD).await.unwrap();
        let state = session.lock().await;
        assert_eq!(state.queue.state(), PlaybackState::Idle);
        assert!(state.queue.current().is_none());
    }

    #[tokio::test]
    async fn test_queue_exhausted_event_emitted() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));
        let mut rx = engine.events.subscribe();

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        finish(&engine, 1).await;

        let mut saw_exhausted = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, JockeyEvent::QueueExhausted { guild_id, .. } if guild_id == GUILD) {
                saw_exhausted = true;
            }
        }
        assert!(saw_exhausted);
    }

    #[tokio::test]
    async fn test_loop_reinserts_current_at_front() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        engine.play(GUILD, play_req("Song B")).await.unwrap();
        assert!(engine.toggle_loop(GUILD).await.unwrap());

        // Finish: looped Song A beats Song B back to the front
        finish(&engine, 1).await;
        let snapshot = engine.queue_snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.current.as_ref().unwrap().title, "Song A");
        let pending: Vec<&str> = snapshot.pending.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(pending, ["Song B"]);
    }

    #[tokio::test]
    async fn test_pause_resume_transitions_and_guards() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        // Nothing playing yet
        assert!(matches!(engine.pause(GUILD).await, Err(Error::NotPlaying)));
        assert!(matches!(engine.resume(GUILD).await, Err(Error::NotPaused)));

        engine.play(GUILD, play_req("Song A")).await.unwrap();

        engine.pause(GUILD).await.unwrap();
        assert!(matches!(engine.pause(GUILD).await, Err(Error::NotPlaying)));

        engine.resume(GUILD).await.unwrap();
        assert!(matches!(engine.resume(GUILD).await, Err(Error::NotPaused)));

        let log = transport.log.lock().unwrap();
        assert_eq!(log.paused, 1);
        assert_eq!(log.resumed, 1);
    }

    #[tokio::test]
    async fn test_skip_stops_stream_without_advancing() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        assert!(matches!(engine.skip(GUILD).await, Err(Error::NotPlaying)));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        engine.play(GUILD, play_req("Song B")).await.unwrap();
        engine.skip(GUILD).await.unwrap();

        // Skip itself does not advance; only the finish signal does
        let snapshot = engine.queue_snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.current.as_ref().unwrap().title, "Song A");
        assert_eq!(transport.log.lock().unwrap().stopped, 1);

        finish(&engine, 1).await;
        let snapshot = engine.queue_snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.current.as_ref().unwrap().title, "Song B");
    }

    #[tokio::test]
    async fn test_stop_tears_down_everything() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        engine.play(GUILD, play_req("Song B")).await.unwrap();
        engine.stop(GUILD).await.unwrap();

        let session = engine.registry().get(GUILD).await.unwrap();
        let state = session.lock().await;
        assert!(state.queue.is_empty());
        assert!(state.queue.current().is_none());
        assert_eq!(state.queue.state(), PlaybackState::Idle);
        assert!(state.stream.is_none());
        drop(state);

        let log = transport.log.lock().unwrap();
        assert_eq!(log.disconnected, 1);

        // Stop with no session is fine
        engine.stop(GuildId(999)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_finish_signal_after_stop_is_ignored() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        engine.play(GUILD, play_req("Song B")).await.unwrap();
        engine.stop(GUILD).await.unwrap();

        // The stop() call made the gateway emit a finish for epoch 1
        finish(&engine, 1).await;

        let session = engine.registry().get(GUILD).await.unwrap();
        let state = session.lock().await;
        assert!(state.queue.is_empty());
        assert_eq!(state.queue.state(), PlaybackState::Idle);
        // The stale signal must not have restarted anything
        assert_eq!(transport.log.lock().unwrap().started.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_skips_to_next_track() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_starts(1);
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        // Song A fails to start; the cycle moves on to Song B. Both
        // tracks are enqueued before the first start because the first
        // play holds the lock only briefly.
        let session = engine.registry().get_or_create(GUILD).await;
        {
            let mut state = session.lock().await;
            state.queue.enqueue(Track {
                title: "Song B".to_string(),
                duration_display: "3:00".to_string(),
                thumbnail: None,
                source: "src://Song B".to_string(),
                requested_by: "tester#0001".to_string(),
            });
        }

        let outcome = engine.play(GUILD, play_req("Song A")).await.unwrap();
        // play enqueues Song A behind Song B; Song B fails, Song A starts
        assert!(matches!(outcome, PlayOutcome::Started { ref track } if track.title == "Song A"));

        let log = transport.log.lock().unwrap();
        assert_eq!(log.started.len(), 1);
        assert_eq!(log.started[0].0, "src://Song A");
    }

    #[tokio::test]
    async fn test_total_start_failure_terminates_idle() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_starts(10);
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));
        let mut rx = engine.events.subscribe();

        let err = engine.play(GUILD, play_req("Song A")).await.unwrap_err();
        assert!(matches!(err, Error::TransportFailure(_)));

        let session = engine.registry().get(GUILD).await.unwrap();
        let state = session.lock().await;
        assert_eq!(state.queue.state(), PlaybackState::Idle);
        assert!(state.queue.is_empty());
        drop(state);

        let mut saw_terminal = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, JockeyEvent::PlaybackError { terminal: true, .. }) {
                saw_terminal = true;
            }
        }
        assert!(saw_terminal);
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_connect.store(true, Ordering::SeqCst);
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        let err = engine.play(GUILD, play_req("Song A")).await.unwrap_err();
        assert!(matches!(err, Error::TransportFailure(_)));
    }

    #[tokio::test]
    async fn test_connection_lost_closes_session() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        engine.play(GUILD, play_req("Song B")).await.unwrap();

        engine
            .handle_signal(GUILD, 1, TransportSignal::ConnectionLost)
            .await;

        let session = engine.registry().get(GUILD).await.unwrap();
        let state = session.lock().await;
        assert!(state.stream.is_none());
        assert!(state.queue.is_empty());
        assert_eq!(state.queue.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_stream_error_advances_without_loop_reinsert() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        engine.play(GUILD, play_req("Song B")).await.unwrap();
        engine.toggle_loop(GUILD).await.unwrap();

        engine
            .handle_signal(GUILD, 1, TransportSignal::Error("decode failed".to_string()))
            .await;

        // Song A is dropped despite loop mode; Song B plays
        let snapshot = engine.queue_snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.current.as_ref().unwrap().title, "Song B");
        assert!(snapshot.pending.is_empty());
    }

    #[tokio::test]
    async fn test_skip_to_truncates_then_advances_on_finish() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        for title in ["Song A", "Song B", "Song C", "Song D", "Song E"] {
            engine.play(GUILD, play_req(title)).await.unwrap();
        }
        // current = A, pending = [B, C, D, E]

        engine.skip_to(GUILD, 3).await.unwrap();
        let snapshot = engine.queue_snapshot(GUILD).await.unwrap();
        let pending: Vec<&str> = snapshot.pending.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(pending, ["Song D", "Song E"]);

        finish(&engine, 1).await;
        let snapshot = engine.queue_snapshot(GUILD).await.unwrap();
        assert_eq!(snapshot.current.as_ref().unwrap().title, "Song D");
    }

    #[tokio::test]
    async fn test_skip_to_requires_player_and_valid_position() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        assert!(matches!(engine.skip_to(GUILD, 1).await, Err(Error::NoPlayer)));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        assert!(matches!(
            engine.skip_to(GUILD, 5).await,
            Err(Error::OutOfRange { position: 5, len: 0 })
        ));
    }

    #[tokio::test]
    async fn test_volume_requires_active_playback_and_applies_gain() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        assert!(matches!(
            engine.set_volume(GUILD, 80).await,
            Err(Error::NoActivePlayback)
        ));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        engine.set_volume(GUILD, 80).await.unwrap();
        assert!(matches!(
            engine.set_volume(GUILD, 101).await,
            Err(Error::InvalidRange(101))
        ));

        // Default volume applied as initial gain on the first start
        assert_eq!(transport.log.lock().unwrap().started[0].1, 0.5);

        // Next track starts with the stored 80% gain
        engine.play(GUILD, play_req("Song B")).await.unwrap();
        finish(&engine, 1).await;
        assert_eq!(transport.log.lock().unwrap().started[1].1, 0.8);
    }

    #[tokio::test]
    async fn test_now_playing_and_remove() {
        let transport = Arc::new(FakeTransport::new());
        let engine = build_engine(Arc::new(EchoResolver), Arc::clone(&transport));

        assert!(matches!(
            engine.now_playing(GUILD).await,
            Err(Error::NoActivePlayback)
        ));

        engine.play(GUILD, play_req("Song A")).await.unwrap();
        engine.play(GUILD, play_req("Song B")).await.unwrap();
        engine.play(GUILD, play_req("Song C")).await.unwrap();

        let now = engine.now_playing(GUILD).await.unwrap();
        assert_eq!(now.current.unwrap().title, "Song A");

        let removed = engine.remove_track(GUILD, 1).await.unwrap();
        assert_eq!(removed.title, "Song B");
        assert!(matches!(
            engine.remove_track(GUILD, 9).await,
            Err(Error::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolution_timeout() {
        let transport = Arc::new(FakeTransport::new());
        let engine = Arc::new(PlaybackEngine::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(HangingResolver),
            transport,
            Arc::new(EventBus::new(100)),
            Duration::from_millis(20),
        ));

        let err = engine.play(GUILD, play_req("anything")).await.unwrap_err();
        assert!(matches!(err, Error::ResolutionTimeout(_)));
    }
}
