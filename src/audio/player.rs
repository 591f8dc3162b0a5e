use async_trait::async_trait;
use chrono::Utc;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{Advance, LoopMode, PlayerState, SessionStore, SharedSession},
        transport::{CompletionHook, PlaybackEvent, Transport},
    },
    error::{MusicError, MusicResult},
    sources::Track,
};

/// Status messages pushed to a guild's text channel without a command asking.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NowPlaying(Track),
    PlaybackFailed { title: String, reason: String },
    QueueFinished,
}

/// Notification channel collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: ChannelId, notice: Notice);
}

/// Result of [`PlaybackController::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub added: usize,
    /// Set when the session was idle and the first new track started.
    pub started: Option<Track>,
    pub queue_len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub loop_mode: LoopMode,
    pub state: PlayerState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track: Track,
    pub elapsed: Duration,
    pub state: PlayerState,
}

/// Drives every guild's queue → transport state machine.
///
/// Commands call in directly. Track completions arrive as [`PlaybackEvent`]s
/// on the channel returned by [`PlaybackController::new`] and must be fed to
/// [`PlaybackController::handle_event`], normally by [`PlaybackController::run`].
pub struct PlaybackController {
    sessions: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    events: flume::Sender<PlaybackEvent>,
    max_queue_size: usize,
}

impl PlaybackController {
    pub fn new(
        sessions: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        max_queue_size: usize,
    ) -> (Self, flume::Receiver<PlaybackEvent>) {
        let (events, receiver) = flume::unbounded();
        let controller = Self {
            sessions,
            transport,
            notifier,
            events,
            max_queue_size,
        };
        (controller, receiver)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run queue: applies completion events one at a time.
    pub async fn run(self: Arc<Self>, events: flume::Receiver<PlaybackEvent>) {
        info!("🎛️ Playback controller started");
        while let Ok(event) = events.recv_async().await {
            self.handle_event(event).await;
        }
        info!("🎛️ Playback controller stopped");
    }

    /// Periodically disconnects voice connections that are neither playing
    /// nor paused.
    pub async fn run_idle_sweep(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let disconnected = self.sweep_idle().await;
            if disconnected > 0 {
                info!(
                    "🧹 Idle sweep disconnected {} voice connection(s), {} session(s) left",
                    disconnected,
                    self.sessions.len()
                );
            } else {
                debug!("🧹 Idle sweep found nothing to disconnect");
            }
        }
    }

    pub async fn handle_event(&self, event: PlaybackEvent) {
        let guild_id = event.guild_id();
        let Some(session) = self.sessions.get(guild_id) else {
            debug!("Event for guild {} without session, ignoring", guild_id);
            return;
        };

        let (step, channel, failure) = {
            let mut s = session.lock();
            if s.playback_id() != Some(event.playback_id()) {
                debug!(
                    "Stale completion #{} in guild {}, ignoring",
                    event.playback_id(),
                    guild_id
                );
                return;
            }

            let title = s
                .current()
                .map(|t| t.title().to_string())
                .unwrap_or_default();
            let failure = match event {
                PlaybackEvent::Finished { error, .. } => error.map(|reason| (title, reason)),
                PlaybackEvent::StartFailed { error, .. } => Some((title, error)),
            };
            // A failed track is never looped back in; it would fail again
            if failure.is_some() {
                s.discard_current();
            }

            (s.advance(), s.text_channel(), failure)
        };

        if let Some((title, reason)) = failure {
            warn!("❌ Playback failed in guild {}: {}", guild_id, reason);
            if let Some(channel) = channel {
                self.notifier
                    .notify(channel, Notice::PlaybackFailed { title, reason })
                    .await;
            }
        }

        self.apply(guild_id, channel, step).await;
    }

    /// Appends tracks; starts playback right away when the guild is idle.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        channel: ChannelId,
        tracks: Vec<Track>,
    ) -> MusicResult<Enqueued> {
        let session = self.sessions.get_or_create(guild_id);

        let (added, step, queue_len) = {
            let mut s = session.lock();
            s.set_text_channel(channel);
            let added = s.push_tracks(tracks, self.max_queue_size)?;
            let step = (s.state() == PlayerState::Idle).then(|| s.advance());
            (added, step, s.queue().len())
        };

        info!("➕ Queued {} track(s) in guild {}", added, guild_id);

        let started = match &step {
            Some(Advance::Start { track, .. }) => Some(track.clone()),
            _ => None,
        };
        if let Some(step) = step {
            self.apply(guild_id, Some(channel), step).await;
        }

        Ok(Enqueued {
            added,
            started,
            queue_len,
        })
    }

    /// Stops the current stream; the completion path advances the queue.
    pub async fn skip(&self, guild_id: GuildId) -> MusicResult<Track> {
        let current = {
            let session = self.session(guild_id)?;
            let s = session.lock();
            match (s.state(), s.current()) {
                (PlayerState::Playing | PlayerState::Paused, Some(track)) => track.clone(),
                _ => return Err(MusicError::precondition("Nothing is playing right now!")),
            }
        };

        self.transport.stop(guild_id).await?;
        info!("⏭️ Skipped {} in guild {}", current.title(), guild_id);
        Ok(current)
    }

    /// Clears everything and leaves the voice channel. Never advances.
    pub async fn stop(&self, guild_id: GuildId) -> MusicResult<()> {
        self.sessions.clear(guild_id);
        self.transport.stop(guild_id).await?;
        self.transport.disconnect(guild_id).await?;
        info!("⏹️ Playback stopped in guild {}", guild_id);
        Ok(())
    }

    pub async fn pause(&self, guild_id: GuildId) -> MusicResult<()> {
        let session = self.session(guild_id)?;
        let playback_id = {
            let s = session.lock();
            match s.state() {
                PlayerState::Idle => {
                    return Err(MusicError::precondition("Nothing is playing right now!"))
                }
                PlayerState::Paused => {
                    return Err(MusicError::precondition("The track is already paused!"))
                }
                PlayerState::Playing => s.playback_id(),
            }
        };

        self.transport.pause(guild_id).await?;
        self.transition(&session, playback_id, PlayerState::Paused);
        info!("⏸️ Paused in guild {}", guild_id);
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId) -> MusicResult<()> {
        let session = self.session(guild_id)?;
        let playback_id = {
            let s = session.lock();
            if s.state() != PlayerState::Paused {
                return Err(MusicError::precondition("The track is not paused!"));
            }
            s.playback_id()
        };

        self.transport.resume(guild_id).await?;
        self.transition(&session, playback_id, PlayerState::Playing);
        info!("▶️ Resumed in guild {}", guild_id);
        Ok(())
    }

    /// Removes the waiting track at 1-based `position`.
    pub fn remove(&self, guild_id: GuildId, position: usize) -> MusicResult<Track> {
        let removed = self.sessions.get_or_create(guild_id).lock().remove(position)?;
        debug!("✂️ Removed {} from guild {}", removed.title(), guild_id);
        Ok(removed)
    }

    /// Empties the waiting queue; the current track keeps playing.
    pub fn clear_queue(&self, guild_id: GuildId) -> MusicResult<usize> {
        let session = self.sessions.get_or_create(guild_id);
        let mut s = session.lock();
        if s.queue().is_empty() {
            return Err(MusicError::precondition("The queue is already empty!"));
        }
        Ok(s.clear_queue())
    }

    pub fn set_loop_mode(&self, guild_id: GuildId, mode: LoopMode) {
        self.sessions.get_or_create(guild_id).lock().set_loop_mode(mode);
    }

    pub fn loop_mode(&self, guild_id: GuildId) -> LoopMode {
        self.sessions.get_or_create(guild_id).lock().loop_mode()
    }

    pub fn snapshot(&self, guild_id: GuildId) -> QueueSnapshot {
        let session = self.sessions.get_or_create(guild_id);
        let s = session.lock();
        QueueSnapshot {
            current: s.current().cloned(),
            upcoming: s.queue().iter().cloned().collect(),
            loop_mode: s.loop_mode(),
            state: s.state(),
        }
    }

    pub fn now_playing(&self, guild_id: GuildId) -> MusicResult<NowPlaying> {
        let session = self.session(guild_id)?;
        let s = session.lock();

        let track = match (s.state(), s.current()) {
            (PlayerState::Playing | PlayerState::Paused, Some(track)) => track.clone(),
            _ => return Err(MusicError::precondition("Nothing is playing right now!")),
        };
        let elapsed = s.elapsed_at(Utc::now());

        Ok(NowPlaying {
            track,
            elapsed,
            state: s.state(),
        })
    }

    /// Teardown after the bot left voice for any reason.
    pub async fn on_voice_disconnect(&self, guild_id: GuildId) {
        if let Err(e) = self.transport.disconnect(guild_id).await {
            warn!("Error cleaning up voice for guild {}: {}", guild_id, e);
        }
        self.sessions.purge(guild_id);
    }

    /// Disconnects idle voice connections and drops their sessions.
    ///
    /// A connection is only dropped if the transport reports it idle both
    /// before and after checking that its session is not about to start a
    /// track.
    pub async fn sweep_idle(&self) -> usize {
        let mut disconnected = 0;

        for guild_id in self.transport.connected_guilds() {
            if self.transport.status(guild_id).await.is_active() {
                continue;
            }

            let session_busy = self
                .sessions
                .get(guild_id)
                .map(|s| s.lock().state() != PlayerState::Idle)
                .unwrap_or(false);
            if session_busy {
                debug!("Guild {} is starting a track, not sweeping", guild_id);
                continue;
            }

            if self.transport.status(guild_id).await.is_active() {
                continue;
            }

            match self.transport.disconnect(guild_id).await {
                Ok(()) => {
                    self.sessions.purge(guild_id);
                    info!("💤 Left idle voice channel in guild {}", guild_id);
                    disconnected += 1;
                }
                Err(e) => warn!("Could not disconnect idle guild {}: {}", guild_id, e),
            }
        }

        disconnected
    }

    fn session(&self, guild_id: GuildId) -> MusicResult<SharedSession> {
        self.sessions
            .get(guild_id)
            .ok_or_else(|| MusicError::precondition("Nothing is playing right now!"))
    }

    fn transition(&self, session: &SharedSession, playback_id: Option<u64>, state: PlayerState) {
        let mut s = session.lock();
        // The track may have ended while the transport call was in flight
        if s.playback_id() == playback_id && s.current().is_some() {
            s.set_state(state);
        }
    }

    async fn apply(&self, guild_id: GuildId, channel: Option<ChannelId>, step: Advance) {
        match step {
            Advance::Start { track, playback_id } => {
                self.start(guild_id, channel, track, playback_id).await
            }
            Advance::Finished => {
                info!("📭 Queue finished in guild {}", guild_id);
                if let Some(channel) = channel {
                    self.notifier.notify(channel, Notice::QueueFinished).await;
                }
            }
        }
    }

    async fn start(
        &self,
        guild_id: GuildId,
        channel: Option<ChannelId>,
        track: Track,
        playback_id: u64,
    ) {
        let hook = CompletionHook::new(guild_id, playback_id, self.events.clone());

        match self.transport.play(guild_id, &track, hook.clone()).await {
            Ok(()) => {
                info!("🎵 Now playing in guild {}: {}", guild_id, track.title());
                if let Some(channel) = channel {
                    self.notifier.notify(channel, Notice::NowPlaying(track)).await;
                }
            }
            Err(e) if !self.transport.is_connected(guild_id) => {
                // Without a voice connection nothing else in the queue can play either
                error!("❌ Lost voice connection in guild {}: {}", guild_id, e);
                if let Some(session) = self.sessions.get(guild_id) {
                    let mut s = session.lock();
                    if s.playback_id() == Some(playback_id) {
                        s.clear();
                    }
                }
                if let Some(channel) = channel {
                    self.notifier
                        .notify(
                            channel,
                            Notice::PlaybackFailed {
                                title: track.title().to_string(),
                                reason: e.to_string(),
                            },
                        )
                        .await;
                }
            }
            Err(e) => {
                error!("❌ Could not start {}: {}", track.title(), e);
                hook.fail_to_start(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transport::TransportStatus;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::collections::{HashMap, HashSet};

    /// In-memory transport that behaves like songbird: `stop` resolves the
    /// completion hook as a normal end.
    #[derive(Default)]
    struct FakeTransport {
        connected: Mutex<HashSet<GuildId>>,
        hooks: Mutex<HashMap<GuildId, CompletionHook>>,
        status: Mutex<HashMap<GuildId, TransportStatus>>,
        played: Mutex<Vec<(GuildId, String)>>,
        failing: Mutex<HashSet<String>>,
        disconnects: Mutex<Vec<GuildId>>,
    }

    impl FakeTransport {
        fn finish(&self, guild_id: GuildId, error: Option<&str>) {
            self.status.lock().insert(guild_id, TransportStatus::Idle);
            let hook = self.hooks.lock().remove(&guild_id).expect("nothing playing");
            hook.complete(error.map(str::to_string));
        }

        fn played(&self, guild_id: GuildId) -> Vec<String> {
            self.played
                .lock()
                .iter()
                .filter(|(g, _)| *g == guild_id)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self, guild_id: GuildId, _channel_id: ChannelId) -> MusicResult<()> {
            self.connected.lock().insert(guild_id);
            Ok(())
        }

        fn is_connected(&self, guild_id: GuildId) -> bool {
            self.connected.lock().contains(&guild_id)
        }

        async fn play(
            &self,
            guild_id: GuildId,
            track: &Track,
            on_complete: CompletionHook,
        ) -> MusicResult<()> {
            if !self.is_connected(guild_id) {
                return Err(MusicError::transport("I'm not connected to a voice channel!"));
            }
            if self.failing.lock().contains(track.title()) {
                return Err(MusicError::transport("unsupported stream"));
            }
            self.played
                .lock()
                .push((guild_id, track.title().to_string()));
            self.status.lock().insert(guild_id, TransportStatus::Playing);
            // Replacing a stream ends the previous one
            if let Some(old) = self.hooks.lock().insert(guild_id, on_complete) {
                old.complete(None);
            }
            Ok(())
        }

        async fn pause(&self, guild_id: GuildId) -> MusicResult<()> {
            self.status.lock().insert(guild_id, TransportStatus::Paused);
            Ok(())
        }

        async fn resume(&self, guild_id: GuildId) -> MusicResult<()> {
            self.status.lock().insert(guild_id, TransportStatus::Playing);
            Ok(())
        }

        async fn stop(&self, guild_id: GuildId) -> MusicResult<()> {
            self.status.lock().insert(guild_id, TransportStatus::Idle);
            let hook = self.hooks.lock().remove(&guild_id);
            if let Some(hook) = hook {
                hook.complete(None);
            }
            Ok(())
        }

        async fn disconnect(&self, guild_id: GuildId) -> MusicResult<()> {
            self.connected.lock().remove(&guild_id);
            self.status.lock().remove(&guild_id);
            self.disconnects.lock().push(guild_id);
            Ok(())
        }

        async fn status(&self, guild_id: GuildId) -> TransportStatus {
            self.status
                .lock()
                .get(&guild_id)
                .copied()
                .unwrap_or(TransportStatus::Idle)
        }

        fn connected_guilds(&self) -> Vec<GuildId> {
            self.connected.lock().iter().copied().collect()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<(ChannelId, Notice)>>,
    }

    impl RecordingNotifier {
        fn count(&self, pred: impl Fn(&Notice) -> bool) -> usize {
            self.notices.lock().iter().filter(|(_, n)| pred(n)).count()
        }

        fn finished_count(&self) -> usize {
            self.count(|n| matches!(n, Notice::QueueFinished))
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, channel: ChannelId, notice: Notice) {
            self.notices.lock().push((channel, notice));
        }
    }

    struct Harness {
        controller: PlaybackController,
        events: flume::Receiver<PlaybackEvent>,
        transport: Arc<FakeTransport>,
        notifier: Arc<RecordingNotifier>,
    }

    const CHANNEL: u64 = 500;

    fn guild() -> GuildId {
        GuildId::new(100)
    }

    fn track(title: &str) -> Track {
        Track::new(title, format!("https://cdn/{}", title), UserId::new(1))
    }

    fn tracks(titles: &[&str]) -> Vec<Track> {
        titles.iter().map(|t| track(t)).collect()
    }

    impl Harness {
        async fn new() -> Self {
            let transport = Arc::new(FakeTransport::default());
            let notifier = Arc::new(RecordingNotifier::default());
            let (controller, events) = PlaybackController::new(
                Arc::new(SessionStore::new()),
                transport.clone(),
                notifier.clone(),
                100,
            );
            transport
                .connect(guild(), ChannelId::new(1))
                .await
                .unwrap();
            Self {
                controller,
                events,
                transport,
                notifier,
            }
        }

        /// Delivers queued completion events, like the run loop would.
        async fn pump(&self) {
            while let Ok(event) = self.events.try_recv() {
                self.controller.handle_event(event).await;
            }
        }

        async fn enqueue(&self, titles: &[&str]) -> Enqueued {
            self.controller
                .enqueue(guild(), ChannelId::new(CHANNEL), tracks(titles))
                .await
                .unwrap()
        }

        async fn complete_current(&self) {
            self.transport.finish(guild(), None);
            self.pump().await;
        }

        fn current(&self) -> Option<String> {
            self.controller
                .snapshot(guild())
                .current
                .map(|t| t.title().to_string())
        }

        fn waiting(&self) -> Vec<String> {
            self.controller
                .snapshot(guild())
                .upcoming
                .iter()
                .map(|t| t.title().to_string())
                .collect()
        }

        fn state(&self) -> PlayerState {
            self.controller.snapshot(guild()).state
        }
    }

    #[tokio::test]
    async fn enqueue_on_idle_starts_immediately() {
        let h = Harness::new().await;

        let result = h.enqueue(&["A"]).await;

        assert_eq!(result.added, 1);
        assert_eq!(result.started.map(|t| t.title().to_string()), Some("A".into()));
        assert_eq!(h.current(), Some("A".into()));
        assert!(h.waiting().is_empty());
        assert_eq!(h.state(), PlayerState::Playing);
        assert_eq!(h.transport.played(guild()), vec!["A"]);
        assert_eq!(h.notifier.count(|n| matches!(n, Notice::NowPlaying(_))), 1);
    }

    #[tokio::test]
    async fn enqueue_while_playing_waits() {
        let h = Harness::new().await;
        h.enqueue(&["A"]).await;

        let result = h.enqueue(&["B", "C"]).await;

        assert_eq!(result.started, None);
        assert_eq!(result.queue_len, 2);
        assert_eq!(h.current(), Some("A".into()));
        assert_eq!(h.waiting(), vec!["B", "C"]);
        assert_eq!(h.transport.played(guild()), vec!["A"]);
    }

    #[tokio::test]
    async fn enqueue_rejects_when_queue_full() {
        let transport = Arc::new(FakeTransport::default());
        let (controller, _events) = PlaybackController::new(
            Arc::new(SessionStore::new()),
            transport.clone(),
            Arc::new(RecordingNotifier::default()),
            2,
        );
        transport.connect(guild(), ChannelId::new(1)).await.unwrap();

        let channel = ChannelId::new(CHANNEL);
        controller
            .enqueue(guild(), channel, tracks(&["A"]))
            .await
            .unwrap();
        let partial = controller
            .enqueue(guild(), channel, tracks(&["B", "C", "D"]))
            .await
            .unwrap();
        assert_eq!(partial.added, 2);

        let err = controller
            .enqueue(guild(), channel, tracks(&["E"]))
            .await
            .unwrap_err();

        assert!(matches!(err, MusicError::Validation(_)));
    }

    #[tokio::test]
    async fn loop_off_drains_to_idle() {
        let h = Harness::new().await;
        h.enqueue(&["A", "B"]).await;

        h.complete_current().await;
        assert_eq!(h.current(), Some("B".into()));
        assert!(h.waiting().is_empty());

        h.complete_current().await;
        assert_eq!(h.current(), None);
        assert_eq!(h.state(), PlayerState::Idle);
        assert_eq!(h.notifier.finished_count(), 1);
    }

    #[tokio::test]
    async fn loop_track_replays_indefinitely() {
        let h = Harness::new().await;
        h.controller.set_loop_mode(guild(), LoopMode::Track);
        h.enqueue(&["A"]).await;

        for _ in 0..3 {
            h.complete_current().await;
            assert_eq!(h.current(), Some("A".into()));
            assert!(h.waiting().is_empty());
        }
        assert_eq!(h.transport.played(guild()), vec!["A", "A", "A", "A"]);
        assert_eq!(h.notifier.finished_count(), 0);
    }

    #[tokio::test]
    async fn loop_queue_cycles() {
        let h = Harness::new().await;
        h.controller.set_loop_mode(guild(), LoopMode::Queue);
        h.enqueue(&["A", "B"]).await;

        h.complete_current().await;
        assert_eq!(h.current(), Some("B".into()));
        assert_eq!(h.waiting(), vec!["A"]);

        h.complete_current().await;
        assert_eq!(h.current(), Some("A".into()));
        assert_eq!(h.waiting(), vec!["B"]);
    }

    #[tokio::test]
    async fn loop_mode_change_applies_on_next_advance() {
        let h = Harness::new().await;
        h.enqueue(&["A", "B"]).await;
        h.controller.set_loop_mode(guild(), LoopMode::Queue);
        assert_eq!(h.controller.loop_mode(guild()), LoopMode::Queue);

        h.complete_current().await;
        assert_eq!(h.waiting(), vec!["A"]);
    }

    #[tokio::test]
    async fn remove_out_of_bounds_leaves_queue_unchanged() {
        let h = Harness::new().await;
        h.enqueue(&["A", "B", "C"]).await;

        let len = h.waiting().len();
        assert!(matches!(
            h.controller.remove(guild(), 0),
            Err(MusicError::Validation(_))
        ));
        assert!(matches!(
            h.controller.remove(guild(), len + 1),
            Err(MusicError::Validation(_))
        ));
        assert_eq!(h.waiting(), vec!["B", "C"]);

        let removed = h.controller.remove(guild(), 1).unwrap();
        assert_eq!(removed.title(), "B");
        assert_eq!(h.current(), Some("A".into()));
        assert_eq!(h.waiting(), vec!["C"]);
    }

    #[tokio::test]
    async fn pause_and_resume_preconditions() {
        let h = Harness::new().await;

        assert!(matches!(
            h.controller.pause(guild()).await,
            Err(MusicError::Precondition(_))
        ));

        h.enqueue(&["A"]).await;
        assert!(matches!(
            h.controller.resume(guild()).await,
            Err(MusicError::Precondition(_))
        ));

        h.controller.pause(guild()).await.unwrap();
        assert_eq!(h.state(), PlayerState::Paused);
        assert!(matches!(
            h.controller.pause(guild()).await,
            Err(MusicError::Precondition(_))
        ));

        h.controller.resume(guild()).await.unwrap();
        assert_eq!(h.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn stop_from_any_state_goes_idle_without_advancing() {
        // Playing
        let h = Harness::new().await;
        h.enqueue(&["A", "B"]).await;
        h.controller.stop(guild()).await.unwrap();
        h.pump().await;
        assert_eq!(h.state(), PlayerState::Idle);
        assert_eq!(h.current(), None);
        assert!(h.waiting().is_empty());
        assert_eq!(h.transport.played(guild()), vec!["A"]);
        assert_eq!(h.notifier.finished_count(), 0);
        assert_eq!(h.transport.disconnects.lock().as_slice(), &[guild()]);

        // Paused
        let h = Harness::new().await;
        h.enqueue(&["A", "B"]).await;
        h.controller.pause(guild()).await.unwrap();
        h.controller.stop(guild()).await.unwrap();
        h.pump().await;
        assert_eq!(h.state(), PlayerState::Idle);
        assert_eq!(h.transport.played(guild()), vec!["A"]);

        // Idle
        let h = Harness::new().await;
        h.controller.stop(guild()).await.unwrap();
        h.pump().await;
        assert_eq!(h.state(), PlayerState::Idle);
        assert!(h.transport.played(guild()).is_empty());
    }

    #[tokio::test]
    async fn skip_three_times_finishes_once() {
        let h = Harness::new().await;
        h.enqueue(&["A", "B", "C"]).await;

        for expected in ["A", "B", "C"] {
            let skipped = h.controller.skip(guild()).await.unwrap();
            assert_eq!(skipped.title(), expected);
            h.pump().await;
        }

        assert_eq!(h.state(), PlayerState::Idle);
        assert_eq!(h.current(), None);
        assert_eq!(h.notifier.finished_count(), 1);
        assert!(matches!(
            h.controller.skip(guild()).await,
            Err(MusicError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn skip_in_track_loop_replays_same_track() {
        let h = Harness::new().await;
        h.controller.set_loop_mode(guild(), LoopMode::Track);
        h.enqueue(&["A", "B"]).await;

        h.controller.skip(guild()).await.unwrap();
        h.pump().await;

        assert_eq!(h.current(), Some("A".into()));
        assert_eq!(h.waiting(), vec!["B"]);
    }

    #[tokio::test]
    async fn skip_while_paused_advances() {
        let h = Harness::new().await;
        h.enqueue(&["A", "B"]).await;
        h.controller.pause(guild()).await.unwrap();

        h.controller.skip(guild()).await.unwrap();
        h.pump().await;

        assert_eq!(h.current(), Some("B".into()));
        assert_eq!(h.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn transport_error_is_reported_and_queue_advances() {
        let h = Harness::new().await;
        h.enqueue(&["A", "B"]).await;

        h.transport.finish(guild(), Some("connection reset"));
        h.pump().await;

        assert_eq!(h.current(), Some("B".into()));
        let failures: Vec<Notice> = h
            .notifier
            .notices
            .lock()
            .iter()
            .filter(|(_, n)| matches!(n, Notice::PlaybackFailed { .. }))
            .map(|(_, n)| n.clone())
            .collect();
        assert_eq!(
            failures,
            vec![Notice::PlaybackFailed {
                title: "A".into(),
                reason: "connection reset".into(),
            }]
        );
    }

    #[tokio::test]
    async fn track_that_fails_to_start_is_skipped_and_not_looped() {
        let h = Harness::new().await;
        h.controller.set_loop_mode(guild(), LoopMode::Track);
        h.transport.failing.lock().insert("Broken".to_string());

        h.enqueue(&["Broken", "Good"]).await;
        h.pump().await;

        assert_eq!(h.current(), Some("Good".into()));
        assert_eq!(h.transport.played(guild()), vec!["Good"]);
        assert_eq!(
            h.notifier
                .count(|n| matches!(n, Notice::PlaybackFailed { .. })),
            1
        );
    }

    #[tokio::test]
    async fn stream_error_in_track_loop_moves_on() {
        let h = Harness::new().await;
        h.controller.set_loop_mode(guild(), LoopMode::Track);
        h.enqueue(&["Expired", "Next"]).await;

        h.transport.finish(guild(), Some("HTTP 403"));
        h.pump().await;

        assert_eq!(h.current(), Some("Next".into()));
        assert!(h.waiting().is_empty());

        // The healthy track still loops
        h.complete_current().await;
        assert_eq!(h.current(), Some("Next".into()));
        assert_eq!(h.transport.played(guild()), vec!["Expired", "Next", "Next"]);
        assert_eq!(
            h.notifier
                .count(|n| matches!(n, Notice::PlaybackFailed { .. })),
            1
        );
    }

    #[tokio::test]
    async fn stream_error_in_queue_loop_drops_track_from_cycle() {
        let h = Harness::new().await;
        h.controller.set_loop_mode(guild(), LoopMode::Queue);
        h.enqueue(&["A", "Broken", "C"]).await;

        h.complete_current().await;
        assert_eq!(h.current(), Some("Broken".into()));

        h.transport.finish(guild(), Some("unsupported codec"));
        h.pump().await;
        assert_eq!(h.current(), Some("C".into()));
        assert_eq!(h.waiting(), vec!["A"]);

        h.complete_current().await;
        h.complete_current().await;
        assert_eq!(h.current(), Some("C".into()));
        assert_eq!(h.waiting(), vec!["A"]);
        assert_eq!(
            h.transport.played(guild()),
            vec!["A", "Broken", "C", "A", "C"]
        );
    }

    #[tokio::test]
    async fn start_without_voice_connection_clears_session() {
        let h = Harness::new().await;
        h.transport.disconnect(guild()).await.unwrap();

        h.enqueue(&["A", "B", "C"]).await;
        h.pump().await;

        assert_eq!(h.state(), PlayerState::Idle);
        assert!(h.waiting().is_empty());
        assert_eq!(
            h.notifier
                .count(|n| matches!(n, Notice::PlaybackFailed { .. })),
            1
        );
    }

    #[tokio::test]
    async fn stale_completion_is_ignored() {
        let h = Harness::new().await;
        h.enqueue(&["A"]).await;
        let stale_hook = h.transport.hooks.lock().get(&guild()).cloned().unwrap();

        h.controller.stop(guild()).await.unwrap();
        h.transport
            .connect(guild(), ChannelId::new(1))
            .await
            .unwrap();
        h.enqueue(&["B", "C"]).await;

        // A completion for the old stream arriving late must not skip B
        h.controller
            .handle_event(PlaybackEvent::Finished {
                guild_id: guild(),
                playback_id: stale_hook.playback_id(),
                error: None,
            })
            .await;

        assert_eq!(h.current(), Some("B".into()));
        assert_eq!(h.waiting(), vec!["C"]);
    }

    #[tokio::test]
    async fn concurrent_enqueues_start_only_one_track() {
        let h = Harness::new().await;
        let channel = ChannelId::new(CHANNEL);

        let (a, b) = tokio::join!(
            h.controller.enqueue(guild(), channel, tracks(&["A"])),
            h.controller.enqueue(guild(), channel, tracks(&["B"])),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(h.transport.played(guild()).len(), 1);
        assert_eq!(h.state(), PlayerState::Playing);
        assert_eq!(h.waiting().len(), 1);
    }

    #[tokio::test]
    async fn guilds_do_not_affect_each_other() {
        let h = Harness::new().await;
        let other = GuildId::new(200);
        h.transport.connect(other, ChannelId::new(2)).await.unwrap();

        h.enqueue(&["A", "B"]).await;
        h.controller
            .enqueue(other, ChannelId::new(600), tracks(&["X"]))
            .await
            .unwrap();

        h.controller.stop(other).await.unwrap();
        h.pump().await;

        assert_eq!(h.current(), Some("A".into()));
        assert_eq!(h.waiting(), vec!["B"]);
        assert!(h.controller.remove(other, 1).is_err());
    }

    #[tokio::test]
    async fn now_playing_reports_current_track() {
        let h = Harness::new().await;
        assert!(matches!(
            h.controller.now_playing(guild()),
            Err(MusicError::Precondition(_))
        ));

        h.enqueue(&["A"]).await;
        let np = h.controller.now_playing(guild()).unwrap();

        assert_eq!(np.track.title(), "A");
        assert_eq!(np.state, PlayerState::Playing);
        assert!(np.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn clear_queue_keeps_current_track() {
        let h = Harness::new().await;
        assert!(matches!(
            h.controller.clear_queue(guild()),
            Err(MusicError::Precondition(_))
        ));

        h.enqueue(&["A", "B", "C"]).await;
        assert_eq!(h.controller.clear_queue(guild()).unwrap(), 2);
        assert_eq!(h.current(), Some("A".into()));
        assert!(h.waiting().is_empty());
    }

    #[tokio::test]
    async fn sweep_disconnects_only_idle_connections() {
        let h = Harness::new().await;
        let idle = GuildId::new(300);
        let paused = GuildId::new(400);
        h.transport.connect(idle, ChannelId::new(3)).await.unwrap();
        h.transport.connect(paused, ChannelId::new(4)).await.unwrap();

        h.enqueue(&["A"]).await;
        h.controller
            .enqueue(paused, ChannelId::new(700), tracks(&["P"]))
            .await
            .unwrap();
        h.controller.pause(paused).await.unwrap();
        h.controller.set_loop_mode(idle, LoopMode::Queue);

        let disconnected = h.controller.sweep_idle().await;

        assert_eq!(disconnected, 1);
        assert_eq!(h.transport.disconnects.lock().as_slice(), &[idle]);
        assert!(h.transport.is_connected(guild()));
        assert!(h.transport.is_connected(paused));
        // The idle guild's session is gone, so its loop mode resets
        assert_eq!(h.controller.loop_mode(idle), LoopMode::Off);
    }

    #[tokio::test]
    async fn sweep_skips_session_about_to_play() {
        let h = Harness::new().await;
        h.enqueue(&["A"]).await;
        // Transport lost track of the stream but the session just started one
        h.transport
            .status
            .lock()
            .insert(guild(), TransportStatus::Idle);

        assert_eq!(h.controller.sweep_idle().await, 0);
        assert!(h.transport.is_connected(guild()));
    }

    #[tokio::test]
    async fn voice_disconnect_purges_session() {
        let h = Harness::new().await;
        h.controller.set_loop_mode(guild(), LoopMode::Track);
        h.enqueue(&["A", "B"]).await;

        h.controller.on_voice_disconnect(guild()).await;
        h.pump().await;

        assert_eq!(h.current(), None);
        assert!(h.waiting().is_empty());
        assert_eq!(h.controller.loop_mode(guild()), LoopMode::Off);
        assert!(!h.transport.is_connected(guild()));
    }

    #[tokio::test]
    async fn run_loop_applies_completions() {
        let h = Harness::new().await;
        let Harness {
            controller,
            events,
            transport,
            ..
        } = h;
        let controller = Arc::new(controller);
        let channel = ChannelId::new(CHANNEL);

        controller
            .enqueue(guild(), channel, tracks(&["A", "B"]))
            .await
            .unwrap();
        let runner = tokio::spawn(controller.clone().run(events));

        transport.finish(guild(), None);
        for _ in 0..50 {
            if transport.played(guild()).len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(transport.played(guild()), vec!["A", "B"]);
        runner.abort();
    }
}
