//! # Voice transport
//!
//! The [`Transport`] trait is everything the playback controller needs from a
//! voice connection. [`SongbirdTransport`] implements it on top of songbird:
//! one `Call` per guild, one `TrackHandle` for the stream in flight.
//!
//! Songbird fires track events from its own driver tasks. Those events never
//! touch session state directly; they resolve a [`CompletionHook`], which posts
//! a [`PlaybackEvent`] to the controller's run queue.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    error::{MusicError, MusicResult},
    sources::Track,
};

/// What the voice connection of a guild is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Idle,
    Playing,
    Paused,
}

impl TransportStatus {
    pub fn is_playing(self) -> bool {
        self == Self::Playing
    }

    pub fn is_paused(self) -> bool {
        self == Self::Paused
    }

    /// Playing or paused; either way the connection is in use.
    pub fn is_active(self) -> bool {
        self.is_playing() || self.is_paused()
    }
}

/// Messages delivered to the controller's run queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The stream ended, naturally, by `stop`, or with an error.
    Finished {
        guild_id: GuildId,
        playback_id: u64,
        error: Option<String>,
    },
    /// The transport refused to start the stream at all.
    StartFailed {
        guild_id: GuildId,
        playback_id: u64,
        error: String,
    },
}

impl PlaybackEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::Finished { guild_id, .. } | Self::StartFailed { guild_id, .. } => *guild_id,
        }
    }

    pub fn playback_id(&self) -> u64 {
        match self {
            Self::Finished { playback_id, .. } | Self::StartFailed { playback_id, .. } => {
                *playback_id
            }
        }
    }
}

/// One-shot completion notification for a single stream.
///
/// Cheap to clone; only the first resolution across all clones is delivered.
#[derive(Debug, Clone)]
pub struct CompletionHook {
    inner: Arc<HookInner>,
}

#[derive(Debug)]
struct HookInner {
    guild_id: GuildId,
    playback_id: u64,
    sender: flume::Sender<PlaybackEvent>,
    fired: AtomicBool,
}

impl CompletionHook {
    pub fn new(guild_id: GuildId, playback_id: u64, sender: flume::Sender<PlaybackEvent>) -> Self {
        Self {
            inner: Arc::new(HookInner {
                guild_id,
                playback_id,
                sender,
                fired: AtomicBool::new(false),
            }),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    pub fn playback_id(&self) -> u64 {
        self.inner.playback_id
    }

    /// Reports the end of the stream. Returns false if already reported.
    pub fn complete(&self, error: Option<String>) -> bool {
        self.fire(PlaybackEvent::Finished {
            guild_id: self.inner.guild_id,
            playback_id: self.inner.playback_id,
            error,
        })
    }

    /// Reports that the stream never started.
    pub fn fail_to_start(&self, error: String) -> bool {
        self.fire(PlaybackEvent::StartFailed {
            guild_id: self.inner.guild_id,
            playback_id: self.inner.playback_id,
            error,
        })
    }

    fn fire(&self, event: PlaybackEvent) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.inner.sender.send(event).is_err() {
            warn!("Playback event dropped, controller is gone");
            return false;
        }
        true
    }
}

/// Voice connection operations used by the playback controller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<()>;

    fn is_connected(&self, guild_id: GuildId) -> bool;

    /// Starts streaming `track`, replacing anything already playing.
    /// `on_complete` must be resolved exactly once when the stream ends.
    async fn play(
        &self,
        guild_id: GuildId,
        track: &Track,
        on_complete: CompletionHook,
    ) -> MusicResult<()>;

    async fn pause(&self, guild_id: GuildId) -> MusicResult<()>;

    async fn resume(&self, guild_id: GuildId) -> MusicResult<()>;

    /// Stops the current stream; its completion hook fires as a normal end.
    async fn stop(&self, guild_id: GuildId) -> MusicResult<()>;

    async fn disconnect(&self, guild_id: GuildId) -> MusicResult<()>;

    async fn status(&self, guild_id: GuildId) -> TransportStatus;

    fn connected_guilds(&self) -> Vec<GuildId>;
}

/// [`Transport`] backed by songbird voice calls.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    volume: f32,
    calls: DashMap<GuildId, Arc<Mutex<Call>>>,
    tracks: DashMap<GuildId, TrackHandle>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, volume: f32) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
            volume,
            calls: DashMap::new(),
            tracks: DashMap::new(),
        }
    }

    fn current_handle(&self, guild_id: GuildId) -> Option<TrackHandle> {
        self.tracks.get(&guild_id).map(|h| h.clone())
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<()> {
        match self.manager.join(guild_id, channel_id).await {
            Ok(call) => {
                self.calls.insert(guild_id, call);
                info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to join voice channel in guild {}: {:?}", guild_id, e);
                Err(MusicError::transport("could not connect to the voice channel"))
            }
        }
    }

    fn is_connected(&self, guild_id: GuildId) -> bool {
        self.calls.contains_key(&guild_id)
    }

    async fn play(
        &self,
        guild_id: GuildId,
        track: &Track,
        on_complete: CompletionHook,
    ) -> MusicResult<()> {
        let call = self
            .calls
            .get(&guild_id)
            .map(|c| c.clone())
            .ok_or_else(|| MusicError::transport("I'm not connected to a voice channel!"))?;

        // Songbird decodes the HTTP stream itself through symphonia
        let input = HttpRequest::new(self.http.clone(), track.locator().to_string());

        let handle = {
            let mut call = call.lock().await;
            call.play_only_input(input.into())
        };

        if let Err(e) = handle.set_volume(self.volume) {
            debug!("Could not set volume in guild {}: {:?}", guild_id, e);
        }

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    hook: on_complete.clone(),
                },
            )
            .map_err(MusicError::transport)?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier { hook: on_complete },
            )
            .map_err(MusicError::transport)?;

        self.tracks.insert(guild_id, handle);
        debug!("▶️ Stream started in guild {}: {}", guild_id, track.title());
        Ok(())
    }

    async fn pause(&self, guild_id: GuildId) -> MusicResult<()> {
        let handle = self
            .current_handle(guild_id)
            .ok_or_else(|| MusicError::transport("nothing is streaming"))?;
        handle.pause().map_err(MusicError::transport)
    }

    async fn resume(&self, guild_id: GuildId) -> MusicResult<()> {
        let handle = self
            .current_handle(guild_id)
            .ok_or_else(|| MusicError::transport("nothing is streaming"))?;
        handle.play().map_err(MusicError::transport)
    }

    async fn stop(&self, guild_id: GuildId) -> MusicResult<()> {
        if let Some(handle) = self.current_handle(guild_id) {
            // Already-finished tracks refuse control commands
            if let Err(e) = handle.stop() {
                debug!("Stop on finished track in guild {}: {:?}", guild_id, e);
            }
        }
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> MusicResult<()> {
        self.tracks.remove(&guild_id);
        self.calls.remove(&guild_id);

        if let Err(e) = self.manager.remove(guild_id).await {
            debug!("Voice call for guild {} already gone: {:?}", guild_id, e);
        } else {
            info!("👋 Disconnected from voice in guild {}", guild_id);
        }
        Ok(())
    }

    async fn status(&self, guild_id: GuildId) -> TransportStatus {
        let Some(handle) = self.current_handle(guild_id) else {
            return TransportStatus::Idle;
        };

        match handle.get_info().await {
            Ok(info) => match info.playing {
                PlayMode::Play => TransportStatus::Playing,
                PlayMode::Pause => TransportStatus::Paused,
                _ => TransportStatus::Idle,
            },
            Err(_) => TransportStatus::Idle,
        }
    }

    fn connected_guilds(&self) -> Vec<GuildId> {
        self.calls.iter().map(|entry| *entry.key()).collect()
    }
}

/// Resolves the completion hook when songbird reports the track ended.
struct TrackEndNotifier {
    hook: CompletionHook,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Track ended in guild {}", self.hook.guild_id());
        self.hook.complete(None);
        Some(Event::Cancel)
    }
}

/// Resolves the completion hook with the error songbird reported.
struct TrackErrorNotifier {
    hook: CompletionHook,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let reason = match ctx {
            EventContext::Track(track_list) => track_list
                .first()
                .map(|(state, _)| failure_reason(&state.playing))
                .unwrap_or_else(|| UNKNOWN_TRACK_ERROR.to_string()),
            _ => UNKNOWN_TRACK_ERROR.to_string(),
        };

        error!(
            "❌ Track error in guild {}: {}",
            self.hook.guild_id(),
            reason
        );
        self.hook.complete(Some(reason));
        Some(Event::Cancel)
    }
}

const UNKNOWN_TRACK_ERROR: &str = "unknown track error";

/// User-facing text for a track that stopped in error.
fn failure_reason(mode: &PlayMode) -> String {
    match mode {
        PlayMode::Errored(e) => e.to_string(),
        _ => UNKNOWN_TRACK_ERROR.to_string(),
    }
}
