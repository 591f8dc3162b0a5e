use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    error::{MusicError, MusicResult},
    sources::Track,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    /// Accepts the names users type after `!loop`.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "off" | "disable" | "0" => Some(Self::Off),
            "track" | "song" | "1" => Some(Self::Track),
            "queue" | "all" | "2" => Some(Self::Queue),
            _ => None,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "Disabled",
            Self::Track => "Single Track",
            Self::Queue => "Queue",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Result of one advance step, computed under the session lock.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Stream this track; `playback_id` tags its completion.
    Start { track: Track, playback_id: u64 },
    /// Nothing left to play.
    Finished,
}

/// Per-guild playback bookkeeping.
#[derive(Debug, Default)]
pub struct GuildSession {
    queue: VecDeque<Track>,
    current: Option<Track>,
    loop_mode: LoopMode,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    paused_for: Duration,
    state: PlayerState,
    playback_id: Option<u64>,
    next_playback_id: u64,
    text_channel: Option<ChannelId>,
}

impl GuildSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &VecDeque<Track> {
        &self.queue
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn playback_id(&self) -> Option<u64> {
        self.playback_id
    }

    pub fn text_channel(&self) -> Option<ChannelId> {
        self.text_channel
    }

    pub fn set_text_channel(&mut self, channel: ChannelId) {
        self.text_channel = Some(channel);
    }

    pub fn set_state(&mut self, state: PlayerState) {
        self.set_state_at(state, Utc::now());
    }

    fn set_state_at(&mut self, state: PlayerState, now: DateTime<Utc>) {
        match (self.state, state) {
            (PlayerState::Playing, PlayerState::Paused) => self.paused_at = Some(now),
            (PlayerState::Paused, PlayerState::Playing) => {
                if let Some(paused_at) = self.paused_at.take() {
                    self.paused_for += (now - paused_at).to_std().unwrap_or_default();
                }
            }
            _ => {}
        }
        self.state = state;
    }

    /// Time the current track has actually been playing, pauses excluded.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let until = self.paused_at.unwrap_or(now);
        (until - started_at)
            .to_std()
            .unwrap_or_default()
            .saturating_sub(self.paused_for)
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        match mode {
            LoopMode::Off => info!("➡️ Loop disabled"),
            LoopMode::Track => info!("🔂 Looping current track"),
            LoopMode::Queue => info!("🔁 Looping queue"),
        }
    }

    /// Appends to the waiting queue, at most up to `max_size` entries.
    ///
    /// Returns how many tracks were accepted.
    pub fn push_tracks(&mut self, tracks: Vec<Track>, max_size: usize) -> MusicResult<usize> {
        let available = max_size.saturating_sub(self.queue.len());
        if available == 0 {
            return Err(MusicError::validation(format!(
                "The queue is full (max {} tracks)!",
                max_size
            )));
        }

        let to_add = tracks.len().min(available);
        self.queue.extend(tracks.into_iter().take(to_add));
        debug!("➕ Queued {} track(s), {} waiting", to_add, self.queue.len());
        Ok(to_add)
    }

    /// Moves to the next track.
    ///
    /// Loop re-insertion happens before popping: Track loop puts the current
    /// track back at the front, Queue loop at the back. Because of that order,
    /// a skip in Track loop replays the same track.
    pub fn advance(&mut self) -> Advance {
        if let Some(current) = self.current.take() {
            match self.loop_mode {
                LoopMode::Track => self.queue.push_front(current),
                LoopMode::Queue => self.queue.push_back(current),
                LoopMode::Off => {}
            }
        }

        match self.queue.pop_front() {
            Some(track) => {
                self.next_playback_id += 1;
                let playback_id = self.next_playback_id;

                debug!("➡️ Next in queue: {}", track.title());
                self.current = Some(track.clone());
                self.started_at = Some(Utc::now());
                self.paused_at = None;
                self.paused_for = Duration::ZERO;
                self.state = PlayerState::Playing;
                self.playback_id = Some(playback_id);

                Advance::Start { track, playback_id }
            }
            None => {
                self.reset_playback();
                Advance::Finished
            }
        }
    }

    /// Forgets the current track without looping it back in.
    pub fn discard_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    /// Removes by 1-based display position from the waiting queue.
    pub fn remove(&mut self, position: usize) -> MusicResult<Track> {
        if position == 0 || position > self.queue.len() {
            return Err(MusicError::validation("Invalid track number!"));
        }

        self.queue
            .remove(position - 1)
            .ok_or_else(|| MusicError::validation("Invalid track number!"))
    }

    /// Empties the waiting queue only; returns how many were removed.
    pub fn clear_queue(&mut self) -> usize {
        let removed = self.queue.len();
        self.queue.clear();
        removed
    }

    /// Empties the queue and unsets the current track.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.reset_playback();
    }

    fn reset_playback(&mut self) {
        self.current = None;
        self.started_at = None;
        self.paused_at = None;
        self.paused_for = Duration::ZERO;
        self.state = PlayerState::Idle;
        self.playback_id = None;
    }
}

pub type SharedSession = Arc<Mutex<GuildSession>>;

/// Process-wide guild → session map.
///
/// Each session sits behind its own lock; callers must not hold it across an
/// `.await`.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<GuildId, SharedSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> SharedSession {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 New session for guild {}", guild_id);
                Arc::new(Mutex::new(GuildSession::new()))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SharedSession> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    pub fn clear(&self, guild_id: GuildId) {
        if let Some(session) = self.get(guild_id) {
            session.lock().clear();
        }
    }

    /// Drops the session entirely; the next access starts fresh.
    pub fn purge(&self, guild_id: GuildId) -> bool {
        let removed = self.sessions.remove(&guild_id).is_some();
        if removed {
            info!("🧹 Session purged for guild {}", guild_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
