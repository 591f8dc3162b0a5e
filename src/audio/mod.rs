//! # Audio Module
//!
//! Per-guild queue and playback state for the bot.
//!
//! ## Architecture
//!
//! ### [`queue`] - Guild Session Store
//! - One [`queue::GuildSession`] per guild: waiting tracks, current track,
//!   loop mode, player state
//! - Loop re-insertion and the advance step itself
//!
//! ### [`player`] - Playback Controller
//! - Enqueue / skip / stop / pause / resume / remove
//! - Run queue applying track completions one at a time
//! - Idle voice connection sweep
//!
//! ### [`transport`] - Voice Transport
//! - [`transport::Transport`] trait consumed by the controller
//! - Songbird implementation and the completion hand-off
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # async fn example(
//! #     transport: Arc<dyn Transport>,
//! #     notifier: Arc<dyn Notifier>,
//! #     guild_id: GuildId,
//! #     channel_id: ChannelId,
//! #     tracks: Vec<Track>,
//! # ) -> anyhow::Result<()> {
//! let sessions = Arc::new(SessionStore::new());
//! let (controller, events) = PlaybackController::new(sessions, transport, notifier, 1000);
//! let controller = Arc::new(controller);
//! tokio::spawn(controller.clone().run(events));
//!
//! controller.enqueue(guild_id, channel_id, tracks).await?;
//! controller.pause(guild_id).await?;
//! controller.resume(guild_id).await?;
//! controller.skip(guild_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod player;
pub mod queue;
pub mod transport;
