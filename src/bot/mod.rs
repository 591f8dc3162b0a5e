//! # Bot Module
//!
//! Discord-facing side of the bot: prefix commands in, replies and playback
//! notices out.
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]. It owns nothing
//! stateful itself; queues live in the [`PlaybackController`] and tracks come
//! from the [`TrackResolver`].
//!
//! ## Example
//!
//! ```rust,no_run
//! let bot = MusicBot::new(Arc::new(config), controller, Arc::new(resolver));
//! let client = Client::builder(&token, intents).event_handler(bot);
//! ```

use serenity::{
    all::{ActivityData, Context, EventHandler, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{audio::player::PlaybackController, config::Config, sources::TrackResolver};

pub struct MusicBot {
    pub config: Arc<Config>,
    pub controller: Arc<PlaybackController>,
    pub resolver: Arc<TrackResolver>,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        controller: Arc<PlaybackController>,
        resolver: Arc<TrackResolver>,
    ) -> Self {
        Self {
            config,
            controller,
            resolver,
        }
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(format!(
            "{}help",
            self.config.command_prefix
        ))));
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        // Voice commands only make sense inside a guild
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let command = match commands::parse(&self.config.command_prefix, &msg.content) {
            Ok(Some(command)) => command,
            Ok(None) => return,
            Err(e) => {
                if let Err(e) = handlers::reply_error(&ctx, msg.channel_id, &e).await {
                    error!("Error replying to command: {:?}", e);
                }
                return;
            }
        };

        if let Err(e) = handlers::handle_command(&ctx, &msg, guild_id, command, self).await {
            error!("Error handling command: {:?}", e);
        }
    }

    /// Tears the guild down when the bot itself leaves voice, whether kicked,
    /// moved out by a moderator or disconnected by `!stop`.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                info!("🔌 Bot disconnected from voice in guild {}", guild_id);
                self.controller.on_voice_disconnect(guild_id).await;
            }
        }
    }
}
