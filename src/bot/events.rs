use anyhow::Result;
use serenity::{async_trait, builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;
use tracing::{debug, error};

use crate::{
    audio::player::{Notice, Notifier},
    ui::embeds,
};

/// Posts playback notices to the guild's text channel as embeds.
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    async fn send(&self, channel: ChannelId, notice: &Notice) -> Result<()> {
        let embed = match notice {
            Notice::NowPlaying(track) => embeds::create_now_playing_embed(track),
            Notice::PlaybackFailed { title, reason } => {
                embeds::create_playback_error_embed(title, reason)
            }
            Notice::QueueFinished => embeds::create_queue_finished_embed(),
        };

        channel
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, channel: ChannelId, notice: Notice) {
        debug!("📨 Sending {:?} to channel {}", notice, channel);
        // Notification failures never affect playback
        if let Err(e) = self.send(channel, &notice).await {
            error!("Error sending notice to channel {}: {:?}", channel, e);
        }
    }
}
