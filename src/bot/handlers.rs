use anyhow::Result;
use serenity::{
    builder::{CreateMessage, EditMessage},
    model::{
        channel::Message,
        id::{ChannelId, GuildId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::player::Enqueued,
    bot::{commands::Command, MusicBot},
    error::{MusicError, MusicResult},
    ui::embeds,
};

/// Runs one parsed command and replies in the channel it came from.
pub async fn handle_command(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    command: Command,
    bot: &MusicBot,
) -> Result<()> {
    info!(
        "📝 Command {}{} used by {} in guild {}",
        bot.config.command_prefix,
        command.name(),
        msg.author.name,
        guild_id
    );

    let controller = &bot.controller;
    let reply = match command {
        Command::Play(query) => return handle_play(ctx, msg, guild_id, &query, bot).await,
        Command::Skip => controller
            .skip(guild_id)
            .await
            .map(|track| format!("⏭️ Skipped **{}**", track.title())),
        Command::Stop => controller
            .stop(guild_id)
            .await
            .map(|_| "⏹️ Playback stopped and queue cleared!".to_string()),
        Command::Pause => controller
            .pause(guild_id)
            .await
            .map(|_| "⏸️ Paused playback.".to_string()),
        Command::Resume => controller
            .resume(guild_id)
            .await
            .map(|_| "▶️ Resumed playback!".to_string()),
        Command::Clear => controller
            .clear_queue(guild_id)
            .map(|n| format!("🗑️ Cleared {} track(s) from the queue!", n)),
        Command::Remove(position) => controller
            .remove(guild_id, position)
            .map(|track| format!("✂️ Removed: **{}**", track.title())),
        Command::Loop(mode) => {
            let mode = match mode {
                Some(mode) => {
                    controller.set_loop_mode(guild_id, mode);
                    mode
                }
                None => controller.loop_mode(guild_id),
            };
            Ok(embeds::loop_mode_label(mode))
        }
        Command::Queue => {
            let snapshot = controller.snapshot(guild_id);
            if snapshot.current.is_none() && snapshot.upcoming.is_empty() {
                Ok("📭 The queue is empty!".to_string())
            } else {
                return send_embed(ctx, msg.channel_id, embeds::create_queue_embed(&snapshot))
                    .await;
            }
        }
        Command::NowPlaying => match controller.now_playing(guild_id) {
            Ok(now) => {
                return send_embed(ctx, msg.channel_id, embeds::create_track_progress_embed(&now))
                    .await
            }
            Err(e) => Err(e),
        },
        Command::Help => {
            return send_embed(
                ctx,
                msg.channel_id,
                embeds::create_help_embed(&bot.config.command_prefix),
            )
            .await
        }
    };

    msg.channel_id.say(&ctx.http, render(reply)).await?;
    Ok(())
}

/// Reports a command that failed before it could run.
pub async fn reply_error(ctx: &Context, channel: ChannelId, error: &MusicError) -> Result<()> {
    channel.say(&ctx.http, error_text(error)).await?;
    Ok(())
}

async fn handle_play(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    query: &str,
    bot: &MusicBot,
) -> Result<()> {
    if query.trim().is_empty() {
        msg.channel_id
            .say(&ctx.http, "❌ Please provide a URL or search term!")
            .await?;
        return Ok(());
    }

    let transport = bot.controller.transport();
    if !transport.is_connected(guild_id) {
        let Some(voice_channel) = author_voice_channel(ctx, msg, guild_id) else {
            msg.channel_id
                .say(&ctx.http, "❌ You need to be in a voice channel first!")
                .await?;
            return Ok(());
        };

        if let Err(e) = transport.connect(guild_id, voice_channel).await {
            return reply_error(ctx, msg.channel_id, &e).await;
        }
    }

    if let Err(e) = msg.channel_id.broadcast_typing(&ctx.http).await {
        warn!("Could not send typing indicator: {:?}", e);
    }
    let mut loading = msg
        .channel_id
        .say(&ctx.http, "🔄 Processing... Please wait.")
        .await?;

    let outcome = match bot.resolver.resolve(query, msg.author.id).await {
        Ok(resolution) => {
            let (resolved, dropped) = (resolution.tracks.len(), resolution.dropped);
            bot.controller
                .enqueue(guild_id, msg.channel_id, resolution.tracks)
                .await
                .map(|enqueued| (enqueued, resolved, dropped))
        }
        Err(e) => Err(e),
    };

    let text = render(
        outcome.map(|(enqueued, resolved, dropped)| play_reply(&enqueued, resolved, dropped)),
    );
    loading.edit(ctx, EditMessage::new().content(text)).await?;
    Ok(())
}

/// Voice channel the message author is sitting in, from the gateway cache.
fn author_voice_channel(ctx: &Context, msg: &Message, guild_id: GuildId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|state| state.channel_id)
}

async fn send_embed(
    ctx: &Context,
    channel: ChannelId,
    embed: serenity::builder::CreateEmbed,
) -> Result<()> {
    channel
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

fn render(reply: MusicResult<String>) -> String {
    reply.unwrap_or_else(|e| error_text(&e))
}

fn error_text(error: &MusicError) -> String {
    format!("❌ {}", error)
}

/// Text shown once `!play` finished resolving and queueing.
///
/// `resolved` is how many tracks the resolver produced; anything beyond
/// `enqueued.added` did not fit in the queue.
pub fn play_reply(enqueued: &Enqueued, resolved: usize, dropped: usize) -> String {
    let mut text = match &enqueued.started {
        Some(track) if enqueued.added == 1 => format!("🎵 Now playing: **{}**", track.title()),
        Some(track) => format!(
            "🎵 Now playing: **{}**\n✅ Added {} more track(s) to queue!",
            track.title(),
            enqueued.added - 1
        ),
        None => format!(
            "✅ Added {} track(s) to queue! ({} waiting)",
            enqueued.added, enqueued.queue_len
        ),
    };

    let overflow = resolved.saturating_sub(enqueued.added);
    if overflow > 0 {
        text.push_str(&format!(
            "\n⚠️ Queue is full, {} track(s) were not added.",
            overflow
        ));
    }

    if dropped > 0 {
        text.push_str(&format!(
            "\n⚠️ Skipped {} unavailable {}.",
            dropped,
            if dropped == 1 { "entry" } else { "entries" }
        ));
    }
    text
}
