use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{
        player::{NowPlaying, QueueSnapshot},
        queue::{LoopMode, PlayerState},
    },
    sources::Track,
};

/// Standard colour palette for every embed the bot posts.
pub mod colors {
    use serenity::all::Colour;

    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Open Music";

/// Upcoming entries listed in `!queue` before collapsing the rest.
pub const QUEUE_PREVIEW: usize = 10;

// Discord rejects titles and field values past these lengths
const MAX_TITLE_CHARS: usize = 80;
const MAX_FIELD_CHARS: usize = 1024;

/// Card posted whenever a track starts.
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("Now Playing")
        .description(format!("🎵 **{}**", truncate(track.title(), MAX_TITLE_CHARS)))
        .color(colors::INFO_BLUE)
        .field("Requested by", format!("<@{}>", track.requested_by()), true);

    if let Some(duration) = track.duration() {
        embed = embed.field("Duration", format_duration(duration), true);
    }

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    if let Some(url) = track.page_url() {
        embed = embed.url(url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `!np`: current track with elapsed time.
pub fn create_track_progress_embed(now: &NowPlaying) -> CreateEmbed {
    let track = &now.track;
    let title = if now.state == PlayerState::Paused {
        "⏸️ Paused"
    } else {
        "Now Playing"
    };

    let mut embed = CreateEmbed::default()
        .title(title)
        .color(colors::MUSIC_PURPLE)
        .field("Title", truncate(track.title(), MAX_TITLE_CHARS), false)
        .field("Requested by", format!("<@{}>", track.requested_by()), true);

    if let Some(duration) = track.duration() {
        embed = embed.field("Time", format_progress(now.elapsed, duration), true);
    }

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `!queue`: current track, the first upcoming entries and the loop mode.
pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("Music Queue")
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now());

    if let Some(current) = &snapshot.current {
        let duration = current
            .duration()
            .map(format_duration)
            .unwrap_or_else(|| "Unknown".to_string());
        embed = embed.field(
            "🎵 Now Playing",
            format!(
                "**{}**\nDuration: {}\nRequested by: <@{}>",
                truncate(current.title(), MAX_TITLE_CHARS),
                duration,
                current.requested_by()
            ),
            false,
        );
    }

    if !snapshot.upcoming.is_empty() {
        embed = embed.field(
            "📑 Up Next",
            format_upcoming(&snapshot.upcoming, QUEUE_PREVIEW),
            false,
        );
    }

    embed
        .field("🔄 Loop Mode", snapshot.loop_mode.to_string(), false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Red card for playback failures reported by the transport.
pub fn create_playback_error_embed(title: &str, reason: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Playback error")
        .description(format!(
            "An error occurred while playing **{}**",
            truncate(title, MAX_TITLE_CHARS)
        ))
        .field("Reason", truncate(reason, MAX_FIELD_CHARS), false)
        .color(colors::ERROR_RED)
        .footer(CreateEmbedFooter::new("⏭️ Moving on to the next track"))
}

pub fn create_queue_finished_embed() -> CreateEmbed {
    CreateEmbed::default()
        .description("📭 Queue finished.")
        .color(colors::NEUTRAL_GRAY)
}

pub fn create_help_embed(prefix: &str) -> CreateEmbed {
    let p = prefix;
    CreateEmbed::default()
        .title("🎵 Open Music - Commands")
        .color(colors::INFO_BLUE)
        .field(
            "🎵 Playback",
            format!(
                "• `{p}play <url or search>` - Play audio or add it to the queue\n\
                • `{p}pause` - Pause the current track\n\
                • `{p}resume` - Resume a paused track\n\
                • `{p}skip` - Skip the current track\n\
                • `{p}stop` - Stop, clear the queue and leave"
            ),
            false,
        )
        .field(
            "📜 Queue",
            format!(
                "• `{p}queue` - Show the queue\n\
                • `{p}np` - Show the current track\n\
                • `{p}remove <number>` - Remove a track from the queue\n\
                • `{p}clear` - Clear the queue\n\
                • `{p}loop <off|track|queue>` - Change loop mode"
            ),
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Renders the waiting queue as numbered lines, collapsing past `limit`.
pub fn format_upcoming(upcoming: &[Track], limit: usize) -> String {
    let mut text = String::new();

    for (i, track) in upcoming.iter().take(limit).enumerate() {
        let duration = track
            .duration()
            .map(format_duration)
            .unwrap_or_else(|| "Unknown".to_string());
        text.push_str(&format!(
            "`{}.` **{}** | {} | <@{}>\n",
            i + 1,
            truncate(track.title(), 50),
            duration,
            track.requested_by()
        ));
    }

    if upcoming.len() > limit {
        text.push_str(&format!("\n*and {} more tracks...*", upcoming.len() - limit));
    }

    truncate(&text, MAX_FIELD_CHARS)
}

pub fn format_progress(elapsed: Duration, total: Duration) -> String {
    format!(
        "{}/{}",
        format_duration(elapsed.min(total)),
        format_duration(total)
    )
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

pub fn loop_mode_label(mode: LoopMode) -> String {
    let emoji = match mode {
        LoopMode::Off => "➡️",
        LoopMode::Track => "🔂",
        LoopMode::Queue => "🔁",
    };
    format!("{} Loop mode: {}", emoji, mode)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
