use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod ui;

use crate::audio::{player::PlaybackController, queue::SessionStore, transport::SongbirdTransport};
use crate::bot::{events::DiscordNotifier, MusicBot};
use crate::config::Config;
use crate::sources::{TrackResolver, YtDlpExtractor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_queue=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Open Music Queue v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let extractor = YtDlpExtractor::new(config.ytdlp_path.clone(), config.max_playlist_size);
    match extractor.verify().await {
        Ok(version) => info!("✅ yt-dlp {} available", version),
        Err(e) => warn!("⚠️ {:#}; every !play will fail until it is installed", e),
    }
    let resolver = Arc::new(TrackResolver::new(Arc::new(extractor), config.resolve_timeout));

    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone(), config.default_volume));
    let notifier = Arc::new(DiscordNotifier::new(Arc::new(Http::new(&config.discord_token))));
    let sessions = Arc::new(SessionStore::new());

    let (controller, events) =
        PlaybackController::new(sessions, transport, notifier, config.max_queue_size);
    let controller = Arc::new(controller);
    tokio::spawn(controller.clone().run(events));
    tokio::spawn(controller.clone().run_idle_sweep(config.idle_sweep_interval));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(config.clone(), controller, resolver);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
        anyhow::bail!("Discord client stopped: {}", why);
    }

    Ok(())
}
