use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub max_playlist_size: usize,

    // Extraction
    pub ytdlp_path: String,
    pub resolve_timeout: Duration,

    // Maintenance
    pub idle_sweep_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// `load` feeds it the process environment; tests feed it a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| -> String {
            match lookup(key) {
                Some(val) if !val.trim().is_empty() => val.trim().to_string(),
                _ => default.to_string(),
            }
        };

        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .context("DISCORD_TOKEN not found in environment variables")?;

        let config = Self {
            discord_token,
            command_prefix: var("COMMAND_PREFIX", "!"),

            default_volume: var("DEFAULT_VOLUME", "0.5")
                .parse()
                .context("DEFAULT_VOLUME must be a number")?,
            max_queue_size: var("MAX_QUEUE_SIZE", "1000")
                .parse()
                .context("MAX_QUEUE_SIZE must be a positive integer")?,
            max_playlist_size: var("MAX_PLAYLIST_SIZE", "100")
                .parse()
                .context("MAX_PLAYLIST_SIZE must be a positive integer")?,

            ytdlp_path: var("YTDLP_PATH", "yt-dlp"),
            resolve_timeout: Duration::from_secs(
                var("RESOLVE_TIMEOUT", "90")
                    .parse()
                    .context("RESOLVE_TIMEOUT must be a number of seconds")?,
            ),

            idle_sweep_interval: Duration::from_secs(
                var("IDLE_SWEEP_INTERVAL", "300")
                    .parse()
                    .context("IDLE_SWEEP_INTERVAL must be a number of seconds")?,
            ),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Queue and playlist limits must be > 0
    /// - Timeouts and the sweep interval must be > 0
    /// - The command prefix cannot be empty or contain whitespace
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.resolve_timeout.is_zero() {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.idle_sweep_interval.is_zero() {
            anyhow::bail!("Idle sweep interval must be greater than 0");
        }

        if self.command_prefix.is_empty() || self.command_prefix.contains(char::is_whitespace) {
            anyhow::bail!("Command prefix cannot be empty or contain spaces");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}'\n  \
            Audio: {}% vol, {} queue, {} per playlist\n  \
            Extraction: {} ({}s timeout)\n  \
            Idle sweep: every {}s",
            self.command_prefix,
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.max_playlist_size,
            self.ytdlp_path,
            self.resolve_timeout.as_secs(),
            self.idle_sweep_interval.as_secs(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            default_volume: 0.5,
            max_queue_size: 1000,
            max_playlist_size: 100,

            ytdlp_path: "yt-dlp".to_string(),
            resolve_timeout: Duration::from_secs(90),

            idle_sweep_interval: Duration::from_secs(300),
        }
    }
}
