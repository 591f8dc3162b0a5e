use crate::{
    audio::queue::LoopMode,
    error::{MusicError, MusicResult},
};

/// A parsed message command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Skip,
    Stop,
    Pause,
    Resume,
    Queue,
    Clear,
    /// `None` asks for the current mode.
    Loop(Option<LoopMode>),
    NowPlaying,
    /// 1-based position in the waiting queue.
    Remove(usize),
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Play(_) => "play",
            Self::Skip => "skip",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Queue => "queue",
            Self::Clear => "clear",
            Self::Loop(_) => "loop",
            Self::NowPlaying => "np",
            Self::Remove(_) => "remove",
            Self::Help => "help",
        }
    }
}

/// Parses a message into a command.
///
/// Returns `Ok(None)` for anything that is not addressed to the bot, including
/// unknown command names, so ordinary chatter is ignored.
pub fn parse(prefix: &str, content: &str) -> MusicResult<Option<Command>> {
    let Some(body) = content.trim_start().strip_prefix(prefix) else {
        return Ok(None);
    };

    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "play" | "p" => Command::Play(args.to_string()),
        "skip" | "s" => Command::Skip,
        "stop" => Command::Stop,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "queue" | "q" => Command::Queue,
        "clear" => Command::Clear,
        "loop" => Command::Loop(LoopMode::parse(args)),
        "np" | "nowplaying" => Command::NowPlaying,
        "remove" => {
            let position = args
                .parse::<usize>()
                .map_err(|_| MusicError::validation("Invalid track number!"))?;
            Command::Remove(position)
        }
        "help" => Command::Help,
        _ => return Ok(None),
    };

    Ok(Some(command))
}
