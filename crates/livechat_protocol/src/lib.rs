#![forbid(unsafe_code)]

pub mod command;
pub mod line;
pub mod parse;

pub use command::{Command, render_auth, render_join, render_part, render_pong, render_privmsg, single_line};
pub use line::{IrcLine, LineError};
pub use parse::{ChatLine, ParsedEvent, classify_line, parse_line, split_transmission};

/// Canonical server host token, restated in every `PONG`.
pub const HOST_TOKEN: &str = "tmi.twitch.tv";

/// Capability carrying `display-name`/`color` tags.
pub const TAGS_CAPABILITY: &str = "twitch.tv/tags";

/// Capability enabling numeric replies and platform commands.
pub const COMMANDS_CAPABILITY: &str = "twitch.tv/commands";

/// Username used when neither a display-name tag nor a prefix login is present.
pub const USERNAME_PLACEHOLDER: &str = "unknown";

/// Delimiter between protocol lines inside one transmission.
pub const LINE_DELIMITER: &str = "\r\n";
