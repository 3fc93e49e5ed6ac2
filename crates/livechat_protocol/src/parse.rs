#![forbid(unsafe_code)]

use std::time::SystemTime;

use livechat_domain::{ChannelName, ChatMessage, Login, MessageId};

use crate::line::{IrcLine, LineError};
use crate::{LINE_DELIMITER, USERNAME_PLACEHOLDER};

/// Structured event recognized from one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
	/// Keepalive; answer with `PONG :tmi.twitch.tv`.
	Ping,

	/// Numeric `001` welcome.
	AuthAck,

	/// `JOIN` for a channel (the session decides whether one was pending).
	JoinAck {
		channel: Option<ChannelName>,
		/// Login from the prefix; `None` for server-originated lines.
		login: Option<Login>,
	},

	Chat(ChatLine),

	/// Server is about to drop the connection.
	Reconnect,

	Notice {
		text: String,
	},
}

/// Chat payload before the session stamps an id and capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
	pub channel: Option<ChannelName>,
	pub username: String,
	pub text: String,
	pub color: Option<String>,
}

impl ChatLine {
	pub fn into_message(self, id: MessageId, timestamp: SystemTime) -> ChatMessage {
		ChatMessage {
			id,
			username: self.username,
			text: self.text,
			color: self.color,
			timestamp,
		}
	}
}

/// Split one transmission on `\r\n`, dropping empty segments, in order.
pub fn split_transmission(raw: &str) -> impl Iterator<Item = &str> {
	raw.split(LINE_DELIMITER).filter(|l| !l.is_empty())
}

/// Classify a single line.
///
/// `Ok(None)` means the line is well-formed but carries nothing the session
/// acts on; `Err` means it could not be understood at all.
pub fn classify_line(raw: &str) -> Result<Option<ParsedEvent>, LineError> {
	// Pings are recognized before any structural parsing.
	if raw.split(' ').next() == Some("PING") {
		return Ok(Some(ParsedEvent::Ping));
	}

	let line = IrcLine::parse(raw)?;

	let event = match line.command {
		"PING" => Some(ParsedEvent::Ping),
		"001" => Some(ParsedEvent::AuthAck),
		"JOIN" => {
			let channel = line
				.params
				.first()
				.copied()
				.or(line.trailing)
				.and_then(|c| ChannelName::new(c).ok());
			let login = line.prefix_login().and_then(|l| Login::new(l).ok());
			Some(ParsedEvent::JoinAck { channel, login })
		}
		"PRIVMSG" => Some(ParsedEvent::Chat(chat_line(&line)?)),
		"RECONNECT" => Some(ParsedEvent::Reconnect),
		"NOTICE" => Some(ParsedEvent::Notice {
			text: line.trailing.unwrap_or_default().to_string(),
		}),
		_ => None,
	};

	Ok(event)
}

/// Like [`classify_line`], but anything unrecognized or malformed yields `None`.
pub fn parse_line(raw: &str) -> Option<ParsedEvent> {
	classify_line(raw).ok().flatten()
}

fn chat_line(line: &IrcLine<'_>) -> Result<ChatLine, LineError> {
	let text = line.trailing.ok_or_else(|| LineError::MissingTrailing {
		command: line.command.to_string(),
	})?;

	let username = line
		.tag("display-name")
		.map(|v| v.into_owned())
		.or_else(|| line.prefix_login().map(str::to_string))
		.unwrap_or_else(|| USERNAME_PLACEHOLDER.to_string());

	Ok(ChatLine {
		channel: line.params.first().and_then(|c| ChannelName::new(c).ok()),
		username,
		text: text.to_string(),
		color: line.tag("color").map(|v| v.into_owned()),
	})
}
