#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::fmt;

use livechat_domain::{ChannelName, Credentials, Login, SecretString};

use crate::{COMMANDS_CAPABILITY, HOST_TOKEN, TAGS_CAPABILITY};

/// Outbound command. `Display` renders the exact wire line (no CRLF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Pass(SecretString),
	Nick(Login),
	CapReq,
	Join(ChannelName),
	Part(ChannelName),
	Privmsg {
		channel: ChannelName,
		text: String,
	},
	Pong,
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Pass(token) => write!(f, "PASS oauth:{}", token.expose()),
			Self::Nick(login) => write!(f, "NICK {login}"),
			Self::CapReq => write!(f, "CAP REQ :{TAGS_CAPABILITY} {COMMANDS_CAPABILITY}"),
			Self::Join(channel) => write!(f, "JOIN #{channel}"),
			Self::Part(channel) => write!(f, "PART #{channel}"),
			Self::Privmsg { channel, text } => write!(f, "PRIVMSG #{channel} :{}", single_line(text)),
			Self::Pong => write!(f, "PONG :{HOST_TOKEN}"),
		}
	}
}

/// Chat text as it goes on the wire: CR and LF become spaces.
pub fn single_line(text: &str) -> Cow<'_, str> {
	if text.contains(['\r', '\n']) {
		Cow::Owned(text.replace(['\r', '\n'], " "))
	} else {
		Cow::Borrowed(text)
	}
}

/// `PASS`, `NICK` and `CAP REQ`, in the order they must be sent.
pub fn render_auth(credentials: &Credentials) -> [String; 3] {
	[
		Command::Pass(credentials.token().clone()).to_string(),
		Command::Nick(credentials.login().clone()).to_string(),
		Command::CapReq.to_string(),
	]
}

pub fn render_join(channel: &ChannelName) -> String {
	Command::Join(channel.clone()).to_string()
}

pub fn render_part(channel: &ChannelName) -> String {
	Command::Part(channel.clone()).to_string()
}

pub fn render_privmsg(channel: &ChannelName, text: &str) -> String {
	Command::Privmsg {
		channel: channel.clone(),
		text: text.to_string(),
	}
	.to_string()
}

pub fn render_pong() -> String {
	Command::Pong.to_string()
}
