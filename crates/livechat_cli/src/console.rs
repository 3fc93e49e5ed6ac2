#![forbid(unsafe_code)]

use chrono::{DateTime, Local};
use livechat_domain::ChatMessage;

const DEFAULT_HISTORY_TAIL: usize = 20;

/// One line typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
	Empty,
	Quit,
	Join(&'a str),
	History(usize),
	Send(&'a str),
	/// Slash command that is missing its argument or is not known.
	Invalid(&'a str),
}

pub fn parse_input(line: &str) -> Input<'_> {
	let trimmed = line.trim();
	if trimmed.is_empty() {
		return Input::Empty;
	}

	let Some(rest) = trimmed.strip_prefix('/') else {
		return Input::Send(line.trim_end_matches(['\r', '\n']));
	};

	let (cmd, arg) = match rest.split_once(char::is_whitespace) {
		Some((cmd, arg)) => (cmd, arg.trim()),
		None => (rest, ""),
	};

	match cmd {
		"quit" | "exit" => Input::Quit,
		"join" if !arg.is_empty() => Input::Join(arg),
		"history" if arg.is_empty() => Input::History(DEFAULT_HISTORY_TAIL),
		"history" => arg.parse().map(Input::History).unwrap_or(Input::Invalid(trimmed)),
		_ => Input::Invalid(trimmed),
	}
}

/// `[HH:MM:SS] username: text`, in local time.
pub fn format_message(msg: &ChatMessage) -> String {
	let local: DateTime<Local> = msg.timestamp.into();
	format!("[{}] {}: {}", local.format("%H:%M:%S"), msg.username, msg.text)
}
