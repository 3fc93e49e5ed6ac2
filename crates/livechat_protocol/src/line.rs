#![forbid(unsafe_code)]

use std::borrow::Cow;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineError {
	#[error("empty line")]
	Empty,

	#[error("line has no command token")]
	MissingCommand,

	#[error("{command} line has no trailing parameter")]
	MissingTrailing {
		command: String,
	},
}

/// One tokenized protocol line.
///
/// Shape: `[@tags ][:prefix ]COMMAND[ middle...][ :trailing]`. All fields borrow
/// from the raw input; tag values are unescaped on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine<'a> {
	tags: Option<&'a str>,
	pub prefix: Option<&'a str>,
	pub command: &'a str,
	pub params: Vec<&'a str>,
	pub trailing: Option<&'a str>,
}

impl<'a> IrcLine<'a> {
	pub fn parse(raw: &'a str) -> Result<Self, LineError> {
		let line = raw.trim_end_matches(['\r', '\n']);
		if line.trim().is_empty() {
			return Err(LineError::Empty);
		}

		let mut rest = line;

		let tags = match rest.strip_prefix('@') {
			Some(r) => {
				let (block, r) = r.split_once(' ').ok_or(LineError::MissingCommand)?;
				rest = r;
				Some(block)
			}
			None => None,
		};
		rest = rest.trim_start_matches(' ');

		let prefix = match rest.strip_prefix(':') {
			Some(r) => {
				let (prefix, r) = r.split_once(' ').ok_or(LineError::MissingCommand)?;
				rest = r;
				Some(prefix)
			}
			None => None,
		};
		rest = rest.trim_start_matches(' ');

		let (command, params_str) = match rest.split_once(' ') {
			Some((c, p)) => (c, Some(p)),
			None => (rest, None),
		};
		if command.is_empty() {
			return Err(LineError::MissingCommand);
		}

		let mut params = Vec::new();
		let mut trailing = None;
		if let Some(p) = params_str {
			let (middle, t) = if let Some(t) = p.strip_prefix(':') {
				("", Some(t))
			} else if let Some((m, t)) = p.split_once(" :") {
				(m, Some(t))
			} else {
				(p, None)
			};
			params = middle.split(' ').filter(|s| !s.is_empty()).collect();
			trailing = t;
		}

		Ok(Self {
			tags,
			prefix,
			command,
			params,
			trailing,
		})
	}

	/// Look up a tag. Missing and empty-valued tags both yield `None`.
	pub fn tag(&self, key: &str) -> Option<Cow<'a, str>> {
		let tags = self.tags?;
		tags.split(';')
			.map(|kv| kv.split_once('=').unwrap_or((kv, "")))
			.find(|(k, _)| *k == key)
			.map(|(_, v)| v)
			.filter(|v| !v.is_empty())
			.map(unescape_tag_value)
	}

	/// Login from a `nick!user@host` prefix. Server prefixes (no `!`) yield `None`.
	pub fn prefix_login(&self) -> Option<&'a str> {
		let (nick, _) = self.prefix?.split_once('!')?;
		(!nick.is_empty()).then_some(nick)
	}
}

fn unescape_tag_value(v: &str) -> Cow<'_, str> {
	if !v.contains('\\') {
		return Cow::Borrowed(v);
	}

	let mut out = String::with_capacity(v.len());
	let mut chars = v.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some(':') => out.push(';'),
			Some('s') => out.push(' '),
			Some('\\') => out.push('\\'),
			Some('r') => out.push('\r'),
			Some('n') => out.push('\n'),
			Some(other) => out.push(other),
			None => {}
		}
	}
	Cow::Owned(out)
}
