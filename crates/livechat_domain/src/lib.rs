#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::time::SystemTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

fn normalize_name(raw: &str) -> Result<String, ParseIdError> {
	let s = raw.trim();
	if s.is_empty() {
		return Err(ParseIdError::Empty);
	}
	// Platform names are ASCII alphanumerics and `_`; anything else would
	// change how the server splits a JOIN/NICK line.
	if let Some(bad) = s.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
		return Err(ParseIdError::InvalidFormat(format!("unexpected {bad:?} in name: {s:?}")));
	}
	Ok(s.to_ascii_lowercase())
}

/// Chat channel name, stored lower-cased and without the leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(try_from = "String", into = "String"))]
pub struct ChannelName(String);

impl ChannelName {
	/// Normalize and validate a channel name (`"#Zelda"` -> `"zelda"`).
	pub fn new(name: impl AsRef<str>) -> Result<Self, ParseIdError> {
		let name = name.as_ref().trim();
		let name = name.strip_prefix('#').unwrap_or(name);
		normalize_name(name).map(Self)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelName::new(s)
	}
}

impl TryFrom<String> for ChannelName {
	type Error = ParseIdError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		ChannelName::new(s)
	}
}

impl From<ChannelName> for String {
	fn from(v: ChannelName) -> Self {
		v.0
	}
}

/// Lower-cased account login used as the protocol nickname.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(try_from = "String", into = "String"))]
pub struct Login(String);

impl Login {
	pub fn new(login: impl AsRef<str>) -> Result<Self, ParseIdError> {
		normalize_name(login.as_ref()).map(Self)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Login {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Login {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Login::new(s)
	}
}

impl TryFrom<String> for Login {
	type Error = ParseIdError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		Login::new(s)
	}
}

impl From<Login> for String {
	fn from(v: Login) -> Self {
		v.0
	}
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

#[cfg(feature = "serde")]
impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Bearer token plus login; fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct Credentials {
	token: SecretString,
	login: Login,
}

impl Credentials {
	/// Build credentials. A leading `oauth:` on the token is dropped; the codec adds it back.
	pub fn new(token: SecretString, login: Login) -> Result<Self, ParseIdError> {
		let raw = token.expose().trim();
		let raw = raw.strip_prefix("oauth:").unwrap_or(raw);
		if raw.is_empty() {
			return Err(ParseIdError::Empty);
		}
		// The token is written verbatim into `PASS`; it must stay a single token.
		if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
			return Err(ParseIdError::InvalidFormat("token contains whitespace".to_string()));
		}
		Ok(Self {
			token: SecretString::new(raw),
			login,
		})
	}

	pub fn token(&self) -> &SecretString {
		&self.token
	}

	pub fn login(&self) -> &Login {
		&self.login
	}
}

/// Session-local message identifier (monotonic, insertion ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// One chat line, received or sent by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChatMessage {
	pub id: MessageId,

	/// Display name, else prefix login, else `"unknown"`.
	pub username: String,

	pub text: String,

	/// Hex color hint (`#RRGGBB`) if the server supplied one.
	pub color: Option<String>,

	/// Client capture time.
	pub timestamp: SystemTime,
}
