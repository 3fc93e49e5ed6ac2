#![forbid(unsafe_code)]

//! Connection state machine for one chat session.
//!
//! The machine performs no I/O. Each input (transport opened, line received,
//! transport closed, reconnect timer, user command) mutates the state and
//! returns the effects the driver must carry out, in order.
//!
//! Every transport-level input carries the [`Generation`] the driver was
//! started with. `begin` and `disconnect` bump the generation, so inputs from
//! a torn-down driver (including a reconnect timer that already fired) are
//! ignored.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use livechat_domain::{ChannelName, ChatMessage, Credentials, MessageId};
use livechat_protocol::{
	ParsedEvent, classify_line, render_auth, render_join, render_part, render_pong, render_privmsg, single_line,
};
use tracing::{debug, info, trace, warn};

use crate::config::{SessionConfig, backoff_delay};

pub(crate) type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;
pub(crate) type ConnectionHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Authenticating,
	Joining,
	Joined,
}

impl ConnectionState {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Disconnected => "disconnected",
			Self::Connecting => "connecting",
			Self::Authenticating => "authenticating",
			Self::Joining => "joining",
			Self::Joined => "joined",
		}
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Generation(u64);

impl fmt::Display for Generation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Clone)]
pub(crate) struct Callbacks {
	pub(crate) on_message: MessageHandler,
	pub(crate) on_connection_change: Option<ConnectionHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
	Transmit(String),

	/// Failure is logged and otherwise ignored.
	TransmitBestEffort(String),

	Deliver(ChatMessage),

	ConnectionChanged(bool),

	ScheduleReconnect {
		attempt: u32,
		delay: Duration,
	},

	/// Server asked us to reconnect; treat as an unplanned close.
	DropTransport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendRejected {
	Stale,
	NotJoined(ConnectionState),
	EmptyText,
}

#[derive(Debug, Clone, Copy)]
struct ReconnectPolicy {
	max_attempts: u32,
	base_delay: Duration,
	max_delay: Duration,
}

pub(crate) struct SessionMachine {
	credentials: Credentials,
	policy: ReconnectPolicy,
	self_color: String,

	state: ConnectionState,
	current_channel: Option<ChannelName>,
	reconnect_attempts: u32,
	message_counter: u64,
	auth_acked: bool,
	generation: u64,
	callbacks: Option<Callbacks>,
}

impl SessionMachine {
	pub(crate) fn new(credentials: Credentials, cfg: &SessionConfig) -> Self {
		Self {
			credentials,
			policy: ReconnectPolicy {
				max_attempts: cfg.max_reconnect_attempts,
				base_delay: cfg.reconnect_base_delay,
				max_delay: cfg.reconnect_max_delay,
			},
			self_color: cfg.self_color.clone(),
			state: ConnectionState::Disconnected,
			current_channel: None,
			reconnect_attempts: 0,
			message_counter: 0,
			auth_acked: false,
			generation: 0,
			callbacks: None,
		}
	}

	pub(crate) fn state(&self) -> ConnectionState {
		self.state
	}

	pub(crate) fn current_channel(&self) -> Option<&ChannelName> {
		self.current_channel.as_ref()
	}

	pub(crate) fn reconnect_attempts(&self) -> u32 {
		self.reconnect_attempts
	}

	pub(crate) fn is_current(&self, generation: Generation) -> bool {
		self.generation == generation.0
	}

	/// Callbacks for dispatch, withheld from stale drivers.
	pub(crate) fn callbacks_for(&self, generation: Generation) -> Option<Callbacks> {
		if self.is_current(generation) {
			self.callbacks.clone()
		} else {
			None
		}
	}

	/// Start a new connection run for `channel`; supersedes any previous run.
	pub(crate) fn begin(&mut self, channel: ChannelName, callbacks: Callbacks) -> Generation {
		self.generation += 1;
		self.state = ConnectionState::Connecting;
		self.current_channel = Some(channel);
		self.callbacks = Some(callbacks);
		self.auth_acked = false;
		Generation(self.generation)
	}

	pub(crate) fn transport_opened(&mut self, generation: Generation) -> Vec<Effect> {
		if !self.is_current(generation) || self.state != ConnectionState::Connecting {
			return Vec::new();
		}

		self.state = ConnectionState::Authenticating;
		self.reconnect_attempts = 0;
		self.auth_acked = false;

		render_auth(&self.credentials).into_iter().map(Effect::Transmit).collect()
	}

	/// Handle one protocol line (already split out of its transmission).
	pub(crate) fn line_received(&mut self, generation: Generation, raw: &str) -> Vec<Effect> {
		if !self.is_current(generation) {
			return Vec::new();
		}

		let event = match classify_line(raw) {
			Ok(Some(event)) => event,
			Ok(None) => {
				trace!(line = raw, "ignoring line");
				return Vec::new();
			}
			Err(e) => {
				debug!(error = %e, line = raw, "dropping malformed line");
				metrics::counter!("livechat_malformed_lines_total").increment(1);
				return Vec::new();
			}
		};

		match event {
			ParsedEvent::Ping => vec![Effect::Transmit(render_pong())],

			ParsedEvent::AuthAck => self.on_auth_ack(),

			ParsedEvent::JoinAck { channel, login } => {
				let pending = self.state == ConnectionState::Joining;
				let matches = channel.is_none() || channel.as_ref() == self.current_channel.as_ref();
				let ours = login.as_ref().is_none_or(|l| l == self.credentials.login());
				if !pending || !matches || !ours {
					debug!(state = %self.state, ?channel, ?login, "ignoring JOIN that was not pending");
					return Vec::new();
				}
				self.state = ConnectionState::Joined;
				info!(channel = ?self.current_channel.as_ref().map(ChannelName::as_str), "joined chat channel");
				vec![Effect::ConnectionChanged(true)]
			}

			ParsedEvent::Chat(line) => {
				if let (Some(target), Some(current)) = (&line.channel, &self.current_channel)
					&& target != current
				{
					trace!(%target, %current, "dropping chat line for another channel");
					return Vec::new();
				}
				metrics::counter!("livechat_messages_received_total").increment(1);
				let id = self.next_message_id();
				vec![Effect::Deliver(line.into_message(id, SystemTime::now()))]
			}

			ParsedEvent::Reconnect => {
				info!("server requested reconnect");
				vec![Effect::DropTransport]
			}

			ParsedEvent::Notice { text } => {
				warn!(notice = %text, "server notice");
				Vec::new()
			}
		}
	}

	fn on_auth_ack(&mut self) -> Vec<Effect> {
		// First welcome per connection wins; repeats are ignored.
		if self.auth_acked || self.state != ConnectionState::Authenticating {
			debug!(state = %self.state, "ignoring repeated welcome");
			return Vec::new();
		}
		self.auth_acked = true;

		let Some(channel) = &self.current_channel else {
			return Vec::new();
		};
		self.state = ConnectionState::Joining;
		vec![Effect::Transmit(render_join(channel))]
	}

	pub(crate) fn transport_closed(&mut self, generation: Generation) -> Vec<Effect> {
		if !self.is_current(generation) {
			return Vec::new();
		}

		self.state = ConnectionState::Disconnected;
		self.auth_acked = false;
		self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);

		let mut effects = vec![Effect::ConnectionChanged(false)];
		let attempt = self.reconnect_attempts;
		if attempt > self.policy.max_attempts {
			warn!(
				attempts = attempt - 1,
				max = self.policy.max_attempts,
				"reconnect budget exhausted; staying disconnected"
			);
			metrics::counter!("livechat_reconnect_budget_exhausted_total").increment(1);
		} else {
			let delay = backoff_delay(attempt, self.policy.base_delay, self.policy.max_delay);
			metrics::counter!("livechat_reconnects_scheduled_total").increment(1);
			effects.push(Effect::ScheduleReconnect { attempt, delay });
		}
		effects
	}

	/// Liveness check for a fired reconnect timer.
	pub(crate) fn reconnect_due(&mut self, generation: Generation) -> bool {
		if !self.is_current(generation) || self.state != ConnectionState::Disconnected || self.current_channel.is_none() {
			return false;
		}
		self.state = ConnectionState::Connecting;
		true
	}

	/// Soft switch over the already authenticated transport.
	pub(crate) fn change_channel(&mut self, generation: Generation, channel: ChannelName) -> Vec<Effect> {
		if !self.is_current(generation) {
			return Vec::new();
		}
		if self.current_channel.as_ref() == Some(&channel) {
			return Vec::new();
		}

		let old = self.current_channel.replace(channel.clone());
		match self.state {
			ConnectionState::Joining | ConnectionState::Joined => {
				self.state = ConnectionState::Joining;
				let mut effects = Vec::with_capacity(2);
				if let Some(old) = old {
					effects.push(Effect::TransmitBestEffort(render_part(&old)));
				}
				effects.push(Effect::Transmit(render_join(&channel)));
				effects
			}
			// Not yet authenticated: the stored channel is joined after the next welcome.
			_ => Vec::new(),
		}
	}

	/// Render the outbound line for `text` if the session may send right now.
	pub(crate) fn prepare_send(&self, generation: Generation, text: &str) -> Result<String, SendRejected> {
		if !self.is_current(generation) {
			return Err(SendRejected::Stale);
		}
		if self.state != ConnectionState::Joined {
			return Err(SendRejected::NotJoined(self.state));
		}
		if text.trim().is_empty() {
			return Err(SendRejected::EmptyText);
		}
		let Some(channel) = &self.current_channel else {
			return Err(SendRejected::NotJoined(self.state));
		};
		Ok(render_privmsg(channel, text))
	}

	/// Local copy of a message we just transmitted, with the text as it went on the wire.
	pub(crate) fn self_echo(&mut self, text: &str) -> ChatMessage {
		ChatMessage {
			id: self.next_message_id(),
			username: self.credentials.login().to_string(),
			text: single_line(text).into_owned(),
			color: Some(self.self_color.clone()),
			timestamp: SystemTime::now(),
		}
	}

	/// Returns whether anything was torn down.
	pub(crate) fn disconnect(&mut self) -> bool {
		let was_active = self.state != ConnectionState::Disconnected || self.current_channel.is_some();
		self.generation += 1;
		self.state = ConnectionState::Disconnected;
		self.current_channel = None;
		self.callbacks = None;
		self.auth_acked = false;
		was_active
	}

	fn next_message_id(&mut self) -> MessageId {
		self.message_counter += 1;
		MessageId(self.message_counter)
	}
}

#[cfg(test)]
mod tests {
	use livechat_domain::{Login, SecretString};

	use super::*;

	fn machine() -> SessionMachine {
		let creds = Credentials::new(SecretString::new("tok"), Login::new("Me").unwrap()).unwrap();
		SessionMachine::new(creds, &SessionConfig::default())
	}

	fn callbacks() -> Callbacks {
		Callbacks {
			on_message: Arc::new(|_| {}),
			on_connection_change: None,
		}
	}

	fn chan(s: &str) -> ChannelName {
		ChannelName::new(s).unwrap()
	}

	fn joined(m: &mut SessionMachine, channel: &str) -> Generation {
		let g = m.begin(chan(channel), callbacks());
		m.transport_opened(g);
		m.line_received(g, ":tmi.twitch.tv 001 me :Welcome, GLHF!");
		m.line_received(g, &format!(":me!me@me.tmi.twitch.tv JOIN #{channel}"));
		assert_eq!(m.state(), ConnectionState::Joined);
		g
	}

	#[test]
	fn happy_path_walks_every_state() {
		let mut m = machine();
		assert_eq!(m.state(), ConnectionState::Disconnected);

		let g = m.begin(chan("Zelda"), callbacks());
		assert_eq!(m.state(), ConnectionState::Connecting);

		let effects = m.transport_opened(g);
		assert_eq!(m.state(), ConnectionState::Authenticating);
		assert_eq!(
			effects,
			vec![
				Effect::Transmit("PASS oauth:tok".to_string()),
				Effect::Transmit("NICK me".to_string()),
				Effect::Transmit("CAP REQ :twitch.tv/tags twitch.tv/commands".to_string()),
			]
		);

		let effects = m.line_received(g, ":tmi.twitch.tv 001 me :Welcome, GLHF!");
		assert_eq!(m.state(), ConnectionState::Joining);
		assert_eq!(effects, vec![Effect::Transmit("JOIN #zelda".to_string())]);

		let effects = m.line_received(g, ":me!me@me.tmi.twitch.tv JOIN #zelda");
		assert_eq!(m.state(), ConnectionState::Joined);
		assert_eq!(effects, vec![Effect::ConnectionChanged(true)]);
	}

	#[test]
	fn ping_only_produces_pong() {
		let mut m = machine();
		let g = m.begin(chan("c"), callbacks());
		m.transport_opened(g);
		let before = m.state();
		assert_eq!(
			m.line_received(g, "PING :tmi.twitch.tv"),
			vec![Effect::Transmit("PONG :tmi.twitch.tv".to_string())]
		);
		assert_eq!(m.state(), before);
	}

	#[test]
	fn only_first_welcome_joins() {
		let mut m = machine();
		let g = m.begin(chan("c"), callbacks());
		m.transport_opened(g);
		assert_eq!(m.line_received(g, ":tmi.twitch.tv 001 me :hi").len(), 1);
		assert!(m.line_received(g, ":tmi.twitch.tv 001 me :hi").is_empty());
		assert_eq!(m.state(), ConnectionState::Joining);
	}

	#[test]
	fn join_before_welcome_is_ignored() {
		let mut m = machine();
		let g = m.begin(chan("c"), callbacks());
		m.transport_opened(g);
		assert!(m.line_received(g, ":me!me@me JOIN #c").is_empty());
		assert_eq!(m.state(), ConnectionState::Authenticating);
	}

	#[test]
	fn chat_ids_increase_and_survive_reconnects() {
		let mut m = machine();
		let g = joined(&mut m, "c");

		let first = match m.line_received(g, ":a!a@a PRIVMSG #c :one").pop() {
			Some(Effect::Deliver(msg)) => msg,
			other => panic!("unexpected: {other:?}"),
		};

		m.transport_closed(g);
		assert!(m.reconnect_due(g));
		m.transport_opened(g);

		let echo = m.self_echo("two");
		assert!(echo.id > first.id);
	}

	#[test]
	fn chat_for_other_channel_is_dropped() {
		let mut m = machine();
		let g = joined(&mut m, "c");
		assert!(m.line_received(g, ":a!a@a PRIVMSG #other :hi").is_empty());
	}

	#[test]
	fn malformed_and_unknown_lines_have_no_effect() {
		let mut m = machine();
		let g = joined(&mut m, "c");
		assert!(m.line_received(g, ":a!a@a PRIVMSG #c no-trailing").is_empty());
		assert!(m.line_received(g, ":tmi.twitch.tv USERSTATE #c").is_empty());
		assert_eq!(m.state(), ConnectionState::Joined);
	}

	#[test]
	fn send_requires_joined() {
		let mut m = machine();
		let g = m.begin(chan("c"), callbacks());
		assert_eq!(
			m.prepare_send(g, "hello"),
			Err(SendRejected::NotJoined(ConnectionState::Connecting))
		);
		m.transport_opened(g);
		assert!(m.prepare_send(g, "hello").is_err());
	}

	#[test]
	fn send_while_joined_renders_privmsg_and_echo() {
		let mut m = machine();
		let g = joined(&mut m, "zelda");
		assert_eq!(m.prepare_send(g, "hello"), Ok("PRIVMSG #zelda :hello".to_string()));
		assert_eq!(m.prepare_send(g, "   "), Err(SendRejected::EmptyText));

		let echo = m.self_echo("hello");
		assert_eq!(echo.username, "me");
		assert_eq!(echo.text, "hello");
		assert_eq!(echo.color.as_deref(), Some("#9146FF"));
	}

	#[test]
	fn unplanned_closes_back_off_until_budget_exhausted() {
		let mut m = machine();
		let g = m.begin(chan("c"), callbacks());

		let mut delays = Vec::new();
		for _ in 0..5 {
			let effects = m.transport_closed(g);
			assert_eq!(effects[0], Effect::ConnectionChanged(false));
			match effects.get(1) {
				Some(Effect::ScheduleReconnect { delay, .. }) => delays.push(delay.as_millis()),
				other => panic!("expected reconnect, got {other:?}"),
			}
			assert!(m.reconnect_due(g));
		}
		assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);

		let effects = m.transport_closed(g);
		assert_eq!(effects, vec![Effect::ConnectionChanged(false)]);
		assert_eq!(m.reconnect_attempts(), 6);
	}

	#[test]
	fn successful_open_resets_attempts() {
		let mut m = machine();
		let g = m.begin(chan("c"), callbacks());
		m.transport_closed(g);
		m.reconnect_due(g);
		m.transport_closed(g);
		assert_eq!(m.reconnect_attempts(), 2);
		m.reconnect_due(g);
		m.transport_opened(g);
		assert_eq!(m.reconnect_attempts(), 0);
	}

	#[test]
	fn disconnect_defeats_pending_reconnect() {
		let mut m = machine();
		let g = joined(&mut m, "c");
		let effects = m.transport_closed(g);
		assert!(matches!(effects.last(), Some(Effect::ScheduleReconnect { .. })));

		assert!(m.disconnect());
		assert!(!m.reconnect_due(g));
		assert_eq!(m.state(), ConnectionState::Disconnected);
		assert!(m.current_channel().is_none());
		assert!(m.callbacks_for(g).is_none());
		assert_eq!(m.reconnect_attempts(), 1);
	}

	#[test]
	fn disconnect_is_idempotent_and_safe_before_connect() {
		let mut m = machine();
		assert!(!m.disconnect());
		assert!(!m.disconnect());
		assert_eq!(m.state(), ConnectionState::Disconnected);
	}

	#[test]
	fn stale_generation_is_ignored_everywhere() {
		let mut m = machine();
		let old = m.begin(chan("a"), callbacks());
		let new = m.begin(chan("b"), callbacks());
		assert!(m.transport_opened(old).is_empty());
		assert!(m.line_received(old, "PING :x").is_empty());
		assert!(m.transport_closed(old).is_empty());
		assert!(m.change_channel(old, chan("z")).is_empty());
		assert_eq!(m.prepare_send(old, "x"), Err(SendRejected::Stale));
		assert!(m.is_current(new));
	}

	#[test]
	fn change_channel_parts_then_joins() {
		let mut m = machine();
		let g = joined(&mut m, "oldchan");
		let effects = m.change_channel(g, chan("newchan"));
		assert_eq!(
			effects,
			vec![
				Effect::TransmitBestEffort("PART #oldchan".to_string()),
				Effect::Transmit("JOIN #newchan".to_string()),
			]
		);
		assert_eq!(m.state(), ConnectionState::Joining);
		assert_eq!(m.current_channel(), Some(&chan("newchan")));

		assert_eq!(
			m.line_received(g, ":me!me@me JOIN #newchan"),
			vec![Effect::ConnectionChanged(true)]
		);
	}

	#[test]
	fn change_channel_before_auth_only_updates_target() {
		let mut m = machine();
		let g = m.begin(chan("a"), callbacks());
		m.transport_opened(g);
		assert!(m.change_channel(g, chan("b")).is_empty());
		assert_eq!(
			m.line_received(g, ":tmi.twitch.tv 001 me :hi"),
			vec![Effect::Transmit("JOIN #b".to_string())]
		);
	}

	#[test]
	fn server_reconnect_drops_transport() {
		let mut m = machine();
		let g = joined(&mut m, "c");
		assert_eq!(m.line_received(g, ":tmi.twitch.tv RECONNECT"), vec![Effect::DropTransport]);
	}

	#[test]
	fn server_reconnect_then_close_schedules_retry() {
		let mut m = machine();
		let g = joined(&mut m, "c");
		assert_eq!(m.line_received(g, ":tmi.twitch.tv RECONNECT"), vec![Effect::DropTransport]);

		let effects = m.transport_closed(g);
		assert_eq!(effects[0], Effect::ConnectionChanged(false));
		assert!(matches!(effects[1], Effect::ScheduleReconnect { attempt: 1, .. }));
		assert_eq!(m.reconnect_attempts(), 1);
		assert!(m.reconnect_due(g));
		assert_eq!(m.current_channel(), Some(&chan("c")));
	}

	#[test]
	fn join_for_previous_channel_is_not_an_ack() {
		let mut m = machine();
		let g = joined(&mut m, "oldchan");
		m.change_channel(g, chan("newchan"));

		assert!(m.line_received(g, ":me!me@me JOIN #oldchan").is_empty());
		assert_eq!(m.state(), ConnectionState::Joining);
		assert!(m.prepare_send(g, "hi").is_err());
	}

	#[test]
	fn join_by_another_user_is_not_an_ack() {
		let mut m = machine();
		let g = m.begin(chan("c"), callbacks());
		m.transport_opened(g);
		m.line_received(g, ":tmi.twitch.tv 001 me :hi");

		assert!(m.line_received(g, ":someoneelse!x@x JOIN #c").is_empty());
		assert_eq!(m.state(), ConnectionState::Joining);

		assert_eq!(m.line_received(g, ":me!me@me JOIN #c"), vec![Effect::ConnectionChanged(true)]);
	}

	#[test]
	fn notice_is_never_delivered() {
		let mut m = machine();
		let g = joined(&mut m, "c");
		assert!(m.line_received(g, ":tmi.twitch.tv NOTICE #c :You are sending messages too quickly.").is_empty());
		assert_eq!(m.state(), ConnectionState::Joined);
	}

	#[test]
	fn echo_matches_wire_text() {
		let mut m = machine();
		let g = joined(&mut m, "c");
		assert_eq!(m.prepare_send(g, "a\nb"), Ok("PRIVMSG #c :a b".to_string()));
		assert_eq!(m.self_echo("a\nb").text, "a b");
	}
}
