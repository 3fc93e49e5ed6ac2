#![forbid(unsafe_code)]

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::warn;
use url::Url;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ChatWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsConnector = Arc<dyn Fn(Url) -> BoxFuture<'static, anyhow::Result<ChatWs>> + Send + Sync>;

/// Well-known chat server endpoint.
pub const CHAT_ENDPOINT: &str = "wss://irc-ws.chat.twitch.tv:443";

/// Channel session configuration.
#[derive(Clone)]
pub struct SessionConfig {
	pub(crate) endpoint: Url,

	/// Unplanned closes tolerated without a successful open in between.
	pub max_reconnect_attempts: u32,

	/// Backoff is `base * 2^attempt`, capped at `reconnect_max_delay`.
	pub reconnect_base_delay: Duration,
	pub reconnect_max_delay: Duration,

	/// Color attached to self-echoed messages.
	pub self_color: String,

	pub control_channel_capacity: usize,

	/// Transport factory override (tests, proxies).
	pub ws_connector: Option<WsConnector>,
}

impl SessionConfig {
	pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
		self.max_reconnect_attempts = attempts;
		self
	}

	pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
		self.reconnect_base_delay = base;
		self.reconnect_max_delay = max;
		self
	}

	pub fn with_self_color(mut self, color: impl Into<String>) -> Self {
		self.self_color = color.into();
		self
	}

	pub fn with_control_channel_capacity(mut self, capacity: usize) -> Self {
		self.control_channel_capacity = capacity;
		self
	}

	pub fn with_ws_connector(mut self, connector: WsConnector) -> Self {
		self.ws_connector = Some(connector);
		self
	}

	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	pub(crate) fn normalized(mut self) -> Self {
		if self.reconnect_base_delay > self.reconnect_max_delay {
			warn!(
				base_ms = self.reconnect_base_delay.as_millis(),
				max_ms = self.reconnect_max_delay.as_millis(),
				"session config: reconnect_base_delay > reconnect_max_delay; swapping"
			);
			std::mem::swap(&mut self.reconnect_base_delay, &mut self.reconnect_max_delay);
		}
		self.control_channel_capacity = self.control_channel_capacity.max(1);
		self
	}

	pub(crate) fn connector(&self) -> WsConnector {
		if let Some(c) = &self.ws_connector {
			return c.clone();
		}

		Arc::new(|url: Url| Box::pin(async move { connect_chat_ws(url).await }) as BoxFuture<'static, anyhow::Result<ChatWs>>)
	}
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			endpoint: Url::parse(CHAT_ENDPOINT).expect("valid chat endpoint"),
			max_reconnect_attempts: 5,
			reconnect_base_delay: Duration::from_millis(1000),
			reconnect_max_delay: Duration::from_secs(30),
			self_color: "#9146FF".to_string(),
			control_channel_capacity: 64,
			ws_connector: None,
		}
	}
}

impl fmt::Debug for SessionConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionConfig")
			.field("endpoint", &self.endpoint.as_str())
			.field("max_reconnect_attempts", &self.max_reconnect_attempts)
			.field("reconnect_base_delay", &self.reconnect_base_delay)
			.field("reconnect_max_delay", &self.reconnect_max_delay)
			.field("self_color", &self.self_color)
			.field("control_channel_capacity", &self.control_channel_capacity)
			.field("ws_connector", &self.ws_connector.as_ref().map(|_| "<custom>"))
			.finish()
	}
}

async fn connect_chat_ws(url: Url) -> anyhow::Result<ChatWs> {
	let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
		.await
		.context("connect_async to chat endpoint")?;
	Ok(ws)
}

/// Delay before reconnect number `attempt`: `min * 2^attempt`, clamped to `[min, max]`.
pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
	let pow = attempt.min(16);
	let ms = min.as_millis().saturating_mul(1u128 << pow);
	let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
	d.min(max).max(min)
}
