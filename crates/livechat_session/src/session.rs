#![forbid(unsafe_code)]

use std::sync::Arc;

use livechat_domain::{ChannelName, ChatMessage, Credentials};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::driver::{Control, DispatchGate, Driver, SharedMachine};
use crate::error::SessionError;
use crate::machine::{Callbacks, ConnectionHandler, ConnectionState, MessageHandler, SessionMachine};

/// Observer callbacks supplied to [`ChatSession::connect`].
///
/// Callbacks run on the session's driver task and must not block.
#[derive(Clone)]
pub struct SessionCallbacks {
	on_message: MessageHandler,
	on_connection_change: Option<ConnectionHandler>,
}

impl SessionCallbacks {
	pub fn new(on_message: impl Fn(ChatMessage) + Send + Sync + 'static) -> Self {
		Self {
			on_message: Arc::new(on_message),
			on_connection_change: None,
		}
	}

	/// Called with `true` once the channel is joined and `false` on every transport loss.
	pub fn with_connection_change(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
		self.on_connection_change = Some(Arc::new(f));
		self
	}
}

impl From<SessionCallbacks> for Callbacks {
	fn from(cb: SessionCallbacks) -> Self {
		Callbacks {
			on_message: cb.on_message,
			on_connection_change: cb.on_connection_change,
		}
	}
}

struct RunHandle {
	control_tx: mpsc::Sender<Control>,
	_task: JoinHandle<()>,
}

/// Client for a single chat channel at a time.
///
/// Must be used inside a tokio runtime. Dropping the session disconnects it.
pub struct ChatSession {
	credentials: Credentials,
	cfg: SessionConfig,
	machine: SharedMachine,
	dispatch: DispatchGate,
	run: Option<RunHandle>,
}

impl ChatSession {
	pub fn new(credentials: Credentials) -> Self {
		Self::with_config(credentials, SessionConfig::default())
	}

	pub fn with_config(credentials: Credentials, cfg: SessionConfig) -> Self {
		let cfg = cfg.normalized();
		let machine = Arc::new(Mutex::new(SessionMachine::new(credentials.clone(), &cfg)));
		Self {
			credentials,
			cfg,
			machine,
			dispatch: Arc::new(ReentrantMutex::new(())),
			run: None,
		}
	}

	/// Open a transport and join `channel`.
	///
	/// Returns once the connection has been started; the outcome is reported
	/// through `callbacks`. A previous connection is torn down first.
	pub fn connect(&mut self, channel: &str, callbacks: SessionCallbacks) -> Result<(), SessionError> {
		let channel = ChannelName::new(channel)?;
		let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

		if self.run.take().is_some() {
			debug!("replacing previous chat connection");
		}

		let generation = self.machine.lock().begin(channel.clone(), callbacks.into());

		let (control_tx, control_rx) = mpsc::channel(self.cfg.control_channel_capacity);
		let driver = Driver::new(
			self.machine.clone(),
			self.dispatch.clone(),
			generation,
			self.cfg.endpoint().clone(),
			self.cfg.connector(),
		);
		let task = runtime.spawn(driver.run(control_rx));

		info!(%channel, login = %self.credentials.login(), "chat session connecting");
		self.run = Some(RunHandle {
			control_tx,
			_task: task,
		});
		Ok(())
	}

	/// Send `text` to the current channel.
	///
	/// Resolves to `true` once the line was written to the transport, in
	/// which case a local echo has already been delivered to `on_message`.
	/// Returns `false` when not joined or when `text` is blank.
	pub async fn send_message(&self, text: &str) -> bool {
		if text.trim().is_empty() || self.state() != ConnectionState::Joined {
			return false;
		}
		let Some(run) = &self.run else {
			return false;
		};

		let (resp_tx, resp_rx) = oneshot::channel();
		let cmd = Control::Send {
			text: text.to_string(),
			resp: resp_tx,
		};
		if run.control_tx.try_send(cmd).is_err() {
			return false;
		}
		resp_rx.await.unwrap_or(false)
	}

	/// Switch channels over the existing transport (`PART` old, `JOIN` new).
	///
	/// While the transport is down the new channel is remembered and joined
	/// after the next successful authentication.
	pub fn change_channel(&self, channel: &str) -> Result<(), SessionError> {
		let channel = ChannelName::new(channel)?;
		let Some(run) = &self.run else {
			return Err(SessionError::NotConnected);
		};

		run.control_tx
			.try_send(Control::ChangeChannel { channel })
			.map_err(|e| match e {
				mpsc::error::TrySendError::Full(_) => SessionError::Busy,
				mpsc::error::TrySendError::Closed(_) => SessionError::NotConnected,
			})
	}

	/// Close the transport and cancel any pending reconnect. Idempotent.
	///
	/// Waits for a callback that is already running; none start afterwards.
	pub fn disconnect(&mut self) {
		let was_active = {
			let _gate = self.dispatch.lock();
			self.machine.lock().disconnect()
		};
		let had_run = self.run.take().is_some();
		if was_active || had_run {
			info!("chat session disconnected");
		}
	}

	pub fn state(&self) -> ConnectionState {
		self.machine.lock().state()
	}

	pub fn is_joined(&self) -> bool {
		self.state() == ConnectionState::Joined
	}

	pub fn current_channel(&self) -> Option<ChannelName> {
		self.machine.lock().current_channel().cloned()
	}

	/// Unplanned closes since the last successful open.
	pub fn reconnect_attempts(&self) -> u32 {
		self.machine.lock().reconnect_attempts()
	}

	pub fn credentials(&self) -> &Credentials {
		&self.credentials
	}

	pub fn config(&self) -> &SessionConfig {
		&self.cfg
	}
}

impl Drop for ChatSession {
	fn drop(&mut self) {
		self.disconnect();
	}
}
