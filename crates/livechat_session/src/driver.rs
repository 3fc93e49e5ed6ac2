#![forbid(unsafe_code)]

//! Connection driver task.
//!
//! One task per `connect` call. It owns the transport, feeds inputs into the
//! shared [`SessionMachine`] and carries out the returned effects. The task
//! stops when the session drops its control sender, when the reconnect budget
//! is exhausted, or when its generation is superseded.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use livechat_domain::ChannelName;
use livechat_protocol::split_transmission;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{ChatWs, WsConnector};
use crate::machine::{Effect, Generation, SessionMachine};

pub(crate) type SharedMachine = Arc<Mutex<SessionMachine>>;

/// Held while callbacks run and while the session disconnects, so no callback
/// starts after `disconnect` returns. Reentrant so a callback may query or
/// disconnect its own session on the same thread.
pub(crate) type DispatchGate = Arc<ReentrantMutex<()>>;

pub(crate) enum Control {
	Send { text: String, resp: oneshot::Sender<bool> },
	ChangeChannel { channel: ChannelName },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
	Continue,
	Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
	Closed,
	Shutdown,
}

pub(crate) struct Driver {
	machine: SharedMachine,
	dispatch: DispatchGate,
	generation: Generation,
	endpoint: Url,
	connector: WsConnector,
}

impl Driver {
	pub(crate) fn new(
		machine: SharedMachine,
		dispatch: DispatchGate,
		generation: Generation,
		endpoint: Url,
		connector: WsConnector,
	) -> Self {
		Self {
			machine,
			dispatch,
			generation,
			endpoint,
			connector,
		}
	}

	pub(crate) async fn run(self, mut control_rx: mpsc::Receiver<Control>) {
		let generation = self.generation;
		debug!(%generation, "session driver starting");

		'outer: loop {
			let connection_id = Uuid::new_v4();
			metrics::counter!("livechat_connect_attempts_total").increment(1);
			info!(%connection_id, endpoint = %self.endpoint, "connecting to chat endpoint");

			let connect = (self.connector)(self.endpoint.clone());
			tokio::pin!(connect);

			let connected = loop {
				tokio::select! {
					biased;

					cmd = control_rx.recv() => match cmd {
						Some(cmd) => self.handle_idle(cmd),
						None => break 'outer,
					},
					res = &mut connect => break res,
				}
			};

			match connected {
				Ok(mut ws) => {
					info!(%connection_id, "chat transport open");
					let effects = self.machine.lock().transport_opened(generation);

					let exit = if self.apply(&mut ws, effects, connection_id).await == Flow::Closed {
						Exit::Closed
					} else {
						self.pump(&mut ws, &mut control_rx, connection_id).await
					};

					if exit == Exit::Shutdown {
						let _ = ws.close(None).await;
						break 'outer;
					}
					info!(%connection_id, "chat transport closed");
				}
				Err(e) => {
					warn!(%connection_id, error = ?e, "failed to open chat transport");
				}
			}

			let effects = self.machine.lock().transport_closed(generation);
			let mut delay: Option<Duration> = None;
			for effect in effects {
				match effect {
					Effect::ScheduleReconnect { attempt, delay: d } => {
						info!(attempt, delay_ms = d.as_millis() as u64, "scheduling reconnect");
						delay = Some(d);
					}
					other => self.notify(other),
				}
			}

			let Some(delay) = delay else {
				break 'outer;
			};

			let timer = tokio::time::sleep(delay);
			tokio::pin!(timer);
			loop {
				tokio::select! {
					biased;

					cmd = control_rx.recv() => match cmd {
						Some(cmd) => self.handle_idle(cmd),
						None => break 'outer,
					},
					_ = &mut timer => break,
				}
			}

			let due = self.machine.lock().reconnect_due(generation);
			if !due {
				debug!(%generation, "reconnect no longer wanted");
				break 'outer;
			}
		}

		debug!(%generation, "session driver stopped");
	}

	async fn pump(&self, ws: &mut ChatWs, control_rx: &mut mpsc::Receiver<Control>, connection_id: Uuid) -> Exit {
		loop {
			tokio::select! {
				biased;

				cmd = control_rx.recv() => {
					let Some(cmd) = cmd else {
						return Exit::Shutdown;
					};
					if self.handle_connected(ws, cmd, connection_id).await == Flow::Closed {
						return Exit::Closed;
					}
				}

				msg = ws.next() => {
					let Some(msg) = msg else {
						return Exit::Closed;
					};
					let msg = match msg {
						Ok(m) => m,
						Err(e) => {
							warn!(%connection_id, error = ?e, "chat transport read error");
							return Exit::Closed;
						}
					};

					match msg {
						Message::Text(t) => {
							for line in split_transmission(t.as_str()) {
								let effects = self.machine.lock().line_received(self.generation, line);
								if self.apply(ws, effects, connection_id).await == Flow::Closed {
									return Exit::Closed;
								}
							}
						}
						Message::Ping(p) => {
							let _ = ws.send(Message::Pong(p)).await;
						}
						Message::Close(frame) => {
							debug!(%connection_id, ?frame, "server closed chat transport");
							return Exit::Closed;
						}
						_ => {}
					}
				}
			}
		}
	}

	/// Commands that arrive while no transport is open.
	fn handle_idle(&self, cmd: Control) {
		match cmd {
			Control::Send { resp, .. } => {
				let _ = resp.send(false);
			}
			Control::ChangeChannel { channel } => {
				// Only updates the target; there is nothing to transmit yet.
				let _ = self.machine.lock().change_channel(self.generation, channel);
			}
		}
	}

	async fn handle_connected(&self, ws: &mut ChatWs, cmd: Control, connection_id: Uuid) -> Flow {
		match cmd {
			Control::Send { text, resp } => {
				let prepared = self.machine.lock().prepare_send(self.generation, &text);
				let line = match prepared {
					Ok(line) => line,
					Err(reason) => {
						debug!(%connection_id, ?reason, "send rejected");
						let _ = resp.send(false);
						return Flow::Continue;
					}
				};

				if let Err(e) = send_line(ws, line).await {
					warn!(%connection_id, error = ?e, "failed to send chat message");
					let _ = resp.send(false);
					return Flow::Closed;
				}

				metrics::counter!("livechat_messages_sent_total").increment(1);
				let echo = self.machine.lock().self_echo(&text);
				self.notify(Effect::Deliver(echo));
				let _ = resp.send(true);
				Flow::Continue
			}
			Control::ChangeChannel { channel } => {
				info!(%connection_id, %channel, "changing chat channel");
				let effects = self.machine.lock().change_channel(self.generation, channel);
				self.apply(ws, effects, connection_id).await
			}
		}
	}

	async fn apply<S>(&self, ws: &mut S, effects: Vec<Effect>, connection_id: Uuid) -> Flow
	where
		S: Sink<Message, Error = WsError> + Unpin,
	{
		for effect in effects {
			match effect {
				Effect::Transmit(line) => {
					let command = command_word(&line).to_string();
					if let Err(e) = send_line(ws, line).await {
						warn!(%connection_id, %command, error = ?e, "failed to transmit");
						return Flow::Closed;
					}
					debug!(%connection_id, %command, "transmitted");
				}
				Effect::TransmitBestEffort(line) => {
					let command = command_word(&line).to_string();
					if let Err(e) = send_line(ws, line).await {
						debug!(%connection_id, %command, error = ?e, "best-effort transmit failed");
					}
				}
				Effect::DropTransport => {
					let _ = SinkExt::close(ws).await;
					return Flow::Closed;
				}
				other => self.notify(other),
			}
		}
		Flow::Continue
	}

	/// Invoke callbacks for a delivery effect, unless this driver was superseded.
	fn notify(&self, effect: Effect) {
		let _gate = self.dispatch.lock();
		let callbacks = self.machine.lock().callbacks_for(self.generation);
		let Some(callbacks) = callbacks else {
			return;
		};

		match effect {
			Effect::Deliver(msg) => (callbacks.on_message)(msg),
			Effect::ConnectionChanged(up) => {
				if let Some(f) = &callbacks.on_connection_change {
					f(up);
				}
			}
			_ => {}
		}
	}
}

async fn send_line<S>(ws: &mut S, line: String) -> anyhow::Result<()>
where
	S: Sink<Message, Error = WsError> + Unpin,
{
	ws.send(Message::Text(line.into())).await?;
	Ok(())
}

/// First token of an outbound line; never log the full `PASS` line.
fn command_word(line: &str) -> &str {
	line.split(' ').next().unwrap_or_default()
}
