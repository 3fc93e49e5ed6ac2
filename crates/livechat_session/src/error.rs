#![forbid(unsafe_code)]

use livechat_domain::ParseIdError;

/// Errors surfaced synchronously by the session handle.
///
/// Transport failures are never reported here; they show up as
/// `on_connection_change(false)` and are retried by the backoff policy.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
	#[error("invalid channel name: {0}")]
	InvalidChannel(#[from] ParseIdError),

	#[error("session is not connected")]
	NotConnected,

	#[error("no tokio runtime available to drive the session")]
	NoRuntime,

	#[error("session command queue is full")]
	Busy,
}
