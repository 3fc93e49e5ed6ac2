#![forbid(unsafe_code)]

mod config;
mod driver;
mod error;
mod machine;
mod session;

pub use config::{BoxFuture, CHAT_ENDPOINT, ChatWs, SessionConfig, WsConnector, backoff_delay};
pub use error::SessionError;
pub use machine::ConnectionState;
pub use session::{ChatSession, SessionCallbacks};

pub use livechat_domain::{ChannelName, ChatMessage, Credentials, Login, MessageId, SecretString};
