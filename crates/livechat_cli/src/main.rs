#![forbid(unsafe_code)]

mod config;
mod console;
mod history;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use livechat_domain::ChannelName;
use livechat_session::{ChatSession, SessionCallbacks};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::console::{Input, format_message, parse_input};
use crate::history::ChatHistory;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: livechat [--channel name] [--config path]\n\
\n\
Options:\n\
	--channel   Channel to join (default: `channel` from config or LIVECHAT_CHANNEL)\n\
	--config    Config file (default: ~/.livechat/config.toml)\n\
	--help      Show this help\n\
\n\
Environment:\n\
	LIVECHAT_TOKEN, LIVECHAT_LOGIN and LIVECHAT_CHANNEL override the config file.\n\
\n\
Input:\n\
	/join <channel>   Switch channel on the same connection\n\
	/history [n]      Reprint the last n messages (default 20)\n\
	/quit             Disconnect and exit\n\
	anything else     Send as a chat message\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,livechat_session=debug".to_string());
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

struct Args {
	channel: Option<String>,
	config: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut channel: Option<String> = None;
	let mut config: Option<PathBuf> = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--channel" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--channel must be non-empty");
					usage_and_exit();
				}
				channel = Some(v);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	Args { channel, config }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let path = match args.config {
		Some(p) => p,
		None => config::default_config_path()?,
	};
	let mut cfg = config::load_cli_config_from_path(&path)?;
	if let Some(channel) = args.channel {
		cfg.channel = Some(channel);
	}

	let credentials = cfg.credentials().unwrap_or_else(|e| {
		eprintln!("{e:#}");
		usage_and_exit()
	});
	let Some(channel) = cfg.channel.clone() else {
		eprintln!("no channel configured (use --channel, `channel` or LIVECHAT_CHANNEL)");
		usage_and_exit()
	};
	let channel = ChannelName::new(&channel).unwrap_or_else(|e| {
		eprintln!("invalid channel {channel:?}: {e}");
		usage_and_exit()
	});

	let history = Arc::new(Mutex::new(ChatHistory::new(cfg.history_limit)));
	let target = Arc::new(Mutex::new(channel.clone()));

	let callbacks = {
		let history = history.clone();
		let target = target.clone();
		SessionCallbacks::new(move |msg| {
			println!("{}", format_message(&msg));
			history.lock().push(msg);
		})
		.with_connection_change(move |up| {
			if up {
				println!("* connected to #{}", target.lock());
			} else {
				println!("* disconnected");
			}
		})
	};

	let mut session = ChatSession::with_config(credentials, cfg.session_config());
	session.connect(channel.as_str(), callbacks)?;
	info!(%channel, config = %path.display(), "livechat started");

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);

	loop {
		tokio::select! {
			res = &mut ctrl_c => {
				if let Err(e) = res {
					warn!(error = ?e, "ctrl-c handler failed");
				}
				break;
			}
			line = lines.next_line() => {
				let Some(line) = line.context("read stdin")? else {
					break;
				};

				match parse_input(&line) {
					Input::Empty => {}
					Input::Quit => break,
					Input::Join(next) => match session.change_channel(next) {
						Ok(()) => {
							if let Ok(next) = ChannelName::new(next) {
								*target.lock() = next;
							}
						}
						Err(e) => println!("* cannot join {next}: {e}"),
					},
					Input::History(n) => {
						let h = history.lock();
						for msg in h.tail(n) {
							println!("{}", format_message(msg));
						}
					}
					Input::Send(text) => {
						if !session.send_message(text).await {
							println!("* message not sent (not joined)");
						}
					}
					Input::Invalid(cmd) => println!("* unknown or incomplete command: {cmd}"),
				}
			}
		}
	}

	session.disconnect();
	info!(messages = history.lock().len(), "livechat exiting");
	Ok(())
}
