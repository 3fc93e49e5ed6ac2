#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use livechat_domain::{Credentials, Login, SecretString};
use livechat_session::SessionConfig;
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Default config path: `~/.livechat/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".livechat").join("config.toml"))
}

/// Load the CLI config from TOML, then apply process env overrides.
pub fn load_cli_config_from_path(path: &Path) -> anyhow::Result<CliConfig> {
	load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<CliConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = CliConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, env);
	Ok(cfg)
}

#[derive(Debug, Clone)]
pub struct CliConfig {
	/// Bearer token, with or without the `oauth:` prefix.
	pub token: Option<SecretString>,
	pub login: Option<String>,
	pub channel: Option<String>,
	pub history_limit: usize,
	pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ReconnectSettings {
	pub base_delay: Option<Duration>,
	pub max_delay: Option<Duration>,
	pub max_attempts: Option<u32>,
	pub self_color: Option<String>,
}

impl Default for CliConfig {
	fn default() -> Self {
		Self {
			token: None,
			login: None,
			channel: None,
			history_limit: DEFAULT_HISTORY_LIMIT,
			reconnect: ReconnectSettings::default(),
		}
	}
}

impl CliConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			token: file.token.filter(|s| !s.trim().is_empty()).map(SecretString::new),
			login: file.login.filter(|s| !s.trim().is_empty()),
			channel: file.channel.filter(|s| !s.trim().is_empty()),
			history_limit: file.history_limit.filter(|v| *v > 0).unwrap_or(DEFAULT_HISTORY_LIMIT),
			reconnect: ReconnectSettings {
				base_delay: file.reconnect.base_delay_ms.map(Duration::from_millis),
				max_delay: file.reconnect.max_delay_ms.map(Duration::from_millis),
				max_attempts: file.reconnect.max_attempts,
				self_color: file.reconnect.self_color.filter(|s| !s.trim().is_empty()),
			},
		}
	}

	pub fn credentials(&self) -> anyhow::Result<Credentials> {
		let token = self
			.token
			.clone()
			.ok_or_else(|| anyhow!("no token configured (set `token` or LIVECHAT_TOKEN)"))?;
		let login = self
			.login
			.as_deref()
			.ok_or_else(|| anyhow!("no login configured (set `login` or LIVECHAT_LOGIN)"))?;
		let login = Login::new(login).context("invalid login")?;
		Credentials::new(token, login).context("invalid token")
	}

	pub fn session_config(&self) -> SessionConfig {
		let mut cfg = SessionConfig::default();
		if let Some(attempts) = self.reconnect.max_attempts {
			cfg = cfg.with_max_reconnect_attempts(attempts);
		}
		let base = self.reconnect.base_delay.unwrap_or(cfg.reconnect_base_delay);
		let max = self.reconnect.max_delay.unwrap_or(cfg.reconnect_max_delay);
		cfg = cfg.with_reconnect_delays(base, max);
		if let Some(color) = &self.reconnect.self_color {
			cfg = cfg.with_self_color(color.clone());
		}
		cfg
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	token: Option<String>,
	login: Option<String>,
	channel: Option<String>,
	history_limit: Option<usize>,

	#[serde(default)]
	reconnect: FileReconnectSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileReconnectSettings {
	base_delay_ms: Option<u64>,
	max_delay_ms: Option<u64>,
	max_attempts: Option<u32>,
	self_color: Option<String>,
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn non_blank(v: String) -> Option<String> {
	let v = v.trim().to_string();
	if v.is_empty() { None } else { Some(v) }
}

fn apply_env_overrides(cfg: &mut CliConfig, env: impl Fn(&str) -> Option<String>) {
	if let Some(v) = env("LIVECHAT_TOKEN").and_then(non_blank) {
		cfg.token = Some(SecretString::new(v));
		info!("livechat config: token overridden by env");
	}

	if let Some(v) = env("LIVECHAT_LOGIN").and_then(non_blank) {
		cfg.login = Some(v);
		info!("livechat config: login overridden by env");
	}

	if let Some(v) = env("LIVECHAT_CHANNEL").and_then(non_blank) {
		cfg.channel = Some(v);
		info!("livechat config: channel overridden by env");
	}

	if let Some(v) = env("LIVECHAT_HISTORY_LIMIT")
		&& let Ok(limit) = v.trim().parse::<usize>()
		&& limit > 0
	{
		cfg.history_limit = limit;
		info!(limit, "livechat config: history_limit overridden by env");
	}

	if let Some(v) = env("LIVECHAT_RECONNECT_BASE_DELAY_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.reconnect.base_delay = Some(Duration::from_millis(ms));
		info!(ms, "livechat config: reconnect base_delay overridden by env");
	}

	if let Some(v) = env("LIVECHAT_RECONNECT_MAX_DELAY_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.reconnect.max_delay = Some(Duration::from_millis(ms));
		info!(ms, "livechat config: reconnect max_delay overridden by env");
	}

	if let Some(v) = env("LIVECHAT_RECONNECT_MAX_ATTEMPTS")
		&& let Ok(attempts) = v.trim().parse::<u32>()
	{
		cfg.reconnect.max_attempts = Some(attempts);
		info!(attempts, "livechat config: reconnect max_attempts overridden by env");
	}

	if let (Some(base), Some(max)) = (cfg.reconnect.base_delay, cfg.reconnect.max_delay)
		&& base > max
	{
		warn!(
			base_ms = base.as_millis(),
			max_ms = max.as_millis(),
			"livechat config: reconnect base_delay > max_delay; swapping"
		);
		cfg.reconnect.base_delay = Some(max);
		cfg.reconnect.max_delay = Some(base);
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;
	use tempfile::tempdir;

	fn no_env(_: &str) -> Option<String> {
		None
	}

	#[test]
	fn missing_file_yields_defaults() {
		let td = tempdir().expect("tempdir");
		let cfg = load_with_env(&td.path().join("absent.toml"), no_env).unwrap();
		assert!(cfg.token.is_none());
		assert!(cfg.channel.is_none());
		assert_eq!(cfg.history_limit, DEFAULT_HISTORY_LIMIT);
		assert!(cfg.credentials().is_err());
	}

	#[test]
	fn reads_file_and_filters_blanks() {
		let td = tempdir().expect("tempdir");
		let path = td.path().join("config.toml");
		fs::write(
			&path,
			"token = \"oauth:abc\"\nlogin = \"Viewer\"\nchannel = \"  \"\nhistory_limit = 50\n\n[reconnect]\nbase_delay_ms = 250\nmax_attempts = 3\nself_color = \"#00FF00\"\n",
		)
		.unwrap();

		let cfg = load_with_env(&path, no_env).unwrap();
		assert!(cfg.channel.is_none());
		assert_eq!(cfg.history_limit, 50);

		let creds = cfg.credentials().unwrap();
		assert_eq!(creds.token().expose(), "abc");
		assert_eq!(creds.login().as_str(), "viewer");

		let session = cfg.session_config();
		assert_eq!(session.reconnect_base_delay, Duration::from_millis(250));
		assert_eq!(session.reconnect_max_delay, Duration::from_secs(30));
		assert_eq!(session.max_reconnect_attempts, 3);
		assert_eq!(session.self_color, "#00FF00");
	}

	#[test]
	fn invalid_toml_is_an_error() {
		let td = tempdir().expect("tempdir");
		let path = td.path().join("config.toml");
		fs::write(&path, "token = [").unwrap();
		let err = load_with_env(&path, no_env).unwrap_err();
		assert!(format!("{err:#}").contains("parse TOML"));
	}

	#[test]
	fn env_overrides_file_values() {
		let td = tempdir().expect("tempdir");
		let path = td.path().join("config.toml");
		fs::write(&path, "login = \"fromfile\"\nchannel = \"a\"\n").unwrap();

		let env: HashMap<&str, &str> = HashMap::from([
			("LIVECHAT_TOKEN", "envtok"),
			("LIVECHAT_CHANNEL", "b"),
			("LIVECHAT_LOGIN", "   "),
			("LIVECHAT_HISTORY_LIMIT", "nope"),
			("LIVECHAT_RECONNECT_BASE_DELAY_MS", "5000"),
			("LIVECHAT_RECONNECT_MAX_DELAY_MS", "100"),
		]);
		let cfg = load_with_env(&path, |k| env.get(k).map(|v| v.to_string())).unwrap();

		assert_eq!(cfg.token.as_ref().map(SecretString::expose), Some("envtok"));
		assert_eq!(cfg.login.as_deref(), Some("fromfile"));
		assert_eq!(cfg.channel.as_deref(), Some("b"));
		assert_eq!(cfg.history_limit, DEFAULT_HISTORY_LIMIT);
		assert_eq!(cfg.reconnect.base_delay, Some(Duration::from_millis(100)));
		assert_eq!(cfg.reconnect.max_delay, Some(Duration::from_millis(5000)));
	}

	#[test]
	fn debug_never_prints_the_token() {
		let cfg = CliConfig {
			token: Some(SecretString::new("hunter2")),
			..CliConfig::default()
		};
		assert!(!format!("{cfg:?}").contains("hunter2"));
	}
}
