//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatbridge/config.json`) and environment.
//! The core only ever reads a snapshot; [`ConfigStore`] re-reads the file when it changes
//! so toggling commands or switching backends takes effect without a restart.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Which AI backend answers `ask`. Switchable at runtime.
    #[serde(rename = "activeAI", default)]
    pub active_ai: BackendKind,

    /// Marker that starts every command (default "!").
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Reply with a fixed "unknown command" message for unrecognized `!foo`.
    #[serde(default = "default_true")]
    pub reply_unknown_commands: bool,

    /// Per-command enable flags.
    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default = "BackendConfig::gemini_default")]
    pub gemini: BackendConfig,

    #[serde(default = "BackendConfig::openai_default")]
    pub openai: BackendConfig,

    #[serde(default = "BackendConfig::olama_default")]
    pub olama: BackendConfig,

    /// Hard deadline for one backend call in `ask` (default 60).
    #[serde(default = "default_ask_timeout_secs")]
    pub ask_timeout_secs: u64,

    /// Logged once the transport is ready.
    #[serde(default = "default_ready_message")]
    pub ready_message: String,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_ai: BackendKind::default(),
            command_prefix: default_command_prefix(),
            reply_unknown_commands: true,
            commands: CommandsConfig::default(),
            gemini: BackendConfig::gemini_default(),
            openai: BackendConfig::openai_default(),
            olama: BackendConfig::olama_default(),
            ask_timeout_secs: default_ask_timeout_secs(),
            ready_message: default_ready_message(),
            media: MediaConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

/// The three supported AI providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Gemini,
    Openai,
    /// Ollama. Spelled "olama" in existing config files.
    #[serde(alias = "ollama")]
    Olama,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Gemini => "gemini",
            BackendKind::Openai => "openai",
            BackendKind::Olama => "olama",
        }
    }
}

/// Enable flags for `ask`, `sticker` and `help`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_true")]
    pub ask: bool,
    #[serde(default = "default_true")]
    pub sticker: bool,
    #[serde(default = "default_true")]
    pub help: bool,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            ask: true,
            sticker: true,
            help: true,
        }
    }
}

impl CommandsConfig {
    pub fn any_enabled(&self) -> bool {
        self.ask || self.sticker || self.help
    }
}

/// Endpoint, credential and model for one backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl BackendConfig {
    fn gemini_default() -> Self {
        Self {
            url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent?key=".to_string(),
            api_key: None,
            model: None,
        }
    }

    fn openai_default() -> Self {
        Self {
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: Some("gpt-4o-mini".to_string()),
        }
    }

    fn olama_default() -> Self {
        Self {
            url: "http://127.0.0.1:11434/api/generate".to_string(),
            api_key: None,
            model: Some("llama3.2:latest".to_string()),
        }
    }
}

/// Size limits, temp directory and rendering knobs for the sticker pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfig {
    /// Largest accepted input (default 3 MiB). Exactly this size passes.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    /// Largest accepted transcoder output (default 1 MiB).
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Most sources one `sticker` message may carry (default 5).
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    /// Scratch directory for transcoder input/output. Default: `<tmp>/chatbridge`.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Bold TTF/OTF used for text stickers. Unset uses the bundled DejaVu Sans Bold.
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_min_font_size")]
    pub min_font_size: f32,
    #[serde(default = "default_font_step")]
    pub font_step: f32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            max_output_bytes: default_max_output_bytes(),
            max_sources: default_max_sources(),
            temp_dir: None,
            ffmpeg_path: default_ffmpeg_path(),
            font_path: None,
            font_size: default_font_size(),
            min_font_size: default_min_font_size(),
            font_step: default_font_step(),
        }
    }
}

impl MediaConfig {
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::env::temp_dir().join("chatbridge"))
    }
}

/// Per-channel config (e.g. Telegram bot token).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_ask_timeout_secs() -> u64 {
    60
}

fn default_ready_message() -> String {
    "Chatbridge is ready!".to_string()
}

fn default_max_input_bytes() -> usize {
    3 * 1024 * 1024
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_max_sources() -> usize {
    5
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_font_size() -> f32 {
    64.0
}

fn default_min_font_size() -> f32 {
    16.0
}

fn default_font_step() -> f32 {
    4.0
}

impl Config {
    pub fn ask_timeout(&self) -> Duration {
        Duration::from_secs(self.ask_timeout_secs)
    }

    /// Config for the currently selected backend.
    pub fn active_backend(&self) -> &BackendConfig {
        match self.active_ai {
            BackendKind::Gemini => &self.gemini,
            BackendKind::Openai => &self.openai,
            BackendKind::Olama => &self.olama,
        }
    }

    /// Banner listing every command with its state, e.g. `✅ !ask`.
    pub fn command_summary(&self) -> String {
        [
            ("ask", self.commands.ask),
            ("sticker", self.commands.sticker),
            ("help", self.commands.help),
        ]
        .iter()
        .map(|(name, on)| {
            format!(
                "{} {}{}",
                if *on { "✅" } else { "❌" },
                self.command_prefix,
                name
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
    }

    /// Apply env overrides (bot token, API keys) on top of file values.
    fn apply_env(&mut self) {
        if let Some(t) = non_empty_env("TELEGRAM_BOT_TOKEN") {
            self.channels.telegram.bot_token = Some(t);
        }
        if let Some(k) = non_empty_env("GEMINI_API_KEY") {
            self.gemini.api_key = Some(k);
        }
        if let Some(k) = non_empty_env("OPENAI_API_KEY") {
            self.openai.api_key = Some(k);
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the Telegram bot token (env already applied at load time).
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    config
        .channels
        .telegram
        .bot_token
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatbridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = read_config_file(&path)?;
    config.apply_env();
    Ok((config, path))
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Shared, hot-reloadable config. Another process (or a human) edits the file; the run loop
/// calls [`ConfigStore::refresh`] before each message and hands a snapshot to the dispatcher.
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<(Config, Option<SystemTime>)>,
}

impl ConfigStore {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let (config, path) = load_config(path)?;
        let mtime = modified_at(&path);
        Ok(Self {
            path,
            inner: RwLock::new((config, mtime)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file if its modification time changed. A broken edit keeps the previous config.
    pub async fn refresh(&self) {
        let mtime = modified_at(&self.path);
        if self.inner.read().await.1 == mtime {
            return;
        }
        match load_config(Some(self.path.clone())) {
            Ok((config, _)) => {
                log::info!(
                    "config reloaded from {} (active backend: {})",
                    self.path.display(),
                    config.active_ai.name()
                );
                *self.inner.write().await = (config, mtime);
            }
            Err(e) => log::warn!("config reload failed, keeping previous: {:#}", e),
        }
    }

    pub async fn snapshot(&self) -> Config {
        self.inner.read().await.0.clone()
    }
}
