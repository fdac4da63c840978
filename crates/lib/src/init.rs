//! Initialize the configuration directory: create ~/.chatbridge, a default config and the media temp dir.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};

/// Fail with a helpful message when there is no bot token to connect with.
pub fn require_initialized(config_path: &Path, config: &Config) -> Result<String> {
    config::resolve_telegram_token(config).with_context(|| {
        format!(
            "no Telegram bot token; set channels.telegram.botToken in {} or TELEGRAM_BOT_TOKEN (run `chatbridge init` to create the file)",
            config_path.display()
        )
    })
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with every default spelled out if missing.
/// - Creates the media temp directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let temp_dir = config.media.resolved_temp_dir();
    std::fs::create_dir_all(&temp_dir)
        .with_context(|| format!("creating media temp directory {}", temp_dir.display()))?;

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_loadable_defaults_once() {
        let dir = std::env::temp_dir().join(format!("chatbridge-init-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        let out = init_config_dir(&path).expect("init");
        assert_eq!(out, dir);
        let (config, _) = config::load_config(Some(path.clone())).expect("load");
        assert_eq!(config.command_prefix, "!");

        std::fs::write(&path, r#"{ "commandPrefix": "/" }"#).expect("edit");
        init_config_dir(&path).expect("second init");
        let (config, _) = config::load_config(Some(path)).expect("reload");
        assert_eq!(config.command_prefix, "/");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
