//! Configuration for shellpane sessions.
//!
//! Loaded from `~/.shellpane/config.toml`:
//!
//! ```toml
//! # Shell override (optional; defaults to $SHELL, then /bin/sh)
//! shell = "/bin/zsh"
//!
//! # Channel mode: auto, pty, pipe
//! mode = "auto"
//!
//! # Driver poll timeout per read, in milliseconds
//! poll_timeout_ms = 30
//!
//! [tokens]
//! clear = ["clear", "cls"]
//! exit = ["exit", "logout"]
//! ```

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which channel implementation the session should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPreference {
    /// Try a PTY, fall back to pipes when allocation fails.
    Auto,
    Pty,
    Pipe,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell override; `$SHELL` and then `/bin/sh` otherwise.
    pub shell: Option<String>,
    /// Channel mode preference.
    pub mode: ChannelPreference,
    /// Driver poll timeout per read, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Command tokens handled by the console itself.
    pub tokens: TokenConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            mode: ChannelPreference::Auto,
            poll_timeout_ms: 30,
            tokens: TokenConfig::default(),
        }
    }
}

/// Tokens the console intercepts instead of forwarding verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Commands that clear the screen locally.
    pub clear: Vec<String>,
    /// Commands that start a graceful shutdown.
    pub exit: Vec<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            clear: vec!["clear".to_string(), "cls".to_string()],
            exit: vec!["exit".to_string(), "logout".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults.
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(config) = toml::from_str(&content) {
                        return config;
                    }
                }
            }
        }
        Self::default()
    }

    /// Save configuration to file.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::get_config_path()
            .ok_or_else(|| anyhow::anyhow!("could not determine config path"))?;
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Some(home) = home_dir() {
            let shellpane_dir = home.join(".shellpane");
            if !shellpane_dir.exists() {
                let _ = fs::create_dir_all(&shellpane_dir);
            }
            return Some(shellpane_dir.join("config.toml"));
        }
        None
    }

    /// Resolve the shell to spawn: explicit override, then `$SHELL`,
    /// then `/bin/sh`.
    pub fn resolve_shell(&self) -> String {
        if let Some(shell) = &self.shell {
            return shell.clone();
        }
        env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn is_clear_command(&self, command: &str) -> bool {
        self.tokens.clear.iter().any(|token| token == command.trim())
    }

    pub fn is_exit_command(&self, command: &str) -> bool {
        self.tokens.exit.iter().any(|token| token == command.trim())
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
