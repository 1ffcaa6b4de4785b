//! Configuration, loaded from `~/.config/oxterm/config.json`.
//!
//! Every field has a default so a missing or partial file still yields a
//! working terminal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Shell to spawn; `None` falls back to `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    /// Scrollback limit in rows (0 disables history).
    pub scrollback_lines: usize,
    /// Capacity of the IO thread's control mailbox.
    pub mailbox_capacity: usize,
    /// Whether OSC 52 may write the clipboard.
    pub allow_clipboard_write: bool,
    /// Initial grid size.
    pub cols: u16,
    pub rows: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            scrollback_lines: crate::terminal::Terminal::DEFAULT_SCROLLBACK,
            mailbox_capacity: 64,
            allow_clipboard_write: true,
            cols: 80,
            rows: 24,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("oxterm").join("config.json"))
    }

    /// Load from the default location; missing or unreadable files yield
    /// the defaults, a malformed file is an error worth surfacing.
    pub fn load() -> Config {
        let Some(path) = Self::path() else {
            return Config::default();
        };
        Self::load_from(&path).unwrap_or_else(|e| {
            log::warn!("config load failed ({}), using defaults", e);
            Config::default()
        })
    }

    pub fn load_from(path: &std::path::Path) -> Result<Config, std::io::Error> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| std::io::Error::other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.mailbox_capacity, 64);
        assert!(c.scrollback_lines > 0);
        assert_eq!((c.cols, c.rows), (80, 24));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: Config = serde_json::from_str(r#"{"scrollback_lines": 500}"#).unwrap();
        assert_eq!(c.scrollback_lines, 500);
        assert_eq!(c.mailbox_capacity, 64);
        assert!(c.allow_clipboard_write);
    }

    #[test]
    fn round_trips_through_json() {
        let c = Config {
            shell: Some("/bin/zsh".into()),
            scrollback_lines: 2000,
            ..Config::default()
        };
        let text = serde_json::to_string(&c).unwrap();
        assert_eq!(serde_json::from_str::<Config>(&text).unwrap(), c);
    }
}
