//! User preferences.
//!
//! Stored as JSON in the platform config directory
//! (`~/.config/maildeck/settings.json` on Linux). Decoding is lenient: a
//! value that cannot be understood falls back to its default instead of
//! failing the whole file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// Undo window used when the configured one is missing or invalid.
pub const DEFAULT_UNDO_DELAY_SECS: u64 = 10;

/// What `r` does when a message is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyBehavior {
    /// Reply to the sender only.
    #[default]
    Reply,
    /// Reply to the sender and every recipient.
    ReplyAll,
}

/// Where the cursor goes after the selected message is deleted or moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAdvance {
    /// The message that followed it.
    #[default]
    Next,
    /// The message that preceded it.
    Previous,
    /// Back to the list with nothing selected.
    None,
}

/// List density. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    /// Roomy rows with snippets.
    #[default]
    Comfortable,
    /// One line per message.
    Compact,
}

/// Reading pane placement. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingPane {
    /// Beside the list.
    #[default]
    Right,
    /// Below the list.
    Bottom,
    /// Full-screen reading view.
    Off,
}

/// Preferences that persist across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default reply action.
    #[serde(deserialize_with = "lenient::or_default")]
    pub reply_behavior: ReplyBehavior,
    /// Undo-send window in seconds. Always positive.
    #[serde(deserialize_with = "lenient::undo_delay")]
    pub undo_send_delay_secs: u64,
    /// Cursor rule after delete/move.
    #[serde(deserialize_with = "lenient::or_default")]
    pub auto_advance: AutoAdvance,
    /// Show the whole conversation when opening a message.
    pub conversation_view: bool,
    /// Whether keyboard shortcuts are active.
    pub keyboard_shortcuts: bool,
    /// List density.
    #[serde(deserialize_with = "lenient::or_default")]
    pub density: Density,
    /// Reading pane placement.
    #[serde(deserialize_with = "lenient::or_default")]
    pub reading_pane: ReadingPane,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reply_behavior: ReplyBehavior::default(),
            undo_send_delay_secs: DEFAULT_UNDO_DELAY_SECS,
            auto_advance: AutoAdvance::default(),
            conversation_view: true,
            keyboard_shortcuts: true,
            density: Density::default(),
            reading_pane: ReadingPane::default(),
        }
    }
}

impl Settings {
    /// Default settings file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("maildeck")
            .join("settings.json")
    }

    /// Loads settings from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not JSON.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            tracing::debug!(?path, "No settings file, using defaults");
            return Ok(Self::default());
        }
        let contents = tokio::fs::read_to_string(path).await?;
        let settings = serde_json::from_str(&contents)?;
        tracing::info!(?path, "Settings loaded");
        Ok(settings)
    }

    /// Writes settings to `path`, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        tracing::info!(?path, "Settings saved");
        Ok(())
    }
}

/// Field decoders that fall back to defaults instead of failing.
mod lenient {
    use super::{DEFAULT_UNDO_DELAY_SECS, Deserialize, Deserializer};
    use serde::de::DeserializeOwned;
    use serde_json::Value;

    pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    /// Accepts `7`, `7.0` or `"7"`. Anything else, including zero and
    /// negative values, becomes the default.
    pub fn undo_delay<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let seconds = match &value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        Ok(seconds
            .filter(|s| s.is_finite() && *s >= 1.0)
            .map_or(DEFAULT_UNDO_DELAY_SECS, |s| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let whole = s.trunc() as u64;
                whole
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Settings {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = parse("{}");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.undo_send_delay_secs, 10);
        assert_eq!(settings.auto_advance, AutoAdvance::Next);
        assert!(settings.keyboard_shortcuts);
    }

    #[test]
    fn test_undo_delay_is_lenient() {
        assert_eq!(parse(r#"{"undo_send_delay_secs": 5}"#).undo_send_delay_secs, 5);
        assert_eq!(parse(r#"{"undo_send_delay_secs": "30"}"#).undo_send_delay_secs, 30);
        assert_eq!(parse(r#"{"undo_send_delay_secs": 7.9}"#).undo_send_delay_secs, 7);
        for invalid in ["0", "-3", r#""soon""#, "null", "[5]", "0.5"] {
            let json = format!(r#"{{"undo_send_delay_secs": {invalid}}}"#);
            assert_eq!(parse(&json).undo_send_delay_secs, 10, "{invalid}");
        }
    }

    #[test]
    fn test_unknown_auto_advance_falls_back() {
        assert_eq!(parse(r#"{"auto_advance": "previous"}"#).auto_advance, AutoAdvance::Previous);
        assert_eq!(parse(r#"{"auto_advance": "none"}"#).auto_advance, AutoAdvance::None);
        assert_eq!(parse(r#"{"auto_advance": "sideways"}"#).auto_advance, AutoAdvance::Next);
    }

    #[test]
    fn test_other_fields_survive_bad_values() {
        let settings = parse(
            r#"{"reply_behavior": "reply_all", "density": 3, "conversation_view": false}"#,
        );
        assert_eq!(settings.reply_behavior, ReplyBehavior::ReplyAll);
        assert_eq!(settings.density, Density::Comfortable);
        assert!(!settings.conversation_view);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            undo_send_delay_secs: 20,
            auto_advance: AutoAdvance::None,
            reading_pane: ReadingPane::Bottom,
            ..Settings::default()
        };

        settings.save(&path).await.unwrap();
        let loaded = Settings::load(&path).await.unwrap();

        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(loaded, Settings::default());
    }
}
