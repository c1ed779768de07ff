//! Gateway configuration for the terminal client.
//!
//! Read from `~/.config/maildeck/gateway.json`; `MAILDECK_GATEWAY_URL` and
//! `MAILDECK_GATEWAY_TOKEN` override the file. Without a base URL the client
//! runs in demo mode against the in-memory gateway.

use std::path::{Path, PathBuf};

use anyhow::Context;
use maildeck_core::GatewayConfig;
use serde::Deserialize;

/// Environment variable overriding the gateway base URL.
pub const URL_VAR: &str = "MAILDECK_GATEWAY_URL";
/// Environment variable overriding the bearer token.
pub const TOKEN_VAR: &str = "MAILDECK_GATEWAY_TOKEN";

const DEFAULT_ADDRESS: &str = "me@example.com";

/// Contents of `gateway.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Base URL of the mail service.
    pub base_url: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Sender address for outgoing mail.
    pub address: Option<String>,
}

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Gateway to use, or `None` for demo mode.
    pub gateway: Option<GatewayConfig>,
    /// Sender address for outgoing mail.
    pub address: String,
}

/// Default location of `gateway.json`.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("maildeck")
        .join("gateway.json")
}

/// Loads the configuration file (if any) and applies environment overrides.
pub async fn load(path: &Path) -> anyhow::Result<ClientConfig> {
    let file = if tokio::fs::try_exists(path).await? {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?
    } else {
        ConfigFile::default()
    };

    Ok(resolve(
        file,
        std::env::var(URL_VAR).ok(),
        std::env::var(TOKEN_VAR).ok(),
    ))
}

fn resolve(file: ConfigFile, url: Option<String>, token: Option<String>) -> ClientConfig {
    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    let gateway = non_empty(url).or(non_empty(file.base_url)).map(|base_url| {
        let mut config = GatewayConfig::new(base_url);
        config.token = non_empty(token).or(non_empty(file.token));
        if let Some(timeout) = file.timeout_secs.filter(|t| *t > 0) {
            config.timeout_secs = timeout;
        }
        config
    });

    ClientConfig {
        gateway,
        address: non_empty(file.address).unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_url_means_demo_mode() {
        let config = resolve(ConfigFile::default(), None, Some("secret".into()));
        assert!(config.gateway.is_none());
        assert_eq!(config.address, DEFAULT_ADDRESS);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            base_url: Some("https://file.example.com".into()),
            token: Some("file-token".into()),
            timeout_secs: Some(5),
            address: Some("ops@example.com".into()),
        };
        let config = resolve(file, Some("https://env.example.com".into()), None);

        let gateway = config.gateway.unwrap();
        assert_eq!(gateway.base_url, "https://env.example.com");
        assert_eq!(gateway.token.as_deref(), Some("file-token"));
        assert_eq!(gateway.timeout_secs, 5);
        assert_eq!(config.address, "ops@example.com");
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let file = ConfigFile {
            base_url: Some("https://file.example.com".into()),
            ..ConfigFile::default()
        };
        let config = resolve(file, Some("  ".into()), Some(String::new()));

        let gateway = config.gateway.unwrap();
        assert_eq!(gateway.base_url, "https://file.example.com");
        assert!(gateway.token.is_none());
        assert_eq!(gateway.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        tokio::fs::write(&path, r#"{"base_url": "http://localhost:8080/api", "address": "me@corp.example"}"#)
            .await
            .unwrap();

        let config = load(&path).await.unwrap();
        assert_eq!(config.address, "me@corp.example");
        assert!(config.gateway.is_some());
    }
}
