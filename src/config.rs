//! Claude Proxy configuration management
//!
//! Two kinds of configuration live here:
//!
//! - [`ProxyConfig`]: server settings loaded from a TOML file.
//! - [`ProxyCredentials`] / [`check_proxy_configuration`]: the two environment
//!   values the Claude CLI needs to reach the proxied API. These are re-read on
//!   every check and never cached.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the proxied API base URL
pub const BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";

/// Environment variable holding the proxied API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Main Claude Proxy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Claude CLI configuration
    #[serde(default)]
    pub cli: CliConfig,
}

impl ProxyConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from an explicit path, else the default location, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "Loading default config file");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// Default config file: `<config dir>/claude-proxy/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|dir| dir.join("claude-proxy").join("config.toml"))
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            cors_origins: Vec::new(),
        }
    }
}

/// Claude CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Binary name or path of the Claude CLI
    pub binary: PathBuf,

    /// Ceiling for the `--version` availability probe
    pub probe_timeout_secs: u64,
}

impl CliConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("claude"),
            probe_timeout_secs: 5,
        }
    }
}

// =============================================================================
// Proxy environment
// =============================================================================

/// The two settings forwarded to every spawned CLI process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl ProxyCredentials {
    /// Read both values from the process environment
    pub fn from_env() -> Self {
        Self {
            base_url: non_empty_env(BASE_URL_ENV),
            api_key: non_empty_env(API_KEY_ENV),
        }
    }

    /// Configured iff both values are present and non-empty
    pub fn status(&self) -> ProxyConfigStatus {
        let base_url = self.base_url.clone().filter(|v| !v.is_empty());
        let has_api_key = self.api_key.as_deref().is_some_and(|v| !v.is_empty());
        let configured = base_url.is_some() && has_api_key;

        ProxyConfigStatus {
            available: configured,
            configured,
            base_url,
            has_api_key,
        }
    }

    /// Environment pairs forwarded explicitly to the CLI process
    pub fn env_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::with_capacity(2);
        if let Some(ref url) = self.base_url {
            pairs.push((BASE_URL_ENV, url.as_str()));
        }
        if let Some(ref key) = self.api_key {
            pairs.push((API_KEY_ENV, key.as_str()));
        }
        pairs
    }
}

/// Where a bridge obtains its credentials
#[derive(Debug, Clone, Default)]
pub enum CredentialSource {
    /// Re-read the process environment on every use
    #[default]
    Environment,
    /// Fixed values (embedding and tests)
    Fixed(ProxyCredentials),
}

impl CredentialSource {
    pub fn resolve(&self) -> ProxyCredentials {
        match self {
            CredentialSource::Environment => ProxyCredentials::from_env(),
            CredentialSource::Fixed(creds) => creds.clone(),
        }
    }
}

/// Configuration status. The API key value is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfigStatus {
    pub available: bool,
    pub configured: bool,
    pub base_url: Option<String>,
    pub has_api_key: bool,
}

/// Check the proxy environment (`ANTHROPIC_BASE_URL` + `ANTHROPIC_API_KEY`)
pub fn check_proxy_configuration() -> ProxyConfigStatus {
    ProxyCredentials::from_env().status()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 3001);
        assert_eq!(config.cli.binary, PathBuf::from("claude"));
        assert_eq!(config.cli.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [gateway]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.cli.probe_timeout_secs, 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[cli]\nbinary = \"/opt/claude/bin/claude\"\nprobe_timeout_secs = 2\n",
        )
        .unwrap();

        let config = ProxyConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.cli.binary, PathBuf::from("/opt/claude/bin/claude"));
        assert_eq!(config.cli.probe_timeout_secs, 2);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway\nport = ").unwrap();

        let err = ProxyConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_status_unconfigured() {
        let status = ProxyCredentials::default().status();
        assert!(!status.configured);
        assert!(!status.available);
        assert!(status.base_url.is_none());
        assert!(!status.has_api_key);
    }

    #[test]
    fn test_check_with_env_unset() {
        // No other test touches these variables.
        std::env::remove_var(BASE_URL_ENV);
        std::env::remove_var(API_KEY_ENV);

        let status = check_proxy_configuration();
        assert!(!status.configured);
        assert!(status.base_url.is_none());
        assert!(!status.has_api_key);
    }

    #[test]
    fn test_status_only_key() {
        let creds = ProxyCredentials {
            base_url: None,
            api_key: Some("sk-test".to_string()),
        };
        let status = creds.status();
        assert!(!status.configured);
        assert!(status.has_api_key);
    }

    #[test]
    fn test_status_empty_values_count_as_missing() {
        let creds = ProxyCredentials {
            base_url: Some(String::new()),
            api_key: Some(String::new()),
        };
        let status = creds.status();
        assert!(!status.configured);
        assert!(status.base_url.is_none());
        assert!(!status.has_api_key);
    }

    #[test]
    fn test_status_configured() {
        let creds = ProxyCredentials {
            base_url: Some("http://localhost:8082".to_string()),
            api_key: Some("sk-test".to_string()),
        };
        let status = creds.status();
        assert!(status.configured);
        assert!(status.available);
        assert_eq!(status.base_url.as_deref(), Some("http://localhost:8082"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["hasApiKey"], true);
        assert_eq!(json["baseUrl"], "http://localhost:8082");
        assert!(json.get("apiKey").is_none());
        assert!(!json.to_string().contains("sk-test"));
    }

    #[test]
    fn test_env_pairs() {
        let creds = ProxyCredentials {
            base_url: Some("http://proxy".to_string()),
            api_key: Some("key".to_string()),
        };
        assert_eq!(
            creds.env_pairs(),
            vec![(BASE_URL_ENV, "http://proxy"), (API_KEY_ENV, "key")]
        );
    }

    #[test]
    fn test_fixed_source_resolves_to_itself() {
        let creds = ProxyCredentials {
            base_url: Some("http://proxy".to_string()),
            api_key: None,
        };
        let source = CredentialSource::Fixed(creds.clone());
        assert_eq!(source.resolve(), creds);
    }
}
