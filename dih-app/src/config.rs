//! `dih` configuration loader.
//!
//! Looks for `--config`, then `./dih.toml`, then `~/.dih/config.toml`. With no
//! file at all the defaults apply; environment variables override either way.

use dih_llm::{ClientConfig, Provider};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const LOCAL_CONFIG_FILE: &str = "dih.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DihConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub llm: ClientConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_in_flight() -> usize {
    64
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_in_flight: default_max_in_flight(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DihConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        Self::load_with_env(path, |key| std::env::var(key).ok()).await
    }

    pub async fn load_with_env(
        path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let resolved = match path {
            Some(explicit) => Some(explicit),
            None => discover_config_path().await,
        };

        let mut cfg = match &resolved {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
                Self::parse(&contents)
                    .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?
            }
            None => Self::default(),
        };

        cfg.apply_env_overrides(env)?;
        cfg.validate()?;
        Ok((cfg, resolved))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("DIH_PROVIDER") {
            self.llm.provider = Some(v.parse::<Provider>()?);
        }
        if let Some(v) = var("DIH_MODEL_NAME") {
            self.llm.model = v;
        }
        if let Some(v) = var("DIH_MAX_TOKENS") {
            self.llm.max_tokens = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("DIH_MAX_TOKENS={v:?}: {e}"))?;
        }
        if let Some(v) = var("DIH_TEMPERATURE") {
            self.llm.temperature = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("DIH_TEMPERATURE={v:?}: {e}"))?;
        }
        if let Some(v) = var("DIH_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = var("DIH_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.keys.openai_api_key = Some(v);
        }
        if let Some(v) = var("ANTHROPIC_API_KEY") {
            self.keys.anthropic_api_key = Some(v);
        }
        if let Some(v) = var("DIH_DEBUG") {
            self.debug = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.model is required"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow::anyhow!(
                "llm.temperature must be within 0..=2, got {}",
                self.llm.temperature
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(anyhow::anyhow!("llm.max_tokens must be > 0"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.max_in_flight must be > 0"));
        }
        Ok(())
    }

    /// Client settings with the key for the active provider filled in.
    pub fn client_config(&self) -> ClientConfig {
        let mut llm = self.llm.clone();
        if llm.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            llm.api_key = match llm.resolved_provider() {
                Provider::OpenAi => self.keys.openai_api_key.clone(),
                Provider::Anthropic => self.keys.anthropic_api_key.clone(),
            };
        }
        llm
    }
}

async fn discover_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if tokio::fs::metadata(&local).await.is_ok() {
        return Some(local);
    }
    let global = default_config_path();
    if tokio::fs::metadata(&global).await.is_ok() {
        return Some(global);
    }
    None
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".dih").join("config.toml")
}
