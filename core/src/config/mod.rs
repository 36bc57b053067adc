use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const CIRRUS_DIR: &str = ".cirrus";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            city: "San Jose".to_string(),
            latitude: 37.3512,
            longitude: -121.8846,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Header carrying the caller identity. Requests without it are rejected.
    pub auth_header: String,
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            auth_header: "x-user-id".to_string(),
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// `jsonl` or `memory`.
    pub kind: String,
    pub dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: "jsonl".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_round_trips: usize,
    pub max_history: usize,
    pub tool_timeout_secs: u64,
    pub tool_concurrency: usize,
    pub system_instruction: Option<String>,
    pub weather_base_url: String,
    pub location: LocationConfig,
    pub server: ServerConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.7,
            max_round_trips: 10,
            max_history: 50,
            tool_timeout_secs: 30,
            tool_concurrency: 1,
            system_instruction: None,
            weather_base_url: crate::tools::weather::OPEN_METEO_URL.to_string(),
            location: LocationConfig::default(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

pub fn get_cirrus_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(CIRRUS_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_cirrus_dir().join("config.toml")
}

pub fn ensure_cirrus_dir() -> Result<PathBuf> {
    let cirrus_dir = get_cirrus_dir();

    if !cirrus_dir.exists() {
        std::fs::create_dir_all(&cirrus_dir).with_context(|| {
            format!(
                "Failed to create cirrus directory at {}",
                cirrus_dir.display()
            )
        })?;
    }

    Ok(cirrus_dir)
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        if config_exists() {
            load_config()
        } else {
            Ok(Config::default())
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or("gemini")
    }
}

pub fn load_config() -> Result<Config> {
    let config_path = get_config_path();

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::anyhow!(
                "Config file not found. Run 'cirrus onboard' to set up your configuration."
            )
        } else {
            anyhow::anyhow!("Failed to read config from {}: {}", config_path.display(), e)
        }
    })?;

    parse_config(&content)
        .with_context(|| format!("Failed to parse config from {}", config_path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

pub fn save_config(config: &Config) -> Result<()> {
    ensure_cirrus_dir()?;

    let config_path = get_config_path();
    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.provider_name(), "gemini");
        assert_eq!(config.max_round_trips, 10);
        assert_eq!(config.server.auth_header, "x-user-id");
        assert_eq!(config.store.kind, "jsonl");
        assert_eq!(config.location.city, "San Jose");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
provider = "openai"
model = "gpt-4o-mini"
max_round_trips = 3

[server]
bind = "0.0.0.0:8080"

[location]
city = "Oslo"
"#,
        )
        .unwrap();

        assert_eq!(config.provider_name(), "openai");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_round_trips, 3);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.server.channel_capacity, 64);
        assert_eq!(config.location.city, "Oslo");
        assert_eq!(config.location.latitude, 37.3512);
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = Config::default();
        config.api_key = "secret".into();
        config.store.dir = Some(PathBuf::from("/tmp/cirrus"));

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = parse_config(&text).unwrap();
        assert_eq!(parsed.api_key, "secret");
        assert_eq!(parsed.store, config.store);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(parse_config("max_round_trips = \"many\"").is_err());
    }
}
