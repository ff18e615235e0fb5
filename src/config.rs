use directories::{ProjectDirs, UserDirs};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    NoConfigDir,
    #[error("failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// mpv, or a binary that takes mpv's flags and JSON IPC
    #[serde(default = "default_player_command")]
    pub command: String,
    /// Extra arguments appended after the built-in ones
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_referrer")]
    pub referrer: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: Vec::new(),
            user_agent: default_user_agent(),
            referrer: default_referrer(),
        }
    }
}

fn default_player_command() -> String {
    "mpv".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36"
        .to_string()
}

fn default_referrer() -> String {
    "https://yeshi.eu.org/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_app_id")]
    pub app_id: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_id: default_app_id(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_app_id() -> String {
    "1383421771159572600".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub animecix: AnimecixConfig,
    #[serde(default)]
    pub openanime: OpenAnimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnimecixConfig {
    #[serde(default = "default_animecix_base")]
    pub base_url: String,
    /// Mirror used for the related-videos endpoint
    #[serde(default = "default_animecix_alternative")]
    pub alternative_url: String,
    #[serde(default = "default_animecix_video_api")]
    pub video_api: String,
}

impl Default for AnimecixConfig {
    fn default() -> Self {
        Self {
            base_url: default_animecix_base(),
            alternative_url: default_animecix_alternative(),
            video_api: default_animecix_video_api(),
        }
    }
}

fn default_animecix_base() -> String {
    "https://animecix.tv/".to_string()
}

fn default_animecix_alternative() -> String {
    "https://mangacix.net/".to_string()
}

fn default_animecix_video_api() -> String {
    "https://tau-video.xyz".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAnimeConfig {
    #[serde(default = "default_openanime_base")]
    pub base_url: String,
    #[serde(default = "default_openanime_video_host")]
    pub video_host: String,
}

impl Default for OpenAnimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_openanime_base(),
            video_host: default_openanime_video_host(),
        }
    }
}

fn default_openanime_base() -> String {
    "https://api.openani.me".to_string()
}

fn default_openanime_video_host() -> String {
    "https://de2---vn-t9g4tsan-5qcl.yeshi.eu.org".to_string()
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub download_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| {
            UserDirs::new()
                .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
                .unwrap_or_else(std::env::temp_dir)
                .join("anistream")
        })
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads the file at `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("", "", "anistream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.player.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "player.command cannot be empty".to_string(),
            ));
        }

        let urls = [
            ("sources.animecix.base_url", &self.sources.animecix.base_url),
            (
                "sources.animecix.alternative_url",
                &self.sources.animecix.alternative_url,
            ),
            ("sources.animecix.video_api", &self.sources.animecix.video_api),
            ("sources.openanime.base_url", &self.sources.openanime.base_url),
            (
                "sources.openanime.video_host",
                &self.sources.openanime.video_host,
            ),
        ];
        for (key, url) in urls {
            match url::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => {
                    return Err(ConfigError::ValidationError(format!(
                        "{key} must be an http:// or https:// URL"
                    )));
                }
            }
        }

        if self.presence.enabled && self.presence.app_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "presence.app_id cannot be empty when presence is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
