use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::platform::DiscoveryCriterion;
use crate::scoring::ScoreFilter;

/// Genres collected when the config file names no criteria.
pub const DEFAULT_GENRES: &[&str] = &[
    "jazz",
    "folk",
    "alternative",
    "soul",
    "indie",
    "indie folk",
    "british soul",
    "uk jazz",
    "indie rock",
    "singer-songwriter",
    "british indie",
    "acoustic",
    "neo soul",
    "jazz fusion",
];

/// Geographic criterion appended to the default genre list.
pub const DEFAULT_COUNTRY: &str = "united kingdom";

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Custom checkpoint file path (overrides XDG default).
    pub checkpoint_path: Option<PathBuf>,
    pub collection: CollectionConfig,
    /// Discovery criteria, processed in order by the discover stage.
    pub criteria: Vec<DiscoveryCriterion>,
    pub lastfm: LastFmConfig,
    pub instagram: InstagramConfig,
    pub youtube: YouTubeConfig,
    pub identity: IdentityConfig,
    /// Default filters for the `score` and `export` commands.
    pub scoring: ScoreFilter,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            checkpoint_path: None,
            collection: CollectionConfig::default(),
            criteria: default_criteria(),
            lastfm: LastFmConfig::default(),
            instagram: InstagramConfig::default(),
            youtube: YouTubeConfig::default(),
            identity: IdentityConfig::default(),
            scoring: ScoreFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One pass, then exit.
    Once,
    /// Loop forever with `pass_interval_secs` between passes.
    Continuous,
}

/// Orchestrator pacing and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub mode: RunMode,
    /// Delay after every Last.fm call, in milliseconds.
    pub scrobble_delay_ms: u64,
    /// Delay after every Instagram call, in milliseconds.
    pub photo_delay_ms: u64,
    /// Delay after every YouTube call, in milliseconds.
    pub video_delay_ms: u64,
    /// Consecutive rate-limit waits on one item before it is skipped.
    pub max_rate_limit_waits: u32,
    /// Pause between passes in continuous mode.
    pub pass_interval_secs: u64,
    /// Also discover channels on YouTube for every genre criterion.
    pub video_discovery: bool,
    /// Tracks fetched per artist by the `tracks` command.
    pub tracks_per_artist: u32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Once,
            scrobble_delay_ms: 250,
            photo_delay_ms: 10_000,
            video_delay_ms: 500,
            max_rate_limit_waits: 5,
            pass_interval_secs: 1800,
            video_discovery: false,
            tracks_per_artist: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    /// API key; `LASTFM_API_KEY` takes precedence when set.
    pub api_key: Option<String>,
    pub base_url: String,
    /// Artists requested per discovery criterion.
    pub discover_limit: u32,
    pub timeout_secs: u64,
    /// Wait used when a rate-limit response carries no Retry-After.
    pub rate_limit_wait_secs: u64,
}

impl Default for LastFmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://ws.audioscrobbler.com/2.0/".to_string(),
            discover_limit: 100,
            timeout_secs: 30,
            rate_limit_wait_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstagramConfig {
    pub base_url: String,
    /// Public web app id sent as `x-ig-app-id`.
    pub app_id: String,
    /// Profiles with fewer followers are discarded.
    pub min_followers: i64,
    /// Recent posts averaged for engagement.
    pub recent_posts: usize,
    pub timeout_secs: u64,
    pub rate_limit_wait_secs: u64,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            base_url: "https://i.instagram.com/api/v1/users/web_profile_info/".to_string(),
            app_id: "936619743392459".to_string(),
            min_followers: 5000,
            recent_posts: 12,
            timeout_secs: 30,
            rate_limit_wait_secs: 1320,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YouTubeConfig {
    /// API key; `YOUTUBE_API_KEY` takes precedence when set.
    pub api_key: Option<String>,
    pub base_url: String,
    /// Channels considered per search.
    pub max_results: u32,
    pub min_subscribers: i64,
    pub max_subscribers: i64,
    /// Minimum channel match score for `lookup`.
    pub min_match_score: i64,
    pub timeout_secs: u64,
    pub rate_limit_wait_secs: u64,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            max_results: 10,
            min_subscribers: 500,
            max_subscribers: 500_000,
            min_match_score: 5,
            timeout_secs: 30,
            rate_limit_wait_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Jaro-Winkler similarity at which two distinct names are queued for review.
    pub review_threshold: f64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            review_threshold: 0.93,
        }
    }
}

pub fn default_criteria() -> Vec<DiscoveryCriterion> {
    DEFAULT_GENRES
        .iter()
        .map(|g| DiscoveryCriterion::genre(g))
        .chain(std::iter::once(DiscoveryCriterion::country(DEFAULT_COUNTRY)))
        .collect()
}

impl AppConfig {
    /// Load config from `path`, or from `~/.config/artistscout/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load(path: Option<&Path>) -> Self {
        let explicit = path.is_some();
        let config_path = path.map(Path::to_path_buf).or_else(Self::config_path);
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Some(path) if explicit => {
                log::warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: AppConfig = toml::from_str(contents)?;
        config.criteria.retain(|c| !c.is_empty());
        if config.criteria.is_empty() {
            config.criteria = default_criteria();
        }
        Ok(config)
    }

    /// Last.fm key from the environment, else the config file.
    pub fn lastfm_api_key(&self) -> Option<String> {
        env_key("LASTFM_API_KEY").or_else(|| self.lastfm.api_key.clone())
    }

    /// YouTube key from the environment, else the config file.
    pub fn youtube_api_key(&self) -> Option<String> {
        env_key("YOUTUBE_API_KEY").or_else(|| self.youtube.api_key.clone())
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    data_file("artistscout.db")
}

/// Resolve the default checkpoint path next to the database.
pub fn default_checkpoint_path() -> PathBuf {
    data_file("checkpoint.json")
}

fn data_file(name: &str) -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join(name)
    } else {
        // Fallback: current directory
        PathBuf::from(name)
    }
}
