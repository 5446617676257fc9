pub mod photo;
pub mod scrobble;
pub mod video;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The three sources an artist can be sighted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Scrobble-tracking service (Last.fm)
    ScrobbleService,
    /// Photo-sharing social network (Instagram)
    PhotoSocial,
    /// Video platform (YouTube)
    VideoPlatform,
}

impl Platform {
    pub const ALL: [Platform; 3] = [
        Platform::ScrobbleService,
        Platform::PhotoSocial,
        Platform::VideoPlatform,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::ScrobbleService => "Last.fm",
            Self::PhotoSocial => "Instagram",
            Self::VideoPlatform => "YouTube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single platform metric in the shared vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// An unverified, platform-specific partial record as returned by a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub platform: Platform,
    pub source_name: String,
    pub platform_fields: BTreeMap<String, MetricValue>,
    pub collected_at: DateTime<Utc>,
}

impl CandidateProfile {
    pub fn new(platform: Platform, source_name: impl Into<String>, collected_at: DateTime<Utc>) -> Self {
        Self {
            platform,
            source_name: source_name.into(),
            platform_fields: BTreeMap::new(),
            collected_at,
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: &str, value: impl Into<MetricValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<MetricValue>) {
        self.platform_fields.insert(key.to_string(), value.into());
    }

    /// Set a field only when a value is present; absent stays absent.
    pub fn set_opt<V: Into<MetricValue>>(&mut self, key: &str, value: Option<V>) {
        if let Some(v) = value {
            self.set(key, v);
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.platform_fields.get(key)? {
            MetricValue::Int(v) => Some(*v),
            MetricValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            MetricValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.platform_fields.get(key)? {
            MetricValue::Float(v) => Some(*v),
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Text(s) => s.trim().parse().ok(),
            MetricValue::Bool(_) => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.platform_fields.get(key)? {
            MetricValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.platform_fields.get(key)? {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// What to discover: a genre tag, a geographic filter, or both.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DiscoveryCriterion {
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl DiscoveryCriterion {
    pub fn genre(tag: &str) -> Self {
        Self {
            genre: Some(tag.to_string()),
            country: None,
        }
    }

    pub fn country(name: &str) -> Self {
        Self {
            genre: None,
            country: Some(name.to_string()),
        }
    }

    /// Genre assigned to scaffolds created from this criterion.
    pub fn genre_context(&self) -> &str {
        self.genre.as_deref().unwrap_or(crate::UNKNOWN_GENRE)
    }

    pub fn is_empty(&self) -> bool {
        self.genre.as_deref().is_none_or(|g| g.trim().is_empty())
            && self.country.as_deref().is_none_or(|c| c.trim().is_empty())
    }
}

impl fmt::Display for DiscoveryCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.genre, &self.country) {
            (Some(g), Some(c)) => write!(f, "genre:{g} country:{c}"),
            (Some(g), None) => write!(f, "genre:{g}"),
            (None, Some(c)) => write!(f, "country:{c}"),
            (None, None) => f.write_str("(empty)"),
        }
    }
}

/// Conditions a collector reports. Collectors never retry; the orchestrator decides.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectError {
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// One source platform, seen as "search term in, candidate profiles out".
pub trait PlatformCollector {
    fn platform(&self) -> Platform;

    /// Query the platform for candidates matching a discovery criterion.
    fn discover(&self, criterion: &DiscoveryCriterion) -> Result<Vec<CandidateProfile>, CollectError>;

    /// Targeted single-profile query.
    fn lookup(&self, name: &str) -> Result<Option<CandidateProfile>, CollectError>;

    /// An artist's most played tracks, best first. One profile per track,
    /// `source_name` is the track title.
    fn top_tracks(&self, _artist: &str, _limit: u32) -> Result<Vec<CandidateProfile>, CollectError> {
        Ok(Vec::new())
    }

    /// The platform's best video for one track of an artist.
    fn track_video(&self, _artist: &str, _track: &str) -> Result<Option<CandidateProfile>, CollectError> {
        Ok(None)
    }
}

/// Stand-in for a platform that has no credentials configured.
pub struct DisabledCollector {
    platform: Platform,
    reason: String,
}

impl DisabledCollector {
    pub fn new(platform: Platform, reason: impl Into<String>) -> Self {
        Self {
            platform,
            reason: reason.into(),
        }
    }
}

impl PlatformCollector for DisabledCollector {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn discover(&self, _criterion: &DiscoveryCriterion) -> Result<Vec<CandidateProfile>, CollectError> {
        Err(CollectError::Unavailable(self.reason.clone()))
    }

    fn lookup(&self, _name: &str) -> Result<Option<CandidateProfile>, CollectError> {
        Err(CollectError::Unavailable(self.reason.clone()))
    }

    fn top_tracks(&self, _artist: &str, _limit: u32) -> Result<Vec<CandidateProfile>, CollectError> {
        Err(CollectError::Unavailable(self.reason.clone()))
    }

    fn track_video(&self, _artist: &str, _track: &str) -> Result<Option<CandidateProfile>, CollectError> {
        Err(CollectError::Unavailable(self.reason.clone()))
    }
}

/// `(avg_likes + avg_comments) / followers * 100`; undefined for zero followers.
pub fn engagement_rate(avg_likes: f64, avg_comments: f64, followers: i64) -> Option<f64> {
    if followers <= 0 {
        return None;
    }
    Some((avg_likes + avg_comments) / followers as f64 * 100.0)
}

/// Thin JSON-over-HTTP helper shared by the platform adapters.
///
/// Status codes listed in `rate_limit_statuses` become `RateLimited`, honouring
/// a numeric `Retry-After` header and falling back to `default_retry_after`.
/// 404 is reported as `Ok(None)`. Everything else that is not 2xx is `Unavailable`,
/// unless `with_error_bodies` is set, in which case the body is still decoded
/// (for APIs that put a structured error payload on 4xx responses).
pub(crate) struct HttpJson {
    agent: ureq::Agent,
    default_retry_after: Duration,
    rate_limit_statuses: &'static [u16],
    error_bodies: bool,
}

impl HttpJson {
    pub(crate) fn new(
        timeout: Duration,
        default_retry_after: Duration,
        rate_limit_statuses: &'static [u16],
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .user_agent(concat!("artistscout/", env!("CARGO_PKG_VERSION")))
            .build()
            .into();
        Self {
            agent,
            default_retry_after,
            rate_limit_statuses,
            error_bodies: false,
        }
    }

    pub(crate) fn with_error_bodies(mut self) -> Self {
        self.error_bodies = true;
        self
    }

    pub(crate) fn default_retry_after(&self) -> Duration {
        self.default_retry_after
    }

    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Option<T>, CollectError> {
        let mut request = self.agent.get(url);
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        log::debug!("GET {url}");
        let mut response = request
            .call()
            .map_err(|e| CollectError::Unavailable(format!("request to {url} failed: {e}")))?;

        let status = response.status().as_u16();
        if self.rate_limit_statuses.contains(&status) {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(self.default_retry_after);
            return Err(CollectError::RateLimited { retry_after });
        }
        if status == 404 {
            return Ok(None);
        }
        let success = (200..300).contains(&status);
        if !success && !self.error_bodies {
            return Err(CollectError::Unavailable(format!("HTTP {status} from {url}")));
        }

        let body: T = response
            .body_mut()
            .read_json()
            .map_err(|e| {
                if success {
                    CollectError::Unavailable(format!("bad JSON from {url}: {e}"))
                } else {
                    CollectError::Unavailable(format!("HTTP {status} from {url}"))
                }
            })?;
        Ok(Some(body))
    }
}
