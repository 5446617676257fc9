//! YouTube Data API v3 adapter.
//!
//! A lookup is one logical call made of two requests: a channel search,
//! then `channels.list` for statistics of every search hit. Track videos
//! work the same way with a video search and `videos.list`.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use super::{CandidateProfile, CollectError, DiscoveryCriterion, HttpJson, Platform, PlatformCollector};
use crate::config::YouTubeConfig;

const STOP_WORDS: &[&str] = &["the", "a", "an", "and"];

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelsReply {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, Clone, Deserialize)]
struct Channel {
    id: String,
    #[serde(default)]
    snippet: Option<Snippet>,
    #[serde(default)]
    statistics: Option<Statistics>,
}

#[derive(Debug, Clone, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

/// Counts arrive as decimal strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    #[serde(default)]
    subscriber_count: Option<String>,
    #[serde(default)]
    view_count: Option<String>,
    #[serde(default)]
    video_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosReply {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    id: String,
    #[serde(default)]
    snippet: Option<VideoSnippet>,
    #[serde(default)]
    statistics: Option<VideoStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    #[serde(default)]
    view_count: Option<String>,
    #[serde(default)]
    like_count: Option<String>,
    #[serde(default)]
    comment_count: Option<String>,
}

fn parse_stat(raw: Option<&String>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok())
}

impl Channel {
    fn title(&self) -> &str {
        self.snippet.as_ref().map_or("", |s| s.title.as_str())
    }

    fn description(&self) -> &str {
        self.snippet.as_ref().map_or("", |s| s.description.as_str())
    }

    fn stat(&self, pick: impl Fn(&Statistics) -> Option<&String>) -> Option<i64> {
        self.statistics
            .as_ref()
            .and_then(pick)
            .and_then(|s| s.trim().parse().ok())
    }

    fn subscribers(&self) -> Option<i64> {
        self.stat(|s| s.subscriber_count.as_ref())
    }
}

/// Significant lowercase words of an artist name.
fn name_words(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w) && w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

/// Channel-to-artist match score. `None` means the channel is too small to consider.
fn match_score(words: &[String], title: &str, description: &str, subscribers: i64, config: &YouTubeConfig) -> Option<i64> {
    if subscribers < config.min_subscribers {
        return None;
    }
    let title = title.to_lowercase();
    let description = description.to_lowercase();

    let mut score = 0;
    if title.contains("official") {
        score += 10;
    }
    score += 5 * words.iter().filter(|w| title.contains(w.as_str())).count() as i64;
    score += 2 * words.iter().filter(|w| description.contains(w.as_str())).count() as i64;
    if (config.min_subscribers..=config.max_subscribers).contains(&subscribers) {
        score += 1;
    }
    Some(score)
}

pub struct YouTubeCollector {
    http: HttpJson,
    api_key: String,
    config: YouTubeConfig,
}

impl YouTubeCollector {
    pub fn new(api_key: String, config: &YouTubeConfig) -> Self {
        let http = HttpJson::new(
            Duration::from_secs(config.timeout_secs),
            Duration::from_secs(config.rate_limit_wait_secs),
            // quota exhaustion comes back as 403
            &[429, 403],
        );
        Self {
            http,
            api_key,
            config: YouTubeConfig {
                api_key: None,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config.clone()
            },
        }
    }

    fn search_channels(&self, query: &str) -> Result<Vec<Channel>, CollectError> {
        let max_results = self.config.max_results.to_string();
        let search: Option<SearchReply> = self.http.get_json(
            &format!("{}/search", self.config.base_url),
            &[
                ("part", "snippet"),
                ("type", "channel"),
                ("q", query),
                ("maxResults", max_results.as_str()),
                ("key", self.api_key.as_str()),
            ],
            &[],
        )?;

        let ids: Vec<String> = search
            .map(|s| s.items)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| item.id.channel_id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids.join(",");
        let channels: Option<ChannelsReply> = self.http.get_json(
            &format!("{}/channels", self.config.base_url),
            &[
                ("part", "statistics,snippet"),
                ("id", joined.as_str()),
                ("key", self.api_key.as_str()),
            ],
            &[],
        )?;
        Ok(channels.map(|c| c.items).unwrap_or_default())
    }

    /// First hit of a video search, with its statistics.
    fn search_video(&self, query: &str) -> Result<Option<Video>, CollectError> {
        let search: Option<SearchReply> = self.http.get_json(
            &format!("{}/search", self.config.base_url),
            &[
                ("part", "snippet"),
                ("type", "video"),
                ("q", query),
                ("maxResults", "1"),
                ("key", self.api_key.as_str()),
            ],
            &[],
        )?;
        let Some(video_id) = search
            .map(|s| s.items)
            .unwrap_or_default()
            .into_iter()
            .find_map(|item| item.id.video_id)
        else {
            return Ok(None);
        };

        let videos: Option<VideosReply> = self.http.get_json(
            &format!("{}/videos", self.config.base_url),
            &[
                ("part", "statistics,snippet"),
                ("id", video_id.as_str()),
                ("key", self.api_key.as_str()),
            ],
            &[],
        )?;
        Ok(videos.and_then(|v| v.items.into_iter().next()))
    }

    fn within_range(&self, channel: &Channel) -> bool {
        channel
            .subscribers()
            .is_some_and(|s| s >= self.config.min_subscribers && s <= self.config.max_subscribers)
    }
}

impl PlatformCollector for YouTubeCollector {
    fn platform(&self) -> Platform {
        Platform::VideoPlatform
    }

    fn discover(&self, criterion: &DiscoveryCriterion) -> Result<Vec<CandidateProfile>, CollectError> {
        let Some(genre) = criterion.genre.as_deref() else {
            return Ok(Vec::new());
        };
        let query = match criterion.country.as_deref() {
            Some(country) => format!("{genre} music {country}"),
            None => format!("{genre} music"),
        };

        let now = Utc::now();
        let profiles: Vec<CandidateProfile> = self
            .search_channels(&query)?
            .into_iter()
            .filter(|c| self.within_range(c))
            .map(|c| channel_to_profile(c.title().to_string(), &c, now))
            .collect();
        log::info!("YouTube {criterion}: {} channels", profiles.len());
        Ok(profiles)
    }

    fn lookup(&self, name: &str) -> Result<Option<CandidateProfile>, CollectError> {
        let channels = self.search_channels(&format!("{name} music official"))?;
        let words = name_words(name);

        let best = channels
            .iter()
            .filter_map(|c| {
                let subs = c.subscribers().unwrap_or(0);
                match_score(&words, c.title(), c.description(), subs, &self.config).map(|score| (score, subs, c))
            })
            .max_by_key(|(score, subs, _)| (*score, *subs));

        let Some((score, subs, channel)) = best else {
            return Ok(None);
        };
        if score < self.config.min_match_score {
            log::debug!("YouTube: best channel for {name:?} scored {score}, too weak");
            return Ok(None);
        }
        if subs > self.config.max_subscribers {
            log::debug!("YouTube: {} has {subs} subscribers, above range", channel.id);
            return Ok(None);
        }
        Ok(Some(channel_to_profile(name.to_string(), channel, Utc::now())))
    }

    fn track_video(&self, artist: &str, track: &str) -> Result<Option<CandidateProfile>, CollectError> {
        let video = self.search_video(&format!("{artist} {track} official"))?;
        Ok(video.map(|v| video_to_profile(track.to_string(), v, Utc::now())))
    }
}

fn video_to_profile(track: String, v: Video, now: chrono::DateTime<Utc>) -> CandidateProfile {
    let stats = v.statistics.as_ref();
    let mut p = CandidateProfile::new(Platform::VideoPlatform, track, now).with("video_id", v.id.as_str());
    p.set_opt("title", v.snippet.as_ref().map(|s| s.title.clone()));
    p.set_opt("published_at", v.snippet.and_then(|s| s.published_at));
    p.set_opt("views", stats.and_then(|s| parse_stat(s.view_count.as_ref())));
    p.set_opt("likes", stats.and_then(|s| parse_stat(s.like_count.as_ref())));
    p.set_opt("comments", stats.and_then(|s| parse_stat(s.comment_count.as_ref())));
    p
}

fn channel_to_profile(source_name: String, c: &Channel, now: chrono::DateTime<Utc>) -> CandidateProfile {
    let total_views = c.stat(|s| s.view_count.as_ref());
    let video_count = c.stat(|s| s.video_count.as_ref());
    let avg_views = match (total_views, video_count) {
        (Some(views), Some(videos)) if videos > 0 => Some((views as f64 / videos as f64).round()),
        _ => None,
    };

    let mut p = CandidateProfile::new(Platform::VideoPlatform, source_name, now).with("channel_id", c.id.as_str());
    p.set_opt("title", c.snippet.as_ref().map(|s| s.title.clone()));
    p.set_opt("description", c.snippet.as_ref().map(|s| s.description.clone()));
    p.set_opt("subscribers", c.subscribers());
    p.set_opt("total_views", total_views);
    p.set_opt("video_count", video_count);
    p.set_opt("avg_views_per_video", avg_views);
    p
}
