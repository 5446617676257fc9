//! Last.fm adapter: tag/geo charts for discovery, `artist.getinfo` for stats,
//! `artist.gettoptracks` for per-track play counts.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{CandidateProfile, CollectError, DiscoveryCriterion, HttpJson, Platform, PlatformCollector};
use crate::config::LastFmConfig;

/// Last.fm error codes we treat specially.
const ERR_INVALID_PARAMETERS: i64 = 6;
const ERR_RATE_LIMIT: i64 = 29;

/// Every Last.fm reply is either an error envelope or the payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LastFmReply<T> {
    Error { error: i64, message: String },
    Ok(T),
}

/// Last.fm collapses one-element lists into a bare object, and empty lists into "".
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
    Empty(String),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(v) => v,
            Self::One(t) => vec![t],
            Self::Empty(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopArtistsReply {
    topartists: TopArtists,
}

#[derive(Debug, Deserialize)]
struct TopArtists {
    #[serde(default)]
    artist: Option<OneOrMany<ChartArtist>>,
}

#[derive(Debug, Deserialize)]
struct ChartArtist {
    name: String,
    #[serde(default)]
    url: Option<String>,
    /// geo charts carry listeners; tag charts do not
    #[serde(default)]
    listeners: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistInfoReply {
    artist: ArtistInfo,
}

#[derive(Debug, Deserialize)]
struct ArtistInfo {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    stats: Option<ArtistStats>,
    #[serde(default)]
    tags: Option<TagsField>,
}

#[derive(Debug, Deserialize)]
struct ArtistStats {
    #[serde(default)]
    listeners: Option<String>,
    #[serde(default)]
    playcount: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagsField {
    Tags { tag: OneOrMany<Tag> },
    Empty(String),
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TopTracksReply {
    toptracks: TopTracks,
}

#[derive(Debug, Deserialize)]
struct TopTracks {
    #[serde(default)]
    track: Option<OneOrMany<ChartTrack>>,
}

#[derive(Debug, Deserialize)]
struct ChartTrack {
    name: String,
    #[serde(default)]
    playcount: Option<String>,
    #[serde(default)]
    listeners: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "@attr", default)]
    attr: Option<RankAttr>,
}

#[derive(Debug, Deserialize)]
struct RankAttr {
    #[serde(default)]
    rank: Option<String>,
}

fn parse_count(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
}

/// Listener-normalised play count; undefined without listeners.
pub fn playcount_per_listener(playcount: Option<i64>, listeners: Option<i64>) -> Option<f64> {
    match (playcount, listeners) {
        (Some(p), Some(l)) if l > 0 => Some(p as f64 / l as f64),
        _ => None,
    }
}

pub struct LastFmCollector {
    http: HttpJson,
    api_key: String,
    base_url: String,
    discover_limit: u32,
}

impl LastFmCollector {
    pub fn new(api_key: String, config: &LastFmConfig) -> Self {
        let http = HttpJson::new(
            Duration::from_secs(config.timeout_secs),
            Duration::from_secs(config.rate_limit_wait_secs),
            &[429],
        )
        .with_error_bodies();
        Self {
            http,
            api_key,
            base_url: config.base_url.clone(),
            discover_limit: config.discover_limit,
        }
    }

    fn call<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<Option<T>, CollectError> {
        let mut query: Vec<(&str, &str)> = vec![("api_key", self.api_key.as_str()), ("format", "json")];
        query.extend_from_slice(params);

        match self.http.get_json::<LastFmReply<T>>(&self.base_url, &query, &[])? {
            None => Ok(None),
            Some(LastFmReply::Ok(body)) => Ok(Some(body)),
            Some(LastFmReply::Error { error, message }) => match error {
                ERR_INVALID_PARAMETERS => {
                    log::debug!("Last.fm: {message}");
                    Ok(None)
                }
                ERR_RATE_LIMIT => Err(CollectError::RateLimited {
                    retry_after: self.http.default_retry_after(),
                }),
                _ => Err(CollectError::Unavailable(format!("Last.fm error {error}: {message}"))),
            },
        }
    }
}

impl PlatformCollector for LastFmCollector {
    fn platform(&self) -> Platform {
        Platform::ScrobbleService
    }

    fn discover(&self, criterion: &DiscoveryCriterion) -> Result<Vec<CandidateProfile>, CollectError> {
        let limit = self.discover_limit.to_string();
        let reply: Option<TopArtistsReply> = match (&criterion.genre, &criterion.country) {
            (Some(genre), _) => self.call(&[
                ("method", "tag.gettopartists"),
                ("tag", genre.as_str()),
                ("limit", limit.as_str()),
            ])?,
            (None, Some(country)) => self.call(&[
                ("method", "geo.gettopartists"),
                ("country", country.as_str()),
                ("limit", limit.as_str()),
            ])?,
            (None, None) => return Ok(Vec::new()),
        };

        let now = Utc::now();
        let artists = reply
            .and_then(|r| r.topartists.artist)
            .map(OneOrMany::into_vec)
            .unwrap_or_default();

        let candidates: Vec<CandidateProfile> = artists
            .into_iter()
            .filter(|a| !a.name.trim().is_empty())
            .map(|a| {
                let mut p = CandidateProfile::new(Platform::ScrobbleService, a.name, now);
                p.set_opt("url", a.url);
                p.set_opt("listeners", parse_count(a.listeners.as_deref()));
                p
            })
            .collect();

        log::info!("Last.fm {criterion}: {} candidates", candidates.len());
        Ok(candidates)
    }

    fn lookup(&self, name: &str) -> Result<Option<CandidateProfile>, CollectError> {
        let reply: Option<ArtistInfoReply> = self.call(&[
            ("method", "artist.getinfo"),
            ("artist", name),
            ("autocorrect", "0"),
        ])?;
        Ok(reply.map(|r| info_to_profile(r.artist)))
    }

    fn top_tracks(&self, artist: &str, limit: u32) -> Result<Vec<CandidateProfile>, CollectError> {
        let limit = limit.to_string();
        let reply: Option<TopTracksReply> = self.call(&[
            ("method", "artist.gettoptracks"),
            ("artist", artist),
            ("limit", limit.as_str()),
            ("autocorrect", "0"),
        ])?;
        let tracks = reply
            .and_then(|r| r.toptracks.track)
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        Ok(tracks_to_profiles(tracks))
    }
}

/// Chart entries in order; a missing rank falls back to the list position.
fn tracks_to_profiles(tracks: Vec<ChartTrack>) -> Vec<CandidateProfile> {
    let now = Utc::now();
    tracks
        .into_iter()
        .filter(|t| !t.name.trim().is_empty())
        .enumerate()
        .map(|(i, t)| {
            let rank = parse_count(t.attr.as_ref().and_then(|a| a.rank.as_deref())).unwrap_or(i as i64 + 1);
            let mut p = CandidateProfile::new(Platform::ScrobbleService, t.name, now).with("rank", rank);
            p.set_opt("playcount", parse_count(t.playcount.as_deref()));
            p.set_opt("listeners", parse_count(t.listeners.as_deref()));
            p.set_opt("url", t.url);
            p
        })
        .collect()
}

fn info_to_profile(info: ArtistInfo) -> CandidateProfile {
    let listeners = info.stats.as_ref().and_then(|s| parse_count(s.listeners.as_deref()));
    let playcount = info.stats.as_ref().and_then(|s| parse_count(s.playcount.as_deref()));
    let tags: Vec<String> = match info.tags {
        Some(TagsField::Tags { tag }) => tag
            .into_vec()
            .into_iter()
            .map(|t| t.name.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    let mut p = CandidateProfile::new(Platform::ScrobbleService, info.name, Utc::now());
    p.set_opt("url", info.url);
    p.set_opt("listeners", listeners);
    p.set_opt("playcount", playcount);
    p.set_opt("playcount_per_listener", playcount_per_listener(playcount, listeners));
    if !tags.is_empty() {
        p.set("primary_tag", tags[0].as_str());
        p.set("tags", tags.join(","));
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getinfo_with_tag_list() {
        let json = r#"{"artist":{"name":"Echo Bloom","url":"https://www.last.fm/music/Echo+Bloom",
            "stats":{"listeners":"48000","playcount":"960000"},
            "tags":{"tag":[{"name":"Indie Folk","url":"x"},{"name":"folk","url":"y"}]}}}"#;
        let reply: LastFmReply<ArtistInfoReply> = serde_json::from_str(json).unwrap();
        let LastFmReply::Ok(reply) = reply else {
            panic!("expected payload");
        };
        let p = info_to_profile(reply.artist);
        assert_eq!(p.source_name, "Echo Bloom");
        assert_eq!(p.int("listeners"), Some(48_000));
        assert_eq!(p.int("playcount"), Some(960_000));
        assert_eq!(p.float("playcount_per_listener"), Some(20.0));
        assert_eq!(p.text("tags"), Some("indie folk,folk"));
        assert_eq!(p.text("primary_tag"), Some("indie folk"));
    }

    #[test]
    fn test_getinfo_single_tag_object_and_empty_tags() {
        let single = r#"{"artist":{"name":"A","stats":{"listeners":"0","playcount":"5"},
            "tags":{"tag":{"name":"jazz"}}}}"#;
        let LastFmReply::Ok(reply) = serde_json::from_str::<LastFmReply<ArtistInfoReply>>(single).unwrap()
        else {
            panic!("expected payload");
        };
        let p = info_to_profile(reply.artist);
        assert_eq!(p.text("tags"), Some("jazz"));
        assert_eq!(p.int("listeners"), Some(0));
        assert_eq!(p.float("playcount_per_listener"), None);

        let empty = r#"{"artist":{"name":"B","tags":""}}"#;
        let LastFmReply::Ok(reply) = serde_json::from_str::<LastFmReply<ArtistInfoReply>>(empty).unwrap()
        else {
            panic!("expected payload");
        };
        let p = info_to_profile(reply.artist);
        assert_eq!(p.text("tags"), None);
        assert_eq!(p.int("listeners"), None);
    }

    #[test]
    fn test_error_envelope() {
        let json = r#"{"error":29,"message":"Rate Limit Exceeded"}"#;
        let reply: LastFmReply<ArtistInfoReply> = serde_json::from_str(json).unwrap();
        assert!(matches!(reply, LastFmReply::Error { error: 29, .. }));
    }

    #[test]
    fn test_top_artists_shapes() {
        let json = r#"{"topartists":{"artist":[{"name":"A","url":"u"},{"name":"B","listeners":"12"}],"@attr":{}}}"#;
        let reply: TopArtistsReply = serde_json::from_str(json).unwrap();
        let artists = reply.topartists.artist.unwrap().into_vec();
        assert_eq!(artists.len(), 2);
        assert_eq!(parse_count(artists[1].listeners.as_deref()), Some(12));

        let single = r#"{"topartists":{"artist":{"name":"Solo"}}}"#;
        let reply: TopArtistsReply = serde_json::from_str(single).unwrap();
        assert_eq!(reply.topartists.artist.unwrap().into_vec().len(), 1);
    }

    #[test]
    fn test_top_tracks_reply() {
        let json = r#"{"toptracks":{"track":[
            {"name":"Driftwood","playcount":"120000","listeners":"30000","url":"u1","@attr":{"rank":"1"}},
            {"name":"Low Tide","playcount":"90000","listeners":"25000","@attr":{"rank":"2"}},
            {"name":"","playcount":"1"}],
            "@attr":{"artist":"Echo Bloom"}}}"#;
        let reply: TopTracksReply = serde_json::from_str(json).unwrap();
        let tracks = tracks_to_profiles(reply.toptracks.track.unwrap().into_vec());
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].source_name, "Driftwood");
        assert_eq!(tracks[0].int("rank"), Some(1));
        assert_eq!(tracks[0].int("playcount"), Some(120_000));
        assert_eq!(tracks[0].text("url"), Some("u1"));
        assert_eq!(tracks[1].int("listeners"), Some(25_000));
        assert_eq!(tracks[1].text("url"), None);

        let single = r#"{"toptracks":{"track":{"name":"Only One","playcount":"7"}}}"#;
        let reply: TopTracksReply = serde_json::from_str(single).unwrap();
        let tracks = tracks_to_profiles(reply.toptracks.track.unwrap().into_vec());
        assert_eq!(tracks[0].int("rank"), Some(1));
    }
}
