//! Instagram adapter over the public web-profile endpoint.
//!
//! The platform has no artist search, so `discover` yields nothing and
//! `lookup` tries a few handle spellings derived from the artist name. A
//! guessed handle is only accepted when the profile looks like the artist.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use super::{
    CandidateProfile, CollectError, DiscoveryCriterion, HttpJson, Platform, PlatformCollector,
    engagement_rate,
};
use crate::config::InstagramConfig;

const STOP_WORDS: &[&str] = &["the", "a", "an", "and", "or"];
const MUSIC_KEYWORDS: &[&str] = &["music", "artist", "band", "musician", "singer", "songwriter"];

#[derive(Debug, Deserialize)]
struct ProfileReply {
    data: ProfileData,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    biography: Option<String>,
    #[serde(default)]
    is_verified: Option<bool>,
    edge_followed_by: Count,
    #[serde(default)]
    edge_follow: Option<Count>,
    #[serde(default)]
    edge_owner_to_timeline_media: Option<Timeline>,
}

#[derive(Debug, Deserialize)]
struct Count {
    count: i64,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    count: i64,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    edge_liked_by: Option<Count>,
    #[serde(default)]
    edge_media_preview_like: Option<Count>,
    #[serde(default)]
    edge_media_to_comment: Option<Count>,
}

impl User {
    /// Name word in the display name or bio, or a bio that reads like a musician's.
    fn plausibly_is(&self, artist: &str) -> bool {
        let words: Vec<String> = artist
            .to_lowercase()
            .split_whitespace()
            .filter(|w| !STOP_WORDS.contains(w) && w.chars().count() > 2)
            .map(str::to_string)
            .collect();
        if words.is_empty() {
            return true;
        }
        let full_name = self.full_name.as_deref().unwrap_or("").to_lowercase();
        let bio = self.biography.as_deref().unwrap_or("").to_lowercase();
        words.iter().any(|w| full_name.contains(w.as_str()) || bio.contains(w.as_str()))
            || MUSIC_KEYWORDS.iter().any(|k| bio.contains(k))
    }
}

impl Post {
    fn likes(&self) -> i64 {
        self.edge_liked_by
            .as_ref()
            .or(self.edge_media_preview_like.as_ref())
            .map_or(0, |c| c.count)
    }

    fn comments(&self) -> i64 {
        self.edge_media_to_comment.as_ref().map_or(0, |c| c.count)
    }
}

/// Handle spellings tried for an artist name, most likely first.
///
/// A term starting with `@` is taken as an exact handle.
pub fn handle_candidates(name: &str) -> Vec<String> {
    if let Some(handle) = name.trim().strip_prefix('@') {
        let handle = handle.trim().to_lowercase();
        return if handle.is_empty() { Vec::new() } else { vec![handle] };
    }

    let squash = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect()
    };
    let lower = name.trim().to_lowercase();
    let base = squash(&lower);
    if base.is_empty() {
        return Vec::new();
    }

    let mut out = vec![base.clone()];
    if let Some(rest) = lower.strip_prefix("the ") {
        let rest = squash(rest);
        if !rest.is_empty() {
            out.push(rest);
        }
    }
    out.push(format!("{base}music"));
    out.push(format!("{base}official"));
    out.dedup();
    out
}

pub struct InstagramCollector {
    http: HttpJson,
    base_url: String,
    app_id: String,
    min_followers: i64,
    recent_posts: usize,
}

impl InstagramCollector {
    pub fn new(config: &InstagramConfig) -> Self {
        let http = HttpJson::new(
            Duration::from_secs(config.timeout_secs),
            Duration::from_secs(config.rate_limit_wait_secs),
            // 401 is how the endpoint says "please wait a few minutes"
            &[429, 401],
        );
        Self {
            http,
            base_url: config.base_url.clone(),
            app_id: config.app_id.clone(),
            min_followers: config.min_followers,
            recent_posts: config.recent_posts,
        }
    }

    fn fetch(&self, handle: &str) -> Result<Option<User>, CollectError> {
        let reply: Option<ProfileReply> = self.http.get_json(
            &self.base_url,
            &[("username", handle)],
            &[("x-ig-app-id", self.app_id.as_str())],
        )?;
        Ok(reply.and_then(|r| r.data.user))
    }
}

impl PlatformCollector for InstagramCollector {
    fn platform(&self) -> Platform {
        Platform::PhotoSocial
    }

    fn discover(&self, _criterion: &DiscoveryCriterion) -> Result<Vec<CandidateProfile>, CollectError> {
        Ok(Vec::new())
    }

    fn lookup(&self, name: &str) -> Result<Option<CandidateProfile>, CollectError> {
        let guessed = !name.trim().starts_with('@');
        for handle in handle_candidates(name) {
            let Some(user) = self.fetch(&handle)? else {
                log::debug!("Instagram: no profile @{handle}");
                continue;
            };
            if guessed && !user.plausibly_is(name) {
                log::debug!("Instagram: @{handle} does not look like {name:?}");
                continue;
            }
            let profile = user_to_profile(name, user, self.recent_posts);
            let followers = profile.int("followers").unwrap_or(0);
            if followers < self.min_followers {
                log::debug!("Instagram: @{handle} has {followers} followers, below minimum");
                continue;
            }
            return Ok(Some(profile));
        }
        Ok(None)
    }
}

fn user_to_profile(name: &str, user: User, recent_posts: usize) -> CandidateProfile {
    let followers = user.edge_followed_by.count;
    let mut p = CandidateProfile::new(Platform::PhotoSocial, name.trim_start_matches('@'), Utc::now())
        .with("handle", user.username.to_lowercase())
        .with("followers", followers);
    p.set_opt("following", user.edge_follow.map(|c| c.count));
    p.set_opt("is_verified", user.is_verified);

    if let Some(timeline) = user.edge_owner_to_timeline_media {
        p.set("posts", timeline.count);
        let recent: Vec<&Post> = timeline.edges.iter().take(recent_posts).map(|e| &e.node).collect();
        if !recent.is_empty() {
            let n = recent.len() as f64;
            let avg_likes = recent.iter().map(|p| p.likes()).sum::<i64>() as f64 / n;
            let avg_comments = recent.iter().map(|p| p.comments()).sum::<i64>() as f64 / n;
            p.set("avg_likes", avg_likes);
            p.set("avg_comments", avg_comments);
            p.set("reels_count", recent.iter().filter(|p| p.is_video).count() as i64);
            p.set_opt("engagement_rate", engagement_rate(avg_likes, avg_comments, followers));
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_candidates() {
        assert_eq!(
            handle_candidates("The Echo Bloom"),
            vec!["theechobloom", "echobloom", "theechobloommusic", "theechobloomofficial"]
        );
        assert_eq!(
            handle_candidates("Nilüfer Yanya"),
            vec!["nilüferyanya", "nilüferyanyamusic", "nilüferyanyaofficial"]
        );
        assert_eq!(handle_candidates("@EchoBloom"), vec!["echobloom"]);
        assert!(handle_candidates("!!!").is_empty());
    }

    #[test]
    fn test_profile_engagement_from_recent_posts() {
        let json = r#"{"data":{"user":{
            "username":"EchoBloom","biography":"indie folk from Leeds","is_verified":false,
            "edge_followed_by":{"count":42000},"edge_follow":{"count":310},
            "edge_owner_to_timeline_media":{"count":120,"edges":[
                {"node":{"is_video":true,"edge_liked_by":{"count":900},"edge_media_to_comment":{"count":100}}},
                {"node":{"is_video":false,"edge_media_preview_like":{"count":700},"edge_media_to_comment":{"count":140}}}
            ]}}}}"#;
        let reply: ProfileReply = serde_json::from_str(json).unwrap();
        let p = user_to_profile("Echo Bloom", reply.data.user.unwrap(), 12);

        assert_eq!(p.text("handle"), Some("echobloom"));
        assert_eq!(p.int("followers"), Some(42_000));
        assert_eq!(p.int("posts"), Some(120));
        assert_eq!(p.float("avg_likes"), Some(800.0));
        assert_eq!(p.float("avg_comments"), Some(120.0));
        assert_eq!(p.int("reels_count"), Some(1));
        let rate = p.float("engagement_rate").unwrap();
        assert!((rate - 2.190476).abs() < 1e-4);
    }

    #[test]
    fn test_profile_without_posts_has_no_engagement() {
        let json = r#"{"data":{"user":{"username":"quiet","edge_followed_by":{"count":0}}}}"#;
        let reply: ProfileReply = serde_json::from_str(json).unwrap();
        let p = user_to_profile("Quiet", reply.data.user.unwrap(), 12);
        assert_eq!(p.int("followers"), Some(0));
        assert_eq!(p.float("engagement_rate"), None);
        assert_eq!(p.int("posts"), None);
    }

    #[test]
    fn test_guessed_handle_must_look_like_the_artist() {
        let user = |full_name: &str, bio: &str| -> User {
            let json = format!(
                r#"{{"username":"echobloom","full_name":"{full_name}","biography":"{bio}","edge_followed_by":{{"count":5000}}}}"#
            );
            serde_json::from_str(&json).unwrap()
        };
        assert!(user("Echo Bloom", "").plausibly_is("Echo Bloom"));
        assert!(user("", "new record out now, bloom season").plausibly_is("The Echo Bloom"));
        assert!(user("EB", "singer from Leeds").plausibly_is("Echo Bloom"));
        assert!(!user("Echo's Bakery", "fresh bread daily").plausibly_is("Quiet Harbour"));
        // nothing significant to compare against
        assert!(user("", "").plausibly_is("Mo"));
    }

    #[test]
    fn test_missing_user_is_none() {
        let reply: ProfileReply = serde_json::from_str(r#"{"data":{"user":null}}"#).unwrap();
        assert!(reply.data.user.is_none());
    }
}
