use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Outcome of cross-checking a photo-social handle against another platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unverified" => Some(Self::Unverified),
            "verified" => Some(Self::Verified),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Scrobble-service metrics (Last.fm).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrobbleSlot {
    pub listeners: Option<i64>,
    pub playcount: Option<i64>,
    pub playcount_per_listener: Option<f64>,
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub collected_at: DateTime<Utc>,
}

/// Photo-social metrics (Instagram). The handle is tentative until verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoSlot {
    pub handle: String,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub posts: Option<i64>,
    pub avg_likes: Option<f64>,
    pub avg_comments: Option<f64>,
    pub engagement_rate: Option<f64>,
    pub reels_count: Option<i64>,
    pub is_verified: Option<bool>,
    pub collected_at: DateTime<Utc>,
}

/// Video-platform metrics (YouTube).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSlot {
    pub channel_id: String,
    pub title: Option<String>,
    pub subscribers: Option<i64>,
    pub total_views: Option<i64>,
    pub video_count: Option<i64>,
    pub avg_views_per_video: Option<f64>,
    pub description: Option<String>,
    pub collected_at: DateTime<Utc>,
}

/// The single durable merged record of one real-world artist.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalArtist {
    pub artist_id: String,
    pub artist_name: String,
    pub normalized_name: String,
    pub primary_genre: String,
    pub scrobble: Option<ScrobbleSlot>,
    pub photo: Option<PhotoSlot>,
    pub video: Option<VideoSlot>,
    pub verification_status: VerificationStatus,
    pub data_quality_score: f64,
    pub collection_date: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    /// Collection pass in which the artist was last discovered.
    pub last_seen_pass: u64,
}

impl CanonicalArtist {
    pub fn populated_slots(&self) -> usize {
        Platform::ALL.iter().filter(|p| self.has_slot(**p)).count()
    }

    pub fn has_slot(&self, platform: Platform) -> bool {
        match platform {
            Platform::ScrobbleService => self.scrobble.is_some(),
            Platform::PhotoSocial => self.photo.is_some(),
            Platform::VideoPlatform => self.video.is_some(),
        }
    }

    pub fn photo_handle(&self) -> Option<&str> {
        self.photo.as_ref().map(|p| p.handle.as_str())
    }
}

/// A flattened row of the `artist_raw_data` sink. Absence is `None`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkRow {
    pub artist_id: String,
    pub artist_name: String,
    pub primary_genre: String,
    pub collection_date: String,

    pub lastfm_url: Option<String>,
    pub lastfm_listeners: Option<i64>,
    pub lastfm_playcount: Option<i64>,
    pub lastfm_playcount_per_listener: Option<f64>,
    pub genres: Option<String>,

    pub instagram_handle: Option<String>,
    pub instagram_followers: Option<i64>,
    pub instagram_following: Option<i64>,
    pub instagram_posts: Option<i64>,
    pub instagram_avg_likes: Option<f64>,
    pub instagram_avg_comments: Option<f64>,
    pub instagram_engagement_rate: Option<f64>,
    pub instagram_reels_count: Option<i64>,
    pub instagram_verified: Option<bool>,

    pub youtube_channel_id: Option<String>,
    pub youtube_subscribers: Option<i64>,
    pub youtube_total_views: Option<i64>,
    pub youtube_video_count: Option<i64>,
    pub youtube_avg_views_per_video: Option<f64>,

    pub verification_status: VerificationStatus,
    pub data_quality_score: f64,
}

/// One of an artist's top scrobbled tracks, with its best matching video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistTrack {
    pub artist_id: String,
    pub track_name: String,
    /// 1-based position in the scrobble service's top-track chart.
    pub rank: u32,
    pub lastfm_playcount: Option<i64>,
    pub lastfm_listeners: Option<i64>,
    pub lastfm_url: Option<String>,

    pub youtube_video_id: Option<String>,
    pub youtube_title: Option<String>,
    pub youtube_views: Option<i64>,
    pub youtube_likes: Option<i64>,
    pub youtube_comments: Option<i64>,
    pub youtube_published_at: Option<String>,

    pub collected_at: DateTime<Utc>,
}

/// A pair of distinct artists whose names are suspiciously close.
#[derive(Debug, Clone, PartialEq)]
pub struct NameReview {
    pub artist_id: String,
    pub artist_name: String,
    pub similar_artist_id: String,
    pub similar_artist_name: String,
    pub similarity: f64,
    pub flagged_at: String,
}

/// Overview of the canonical store.
pub struct CollectionStats {
    pub total_artists: usize,
    pub with_scrobble: usize,
    pub with_photo: usize,
    pub with_video: usize,
    pub verified: usize,
    pub rejected: usize,
    pub published: usize,
    pub pending_reviews: usize,
    pub tracks: usize,
    pub avg_quality: f64,
    pub genres: Vec<(String, usize)>,
}
