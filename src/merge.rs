use thiserror::Error;

use crate::db::models::{ArtistTrack, CanonicalArtist, PhotoSlot, ScrobbleSlot, VerificationStatus, VideoSlot};
use crate::platform::{CandidateProfile, Platform, engagement_rate};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("{platform} profile for {name:?} has no {field}")]
    MissingField {
        platform: Platform,
        name: String,
        field: &'static str,
    },
}

/// What a merge changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub platform: Platform,
    /// The slot was empty before this merge.
    pub slot_was_empty: bool,
    /// A different photo handle replaced a previous one; status reset.
    pub handle_changed: bool,
}

/// Quality score: `min(populated, 3) / 3 * 0.7`, plus 0.3 when verified.
pub fn data_quality_score(populated_slots: usize, status: VerificationStatus) -> f64 {
    let completeness = populated_slots.min(3) as f64 / 3.0 * 0.7;
    let verified = if status == VerificationStatus::Verified { 0.3 } else { 0.0 };
    completeness + verified
}

/// Recompute the stored quality score from the artist's own fields.
pub fn refresh_quality(artist: &mut CanonicalArtist) {
    artist.data_quality_score = data_quality_score(artist.populated_slots(), artist.verification_status);
}

/// Fold a candidate profile into its platform's slot.
///
/// The slot is replaced wholesale; timestamps come from the profile, so the
/// same profile merged twice leaves identical state.
pub fn merge(artist: &mut CanonicalArtist, profile: &CandidateProfile) -> Result<MergeOutcome, MergeError> {
    let platform = profile.platform;
    let slot_was_empty = !artist.has_slot(platform);
    let mut handle_changed = false;

    match platform {
        Platform::ScrobbleService => {
            artist.scrobble = Some(scrobble_slot(profile));
        }
        Platform::PhotoSocial => {
            let slot = photo_slot(profile)?;
            let previous = artist.photo_handle().map(str::to_string);
            if previous.as_deref().is_some_and(|h| h != slot.handle) {
                handle_changed = true;
            }
            // A fresh handle needs fresh verification, and so does a previously rejected one.
            if handle_changed || previous.is_none() {
                artist.verification_status = VerificationStatus::Unverified;
            }
            artist.photo = Some(slot);
        }
        Platform::VideoPlatform => {
            artist.video = Some(video_slot(profile)?);
        }
    }

    if profile.collected_at > artist.collection_date {
        artist.collection_date = profile.collected_at;
    }
    refresh_quality(artist);

    Ok(MergeOutcome {
        platform,
        slot_was_empty,
        handle_changed,
    })
}

/// Flatten a top-track profile and its matched video into one track row.
pub fn track_record(artist_id: &str, track: &CandidateProfile, video: Option<&CandidateProfile>) -> ArtistTrack {
    let collected_at = video
        .map(|v| v.collected_at)
        .filter(|at| *at > track.collected_at)
        .unwrap_or(track.collected_at);
    ArtistTrack {
        artist_id: artist_id.to_string(),
        track_name: track.source_name.clone(),
        rank: track.int("rank").and_then(|r| u32::try_from(r).ok()).unwrap_or(0),
        lastfm_playcount: track.int("playcount"),
        lastfm_listeners: track.int("listeners"),
        lastfm_url: track.text("url").map(str::to_string),
        youtube_video_id: video.and_then(|v| v.text("video_id")).map(str::to_string),
        youtube_title: video.and_then(|v| v.text("title")).map(str::to_string),
        youtube_views: video.and_then(|v| v.int("views")),
        youtube_likes: video.and_then(|v| v.int("likes")),
        youtube_comments: video.and_then(|v| v.int("comments")),
        youtube_published_at: video.and_then(|v| v.text("published_at")).map(str::to_string),
        collected_at,
    }
}

fn scrobble_slot(p: &CandidateProfile) -> ScrobbleSlot {
    let tags = p
        .text("tags")
        .map(|t| {
            t.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let listeners = p.int("listeners");
    let playcount = p.int("playcount");

    ScrobbleSlot {
        listeners,
        playcount,
        playcount_per_listener: p
            .float("playcount_per_listener")
            .or_else(|| crate::platform::scrobble::playcount_per_listener(playcount, listeners)),
        url: p.text("url").map(str::to_string),
        tags,
        collected_at: p.collected_at,
    }
}

fn photo_slot(p: &CandidateProfile) -> Result<PhotoSlot, MergeError> {
    let handle = p
        .text("handle")
        .map(|h| h.trim_start_matches('@').to_lowercase())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| MergeError::MissingField {
            platform: p.platform,
            name: p.source_name.clone(),
            field: "handle",
        })?;

    let followers = p.int("followers");
    let avg_likes = p.float("avg_likes");
    let avg_comments = p.float("avg_comments");
    let engagement = p.float("engagement_rate").or_else(|| match (avg_likes, avg_comments, followers) {
        (Some(l), Some(c), Some(f)) => engagement_rate(l, c, f),
        _ => None,
    });

    Ok(PhotoSlot {
        handle,
        followers,
        following: p.int("following"),
        posts: p.int("posts"),
        avg_likes,
        avg_comments,
        engagement_rate: engagement,
        reels_count: p.int("reels_count"),
        is_verified: p.flag("is_verified"),
        collected_at: p.collected_at,
    })
}

fn video_slot(p: &CandidateProfile) -> Result<VideoSlot, MergeError> {
    let channel_id = p
        .text("channel_id")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| MergeError::MissingField {
            platform: p.platform,
            name: p.source_name.clone(),
            field: "channel_id",
        })?
        .to_string();

    let total_views = p.int("total_views");
    let video_count = p.int("video_count");
    let avg_views = p.float("avg_views_per_video").or(match (total_views, video_count) {
        (Some(v), Some(n)) if n > 0 => Some(v as f64 / n as f64),
        _ => None,
    });

    Ok(VideoSlot {
        channel_id,
        title: p.text("title").map(str::to_string),
        subscribers: p.int("subscribers"),
        total_views,
        video_count,
        avg_views_per_video: avg_views,
        description: p.text("description").map(str::to_string),
        collected_at: p.collected_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    fn scaffold() -> CanonicalArtist {
        CanonicalArtist {
            artist_id: "a1b2c3d4e5f60718".to_string(),
            artist_name: "Echo Bloom".to_string(),
            normalized_name: "echo bloom".to_string(),
            primary_genre: "indie folk".to_string(),
            scrobble: None,
            photo: None,
            video: None,
            verification_status: VerificationStatus::Unverified,
            data_quality_score: 0.0,
            collection_date: ts(1),
            first_seen_at: ts(1),
            last_seen_pass: 1,
        }
    }

    fn photo_profile(handle: &str, day: u32) -> CandidateProfile {
        CandidateProfile::new(Platform::PhotoSocial, "Echo Bloom", ts(day))
            .with("handle", handle)
            .with("followers", 42_000i64)
            .with("avg_likes", 800.0)
            .with("avg_comments", 120.0)
    }

    #[test]
    fn test_echo_bloom_photo_merge() {
        let mut artist = scaffold();
        let outcome = merge(&mut artist, &photo_profile("echobloom", 2)).unwrap();

        assert!(outcome.slot_was_empty);
        let photo = artist.photo.as_ref().unwrap();
        assert!((photo.engagement_rate.unwrap() - 2.190476).abs() < 1e-4);
        assert!(artist.scrobble.is_none());
        assert!(artist.video.is_none());
        assert!((artist.data_quality_score - 0.7 / 3.0).abs() < 1e-9);
        assert_eq!(artist.collection_date, ts(2));
        assert_eq!(artist.verification_status, VerificationStatus::Unverified);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let profile = photo_profile("echobloom", 2);
        let mut once = scaffold();
        merge(&mut once, &profile).unwrap();
        let mut twice = once.clone();
        merge(&mut twice, &profile).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_same_handle_keeps_verification() {
        let mut artist = scaffold();
        merge(&mut artist, &photo_profile("echobloom", 2)).unwrap();
        artist.verification_status = VerificationStatus::Verified;

        let outcome = merge(&mut artist, &photo_profile("@EchoBloom", 3)).unwrap();
        assert!(!outcome.handle_changed);
        assert_eq!(artist.verification_status, VerificationStatus::Verified);
        assert!((artist.data_quality_score - (0.7 / 3.0 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_new_handle_resets_verification() {
        let mut artist = scaffold();
        merge(&mut artist, &photo_profile("echobloom", 2)).unwrap();
        artist.verification_status = VerificationStatus::Verified;

        let outcome = merge(&mut artist, &photo_profile("echobloommusic", 3)).unwrap();
        assert!(outcome.handle_changed);
        assert_eq!(artist.verification_status, VerificationStatus::Unverified);
        assert_eq!(artist.photo_handle(), Some("echobloommusic"));
    }

    #[test]
    fn test_collection_date_never_moves_back() {
        let mut artist = scaffold();
        merge(&mut artist, &photo_profile("echobloom", 5)).unwrap();
        let old = CandidateProfile::new(Platform::ScrobbleService, "Echo Bloom", ts(3)).with("listeners", 48_000i64);
        merge(&mut artist, &old).unwrap();
        assert_eq!(artist.collection_date, ts(5));
        assert_eq!(artist.populated_slots(), 2);
    }

    #[test]
    fn test_zero_is_kept_distinct_from_absent() {
        let mut artist = scaffold();
        let p = CandidateProfile::new(Platform::VideoPlatform, "Echo Bloom", ts(2))
            .with("channel_id", "UC1")
            .with("subscribers", 0i64);
        merge(&mut artist, &p).unwrap();
        let video = artist.video.unwrap();
        assert_eq!(video.subscribers, Some(0));
        assert_eq!(video.total_views, None);
    }

    #[test]
    fn test_missing_handle_is_an_error() {
        let mut artist = scaffold();
        let p = CandidateProfile::new(Platform::PhotoSocial, "Echo Bloom", ts(2)).with("followers", 10i64);
        assert!(matches!(merge(&mut artist, &p), Err(MergeError::MissingField { field: "handle", .. })));
        assert!(artist.photo.is_none());
    }

    #[test]
    fn test_quality_score_bounds() {
        for populated in 0..=4 {
            for status in [VerificationStatus::Unverified, VerificationStatus::Verified, VerificationStatus::Rejected] {
                let q = data_quality_score(populated, status);
                assert!((0.0..=1.0).contains(&q));
            }
        }
        assert!((data_quality_score(3, VerificationStatus::Verified) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scrobble_tags_split() {
        let mut artist = scaffold();
        let p = CandidateProfile::new(Platform::ScrobbleService, "Echo Bloom", ts(2))
            .with("tags", "indie folk, folk,")
            .with("listeners", 48_000i64)
            .with("playcount", 960_000i64);
        merge(&mut artist, &p).unwrap();
        let s = artist.scrobble.unwrap();
        assert_eq!(s.tags, vec!["indie folk", "folk"]);
        assert_eq!(s.playcount_per_listener, Some(20.0));
    }

    #[test]
    fn test_track_record_with_and_without_video() {
        let track = CandidateProfile::new(Platform::ScrobbleService, "Driftwood", ts(2))
            .with("rank", 1i64)
            .with("playcount", 120_000i64)
            .with("listeners", 30_000i64);
        let bare = track_record("a1", &track, None);
        assert_eq!(bare.track_name, "Driftwood");
        assert_eq!(bare.rank, 1);
        assert_eq!(bare.lastfm_playcount, Some(120_000));
        assert_eq!(bare.youtube_video_id, None);
        assert_eq!(bare.youtube_views, None);
        assert_eq!(bare.collected_at, ts(2));

        let video = CandidateProfile::new(Platform::VideoPlatform, "Driftwood", ts(3))
            .with("video_id", "vid42")
            .with("views", 88_000i64)
            .with("likes", 2_100i64);
        let full = track_record("a1", &track, Some(&video));
        assert_eq!(full.youtube_video_id.as_deref(), Some("vid42"));
        assert_eq!(full.youtube_views, Some(88_000));
        assert_eq!(full.youtube_comments, None);
        assert_eq!(full.collected_at, ts(3));
    }
}
