use std::sync::LazyLock;

use regex::Regex;

use crate::db::models::{CanonicalArtist, VerificationStatus};
use crate::merge::refresh_quality;

/// Three-way result of a handle cross-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The handle appears in the video channel's text.
    Verified,
    /// Text was available and the handle is not in it.
    Rejected,
    /// No text to check against; nothing is concluded.
    Inconclusive,
}

/// Strip a leading `@` and lowercase.
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

/// Check a photo handle against the video channel description.
pub fn check_handle(handle: &str, channel_text: Option<&str>) -> VerifyOutcome {
    let handle = normalize_handle(handle);
    let Some(text) = channel_text else {
        return VerifyOutcome::Inconclusive;
    };
    if handle.is_empty() {
        return VerifyOutcome::Inconclusive;
    }
    if text.to_lowercase().contains(&handle) {
        VerifyOutcome::Verified
    } else {
        VerifyOutcome::Rejected
    }
}

/// Cross-check an artist's photo handle and apply the outcome.
///
/// Rejection discards the photo slot. Inconclusive leaves the artist as it was.
pub fn verify_artist(artist: &mut CanonicalArtist, channel_text: Option<&str>) -> VerifyOutcome {
    let Some(handle) = artist.photo_handle() else {
        return VerifyOutcome::Inconclusive;
    };
    let outcome = check_handle(handle, channel_text);

    match outcome {
        VerifyOutcome::Verified => {
            artist.verification_status = VerificationStatus::Verified;
            refresh_quality(artist);
        }
        VerifyOutcome::Rejected => {
            let advertised = channel_text.map(extract_handles).unwrap_or_default();
            if advertised.is_empty() {
                log::info!("{}: @{handle} not found in channel text, rejected", artist.artist_name);
            } else {
                log::info!(
                    "{}: @{handle} rejected, channel advertises {}",
                    artist.artist_name,
                    advertised.iter().map(|h| format!("@{h}")).collect::<Vec<_>>().join(", ")
                );
            }
            artist.photo = None;
            artist.verification_status = VerificationStatus::Rejected;
            refresh_quality(artist);
        }
        VerifyOutcome::Inconclusive => {}
    }
    outcome
}

// Link form: instagram.com/<handle>
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)instagram\.com/([a-z0-9_.]+)").unwrap());

// Mention form: @<handle>, not preceded by a handle character (skips e-mail addresses)
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^a-z0-9_.])@([a-z0-9_.]{2,30})").unwrap());

// Label form: "instagram: <handle>" or "IG <handle>"
static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:instagram|ig)[\s:]+@?([a-z0-9_.]{2,30})").unwrap());

/// Instagram handles a piece of text advertises, lowercased, deduplicated, sorted.
pub fn extract_handles(text: &str) -> Vec<String> {
    let mut handles: Vec<String> = [&*LINK_RE, &*MENTION_RE, &*LABEL_RE]
        .into_iter()
        .flat_map(|re| re.captures_iter(text))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
        .filter(|h| h.len() > 1)
        .collect();
    handles.sort();
    handles.dedup();
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PhotoSlot;
    use chrono::Utc;

    fn artist_with_handle(handle: &str) -> CanonicalArtist {
        let now = Utc::now();
        CanonicalArtist {
            artist_id: "a1".to_string(),
            artist_name: "Echo Bloom".to_string(),
            normalized_name: "echo bloom".to_string(),
            primary_genre: "indie folk".to_string(),
            scrobble: None,
            photo: Some(PhotoSlot {
                handle: handle.to_string(),
                followers: Some(42_000),
                following: None,
                posts: None,
                avg_likes: None,
                avg_comments: None,
                engagement_rate: None,
                reels_count: None,
                is_verified: None,
                collected_at: now,
            }),
            video: None,
            verification_status: VerificationStatus::Unverified,
            data_quality_score: 0.7 / 3.0,
            collection_date: now,
            first_seen_at: now,
            last_seen_pass: 1,
        }
    }

    #[test]
    fn test_check_handle_three_ways() {
        assert_eq!(
            check_handle("@EchoBloom", Some("Follow us on Instagram @echobloom")),
            VerifyOutcome::Verified
        );
        assert_eq!(
            check_handle("echobloom", Some("Official channel of another band")),
            VerifyOutcome::Rejected
        );
        assert_eq!(check_handle("echobloom", None), VerifyOutcome::Inconclusive);
        assert_eq!(check_handle("@", Some("anything")), VerifyOutcome::Inconclusive);
    }

    #[test]
    fn test_verified_adds_quality() {
        let mut a = artist_with_handle("echobloom");
        let out = verify_artist(&mut a, Some("instagram.com/EchoBloom"));
        assert_eq!(out, VerifyOutcome::Verified);
        assert_eq!(a.verification_status, VerificationStatus::Verified);
        assert!((a.data_quality_score - (0.7 / 3.0 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_clears_photo() {
        let mut a = artist_with_handle("echobloom");
        let out = verify_artist(&mut a, Some("ig: someoneelse"));
        assert_eq!(out, VerifyOutcome::Rejected);
        assert!(a.photo.is_none());
        assert_eq!(a.verification_status, VerificationStatus::Rejected);
        assert_eq!(a.data_quality_score, 0.0);
    }

    #[test]
    fn test_inconclusive_changes_nothing() {
        let mut a = artist_with_handle("echobloom");
        let before = a.clone();
        assert_eq!(verify_artist(&mut a, None), VerifyOutcome::Inconclusive);
        assert_eq!(a, before);
    }

    #[test]
    fn test_extract_handles() {
        let text = "Listen everywhere! https://www.instagram.com/EchoBloom/ \
                    Management: mgmt@label.com, IG: bloom.live and follow @EchoBloom.";
        assert_eq!(extract_handles(text), vec!["bloom.live", "echobloom"]);
        assert!(extract_handles("no socials here").is_empty());
    }
}
