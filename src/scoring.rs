//! Scoring view over the sink: filter emerging artists and rank them by
//! a composite priority score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_GENRES;
use crate::db::models::{SinkRow, VerificationStatus};

/// Filter applied before ranking. Every bound is inclusive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreFilter {
    /// Allowed primary genres (lowercase). Empty allows every genre.
    pub genres: Vec<String>,
    pub min_listeners: i64,
    pub max_listeners: i64,
    /// Applied only when a follower count is present.
    pub min_followers: i64,
    pub max_followers: i64,
    /// Applied only when an engagement rate is present; strict lower bound.
    pub min_engagement: f64,
    pub min_quality: f64,
}

/// Chart tags the dashboard also surfaces on top of the discovery genres.
const EXTRA_GENRES: &[&str] = &["blues", "rnb", "nu jazz", "funk", "piano", "80s"];

impl Default for ScoreFilter {
    fn default() -> Self {
        Self {
            genres: DEFAULT_GENRES
                .iter()
                .chain(EXTRA_GENRES)
                .chain(std::iter::once(&crate::UNKNOWN_GENRE))
                .map(|g| g.to_string())
                .collect(),
            min_listeners: 5_000,
            max_listeners: 200_000,
            min_followers: 1_000,
            max_followers: 100_000,
            min_engagement: 1.0,
            min_quality: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GrowthPotential {
    High,
    Medium,
    Low,
}

impl GrowthPotential {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

/// One row of the ranked relation consumed by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredArtist {
    pub artist_id: String,
    pub artist_name: String,
    pub primary_genre: String,
    pub lastfm_listeners: Option<i64>,
    pub lastfm_playcount_per_listener: Option<f64>,
    pub instagram_handle: Option<String>,
    pub instagram_followers: Option<i64>,
    pub instagram_engagement_rate: Option<f64>,
    pub youtube_subscribers: Option<i64>,
    pub verification_status: VerificationStatus,
    pub data_quality_score: f64,
    pub underrated_ratio: Option<f64>,
    pub engagement_score: Option<f64>,
    pub platform_count: u8,
    pub growth_potential: GrowthPotential,
    pub priority_score: f64,
    pub collection_date: String,
}

impl ScoreFilter {
    pub fn passes(&self, row: &SinkRow) -> bool {
        let genre_ok = self.genres.is_empty()
            || self
                .genres
                .iter()
                .any(|g| g.eq_ignore_ascii_case(&row.primary_genre));
        let listeners_ok = row
            .lastfm_listeners
            .is_some_and(|l| l > 0 && (self.min_listeners..=self.max_listeners).contains(&l));
        let followers_ok = row
            .instagram_followers
            .is_none_or(|f| (self.min_followers..=self.max_followers).contains(&f));
        let engagement_ok = row.instagram_engagement_rate.is_none_or(|e| e > self.min_engagement);
        let quality_ok = row.data_quality_score >= self.min_quality;

        genre_ok && listeners_ok && followers_ok && engagement_ok && quality_ok
    }
}

/// Photo metrics only count while the handle is not rejected.
fn photo_metrics(row: &SinkRow) -> (Option<i64>, Option<f64>) {
    if row.verification_status == VerificationStatus::Rejected {
        (None, None)
    } else {
        (row.instagram_followers, row.instagram_engagement_rate)
    }
}

/// Composite priority. Absent metrics contribute nothing.
pub fn priority_score(
    listeners: Option<i64>,
    followers: Option<i64>,
    engagement: Option<f64>,
    subscribers: Option<i64>,
    playcount_per_listener: Option<f64>,
) -> f64 {
    let f = followers.unwrap_or(0) as f64;
    let e = engagement.unwrap_or(0.0);
    let s = subscribers.unwrap_or(0) as f64;
    let ppl = playcount_per_listener.unwrap_or(0.0);
    let l = listeners.unwrap_or(0).max(1) as f64;
    (f * 0.3 + e * f * 0.4 + s * 0.2 + ppl * 1000.0 * 0.1) / l
}

pub fn growth_potential(listeners: Option<i64>, followers: Option<i64>) -> GrowthPotential {
    match (listeners, followers) {
        (Some(l), Some(f)) if f > l * 2 => GrowthPotential::High,
        (Some(l), Some(f)) if f > l => GrowthPotential::Medium,
        _ => GrowthPotential::Low,
    }
}

/// Score a sink row without filtering.
pub fn score_row(row: &SinkRow) -> ScoredArtist {
    let listeners = row.lastfm_listeners;
    let (followers, engagement) = photo_metrics(row);
    let subscribers = row.youtube_subscribers;

    let underrated_ratio = match (followers, listeners) {
        (Some(f), Some(l)) if l > 0 => Some(f as f64 / l as f64),
        _ => None,
    };
    let platform_count = u8::from(listeners.is_some_and(|l| l > 5_000))
        + u8::from(followers.is_some_and(|f| f > 10_000))
        + u8::from(subscribers.is_some_and(|s| s > 1_000));

    ScoredArtist {
        artist_id: row.artist_id.clone(),
        artist_name: row.artist_name.clone(),
        primary_genre: row.primary_genre.clone(),
        lastfm_listeners: listeners,
        lastfm_playcount_per_listener: row.lastfm_playcount_per_listener,
        instagram_handle: row.instagram_handle.clone(),
        instagram_followers: followers,
        instagram_engagement_rate: engagement,
        youtube_subscribers: subscribers,
        verification_status: row.verification_status,
        data_quality_score: row.data_quality_score,
        underrated_ratio,
        engagement_score: engagement.map(|e| (e * 2.0).min(10.0)),
        platform_count,
        growth_potential: growth_potential(listeners, followers),
        priority_score: priority_score(
            listeners,
            followers,
            engagement,
            subscribers,
            row.lastfm_playcount_per_listener,
        ),
        collection_date: row.collection_date.clone(),
    }
}

/// Filter and rank, highest priority first.
pub fn score_all(rows: &[SinkRow], filter: &ScoreFilter) -> Vec<ScoredArtist> {
    let mut scored: Vec<ScoredArtist> = rows.iter().filter(|r| filter.passes(r)).map(score_row).collect();
    scored.sort_by(|a, b| {
        b.priority_score
            .total_cmp(&a.priority_score)
            .then_with(|| a.artist_name.cmp(&b.artist_name))
    });
    scored
}

/// Per-genre aggregate over the ranked relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenreSummary {
    pub primary_genre: String,
    pub artist_count: usize,
    pub avg_priority_score: f64,
    /// Averages skip artists without the metric.
    pub avg_underrated_ratio: Option<f64>,
    pub avg_engagement_score: Option<f64>,
    pub high_growth_count: usize,
    pub avg_instagram_followers: Option<f64>,
    pub avg_lastfm_listeners: Option<f64>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Group by primary genre, highest average priority first.
pub fn genre_summary(scored: &[ScoredArtist]) -> Vec<GenreSummary> {
    let mut by_genre: BTreeMap<&str, Vec<&ScoredArtist>> = BTreeMap::new();
    for s in scored {
        by_genre.entry(s.primary_genre.as_str()).or_default().push(s);
    }

    let mut summaries: Vec<GenreSummary> = by_genre
        .into_iter()
        .map(|(genre, artists)| GenreSummary {
            primary_genre: genre.to_string(),
            artist_count: artists.len(),
            avg_priority_score: mean(artists.iter().map(|a| a.priority_score)).unwrap_or(0.0),
            avg_underrated_ratio: mean(artists.iter().filter_map(|a| a.underrated_ratio)),
            avg_engagement_score: mean(artists.iter().filter_map(|a| a.engagement_score)),
            high_growth_count: artists
                .iter()
                .filter(|a| a.growth_potential == GrowthPotential::High)
                .count(),
            avg_instagram_followers: mean(artists.iter().filter_map(|a| a.instagram_followers).map(|f| f as f64)),
            avg_lastfm_listeners: mean(artists.iter().filter_map(|a| a.lastfm_listeners).map(|l| l as f64)),
        })
        .collect();
    summaries.sort_by(|a, b| {
        b.avg_priority_score
            .total_cmp(&a.avg_priority_score)
            .then_with(|| a.primary_genre.cmp(&b.primary_genre))
    });
    summaries
}

/// Scouting report over an already ranked relation.
#[derive(Debug)]
pub struct Insights<'a> {
    /// Head of the ranking.
    pub top: &'a [ScoredArtist],
    pub genres: Vec<GenreSummary>,
    /// High growth potential only, in priority order.
    pub high_growth: Vec<&'a ScoredArtist>,
    /// Mean followers/listeners ratio over `top`.
    pub avg_underrated_ratio: Option<f64>,
    /// Largest followers/listeners ratio within `top`.
    pub most_underrated: Option<&'a ScoredArtist>,
}

/// Build the report from the output of [`score_all`].
pub fn insights(ranked: &[ScoredArtist], top_n: usize, high_growth_n: usize) -> Insights<'_> {
    let top = &ranked[..ranked.len().min(top_n)];
    let most_underrated = top
        .iter()
        .filter(|a| a.underrated_ratio.is_some())
        .max_by(|a, b| {
            a.underrated_ratio
                .unwrap_or(0.0)
                .total_cmp(&b.underrated_ratio.unwrap_or(0.0))
        });

    Insights {
        top,
        genres: genre_summary(ranked),
        high_growth: ranked
            .iter()
            .filter(|a| a.growth_potential == GrowthPotential::High)
            .take(high_growth_n)
            .collect(),
        avg_underrated_ratio: mean(top.iter().filter_map(|a| a.underrated_ratio)),
        most_underrated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, listeners: Option<i64>, followers: Option<i64>) -> SinkRow {
        SinkRow {
            artist_id: format!("id-{name}"),
            artist_name: name.to_string(),
            primary_genre: "indie folk".to_string(),
            collection_date: "2025-03-01T12:00:00Z".to_string(),
            lastfm_url: None,
            lastfm_listeners: listeners,
            lastfm_playcount: None,
            lastfm_playcount_per_listener: Some(20.0),
            genres: None,
            instagram_handle: followers.map(|_| name.to_lowercase()),
            instagram_followers: followers,
            instagram_following: None,
            instagram_posts: None,
            instagram_avg_likes: None,
            instagram_avg_comments: None,
            instagram_engagement_rate: followers.map(|_| 2.19),
            instagram_reels_count: None,
            instagram_verified: None,
            youtube_channel_id: None,
            youtube_subscribers: Some(4_000),
            youtube_total_views: None,
            youtube_video_count: None,
            youtube_avg_views_per_video: None,
            verification_status: VerificationStatus::Verified,
            data_quality_score: 1.0,
        }
    }

    #[test]
    fn test_priority_formula() {
        let p = priority_score(Some(48_000), Some(42_000), Some(2.19), Some(4_000), Some(20.0));
        let expected = (42_000.0 * 0.3 + 2.19 * 42_000.0 * 0.4 + 4_000.0 * 0.2 + 20.0 * 1000.0 * 0.1) / 48_000.0;
        assert!((p - expected).abs() < 1e-9);
        // absent listeners divide by one, absent terms add nothing
        assert!((priority_score(None, None, None, Some(10), None) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_growth_potential() {
        assert_eq!(growth_potential(Some(10_000), Some(25_000)), GrowthPotential::High);
        assert_eq!(growth_potential(Some(10_000), Some(15_000)), GrowthPotential::Medium);
        assert_eq!(growth_potential(Some(10_000), Some(5_000)), GrowthPotential::Low);
        assert_eq!(growth_potential(Some(10_000), None), GrowthPotential::Low);
    }

    #[test]
    fn test_filter_bounds() {
        let filter = ScoreFilter::default();
        assert!(filter.passes(&row("ok", Some(48_000), Some(42_000))));
        assert!(filter.passes(&row("no photo", Some(48_000), None)));
        assert!(!filter.passes(&row("no listeners", None, None)));
        assert!(!filter.passes(&row("too big", Some(500_000), None)));
        assert!(!filter.passes(&row("too many followers", Some(48_000), Some(2_000_000))));

        let mut low_quality = row("low", Some(48_000), None);
        low_quality.data_quality_score = 0.2;
        assert!(!filter.passes(&low_quality));

        let mut other_genre = row("metal", Some(48_000), None);
        other_genre.primary_genre = "death metal".to_string();
        assert!(!filter.passes(&other_genre));
    }

    #[test]
    fn test_default_filter_keeps_every_discovery_genre() {
        let filter = ScoreFilter::default();
        for criterion in crate::config::default_criteria() {
            let mut r = row("anyone", Some(48_000), None);
            r.primary_genre = criterion.genre_context().to_string();
            assert!(filter.passes(&r), "{criterion} filtered out by default");
        }
        // chart tags outside the discovery list stay allowed
        let mut r = row("funky", Some(48_000), None);
        r.primary_genre = "funk".to_string();
        assert!(filter.passes(&r));
    }

    #[test]
    fn test_rejected_photo_counts_as_absent() {
        let mut r = row("rejected", Some(48_000), Some(42_000));
        r.verification_status = VerificationStatus::Rejected;
        let scored = score_row(&r);
        assert_eq!(scored.instagram_followers, None);
        assert_eq!(scored.engagement_score, None);
        assert_eq!(scored.platform_count, 2);
    }

    #[test]
    fn test_score_all_sorted_by_priority() {
        let rows = vec![
            row("small following", Some(48_000), Some(2_000)),
            row("big following", Some(48_000), Some(90_000)),
            row("filtered", None, None),
        ];
        let ranked = score_all(&rows, &ScoreFilter::default());
        let names: Vec<&str> = ranked.iter().map(|s| s.artist_name.as_str()).collect();
        assert_eq!(names, vec!["big following", "small following"]);
        assert_eq!(ranked[0].platform_count, 3);
        assert_eq!(ranked[0].engagement_score, Some(4.38));
    }

    fn scored(name: &str, genre: &str, listeners: i64, followers: Option<i64>) -> ScoredArtist {
        let mut r = row(name, Some(listeners), followers);
        r.primary_genre = genre.to_string();
        score_row(&r)
    }

    #[test]
    fn test_genre_summary_aggregates() {
        let ranked = vec![
            scored("a", "jazz", 10_000, Some(30_000)),
            scored("b", "jazz", 10_000, None),
            scored("c", "folk", 50_000, Some(20_000)),
        ];
        let genres = genre_summary(&ranked);
        assert_eq!(genres.len(), 2);

        let jazz = genres.iter().find(|g| g.primary_genre == "jazz").unwrap();
        assert_eq!(jazz.artist_count, 2);
        assert_eq!(jazz.high_growth_count, 1);
        // averages skip the artist without a photo slot
        assert_eq!(jazz.avg_underrated_ratio, Some(3.0));
        assert_eq!(jazz.avg_instagram_followers, Some(30_000.0));
        assert_eq!(jazz.avg_lastfm_listeners, Some(10_000.0));
        let expected = (ranked[0].priority_score + ranked[1].priority_score) / 2.0;
        assert!((jazz.avg_priority_score - expected).abs() < 1e-9);

        // highest average priority first
        assert!(genres[0].avg_priority_score >= genres[1].avg_priority_score);
    }

    #[test]
    fn test_insights_report() {
        let rows = vec![
            row("big following", Some(20_000), Some(90_000)),
            row("even split", Some(48_000), Some(50_000)),
            row("no photo", Some(48_000), None),
        ];
        let ranked = score_all(&rows, &ScoreFilter::default());
        let report = insights(&ranked, 2, 30);

        assert_eq!(report.top.len(), 2);
        assert_eq!(report.top[0].artist_name, "big following");
        assert_eq!(report.most_underrated.unwrap().artist_name, "big following");
        let names: Vec<&str> = report.high_growth.iter().map(|a| a.artist_name.as_str()).collect();
        assert_eq!(names, vec!["big following"]);
        let expected = (90_000.0 / 20_000.0 + 50_000.0 / 48_000.0) / 2.0;
        assert!((report.avg_underrated_ratio.unwrap() - expected).abs() < 1e-9);
        assert_eq!(report.genres.len(), 1);
        assert_eq!(report.genres[0].artist_count, 3);

        let empty = insights(&[], 20, 30);
        assert!(empty.top.is_empty());
        assert!(empty.most_underrated.is_none());
        assert!(empty.genres.is_empty());
    }
}
