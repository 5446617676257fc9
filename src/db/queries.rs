use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::models::{
    ArtistTrack, CanonicalArtist, CollectionStats, NameReview, SinkRow, VerificationStatus,
};
use super::{Database, DbError, Result};

/// Column list shared by every artist SELECT, in `RawArtist` order.
const ARTIST_COLUMNS: &str = "artist_id, artist_name, normalized_name, primary_genre,
     scrobble_slot, photo_slot, video_slot, verification_status, data_quality_score,
     collection_date, first_seen_at, last_seen_pass";

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(artist_id: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DbError::CorruptRow {
            artist_id: artist_id.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

/// Raw column values, converted into a `CanonicalArtist` outside the row closure.
struct RawArtist {
    artist_id: String,
    artist_name: String,
    normalized_name: String,
    primary_genre: String,
    scrobble_slot: Option<String>,
    photo_slot: Option<String>,
    video_slot: Option<String>,
    verification_status: String,
    data_quality_score: f64,
    collection_date: String,
    first_seen_at: String,
    last_seen_pass: i64,
}

impl RawArtist {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            artist_id: row.get(0)?,
            artist_name: row.get(1)?,
            normalized_name: row.get(2)?,
            primary_genre: row.get(3)?,
            scrobble_slot: row.get(4)?,
            photo_slot: row.get(5)?,
            video_slot: row.get(6)?,
            verification_status: row.get(7)?,
            data_quality_score: row.get(8)?,
            collection_date: row.get(9)?,
            first_seen_at: row.get(10)?,
            last_seen_pass: row.get(11)?,
        })
    }

    fn into_artist(self) -> Result<CanonicalArtist> {
        let verification_status = VerificationStatus::parse(&self.verification_status)
            .ok_or_else(|| DbError::CorruptRow {
                artist_id: self.artist_id.clone(),
                reason: format!("unknown verification status {:?}", self.verification_status),
            })?;

        Ok(CanonicalArtist {
            scrobble: self.scrobble_slot.as_deref().map(serde_json::from_str).transpose()?,
            photo: self.photo_slot.as_deref().map(serde_json::from_str).transpose()?,
            video: self.video_slot.as_deref().map(serde_json::from_str).transpose()?,
            verification_status,
            data_quality_score: self.data_quality_score,
            collection_date: parse_ts(&self.artist_id, &self.collection_date)?,
            first_seen_at: parse_ts(&self.artist_id, &self.first_seen_at)?,
            last_seen_pass: self.last_seen_pass.max(0) as u64,
            artist_id: self.artist_id,
            artist_name: self.artist_name,
            normalized_name: self.normalized_name,
            primary_genre: self.primary_genre,
        })
    }
}

impl Database {
    /// Insert or update a canonical artist, keyed by `artist_id`.
    pub fn upsert_artist(&self, a: &CanonicalArtist) -> Result<()> {
        let scrobble = a.scrobble.as_ref().map(serde_json::to_string).transpose()?;
        let photo = a.photo.as_ref().map(serde_json::to_string).transpose()?;
        let video = a.video.as_ref().map(serde_json::to_string).transpose()?;

        self.conn.execute(
            "INSERT INTO artists (
                artist_id, artist_name, normalized_name, primary_genre,
                scrobble_slot, photo_slot, video_slot,
                verification_status, data_quality_score,
                collection_date, first_seen_at, last_seen_pass,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, datetime('now'))
            ON CONFLICT(artist_id) DO UPDATE SET
                artist_name = excluded.artist_name,
                primary_genre = excluded.primary_genre,
                scrobble_slot = excluded.scrobble_slot,
                photo_slot = excluded.photo_slot,
                video_slot = excluded.video_slot,
                verification_status = excluded.verification_status,
                data_quality_score = excluded.data_quality_score,
                collection_date = excluded.collection_date,
                last_seen_pass = excluded.last_seen_pass,
                updated_at = datetime('now')
            ",
            params![
                a.artist_id,
                a.artist_name,
                a.normalized_name,
                a.primary_genre,
                scrobble,
                photo,
                video,
                a.verification_status.as_str(),
                a.data_quality_score,
                fmt_ts(&a.collection_date),
                fmt_ts(&a.first_seen_at),
                a.last_seen_pass as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_artist(&self, artist_id: &str) -> Result<Option<CanonicalArtist>> {
        let sql = format!("SELECT {ARTIST_COLUMNS} FROM artists WHERE artist_id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![artist_id], RawArtist::from_row)
            .optional()?;
        raw.map(RawArtist::into_artist).transpose()
    }

    pub fn find_artist_by_normalized_name(&self, normalized: &str) -> Result<Option<CanonicalArtist>> {
        let sql = format!("SELECT {ARTIST_COLUMNS} FROM artists WHERE normalized_name = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![normalized], RawArtist::from_row)
            .optional()?;
        raw.map(RawArtist::into_artist).transpose()
    }

    /// Artists whose display name contains `pattern` (case-insensitive).
    pub fn search_artists(&self, pattern: &str, limit: usize) -> Result<Vec<CanonicalArtist>> {
        let sql = format!(
            "SELECT {ARTIST_COLUMNS} FROM artists
             WHERE artist_name LIKE '%' || ?1 || '%'
             ORDER BY data_quality_score DESC, artist_name
             LIMIT ?2"
        );
        self.collect_artists(&sql, params![pattern, limit as i64])
    }

    fn collect_artists<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<CanonicalArtist>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raws = stmt
            .query_map(params, RawArtist::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawArtist::into_artist).collect()
    }

    /// `(artist_id, normalized_name)` for every known artist.
    pub fn normalized_names(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT artist_id, normalized_name FROM artists ORDER BY artist_id")?;
        let names = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Work set of a collection pass: artists discovered in it, in stable order.
    pub fn pass_work_set(&self, pass: u64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist_id FROM artists WHERE last_seen_pass = ?1 ORDER BY artist_id",
        )?;
        let ids = stmt
            .query_map(params![pass as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn max_pass(&self) -> Result<u64> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(last_seen_pass) FROM artists", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }

    /// Record a near-duplicate pair. Returns false if the pair was already queued.
    pub fn insert_name_review(&self, artist_id: &str, similar_artist_id: &str, similarity: f64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO name_reviews (artist_id, similar_artist_id, similarity)
             VALUES (?1, ?2, ?3)",
            params![artist_id, similar_artist_id, similarity],
        )?;
        Ok(inserted > 0)
    }

    pub fn name_reviews(&self) -> Result<Vec<NameReview>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.artist_id, a.artist_name, r.similar_artist_id, b.artist_name,
                    r.similarity, r.flagged_at
             FROM name_reviews r
             JOIN artists a ON a.artist_id = r.artist_id
             JOIN artists b ON b.artist_id = r.similar_artist_id
             ORDER BY r.similarity DESC, r.flagged_at",
        )?;
        let reviews = stmt
            .query_map([], |row| {
                Ok(NameReview {
                    artist_id: row.get(0)?,
                    artist_name: row.get(1)?,
                    similar_artist_id: row.get(2)?,
                    similar_artist_name: row.get(3)?,
                    similarity: row.get(4)?,
                    flagged_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(reviews)
    }

    /// Publish a canonical artist into the flattened sink (upsert by `artist_id`).
    pub fn publish_artist(&self, a: &CanonicalArtist) -> Result<()> {
        let s = a.scrobble.as_ref();
        let p = a.photo.as_ref();
        let v = a.video.as_ref();
        let genres = s.filter(|s| !s.tags.is_empty()).map(|s| s.tags.join(", "));

        self.conn.execute(
            "INSERT INTO artist_raw_data (
                artist_id, artist_name, primary_genre, collection_date,
                lastfm_url, lastfm_listeners, lastfm_playcount, lastfm_playcount_per_listener, genres,
                instagram_handle, instagram_followers, instagram_following, instagram_posts,
                instagram_avg_likes, instagram_avg_comments, instagram_engagement_rate,
                instagram_reels_count, instagram_verified,
                youtube_channel_id, youtube_subscribers, youtube_total_views,
                youtube_video_count, youtube_avg_views_per_video,
                verification_status, data_quality_score, last_updated
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7, ?8, ?9,
                ?10, ?11, ?12, ?13,
                ?14, ?15, ?16,
                ?17, ?18,
                ?19, ?20, ?21,
                ?22, ?23,
                ?24, ?25, datetime('now')
            )
            ON CONFLICT(artist_id) DO UPDATE SET
                artist_name = excluded.artist_name,
                primary_genre = excluded.primary_genre,
                collection_date = excluded.collection_date,
                lastfm_url = excluded.lastfm_url,
                lastfm_listeners = excluded.lastfm_listeners,
                lastfm_playcount = excluded.lastfm_playcount,
                lastfm_playcount_per_listener = excluded.lastfm_playcount_per_listener,
                genres = excluded.genres,
                instagram_handle = excluded.instagram_handle,
                instagram_followers = excluded.instagram_followers,
                instagram_following = excluded.instagram_following,
                instagram_posts = excluded.instagram_posts,
                instagram_avg_likes = excluded.instagram_avg_likes,
                instagram_avg_comments = excluded.instagram_avg_comments,
                instagram_engagement_rate = excluded.instagram_engagement_rate,
                instagram_reels_count = excluded.instagram_reels_count,
                instagram_verified = excluded.instagram_verified,
                youtube_channel_id = excluded.youtube_channel_id,
                youtube_subscribers = excluded.youtube_subscribers,
                youtube_total_views = excluded.youtube_total_views,
                youtube_video_count = excluded.youtube_video_count,
                youtube_avg_views_per_video = excluded.youtube_avg_views_per_video,
                verification_status = excluded.verification_status,
                data_quality_score = excluded.data_quality_score,
                last_updated = datetime('now')
            ",
            params![
                a.artist_id,
                a.artist_name,
                a.primary_genre,
                fmt_ts(&a.collection_date),
                s.and_then(|s| s.url.clone()),
                s.and_then(|s| s.listeners),
                s.and_then(|s| s.playcount),
                s.and_then(|s| s.playcount_per_listener),
                genres,
                p.map(|p| p.handle.clone()),
                p.and_then(|p| p.followers),
                p.and_then(|p| p.following),
                p.and_then(|p| p.posts),
                p.and_then(|p| p.avg_likes),
                p.and_then(|p| p.avg_comments),
                p.and_then(|p| p.engagement_rate),
                p.and_then(|p| p.reels_count),
                p.and_then(|p| p.is_verified),
                v.map(|v| v.channel_id.clone()),
                v.and_then(|v| v.subscribers),
                v.and_then(|v| v.total_views),
                v.and_then(|v| v.video_count),
                v.and_then(|v| v.avg_views_per_video),
                a.verification_status.as_str(),
                a.data_quality_score,
            ],
        )?;
        Ok(())
    }

    /// Every row of the sink, as read by the scoring view.
    pub fn sink_rows(&self) -> Result<Vec<SinkRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist_id, artist_name, primary_genre, collection_date,
                    lastfm_url, lastfm_listeners, lastfm_playcount, lastfm_playcount_per_listener, genres,
                    instagram_handle, instagram_followers, instagram_following, instagram_posts,
                    instagram_avg_likes, instagram_avg_comments, instagram_engagement_rate,
                    instagram_reels_count, instagram_verified,
                    youtube_channel_id, youtube_subscribers, youtube_total_views,
                    youtube_video_count, youtube_avg_views_per_video,
                    verification_status, data_quality_score
             FROM artist_raw_data
             ORDER BY artist_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(23)?;
                Ok((
                    SinkRow {
                        artist_id: row.get(0)?,
                        artist_name: row.get(1)?,
                        primary_genre: row.get(2)?,
                        collection_date: row.get(3)?,
                        lastfm_url: row.get(4)?,
                        lastfm_listeners: row.get(5)?,
                        lastfm_playcount: row.get(6)?,
                        lastfm_playcount_per_listener: row.get(7)?,
                        genres: row.get(8)?,
                        instagram_handle: row.get(9)?,
                        instagram_followers: row.get(10)?,
                        instagram_following: row.get(11)?,
                        instagram_posts: row.get(12)?,
                        instagram_avg_likes: row.get(13)?,
                        instagram_avg_comments: row.get(14)?,
                        instagram_engagement_rate: row.get(15)?,
                        instagram_reels_count: row.get(16)?,
                        instagram_verified: row.get(17)?,
                        youtube_channel_id: row.get(18)?,
                        youtube_subscribers: row.get(19)?,
                        youtube_total_views: row.get(20)?,
                        youtube_video_count: row.get(21)?,
                        youtube_avg_views_per_video: row.get(22)?,
                        verification_status: VerificationStatus::Unverified,
                        data_quality_score: row.get(24)?,
                    },
                    status,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(mut row, status)| {
                row.verification_status =
                    VerificationStatus::parse(&status).ok_or_else(|| DbError::CorruptRow {
                        artist_id: row.artist_id.clone(),
                        reason: format!("unknown verification status {status:?}"),
                    })?;
                Ok(row)
            })
            .collect()
    }

    /// Insert or refresh one top track, keyed by `(artist_id, track_name)`.
    pub fn upsert_track(&self, t: &ArtistTrack) -> Result<()> {
        self.conn.execute(
            "INSERT INTO artist_tracks (
                artist_id, track_name, rank, lastfm_playcount, lastfm_listeners, lastfm_url,
                youtube_video_id, youtube_title, youtube_views, youtube_likes, youtube_comments,
                youtube_published_at, collected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(artist_id, track_name) DO UPDATE SET
                rank = excluded.rank,
                lastfm_playcount = excluded.lastfm_playcount,
                lastfm_listeners = excluded.lastfm_listeners,
                lastfm_url = excluded.lastfm_url,
                youtube_video_id = excluded.youtube_video_id,
                youtube_title = excluded.youtube_title,
                youtube_views = excluded.youtube_views,
                youtube_likes = excluded.youtube_likes,
                youtube_comments = excluded.youtube_comments,
                youtube_published_at = excluded.youtube_published_at,
                collected_at = excluded.collected_at",
            params![
                t.artist_id,
                t.track_name,
                t.rank,
                t.lastfm_playcount,
                t.lastfm_listeners,
                t.lastfm_url,
                t.youtube_video_id,
                t.youtube_title,
                t.youtube_views,
                t.youtube_likes,
                t.youtube_comments,
                t.youtube_published_at,
                fmt_ts(&t.collected_at),
            ],
        )?;
        Ok(())
    }

    /// Stored top tracks of one artist, best ranked first.
    pub fn tracks_for_artist(&self, artist_id: &str) -> Result<Vec<ArtistTrack>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist_id, track_name, rank, lastfm_playcount, lastfm_listeners, lastfm_url,
                    youtube_video_id, youtube_title, youtube_views, youtube_likes, youtube_comments,
                    youtube_published_at, collected_at
             FROM artist_tracks WHERE artist_id = ?1
             ORDER BY rank, track_name",
        )?;
        let rows = stmt
            .query_map(params![artist_id], |row| {
                let collected_at: String = row.get(12)?;
                Ok((
                    ArtistTrack {
                        artist_id: row.get(0)?,
                        track_name: row.get(1)?,
                        rank: row.get(2)?,
                        lastfm_playcount: row.get(3)?,
                        lastfm_listeners: row.get(4)?,
                        lastfm_url: row.get(5)?,
                        youtube_video_id: row.get(6)?,
                        youtube_title: row.get(7)?,
                        youtube_views: row.get(8)?,
                        youtube_likes: row.get(9)?,
                        youtube_comments: row.get(10)?,
                        youtube_published_at: row.get(11)?,
                        collected_at: DateTime::<Utc>::default(),
                    },
                    collected_at,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(mut track, raw)| {
                track.collected_at = parse_ts(&track.artist_id, &raw)?;
                Ok(track)
            })
            .collect()
    }

    /// Get collection statistics.
    pub fn stats(&self) -> Result<CollectionStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let total_artists = count("SELECT COUNT(*) FROM artists")?;
        let with_scrobble = count("SELECT COUNT(*) FROM artists WHERE scrobble_slot IS NOT NULL")?;
        let with_photo = count("SELECT COUNT(*) FROM artists WHERE photo_slot IS NOT NULL")?;
        let with_video = count("SELECT COUNT(*) FROM artists WHERE video_slot IS NOT NULL")?;
        let verified = count("SELECT COUNT(*) FROM artists WHERE verification_status = 'verified'")?;
        let rejected = count("SELECT COUNT(*) FROM artists WHERE verification_status = 'rejected'")?;
        let published = count("SELECT COUNT(*) FROM artist_raw_data")?;
        let pending_reviews = count("SELECT COUNT(*) FROM name_reviews")?;
        let tracks = count("SELECT COUNT(*) FROM artist_tracks")?;

        let avg_quality: f64 = self.conn.query_row(
            "SELECT COALESCE(AVG(data_quality_score), 0.0) FROM artists",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT primary_genre, COUNT(*) FROM artists
             GROUP BY primary_genre ORDER BY COUNT(*) DESC, primary_genre",
        )?;
        let genres = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CollectionStats {
            total_artists,
            with_scrobble,
            with_photo,
            with_video,
            verified,
            rejected,
            published,
            pending_reviews,
            tracks,
            avg_quality,
            genres,
        })
    }
}
