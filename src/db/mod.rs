pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Slot JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt row for artist {artist_id}: {reason}")]
    CorruptRow { artist_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Canonical artist store plus the flattened sink table, in one SQLite file.
pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than this build (v{SCHEMA_VERSION})"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }
        if version < 2 {
            self.migrate_v2()?;
        }
        if version < 3 {
            self.migrate_v3()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: canonical artists + name review queue
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS artists (
                artist_id           TEXT PRIMARY KEY,
                artist_name         TEXT NOT NULL,
                normalized_name     TEXT NOT NULL UNIQUE,
                primary_genre       TEXT NOT NULL,

                -- Per-platform slots as JSON; NULL = never collected
                scrobble_slot       TEXT,
                photo_slot          TEXT,
                video_slot          TEXT,

                verification_status TEXT NOT NULL DEFAULT 'unverified',
                data_quality_score  REAL NOT NULL DEFAULT 0,
                collection_date     TEXT NOT NULL,
                first_seen_at       TEXT NOT NULL,
                last_seen_pass      INTEGER NOT NULL DEFAULT 0,

                updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_artists_pass ON artists(last_seen_pass);
            CREATE INDEX IF NOT EXISTS idx_artists_genre ON artists(primary_genre);

            CREATE TABLE IF NOT EXISTS name_reviews (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                artist_id           TEXT NOT NULL REFERENCES artists(artist_id) ON DELETE CASCADE,
                similar_artist_id   TEXT NOT NULL REFERENCES artists(artist_id) ON DELETE CASCADE,
                similarity          REAL NOT NULL,
                flagged_at          TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(artist_id, similar_artist_id)
            );
            ",
        )?;
        Ok(())
    }

    /// V2: flattened sink table read by the scoring view and the dashboard
    fn migrate_v2(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS artist_raw_data (
                artist_id                       TEXT PRIMARY KEY,
                artist_name                     TEXT NOT NULL,
                primary_genre                   TEXT NOT NULL,
                collection_date                 TEXT NOT NULL,

                lastfm_url                      TEXT,
                lastfm_listeners                INTEGER,
                lastfm_playcount                INTEGER,
                lastfm_playcount_per_listener   REAL,
                genres                          TEXT,

                instagram_handle                TEXT,
                instagram_followers             INTEGER,
                instagram_following             INTEGER,
                instagram_posts                 INTEGER,
                instagram_avg_likes             REAL,
                instagram_avg_comments          REAL,
                instagram_engagement_rate       REAL,
                instagram_reels_count           INTEGER,
                instagram_verified              INTEGER,

                youtube_channel_id              TEXT,
                youtube_subscribers             INTEGER,
                youtube_total_views             INTEGER,
                youtube_video_count             INTEGER,
                youtube_avg_views_per_video     REAL,

                verification_status             TEXT NOT NULL,
                data_quality_score              REAL NOT NULL,
                last_updated                    TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_raw_genre ON artist_raw_data(primary_genre);
            CREATE INDEX IF NOT EXISTS idx_raw_listeners ON artist_raw_data(lastfm_listeners);
            ",
        )?;
        Ok(())
    }

    /// V3: per-artist top tracks with their matched video
    fn migrate_v3(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS artist_tracks (
                artist_id               TEXT NOT NULL REFERENCES artists(artist_id) ON DELETE CASCADE,
                track_name              TEXT NOT NULL,
                rank                    INTEGER NOT NULL,
                lastfm_playcount        INTEGER,
                lastfm_listeners        INTEGER,
                lastfm_url              TEXT,

                youtube_video_id        TEXT,
                youtube_title           TEXT,
                youtube_views           INTEGER,
                youtube_likes           INTEGER,
                youtube_comments        INTEGER,
                youtube_published_at    TEXT,

                collected_at            TEXT NOT NULL,
                PRIMARY KEY (artist_id, track_name)
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_rank ON artist_tracks(artist_id, rank);
            ",
        )?;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 3;
