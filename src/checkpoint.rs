use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::CandidateProfile;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    DiscoverArtists,
    CollectPhotoSocial,
    CollectVideo,
    VerifyHandles,
    MergeAndPersist,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::DiscoverArtists,
        Stage::CollectPhotoSocial,
        Stage::CollectVideo,
        Stage::VerifyHandles,
        Stage::MergeAndPersist,
    ];

    /// The stage after this one; `None` at the end of a pass.
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::DiscoverArtists => Some(Self::CollectPhotoSocial),
            Self::CollectPhotoSocial => Some(Self::CollectVideo),
            Self::CollectVideo => Some(Self::VerifyHandles),
            Self::VerifyHandles => Some(Self::MergeAndPersist),
            Self::MergeAndPersist => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscoverArtists => "DISCOVER_ARTISTS",
            Self::CollectPhotoSocial => "COLLECT_PHOTO_SOCIAL",
            Self::CollectVideo => "COLLECT_VIDEO",
            Self::VerifyHandles => "VERIFY_HANDLES",
            Self::MergeAndPersist => "MERGE_AND_PERSIST",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidates of the criterion being worked on, and how many are absorbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryProgress {
    pub candidates: Vec<CandidateProfile>,
    pub done: usize,
}

/// Resume point: `cursor` items of `stage` in `pass` are done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub pass: u64,
    pub stage: Stage,
    pub cursor: usize,
    /// Sub-cursor inside DISCOVER_ARTISTS item `cursor`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryProgress>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn fresh(pass: u64) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            pass,
            stage: Stage::DiscoverArtists,
            cursor: 0,
            discovery: None,
            updated_at: Utc::now(),
        }
    }

    /// Mark `done` items of the current stage complete.
    pub fn advance(&mut self, done: usize) {
        self.cursor = done;
        self.discovery = None;
        self.updated_at = Utc::now();
    }

    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.cursor = 0;
        self.discovery = None;
        self.updated_at = Utc::now();
    }

    /// Record the candidate list of the current discovery item.
    pub fn begin_discovery(&mut self, candidates: Vec<CandidateProfile>) {
        self.discovery = Some(DiscoveryProgress { candidates, done: 0 });
        self.updated_at = Utc::now();
    }

    /// One more candidate of the current discovery item is absorbed.
    pub fn candidate_done(&mut self) {
        if let Some(progress) = self.discovery.as_mut() {
            progress.done += 1;
        }
        self.updated_at = Utc::now();
    }

    /// Roll over to the first stage of the next pass.
    pub fn complete_pass(&mut self) {
        self.pass += 1;
        self.enter(Stage::DiscoverArtists);
    }
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint {} is corrupt: {} (rerun with --fresh to start over)", .path.display(), .reason)]
    Corrupt { path: PathBuf, reason: String },
    #[error("checkpoint {} has version {}, expected {}", .path.display(), .found, CHECKPOINT_VERSION)]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

/// JSON checkpoint file, replaced atomically on every save.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no checkpoint exists yet.
    pub fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let value: serde_json::Value =
            serde_json::from_str(&contents).map_err(|e| self.corrupt(e.to_string()))?;
        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| self.corrupt("missing version".to_string()))? as u32;
        if found != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                path: self.path.clone(),
                found,
            });
        }

        let checkpoint: Checkpoint = serde_json::from_value(value).map_err(|e| self.corrupt(e.to_string()))?;
        if checkpoint.pass == 0 {
            return Err(self.corrupt("pass must be at least 1".to_string()));
        }
        Ok(Some(checkpoint))
    }

    /// Write to a sibling temp file, fsync, then rename over the old checkpoint.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let io_err = |source: std::io::Error| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint).map_err(|e| io_err(e.into()))?;
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn corrupt(&self, reason: String) -> CheckpointError {
        CheckpointError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}
