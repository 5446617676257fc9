//! Staged, resumable collection passes.
//!
//! Every stage walks an ordered item list and saves the checkpoint after each
//! item, so a restarted run continues with the first unfinished item. All
//! platform calls go through [`Pacing::call`], which owns the inter-call delay
//! and the rate-limit back-off.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, Stage};
use crate::config::{AppConfig, RunMode};
use crate::db::{Database, DbError};
use crate::db::models::{CanonicalArtist, VerificationStatus};
use crate::merge::{merge, refresh_quality, track_record};
use crate::platform::{CandidateProfile, CollectError, DiscoveryCriterion, Platform, PlatformCollector};
use crate::resolver::{Resolver, normalize_name};
use crate::verify::{VerifyOutcome, extract_handles, verify_artist};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// One collector per platform.
pub struct Collectors {
    pub scrobble: Box<dyn PlatformCollector>,
    pub photo: Box<dyn PlatformCollector>,
    pub video: Box<dyn PlatformCollector>,
}

/// Interruptible suspension. Returns `false` if cancelled before the full duration.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration, cancel: &AtomicBool) -> bool;
}

/// Real-time sleeper that wakes every 250ms to check the cancel flag.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration, cancel: &AtomicBool) -> bool {
        let slice = Duration::from_millis(250);
        let deadline = Instant::now() + duration;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(slice.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub criteria: Vec<DiscoveryCriterion>,
    pub scrobble_delay: Duration,
    pub photo_delay: Duration,
    pub video_delay: Duration,
    pub max_rate_limit_waits: u32,
    pub mode: RunMode,
    pub pass_interval: Duration,
    pub review_threshold: f64,
    /// Add YouTube channel search results to every discovery criterion.
    pub video_discovery: bool,
    pub show_progress: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let c = &config.collection;
        Self {
            criteria: config.criteria.clone(),
            scrobble_delay: Duration::from_millis(c.scrobble_delay_ms),
            photo_delay: Duration::from_millis(c.photo_delay_ms),
            video_delay: Duration::from_millis(c.video_delay_ms),
            max_rate_limit_waits: c.max_rate_limit_waits,
            mode: c.mode,
            pass_interval: Duration::from_secs(c.pass_interval_secs),
            review_threshold: config.identity.review_threshold,
            video_discovery: c.video_discovery,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// Counters for the summary printed after a run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunReport {
    pub passes_completed: u64,
    pub candidates_discovered: usize,
    pub new_artists: usize,
    pub profiles_merged: usize,
    /// Merges that filled a previously empty platform slot.
    pub slots_filled: usize,
    pub merge_errors: usize,
    pub review_flags: usize,
    pub verified: usize,
    pub rejected: usize,
    pub inconclusive: usize,
    pub published: usize,
    pub unavailable: usize,
    pub rate_limit_waits: usize,
    pub tracks_collected: usize,
}

/// Result of one paced platform call.
#[derive(Debug, PartialEq)]
pub enum CallResult<T> {
    Done(T),
    /// Item-level failure: skip and move on.
    Unavailable,
    Cancelled,
}

/// Per-item result of a stage handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Done,
    Cancelled,
}

/// Inter-call delay and rate-limit policy around collector calls.
pub struct Pacing<S: Sleeper> {
    sleeper: S,
    cancel: Arc<AtomicBool>,
    scrobble_delay: Duration,
    photo_delay: Duration,
    video_delay: Duration,
    max_rate_limit_waits: u32,
    pub rate_limit_waits: usize,
    pub unavailable: usize,
}

impl<S: Sleeper> Pacing<S> {
    fn delay_for(&self, platform: Platform) -> Duration {
        match platform {
            Platform::ScrobbleService => self.scrobble_delay,
            Platform::PhotoSocial => self.photo_delay,
            Platform::VideoPlatform => self.video_delay,
        }
    }

    fn pause(&mut self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.load(Ordering::SeqCst);
        }
        self.sleeper.sleep(duration, &self.cancel)
    }

    /// Run `op` against `collector`, retrying the same call after each
    /// rate-limit wait. Gives up after `max_rate_limit_waits` consecutive waits.
    /// Every finished call, including a skipped one, is followed by the
    /// platform's delay.
    pub fn call<T>(
        &mut self,
        collector: &dyn PlatformCollector,
        what: &str,
        op: impl Fn(&dyn PlatformCollector) -> std::result::Result<T, CollectError>,
    ) -> CallResult<T> {
        let platform = collector.platform();
        let delay = self.delay_for(platform);
        let mut waits = 0;

        loop {
            match op(collector) {
                Ok(value) => {
                    self.pause(delay);
                    return CallResult::Done(value);
                }
                Err(CollectError::RateLimited { retry_after }) => {
                    if waits >= self.max_rate_limit_waits {
                        log::warn!("{platform}: still rate limited after {waits} waits, skipping {what}");
                        self.unavailable += 1;
                        if !self.pause(delay) {
                            return CallResult::Cancelled;
                        }
                        return CallResult::Unavailable;
                    }
                    waits += 1;
                    self.rate_limit_waits += 1;
                    log::warn!(
                        "{platform}: rate limited on {what}, waiting {}s ({waits}/{})",
                        retry_after.as_secs(),
                        self.max_rate_limit_waits
                    );
                    if !self.pause(retry_after) {
                        return CallResult::Cancelled;
                    }
                }
                Err(CollectError::Unavailable(reason)) => {
                    log::warn!("{platform}: skipping {what}: {reason}");
                    self.unavailable += 1;
                    if !self.pause(delay) {
                        return CallResult::Cancelled;
                    }
                    return CallResult::Unavailable;
                }
            }
        }
    }
}

/// Photo lookup terms, most trusted first: a verified handle alone;
/// otherwise handles named in the channel description, the stored
/// handle, then the artist name.
fn photo_terms(artist: &CanonicalArtist) -> Vec<String> {
    if artist.verification_status == VerificationStatus::Verified {
        if let Some(handle) = artist.photo_handle() {
            return vec![format!("@{handle}")];
        }
    }

    let mut terms: Vec<String> = artist
        .video
        .as_ref()
        .and_then(|v| v.description.as_deref())
        .map(extract_handles)
        .unwrap_or_default()
        .into_iter()
        .map(|h| format!("@{h}"))
        .collect();
    terms.extend(artist.photo_handle().map(|h| format!("@{h}")));
    terms.push(artist.artist_name.clone());

    let mut seen = HashSet::new();
    terms.retain(|t| seen.insert(t.to_lowercase()));
    terms
}

pub struct Orchestrator<'a, S: Sleeper> {
    db: &'a Database,
    collectors: Collectors,
    store: CheckpointStore,
    settings: OrchestratorSettings,
    pacing: Pacing<S>,
    cancel: Arc<AtomicBool>,
    resolver: Resolver,
    report: RunReport,
}

impl<'a, S: Sleeper> Orchestrator<'a, S> {
    pub fn new(
        db: &'a Database,
        collectors: Collectors,
        store: CheckpointStore,
        settings: OrchestratorSettings,
        sleeper: S,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let pacing = Pacing {
            sleeper,
            cancel: Arc::clone(&cancel),
            scrobble_delay: settings.scrobble_delay,
            photo_delay: settings.photo_delay,
            video_delay: settings.video_delay,
            max_rate_limit_waits: settings.max_rate_limit_waits,
            rate_limit_waits: 0,
            unavailable: 0,
        };
        Self {
            db,
            collectors,
            store,
            resolver: Resolver::new(settings.review_threshold),
            settings,
            pacing,
            cancel,
            report: RunReport::default(),
        }
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            rate_limit_waits: self.pacing.rate_limit_waits,
            unavailable: self.pacing.unavailable,
            ..self.report.clone()
        }
    }

    pub fn sleeper(&self) -> &S {
        &self.pacing.sleeper
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Checkpoint to start from. A missing checkpoint (or `fresh`) starts the
    /// pass after the newest one recorded in the store; a corrupt one is fatal.
    pub fn starting_checkpoint(&self, fresh: bool) -> Result<Checkpoint> {
        if fresh {
            self.store.clear()?;
        } else if let Some(cp) = self.store.load()? {
            match &cp.discovery {
                Some(d) => log::info!(
                    "Resuming pass {} at {} item {}, candidate {} of {}",
                    cp.pass,
                    cp.stage,
                    cp.cursor + 1,
                    d.done + 1,
                    d.candidates.len()
                ),
                None => log::info!("Resuming pass {} at {} item {}", cp.pass, cp.stage, cp.cursor + 1),
            }
            return Ok(cp);
        }
        let pass = self.db.max_pass()? + 1;
        log::info!("Starting fresh at pass {pass}");
        Ok(Checkpoint::fresh(pass))
    }

    /// Run passes until done (single-shot), or until cancelled (continuous).
    pub fn run(&mut self, fresh: bool) -> Result<RunOutcome> {
        let mut cp = self.starting_checkpoint(fresh)?;
        self.store.save(&cp)?;

        loop {
            if self.run_pass(&mut cp)? == RunOutcome::Interrupted {
                log::info!("Interrupted; checkpoint at pass {} {} item {}", cp.pass, cp.stage, cp.cursor);
                return Ok(RunOutcome::Interrupted);
            }
            self.report.passes_completed += 1;
            log::info!("Pass {} complete", cp.pass);
            cp.complete_pass();
            self.store.save(&cp)?;

            if self.settings.mode == RunMode::Once {
                return Ok(RunOutcome::Completed);
            }
            log::info!("Next pass in {}s", self.settings.pass_interval.as_secs());
            if !self.pacing.pause(self.settings.pass_interval) {
                return Ok(RunOutcome::Interrupted);
            }
        }
    }

    fn run_pass(&mut self, cp: &mut Checkpoint) -> Result<RunOutcome> {
        loop {
            if self.run_stage(cp)? == Step::Cancelled {
                return Ok(RunOutcome::Interrupted);
            }
            match cp.stage.next() {
                Some(next) => {
                    cp.enter(next);
                    self.store.save(cp)?;
                }
                None => return Ok(RunOutcome::Completed),
            }
        }
    }

    fn run_stage(&mut self, cp: &mut Checkpoint) -> Result<Step> {
        let stage = cp.stage;
        let work = match stage {
            Stage::DiscoverArtists => Vec::new(),
            _ => self.db.pass_work_set(cp.pass)?,
        };
        let total = match stage {
            Stage::DiscoverArtists => self.settings.criteria.len(),
            _ => work.len(),
        };
        if cp.cursor > total {
            log::warn!("{stage}: checkpoint cursor {} beyond {total} items, stage treated as done", cp.cursor);
            cp.advance(total);
        }
        log::info!("{stage}: {} of {total} items remaining", total - cp.cursor);

        let pb = self.progress_bar(stage.as_str(), total, cp.cursor);
        for idx in cp.cursor..total {
            if self.cancelled() {
                pb.abandon();
                return Ok(Step::Cancelled);
            }
            let step = match stage {
                Stage::DiscoverArtists => {
                    let criterion = self.settings.criteria[idx].clone();
                    pb.set_message(criterion.to_string());
                    self.discover_criterion(cp, &criterion)?
                }
                Stage::CollectPhotoSocial => self.collect_slot(Platform::PhotoSocial, &work[idx])?,
                Stage::CollectVideo => self.collect_slot(Platform::VideoPlatform, &work[idx])?,
                Stage::VerifyHandles => self.verify_handles(&work[idx])?,
                Stage::MergeAndPersist => self.persist(&work[idx])?,
            };
            if step == Step::Cancelled {
                pb.abandon();
                return Ok(Step::Cancelled);
            }
            cp.advance(idx + 1);
            self.store.save(cp)?;
            pb.inc(1);
        }
        pb.finish_with_message(format!("{stage} done"));
        Ok(Step::Done)
    }

    fn progress_bar(&self, prefix: &'static str, total: usize, done: usize) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_prefix(prefix);
        pb.set_position(done as u64);
        pb
    }

    /// Discover candidates for one criterion, then refine, resolve and merge
    /// them one at a time. The candidate list and a sub-cursor live in the
    /// checkpoint, which is saved after every candidate.
    fn discover_criterion(&mut self, cp: &mut Checkpoint, criterion: &DiscoveryCriterion) -> Result<Step> {
        if cp.discovery.is_none() {
            let candidates = match self.discover_candidates(criterion) {
                CallResult::Done(found) => found,
                CallResult::Unavailable => Vec::new(),
                CallResult::Cancelled => return Ok(Step::Cancelled),
            };
            self.report.candidates_discovered += candidates.len();
            cp.begin_discovery(candidates);
            self.store.save(cp)?;
        }

        let (candidates, start) = match &cp.discovery {
            Some(progress) => (progress.candidates.clone(), progress.done),
            None => return Ok(Step::Done),
        };
        for candidate in candidates.into_iter().skip(start) {
            if self.cancelled() {
                return Ok(Step::Cancelled);
            }
            if self.absorb_candidate(cp.pass, criterion, candidate)? == Step::Cancelled {
                return Ok(Step::Cancelled);
            }
            cp.candidate_done();
            self.store.save(cp)?;
        }
        Ok(Step::Done)
    }

    /// Scrobble chart entries, plus YouTube channels not already on the chart
    /// when video discovery is on.
    fn discover_candidates(&mut self, criterion: &DiscoveryCriterion) -> CallResult<Vec<CandidateProfile>> {
        let label = criterion.to_string();
        let mut candidates = match self.pacing.call(&*self.collectors.scrobble, &label, |c| c.discover(criterion)) {
            CallResult::Done(found) => found,
            CallResult::Unavailable => Vec::new(),
            CallResult::Cancelled => return CallResult::Cancelled,
        };
        if !self.settings.video_discovery {
            return CallResult::Done(candidates);
        }

        match self.pacing.call(&*self.collectors.video, &label, |c| c.discover(criterion)) {
            CallResult::Done(channels) => {
                let mut seen: HashSet<String> = candidates.iter().map(|c| normalize_name(&c.source_name)).collect();
                candidates.extend(channels.into_iter().filter(|c| seen.insert(normalize_name(&c.source_name))));
            }
            CallResult::Unavailable => {}
            CallResult::Cancelled => return CallResult::Cancelled,
        }
        CallResult::Done(candidates)
    }

    /// Refine one candidate with a scrobble lookup and fold it into the store.
    ///
    /// A chart entry whose lookup fails is skipped. A channel found by video
    /// discovery is kept on its own when the scrobble service does not know it.
    fn absorb_candidate(&mut self, pass: u64, criterion: &DiscoveryCriterion, candidate: CandidateProfile) -> Result<Step> {
        let name = candidate.source_name.clone();
        let looked_up = self.pacing.call(&*self.collectors.scrobble, &name, |c| c.lookup(&name));

        let profiles = match (candidate.platform, looked_up) {
            (_, CallResult::Cancelled) => return Ok(Step::Cancelled),
            (Platform::VideoPlatform, CallResult::Done(Some(full))) => vec![full, candidate],
            (Platform::VideoPlatform, _) => vec![candidate],
            (_, CallResult::Done(Some(full))) => vec![full],
            (_, CallResult::Done(None)) => vec![candidate],
            (_, CallResult::Unavailable) => return Ok(Step::Done),
        };
        self.absorb(pass, criterion.genre_context(), &name, &profiles)?;
        Ok(Step::Done)
    }

    /// Resolve a discovered name and fold its profiles into it.
    fn absorb(&mut self, pass: u64, genre: &str, name: &str, profiles: &[CandidateProfile]) -> Result<()> {
        let seen_at = profiles.first().map_or_else(Utc::now, |p| p.collected_at);
        let Some(resolution) = self.resolver.resolve(self.db, name, genre, seen_at)? else {
            log::debug!("Ignoring candidate with empty name {name:?}");
            return Ok(());
        };
        let is_new = resolution.is_new();
        let mut artist = resolution.into_artist();

        for profile in profiles {
            self.fold(&mut artist, profile);
        }
        artist.last_seen_pass = pass;
        self.db.upsert_artist(&artist)?;

        if is_new {
            self.report.new_artists += 1;
            self.report.review_flags += self.resolver.flag_near_duplicates(self.db, &artist)?;
        }
        Ok(())
    }

    /// Merge one profile, counting the outcome. `false` on a merge error.
    fn fold(&mut self, artist: &mut CanonicalArtist, profile: &CandidateProfile) -> bool {
        match merge(artist, profile) {
            Ok(outcome) => {
                self.report.profiles_merged += 1;
                if outcome.slot_was_empty {
                    self.report.slots_filled += 1;
                    log::debug!("{}: first {} profile", artist.artist_name, outcome.platform);
                }
                if outcome.handle_changed {
                    log::info!("{}: photo handle changed, verification reset", artist.artist_name);
                }
                true
            }
            Err(e) => {
                log::warn!("{e}");
                self.report.merge_errors += 1;
                false
            }
        }
    }

    /// Fetch one platform slot for a stored artist, trying each lookup term
    /// until one yields a profile.
    fn collect_slot(&mut self, platform: Platform, artist_id: &str) -> Result<Step> {
        let Some(mut artist) = self.db.get_artist(artist_id)? else {
            log::warn!("{artist_id} vanished from the store, skipping");
            return Ok(Step::Done);
        };

        let (collector, terms) = match platform {
            Platform::PhotoSocial => (&*self.collectors.photo, photo_terms(&artist)),
            Platform::VideoPlatform => (&*self.collectors.video, vec![artist.artist_name.clone()]),
            Platform::ScrobbleService => (&*self.collectors.scrobble, vec![artist.artist_name.clone()]),
        };

        for term in &terms {
            let profile = match self.pacing.call(collector, &artist.artist_name, |c| c.lookup(term)) {
                CallResult::Done(Some(profile)) => profile,
                CallResult::Done(None) => continue,
                CallResult::Unavailable => return Ok(Step::Done),
                CallResult::Cancelled => return Ok(Step::Cancelled),
            };
            if self.fold(&mut artist, &profile) {
                self.db.upsert_artist(&artist)?;
            }
            return Ok(Step::Done);
        }
        log::debug!("{platform}: no profile for {}", artist.artist_name);
        Ok(Step::Done)
    }

    /// Cross-check an unverified photo handle against the video channel text.
    fn verify_handles(&mut self, artist_id: &str) -> Result<Step> {
        let Some(mut artist) = self.db.get_artist(artist_id)? else {
            return Ok(Step::Done);
        };
        let eligible = artist.video.is_some()
            && artist.photo.is_some()
            && artist.verification_status == VerificationStatus::Unverified;
        if !eligible {
            return Ok(Step::Done);
        }

        let name = artist.artist_name.clone();
        let text = match self.pacing.call(&*self.collectors.video, &name, |c| c.lookup(&name)) {
            CallResult::Done(Some(profile)) => profile.text("description").map(str::to_string),
            CallResult::Done(None) | CallResult::Unavailable => None,
            CallResult::Cancelled => return Ok(Step::Cancelled),
        };

        match verify_artist(&mut artist, text.as_deref()) {
            VerifyOutcome::Verified => self.report.verified += 1,
            VerifyOutcome::Rejected => self.report.rejected += 1,
            VerifyOutcome::Inconclusive => {
                self.report.inconclusive += 1;
                return Ok(Step::Done);
            }
        }
        self.db.upsert_artist(&artist)?;
        Ok(Step::Done)
    }

    /// Recompute quality and publish the record to the sink.
    fn persist(&mut self, artist_id: &str) -> Result<Step> {
        let Some(mut artist) = self.db.get_artist(artist_id)? else {
            return Ok(Step::Done);
        };
        refresh_quality(&mut artist);
        self.db.upsert_artist(&artist)?;
        self.db.publish_artist(&artist)?;
        self.report.published += 1;
        Ok(Step::Done)
    }

    /// Fetch the top tracks of each artist and the best video for every
    /// track. Rows are upserted, so a rerun refreshes instead of duplicating.
    pub fn collect_tracks(&mut self, artist_ids: &[String], per_artist: u32) -> Result<RunOutcome> {
        let pb = self.progress_bar("TOP_TRACKS", artist_ids.len(), 0);
        for artist_id in artist_ids {
            if self.cancelled() {
                pb.abandon();
                return Ok(RunOutcome::Interrupted);
            }
            let Some(artist) = self.db.get_artist(artist_id)? else {
                log::warn!("{artist_id} vanished from the store, skipping");
                pb.inc(1);
                continue;
            };
            pb.set_message(artist.artist_name.clone());
            let name = artist.artist_name.as_str();

            let tracks = match self.pacing.call(&*self.collectors.scrobble, name, |c| c.top_tracks(name, per_artist)) {
                CallResult::Done(tracks) => tracks,
                CallResult::Unavailable => {
                    pb.inc(1);
                    continue;
                }
                CallResult::Cancelled => {
                    pb.abandon();
                    return Ok(RunOutcome::Interrupted);
                }
            };

            for track in &tracks {
                if self.cancelled() {
                    pb.abandon();
                    return Ok(RunOutcome::Interrupted);
                }
                let title = track.source_name.as_str();
                let video = match self.pacing.call(&*self.collectors.video, title, |c| c.track_video(name, title)) {
                    CallResult::Done(video) => video,
                    CallResult::Unavailable => None,
                    CallResult::Cancelled => {
                        pb.abandon();
                        return Ok(RunOutcome::Interrupted);
                    }
                };
                self.db.upsert_track(&track_record(artist_id, track, video.as_ref()))?;
                self.report.tracks_collected += 1;
            }
            log::debug!("{name}: {} tracks", tracks.len());
            pb.inc(1);
        }
        pb.finish_with_message("tracks done");
        Ok(RunOutcome::Completed)
    }
}
