use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use artistscout::checkpoint::{CheckpointError, CheckpointStore, Stage};
use artistscout::config::{AppConfig, RunMode};
use artistscout::db::models::{ArtistTrack, CanonicalArtist};
use artistscout::export::ExportFormat;
use artistscout::orchestrator::{
    Collectors, Orchestrator, OrchestratorError, OrchestratorSettings, RunOutcome, RunReport, ThreadSleeper,
};
use artistscout::platform::photo::InstagramCollector;
use artistscout::platform::scrobble::LastFmCollector;
use artistscout::platform::video::YouTubeCollector;
use artistscout::platform::{DisabledCollector, Platform};
use artistscout::scoring::{GenreSummary, ScoreFilter, ScoredArtist, insights, score_all};

#[derive(Parser)]
#[command(name = "artistscout", version, about = "Emerging-artist discovery across Last.fm, Instagram and YouTube")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Path to the config file (defaults to ~/.config/artistscout/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
}

impl FormatArg {
    fn format(&self) -> ExportFormat {
        match self {
            Self::Csv => ExportFormat::Csv,
            Self::Json => ExportFormat::JsonLines,
        }
    }
}

#[derive(clap::Args)]
struct FilterArgs {
    /// Only this genre (repeatable; defaults to the configured allow-list)
    #[arg(long = "genre")]
    genres: Vec<String>,

    /// Minimum Last.fm listeners
    #[arg(long)]
    min_listeners: Option<i64>,

    /// Maximum Last.fm listeners
    #[arg(long)]
    max_listeners: Option<i64>,

    /// Minimum data quality score (0-1)
    #[arg(long)]
    min_quality: Option<f64>,

    /// Skip filtering entirely and rank every published artist
    #[arg(long)]
    all: bool,
}

impl FilterArgs {
    fn apply(&self, base: &ScoreFilter) -> ScoreFilter {
        if self.all {
            return ScoreFilter {
                genres: Vec::new(),
                min_listeners: 0,
                max_listeners: i64::MAX,
                min_followers: 0,
                max_followers: i64::MAX,
                min_engagement: f64::NEG_INFINITY,
                min_quality: 0.0,
            };
        }
        let mut filter = base.clone();
        if !self.genres.is_empty() {
            filter.genres = self.genres.iter().map(|g| g.to_lowercase()).collect();
        }
        if let Some(v) = self.min_listeners {
            filter.min_listeners = v;
        }
        if let Some(v) = self.max_listeners {
            filter.max_listeners = v;
        }
        if let Some(v) = self.min_quality {
            filter.min_quality = v;
        }
        filter
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run collection passes (discover, photo, video, verify, persist)
    Collect {
        /// Run a single pass, then exit
        #[arg(long, conflicts_with = "continuous")]
        once: bool,

        /// Keep running passes until interrupted
        #[arg(long)]
        continuous: bool,

        /// Discard any checkpoint and start a new pass
        #[arg(long)]
        fresh: bool,
    },

    /// Show the checkpoint and collection progress
    Status,

    /// Rank published artists by priority score
    Score {
        #[command(flatten)]
        filter: FilterArgs,

        /// Number of results
        #[arg(short = 'n', long, default_value = "25")]
        limit: usize,
    },

    /// Show everything known about an artist
    Show {
        /// Artist name (substring match)
        name: String,
    },

    /// List near-duplicate names queued for manual review
    Reviews,

    /// Export the ranked relation for the dashboard
    Export {
        #[arg(long, value_enum, default_value = "csv")]
        format: FormatArg,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Scouting report: top underrated artists, per-genre analysis, high-growth list
    Insights {
        #[command(flatten)]
        filter: FilterArgs,

        /// Artists in the top list
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,

        /// Also write top_artists.csv, genre_analysis.csv and high_growth.csv here
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Collect top tracks and their videos for the highest-ranked artists
    Tracks {
        #[command(flatten)]
        filter: FilterArgs,

        /// Number of top-ranked artists
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Tracks per artist (defaults to the configured value)
        #[arg(long)]
        per_artist: Option<u32>,
    },

    /// Show store statistics
    Stats,
}

/// High-growth artists listed by `insights`.
const HIGH_GROWTH_LIMIT: usize = 30;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = AppConfig::load(cli.config.as_deref());

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(artistscout::config::default_db_path);
    log::info!("Database: {}", db_path.display());
    let checkpoint_path = config
        .checkpoint_path
        .clone()
        .unwrap_or_else(artistscout::config::default_checkpoint_path);

    let db = artistscout::db::Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Collect { once, continuous, fresh } => {
            if once {
                config.collection.mode = RunMode::Once;
            } else if continuous {
                config.collection.mode = RunMode::Continuous;
            }

            let collectors = build_collectors(&config)?;
            let cancel = interrupt_flag()?;

            let store = CheckpointStore::new(&checkpoint_path);
            log::info!("Checkpoint: {}", checkpoint_path.display());
            let mut orchestrator = Orchestrator::new(
                &db,
                collectors,
                store,
                OrchestratorSettings::from_config(&config),
                ThreadSleeper,
                cancel,
            );

            let outcome = match orchestrator.run(fresh) {
                Ok(outcome) => outcome,
                Err(OrchestratorError::Checkpoint(
                    e @ (CheckpointError::Corrupt { .. } | CheckpointError::UnsupportedVersion { .. }),
                )) => {
                    anyhow::bail!("{e}\nRefusing to resume; rerun with `artistscout collect --fresh` to start a new pass.")
                }
                Err(e) => return Err(e).context("Collection failed"),
            };
            print_report(&orchestrator.report());
            match outcome {
                RunOutcome::Completed => println!("Collection complete."),
                RunOutcome::Interrupted => {
                    println!("Interrupted. Run `artistscout collect` again to resume.")
                }
            }
        }

        Commands::Status => {
            let store = CheckpointStore::new(&checkpoint_path);
            match store.load() {
                Ok(Some(cp)) => {
                    println!("Checkpoint: {}", checkpoint_path.display());
                    println!("  Pass:     {}", cp.pass);
                    println!("  Stage:    {}", cp.stage);
                    println!("  Done:     {} items", cp.cursor);
                    if let Some(d) = &cp.discovery {
                        println!("            {} of {} candidates in the current item", d.done, d.candidates.len());
                    }
                    println!("  Updated:  {}", cp.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
                    let remaining = match cp.stage {
                        Stage::DiscoverArtists => config.criteria.len(),
                        _ => db.pass_work_set(cp.pass).context("Query failed")?.len(),
                    }
                    .saturating_sub(cp.cursor);
                    println!("  Left:     {remaining} items in this stage");
                }
                Ok(None) => println!("No checkpoint; the next run starts a fresh pass."),
                Err(e) => println!("Checkpoint unusable: {e}"),
            }
            println!();
            let stats = db.stats().context("Failed to get stats")?;
            println!(
                "{} artists, {} published, {} pending name reviews",
                stats.total_artists, stats.published, stats.pending_reviews
            );
        }

        Commands::Score { filter, limit } => {
            let filter = filter.apply(&config.scoring);
            let rows = db.sink_rows().context("Query failed")?;
            let ranked = score_all(&rows, &filter);

            if ranked.is_empty() {
                println!("No artists pass the filter. Run `artistscout collect` or relax the filter.");
                return Ok(());
            }

            let shown = ranked.len().min(limit);
            println!("Top {shown} of {} artists by priority:", ranked.len());
            println!();
            print_score_table(&ranked[..shown]);
        }

        Commands::Show { name } => {
            let found = db.search_artists(&name, 10).context("Search failed")?;
            if found.is_empty() {
                println!("No artist matching \"{name}\".");
                return Ok(());
            }
            for (i, artist) in found.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_artist(artist);
                let tracks = db.tracks_for_artist(&artist.artist_id).context("Query failed")?;
                if !tracks.is_empty() {
                    print_tracks(&tracks);
                }
            }
        }

        Commands::Reviews => {
            let reviews = db.name_reviews().context("Query failed")?;
            if reviews.is_empty() {
                println!("No near-duplicate names queued.");
                return Ok(());
            }
            println!("{} possible duplicates (never merged automatically):", reviews.len());
            println!();
            println!("{:<30} {:<30} {:>6}  {:<19}", "Artist", "Similar to", "Sim", "Flagged");
            println!("{}", "-".repeat(89));
            for r in &reviews {
                println!(
                    "{:<30} {:<30} {:>6.3}  {:<19}",
                    truncate(&r.artist_name, 30),
                    truncate(&r.similar_artist_name, 30),
                    r.similarity,
                    r.flagged_at
                );
            }
        }

        Commands::Export { format, output, filter } => {
            let filter = filter.apply(&config.scoring);
            let rows = db.sink_rows().context("Query failed")?;
            let ranked = score_all(&rows, &filter);
            let format = format.format();
            let n = artistscout::export::export_rows(&ranked, &output, format)
                .with_context(|| format!("Failed to export to {}", output.display()))?;
            println!("Exported {n} artists as {} to {}", format.name(), output.display());
        }

        Commands::Insights { filter, top, output_dir } => {
            let filter = filter.apply(&config.scoring);
            let rows = db.sink_rows().context("Query failed")?;
            let ranked = score_all(&rows, &filter);
            if ranked.is_empty() {
                println!("No artists pass the filter. Run `artistscout collect` or relax the filter.");
                return Ok(());
            }
            let report = insights(&ranked, top, HIGH_GROWTH_LIMIT);

            println!("Top {} underrated artists:", report.top.len());
            println!();
            print_score_table(report.top);
            println!();

            println!("Key insights");
            println!("  Artists ranked:          {}", ranked.len());
            println!(
                "  Avg followers/listeners: {}x (top {})",
                fmt_float(report.avg_underrated_ratio, 2),
                report.top.len()
            );
            if let Some(a) = report.most_underrated {
                println!(
                    "  Most underrated:         {} ({}x)",
                    a.artist_name,
                    fmt_float(a.underrated_ratio, 2)
                );
            }
            println!("  High growth potential:   {}", report.high_growth.len());
            println!();

            print_genre_table(&report.genres);

            if !report.high_growth.is_empty() {
                println!();
                println!("High growth potential:");
                for a in &report.high_growth {
                    println!(
                        "  {:<30} {:>9} listeners  {:>9} followers  {:>6}x",
                        truncate(&a.artist_name, 30),
                        fmt_int(a.lastfm_listeners),
                        fmt_int(a.instagram_followers),
                        fmt_float(a.underrated_ratio, 2)
                    );
                }
            }

            if let Some(dir) = output_dir {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                let csv = artistscout::export::ExportFormat::Csv;
                artistscout::export::export_rows(report.top, &dir.join("top_artists.csv"), csv)?;
                artistscout::export::export_rows(&report.genres, &dir.join("genre_analysis.csv"), csv)?;
                artistscout::export::export_rows(&report.high_growth, &dir.join("high_growth.csv"), csv)?;
                println!();
                println!("Wrote top_artists.csv, genre_analysis.csv and high_growth.csv to {}", dir.display());
            }
        }

        Commands::Tracks { filter, limit, per_artist } => {
            let filter = filter.apply(&config.scoring);
            let rows = db.sink_rows().context("Query failed")?;
            let ids: Vec<String> = score_all(&rows, &filter)
                .into_iter()
                .take(limit)
                .map(|a| a.artist_id)
                .collect();
            if ids.is_empty() {
                println!("No artists pass the filter. Run `artistscout collect` or relax the filter.");
                return Ok(());
            }
            let per_artist = per_artist.unwrap_or(config.collection.tracks_per_artist);

            let collectors = build_collectors(&config)?;
            let cancel = interrupt_flag()?;
            let mut orchestrator = Orchestrator::new(
                &db,
                collectors,
                CheckpointStore::new(&checkpoint_path),
                OrchestratorSettings::from_config(&config),
                ThreadSleeper,
                cancel,
            );
            let outcome = orchestrator
                .collect_tracks(&ids, per_artist)
                .context("Track collection failed")?;
            let report = orchestrator.report();
            println!("Tracks stored:      {}", report.tracks_collected);
            if report.unavailable > 0 || report.rate_limit_waits > 0 {
                println!(
                    "Skipped:            {} unavailable, {} rate-limit waits",
                    report.unavailable, report.rate_limit_waits
                );
            }
            if outcome == RunOutcome::Interrupted {
                println!("Interrupted. Rerun to refresh the remaining artists.");
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Collection Statistics");
            println!("=====================");
            println!("Total artists:    {}", stats.total_artists);
            println!("With Last.fm:     {}", stats.with_scrobble);
            println!("With Instagram:   {}", stats.with_photo);
            println!("With YouTube:     {}", stats.with_video);
            println!("Verified:         {}", stats.verified);
            println!("Rejected:         {}", stats.rejected);
            println!("Published:        {}", stats.published);
            println!("Pending reviews:  {}", stats.pending_reviews);
            println!("Top tracks:       {}", stats.tracks);
            println!("Avg quality:      {:.3}", stats.avg_quality);
            println!();

            if !stats.genres.is_empty() {
                println!("Genres:");
                for (genre, count) in &stats.genres {
                    println!("  {:<24} {}", genre, count);
                }
            }
        }
    }

    Ok(())
}

/// Cancel flag raised by the first Ctrl-C; a second one exits at once.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            eprintln!("Second interrupt, exiting immediately");
            std::process::exit(130);
        }
        eprintln!("Interrupt received, finishing current item...");
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(cancel)
}

/// Wire up the platform adapters. Last.fm drives discovery, so it is required.
fn build_collectors(config: &AppConfig) -> Result<Collectors> {
    let Some(lastfm_key) = config.lastfm_api_key() else {
        anyhow::bail!("No Last.fm API key. Set LASTFM_API_KEY or [lastfm] api_key in the config file.");
    };

    let video: Box<dyn artistscout::platform::PlatformCollector> = match config.youtube_api_key() {
        Some(key) => Box::new(YouTubeCollector::new(key, &config.youtube)),
        None => {
            log::warn!("No YouTube API key; video collection and verification are disabled");
            Box::new(DisabledCollector::new(Platform::VideoPlatform, "no YouTube API key"))
        }
    };

    Ok(Collectors {
        scrobble: Box::new(LastFmCollector::new(lastfm_key, &config.lastfm)),
        photo: Box::new(InstagramCollector::new(&config.instagram)),
        video,
    })
}

fn print_report(report: &RunReport) {
    println!("Passes completed:   {}", report.passes_completed);
    println!("Candidates found:   {}", report.candidates_discovered);
    println!("New artists:        {}", report.new_artists);
    println!(
        "Profiles merged:    {} ({} new platform slots)",
        report.profiles_merged, report.slots_filled
    );
    println!(
        "Verification:       {} verified, {} rejected, {} inconclusive",
        report.verified, report.rejected, report.inconclusive
    );
    println!("Published:          {}", report.published);
    if report.review_flags > 0 {
        println!("Queued for review:  {} (see `artistscout reviews`)", report.review_flags);
    }
    if report.unavailable > 0 || report.rate_limit_waits > 0 || report.merge_errors > 0 {
        println!(
            "Skipped:            {} unavailable, {} rate-limit waits, {} merge errors",
            report.unavailable, report.rate_limit_waits, report.merge_errors
        );
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width - 3).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn fmt_int(v: Option<i64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string())
}

fn fmt_float(v: Option<f64>, precision: usize) -> String {
    v.map(|n| format!("{n:.precision$}")).unwrap_or_else(|| "-".to_string())
}

/// Print the ranked artists table.
fn print_score_table(rows: &[ScoredArtist]) {
    println!(
        "{:<25} {:<14} {:>9} {:>9} {:>6} {:>8} {:>3} {:<6} {:>5} {:>8}",
        "Artist", "Genre", "Listeners", "Followers", "Eng%", "Subs", "Plt", "Growth", "Qual", "Priority"
    );
    println!("{}", "-".repeat(104));

    for r in rows {
        println!(
            "{:<25} {:<14} {:>9} {:>9} {:>6} {:>8} {:>3} {:<6} {:>5.2} {:>8.3}",
            truncate(&r.artist_name, 25),
            truncate(&r.primary_genre, 14),
            fmt_int(r.lastfm_listeners),
            fmt_int(r.instagram_followers),
            fmt_float(r.instagram_engagement_rate, 2),
            fmt_int(r.youtube_subscribers),
            r.platform_count,
            r.growth_potential.as_str(),
            r.data_quality_score,
            r.priority_score,
        );
    }
}

fn print_genre_table(genres: &[GenreSummary]) {
    println!(
        "{:<16} {:>7} {:>8} {:>7} {:>6} {:>6} {:>10} {:>10}",
        "Genre", "Artists", "Priority", "Ratio", "Eng", "High", "Followers", "Listeners"
    );
    println!("{}", "-".repeat(78));
    for g in genres {
        println!(
            "{:<16} {:>7} {:>8.3} {:>7} {:>6} {:>6} {:>10} {:>10}",
            truncate(&g.primary_genre, 16),
            g.artist_count,
            g.avg_priority_score,
            fmt_float(g.avg_underrated_ratio, 2),
            fmt_float(g.avg_engagement_score, 1),
            g.high_growth_count,
            fmt_float(g.avg_instagram_followers, 0),
            fmt_float(g.avg_lastfm_listeners, 0),
        );
    }
}

fn print_tracks(tracks: &[ArtistTrack]) {
    println!("  Top tracks:");
    for t in tracks {
        println!(
            "    {:>2}. {:<32} {:>9} plays  {:>9} views  {}",
            t.rank,
            truncate(&t.track_name, 32),
            fmt_int(t.lastfm_playcount),
            fmt_int(t.youtube_views),
            t.youtube_video_id.as_deref().unwrap_or("-")
        );
    }
}

fn print_artist(a: &CanonicalArtist) {
    println!("{} [{}]", a.artist_name, a.artist_id);
    println!("  Genre:         {}", a.primary_genre);
    println!("  Verification:  {}", a.verification_status.as_str());
    println!("  Quality:       {:.3}", a.data_quality_score);
    println!("  First seen:    {}", a.first_seen_at.format("%Y-%m-%d"));
    println!("  Last pass:     {}", a.last_seen_pass);
    println!("  Collected:     {}", a.collection_date.format("%Y-%m-%d %H:%M"));

    match &a.scrobble {
        Some(s) => {
            println!("  Last.fm:");
            println!("    Listeners:   {}", fmt_int(s.listeners));
            println!("    Playcount:   {}", fmt_int(s.playcount));
            println!("    Plays/lstnr: {}", fmt_float(s.playcount_per_listener, 1));
            if !s.tags.is_empty() {
                println!("    Tags:        {}", s.tags.join(", "));
            }
        }
        None => println!("  Last.fm:       not collected"),
    }
    match &a.photo {
        Some(p) => {
            println!("  Instagram:     @{}", p.handle);
            println!("    Followers:   {}", fmt_int(p.followers));
            println!("    Posts:       {}", fmt_int(p.posts));
            println!("    Engagement:  {}%", fmt_float(p.engagement_rate, 2));
            println!("    Reels:       {}", fmt_int(p.reels_count));
        }
        None => println!("  Instagram:     not collected"),
    }
    match &a.video {
        Some(v) => {
            println!("  YouTube:       {}", v.channel_id);
            println!("    Subscribers: {}", fmt_int(v.subscribers));
            println!("    Views:       {}", fmt_int(v.total_views));
            println!("    Videos:      {}", fmt_int(v.video_count));
            println!("    Avg views:   {}", fmt_float(v.avg_views_per_video, 0));
        }
        None => println!("  YouTube:       not collected"),
    }
}
