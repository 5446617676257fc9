pub mod checkpoint;
pub mod config;
pub mod db;
pub mod export;
pub mod merge;
pub mod orchestrator;
pub mod platform;
pub mod resolver;
pub mod scoring;
pub mod verify;

/// Genre given to artists discovered without a genre criterion
pub const UNKNOWN_GENRE: &str = "unknown";

/// Application name for XDG paths
pub const APP_NAME: &str = "artistscout";
