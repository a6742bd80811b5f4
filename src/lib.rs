//! `jira-cache` mirrors JIRA issues into a local SQLite cache, derives
//! normalized reporting tables from the raw payloads, and renders
//! hierarchical issue views.

/// Raw issue cache and derived reporting tables over SQLite.
pub mod cache;
/// Runtime configuration loading and validation.
pub mod config;
/// JIRA search client with rate-limit retry.
pub mod jira;
/// Logging helpers used throughout the crate.
pub mod logging;
/// Projection of raw payloads into the derived tables.
pub mod normalize;
/// Progress reporting channel (text or JSON lines).
pub mod progress;
/// Hierarchical issue views and canned filters.
pub mod report;
/// Incremental high-watermark synchronization.
pub mod sync;
