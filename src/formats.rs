use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A media item declared by the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub source_id: String,
    pub source_url: String,
}

/// A media item held by the media store. One per distinct `source_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedAsset {
    pub canonical_id: u64,
    pub canonical_url: String,
    pub source_url: String,
    pub filename: String,
    pub sha256: String,
}

/// A blog post as extracted from the export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub title: String,
    pub raw_html: String,
    pub excerpt: String,
    pub slug: String,
    pub date: String,
    pub status: String,
    pub author_ref: String,
    pub categories: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub featured_asset_source_id: Option<String>,
    /// Path the post was served under on the legacy site.
    pub source_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    DryRun,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub status: OutcomeStatus,
    pub title: String,
    pub slug: String,
    pub source_path: String,
    pub target_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_id: Option<u64>,
    pub discovered_link_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFailure {
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owning_post: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFailure {
    pub title: String,
    pub slug: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// An internal link rewritten from the legacy blog to the new site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub post_slug: String,
    pub original: String,
    pub rewritten: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub eligible: usize,
    pub skipped: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub dry_run: usize,
    pub failed: usize,
    pub assets_imported: usize,
    pub assets_reused: usize,
    pub asset_failures: usize,
    pub stopped_early: bool,
}
