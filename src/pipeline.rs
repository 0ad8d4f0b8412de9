use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::blocks;
use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};
use crate::extract::ExportItem;
use crate::formats::{
    AssetFailure, LinkRecord, OutcomeRecord, OutcomeStatus, PostFailure, PostRecord, RunSummary,
};
use crate::importer::AssetImporter;
use crate::repository::{AuthorDirectory, ContentRepository, PostDraft, Taxonomy};
use crate::resolver::AssetResolver;
use crate::rewrite::ContentRewriter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Resolve, fetch and transform, but write nothing to the repository.
    pub dry_run: bool,
    /// Eligible posts to pass over before transforming any.
    pub offset: usize,
    /// Maximum number of posts to transform.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub outcomes: Vec<OutcomeRecord>,
    pub links: Vec<LinkRecord>,
    pub post_failures: Vec<PostFailure>,
    pub asset_failures: Vec<AssetFailure>,
    pub summary: RunSummary,
}

/// A post that made it through rewriting and block conversion.
struct Converted {
    content: String,
    links: Vec<LinkRecord>,
    featured_asset: Option<u64>,
}

pub struct Pipeline {
    config: MigrationConfig,
    options: RunOptions,
    rewriter: ContentRewriter,
    importer: AssetImporter,
    repository: Box<dyn ContentRepository>,
    authors: Box<dyn AuthorDirectory>,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        config: &MigrationConfig,
        options: RunOptions,
        importer: AssetImporter,
        repository: Box<dyn ContentRepository>,
        authors: Box<dyn AuthorDirectory>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            config: config.clone(),
            options,
            rewriter: ContentRewriter::new(config)?,
            importer,
            repository,
            authors,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Checked between posts; setting it ends the run after the current post.
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn run(&mut self, items: &[ExportItem]) -> RunReport {
        let resolver = AssetResolver::from_items(items);
        tracing::info!(attachments = resolver.len(), "resolved attachments");

        let posts: Vec<PostRecord> = items
            .iter()
            .filter(|item| item.is_post())
            .map(ExportItem::to_post_record)
            .collect();

        let mut report = RunReport::default();
        report.summary.eligible = posts.len();

        for (idx, post) in posts.iter().enumerate() {
            if idx < self.options.offset {
                report.summary.skipped += 1;
                continue;
            }
            if self
                .options
                .limit
                .is_some_and(|limit| report.summary.processed >= limit)
            {
                report.summary.skipped += posts.len() - idx;
                break;
            }
            if self.stop.load(Ordering::Relaxed) {
                tracing::warn!(remaining = posts.len() - idx, "stop requested; ending run early");
                report.summary.skipped += posts.len() - idx;
                report.summary.stopped_early = true;
                break;
            }

            report.summary.processed += 1;
            self.process(post, &resolver, &mut report);
        }

        report.asset_failures = self.importer.failures().to_vec();
        report.summary.assets_imported = self.importer.imported_count();
        report.summary.assets_reused = self.importer.reused_count();
        report.summary.asset_failures = report.asset_failures.len();
        report
    }

    fn process(&mut self, post: &PostRecord, resolver: &AssetResolver, report: &mut RunReport) {
        let target_path = self.config.post_path(&post.slug);
        let outcome = |status, created_id, discovered_link_count| OutcomeRecord {
            status,
            title: post.title.clone(),
            slug: post.slug.clone(),
            source_path: post.source_path.clone(),
            target_path: target_path.clone(),
            created_id,
            discovered_link_count,
        };

        let result = self
            .convert(post, resolver)
            .and_then(|converted| self.commit(post, converted));

        match result {
            Ok((created_id, links)) => {
                let status = if self.options.dry_run {
                    report.summary.dry_run += 1;
                    OutcomeStatus::DryRun
                } else {
                    report.summary.succeeded += 1;
                    OutcomeStatus::Success
                };
                tracing::info!(slug = %post.slug, ?status, links = links.len(), "post migrated");
                report.outcomes.push(outcome(status, created_id, links.len()));
                report.links.extend(links);
            }
            Err(err) => {
                tracing::warn!(slug = %post.slug, error = %err, "post failed");
                report.summary.failed += 1;
                report.outcomes.push(outcome(OutcomeStatus::Failed, None, 0));
                report.post_failures.push(PostFailure {
                    title: post.title.clone(),
                    slug: post.slug.clone(),
                    reason: err.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn convert(&mut self, post: &PostRecord, resolver: &AssetResolver) -> Result<Converted> {
        validate(post)?;
        let rewritten = self.rewriter.rewrite(post, resolver, &mut self.importer);
        Ok(Converted {
            content: blocks::transform(&rewritten.html),
            links: rewritten.links,
            featured_asset: rewritten.featured.map(|asset| asset.canonical_id),
        })
    }

    fn commit(
        &mut self,
        post: &PostRecord,
        converted: Converted,
    ) -> Result<(Option<u64>, Vec<LinkRecord>)> {
        if self.options.dry_run {
            tracing::debug!(slug = %post.slug, bytes = converted.content.len(), "dry run: post not written");
            return Ok((None, converted.links));
        }

        let author_id = self
            .authors
            .find_by_identity(&post.author_ref)
            .unwrap_or(self.config.default_author);
        let draft = PostDraft {
            title: post.title.trim().to_owned(),
            slug: post.slug.clone(),
            content: converted.content,
            excerpt: post.excerpt.trim().to_owned(),
            date: post.date.clone(),
            status: post.status.clone(),
            author_id,
            source_path: post.source_path.clone(),
        };

        let id = self.repository.create_or_update(&draft)?;
        let categories: Vec<String> = post.categories.iter().cloned().collect();
        self.repository
            .assign_terms(id, &categories, Taxonomy::Category)?;
        let tags: Vec<String> = post.tags.iter().cloned().collect();
        self.repository.assign_terms(id, &tags, Taxonomy::Tag)?;
        if let Some(asset_id) = converted.featured_asset {
            self.repository.set_primary_asset(id, asset_id)?;
        }

        Ok((Some(id), converted.links))
    }
}

fn validate(post: &PostRecord) -> Result<()> {
    let missing = if post.title.trim().is_empty() {
        Some("missing title")
    } else if post.raw_html.trim().is_empty() {
        Some("missing body")
    } else {
        None
    };
    match missing {
        Some(reason) => Err(MigrateError::PostValidationFailure {
            slug: post.slug.clone(),
            reason: reason.to_owned(),
        }),
        None => Ok(()),
    }
}
