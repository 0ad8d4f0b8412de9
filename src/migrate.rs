use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context as _;

use crate::cli::MigrateArgs;
use crate::config::MigrationConfig;
use crate::extract::{self, ExportItem};
use crate::fetch::HttpFetcher;
use crate::importer::AssetImporter;
use crate::media_store::{DryRunMediaStore, LocalFsMediaStore, MediaStore};
use crate::pipeline::{Pipeline, RunOptions, RunReport};
use crate::report;
use crate::repository::{ConfigAuthorDirectory, LocalFsRepository};

pub async fn run(args: MigrateArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let out_dir = PathBuf::from(&args.out);
    let options = RunOptions {
        dry_run: args.dry_run,
        offset: args.offset,
        limit: args.limit,
    };

    let items = extract::load_export(Path::new(&args.export))?;

    let stop = Arc::new(AtomicBool::new(false));
    let watcher = tokio::spawn({
        let stop = Arc::clone(&stop);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing the current post");
                stop.store(true, Ordering::Relaxed);
            }
        }
    });

    tracing::info!(
        out = %out_dir.display(),
        dry_run = options.dry_run,
        offset = options.offset,
        limit = ?options.limit,
        "starting migration"
    );
    let timeout = Duration::from_secs(args.timeout_secs);
    let result = tokio::task::block_in_place(|| {
        migrate_blocking(&config, options, timeout, &out_dir, &items, Arc::clone(&stop))
    });
    watcher.abort();
    let report = result?;

    report::write_all(&out_dir.join("report"), &report).context("write reports")?;

    let s = report.summary;
    println!(
        "posts: {} eligible, {} processed, {} succeeded, {} dry run, {} failed, {} skipped{}; assets: {} imported, {} reused, {} failed",
        s.eligible,
        s.processed,
        s.succeeded,
        s.dry_run,
        s.failed,
        s.skipped,
        if s.stopped_early { " (stopped early)" } else { "" },
        s.assets_imported,
        s.assets_reused,
        s.asset_failures,
    );
    Ok(())
}

fn load_config(args: &MigrateArgs) -> anyhow::Result<MigrationConfig> {
    let mut config = MigrationConfig::load(args.config.as_deref().map(Path::new))?;
    if let Some(origin) = &args.site_origin {
        config.site_origin = origin.clone();
    }
    if let Some(domain) = &args.legacy_domain {
        config.legacy_domain = domain.clone();
    }
    if let Some(domain) = &args.media_domain {
        config.media_domain = domain.clone();
    }
    tracing::debug!(?config, "resolved config");
    Ok(config)
}

/// The HTTP client is blocking, so it is created and dropped here rather than
/// on an async worker.
fn migrate_blocking(
    config: &MigrationConfig,
    options: RunOptions,
    timeout: Duration,
    out_dir: &Path,
    items: &[ExportItem],
    stop: Arc<AtomicBool>,
) -> anyhow::Result<RunReport> {
    let fetcher = HttpFetcher::new(timeout)?;

    let base_url = config.media_base_url();
    let media: Box<dyn MediaStore> = Box::new(
        LocalFsMediaStore::open(out_dir.join("media"), base_url.clone())
            .context("open media store")?,
    );
    let media: Box<dyn MediaStore> = if options.dry_run {
        Box::new(DryRunMediaStore::new(media, base_url))
    } else {
        media
    };

    let repository =
        LocalFsRepository::open(out_dir.join("posts")).context("open post repository")?;
    let authors = ConfigAuthorDirectory::from_config(config);

    let mut pipeline = Pipeline::new(
        config,
        options,
        AssetImporter::new(media, Box::new(fetcher)),
        Box::new(repository),
        Box::new(authors),
    )?
    .with_stop_signal(stop);

    Ok(pipeline.run(items))
}
