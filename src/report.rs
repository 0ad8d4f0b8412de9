use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;

use crate::media_store::write_json_atomic;
use crate::pipeline::RunReport;

pub const LINKS_FILE: &str = "links.jsonl";
pub const POSTS_FILE: &str = "posts.jsonl";
pub const ASSET_FAILURES_FILE: &str = "asset-failures.jsonl";
pub const POST_FAILURES_FILE: &str = "post-failures.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

/// Writes the report files of a run into `dir`, replacing those of any
/// previous run.
pub fn write_all(dir: &Path, report: &RunReport) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create report dir: {}", dir.display()))?;

    write_jsonl(&dir.join(LINKS_FILE), &report.links)?;
    write_jsonl(&dir.join(POSTS_FILE), &report.outcomes)?;
    write_jsonl(&dir.join(ASSET_FAILURES_FILE), &report.asset_failures)?;
    write_jsonl(&dir.join(POST_FAILURES_FILE), &report.post_failures)?;

    let summary_path = dir.join(SUMMARY_FILE);
    write_json_atomic(&summary_path, &report.summary)
        .with_context(|| format!("write summary: {}", summary_path.display()))?;

    tracing::info!(dir = %dir.display(), "wrote reports");
    Ok(())
}

fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    let file =
        File::create(path).with_context(|| format!("create report: {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut out, record)
            .with_context(|| format!("serialize record: {}", path.display()))?;
        out.write_all(b"\n")
            .with_context(|| format!("write newline: {}", path.display()))?;
    }
    out.flush()
        .with_context(|| format!("flush report: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{LinkRecord, OutcomeRecord, OutcomeStatus};

    #[test]
    fn writes_one_line_per_record_and_a_summary() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let mut report = RunReport::default();
        report.links.push(LinkRecord {
            post_slug: "a".to_owned(),
            original: "/blog/b".to_owned(),
            rewritten: "https://new.example.com/blog/b/".to_owned(),
        });
        report.outcomes.push(OutcomeRecord {
            status: OutcomeStatus::DryRun,
            title: "A".to_owned(),
            slug: "a".to_owned(),
            source_path: "/blog/a".to_owned(),
            target_path: "/blog/a/".to_owned(),
            created_id: None,
            discovered_link_count: 1,
        });
        report.summary.eligible = 1;

        write_all(temp.path(), &report)?;

        let posts = std::fs::read_to_string(temp.path().join(POSTS_FILE))?;
        assert_eq!(posts.lines().count(), 1);
        let outcome: serde_json::Value = serde_json::from_str(posts.trim())?;
        assert_eq!(outcome["status"], "dry_run");
        assert!(outcome.get("created_id").is_none());

        assert_eq!(std::fs::read_to_string(temp.path().join(LINKS_FILE))?.lines().count(), 1);
        assert!(std::fs::read_to_string(temp.path().join(POST_FAILURES_FILE))?.is_empty());

        let summary: serde_json::Value =
            serde_json::from_slice(&std::fs::read(temp.path().join(SUMMARY_FILE))?)?;
        assert_eq!(summary["eligible"], 1);
        Ok(())
    }
}
