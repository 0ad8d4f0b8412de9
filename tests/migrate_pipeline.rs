use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use predicates::prelude::*;
use sha2::Digest as _;
use sha2::Sha256;
use sqsp_migrate::formats::{OutcomeRecord, OutcomeStatus, RunSummary};
use sqsp_migrate::repository::StoredPost;

static LOGO_PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 4, 0,
    0, 0, 181, 28, 12, 2, 0, 0, 0, 11, 73, 68, 65, 84, 120, 218, 99, 252, 255, 23, 0, 2, 3, 1, 128,
    110, 220, 25, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];

struct MediaServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    shutdown: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl MediaServer {
    fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.join().expect("join media server");
    }
}

fn spawn_media_server() -> MediaServer {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let hits = Arc::new(AtomicUsize::new(0));

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let counter = Arc::clone(&hits);
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            counter.fetch_add(1, Ordering::SeqCst);

            let url = request.url().to_string();
            let path = url.split('?').next().unwrap_or(&url).to_owned();
            let response = match path.as_str() {
                "/content/logo.png" | "/content/hero-image" => {
                    tiny_http::Response::from_data(LOGO_PNG.to_vec()).with_header(
                        tiny_http::Header::from_bytes("Content-Type", "image/png")
                            .expect("content-type header"),
                    )
                }
                _ => tiny_http::Response::from_data(b"not found".to_vec()).with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });

    MediaServer {
        base_url,
        hits,
        shutdown: shutdown_tx,
        handle,
    }
}

fn export_xml(media: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:excerpt="http://wordpress.org/export/1.2/excerpt/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:wp="http://wordpress.org/export/1.2/">
<channel>
  <title>Legacy Blog</title>
  <item>
    <title>First Post</title>
    <link>https://www.old.example.com/blog/first-post</link>
    <dc:creator>Jane Doe</dc:creator>
    <content:encoded><![CDATA[<div class="sqs-layout"><div class="sqs-block html-block"><div class="sqs-block-content">
<p><img src="{media}/content/hero-image?format=1500w"></p>
<h2>Intro</h2>
<p>See <a href="https://old.example.com/blog/second-post?utm=x">the next one</a>.</p>
<p><img src="{media}/content/logo.png"></p>
<p><img src="{media}/content/missing.png"></p>
</div></div></div>]]></content:encoded>
    <excerpt:encoded><![CDATA[]]></excerpt:encoded>
    <wp:post_id>1</wp:post_id>
    <wp:post_date>2021-05-01 10:00:00</wp:post_date>
    <wp:post_name>first-post</wp:post_name>
    <wp:status>publish</wp:status>
    <wp:post_type>post</wp:post_type>
    <category domain="category" nicename="news"><![CDATA[News]]></category>
    <category domain="post_tag" nicename="rust"><![CDATA[rust]]></category>
    <wp:postmeta>
      <wp:meta_key>_thumbnail_id</wp:meta_key>
      <wp:meta_value><![CDATA[9]]></wp:meta_value>
    </wp:postmeta>
  </item>
  <item>
    <title>Second Post</title>
    <link>https://www.old.example.com/blog/second-post</link>
    <dc:creator>someone@example.com</dc:creator>
    <content:encoded><![CDATA[<ul data-rte-list="default"><li><p>one</p></li><li><p>two</p></li></ul><p><img src="{media}/content/logo.png"></p>]]></content:encoded>
    <wp:post_id>2</wp:post_id>
    <wp:post_name>second-post</wp:post_name>
    <wp:status>publish</wp:status>
    <wp:post_type>post</wp:post_type>
  </item>
  <item>
    <title>About</title>
    <wp:post_id>3</wp:post_id>
    <wp:post_name>about</wp:post_name>
    <wp:post_type>page</wp:post_type>
    <content:encoded><![CDATA[<p>not a post</p>]]></content:encoded>
  </item>
  <item>
    <title>hero-image</title>
    <wp:post_id>9</wp:post_id>
    <wp:post_type>attachment</wp:post_type>
    <wp:attachment_url>{media}/content/hero-image</wp:attachment_url>
  </item>
</channel>
</rss>
"#
    )
}

fn write_fixture(dir: &Path, media: &str) -> anyhow::Result<(String, String)> {
    let export = dir.join("export.xml");
    fs::write(&export, export_xml(media))?;
    let config = dir.join("migrate.yaml");
    fs::write(
        &config,
        "site_origin: https://new.example.com\nlegacy_domain: old.example.com\nmedia_domain: 127.0.0.1\nauthors:\n  Jane Doe: 7\n",
    )?;
    Ok((
        export.to_string_lossy().into_owned(),
        config.to_string_lossy().into_owned(),
    ))
}

fn migrate_cmd(export: &str, config: &str, out: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("sqsp-migrate");
    cmd.args(["migrate", "--export", export, "--config", config, "--out"])
        .arg(out)
        .env("RUST_LOG", "info")
        .env_remove("SQSP_MIGRATE_SITE_ORIGIN")
        .env_remove("SQSP_MIGRATE_LEGACY_DOMAIN")
        .env_remove("SQSP_MIGRATE_MEDIA_DOMAIN");
    cmd
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    fs::read_to_string(path)?
        .lines()
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

fn media_index_len(out: &Path) -> anyhow::Result<usize> {
    let index: serde_json::Value = serde_json::from_slice(&fs::read(out.join("media/media.json"))?)?;
    Ok(index["assets"].as_array().map_or(0, Vec::len))
}

#[test]
fn migrate_writes_posts_media_and_reports() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let server = spawn_media_server();
    let (export, config) = write_fixture(temp.path(), &server.base_url)?;
    let out = temp.path().join("out");

    migrate_cmd(&export, &config, &out)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 succeeded"));
    server.stop();

    let first: StoredPost = serde_json::from_slice(&fs::read(out.join("posts/first-post.json"))?)?;
    let content = &first.draft.content;
    assert!(content.starts_with("<!-- wp:heading {\"level\":2} -->"), "{content}");
    assert!(!content.contains("sqs-"));
    assert!(!content.contains("hero-image"), "featured image is not repeated inline");
    assert!(content.contains("https://new.example.com/blog/second-post/"));
    assert!(content.contains("https://new.example.com/media/logo.png"));
    assert!(content.contains("/content/missing.png"), "failed import keeps the url");
    assert_eq!(first.draft.author_id, 7);
    assert_eq!(first.primary_asset, Some(1));
    assert!(first.categories.contains("News"));
    assert!(first.tags.contains("rust"));

    let second: StoredPost =
        serde_json::from_slice(&fs::read(out.join("posts/second-post.json"))?)?;
    assert!(second.draft.content.contains("<li>one</li>"));
    assert_eq!(second.draft.author_id, 1);
    assert!(!out.join("posts/about.json").exists());

    let logo = fs::read(out.join("media/files/logo.png"))?;
    assert_eq!(hex::encode(Sha256::digest(&logo)), hex::encode(Sha256::digest(LOGO_PNG)));
    assert!(out.join("media/files/hero-image.png").exists());
    assert_eq!(media_index_len(&out)?, 2);

    let report = out.join("report");
    let outcomes: Vec<OutcomeRecord> = read_jsonl(&report.join("posts.jsonl"))?;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Success));
    assert_eq!(outcomes[0].source_path, "/blog/first-post");
    assert_eq!(outcomes[0].target_path, "/blog/first-post/");
    assert_eq!(outcomes[0].discovered_link_count, 1);

    let links: Vec<serde_json::Value> = read_jsonl(&report.join("links.jsonl"))?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["rewritten"], "https://new.example.com/blog/second-post/");

    let failures: Vec<serde_json::Value> = read_jsonl(&report.join("asset-failures.jsonl"))?;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["owning_post"], "first-post");

    let summary: RunSummary = serde_json::from_slice(&fs::read(report.join("summary.json"))?)?;
    assert_eq!(summary.eligible, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.assets_imported, 2);
    Ok(())
}

#[test]
fn rerun_reuses_stored_assets() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let server = spawn_media_server();
    let (export, config) = write_fixture(temp.path(), &server.base_url)?;
    let out = temp.path().join("out");

    migrate_cmd(&export, &config, &out).assert().success();
    let hits_after_first = server.hits.load(Ordering::SeqCst);
    let first_post = fs::read(out.join("posts/first-post.json"))?;

    migrate_cmd(&export, &config, &out).assert().success();
    let hits_after_second = server.hits.load(Ordering::SeqCst);
    server.stop();

    assert_eq!(media_index_len(&out)?, 2);
    assert_eq!(fs::read_dir(out.join("media/files"))?.count(), 2);
    // Only the asset that failed the first time is requested again.
    assert_eq!(hits_after_second - hits_after_first, 1);
    assert_eq!(fs::read(out.join("posts/first-post.json"))?, first_post);

    let summary: RunSummary =
        serde_json::from_slice(&fs::read(out.join("report/summary.json"))?)?;
    assert_eq!(summary.assets_imported, 0);
    assert!(summary.assets_reused >= 2);
    Ok(())
}

#[test]
fn dry_run_writes_no_media_or_posts() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let server = spawn_media_server();
    let (export, config) = write_fixture(temp.path(), &server.base_url)?;
    let out = temp.path().join("out");

    migrate_cmd(&export, &config, &out)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 dry run"));
    server.stop();

    assert!(!out.join("media").exists());
    assert!(!out.join("posts").exists());

    let outcomes: Vec<OutcomeRecord> = read_jsonl(&out.join("report/posts.jsonl"))?;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::DryRun));
    assert!(outcomes.iter().all(|o| o.created_id.is_none()));
    Ok(())
}

#[test]
fn window_limits_the_posts_written() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let server = spawn_media_server();
    let (export, config) = write_fixture(temp.path(), &server.base_url)?;
    let out = temp.path().join("out");

    migrate_cmd(&export, &config, &out)
        .args(["--offset", "1", "--limit", "1"])
        .assert()
        .success();
    server.stop();

    assert!(!out.join("posts/first-post.json").exists());
    assert!(out.join("posts/second-post.json").exists());
    let summary: RunSummary =
        serde_json::from_slice(&fs::read(out.join("report/summary.json"))?)?;
    assert_eq!((summary.processed, summary.skipped), (1, 1));
    Ok(())
}

#[test]
fn malformed_export_fails_without_writing() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let export = temp.path().join("export.xml");
    fs::write(&export, "<rss><channel><item><title>broken</item>")?;
    let out = temp.path().join("out");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("sqsp-migrate");
    cmd.args(["migrate", "--export"])
        .arg(&export)
        .arg("--out")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed export"));

    assert!(!out.exists());
    Ok(())
}
