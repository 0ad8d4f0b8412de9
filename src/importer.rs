use chrono::Utc;
use url::Url;

use crate::error::{MigrateError, Result};
use crate::fetch::{AssetFetcher, FetchedAsset};
use crate::formats::{AssetFailure, ImportedAsset};
use crate::media_store::MediaStore;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "avif", "bmp", "tif", "tiff", "ico", "heic",
];

const DEFAULT_EXTENSION: &str = "webp";

/// Imports external assets into the media store, at most once per source URL.
///
/// Lookups by source URL always happen before any fetch, so re-importing a URL
/// (in the same run or a later one) returns the stored asset without network
/// access. Failures are recorded and returned; they never abort the caller.
pub struct AssetImporter {
    store: Box<dyn MediaStore>,
    fetcher: Box<dyn AssetFetcher>,
    failures: Vec<AssetFailure>,
    imported: usize,
    reused: usize,
}

impl AssetImporter {
    pub fn new(store: Box<dyn MediaStore>, fetcher: Box<dyn AssetFetcher>) -> Self {
        Self {
            store,
            fetcher,
            failures: Vec::new(),
            imported: 0,
            reused: 0,
        }
    }

    pub fn import(&mut self, source_url: &str, owning_post: Option<&str>) -> Result<ImportedAsset> {
        match self.store.lookup_by_source_url(source_url) {
            Ok(Some(asset)) => {
                self.reused += 1;
                tracing::debug!(source_url, canonical_id = asset.canonical_id, "asset already imported");
                return Ok(asset);
            }
            Ok(None) => {}
            Err(err) => return Err(self.record(source_url, owning_post, err)),
        }

        let fetched = match self.fetcher.fetch(source_url) {
            Ok(fetched) => fetched,
            Err(err) => return Err(self.record(source_url, owning_post, err)),
        };

        let filename = filename_for(source_url, &fetched);
        match self.store.store(&fetched.bytes, &filename, source_url) {
            Ok(asset) => {
                self.imported += 1;
                tracing::info!(
                    source_url,
                    canonical_id = asset.canonical_id,
                    filename = %asset.filename,
                    "imported asset"
                );
                Ok(asset)
            }
            Err(err) => Err(self.record(source_url, owning_post, err)),
        }
    }

    pub fn store(&self) -> &dyn MediaStore {
        self.store.as_ref()
    }

    pub fn failures(&self) -> &[AssetFailure] {
        &self.failures
    }

    pub fn imported_count(&self) -> usize {
        self.imported
    }

    pub fn reused_count(&self) -> usize {
        self.reused
    }

    fn record(&mut self, source_url: &str, owning_post: Option<&str>, err: MigrateError) -> MigrateError {
        tracing::warn!(source_url, owning_post, error = %err, "asset import failed");
        self.failures.push(AssetFailure {
            source_url: source_url.to_owned(),
            owning_post: owning_post.map(str::to_owned),
            reason: err.to_string(),
            timestamp: Utc::now(),
        });
        err
    }
}

/// Last path segment of `source_url`, with an extension sniffed from the
/// content when the segment has no recognised image extension.
pub fn filename_for(source_url: &str, fetched: &FetchedAsset) -> String {
    let segment = match Url::parse(source_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .unwrap_or_default()
            .to_owned(),
        Err(_) => source_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_owned(),
    };

    let mut name = sanitize_filename(&segment);
    if !has_image_extension(&name) {
        let media_type = sniff_media_type(&fetched.bytes).or_else(|| {
            fetched
                .content_type
                .as_deref()
                .map(|ct| ct.split(';').next().unwrap_or_default().trim())
        });
        let ext = media_type
            .and_then(extension_for_media_type)
            .unwrap_or(DEFAULT_EXTENSION);
        name = format!("{name}.{ext}");
    }
    name
}

fn sanitize_filename(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(&['.', '_'][..]);
    if cleaned.is_empty() {
        "asset".to_owned()
    } else {
        cleaned.to_owned()
    }
}

fn has_image_extension(name: &str) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty() && IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    match media_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::media_store::LocalFsMediaStore;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    struct CountingFetcher {
        calls: Rc<Cell<usize>>,
        body: Option<Vec<u8>>,
    }

    impl AssetFetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> Result<FetchedAsset> {
            self.calls.set(self.calls.get() + 1);
            match &self.body {
                Some(bytes) => Ok(FetchedAsset {
                    bytes: bytes.clone(),
                    content_type: None,
                }),
                None => Err(MigrateError::AssetFetchFailure {
                    url: url.to_owned(),
                    reason: "http status 404 Not Found".to_owned(),
                }),
            }
        }
    }

    fn fetched(bytes: &[u8], content_type: Option<&str>) -> FetchedAsset {
        FetchedAsset {
            bytes: bytes.to_vec(),
            content_type: content_type.map(str::to_owned),
        }
    }

    #[test]
    fn importing_twice_returns_the_same_asset_without_refetching() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let calls = Rc::new(Cell::new(0));
        let store = LocalFsMediaStore::open(temp.path(), "/media")?;
        let mut importer = AssetImporter::new(
            Box::new(store),
            Box::new(CountingFetcher {
                calls: Rc::clone(&calls),
                body: Some(PNG.to_vec()),
            }),
        );

        let url = "https://images.squarespace-cdn.com/content/v1/abc/image-asset";
        let first = importer.import(url, Some("post-a"))?;
        let second = importer.import(url, Some("post-b"))?;

        assert_eq!(first.canonical_id, second.canonical_id);
        assert_eq!(first.filename, "image-asset.png");
        assert_eq!(calls.get(), 1);
        assert_eq!(importer.store().len(), 1);
        assert_eq!(importer.imported_count(), 1);
        assert_eq!(importer.reused_count(), 1);
        Ok(())
    }

    #[test]
    fn reimport_across_runs_does_not_duplicate() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let url = "https://cdn.example/photo.jpg";

        let mut first_run = AssetImporter::new(
            Box::new(LocalFsMediaStore::open(temp.path(), "/media")?),
            Box::new(CountingFetcher {
                calls: Rc::new(Cell::new(0)),
                body: Some(vec![0xFF, 0xD8, 0xFF, 0xE0]),
            }),
        );
        let original = first_run.import(url, None)?;

        let calls = Rc::new(Cell::new(0));
        let mut second_run = AssetImporter::new(
            Box::new(LocalFsMediaStore::open(temp.path(), "/media")?),
            Box::new(CountingFetcher {
                calls: Rc::clone(&calls),
                body: Some(vec![0xFF, 0xD8, 0xFF, 0xE0]),
            }),
        );
        let again = second_run.import(url, None)?;

        assert_eq!(original, again);
        assert_eq!(calls.get(), 0);
        assert_eq!(second_run.store().len(), 1);
        Ok(())
    }

    #[test]
    fn fetch_failure_is_recorded_and_returned() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let mut importer = AssetImporter::new(
            Box::new(LocalFsMediaStore::open(temp.path(), "/media")?),
            Box::new(CountingFetcher {
                calls: Rc::new(Cell::new(0)),
                body: None,
            }),
        );

        let err = importer
            .import("https://cdn.example/missing.png", Some("my-post"))
            .expect_err("fetch fails");
        assert!(matches!(err, MigrateError::AssetFetchFailure { .. }));
        assert_eq!(importer.failures().len(), 1);
        assert_eq!(importer.failures()[0].owning_post.as_deref(), Some("my-post"));
        assert!(importer.store().is_empty());
        Ok(())
    }

    #[test]
    fn filename_keeps_known_extensions() {
        let asset = fetched(PNG, None);
        assert_eq!(
            filename_for("https://cdn.example/a/photo.JPG?format=1500w", &asset),
            "photo.JPG"
        );
    }

    #[test]
    fn filename_sniffs_content_then_header_then_defaults() {
        assert_eq!(filename_for("https://cdn.example/a/b", &fetched(PNG, None)), "b.png");
        assert_eq!(
            filename_for("https://cdn.example/a/b", &fetched(b"????", Some("image/gif"))),
            "b.gif"
        );
        assert_eq!(
            filename_for("https://cdn.example/a/b", &fetched(b"????", Some("text/plain"))),
            "b.webp"
        );
        assert_eq!(
            filename_for("https://cdn.example/", &fetched(b"????", None)),
            "asset.webp"
        );
    }
}
