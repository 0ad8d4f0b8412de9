use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::{MigrateError, Result};
use crate::formats::ImportedAsset;

/// Storage for imported media, indexed by the URL each asset came from.
pub trait MediaStore {
    fn lookup_by_source_url(&self, source_url: &str) -> Result<Option<ImportedAsset>>;

    /// Persists `bytes` together with `source_url` metadata. Either both become
    /// visible to `lookup_by_source_url` or neither does.
    fn store(&mut self, bytes: &[u8], filename: &str, source_url: &str) -> Result<ImportedAsset>;

    fn url_for(&self, canonical_id: u64) -> Option<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MediaIndex {
    next_id: u64,
    assets: Vec<ImportedAsset>,
}

/// Media store backed by a directory:
///
/// - `files/<filename>`: asset bytes
/// - `media.json`: index; rewriting it is the commit point of `store`
#[derive(Debug)]
pub struct LocalFsMediaStore {
    base_dir: PathBuf,
    base_url: String,
    index: MediaIndex,
}

impl LocalFsMediaStore {
    /// Directories are created on the first `store`, not here.
    pub fn open(base_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        let index_path = base_dir.join("media.json");
        let index = match std::fs::read(&index_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse media index: {}", index_path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => MediaIndex {
                next_id: 1,
                assets: Vec::new(),
            },
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read media index: {}", index_path.display()));
            }
        };

        Ok(Self {
            base_dir,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            index,
        })
    }

    fn files_dir(&self) -> PathBuf {
        self.base_dir.join("files")
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("media.json")
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.files_dir().join(filename)
    }

    fn unique_filename(&self, filename: &str) -> String {
        let taken = |name: &str| {
            self.index.assets.iter().any(|a| a.filename == name) || self.file_path(name).exists()
        };
        if !taken(filename) {
            return filename.to_owned();
        }

        let (stem, ext) = match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (filename, None),
        };
        (1..)
            .map(|n| match ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            })
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| filename.to_owned())
    }

    fn write_file(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let files_dir = self.files_dir();
        std::fs::create_dir_all(&files_dir)
            .with_context(|| format!("create media files dir: {}", files_dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&files_dir)
            .with_context(|| format!("create temp file in: {}", files_dir.display()))?;
        tmp.write_all(bytes).context("write asset bytes")?;
        tmp.flush().context("flush asset bytes")?;

        let path = self.file_path(filename);
        tmp.persist_noclobber(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("persist asset: {}", path.display()))?;
        Ok(path)
    }
}

impl MediaStore for LocalFsMediaStore {
    fn lookup_by_source_url(&self, source_url: &str) -> Result<Option<ImportedAsset>> {
        Ok(self
            .index
            .assets
            .iter()
            .find(|a| a.source_url == source_url)
            .cloned())
    }

    fn store(&mut self, bytes: &[u8], filename: &str, source_url: &str) -> Result<ImportedAsset> {
        let fail = |err: anyhow::Error| MigrateError::AssetStoreFailure {
            url: source_url.to_owned(),
            reason: format!("{err:#}"),
        };

        let filename = self.unique_filename(filename);
        let path = self.write_file(&filename, bytes).map_err(fail)?;

        let asset = ImportedAsset {
            canonical_id: self.index.next_id.max(1),
            canonical_url: format!("{}/{filename}", self.base_url),
            source_url: source_url.to_owned(),
            filename,
            sha256: hex::encode(sha2::Sha256::digest(bytes)),
        };

        let mut next = self.index.clone();
        next.next_id = asset.canonical_id + 1;
        next.assets.push(asset.clone());
        if let Err(err) = write_json_atomic(&self.index_path(), &next) {
            // The index was not rewritten, so the asset is not visible; drop its bytes.
            if let Err(cleanup) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %cleanup, "could not remove orphaned asset bytes");
            }
            return Err(fail(err));
        }

        self.index = next;
        Ok(asset)
    }

    fn url_for(&self, canonical_id: u64) -> Option<String> {
        self.index
            .assets
            .iter()
            .find(|a| a.canonical_id == canonical_id)
            .map(|a| a.canonical_url.clone())
    }

    fn len(&self) -> usize {
        self.index.assets.len()
    }
}

/// Wraps a store for dry runs: reads fall through to the inner store, writes
/// stay in memory and receive provisional ids from the top of the id space.
pub struct DryRunMediaStore {
    inner: Box<dyn MediaStore>,
    base_url: String,
    staged: Vec<ImportedAsset>,
}

impl DryRunMediaStore {
    pub fn new(inner: Box<dyn MediaStore>, base_url: impl Into<String>) -> Self {
        Self {
            inner,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            staged: Vec::new(),
        }
    }
}

impl MediaStore for DryRunMediaStore {
    fn lookup_by_source_url(&self, source_url: &str) -> Result<Option<ImportedAsset>> {
        if let Some(asset) = self.staged.iter().find(|a| a.source_url == source_url) {
            return Ok(Some(asset.clone()));
        }
        self.inner.lookup_by_source_url(source_url)
    }

    fn store(&mut self, bytes: &[u8], filename: &str, source_url: &str) -> Result<ImportedAsset> {
        let asset = ImportedAsset {
            canonical_id: u64::MAX - self.staged.len() as u64,
            canonical_url: format!("{}/{filename}", self.base_url),
            source_url: source_url.to_owned(),
            filename: filename.to_owned(),
            sha256: hex::encode(sha2::Sha256::digest(bytes)),
        };
        tracing::debug!(source_url, filename, "dry run: asset not written");
        self.staged.push(asset.clone());
        Ok(asset)
    }

    fn url_for(&self, canonical_id: u64) -> Option<String> {
        self.staged
            .iter()
            .find(|a| a.canonical_id == canonical_id)
            .map(|a| a.canonical_url.clone())
            .or_else(|| self.inner.url_for(canonical_id))
    }

    fn len(&self) -> usize {
        self.inner.len() + self.staged.len()
    }
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in: {}", parent.display()))?;
    tmp.write_all(&data)
        .with_context(|| format!("write tmp: {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
