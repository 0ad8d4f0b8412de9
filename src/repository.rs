use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};
use crate::media_store::write_json_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Taxonomy {
    Category,
    Tag,
}

/// Fields written for a post on the new site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDraft {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub date: String,
    pub status: String,
    pub author_id: u64,
    pub source_path: String,
}

/// Destination of migrated posts.
pub trait ContentRepository {
    /// Creates the post or updates the existing post with the same slug.
    fn create_or_update(&mut self, draft: &PostDraft) -> Result<u64>;

    fn assign_terms(&mut self, post_id: u64, terms: &[String], taxonomy: Taxonomy) -> Result<()>;

    fn set_primary_asset(&mut self, post_id: u64, asset_id: u64) -> Result<()>;
}

pub trait AuthorDirectory {
    fn find_by_identity(&self, identity: &str) -> Option<u64>;
}

/// Authors from the `authors` map of the config.
#[derive(Debug, Clone, Default)]
pub struct ConfigAuthorDirectory {
    authors: BTreeMap<String, u64>,
}

impl ConfigAuthorDirectory {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            authors: config.authors.clone(),
        }
    }
}

impl AuthorDirectory for ConfigAuthorDirectory {
    fn find_by_identity(&self, identity: &str) -> Option<u64> {
        self.authors.get(identity.trim()).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPost {
    pub id: u64,
    #[serde(flatten)]
    pub draft: PostDraft,
    pub categories: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_asset: Option<u64>,
}

/// One JSON file per post under `posts/{slug}.json`.
///
/// Ids are assigned sequentially and kept when a post with the same slug is
/// written again.
#[derive(Debug)]
pub struct LocalFsRepository {
    dir: PathBuf,
    posts: BTreeMap<u64, StoredPost>,
}

impl LocalFsRepository {
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        let mut posts = BTreeMap::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self { dir, posts });
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read posts dir: {}", dir.display()));
            }
        };
        for entry in entries {
            let path = entry.context("read posts dir entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes =
                std::fs::read(&path).with_context(|| format!("read post: {}", path.display()))?;
            let post: StoredPost = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse post: {}", path.display()))?;
            posts.insert(post.id, post);
        }

        tracing::debug!(dir = %dir.display(), posts = posts.len(), "opened repository");
        Ok(Self { dir, posts })
    }

    pub fn get(&self, id: u64) -> Option<&StoredPost> {
        self.posts.get(&id)
    }

    pub fn find_by_slug(&self, slug: &str) -> Option<&StoredPost> {
        self.posts.values().find(|p| p.draft.slug == slug)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    fn post_path(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{slug}.json"))
    }

    fn persist(&mut self, post: StoredPost) -> Result<u64> {
        let id = post.id;
        write_post(&self.post_path(&post.draft.slug), &post)
            .map_err(|err| MigrateError::RepositoryWriteFailure(format!("{err:#}")))?;
        self.posts.insert(id, post);
        Ok(id)
    }

    fn existing(&self, post_id: u64) -> Result<StoredPost> {
        self.posts
            .get(&post_id)
            .cloned()
            .ok_or_else(|| MigrateError::SourceNotFound(format!("post id {post_id}")))
    }
}

fn write_post(path: &Path, post: &StoredPost) -> anyhow::Result<()> {
    write_json_atomic(path, post).with_context(|| format!("write post: {}", path.display()))
}

impl ContentRepository for LocalFsRepository {
    fn create_or_update(&mut self, draft: &PostDraft) -> Result<u64> {
        if draft.slug.is_empty() || draft.slug.contains(['/', '\\']) || draft.slug.starts_with('.')
        {
            return Err(MigrateError::PostValidationFailure {
                slug: draft.slug.clone(),
                reason: "slug is not a valid file name".to_owned(),
            });
        }

        let post = match self.find_by_slug(&draft.slug) {
            Some(existing) => StoredPost {
                draft: draft.clone(),
                ..existing.clone()
            },
            None => StoredPost {
                id: self.posts.keys().next_back().map_or(1, |id| id + 1),
                draft: draft.clone(),
                categories: BTreeSet::new(),
                tags: BTreeSet::new(),
                primary_asset: None,
            },
        };
        self.persist(post)
    }

    fn assign_terms(&mut self, post_id: u64, terms: &[String], taxonomy: Taxonomy) -> Result<()> {
        let mut post = self.existing(post_id)?;
        let set = match taxonomy {
            Taxonomy::Category => &mut post.categories,
            Taxonomy::Tag => &mut post.tags,
        };
        set.extend(terms.iter().map(|t| t.trim().to_owned()).filter(|t| !t.is_empty()));
        self.persist(post).map(|_| ())
    }

    fn set_primary_asset(&mut self, post_id: u64, asset_id: u64) -> Result<()> {
        let mut post = self.existing(post_id)?;
        post.primary_asset = Some(asset_id);
        self.persist(post).map(|_| ())
    }
}
