use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Site-level settings for a migration run.
///
/// Resolution order: defaults, then the optional YAML file, then environment
/// variables, then CLI flags (applied by the caller).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigrationConfig {
    /// Origin of the new site, without trailing slash (`https://example.com`).
    pub site_origin: String,
    /// Path segment the new site serves posts under.
    pub blog_path: String,
    /// Host of the legacy Squarespace site (`www.` is matched implicitly).
    pub legacy_domain: String,
    /// Path segment the legacy site served posts under.
    pub legacy_blog_path: String,
    /// Media CDN domain; images on this domain or its subdomains are imported.
    pub media_domain: String,
    /// Public base URL of stored media. Defaults to `{site_origin}/media`.
    pub media_base_url: Option<String>,
    /// Author id used when the directory has no match.
    pub default_author: u64,
    /// `dc:creator` value -> author id.
    pub authors: BTreeMap<String, u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            site_origin: "http://localhost".to_owned(),
            blog_path: "blog".to_owned(),
            legacy_domain: "example.squarespace.com".to_owned(),
            legacy_blog_path: "blog".to_owned(),
            media_domain: "squarespace-cdn.com".to_owned(),
            media_base_url: None,
            default_author: 1,
            authors: BTreeMap::new(),
        }
    }
}

impl MigrationConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .with_context(|| format!("read config: {}", path.display()))?;
                serde_yaml::from_str(&yaml)
                    .with_context(|| format!("parse config: {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(origin) = std::env::var("SQSP_MIGRATE_SITE_ORIGIN") {
            self.site_origin = origin;
        }
        if let Ok(domain) = std::env::var("SQSP_MIGRATE_LEGACY_DOMAIN") {
            self.legacy_domain = domain;
        }
        if let Ok(domain) = std::env::var("SQSP_MIGRATE_MEDIA_DOMAIN") {
            self.media_domain = domain;
        }
    }

    pub fn site_origin(&self) -> &str {
        self.site_origin.trim_end_matches('/')
    }

    pub fn media_base_url(&self) -> String {
        match self.media_base_url.as_deref() {
            Some(url) => url.trim_end_matches('/').to_owned(),
            None => format!("{}/media", self.site_origin()),
        }
    }

    /// New-site path for a post slug, always with a trailing slash.
    pub fn post_path(&self, slug: &str) -> String {
        format!("/{}/{slug}/", self.blog_path.trim_matches('/'))
    }

    pub fn post_url(&self, slug: &str) -> String {
        format!("{}{}", self.site_origin(), self.post_path(slug))
    }
}
