use std::sync::LazyLock;

use anyhow::Context as _;
use regex::{Captures, Regex};
use url::Url;

use crate::config::MigrationConfig;
use crate::formats::{ImportedAsset, LinkRecord, PostRecord};
use crate::importer::AssetImporter;
use crate::resolver::AssetResolver;

static IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("valid img regex"));
static IMG_SOURCE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:data-src|src)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid src regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutput {
    pub html: String,
    pub links: Vec<LinkRecord>,
    /// The post's featured asset, when it resolved and imported.
    pub featured: Option<ImportedAsset>,
}

/// Rewrites media references and internal links in post HTML.
#[derive(Debug, Clone)]
pub struct ContentRewriter {
    config: MigrationConfig,
    legacy_post_link: Regex,
    legacy_origin: Regex,
}

impl ContentRewriter {
    pub fn new(config: &MigrationConfig) -> anyhow::Result<Self> {
        let domain = regex::escape(config.legacy_domain.trim_start_matches("www."));
        let blog = regex::escape(config.legacy_blog_path.trim_matches('/'));

        let legacy_post_link = Regex::new(&format!(
            r#"(?i)href=["']((?:https?://(?:www\.)?{domain})?/{blog}/([^"'?#/]+)[^"']*)["']"#
        ))
        .context("compile legacy post link pattern")?;
        let legacy_origin = Regex::new(&format!(r"(?i)(?:https?:)?//(?:www\.)?{domain}\b"))
            .context("compile legacy origin pattern")?;

        Ok(Self {
            config: config.clone(),
            legacy_post_link,
            legacy_origin,
        })
    }

    pub fn rewrite(
        &self,
        post: &PostRecord,
        resolver: &AssetResolver,
        importer: &mut AssetImporter,
    ) -> RewriteOutput {
        let featured = self.import_featured(post, resolver, importer);
        let html = self.rewrite_assets(post, featured.as_ref(), &post.raw_html, importer);
        let (html, links) = self.rewrite_links(&post.slug, &html);
        RewriteOutput {
            html,
            links,
            featured,
        }
    }

    fn import_featured(
        &self,
        post: &PostRecord,
        resolver: &AssetResolver,
        importer: &mut AssetImporter,
    ) -> Option<ImportedAsset> {
        let source_id = post.featured_asset_source_id.as_deref()?;
        let Some(source_url) = resolver.resolve(source_id) else {
            tracing::warn!(slug = %post.slug, source_id, "featured asset id not declared in export");
            return None;
        };
        importer.import(source_url, Some(&post.slug)).ok()
    }

    fn rewrite_assets(
        &self,
        post: &PostRecord,
        featured: Option<&ImportedAsset>,
        html: &str,
        importer: &mut AssetImporter,
    ) -> String {
        let featured_name = featured.and_then(|asset| source_filename(&asset.source_url));

        let mut urls = self.media_urls(html);
        // Longer URLs first so a URL that prefixes another is not replaced inside it.
        urls.sort_by_key(|url| std::cmp::Reverse(url.len()));

        let mut out = html.to_owned();
        for raw in urls {
            let source_url = with_scheme(&raw.replace("&amp;", "&"));
            let name = source_filename(&source_url);

            if let (Some(name), Some(featured_name)) = (name.as_deref(), featured_name.as_deref()) {
                if name == featured_name {
                    out = remove_images_naming(&out, name);
                    tracing::debug!(slug = %post.slug, filename = name, "dropped inline copy of featured image");
                    continue;
                }
            }

            match importer.import(&source_url, Some(&post.slug)) {
                Ok(asset) => out = out.replace(&raw, &asset.canonical_url),
                Err(err) => {
                    tracing::debug!(slug = %post.slug, url = %source_url, error = %err, "keeping original media url");
                }
            }
        }
        out
    }

    /// Distinct image URLs on the media domain, in document order.
    fn media_urls(&self, html: &str) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for tag in IMG_TAG.find_iter(html) {
            for caps in IMG_SOURCE_ATTR.captures_iter(tag.as_str()) {
                let Some(value) = caps.get(1).or_else(|| caps.get(2)) else {
                    continue;
                };
                let value = value.as_str().trim();
                if self.is_media_url(value) && !urls.iter().any(|u| u == value) {
                    urls.push(value.to_owned());
                }
            }
        }
        urls
    }

    fn is_media_url(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(&with_scheme(url)) else {
            return false;
        };
        let domain = self.config.media_domain.trim_matches('.').to_ascii_lowercase();
        parsed.host_str().is_some_and(|host| {
            let host = host.to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }

    fn rewrite_links(&self, slug: &str, html: &str) -> (String, Vec<LinkRecord>) {
        let mut links = Vec::new();
        let rewritten = self
            .legacy_post_link
            .replace_all(html, |caps: &Captures<'_>| {
                let target = self.config.post_url(&caps[2]);
                links.push(LinkRecord {
                    post_slug: slug.to_owned(),
                    original: caps[1].to_owned(),
                    rewritten: target.clone(),
                });
                format!(r#"href="{target}""#)
            });
        let site_origin = self.config.site_origin().to_owned();
        let html = self
            .legacy_origin
            .replace_all(&rewritten, site_origin.as_str())
            .into_owned();
        (html, links)
    }
}

/// Protocol-relative URLs (`//host/path`) are fetched over https.
fn with_scheme(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_owned()
    }
}

/// Last non-empty path segment of a URL.
fn source_filename(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .filter(|segment| !segment.contains(':'))
        .map(str::to_owned)
}

/// Removes `<img>` tags that reference `filename` as a whole path segment.
fn remove_images_naming(html: &str, filename: &str) -> String {
    let pattern = format!(
        r#"(?is)<img\b[^>]*?[/"'=]{}(?:>|[?#"'\s][^>]*>)"#,
        regex::escape(filename)
    );
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(html, "").into_owned(),
        Err(err) => {
            tracing::warn!(filename, error = %err, "could not build featured image pattern");
            html.to_owned()
        }
    }
}
