use std::path::Path;

use anyhow::Context as _;
use quick_xml::Reader;
use quick_xml::events::Event;
use url::Url;

use crate::error::{MigrateError, Result};
use crate::formats::PostRecord;

const FEATURED_META_KEY: &str = "_thumbnail_id";

/// One `<item>` of a WXR export, before any interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportItem {
    pub post_type: String,
    pub post_id: String,
    pub title: String,
    pub link: String,
    pub guid: String,
    pub content: String,
    pub excerpt: String,
    pub slug: String,
    pub date: String,
    pub status: String,
    pub creator: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub attachment_url: Option<String>,
    pub meta: Vec<(String, String)>,
}

impl ExportItem {
    pub fn is_post(&self) -> bool {
        self.post_type == "post"
    }

    pub fn is_attachment(&self) -> bool {
        self.post_type == "attachment"
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_post_record(&self) -> PostRecord {
        PostRecord {
            title: self.title.clone(),
            raw_html: self.content.clone(),
            excerpt: self.excerpt.clone(),
            slug: self.slug.clone(),
            date: self.date.clone(),
            status: self.status.clone(),
            author_ref: self.creator.clone(),
            categories: self.categories.iter().cloned().collect(),
            tags: self.tags.iter().cloned().collect(),
            featured_asset_source_id: self
                .meta(FEATURED_META_KEY)
                .filter(|id| !id.is_empty())
                .map(str::to_owned),
            source_path: source_path_from_link(&self.link),
        }
    }
}

pub fn load_export(path: &Path) -> anyhow::Result<Vec<ExportItem>> {
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("read export: {}", path.display()))?;
    let items = parse_export(&xml).with_context(|| format!("parse export: {}", path.display()))?;
    tracing::info!(items = items.len(), export = %path.display(), "loaded export");
    Ok(items)
}

pub fn parse_export(xml: &str) -> Result<Vec<ExportItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<ExportItem> = None;
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut category_domain: Option<String> = None;
    let mut meta_key = String::new();
    let mut saw_channel = false;

    loop {
        let event = reader.read_event().map_err(|err| {
            MigrateError::ParseFailure(format!("at byte {}: {err}", reader.buffer_position()))
        })?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "channel" => saw_channel = true,
                    "item" => current = Some(ExportItem::default()),
                    "category" => {
                        category_domain = match e.try_get_attribute("domain").map_err(xml_err)? {
                            Some(attr) => Some(attr.unescape_value().map_err(xml_err)?.into_owned()),
                            None => None,
                        };
                    }
                    _ => {}
                }
                path.push(name);
                text.clear();
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                path.pop();
                if name == "item" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                } else if let Some(item) = current.as_mut() {
                    let parent = path.last().map(String::as_str).unwrap_or_default();
                    apply_field(
                        item,
                        parent,
                        &name,
                        text.trim(),
                        category_domain.as_deref(),
                        &mut meta_key,
                    );
                }
                text.clear();
            }
            Event::Text(t) => text.push_str(&t.unescape().map_err(xml_err)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::Eof => break,
            _ => {}
        }
    }

    if !path.is_empty() {
        return Err(MigrateError::ParseFailure(format!(
            "unexpected end of document inside <{}>",
            path.join("/")
        )));
    }
    if !saw_channel {
        return Err(MigrateError::ParseFailure(
            "export has no <channel> element".to_owned(),
        ));
    }

    Ok(items)
}

fn apply_field(
    item: &mut ExportItem,
    parent: &str,
    name: &str,
    value: &str,
    category_domain: Option<&str>,
    meta_key: &mut String,
) {
    if parent == "wp:postmeta" {
        match name {
            "wp:meta_key" => *meta_key = value.to_owned(),
            "wp:meta_value" => item
                .meta
                .push((std::mem::take(meta_key), value.to_owned())),
            _ => {}
        }
        return;
    }
    if parent != "item" {
        return;
    }

    match name {
        "title" => item.title = value.to_owned(),
        "link" => item.link = value.to_owned(),
        "guid" => item.guid = value.to_owned(),
        "content:encoded" => item.content = value.to_owned(),
        "excerpt:encoded" => item.excerpt = value.to_owned(),
        "dc:creator" => item.creator = value.to_owned(),
        "wp:post_id" => item.post_id = value.to_owned(),
        "wp:post_name" => item.slug = value.to_owned(),
        "wp:post_date" => item.date = value.to_owned(),
        "wp:status" => item.status = value.to_owned(),
        "wp:post_type" => item.post_type = value.to_owned(),
        "wp:attachment_url" if !value.is_empty() => {
            item.attachment_url = Some(value.to_owned());
        }
        "category" if !value.is_empty() => match category_domain {
            Some("post_tag") => push_unique(&mut item.tags, value),
            Some("category") | None => push_unique(&mut item.categories, value),
            Some(_) => {}
        },
        _ => {}
    }
}

fn xml_err(err: impl std::fmt::Display) -> MigrateError {
    MigrateError::ParseFailure(err.to_string())
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_owned());
    }
}

fn source_path_from_link(link: &str) -> String {
    match Url::parse(link) {
        Ok(url) => url.path().to_owned(),
        Err(_) => link.to_owned(),
    }
}
