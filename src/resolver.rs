use std::collections::HashMap;

use crate::extract::ExportItem;
use crate::formats::AssetRecord;

/// Maps attachment ids declared in the export to their source URLs.
///
/// Built once from the whole export before any post is transformed and
/// read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct AssetResolver {
    by_id: HashMap<String, String>,
}

impl AssetResolver {
    pub fn from_items(items: &[ExportItem]) -> Self {
        Self::from_records(items.iter().filter_map(asset_record))
    }

    /// Later records win over earlier ones with the same `source_id`.
    pub fn from_records(records: impl IntoIterator<Item = AssetRecord>) -> Self {
        let mut by_id = HashMap::new();
        for record in records {
            if let Some(previous) = by_id.insert(record.source_id.clone(), record.source_url) {
                tracing::debug!(
                    source_id = %record.source_id,
                    previous = %previous,
                    "duplicate attachment id; keeping the later declaration"
                );
            }
        }
        Self { by_id }
    }

    pub fn resolve(&self, source_id: &str) -> Option<&str> {
        self.by_id.get(source_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

fn asset_record(item: &ExportItem) -> Option<AssetRecord> {
    if !item.is_attachment() || item.post_id.is_empty() {
        return None;
    }
    let source_url = item
        .attachment_url
        .clone()
        .or_else(|| (!item.guid.is_empty()).then(|| item.guid.clone()))?;
    Some(AssetRecord {
        source_id: item.post_id.clone(),
        source_url,
    })
}
