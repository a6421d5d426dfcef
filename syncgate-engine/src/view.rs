use std::sync::Arc;

use syncgate_core::{
    AccessContext, IndexFeed, IndexQuery, IndexSnapshot, Item, MetadataIndex, SubscriptionGuard,
    SyncError, classify, parse_entry,
};

use crate::gather::Listing;

/// Engine-side view over the live metadata index: classifies raw failures at
/// the boundary and parses raw entries into the item model.
pub(crate) struct IndexView {
    index: Arc<dyn MetadataIndex>,
}

impl IndexView {
    pub(crate) fn new(index: Arc<dyn MetadataIndex>) -> Self {
        Self { index }
    }

    pub(crate) async fn snapshot_listing(&self, query: &IndexQuery) -> Result<Listing, SyncError> {
        let snapshot = self
            .index
            .snapshot(query)
            .await
            .map_err(|err| classify(err, AccessContext::Neutral))?;
        Ok(Listing::parse(&snapshot))
    }

    /// Targeted lookup of one item. `Ok(None)` means the index has no
    /// well-formed entry for the path right now; it is not proof of absence.
    pub(crate) async fn find(&self, path: &str) -> Result<Option<Item>, SyncError> {
        let query = IndexQuery::Path(path.to_string());
        let snapshot = self
            .index
            .snapshot(&query)
            .await
            .map_err(|err| classify(err, AccessContext::Neutral))?;
        Ok(entry_for(&snapshot, path))
    }

    pub(crate) async fn subscribe(
        &self,
        query: &IndexQuery,
    ) -> Result<(IndexFeed, SubscriptionGuard), SyncError> {
        self.index
            .subscribe(query)
            .await
            .map_err(|err| classify(err, AccessContext::Neutral))
    }
}

/// A feed that closes before its operation completes means the external query
/// died underneath us.
pub(crate) fn feed_closed(operation: &'static str) -> SyncError {
    SyncError::Native {
        source: syncgate_core::AccessError::Backend {
            operation,
            message: "index feed closed before completion".into(),
        },
    }
}

/// First well-formed entry matching `path`; malformed entries are skipped.
pub(crate) fn entry_for(snapshot: &IndexSnapshot, path: &str) -> Option<Item> {
    snapshot
        .entries
        .iter()
        .filter_map(|raw| parse_entry(raw).ok())
        .find(|item| item.path == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_for_skips_malformed_entries() {
        let snapshot = IndexSnapshot {
            entries: vec![
                json!({ "size": 1 }),
                json!({ "path": "Docs/A.txt", "download_status": "current" }),
            ],
        };
        let item = entry_for(&snapshot, "Docs/A.txt").unwrap();
        assert_eq!(item.download_status, syncgate_core::DownloadStatus::Current);
        assert!(entry_for(&snapshot, "Docs/B.txt").is_none());
    }
}
