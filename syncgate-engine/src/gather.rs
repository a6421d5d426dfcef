use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

use syncgate_core::{
    IndexFeed, IndexQuery, IndexSnapshot, IndexUpdate, InvalidEntry, Item, SyncError, parse_entry,
};

use crate::config::EngineConfig;
use crate::registry::{ObserverRegistry, OperationToken, TerminalLatch};
use crate::view::{IndexView, feed_closed};

/// Result of one listing pass: the entries that parsed, sorted by path, and a
/// record of every entry that did not. Malformed entries are expected from a
/// live index and never fail the listing as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Listing {
    pub items: Vec<Item>,
    pub invalid: Vec<InvalidEntry>,
}

impl Listing {
    pub(crate) fn parse(snapshot: &IndexSnapshot) -> Self {
        let mut items = Vec::new();
        let mut invalid = Vec::new();
        for (index, raw) in snapshot.entries.iter().enumerate() {
            match parse_entry(raw) {
                Ok(item) => items.push(item),
                Err(err) => invalid.push(InvalidEntry {
                    index,
                    reason: err.to_string(),
                }),
            }
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Self { items, invalid }
    }
}

pub(crate) async fn gather_once(
    view: &IndexView,
    registry: &Arc<ObserverRegistry>,
    config: &EngineConfig,
    root: String,
) -> Result<Listing, SyncError> {
    let query = IndexQuery::Prefix(root.clone());
    let (mut feed, guard) = view.subscribe(&query).await?;
    let (token, _latch) = registry.register(guard);

    let initial = timeout(config.idle_interval, wait_gather_complete(&mut feed)).await;
    registry.release(token);

    match initial {
        Ok(Some(snapshot)) => Ok(Listing::parse(&snapshot)),
        Ok(None) => Err(feed_closed("gather")),
        Err(_) => Err(SyncError::Timeout {
            path: root,
            attempts: 1,
        }),
    }
}

pub(crate) async fn gather_live(
    view: &IndexView,
    registry: &Arc<ObserverRegistry>,
    config: &EngineConfig,
    root: String,
) -> Result<GatherStream, SyncError> {
    let query = IndexQuery::Prefix(root.clone());
    let (mut feed, guard) = view.subscribe(&query).await?;
    let (token, latch) = registry.register(guard);

    let initial = match timeout(config.idle_interval, wait_gather_complete(&mut feed)).await {
        Ok(Some(snapshot)) => Listing::parse(&snapshot),
        Ok(None) => {
            registry.release(token);
            return Err(feed_closed("gather"));
        }
        Err(_) => {
            registry.release(token);
            return Err(SyncError::Timeout {
                path: root,
                attempts: 1,
            });
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let relay_latch = Arc::clone(&latch);
    let relay_registry = Arc::clone(registry);
    tokio::spawn(async move {
        while let Some(update) = feed.recv().await {
            if relay_latch.is_claimed() {
                break;
            }
            if tx.send(Listing::parse(update.snapshot())).is_err() {
                break;
            }
        }
        relay_registry.release(token);
    });

    Ok(GatherStream {
        initial: Some(initial),
        updates: rx,
        token,
        registry: Arc::clone(registry),
        latch,
    })
}

async fn wait_gather_complete(feed: &mut IndexFeed) -> Option<IndexSnapshot> {
    while let Some(update) = feed.recv().await {
        if let IndexUpdate::GatherComplete(snapshot) = update {
            return Some(snapshot);
        }
    }
    None
}

/// Live listing. Yields a fresh [`Listing`] per index update until the caller
/// cancels; cancellation releases the underlying subscription before
/// returning.
pub struct GatherStream {
    initial: Option<Listing>,
    updates: mpsc::UnboundedReceiver<Listing>,
    token: OperationToken,
    registry: Arc<ObserverRegistry>,
    latch: Arc<TerminalLatch>,
}

impl GatherStream {
    /// The listing captured when the initial gather completed. Consumable
    /// once.
    pub fn take_initial(&mut self) -> Option<Listing> {
        self.initial.take()
    }

    pub async fn next(&mut self) -> Option<Listing> {
        self.updates.recv().await
    }

    pub fn token(&self) -> OperationToken {
        self.token
    }

    /// Stop the live query and silence the stream. No update is delivered
    /// after this returns.
    pub fn cancel(&mut self) {
        self.latch.claim();
        self.registry.release(self.token);
        self.updates.close();
        while self.updates.try_recv().is_ok() {}
    }
}

impl Drop for GatherStream {
    fn drop(&mut self) {
        self.latch.claim();
        self.registry.release(self.token);
    }
}

impl Stream for GatherStream {
    type Item = Listing;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(initial) = self.initial.take() {
            return Poll::Ready(Some(initial));
        }
        self.updates.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_keeps_invalid_entries_alongside_items() {
        let snapshot = IndexSnapshot {
            entries: vec![
                json!({ "path": "b" }),
                json!({ "size": 2 }),
                json!({ "path": "a" }),
            ],
        };
        let listing = Listing::parse(&snapshot);
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.items[0].path, "a");
        assert_eq!(listing.items[1].path, "b");
        assert_eq!(listing.invalid.len(), 1);
        assert_eq!(listing.invalid[0].index, 1);
        assert!(listing.invalid[0].reason.contains("path"));
    }
}
