use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::access::AccessError;

/// Entries arrive from the live index as loosely-typed objects; parsing into
/// [`crate::Item`] happens per entry and may fail independently.
pub type RawEntry = Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    /// Exactly one item.
    Path(String),
    /// An item and everything below it. The empty prefix is the container root.
    Prefix(String),
}

impl IndexQuery {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            IndexQuery::Path(target) => path == target,
            IndexQuery::Prefix(prefix) => {
                prefix.is_empty()
                    || path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub entries: Vec<RawEntry>,
}

/// One signal on a live query. `GatherComplete` is delivered once, before any
/// `Changed`; no further ordering may be assumed.
#[derive(Debug, Clone)]
pub enum IndexUpdate {
    GatherComplete(IndexSnapshot),
    Changed(IndexSnapshot),
}

impl IndexUpdate {
    pub fn snapshot(&self) -> &IndexSnapshot {
        match self {
            IndexUpdate::GatherComplete(snapshot) | IndexUpdate::Changed(snapshot) => snapshot,
        }
    }
}

/// Receiving half of a live query.
#[derive(Debug)]
pub struct IndexFeed {
    rx: mpsc::UnboundedReceiver<IndexUpdate>,
}

impl IndexFeed {
    pub fn channel() -> (mpsc::UnboundedSender<IndexUpdate>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    pub async fn recv(&mut self) -> Option<IndexUpdate> {
        self.rx.recv().await
    }
}

/// Owned handle to the running query behind a subscription. The query is
/// stopped exactly once: on the first `stop` call or on drop, whichever comes
/// first.
pub struct SubscriptionGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// A guard with no backing resource, for index implementations whose
    /// queries need no explicit teardown.
    pub fn noop() -> Self {
        Self { stop: None }
    }

    pub fn stop(mut self) {
        self.stop_once();
    }

    fn stop_once(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.stop_once();
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("armed", &self.stop.is_some())
            .finish()
    }
}

/// The live metadata index of the container. Implemented outside the engine.
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    /// Pull a point-in-time view. May be stale or partial; absence of an
    /// entry is never proof that a remote-only item does not exist.
    async fn snapshot(&self, query: &IndexQuery) -> Result<IndexSnapshot, AccessError>;

    /// Start a live query. Each call starts one external query resource that
    /// runs until the returned guard stops it.
    async fn subscribe(
        &self,
        query: &IndexQuery,
    ) -> Result<(IndexFeed, SubscriptionGuard), AccessError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn path_query_matches_exactly() {
        let query = IndexQuery::Path("Docs/A.txt".into());
        assert!(query.matches("Docs/A.txt"));
        assert!(!query.matches("Docs/A.txt.bak"));
        assert!(!query.matches("Docs"));
    }

    #[test]
    fn prefix_query_matches_subtree() {
        let query = IndexQuery::Prefix("Docs".into());
        assert!(query.matches("Docs"));
        assert!(query.matches("Docs/A.txt"));
        assert!(query.matches("Docs/sub/B.txt"));
        assert!(!query.matches("Documents/A.txt"));

        let root = IndexQuery::Prefix(String::new());
        assert!(root.matches("anything/at/all"));
    }

    #[test]
    fn guard_stops_exactly_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&stops);
        let guard = SubscriptionGuard::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        guard.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let counted = Arc::clone(&stops);
        drop(SubscriptionGuard::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn feed_delivers_in_order_and_closes() {
        let (tx, mut feed) = IndexFeed::channel();
        tx.send(IndexUpdate::GatherComplete(IndexSnapshot::default()))
            .unwrap();
        tx.send(IndexUpdate::Changed(IndexSnapshot::default()))
            .unwrap();
        drop(tx);

        assert!(matches!(
            feed.recv().await,
            Some(IndexUpdate::GatherComplete(_))
        ));
        assert!(matches!(feed.recv().await, Some(IndexUpdate::Changed(_))));
        assert!(feed.recv().await.is_none());
    }
}
