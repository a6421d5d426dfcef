mod backoff;
mod config;
mod coordinator;
mod events;
mod gather;
mod paths;
mod registry;
mod transfer;
mod view;
mod watchdog;

pub use backoff::Backoff;
pub use config::EngineConfig;
pub use coordinator::SyncCoordinator;
pub use events::{EventStream, TransferEvent};
pub use gather::{GatherStream, Listing};
pub use registry::{ObserverRegistry, OperationToken, TerminalLatch};
pub use transfer::Transfer;

pub use syncgate_core::{
    AccessContext, AccessError, AccessMode, CoordinatedAccess, DownloadStatus, ErrorKind,
    IndexFeed, IndexQuery, IndexSnapshot, IndexUpdate, InvalidEntry, Item, MetadataIndex,
    RawEntry, SubscriptionGuard, SyncError, classify, parse_entry,
};
