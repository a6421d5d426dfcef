mod access;
mod error;
mod index;
mod item;

pub use access::{AccessError, AccessMode, CoordinatedAccess};
pub use error::{AccessContext, ErrorKind, SyncError, classify};
pub use index::{
    IndexFeed, IndexQuery, IndexSnapshot, IndexUpdate, MetadataIndex, RawEntry, SubscriptionGuard,
};
pub use item::{DownloadStatus, EntryError, InvalidEntry, Item, parse_entry};
