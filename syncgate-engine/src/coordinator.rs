use std::path::Path;
use std::sync::Arc;

use syncgate_core::{
    AccessContext, CoordinatedAccess, Item, MetadataIndex, SyncError, classify,
};

use crate::backoff::Backoff;
use crate::config::EngineConfig;
use crate::events::TransferEvent;
use crate::gather::{self, GatherStream, Listing};
use crate::paths;
use crate::registry::ObserverRegistry;
use crate::transfer::{self, OpContext, Transfer};
use crate::view::IndexView;

/// The engine facade consumed by the language-binding layer. Drives every
/// operation to a single terminal outcome over the two collaborator ports.
pub struct SyncCoordinator {
    access: Arc<dyn CoordinatedAccess>,
    index: Arc<dyn MetadataIndex>,
    view: IndexView,
    registry: Arc<ObserverRegistry>,
    config: EngineConfig,
    backoff: Backoff,
}

impl SyncCoordinator {
    pub fn new(access: Arc<dyn CoordinatedAccess>, index: Arc<dyn MetadataIndex>) -> Self {
        Self::with_config(access, index, EngineConfig::default())
    }

    pub fn with_config(
        access: Arc<dyn CoordinatedAccess>,
        index: Arc<dyn MetadataIndex>,
        config: EngineConfig,
    ) -> Self {
        let backoff = config.backoff();
        Self {
            view: IndexView::new(Arc::clone(&index)),
            registry: Arc::new(ObserverRegistry::new()),
            access,
            index,
            config,
            backoff,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Operations currently holding a live index subscription.
    pub fn active_operations(&self) -> usize {
        self.registry.active()
    }

    /// Begin downloading `path` and return the operation handle. The handle's
    /// event stream carries progress and exactly one terminal event.
    pub async fn start_download(&self, path: &str) -> Result<Transfer, SyncError> {
        let path = self.container_path(path)?;
        transfer::start_download(self.op_context(), path).await
    }

    /// Download `path` to local availability, discarding progress.
    pub async fn download(&self, path: &str) -> Result<(), SyncError> {
        self.start_download(path).await?.wait().await
    }

    /// Download `path`, reporting each forwarded progress fraction.
    pub async fn download_with(
        &self,
        path: &str,
        mut on_progress: impl FnMut(f64),
    ) -> Result<(), SyncError> {
        let mut transfer = self.start_download(path).await?;
        loop {
            match transfer.next_event().await {
                Some(TransferEvent::Progress(value)) => on_progress(value),
                Some(TransferEvent::Done) => return Ok(()),
                Some(TransferEvent::Failed(err)) => return Err(err),
                None => return transfer.wait().await,
            }
        }
    }

    /// Begin uploading the local file at `source` to the container path
    /// `cloud_path`.
    pub async fn start_upload(&self, source: &Path, cloud_path: &str) -> Result<Transfer, SyncError> {
        let cloud_path = self.container_path(cloud_path)?;
        transfer::start_upload(self.op_context(), source.to_path_buf(), cloud_path).await
    }

    pub async fn upload(&self, source: &Path, cloud_path: &str) -> Result<(), SyncError> {
        self.start_upload(source, cloud_path).await?.wait().await
    }

    pub async fn upload_with(
        &self,
        source: &Path,
        cloud_path: &str,
        mut on_progress: impl FnMut(f64),
    ) -> Result<(), SyncError> {
        let mut transfer = self.start_upload(source, cloud_path).await?;
        loop {
            match transfer.next_event().await {
                Some(TransferEvent::Progress(value)) => on_progress(value),
                Some(TransferEvent::Done) => return Ok(()),
                Some(TransferEvent::Failed(err)) => return Err(err),
                None => return transfer.wait().await,
            }
        }
    }

    /// Enumerate the container below `root` ("" or "/" for the whole
    /// container). Malformed entries are reported alongside the parsed ones,
    /// never as a hard failure.
    pub async fn gather(&self, root: &str) -> Result<Listing, SyncError> {
        let root = self.container_root(root)?;
        gather::gather_once(&self.view, &self.registry, &self.config, root).await
    }

    /// Like [`Self::gather`], but stays subscribed and re-emits a fresh
    /// listing per index update until the stream is cancelled.
    pub async fn gather_live(&self, root: &str) -> Result<GatherStream, SyncError> {
        let root = self.container_root(root)?;
        gather::gather_live(&self.view, &self.registry, &self.config, root).await
    }

    /// Remove `path` from the container. The source is resolved through the
    /// metadata index first, so remote-only items delete correctly.
    pub async fn delete(&self, path: &str) -> Result<(), SyncError> {
        let path = self.container_path(path)?;
        self.resolve(&path).await?;
        tracing::debug!(path = %path, "deleting item");
        self.access
            .remove_item(&path)
            .await
            .map_err(|err| classify(err, AccessContext::Neutral))
    }

    pub async fn move_item(&self, from: &str, to: &str) -> Result<(), SyncError> {
        let from = self.container_path(from)?;
        let to = self.container_path(to)?;
        self.resolve(&from).await?;
        tracing::debug!(from = %from, to = %to, "moving item");
        self.access
            .move_item(&from, &to)
            .await
            .map_err(|err| classify(err, AccessContext::Neutral))
    }

    pub async fn copy_item(&self, from: &str, to: &str) -> Result<(), SyncError> {
        let from = self.container_path(from)?;
        let to = self.container_path(to)?;
        self.resolve(&from).await?;
        tracing::debug!(from = %from, to = %to, "copying item");
        self.access
            .copy_item(&from, &to)
            .await
            .map_err(|err| classify(err, AccessContext::Neutral))
    }

    /// Whether a local copy of `path` is available right now. `false` says
    /// nothing about remote existence: a remote-only item reports `false`
    /// here and still downloads fine.
    pub async fn exists(&self, path: &str) -> Result<bool, SyncError> {
        let path = self.container_path(path)?;
        match self.view.find(&path).await? {
            // Directories carry no payload; indexed means present.
            Some(item) if item.is_directory => Ok(true),
            Some(item) => Ok(item.download_status.is_local()),
            None => Ok(false),
        }
    }

    async fn resolve(&self, path: &str) -> Result<Item, SyncError> {
        self.view
            .find(path)
            .await?
            .ok_or_else(|| SyncError::NotFound(path.to_string()))
    }

    fn container_path(&self, path: &str) -> Result<String, SyncError> {
        paths::normalize(path).map_err(|err| SyncError::InvalidArgument(err.to_string()))
    }

    fn container_root(&self, path: &str) -> Result<String, SyncError> {
        paths::normalize_root(path).map_err(|err| SyncError::InvalidArgument(err.to_string()))
    }

    fn op_context(&self) -> OpContext {
        OpContext {
            access: Arc::clone(&self.access),
            index: Arc::clone(&self.index),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            backoff: self.backoff,
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests/harness.rs"]
mod harness;
#[cfg(test)]
#[path = "coordinator_tests/part1.rs"]
mod transfer_tests;
#[cfg(test)]
#[path = "coordinator_tests/part2.rs"]
mod listing_tests;
