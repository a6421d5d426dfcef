use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use syncgate_core::{
    AccessContext, AccessError, AccessMode, CoordinatedAccess, DownloadStatus, IndexFeed,
    IndexQuery, MetadataIndex, SyncError, classify,
};

use crate::backoff::Backoff;
use crate::config::EngineConfig;
use crate::events::{EventSink, EventStream, TransferEvent};
use crate::registry::{ObserverRegistry, OperationToken, TerminalLatch};
use crate::view::{entry_for, feed_closed};
use crate::watchdog::IdleWatchdog;

/// Everything an operation needs from the coordinator, cloned per call.
pub(crate) struct OpContext {
    pub(crate) access: Arc<dyn CoordinatedAccess>,
    pub(crate) index: Arc<dyn MetadataIndex>,
    pub(crate) registry: Arc<ObserverRegistry>,
    pub(crate) config: EngineConfig,
    pub(crate) backoff: Backoff,
}

/// One in-flight download or upload. Events arrive through [`Self::next_event`]
/// (or the `Stream` impl); exactly one terminal event ends the sequence.
/// Dropping the handle detaches the operation, which still runs to its
/// terminal state and releases its subscription.
pub struct Transfer {
    token: OperationToken,
    path: String,
    events: EventStream,
    cancel: CancellationToken,
    registry: Arc<ObserverRegistry>,
    latch: Arc<TerminalLatch>,
}

impl Transfer {
    pub fn token(&self) -> OperationToken {
        self.token
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    /// Drain events until the terminal one and return it as a result.
    pub async fn wait(mut self) -> Result<(), SyncError> {
        while let Some(event) = self.events.recv().await {
            match event {
                TransferEvent::Progress(_) => {}
                TransferEvent::Done => return Ok(()),
                TransferEvent::Failed(err) => return Err(err),
            }
        }
        Err(SyncError::Native {
            source: AccessError::Backend {
                operation: "transfer",
                message: "event stream ended without a terminal event".into(),
            },
        })
    }

    /// Abort the operation. The subscription is released before this returns
    /// and no terminal event is delivered afterwards.
    pub fn cancel(mut self) {
        self.latch.claim();
        self.cancel.cancel();
        self.registry.release(self.token);
        self.events.close_and_drain();
    }
}

impl Stream for Transfer {
    type Item = TransferEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

pub(crate) async fn start_download(ctx: OpContext, path: String) -> Result<Transfer, SyncError> {
    let query = IndexQuery::Path(path.clone());
    let (feed, guard) = ctx
        .index
        .subscribe(&query)
        .await
        .map_err(|err| classify(err, AccessContext::Neutral))?;
    let (token, latch) = ctx.registry.register(guard);

    // The index is advisory: an item already marked current still gets its
    // coordinated-open probe, it only skips the fetch request.
    let already_current = match ctx.index.snapshot(&query).await {
        Ok(snapshot) => entry_for(&snapshot, &path)
            .is_some_and(|item| item.download_status == DownloadStatus::Current),
        Err(_) => false,
    };
    if !already_current {
        if let Err(err) = ctx.access.request_fetch(&path).await {
            ctx.registry.release(token);
            return Err(classify(err, AccessContext::Neutral));
        }
    }

    let cancel = CancellationToken::new();
    let (sink, events) = EventSink::channel(Arc::clone(&latch));
    let (probe_tx, probe_rx) = mpsc::unbounded_channel();
    let core = TaskCore {
        access: ctx.access,
        index: ctx.index,
        registry: Arc::clone(&ctx.registry),
        config: ctx.config,
        backoff: ctx.backoff,
        path: path.clone(),
        token,
        latch: Arc::clone(&latch),
        sink,
        cancel: cancel.clone(),
        probe_tx,
    };
    tracing::debug!(token = %token, path = %path, already_current, "download started");
    tokio::spawn(DownloadTask { core }.run(feed, already_current, probe_rx));

    Ok(Transfer {
        token,
        path,
        events,
        cancel,
        registry: ctx.registry,
        latch,
    })
}

pub(crate) async fn start_upload(
    ctx: OpContext,
    source: PathBuf,
    path: String,
) -> Result<Transfer, SyncError> {
    let query = IndexQuery::Path(path.clone());
    let (feed, guard) = ctx
        .index
        .subscribe(&query)
        .await
        .map_err(|err| classify(err, AccessContext::Neutral))?;
    let (token, latch) = ctx.registry.register(guard);

    let cancel = CancellationToken::new();
    let (sink, events) = EventSink::channel(Arc::clone(&latch));
    let (probe_tx, probe_rx) = mpsc::unbounded_channel();
    let core = TaskCore {
        access: ctx.access,
        index: ctx.index,
        registry: Arc::clone(&ctx.registry),
        config: ctx.config,
        backoff: ctx.backoff,
        path: path.clone(),
        token,
        latch: Arc::clone(&latch),
        sink,
        cancel: cancel.clone(),
        probe_tx,
    };
    tracing::debug!(token = %token, path = %path, source = %source.display(), "upload started");
    tokio::spawn(UploadTask { core, source }.run(feed, probe_rx));

    Ok(Transfer {
        token,
        path,
        events,
        cancel,
        registry: ctx.registry,
        latch,
    })
}

/// What broke an operation out of its notification loop.
enum Decision {
    /// Caller cancelled; the registry was already released on their side.
    Stop,
    Terminal(Result<(), SyncError>),
    Idle,
}

struct TaskCore {
    access: Arc<dyn CoordinatedAccess>,
    index: Arc<dyn MetadataIndex>,
    registry: Arc<ObserverRegistry>,
    config: EngineConfig,
    backoff: Backoff,
    path: String,
    token: OperationToken,
    latch: Arc<TerminalLatch>,
    sink: EventSink,
    cancel: CancellationToken,
    probe_tx: mpsc::UnboundedSender<Result<(), AccessError>>,
}

impl TaskCore {
    /// Claim the terminal state, release the observer, then deliver. The
    /// release-before-delivery order keeps late notifications from firing
    /// after the caller has seen the result.
    fn finalize(&self, outcome: Result<(), SyncError>) {
        if !self.latch.claim() {
            return;
        }
        self.registry.release(self.token);
        match outcome {
            Ok(()) => {
                tracing::debug!(token = %self.token, path = %self.path, "transfer done");
                self.sink.done();
            }
            Err(err) => {
                tracing::warn!(token = %self.token, path = %self.path, error = %err, "transfer failed");
                self.sink.fail(err);
            }
        }
    }

    fn spawn_open_probe(&self) {
        let access = Arc::clone(&self.access);
        let path = self.path.clone();
        let tx = self.probe_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(access.open(&path, AccessMode::Read).await);
        });
    }

    fn spawn_store_probe(&self, source: &Path) -> JoinHandle<()> {
        let access = Arc::clone(&self.access);
        let source = source.to_path_buf();
        let dest = self.path.clone();
        let tx = self.probe_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(access.store(&source, &dest).await);
        })
    }

    /// Start a fresh index query for this operation, stopping the previous
    /// one through the registry.
    async fn resubscribe(&self) -> Result<IndexFeed, SyncError> {
        let query = IndexQuery::Path(self.path.clone());
        let (feed, guard) = self
            .index
            .subscribe(&query)
            .await
            .map_err(|err| classify(err, AccessContext::Neutral))?;
        self.registry.swap_guard(self.token, guard);
        Ok(feed)
    }

    /// Returns false if the caller cancelled during the delay.
    async fn backoff_sleep(&self, attempt: u32) -> bool {
        let delay = self.backoff.delay(attempt);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

struct DownloadTask {
    core: TaskCore,
}

impl DownloadTask {
    async fn run(
        self,
        mut feed: IndexFeed,
        open_now: bool,
        mut probe_rx: mpsc::UnboundedReceiver<Result<(), AccessError>>,
    ) {
        let mut open_in_flight = open_now;
        if open_now {
            self.core.spawn_open_probe();
        }
        let mut attempt: u32 = 1;
        let mut watchdog = IdleWatchdog::new(self.core.config.idle_interval);
        let mut last_status: Option<DownloadStatus> = None;

        loop {
            let decision = loop {
                tokio::select! {
                    _ = self.core.cancel.cancelled() => break Decision::Stop,
                    Some(result) = probe_rx.recv() => {
                        break Decision::Terminal(
                            result.map_err(|err| classify(err, AccessContext::Read)),
                        );
                    }
                    update = feed.recv() => match update {
                        None => break Decision::Terminal(Err(feed_closed("download"))),
                        Some(update) => {
                            if let Some(item) = entry_for(update.snapshot(), &self.core.path) {
                                if let Some(progress) = item.download_progress
                                    && self.core.sink.progress(progress)
                                {
                                    watchdog.reset();
                                }
                                if last_status != Some(item.download_status) {
                                    last_status = Some(item.download_status);
                                    watchdog.reset();
                                }
                                if item.download_status == DownloadStatus::Current
                                    && !open_in_flight
                                {
                                    open_in_flight = true;
                                    self.core.spawn_open_probe();
                                }
                            }
                        }
                    },
                    _ = watchdog.expired() => break Decision::Idle,
                }
            };

            match decision {
                Decision::Stop => return,
                Decision::Terminal(outcome) => {
                    self.core.finalize(outcome);
                    return;
                }
                Decision::Idle => {
                    if attempt >= self.core.config.max_attempts {
                        self.core.finalize(Err(SyncError::Timeout {
                            path: self.core.path.clone(),
                            attempts: attempt,
                        }));
                        return;
                    }
                    attempt += 1;
                    if !self.core.backoff_sleep(attempt).await {
                        return;
                    }
                    // A hung open probe keeps running; a late success still
                    // wins the latch. Only the fetch and the query restart.
                    feed = match self.core.resubscribe().await {
                        Ok(feed) => feed,
                        Err(err) => {
                            self.core.finalize(Err(err));
                            return;
                        }
                    };
                    if let Err(err) = self.core.access.request_fetch(&self.core.path).await {
                        self.core
                            .finalize(Err(classify(err, AccessContext::Neutral)));
                        return;
                    }
                    watchdog.reset();
                    tracing::debug!(
                        token = %self.core.token,
                        path = %self.core.path,
                        attempt,
                        "download retrying after idle period"
                    );
                }
            }
        }
    }
}

struct UploadTask {
    core: TaskCore,
    source: PathBuf,
}

impl UploadTask {
    async fn run(
        self,
        mut feed: IndexFeed,
        mut probe_rx: mpsc::UnboundedReceiver<Result<(), AccessError>>,
    ) {
        let mut probe = Some(self.core.spawn_store_probe(&self.source));
        let mut attempt: u32 = 1;
        let mut watchdog = IdleWatchdog::new(self.core.config.idle_interval);
        let mut last_flags: Option<(bool, bool)> = None;

        loop {
            let decision = loop {
                tokio::select! {
                    _ = self.core.cancel.cancelled() => break Decision::Stop,
                    Some(result) = probe_rx.recv() => {
                        // The coordinated write reporting success is as
                        // terminal as the uploaded flag; backend ordering
                        // between the two is unspecified.
                        break Decision::Terminal(
                            result.map_err(|err| classify(err, AccessContext::Write)),
                        );
                    }
                    update = feed.recv() => match update {
                        None => break Decision::Terminal(Err(feed_closed("upload"))),
                        Some(update) => {
                            if let Some(item) = entry_for(update.snapshot(), &self.core.path) {
                                if let Some(progress) = item.upload_progress
                                    && self.core.sink.progress(progress)
                                {
                                    watchdog.reset();
                                }
                                let flags = (item.is_uploading, item.is_uploaded);
                                if last_flags != Some(flags) {
                                    last_flags = Some(flags);
                                    watchdog.reset();
                                }
                                if item.is_uploaded && !item.is_uploading {
                                    break Decision::Terminal(Ok(()));
                                }
                            }
                        }
                    },
                    _ = watchdog.expired() => break Decision::Idle,
                }
            };

            match decision {
                Decision::Stop => return,
                Decision::Terminal(outcome) => {
                    self.core.finalize(outcome);
                    return;
                }
                Decision::Idle => {
                    if attempt >= self.core.config.max_attempts {
                        self.core.finalize(Err(SyncError::Timeout {
                            path: self.core.path.clone(),
                            attempts: attempt,
                        }));
                        return;
                    }
                    attempt += 1;
                    if !self.core.backoff_sleep(attempt).await {
                        return;
                    }
                    feed = match self.core.resubscribe().await {
                        Ok(feed) => feed,
                        Err(err) => {
                            self.core.finalize(Err(err));
                            return;
                        }
                    };
                    // The write is idempotent for one source/dest pair;
                    // restart it rather than wait on a stalled attempt.
                    if let Some(handle) = probe.take() {
                        handle.abort();
                    }
                    probe = Some(self.core.spawn_store_probe(&self.source));
                    watchdog.reset();
                    tracing::debug!(
                        token = %self.core.token,
                        path = %self.core.path,
                        attempt,
                        "upload retrying after idle period"
                    );
                }
            }
        }
    }
}
