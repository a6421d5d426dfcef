use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use syncgate_core::SyncError;

use crate::registry::TerminalLatch;

/// One element of a transfer's event sequence. Exactly one terminal element
/// (`Done` or `Failed`) closes the sequence; nothing follows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TransferEvent {
    Progress(f64),
    Done,
    Failed(SyncError),
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferEvent::Done | TransferEvent::Failed(_))
    }
}

/// Producing half of a transfer's event channel. Enforces the progress
/// high-water mark; terminal emission goes through the operation's latch
/// before it reaches this sink.
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<TransferEvent>,
    latch: Arc<TerminalLatch>,
    // f64 bits of the highest progress forwarded so far
    high_water: AtomicU64,
}

impl EventSink {
    pub(crate) fn channel(latch: Arc<TerminalLatch>) -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EventSink {
                tx,
                latch,
                high_water: AtomicU64::new((-1.0f64).to_bits()),
            },
            EventStream { rx },
        )
    }

    /// Forward a progress value. Non-finite values, values at or below the
    /// high-water mark, and values arriving after the terminal claim are
    /// dropped. Returns whether the value was delivered.
    pub(crate) fn progress(&self, value: f64) -> bool {
        if !value.is_finite() || self.latch.is_claimed() {
            return false;
        }
        let value = value.clamp(0.0, 1.0);
        let advanced = self
            .high_water
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (value > f64::from_bits(bits)).then(|| value.to_bits())
            });
        advanced.is_ok() && self.tx.send(TransferEvent::Progress(value)).is_ok()
    }

    /// Emit the success terminal, preceded by 100% progress if the stream has
    /// not seen it yet. Only the latch winner calls this.
    pub(crate) fn done(&self) {
        let bits = self.high_water.swap(1.0f64.to_bits(), Ordering::AcqRel);
        if f64::from_bits(bits) < 1.0 {
            let _ = self.tx.send(TransferEvent::Progress(1.0));
        }
        let _ = self.tx.send(TransferEvent::Done);
    }

    /// Emit the failure terminal. Only the latch winner calls this.
    pub(crate) fn fail(&self, err: SyncError) {
        let _ = self.tx.send(TransferEvent::Failed(err));
    }
}

/// Consuming half of a transfer's event channel. Usable by awaiting `recv`,
/// by polling `try_recv`, or as a `futures_util::Stream`.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<TransferEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransferEvent> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn close_and_drain(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Stream for EventStream {
    type Item = TransferEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncgate_core::ErrorKind;

    fn sink() -> (EventSink, EventStream, Arc<TerminalLatch>) {
        let latch = Arc::new(TerminalLatch::default());
        let (sink, stream) = EventSink::channel(Arc::clone(&latch));
        (sink, stream, latch)
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_drops_stale_values() {
        let (sink, mut stream, _latch) = sink();
        assert!(sink.progress(0.2));
        assert!(sink.progress(0.5));
        assert!(!sink.progress(0.3));
        assert!(!sink.progress(0.5));
        assert!(sink.progress(0.9));

        assert_eq!(stream.recv().await, Some(TransferEvent::Progress(0.2)));
        assert_eq!(stream.recv().await, Some(TransferEvent::Progress(0.5)));
        assert_eq!(stream.recv().await, Some(TransferEvent::Progress(0.9)));
    }

    #[tokio::test]
    async fn non_finite_progress_is_dropped() {
        let (sink, mut stream, _latch) = sink();
        assert!(!sink.progress(f64::NAN));
        assert!(!sink.progress(f64::INFINITY));
        assert!(sink.progress(0.1));
        assert_eq!(stream.recv().await, Some(TransferEvent::Progress(0.1)));
    }

    #[tokio::test]
    async fn done_backfills_full_progress() {
        let (sink, mut stream, latch) = sink();
        sink.progress(0.4);
        assert!(latch.claim());
        sink.done();
        drop(sink);

        assert_eq!(stream.recv().await, Some(TransferEvent::Progress(0.4)));
        assert_eq!(stream.recv().await, Some(TransferEvent::Progress(1.0)));
        assert_eq!(stream.recv().await, Some(TransferEvent::Done));
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn done_after_full_progress_does_not_repeat_it() {
        let (sink, mut stream, latch) = sink();
        sink.progress(1.0);
        assert!(latch.claim());
        sink.done();
        drop(sink);

        assert_eq!(stream.recv().await, Some(TransferEvent::Progress(1.0)));
        assert_eq!(stream.recv().await, Some(TransferEvent::Done));
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn progress_after_terminal_claim_is_silenced() {
        let (sink, mut stream, latch) = sink();
        assert!(latch.claim());
        sink.fail(SyncError::InvalidArgument("bad".into()));
        assert!(!sink.progress(0.7));
        drop(sink);

        match stream.recv().await {
            Some(TransferEvent::Failed(err)) => {
                assert_eq!(err.kind(), ErrorKind::InvalidArgument)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(stream.recv().await, None);
    }
}
