use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep_until};

/// Detects stalled transfers by absence of progress, not absence of time
/// alone: every observed activity pushes the deadline out by the full
/// interval.
#[derive(Debug)]
pub(crate) struct IdleWatchdog {
    interval: Duration,
    deadline: Instant,
}

impl IdleWatchdog {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + interval,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.deadline = Instant::now() + self.interval;
    }

    /// Resolves once the idle interval elapses with no intervening `reset`.
    /// The returned future snapshots the current deadline; select loops must
    /// re-create it after every reset, which falls out naturally from calling
    /// this inside `tokio::select!`.
    pub(crate) fn expired(&self) -> Sleep {
        sleep_until(self.deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_the_idle_interval() {
        let watchdog = IdleWatchdog::new(Duration::from_secs(5));
        let before = Instant::now();
        watchdog.expired().await;
        assert!(Instant::now() - before >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_pushes_the_deadline_out() {
        let mut watchdog = IdleWatchdog::new(Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(4)).await;
        watchdog.reset();

        let expired = watchdog.expired();
        tokio::pin!(expired);
        tokio::select! {
            _ = &mut expired => panic!("fired before the reset interval elapsed"),
            _ = tokio::time::sleep(Duration::from_secs(4)) => {}
        }
        expired.await;
    }
}
