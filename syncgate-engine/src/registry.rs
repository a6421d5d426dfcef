use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use syncgate_core::SubscriptionGuard;

/// Opaque identity of one in-flight operation; the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationToken(u64);

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// One-shot claim on an operation's terminal state. Any number of completion
/// sources may race to `claim`; exactly one wins, the rest observe `false`.
#[derive(Debug, Default)]
pub struct TerminalLatch(AtomicBool);

impl TerminalLatch {
    pub fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Registered {
    guard: SubscriptionGuard,
    latch: Arc<TerminalLatch>,
}

/// Tracks the live subscription of every running operation. Dropping a
/// registered guard stops the underlying index query, so `release` doubles as
/// resource teardown and must run before the terminal result reaches the
/// caller.
pub struct ObserverRegistry {
    next_token: AtomicU64,
    observers: Mutex<HashMap<u64, Registered>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(0),
            observers: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, guard: SubscriptionGuard) -> (OperationToken, Arc<TerminalLatch>) {
        let id = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let latch = Arc::new(TerminalLatch::default());
        self.lock().insert(
            id,
            Registered {
                guard,
                latch: Arc::clone(&latch),
            },
        );
        (OperationToken(id), latch)
    }

    /// Replace the subscription behind a live token, stopping the old query.
    /// Returns false (and stops the new guard) if the token was already
    /// released.
    pub fn swap_guard(&self, token: OperationToken, guard: SubscriptionGuard) -> bool {
        // stop() runs outside the lock; a guard's teardown may take its own
        // locks
        let swapped = {
            let mut observers = self.lock();
            match observers.get_mut(&token.0) {
                Some(registered) => Ok(std::mem::replace(&mut registered.guard, guard)),
                None => Err(guard),
            }
        };
        match swapped {
            Ok(old) => {
                old.stop();
                true
            }
            Err(unused) => {
                unused.stop();
                false
            }
        }
    }

    /// Stop and forget the subscription for `token`. Releasing an unknown or
    /// already-released token is a no-op; concurrent completion paths may race
    /// to get here.
    pub fn release(&self, token: OperationToken) -> bool {
        let removed = self.lock().remove(&token.0);
        match removed {
            Some(registered) => {
                registered.guard.stop();
                true
            }
            None => false,
        }
    }

    pub fn latch(&self, token: OperationToken) -> Option<Arc<TerminalLatch>> {
        self.lock().get(&token.0).map(|r| Arc::clone(&r.latch))
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Registered>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_guard(stops: &Arc<AtomicUsize>) -> SubscriptionGuard {
        let stops = Arc::clone(stops);
        SubscriptionGuard::new(move || {
            stops.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn release_is_idempotent_and_stops_once() {
        let registry = ObserverRegistry::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let (token, _latch) = registry.register(counting_guard(&stops));

        assert_eq!(registry.active(), 1);
        assert!(registry.release(token));
        assert!(!registry.release(token));
        assert_eq!(registry.active(), 0);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn latch_admits_exactly_one_claim() {
        let latch = TerminalLatch::default();
        assert!(!latch.is_claimed());
        assert!(latch.claim());
        assert!(!latch.claim());
        assert!(latch.is_claimed());
    }

    #[test]
    fn racing_claims_elect_a_single_winner() {
        let latch = Arc::new(TerminalLatch::default());
        let wins: Vec<bool> = std::thread::scope(|scope| {
            (0..8)
                .map(|_| {
                    let latch = Arc::clone(&latch);
                    scope.spawn(move || latch.claim())
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });
        assert_eq!(wins.iter().filter(|won| **won).count(), 1);
    }

    #[test]
    fn swap_stops_the_old_guard_and_keeps_the_token_live() {
        let registry = ObserverRegistry::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let (token, _latch) = registry.register(counting_guard(&stops));

        assert!(registry.swap_guard(token, counting_guard(&stops)));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active(), 1);

        registry.release(token);
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn swap_after_release_stops_the_new_guard() {
        let registry = ObserverRegistry::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let (token, _latch) = registry.register(counting_guard(&stops));
        registry.release(token);

        assert!(!registry.swap_guard(token, counting_guard(&stops)));
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tokens_are_unique_across_registrations() {
        let registry = ObserverRegistry::new();
        let (a, _) = registry.register(SubscriptionGuard::noop());
        let (b, _) = registry.register(SubscriptionGuard::noop());
        assert_ne!(a, b);
    }
}
