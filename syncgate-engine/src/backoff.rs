use rand::Rng;
use std::time::Duration;

/// Capped exponential delay between retry attempts, optionally jittered.
/// Attempt numbering starts at 1 (the first retry).
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn doubles_per_attempt_up_to_the_cap() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(1), false);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            backoff.delay_with_rng(1, &mut rng),
            Duration::from_millis(250)
        );
        assert_eq!(
            backoff.delay_with_rng(2, &mut rng),
            Duration::from_millis(500)
        );
        assert_eq!(
            backoff.delay_with_rng(3, &mut rng),
            Duration::from_millis(1000)
        );
        assert_eq!(
            backoff.delay_with_rng(9, &mut rng),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn jitter_stays_under_the_exponential_bound() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), true);
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..8 {
            assert!(backoff.delay_with_rng(attempt, &mut rng) <= Duration::from_millis(800));
        }
    }

    #[test]
    fn zero_base_never_delays() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_secs(1), true);
        assert_eq!(backoff.delay(5), Duration::ZERO);
    }
}
