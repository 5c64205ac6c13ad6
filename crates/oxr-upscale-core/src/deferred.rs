//! Hook installation steps that may have to wait for the host.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;

/// One installation step retried from several call sites until it succeeds.
#[derive(Debug, Default)]
pub struct DeferredInstall(AtomicU8);

impl DeferredInstall {
    pub const fn new() -> Self {
        Self(AtomicU8::new(PENDING))
    }

    pub fn is_done(&self) -> bool {
        self.0.load(Ordering::Acquire) == DONE
    }

    /// Run `attempt` unless the step already succeeded or another thread is
    /// running it. Returns `true` only on the call that completes the step.
    pub fn try_complete(&self, attempt: impl FnOnce() -> bool) -> bool {
        if self
            .0
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let ok = attempt();
        self.0.store(if ok { DONE } else { PENDING }, Ordering::Release);
        ok
    }

    /// Back to pending, e.g. after the hooked object went away.
    pub fn reset(&self) {
        self.0.store(PENDING, Ordering::Release);
    }
}

/// Delay before retry `attempt` (1-based): `base` doubled per attempt, capped at `max`.
pub fn retry_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_once_after_failures() {
        let step = DeferredInstall::new();
        let mut runs = 0;
        assert!(!step.try_complete(|| {
            runs += 1;
            false
        }));
        assert!(!step.is_done());
        assert!(step.try_complete(|| {
            runs += 1;
            true
        }));
        assert!(step.is_done());
        assert!(!step.try_complete(|| {
            runs += 1;
            true
        }));
        assert_eq!(runs, 2);
    }

    #[test]
    fn concurrent_attempt_is_skipped() {
        let step = DeferredInstall::new();
        let nested = step.try_complete(|| {
            assert!(!step.try_complete(|| panic!("ran while another attempt was in flight")));
            true
        });
        assert!(nested);
    }

    #[test]
    fn reset_makes_the_step_pending_again() {
        let step = DeferredInstall::new();
        assert!(step.try_complete(|| true));
        step.reset();
        assert!(!step.is_done());
        assert!(step.try_complete(|| true));
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let base = Duration::from_millis(200);
        let max = Duration::from_secs(2);
        let delays: Vec<u128> = (1..=8).map(|a| retry_delay(base, a, max).as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 2000, 2000, 2000, 2000]);
        assert_eq!(retry_delay(base, 40, max), max);
    }
}
