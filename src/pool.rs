//! Thread-Pool Controller (spec.md §4.5, process-wide half): tracks
//! registered/entered/pending workers and decides when to signal a spawn.

use std::sync::atomic::{AtomicU32, Ordering};

pub struct ThreadPoolController {
    max_threads: AtomicU32,
    num_loopers: AtomicU32,
    pending_loopers: AtomicU32,
}

impl ThreadPoolController {
    pub fn new(max_threads: u32) -> Self {
        Self {
            max_threads: AtomicU32::new(max_threads),
            num_loopers: AtomicU32::new(0),
            pending_loopers: AtomicU32::new(0),
        }
    }

    pub fn max_threads(&self) -> u32 {
        self.max_threads.load(Ordering::Acquire)
    }

    pub fn set_max_threads(&self, n: u32) {
        self.max_threads.store(n, Ordering::Release);
    }

    pub fn num_loopers(&self) -> u32 {
        self.num_loopers.load(Ordering::Acquire)
    }

    pub fn pending_loopers(&self) -> u32 {
        self.pending_loopers.load(Ordering::Acquire)
    }

    pub(crate) fn on_register_looper(&self) {
        self.pending_loopers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .ok();
    }

    pub(crate) fn on_enter_looper(&self) {
        self.num_loopers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn on_exit_looper(&self) {
        self.num_loopers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .ok();
    }

    /// Spec.md §4.5: `BR_SPAWN_LOOPER` is emitted "at most once per read
    /// call and only when work is visibly backing up (size > 1) and the
    /// pool budget allows it". Uses a CAS loop rather than a mutex so two
    /// concurrent readers racing this check (spec.md §8 scenario 4) never
    /// both win: only one observes `num_loopers + pending_loopers <
    /// max_threads` and successfully increments `pending_loopers`,
    /// preserving invariant I3.
    pub fn try_reserve_spawn(&self, queue_size: usize) -> bool {
        if queue_size <= 1 {
            return false;
        }
        let max = self.max_threads();
        loop {
            let num = self.num_loopers.load(Ordering::Acquire);
            let pending = self.pending_loopers.load(Ordering::Acquire);
            if num + pending >= max {
                return false;
            }
            if self
                .pending_loopers
                .compare_exchange(pending, pending + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
            // Lost the race to a concurrent reader; reread and retry.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn does_not_spawn_when_queue_shallow() {
        let pool = ThreadPoolController::new(4);
        assert!(!pool.try_reserve_spawn(0));
        assert!(!pool.try_reserve_spawn(1));
    }

    #[test]
    fn spawns_when_queue_deep_and_budget_available() {
        let pool = ThreadPoolController::new(4);
        assert!(pool.try_reserve_spawn(2));
        assert_eq!(pool.pending_loopers(), 1);
    }

    #[test]
    fn respects_max_threads_budget() {
        let pool = ThreadPoolController::new(1);
        pool.on_enter_looper(); // num_loopers = 1, at budget already
        assert!(!pool.try_reserve_spawn(5));
    }

    #[test]
    fn invariant_i3_holds_under_concurrent_spawn_attempts() {
        let pool = Arc::new(ThreadPoolController::new(2));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || pool.try_reserve_spawn(5))
            })
            .collect();
        let wins: u32 = handles.into_iter().map(|h| h.join().unwrap() as u32).sum();
        assert_eq!(wins, 2); // exactly max_threads spawns reserved
        assert!(pool.num_loopers() + pool.pending_loopers() <= pool.max_threads());
    }

    #[test]
    fn register_looper_decrements_pending() {
        let pool = ThreadPoolController::new(4);
        pool.try_reserve_spawn(2);
        assert_eq!(pool.pending_loopers(), 1);
        pool.on_register_looper();
        assert_eq!(pool.pending_loopers(), 0);
    }
}
