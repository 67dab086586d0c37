use std::sync::atomic::{AtomicU64, Ordering};

/// N atomic counters tracking the number of currently-open pool-allocated
/// vconns on each of N pool multiplexers.
///
/// `next` is a linear scan, not locked against concurrent `incr`/`decr` —
/// transient imbalance under concurrency is the accepted cost of a lock-free
/// dispatch path.
pub struct Balancer {
    counters: Vec<AtomicU64>,
}

impl Balancer {
    pub fn new(n: usize) -> Self {
        Self { counters: (0..n).map(|_| AtomicU64::new(0)).collect() }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Index with the minimum current value; ties broken by lowest index.
    pub fn next(&self) -> usize {
        let mut best_idx = 0;
        let mut best_val = u64::MAX;
        for (idx, counter) in self.counters.iter().enumerate() {
            let val = counter.load(Ordering::Relaxed);
            if val < best_val {
                best_val = val;
                best_idx = idx;
            }
        }
        best_idx
    }

    pub fn incr(&self, i: usize) {
        self.counters[i].fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(&self, i: usize) {
        self.counters[i].fetch_sub(1, Ordering::Relaxed);
    }

    pub fn count(&self, i: usize) -> u64 {
        self.counters[i].load(Ordering::Relaxed)
    }
}
