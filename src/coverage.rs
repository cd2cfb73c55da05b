//! Edge counters and the two-level coverage maps built on them.
//!
//! A [`Counter`] is a sparse map from edge id to a 32-bit count. A
//! [`Coverage`] wraps one counter and knows how to feed it from trace
//! events, diff it against a baseline, and merge per-run counts into a
//! cumulative map using saturating hitcount buckets (the highest power of
//! two at or below the raw count).

use std::sync::{Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;

use crate::events::TraceEvent;

/// Maps edge ids to counts.
///
/// Alongside the map, an append-only list of keys that ever became non-zero
/// is kept for fast enumeration. The list may contain duplicates after a key
/// is logically re-armed by a merge; consumers must treat it as a superset
/// of the non-zero key set and re-check values while scanning.
#[derive(Debug, Default, Clone)]
pub struct Counter {
    counts: HashMap<i32, u32>,
    non_zero: Vec<i32>,
}

impl Counter {
    /// Creates a new, empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of keys ever touched.
    #[must_use]
    pub fn size(&self) -> usize {
        self.counts.len()
    }

    /// Clears the counter by setting all values to zero.
    pub fn clear(&mut self) {
        self.counts.clear();
        self.non_zero.clear();
    }

    /// Increments the count at the given key, returning the new value.
    pub fn increment(&mut self, key: i32) -> u32 {
        self.increment_by(key, 1)
    }

    /// Increments the count at the given key by a given delta, returning the
    /// new value.
    pub fn increment_by(&mut self, key: i32, delta: u32) -> u32 {
        let cur = self.counts.entry(key).or_insert(0);
        let was_zero = *cur == 0;
        *cur = cur.wrapping_add(delta);
        if was_zero && *cur != 0 {
            self.non_zero.push(key);
        }
        *cur
    }

    /// Sets the raw value at a key, maintaining the non-zero list.
    pub(crate) fn set(&mut self, key: i32, value: u32) {
        let cur = self.counts.entry(key).or_insert(0);
        if *cur == 0 && value != 0 {
            self.non_zero.push(key);
        }
        *cur = value;
    }

    /// Retrieves the value for a given key, zero if the key was never touched.
    #[must_use]
    pub fn get(&self, key: i32) -> u32 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    /// Returns the number of keys with non-zero counts.
    #[must_use]
    pub fn non_zero_size(&self) -> usize {
        self.counts.values().filter(|v| **v != 0).count()
    }

    /// Returns the keys at which the count is non-zero.
    #[must_use]
    pub fn non_zero_keys(&self) -> Vec<i32> {
        self.counts
            .iter()
            .filter(|(_, v)| **v != 0)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Returns the non-zero count values in this counter.
    #[must_use]
    pub fn non_zero_values(&self) -> Vec<u32> {
        self.counts.values().filter(|v| **v != 0).copied().collect()
    }

    /// The append-only enumeration list: a superset of [`Self::non_zero_keys`],
    /// possibly with duplicates.
    #[must_use]
    pub fn non_zero_list(&self) -> &[i32] {
        &self.non_zero
    }

    /// Replaces the contents of this counter with a copy of another.
    pub fn copy_from(&mut self, other: &Counter) {
        self.counts = other.counts.clone();
        self.non_zero = other.non_zero.clone();
    }

    /// Iterates over all `(key, value)` entries, including zeroed ones.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (i32, u32)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }
}

const HOB_CACHE_SIZE: usize = 1024;

/// Computes the highest order bit of `num`, zero for zero.
const fn compute_hob(mut num: u32) -> u32 {
    if num == 0 {
        return 0;
    }
    let mut ret = 1;
    loop {
        num >>= 1;
        if num == 0 {
            break;
        }
        ret <<= 1;
    }
    ret
}

/// Cache of [`compute_hob`] for small counts.
const HOB_CACHE: [u32; HOB_CACHE_SIZE] = {
    let mut cache = [0_u32; HOB_CACHE_SIZE];
    let mut i = 0;
    while i < HOB_CACHE_SIZE {
        cache[i] = compute_hob(i as u32);
        i += 1;
    }
    cache
};

/// The saturation bucket of a count: its highest order bit, cached for
/// counts below 1024.
#[must_use]
#[inline]
pub fn bucket(num: u32) -> u32 {
    if (num as usize) < HOB_CACHE_SIZE {
        HOB_CACHE[num as usize]
    } else {
        compute_hob(num)
    }
}

/// Collects branch and call coverage for one run, or accumulates bucketed
/// coverage across runs.
///
/// The inner counter sits behind a lock: the fuzzing thread is the only
/// writer, but [`Coverage::update_bits`] reads one map while writing another
/// and must not observe a half-merged state.
#[derive(Debug, Default)]
pub struct Coverage {
    counter: Mutex<Counter>,
}

impl Clone for Coverage {
    fn clone(&self) -> Self {
        let counter = self.lock().clone();
        Self {
            counter: Mutex::new(counter),
        }
    }
}

impl Coverage {
    /// Creates a new, empty coverage map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counter> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Updates coverage information based on an emitted trace event.
    ///
    /// Branch events land on key `(iid << 2) | arm`, call events on
    /// `(iid << 2) | 3`. Return events do not touch coverage.
    pub fn handle_event(&self, event: &TraceEvent) {
        match *event {
            TraceEvent::Branch { iid, arm } => {
                self.lock().increment(iid.wrapping_shl(2) | arm);
            }
            TraceEvent::Call { iid } => {
                self.lock().increment(iid.wrapping_shl(2) | 3);
            }
            TraceEvent::Return { .. } => {}
        }
    }

    /// The direct edge-log path used when the instrumentation cannot place a
    /// probe at the precise branch target.
    ///
    /// WARNING: `iid + arm` may collide across the arms of a switch. The
    /// addition is kept for bit-exact compatibility with existing edge logs.
    pub fn log_coverage(&self, iid: i32, arm: i32) {
        self.lock().increment(iid.wrapping_add(arm));
    }

    /// Returns the number of edges covered.
    #[must_use]
    pub fn non_zero_count(&self) -> usize {
        self.lock().non_zero_size()
    }

    /// Returns the covered edge ids.
    #[must_use]
    pub fn covered(&self) -> Vec<i32> {
        self.lock().non_zero_keys()
    }

    /// Runs `f` against the inner counter.
    pub fn with_counter<T>(&self, f: impl FnOnce(&Counter) -> T) -> T {
        f(&self.lock())
    }

    /// Keys that are non-zero in `self` but zero in `baseline`.
    #[must_use]
    pub fn compute_new_coverage(&self, baseline: &Coverage) -> Vec<i32> {
        let this = self.lock();
        let base = baseline.lock();
        this.non_zero_keys()
            .into_iter()
            .filter(|k| base.get(*k) == 0)
            .collect()
    }

    /// ORs the saturation bucket of every count in `that` into this map.
    ///
    /// Returns `true` iff `that` is not already a subset of `self`, i.e. the
    /// merge added at least one bit. Both locks are held for the whole merge
    /// so no reader sees a half-merged state.
    pub fn update_bits(&self, that: &Coverage) -> bool {
        let mut changed = false;
        let mut this = self.lock();
        let other = that.lock();
        for (key, value) in other.entries() {
            let before = this.get(key);
            let after = before | bucket(value);
            if after != before {
                this.set(key, after);
                changed = true;
            }
        }
        changed
    }

    /// Clears the coverage map.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Creates a copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Coverage {
        self.clone()
    }

    /// Replaces the contents of this map with a copy of another.
    pub fn copy_from(&self, other: &Coverage) {
        let mut this = self.lock();
        let that = other.lock();
        this.copy_from(&that);
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashSet;

    use super::{bucket, compute_hob, Counter, Coverage};
    use crate::{
        events::TraceEvent,
        rands::{Rand, StdRand},
    };

    #[test]
    fn increment_works() {
        let mut counter = Counter::new();
        let keys = [3, -7, 3, 0, 12_345, 3, -7];
        for key in keys {
            let before = counter.get(key);
            let after = counter.increment(key);
            assert_eq!(before + 1, after);
        }
        let sum: u32 = counter.non_zero_values().iter().sum();
        assert_eq!(keys.len() as u32, sum);
    }

    #[test]
    fn increment_delta_works() {
        let mut counter = Counter::new();
        let keys = [1, 2, 3, 2, 1, 9];
        let delta = 5;
        for key in keys {
            let before = counter.get(key);
            let after = counter.increment_by(key, delta);
            assert_eq!(before + delta, after);
        }
        let sum: u32 = counter.non_zero_values().iter().sum();
        assert_eq!(keys.len() as u32 * delta, sum);
    }

    #[test]
    fn non_zero_accounting_agrees() {
        let mut rand = StdRand::with_seed(0);
        let mut counter = Counter::new();
        for _ in 0..1000 {
            counter.increment(rand.below(64) as i32);
        }

        let keys = counter.non_zero_keys();
        let values = counter.non_zero_values();
        assert_eq!(keys.len(), values.len());
        assert_eq!(keys.len(), counter.non_zero_size());

        // The append-only list, deduplicated, is exactly the non-zero key set
        let list: HashSet<i32> = counter.non_zero_list().iter().copied().collect();
        let set: HashSet<i32> = keys.into_iter().collect();
        assert_eq!(list, set);
    }

    #[test]
    fn clears_to_zero() {
        let mut counter = Counter::new();
        for key in [5, 6, 7] {
            counter.increment(key);
        }
        counter.clear();
        for key in 0..32 {
            assert_eq!(0, counter.get(key));
        }
        assert_eq!(0, counter.non_zero_size());
        assert!(counter.non_zero_keys().is_empty());
        assert!(counter.non_zero_values().is_empty());
        assert!(counter.non_zero_list().is_empty());
    }

    #[test]
    fn bucket_matches_uncached() {
        for c in 0..1024_u32 {
            assert_eq!(bucket(c), compute_hob(c));
        }
        let mut rand = StdRand::with_seed(123);
        for _ in 0..10_000 {
            let c = (rand.next() as u32) & ((1 << 30) - 1);
            assert_eq!(bucket(c), compute_hob(c));
        }
    }

    #[test]
    fn bucket_is_highest_power_of_two() {
        assert_eq!(bucket(0), 0);
        assert_eq!(bucket(1), 1);
        assert_eq!(bucket(2), 2);
        assert_eq!(bucket(3), 2);
        assert_eq!(bucket(4), 4);
        assert_eq!(bucket(255), 128);
        assert_eq!(bucket(1023), 512);
        assert_eq!(bucket(1024), 1024);
    }

    #[test]
    fn update_bits_is_monotonic() {
        let total = Coverage::new();
        let mut rand = StdRand::with_seed(99);

        let mut highwater: Vec<(i32, u32)> = Vec::new();
        for _ in 0..100 {
            let run = Coverage::new();
            for _ in 0..50 {
                run.log_coverage(rand.below(40) as i32, 0);
            }
            total.update_bits(&run);
            let snapshot: Vec<(i32, u32)> = total.with_counter(|c| {
                let mut v: Vec<_> = c.entries().collect();
                v.sort_unstable();
                v
            });
            for (key, value) in &highwater {
                let now = snapshot
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| *v)
                    .unwrap_or(0);
                assert_eq!(now & value, *value, "bit cleared for key {key}");
            }
            highwater = snapshot;
        }
    }

    #[test]
    fn update_bits_reports_change() {
        let total = Coverage::new();
        let run = Coverage::new();
        run.handle_event(&TraceEvent::Branch { iid: 1, arm: 0 });
        assert!(total.update_bits(&run));
        // Same bucket again: no new bits
        assert!(!total.update_bits(&run));
        // Bump the count into the next bucket
        run.handle_event(&TraceEvent::Branch { iid: 1, arm: 0 });
        assert!(total.update_bits(&run));
        assert!(!total.update_bits(&run));
    }

    #[test]
    fn compute_new_coverage_diffs_exactly() {
        let baseline = Coverage::new();
        baseline.log_coverage(10, 0);
        baseline.log_coverage(20, 0);

        let run = Coverage::new();
        run.log_coverage(20, 0);
        run.log_coverage(30, 0);
        run.log_coverage(40, 0);

        let mut fresh = run.compute_new_coverage(&baseline);
        fresh.sort_unstable();
        assert_eq!(fresh, vec![30, 40]);
        assert!(baseline.compute_new_coverage(&run).contains(&10));
    }

    #[test]
    fn branch_and_call_keys() {
        let cov = Coverage::new();
        cov.handle_event(&TraceEvent::Branch { iid: 2, arm: 1 });
        cov.handle_event(&TraceEvent::Call { iid: 2 });
        cov.handle_event(&TraceEvent::Return { iid: 2 });
        let mut covered = cov.covered();
        covered.sort_unstable();
        assert_eq!(covered, vec![(2 << 2) | 1, (2 << 2) | 3]);
    }

    #[test]
    fn snapshot_is_independent() {
        let cov = Coverage::new();
        cov.log_coverage(7, 0);
        let snap = cov.snapshot();
        cov.log_coverage(8, 0);
        assert_eq!(1, snap.non_zero_count());
        assert_eq!(2, cov.non_zero_count());
    }
}
