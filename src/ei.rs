//! Execution indexing: call-stack-relative identities for byte requests.
//!
//! An [`ExecutionIndex`] names the n-th byte requested along a specific
//! program path: the chain of `(call site, occurrence)` pairs active at the
//! request, followed by the byte offset within the innermost frame. Two runs
//! that follow the same path up to a request produce the same index for it,
//! which is what lets a [`crate::inputs::MappedInput`] replay bytes at the
//! same program points across mutations.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::events::TraceEvent;

/// A call-stack-relative identifier for one byte request.
///
/// Layout: `[iid_0, occ_0, iid_1, occ_1, ..., byte_offset]`, outermost call
/// first. The trailing element is the byte-request offset within the
/// innermost frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionIndex(Vec<i32>);

impl ExecutionIndex {
    /// Creates an index from its flattened elements.
    #[must_use]
    pub fn new(elements: Vec<i32>) -> Self {
        Self(elements)
    }

    /// The flattened elements of this index.
    #[must_use]
    pub fn elements(&self) -> &[i32] {
        &self.0
    }

    /// Number of flattened elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if the index has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The equivalence class used for splice-target matching: the chain of
    /// call-site ids, with occurrence counts and the byte offset erased.
    ///
    /// Two indices in the same context are splice-compatible.
    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        let pairs = self.0.len().saturating_sub(1) / 2;
        ExecutionContext((0..pairs).map(|i| self.0[2 * i]).collect())
    }

    /// Number of equal trailing elements between `self` and `other`.
    #[must_use]
    pub fn common_suffix_len(&self, other: &ExecutionIndex) -> usize {
        self.0
            .iter()
            .rev()
            .zip(other.0.iter().rev())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// `true` if this index starts with the given prefix elements.
    #[must_use]
    pub fn starts_with(&self, prefix: &[i32]) -> bool {
        self.0.starts_with(prefix)
    }

    /// The leading elements left over once a suffix of `suffix_len`
    /// elements is removed.
    #[must_use]
    pub fn prefix_for_suffix(&self, suffix_len: usize) -> &[i32] {
        &self.0[..self.0.len() - suffix_len]
    }

    /// Builds the index `prefix ++ suffix`, re-keying a spliced entry under
    /// a new target prefix.
    #[must_use]
    pub fn rekeyed(prefix: &[i32], suffix: &[i32]) -> Self {
        let mut elements = Vec::with_capacity(prefix.len() + suffix.len());
        elements.extend_from_slice(prefix);
        elements.extend_from_slice(suffix);
        Self(elements)
    }
}

/// Canonicalized equivalence class over execution indices.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionContext(Vec<i32>);

#[derive(Debug, Default, Clone)]
struct FrameCounters {
    /// Occurrence counts of the call sites invoked from this frame
    calls: HashMap<i32, i32>,
    /// Byte requests made while this frame was innermost
    bytes: i32,
}

#[derive(Debug, Clone)]
struct Frame {
    iid: i32,
    occurrence: i32,
    counters: FrameCounters,
}

/// Tracks the call stack of the target thread and hands out an
/// [`ExecutionIndex`] for every byte request.
#[derive(Debug, Default, Clone)]
pub struct ExecutionIndexingState {
    stack: Vec<Frame>,
    root: FrameCounters,
}

impl ExecutionIndexingState {
    /// Creates a fresh indexing state, reset before every run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one trace event to the stack. Branch events do not move the
    /// stack.
    pub fn handle_event(&mut self, event: &TraceEvent) {
        match *event {
            TraceEvent::Call { iid } => self.push_call(iid),
            TraceEvent::Return { .. } => self.pop_return(),
            TraceEvent::Branch { .. } => {}
        }
    }

    fn current_counters_mut(&mut self) -> &mut FrameCounters {
        match self.stack.last_mut() {
            Some(frame) => &mut frame.counters,
            None => &mut self.root,
        }
    }

    fn push_call(&mut self, iid: i32) {
        let counters = self.current_counters_mut();
        let occurrence = {
            let count = counters.calls.entry(iid).or_insert(0);
            let occurrence = *count;
            *count += 1;
            occurrence
        };
        self.stack.push(Frame {
            iid,
            occurrence,
            counters: FrameCounters::default(),
        });
    }

    fn pop_return(&mut self) {
        self.stack.pop();
    }

    /// Produces the index of the next byte request and advances the current
    /// frame's byte counter.
    pub fn byte_request(&mut self) -> ExecutionIndex {
        let mut elements = Vec::with_capacity(2 * self.stack.len() + 1);
        for frame in &self.stack {
            elements.push(frame.iid);
            elements.push(frame.occurrence);
        }
        let counters = self.current_counters_mut();
        elements.push(counters.bytes);
        counters.bytes += 1;
        ExecutionIndex::new(elements)
    }
}
