//! Trace events emitted by the instrumentation agent, and the handles
//! through which the agent feeds a guidance instance.
//!
//! The instrumentation publishes events for exactly one target thread; the
//! guidance hands out one [`TraceEventCallback`] per campaign (see
//! [`crate::guidance::Guidance::generate_callback`]) and one
//! [`CoverageListener`] for the direct edge-log path.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{coverage::Coverage, guidance::GuidanceInner};

/// One event on the target thread, in program order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A conditional (or switch) branch took arm `arm` at instruction `iid`
    Branch {
        /// Instruction id of the branch
        iid: i32,
        /// The arm that was taken
        arm: i32,
    },
    /// A call was made from call site `iid`
    Call {
        /// Instruction id of the call site
        iid: i32,
    },
    /// A return to the caller of the function entered at `iid`
    Return {
        /// Instruction id of the matching call site
        iid: i32,
    },
}

/// Raised from the trace callback when a run overshoots the per-run budget.
///
/// The harness adapter is expected to stop the run and report it back as
/// [`crate::guidance::RunResult::Timeout`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunTimeout {
    /// Wall-clock time since the run started
    pub elapsed: Duration,
    /// The configured per-run limit
    pub limit: Duration,
}

impl fmt::Display for RunTimeout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "run timed out after {}ms (limit {}ms)",
            self.elapsed.as_millis(),
            self.limit.as_millis()
        )
    }
}

/// Handle passed to the instrumentation for the direct edge-log path.
///
/// Logs straight into the per-run coverage map, bypassing the event stream.
#[derive(Clone)]
pub struct CoverageListener {
    coverage: Arc<Coverage>,
}

impl CoverageListener {
    pub(crate) fn new(coverage: Arc<Coverage>) -> Self {
        Self { coverage }
    }

    /// Logs one edge `(iid, arm)` on the collision-tolerant key path.
    pub fn log_coverage(&self, iid: i32, arm: i32) {
        self.coverage.log_coverage(iid, arm);
    }
}

impl fmt::Debug for CoverageListener {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CoverageListener").finish_non_exhaustive()
    }
}

/// The per-thread trace-event sink handed to the instrumentation.
///
/// Forwards every event to the guidance, which updates the execution
/// indexer and the run coverage, and polls the per-run timeout every
/// 10 000 events.
#[derive(Clone)]
pub struct TraceEventCallback {
    inner: Arc<Mutex<GuidanceInner>>,
}

impl TraceEventCallback {
    pub(crate) fn new(inner: Arc<Mutex<GuidanceInner>>) -> Self {
        Self { inner }
    }

    /// Feeds one trace event to the guidance.
    ///
    /// # Errors
    ///
    /// Returns [`RunTimeout`] when the current run has exceeded the
    /// configured per-run timeout; the caller must abort the run.
    pub fn on_event(&self, event: TraceEvent) -> Result<(), RunTimeout> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.on_trace_event(event)
    }
}

impl fmt::Debug for TraceEventCallback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TraceEventCallback").finish_non_exhaustive()
    }
}
