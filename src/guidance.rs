//! The guidance: input scheduling, coverage accounting, and corpus growth.
//!
//! A [`StdGuidance`] performs coverage-guided fuzzing using two cumulative
//! coverage maps, one over all inputs and one over valid inputs only. The
//! test harness drives it in a loop: [`Guidance::get_input`] schedules an
//! input and exposes it as a byte source, the instrumented target runs while
//! feeding trace events back through the callback from
//! [`Guidance::generate_callback`], and [`Guidance::handle_result`]
//! classifies the outcome, merges coverage, and decides whether the input
//! joins the corpus.

use std::{
    collections::VecDeque,
    io::{self, Read},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::ThreadId,
    time::Instant,
};

use hashbrown::{HashMap, HashSet};

use crate::{
    config::GuidanceConfig,
    corpus::{Corpus, InputLocation, Testcase},
    coverage::Coverage,
    ei::{ExecutionContext, ExecutionIndexingState},
    events::{CoverageListener, RunTimeout, TraceEvent, TraceEventCallback},
    inputs::{GenerationPolicy, Input, InputRepr, SpliceContext},
    output::OutputDirectory,
    rands::StdRand,
    stats::GuidanceStats,
    Error,
};

/// Baseline number of mutated children to produce from a given parent input.
pub const NUM_CHILDREN_BASELINE: usize = 50;

/// Multiplication factor for number of children to produce for favored inputs.
pub const NUM_CHILDREN_MULTIPLIER_FAVORED: usize = 20;

/// Whether to save inputs that only add new coverage bits (but no new responsibilities).
const SAVE_NEW_COUNTS: bool = true;

/// Trials allowed before a campaign with no coverage at all gives up.
const MAX_TRIALS_WITHOUT_COVERAGE: u64 = 100_000;

/// The per-run timeout is polled once per this many trace events.
const TIMEOUT_CHECK_PERIOD: u64 = 10_000;

/// A failure reported by the target, as a chain of causes.
///
/// The stack trace of the *deepest* cause is the failure's identity: two
/// failures with the same root-cause trace count as one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetFailure {
    /// Human-readable description of the failure
    pub message: String,
    /// Stack trace frames, outermost first
    pub trace: Vec<String>,
    /// The underlying cause, if this failure wraps another
    pub cause: Option<Box<TargetFailure>>,
}

impl TargetFailure {
    /// Creates a failure with no underlying cause.
    #[must_use]
    pub fn new<S: Into<String>>(message: S, trace: Vec<String>) -> Self {
        Self {
            message: message.into(),
            trace,
            cause: None,
        }
    }

    /// Wraps another failure as the cause of this one.
    #[must_use]
    pub fn with_cause(mut self, cause: TargetFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Walks the cause chain to the deepest failure.
    #[must_use]
    pub fn root_cause(&self) -> &TargetFailure {
        let mut cause = self;
        while let Some(inner) = &cause.cause {
            cause = inner;
        }
        cause
    }
}

/// The classified outcome of one run. Outcomes are data, not errors.
#[derive(Clone, Debug)]
pub enum RunResult {
    /// The input satisfied all assumptions and the test passed
    Success,
    /// The input violated an assumption of the test; not a bug
    Invalid,
    /// The test failed
    Failure(TargetFailure),
    /// The run overshot the per-run timeout
    Timeout(TargetFailure),
}

/// The interface a test harness drives a fuzzing campaign through.
pub trait Guidance {
    /// Schedules the next input and returns the byte source the target
    /// reads it from. The source should be drained only by the target.
    ///
    /// # Errors
    ///
    /// If the campaign cannot continue (no coverage after many trials, I/O).
    fn get_input(&self) -> Result<ByteSource, Error>;

    /// Whether the campaign still has time budget left.
    fn has_input(&self) -> bool;

    /// Reports the outcome of the run started by the last
    /// [`Guidance::get_input`].
    ///
    /// # Errors
    ///
    /// On invariant violations (fatal) or corpus I/O failure.
    fn handle_result(&self, result: RunResult) -> Result<(), Error>;

    /// Hands out the trace-event callback for the target thread.
    ///
    /// # Errors
    ///
    /// If a second, distinct target thread tries to register.
    fn generate_callback(&self, thread: ThreadId) -> Result<TraceEventCallback, Error>;
}

/// An input scheduled for execution, plus where it came from.
#[derive(Debug)]
struct CurrentRun {
    input: Input,
    /// Corpus index of the parent this input was bred from, if any
    parent: Option<usize>,
}

/// Adds every position of a saved mapped input to the execution-context
/// index used for splicing. Linear inputs have no splice locations.
fn index_splice_locations(
    corpus: &Corpus,
    locations: &mut HashMap<ExecutionContext, Vec<InputLocation>>,
    idx: usize,
) -> Result<(), Error> {
    if let Some(mapped) = corpus.mapped(idx) {
        for offset in 0..mapped.size() {
            let ec = mapped.key_at_offset(offset)?.context();
            locations
                .entry(ec)
                .or_default()
                .push(InputLocation { input: idx, offset });
        }
    }
    Ok(())
}

pub(crate) struct GuidanceInner {
    config: GuidanceConfig,
    rand: StdRand,
    blind: bool,

    // Per-run state
    ei_state: ExecutionIndexingState,
    last_event: Option<TraceEvent>,
    bytes_read: usize,
    event_count: u64,
    run_start: Option<Instant>,
    current: Option<CurrentRun>,

    // Corpus and scheduling
    seed_queue: VecDeque<Input>,
    corpus: Corpus,
    current_parent_idx: usize,
    children_generated: usize,
    cycles_completed: u64,
    num_favored_last_cycle: usize,
    num_saved: usize,
    ec_to_input_loc: HashMap<ExecutionContext, Vec<InputLocation>>,

    // Coverage
    run_coverage: Arc<Coverage>,
    total_coverage: Coverage,
    valid_coverage: Coverage,
    max_coverage: usize,

    // Failures, stats, disk
    unique_failures: HashSet<Vec<String>>,
    stats: GuidanceStats,
    output: OutputDirectory,
    app_thread: Option<ThreadId>,
}

impl GuidanceInner {
    /// Chooses the input for the next trial and resets the per-run state.
    fn select_next_input(&mut self) -> Result<(), Error> {
        self.run_coverage.clear();
        self.ei_state = ExecutionIndexingState::new();
        self.last_event = None;
        self.bytes_read = 0;
        self.event_count = 0;
        self.run_start = Some(Instant::now());

        // Specific seeds go first, in the order they were given
        if let Some(seed) = self.seed_queue.pop_front() {
            self.current = Some(CurrentRun {
                input: seed,
                parent: None,
            });
            return Ok(());
        }

        if self.corpus.is_empty() {
            if !self.blind && self.stats.num_trials > MAX_TRIALS_WITHOUT_COVERAGE {
                return Err(Error::guidance(
                    "too many trials without coverage; likely all assumption violations",
                ));
            }
            self.output.log("Spawning new input from thin air")?;
            let input = if self.config.enable_execution_indexing {
                Input::fresh_mapped()
            } else {
                Input::fresh_linear()
            };
            self.current = Some(CurrentRun {
                input,
                parent: None,
            });
            return Ok(());
        }

        // The number of children to produce is determined by how much of
        // the coverage pool this parent input hits
        let target = {
            let parent = self.corpus.get(self.current_parent_idx)?;
            self.target_children_for(parent)
        };
        if self.children_generated >= target {
            self.current_parent_idx = (self.current_parent_idx + 1) % self.corpus.count();
            if self.current_parent_idx == 0 {
                self.complete_cycle()?;
            }
            self.children_generated = 0;
        }

        let parent_idx = self.current_parent_idx;
        let child = {
            let GuidanceInner {
                corpus,
                rand,
                ec_to_input_loc,
                config,
                output,
                ..
            } = self;
            let parent = corpus.get(parent_idx)?;
            output.log(&format!("Mutating input: {}", parent.input().desc))?;
            let splice = SpliceContext {
                locations: &*ec_to_input_loc,
                corpus: &*corpus,
                parent: Some(parent_idx),
                subtree: config.enable_execution_indexing && config.splice_subtree,
            };
            parent.input().fuzz(parent.id(), rand, Some(&splice))?
        };
        self.children_generated += 1;

        // Scratch copy for debugging; failure to write it is not fatal
        if let Err(err) = self.output.write_cur_input(&child.dump_bytes()) {
            log::debug!("could not write .cur_input: {err}");
        }

        self.current = Some(CurrentRun {
            input: child,
            parent: Some(parent_idx),
        });
        Ok(())
    }

    fn target_children_for(&self, parent: &Testcase) -> usize {
        // Baseline is a constant
        let mut target = NUM_CHILDREN_BASELINE;

        // We like inputs that cover many things, so scale with fraction of max
        if self.max_coverage > 0 {
            target = (NUM_CHILDREN_BASELINE * parent.non_zero_coverage()) / self.max_coverage;
        }

        // We absolutely love favored inputs, so fuzz them more
        if parent.is_favored() {
            target *= NUM_CHILDREN_MULTIPLIER_FAVORED;
        }

        target
    }

    fn complete_cycle(&mut self) -> Result<(), Error> {
        self.cycles_completed += 1;
        log::info!("cycle {} completed", self.cycles_completed);
        self.output
            .log(&format!("\n# Cycle {} completed.", self.cycles_completed))?;

        // Go over all inputs and do a sanity check (plus log)
        self.output.log("Here is a list of favored inputs:")?;
        let mut sum_responsibilities = 0;
        self.num_favored_last_cycle = 0;
        for testcase in self.corpus.entries() {
            if testcase.is_favored() {
                let responsible_for = testcase.responsibilities().len();
                self.output.log(&format!(
                    "Input {} is responsible for {responsible_for} branches",
                    testcase.id()
                ))?;
                sum_responsibilities += responsible_for;
                self.num_favored_last_cycle += 1;
            }
        }
        let total_coverage_count = self.total_coverage.non_zero_count();
        self.output
            .log(&format!("Total {total_coverage_count} branches covered"))?;
        if sum_responsibilities != total_coverage_count {
            return Err(Error::illegal_state(format!(
                "responsibility mismatch: inputs own {sum_responsibilities} edges, \
                 cumulative coverage has {total_coverage_count}"
            )));
        }

        // Refresh the splice-location index so that subsequent splices are
        // drawn exclusively from favored inputs
        self.ec_to_input_loc.clear();
        for idx in 0..self.corpus.count() {
            if self.corpus.get(idx)?.is_favored() {
                index_splice_locations(&self.corpus, &mut self.ec_to_input_loc, idx)?;
            }
        }

        self.output.log("\n\n")?;
        Ok(())
    }

    /// Serves the next byte of the current input to the target.
    fn next_byte(&mut self) -> Result<Option<u8>, Error> {
        let GuidanceInner {
            config,
            current,
            rand,
            ei_state,
            bytes_read,
            last_event,
            ..
        } = self;
        let current = current
            .as_mut()
            .ok_or_else(|| Error::illegal_state("no input scheduled; call get_input first"))?;
        let policy = GenerationPolicy::from(&*config);

        let value = match &mut current.input.repr {
            InputRepr::Linear(linear) => linear.get_or_generate_fresh(*bytes_read, rand, policy)?,
            InputRepr::Mapped(mapped) => {
                if last_event.is_none() {
                    return Err(Error::illegal_state(
                        "could not compute execution index; no instrumentation?",
                    ));
                }
                let ei = ei_state.byte_request();
                mapped.get_or_generate_fresh(&ei, rand, policy)?
            }
        };
        *bytes_read += 1;
        Ok(value)
    }

    /// Consumes one trace event from the target thread.
    pub(crate) fn on_trace_event(&mut self, event: TraceEvent) -> Result<(), RunTimeout> {
        self.last_event = Some(event);

        if self.config.enable_execution_indexing {
            self.ei_state.handle_event(&event);
        }

        self.run_coverage.handle_event(&event);

        // Check for possible timeouts every so often
        self.event_count += 1;
        if let (Some(limit), Some(start)) = (self.config.timeout, self.run_start) {
            if self.event_count % TIMEOUT_CHECK_PERIOD == 0 {
                let elapsed = start.elapsed();
                if elapsed > limit {
                    return Err(RunTimeout { elapsed, limit });
                }
            }
        }
        Ok(())
    }

    fn handle_result(&mut self, result: RunResult) -> Result<(), Error> {
        // Stop timeout handling
        self.run_start = None;
        self.stats.num_trials += 1;

        let mut current = self.current.take().ok_or_else(|| {
            Error::illegal_state("handle_result called with no run in flight")
        })?;

        // Trim the input of whatever was never requested
        current.input.gc();

        // A target may legitimately read nothing at all; such a run carries
        // no usable input, so it only counts as a trial
        if current.input.size() == 0 {
            log::warn!("discarding empty input: {}", current.input.desc);
            self.refresh_stats()?;
            return Ok(());
        }

        let valid = matches!(result, RunResult::Success);
        if valid {
            self.stats.num_valid += 1;
        }

        match result {
            RunResult::Success | RunResult::Invalid => self.handle_run_coverage(current, valid)?,
            RunResult::Failure(failure) => self.handle_failure(&current, &failure, false)?,
            RunResult::Timeout(failure) => self.handle_failure(&current, &failure, true)?,
        }

        self.refresh_stats()?;
        Ok(())
    }

    fn handle_run_coverage(&mut self, mut current: CurrentRun, valid: bool) -> Result<(), Error> {
        // Coverage before
        let non_zero_before = self.total_coverage.non_zero_count();
        let valid_non_zero_before = self.valid_coverage.non_zero_count();

        // Compute the keys this input can assume responsibility for.
        // Newly covered edges are always included; existing edges may be
        // stolen from weaker saved inputs.
        let responsibilities = self.compute_responsibilities(&current.input, valid);

        // Update cumulative coverage
        let coverage_bits_updated = self.total_coverage.update_bits(&self.run_coverage);
        if valid {
            self.valid_coverage.update_bits(&self.run_coverage);
        }

        // Coverage after
        let non_zero_after = self.total_coverage.non_zero_count();
        if non_zero_after > self.max_coverage {
            self.max_coverage = non_zero_after;
        }
        let valid_non_zero_after = self.valid_coverage.non_zero_count();

        let mut to_save = false;
        let mut why = String::new();

        if SAVE_NEW_COUNTS && coverage_bits_updated {
            to_save = true;
            why.push_str("+count");
        }

        // Save if new total coverage found
        if non_zero_after > non_zero_before {
            // Must be responsible for some edge
            debug_assert!(!responsibilities.is_empty());
            to_save = true;
            why.push_str("+cov");
        }

        if valid_non_zero_after > valid_non_zero_before {
            debug_assert!(!responsibilities.is_empty());
            current.input.valid = true;
            to_save = true;
            why.push_str("+valid");
        }

        if to_save {
            self.output.log(&format!(
                "Saving new input (at run {}): input #{} of size {}; total coverage = {non_zero_after}",
                self.stats.num_trials,
                self.corpus.count(),
                current.input.size(),
            ))?;
            self.save_current_input(current, responsibilities, &why)?;
        }
        Ok(())
    }

    // Compute the set of edges for which the current input may assume
    // responsibility
    fn compute_responsibilities(&self, input: &Input, valid: bool) -> HashSet<i32> {
        // This input is responsible for all new coverage
        let mut result: HashSet<i32> = self
            .run_coverage
            .compute_new_coverage(&self.total_coverage)
            .into_iter()
            .collect();

        // If valid, also for all new valid coverage
        if valid {
            result.extend(self.run_coverage.compute_new_coverage(&self.valid_coverage));
        }

        // Perhaps it can also steal responsibility from other inputs
        if self.config.steal_responsibility {
            let current_non_zero = self.run_coverage.non_zero_count();
            let current_size = input.size();
            let covered: HashSet<i32> = self.run_coverage.covered().into_iter().collect();

            for candidate in self.corpus.entries() {
                let responsibilities = candidate.responsibilities();

                // Candidates with no responsibility are not interesting
                if responsibilities.is_empty() {
                    continue;
                }

                // To avoid thrashing, only consider candidates with either
                // (1) strictly smaller total coverage or
                // (2) same total coverage but strictly larger size
                let weaker = candidate.non_zero_coverage() < current_non_zero
                    || (candidate.non_zero_coverage() == current_non_zero
                        && current_size < candidate.input().size());

                // The current input must cover everything the candidate is
                // responsible for to subsume it completely
                if weaker && responsibilities.iter().all(|edge| covered.contains(edge)) {
                    result.extend(responsibilities.iter().copied());
                }
            }
        }

        result
    }

    fn save_current_input(
        &mut self,
        current: CurrentRun,
        responsibilities: HashSet<i32>,
        why: &str,
    ) -> Result<(), Error> {
        // Ids are issued to everyone, but the disk write may be skipped
        let new_input_id = self.num_saved;
        self.num_saved += 1;
        let filename = format!("id_{new_input_id:06}");
        let save_path = self.output.corpus_file(new_input_id);
        let input = current.input;

        if !self.config.save_only_valid || input.valid {
            self.output.write_input(&save_path, &input.dump_bytes())?;
            self.output.log(&format!(
                "Saved - {} {} {why}",
                save_path.display(),
                input.desc
            ))?;
        }

        // If not using guidance, do nothing else
        if self.blind {
            return Ok(());
        }

        let snapshot = self.run_coverage.snapshot();
        let non_zero = snapshot.non_zero_count();
        let idx = self
            .corpus
            .add(Testcase::new(input, new_input_id, filename, snapshot, non_zero));

        if let Some(parent_idx) = current.parent {
            self.corpus.get_mut(parent_idx)?.increment_offspring();
        }

        // Assume responsibility, subsuming any previous owners
        self.corpus.assign_responsibility(idx, responsibilities)?;

        // Make the new input available as a splicing source
        index_splice_locations(&self.corpus, &mut self.ec_to_input_loc, idx)?;
        Ok(())
    }

    fn handle_failure(
        &mut self,
        current: &CurrentRun,
        failure: &TargetFailure,
        hang: bool,
    ) -> Result<(), Error> {
        // The deepest cause identifies the failure
        let root = failure.root_cause();

        if self.unique_failures.insert(root.trace.clone()) {
            let crash_idx = self.unique_failures.len() - 1;
            let save_path = self.output.failure_file(crash_idx);
            self.output
                .write_input(&save_path, &current.input.dump_bytes())?;

            log::info!("found crash: {}", failure.message);
            self.output
                .log(&format!("Found crash: {}", failure.message))?;
            let why = if hang { "+hang" } else { "+crash" };
            self.output.log(&format!(
                "Saved - {} {} {why}",
                save_path.display(),
                current.input.desc
            ))?;
        }
        Ok(())
    }

    fn refresh_stats(&mut self) -> Result<(), Error> {
        let line = self.stats.plot_line(
            self.cycles_completed,
            self.current_parent_idx,
            self.corpus.count(),
            self.unique_failures.len(),
        );
        if let Some(line) = line {
            self.output.append_plot(&line)?;
        }
        Ok(())
    }
}

/// The standard coverage-guided guidance.
///
/// All handles given out ([`ByteSource`], [`TraceEventCallback`],
/// [`CoverageListener`]) point back at the same campaign state; the guidance
/// instance's lifetime bounds the instrumentation subscription, and dropping
/// it flushes the stats writer.
#[derive(Clone)]
pub struct StdGuidance {
    inner: Arc<Mutex<GuidanceInner>>,
    run_coverage: Arc<Coverage>,
}

impl std::fmt::Debug for StdGuidance {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("StdGuidance").finish_non_exhaustive()
    }
}

impl StdGuidance {
    /// Creates a guidance writing its results under `output_dir`.
    ///
    /// # Errors
    ///
    /// If the output directory cannot be prepared.
    pub fn new(config: GuidanceConfig, output_dir: &Path) -> Result<Self, Error> {
        Self::with_seeds(config, output_dir, std::iter::empty::<&Path>())
    }

    /// Creates a guidance with initial seed input files, consumed FIFO
    /// before any generated inputs.
    ///
    /// # Errors
    ///
    /// If the output directory cannot be prepared or a seed file cannot be
    /// read.
    pub fn with_seeds<P, I>(
        config: GuidanceConfig,
        output_dir: &Path,
        seed_files: I,
    ) -> Result<Self, Error>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = P>,
    {
        let output = OutputDirectory::prepare(output_dir)?;
        let rand = match config.rng_seed {
            Some(seed) => StdRand::with_seed(seed),
            None => StdRand::new(),
        };
        let mut seed_queue = VecDeque::new();
        for seed_file in seed_files {
            seed_queue.push_back(Input::from_seed_file(seed_file)?);
        }

        let run_coverage = Arc::new(Coverage::new());
        let blind = config.totally_random;
        let inner = GuidanceInner {
            config,
            rand,
            blind,
            ei_state: ExecutionIndexingState::new(),
            last_event: None,
            bytes_read: 0,
            event_count: 0,
            run_start: None,
            current: None,
            seed_queue,
            corpus: Corpus::new(),
            current_parent_idx: 0,
            children_generated: 0,
            cycles_completed: 0,
            num_favored_last_cycle: 0,
            num_saved: 0,
            ec_to_input_loc: HashMap::new(),
            run_coverage: Arc::clone(&run_coverage),
            total_coverage: Coverage::new(),
            valid_coverage: Coverage::new(),
            max_coverage: 0,
            unique_failures: HashSet::new(),
            stats: GuidanceStats::new(),
            output,
            app_thread: None,
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            run_coverage,
        })
    }

    fn lock(&self) -> MutexGuard<'_, GuidanceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The listener the instrumentation logs direct edge events to.
    #[must_use]
    pub fn coverage_listener(&self) -> CoverageListener {
        CoverageListener::new(Arc::clone(&self.run_coverage))
    }

    /// Overrides the blind (totally random) mode.
    pub fn set_blind(&self, blind: bool) {
        self.lock().blind = blind;
    }

    /// The number of trials completed.
    #[must_use]
    pub fn num_trials(&self) -> u64 {
        self.lock().stats.num_trials
    }

    /// The number of valid trials.
    #[must_use]
    pub fn num_valid(&self) -> u64 {
        self.lock().stats.num_valid
    }

    /// The number of completed corpus cycles.
    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.lock().cycles_completed
    }

    /// The number of favored inputs at the last cycle boundary.
    #[must_use]
    pub fn num_favored_last_cycle(&self) -> usize {
        self.lock().num_favored_last_cycle
    }

    /// The number of saved inputs.
    #[must_use]
    pub fn corpus_count(&self) -> usize {
        self.lock().corpus.count()
    }

    /// The index of the current parent input.
    #[must_use]
    pub fn current_parent_index(&self) -> usize {
        self.lock().current_parent_idx
    }

    /// The number of distinct failure signatures seen.
    #[must_use]
    pub fn unique_failure_count(&self) -> usize {
        self.lock().unique_failures.len()
    }

    /// A snapshot of the cumulative coverage over all inputs.
    #[must_use]
    pub fn total_coverage(&self) -> Coverage {
        self.lock().total_coverage.snapshot()
    }

    /// A snapshot of the cumulative coverage over valid inputs.
    #[must_use]
    pub fn valid_coverage(&self) -> Coverage {
        self.lock().valid_coverage.snapshot()
    }

    /// The responsibility set of the saved input at `idx`.
    ///
    /// # Errors
    ///
    /// If `idx` is out of range.
    pub fn responsibilities_of(&self, idx: usize) -> Result<Vec<i32>, Error> {
        let inner = self.lock();
        let mut edges: Vec<i32> = inner
            .corpus
            .get(idx)?
            .responsibilities()
            .iter()
            .copied()
            .collect();
        edges.sort_unstable();
        Ok(edges)
    }

    /// Whether the saved input at `idx` is favored.
    ///
    /// # Errors
    ///
    /// If `idx` is out of range.
    pub fn is_favored(&self, idx: usize) -> Result<bool, Error> {
        Ok(self.lock().corpus.get(idx)?.is_favored())
    }

    /// Checks that the responsibility sets partition the cumulative
    /// coverage, as they must at every cycle boundary.
    #[must_use]
    pub fn responsibilities_partition_coverage(&self) -> bool {
        let inner = self.lock();
        inner.corpus.sum_responsibilities() == inner.total_coverage.non_zero_count()
    }
}

impl Guidance for StdGuidance {
    fn get_input(&self) -> Result<ByteSource, Error> {
        self.lock().select_next_input()?;
        Ok(ByteSource {
            inner: Arc::clone(&self.inner),
        })
    }

    fn has_input(&self) -> bool {
        let inner = self.lock();
        match inner.config.max_duration {
            Some(max_duration) => inner.stats.elapsed() < max_duration,
            None => true,
        }
    }

    fn handle_result(&self, result: RunResult) -> Result<(), Error> {
        self.lock().handle_result(result)
    }

    fn generate_callback(&self, thread: ThreadId) -> Result<TraceEventCallback, Error> {
        let mut inner = self.lock();
        match inner.app_thread {
            Some(registered) if registered != thread => Err(Error::illegal_state(
                "guidance only supports single-threaded targets",
            )),
            _ => {
                inner.app_thread = Some(thread);
                Ok(TraceEventCallback::new(Arc::clone(&self.inner)))
            }
        }
    }
}

/// The byte stream the target reads its input from.
///
/// Each read serves one byte of the scheduled input, generating fresh bytes
/// on demand. EOF is surfaced as `None` (or a zero-length [`Read`] result).
pub struct ByteSource {
    inner: Arc<Mutex<GuidanceInner>>,
}

impl ByteSource {
    /// The next input byte, or `None` at EOF.
    ///
    /// # Errors
    ///
    /// On out-of-order reads or when no instrumentation is wired up.
    pub fn next_byte(&mut self) -> Result<Option<u8>, Error> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_byte()
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.next_byte() {
                Ok(Some(byte)) => {
                    buf[filled] = byte;
                    filled += 1;
                }
                Ok(None) => break,
                Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err)),
            }
        }
        Ok(filled)
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ByteSource").finish_non_exhaustive()
    }
}
