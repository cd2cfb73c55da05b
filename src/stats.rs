//! Trial accounting and the periodic stats line.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Minimum amount of time between two stats refreshes.
pub const STATS_REFRESH_PERIOD: Duration = Duration::from_millis(300);

/// Counts trials and produces the `plot_data` CSV lines.
#[derive(Debug, Clone)]
pub struct GuidanceStats {
    start_time: Instant,
    last_refresh_time: Instant,
    last_num_trials: u64,
    /// The number of trials completed
    pub num_trials: u64,
    /// The number of valid (assumption-satisfying) trials
    pub num_valid: u64,
}

impl Default for GuidanceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl GuidanceStats {
    /// Creates fresh statistics, starting the campaign clock.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_refresh_time: now,
            last_num_trials: 0,
            num_trials: 0,
            num_valid: 0,
        }
    }

    /// Wall-clock time since the campaign started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Produces the next stats line if at least [`STATS_REFRESH_PERIOD`] has
    /// passed since the previous one, advancing the refresh window.
    ///
    /// Line schema:
    /// `unix_seconds, cycles_done, cur_parent_idx, queue_size, 0, 0,
    /// unique_failures, 0, 0, interval_execs_per_sec, valid, invalid`
    pub fn plot_line(
        &mut self,
        cycles_completed: u64,
        current_parent_idx: usize,
        queue_size: usize,
        unique_failures: usize,
    ) -> Option<String> {
        let now = Instant::now();
        let interval = now.duration_since(self.last_refresh_time);
        if interval < STATS_REFRESH_PERIOD {
            return None;
        }

        let interval_trials = self.num_trials - self.last_num_trials;
        let interval_execs_per_sec = interval_trials as f64 * 1000.0 / interval.as_millis() as f64;
        self.last_refresh_time = now;
        self.last_num_trials = self.num_trials;

        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Some(format!(
            "{unix_seconds}, {cycles_completed}, {current_parent_idx}, {queue_size}, 0, 0, \
             {unique_failures}, 0, 0, {interval_execs_per_sec:.2}, {}, {}",
            self.num_valid,
            self.num_trials - self.num_valid
        ))
    }
}
