use chrono::{DateTime, Local};
use std::fmt;
use std::time::{Duration, Instant};

/// Running counters of one fuzzing session. Rates and runtime are derived on read.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub total_executions: u64,
    pub unique_crashes: u64,
    pub unique_paths: u64,
    pub started: Instant,
    pub started_at: DateTime<Local>,
    pub last_new_path: Option<DateTime<Local>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            total_executions: 0,
            unique_crashes: 0,
            unique_paths: 0,
            started: Instant::now(),
            started_at: Local::now(),
            last_new_path: None,
        }
    }

    pub fn runtime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn execs_per_sec(&self) -> f64 {
        let secs = self.runtime().as_secs_f64();
        if secs > 0.0 {
            self.total_executions as f64 / secs
        } else {
            0.0
        }
    }

    pub fn record_new_path(&mut self) {
        self.unique_paths += 1;
        self.last_new_path = Some(Local::now());
    }

    pub fn status_line(&self, corpus_len: usize) -> String {
        format!(
            "[{:.0}s] Execs: {} ({:.1}/s) | Crashes: {} | Corpus: {} | Paths: {}",
            self.runtime().as_secs_f64(),
            self.total_executions,
            self.execs_per_sec(),
            self.unique_crashes,
            corpus_len,
            self.unique_paths
        )
    }

    pub fn summary(&self, corpus_len: usize, reason: StopReason) -> RunSummary {
        RunSummary {
            total_executions: self.total_executions,
            unique_crashes: self.unique_crashes,
            unique_paths: self.unique_paths,
            corpus_len,
            runtime: self.runtime(),
            reason,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The iteration budget was used up.
    IterationLimit,
    /// A stop was requested from outside the loop.
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::IterationLimit => f.write_str("iteration limit reached"),
            StopReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Final totals of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub total_executions: u64,
    pub unique_crashes: u64,
    pub unique_paths: u64,
    pub corpus_len: usize,
    pub runtime: Duration,
    pub reason: StopReason,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fuzzing complete ({})", self.reason)?;
        writeln!(f, "  Total executions:  {}", self.total_executions)?;
        writeln!(f, "  Unique crashes:    {}", self.unique_crashes)?;
        writeln!(f, "  Unique paths:      {}", self.unique_paths)?;
        writeln!(f, "  Final corpus size: {}", self.corpus_len)?;
        write!(f, "  Runtime:           {:.1}s", self.runtime.as_secs_f64())
    }
}
