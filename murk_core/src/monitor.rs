//! Crash classification, deduplication and persistence.

use crate::executor::{ExecutionOutcome, Executor, TargetError};
use crate::input::Input;
use chrono::{DateTime, Local};
use log::{debug, error, warn};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Number of leading trace lines that identify a crash.
const TRACE_KEY_LINES: usize = 3;
/// Length of the hex crash fingerprint.
const CRASH_FINGERPRINT_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashCategory {
    Exception,
    Timeout,
    Memory,
    Recursion,
}

impl fmt::Display for CrashCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrashCategory::Exception => "exception",
            CrashCategory::Timeout => "timeout",
            CrashCategory::Memory => "memory",
            CrashCategory::Recursion => "recursion",
        };
        f.write_str(name)
    }
}

/// One classified failure.
#[derive(Debug, Clone)]
pub struct CrashReport {
    pub category: CrashCategory,
    pub message: String,
    pub trace: Option<String>,
    pub input: Vec<u8>,
    pub timestamp: DateTime<Local>,
}

impl CrashReport {
    pub fn new(
        category: CrashCategory,
        message: impl Into<String>,
        trace: Option<String>,
        input: &[u8],
    ) -> Self {
        Self {
            category,
            message: message.into(),
            trace,
            input: input.to_vec(),
            timestamp: Local::now(),
        }
    }

    /// Deduplication key: the category plus the first three lines of the trace.
    /// Without a trace the message stands in, except for timeouts, whose message
    /// carries the measured duration; all traceless timeouts share one key. The
    /// input bytes never take part, so every input hitting the same defect
    /// shares one key.
    pub fn fingerprint(&self) -> String {
        let source = match (self.trace.as_deref(), self.category) {
            (Some(trace), _) if !trace.is_empty() => trace,
            (_, CrashCategory::Timeout) => "",
            _ => self.message.as_str(),
        };
        let key_lines: Vec<&str> = source.split('\n').take(TRACE_KEY_LINES).collect();
        let digest = md5::compute(format!("{}:{}", self.category, key_lines.join("\n")));
        let mut hex = format!("{:x}", digest);
        hex.truncate(CRASH_FINGERPRINT_LEN);
        hex
    }

    /// The human-readable report written next to the crashing input.
    pub fn render(&self) -> String {
        format!(
            concat!(
                "Crash Type: {}\nTimestamp: {}\nError: {}\n\n",
                "--- Stack Trace ---\n{}\n\n",
                "--- Input (hex) ---\n{}\n",
            ),
            self.category,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message,
            self.trace.as_deref().unwrap_or_default(),
            self.input.to_hex(),
        )
    }
}

/// What one monitored target call produced.
#[derive(Debug)]
pub struct Observation {
    /// `None` when the call raised instead of returning an outcome.
    pub outcome: Option<ExecutionOutcome>,
    pub crash: Option<CrashReport>,
    pub elapsed: Duration,
}

/// Wraps exactly one target call and decides whether it crashed.
///
/// Priority: out-of-memory, recursion limit, any other error or panic, an
/// outcome the adapter itself flags as crashed, and finally a clean call that
/// simply took longer than `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    /// Post-hoc hang threshold; zero disables it.
    pub timeout: Duration,
}

impl Classifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn run<E>(&self, executor: &mut E, candidate: &[u8]) -> Observation
    where
        E: Executor + ?Sized,
    {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(candidate)));
        let elapsed = start.elapsed();

        let (outcome, crash) = match result {
            Err(payload) => {
                let message = format!("panic: {}", panic_message(payload.as_ref()));
                (
                    None,
                    Some(CrashReport::new(CrashCategory::Exception, message, None, candidate)),
                )
            }
            Ok(Err(error)) => (None, Some(Self::classify_error(&error, candidate))),
            Ok(Ok(outcome)) => {
                let crash = self.classify_outcome(&outcome, elapsed, candidate);
                (Some(outcome), crash)
            }
        };

        Observation {
            outcome,
            crash,
            elapsed,
        }
    }

    fn classify_error(error: &TargetError, candidate: &[u8]) -> CrashReport {
        let trace = error.trace().map(str::to_string);
        match error {
            TargetError::OutOfMemory { message, .. } => {
                CrashReport::new(CrashCategory::Memory, message.clone(), trace, candidate)
            }
            TargetError::RecursionLimit { message, .. } => {
                CrashReport::new(CrashCategory::Recursion, message.clone(), trace, candidate)
            }
            TargetError::Failed { .. } | TargetError::Transport { .. } => {
                CrashReport::new(CrashCategory::Exception, error.to_string(), trace, candidate)
            }
        }
    }

    fn classify_outcome(
        &self,
        outcome: &ExecutionOutcome,
        elapsed: Duration,
        candidate: &[u8],
    ) -> Option<CrashReport> {
        if outcome.crashed {
            let message = outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "Target reported a crash".to_string());
            return Some(CrashReport::new(
                CrashCategory::Exception,
                message,
                outcome.diagnostics.clone(),
                candidate,
            ));
        }
        if !self.timeout.is_zero() && elapsed > self.timeout {
            let message = format!(
                "Execution took {:.2}s (limit: {:.2}s)",
                elapsed.as_secs_f64(),
                self.timeout.as_secs_f64()
            );
            return Some(CrashReport::new(CrashCategory::Timeout, message, None, candidate));
        }
        None
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Error, Debug)]
pub enum CrashStoreError {
    #[error("Failed to create crash directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write crash artifact {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The crash directory plus the set of crash fingerprints seen in this run.
#[derive(Debug)]
pub struct CrashStore {
    dir: PathBuf,
    seen: HashSet<String>,
}

impl CrashStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CrashStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CrashStoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            seen: HashSet::new(),
        })
    }

    /// Registers `report` and, on first sight of its fingerprint, writes
    /// `crash_<fp>.input` and `crash_<fp>.txt`.
    ///
    /// Returns `Ok(true)` for a new crash and `Ok(false)` for a duplicate. A
    /// write failure is only possible for a new crash; the fingerprint stays
    /// registered so the artifact is not retried on every later occurrence.
    pub fn record(&mut self, report: &CrashReport) -> Result<bool, CrashStoreError> {
        let fingerprint = report.fingerprint();
        if !self.seen.insert(fingerprint.clone()) {
            debug!("Duplicate crash {fingerprint} dropped");
            return Ok(false);
        }

        let base_name = format!("crash_{fingerprint}");
        let input_path = self.dir.join(format!("{base_name}.input"));
        let info_path = self.dir.join(format!("{base_name}.txt"));
        write_artifact(&input_path, &report.input)?;
        write_artifact(&info_path, report.render().as_bytes())?;

        let short_message: String = report.message.chars().take(80).collect();
        warn!(
            "New crash found: {fingerprint} (type: {}, error: {short_message})",
            report.category
        );
        Ok(true)
    }

    /// [`CrashStore::record`] for callers that only need to count: returns
    /// `true` when the crash is new. A write failure is logged and still
    /// counts, since the fingerprint was registered.
    pub fn register(&mut self, report: &CrashReport) -> bool {
        match self.record(report) {
            Ok(is_new) => is_new,
            Err(e) => {
                error!("Failed to save crash {}: {e}", report.fingerprint());
                true
            }
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Unique crashes registered so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn write_artifact(path: &Path, contents: &[u8]) -> Result<(), CrashStoreError> {
    fs::write(path, contents).map_err(|source| CrashStoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// A classifier bound to a crash store: classify one call, then dedup and persist.
#[derive(Debug)]
pub struct CrashMonitor {
    pub classifier: Classifier,
    pub store: CrashStore,
}

impl CrashMonitor {
    pub fn new(
        timeout: Duration,
        crash_dir: impl Into<PathBuf>,
    ) -> Result<Self, CrashStoreError> {
        Ok(Self {
            classifier: Classifier::new(timeout),
            store: CrashStore::new(crash_dir)?,
        })
    }

    /// Runs `candidate` once. The returned report is present for every crash,
    /// duplicates included; only first sightings reach the crash directory.
    pub fn execute<E>(
        &mut self,
        executor: &mut E,
        candidate: &[u8],
    ) -> (Option<ExecutionOutcome>, Option<CrashReport>)
    where
        E: Executor + ?Sized,
    {
        let observation = self.classifier.run(executor, candidate);
        if let Some(report) = &observation.crash {
            self.store.register(report);
        }
        (observation.outcome, observation.crash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InProcessExecutor;
    use std::thread;
    use tempfile::tempdir;

    fn crash_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn same_defect_different_inputs_is_persisted_once() {
        let temp_dir = tempdir().unwrap();
        let mut monitor = CrashMonitor::new(Duration::from_secs(5), temp_dir.path()).unwrap();
        let mut executor = InProcessExecutor::new(|_data: &[u8]| {
            Err(TargetError::Failed {
                kind: "KeyError".to_string(),
                message: "'value'".to_string(),
                trace: Some("frame a\nframe b\nframe c\nframe d".to_string()),
            })
        });

        let (_, first) = monitor.execute(&mut executor, b"first input");
        let (_, second) = monitor.execute(&mut executor, b"another input entirely");
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(monitor.store.len(), 1);

        let fp = first.fingerprint();
        assert_eq!(fp.len(), 12);
        assert_eq!(
            crash_files(temp_dir.path()),
            vec![format!("crash_{fp}.input"), format!("crash_{fp}.txt")]
        );
        let saved = fs::read(temp_dir.path().join(format!("crash_{fp}.input"))).unwrap();
        assert_eq!(saved, b"first input");
    }

    #[test]
    fn only_first_three_trace_lines_identify_a_crash() {
        let a = CrashReport::new(
            CrashCategory::Exception,
            "x",
            Some("l1\nl2\nl3\nl4".to_string()),
            b"a",
        );
        let b = CrashReport::new(
            CrashCategory::Exception,
            "y",
            Some("l1\nl2\nl3\nother".to_string()),
            b"b",
        );
        let c = CrashReport::new(
            CrashCategory::Memory,
            "x",
            Some("l1\nl2\nl3\nl4".to_string()),
            b"a",
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_matches_md5_of_category_and_trace_key() {
        let report = CrashReport::new(
            CrashCategory::Exception,
            "ValueError: bad",
            Some("t1\nt2".to_string()),
            b"",
        );
        let expected = format!("{:x}", md5::compute("exception:t1\nt2"));
        assert_eq!(report.fingerprint(), expected[..12]);
    }

    #[test]
    fn error_kinds_map_to_categories() {
        let classifier = Classifier::new(Duration::from_secs(5));
        let cases = vec![
            (
                TargetError::OutOfMemory {
                    message: "allocation failed".to_string(),
                    trace: None,
                },
                CrashCategory::Memory,
                "allocation failed",
            ),
            (
                TargetError::RecursionLimit {
                    message: "maximum recursion depth exceeded".to_string(),
                    trace: None,
                },
                CrashCategory::Recursion,
                "maximum recursion depth exceeded",
            ),
            (
                TargetError::failed("ValueError", "invalid literal"),
                CrashCategory::Exception,
                "ValueError: invalid literal",
            ),
            (
                TargetError::transport("ConnectionError", "Connection refused"),
                CrashCategory::Exception,
                "ConnectionError: Connection refused",
            ),
        ];

        for (error, category, message) in cases {
            let mut executor = InProcessExecutor::new(move |_data: &[u8]| Err(error.clone()));
            let observation = classifier.run(&mut executor, b"x");
            assert!(observation.outcome.is_none());
            let crash = observation.crash.unwrap();
            assert_eq!(crash.category, category);
            assert_eq!(crash.message, message);
        }
    }

    #[test]
    fn panics_are_exceptions() {
        let classifier = Classifier::new(Duration::from_secs(5));
        let mut executor = InProcessExecutor::new(|data: &[u8]| {
            if data.starts_with(b"BAD") {
                panic!("BAD input detected by harness!");
            }
            Ok(ExecutionOutcome::ok(data))
        });
        let crash = classifier.run(&mut executor, b"BAD!").crash.unwrap();
        assert_eq!(crash.category, CrashCategory::Exception);
        assert_eq!(crash.message, "panic: BAD input detected by harness!");

        assert!(classifier.run(&mut executor, b"GOOD").crash.is_none());
    }

    #[test]
    fn adapter_flagged_crash_is_an_exception_with_diagnostics() {
        let classifier = Classifier::new(Duration::from_secs(5));
        let mut executor = InProcessExecutor::new(|data: &[u8]| {
            Ok(ExecutionOutcome::crash(data, "Server error: HTTP 500")
                .with_diagnostics("Traceback\n  line 1"))
        });
        let observation = classifier.run(&mut executor, b"{}");
        assert!(observation.outcome.unwrap().crashed);
        let crash = observation.crash.unwrap();
        assert_eq!(crash.category, CrashCategory::Exception);
        assert_eq!(crash.message, "Server error: HTTP 500");
        assert_eq!(crash.trace.as_deref(), Some("Traceback\n  line 1"));
    }

    #[test]
    fn slow_clean_call_is_a_timeout() {
        let classifier = Classifier::new(Duration::from_millis(10));
        let mut executor = InProcessExecutor::new(|data: &[u8]| {
            thread::sleep(Duration::from_millis(50));
            Ok(ExecutionOutcome::ok(data).with_fingerprint("slow"))
        });
        let observation = classifier.run(&mut executor, b"x");
        assert!(observation.elapsed >= Duration::from_millis(50));
        assert_eq!(observation.outcome.unwrap().fingerprint, "slow");
        let crash = observation.crash.unwrap();
        assert_eq!(crash.category, CrashCategory::Timeout);
        assert!(crash.message.starts_with("Execution took"));
    }

    #[test]
    fn slow_inputs_of_different_durations_share_one_timeout_crash() {
        let temp_dir = tempdir().unwrap();
        let mut monitor = CrashMonitor::new(Duration::from_millis(10), temp_dir.path()).unwrap();
        let mut executor = InProcessExecutor::new(|data: &[u8]| {
            thread::sleep(Duration::from_millis(20 * data.len() as u64));
            Ok(ExecutionOutcome::ok(data))
        });

        let mut fingerprints = Vec::new();
        for input in [&b"a"[..], b"bbb", b"ccccc"] {
            let (_, crash) = monitor.execute(&mut executor, input);
            let crash = crash.unwrap();
            assert_eq!(crash.category, CrashCategory::Timeout);
            assert!(crash.message.starts_with("Execution took"));
            fingerprints.push(crash.fingerprint());
        }

        assert!(fingerprints.iter().all(|fp| fp == &fingerprints[0]));
        assert_eq!(monitor.store.len(), 1);
        assert_eq!(crash_files(temp_dir.path()).len(), 2);
        let expected = format!("{:x}", md5::compute("timeout:"));
        assert_eq!(fingerprints[0], expected[..12]);
    }

    #[test]
    fn register_counts_only_first_sighting() {
        let temp_dir = tempdir().unwrap();
        let mut store = CrashStore::new(temp_dir.path()).unwrap();
        let report = CrashReport::new(CrashCategory::Exception, "boom", None, b"x");
        assert!(store.register(&report));
        assert!(!store.register(&report));

        fs::remove_dir_all(temp_dir.path()).unwrap();
        let other = CrashReport::new(CrashCategory::Memory, "oom", None, b"y");
        assert!(store.register(&other));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn zero_timeout_disables_hang_detection() {
        let classifier = Classifier::new(Duration::ZERO);
        let mut executor = InProcessExecutor::new(|data: &[u8]| {
            thread::sleep(Duration::from_millis(5));
            Ok(ExecutionOutcome::ok(data))
        });
        assert!(classifier.run(&mut executor, b"x").crash.is_none());
    }

    #[test]
    fn report_renders_all_sections() {
        let report = CrashReport::new(
            CrashCategory::Recursion,
            "maximum recursion depth exceeded",
            Some("frame 1".to_string()),
            &[0xde, 0xad],
        );
        let text = report.render();
        assert!(text.starts_with("Crash Type: recursion\n"));
        assert!(text.contains("Timestamp: "));
        assert!(text.contains("Error: maximum recursion depth exceeded\n"));
        assert!(text.contains("--- Stack Trace ---\nframe 1\n"));
        assert!(text.ends_with("--- Input (hex) ---\ndead\n"));
    }

    #[test]
    fn crash_store_creates_directory_and_counts_uniques() {
        let temp_dir = tempdir().unwrap();
        let crash_dir = temp_dir.path().join("nested").join("crashes");
        let mut store = CrashStore::new(&crash_dir).unwrap();
        assert!(crash_dir.is_dir());
        assert!(store.is_empty());

        let report = CrashReport::new(CrashCategory::Timeout, "slow", None, b"zzz");
        assert!(store.record(&report).unwrap());
        assert!(!store.record(&report).unwrap());
        assert!(store.contains(&report.fingerprint()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.dir(), crash_dir.as_path());
    }
}
