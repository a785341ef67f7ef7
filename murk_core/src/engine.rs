//! The fuzzing loop: pick, mutate, execute, classify, admit.

use crate::executor::Executor;
use crate::monitor::{Classifier, CrashStore, CrashStoreError};
use crate::mutator::{Mutator, rng_from_seed};
use crate::stats::{RunStats, RunSummary, StopReason};
use crate::store::CoverageStore;
use log::{debug, error, info};
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// All mutable state of one fuzzing session.
///
/// Owned by the caller and handed to [`Fuzzer::run`] explicitly, so several
/// independent sessions can live in one process.
pub struct FuzzSession {
    pub store: CoverageStore<Vec<u8>>,
    pub crashes: CrashStore,
    pub stats: RunStats,
}

impl FuzzSession {
    pub fn new(store: CoverageStore<Vec<u8>>, crashes: CrashStore) -> Self {
        Self {
            store,
            crashes,
            stats: RunStats::new(),
        }
    }

    /// Loads seeds from `seed_dir` and prepares `crash_dir`.
    pub fn open(seed_dir: &Path, crash_dir: &Path) -> Result<Self, CrashStoreError> {
        let crashes = CrashStore::new(crash_dir)?;
        Ok(Self::new(CoverageStore::load(seed_dir), crashes))
    }
}

#[derive(Debug, Clone)]
pub struct FuzzerOptions {
    pub max_iterations: u64,
    /// Emit a status line every this many executions; zero disables it.
    pub status_interval: u64,
    pub workers: usize,
    pub seed: Option<u64>,
    /// Post-hoc hang threshold applied by the classifier.
    pub timeout: Duration,
}

impl Default for FuzzerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            status_interval: 100,
            workers: 1,
            seed: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Cloneable external stop request.
///
/// Checked before every iteration, so a running loop stops within one
/// in-flight target call.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Fuzzer<M: Mutator> {
    options: FuzzerOptions,
    mutator: M,
    classifier: Classifier,
    stop: StopHandle,
}

impl<M: Mutator> Fuzzer<M> {
    pub fn new(mutator: M, options: FuzzerOptions) -> Self {
        Self {
            classifier: Classifier::new(options.timeout),
            options,
            mutator,
            stop: StopHandle::new(),
        }
    }

    pub fn options(&self) -> &FuzzerOptions {
        &self.options
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs a single worker until the iteration budget is spent or a stop is
    /// requested. The summary is logged and returned in both cases.
    pub fn run<E>(&self, session: &mut FuzzSession, executor: &mut E) -> RunSummary
    where
        E: Executor + ?Sized,
    {
        self.log_start(session, 1);
        let mut rng = rng_from_seed(self.options.seed);
        let budget = AtomicU64::new(self.options.max_iterations);
        let shared = Mutex::new(&mut *session);
        let reason = self.worker_loop(&shared, executor, &mut rng, &budget);
        drop(shared);
        self.finish(session, reason)
    }

    /// Runs `workers` loops concurrently, each with its own executor from
    /// `factory` and its own random stream.
    ///
    /// Picking, crash registration and admission all happen under one lock, so
    /// every unique crash is persisted exactly once and the total execution
    /// count equals the iteration budget.
    pub fn run_parallel<E, F>(
        &self,
        session: &mut FuzzSession,
        workers: usize,
        factory: F,
    ) -> RunSummary
    where
        E: Executor,
        F: Fn(usize) -> E + Sync,
    {
        let workers = workers.max(1);
        self.log_start(session, workers);
        let base_rng = rng_from_seed(self.options.seed);
        let budget = AtomicU64::new(self.options.max_iterations);
        let shared = Mutex::new(&mut *session);

        let reasons: Vec<StopReason> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let mut rng = base_rng.clone();
                    rng.set_stream(worker as u64);
                    let (shared, budget, factory) = (&shared, &budget, &factory);
                    scope.spawn(move || {
                        let mut executor = factory(worker);
                        self.worker_loop(shared, &mut executor, &mut rng, budget)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        error!("Fuzzing worker panicked");
                        StopReason::Interrupted
                    })
                })
                .collect()
        });
        drop(shared);

        let reason = if reasons.contains(&StopReason::Interrupted) {
            StopReason::Interrupted
        } else {
            StopReason::IterationLimit
        };
        self.finish(session, reason)
    }

    fn log_start(&self, session: &FuzzSession, workers: usize) {
        info!(
            "Starting fuzzing: {} iterations, {} worker(s), mutator {}, corpus size {}",
            self.options.max_iterations,
            workers,
            self.mutator.name(),
            session.store.len()
        );
    }

    fn worker_loop<E>(
        &self,
        shared: &Mutex<&mut FuzzSession>,
        executor: &mut E,
        rng: &mut ChaCha8Rng,
        budget: &AtomicU64,
    ) -> StopReason
    where
        E: Executor + ?Sized,
    {
        loop {
            if self.stop.is_stopped() {
                return StopReason::Interrupted;
            }
            if budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_err()
            {
                return StopReason::IterationLimit;
            }

            let picked = {
                let mut session = shared.lock().unwrap_or_else(PoisonError::into_inner);
                session
                    .store
                    .pick(rng)
                    .map(|(id, input)| (id, input.clone()))
            };
            let (parent, candidate) = match picked {
                Ok(picked) => picked,
                Err(e) => {
                    error!("Skipping iteration: {e}");
                    continue;
                }
            };

            let mutated = self.mutator.mutate(&candidate, rng);
            let observation = self.classifier.run(&mut *executor, &mutated);

            let mut session = shared.lock().unwrap_or_else(PoisonError::into_inner);
            session.stats.total_executions += 1;

            if let Some(report) = &observation.crash {
                if session.crashes.register(report) {
                    session.stats.unique_crashes += 1;
                }
            }

            if let Some(outcome) = observation.outcome {
                if !outcome.fingerprint.is_empty()
                    && session
                        .store
                        .admit_mutant(parent, mutated, &outcome.fingerprint)
                {
                    session.stats.record_new_path();
                    debug!(
                        "New path {} (corpus size {})",
                        outcome.fingerprint,
                        session.store.len()
                    );
                }
            }

            let interval = self.options.status_interval;
            if interval > 0 && session.stats.total_executions % interval == 0 {
                info!("{}", session.stats.status_line(session.store.len()));
            }
        }
    }

    fn finish(&self, session: &FuzzSession, reason: StopReason) -> RunSummary {
        let summary = session.stats.summary(session.store.len(), reason);
        for line in summary.to_string().lines() {
            info!("{line}");
        }
        summary
    }
}
