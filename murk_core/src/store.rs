use crate::corpus::{Corpus, EntryOrigin, InMemoryCorpus};
use crate::feedback::{BehaviorFeedback, Feedback};
use crate::input::Input;
use crate::scheduler::{RandomScheduler, Scheduler, SchedulerError};
use log::{info, warn};
use rand_core::RngCore;
use std::path::{Path, PathBuf};

/// Seed used when no seed files could be loaded, so the corpus is never empty.
pub const DEFAULT_SEED: &[u8] = b"test";

/// The working set of a fuzzing run: the retained inputs plus the set of
/// behavior fingerprints seen so far.
///
/// The store is never empty once constructed and only grows. An input is
/// admitted iff its fingerprint is non-empty and new; byte-identical inputs with
/// different fingerprints are all kept.
pub struct CoverageStore<I: Input> {
    corpus: InMemoryCorpus<I>,
    feedback: Box<dyn Feedback>,
    scheduler: Box<dyn Scheduler<I>>,
}

impl<I: Input + From<Vec<u8>>> CoverageStore<I> {
    /// Builds a store from in-memory seeds, falling back to [`DEFAULT_SEED`]
    /// when `seeds` yields nothing.
    pub fn from_seeds(seeds: impl IntoIterator<Item = I>) -> Self {
        let mut store = Self::empty();
        for seed in seeds {
            store.push(seed, EntryOrigin::Provided);
        }
        store.ensure_seeded();
        store
    }

    /// Builds a store from a seed directory: one entry per regular file.
    ///
    /// A missing or unreadable directory is logged and degrades to the default
    /// seed; it never fails.
    pub fn load(seed_dir: &Path) -> Self {
        Self::load_paths(&[seed_dir.to_path_buf()])
    }

    /// Like [`CoverageStore::load`], over several files or directories.
    pub fn load_paths(seed_paths: &[PathBuf]) -> Self {
        let mut store = Self::empty();
        match store.corpus.load_initial_seeds(seed_paths) {
            Ok(count) => info!("Loaded {count} seed(s) from {seed_paths:?}"),
            Err(e) => warn!("Seed loading failed: {e}"),
        }
        store.ensure_seeded();
        store
    }

    fn empty() -> Self {
        Self {
            corpus: InMemoryCorpus::new(),
            feedback: Box::new(BehaviorFeedback::new()),
            scheduler: Box::new(RandomScheduler::new()),
        }
    }

    fn ensure_seeded(&mut self) {
        if self.corpus.is_empty() {
            warn!("No seeds found, using default seed {:?}", DEFAULT_SEED);
            self.push(I::from(DEFAULT_SEED.to_vec()), EntryOrigin::DefaultSeed);
        }
    }

    fn push(&mut self, input: I, origin: EntryOrigin) -> bool {
        match self.corpus.add(input, origin) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to append to corpus: {e}");
                false
            }
        }
    }

    /// Replaces the selection policy.
    pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler<I>>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Replaces the admission policy. Fingerprints already observed are forgotten.
    pub fn with_feedback(mut self, feedback: Box<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Picks the next input to mutate.
    ///
    /// # Returns
    /// The entry's ID and a reference to it. Fails only if the corpus is empty,
    /// which construction rules out.
    pub fn pick(&mut self, rng: &mut dyn RngCore) -> Result<(usize, &I), SchedulerError> {
        let id = self.scheduler.next(&self.corpus, rng)?;
        self.corpus
            .get(id)
            .map(|(input, _)| (id, input))
            .ok_or(SchedulerError::CorpusEmpty)
    }

    /// Appends `input` iff `fingerprint` is non-empty and unseen.
    ///
    /// Admitting the same fingerprint twice grows the corpus once.
    pub fn admit(&mut self, input: I, fingerprint: &str) -> bool {
        if !self.feedback.observe(fingerprint) {
            return false;
        }
        self.push(
            input,
            EntryOrigin::Discovered {
                fingerprint: fingerprint.to_string(),
            },
        )
    }

    /// [`CoverageStore::admit`] for a mutant of entry `parent`; the scheduler
    /// is told when the parent produced something new.
    pub fn admit_mutant(&mut self, parent: usize, input: I, fingerprint: &str) -> bool {
        let admitted = self.admit(input, fingerprint);
        if admitted {
            self.scheduler.report_new_behavior(parent);
        }
        admitted
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn fingerprints_seen(&self) -> usize {
        self.feedback.observed()
    }

    pub fn corpus(&self) -> &InMemoryCorpus<I> {
        &self.corpus
    }
}
