use crate::input::Input;
use log::{debug, warn};
use rand::Rng;
use rand_core::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Defines errors that can arise during corpus operations.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// A seed location could not be listed or read.
    #[error("Corpus I/O error: {0}")]
    Io(String),
}

/// Where a corpus entry came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Loaded from a seed file at startup.
    SeedFile(PathBuf),
    /// Supplied directly by the caller, e.g. an in-memory seed set.
    Provided,
    /// The built-in fallback used when no seeds are available.
    DefaultSeed,
    /// A mutant admitted because it produced an unseen behavior fingerprint.
    Discovered { fingerprint: String },
}

/// Defines the common interface for a collection of fuzzing inputs.
///
/// A corpus is append-only: entries are never removed, reordered, or
/// deduplicated by content. IDs are dense indices assigned in insertion order.
///
/// # Type Parameters
/// * `I`: The type of input stored in the corpus, which must implement the [`Input`] trait.
pub trait Corpus<I: Input>: Send + Sync {
    /// Appends an input with its origin and returns the new entry's ID.
    fn add(&mut self, input: I, origin: EntryOrigin) -> Result<usize, CorpusError>;

    /// Retrieves an input and its origin by ID, or `None` if the ID is unknown.
    fn get(&self, id: usize) -> Option<(&I, &EntryOrigin)>;

    /// Selects an entry uniformly at random.
    ///
    /// # Returns
    /// The ID and a reference to the input, or `None` if the corpus is empty.
    fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &I)>;

    /// Returns the total number of inputs currently stored in the corpus.
    fn len(&self) -> usize;

    /// Returns `true` if the corpus contains no inputs.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads initial seed inputs from a collection of file system paths.
    ///
    /// Each path can point to either an individual seed file or a directory
    /// containing seed files. Directories are not traversed recursively. Every
    /// file's raw bytes become one entry.
    ///
    /// A seed file that cannot be read is logged and skipped. A path that cannot
    /// be listed at all is reported as an error after the remaining paths have
    /// been processed.
    ///
    /// # Returns
    /// The number of seeds successfully loaded.
    fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, CorpusError>;
}

/// An in-memory implementation of the `Corpus` trait.
///
/// All inputs live in a `Vec`. Nothing is persisted; the retained corpus is a
/// per-run working set.
#[derive(Debug)]
pub struct InMemoryCorpus<I: Input> {
    entries: Vec<(I, EntryOrigin)>,
}

impl<I: Input> InMemoryCorpus<I> {
    /// Creates a new, empty `InMemoryCorpus`.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Iterates over the stored inputs in insertion order.
    pub fn inputs(&self) -> impl Iterator<Item = &I> {
        self.entries.iter().map(|(input, _)| input)
    }
}

impl<I: Input> Default for InMemoryCorpus<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Input + From<Vec<u8>>> InMemoryCorpus<I> {
    fn load_seed_file(&mut self, path: &Path) -> bool {
        match fs::read(path) {
            Ok(bytes) => {
                debug!("Loaded seed {:?} ({} bytes)", path, bytes.len());
                self.entries
                    .push((I::from(bytes), EntryOrigin::SeedFile(path.to_path_buf())));
                true
            }
            Err(e) => {
                warn!("Failed to load seed {:?}: {}", path, e);
                false
            }
        }
    }

    fn load_seed_dir(&mut self, dir: &Path) -> Result<usize, CorpusError> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| {
                CorpusError::Io(format!("Failed to read seed directory {:?}: {}", dir, e))
            })?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!("Error reading entry in {:?}: {}", dir, e);
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        // read_dir order is platform dependent; sort so seeded runs replay.
        files.sort();

        let mut loaded = 0;
        for path in &files {
            if self.load_seed_file(path) {
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

impl<I: Input + From<Vec<u8>>> Corpus<I> for InMemoryCorpus<I> {
    fn add(&mut self, input: I, origin: EntryOrigin) -> Result<usize, CorpusError> {
        let id = self.entries.len();
        self.entries.push((input, origin));
        Ok(id)
    }

    fn get(&self, id: usize) -> Option<(&I, &EntryOrigin)> {
        self.entries.get(id).map(|(input, origin)| (input, origin))
    }

    fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &I)> {
        if self.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.entries.len());
        self.entries.get(index).map(|(input, _)| (index, input))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, CorpusError> {
        let mut loaded_count = 0;
        let mut first_error = None;
        for path in seed_paths {
            if path.is_file() {
                if self.load_seed_file(path) {
                    loaded_count += 1;
                }
            } else if path.is_dir() {
                match self.load_seed_dir(path) {
                    Ok(count) => loaded_count += count,
                    Err(e) => {
                        warn!("{e}");
                        first_error.get_or_insert(e);
                    }
                }
            } else {
                warn!("Seed path {:?} does not exist", path);
            }
        }
        match first_error {
            Some(e) if loaded_count == 0 => Err(e),
            _ => Ok(loaded_count),
        }
    }
}
