use crate::corpus::Corpus;
use crate::input::Input;
use rand_core::RngCore;
use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Indicates that the corpus is empty, and therefore no input can be scheduled.
    #[error("Corpus is empty, cannot schedule next input")]
    CorpusEmpty,
}

/// A `Scheduler` decides which corpus entry gets mutated next.
pub trait Scheduler<I: Input>: Send + Sync {
    /// Selects and returns the ID of the next input to be mutated.
    ///
    /// # Returns
    /// The ID of the selected entry, or `SchedulerError::CorpusEmpty`.
    fn next(&mut self, corpus: &dyn Corpus<I>, rng: &mut dyn RngCore)
    -> Result<usize, SchedulerError>;

    /// Tells the scheduler that the entry `input_id` was the parent of a mutant
    /// which produced new behavior.
    fn report_new_behavior(&mut self, input_id: usize);
}

/// Uniform random selection. Every entry is equally likely regardless of how
/// recently it produced anything new.
#[derive(Default, Debug)]
pub struct RandomScheduler;

impl RandomScheduler {
    /// Creates a new `RandomScheduler`.
    pub fn new() -> Self {
        RandomScheduler
    }
}

impl<I: Input> Scheduler<I> for RandomScheduler {
    fn next(
        &mut self,
        corpus: &dyn Corpus<I>,
        rng: &mut dyn RngCore,
    ) -> Result<usize, SchedulerError> {
        corpus
            .random_select(rng)
            .map(|(id, _input)| id)
            .ok_or(SchedulerError::CorpusEmpty)
    }

    fn report_new_behavior(&mut self, _input_id: usize) {
        // no weighting
    }
}
