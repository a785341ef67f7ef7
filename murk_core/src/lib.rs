pub mod config;
pub mod corpus;
pub mod engine;
pub mod executor;
pub mod feedback;
pub mod fingerprint;
pub mod input;
pub mod monitor;
pub mod mutator;
pub mod scheduler;
pub mod stats;
pub mod store;

pub use config::MurkConfig;
pub use corpus::{Corpus, CorpusError, EntryOrigin, InMemoryCorpus};
pub use engine::{FuzzSession, Fuzzer, FuzzerOptions, StopHandle};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionOutcome, Executor, InProcessExecutor,
    InputDelivery, TargetError,
};
pub use feedback::{BehaviorFeedback, Feedback};
pub use fingerprint::{Fingerprinter, LengthBucketFingerprinter, Response, ResponseFingerprinter};
pub use input::Input;
pub use monitor::{
    Classifier, CrashCategory, CrashMonitor, CrashReport, CrashStore, CrashStoreError,
    Observation,
};
pub use mutator::{
    AnyMutator, ByteMutator, DictionaryMutator, MutationStrategy, Mutator, SeededMutator,
};
pub use scheduler::{RandomScheduler, Scheduler, SchedulerError};
pub use stats::{RunStats, RunSummary, StopReason};
pub use store::CoverageStore;
