use std::collections::HashSet;

/// Decides whether an execution exhibited behavior worth keeping.
///
/// The behavior fingerprint is opaque: feedback only compares fingerprints for
/// equality and never interprets them. An empty fingerprint means the target
/// had no signal to offer and is never interesting.
pub trait Feedback: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `true` if `fingerprint` has not been seen in this run.
    fn is_interesting(&self, fingerprint: &str) -> bool;

    /// Marks `fingerprint` as seen. Returns `true` only on first sight.
    fn observe(&mut self, fingerprint: &str) -> bool;

    /// Number of distinct fingerprints observed so far.
    fn observed(&self) -> usize;
}

/// Keeps the set of behavior fingerprints seen during the run.
#[derive(Default, Debug)]
pub struct BehaviorFeedback {
    known_fingerprints: HashSet<String>,
}

impl BehaviorFeedback {
    pub fn new() -> Self {
        Self {
            known_fingerprints: HashSet::new(),
        }
    }
}

impl Feedback for BehaviorFeedback {
    fn name(&self) -> &'static str {
        "BehaviorFeedback"
    }

    fn is_interesting(&self, fingerprint: &str) -> bool {
        !fingerprint.is_empty() && !self.known_fingerprints.contains(fingerprint)
    }

    fn observe(&mut self, fingerprint: &str) -> bool {
        if fingerprint.is_empty() {
            return false;
        }
        self.known_fingerprints.insert(fingerprint.to_string())
    }

    fn observed(&self) -> usize {
        self.known_fingerprints.len()
    }
}
