use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_core::RngCore;

/// Probability that `DictionaryMutator` splices a token instead of delegating
/// to the byte-level strategies.
pub const DICTIONARY_TOKEN_PROBABILITY: f64 = 0.3;

/// Upper bound (inclusive) on how many bytes a single insert or delete touches.
const MAX_CHUNK_LEN: usize = 10;

const INTERESTING_8: [u8; 5] = [0, 1, 127, 128, 255];
const INTERESTING_16: [u16; 5] = [0, 1, 32767, 32768, 65535];
const INTERESTING_32: [u32; 5] = [0, 1, 2147483647, 2147483648, 4294967295];

/// Built-in dictionary: quoting, null/high bytes, format strings, path traversal,
/// literals and oversized numbers.
pub const DEFAULT_DICTIONARY: &[&[u8]] = &[
    b"{{",
    b"}}",
    b"<script>",
    b"</script>",
    b"'",
    b"\"",
    b"\\",
    b"\x00",
    b"\xff",
    b"%s",
    b"%n",
    b"%x",
    b"../../../",
    b"null",
    b"undefined",
    b"-1",
    b"0",
    b"99999999",
];

/// A `Mutator` derives a new candidate from an existing one.
///
/// Mutators are total: they never fail and never panic, whatever the input length.
/// They hold no random state of their own; the caller injects the random stream,
/// which keeps a seeded run reproducible and lets every worker own its stream.
pub trait Mutator: Send + Sync {
    /// A short name used in log output.
    fn name(&self) -> &'static str;

    /// Produces a mutated copy of `input`. An empty input is returned unchanged.
    fn mutate(&self, input: &[u8], rng: &mut dyn RngCore) -> Vec<u8>;
}

/// The six byte-level mutation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStrategy {
    /// XOR one random bit of one random byte.
    BitFlip,
    /// Overwrite one random byte with a uniformly random byte.
    ByteFlip,
    /// Overwrite a random position with a little-endian boundary constant.
    InterestingValue,
    /// Remove a run of 1..=10 bytes.
    DeleteBytes,
    /// Splice 1..=10 random bytes at a random position, end included.
    InsertBytes,
    /// Exchange the bytes at two random positions.
    SwapBytes,
}

impl MutationStrategy {
    pub const ALL: [MutationStrategy; 6] = [
        MutationStrategy::BitFlip,
        MutationStrategy::ByteFlip,
        MutationStrategy::InterestingValue,
        MutationStrategy::DeleteBytes,
        MutationStrategy::InsertBytes,
        MutationStrategy::SwapBytes,
    ];

    /// Picks one strategy uniformly.
    pub fn pick(rng: &mut dyn RngCore) -> Self {
        Self::ALL[rng.random_range(0..Self::ALL.len())]
    }

    /// Applies this strategy to a copy of `input`.
    ///
    /// Inputs that are too short for the strategy come back unchanged: every
    /// strategy skips empty input, swap and delete skip single-byte input.
    pub fn apply(self, input: &[u8], rng: &mut dyn RngCore) -> Vec<u8> {
        let mut data = input.to_vec();
        if data.is_empty() {
            return data;
        }
        match self {
            MutationStrategy::BitFlip => {
                let pos = rng.random_range(0..data.len());
                let bit = rng.random_range(0..8u32);
                data[pos] ^= 1 << bit;
            }
            MutationStrategy::ByteFlip => {
                let pos = rng.random_range(0..data.len());
                data[pos] = rng.random::<u8>();
            }
            MutationStrategy::InterestingValue => {
                let pos = rng.random_range(0..data.len());
                match rng.random_range(0..3u8) {
                    0 => {
                        data[pos] = INTERESTING_8[rng.random_range(0..INTERESTING_8.len())];
                    }
                    1 => {
                        let value = INTERESTING_16[rng.random_range(0..INTERESTING_16.len())];
                        overwrite_in_place(&mut data, pos, &value.to_le_bytes());
                    }
                    _ => {
                        let value = INTERESTING_32[rng.random_range(0..INTERESTING_32.len())];
                        overwrite_in_place(&mut data, pos, &value.to_le_bytes());
                    }
                }
            }
            MutationStrategy::DeleteBytes => {
                if data.len() <= 1 {
                    return data;
                }
                let pos = rng.random_range(0..data.len());
                let run = rng.random_range(1..=MAX_CHUNK_LEN.min(data.len() - pos));
                data.drain(pos..pos + run);
            }
            MutationStrategy::InsertBytes => {
                let pos = rng.random_range(0..=data.len());
                let run = rng.random_range(1..=MAX_CHUNK_LEN);
                let mut fresh = vec![0u8; run];
                rng.fill_bytes(&mut fresh);
                data.splice(pos..pos, fresh);
            }
            MutationStrategy::SwapBytes => {
                if data.len() < 2 {
                    return data;
                }
                let a = rng.random_range(0..data.len());
                let b = rng.random_range(0..data.len());
                data.swap(a, b);
            }
        }
        data
    }
}

/// Writes `bytes` at `pos` only if they fit entirely; never grows the buffer.
fn overwrite_in_place(data: &mut [u8], pos: usize, bytes: &[u8]) {
    if pos + bytes.len() <= data.len() {
        data[pos..pos + bytes.len()].copy_from_slice(bytes);
    }
}

/// Picks one of the six `MutationStrategy` variants uniformly for every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteMutator;

impl Mutator for ByteMutator {
    fn name(&self) -> &'static str {
        "ByteMutator"
    }

    fn mutate(&self, input: &[u8], rng: &mut dyn RngCore) -> Vec<u8> {
        if input.is_empty() {
            return Vec::new();
        }
        MutationStrategy::pick(rng).apply(input, rng)
    }
}

/// Extends `ByteMutator` with verbatim token insertion.
///
/// With probability [`DICTIONARY_TOKEN_PROBABILITY`] a token drawn uniformly from
/// the dictionary is spliced at a random position (end included); otherwise the
/// call is delegated to `ByteMutator`.
#[derive(Debug, Clone)]
pub struct DictionaryMutator {
    tokens: Vec<Vec<u8>>,
    base: ByteMutator,
}

impl DictionaryMutator {
    /// Creates a mutator using [`DEFAULT_DICTIONARY`].
    pub fn new() -> Self {
        Self::with_tokens(DEFAULT_DICTIONARY.iter().map(|t| t.to_vec()).collect())
    }

    /// Creates a mutator with a caller-supplied dictionary.
    ///
    /// Empty tokens are dropped. If nothing is left, the default dictionary is used.
    pub fn with_tokens(tokens: Vec<Vec<u8>>) -> Self {
        let tokens: Vec<Vec<u8>> = tokens.into_iter().filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return Self::new();
        }
        Self {
            tokens,
            base: ByteMutator,
        }
    }

    pub fn tokens(&self) -> &[Vec<u8>] {
        &self.tokens
    }

    fn splice_token(&self, input: &[u8], rng: &mut dyn RngCore) -> Vec<u8> {
        let token = &self.tokens[rng.random_range(0..self.tokens.len())];
        let pos = rng.random_range(0..=input.len());
        let mut data = Vec::with_capacity(input.len() + token.len());
        data.extend_from_slice(&input[..pos]);
        data.extend_from_slice(token);
        data.extend_from_slice(&input[pos..]);
        data
    }
}

impl Default for DictionaryMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutator for DictionaryMutator {
    fn name(&self) -> &'static str {
        "DictionaryMutator"
    }

    fn mutate(&self, input: &[u8], rng: &mut dyn RngCore) -> Vec<u8> {
        if input.is_empty() {
            return Vec::new();
        }
        if rng.random_bool(DICTIONARY_TOKEN_PROBABILITY) {
            self.splice_token(input, rng)
        } else {
            self.base.mutate(input, rng)
        }
    }
}

/// The mutator variants selectable from configuration.
#[derive(Debug, Clone)]
pub enum AnyMutator {
    Bytes(ByteMutator),
    Dictionary(DictionaryMutator),
}

impl Mutator for AnyMutator {
    fn name(&self) -> &'static str {
        match self {
            AnyMutator::Bytes(m) => m.name(),
            AnyMutator::Dictionary(m) => m.name(),
        }
    }

    fn mutate(&self, input: &[u8], rng: &mut dyn RngCore) -> Vec<u8> {
        match self {
            AnyMutator::Bytes(m) => m.mutate(input, rng),
            AnyMutator::Dictionary(m) => m.mutate(input, rng),
        }
    }
}

/// Builds the random stream used by mutators and workers.
///
/// With a seed the stream is fully reproducible; without one it is seeded from
/// the thread-local generator.
pub fn rng_from_seed(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

/// A mutator bundled with its own random stream, for replaying a crash outside
/// the engine: two instances built with the same seed produce the same sequence
/// of outputs for the same sequence of calls.
#[derive(Debug, Clone)]
pub struct SeededMutator<M> {
    mutator: M,
    rng: ChaCha8Rng,
}

impl<M: Mutator> SeededMutator<M> {
    pub fn new(mutator: M, seed: Option<u64>) -> Self {
        Self {
            mutator,
            rng: rng_from_seed(seed),
        }
    }

    pub fn mutate(&mut self, input: &[u8]) -> Vec<u8> {
        self.mutator.mutate(input, &mut self.rng)
    }
}
