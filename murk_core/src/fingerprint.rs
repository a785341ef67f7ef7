//! Behavior fingerprints derived from what a target visibly returns.
//!
//! Nothing here is real coverage. A fingerprint is a cheap proxy for "which
//! path did the target probably take", built only from observable output.
//! Two genuinely different paths can share a fingerprint and a cosmetic
//! difference in output can split one path in two; both are accepted.

/// Size of the body-length buckets used by [`ResponseFingerprinter`].
pub const RESPONSE_SIZE_BUCKET: usize = 100;

/// Markers whose presence in a response body is folded into its fingerprint.
pub const DEFAULT_ERROR_MARKERS: &[&str] = &[
    "error",
    "exception",
    "traceback",
    "stack trace",
    "undefined",
    "null",
];

/// What a target visibly produced for one candidate.
#[derive(Debug, Clone, Copy)]
pub struct Response<'a> {
    /// Status as the adapter understands it: an HTTP code, an exit code, ...
    pub status: i64,
    pub body: &'a [u8],
}

/// Turns an observed response into an opaque behavior fingerprint.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, response: &Response<'_>) -> String;
}

/// `<status>_<body length / 100>_<marker flags>`, one `0`/`1` flag per marker
/// matched case-insensitively against the body.
#[derive(Debug, Clone)]
pub struct ResponseFingerprinter {
    markers: Vec<Vec<u8>>,
}

impl ResponseFingerprinter {
    pub fn new() -> Self {
        Self::with_markers(DEFAULT_ERROR_MARKERS.iter().map(|m| m.to_string()))
    }

    pub fn with_markers(markers: impl IntoIterator<Item = String>) -> Self {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.to_ascii_lowercase().into_bytes())
                .collect(),
        }
    }
}

impl Default for ResponseFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprinter for ResponseFingerprinter {
    fn fingerprint(&self, response: &Response<'_>) -> String {
        let lowered = response.body.to_ascii_lowercase();
        let flags: String = self
            .markers
            .iter()
            .map(|marker| {
                if contains(&lowered, marker) {
                    '1'
                } else {
                    '0'
                }
            })
            .collect();
        format!(
            "{}_{}_{}",
            response.status,
            response.body.len() / RESPONSE_SIZE_BUCKET,
            flags
        )
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Buckets by body length alone: `len / width`. Handy for stub targets whose
/// only interesting dimension is size.
#[derive(Debug, Clone, Copy)]
pub struct LengthBucketFingerprinter {
    width: usize,
}

impl LengthBucketFingerprinter {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }
}

impl Default for LengthBucketFingerprinter {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Fingerprinter for LengthBucketFingerprinter {
    fn fingerprint(&self, response: &Response<'_>) -> String {
        (response.body.len() / self.width).to_string()
    }
}
