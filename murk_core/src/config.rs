use crate::engine::FuzzerOptions;
use crate::executor::{CommandExecutorConfig, InputDelivery};
use crate::mutator::{AnyMutator, ByteMutator, DictionaryMutator};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    #[serde(rename = "stdin")]
    StdIn,
    File {
        template: String,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_target_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

fn default_target_timeout_ms() -> u64 {
    2000
}

impl TargetSettings {
    pub fn from_command(command: Vec<String>) -> Self {
        Self {
            command,
            input_delivery: ConfigInputDelivery::StdIn,
            timeout_ms: default_target_timeout_ms(),
            working_dir: None,
        }
    }

    pub fn executor_config(&self) -> CommandExecutorConfig {
        let input_delivery = match &self.input_delivery {
            ConfigInputDelivery::StdIn => InputDelivery::StdIn,
            ConfigInputDelivery::File { template } => InputDelivery::File(template.clone()),
        };
        CommandExecutorConfig {
            command: self.command.clone(),
            input_delivery,
            timeout: Duration::from_millis(self.timeout_ms),
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub max_iterations: u64,
    #[serde(default = "default_status_interval")]
    pub status_interval: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    pub seed: Option<u64>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

pub fn default_iterations() -> u64 {
    10_000
}
pub fn default_status_interval() -> u64 {
    100
}
pub fn default_workers() -> usize {
    1
}
fn default_timeout_ms() -> u64 {
    5000
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_iterations(),
            status_interval: default_status_interval(),
            workers: default_workers(),
            seed: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl From<&FuzzerSettings> for FuzzerOptions {
    fn from(settings: &FuzzerSettings) -> Self {
        FuzzerOptions {
            max_iterations: settings.max_iterations,
            status_interval: settings.status_interval,
            workers: settings.workers.max(1),
            seed: settings.seed,
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusSettings {
    #[serde(default = "default_seed_dir")]
    pub seed_dir: PathBuf,
    #[serde(default = "default_crash_dir")]
    pub crash_dir: PathBuf,
}

pub fn default_seed_dir() -> PathBuf {
    PathBuf::from("seeds")
}

pub fn default_crash_dir() -> PathBuf {
    PathBuf::from("crashes")
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            seed_dir: default_seed_dir(),
            crash_dir: default_crash_dir(),
        }
    }
}

/// A dictionary entry: a plain string, or an array of byte values for tokens
/// that are not valid UTF-8.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum DictionaryToken {
    Text(String),
    Bytes(Vec<u8>),
}

impl DictionaryToken {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            DictionaryToken::Text(text) => text.into_bytes(),
            DictionaryToken::Bytes(bytes) => bytes,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MutatorSettings {
    #[serde(default = "default_use_dictionary")]
    pub use_dictionary: bool,
    /// Replaces the built-in dictionary when set.
    pub dictionary: Option<Vec<DictionaryToken>>,
}

fn default_use_dictionary() -> bool {
    true
}

impl Default for MutatorSettings {
    fn default() -> Self {
        Self {
            use_dictionary: default_use_dictionary(),
            dictionary: None,
        }
    }
}

impl MutatorSettings {
    pub fn build(&self) -> AnyMutator {
        if !self.use_dictionary {
            return AnyMutator::Bytes(ByteMutator);
        }
        match &self.dictionary {
            Some(tokens) => AnyMutator::Dictionary(DictionaryMutator::with_tokens(
                tokens.iter().cloned().map(DictionaryToken::into_bytes).collect(),
            )),
            None => AnyMutator::Dictionary(DictionaryMutator::new()),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MurkConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub corpus: CorpusSettings,
    #[serde(default)]
    pub mutator: MutatorSettings,
    #[serde(default)]
    pub target: Option<TargetSettings>,
}

impl MurkConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn fuzzer_options(&self) -> FuzzerOptions {
        FuzzerOptions::from(&self.fuzzer)
    }
}
