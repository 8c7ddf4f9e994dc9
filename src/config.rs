//! Process-level configuration, loaded once at startup from TOML.
//!
//! Every field has a default so an empty file (or no file) yields a working
//! single-mode deployment reading `downloads/export.csv`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::record::{GroupKey, Operator};
use crate::recorder::{default_columns, OutputColumn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {message}")]
    Validation { message: String },
}

/// What a rater is asked to judge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemMode {
    /// Is this answer meaningful?
    #[default]
    Single,
    /// Which of two answers is better?
    Pair,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: ItemMode,
    /// Seed for every random draw; entropy when absent.
    pub rng_seed: Option<u64>,
    pub source: SourceConfig,
    pub loader: LoaderConfig,
    pub rebalance: RebalanceConfig,
    pub controls: ControlsConfig,
    pub output: OutputConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub group_by: GroupKey,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("downloads/export.csv"),
            group_by: GroupKey::Context,
        }
    }
}

/// Zero-based column positions in the upstream export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub text: usize,
    pub category: usize,
    pub discriminator: usize,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            text: 0,
            category: 1,
            discriminator: 2,
        }
    }
}

impl ColumnMap {
    pub fn max_index(&self) -> usize {
        self.text.max(self.category).max(self.discriminator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub columns: ColumnMap,
    /// Upstream category code -> operator.
    pub categories: BTreeMap<String, Operator>,
    /// Boilerplate templates; an answer containing every fragment of one
    /// template (case-insensitive) is dropped.
    pub denylist: Vec<Vec<String>>,
    /// Operators whose rows are ignored entirely.
    pub skip_operators: Vec<Operator>,
    /// Retrieval answers scoring below this are ignored.
    pub min_retrieval_score: Option<f64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let categories = [
            ("0".to_string(), Operator::Bot),
            ("1".to_string(), Operator::Human),
            ("2".to_string(), Operator::BotRetr),
        ]
        .into_iter()
        .collect();
        Self {
            columns: ColumnMap::default(),
            categories,
            denylist: vec![vec![
                "здравствуйте".to_string(),
                "cлужба технической поддержки".to_string(),
            ]],
            skip_operators: Vec::new(),
            min_retrieval_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Interleave order for category balancing.
    pub operators: Vec<Operator>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            operators: Operator::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub enabled: bool,
    pub corruption_rate: f64,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            corruption_rate: 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Judgment file; `{timestamp}` expands to the startup time.
    pub path: String,
    /// Column layout; defaults depend on the item mode.
    pub columns: Option<Vec<OutputColumn>>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: "target/judgments_{timestamp}.tsv".to_string(),
            columns: None,
        }
    }
}

impl OutputConfig {
    pub fn resolved_path(&self, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.format("%Y%m%dT%H%M%S").to_string();
        PathBuf::from(self.path.replace("{timestamp}", &stamp))
    }

    pub fn resolved_columns(&self, mode: ItemMode) -> Vec<OutputColumn> {
        self.columns.clone().unwrap_or_else(|| default_columns(mode))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: crate::cache::SqliteCorpusCache::default_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Outstanding handles kept per session before the oldest is evicted.
    pub handle_retention: usize,
    /// Emit a progress status every N served items.
    pub progress_every: u64,
    pub greeting: Option<String>,
    /// Replace digit runs with `<NUM>` in rendered text.
    pub mask_digits: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handle_retention: 64,
            progress_every: 10,
            greeting: Some(DEFAULT_GREETING.to_string()),
            mask_digits: false,
        }
    }
}

pub const DEFAULT_GREETING: &str = "Hello! You will be shown fragments of a chat between a \
bank support operator and a client. Please rate whether the operator's answer to the \
client's question is meaningful: does the operator understand the request and try to help?\n\n\
Every 10 fragments the system will report how many answers you have rated.";

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = parse(&raw).map_err(|err| match err {
        ConfigError::ParseConfig { source, .. } => ConfigError::ParseConfig {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    Ok(cfg)
}

pub fn parse(raw: &str) -> Result<Config, ConfigError> {
    let cfg: Config = toml::from_str(raw).map_err(|source| ConfigError::ParseConfig {
        path: PathBuf::new(),
        source,
    })?;
    validate(&cfg)?;
    Ok(cfg)
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let rate = cfg.controls.corruption_rate;
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        return Err(invalid("controls.corruption_rate must be within [0, 1]."));
    }

    let cols = cfg.loader.columns;
    if cols.text == cols.category || cols.text == cols.discriminator || cols.category == cols.discriminator
    {
        return Err(invalid("loader.columns must name three distinct columns."));
    }
    if cfg.loader.categories.is_empty() {
        return Err(invalid("loader.categories must map at least one code."));
    }
    if cfg
        .loader
        .categories
        .values()
        .any(|op| matches!(op, Operator::BotBest | Operator::Random))
    {
        return Err(invalid(
            "loader.categories may not produce derived operators (botbest, random).",
        ));
    }
    if cfg
        .loader
        .denylist
        .iter()
        .any(|template| template.is_empty() || template.iter().any(|f| f.trim().is_empty()))
    {
        return Err(invalid("loader.denylist templates must have non-empty fragments."));
    }
    if let Some(min) = cfg.loader.min_retrieval_score {
        if !min.is_finite() {
            return Err(invalid("loader.min_retrieval_score must be a finite number."));
        }
    }

    if cfg.rebalance.operators.is_empty() {
        return Err(invalid("rebalance.operators must be non-empty."));
    }

    if let Some(columns) = &cfg.output.columns {
        if columns.is_empty() {
            return Err(invalid("output.columns must be non-empty when set."));
        }
    }
    if cfg.output.path.trim().is_empty() {
        return Err(invalid("output.path must be non-empty."));
    }

    if cfg.session.handle_retention == 0 {
        return Err(invalid("session.handle_retention must be greater than zero."));
    }
    if cfg.session.progress_every == 0 {
        return Err(invalid("session.progress_every must be greater than zero."));
    }

    Ok(())
}
