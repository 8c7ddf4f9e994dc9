//! Startup pipeline: load → rebalance → inject controls (or build pairs),
//! producing the finalized item collection every session samples from.
//!
//! The output is frozen in the corpus cache *after* control injection, so a
//! restart against the same source and settings serves exactly the same
//! items, controls included.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{hash_fields, CacheError, SqliteCorpusCache};
use crate::config::{
    Config, ControlsConfig, ItemMode, LoaderConfig, RebalanceConfig, SourceConfig,
};
use crate::controls::{inject_controls, ControlError};
use crate::loader::{LoadError, RecordLoader};
use crate::pairing::build_pairs;
use crate::rebalance::rebalance;
use crate::record::{AnnotationItem, ComparisonRecord, Operator};

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("failed to load {path}: {source}")]
    Load {
        path: std::path::PathBuf,
        source: LoadError,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("control injection failed: {0}")]
    Controls(#[from] ControlError),
    #[error("finalized collection is empty: every group was filtered out")]
    Empty,
}

/// The finalized, read-only item collection.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub items: Arc<[AnnotationItem]>,
    pub fingerprint: String,
    pub from_cache: bool,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn operator_counts(&self) -> BTreeMap<Operator, usize> {
        operator_counts(&self.items)
    }
}

/// Counts by operator; pairs count their best side.
pub fn operator_counts(items: &[AnnotationItem]) -> BTreeMap<Operator, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(item.operator()).or_insert(0) += 1;
    }
    counts
}

/// Every setting that changes what the pipeline derives.
#[derive(Serialize)]
struct DerivationKey<'a> {
    mode: ItemMode,
    rng_seed: Option<u64>,
    source: &'a SourceConfig,
    loader: &'a LoaderConfig,
    rebalance: &'a RebalanceConfig,
    controls: &'a ControlsConfig,
}

pub fn fingerprint(source: &[u8], cfg: &Config) -> Result<String, CacheError> {
    let key = serde_json::to_vec(&DerivationKey {
        mode: cfg.mode,
        rng_seed: cfg.rng_seed,
        source: &cfg.source,
        loader: &cfg.loader,
        rebalance: &cfg.rebalance,
        controls: &cfg.controls,
    })?;
    Ok(hash_fields(&[source, key.as_slice()]))
}

fn pipeline_rng(cfg: &Config) -> StdRng {
    match cfg.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Turn loaded records into the finalized collection.
pub fn derive_items(
    records: &[ComparisonRecord],
    cfg: &Config,
    rng: &mut StdRng,
) -> Result<Vec<AnnotationItem>, CorpusError> {
    let items = match cfg.mode {
        ItemMode::Single => {
            let balanced = rebalance(
                records,
                cfg.source.group_by,
                &cfg.rebalance.operators,
                rng,
            );
            let finalized = if cfg.controls.enabled {
                inject_controls(balanced, cfg.controls.corruption_rate, rng)?
            } else {
                balanced
            };
            finalized.into_iter().map(AnnotationItem::single).collect()
        }
        ItemMode::Pair => build_pairs(records, cfg.source.group_by, rng),
    };
    if items.is_empty() {
        return Err(CorpusError::Empty);
    }
    Ok(items)
}

fn derive_from_source(source: &[u8], cfg: &Config) -> Result<Vec<AnnotationItem>, CorpusError> {
    let report = RecordLoader::new(&cfg.loader)
        .load_reader(source)
        .map_err(|source| CorpusError::Load {
            path: cfg.source.path.clone(),
            source,
        })?;
    report.log_summary(&cfg.source.path);
    let mut rng = pipeline_rng(cfg);
    derive_items(&report.records, cfg, &mut rng)
}

fn log_summary(corpus: &Corpus) {
    for (operator, count) in corpus.operator_counts() {
        info!(operator = %operator, count, "corpus category");
    }
    info!(
        items = corpus.len(),
        from_cache = corpus.from_cache,
        fingerprint = %corpus.fingerprint,
        "finalized item collection ready"
    );
}

/// Build the collection, consulting the cache unless disabled or `rebuild`
/// is set. A rebuilt collection replaces any cached one.
pub fn prepare_corpus(cfg: &Config, rebuild: bool) -> Result<Corpus, CorpusError> {
    let source = std::fs::read(&cfg.source.path).map_err(|source| CorpusError::Read {
        path: cfg.source.path.clone(),
        source,
    })?;
    let fingerprint = fingerprint(&source, cfg)?;

    if !cfg.cache.enabled {
        let corpus = Corpus {
            items: derive_from_source(&source, cfg)?.into(),
            fingerprint,
            from_cache: false,
        };
        log_summary(&corpus);
        return Ok(corpus);
    }

    let cache = SqliteCorpusCache::new(&cfg.cache.path)?;
    let _lock = cache.lock_exclusive()?;
    if !rebuild {
        match cache.get(&fingerprint) {
            Ok(Some(items)) => {
                if items.is_empty() {
                    return Err(CorpusError::Empty);
                }
                let corpus = Corpus {
                    items: items.into(),
                    fingerprint,
                    from_cache: true,
                };
                log_summary(&corpus);
                return Ok(corpus);
            }
            Ok(None) => {}
            Err(CacheError::Serde(err)) => {
                warn!(fingerprint = %fingerprint, error = %err, "cached collection unreadable; rebuilding");
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(path = %cache.path().display(), "deriving item collection");
    let items = derive_from_source(&source, cfg)?;
    cache.put(&fingerprint, cfg.mode, &items)?;
    let corpus = Corpus {
        items: items.into(),
        fingerprint,
        from_cache: false,
    };
    log_summary(&corpus);
    Ok(corpus)
}
