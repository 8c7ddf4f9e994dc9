#![forbid(unsafe_code)]

//! # sense-harness
//!
//! Crowdsourced judgments of answer meaningfulness.
//!
//! Raters see a client question with one operator answer (or two answers to
//! compare) drawn from a pool mixing human agents, a generative bot, its
//! best-of-N selection, a retrieval bot and randomly corrupted controls. The
//! harness keeps that pool balanced across operator categories, gives every
//! rater an endless shuffled stream that covers the whole pool before
//! repeating, and records each verdict exactly once against the item the
//! rater actually saw.
//!
//! Pipeline: [`loader`] → [`rebalance`] → [`controls`] (or [`pairing`]) →
//! [`corpus`] (cached) → [`stream`] per session → [`session`] handle table →
//! [`recorder`]. [`desk`] is the transport-facing entry point.

pub mod cache;
pub mod config;
pub mod controls;
pub mod corpus;
pub mod desk;
pub mod loader;
pub mod pairing;
pub mod rebalance;
pub mod record;
pub mod recorder;
pub mod session;
pub mod stream;

pub use cache::{CacheError, SqliteCorpusCache};
pub use config::{Config, ConfigError, ItemMode};
pub use corpus::{prepare_corpus, Corpus, CorpusError};
pub use desk::{AnnotationDesk, DeskError, DeskOptions, InboundEvent, Reply};
pub use record::{AnnotationItem, ComparisonRecord, GroupKey, Operator, Verdict};
pub use recorder::{JudgmentRow, JudgmentSink, OutputColumn, TsvJudgmentRecorder, VecSink};
pub use session::{ItemHandle, RegistryOptions, Resolution, SessionRegistry};
pub use stream::SamplingStream;
