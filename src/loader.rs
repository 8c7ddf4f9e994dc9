//! Record loader for the upstream comparison export.
//!
//! Each row carries a category code, a discriminator score and a text blob
//! holding a tagged segment sequence:
//!
//! ```text
//! <COR_START> client turn <ANS_START> operator turn <COR_START> ... <ANS_START> answer
//! ```
//!
//! The final `<ANS_START>` segment is the answer under judgment and the
//! segment right before it must be the client question. Rows whose previous
//! segment is a manual hand-off (`<MAN_START>`) or a pause are not scorable
//! turns and are skipped. Malformed rows are dropped with a warning; one bad
//! row never aborts a load.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::record::{ComparisonRecord, Operator};

pub const TAG_QUESTION: &str = "COR_START";
pub const TAG_MANUAL: &str = "MAN_START";
pub const TAG_PAUSE: &str = "PAUSE";
pub const TAG_ANSWER: &str = "ANS_START";

const ANSWER_MARKER: &str = " <ANS_START> ";

static SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([A-Z_]+)> ([^<>]*)").expect("Invalid segment regex"));

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a single row was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    #[error("row has {found} columns, need at least {needed}")]
    MissingColumn { found: usize, needed: usize },
    #[error("text has {0} tagged segments, need at least 2")]
    TooFewSegments(usize),
    #[error("last segment is <{0}>, expected <ANS_START>")]
    MissingAnswer(String),
    #[error("segment before the answer is <{0}>, expected <COR_START>")]
    UnexpectedSegment(String),
    #[error("unparseable discriminator score {0:?}")]
    BadScore(String),
    #[error("unknown category code {0:?}")]
    UnknownCategory(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub tag: &'a str,
    pub content: &'a str,
}

/// Split a text blob into its tagged segments, in order.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    SEGMENT
        .captures_iter(text)
        .filter_map(|caps| {
            let tag = caps.get(1)?.as_str();
            let content = caps.get(2)?.as_str().trim();
            Some(Segment { tag, content })
        })
        .collect()
}

/// Question/answer turn extracted from a text blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn<'a> {
    Scorable {
        context: &'a str,
        question: &'a str,
        answer: &'a str,
    },
    /// The answer follows a manual intervention or a pause.
    HandOff,
}

pub fn extract_turn(text: &str) -> Result<Turn<'_>, RowError> {
    let segs = segments(text);
    if segs.len() < 2 {
        return Err(RowError::TooFewSegments(segs.len()));
    }
    let answer = segs[segs.len() - 1];
    let previous = segs[segs.len() - 2];
    if answer.tag != TAG_ANSWER {
        return Err(RowError::MissingAnswer(answer.tag.to_string()));
    }
    match previous.tag {
        TAG_MANUAL | TAG_PAUSE => Ok(Turn::HandOff),
        TAG_QUESTION => {
            let context = text.split(ANSWER_MARKER).next().unwrap_or(text).trim();
            Ok(Turn::Scorable {
                context,
                question: previous.content,
                answer: answer.content,
            })
        }
        other => Err(RowError::UnexpectedSegment(other.to_string())),
    }
}

/// Outcome counters for one load.
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub records: Vec<ComparisonRecord>,
    pub handoffs: usize,
    pub denylisted: usize,
    pub filtered: usize,
    pub malformed: usize,
    /// Starting line of each dropped row, where the reader reported one.
    pub malformed_lines: Vec<u64>,
}

impl LoadReport {
    pub(crate) fn log_summary(&self, path: &Path) {
        info!(
            path = %path.display(),
            retained = self.retained(),
            handoffs = self.handoffs,
            denylisted = self.denylisted,
            filtered = self.filtered,
            malformed = self.malformed,
            "loaded comparison records"
        );
    }

    fn drop_malformed(&mut self, line: Option<u64>) {
        self.malformed += 1;
        self.malformed_lines.extend(line);
    }

    pub fn retained(&self) -> usize {
        self.records.len()
    }
}

enum RowOutcome {
    Keep {
        context: String,
        question: String,
        answer: String,
        operator: Operator,
        discriminator: f64,
    },
    HandOff,
    Denylisted,
    Filtered,
}

pub struct RecordLoader<'a> {
    config: &'a LoaderConfig,
    denylist: Vec<Vec<String>>,
}

impl<'a> RecordLoader<'a> {
    pub fn new(config: &'a LoaderConfig) -> Self {
        let denylist = config
            .denylist
            .iter()
            .map(|template| template.iter().map(|f| f.to_lowercase()).collect())
            .collect();
        Self { config, denylist }
    }

    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<LoadReport, LoadError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let report = self.load_reader(file)?;
        report.log_summary(path);
        Ok(report)
    }

    pub fn load_reader<R: Read>(&self, reader: R) -> Result<LoadReport, LoadError> {
        let mut table = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut report = LoadReport::default();
        for row in table.records() {
            let row = match row {
                Ok(row) => row,
                Err(err) if err.is_io_error() => return Err(err.into()),
                Err(err) => {
                    let line = err.position().map(|p| p.line());
                    warn!(line, error = %err, "dropping unreadable row");
                    report.drop_malformed(line);
                    continue;
                }
            };
            match self.parse_row(&row) {
                Ok(RowOutcome::Keep {
                    context,
                    question,
                    answer,
                    operator,
                    discriminator,
                }) => {
                    let id = report.records.len() as u64;
                    report.records.push(ComparisonRecord {
                        id,
                        context,
                        question,
                        answer,
                        operator,
                        discriminator: Some(discriminator),
                    });
                }
                Ok(RowOutcome::HandOff) => report.handoffs += 1,
                Ok(RowOutcome::Denylisted) => report.denylisted += 1,
                Ok(RowOutcome::Filtered) => report.filtered += 1,
                Err(err) => {
                    let line = row.position().map(|p| p.line());
                    warn!(line, error = %err, "dropping malformed row");
                    report.drop_malformed(line);
                }
            }
        }
        Ok(report)
    }

    fn parse_row(&self, row: &csv::StringRecord) -> Result<RowOutcome, RowError> {
        let cols = self.config.columns;
        if row.len() <= cols.max_index() {
            return Err(RowError::MissingColumn {
                found: row.len(),
                needed: cols.max_index() + 1,
            });
        }
        let text = &row[cols.text];
        let code = row[cols.category].trim();
        let raw_score = row[cols.discriminator].trim();

        let (context, question, answer) = match extract_turn(text)? {
            Turn::HandOff => return Ok(RowOutcome::HandOff),
            Turn::Scorable {
                context,
                question,
                answer,
            } => (context, question, answer),
        };

        if self.is_denylisted(answer) {
            debug!(answer, "skipping boilerplate answer");
            return Ok(RowOutcome::Denylisted);
        }

        let operator = *self
            .config
            .categories
            .get(code)
            .ok_or_else(|| RowError::UnknownCategory(code.to_string()))?;
        let discriminator = raw_score
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| RowError::BadScore(raw_score.to_string()))?;

        if self.config.skip_operators.contains(&operator) {
            return Ok(RowOutcome::Filtered);
        }
        if operator == Operator::BotRetr {
            if let Some(min) = self.config.min_retrieval_score {
                if discriminator < min {
                    return Ok(RowOutcome::Filtered);
                }
            }
        }

        Ok(RowOutcome::Keep {
            context: context.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            operator,
            discriminator,
        })
    }

    fn is_denylisted(&self, answer: &str) -> bool {
        if self.denylist.is_empty() {
            return false;
        }
        let lowered = answer.to_lowercase();
        self.denylist
            .iter()
            .any(|template| template.iter().all(|fragment| lowered.contains(fragment.as_str())))
    }
}

/// Load an export file with the given settings.
pub fn load(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<LoadReport, LoadError> {
    RecordLoader::new(config).load_path(path)
}
