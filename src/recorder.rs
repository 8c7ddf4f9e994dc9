//! Durable judgment output.
//!
//! One tab-separated row per judgment, appended and flushed immediately. The
//! header row is written only when the destination is missing or empty, so
//! restarting against an existing file keeps appending under the original
//! header.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::config::ItemMode;
use crate::record::{AnnotationItem, Verdict};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to open output {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// A column a deployment may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputColumn {
    ChatId,
    User,
    QuestionId,
    Operator,
    Question,
    Answer,
    Context,
    Discriminator,
    BestAnswer,
    RandomAnswer,
    BestDiscriminator,
    RandomDiscriminator,
    IsMeaningful,
    Result,
    TimeAsked,
    TimeAnswered,
}

impl OutputColumn {
    pub fn header(self) -> &'static str {
        match self {
            Self::ChatId => "chat_id",
            Self::User => "user",
            Self::QuestionId => "question_id",
            Self::Operator => "operator",
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Context => "context",
            Self::Discriminator => "discriminator",
            Self::BestAnswer => "best_answer",
            Self::RandomAnswer => "random_answer",
            Self::BestDiscriminator => "best_discriminator",
            Self::RandomDiscriminator => "random_discriminator",
            Self::IsMeaningful => "is_meaningful",
            Self::Result => "result",
            Self::TimeAsked => "time_asked",
            Self::TimeAnswered => "time_answered",
        }
    }
}

pub fn default_columns(mode: ItemMode) -> Vec<OutputColumn> {
    use OutputColumn::*;
    match mode {
        ItemMode::Single => vec![
            ChatId,
            User,
            IsMeaningful,
            Operator,
            Question,
            Answer,
            Context,
            Discriminator,
            TimeAsked,
            TimeAnswered,
        ],
        ItemMode::Pair => vec![
            ChatId,
            User,
            Result,
            Question,
            BestAnswer,
            RandomAnswer,
            Context,
            BestDiscriminator,
            RandomDiscriminator,
            TimeAsked,
            TimeAnswered,
        ],
    }
}

/// One recorded judgment with a snapshot of what was shown.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgmentRow {
    pub chat_id: String,
    pub user: String,
    pub item: AnnotationItem,
    pub verdict: Verdict,
    pub time_asked: DateTime<Utc>,
    pub time_answered: DateTime<Utc>,
}

fn format_score(score: Option<f64>) -> String {
    score.map(|v| v.to_string()).unwrap_or_default()
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl JudgmentRow {
    /// Cell value for a column. Columns that do not apply to the item kind
    /// are empty.
    pub fn field(&self, column: OutputColumn) -> String {
        let primary = self.item.primary();
        let (best, other) = match &self.item {
            AnnotationItem::Pair { best, other } => (Some(best), Some(other)),
            AnnotationItem::Single { .. } => (None, None),
        };
        let single = match &self.item {
            AnnotationItem::Single { record } => Some(record),
            AnnotationItem::Pair { .. } => None,
        };
        match column {
            OutputColumn::ChatId => self.chat_id.clone(),
            OutputColumn::User => self.user.clone(),
            OutputColumn::QuestionId => primary.id.to_string(),
            OutputColumn::Operator => primary.operator.as_str().to_string(),
            OutputColumn::Question => primary.question.clone(),
            OutputColumn::Answer => single.map(|r| r.answer.clone()).unwrap_or_default(),
            OutputColumn::Context => primary.context.clone(),
            OutputColumn::Discriminator => format_score(single.and_then(|r| r.discriminator)),
            OutputColumn::BestAnswer => best.map(|r| r.answer.clone()).unwrap_or_default(),
            OutputColumn::RandomAnswer => other.map(|r| r.answer.clone()).unwrap_or_default(),
            OutputColumn::BestDiscriminator => format_score(best.and_then(|r| r.discriminator)),
            OutputColumn::RandomDiscriminator => {
                format_score(other.and_then(|r| r.discriminator))
            }
            OutputColumn::IsMeaningful | OutputColumn::Result => self.verdict.as_str().to_string(),
            OutputColumn::TimeAsked => format_time(self.time_asked),
            OutputColumn::TimeAnswered => format_time(self.time_answered),
        }
    }
}

pub trait JudgmentSink {
    fn record(&mut self, row: &JudgmentRow) -> Result<(), RecorderError>;
}

/// Keeps rows in memory; for dry runs and tests.
#[derive(Debug, Default)]
pub struct VecSink {
    pub rows: Vec<JudgmentRow>,
}

impl JudgmentSink for VecSink {
    fn record(&mut self, row: &JudgmentRow) -> Result<(), RecorderError> {
        self.rows.push(row.clone());
        Ok(())
    }
}

pub struct TsvJudgmentRecorder {
    path: PathBuf,
    columns: Vec<OutputColumn>,
    writer: csv::Writer<File>,
}

impl TsvJudgmentRecorder {
    /// Open for appending, creating parent directories and writing the header
    /// if the file is new or empty.
    pub fn open(path: impl AsRef<Path>, columns: Vec<OutputColumn>) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RecorderError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let needs_header = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(source) => return Err(RecorderError::Open { path, source }),
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RecorderError::Open {
                path: path.clone(),
                source,
            })?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(columns.iter().map(|c| c.header()))?;
            writer.flush()?;
        }
        Ok(Self {
            path,
            columns,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[OutputColumn] {
        &self.columns
    }
}

impl JudgmentSink for TsvJudgmentRecorder {
    fn record(&mut self, row: &JudgmentRow) -> Result<(), RecorderError> {
        let fields: Vec<String> = self.columns.iter().map(|&c| row.field(c)).collect();
        self.writer.write_record(&fields)?;
        self.writer.flush()?;
        Ok(())
    }
}
