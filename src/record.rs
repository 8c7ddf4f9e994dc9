//! Core data model: comparison records, annotation items and verdicts.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Operator categories
// =============================================================================

/// Which process produced an answer. Determines the statistical bucket a
/// record is balanced and analysed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    /// Live support agent.
    #[serde(rename = "human")]
    Human,
    /// Generative bot, first (unselected) candidate.
    #[serde(rename = "bot")]
    Bot,
    /// Highest-discriminator bot candidate of its group.
    #[serde(rename = "botbest")]
    BotBest,
    /// Retrieval-based bot.
    #[serde(rename = "botretr")]
    BotRetr,
    /// Negative control: answer swapped for an unrelated one.
    #[serde(rename = "random")]
    Random,
}

impl Operator {
    pub const ALL: [Operator; 5] = [
        Operator::Human,
        Operator::Bot,
        Operator::BotBest,
        Operator::Random,
        Operator::BotRetr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Bot => "bot",
            Self::BotBest => "botbest",
            Self::BotRetr => "botretr",
            Self::Random => "random",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "bot" => Some(Self::Bot),
            "botbest" => Some(Self::BotBest),
            "botretr" => Some(Self::BotRetr),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field used to tie comparable answers together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    /// Preceding conversation text.
    #[default]
    Context,
    /// Final client question only.
    Question,
}

// =============================================================================
// Records and items
// =============================================================================

/// The atomic unit of annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    /// Zero-based index over retained upstream rows.
    pub id: u64,
    /// Grouping text (conversation preceding the answer).
    pub context: String,
    /// Client question shown to the rater.
    pub question: String,
    /// Operator answer shown to the rater.
    pub answer: String,
    pub operator: Operator,
    /// Upstream quality score; absent for random controls.
    pub discriminator: Option<f64>,
}

impl ComparisonRecord {
    pub fn group_key(&self, key: GroupKey) -> &str {
        match key {
            GroupKey::Context => &self.context,
            GroupKey::Question => &self.question,
        }
    }

    /// Score used for best/worst selection; missing scores sort lowest.
    pub fn score(&self) -> f64 {
        self.discriminator.unwrap_or(f64::NEG_INFINITY)
    }

    pub fn with_operator(&self, operator: Operator) -> Self {
        Self {
            operator,
            ..self.clone()
        }
    }
}

/// A unit served to a rater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnnotationItem {
    /// Meaningfulness judgment over one answer.
    Single { record: ComparisonRecord },
    /// Preference judgment between the best candidate and another one.
    Pair {
        best: ComparisonRecord,
        other: ComparisonRecord,
    },
}

impl AnnotationItem {
    pub fn single(record: ComparisonRecord) -> Self {
        Self::Single { record }
    }

    /// Record whose id and question identify the item.
    pub fn primary(&self) -> &ComparisonRecord {
        match self {
            Self::Single { record } => record,
            Self::Pair { best, .. } => best,
        }
    }

    pub fn id(&self) -> u64 {
        self.primary().id
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Self::Pair { .. })
    }

    pub fn operator(&self) -> Operator {
        self.primary().operator
    }
}

// =============================================================================
// Pair presentation and verdicts
// =============================================================================

/// Which side of a pair a rater preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairSide {
    Best,
    Random,
}

/// Presentation order of a pair, drawn per serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairOrder {
    BestFirst,
    RandomFirst,
}

impl PairOrder {
    /// Side shown under the `a` label.
    pub fn side_a(self) -> PairSide {
        match self {
            Self::BestFirst => PairSide::Best,
            Self::RandomFirst => PairSide::Random,
        }
    }

    pub fn side_b(self) -> PairSide {
        match self {
            Self::BestFirst => PairSide::Random,
            Self::RandomFirst => PairSide::Best,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Meaningful,
    NotMeaningful,
    Preferred(PairSide),
    NoDifference,
}

impl Verdict {
    /// Value written to the judgment file.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meaningful => "1",
            Self::NotMeaningful => "0",
            Self::Preferred(PairSide::Best) => "best",
            Self::Preferred(PairSide::Random) => "random",
            Self::NoDifference => "equal",
        }
    }

    /// Resolve a raw action value against the item it answers.
    ///
    /// Single items accept `1`/`0`; pairs accept `a`/`b`/`equal`, with the
    /// letters mapped through the presentation order.
    pub fn resolve(item: &AnnotationItem, order: Option<PairOrder>, raw: &str) -> Option<Self> {
        match (item, order) {
            (AnnotationItem::Single { .. }, _) => match raw {
                "1" => Some(Self::Meaningful),
                "0" => Some(Self::NotMeaningful),
                _ => None,
            },
            (AnnotationItem::Pair { .. }, Some(order)) => match raw {
                "a" => Some(Self::Preferred(order.side_a())),
                "b" => Some(Self::Preferred(order.side_b())),
                "equal" => Some(Self::NoDifference),
                _ => None,
            },
            (AnnotationItem::Pair { .. }, None) => None,
        }
    }
}
