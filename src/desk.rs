//! Transport-facing dispatcher.
//!
//! Receives `start` and `judgment` signals, one at a time, and answers with
//! status texts and rendered items. Chat-platform specifics stay outside:
//! a transport only has to move [`InboundEvent`]s in and [`Reply`]s out.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::{AnnotationItem, PairOrder};
use crate::recorder::{JudgmentRow, JudgmentSink, RecorderError};
use crate::session::{Resolution, ServedItem, SessionRegistry};
use crate::stream::StreamError;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("Invalid digit regex"));

#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    #[error("failed to record judgment: {0}")]
    Record(#[from] RecorderError),
    #[error("session stream unavailable: {0}")]
    Stream(#[from] StreamError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Start {
        session_id: String,
    },
    Judgment {
        session_id: String,
        /// Display identity of the rater.
        #[serde(default)]
        user: String,
        handle: String,
        verdict: String,
    },
}

/// A selectable action attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub label: String,
    /// Value to send back as the judgment verdict.
    pub verdict: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Status {
        session_id: String,
        text: String,
    },
    Item {
        session_id: String,
        handle: String,
        text: String,
        actions: Vec<Action>,
    },
}

#[derive(Debug, Clone)]
pub struct DeskOptions {
    pub progress_every: u64,
    pub greeting: Option<String>,
    pub mask_digits: bool,
}

impl Default for DeskOptions {
    fn default() -> Self {
        Self {
            progress_every: 10,
            greeting: None,
            mask_digits: false,
        }
    }
}

fn action(label: &str, verdict: &str) -> Action {
    Action {
        label: label.to_string(),
        verdict: verdict.to_string(),
    }
}

fn display_text(text: &str, mask_digits: bool) -> String {
    if mask_digits {
        DIGITS.replace_all(text, "<NUM>").into_owned()
    } else {
        text.to_string()
    }
}

/// Text and actions for an item as the rater sees it.
pub fn render_item(
    item: &AnnotationItem,
    order: Option<PairOrder>,
    mask_digits: bool,
) -> (String, Vec<Action>) {
    match item {
        AnnotationItem::Single { record } => {
            let text = format!(
                "{}\nAnswer:\n{}",
                display_text(&record.question, mask_digits),
                display_text(&record.answer, mask_digits)
            );
            (
                text,
                vec![action("Meaningful", "1"), action("Not meaningful", "0")],
            )
        }
        AnnotationItem::Pair { best, other } => {
            let (first, second) = match order.unwrap_or(PairOrder::BestFirst) {
                PairOrder::BestFirst => (best, other),
                PairOrder::RandomFirst => (other, best),
            };
            let text = format!(
                "{}\n\nAnswer A:\n{}\nAnswer B:\n{}\n\nWhich answer is more meaningful?",
                display_text(&best.question, mask_digits),
                display_text(&first.answer, mask_digits),
                display_text(&second.answer, mask_digits)
            );
            (
                text,
                vec![
                    action("Answer A", "a"),
                    action("Answer B", "b"),
                    action("No difference", "equal"),
                ],
            )
        }
    }
}

pub struct AnnotationDesk<S> {
    registry: SessionRegistry,
    sink: S,
    options: DeskOptions,
}

impl<S: JudgmentSink> AnnotationDesk<S> {
    pub fn new(registry: SessionRegistry, sink: S, options: DeskOptions) -> Self {
        Self {
            registry,
            sink,
            options: DeskOptions {
                progress_every: options.progress_every.max(1),
                ..options
            },
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn handle(&mut self, event: InboundEvent) -> Result<Vec<Reply>, DeskError> {
        match event {
            InboundEvent::Start { session_id } => self.start(&session_id),
            InboundEvent::Judgment {
                session_id,
                user,
                handle,
                verdict,
            } => self.judgment(&session_id, &user, &handle, &verdict),
        }
    }

    fn start(&mut self, session_id: &str) -> Result<Vec<Reply>, DeskError> {
        self.registry.start(session_id)?;
        let mut replies = Vec::new();
        if let Some(greeting) = &self.options.greeting {
            replies.push(Reply::Status {
                session_id: session_id.to_string(),
                text: greeting.clone(),
            });
        }
        let served = self.registry.next(session_id)?;
        replies.push(self.item_reply(session_id, &served));
        Ok(replies)
    }

    fn judgment(
        &mut self,
        session_id: &str,
        user: &str,
        handle: &str,
        verdict: &str,
    ) -> Result<Vec<Reply>, DeskError> {
        if !self.registry.is_active(session_id) {
            warn!(session_id, handle, "judgment for inactive session; restarting it");
            return self.start(session_id);
        }

        match self.registry.record(session_id, handle, verdict) {
            Resolution::Recorded(draft) => {
                let row = JudgmentRow {
                    chat_id: draft.session_id,
                    user: user.to_string(),
                    item: draft.item,
                    verdict: draft.verdict,
                    time_asked: draft.time_served,
                    time_answered: Utc::now(),
                };
                self.sink.record(&row)?;
            }
            Resolution::Unknown => {
                warn!(session_id, handle, "judgment for unknown handle; not recorded");
            }
            Resolution::Rejected { verdict } => {
                warn!(session_id, handle, %verdict, "verdict does not fit item; not recorded");
            }
        }

        let served = self.registry.next(session_id)?;
        let mut replies = Vec::new();
        if served.sequence_index > 0 && served.sequence_index % self.options.progress_every == 0 {
            replies.push(Reply::Status {
                session_id: session_id.to_string(),
                text: format!("You have answered {} questions", served.sequence_index),
            });
        }
        replies.push(self.item_reply(session_id, &served));
        Ok(replies)
    }

    fn item_reply(&self, session_id: &str, served: &ServedItem) -> Reply {
        let (text, actions) = render_item(&served.item, served.order, self.options.mask_digits);
        Reply::Item {
            session_id: session_id.to_string(),
            handle: served.handle.to_string(),
            text,
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ComparisonRecord, Operator};

    fn rec(id: u64, answer: &str) -> ComparisonRecord {
        ComparisonRecord {
            id,
            context: "ctx".to_string(),
            question: "card 1234 blocked".to_string(),
            answer: answer.to_string(),
            operator: Operator::Bot,
            discriminator: Some(0.1),
        }
    }

    #[test]
    fn masking_replaces_digit_runs() {
        let item = AnnotationItem::single(rec(0, "call 900"));
        let (text, actions) = render_item(&item, None, true);
        assert_eq!(text, "card <NUM> blocked\nAnswer:\ncall <NUM>");
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn pair_text_follows_presentation_order() {
        let item = AnnotationItem::Pair {
            best: rec(0, "best answer"),
            other: rec(1, "other answer"),
        };
        let (text, actions) = render_item(&item, Some(PairOrder::RandomFirst), false);
        let a = text.find("other answer").unwrap();
        let b = text.find("best answer").unwrap();
        assert!(a < b);
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn events_use_a_type_tag() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"type":"judgment","session_id":"42","handle":"h","verdict":"1"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::Judgment {
                session_id: "42".to_string(),
                user: String::new(),
                handle: "h".to_string(),
                verdict: "1".to_string(),
            }
        );
    }
}
