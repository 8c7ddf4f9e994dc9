//! Per-rater session state and the served-item handle table.
//!
//! Delivery and judgment are asynchronous: an item goes out with an opaque
//! handle, and the verdict comes back later carrying that handle. The table
//! maps each outstanding handle to what was served so the judgment can be
//! recorded against exactly the item the rater saw.
//!
//! Each session keeps at most `handle_retention` outstanding handles; minting
//! past the cap evicts the session's oldest handle. A judgment for an unknown,
//! evicted, foreign or already-consumed handle resolves to
//! [`Resolution::Unknown`] and is never an error.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::record::{AnnotationItem, PairOrder, Verdict};
use crate::stream::{SamplingStream, StreamError};

pub const DEFAULT_HANDLE_RETENTION: usize = 64;

/// Opaque token correlating a served item with its judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemHandle(Uuid);

impl ItemHandle {
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ItemHandle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub handle_retention: usize,
    pub rng_seed: Option<u64>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            handle_retention: DEFAULT_HANDLE_RETENTION,
            rng_seed: None,
        }
    }
}

/// An item handed to the transport.
#[derive(Debug, Clone)]
pub struct ServedItem {
    pub handle: ItemHandle,
    pub sequence_index: u64,
    pub item: AnnotationItem,
    /// Presentation order; set for pairs only.
    pub order: Option<PairOrder>,
    pub time_served: DateTime<Utc>,
}

/// A resolved judgment awaiting persistence.
#[derive(Debug, Clone)]
pub struct JudgmentDraft {
    pub session_id: String,
    pub item: AnnotationItem,
    pub verdict: Verdict,
    pub time_served: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Recorded(JudgmentDraft),
    /// Handle not outstanding for this session.
    Unknown,
    /// Handle known but the verdict does not fit the item; still outstanding.
    Rejected { verdict: String },
}

#[derive(Debug)]
struct PendingItem {
    session_id: String,
    item: AnnotationItem,
    order: Option<PairOrder>,
    time_served: DateTime<Utc>,
}

#[derive(Debug)]
struct Session {
    stream: SamplingStream,
    outstanding: VecDeque<ItemHandle>,
}

pub struct SessionRegistry {
    items: Arc<[AnnotationItem]>,
    sessions: HashMap<String, Session>,
    pending: HashMap<ItemHandle, PendingItem>,
    retention: usize,
    rng: StdRng,
}

impl SessionRegistry {
    pub fn new(items: Arc<[AnnotationItem]>, options: RegistryOptions) -> Result<Self, StreamError> {
        if items.is_empty() {
            return Err(StreamError::Empty);
        }
        let rng = match options.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            items,
            sessions: HashMap::new(),
            pending: HashMap::new(),
            retention: options.handle_retention.max(1),
            rng,
        })
    }

    /// Begin (or restart) a session with a fresh stream. Handles previously
    /// served to it are dropped.
    pub fn start(&mut self, session_id: &str) -> Result<(), StreamError> {
        let stream = SamplingStream::new(
            self.items.clone(),
            StdRng::seed_from_u64(self.rng.gen()),
        )?;
        if let Some(old) = self.sessions.insert(
            session_id.to_string(),
            Session {
                stream,
                outstanding: VecDeque::new(),
            },
        ) {
            for handle in old.outstanding {
                self.pending.remove(&handle);
            }
        }
        Ok(())
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Serve the session's next item, starting the session if needed.
    pub fn next(&mut self, session_id: &str) -> Result<ServedItem, StreamError> {
        if !self.sessions.contains_key(session_id) {
            self.start(session_id)?;
        }
        let Some(session) = self.sessions.get_mut(session_id) else {
            return Err(StreamError::Empty);
        };

        let (sequence_index, item) = session.stream.next_item();
        let item = item.clone();
        let order = item.is_pair().then(|| {
            if self.rng.gen_bool(0.5) {
                PairOrder::BestFirst
            } else {
                PairOrder::RandomFirst
            }
        });
        let handle = ItemHandle::mint();
        let time_served = Utc::now();

        session.outstanding.push_back(handle);
        while session.outstanding.len() > self.retention {
            if let Some(evicted) = session.outstanding.pop_front() {
                self.pending.remove(&evicted);
                debug!(session_id, handle = %evicted, "evicted unanswered handle");
            }
        }
        self.pending.insert(
            handle,
            PendingItem {
                session_id: session_id.to_string(),
                item: item.clone(),
                order,
                time_served,
            },
        );

        Ok(ServedItem {
            handle,
            sequence_index,
            item,
            order,
            time_served,
        })
    }

    /// Resolve a judgment. Consumes the handle on success.
    pub fn record(&mut self, session_id: &str, handle: &str, verdict: &str) -> Resolution {
        let Ok(handle) = handle.parse::<ItemHandle>() else {
            return Resolution::Unknown;
        };
        let Some(pending) = self.pending.get(&handle) else {
            return Resolution::Unknown;
        };
        if pending.session_id != session_id {
            return Resolution::Unknown;
        }
        let Some(verdict) = Verdict::resolve(&pending.item, pending.order, verdict.trim()) else {
            return Resolution::Rejected {
                verdict: verdict.to_string(),
            };
        };

        let Some(pending) = self.pending.remove(&handle) else {
            return Resolution::Unknown;
        };
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.outstanding.retain(|h| *h != handle);
        }
        Resolution::Recorded(JudgmentDraft {
            session_id: pending.session_id,
            item: pending.item,
            verdict,
            time_served: pending.time_served,
        })
    }

    /// Outstanding handles across all sessions.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_parses_back() {
        let handle = ItemHandle::mint();
        let parsed: ItemHandle = handle.to_string().parse().unwrap();
        assert_eq!(parsed, handle);
        assert!("1700000000;3;0.9;bot".parse::<ItemHandle>().is_err());
    }
}
