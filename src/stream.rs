//! Endless shuffled ring buffer over the finalized item collection.
//!
//! Every item is yielded exactly once per cycle; each cycle is an
//! independent uniform permutation. Streams for different sessions share the
//! collection but own their permutation and position.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::record::AnnotationItem;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("cannot sample from an empty item collection")]
    Empty,
}

#[derive(Debug)]
pub struct SamplingStream {
    items: Arc<[AnnotationItem]>,
    order: Vec<usize>,
    position: usize,
    sequence: u64,
    rng: StdRng,
}

impl SamplingStream {
    pub fn new(items: Arc<[AnnotationItem]>, mut rng: StdRng) -> Result<Self, StreamError> {
        if items.is_empty() {
            return Err(StreamError::Empty);
        }
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.shuffle(&mut rng);
        Ok(Self {
            items,
            order,
            position: 0,
            sequence: 0,
            rng,
        })
    }

    /// Advance by one. Returns the lifetime sequence index and the item.
    pub fn next_item(&mut self) -> (u64, &AnnotationItem) {
        if self.position == self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.position = 0;
        }
        let idx = self.order[self.position];
        self.position += 1;
        let sequence = self.sequence;
        self.sequence += 1;
        (sequence, &self.items[idx])
    }

    /// Items served so far.
    pub fn served(&self) -> u64 {
        self.sequence
    }
}

impl Iterator for SamplingStream {
    type Item = (u64, AnnotationItem);

    fn next(&mut self) -> Option<Self::Item> {
        let (sequence, item) = self.next_item();
        Some((sequence, item.clone()))
    }
}
