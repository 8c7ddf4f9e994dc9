//! A/B pair construction for the preference variant.
//!
//! Each group contributes its best bot candidate against one randomly chosen
//! candidate, but only when the best one actually scores higher.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::rebalance::{best_of, group_records};
use crate::record::{AnnotationItem, ComparisonRecord, GroupKey, Operator};

pub fn build_pairs<R: Rng + ?Sized>(
    records: &[ComparisonRecord],
    key: GroupKey,
    rng: &mut R,
) -> Vec<AnnotationItem> {
    let mut pairs = Vec::new();
    for group in group_records(records, key) {
        if group.len() == 1 {
            continue;
        }
        let bots: Vec<&ComparisonRecord> = group
            .iter()
            .copied()
            .filter(|r| r.operator == Operator::Bot)
            .collect();
        let (Some(best), Some(other)) = (best_of(&bots), bots.choose(rng)) else {
            continue;
        };
        if best.score() > other.score() {
            pairs.push(AnnotationItem::Pair {
                best: best.with_operator(Operator::BotBest),
                other: (*other).clone(),
            });
        }
    }
    pairs.shuffle(rng);
    pairs
}
