//! Per-group deduplication and round-robin category balancing.
//!
//! Within a group (records sharing a context or question) the bot candidates
//! collapse to the best-scoring one, relabeled `botbest`, plus the
//! worst-scoring one when more than one candidate exists and it scores
//! strictly lower. Other categories keep their first record. Groups with a
//! single record are dropped: there is nothing to compare against.
//!
//! The deduplicated corpus is then interleaved category by category and
//! truncated to the shortest category, so every category present contributes
//! exactly the same number of records.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::record::{ComparisonRecord, GroupKey, Operator};

/// Group records by key, preserving first-appearance order of groups and
/// file order within each group.
pub(crate) fn group_records(
    records: &[ComparisonRecord],
    key: GroupKey,
) -> Vec<Vec<&ComparisonRecord>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&ComparisonRecord>> = Vec::new();
    for record in records {
        let slot = *index.entry(record.group_key(key)).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(record);
    }
    groups
}

/// First record holding the maximum score. Ties keep file order.
pub(crate) fn best_of<'a>(candidates: &[&'a ComparisonRecord]) -> Option<&'a ComparisonRecord> {
    let mut best: Option<&ComparisonRecord> = None;
    for &candidate in candidates {
        match best {
            Some(current) if candidate.score() <= current.score() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// First record holding the minimum score. Ties keep file order.
pub(crate) fn worst_of<'a>(candidates: &[&'a ComparisonRecord]) -> Option<&'a ComparisonRecord> {
    let mut worst: Option<&ComparisonRecord> = None;
    for &candidate in candidates {
        match worst {
            Some(current) if candidate.score() >= current.score() => {}
            _ => worst = Some(candidate),
        }
    }
    worst
}

/// Collapse each group to its representative records.
pub fn dedup_groups(records: &[ComparisonRecord], key: GroupKey) -> Vec<ComparisonRecord> {
    let mut out = Vec::new();
    let mut singletons = 0usize;
    for group in group_records(records, key) {
        if group.len() == 1 {
            singletons += 1;
            continue;
        }

        let bots: Vec<&ComparisonRecord> = group
            .iter()
            .copied()
            .filter(|r| r.operator == Operator::Bot)
            .collect();
        if let Some(best) = best_of(&bots) {
            out.push(best.with_operator(Operator::BotBest));
            if bots.len() > 1 {
                if let Some(worst) = worst_of(&bots) {
                    if worst.score() < best.score() {
                        out.push(worst.clone());
                    }
                }
            }
        }

        let mut seen: Vec<Operator> = Vec::new();
        for record in group.iter().filter(|r| r.operator != Operator::Bot) {
            if seen.contains(&record.operator) {
                continue;
            }
            seen.push(record.operator);
            out.push((*record).clone());
        }
    }
    debug!(singletons, kept = out.len(), "deduplicated comparison groups");
    out
}

/// Round-robin interleave of the categories present, truncated to the
/// shortest one.
pub fn interleave_balanced(
    records: Vec<ComparisonRecord>,
    operators: &[Operator],
) -> Vec<ComparisonRecord> {
    let mut buckets: Vec<(Operator, Vec<ComparisonRecord>)> =
        operators.iter().map(|&op| (op, Vec::new())).collect();
    let mut unlisted = 0usize;
    for record in records {
        match buckets.iter_mut().find(|(op, _)| *op == record.operator) {
            Some((_, bucket)) => bucket.push(record),
            None => unlisted += 1,
        }
    }
    if unlisted > 0 {
        warn!(unlisted, "dropping records whose operator is not balanced");
    }

    buckets.retain(|(_, bucket)| !bucket.is_empty());
    let Some(shortest) = buckets.iter().map(|(_, bucket)| bucket.len()).min() else {
        return Vec::new();
    };
    for (op, bucket) in &buckets {
        debug!(operator = %op, available = bucket.len(), kept = shortest, "balancing category");
    }

    let mut iters: Vec<_> = buckets
        .into_iter()
        .map(|(_, bucket)| bucket.into_iter())
        .collect();
    let mut out = Vec::with_capacity(shortest * iters.len());
    for _ in 0..shortest {
        for iter in iters.iter_mut() {
            if let Some(record) = iter.next() {
                out.push(record);
            }
        }
    }
    out
}

/// Deduplicate, balance and shuffle.
pub fn rebalance<R: Rng + ?Sized>(
    records: &[ComparisonRecord],
    key: GroupKey,
    operators: &[Operator],
    rng: &mut R,
) -> Vec<ComparisonRecord> {
    let mut balanced = interleave_balanced(dedup_groups(records, key), operators);
    balanced.shuffle(rng);
    balanced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u64, context: &str, operator: Operator, score: f64) -> ComparisonRecord {
        ComparisonRecord {
            id,
            context: context.to_string(),
            question: format!("q-{context}"),
            answer: format!("a-{id}"),
            operator,
            discriminator: Some(score),
        }
    }

    #[test]
    fn best_and_worst_prefer_first_occurrence_on_ties() {
        let a = rec(0, "c", Operator::Bot, 0.3);
        let b = rec(1, "c", Operator::Bot, 0.3);
        let refs = vec![&a, &b];
        assert_eq!(best_of(&refs).unwrap().id, 0);
        assert_eq!(worst_of(&refs).unwrap().id, 0);
    }

    #[test]
    fn interleave_alternates_categories() {
        let records = vec![
            rec(0, "a", Operator::Human, 0.0),
            rec(1, "b", Operator::Human, 0.0),
            rec(2, "c", Operator::BotBest, 0.0),
            rec(3, "d", Operator::Human, 0.0),
            rec(4, "e", Operator::BotBest, 0.0),
        ];
        let out = interleave_balanced(records, &Operator::ALL);
        let ops: Vec<Operator> = out.iter().map(|r| r.operator).collect();
        assert_eq!(
            ops,
            vec![Operator::Human, Operator::BotBest, Operator::Human, Operator::BotBest]
        );
        assert_eq!(out[0].id, 0);
        assert_eq!(out[1].id, 2);
    }

    #[test]
    fn interleave_of_nothing_is_empty() {
        assert!(interleave_balanced(Vec::new(), &Operator::ALL).is_empty());
    }

    #[test]
    fn extra_human_rows_in_a_group_collapse_to_the_first() {
        let records = vec![
            rec(0, "c", Operator::Human, 0.0),
            rec(1, "c", Operator::Human, 0.0),
            rec(2, "c", Operator::Bot, 0.4),
        ];
        let out = dedup_groups(&records, GroupKey::Context);
        let humans: Vec<u64> = out
            .iter()
            .filter(|r| r.operator == Operator::Human)
            .map(|r| r.id)
            .collect();
        assert_eq!(humans, vec![0]);
    }
}
