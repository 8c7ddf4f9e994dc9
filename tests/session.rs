use std::collections::BTreeSet;
use std::sync::Arc;

use sense_harness::record::{PairOrder, PairSide};
use sense_harness::{
    AnnotationItem, ComparisonRecord, Operator, RegistryOptions, Resolution, SessionRegistry,
    Verdict,
};

fn record(id: u64, operator: Operator, score: Option<f64>) -> ComparisonRecord {
    ComparisonRecord {
        id,
        context: format!("ctx{id}"),
        question: format!("question {id}"),
        answer: format!("answer {id}"),
        operator,
        discriminator: score,
    }
}

fn singles(n: u64) -> Arc<[AnnotationItem]> {
    (0..n)
        .map(|id| AnnotationItem::single(record(id, Operator::Human, Some(0.5))))
        .collect()
}

fn pairs(n: u64) -> Arc<[AnnotationItem]> {
    (0..n)
        .map(|id| AnnotationItem::Pair {
            best: record(id, Operator::BotBest, Some(0.9)),
            other: record(id + 1000, Operator::Bot, Some(0.1)),
        })
        .collect()
}

fn registry(items: Arc<[AnnotationItem]>, retention: usize) -> SessionRegistry {
    SessionRegistry::new(
        items,
        RegistryOptions {
            handle_retention: retention,
            rng_seed: Some(99),
        },
    )
    .unwrap()
}

#[test]
fn judgment_resolves_to_the_served_item() {
    let mut reg = registry(singles(5), 64);
    reg.start("alice").unwrap();
    let served = reg.next("alice").unwrap();

    match reg.record("alice", &served.handle.to_string(), "1") {
        Resolution::Recorded(draft) => {
            assert_eq!(draft.item, served.item);
            assert_eq!(draft.verdict, Verdict::Meaningful);
            assert_eq!(draft.session_id, "alice");
            assert_eq!(draft.time_served, served.time_served);
        }
        other => panic!("expected a recorded judgment, got {other:?}"),
    }
    assert_eq!(reg.outstanding(), 0);
}

#[test]
fn a_handle_is_consumed_exactly_once() {
    let mut reg = registry(singles(5), 64);
    let served = reg.next("alice").unwrap();
    let handle = served.handle.to_string();

    assert!(matches!(reg.record("alice", &handle, "0"), Resolution::Recorded(_)));
    assert!(matches!(reg.record("alice", &handle, "0"), Resolution::Unknown));
}

#[test]
fn unknown_and_legacy_handles_are_not_recorded() {
    let mut reg = registry(singles(3), 64);
    reg.start("alice").unwrap();
    reg.next("alice").unwrap();

    assert!(matches!(
        reg.record("alice", "1700000000;3;0.9;bot", "1"),
        Resolution::Unknown
    ));
    assert!(matches!(
        reg.record("alice", &uuid::Uuid::new_v4().simple().to_string(), "1"),
        Resolution::Unknown
    ));
    assert_eq!(reg.outstanding(), 1);
}

#[test]
fn foreign_session_cannot_consume_a_handle() {
    let mut reg = registry(singles(3), 64);
    let served = reg.next("alice").unwrap();
    let handle = served.handle.to_string();

    assert!(matches!(reg.record("bob", &handle, "1"), Resolution::Unknown));
    assert!(matches!(reg.record("alice", &handle, "1"), Resolution::Recorded(_)));
}

#[test]
fn ill_fitting_verdict_keeps_the_handle_outstanding() {
    let mut reg = registry(singles(3), 64);
    let served = reg.next("alice").unwrap();
    let handle = served.handle.to_string();

    assert!(matches!(
        reg.record("alice", &handle, "a"),
        Resolution::Rejected { .. }
    ));
    assert_eq!(reg.outstanding(), 1);
    assert!(matches!(reg.record("alice", &handle, "1"), Resolution::Recorded(_)));
}

#[test]
fn outstanding_handles_are_bounded_per_session() {
    let mut reg = registry(singles(10), 4);
    let mut handles = Vec::new();
    for _ in 0..10 {
        handles.push(reg.next("alice").unwrap().handle.to_string());
    }
    for _ in 0..3 {
        reg.next("bob").unwrap();
    }
    assert_eq!(reg.outstanding(), 4 + 3);

    // Oldest handles were evicted, newest survive.
    assert!(matches!(reg.record("alice", &handles[0], "1"), Resolution::Unknown));
    assert!(matches!(reg.record("alice", &handles[5], "1"), Resolution::Unknown));
    assert!(matches!(reg.record("alice", &handles[9], "1"), Resolution::Recorded(_)));
}

#[test]
fn restart_drops_previous_handles() {
    let mut reg = registry(singles(4), 64);
    let served = reg.next("alice").unwrap();
    reg.start("alice").unwrap();
    assert!(matches!(
        reg.record("alice", &served.handle.to_string(), "1"),
        Resolution::Unknown
    ));
    assert_eq!(reg.next("alice").unwrap().sequence_index, 0);
}

#[test]
fn session_stream_covers_the_collection_each_cycle() {
    let k = 12u64;
    let mut reg = registry(singles(k), 64);
    reg.start("alice").unwrap();

    for cycle in 0..2u64 {
        let mut seen = BTreeSet::new();
        for i in 0..k {
            let served = reg.next("alice").unwrap();
            assert_eq!(served.sequence_index, cycle * k + i);
            seen.insert(served.item.id());
        }
        assert_eq!(seen, (0..k).collect::<BTreeSet<_>>());
    }
}

#[test]
fn sessions_progress_independently() {
    let mut reg = registry(singles(6), 64);
    for _ in 0..4 {
        reg.next("alice").unwrap();
    }
    assert_eq!(reg.next("bob").unwrap().sequence_index, 0);
    assert_eq!(reg.next("alice").unwrap().sequence_index, 4);
    assert_eq!(reg.session_count(), 2);
}

#[test]
fn pair_letters_map_through_the_presentation_order() {
    let mut reg = registry(pairs(8), 64);
    let mut seen_orders = BTreeSet::new();
    for _ in 0..40 {
        let served = reg.next("alice").unwrap();
        let order = served.order.expect("pairs carry an order");
        seen_orders.insert(format!("{order:?}"));

        let expected = match order {
            PairOrder::BestFirst => PairSide::Best,
            PairOrder::RandomFirst => PairSide::Random,
        };
        match reg.record("alice", &served.handle.to_string(), "a") {
            Resolution::Recorded(draft) => {
                assert_eq!(draft.verdict, Verdict::Preferred(expected));
            }
            other => panic!("expected a recorded judgment, got {other:?}"),
        }
    }
    assert_eq!(seen_orders.len(), 2, "both presentation orders should occur");

    let served = reg.next("alice").unwrap();
    let handle = served.handle.to_string();
    assert!(matches!(reg.record("alice", &handle, "1"), Resolution::Rejected { .. }));
    match reg.record("alice", &handle, "equal") {
        Resolution::Recorded(draft) => assert_eq!(draft.verdict, Verdict::NoDifference),
        other => panic!("expected a recorded judgment, got {other:?}"),
    }
}

#[test]
fn empty_collection_is_refused() {
    let empty: Arc<[AnnotationItem]> = Arc::from(Vec::new());
    assert!(SessionRegistry::new(empty, RegistryOptions::default()).is_err());
}
