use std::path::Path;

use tempfile::tempdir;

use sense_harness::cache::SqliteCorpusCache;
use sense_harness::config::{Config, ItemMode};
use sense_harness::corpus::{fingerprint, prepare_corpus};
use sense_harness::{AnnotationItem, ComparisonRecord, CorpusError, Operator};

fn export(groups: usize) -> String {
    let mut out = String::from("text,is_human,discriminator_score\n");
    for g in 0..groups {
        let ctx = format!("<COR_START> greeting {g}");
        out.push_str(&format!(
            "{ctx} <COR_START> question {g} <ANS_START> bot low {g},0,0.{}\n",
            1 + g % 3
        ));
        out.push_str(&format!(
            "{ctx} <COR_START> question {g} <ANS_START> bot high {g},0,0.9\n"
        ));
        out.push_str(&format!(
            "{ctx} <COR_START> question {g} <ANS_START> human {g},1,0.5\n"
        ));
    }
    out
}

fn config(dir: &Path, source: &str) -> Config {
    let source_path = dir.join("export.csv");
    std::fs::write(&source_path, source).unwrap();
    let mut cfg = Config::default();
    cfg.rng_seed = Some(5);
    cfg.source.path = source_path;
    cfg.cache.path = dir.join("cache.sqlite");
    cfg
}

fn item(id: u64) -> AnnotationItem {
    AnnotationItem::single(ComparisonRecord {
        id,
        context: "ctx".to_string(),
        question: "q".to_string(),
        answer: format!("a{id}"),
        operator: Operator::Human,
        discriminator: Some(0.5),
    })
}

#[test]
fn sqlite_cache_put_get_and_entries_track_hits() {
    let dir = tempdir().unwrap();
    let cache = SqliteCorpusCache::new(dir.path().join("cache.sqlite")).unwrap();

    assert!(cache.get("missing").unwrap().is_none());

    let items = vec![item(0), item(1)];
    cache.put("fp-1", ItemMode::Single, &items).unwrap();

    assert_eq!(cache.get("fp-1").unwrap().unwrap(), items);
    let _ = cache.get("fp-1").unwrap().unwrap();

    let entries = cache.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].fingerprint, "fp-1");
    assert_eq!(entries[0].mode, "single");
    assert_eq!(entries[0].item_count, 2);
    assert_eq!(entries[0].hit_count, 2);

    // Upsert replaces the payload in place.
    cache.put("fp-1", ItemMode::Single, &items[..1]).unwrap();
    assert_eq!(cache.get("fp-1").unwrap().unwrap().len(), 1);
    assert_eq!(cache.entries().unwrap().len(), 1);
}

#[test]
fn sqlite_cache_prune_keeps_requested_rows() {
    let dir = tempdir().unwrap();
    let cache = SqliteCorpusCache::new(dir.path().join("cache.sqlite")).unwrap();
    for i in 0..5 {
        cache
            .put(&format!("fp-{i}"), ItemMode::Single, &[item(i)])
            .unwrap();
    }

    let stats = cache.prune(2).unwrap();
    assert_eq!(stats.deleted, 3);
    assert_eq!(stats.remaining, 2);
    assert_eq!(cache.entries().unwrap().len(), 2);
}

#[test]
fn lock_file_does_not_truncate_the_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let cache = SqliteCorpusCache::new(&db_path).unwrap();
    cache.put("fp", ItemMode::Single, &[item(0)]).unwrap();

    {
        let _lock = cache.lock_exclusive().unwrap();
        assert!(dir.path().join("cache.lock").exists());
    }

    let reopened = SqliteCorpusCache::new(&db_path).unwrap();
    assert_eq!(reopened.get("fp").unwrap().unwrap().len(), 1);
}

#[test]
fn fingerprint_changes_with_source_and_settings() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path(), &export(4));
    let base = fingerprint(b"source", &cfg).unwrap();

    assert_eq!(base, fingerprint(b"source", &cfg).unwrap());
    assert_ne!(base, fingerprint(b"source2", &cfg).unwrap());

    let mut reseeded = cfg.clone();
    reseeded.rng_seed = Some(6);
    assert_ne!(base, fingerprint(b"source", &reseeded).unwrap());

    let mut paired = cfg.clone();
    paired.mode = ItemMode::Pair;
    assert_ne!(base, fingerprint(b"source", &paired).unwrap());

    // Output and session settings do not affect what is derived.
    let mut cosmetic = cfg.clone();
    cosmetic.session.progress_every = 3;
    assert_eq!(base, fingerprint(b"source", &cosmetic).unwrap());
}

#[test]
fn prepared_corpus_is_frozen_across_restarts() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path(), &export(30));

    let first = prepare_corpus(&cfg, false).unwrap();
    assert!(!first.from_cache);
    assert!(!first.is_empty());

    let second = prepare_corpus(&cfg, false).unwrap();
    assert!(second.from_cache);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(&*second.items, &*first.items);

    let rebuilt = prepare_corpus(&cfg, true).unwrap();
    assert!(!rebuilt.from_cache);
}

#[test]
fn prepared_single_corpus_is_balanced_before_controls() {
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path(), &export(30));
    cfg.controls.enabled = false;
    cfg.cache.enabled = false;

    let corpus = prepare_corpus(&cfg, false).unwrap();
    let counts = corpus.operator_counts();
    assert_eq!(counts.get(&Operator::BotBest), Some(&30));
    assert_eq!(counts.get(&Operator::Bot), Some(&30));
    assert_eq!(counts.get(&Operator::Human), Some(&30));
    assert_eq!(corpus.len(), 90);
}

#[test]
fn prepared_pair_corpus_holds_pairs() {
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path(), &export(30));
    cfg.mode = ItemMode::Pair;
    cfg.cache.enabled = false;

    let corpus = prepare_corpus(&cfg, false).unwrap();
    assert!(!corpus.is_empty());
    for item in corpus.items.iter() {
        match item {
            AnnotationItem::Pair { best, other } => assert!(best.score() > other.score()),
            AnnotationItem::Single { .. } => panic!("single item in pair corpus"),
        }
    }
}

#[test]
fn corpus_with_only_singleton_groups_is_empty() {
    let dir = tempdir().unwrap();
    let source = "text,is_human,discriminator_score\n\
        <COR_START> one <ANS_START> lonely,1,0.5\n\
        <COR_START> two <ANS_START> also lonely,0,0.5\n";
    let cfg = config(dir.path(), source);

    assert!(matches!(prepare_corpus(&cfg, false), Err(CorpusError::Empty)));
}

#[test]
fn missing_source_is_reported_with_its_path() {
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path(), "");
    cfg.source.path = dir.path().join("absent.csv");

    match prepare_corpus(&cfg, false) {
        Err(CorpusError::Read { path, .. }) => assert_eq!(path, cfg.source.path),
        other => panic!("expected a read error, got {other:?}"),
    }
}

#[test]
fn unreadable_cached_collection_is_rebuilt() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path(), &export(30));

    let first = prepare_corpus(&cfg, false).unwrap();

    let conn = rusqlite::Connection::open(&cfg.cache.path).unwrap();
    conn.execute(
        "UPDATE corpus_cache SET payload = ?1 WHERE fingerprint = ?2",
        rusqlite::params![r#"[{"kind":"legacy"}]"#, first.fingerprint],
    )
    .unwrap();
    drop(conn);

    let rebuilt = prepare_corpus(&cfg, false).unwrap();
    assert!(!rebuilt.from_cache);
    assert_eq!(&*rebuilt.items, &*first.items);

    let cached = prepare_corpus(&cfg, false).unwrap();
    assert!(cached.from_cache);
}
