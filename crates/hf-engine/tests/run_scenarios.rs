//! End-to-end run scenarios against an in-memory DuckDB store.
//!
//! Each test drives the coordinator through one or more runs and inspects
//! both persisted relations afterwards.

mod common;

use common::*;
use hf_core::scope::CompareOp;
use hf_core::{BreachKind, DeletionPolicy, Row, RunStatus, ScopePredicate, SnapshotConfig, Value};
use hf_db::{DatabaseCore, HistoryStore};
use hf_engine::{ClaimRegistry, EngineError, RunCoordinator, RunOptions};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn setup() -> (Arc<FlakyStore>, RunCoordinator) {
    let store = Arc::new(FlakyStore::new());
    let coordinator = RunCoordinator::new(store.clone());
    (store, coordinator)
}

// ── Idempotence and basic transitions ──────────────────────────────────

#[tokio::test]
async fn test_identical_rerun_writes_nothing() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::Close);
    let batch = || full(vec![user(1, "ann", "gold"), user(2, "bob", "silver")]);

    let first = coordinator
        .run(&config, batch(), RunOptions::at(day(1)))
        .await
        .unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(first.status(), RunStatus::Succeeded);
    let history_before = history_rows(store.as_ref()).await;
    let current_before = current_rows(store.as_ref()).await;

    for ts in [day(1), day(2)] {
        let again = coordinator
            .run(&config, batch(), RunOptions::at(ts))
            .await
            .unwrap();
        assert!(again.is_noop(), "rerun at {} wrote: {:?}", ts, again);
        assert_eq!(again.unchanged, 2);
    }

    assert_eq!(store.history_writes(), 1);
    assert_eq!(store.current_writes(), 1);
    assert_eq!(history_rows(store.as_ref()).await, history_before);
    assert_eq!(current_rows(store.as_ref()).await, current_before);
}

#[tokio::test]
async fn test_changed_closes_and_reopens_at_run_timestamp() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::None);

    coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1)))
        .await
        .unwrap();
    let result = coordinator
        .run(&config, full(vec![user(1, "ann", "platinum")]), RunOptions::at(day(2)))
        .await
        .unwrap();
    assert_eq!((result.updated, result.closed, result.inserted), (1, 1, 0));

    let history = history_rows(store.as_ref()).await;
    assert_eq!(history.len(), 2);
    let (old, new) = (&history[0], &history[1]);
    assert_eq!(old["tier"], Value::from("gold"));
    assert_eq!(old["is_current"], Value::Bool(false));
    assert_eq!(old["valid_to"], micros(2));
    assert_eq!(new["tier"], Value::from("platinum"));
    assert_eq!(new["is_current"], Value::Bool(true));
    assert_eq!(new["valid_from"], micros(2));
    assert_eq!(new["valid_to"], Value::Null);
    // A tracked-attribute change never splits the entity's lineage
    assert_eq!(old["surrogate_key"], new["surrogate_key"]);

    let current = current_rows(store.as_ref()).await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["tier"], Value::from("platinum"));
    assert_eq!(current[0]["last_changed_at"], micros(2));
}

#[tokio::test]
async fn test_round_trip_back_to_earlier_values() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::None);

    for (d, tier) in [(1, "gold"), (2, "silver"), (3, "gold")] {
        coordinator
            .run(&config, full(vec![user(1, "ann", tier)]), RunOptions::at(day(d)))
            .await
            .unwrap();
    }

    let history = history_rows(store.as_ref()).await;
    let tiers: Vec<&Value> = history.iter().map(|r| &r["tier"]).collect();
    assert_eq!(
        tiers,
        vec![&Value::from("gold"), &Value::from("silver"), &Value::from("gold")]
    );
    assert_eq!(history[0]["valid_to"], history[1]["valid_from"]);
    assert_eq!(history[1]["valid_to"], history[2]["valid_from"]);
    assert!(store.check_history(SNAPSHOT).await.unwrap().is_empty());
}

// ── Deletion ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_batch_close_policy_deletes_and_reappearance_reopens() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::Close);
    let both = || full(vec![user(1, "ann", "gold"), user(2, "bob", "silver")]);

    coordinator.run(&config, both(), RunOptions::at(day(1))).await.unwrap();
    let result = coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(2)))
        .await
        .unwrap();
    assert_eq!((result.deleted, result.closed, result.unchanged), (1, 1, 1));

    let history = history_rows(store.as_ref()).await;
    let bob = &history[1];
    assert_eq!(bob["is_current"], Value::Bool(false));
    assert_eq!(bob["is_deleted"], Value::Bool(true));
    assert_eq!(bob["valid_to"], micros(2));
    assert_eq!(current_ids(store.as_ref()).await, vec![1]);

    let current = current_rows(store.as_ref()).await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["id"], Value::Int(1));

    let back = coordinator.run(&config, both(), RunOptions::at(day(3))).await.unwrap();
    assert_eq!(back.inserted, 1);
    assert_eq!(current_ids(store.as_ref()).await, vec![1, 2]);
    assert_eq!(current_rows(store.as_ref()).await.len(), 2);
    // The gap after a deletion close is intended
    assert!(store.check_history(SNAPSHOT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tombstone_policy_flags_and_revives_current_row() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::Tombstone);

    coordinator
        .run(
            &config,
            full(vec![user(1, "ann", "gold"), user(2, "bob", "silver")]),
            RunOptions::at(day(1)),
        )
        .await
        .unwrap();
    coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(2)))
        .await
        .unwrap();

    let current = current_rows(store.as_ref()).await;
    assert_eq!(current.len(), 2);
    assert_eq!(current[1]["is_deleted"], Value::Bool(true));

    // A second run without bob does not tombstone him again
    let quiet = coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(3)))
        .await
        .unwrap();
    assert!(quiet.is_noop());

    coordinator
        .run(&config, full(vec![user(2, "bob", "gold")]), RunOptions::at(day(4)))
        .await
        .unwrap();
    let current = current_rows(store.as_ref()).await;
    assert_eq!(current[1]["is_deleted"], Value::Bool(false));
    assert_eq!(current[1]["tier"], Value::from("gold"));
}

#[tokio::test]
async fn test_partial_batch_never_infers_missing() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::Close);

    coordinator
        .run(
            &config,
            full(vec![user(1, "ann", "gold"), user(2, "bob", "silver")]),
            RunOptions::at(day(1)),
        )
        .await
        .unwrap();
    let result = coordinator
        .run(&config, partial(vec![user(1, "ann", "bronze")]), RunOptions::at(day(2)))
        .await
        .unwrap();

    assert_eq!((result.updated, result.deleted), (1, 0));
    assert_eq!(current_ids(store.as_ref()).await, vec![1, 2]);
    assert_eq!(current_rows(store.as_ref()).await.len(), 2);
}

#[tokio::test]
async fn test_scope_limits_missing_detection() {
    let (store, coordinator) = setup();
    let mut config = users_config(DeletionPolicy::Close);
    config.scope = Some(ScopePredicate::Compare {
        column: "tier".to_string(),
        op: CompareOp::Eq,
        value: Value::from("gold"),
    });

    coordinator
        .run(
            &config,
            full(vec![
                user(1, "ann", "gold"),
                user(2, "bob", "silver"),
                user(3, "cyd", "gold"),
            ]),
            RunOptions::at(day(1)),
        )
        .await
        .unwrap();
    let result = coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(2)))
        .await
        .unwrap();

    assert_eq!(result.deleted, 1);
    assert_eq!(current_ids(store.as_ref()).await, vec![1, 2]);
}

// ── Batch-level failures leave no trace ────────────────────────────────

#[tokio::test]
async fn test_duplicate_key_fails_before_any_write() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::Close);
    coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1)))
        .await
        .unwrap();
    let before = history_rows(store.as_ref()).await;

    let err = coordinator
        .run(
            &config,
            full(vec![user(1, "ann", "silver"), user(1, "ann", "bronze")]),
            RunOptions::at(day(2)),
        )
        .await
        .unwrap_err();

    match err {
        EngineError::DuplicateKeyInBatch { keys, .. } => assert_eq!(keys[0].rows, vec![0, 1]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.history_writes(), 1);
    assert_eq!(history_rows(store.as_ref()).await, before);
}

#[tokio::test]
async fn test_non_monotonic_timestamp_is_rejected() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::None);
    coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(5)))
        .await
        .unwrap();

    let err = coordinator
        .run(&config, full(vec![user(1, "ann", "silver")]), RunOptions::at(day(4)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NonMonotonicRunTimestamp { .. }));
    assert_eq!(history_rows(store.as_ref()).await.len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_has_no_effect() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::Close);

    let options = RunOptions::at(day(1)).with_cancel(Arc::new(AtomicBool::new(true)));
    let err = coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), options)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled));
    assert!(!store.relation_exists(SNAPSHOT).await.unwrap());
    assert!(!store.relation_exists(CURRENT).await.unwrap());
    assert_eq!(coordinator.claims().claimed_count(SNAPSHOT), 0);
}

#[tokio::test]
async fn test_persisted_breach_fails_the_run() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::None);
    coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1)))
        .await
        .unwrap();
    store
        .execute_batch(
            "INSERT INTO snap_users SELECT 'dup', surrogate_key, id, name, tier, fingerprint, \
             valid_from, valid_to, is_current, is_deleted FROM snap_users",
        )
        .await
        .unwrap();

    let err = coordinator
        .run(&config, partial(vec![user(1, "ann", "silver")]), RunOptions::at(day(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));

    let breaches = coordinator.check(&config).await.unwrap();
    assert!(!breaches.is_empty());
    assert!(breaches
        .iter()
        .all(|b| matches!(b.kind, BreachKind::MultipleCurrent | BreachKind::Overlap)));
}

// ── Row validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_rejected_rows_are_reported_or_fatal_when_strict() {
    let (store, coordinator) = setup();
    let mut config = users_config(DeletionPolicy::None);
    let mut keyless = user(0, "nobody", "gold");
    keyless.insert("id".to_string(), Value::Null);
    let batch = || full(vec![user(1, "ann", "gold"), keyless.clone()]);

    config.strict = true;
    let err = coordinator
        .run(&config, batch(), RunOptions::at(day(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RejectedRows { count: 1, .. }));
    assert!(!store.relation_exists(SNAPSHOT).await.unwrap());

    config.strict = false;
    let result = coordinator
        .run(&config, batch(), RunOptions::at(day(1)))
        .await
        .unwrap();
    assert_eq!(result.status(), RunStatus::SucceededWithRejections);
    assert_eq!(result.inserted, 1);
    assert_eq!(result.rejected[0].row_index, 1);
    assert!(result.rejected[0].reason.contains("[K002]"));
}

// ── Column types ───────────────────────────────────────────────────────

fn scores_config() -> SnapshotConfig {
    let mut config = users_config(DeletionPolicy::None);
    config.name = "snap_scores".to_string();
    config.tracked_attributes = vec!["score".to_string()];
    config
}

fn score(id: i64, value: Value) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), Value::Int(id));
    row.insert("score".to_string(), value);
    row
}

async fn stored_scores<S: DatabaseCore + ?Sized>(store: &S, table: &str) -> Vec<Row> {
    store
        .query_rows(&format!(
            "SELECT id, score, typeof(score) AS t FROM {} ORDER BY id",
            table
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_mixed_numbers_are_stored_exactly_in_either_order() {
    let config = scores_config();
    let rows = vec![score(1, Value::Int(4)), score(2, Value::Float(3.5))];

    for batch_rows in [rows.clone(), rows.into_iter().rev().collect()] {
        let (store, coordinator) = setup();
        let result = coordinator
            .run(&config, full(batch_rows.clone()), RunOptions::at(day(1)))
            .await
            .unwrap();
        assert_eq!(result.inserted, 2);

        for table in ["snap_scores", "snap_scores_current"] {
            let stored = stored_scores(store.as_ref(), table).await;
            assert_eq!(stored[0]["t"], Value::from("DOUBLE"));
            assert_eq!(stored[0]["score"], Value::Float(4.0));
            assert_eq!(stored[1]["score"], Value::Float(3.5));
        }

        let again = coordinator
            .run(&config, full(batch_rows), RunOptions::at(day(2)))
            .await
            .unwrap();
        assert!(again.is_noop(), "rerun wrote: {:?}", again);
    }
}

#[tokio::test]
async fn test_integral_float_matches_stored_integer() {
    let (store, coordinator) = setup();
    let config = scores_config();

    coordinator
        .run(&config, full(vec![score(1, Value::Int(4))]), RunOptions::at(day(1)))
        .await
        .unwrap();
    let result = coordinator
        .run(&config, full(vec![score(1, Value::Float(4.0))]), RunOptions::at(day(2)))
        .await
        .unwrap();
    assert_eq!((result.unchanged, result.updated), (1, 0));
    assert_eq!(store.history_writes(), 1);
}

#[tokio::test]
async fn test_value_the_stored_column_would_alter_fails_the_run() {
    let (store, coordinator) = setup();
    let config = scores_config();

    coordinator
        .run(
            &config,
            full(vec![score(1, Value::Int(4)), score(2, Value::Int(7))]),
            RunOptions::at(day(1)),
        )
        .await
        .unwrap();
    let before = stored_scores(store.as_ref(), "snap_scores").await;
    assert_eq!(before[0]["t"], Value::from("BIGINT"));

    let err = coordinator
        .run(
            &config,
            full(vec![score(1, Value::Int(4)), score(2, Value::Float(3.5))]),
            RunOptions::at(day(2)),
        )
        .await
        .unwrap_err();
    match err {
        EngineError::ColumnTypeMismatch {
            column, row_index, ..
        } => {
            assert_eq!(column, "score");
            assert_eq!(row_index, 1);
        }
        other => panic!("expected column type mismatch, got {other}"),
    }
    assert_eq!(store.history_writes(), 1);
    assert_eq!(store.current_writes(), 1);
    assert_eq!(stored_scores(store.as_ref(), "snap_scores").await, before);

    // An integral float still fits the integer column
    let result = coordinator
        .run(
            &config,
            full(vec![score(1, Value::Int(4)), score(2, Value::Float(5.0))]),
            RunOptions::at(day(3)),
        )
        .await
        .unwrap();
    assert_eq!(result.updated, 1);
    let after = stored_scores(store.as_ref(), "snap_scores_current").await;
    assert_eq!(after[1]["score"], Value::Int(5));
}

// ── Store failures and recovery ────────────────────────────────────────

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::None);
    store.fail_history_writes(2);
    store.fail_current_writes(1);

    let result = coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1)))
        .await
        .unwrap();
    assert_eq!(result.inserted, 1);
    assert_eq!(store.history_writes(), 3);
    assert_eq!(store.current_writes(), 2);
    assert_eq!(current_rows(store.as_ref()).await.len(), 1);
}

#[tokio::test]
async fn test_retry_exhaustion_surfaces_attempt_count() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::None);
    store.fail_history_writes(10);

    let err = coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TransientStore { attempts: 3, .. }));
    assert!(history_rows(store.as_ref()).await.is_empty());
    assert!(current_rows(store.as_ref()).await.is_empty());
}

#[tokio::test]
async fn test_interrupted_run_is_repaired_on_retry() {
    let (store, coordinator) = setup();
    let config = users_config(DeletionPolicy::Close);
    coordinator
        .run(
            &config,
            full(vec![user(1, "ann", "gold"), user(2, "bob", "silver")]),
            RunOptions::at(day(1)),
        )
        .await
        .unwrap();

    let batch = || full(vec![user(1, "ann", "platinum"), user(3, "cyd", "gold")]);
    store.break_current_writes(true);
    let err = coordinator
        .run(&config, batch(), RunOptions::at(day(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    // History committed, current state did not
    assert_eq!(current_ids(store.as_ref()).await, vec![1, 3]);
    assert_eq!(current_rows(store.as_ref()).await[0]["tier"], Value::from("gold"));

    store.break_current_writes(false);
    let retry = coordinator
        .run(&config, batch(), RunOptions::at(day(2)))
        .await
        .unwrap();
    assert_eq!(retry.unchanged, 2);
    assert_eq!(retry.repaired, 3);

    let current = current_rows(store.as_ref()).await;
    let ids: Vec<&Value> = current.iter().map(|r| &r["id"]).collect();
    assert_eq!(ids, vec![&Value::Int(1), &Value::Int(3)]);
    assert_eq!(current[0]["tier"], Value::from("platinum"));
    assert!(store.check_history(SNAPSHOT).await.unwrap().is_empty());

    let settled = coordinator
        .run(&config, batch(), RunOptions::at(day(3)))
        .await
        .unwrap();
    assert!(settled.is_noop());
}

// ── Writer claims ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_overlapping_writer_is_refused() {
    let store = Arc::new(FlakyStore::new());
    let registry = ClaimRegistry::new();
    let coordinator = RunCoordinator::with_claims(store.clone(), registry.clone());
    let config = users_config(DeletionPolicy::None);
    let ann = config.keyer().surrogate_key(&user(1, "", "")).unwrap();

    let held = registry.claim(&[CURRENT], &[ann.clone()]).unwrap();
    let err = coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1)))
        .await
        .unwrap_err();
    match err {
        EngineError::WriterConflict { target, surrogate_key } => {
            assert_eq!(target, CURRENT);
            assert_eq!(surrogate_key, ann);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!store.relation_exists(SNAPSHOT).await.unwrap());

    drop(held);
    coordinator
        .run(&config, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1)))
        .await
        .unwrap();
    assert_eq!(registry.claimed_count(SNAPSHOT), 0);
}

#[tokio::test]
async fn test_disjoint_snapshots_run_concurrently() {
    let store = Arc::new(FlakyStore::new());
    let registry = ClaimRegistry::new();
    let first = RunCoordinator::with_claims(store.clone(), registry.clone());
    let second = RunCoordinator::with_claims(store.clone(), registry.clone());

    let users = users_config(DeletionPolicy::None);
    let mut admins = users_config(DeletionPolicy::None);
    admins.name = "snap_admins".to_string();

    let (a, b) = tokio::join!(
        first.run(&users, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1))),
        second.run(&admins, full(vec![user(1, "ann", "gold")]), RunOptions::at(day(1))),
    );
    assert_eq!(a.unwrap().inserted, 1);
    assert_eq!(b.unwrap().inserted, 1);
    assert_eq!(registry.claimed_count("snap_admins"), 0);
}
