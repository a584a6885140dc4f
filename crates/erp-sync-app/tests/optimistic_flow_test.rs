//! End-to-end optimistic mutation flows against the in-memory backend.
//!
//! Each test binds a view, holds the backend write at its gate to observe the
//! optimistic window, then releases it and checks the settled cache.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::redundant_clone)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use erp_sync_app::{
    CacheEntry, CacheOptions, ChannelNotifier, DEFAULT_FAILURE_MESSAGE, EntryStatus, MutationError,
    MutationOp, OptimisticCreate, OptimisticEffect, QueryBinding, QueryClient, QueryState,
    SettleOutcome, Subscription,
};
use erp_sync_core::{
    CacheKey, CacheValue, PlanningSchedule, PlanningSchedulePatch, RecordId, ReportSchedule, Row,
    TransportError,
};
use erp_sync_transport::{MemoryBackend, WriteCall};

fn planning_backend(rows: &[(i64, i64)]) -> Arc<MemoryBackend<PlanningSchedule>> {
    Arc::new(MemoryBackend::with_rows(rows.iter().map(|(id, qty)| {
        Row::new(RecordId::Assigned(*id), PlanningSchedule::new("A1", *qty))
    })))
}

fn quantities(state: &QueryState<PlanningSchedule>) -> Vec<i64> {
    state
        .data
        .iter()
        .flat_map(CacheValue::rows)
        .map(|row| row.data.qty)
        .collect()
}

async fn settled<E: erp_sync_core::Entity>(view: &mut QueryBinding<E>) -> QueryState<E> {
    view.wait_until(|state| !state.is_fetching && !state.is_stale && state.data.is_some())
        .await
        .expect("store alive")
        .clone()
}

type History = Arc<Mutex<Vec<CacheEntry<PlanningSchedule>>>>;

/// Record every entry delivered for `key`.
fn record(client: &QueryClient<PlanningSchedule>, key: &CacheKey) -> (History, Subscription) {
    let history = History::default();
    let sink = Arc::clone(&history);
    let (_, subscription) = client
        .store()
        .subscribe(key, move |entry: &CacheEntry<PlanningSchedule>| {
            sink.lock().unwrap().push(entry.clone());
        });
    (history, subscription)
}

#[tokio::test]
async fn failed_update_is_visible_then_rolled_back() {
    let backend = planning_backend(&[(1, 5)]);
    let client = QueryClient::new(Arc::clone(&backend), CacheOptions::default());
    let key = client.keys().list("");
    let mut view = client.query(&key);
    assert_eq!(quantities(&settled(&mut view).await), vec![5]);

    backend.hold_writes();
    backend.fail_next_write(TransportError::rejected_with(500, "capacity exceeded for line A1"));
    let task = client
        .mutation(&key)
        .spawn(MutationOp::update(RecordId::Assigned(1), PlanningSchedulePatch::qty(9)));
    backend.wait_for_writes(1).await;
    assert_eq!(quantities(view.drain()), vec![9]);

    backend.release_writes();
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.to_string(), "capacity exceeded for line A1");

    assert_eq!(quantities(&settled(&mut view).await), vec![5]);
    assert_eq!(backend.rows()[0].data.qty, 5);
}

#[tokio::test]
async fn rollback_restores_the_exact_snapshot() {
    let backend = planning_backend(&[(1, 5), (2, 6)]);
    let client = QueryClient::new(Arc::clone(&backend), CacheOptions::default());
    let key = client.keys().list("");
    let mut view = client.query(&key);
    settled(&mut view).await;
    let before = client.store().get(&key).unwrap();

    let (history, subscription) = record(&client, &key);
    backend.fail_next_write(TransportError::network("connection reset"));
    let err = client
        .mutation(&key)
        .mutate(MutationOp::update(RecordId::Assigned(2), PlanningSchedulePatch::qty(60)))
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::NetworkFailure { .. }));
    assert_eq!(err.to_string(), DEFAULT_FAILURE_MESSAGE);
    subscription.unsubscribe();

    let history = history.lock().unwrap().clone();
    assert!(history.len() >= 2, "expected optimistic write and rollback");
    assert_eq!(
        history[0].value.as_ref().and_then(|value| value.find(RecordId::Assigned(2))).map(|row| row.data.qty),
        Some(60)
    );
    let restored = &history[1];
    assert_eq!(restored.value, before.value);
    assert_eq!(restored.status, before.status);
    assert_eq!(restored.last_updated_at, before.last_updated_at);
}

#[tokio::test]
async fn optimistic_create_prepends_a_temporary_row() {
    let backend = planning_backend(&[(1, 5)]);
    let client = QueryClient::new(Arc::clone(&backend), CacheOptions::default());
    let key = client.keys().list("");
    let mut view = client.query(&key);
    settled(&mut view).await;

    backend.hold_writes();
    let task = client
        .mutation(&key)
        .spawn(MutationOp::create(PlanningSchedule::new("B2", 3)));
    backend.wait_for_writes(1).await;
    let state = view.drain().clone();
    let rows: Vec<_> = state.data.iter().flat_map(CacheValue::rows).cloned().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].is_optimistic);
    assert!(rows[0].id.is_temporary());
    assert_eq!(rows[0].data.item_code, "B2");
    assert!(!rows[1].is_optimistic);

    backend.release_writes();
    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.effect, OptimisticEffect::Applied);
    assert_eq!(outcome.temporary_id, Some(rows[0].id));
    assert_eq!(outcome.response["id"], 2);

    let state = settled(&mut view).await;
    let rows: Vec<_> = state.data.iter().flat_map(CacheValue::rows).cloned().collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, RecordId::Assigned(2));
    assert!(rows.iter().all(|row| !row.is_optimistic));
}

#[tokio::test]
async fn create_on_empty_list_prepends_by_default() {
    let backend = planning_backend(&[]);
    let client = QueryClient::new(Arc::clone(&backend), CacheOptions::default());
    let key = client.keys().list("");
    let mut view = client.query(&key);
    assert!(quantities(&settled(&mut view).await).is_empty());

    backend.hold_writes();
    let task = client
        .mutation(&key)
        .spawn(MutationOp::create(PlanningSchedule::new("C3", 4)));
    backend.wait_for_writes(1).await;
    assert_eq!(quantities(view.drain()), vec![4]);

    backend.release_writes();
    assert_eq!(task.await.unwrap().unwrap().effect, OptimisticEffect::Applied);
    let state = settled(&mut view).await;
    assert_eq!(quantities(&state), vec![4]);
    assert!(state.data.iter().flat_map(CacheValue::rows).all(|row| !row.is_optimistic));
}

#[tokio::test]
async fn create_on_empty_list_waits_for_refetch_when_configured() {
    let backend = planning_backend(&[]);
    let options = CacheOptions {
        optimistic_create: OptimisticCreate::NonEmptyList,
        ..CacheOptions::default()
    };
    let client = QueryClient::new(Arc::clone(&backend), options);
    let key = client.keys().list("");
    let mut view = client.query(&key);
    settled(&mut view).await;

    backend.hold_writes();
    let task = client
        .mutation(&key)
        .spawn(MutationOp::create(PlanningSchedule::new("C3", 4)));
    backend.wait_for_writes(1).await;
    assert!(quantities(view.drain()).is_empty());

    backend.release_writes();
    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.effect, OptimisticEffect::NoOp);
    assert_eq!(outcome.temporary_id, None);
    assert_eq!(quantities(&settled(&mut view).await), vec![4]);
}

#[tokio::test]
async fn forbidden_delete_brings_the_row_back() {
    let backend = Arc::new(MemoryBackend::with_rows([Row::new(
        RecordId::Assigned(7),
        ReportSchedule::new("Nightly stock", "0 2 * * *"),
    )]));
    let (notifier, mut notices) = ChannelNotifier::new();
    let client = QueryClient::with_notifier(Arc::clone(&backend), CacheOptions::default(), notifier);
    let key = client.keys().all();
    let mut view = client.query(&key);
    let state = settled(&mut view).await;
    assert!(state.data.as_ref().unwrap().find(RecordId::Assigned(7)).unwrap().data.is_active);

    backend.hold_writes();
    backend.fail_next_write(TransportError::rejected(403, None));
    let task = client.mutation(&key).spawn(MutationOp::delete(RecordId::Assigned(7)));
    backend.wait_for_writes(1).await;
    assert_eq!(view.drain().data.as_ref().map(CacheValue::len), Some(0));

    backend.release_writes();
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(err.to_string(), DEFAULT_FAILURE_MESSAGE);

    let state = settled(&mut view).await;
    assert_eq!(state.data.as_ref().map(CacheValue::len), Some(1));
    assert_eq!(backend.writes(), vec![WriteCall::Delete { id: RecordId::Assigned(7) }]);

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.key, key);
    assert_eq!(
        notice.outcome,
        SettleOutcome::Failed {
            message: DEFAULT_FAILURE_MESSAGE.to_owned()
        }
    );
}

#[tokio::test]
async fn dropped_view_does_not_stop_rollback() {
    let backend = planning_backend(&[(1, 5)]);
    let client = QueryClient::new(Arc::clone(&backend), CacheOptions::default());
    let key = client.keys().list("");
    let mut view = client.query(&key);
    let before = settled(&mut view).await.data;

    backend.hold_writes();
    backend.fail_next_write(TransportError::rejected_with(500, "locked by another user"));
    let task = client
        .mutation(&key)
        .spawn(MutationOp::update(RecordId::Assigned(1), PlanningSchedulePatch::qty(9)));
    backend.wait_for_writes(1).await;
    drop(view);
    backend.release_writes();

    assert!(task.await.unwrap().is_err());
    let entry = client.store().get(&key).unwrap();
    assert_eq!(entry.value, before);
    // Nobody watches the key, so settle leaves it stale without reading.
    assert_eq!(entry.status, EntryStatus::Stale);
    assert!(!entry.is_fetching);
}

#[tokio::test]
async fn timed_out_write_rolls_back() {
    let backend = planning_backend(&[(1, 5)]);
    let client = QueryClient::new(Arc::clone(&backend), CacheOptions::default());
    let key = client.keys().list("");
    let mut view = client.query(&key);
    settled(&mut view).await;

    backend.hold_writes();
    let err = client
        .mutation(&key)
        .with_timeout(Duration::from_millis(50))
        .mutate(MutationOp::update(RecordId::Assigned(1), PlanningSchedulePatch::qty(9)))
        .await
        .unwrap_err();
    let MutationError::NetworkFailure { message, detail, .. } = &err else {
        panic!("timeout should be a network failure: {err:?}");
    };
    assert_eq!(message, DEFAULT_FAILURE_MESSAGE);
    assert!(detail.contains("timed out"));
    assert_eq!(quantities(&settled(&mut view).await), vec![5]);
    backend.release_writes();
}

#[tokio::test]
async fn failed_refetch_keeps_the_committed_value() {
    let backend = planning_backend(&[(1, 5)]);
    let client = QueryClient::new(Arc::clone(&backend), CacheOptions::default());
    let key = client.keys().list("");
    let mut view = client.query(&key);
    settled(&mut view).await;

    backend.fail_next_fetch(TransportError::rejected_with(502, "gateway down"));
    let outcome = client
        .mutation(&key)
        .mutate(MutationOp::update(RecordId::Assigned(1), PlanningSchedulePatch::qty(9)))
        .await;
    assert!(outcome.is_ok());

    let state = view
        .wait_until(|state| state.error.is_some())
        .await
        .unwrap()
        .clone();
    assert_eq!(state.error.as_ref().unwrap().message, "gateway down");
    assert_eq!(quantities(&state), vec![9]);
}

#[tokio::test]
async fn update_of_missing_row_is_a_no_op_until_settle() {
    let backend = planning_backend(&[(1, 5)]);
    let client = QueryClient::new(Arc::clone(&backend), CacheOptions::default());
    let key = client.keys().list("");
    let mut view = client.query(&key);
    settled(&mut view).await;

    let err = client
        .mutation(&key)
        .mutate(MutationOp::update(RecordId::Assigned(42), PlanningSchedulePatch::qty(1)))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(quantities(&settled(&mut view).await), vec![5]);
}
