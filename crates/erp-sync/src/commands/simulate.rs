//! Scripted optimistic mutations against the in-memory backend.
//!
//! Each script seeds a collection, binds a view, holds the write at the
//! backend gate to show the optimistic value, then lets it through (or fails
//! it) and prints what the view settles on.

use std::sync::Arc;

use anyhow::{Context, Result};
use erp_sync_app::{CacheOptions, MutationOp, OptimisticCreate, QueryBinding, QueryClient, QueryState};
use erp_sync_core::{
    CacheKey, Entity, PlanningSchedule, PlanningSchedulePatch, RecordId, ReportSchedule, ResourceKeys,
    Row, TransportError,
};
use erp_sync_transport::MemoryBackend;

use crate::Scenario;

struct Script<E: Entity> {
    title: String,
    rows: Vec<Row<E>>,
    key: CacheKey,
    op: MutationOp<E>,
    failure: Option<TransportError>,
}

pub async fn run(scenario: Scenario, options: CacheOptions) -> Result<()> {
    match scenario {
        Scenario::UpdateFailure => play(update_failure(), options).await,
        Scenario::CreateEmpty => create_empty(options).await,
        Scenario::DeleteForbidden => play(delete_forbidden(), options).await,
        Scenario::All => {
            play(update_failure(), options).await?;
            create_empty(options).await?;
            play(delete_forbidden(), options).await
        }
    }
}

fn update_failure() -> Script<PlanningSchedule> {
    Script {
        title: "planning schedule update rejected with 500".to_owned(),
        rows: vec![Row::new(RecordId::Assigned(1), PlanningSchedule::new("A1", 5))],
        key: ResourceKeys::of::<PlanningSchedule>().list(""),
        op: MutationOp::update(RecordId::Assigned(1), PlanningSchedulePatch::qty(9)),
        failure: Some(TransportError::rejected_with(
            500,
            "Planned quantity exceeds line capacity",
        )),
    }
}

async fn create_empty(options: CacheOptions) -> Result<()> {
    for policy in [OptimisticCreate::AnyList, OptimisticCreate::NonEmptyList] {
        let script = Script {
            title: format!("create into an empty list ({policy:?})"),
            rows: Vec::new(),
            key: ResourceKeys::of::<PlanningSchedule>().list(""),
            op: MutationOp::create(PlanningSchedule::new("C3", 4)),
            failure: None,
        };
        let options = CacheOptions {
            optimistic_create: policy,
            ..options
        };
        play(script, options).await?;
    }
    Ok(())
}

fn delete_forbidden() -> Script<ReportSchedule> {
    Script {
        title: "report schedule delete refused with 403".to_owned(),
        rows: vec![Row::new(
            RecordId::Assigned(7),
            ReportSchedule::new("Nightly stock", "0 2 * * *"),
        )],
        key: ResourceKeys::of::<ReportSchedule>().all(),
        op: MutationOp::delete(RecordId::Assigned(7)),
        failure: Some(TransportError::rejected(403, None)),
    }
}

async fn play<E: Entity>(script: Script<E>, options: CacheOptions) -> Result<()> {
    let Script {
        title,
        rows,
        key,
        op,
        failure,
    } = script;
    println!("== {title}");

    let backend = Arc::new(MemoryBackend::with_rows(rows));
    let client = QueryClient::new(Arc::clone(&backend), options);
    let mut view = client.query(&key);
    print_state("loaded", &settled(&mut view).await?)?;

    backend.hold_writes();
    if let Some(failure) = failure {
        backend.fail_next_write(failure);
    }
    let task = client.mutation(&key).spawn(op);
    backend.wait_for_writes(1).await;
    print_state("optimistic", view.drain())?;

    backend.release_writes();
    match task.await.context("mutation task panicked")? {
        Ok(outcome) => println!("{:<12}{:?}", "committed", outcome.effect),
        Err(err) => println!("{:<12}{err}", "rolled back"),
    }
    print_state("settled", &settled(&mut view).await?)?;
    println!();
    Ok(())
}

async fn settled<E: Entity>(view: &mut QueryBinding<E>) -> Result<QueryState<E>> {
    view.wait_until(|state| !state.is_fetching && !state.is_stale && state.data.is_some())
        .await
        .cloned()
        .context("cache dropped while waiting for a read")
}

fn print_state<E: Entity>(label: &str, state: &QueryState<E>) -> Result<()> {
    let rows = serde_json::to_string(&state.data).context("failed to render rows")?;
    println!("{label:<12}{rows}");
    Ok(())
}
