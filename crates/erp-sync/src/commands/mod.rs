use anyhow::{Context, Result};
use erp_sync_app::{ClientConfig, MutationOp, OptimisticEffect, QueryClient};
use erp_sync_core::{CacheKey, Entity, PlanningSchedule, RecordId, ReportSchedule};
use erp_sync_transport::RestClient;
use serde::Serialize;
use tracing::info;

use crate::{Command, Resource};

mod simulate;

/// What to do with one resource.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    List { search: Option<String> },
    Show { id: i64 },
    Create { json: String },
    Update { id: i64, json: String },
    Delete { id: i64 },
}

pub async fn run(command: Command, config: &ClientConfig) -> Result<()> {
    let (resource, action) = match command {
        Command::Simulate { scenario } => {
            return simulate::run(scenario, config.cache_options()).await;
        }
        Command::List { resource, search } => (resource, Action::List { search }),
        Command::Show { resource, id } => (resource, Action::Show { id }),
        Command::Create { resource, json } => (resource, Action::Create { json }),
        Command::Update { resource, id, json } => (resource, Action::Update { id, json }),
        Command::Delete { resource, id } => (resource, Action::Delete { id }),
    };
    match resource {
        Resource::PlanningSchedules => execute::<PlanningSchedule>(action, config).await,
        Resource::Schedules => execute::<ReportSchedule>(action, config).await,
    }
}

fn connect<E: Entity>(config: &ClientConfig) -> Result<QueryClient<E>> {
    let rest = RestClient::new(&config.backend.base_url, config.backend.timeout())
        .context("failed to set up REST client")?;
    let endpoint = config.endpoint_for::<E>()?;
    info!(base_url = rest.base_url(), endpoint, resource = E::RESOURCE, "Connecting");
    Ok(QueryClient::new(rest.resource::<E>(endpoint), config.cache_options()))
}

async fn execute<E: Entity>(action: Action, config: &ClientConfig) -> Result<()> {
    let client = connect::<E>(config)?;
    let keys = client.keys();
    match action {
        Action::List { search } => {
            let key = keys.list(search.as_deref().unwrap_or(""));
            print_read(&client, &key).await
        }
        Action::Show { id } => print_read(&client, &keys.detail(RecordId::Assigned(id))).await,
        Action::Create { json } => {
            let payload: E = serde_json::from_str(&json).context("invalid record JSON")?;
            mutate(&client, &keys.list(""), MutationOp::create(payload)).await
        }
        Action::Update { id, json } => {
            let patch: E::Patch = serde_json::from_str(&json).context("invalid patch JSON")?;
            mutate(&client, &keys.list(""), MutationOp::update(RecordId::Assigned(id), patch)).await
        }
        Action::Delete { id } => {
            mutate(&client, &keys.list(""), MutationOp::delete(RecordId::Assigned(id))).await
        }
    }
}

async fn print_read<E: Entity>(client: &QueryClient<E>, key: &CacheKey) -> Result<()> {
    let value = client
        .read(key)
        .await
        .with_context(|| format!("failed to read {key}"))?;
    print_json(&value)
}

async fn mutate<E: Entity>(client: &QueryClient<E>, key: &CacheKey, op: MutationOp<E>) -> Result<()> {
    // Load the list first so the optimistic step has something to rewrite.
    client
        .read(key)
        .await
        .with_context(|| format!("failed to read {key}"))?;
    let kind = op.kind();
    let outcome = client
        .mutation(key)
        .mutate(op)
        .await
        .with_context(|| format!("{kind} on {} failed", E::RESOURCE))?;
    if outcome.effect == OptimisticEffect::NoOp {
        info!(%kind, %key, "Cached list had nothing to rewrite");
    }
    print_json(&outcome.response)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
