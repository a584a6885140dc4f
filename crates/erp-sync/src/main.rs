//! CLI entry point for erp-sync.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use erp_sync_app::ClientConfig;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;

/// Optimistic cache client for the ERP REST backend.
#[derive(Parser, Debug)]
#[command(
    name = "erp-sync",
    version,
    about = "erp-sync: read and write ERP records through the optimistic cache"
)]
struct Cli {
    /// Directory holding `.erp-sync/config.toml` (defaults to current).
    #[arg(long)]
    workdir: Option<String>,

    /// Override `backend.base_url` from the configuration.
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

/// Resource collections known to the client.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Resource {
    /// Production planning schedules.
    PlanningSchedules,
    /// SQL report schedules.
    Schedules,
}

/// Scripted runs against the in-memory backend.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Scenario {
    /// Update rejected with a server message.
    UpdateFailure,
    /// Create into an empty list, once per create policy.
    CreateEmpty,
    /// Delete refused with a bare 403.
    DeleteForbidden,
    /// Every scenario in turn.
    #[default]
    All,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a list, optionally filtered by a search term.
    List {
        #[arg(value_enum)]
        resource: Resource,
        #[arg(long)]
        search: Option<String>,
    },

    /// Print a single record.
    Show {
        #[arg(value_enum)]
        resource: Resource,
        #[arg(long)]
        id: i64,
    },

    /// Create a record from a JSON object.
    Create {
        #[arg(value_enum)]
        resource: Resource,
        #[arg(long)]
        json: String,
    },

    /// Apply a JSON partial update to a record.
    Update {
        #[arg(value_enum)]
        resource: Resource,
        #[arg(long)]
        id: i64,
        #[arg(long)]
        json: String,
    },

    /// Delete a record.
    Delete {
        #[arg(value_enum)]
        resource: Resource,
        #[arg(long)]
        id: i64,
    },

    /// Replay optimistic mutation scenarios without a backend.
    Simulate {
        #[arg(value_enum, default_value_t)]
        scenario: Scenario,
    },
}

fn main() -> Result<()> {
    let Cli {
        workdir,
        base_url,
        cmd,
    } = Cli::parse();

    install_tracing();

    let workdir = workdir.unwrap_or_else(|| ".".to_owned());
    let mut config = ClientConfig::from_workdir(&workdir)
        .with_context(|| format!("failed to load configuration from {workdir}"))?;
    if let Some(base_url) = base_url {
        config.backend.base_url = base_url;
    }

    tokio::runtime::Runtime::new()?.block_on(commands::run(cmd, &config))
}

fn install_tracing() {
    // RUST_LOG is honoured; INFO otherwise.
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_update_command() {
        let cli = Cli::parse_from([
            "erp-sync",
            "--workdir",
            "/srv/erp",
            "update",
            "planning-schedules",
            "--id",
            "1",
            "--json",
            r#"{"qty":9}"#,
        ]);

        assert_eq!(cli.workdir.as_deref(), Some("/srv/erp"));
        match cli.cmd {
            Command::Update { resource, id, json } => {
                assert_eq!(resource, Resource::PlanningSchedules);
                assert_eq!(id, 1);
                assert_eq!(json, r#"{"qty":9}"#);
            }
            _ => panic!("expected update command"),
        }
    }

    #[test]
    fn parse_list_command_with_search() {
        let cli = Cli::parse_from([
            "erp-sync",
            "--base-url",
            "https://erp.example.com/api",
            "list",
            "schedules",
            "--search",
            "nightly",
        ]);

        assert_eq!(cli.base_url.as_deref(), Some("https://erp.example.com/api"));
        match cli.cmd {
            Command::List { resource, search } => {
                assert_eq!(resource, Resource::Schedules);
                assert_eq!(search.as_deref(), Some("nightly"));
            }
            _ => panic!("expected list command"),
        }
    }

    #[test]
    fn simulate_defaults_to_every_scenario() {
        let cli = Cli::parse_from(["erp-sync", "simulate"]);
        assert!(matches!(
            cli.cmd,
            Command::Simulate {
                scenario: Scenario::All
            }
        ));

        let cli = Cli::parse_from(["erp-sync", "simulate", "delete-forbidden"]);
        assert!(matches!(
            cli.cmd,
            Command::Simulate {
                scenario: Scenario::DeleteForbidden
            }
        ));
    }

    #[test]
    fn delete_requires_an_id() {
        assert!(Cli::try_parse_from(["erp-sync", "delete", "schedules"]).is_err());
    }
}
