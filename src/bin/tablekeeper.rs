//! tablekeeper CLI

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tablekeeper::common::{parse_duration, NodeState, ServerName, TableName, TableState};
use tablekeeper::coordinator::{regions_from_splits, EnableTableTask};
use tablekeeper::{Config, Coordinator, EnableOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tablekeeper")]
#[command(about = "Table lifecycle coordinator")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table in the DISABLED state
    CreateTable {
        #[arg(long)]
        table: String,

        /// Split keys (comma-separated)
        #[arg(long, value_delimiter = ',')]
        splits: Vec<String>,
    },

    /// Register a region server
    AddServer {
        /// host:port,start_code
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "alive")]
        state: String,
    },

    /// Enable a table
    Enable {
        #[arg(long)]
        table: String,

        /// Re-drive an interrupted enable
        #[arg(long)]
        recovery: bool,

        /// Give up waiting after this long (e.g. 30s, 5m)
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Show table states as JSON
    State {
        #[arg(long)]
        table: Option<String>,
    },

    /// List a table's regions and their hosts
    Regions {
        #[arg(long)]
        table: String,
    },
}

#[derive(Serialize)]
struct StateRow {
    table: TableName,
    state: Option<TableState>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let coord = Coordinator::open(config).await?;
    let result = run(&coord, cli.command).await;
    coord.shutdown()?;
    result
}

async fn run(coord: &Coordinator, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::CreateTable { table, splits } => {
            let table: TableName = table.parse()?;
            let splits: Vec<Vec<u8>> = splits.into_iter().map(String::into_bytes).collect();
            let region_id = tablekeeper::common::timestamp_now_millis();
            let regions = regions_from_splits(&table, &splits, region_id)?;
            coord.store().create_table(&table, &regions)?;
            println!("Created table {} with {} region(s)", table, regions.len());
        }

        Commands::AddServer { name, state } => {
            let server: ServerName = name.parse()?;
            let state: NodeState = state.parse()?;
            coord.store().register_server(&server, state)?;
            println!("Registered {} ({})", server, state);
        }

        Commands::Enable {
            table,
            recovery,
            timeout,
        } => {
            let table: TableName = table.parse()?;
            let task = if recovery {
                EnableTableTask::recovery(table.clone())
            } else {
                EnableTableTask::new(table.clone())
            };

            let deadline = timeout.as_deref().map(parse_duration).transpose()?;
            let interrupt = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    // No signal handler; only the deadline applies
                    std::future::pending::<()>().await;
                }
            };
            let outcome = coord.enable_within(task, deadline, interrupt).await;

            match outcome? {
                EnableOutcome::Enabled { regions_placed } => {
                    println!("Table {} enabled ({} region(s) placed)", table, regions_placed);
                }
                EnableOutcome::Incomplete { regions_requested } => {
                    println!(
                        "Table {} is still ENABLING: placement of {} region(s) did not complete",
                        table, regions_requested
                    );
                    println!("Re-run with --recovery to retry");
                }
            }
        }

        Commands::State { table } => {
            let rows: Vec<StateRow> = match table {
                Some(table) => {
                    let table: TableName = table.parse()?;
                    let state = coord.store().get_table_state(&table)?;
                    vec![StateRow { table, state }]
                }
                None => coord
                    .store()
                    .list_table_states()?
                    .into_iter()
                    .map(|(table, state)| StateRow {
                        table,
                        state: Some(state),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }

        Commands::Regions { table } => {
            let table: TableName = table.parse()?;
            if coord.store().get_table(&table)?.is_none() {
                anyhow::bail!("table {} not found", table);
            }
            for record in coord.store().list_regions(&table)? {
                let host = record
                    .location
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}  {}", record.region.region_name(), host);
            }
        }
    }

    Ok(())
}
