//! db-adapters - Main entry point.
//!
//! A thin command line over the adapter layer: resolves one connection,
//! runs one operation and prints the result. Logs go to stderr so dumps and
//! JSON on stdout stay clean.

use db_adapters::adapters::{Adapter, DatabaseAdapter, create_adapter_with};
use db_adapters::config::{Command, Config};
use db_adapters::detect::{DetectTarget, detect_engine};
use db_adapters::models::QueryParam;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Database argument, falling back to the descriptor's. Empty means the
/// session default (SQLite ignores it).
fn database_or_default(database: Option<String>, fallback: Option<&str>) -> String {
    database
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_default()
}

async fn run(
    config: &Config,
    adapter: &mut Adapter,
    default_db: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    match config.command.clone() {
        Command::Test => {
            adapter.test_connection().await?;
            println!("OK ({})", adapter.engine());
        }
        // Needs no connection; main answers it before building the adapter.
        Command::Detect { .. } => {}
        Command::Databases => print_json(&adapter.get_databases().await?)?,
        Command::Tables { database } => {
            let database = database_or_default(database, default_db);
            print_json(&adapter.get_tables(&database).await?)?;
        }
        Command::Columns { table, database } => {
            let database = database_or_default(database, default_db);
            print_json(&adapter.get_columns(&database, &table).await?)?;
        }
        Command::Keys { table, database } => {
            let database = database_or_default(database, default_db);
            let primary = adapter.get_primary_keys(&database, &table).await?;
            let unique = adapter.get_unique_keys(&database, &table).await?;
            print_json(&json!({ "primary_keys": primary, "unique_keys": unique }))?;
        }
        Command::Query { sql, params, database } => {
            let database = database_or_default(database, default_db);
            let params: Vec<QueryParam> = params.iter().map(|p| QueryParam::infer(p)).collect();
            print_json(&adapter.query(&database, &sql, &params).await?)?;
        }
        Command::Run { sql, database } => {
            print_json(&adapter.execute_query(&sql, database.as_deref()).await?)?;
        }
        Command::Export { table, data, database } => {
            let database = database_or_default(database, default_db);
            let dump = match table {
                Some(table) => adapter.export_table(&database, &table, data).await?,
                None => adapter.export_database(&database, data).await?,
            };
            print!("{dump}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    if let Command::Detect { host, port, user, password } = &config.command {
        let target =
            DetectTarget::new(host.clone(), *port).with_credentials(user.clone(), password.clone());
        match detect_engine(&target, &config.adapter_options()).await {
            Some(engine) => println!("{engine}"),
            None => {
                eprintln!("No PostgreSQL or MySQL-protocol server answered at {host}");
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let descriptor = config.resolve_connection()?;
    info!(name = %descriptor.name, engine = %descriptor.engine, "Using connection");
    let mut adapter = create_adapter_with(&descriptor, config.adapter_options())?;

    let result = run(&config, &mut adapter, descriptor.database.as_deref()).await;
    adapter.close().await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
