mod config;
mod control_cmd;
mod serve_cmd;
mod status_cmd;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::PgPool;

use config::ResolvedConfig;
use task_engine::{Engine, EngineConfig, InProcessWorkerAdapter};

#[derive(Parser)]
#[command(name = "task-cli", about = "Operator CLI for the background-task connector")]
struct Cli {
    /// Database URL (overrides BACKGROUND_TASK_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a task-cli config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/background_task")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the database (create-if-absent + migrate)
    DbInit,
    /// Create a task
    Create {
        /// Handler selector (task type)
        task_type: String,
        /// JSON payload (optional)
        #[arg(long)]
        payload: Option<String>,
        /// Number of retries (>= 1); omit for unlimited
        #[arg(long)]
        retry_count: Option<i32>,
        /// Delay between retries in ms (>= 1)
        #[arg(long)]
        retry_interval_ms: Option<i64>,
        /// Retention window in ms; -1 = forever, 0 = remove on terminal
        #[arg(long)]
        retain_for_ms: Option<i64>,
    },
    /// Fetch a single task by URN
    Get {
        /// Task URN (`background-task:entity-storage:<hex>`)
        urn: String,
    },
    /// Re-surface a pending task at the head of the next dispatch pass
    Retry {
        urn: String,
    },
    /// Cancel a pending task
    Cancel {
        urn: String,
    },
    /// Unconditionally remove a task record
    Remove {
        urn: String,
    },
    /// List tasks by type/status
    Query {
        #[arg(long = "type")]
        task_type: Option<String>,
        /// May be repeated; OR'd together
        #[arg(long)]
        status: Vec<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value_t = 0)]
        page_size: i64,
    },
    /// Show per-type pending/processing/terminal counts
    Status,
    /// Launch the read-mostly HTTP dashboard
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

async fn build_pool(cli_db_url: Option<&str>) -> anyhow::Result<PgPool> {
    let resolved = ResolvedConfig::resolve(cli_db_url);
    task_store::pool::create_pool(&resolved.db_config).await
}

/// Construct an engine suitable for operator commands: no handlers are
/// registered (handler wiring is the embedding application's job) and the
/// engine is never started -- a one-shot CLI invocation has no business
/// running a dispatch loop of its own.
fn build_engine(pool: PgPool) -> anyhow::Result<Engine> {
    let worker = Arc::new(InProcessWorkerAdapter::new());
    Engine::new(pool, worker, EngineConfig::default())
        .map_err(|errors| anyhow::anyhow!("invalid engine configuration: {errors:?}"))
}

fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `task-cli db-init` to create and migrate the database.");
    Ok(())
}

async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = ResolvedConfig::resolve(cli_db_url);

    println!("Initializing task-engine database...");
    task_store::pool::ensure_database_exists(&resolved.db_config).await?;

    let pool = task_store::pool::create_pool(&resolved.db_config).await?;
    let migrations_path = task_store::pool::default_migrations_path();
    task_store::pool::run_migrations(&pool, migrations_path).await?;

    let counts = task_store::pool::table_counts(&pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    pool.close().await;
    println!("task-cli db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Create {
            task_type,
            payload,
            retry_count,
            retry_interval_ms,
            retain_for_ms,
        } => {
            let pool = build_pool(cli.database_url.as_deref()).await?;
            let engine = build_engine(pool.clone())?;
            let result = control_cmd::run_create(
                &engine,
                &task_type,
                payload.as_deref(),
                retry_count,
                retry_interval_ms,
                retain_for_ms,
            )
            .await;
            pool.close().await;
            result?;
        }
        Commands::Get { urn } => {
            let pool = build_pool(cli.database_url.as_deref()).await?;
            let engine = build_engine(pool.clone())?;
            let result = control_cmd::run_get(&engine, &urn).await;
            pool.close().await;
            result?;
        }
        Commands::Retry { urn } => {
            let pool = build_pool(cli.database_url.as_deref()).await?;
            let engine = build_engine(pool.clone())?;
            let result = control_cmd::run_retry(&engine, &urn).await;
            pool.close().await;
            result?;
        }
        Commands::Cancel { urn } => {
            let pool = build_pool(cli.database_url.as_deref()).await?;
            let engine = build_engine(pool.clone())?;
            let result = control_cmd::run_cancel(&engine, &urn).await;
            pool.close().await;
            result?;
        }
        Commands::Remove { urn } => {
            let pool = build_pool(cli.database_url.as_deref()).await?;
            let engine = build_engine(pool.clone())?;
            let result = control_cmd::run_remove(&engine, &urn).await;
            pool.close().await;
            result?;
        }
        Commands::Query {
            task_type,
            status,
            sort,
            desc,
            cursor,
            page_size,
        } => {
            let pool = build_pool(cli.database_url.as_deref()).await?;
            let engine = build_engine(pool.clone())?;
            let result =
                control_cmd::run_query(&engine, task_type, status, sort, desc, cursor, page_size)
                    .await;
            pool.close().await;
            result?;
        }
        Commands::Status => {
            let pool = build_pool(cli.database_url.as_deref()).await?;
            let result = status_cmd::run_status(&pool).await;
            pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let pool = build_pool(cli.database_url.as_deref()).await?;
            let engine = build_engine(pool)
                .context("failed to construct engine for serve")?;
            serve_cmd::run_serve(engine, &bind, port).await?;
        }
    }

    Ok(())
}
