//! Thin CLI wrappers over the control surface: `create`, `get`, `retry`,
//! `cancel`, `remove`, `query`.

use anyhow::{Context, Result};

use task_engine::{CreateOptions, Engine, QueryOptions};
use task_store::models::{SortDirection, SortProperty, TaskStatus};

pub async fn run_create(
    engine: &Engine,
    task_type: &str,
    payload: Option<&str>,
    retry_count: Option<i32>,
    retry_interval_ms: Option<i64>,
    retain_for_ms: Option<i64>,
) -> Result<()> {
    let payload = payload
        .map(serde_json::from_str)
        .transpose()
        .context("payload must be valid JSON")?;

    let opts = CreateOptions {
        retry_count,
        retry_interval_ms,
        retain_for_ms,
    };

    let urn = engine
        .create(task_type, payload, opts)
        .await
        .context("failed to create task")?;

    println!("{urn}");
    Ok(())
}

pub async fn run_get(engine: &Engine, urn: &str) -> Result<()> {
    match engine.get(urn).await.context("failed to fetch task")? {
        Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
        None => println!("not found"),
    }
    Ok(())
}

pub async fn run_retry(engine: &Engine, urn: &str) -> Result<()> {
    engine.retry(urn).await.context("failed to retry task")?;
    println!("retry requested for {urn}");
    Ok(())
}

pub async fn run_cancel(engine: &Engine, urn: &str) -> Result<()> {
    engine.cancel(urn).await.context("failed to cancel task")?;
    println!("cancel requested for {urn}");
    Ok(())
}

pub async fn run_remove(engine: &Engine, urn: &str) -> Result<()> {
    engine.remove(urn).await.context("failed to remove task")?;
    println!("removed {urn}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run_query(
    engine: &Engine,
    task_type: Option<String>,
    status: Vec<String>,
    sort: Option<String>,
    desc: bool,
    cursor: Option<String>,
    page_size: i64,
) -> Result<()> {
    let status = status
        .iter()
        .map(|s| s.parse::<TaskStatus>().map_err(|e| anyhow::anyhow!(e)))
        .collect::<Result<Vec<_>>>()
        .context("invalid --status value")?;

    let sort_property = match sort.as_deref() {
        Some("dateModified") => SortProperty::DateModified,
        Some("dateCompleted") => SortProperty::DateCompleted,
        Some("status") => SortProperty::Status,
        Some("dateCreated") | None => SortProperty::DateCreated,
        Some(other) => anyhow::bail!("unknown sort property `{other}`"),
    };

    let opts = QueryOptions {
        task_type,
        status,
        sort_property,
        sort_direction: if desc { SortDirection::Desc } else { SortDirection::Asc },
        cursor,
        page_size,
    };

    let (views, next_cursor) = engine.query(opts).await.context("failed to query tasks")?;

    for view in &views {
        println!(
            "{}  {:<12} {:<20} {}",
            view.id, view.status, view.task_type, view.date_created
        );
    }
    if let Some(cursor) = next_cursor {
        println!("-- next cursor: {cursor}");
    }

    Ok(())
}
