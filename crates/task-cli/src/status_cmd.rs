//! `task-cli status`: per-type pending/processing counts.
//!
//! Useful for an operator confirming that tasks left `processing` by a
//! crash get re-claimed -- every such row shows up here until the next
//! dispatch pass picks it back up.

use anyhow::{Context, Result};
use sqlx::PgPool;

struct TypeCounts {
    task_type: String,
    pending: i64,
    processing: i64,
    success: i64,
    failed: i64,
    cancelled: i64,
}

pub async fn run_status(pool: &PgPool) -> Result<()> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT task_type, status, COUNT(*) FROM tasks GROUP BY task_type, status ORDER BY task_type, status",
    )
    .fetch_all(pool)
    .await
    .context("failed to query task status counts")?;

    if rows.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    let mut by_type: Vec<TypeCounts> = Vec::new();
    for (task_type, status, count) in rows {
        let entry = match by_type.iter_mut().find(|t| t.task_type == task_type) {
            Some(e) => e,
            None => {
                by_type.push(TypeCounts {
                    task_type: task_type.clone(),
                    pending: 0,
                    processing: 0,
                    success: 0,
                    failed: 0,
                    cancelled: 0,
                });
                by_type.last_mut().unwrap()
            }
        };
        match status.as_str() {
            "pending" => entry.pending = count,
            "processing" => entry.processing = count,
            "success" => entry.success = count,
            "failed" => entry.failed = count,
            "cancelled" => entry.cancelled = count,
            _ => {}
        }
    }

    println!(
        "{:<30} {:>10} {:>12} {:>10} {:>10} {:>10}",
        "TYPE", "PENDING", "PROCESSING", "SUCCESS", "FAILED", "CANCELLED"
    );
    println!("{}", "-".repeat(86));
    for t in &by_type {
        println!(
            "{:<30} {:>10} {:>12} {:>10} {:>10} {:>10}",
            t.task_type, t.pending, t.processing, t.success, t.failed, t.cancelled
        );
    }

    Ok(())
}
