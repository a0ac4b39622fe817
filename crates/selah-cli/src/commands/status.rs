use std::path::Path;

use selah_core::models::QueueSummary;
use selah_core::services::StatusCount;
use selah_core::SyncOperation;
use serde::Serialize;

use crate::commands::common::{format_timestamp, open_store, short_id};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub queue: QueueSummary,
    pub statuses: Vec<StatusCount>,
    pub needs_attention: Vec<SyncOperation>,
}

pub async fn run_status(db_path: &Path, as_json: bool) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let report = StatusReport {
        queue: store.queue_summary().await?,
        statuses: store.status_counts().await?,
        needs_attention: store.parked_operations().await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }

    Ok(())
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let queue = &report.queue;
    let mut lines = vec![format!(
        "Queue: {} queued ({} ready, {} backing off, {} in flight, {} need attention)",
        queue.total, queue.ready, queue.backing_off, queue.in_flight, queue.parked
    )];

    for count in &report.statuses {
        lines.push(format!(
            "  {:<10}  {:<8}  {}",
            count.entity_type.collection(),
            count.status.as_str(),
            count.count
        ));
    }

    if !report.needs_attention.is_empty() {
        lines.push("Needs attention (use `selah retry` or `selah discard`):".into());
        for operation in &report.needs_attention {
            let failure = operation
                .failure
                .map_or_else(|| "failed".to_string(), |kind| kind.to_string());
            lines.push(format!(
                "  {} {}  {}  {}  {} attempt(s), queued {}  {}",
                operation.entity_type,
                short_id(&operation.entity_id),
                operation.kind,
                failure,
                operation.attempts,
                format_timestamp(operation.created_at),
                operation.last_error.as_deref().unwrap_or_default()
            ));
        }
    }

    lines
}
