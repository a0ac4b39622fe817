use std::path::Path;

use selah_core::sync::{DrainReport, HttpRemoteStore};
use selah_core::{Library, RemoteConfig, SyncSettings};

use crate::commands::common::short_id;
use crate::error::CliError;

pub async fn run_sync(db_path: &Path, user_id: &str, as_json: bool) -> Result<(), CliError> {
    let remote_config = RemoteConfig::from_env()?.ok_or(CliError::RemoteNotConfigured)?;
    let settings = SyncSettings::from_env()?;
    let remote = HttpRemoteStore::new(&remote_config, settings.request_timeout)?;

    let library = Library::open(db_path, user_id, remote, settings)?;
    let result = library.force_sync().await;
    library.shutdown().await;
    let report = result?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }

    Ok(())
}

pub fn format_report_lines(report: &DrainReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync finished: {} sent, {} retrying, {} need attention, {} still queued",
        report.confirmed, report.retried, report.parked, report.remaining
    )];

    if report.stopped_offline {
        lines.push("Remote unreachable; remaining changes will go out on the next sync".into());
    }
    if let Some(reason) = &report.aborted {
        lines.push(format!("Sync aborted: {reason}"));
    }
    for failure in &report.failures {
        lines.push(format!(
            "  {} {}  {}  {}",
            failure.entity_type,
            short_id(&failure.entity_id),
            failure.kind,
            failure.message
        ));
    }

    lines
}
