//! `otadl status` – show recorded jobs and resume offsets.

use anyhow::Result;
use otadl_core::progress::{format_bytes, percent};
use otadl_core::state_db::StateDb;
use otadl_core::ArtifactDescriptor;

/// Read-only view of the state database; does not start the engine.
pub async fn run_status() -> Result<()> {
    let db = StateDb::open_default().await?;
    let jobs = db.list_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs in database.");
        return Ok(());
    }

    println!("{:<24} {:<6} {:<10} {}", "JOB", "RUN", "STATE", "DETAIL");
    for j in &jobs {
        let detail = match &j.output {
            Some(out) => failure_detail(out.failure_type.map(|f| f.as_str()), out.http_code),
            None => j
                .input
                .as_deref()
                .and_then(|s| serde_json::from_str::<ArtifactDescriptor>(s).ok())
                .map(|d| format!("{} ({})", d.filename(), format_bytes(d.size_bytes())))
                .unwrap_or_default(),
        };
        println!("{:<24} {:<6} {:<10} {}", j.key, j.run_id, j.state.as_str(), detail);
    }

    for (artifact, t) in db.list_transfers().await? {
        let pct = percent(t.bytes_done(), t.total_bytes())
            .map(|p| format!("{p}%"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "offset {}: {} / {} ({})",
            artifact,
            format_bytes(t.bytes_done()),
            format_bytes(t.total_bytes()),
            pct
        );
    }
    Ok(())
}

fn failure_detail(failure: Option<&str>, http_code: Option<u32>) -> String {
    match (failure, http_code) {
        (Some(f), Some(code)) => format!("{f} (http {code})"),
        (Some(f), None) => f.to_string(),
        (None, Some(code)) => format!("http {code}"),
        (None, None) => "checksum mismatch".to_string(),
    }
}
