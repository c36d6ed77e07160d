//! Console and JSON rendering of plans and run reports.

use std::path::Path;

use chrono::{DateTime, Utc};
use stagger_runtime::{CleanupStep, ResourceStatus, RunReport};
use stagger_store::StoreRecord;

pub fn print_report(report: &RunReport) {
    println!("=== Stagger Run Report ===");
    println!();
    println!("Run:                {}", report.run_id);
    println!("Started:            {}", report.started_at);
    println!("Budget ends:        {}", report.stop_at);
    println!("Finished:           {}", report.finished_at);
    println!("Budget exhausted:   {}", if report.timed_out { "YES" } else { "NO" });
    println!("Restored:           {}", report.count(ResourceStatus::Restored));
    println!("Force-restored:     {}", report.count(ResourceStatus::ForceRestored));
    println!("Restore failed:     {}", report.count(ResourceStatus::RestoreFailed));
    println!("Skipped:            {}", report.count(ResourceStatus::Skipped));

    if !report.resources.is_empty() {
        println!();
        println!("Resources:");
        for r in &report.resources {
            let final_capacity = r
                .final_capacity
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".into());
            println!(
                "  - {:<32} {:>10} -> {:>10}  final {:>10}  {:?} ({} failed attempts)",
                r.resource_id, r.original_capacity, r.lowered_capacity, final_capacity, r.status, r.attempts
            );
        }
    }

    let resolved = report.errors.iter().filter(|e| e.resolved).count();
    if resolved > 0 {
        println!();
        println!("Resolved errors:    {}", resolved);
    }

    if let Some(summary) = &report.summary {
        println!();
        println!("Errors:");
        for line in summary.lines() {
            println!("  - {}", line);
        }
    }

    println!();
    if report.has_unresolved_errors() {
        println!("Status: RUN FAILED");
    } else {
        println!("Status: OK");
    }
}

pub fn print_plan(steps: &[CleanupStep], start: DateTime<Utc>) {
    println!("=== Stagger Plan ===");
    println!();
    if steps.is_empty() {
        println!("No eligible resources.");
        return;
    }
    for step in steps {
        println!(
            "  +{:>4} min  {:<32} lower to {}",
            (step.scheduled_at - start).num_minutes(),
            step.resource_id,
            step.target_capacity
        );
    }
}

pub fn print_stores(stores: &[StoreRecord]) {
    if stores.is_empty() {
        println!("No stores in catalog.");
        return;
    }
    for store in stores {
        println!(
            "  {:<32} {:>10} MB  {}",
            store.name,
            store.max_capacity_mb,
            if store.is_eligible() { "eligible" } else { "skipped" }
        );
    }
}

/// Write the report as pretty JSON, replacing any previous one.
pub fn write_report(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagger_core::RunConfig;
    use stagger_runtime::ResourceReport;

    #[test]
    fn test_write_report() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("last-run.json");
        let now = Utc::now();
        let report = RunReport {
            run_id: uuid::Uuid::nil(),
            config: RunConfig::default(),
            started_at: now,
            stop_at: now,
            finished_at: now,
            timed_out: false,
            resources: vec![ResourceReport {
                resource_id: "sales".into(),
                original_capacity: 2000,
                lowered_capacity: 1000,
                status: ResourceStatus::Restored,
                attempts: 0,
                final_capacity: Some(2000),
            }],
            errors: Vec::new(),
            summary: None,
        };

        write_report(&report, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["resources"][0]["resourceId"], "sales");
        assert_eq!(value["resources"][0]["status"], "restored");
        assert_eq!(value["timedOut"], false);
        assert!(value.get("summary").is_none());
    }
}
