//! JSON report of a run (`apply --report <file>`)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{ExecuteSummary, ReconciliationResult, RunReport};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub playbook: String,
    pub dry_run: bool,
    pub success: bool,
    /// Set when the run was interrupted
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub summary: ExecuteSummary,
    pub results: &'a [ReconciliationResult],
}

impl<'a> Report<'a> {
    pub fn new(playbook: &Path, run: &'a RunReport, dry_run: bool, cancelled: bool) -> Self {
        let duration = run.finished_at - run.started_at;
        Self {
            playbook: playbook.display().to_string(),
            dry_run,
            success: run.is_success() && !cancelled,
            cancelled,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            summary: run.summary(),
            results: &run.results,
        }
    }

    /// Write the report as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, content).with_context(|| format!("Could not write {}", path.display()))?;
        log::info!("Report written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{
        Action, FailureReason, ReconcileStatus, ResourceId, SkipReason,
    };
    use tempfile::TempDir;

    fn run() -> RunReport {
        let now = Utc::now();
        RunReport {
            results: vec![
                ReconciliationResult::new(
                    ResourceId::cluster("g1", "test-mongo"),
                    Action::Update,
                    ReconcileStatus::Converged,
                )
                .with_fields(vec!["instance_size".to_string()]),
                ReconciliationResult::new(
                    ResourceId::user("g1", "app"),
                    Action::Create,
                    ReconcileStatus::failed(FailureReason::Blocked {
                        cluster: "test-mongo".to_string(),
                    }),
                ),
                ReconciliationResult::new(
                    ResourceId::user("g1", "same"),
                    Action::NoOp,
                    ReconcileStatus::skipped(SkipReason::NoChange),
                ),
            ],
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_write_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let run = run();

        Report::new(Path::new("site.toml"), &run, false, false)
            .write(&path)
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["playbook"], "site.toml");
        assert_eq!(json["success"], false);
        assert_eq!(json["summary"]["modified"], 1);
        assert_eq!(json["summary"]["failed"], 1);
        assert_eq!(json["summary"]["no_change"], 1);

        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["id"]["name"], "test-mongo");
        assert_eq!(results[0]["status"], "converged");
        assert_eq!(results[0]["changed_fields"][0], "instance_size");
        assert_eq!(results[1]["status"], "failed");
        assert_eq!(results[1]["reason"]["reason"], "blocked");
        assert_eq!(results[1]["reason"]["cluster"], "test-mongo");
        assert_eq!(results[2]["reason"], "no_change");
    }

    #[test]
    fn test_cancelled_run_is_not_success() {
        let mut run = run();
        run.results.truncate(1);
        let report = Report::new(Path::new("site.toml"), &run, false, true);
        assert!(!report.success);
        assert!(report.cancelled);
    }
}
