//! Terminal integration for the reconciliation engine

use anyhow::Result;
use atlaskit::ProvisioningStatus;
use colored::Colorize;
use declarative::{
    Action, ChangeOperation, ConfirmCallback, PhaseKind, ProgressCallback, ReconcileStatus,
    ReconciliationResult, ResourceId, RunReport, SkipReason,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Mutex, MutexGuard};

use crate::ui;

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Progress bar per phase, one line per finished resource
pub struct BarProgress {
    bar: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            quiet,
        }
    }

    fn current(&self) -> Option<ProgressBar> {
        lock(&self.bar).clone()
    }

    fn new_bar(&self, len: u64) -> ProgressBar {
        if self.quiet {
            return ProgressBar::with_draw_target(Some(len), ProgressDrawTarget::hidden());
        }
        let pb = ProgressBar::new(len);
        match ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            Ok(style) => pb.set_style(style.progress_chars("=>-")),
            Err(e) => log::debug!("Progress template rejected: {e}"),
        }
        pb
    }
}

impl ProgressCallback for BarProgress {
    fn on_phase_start(&self, phase: PhaseKind, count: usize) {
        if !self.quiet {
            println!();
            println!(
                "  {} {} ({})...",
                "→".cyan(),
                phase.label(),
                ui::plural(count, "resource")
            );
        }
        let pb = self.new_bar(count as u64);
        *lock(&self.bar) = Some(pb);
    }

    fn on_resource_start(&self, op: &ChangeOperation) {
        log::info!("{}: {}", op.action(), op.target);
        if let Some(pb) = self.current() {
            pb.set_message(ui::truncate(&op.description, 40));
        }
    }

    fn on_status(&self, id: &ResourceId, status: ProvisioningStatus) {
        log::debug!("{id} is {status}");
        if let Some(pb) = self.current() {
            pb.set_message(ui::truncate(&format!("{} is {status}", id.name), 40));
        }
    }

    fn on_resource_complete(&self, result: &ReconciliationResult) {
        let line = result_line(result);
        match self.current() {
            Some(pb) => {
                if !self.quiet || result.status.is_failed() {
                    pb.suspend(|| println!("{line}"));
                }
                pb.inc(1);
            }
            None => println!("{line}"),
        }
    }

    fn on_phase_complete(&self, _phase: PhaseKind) {
        if let Some(pb) = lock(&self.bar).take() {
            pb.finish_and_clear();
        }
    }
}

/// Interactive confirmation
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        use dialoguer::Confirm;

        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()?;

        Ok(confirmed)
    }
}

/// One line describing a finished resource
fn result_line(result: &ReconciliationResult) -> String {
    let verb = match result.action {
        Action::Create => "created",
        Action::Update => "updated",
        Action::Delete => "deleted",
        Action::NoOp => "unchanged",
        Action::Defer => "settled",
        Action::Fetch => "read",
    };

    match &result.status {
        ReconcileStatus::Converged => {
            let fields = if result.changed_fields.is_empty() {
                String::new()
            } else {
                format!(" ({})", result.changed_fields.join(", "))
            };
            format!("  {} {} {verb}{}", "✓".green(), result.id, fields.dimmed())
        }
        ReconcileStatus::Failed { reason } => format!(
            "  {} {} {} failed: {}",
            "✗".red(),
            result.id,
            result.action,
            reason.to_string().red()
        ),
        ReconcileStatus::Skipped { reason } => {
            format!("  {} {} skipped ({reason})", "–".dimmed(), result.id)
        }
    }
}

/// Print the outcome of a run
pub fn print_summary(report: &RunReport, dry_run: bool) {
    let summary = report.summary();
    println!();
    if dry_run {
        println!("  {} Dry run - no changes made", "ℹ".blue());
    } else if summary.is_success() {
        println!("  {} Atlas matches the playbook", "✓".green().bold());
    } else {
        println!("  {} Reconciliation finished with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} created", ui::plural(summary.created, "resource"));
    }
    if summary.modified > 0 {
        println!("    • {} modified", ui::plural(summary.modified, "resource"));
    }
    if summary.removed > 0 {
        println!("    • {} removed", ui::plural(summary.removed, "resource"));
    }
    if summary.no_change > 0 {
        println!("    • {} unchanged", ui::plural(summary.no_change, "resource"));
    }
    if summary.skipped > 0 {
        let declined = report.results.iter().any(|r| {
            r.status
                == ReconcileStatus::Skipped {
                    reason: SkipReason::Declined,
                }
        });
        let note = if declined { " (declined)" } else { "" };
        println!(
            "    • {} skipped{note}",
            ui::plural(summary.skipped, "resource")
        );
    }
    if summary.failed > 0 {
        let noun = if summary.failed == 1 {
            "resource"
        } else {
            "resources"
        };
        println!("    • {} {} failed", summary.failed, noun.red());
        for result in report.results.iter().filter(|r| r.status.is_failed()) {
            println!("{}", result_line(result));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
