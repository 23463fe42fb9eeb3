//! `apply` - converge Atlas to the playbook

use anyhow::Result;
use colored::Colorize;
use declarative::{AutoConfirm, ConfirmCallback, DesiredResource, Reconciler, RunReport, declined};

use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{BarProgress, PromptConfirm, display_plan, print_summary};
use crate::paths;
use crate::report::Report;
use crate::settings::Settings;
use crate::signal;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let settings = Settings::load()?.with_overrides(&args)?;
    let session = super::open(ctx, &args.playbook, &settings, args.dry_run)?;
    let reconciler = &session.reconciler;
    signal::cancel_on_interrupt(reconciler.cancel_token());

    if !ctx.quiet {
        ui::header("Atlas Reconcile");
        ui::kv("Playbook", &args.playbook.display().to_string());
        ui::kv("Resources", &session.desired.len().to_string());
        ui::kv("Jobs", &settings.jobs.to_string());
    }

    let mut confirm: Box<dyn ConfirmCallback> = if args.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(PromptConfirm)
    };
    let outcome = apply(
        ctx,
        reconciler,
        &session.desired,
        args.target.as_deref(),
        confirm.as_mut(),
    );
    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            // An aborted run still reports what it did before stopping
            let partial = err
                .downcast_ref::<declarative::Error>()
                .and_then(declarative::Error::partial_report);
            if let Some(report) = partial {
                finish(&args, report, true)?;
            }
            return Err(err);
        }
    };

    let cancelled = reconciler.cancel_token().is_cancelled();
    finish(&args, &report, cancelled)?;

    if cancelled {
        anyhow::bail!("Interrupted");
    }
    let failed = report.summary().failed;
    if failed > 0 {
        anyhow::bail!("{} failed", ui::plural(failed, "resource"));
    }
    Ok(())
}

/// Print the summary and write the optional report.
fn finish(args: &ApplyArgs, report: &RunReport, cancelled: bool) -> Result<()> {
    print_summary(report, args.dry_run);
    if let Some(path) = &args.report {
        let path = paths::expand(&path.to_string_lossy());
        Report::new(&args.playbook, report, args.dry_run, cancelled).write(&path)?;
        ui::dim(&format!("Report written to {}", path.display()));
    }
    Ok(())
}

/// Plan, show, confirm and execute.
///
/// Nothing is asked in dry-run mode or when there is nothing to change.
pub fn apply(
    ctx: &Context,
    reconciler: &Reconciler,
    desired: &[DesiredResource],
    target: Option<&str>,
    confirm: &mut dyn ConfirmCallback,
) -> Result<RunReport> {
    let plan = reconciler.plan(desired)?.filter_by_target(target);
    if !ctx.quiet {
        display_plan(&plan, ctx.verbose > 0);
    }

    if !reconciler.options().dry_run && !plan.is_empty() {
        let prompt = format!("Apply {}?", ui::plural(plan.total_changes(), "change"));
        if !confirm.confirm(&prompt)? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(declined(&plan));
        }
    }

    let progress = BarProgress::new(ctx.quiet);
    Ok(reconciler.execute(&plan, &progress)?)
}
