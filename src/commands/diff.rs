//! `diff` - preview what apply would change

use anyhow::Result;
use declarative::{DesiredResource, ExecutionPlan, Reconciler};

use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::display_plan;
use crate::settings::Settings;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let settings = Settings::load()?;
    let session = super::open(ctx, &args.playbook, &settings, true)?;

    let plan = preview(&session.reconciler, &session.desired, args.target.as_deref())?;
    display_plan(&plan, ctx.verbose > 0);

    if !plan.failed.is_empty() {
        ui::warn("Some resources could not be read; the plan is incomplete");
    } else if !plan.is_empty() && !ctx.quiet {
        ui::dim("Run 'atlas-reconcile apply' to make these changes");
    }
    Ok(())
}

/// Observe Atlas and compute the plan without changing anything
pub fn preview(
    reconciler: &Reconciler,
    desired: &[DesiredResource],
    target: Option<&str>,
) -> Result<ExecutionPlan> {
    Ok(reconciler.plan(desired)?.filter_by_target(target))
}
