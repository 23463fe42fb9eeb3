//! `status` - show what Atlas currently reports for every declared resource

use anyhow::Result;
use colored::Colorize;
use declarative::{
    Action, ActualResource, DesiredResource, ReconcileStatus, Reconciler, ResourceId,
};

use crate::Context;
use crate::cli::PlanArgs;
use crate::settings::Settings;
use crate::ui;

/// One declared resource and its observed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub id: ResourceId,
    /// What Atlas reports
    pub state: String,
    /// What apply would do, `None` if the state could not be read
    pub action: Option<Action>,
}

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let settings = Settings::load()?;
    let session = super::open(ctx, &args.playbook, &settings, true)?;
    let rows = collect(&session.reconciler, &session.desired, args.target.as_deref())?;

    ui::header("Atlas Status");
    if rows.is_empty() {
        ui::info("No matching resources");
        return Ok(());
    }

    let width = rows.iter().map(|r| r.id.name.len()).max().unwrap_or(0).max(12);
    for row in &rows {
        let (symbol, verdict) = match row.action {
            Some(Action::NoOp) => ("✓".green(), "in sync".green()),
            Some(Action::Defer) => ("●".cyan(), "busy".cyan()),
            Some(action) => ("~".yellow(), format!("will {action}").yellow()),
            None => ("✗".red(), "unknown".red()),
        };
        let state = format!("{:<40}", row.state);
        println!(
            "  {symbol} {:<7} {:<width$}  {} {verdict}",
            row.id.kind.as_str(),
            row.id.name,
            state.dimmed(),
        );
    }

    let drift = rows
        .iter()
        .filter(|r| r.action != Some(Action::NoOp))
        .count();
    println!();
    if drift == 0 {
        ui::success("Atlas matches the playbook");
    } else {
        ui::warn(&format!("{} out of sync", ui::plural(drift, "resource")));
    }
    Ok(())
}

/// Observe every declared resource, in declaration order
pub fn collect(
    reconciler: &Reconciler,
    desired: &[DesiredResource],
    target: Option<&str>,
) -> Result<Vec<StatusRow>> {
    let plan = reconciler.plan(desired)?.filter_by_target(target);

    let mut rows: Vec<(usize, StatusRow)> = plan
        .operations()
        .map(|op| {
            let actual = reconciler.registry().get(&op.target);
            let row = StatusRow {
                id: op.target.clone(),
                state: describe(actual.as_ref()),
                action: Some(op.action()),
            };
            (plan.position(&op.target), row)
        })
        .collect();

    rows.extend(plan.failed.iter().map(|result| {
        let state = match &result.status {
            ReconcileStatus::Failed { reason } => format!("unreadable: {reason}"),
            other => other.to_string(),
        };
        let row = StatusRow {
            id: result.id.clone(),
            state,
            action: None,
        };
        (plan.position(&result.id), row)
    }));

    rows.sort_by_key(|(position, _)| *position);
    Ok(rows.into_iter().map(|(_, row)| row).collect())
}

fn describe(actual: Option<&ActualResource>) -> String {
    match actual {
        None => "absent".to_string(),
        Some(ActualResource::Cluster(cluster)) => {
            let mut parts = vec![cluster.status.to_string(), cluster.instance_size.to_string()];
            if cluster.encrypt {
                parts.push("encrypted".to_string());
            }
            if cluster.backup_enabled {
                parts.push("backup".to_string());
            }
            parts.join(", ")
        }
        Some(ActualResource::User(user)) => {
            let roles: Vec<String> = user.roles.iter().map(ToString::to_string).collect();
            format!("present, roles [{}]", roles.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::reconciler;
    use atlaskit::{
        ClusterSpec, ClusterState, DatabaseRole, InstanceSize, MockBackend, MockOp,
        ProvisioningStatus, UserSpec, UserState,
    };
    use declarative::{DesiredCluster, DesiredUser, PasswordPolicy};

    #[test]
    fn test_rows_in_declaration_order() {
        let mock = MockBackend::new();
        mock.add_cluster(
            "g1",
            ClusterState::from_spec(
                &ClusterSpec::new("same", InstanceSize::M10),
                ProvisioningStatus::Idle,
            ),
        );
        mock.add_cluster(
            "g1",
            ClusterState::from_spec(
                &ClusterSpec::new("busy", InstanceSize::M10),
                ProvisioningStatus::Updating,
            ),
        );
        mock.add_user(
            "g1",
            UserState {
                username: "app".to_string(),
                roles: [DatabaseRole::global("read")].into_iter().collect(),
            },
        );
        mock.fail(MockOp::GetCluster, "flaky", 500, 10);

        let desired: Vec<DesiredResource> = vec![
            DesiredUser::present(
                "g1",
                UserSpec::new("app")
                    .role(DatabaseRole::global("read"))
                    .password("pw"),
            )
            .update_password(PasswordPolicy::OnCreate)
            .into(),
            DesiredCluster::present("g1", ClusterSpec::new("same", InstanceSize::M10)).into(),
            DesiredCluster::present("g1", ClusterSpec::new("flaky", InstanceSize::M10)).into(),
            DesiredCluster::present("g1", ClusterSpec::new("busy", InstanceSize::M30)).into(),
            DesiredCluster::present("g1", ClusterSpec::new("fresh", InstanceSize::M10)).into(),
        ];

        let rows = collect(&reconciler(&mock, true), &desired, None).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.id.name.as_str()).collect();
        assert_eq!(names, vec!["app", "same", "flaky", "busy", "fresh"]);

        assert_eq!(rows[0].action, Some(Action::NoOp));
        assert_eq!(rows[0].state, "present, roles [read@admin]");
        assert_eq!(rows[1].state, "idle, M10, backup");
        assert_eq!(rows[2].action, None);
        assert!(rows[2].state.starts_with("unreadable"));
        assert_eq!(rows[3].action, Some(Action::Defer));
        assert_eq!(rows[4].action, Some(Action::Create));
        assert_eq!(rows[4].state, "absent");
        assert!(mock.mutations().is_empty());
    }

    #[test]
    fn test_target_filter() {
        let mock = MockBackend::new();
        let desired: Vec<DesiredResource> = vec![
            DesiredCluster::present("g1", ClusterSpec::new("a", InstanceSize::M10)).into(),
            DesiredCluster::present("g1", ClusterSpec::new("b", InstanceSize::M10)).into(),
        ];

        let rows = collect(&reconciler(&mock, true), &desired, Some("cluster.b")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id.name, "b");
    }
}
