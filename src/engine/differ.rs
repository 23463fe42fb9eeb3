//! Plan display

use colored::{ColoredString, Colorize};
use declarative::{
    ChangeKind, ChangeOperation, CreatePayload, ExecutionPlan, ReconciliationResult, ResourceKind,
    UpdatePayload,
};

use atlaskit::{ClusterUpdate, RoleSet, UserUpdate};

/// One line of the plan, before formatting
enum Entry<'a> {
    Op(&'a ChangeOperation),
    Unreadable(&'a ReconciliationResult),
}

impl Entry<'_> {
    fn kind(&self) -> ResourceKind {
        match self {
            Self::Op(op) => op.target.kind,
            Self::Unreadable(result) => result.id.kind,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Op(op) => &op.target.name,
            Self::Unreadable(result) => &result.id.name,
        }
    }

    fn group(&self) -> &str {
        match self {
            Self::Op(op) => &op.target.group_id,
            Self::Unreadable(result) => &result.id.group_id,
        }
    }
}

/// Lines of the plan box. No-ops are listed only when `verbose`.
pub fn plan_lines(plan: &ExecutionPlan, verbose: bool) -> Vec<String> {
    let mut entries: Vec<(usize, Entry<'_>)> = plan
        .operations()
        .filter(|op| verbose || !op.is_noop())
        .map(|op| (plan.position(&op.target), Entry::Op(op)))
        .chain(
            plan.failed
                .iter()
                .map(|r| (plan.position(&r.id), Entry::Unreadable(r))),
        )
        .collect();
    entries.sort_by_key(|(position, _)| *position);

    let multi_group = entries
        .iter()
        .any(|(_, e)| e.group() != entries[0].1.group());

    let mut lines = Vec::new();
    for (kind, title) in [
        (ResourceKind::Cluster, "Clusters"),
        (ResourceKind::User, "Database users"),
    ] {
        let of_kind: Vec<_> = entries.iter().filter(|(_, e)| e.kind() == kind).collect();
        if of_kind.is_empty() {
            continue;
        }

        lines.push(format!("│ {}", title.bold()));
        for (_, entry) in of_kind {
            let name = if multi_group {
                format!("{}/{}", entry.group(), entry.name())
            } else {
                entry.name().to_string()
            };
            let (symbol, detail) = describe(entry);
            lines.push(format!("│   {symbol} {name:<30} {}", detail.dimmed()));
        }
        lines.push("│".to_string());
    }
    lines
}

fn describe(entry: &Entry<'_>) -> (ColoredString, String) {
    let op = match entry {
        Entry::Op(op) => op,
        Entry::Unreadable(result) => {
            return ("!".red().bold(), format!("could not read: {}", result.status));
        }
    };

    match &op.kind {
        ChangeKind::Create(CreatePayload::Cluster(spec)) => (
            "+".green(),
            format!(
                "(absent) → {} in {}{}",
                spec.instance_size,
                spec.region_name,
                if spec.encrypt { ", encrypted" } else { "" }
            ),
        ),
        ChangeKind::Create(CreatePayload::User(spec)) => (
            "+".green(),
            format!("(absent) → roles {}", roles(&spec.roles)),
        ),
        ChangeKind::Update(UpdatePayload::Cluster(update)) => {
            ("~".yellow(), cluster_update(update))
        }
        ChangeKind::Update(UpdatePayload::User(update)) => ("~".yellow(), user_update(update)),
        ChangeKind::Delete => ("-".red(), "(will remove)".to_string()),
        ChangeKind::Defer { status, .. } => {
            ("*".cyan(), format!("({status}, will wait then re-check)"))
        }
        ChangeKind::NoOp => ("=".dimmed(), "(up to date)".to_string()),
    }
}

fn cluster_update(update: &ClusterUpdate) -> String {
    let mut parts = Vec::new();
    if let Some(size) = update.instance_size {
        parts.push(format!("instance_size → {size}"));
    }
    if let Some(encrypt) = update.encrypt {
        parts.push(format!("encrypt → {encrypt}"));
    }
    if let Some(backup) = update.backup_enabled {
        parts.push(format!("backup_enabled → {backup}"));
    }
    if let Some(disk) = update.disk_size_gb {
        parts.push(format!("disk_size_gb → {disk}"));
    }
    parts.join(", ")
}

fn user_update(update: &UserUpdate) -> String {
    let mut parts = Vec::new();
    if let Some(set) = &update.roles {
        parts.push(format!("roles → {}", roles(set)));
    }
    if update.password.is_some() {
        parts.push("password".to_string());
    }
    parts.join(", ")
}

fn roles(set: &RoleSet) -> String {
    if set.is_empty() {
        return "[]".to_string();
    }
    let names: Vec<String> = set.iter().map(ToString::to_string).collect();
    format!("[{}]", names.join(", "))
}

/// Display the plan in a box
pub fn display_plan(plan: &ExecutionPlan, verbose: bool) {
    let lines = plan_lines(plan, verbose);
    if lines.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Reconciliation Plan".bold()
    );
    println!("│");
    for line in &lines {
        println!("{line}");
    }

    let summary = plan.summary();
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} create, {} modify, {} remove, {} wait)",
        summary.total().to_string().bold(),
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red(),
        summary.deferred.to_string().cyan()
    );
    if !plan.failed.is_empty() {
        println!(
            "│ {} {} could not be read",
            "⚠".yellow(),
            crate::ui::plural(plan.failed.len(), "resource")
        );
    }
    println!("└─────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlaskit::{
        ClusterSpec, ClusterState, DatabaseRole, InstanceSize, ProvisioningStatus, UserSpec,
        UserState,
    };
    use declarative::{
        Action, ActualResource, DesiredCluster, DesiredResource, DesiredUser, FailureReason,
        ReconcileStatus, ResourceId, diff,
    };

    fn plain() {
        colored::control::set_override(false);
    }

    fn plan_of(pairs: &[(DesiredResource, Option<ActualResource>)]) -> ExecutionPlan {
        let ops = pairs.iter().map(|(d, a)| diff(d, a.as_ref())).collect();
        ExecutionPlan::from_operations(ops).unwrap()
    }

    fn cluster(name: &str, size: InstanceSize) -> DesiredResource {
        DesiredCluster::present("g1", ClusterSpec::new(name, size)).into()
    }

    fn actual_cluster(name: &str, size: InstanceSize, status: ProvisioningStatus) -> ActualResource {
        ActualResource::Cluster(ClusterState::from_spec(&ClusterSpec::new(name, size), status))
    }

    #[test]
    fn test_symbols_per_change() {
        plain();
        let plan = plan_of(&[
            (cluster("fresh", InstanceSize::M10), None),
            (
                cluster("grow", InstanceSize::M30),
                Some(actual_cluster("grow", InstanceSize::M10, ProvisioningStatus::Idle)),
            ),
            (
                DesiredCluster::absent("g1", ClusterSpec::new("old", InstanceSize::M10)).into(),
                Some(actual_cluster("old", InstanceSize::M10, ProvisioningStatus::Idle)),
            ),
            (
                // Resizing a cluster that is still being created has to wait
                cluster("busy", InstanceSize::M20),
                Some(actual_cluster("busy", InstanceSize::M10, ProvisioningStatus::Creating)),
            ),
        ]);

        let lines = plan_lines(&plan, false);
        let find = |name: &str| {
            lines
                .iter()
                .find(|l| l.contains(name))
                .cloned()
                .unwrap_or_default()
        };
        assert!(lines[0].contains("Clusters"));
        assert!(find("fresh").contains("+ fresh"));
        assert!(find("fresh").contains("(absent) → M10 in US_EAST_1"));
        assert!(find("grow").contains("~ grow"));
        assert!(find("grow").contains("instance_size → M30"));
        assert!(find("old").contains("- old"));
        assert!(find("busy").contains("* busy"));
        assert!(find("busy").contains("creating"));
    }

    #[test]
    fn test_unchanged_only_when_verbose() {
        plain();
        let plan = plan_of(&[(
            cluster("same", InstanceSize::M10),
            Some(actual_cluster("same", InstanceSize::M10, ProvisioningStatus::Idle)),
        )]);

        assert!(plan_lines(&plan, false).is_empty());
        let verbose = plan_lines(&plan, true);
        assert!(verbose.iter().any(|l| l.contains("= same")));
    }

    #[test]
    fn test_user_changes_never_show_password() {
        plain();
        let desired: DesiredResource = DesiredUser::present(
            "g1",
            UserSpec::new("app")
                .role(DatabaseRole::global("readWrite"))
                .password("hunter22"),
        )
        .into();
        let actual = ActualResource::User(UserState {
            username: "app".to_string(),
            roles: [DatabaseRole::global("read")].into_iter().collect(),
        });
        let plan = plan_of(&[(desired, Some(actual))]);

        let lines = plan_lines(&plan, false).join("\n");
        assert!(lines.contains("Database users"));
        assert!(lines.contains("roles → [readWrite@admin]"));
        assert!(lines.contains("password"));
        assert!(!lines.contains("hunter22"));
    }

    #[test]
    fn test_unreadable_and_groups() {
        plain();
        let plan = plan_of(&[
            (cluster("fresh", InstanceSize::M10), None),
            (
                DesiredCluster::present("g2", ClusterSpec::new("other", InstanceSize::M10)).into(),
                None,
            ),
        ])
        .with_failures(vec![ReconciliationResult::new(
            ResourceId::cluster("g1", "broken"),
            Action::Fetch,
            ReconcileStatus::failed(FailureReason::Timeout),
        )]);

        let lines = plan_lines(&plan, false).join("\n");
        assert!(lines.contains("g1/fresh"));
        assert!(lines.contains("g2/other"));
        assert!(lines.contains("! g1/broken"));
        assert!(lines.contains("could not read"));
    }
}
