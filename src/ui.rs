use colored::{ColoredString, Colorize};
use declarative::{ChangeKind, NodeOutcome, PlanSummary, PlannedChange, RunStatus, RunSummary};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plans and outcomes
// ============================================================================

fn change_symbol(change: ChangeKind) -> ColoredString {
    let symbol = change.symbol();
    match change {
        ChangeKind::Create => symbol.green(),
        ChangeKind::Update => symbol.yellow(),
        ChangeKind::Delete => symbol.red(),
        ChangeKind::Pending => symbol.cyan(),
        ChangeKind::NoChange => symbol.dimmed(),
    }
}

/// One line of a plan
pub fn change_line(change: &PlannedChange) -> String {
    let mut line = format!(
        "  {} {} {}",
        change_symbol(change.change),
        change.node_id,
        format!("({})", change.kind).dimmed()
    );
    if let Some(reason) = &change.reason {
        line.push_str(&format!(" {}", reason.dimmed()));
    }
    line
}

/// One line of a run report
pub fn outcome_line(node_id: &str, outcome: &NodeOutcome) -> String {
    let label = outcome.label();
    let (symbol, label) = match outcome {
        NodeOutcome::Created | NodeOutcome::Updated | NodeOutcome::Deleted => {
            ("✓".green(), label.green())
        }
        NodeOutcome::Unchanged | NodeOutcome::Absent => ("=".dimmed(), label.dimmed()),
        NodeOutcome::Skipped { .. } => ("○".yellow(), label.yellow()),
        NodeOutcome::Failed { .. } => ("✗".red(), label.red()),
    };
    let detail = match outcome {
        NodeOutcome::Failed { error } => format!(": {error}"),
        NodeOutcome::Skipped { reason } => format!(": {reason}"),
        _ => String::new(),
    };
    format!("  {symbol} {node_id} {label}{}", detail.dimmed())
}

/// Status of one graph's run
pub fn status_line(graph_id: &str, status: &RunStatus) -> String {
    match status {
        RunStatus::Succeeded => format!("{} {}", "✓".green(), graph_id),
        RunStatus::Partial { failed, skipped } => format!(
            "{} {} {}",
            "✗".red(),
            graph_id,
            format!("({failed} failed, {skipped} skipped)").dimmed()
        ),
        RunStatus::Aborted { reason } => {
            format!("{} {} {}", "○".yellow(), graph_id, format!("({reason})").dimmed())
        }
    }
}

pub fn plan_summary(summary: &PlanSummary) -> String {
    format!(
        "{} to create, {} to update, {} to delete, {} unchanged, {} pending",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.deletes.to_string().red(),
        summary.unchanged,
        summary.pending.to_string().cyan()
    )
}

pub fn run_summary(summary: &RunSummary) -> String {
    format!(
        "{} created, {} updated, {} deleted, {} unchanged, {} skipped, {} failed",
        summary.created.to_string().green(),
        summary.updated.to_string().yellow(),
        summary.deleted.to_string().red(),
        summary.unchanged,
        summary.skipped.to_string().yellow(),
        summary.failed.to_string().red()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_line_includes_detail() {
        colored::control::set_override(false);
        let line = outcome_line(
            "queue",
            &NodeOutcome::Failed {
                error: "throttled".to_string(),
            },
        );
        assert_eq!(line, "  ✗ queue failed: throttled");
    }

    #[test]
    fn test_change_line() {
        colored::control::set_override(false);
        let change = PlannedChange {
            node_id: "queue".to_string(),
            kind: "queue".to_string(),
            change: ChangeKind::Update,
            reason: Some("configuration changed".to_string()),
        };
        assert_eq!(change_line(&change), "  ~ queue (queue) configuration changed");
    }
}
