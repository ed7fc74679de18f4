//! `budget register | notify | watch`

use anyhow::{Context as AnyhowContext, Result};
use costguard::{
    BudgetAlert, BudgetMonitor, BudgetRule, Registration, TeardownHook, TeardownOutcome,
    TriggerReport,
};
use declarative::{NoProgress, Provisioner, RunReport};
use std::collections::BTreeSet;
use std::io::{self, BufRead};
use std::sync::Arc;

use super::{CommandStatus, Session};
use crate::Context;
use crate::deployment::Deployment;
use crate::ui;

/// Destroys a graph of the deployment, consumers first
struct DeploymentTeardown {
    deployment: Arc<Deployment>,
    provisioner: Arc<Provisioner>,
}

impl TeardownHook for DeploymentTeardown {
    fn teardown(&self, graph_id: &str) -> declarative::Result<RunReport> {
        self.deployment
            .teardown(&self.provisioner, graph_id, &NoProgress)
    }

    fn affected(&self, graph_id: &str) -> BTreeSet<String> {
        self.deployment.teardown_scope(graph_id)
    }
}

fn configured_rule(session: &Session) -> Result<BudgetRule> {
    let rule = session
        .deployment
        .blueprint()
        .budget()
        .cloned()
        .ok_or_else(|| declarative::Error::config("budget.enabled", "no budget is configured"))?;
    Ok(rule)
}

/// Register `rule` with a hook tearing down the session's graphs
pub fn register_rule(
    session: &Session,
    monitor: &BudgetMonitor,
    rule: BudgetRule,
) -> Result<Registration> {
    let name = rule.name.clone();
    let hook = DeploymentTeardown {
        deployment: Arc::clone(&session.deployment),
        provisioner: Arc::clone(&session.provisioner),
    };
    monitor
        .register(rule, Arc::new(hook))
        .with_context(|| format!("Could not register budget {name}"))
}

fn print_trigger(report: &TriggerReport) {
    if !report.triggered() {
        ui::info(&format!(
            "Budget {}: {:.2} within threshold {:.2}",
            report.budget_name, report.actual_amount, report.threshold_amount
        ));
        return;
    }

    ui::warn(&format!(
        "Budget {} exceeded: {:.2} > {:.2}",
        report.budget_name, report.actual_amount, report.threshold_amount
    ));
    for teardown in &report.teardowns {
        match &teardown.outcome {
            TeardownOutcome::Destroyed(run) => {
                println!("  {}", ui::status_line(&teardown.graph_id, &run.status()));
            }
            TeardownOutcome::Error(message) => {
                ui::error(&format!("{}: {message}", teardown.graph_id));
            }
        }
    }
}

fn trigger_status(report: &TriggerReport) -> CommandStatus {
    let failed: Vec<String> = report
        .failed_graphs()
        .into_iter()
        .map(str::to_string)
        .collect();
    if failed.is_empty() {
        CommandStatus::Success
    } else {
        CommandStatus::Partial { failed }
    }
}

pub fn register(ctx: &Context) -> Result<CommandStatus> {
    let session = Session::open(ctx, None)?;
    let rule = configured_rule(&session)?;
    let monitor = BudgetMonitor::new(session.ledger.clone());

    let registration = register_rule(&session, &monitor, rule.clone())?;
    match registration {
        Registration::Created => ui::success(&format!("Budget {} created", rule.name)),
        Registration::Attached => ui::success(&format!("Attached to existing budget {}", rule.name)),
        Registration::Unverified => ui::warn(&format!(
            "Budget {} exists but could not be looked up; tracking it locally",
            rule.name
        )),
    }

    if let Some(stored) = monitor.rule(&rule.name) {
        ui::kv("threshold", &format!("{:.2} {}", stored.threshold_amount, stored.currency));
        ui::kv("period", stored.period.as_str());
        let graphs: Vec<&str> = stored.attached_graph_ids.iter().map(String::as_str).collect();
        ui::kv("graphs", &graphs.join(", "));
    }
    ui::kv("subscribers", &monitor.subscriber_count(&rule.name).to_string());
    Ok(CommandStatus::Success)
}

pub fn notify(ctx: &Context, amount: f64, name: Option<&str>) -> Result<CommandStatus> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(declarative::Error::config("amount", "must be a non-negative number").into());
    }

    let session = Session::open(ctx, None)?;
    let rule = configured_rule(&session)?;
    let monitor = BudgetMonitor::new(session.ledger.clone());
    register_rule(&session, &monitor, rule.clone())?;

    let alert = BudgetAlert::new(name.unwrap_or(&rule.name), amount);
    let report = monitor.notify(&alert)?;
    print_trigger(&report);
    Ok(trigger_status(&report))
}

pub fn watch(ctx: &Context) -> Result<CommandStatus> {
    let session = Session::open(ctx, None)?;
    let rule = configured_rule(&session)?;
    let monitor = BudgetMonitor::new(session.ledger.clone());
    register_rule(&session, &monitor, rule.clone())?;

    if !ctx.quiet {
        ui::info(&format!(
            "Watching budget {} (threshold {:.2} {}); reading alerts from stdin",
            rule.name, rule.threshold_amount, rule.currency
        ));
    }

    let mut failed = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read alert")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let alert = match BudgetAlert::from_json(line) {
            Ok(alert) => alert,
            Err(e) => {
                log::warn!("Ignoring malformed alert {line:?}: {e}");
                continue;
            }
        };
        match monitor.notify(&alert) {
            Ok(report) => {
                print_trigger(&report);
                if let CommandStatus::Partial { failed: graphs } = trigger_status(&report) {
                    failed.extend(graphs);
                }
            }
            Err(e) => ui::error(&format!("{e}")),
        }
    }

    failed.sort();
    failed.dedup();
    if failed.is_empty() {
        Ok(CommandStatus::Success)
    } else {
        Ok(CommandStatus::Partial { failed })
    }
}
