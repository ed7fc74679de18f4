//! `plan`, `apply` and `destroy`

use anyhow::Result;
use costguard::{BudgetMonitor, Registration};
use declarative::{PlanSummary, PlannedChange, RunReport};

use super::budget::register_rule;
use super::{CommandStatus, Session, cancel_on_interrupt, confirm};
use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs, GraphArgs};
use crate::deployment;
use crate::progress::RunProgress;
use crate::ui;

fn print_plan(graph_id: &str, changes: &[PlannedChange]) {
    ui::section(graph_id);
    for change in changes {
        println!("{}", ui::change_line(change));
    }
}

fn print_reports(reports: &[RunReport]) {
    ui::section("Graphs");
    for report in reports {
        println!("  {}", ui::status_line(&report.graph_id, &report.status()));
    }
    println!();
    println!("{}", ui::run_summary(&deployment::summarize(reports)));
}

pub fn plan(ctx: &Context, args: &GraphArgs) -> Result<CommandStatus> {
    let session = Session::open(ctx, None)?;
    let mut summary = PlanSummary::default();

    ui::header(&format!("Plan for {}", session.config.name));
    for graph in session.deployment.select(args.graph.as_deref())? {
        let changes = session.provisioner.plan(graph)?;
        summary.merge(&PlanSummary::from_changes(&changes));
        print_plan(graph.id(), &changes);
    }

    println!();
    println!("{}", ui::plan_summary(&summary));
    if summary.pending > 0 && !ctx.quiet {
        ui::dim("pending nodes depend on outputs that will exist after apply");
    }
    Ok(CommandStatus::Success)
}

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<CommandStatus> {
    let session = Session::open(ctx, args.jobs)?;
    let only = args.graph.as_deref();
    let mut summary = PlanSummary::default();

    ui::header(&format!("Apply {}", session.config.name));
    for graph in session.deployment.select(only)? {
        let changes = session.provisioner.plan(graph)?;
        summary.merge(&PlanSummary::from_changes(&changes));
        if !ctx.quiet {
            print_plan(graph.id(), &changes);
        }
    }
    println!();
    println!("{}", ui::plan_summary(&summary));

    let reports = if summary.has_changes() {
        if !confirm("Apply these changes?", args.yes)? {
            ui::info("Cancelled");
            return Ok(CommandStatus::Success);
        }

        cancel_on_interrupt(session.provisioner.cancel_token());
        let progress = RunProgress::new(session.node_count(only)?, ctx.quiet);
        let reports = session
            .deployment
            .apply(&session.provisioner, only, &progress);
        progress.finish();
        let reports = reports?;
        print_reports(&reports);
        reports
    } else {
        ui::success("Everything is up to date");
        Vec::new()
    };

    let status = CommandStatus::from_reports(&reports);
    if status == CommandStatus::Success
        && let Some(rule) = session.deployment.blueprint().budget()
    {
        let monitor = BudgetMonitor::new(session.ledger.clone());
        match register_rule(&session, &monitor, rule.clone())? {
            Registration::Created => ui::success(&format!("Budget {} created", rule.name)),
            Registration::Attached => ui::info(&format!("Budget {} already exists, attached", rule.name)),
            Registration::Unverified => ui::warn(&format!(
                "Budget {} exists but could not be looked up; tracking it locally",
                rule.name
            )),
        }
    }
    Ok(status)
}

pub fn destroy(ctx: &Context, args: &DestroyArgs) -> Result<CommandStatus> {
    let session = Session::open(ctx, None)?;
    let only = args.graph.as_deref();
    let mut summary = PlanSummary::default();

    ui::header(&format!("Destroy {}", session.config.name));
    for graph in session.deployment.select(only)?.into_iter().rev() {
        let changes = session.provisioner.plan_destroy(graph)?;
        summary.merge(&PlanSummary::from_changes(&changes));
        if !ctx.quiet {
            print_plan(graph.id(), &changes);
        }
    }
    println!();
    println!("{}", ui::plan_summary(&summary));

    if !summary.has_changes() {
        ui::success("Nothing to destroy");
        return Ok(CommandStatus::Success);
    }
    if !confirm("Destroy these resources?", args.yes)? {
        ui::info("Cancelled");
        return Ok(CommandStatus::Success);
    }

    cancel_on_interrupt(session.provisioner.cancel_token());
    let progress = RunProgress::new(session.node_count(only)?, ctx.quiet);
    let reports = session
        .deployment
        .destroy(&session.provisioner, only, &progress);
    progress.finish();
    let reports = reports?;
    print_reports(&reports);
    Ok(CommandStatus::from_reports(&reports))
}
