//! `status`, `outputs` and `graph`

use anyhow::Result;
use colored::Colorize;
use declarative::{NodeState, StateEntry};
use std::collections::BTreeMap;

use super::{CommandStatus, Session};
use crate::Context;
use crate::cli::{GraphViewArgs, OutputsArgs};
use crate::ui;

type OutputMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

fn state_label(state: NodeState) -> String {
    match state {
        NodeState::Created => state.as_str().green().to_string(),
        NodeState::Failed => state.as_str().red().to_string(),
        NodeState::Deleted | NodeState::Pending => state.as_str().dimmed().to_string(),
        _ => state.as_str().yellow().to_string(),
    }
}

fn entry_line(entry: &StateEntry, verbose: bool) -> String {
    let line = format!(
        "  {:<20} {:<22} {:<10} {:<24} {}",
        entry.node_id,
        entry.kind.dimmed(),
        state_label(entry.last_applied_state),
        entry.physical_id.as_deref().unwrap_or("-"),
        entry
            .timestamp
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if verbose {
        format!("{line}\n    {}", format!("config {}", entry.config_hash).dimmed())
    } else {
        line
    }
}

pub fn status(ctx: &Context) -> Result<CommandStatus> {
    let session = Session::open(ctx, None)?;
    ui::header(&format!("Status of {}", session.config.name));

    let mut known = Vec::new();
    for graph_id in session.deployment.order() {
        known.push(graph_id.clone());
        ui::section(graph_id);
        let entries = session.ledger.graph_entries(graph_id)?;
        if entries.is_empty() {
            ui::dim("never applied");
            continue;
        }
        for entry in &entries {
            println!("{}", entry_line(entry, ctx.verbose > 0));
        }
    }

    // Graphs left in the ledger by an earlier configuration
    for graph_id in session.ledger.graph_ids()? {
        if known.contains(&graph_id) {
            continue;
        }
        ui::section(&format!("{graph_id} (not in configuration)"));
        for entry in &session.ledger.graph_entries(&graph_id)? {
            println!("{}", entry_line(entry, ctx.verbose > 0));
        }
    }

    let rules = session.ledger.rules()?;
    if !rules.is_empty() {
        ui::section("Budgets");
        for rule in &rules {
            let graphs: Vec<&str> = rule.attached_graph_ids.iter().map(String::as_str).collect();
            ui::kv(
                &rule.name,
                &format!(
                    "{:.2} {} {} ({})",
                    rule.threshold_amount,
                    rule.currency,
                    rule.period,
                    graphs.join(", ")
                ),
            );
        }
    }

    if !ctx.quiet {
        let stats = session.ledger.stats()?;
        ui::section("Ledger");
        ui::kv("graphs", &stats.graph_count.to_string());
        ui::kv("entries", &stats.entry_count.to_string());
        for (state, count) in &stats.by_state {
            ui::kv(state, &count.to_string());
        }
        ui::kv("budgets", &stats.rule_count.to_string());
    }
    Ok(CommandStatus::Success)
}

/// Outputs of created nodes, keyed by graph then node
fn collect_outputs(session: &Session, only: Option<&str>) -> Result<OutputMap> {
    let mut outputs = OutputMap::new();
    for graph in session.deployment.select(only)? {
        let mut nodes = BTreeMap::new();
        for entry in session.ledger.graph_entries(graph.id())? {
            if entry.last_applied_state == NodeState::Created && !entry.outputs.is_empty() {
                nodes.insert(entry.node_id, entry.outputs);
            }
        }
        if !nodes.is_empty() {
            outputs.insert(graph.id().to_string(), nodes);
        }
    }
    Ok(outputs)
}

pub fn outputs(ctx: &Context, args: &OutputsArgs) -> Result<CommandStatus> {
    let session = Session::open(ctx, None)?;
    let outputs = collect_outputs(&session, args.graph.as_deref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
        return Ok(CommandStatus::Success);
    }

    if outputs.is_empty() {
        ui::info("No outputs yet; run apply first");
        return Ok(CommandStatus::Success);
    }
    for (graph_id, nodes) in &outputs {
        ui::section(graph_id);
        for (node_id, values) in nodes {
            println!("  {}", node_id.bold());
            for (key, value) in values {
                ui::kv(&format!("  {key}"), value);
            }
        }
    }
    Ok(CommandStatus::Success)
}

pub fn graph(ctx: &Context, args: &GraphViewArgs) -> Result<CommandStatus> {
    let session = Session::open(ctx, None)?;
    let graphs = session.deployment.select(args.graph.as_deref())?;

    if args.dot {
        for graph in graphs {
            print!("{}", graph.dot());
        }
        return Ok(CommandStatus::Success);
    }

    ui::header(&format!("Graphs of {}", session.config.name));
    for graph in graphs {
        ui::section(&format!("{} ({} nodes)", graph.id(), graph.len()));
        for (i, wave) in graph.waves().iter().enumerate() {
            let ids: Vec<&str> = wave.iter().map(|n| n.id()).collect();
            ui::kv(&format!("wave {}", i + 1), &ids.join(", "));
        }
        let producers = session.deployment.binder().producers_of(graph.id());
        if !producers.is_empty() {
            let producers: Vec<&str> = producers.iter().map(String::as_str).collect();
            ui::dim(&format!("reads outputs of {}", producers.join(", ")));
        }
    }
    Ok(CommandStatus::Success)
}
