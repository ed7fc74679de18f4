//! Command implementations
//!
//! Every command opens a [`Session`]: the checked configuration, the
//! deployment's graphs, the SQLite ledger and a provisioner wired to the
//! configured provider.

pub mod budget;
pub mod deploy;
pub mod inspect;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{CancelToken, Provisioner, RunReport};
use ledger::Ledger;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Context;
use crate::config::DeployConfig;
use crate::deployment::Deployment;
use crate::paths;
use crate::provider;
use crate::ui;

/// How a command finished, when it did not fail outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// Some nodes or graphs did not reach their target state
    Partial { failed: Vec<String> },
}

impl CommandStatus {
    /// Collect the nodes and graphs that did not finish from run reports
    pub fn from_reports(reports: &[RunReport]) -> Self {
        let mut failed = Vec::new();
        for report in reports {
            if report.aborted.is_some() {
                failed.push(report.graph_id.clone());
                continue;
            }
            for id in report.failed().into_iter().chain(report.skipped()) {
                failed.push(format!("{}/{}", report.graph_id, id));
            }
        }
        if failed.is_empty() {
            Self::Success
        } else {
            Self::Partial { failed }
        }
    }
}

pub struct Session {
    pub config: DeployConfig,
    pub deployment: Arc<Deployment>,
    pub provisioner: Arc<Provisioner>,
    pub ledger: Arc<Ledger>,
}

impl Session {
    /// Load the configuration and open state; `jobs` overrides the
    /// configured parallelism
    pub fn open(ctx: &Context, jobs: Option<usize>) -> Result<Self> {
        let config = DeployConfig::load(&ctx.config_path)?;
        log::debug!("Loaded deployment {} from {}", config.name, ctx.config_path.display());

        let state_dir = paths::state_dir()?;
        let ledger_path = state_dir.join(paths::LEDGER_FILE);
        let ledger = Arc::new(
            Ledger::open(&ledger_path)
                .with_context(|| format!("Could not open ledger {}", ledger_path.display()))?,
        );

        let provider = provider::from_config(&config, &state_dir)?;
        let deployment = Deployment::new(&config)?;

        let mut options = config.provisioner.clone();
        if let Some(jobs) = jobs {
            options.jobs = jobs;
        }
        let provisioner = Provisioner::new(provider, ledger.clone())
            .with_binder(deployment.binder())
            .with_options(options);

        Ok(Self {
            config,
            deployment: Arc::new(deployment),
            provisioner: Arc::new(provisioner),
            ledger,
        })
    }

    /// Number of nodes in the selected graphs
    pub fn node_count(&self, only: Option<&str>) -> Result<usize> {
        Ok(self
            .deployment
            .select(only)?
            .iter()
            .map(|g| g.len())
            .sum())
    }
}

/// Ask before changing anything, unless `yes` was given.
///
/// Without a terminal the answer cannot be asked for, so `--yes` is
/// required.
pub fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if !console::user_attended() {
        anyhow::bail!("Not running in a terminal; pass --yes to proceed");
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// Cancel `token` on the first Ctrl-C; a second one exits immediately.
///
/// Provider calls already running finish, nodes not yet started are
/// skipped.
pub fn cancel_on_interrupt(token: CancelToken) {
    static INSTALLED: AtomicBool = AtomicBool::new(false);
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let spawned = std::thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::warn!("Ctrl-C handling unavailable: {e}");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_err() {
                return;
            }
            ui::warn("Interrupted; waiting for running nodes, skipping the rest");
            token.cancel();
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                std::process::exit(130);
            }
        });
    if let Err(e) = spawned {
        log::warn!("Ctrl-C handling unavailable: {e}");
    }
}
