//! Terminal progress for apply and destroy runs

use declarative::{NodeOutcome, Operation, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

/// Progress bar over every node of a multi-graph run
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new(total_nodes: usize, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(total_nodes as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        };
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for RunProgress {
    fn on_wave_start(&self, operation: Operation, wave: usize, count: usize) {
        log::debug!("{operation} wave {wave}: {count} node(s)");
    }

    fn on_node_start(&self, graph_id: &str, node_id: &str, kind: &str) {
        self.bar.set_message(format!("{graph_id}/{node_id} ({kind})"));
    }

    fn on_node_complete(&self, _graph_id: &str, node_id: &str, outcome: &NodeOutcome) {
        self.bar.inc(1);
        if outcome.is_change() || !outcome.is_success() {
            self.bar.println(ui::outcome_line(node_id, outcome));
        }
    }
}
