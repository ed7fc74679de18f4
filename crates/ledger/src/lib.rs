//! # Ledger
//!
//! Durable state for rigger, in a single SQLite database.
//!
//! This crate provides:
//! - A [`StateStore`] keeping one row per graph node
//! - A [`BudgetBackend`] keeping budget rules, channels and subscriptions
//! - Summary statistics for status displays
//!
//! ## Example
//!
//! ```no_run
//! use declarative::StateStore;
//! use ledger::Ledger;
//! use std::path::Path;
//!
//! let ledger = Ledger::open(Path::new("/tmp/rigger/ledger.db"))?;
//! for entry in ledger.entries("rag-demo-vector-store")? {
//!     println!("{} {}", entry.node_id, entry.last_applied_state);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;

pub use error::{Error, Result};

use chrono::{DateTime, Utc};
use costguard::{BudgetBackend, BudgetRule};
use declarative::{NodeState, StateEntry, StateStore};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Counts shown by `rigger status`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Graphs with at least one entry
    pub graph_count: u64,
    /// Total state entries
    pub entry_count: u64,
    /// Entries per lifecycle state
    pub by_state: BTreeMap<String, u64>,
    /// Registered budget rules
    pub rule_count: u64,
}

/// SQLite database holding node state and budget rules
pub struct Ledger {
    conn: Mutex<Connection>,
}

/// Raw state row, converted outside the rusqlite row closure
type StateRow = (
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
);

impl Ledger {
    /// Open or create a ledger database at the given path
    ///
    /// Creates the database file and necessary tables if they don't exist.
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// Open a private in-memory ledger
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS state_entries (
                graph_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                physical_id TEXT,
                config_hash TEXT NOT NULL,
                state TEXT NOT NULL,
                outputs TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (graph_id, node_id)
            );

            CREATE TABLE IF NOT EXISTS budget_rules (
                name TEXT PRIMARY KEY,
                threshold REAL NOT NULL,
                currency TEXT NOT NULL,
                period TEXT NOT NULL,
                graphs TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS budget_channels (
                rule_name TEXT PRIMARY KEY,
                channel TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS budget_subscriptions (
                channel TEXT NOT NULL,
                subscriber TEXT NOT NULL,
                PRIMARY KEY (channel, subscriber)
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Read one state entry
    pub fn get_entry(&self, graph_id: &str, node_id: &str) -> Result<Option<StateEntry>> {
        let row = self
            .conn()
            .query_row(
                "SELECT graph_id, node_id, kind, physical_id, config_hash, state, outputs, updated_at
                 FROM state_entries WHERE graph_id = ?1 AND node_id = ?2",
                params![graph_id, node_id],
                read_state_row,
            )
            .optional()?;
        row.map(entry_from_row).transpose()
    }

    /// Insert or replace a state entry in a single statement
    pub fn put_entry(&self, entry: &StateEntry) -> Result<()> {
        let outputs = serde_json::to_string(&entry.outputs)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO state_entries
                (graph_id, node_id, kind, physical_id, config_hash, state, outputs, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.graph_id,
                entry.node_id,
                entry.kind,
                entry.physical_id,
                entry.config_hash,
                entry.last_applied_state.as_str(),
                outputs,
                entry.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Delete a state entry
    pub fn remove_entry(&self, graph_id: &str, node_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM state_entries WHERE graph_id = ?1 AND node_id = ?2",
            params![graph_id, node_id],
        )?;
        Ok(())
    }

    /// All entries of a graph, ordered by node id
    pub fn graph_entries(&self, graph_id: &str) -> Result<Vec<StateEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT graph_id, node_id, kind, physical_id, config_hash, state, outputs, updated_at
             FROM state_entries WHERE graph_id = ?1 ORDER BY node_id",
        )?;
        let rows = stmt
            .query_map([graph_id], read_state_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(entry_from_row).collect()
    }

    /// Ids of graphs with at least one entry
    pub fn graph_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT graph_id FROM state_entries ORDER BY graph_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Get ledger statistics
    pub fn stats(&self) -> Result<LedgerStats> {
        let conn = self.conn();
        let graph_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT graph_id) FROM state_entries",
            [],
            |row| row.get(0),
        )?;
        let entry_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM state_entries", [], |row| row.get(0))?;
        let rule_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM budget_rules", [], |row| row.get(0))?;

        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM state_entries GROUP BY state")?;
        let by_state = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(LedgerStats {
            graph_count: graph_count as u64,
            entry_count: entry_count as u64,
            by_state,
            rule_count: rule_count as u64,
        })
    }

    /// Look up a budget rule
    pub fn rule(&self, name: &str) -> Result<Option<BudgetRule>> {
        let row = self
            .conn()
            .query_row(
                "SELECT name, threshold, currency, period, graphs FROM budget_rules WHERE name = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(name, threshold, currency, period, graphs)| -> Result<BudgetRule> {
            let period = period.parse().map_err(Error::Corrupt)?;
            let mut rule = BudgetRule::new(name, threshold, currency, period);
            rule.attached_graph_ids = serde_json::from_str(&graphs)?;
            Ok(rule)
        })
        .transpose()
    }

    /// Insert a budget rule; returns false if the name is taken
    pub fn insert_rule(&self, rule: &BudgetRule) -> Result<bool> {
        let graphs = serde_json::to_string(&rule.attached_graph_ids)?;
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO budget_rules (name, threshold, currency, period, graphs)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rule.name,
                rule.threshold_amount,
                rule.currency,
                rule.period.as_str(),
                graphs
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Merge graphs into a rule's attachment set
    pub fn add_rule_graphs(&self, name: &str, graph_ids: &BTreeSet<String>) -> Result<()> {
        let mut rule = self
            .rule(name)?
            .ok_or_else(|| Error::Corrupt(format!("no budget rule named {name}")))?;
        rule.attached_graph_ids.extend(graph_ids.iter().cloned());
        let graphs = serde_json::to_string(&rule.attached_graph_ids)?;
        self.conn().execute(
            "UPDATE budget_rules SET graphs = ?1 WHERE name = ?2",
            params![graphs, name],
        )?;
        Ok(())
    }

    /// All budget rules, ordered by name
    pub fn rules(&self) -> Result<Vec<BudgetRule>> {
        let names: Vec<String> = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT name FROM budget_rules ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            names
        };
        let mut rules = Vec::with_capacity(names.len());
        for name in names {
            if let Some(rule) = self.rule(&name)? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// Channel of a rule, created on first use
    pub fn ensure_channel(&self, rule_name: &str) -> Result<String> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO budget_channels (rule_name, channel) VALUES (?1, ?2)",
            params![rule_name, format!("{rule_name}-alerts")],
        )?;
        let channel = conn.query_row(
            "SELECT channel FROM budget_channels WHERE rule_name = ?1",
            [rule_name],
            |row| row.get(0),
        )?;
        Ok(channel)
    }

    /// Record a subscription; subscribing twice is a no-op
    pub fn add_subscription(&self, channel: &str, subscriber: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO budget_subscriptions (channel, subscriber) VALUES (?1, ?2)",
            params![channel, subscriber],
        )?;
        Ok(())
    }

    /// Subscribers of a channel
    pub fn subscriptions(&self, channel: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT subscriber FROM budget_subscriptions WHERE channel = ?1 ORDER BY subscriber",
        )?;
        let subscribers = stmt
            .query_map([channel], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(subscribers)
    }
}

fn read_state_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn entry_from_row(row: StateRow) -> Result<StateEntry> {
    let (graph_id, node_id, kind, physical_id, config_hash, state, outputs, updated_at) = row;
    let last_applied_state = NodeState::parse(&state)
        .ok_or_else(|| Error::Corrupt(format!("unknown state '{state}' for {graph_id}/{node_id}")))?;
    let timestamp = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| Error::Corrupt(format!("bad timestamp '{updated_at}': {e}")))?
        .with_timezone(&Utc);

    Ok(StateEntry {
        graph_id,
        node_id,
        kind,
        physical_id,
        config_hash,
        last_applied_state,
        outputs: serde_json::from_str(&outputs)?,
        timestamp,
    })
}

impl StateStore for Ledger {
    fn get(&self, graph_id: &str, node_id: &str) -> declarative::Result<Option<StateEntry>> {
        Ok(self.get_entry(graph_id, node_id)?)
    }

    fn put(&self, entry: &StateEntry) -> declarative::Result<()> {
        if entry.graph_id.is_empty() || entry.node_id.is_empty() {
            return Err(declarative::Error::state(
                "state entry needs a graph id and a node id",
            ));
        }
        Ok(self.put_entry(entry)?)
    }

    fn remove(&self, graph_id: &str, node_id: &str) -> declarative::Result<()> {
        Ok(self.remove_entry(graph_id, node_id)?)
    }

    fn entries(&self, graph_id: &str) -> declarative::Result<Vec<StateEntry>> {
        Ok(self.graph_entries(graph_id)?)
    }

    fn graphs(&self) -> declarative::Result<Vec<String>> {
        Ok(self.graph_ids()?)
    }
}

impl BudgetBackend for Ledger {
    fn find_rule(&self, name: &str) -> costguard::Result<Option<BudgetRule>> {
        Ok(self.rule(name)?)
    }

    fn create_rule(&self, rule: &BudgetRule) -> costguard::Result<()> {
        if self.insert_rule(rule)? {
            log::debug!("Stored budget rule {}", rule.name);
            Ok(())
        } else {
            Err(costguard::Error::RuleExists {
                name: rule.name.clone(),
            })
        }
    }

    fn attach_graphs(&self, name: &str, graph_ids: &BTreeSet<String>) -> costguard::Result<()> {
        Ok(self.add_rule_graphs(name, graph_ids)?)
    }

    fn create_channel(&self, rule_name: &str) -> costguard::Result<String> {
        Ok(self.ensure_channel(rule_name)?)
    }

    fn subscribe(&self, channel: &str, subscriber: &str) -> costguard::Result<()> {
        Ok(self.add_subscription(channel, subscriber)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
