//! File-backed provider simulating a cloud control plane
//!
//! Resources live in a JSON document under the state directory. Physical
//! ids are `<kind>-<n>` with a per-kind counter that never goes back, so
//! ids stay unique across deletes. Every mutation rewrites the file
//! through a temporary sibling and a rename.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{CallContext, Config, Provider, ProviderError, Provisioned};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::kind::ResourceKind;

/// A resource held by the sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResource {
    pub kind: String,
    pub config: Config,
    pub outputs: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SandboxState {
    #[serde(default)]
    counters: BTreeMap<String, u64>,
    #[serde(default)]
    resources: BTreeMap<String, SandboxResource>,
}

pub struct SandboxProvider {
    path: Option<PathBuf>,
    region: String,
    state: Mutex<SandboxState>,
}

impl SandboxProvider {
    /// Open the sandbox stored at `path`, starting empty if the file does
    /// not exist yet
    pub fn open(path: &Path, region: impl Into<String>) -> Result<Self> {
        let state = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid sandbox file {}", path.display()))?
        } else {
            SandboxState::default()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            region: region.into(),
            state: Mutex::new(state),
        })
    }

    /// Sandbox that is never written to disk
    #[cfg(test)]
    pub fn in_memory(region: impl Into<String>) -> Self {
        Self {
            path: None,
            region: region.into(),
            state: Mutex::new(SandboxState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Live resources by physical id
    #[cfg(test)]
    pub fn resources(&self) -> BTreeMap<String, SandboxResource> {
        self.lock().resources.clone()
    }

    fn save(&self, state: &SandboxState) -> Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_error = |e: std::io::Error| ProviderError::Other(format!("sandbox write failed: {e}"));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| ProviderError::Other(format!("sandbox encode failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_error)?;
        fs::rename(&tmp, path).map_err(io_error)
    }

    /// Run `change` on a copy of the state and keep the copy only once it
    /// is saved; a failed write leaves the sandbox as it was
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut SandboxState) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut state = self.lock();
        let mut next = state.clone();
        let value = change(&mut next)?;
        self.save(&next)?;
        *state = next;
        Ok(value)
    }

    fn parse_kind(kind: &str) -> Result<ResourceKind, ProviderError> {
        kind.parse()
            .map_err(|message| ProviderError::Validation { message })
    }

    /// Outputs of a resource: config values win, the rest is derived from
    /// the physical id
    fn outputs(&self, kind: ResourceKind, physical_id: &str, config: &Config) -> BTreeMap<String, String> {
        let region = &self.region;
        kind.outputs()
            .iter()
            .map(|&key| {
                let value = match config.get(key).and_then(|v| v.as_str()) {
                    Some(value) => value.to_string(),
                    None => match key {
                        "name" => physical_id.to_string(),
                        "arn" => format!("arn:sandbox:{region}:{kind}/{physical_id}"),
                        "role_arn" | "listener_arn" => {
                            format!("arn:sandbox:{region}:{kind}/{physical_id}/{key}")
                        }
                        "endpoint" | "url" => format!("https://{physical_id}.{region}.sandbox.local"),
                        "uri" => format!("sandbox.local/{physical_id}:latest"),
                        "domain" => format!("{physical_id}.auth.{region}.sandbox.local"),
                        _ => physical_id.to_string(),
                    },
                };
                (key.to_string(), value)
            })
            .collect()
    }
}

impl Provider for SandboxProvider {
    fn create(&self, kind: &str, config: &Config, ctx: &CallContext) -> Result<Provisioned, ProviderError> {
        let resource_kind = Self::parse_kind(kind)?;

        let (physical_id, outputs) = self.commit(|state| {
            let counter = state.counters.entry(kind.to_string()).or_insert(0);
            *counter += 1;
            let physical_id = format!("{kind}-{counter}");

            let outputs = self.outputs(resource_kind, &physical_id, config);
            let now = Utc::now();
            state.resources.insert(
                physical_id.clone(),
                SandboxResource {
                    kind: kind.to_string(),
                    config: config.clone(),
                    outputs: outputs.clone(),
                    created_at: now,
                    updated_at: now,
                },
            );
            Ok((physical_id, outputs))
        })?;

        log::debug!("sandbox: created {physical_id} for {}/{}", ctx.graph_id, ctx.node_id);
        Ok(Provisioned {
            physical_id,
            outputs,
        })
    }

    fn update(
        &self,
        kind: &str,
        physical_id: &str,
        config: &Config,
        ctx: &CallContext,
    ) -> Result<Provisioned, ProviderError> {
        let resource_kind = Self::parse_kind(kind)?;
        let outputs = self.outputs(resource_kind, physical_id, config);

        self.commit(|state| {
            let resource = state
                .resources
                .get_mut(physical_id)
                .ok_or_else(|| ProviderError::NotFound {
                    physical_id: physical_id.to_string(),
                })?;
            if resource.kind != kind {
                return Err(ProviderError::Conflict {
                    message: format!("{physical_id} is a {}, not a {kind}", resource.kind),
                });
            }
            resource.config = config.clone();
            resource.outputs = outputs.clone();
            resource.updated_at = Utc::now();
            Ok(())
        })?;

        log::debug!("sandbox: updated {physical_id} for {}/{}", ctx.graph_id, ctx.node_id);
        Ok(Provisioned {
            physical_id: physical_id.to_string(),
            outputs,
        })
    }

    fn delete(&self, _kind: &str, physical_id: &str, ctx: &CallContext) -> Result<(), ProviderError> {
        self.commit(|state| match state.resources.remove(physical_id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound {
                physical_id: physical_id.to_string(),
            }),
        })?;

        log::debug!("sandbox: deleted {physical_id} for {}/{}", ctx.graph_id, ctx.node_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn ctx() -> CallContext {
        CallContext::new("g", "n", Duration::from_secs(1))
    }

    fn config(pairs: &[(&str, serde_json::Value)]) -> Config {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_ids_are_per_kind_and_never_reused() {
        let sandbox = SandboxProvider::in_memory("us-east-1");
        let empty = Config::new();

        let first = sandbox.create("queue", &empty, &ctx()).unwrap();
        let second = sandbox.create("queue", &empty, &ctx()).unwrap();
        let role = sandbox.create("role", &empty, &ctx()).unwrap();
        assert_eq!(first.physical_id, "queue-1");
        assert_eq!(second.physical_id, "queue-2");
        assert_eq!(role.physical_id, "role-1");

        sandbox.delete("queue", "queue-2", &ctx()).unwrap();
        let third = sandbox.create("queue", &empty, &ctx()).unwrap();
        assert_eq!(third.physical_id, "queue-3");
    }

    #[test]
    fn test_outputs_per_kind() {
        let sandbox = SandboxProvider::in_memory("eu-west-1");
        let index = sandbox
            .create(
                "vector-index",
                &config(&[("index_name", json!("rag-index")), ("field_name", json!("vec"))]),
                &ctx(),
            )
            .unwrap();
        assert_eq!(index.outputs["index_name"], "rag-index");
        assert_eq!(index.outputs["field_name"], "vec");

        let collection = sandbox
            .create("collection", &config(&[("name", json!("rag-vectors"))]), &ctx())
            .unwrap();
        assert_eq!(collection.outputs["name"], "rag-vectors");
        assert_eq!(
            collection.outputs["endpoint"],
            "https://collection-1.eu-west-1.sandbox.local"
        );
        assert_eq!(
            collection.outputs["arn"],
            "arn:sandbox:eu-west-1:collection/collection-1"
        );
    }

    #[test]
    fn test_unknown_kind_is_validation_error() {
        let sandbox = SandboxProvider::in_memory("us-east-1");
        let err = sandbox.create("bucket", &Config::new(), &ctx()).unwrap_err();
        assert!(matches!(err, ProviderError::Validation { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_update_and_delete_unknown_id() {
        let sandbox = SandboxProvider::in_memory("us-east-1");
        let err = sandbox
            .update("queue", "queue-9", &Config::new(), &ctx())
            .unwrap_err();
        assert!(err.is_not_found());

        let err = sandbox.delete("queue", "queue-9", &ctx()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_replaces_config() {
        let sandbox = SandboxProvider::in_memory("us-east-1");
        let created = sandbox
            .create("queue", &config(&[("name", json!("a"))]), &ctx())
            .unwrap();
        let updated = sandbox
            .update("queue", &created.physical_id, &config(&[("name", json!("b"))]), &ctx())
            .unwrap();
        assert_eq!(updated.physical_id, created.physical_id);
        assert_eq!(updated.outputs["name"], "b");
        assert_eq!(sandbox.resources()["queue-1"].config["name"], json!("b"));

        let err = sandbox
            .update("role", &created.physical_id, &Config::new(), &ctx())
            .unwrap_err();
        assert!(matches!(err, ProviderError::Conflict { .. }));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sandbox.json");

        {
            let sandbox = SandboxProvider::open(&path, "us-east-1").unwrap();
            sandbox.create("vpc", &Config::new(), &ctx()).unwrap();
        }

        let sandbox = SandboxProvider::open(&path, "us-east-1").unwrap();
        assert!(sandbox.resources().contains_key("vpc-1"));
        let next = sandbox.create("vpc", &Config::new(), &ctx()).unwrap();
        assert_eq!(next.physical_id, "vpc-2");
    }

    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let sandbox = SandboxProvider::open(&blocker.join("sandbox.json"), "us-east-1").unwrap();

        let err = sandbox.create("queue", &Config::new(), &ctx()).unwrap_err();
        assert!(matches!(err, ProviderError::Other(_)));
        assert!(sandbox.resources().is_empty());

        // Once the directory can be created the first id is handed out.
        fs::remove_file(&blocker).unwrap();
        let created = sandbox.create("queue", &Config::new(), &ctx()).unwrap();
        assert_eq!(created.physical_id, "queue-1");
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sandbox.json");
        fs::write(&path, "not json").unwrap();
        assert!(SandboxProvider::open(&path, "us-east-1").is_err());
    }
}
