//! Control-plane providers

pub mod http;
pub mod sandbox;

use anyhow::Result;
use declarative::Provider;
use std::path::Path;
use std::sync::Arc;

use crate::config::{DeployConfig, ProviderConfig};
use crate::paths;

pub use http::HttpProvider;
pub use sandbox::SandboxProvider;

/// Build the provider selected in the configuration
pub fn from_config(config: &DeployConfig, state_dir: &Path) -> Result<Arc<dyn Provider>> {
    match &config.provider {
        ProviderConfig::Sandbox => {
            let path = state_dir.join(paths::SANDBOX_FILE);
            log::debug!("Using sandbox provider at {}", path.display());
            Ok(Arc::new(SandboxProvider::open(&path, config.region.clone())?))
        }
        ProviderConfig::Http { endpoint } => {
            log::debug!("Using HTTP provider at {endpoint}");
            Ok(Arc::new(HttpProvider::new(endpoint.clone())))
        }
    }
}
