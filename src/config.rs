//! Deployment configuration
//!
//! `rigger.toml` is parsed into [`ConfigFile`], the environment overrides
//! are read once into [`EnvOverrides`], and both are checked together into
//! a [`DeployConfig`]. Nothing downstream reads the environment or the
//! file again. Every problem is reported as a configuration error naming
//! the offending key, before any provisioning starts.

use costguard::{BudgetRule, Period};
use declarative::{Error, ProvisionOptions, Result, RetryConfig};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::paths;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "rigger.toml";

const NAME_PATTERN: &str = r"^[a-z][a-z0-9-]{0,31}$";
const REGION_PATTERN: &str = r"^[a-z]{2}(-[a-z]+)+-\d$";
const DOMAIN_PATTERN: &str = r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}$";
const ROLE_ARN_PATTERN: &str = r"^arn:aws[a-zA-Z-]*:iam::\d{12}:role/[\w+=,.@/-]+$";
const ENDPOINT_PATTERN: &str = r"^https?://[^\s/]+(/\S*)?$";

fn matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).is_ok_and(|re| re.is_match(value))
}

// ============================================================================
// Enumerations
// ============================================================================

/// Container platform the application runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Ecs,
    Eks,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ecs => write!(f, "ecs"),
            Self::Eks => write!(f, "eks"),
        }
    }
}

/// CPU architecture of the compute nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Architecture {
    #[default]
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }
}

/// Which [`declarative::Provider`] drives the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Sandbox,
    Http,
}

// ============================================================================
// File format
// ============================================================================

/// `rigger.toml` as written on disk
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub deployment: DeploymentSection,
    #[serde(default)]
    pub identity: IdentitySection,
    #[serde(default)]
    pub eks: EksSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub provisioner: ProvisionerSection,
    #[serde(default)]
    pub provider: ProviderSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentSection {
    pub name: Option<String>,
    pub region: Option<String>,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub architecture: Architecture,
    pub domain_name: Option<String>,
    pub hosted_zone_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentitySection {
    #[serde(default)]
    pub enabled: bool,
    pub saml_metadata: Option<String>,
    pub user_pool_domain_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EksSection {
    pub masters_role_arn: Option<String>,
    pub user_role_arn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetSection {
    #[serde(default)]
    pub enabled: bool,
    pub name: Option<String>,
    pub threshold: Option<f64>,
    pub currency: Option<String>,
    pub period: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionerSection {
    pub jobs: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub call_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSection {
    #[serde(default)]
    pub kind: ProviderKind,
    pub endpoint: Option<String>,
}

impl ConfigFile {
    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            let key = e
                .span()
                .and_then(|span| content.get(span))
                .map_or_else(|| "rigger.toml".to_string(), |s| s.trim().to_string());
            Error::config(key, e.message().trim().to_string())
        })
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment variables that override file settings
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub region: Option<String>,
    pub masters_role_arn: Option<String>,
    pub user_role_arn: Option<String>,
    pub domain_name: Option<String>,
}

impl EnvOverrides {
    pub const REGION: &'static str = "RIGGER_REGION";
    pub const MASTERS_ROLE_ARN: &'static str = "RIGGER_MASTERS_ROLE_ARN";
    pub const USER_ROLE_ARN: &'static str = "RIGGER_USER_ROLE_ARN";
    pub const DOMAIN_NAME: &'static str = "RIGGER_DOMAIN_NAME";

    /// Read the overrides from the process environment
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            region: var(Self::REGION),
            masters_role_arn: var(Self::MASTERS_ROLE_ARN),
            user_role_arn: var(Self::USER_ROLE_ARN),
            domain_name: var(Self::DOMAIN_NAME),
        }
    }
}

// ============================================================================
// Validated configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub enabled: bool,
    /// Contents of the SAML metadata document
    pub saml_metadata: Option<String>,
    pub user_pool_domain_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformConfig {
    Ecs {
        domain_name: String,
        hosted_zone_id: String,
    },
    Eks {
        masters_role_arn: String,
        user_role_arn: Option<String>,
    },
}

impl PlatformConfig {
    pub fn platform(&self) -> Platform {
        match self {
            Self::Ecs { .. } => Platform::Ecs,
            Self::Eks { .. } => Platform::Eks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    Sandbox,
    Http { endpoint: String },
}

/// Checked deployment configuration
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Prefix of every graph id
    pub name: String,
    pub region: String,
    pub architecture: Architecture,
    pub platform: PlatformConfig,
    pub identity: IdentityConfig,
    /// Budget rule guarding the deployment, graphs not yet attached
    pub budget: Option<BudgetRule>,
    pub provisioner: ProvisionOptions,
    pub provider: ProviderConfig,
}

impl DeployConfig {
    /// Load `path` and apply the process environment
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(
                path.display().to_string(),
                format!("could not read config file: {e}"),
            )
        })?;
        let file = ConfigFile::parse(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::resolve(file, &EnvOverrides::from_env(), base)
    }

    /// Check `file` with `env` applied on top.
    ///
    /// Relative paths in the file are resolved against `base`.
    pub fn resolve(file: ConfigFile, env: &EnvOverrides, base: &Path) -> Result<Self> {
        let deployment = file.deployment;

        let name = required(deployment.name, "deployment.name")?;
        if !matches(NAME_PATTERN, &name) {
            return Err(Error::config(
                "deployment.name",
                format!("'{name}' must be lowercase letters, digits and dashes, at most 32 characters"),
            ));
        }

        let region = required(env.region.clone().or(deployment.region), "deployment.region")?;
        if !matches(REGION_PATTERN, &region) {
            return Err(Error::config(
                "deployment.region",
                format!("'{region}' is not a region name such as us-east-1"),
            ));
        }

        let platform = match deployment.platform {
            Platform::Ecs => {
                let domain_name = required(
                    env.domain_name.clone().or(deployment.domain_name),
                    "deployment.domain_name",
                )?;
                if !matches(DOMAIN_PATTERN, &domain_name) {
                    return Err(Error::config(
                        "deployment.domain_name",
                        format!("'{domain_name}' is not a valid domain name"),
                    ));
                }
                let hosted_zone_id =
                    required(deployment.hosted_zone_id, "deployment.hosted_zone_id")?;
                PlatformConfig::Ecs {
                    domain_name,
                    hosted_zone_id,
                }
            }
            Platform::Eks => {
                let masters_role_arn = required(
                    env.masters_role_arn.clone().or(file.eks.masters_role_arn),
                    "eks.masters_role_arn",
                )?;
                check_role_arn(&masters_role_arn, "eks.masters_role_arn")?;
                let user_role_arn = env.user_role_arn.clone().or(file.eks.user_role_arn);
                if let Some(arn) = &user_role_arn {
                    check_role_arn(arn, "eks.user_role_arn")?;
                }
                PlatformConfig::Eks {
                    masters_role_arn,
                    user_role_arn,
                }
            }
        };

        let identity = resolve_identity(file.identity, &name, base)?;
        let budget = resolve_budget(file.budget, &name)?;
        let provisioner = resolve_provisioner(&file.provisioner)?;

        let provider = match file.provider.kind {
            ProviderKind::Sandbox => ProviderConfig::Sandbox,
            ProviderKind::Http => {
                let endpoint = required(file.provider.endpoint, "provider.endpoint")?;
                if !matches(ENDPOINT_PATTERN, &endpoint) {
                    return Err(Error::config(
                        "provider.endpoint",
                        format!("'{endpoint}' is not an http(s) URL"),
                    ));
                }
                ProviderConfig::Http {
                    endpoint: endpoint.trim_end_matches('/').to_string(),
                }
            }
        };

        Ok(Self {
            name,
            region,
            architecture: deployment.architecture,
            platform,
            identity,
            budget,
            provisioner,
            provider,
        })
    }

    /// Id of one of the deployment's graphs
    pub fn graph_id(&self, suffix: &str) -> String {
        format!("{}-{}", self.name, suffix)
    }
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::config(key, "is required"))
}

fn check_role_arn(arn: &str, key: &str) -> Result<()> {
    if matches(ROLE_ARN_PATTERN, arn) {
        Ok(())
    } else {
        Err(Error::config(key, format!("'{arn}' is not an IAM role ARN")))
    }
}

fn resolve_identity(section: IdentitySection, name: &str, base: &Path) -> Result<IdentityConfig> {
    let saml_metadata = match section.saml_metadata {
        Some(path) if section.enabled => {
            let path: PathBuf = paths::resolve_relative(base, &path);
            let content = fs::read_to_string(&path).map_err(|e| {
                Error::config(
                    "identity.saml_metadata",
                    format!("could not read {}: {e}", path.display()),
                )
            })?;
            Some(content)
        }
        _ => None,
    };

    let user_pool_domain_prefix = section
        .user_pool_domain_prefix
        .unwrap_or_else(|| name.to_string());
    if section.enabled && !matches(NAME_PATTERN, &user_pool_domain_prefix) {
        return Err(Error::config(
            "identity.user_pool_domain_prefix",
            format!("'{user_pool_domain_prefix}' must be lowercase letters, digits and dashes"),
        ));
    }

    Ok(IdentityConfig {
        enabled: section.enabled,
        saml_metadata,
        user_pool_domain_prefix,
    })
}

fn resolve_budget(section: BudgetSection, name: &str) -> Result<Option<BudgetRule>> {
    if !section.enabled {
        return Ok(None);
    }

    let threshold = section
        .threshold
        .ok_or_else(|| Error::config("budget.threshold", "is required when the budget is enabled"))?;
    let period = match section.period {
        Some(period) => Period::from_str(&period).map_err(|e| Error::config("budget.period", e))?,
        None => Period::Monthly,
    };
    let rule = BudgetRule::new(
        section.name.unwrap_or_else(|| format!("{name}-budget")),
        threshold,
        section.currency.unwrap_or_else(|| "USD".to_string()),
        period,
    );
    rule.validate()
        .map_err(|e| Error::config("budget", e.to_string()))?;
    Ok(Some(rule))
}

fn resolve_provisioner(section: &ProvisionerSection) -> Result<ProvisionOptions> {
    let defaults = ProvisionOptions::default();

    let jobs = section.jobs.unwrap_or(defaults.jobs);
    if jobs == 0 {
        return Err(Error::config("provisioner.jobs", "must be at least 1"));
    }
    let max_attempts = section.max_attempts.unwrap_or(5);
    if max_attempts == 0 {
        return Err(Error::config("provisioner.max_attempts", "must be at least 1"));
    }
    let base_delay = Duration::from_millis(section.base_delay_ms.unwrap_or(500));
    let max_delay = Duration::from_millis(section.max_delay_ms.unwrap_or(30_000));
    if max_delay < base_delay {
        return Err(Error::config(
            "provisioner.max_delay_ms",
            "must not be smaller than base_delay_ms",
        ));
    }
    let call_timeout_secs = section
        .call_timeout_secs
        .unwrap_or(defaults.call_timeout.as_secs());
    if call_timeout_secs == 0 {
        return Err(Error::config("provisioner.call_timeout_secs", "must be at least 1"));
    }

    Ok(ProvisionOptions {
        jobs,
        retry: RetryConfig {
            max_delay,
            ..RetryConfig::new(max_attempts, base_delay, 2.0)
        },
        call_timeout: Duration::from_secs(call_timeout_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ECS: &str = r#"
[deployment]
name = "rag-demo"
region = "us-east-1"
domain_name = "rag.example.com"
hosted_zone_id = "Z0123456789"
"#;

    const EKS: &str = r#"
[deployment]
name = "rag-demo"
region = "eu-west-2"
platform = "eks"
architecture = "arm64"

[eks]
masters_role_arn = "arn:aws:iam::123456789012:role/masters"
"#;

    fn resolve(content: &str) -> Result<DeployConfig> {
        resolve_with(content, &EnvOverrides::default())
    }

    fn resolve_with(content: &str, env: &EnvOverrides) -> Result<DeployConfig> {
        DeployConfig::resolve(ConfigFile::parse(content)?, env, Path::new("."))
    }

    fn config_key(err: &Error) -> &str {
        match err {
            Error::Config { key, .. } => key,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_minimal_ecs_config() {
        let config = resolve(ECS).unwrap();
        assert_eq!(config.name, "rag-demo");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.architecture, Architecture::X86_64);
        assert_eq!(config.platform.platform(), Platform::Ecs);
        assert!(!config.identity.enabled);
        assert!(config.budget.is_none());
        assert_eq!(config.provider, ProviderConfig::Sandbox);
        assert_eq!(config.provisioner.jobs, 4);
        assert_eq!(config.provisioner.retry.max_attempts, 5);
        assert_eq!(config.provisioner.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.graph_id("compute"), "rag-demo-compute");
    }

    #[test]
    fn test_eks_config() {
        let config = resolve(EKS).unwrap();
        assert_eq!(config.architecture, Architecture::Arm64);
        assert_eq!(
            config.platform,
            PlatformConfig::Eks {
                masters_role_arn: "arn:aws:iam::123456789012:role/masters".to_string(),
                user_role_arn: None,
            }
        );
    }

    #[test]
    fn test_missing_name_names_key() {
        let err = resolve("[deployment]\nregion = \"us-east-1\"\n").unwrap_err();
        assert_eq!(config_key(&err), "deployment.name");
        assert!(err.is_preflight());
    }

    #[test]
    fn test_ecs_requires_domain() {
        let content = "[deployment]\nname = \"demo\"\nregion = \"us-east-1\"\n";
        let err = resolve(content).unwrap_err();
        assert_eq!(config_key(&err), "deployment.domain_name");
    }

    #[test]
    fn test_eks_requires_masters_role() {
        let content = "[deployment]\nname = \"demo\"\nregion = \"us-east-1\"\nplatform = \"eks\"\n";
        let err = resolve(content).unwrap_err();
        assert_eq!(config_key(&err), "eks.masters_role_arn");
    }

    #[test]
    fn test_malformed_arn_rejected() {
        let content = EKS.replace("arn:aws:iam::123456789012:role/masters", "masters");
        let err = resolve(&content).unwrap_err();
        assert_eq!(config_key(&err), "eks.masters_role_arn");
    }

    #[test]
    fn test_malformed_domain_rejected() {
        let content = ECS.replace("rag.example.com", "not a domain");
        let err = resolve(&content).unwrap_err();
        assert_eq!(config_key(&err), "deployment.domain_name");
    }

    #[test]
    fn test_env_overrides_file() {
        let env = EnvOverrides {
            region: Some("ap-southeast-2".to_string()),
            domain_name: Some("other.example.org".to_string()),
            ..Default::default()
        };
        let config = resolve_with(ECS, &env).unwrap();
        assert_eq!(config.region, "ap-southeast-2");
        assert_eq!(
            config.platform,
            PlatformConfig::Ecs {
                domain_name: "other.example.org".to_string(),
                hosted_zone_id: "Z0123456789".to_string(),
            }
        );
    }

    #[test]
    fn test_env_supplies_missing_role() {
        let content = "[deployment]\nname = \"demo\"\nregion = \"us-east-1\"\nplatform = \"eks\"\n";
        let env = EnvOverrides {
            masters_role_arn: Some("arn:aws:iam::123456789012:role/admin".to_string()),
            user_role_arn: Some("arn:aws:iam::123456789012:role/user".to_string()),
            ..Default::default()
        };
        let config = resolve_with(content, &env).unwrap();
        assert!(matches!(
            config.platform,
            PlatformConfig::Eks { user_role_arn: Some(_), .. }
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let content = format!("{ECS}\n[provider]\nkind = \"sandbox\"\nflavour = \"x\"\n");
        assert!(resolve(&content).is_err());
    }

    #[test]
    fn test_wrong_type_rejected() {
        let content = format!("{ECS}\n[provisioner]\njobs = \"four\"\n");
        let err = resolve(&content).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_budget_section() {
        let content = format!(
            "{ECS}\n[budget]\nenabled = true\nname = \"rag-budget\"\nthreshold = 100.0\nperiod = \"daily\"\n"
        );
        let rule = resolve(&content).unwrap().budget.unwrap();
        assert_eq!(rule.name, "rag-budget");
        assert_eq!(rule.currency, "USD");
        assert_eq!(rule.period, Period::Daily);
        assert!(rule.attached_graph_ids.is_empty());
    }

    #[test]
    fn test_budget_defaults_and_errors() {
        let content = format!("{ECS}\n[budget]\nenabled = true\nthreshold = 50.0\n");
        let rule = resolve(&content).unwrap().budget.unwrap();
        assert_eq!(rule.name, "rag-demo-budget");
        assert_eq!(rule.period, Period::Monthly);

        let content = format!("{ECS}\n[budget]\nenabled = true\n");
        assert_eq!(config_key(&resolve(&content).unwrap_err()), "budget.threshold");

        let content = format!("{ECS}\n[budget]\nenabled = true\nthreshold = 5.0\nperiod = \"weekly\"\n");
        assert_eq!(config_key(&resolve(&content).unwrap_err()), "budget.period");

        let content = format!("{ECS}\n[budget]\nenabled = true\nthreshold = -5.0\n");
        assert_eq!(config_key(&resolve(&content).unwrap_err()), "budget");
    }

    #[test]
    fn test_provisioner_section() {
        let content = format!(
            "{ECS}\n[provisioner]\njobs = 2\nmax_attempts = 3\nbase_delay_ms = 10\nmax_delay_ms = 100\ncall_timeout_secs = 30\n"
        );
        let options = resolve(&content).unwrap().provisioner;
        assert_eq!(options.jobs, 2);
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.retry.max_delay, Duration::from_millis(100));
        assert_eq!(options.call_timeout, Duration::from_secs(30));

        let content = format!("{ECS}\n[provisioner]\njobs = 0\n");
        assert_eq!(config_key(&resolve(&content).unwrap_err()), "provisioner.jobs");
    }

    #[test]
    fn test_http_provider_requires_endpoint() {
        let content = format!("{ECS}\n[provider]\nkind = \"http\"\n");
        assert_eq!(config_key(&resolve(&content).unwrap_err()), "provider.endpoint");

        let content = format!("{ECS}\n[provider]\nkind = \"http\"\nendpoint = \"http://localhost:8080/\"\n");
        assert_eq!(
            resolve(&content).unwrap().provider,
            ProviderConfig::Http {
                endpoint: "http://localhost:8080".to_string()
            }
        );
    }

    #[test]
    fn test_saml_metadata_read_relative_to_config() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("metadata.xml"), "<EntityDescriptor/>").unwrap();
        let config_path = dir.path().join("rigger.toml");
        fs::write(
            &config_path,
            format!("{ECS}\n[identity]\nenabled = true\nsaml_metadata = \"metadata.xml\"\n"),
        )
        .unwrap();

        let file = ConfigFile::parse(&fs::read_to_string(&config_path).unwrap()).unwrap();
        let config = DeployConfig::resolve(file, &EnvOverrides::default(), dir.path()).unwrap();
        assert!(config.identity.enabled);
        assert_eq!(config.identity.saml_metadata.as_deref(), Some("<EntityDescriptor/>"));
        assert_eq!(config.identity.user_pool_domain_prefix, "rag-demo");
    }

    #[test]
    fn test_missing_saml_metadata_file() {
        let dir = TempDir::new().unwrap();
        let content = format!("{ECS}\n[identity]\nenabled = true\nsaml_metadata = \"missing.xml\"\n");
        let file = ConfigFile::parse(&content).unwrap();
        let err = DeployConfig::resolve(file, &EnvOverrides::default(), dir.path()).unwrap_err();
        assert_eq!(config_key(&err), "identity.saml_metadata");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = DeployConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.is_preflight());
    }
}
