//! Configuration loaded from `.erp-sync/config.toml`.

use std::{collections::HashSet, fs, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use erp_sync_core::Entity;
use serde::Deserialize;

use crate::optimistic::OptimisticCreate;

const CONFIG_DIR: &str = ".erp-sync";
const CONFIG_FILE: &str = "config.toml";

/// Default REST base URL of the ERP backend.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// Client configuration loaded from `.erp-sync/config.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Backend connection.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Cache tuning.
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_resources")]
    resources: Vec<ResourceConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            cache: CacheConfig::default(),
            resources: default_resources(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a working directory. A missing file yields
    /// the defaults.
    ///
    /// # Errors
    /// Fails when the file cannot be read, parsed, or validated.
    pub fn from_workdir(workdir: impl AsRef<Path>) -> Result<Self> {
        let config_path = workdir.as_ref().join(CONFIG_DIR).join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            bail!("backend.base_url must not be empty");
        }
        self.ensure_unique_resources()?;
        self.ensure_valid_endpoints()
    }

    fn ensure_unique_resources(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.name.as_str()) {
                bail!("duplicate resource detected: {}", resource.name);
            }
        }
        Ok(())
    }

    fn ensure_valid_endpoints(&self) -> Result<()> {
        for resource in &self.resources {
            if !resource.endpoint.starts_with('/') {
                bail!(
                    "endpoint for resource '{}' must start with '/': {}",
                    resource.name,
                    resource.endpoint
                );
            }
        }
        Ok(())
    }

    /// Configured resources.
    #[must_use]
    pub fn resources(&self) -> &[ResourceConfig] {
        &self.resources
    }

    /// Find a resource by its key root.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    /// REST endpoint of the resource backing `E`.
    ///
    /// # Errors
    /// Fails when the resource is not configured.
    pub fn endpoint_for<E: Entity>(&self) -> Result<&str> {
        self.resource(E::RESOURCE)
            .map(|resource| resource.endpoint.as_str())
            .with_context(|| format!("resource '{}' is not configured", E::RESOURCE))
    }

    /// Cache options derived from the `[cache]` block.
    #[must_use]
    pub const fn cache_options(&self) -> CacheOptions {
        self.cache.options()
    }
}

/// `[backend]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Base URL every endpoint is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request HTTP timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    /// HTTP request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `[cache]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// How long a fresh entry is served without refetching on bind.
    #[serde(default)]
    pub stale_time_ms: u64,
    /// How long an unobserved entry is kept.
    #[serde(default = "default_gc_time_ms")]
    pub gc_time_ms: u64,
    /// Upper bound for a mutation's backend call.
    #[serde(default)]
    pub mutation_timeout_ms: Option<u64>,
    /// Optimistic create policy for empty lists.
    #[serde(default)]
    pub optimistic_create: OptimisticCreate,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 0,
            gc_time_ms: default_gc_time_ms(),
            mutation_timeout_ms: None,
            optimistic_create: OptimisticCreate::default(),
        }
    }
}

impl CacheConfig {
    const fn options(&self) -> CacheOptions {
        CacheOptions {
            stale_time: Duration::from_millis(self.stale_time_ms),
            gc_time: Duration::from_millis(self.gc_time_ms),
            mutation_timeout: match self.mutation_timeout_ms {
                Some(ms) => Some(Duration::from_millis(ms)),
                None => None,
            },
            optimistic_create: self.optimistic_create,
        }
    }
}

/// One `[[resources]]` entry: a key root and its REST collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    /// Key root, e.g. `planningSchedules`.
    pub name: String,
    /// Collection path below the base URL, e.g. `/planning-schedules`.
    pub endpoint: String,
}

impl ResourceConfig {
    /// Resource entry.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Runtime cache tuning used by [`crate::QueryClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Fresh entries younger than this are not refetched on bind.
    pub stale_time: Duration,
    /// Idle time after which unobserved entries are evicted.
    pub gc_time: Duration,
    /// Default bound for mutation backend calls.
    pub mutation_timeout: Option<Duration>,
    /// Optimistic create policy.
    pub optimistic_create: OptimisticCreate,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheConfig::default().options()
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_gc_time_ms() -> u64 {
    300_000
}

fn default_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig::new("planningSchedules", "/planning-schedules"),
        ResourceConfig::new("schedules", "/schedules"),
    ]
}
