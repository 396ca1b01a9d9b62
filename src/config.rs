//! Service configuration.
//!
//! Every runtime knob lives in one struct, built via its builder. Keeping
//! the knobs together makes configs trivial to share across tasks, log, and
//! diff between two deployments.

use crate::error::ServiceError;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the conversion service.
///
/// Built via [`ServiceConfig::builder()`] or [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2md_serve::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .storage_root("var/pdf2md")
///     .worker_concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind address. Default: `127.0.0.1`.
    pub host: String,

    /// Bind port. Default: `8000`.
    pub port: u16,

    /// Root directory for job artifacts and the cache index.
    /// Default: `storage/output`.
    pub storage_root: PathBuf,

    /// Maximum number of conversions running at once. Default: 2.
    ///
    /// Conversion is CPU-bound; each running job occupies one blocking-pool
    /// thread. Jobs beyond the limit queue in `pending` state.
    pub worker_concurrency: usize,

    /// Worker-side timeout per conversion, in seconds. Default: 600.
    ///
    /// A hung engine would otherwise leave its job in `processing` forever
    /// with clients polling indefinitely. On expiry the job transitions to
    /// `error` like any other failure.
    pub conversion_timeout_secs: u64,

    /// Maximum accepted upload size in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Persist the cache index as JSON under the storage root so cached
    /// conversions survive restarts. Default: true.
    pub persist_cache_index: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            storage_root: PathBuf::from("storage/output"),
            worker_concurrency: 2,
            conversion_timeout_secs: 600,
            max_upload_bytes: 50 * 1024 * 1024,
            persist_cache_index: true,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        self
    }

    pub fn worker_concurrency(mut self, n: usize) -> Self {
        self.config.worker_concurrency = n;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn persist_cache_index(mut self, v: bool) -> Self {
        self.config.persist_cache_index = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let c = &self.config;
        if c.worker_concurrency == 0 {
            return Err(ServiceError::InvalidConfig(
                "worker_concurrency must be ≥ 1".into(),
            ));
        }
        if c.conversion_timeout_secs == 0 {
            return Err(ServiceError::InvalidConfig(
                "conversion_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(ServiceError::InvalidConfig(
                "max_upload_bytes must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
