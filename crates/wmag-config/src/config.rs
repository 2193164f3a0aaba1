// crates/wmag-config/src/config.rs
// ============================================================================
// Module: Kernel Configuration
// Description: Loads and validates the kernel's environment-driven
// configuration: registry layer paths, store backend selection, audit key
// seeding, and the numeric limits spec.md §6 names.
// Purpose: Fail closed on any malformed or out-of-range setting rather than
// silently substituting a default for a value the operator explicitly set.
// Dependencies: wmag-core, wmag-registry, wmag-store, wmag-store-sqlite, serde_json
// Grounded on: decision-gate-config::config's strict env/file validation
// style (explicit named constants, `Result`-returning parse helpers, fail
// closed rather than fail open), translated from a single TOML document to
// the kernel's flat environment-variable surface.
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use wmag_core::hashchain::AuditKey;
use wmag_core::hashchain::AuditKeyRegistry;
use wmag_core::identifiers::Kid;
use wmag_core::time::Timestamp;
use wmag_store::EphemeralStore;
use wmag_store::Store;
use wmag_store_sqlite::SqliteStore;
use wmag_store_sqlite::SqliteStoreConfig;

use crate::error::ConfigError;

/// Default for `SNAPSHOT_EVERY`.
pub const DEFAULT_SNAPSHOT_EVERY: u64 = 25;
/// Default for `REFRESH_MV_EVERY`.
pub const DEFAULT_REFRESH_MV_EVERY: u64 = 50;
/// Default for `MV_REFRESH_INTERVAL_S`.
pub const DEFAULT_MV_REFRESH_INTERVAL_S: u64 = 60;
/// Default for `MV_REFRESH_MAX_BACKOFF_S`.
pub const DEFAULT_MV_REFRESH_MAX_BACKOFF_S: u64 = 600;
/// Default for `TENANT_MAX_CONCURRENCY`.
pub const DEFAULT_TENANT_MAX_CONCURRENCY: u32 = 2;
/// Default for `RATE_LIMIT_WINDOW_S`.
pub const DEFAULT_RATE_LIMIT_WINDOW_S: u64 = 60;
/// Default for `APPROVAL_TIMEOUT_S` (0 disables the timeout).
pub const DEFAULT_APPROVAL_TIMEOUT_S: u64 = 0;

/// The registry's four merge layers, loaded as raw JSON so
/// `wmag_registry::EffectiveRegistry::build` can merge and validate them.
#[derive(Debug, Clone, Default)]
pub struct RegistryLayers {
    /// The required base document.
    pub base: serde_json::Value,
    /// Optional organization-level overlay.
    pub org: Option<serde_json::Value>,
    /// Optional tenant-level overlay.
    pub tenant: Option<serde_json::Value>,
    /// Optional user-level overlay.
    pub user: Option<serde_json::Value>,
}

/// One entry of `AUDIT_KEYS_JSON`.
#[derive(Debug, Clone, Deserialize)]
struct AuditKeySeed {
    kid: String,
    secret: String,
    #[serde(default)]
    active: bool,
}

/// Which durable backend to construct, resolved from `USE_POSTGRES` /
/// `DATABASE_URL`.
///
/// `USE_POSTGRES=true` is rejected at load time (see
/// [`ConfigError::PostgresUnsupported`]): this build carries
/// `wmag-store-sqlite`, not a Postgres driver, so the setting exists for
/// forward compatibility with spec.md §6 but has exactly one legal value.
#[derive(Debug, Clone)]
pub enum StoreBackendConfig {
    /// In-memory store, for local development with no `DATABASE_URL` set.
    Ephemeral,
    /// `SQLite`-backed durable store at the given path.
    Sqlite(PathBuf),
}

/// The kernel's fully loaded and validated runtime configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Path to the base registry document (`REGISTRY_PATH`).
    pub registry_path: PathBuf,
    /// Directory holding optional `org.json`/`tenant.json`/`user.json`
    /// overlay layers (`REGISTRY_LAYERS_DIR`).
    pub registry_layers_dir: Option<PathBuf>,
    /// Resolved store backend.
    pub store_backend: StoreBackendConfig,
    /// Audit keys to seed a tenant's registry with on first use.
    pub audit_key_seeds: Vec<AuditKey>,
    /// `SNAPSHOT_EVERY`: how often a compact run projection would be
    /// refreshed. Accepted and validated per spec.md §6; this build's
    /// `Store::list_runs` reads the base table directly and has no
    /// materialized projection to refresh, so the setting is currently
    /// inert (see `DESIGN.md`).
    pub snapshot_every: u64,
    /// `REFRESH_MV_EVERY`, same caveat as `snapshot_every`.
    pub refresh_mv_every: u64,
    /// `MV_REFRESH_INTERVAL_S`, same caveat as `snapshot_every`.
    pub mv_refresh_interval_s: u64,
    /// `MV_REFRESH_MAX_BACKOFF_S`, same caveat as `snapshot_every`.
    pub mv_refresh_max_backoff_s: u64,
    /// `TENANT_MAX_CONCURRENCY`: the default cap on concurrently running
    /// jobs per tenant, applied by `wmag-worker` when a registry document
    /// does not set its own `limits.max_concurrent_runs_per_tenant`.
    pub tenant_max_concurrency: u32,
    /// `RATE_LIMIT_WINDOW_S`: the default fixed-window length, applied when
    /// a registry document does not set its own `limits.rate_limit_window_s`.
    pub rate_limit_window_s: u64,
    /// `APPROVAL_TIMEOUT_S`: seconds a `GateApproval`-raised approval may
    /// stay pending before the run fails; `0` disables the timeout.
    pub approval_timeout_s: u64,
}

fn env_string(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env_string(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar { name, value }),
    }
}

fn env_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env_string(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar { name, value }),
    }
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env_string(name) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidEnvVar { name, value }),
        },
    }
}

fn read_json_layer(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::ReadRegistryLayer {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::InvalidRegistryLayer {
        path: path.display().to_string(),
        source,
    })
}

fn read_optional_json_layer(path: &Path) -> Result<Option<serde_json::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json_layer(path).map(Some)
}

fn parse_audit_keys_json(raw: &str) -> Result<Vec<AuditKey>, ConfigError> {
    let seeds: Vec<AuditKeySeed> = serde_json::from_str(raw).map_err(ConfigError::InvalidAuditKeysJson)?;
    Ok(seeds
        .into_iter()
        .map(|seed| AuditKey {
            kid: Kid::new(seed.kid),
            secret: seed.secret.into_bytes(),
            active: seed.active,
            created_at: Timestamp::from_millis(0),
            retired_at: None,
        })
        .collect())
}

impl KernelConfig {
    /// Loads and validates the kernel configuration from the process
    /// environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a required setting is missing, a value is
    /// malformed, or a numeric setting is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let registry_path = env_string("REGISTRY_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingRegistryPath)?;
        let registry_layers_dir = env_string("REGISTRY_LAYERS_DIR").map(PathBuf::from);

        let use_postgres = env_bool("USE_POSTGRES", false)?;
        let database_url = env_string("DATABASE_URL");
        let store_backend = match (use_postgres, database_url) {
            (true, _) => return Err(ConfigError::PostgresUnsupported),
            (false, Some(path)) => StoreBackendConfig::Sqlite(PathBuf::from(path)),
            (false, None) => StoreBackendConfig::Ephemeral,
        };

        let audit_key_seeds = match (env_string("AUDIT_KEYS_JSON"), env_string("AUDIT_SECRET")) {
            (Some(raw), _) => parse_audit_keys_json(&raw)?,
            (None, Some(secret)) => vec![AuditKey {
                kid: Kid::new("k0"),
                secret: secret.into_bytes(),
                active: true,
                created_at: Timestamp::from_millis(0),
                retired_at: None,
            }],
            (None, None) => return Err(ConfigError::MissingAuditKeys),
        };
        // Validates the single-active-key invariant up front so a
        // misconfigured seed fails at startup rather than at first use.
        AuditKeyRegistry::new(audit_key_seeds.clone())?;

        let snapshot_every = env_u64("SNAPSHOT_EVERY", DEFAULT_SNAPSHOT_EVERY)?;
        if snapshot_every == 0 {
            return Err(ConfigError::OutOfRange { name: "SNAPSHOT_EVERY", constraint: "greater than zero", value: snapshot_every });
        }
        let refresh_mv_every = env_u64("REFRESH_MV_EVERY", DEFAULT_REFRESH_MV_EVERY)?;
        if refresh_mv_every == 0 {
            return Err(ConfigError::OutOfRange { name: "REFRESH_MV_EVERY", constraint: "greater than zero", value: refresh_mv_every });
        }
        let mv_refresh_interval_s = env_u64("MV_REFRESH_INTERVAL_S", DEFAULT_MV_REFRESH_INTERVAL_S)?;
        if mv_refresh_interval_s == 0 {
            return Err(ConfigError::OutOfRange {
                name: "MV_REFRESH_INTERVAL_S",
                constraint: "greater than zero",
                value: mv_refresh_interval_s,
            });
        }
        let mv_refresh_max_backoff_s = env_u64("MV_REFRESH_MAX_BACKOFF_S", DEFAULT_MV_REFRESH_MAX_BACKOFF_S)?;
        if mv_refresh_max_backoff_s < mv_refresh_interval_s {
            return Err(ConfigError::OutOfRange {
                name: "MV_REFRESH_MAX_BACKOFF_S",
                constraint: "at least MV_REFRESH_INTERVAL_S",
                value: mv_refresh_max_backoff_s,
            });
        }

        let tenant_max_concurrency = env_u32("TENANT_MAX_CONCURRENCY", DEFAULT_TENANT_MAX_CONCURRENCY)?;
        if tenant_max_concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                name: "TENANT_MAX_CONCURRENCY",
                constraint: "greater than zero",
                value: u64::from(tenant_max_concurrency),
            });
        }
        let rate_limit_window_s = env_u64("RATE_LIMIT_WINDOW_S", DEFAULT_RATE_LIMIT_WINDOW_S)?;
        if rate_limit_window_s == 0 {
            return Err(ConfigError::OutOfRange {
                name: "RATE_LIMIT_WINDOW_S",
                constraint: "greater than zero",
                value: rate_limit_window_s,
            });
        }
        let approval_timeout_s = env_u64("APPROVAL_TIMEOUT_S", DEFAULT_APPROVAL_TIMEOUT_S)?;

        Ok(Self {
            registry_path,
            registry_layers_dir,
            store_backend,
            audit_key_seeds,
            snapshot_every,
            refresh_mv_every,
            mv_refresh_interval_s,
            mv_refresh_max_backoff_s,
            tenant_max_concurrency,
            rate_limit_window_s,
            approval_timeout_s,
        })
    }

    /// Reads the base registry document and, if `registry_layers_dir` is
    /// set, its optional `org.json`/`tenant.json`/`user.json` overlays.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the base document is unreadable or any
    /// present layer file is not valid JSON.
    pub fn load_registry_layers(&self) -> Result<RegistryLayers, ConfigError> {
        let base = read_json_layer(&self.registry_path)?;
        let (org, tenant, user) = match &self.registry_layers_dir {
            None => (None, None, None),
            Some(dir) => (
                read_optional_json_layer(&dir.join("org.json"))?,
                read_optional_json_layer(&dir.join("tenant.json"))?,
                read_optional_json_layer(&dir.join("user.json"))?,
            ),
        };
        Ok(RegistryLayers { base, org, tenant, user })
    }

    /// Constructs the configured [`Store`] backend.
    ///
    /// # Errors
    /// Returns [`ConfigError::Sqlite`] if the `SQLite` backend fails to
    /// open.
    pub fn build_store(&self) -> Result<Arc<dyn Store>, ConfigError> {
        match &self.store_backend {
            StoreBackendConfig::Ephemeral => Ok(Arc::new(EphemeralStore::new())),
            StoreBackendConfig::Sqlite(path) => {
                let store = SqliteStore::open(SqliteStoreConfig::new(path.clone()))?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
#[allow(
    unsafe_code,
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "std::env::set_var/remove_var are unsafe since they are process-global \
              (tests serialize access via ENV_LOCK); test-only output and \
              panic-based assertions are permitted."
)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // Environment variables are process-global; serialize the tests that
    // touch them so they cannot interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for name in [
            "REGISTRY_PATH",
            "REGISTRY_LAYERS_DIR",
            "USE_POSTGRES",
            "DATABASE_URL",
            "AUDIT_KEYS_JSON",
            "AUDIT_SECRET",
            "SNAPSHOT_EVERY",
            "REFRESH_MV_EVERY",
            "MV_REFRESH_INTERVAL_S",
            "MV_REFRESH_MAX_BACKOFF_S",
            "TENANT_MAX_CONCURRENCY",
            "RATE_LIMIT_WINDOW_S",
            "APPROVAL_TIMEOUT_S",
        ] {
            // SAFETY: tests hold ENV_LOCK for the duration of their env
            // mutation and read, so no other thread observes a torn state.
            unsafe { env::remove_var(name) };
        }
    }

    #[test]
    fn missing_registry_path_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_env();
        let err = KernelConfig::from_env().expect_err("should fail closed");
        assert!(matches!(err, ConfigError::MissingRegistryPath));
    }

    #[test]
    fn missing_audit_keys_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_env();
        // SAFETY: serialized by ENV_LOCK.
        unsafe { env::set_var("REGISTRY_PATH", "/does/not/matter.json") };
        let err = KernelConfig::from_env().expect_err("should fail closed");
        assert!(matches!(err, ConfigError::MissingAuditKeys));
    }

    #[test]
    fn use_postgres_is_rejected_as_unsupported() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_env();
        // SAFETY: serialized by ENV_LOCK.
        unsafe {
            env::set_var("REGISTRY_PATH", "/does/not/matter.json");
            env::set_var("AUDIT_SECRET", "shh");
            env::set_var("USE_POSTGRES", "true");
        }
        let err = KernelConfig::from_env().expect_err("should reject postgres");
        assert!(matches!(err, ConfigError::PostgresUnsupported));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_env();
        // SAFETY: serialized by ENV_LOCK.
        unsafe {
            env::set_var("REGISTRY_PATH", "/does/not/matter.json");
            env::set_var("AUDIT_SECRET", "shh");
        }
        let config = KernelConfig::from_env().expect("load");
        assert_eq!(config.snapshot_every, DEFAULT_SNAPSHOT_EVERY);
        assert_eq!(config.tenant_max_concurrency, DEFAULT_TENANT_MAX_CONCURRENCY);
        assert_eq!(config.approval_timeout_s, DEFAULT_APPROVAL_TIMEOUT_S);
        assert!(matches!(config.store_backend, StoreBackendConfig::Ephemeral));
    }

    #[test]
    fn out_of_range_mv_backoff_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        clear_env();
        // SAFETY: serialized by ENV_LOCK.
        unsafe {
            env::set_var("REGISTRY_PATH", "/does/not/matter.json");
            env::set_var("AUDIT_SECRET", "shh");
            env::set_var("MV_REFRESH_INTERVAL_S", "60");
            env::set_var("MV_REFRESH_MAX_BACKOFF_S", "10");
        }
        let err = KernelConfig::from_env().expect_err("should reject");
        assert!(matches!(err, ConfigError::OutOfRange { name: "MV_REFRESH_MAX_BACKOFF_S", .. }));
    }

    #[test]
    fn load_registry_layers_reads_base_and_optional_overlays() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base_path = dir.path().join("base.json");
        fs::write(&base_path, r#"{"limits":{"max_budget_per_run":10,"max_concurrent_steps":1,"max_concurrent_runs_per_tenant":1,"rate_limit_window_s":60,"rate_limit_max_per_window":10}}"#).expect("write base");
        fs::write(dir.path().join("tenant.json"), r#"{"limits":{"max_budget_per_run":20}}"#).expect("write tenant");

        let config = KernelConfig {
            registry_path: base_path,
            registry_layers_dir: Some(dir.path().to_path_buf()),
            store_backend: StoreBackendConfig::Ephemeral,
            audit_key_seeds: vec![],
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            refresh_mv_every: DEFAULT_REFRESH_MV_EVERY,
            mv_refresh_interval_s: DEFAULT_MV_REFRESH_INTERVAL_S,
            mv_refresh_max_backoff_s: DEFAULT_MV_REFRESH_MAX_BACKOFF_S,
            tenant_max_concurrency: DEFAULT_TENANT_MAX_CONCURRENCY,
            rate_limit_window_s: DEFAULT_RATE_LIMIT_WINDOW_S,
            approval_timeout_s: DEFAULT_APPROVAL_TIMEOUT_S,
        };
        let layers = config.load_registry_layers().expect("load layers");
        assert!(layers.tenant.is_some());
        assert!(layers.org.is_none());
    }
}
