//! Configuration module
//!
//! Server settings are read once at startup. Storage settings (local roots, size
//! limit, object storage endpoint) sit behind a [`SettingsHandle`] that is passed
//! explicitly to the path validator and the location registry so they can be
//! updated at runtime without a restart.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const SERVER_PORT: u16 = 4000;
const LOCAL_STORAGE_PATH: &str = "/opt/app-root/src";
const MAX_FILE_SIZE_GB: u64 = 20;
const MAX_CONCURRENT_TRANSFERS: usize = 2;
const TRANSFER_JOB_RETENTION_SECS: u64 = 3600;
const S3_REGION: &str = "us-east-1";

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Object storage connection settings.
///
/// Credentials are not stored here: the S3 clients read them from the standard
/// AWS environment (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, profiles).
#[derive(Clone, Debug, PartialEq)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO, Ceph RGW, ...)
    pub endpoint: Option<String>,
}

/// Storage settings that may change while the process runs.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageSettings {
    /// Local roots in configuration order; index N is location `local-N`.
    pub local_roots: Vec<PathBuf>,
    pub max_file_size_bytes: u64,
    pub s3: S3Settings,
}

/// Shared, updatable storage settings.
///
/// Readers take a cloned snapshot; the lock is never held across I/O.
#[derive(Clone, Debug)]
pub struct SettingsHandle {
    inner: Arc<RwLock<StorageSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: StorageSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Current settings snapshot.
    pub fn snapshot(&self) -> StorageSettings {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn local_root(&self, index: usize) -> Option<PathBuf> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .local_roots
            .get(index)
            .cloned()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .max_file_size_bytes
    }

    /// Apply a change under the write lock: read current state, compute, write.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut StorageSettings),
    {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub max_concurrent_transfers: usize,
    pub transfer_fail_fast: bool,
    pub transfer_job_retention: Duration,
    pub storage: StorageSettings,
    /// Invalid values that were replaced by defaults. Logged once tracing is up,
    /// since configuration is loaded before the subscriber is installed.
    warnings: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Never fails: every
    /// invalid value falls back to its default and is recorded as a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let server_port = parse_or_default(&lookup, "PORT", SERVER_PORT, &mut warnings);

        let local_roots = parse_local_roots(lookup("LOCAL_STORAGE_PATHS"), &mut warnings);

        let mut max_file_size_gb =
            parse_or_default(&lookup, "MAX_FILE_SIZE_GB", MAX_FILE_SIZE_GB, &mut warnings);
        if max_file_size_gb == 0 {
            warnings.push(format!(
                "MAX_FILE_SIZE_GB must be greater than 0, using default {}",
                MAX_FILE_SIZE_GB
            ));
            max_file_size_gb = MAX_FILE_SIZE_GB;
        }

        let mut max_concurrent_transfers = parse_or_default(
            &lookup,
            "MAX_CONCURRENT_TRANSFERS",
            MAX_CONCURRENT_TRANSFERS,
            &mut warnings,
        );
        if max_concurrent_transfers == 0 {
            warnings.push(format!(
                "MAX_CONCURRENT_TRANSFERS must be greater than 0, using default {}",
                MAX_CONCURRENT_TRANSFERS
            ));
            max_concurrent_transfers = MAX_CONCURRENT_TRANSFERS;
        }

        let transfer_fail_fast =
            parse_or_default(&lookup, "TRANSFER_FAIL_FAST", false, &mut warnings);

        let retention_secs = parse_or_default(
            &lookup,
            "TRANSFER_JOB_RETENTION_SECS",
            TRANSFER_JOB_RETENTION_SECS,
            &mut warnings,
        );

        let s3 = S3Settings {
            region: lookup("S3_REGION")
                .or_else(|| lookup("AWS_REGION"))
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| S3_REGION.to_string()),
            endpoint: lookup("S3_ENDPOINT")
                .or_else(|| lookup("AWS_S3_ENDPOINT"))
                .filter(|e| !e.trim().is_empty()),
        };

        Config {
            server_port,
            cors_origins,
            environment,
            max_concurrent_transfers,
            transfer_fail_fast,
            transfer_job_retention: Duration::from_secs(retention_secs),
            storage: StorageSettings {
                local_roots,
                max_file_size_bytes: max_file_size_gb.saturating_mul(BYTES_PER_GB),
                s3,
            },
            warnings,
        }
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn settings_handle(&self) -> SettingsHandle {
        SettingsHandle::new(self.storage.clone())
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T, warnings: &mut Vec<String>) -> T
where
    T: FromStr + Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().to_lowercase().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warnings.push(format!(
                    "Invalid value '{}' for {}, using default {}",
                    raw, key, default
                ));
                default
            }
        },
    }
}

fn parse_local_roots(raw: Option<String>, warnings: &mut Vec<String>) -> Vec<PathBuf> {
    let Some(raw) = raw else {
        return vec![PathBuf::from(LOCAL_STORAGE_PATH)];
    };

    let mut roots = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let path = PathBuf::from(entry);
        if !path.is_absolute() {
            warnings.push(format!(
                "Ignoring relative path '{}' in LOCAL_STORAGE_PATHS",
                entry
            ));
            continue;
        }
        roots.push(path);
    }

    if roots.is_empty() {
        warnings.push(format!(
            "LOCAL_STORAGE_PATHS contained no usable paths, using default {}",
            LOCAL_STORAGE_PATH
        ));
        roots.push(PathBuf::from(LOCAL_STORAGE_PATH));
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.server_port, 4000);
        assert_eq!(config.max_concurrent_transfers, 2);
        assert_eq!(config.storage.max_file_size_bytes, 20 * BYTES_PER_GB);
        assert_eq!(
            config.storage.local_roots,
            vec![PathBuf::from("/opt/app-root/src")]
        );
        assert!(!config.transfer_fail_fast);
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_local_roots_in_order() {
        let config = config_from(&[("LOCAL_STORAGE_PATHS", "/mnt/models, /mnt/data,,")]);
        assert_eq!(
            config.storage.local_roots,
            vec![PathBuf::from("/mnt/models"), PathBuf::from("/mnt/data")]
        );
    }

    #[test]
    fn test_invalid_values_fall_back_with_warning() {
        let config = config_from(&[
            ("MAX_FILE_SIZE_GB", "lots"),
            ("MAX_CONCURRENT_TRANSFERS", "0"),
            ("PORT", "99999"),
        ]);
        assert_eq!(config.storage.max_file_size_bytes, 20 * BYTES_PER_GB);
        assert_eq!(config.max_concurrent_transfers, 2);
        assert_eq!(config.server_port, 4000);
        assert_eq!(config.warnings().len(), 3);
    }

    #[test]
    fn test_relative_roots_ignored() {
        let config = config_from(&[("LOCAL_STORAGE_PATHS", "relative/dir")]);
        assert_eq!(
            config.storage.local_roots,
            vec![PathBuf::from("/opt/app-root/src")]
        );
        assert_eq!(config.warnings().len(), 2);
    }

    #[test]
    fn test_settings_handle_update() {
        let config = config_from(&[("LOCAL_STORAGE_PATHS", "/a")]);
        let handle = config.settings_handle();
        handle.update(|s| s.local_roots.push(PathBuf::from("/b")));
        assert_eq!(handle.local_root(1), Some(PathBuf::from("/b")));
        assert_eq!(handle.local_root(2), None);
    }
}
