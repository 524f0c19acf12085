use thiserror::Error;

use crate::gateway::UploadGuard;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    /// Downstream file-record API. Notifications are disabled when unset.
    pub notify_base_url: Option<String>,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Directory holding the user/association database
    pub data_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Container (GCS bucket, local subdirectory) used by every operation
    pub container: String,
    pub upload_guard: UploadGuard,
    /// Root directory for local storage backend
    pub local_storage_path: String,
    /// Path to GCS service account JSON (optional, defaults to the metadata server)
    pub gcs_credentials_file: Option<String>,
    /// GCS project used to create the bucket when it is missing
    pub gcs_project: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            container: "files".to_string(),
            upload_guard: UploadGuard::default(),
            local_storage_path: "./files".to_string(),
            gcs_credentials_file: None,
            gcs_project: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_defaults = ServerConfig::default();
        let storage_defaults = StorageConfig::default();

        let bind_address = var("BIND_ADDRESS").unwrap_or(server_defaults.bind_address);
        let data_dir = var("DATA_DIR").unwrap_or(server_defaults.data_dir);

        let max_upload_size = match var("MAX_UPLOAD_SIZE") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "MAX_UPLOAD_SIZE must be a byte count, got '{raw}'"
                ))
            })?,
            None => 50 * 1024 * 1024, // 50MB
        };

        let backend = match var("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            "local" => StorageBackend::Local,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "STORAGE_BACKEND must be 'local' or 'gcs', got '{other}'"
                )))
            }
        };

        let upload_guard = match var("UPLOAD_GUARD")
            .unwrap_or_else(|| "conditional".to_string())
            .to_lowercase()
            .as_str()
        {
            "conditional" => UploadGuard::Conditional,
            "check" => UploadGuard::CheckThenWrite,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "UPLOAD_GUARD must be 'conditional' or 'check', got '{other}'"
                )))
            }
        };

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig {
                backend,
                container: var("STORAGE_CONTAINER").unwrap_or(storage_defaults.container),
                upload_guard,
                local_storage_path: var("LOCAL_STORAGE_PATH")
                    .unwrap_or(storage_defaults.local_storage_path),
                gcs_credentials_file: var("GCS_CREDENTIALS_FILE"),
                gcs_project: var("GCS_PROJECT"),
            },
            notify_base_url: var("NOTIFY_BASE_URL").filter(|s| !s.trim().is_empty()),
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let container = &self.storage.container;
        if container.is_empty() {
            return Err(ConfigError::ValidationError(
                "STORAGE_CONTAINER cannot be empty".to_string(),
            ));
        }
        if container.contains('/') || container.contains('\\') || container.starts_with('.') {
            return Err(ConfigError::ValidationError(format!(
                "STORAGE_CONTAINER '{container}' must be a single path component"
            )));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Gcs && self.storage.gcs_project.is_none() {
            tracing::warn!(
                "GCS_PROJECT is not set; a missing bucket '{}' cannot be created",
                container
            );
        }

        Ok(())
    }
}
