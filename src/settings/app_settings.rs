//! Layered application settings: `config.toml` in the config dir, then
//! `MODELSYNC__SECTION__KEY` environment variables.

use crate::services::worker_pool::DEFAULT_CONCURRENCY;
use crate::utils::{get_config_dir, PROJECT_NAME};
use color_eyre::eyre;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.toml";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AppSettings {
    #[serde(default)]
    pub object_store: ObjectStoreSettings,
    #[serde(default)]
    pub cloud_drive: CloudDriveSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ObjectStoreSettings {
    #[serde(default = "ObjectStoreSettings::default_bucket")]
    pub bucket: String,
}

impl ObjectStoreSettings {
    fn default_bucket() -> String {
        "models".to_string()
    }
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            bucket: Self::default_bucket(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CloudDriveSettings {
    #[serde(default)]
    pub access_token: String,
    /// Folder the category tree is created under; the drive root when unset
    #[serde(default)]
    pub root_folder_id: Option<String>,
    /// Override for the Drive REST base url (tests, proxies)
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogSettings {
    #[serde(default = "CatalogSettings::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "CatalogSettings::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl CatalogSettings {
    fn default_endpoint() -> String {
        "http://localhost:8787".to_string()
    }

    fn default_timeout_secs() -> u64 {
        10
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WorkerSettings {
    #[serde(default = "WorkerSettings::default_max_concurrent_legs")]
    pub max_concurrent_legs: usize,
    #[serde(default)]
    pub cancel_siblings_on_failure: bool,
}

impl WorkerSettings {
    fn default_max_concurrent_legs() -> usize {
        DEFAULT_CONCURRENCY
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_legs: Self::default_max_concurrent_legs(),
            cancel_siblings_on_failure: false,
        }
    }
}

impl AppSettings {
    /// Load from the user config directory plus the environment
    pub fn load() -> eyre::Result<Self> {
        Self::load_from(&get_config_dir().join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> eyre::Result<Self> {
        Self::load_layered(path, None)
    }

    /// `env` replaces the process environment when given
    fn load_layered(path: &Path, env: Option<config::Map<String, String>>) -> eyre::Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(PROJECT_NAME.as_str())
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;
        let settings: AppSettings = settings.try_deserialize()?;
        tracing::debug!("settings loaded from {}", path.display());
        Ok(settings)
    }
}
