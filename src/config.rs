use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{BulkMode, DuplicatePolicy};
use crate::error::IngestError;

pub const CONFIG_ENV_VAR: &str = "BRAVO_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "bravo.json";

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_UPDATE_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_PERCENTILE_BATCH_SIZE: usize = 1_000_000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: Option<StoreSection>,
    #[serde(default)]
    pub sequence_cache_collection: Option<String>,
    #[serde(default)]
    pub load: Option<LoadSection>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreSection {
    #[serde(default)]
    pub path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoadSection {
    #[serde(default)]
    pub insert_batch_size: Option<usize>,
    #[serde(default)]
    pub update_batch_size: Option<usize>,
    #[serde(default)]
    pub percentile_batch_size: Option<usize>,
    #[serde(default)]
    pub bulk_mode: Option<BulkMode>,
    #[serde(default)]
    pub duplicate_policy: Option<DuplicatePolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub path: Utf8PathBuf,
    pub name: String,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSettings {
    pub insert_batch_size: usize,
    pub update_batch_size: usize,
    pub percentile_batch_size: usize,
    pub bulk_mode: BulkMode,
    pub duplicate_policy: DuplicatePolicy,
    pub sequence_cache_collection: String,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            update_batch_size: DEFAULT_UPDATE_BATCH_SIZE,
            percentile_batch_size: DEFAULT_PERCENTILE_BATCH_SIZE,
            bulk_mode: BulkMode::default(),
            duplicate_policy: DuplicatePolicy::default(),
            sequence_cache_collection: "igv_cache".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub source: Option<Utf8PathBuf>,
    pub store: StoreSettings,
    pub load: LoadSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path first, then `BRAVO_CONFIG_FILE`, then `./bravo.json`.
    /// Without any of them the built-in defaults apply.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<ResolvedConfig, IngestError> {
        let env_path = std::env::var(CONFIG_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(Utf8PathBuf::from);
        Self::resolve_from(path, env_path.as_deref())
    }

    pub fn resolve_from(
        path: Option<&Utf8Path>,
        env_path: Option<&Utf8Path>,
    ) -> Result<ResolvedConfig, IngestError> {
        let config_path = match (path, env_path) {
            (Some(path), _) => Some(path.to_path_buf()),
            (None, Some(path)) => Some(path.to_path_buf()),
            (None, None) => {
                let local = Utf8PathBuf::from(DEFAULT_CONFIG_FILE);
                local.as_std_path().exists().then_some(local)
            }
        };

        let Some(config_path) = config_path else {
            let mut resolved = Self::resolve_config(Config::default())?;
            resolved.source = None;
            return Ok(resolved);
        };

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| IngestError::ConfigParse(err.to_string()))?;

        let mut resolved = Self::resolve_config(config)?;
        resolved.source = Some(config_path);
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, IngestError> {
        let store_section = config.store.unwrap_or_default();
        let store = StoreSettings {
            path: store_section
                .path
                .unwrap_or_else(|| Utf8PathBuf::from("bravo.sqlite")),
            name: store_section.name.unwrap_or_else(|| "bravo".to_string()),
            busy_timeout_ms: store_section.busy_timeout_ms.unwrap_or(60_000),
        };

        let defaults = LoadSettings::default();
        let load_section = config.load.unwrap_or_default();
        let load = LoadSettings {
            insert_batch_size: positive(
                "insert_batch_size",
                load_section.insert_batch_size,
                defaults.insert_batch_size,
            )?,
            update_batch_size: positive(
                "update_batch_size",
                load_section.update_batch_size,
                defaults.update_batch_size,
            )?,
            percentile_batch_size: positive(
                "percentile_batch_size",
                load_section.percentile_batch_size,
                defaults.percentile_batch_size,
            )?,
            bulk_mode: load_section.bulk_mode.unwrap_or(defaults.bulk_mode),
            duplicate_policy: load_section
                .duplicate_policy
                .unwrap_or(defaults.duplicate_policy),
            sequence_cache_collection: config
                .sequence_cache_collection
                .unwrap_or(defaults.sequence_cache_collection),
        };

        if load.sequence_cache_collection.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "sequence_cache_collection must not be empty".to_string(),
            ));
        }
        if store.name.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "store.name must not be empty".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            source: None,
            store,
            load,
        })
    }
}

fn positive(name: &str, value: Option<usize>, default: usize) -> Result<usize, IngestError> {
    match value {
        Some(0) => Err(IngestError::InvalidConfig(format!(
            "load.{name} must be greater than zero"
        ))),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}
