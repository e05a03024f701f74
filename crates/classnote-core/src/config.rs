//! Worker configuration.
//!
//! Everything the worker needs to know about the application it serves:
//! which cache generation is current, which assets to pre-populate, and
//! how to behave when the network is gone.
//!
//! Configuration is stored at `~/.config/classnote/config.json`. Missing
//! fields fall back to the ClassNote defaults.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::storage::is_valid_generation_name;
use crate::error::WorkerError;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "classnote";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How install treats a failing same-origin asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StaticAssetPolicy {
    /// One failed asset aborts the whole install and nothing is stored
    #[default]
    AllOrNothing,
    /// Each asset is stored independently; failures are skipped
    PerAsset,
}

/// What a failed network fetch turns into when no cached fallback exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfflineFallback {
    /// Synthetic `503 Service Unavailable` with body `Offline`
    #[default]
    ServiceUnavailable,
    /// Surface the network error to the caller
    Propagate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix shared by every generation this application owns
    pub cache_prefix: String,
    pub version: String,
    /// Base URL the relative asset paths resolve against
    pub base_url: String,
    pub static_assets: Vec<String>,
    pub external_assets: Vec<String>,
    /// Served to navigation requests when the network is down
    pub root_document: String,
    /// Opened when a notification is clicked
    pub app_root: String,
    pub static_asset_policy: StaticAssetPolicy,
    pub offline_fallback: OfflineFallback,
    pub request_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "classnote-".to_string(),
            version: "v3".to_string(),
            base_url: "http://localhost:8080/".to_string(),
            static_assets: vec![
                "./".to_string(),
                "./index.html".to_string(),
                "./manifest.json".to_string(),
            ],
            external_assets: vec![
                "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css"
                    .to_string(),
                "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap"
                    .to_string(),
                "https://cdnjs.cloudflare.com/ajax/libs/jspdf/2.5.1/jspdf.umd.min.js".to_string(),
            ],
            root_document: "./index.html".to_string(),
            app_root: "./".to_string(),
            static_asset_policy: StaticAssetPolicy::default(),
            offline_fallback: OfflineFallback::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl WorkerConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Tag of the current cache generation, e.g. `classnote-v3`.
    pub fn generation(&self) -> String {
        format!("{}{}", self.cache_prefix, self.version)
    }

    pub fn base(&self) -> Result<Url, WorkerError> {
        Url::parse(&self.base_url).map_err(|e| WorkerError::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })
    }

    /// Resolve a manifest entry (relative or absolute) against the base URL.
    pub fn resolve(&self, asset: &str) -> Result<Url, WorkerError> {
        self.base()?.join(asset).map_err(|e| WorkerError::InvalidUrl {
            url: asset.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn resolved_static_assets(&self) -> Result<Vec<Url>, WorkerError> {
        self.static_assets.iter().map(|a| self.resolve(a)).collect()
    }

    pub fn resolved_external_assets(&self) -> Result<Vec<Url>, WorkerError> {
        self.external_assets.iter().map(|a| self.resolve(a)).collect()
    }

    /// Check every URL the worker will ever resolve, so a typo fails at
    /// startup rather than on the first offline navigation.
    pub fn validate(&self) -> Result<(), WorkerError> {
        let generation = self.generation();
        if !is_valid_generation_name(&generation) {
            return Err(WorkerError::InvalidGeneration(generation));
        }
        self.resolved_static_assets()?;
        self.resolved_external_assets()?;
        self.resolve(&self.root_document)?;
        self.resolve(&self.app_root)?;
        Ok(())
    }

    /// A generation name belongs to this application when it carries the prefix.
    pub fn owns_generation(&self, name: &str) -> bool {
        name.starts_with(&self.cache_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_generation() {
        let config = WorkerConfig::default();
        assert_eq!(config.generation(), "classnote-v3");
        assert!(config.owns_generation("classnote-v2"));
        assert!(!config.owns_generation("other-app-v1"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let config = WorkerConfig {
            base_url: "https://notes.example/app/".to_string(),
            ..Default::default()
        };
        let statics = config.resolved_static_assets().expect("static assets resolve");
        assert_eq!(statics[0].as_str(), "https://notes.example/app/");
        assert_eq!(statics[1].as_str(), "https://notes.example/app/index.html");

        let externals = config.resolved_external_assets().expect("external assets resolve");
        assert_eq!(externals[0].host_str(), Some("cdnjs.cloudflare.com"));
    }

    #[test]
    fn test_validate_rejects_bad_base() {
        let config = WorkerConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::InvalidUrl { .. })));
    }

    #[test]
    fn test_validate_rejects_unsafe_generation() {
        for (prefix, version) in [("classnote ", "v3"), ("classnote-", "../v3"), ("", "")] {
            let config = WorkerConfig {
                cache_prefix: prefix.to_string(),
                version: version.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(WorkerError::InvalidGeneration(_))),
                "{prefix:?} + {version:?}"
            );
        }
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"version": "v4", "offline_fallback": "propagate"}"#;
        let config: WorkerConfig = serde_json::from_str(json).expect("partial config parses");
        assert_eq!(config.generation(), "classnote-v4");
        assert_eq!(config.offline_fallback, OfflineFallback::Propagate);
        assert_eq!(config.static_asset_policy, StaticAssetPolicy::AllOrNothing);
        assert_eq!(config.static_assets.len(), 3);
    }
}
