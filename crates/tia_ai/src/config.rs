//! Application configuration: optional TOML file, defaults for every field, credentials
//! from the environment.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tia_core::error::AppError;
use tia_core::querylog::QueryLogConfig;

use crate::corpus::CorpusConfig;
use crate::evidence::EvidenceConfig;
use crate::llm::{BackendConfig, Credentials};
use crate::resolve::ResolverConfig;
use crate::suggest::SuggestConfig;
use crate::vision::VisionConfig;

pub const CONFIG_ENV: &str = "TIA_CONFIG";
pub const WEB_SEARCH_URL_ENV: &str = "TIA_WEB_SEARCH_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub query_log: QueryLogConfig,
    #[serde(default)]
    pub suggest: SuggestConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    /// JSON search endpoint; the built-in institute directory is used when unset.
    #[serde(default)]
    pub web_search_url: Option<String>,
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, AppError> {
        toml::from_str(text).map_err(|e| {
            AppError::new("CONFIG_PARSE_FAILED", "Failed to parse configuration")
                .with_details(e.to_string())
        })
    }

    /// Read `path` if given, else `$TIA_CONFIG` if set, else defaults. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let env_path = std::env::var(CONFIG_ENV).ok().filter(|v| !v.trim().is_empty());
        let path = path
            .map(|p| p.to_path_buf())
            .or_else(|| env_path.map(Into::into));

        let mut config = match path {
            Some(p) => {
                let text = fs::read_to_string(&p).map_err(|e| {
                    AppError::new("CONFIG_READ_FAILED", "Failed to read configuration file")
                        .with_details(format!("path={}; err={}", p.display(), e))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var(WEB_SEARCH_URL_ENV) {
            if !url.trim().is_empty() {
                config.web_search_url = Some(url);
            }
        }
        Ok(config)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::from_env()
    }
}
