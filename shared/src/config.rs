use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use thiserror::Error;

use crate::grouping::CollapsePolicy;
use crate::rpc::validate_base_url;
use crate::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("core is not configured")]
    Missing,
}

/// Settings pushed by the shell once at startup (and again on account switch).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub api_base_url: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Absolute directory the shell reserves for cached pictures.
    pub asset_cache_dir: String,
    #[serde(default = "default_expand_singletons")]
    pub expand_singleton_groups: bool,
}

fn default_page_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

fn default_expand_singletons() -> bool {
    true
}

impl CoreConfig {
    pub fn new(api_base_url: impl Into<String>, asset_cache_dir: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            page_limit: DEFAULT_PAGE_LIMIT,
            asset_cache_dir: asset_cache_dir.into(),
            expand_singleton_groups: default_expand_singletons(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_base_url(&self.api_base_url).map_err(|e| ConfigError::Invalid {
            field: "api_base_url",
            reason: e.to_string(),
        })?;

        if self.page_limit == 0 || self.page_limit > MAX_PAGE_LIMIT {
            return Err(ConfigError::Invalid {
                field: "page_limit",
                reason: format!("must be in 1..={MAX_PAGE_LIMIT}"),
            });
        }

        let dir = Path::new(&self.asset_cache_dir);
        if self.asset_cache_dir.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "asset_cache_dir",
                reason: "must not be empty".into(),
            });
        }
        if !dir.is_absolute() {
            return Err(ConfigError::Invalid {
                field: "asset_cache_dir",
                reason: "must be an absolute path".into(),
            });
        }
        if dir.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ConfigError::Invalid {
                field: "asset_cache_dir",
                reason: "must not contain '..'".into(),
            });
        }

        Ok(())
    }

    pub fn collapse_policy(&self) -> CollapsePolicy {
        CollapsePolicy {
            expand_singletons: self.expand_singleton_groups,
        }
    }
}
