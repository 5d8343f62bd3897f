#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod app;
pub mod asset_cache;
pub mod capabilities;
pub mod collection;
pub mod config;
pub mod event;
pub mod grouping;
pub mod model;
pub mod pager;
pub mod record;
pub mod rpc;
pub mod view;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use crux_core::{render::Render, App as CruxApp};

pub use asset_cache::{derive_key, AssetCache, AssetError, AssetState, AssetStore, CacheKey};
pub use collection::{Collection, FetchTicket, Keyed, LoadOutcome, LoadSkipped, Page};
pub use config::{ConfigError, CoreConfig};
pub use event::{Event, ListId};
pub use grouping::{group_runs, layout_rows, CollapsePolicy, Group, Row};
pub use model::Model;
pub use pager::{PageSource, Pager, PagerConfig};
pub use record::{Record, RecordId};
pub use rpc::{ApiEnvelope, FetchError, Filters, PageRequest};
pub use view::ViewModel;

pub const FIRST_PAGE: u32 = 1;
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 200;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DOWNLOAD_TIMEOUT_MS: u64 = 60_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Rejected,
    InvalidResponse,
    Storage,
    Configuration,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Rejected => "REQUEST_REJECTED",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::Storage => "STORAGE_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Storage => ErrorSeverity::Transient,
            Self::Rejected | Self::InvalidResponse => ErrorSeverity::Permanent,
            Self::Configuration | Self::Internal => ErrorSeverity::Fatal,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Storage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The server took too long to respond. Please try again.".into(),
            ErrorKind::Rejected => self.message.clone(),
            ErrorKind::InvalidResponse => {
                "The server sent data this app could not read. Please contact support if this persists."
                    .into()
            }
            ErrorKind::Storage => {
                "Unable to save data on this device. Please free up some storage space.".into()
            }
            ErrorKind::Configuration => {
                "The app is not set up correctly. Please restart the app.".into()
            }
            ErrorKind::Internal => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for AppError {}

impl From<FetchError> for AppError {
    fn from(e: FetchError) -> Self {
        let kind = match &e {
            FetchError::Network { .. } => ErrorKind::Network,
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::Rejected { .. } => ErrorKind::Rejected,
            FetchError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            FetchError::InvalidEndpoint { .. } => ErrorKind::Configuration,
        };
        let message = match e {
            FetchError::Rejected { message } => message,
            other => other.to_string(),
        };
        AppError::new(kind, message)
    }
}

impl From<AssetError> for AppError {
    fn from(e: AssetError) -> Self {
        let kind = match &e {
            AssetError::Download { .. } if !e.is_retryable() => ErrorKind::Rejected,
            AssetError::Download { .. } | AssetError::Transfer { .. } => ErrorKind::Network,
            AssetError::Timeout { .. } => ErrorKind::Timeout,
            AssetError::Storage { .. } => ErrorKind::Storage,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}
