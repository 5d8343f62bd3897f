//! Local cache for remote profile and lead pictures.
//!
//! Every cacheable URL maps to a stable [`CacheKey`] built from the owner id
//! and file name found in its path. The key names a file under the cache
//! directory; once that file exists it is served as a `file://` URI and never
//! re-fetched or invalidated here. Cleanup is the host's business.
//!
//! Every download writes into its own staging file next to the cache file and
//! is renamed over it only on success. Two concurrent resolves of the same new
//! URL both download and the last rename wins; a failed attempt only ever
//! removes its own staging file.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::rpc::truncate_url;
use crate::{DEFAULT_DOWNLOAD_TIMEOUT_MS, MAX_TIMEOUT_MS};

const KEY_HASH_HEX_LEN: usize = 16;
const MAX_KEY_FILENAME_LEN: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the cache key for `url`, or `None` when the URL has no usable
/// owner/file pair. `None` is permanent for that URL: render it remotely.
///
/// The path is percent-decoded before splitting so object-store URLs that
/// encode the whole object path in one segment (`o/avatars%2F17%2Fme.jpg`)
/// still yield `17` and `me.jpg`. Query and fragment never take part.
pub fn derive_key(url: &str) -> Option<CacheKey> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let segments: Vec<String> = parsed
        .path_segments()?
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect();

    let parts = segments
        .iter()
        .flat_map(|segment| segment.split('/'))
        .filter(|part| !part.is_empty());

    let mut owner = None;
    let mut filename = None;
    for part in parts {
        owner = filename.take();
        filename = Some(part);
    }

    let (owner, filename) = (owner?, filename?);
    if [owner, filename].iter().any(|p| *p == "." || *p == "..") {
        return None;
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(owner.as_bytes());
    hasher.update(&[0]);
    hasher.update(filename.as_bytes());
    let digest = hasher.finalize().to_hex();

    let readable: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let readable = tail(&readable, MAX_KEY_FILENAME_LEN);

    Some(CacheKey(format!(
        "{}_{}",
        &digest[..KEY_HASH_HEX_LEN],
        readable
    )))
}

// Keeps the end of the name so the extension survives truncation.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[s.len() - max..]
    }
}

pub fn file_uri(path: &str) -> String {
    format!("file://{path}")
}

/// `cache_dir/key` as a shell path string.
pub fn cache_path(cache_dir: &str, key: &CacheKey) -> String {
    format!("{}/{}", cache_dir.trim_end_matches('/'), key)
}

/// A fresh staging path in `cache_dir` for one download attempt of `key`.
pub fn staging_path(cache_dir: &str, key: &CacheKey) -> String {
    format!("{}/{}", cache_dir.trim_end_matches('/'), staging_file_name(key))
}

fn staging_file_name(key: &CacheKey) -> String {
    format!("{key}.{}.part", Uuid::new_v4().simple())
}

/// Per-key lifecycle: `Unresolved → Downloading → CachedLocally`, and back to
/// `Unresolved` when a download fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetState {
    #[default]
    Unresolved,
    Downloading,
    CachedLocally,
}

impl AssetState {
    pub fn state_name(&self) -> &'static str {
        match self {
            AssetState::Unresolved => "unresolved",
            AssetState::Downloading => "downloading",
            AssetState::CachedLocally => "cached_locally",
        }
    }

    pub fn can_transition_to(&self, next: AssetState) -> bool {
        use AssetState::*;
        matches!(
            (self, next),
            (Unresolved, Downloading)
                | (Unresolved, CachedLocally)
                | (Downloading, CachedLocally)
                | (Downloading, Unresolved)
                // A concurrent resolve of the same key may restart the download.
                | (Downloading, Downloading)
                | (CachedLocally, CachedLocally)
        )
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssetError {
    #[error("download failed with status {status}")]
    Download { status: u16 },

    #[error("download failed: {message}")]
    Transfer { message: String },

    #[error("download timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("storage error at {path}: {message}")]
    Storage { path: String, message: String },
}

impl AssetError {
    /// A 4xx answer will not change on retry; everything else might.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AssetError::Download { status } if (400..500).contains(status))
    }
}

/// Platform storage primitives the cache is built on.
///
/// The cache only ever downloads into staging files and removes staging
/// files; the cache file itself is written by `rename` alone.
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool, AssetError>;
    async fn create_dir_all(&self, path: &Path) -> Result<(), AssetError>;
    /// Returns the HTTP status code of the transfer.
    async fn download(&self, from_url: &str, to_file: &Path) -> Result<u16, AssetError>;
    /// Moves `from` over `to`, replacing any existing file.
    async fn rename(&self, from: &Path, to: &Path) -> Result<(), AssetError>;
    async fn remove(&self, path: &Path) -> Result<(), AssetError>;
}

#[derive(Clone, Debug)]
pub struct AssetCacheConfig {
    pub cache_dir: PathBuf,
    pub download_timeout_ms: u64,
}

impl AssetCacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            download_timeout_ms: DEFAULT_DOWNLOAD_TIMEOUT_MS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cache_dir",
                reason: "must not be empty".into(),
            });
        }
        if !self.cache_dir.is_absolute() {
            return Err(ConfigError::Invalid {
                field: "cache_dir",
                reason: "must be an absolute path".into(),
            });
        }
        if self
            .cache_dir
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ConfigError::Invalid {
                field: "cache_dir",
                reason: "must not contain '..'".into(),
            });
        }
        if self.download_timeout_ms == 0 || self.download_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid {
                field: "download_timeout_ms",
                reason: format!("must be in 1..={MAX_TIMEOUT_MS}"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct AssetCacheMetrics {
    pub hits: AtomicU64,
    pub downloads: AtomicU64,
    pub download_failures: AtomicU64,
    pub uncacheable: AtomicU64,
}

impl AssetCacheMetrics {
    pub fn snapshot(&self) -> AssetCacheMetricsSnapshot {
        AssetCacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            download_failures: self.download_failures.load(Ordering::Relaxed),
            uncacheable: self.uncacheable.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetCacheMetricsSnapshot {
    pub hits: u64,
    pub downloads: u64,
    pub download_failures: u64,
    pub uncacheable: u64,
}

pub struct AssetCache<S: AssetStore> {
    store: Arc<S>,
    config: AssetCacheConfig,
    dir_ready: OnceCell<()>,
    states: Mutex<HashMap<CacheKey, AssetState>>,
    metrics: Arc<AssetCacheMetrics>,
}

impl<S: AssetStore> AssetCache<S> {
    pub fn new(store: Arc<S>, config: AssetCacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            dir_ready: OnceCell::new(),
            states: Mutex::new(HashMap::new()),
            metrics: Arc::new(AssetCacheMetrics::default()),
        })
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.config.cache_dir.join(key.as_str())
    }

    pub fn state(&self, key: &CacheKey) -> AssetState {
        self.states().get(key).copied().unwrap_or_default()
    }

    pub fn metrics(&self) -> AssetCacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resolves `url` to something renderable: a `file://` URI when the
    /// picture is (or just got) cached, the original URL otherwise.
    #[instrument(skip(self), fields(url = %truncate_url(url)))]
    pub async fn resolve(&self, url: &str) -> String {
        let Some(key) = derive_key(url) else {
            self.metrics.uncacheable.fetch_add(1, Ordering::Relaxed);
            debug!("no cache key, rendering remote");
            return url.to_string();
        };

        let path = self.path_for(&key);

        match self.store.exists(&path).await {
            Ok(true) => {
                self.transition(&key, AssetState::CachedLocally);
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return file_uri(&path.to_string_lossy());
            }
            Ok(false) => {}
            Err(e) => warn!(key = %key, error = %e, "exists check failed, downloading"),
        }

        if self.state(&key) != AssetState::CachedLocally {
            self.transition(&key, AssetState::Downloading);
        }

        let staging = self.config.cache_dir.join(staging_file_name(&key));
        match self.download(url, &staging, &path).await {
            Ok(()) => {
                self.transition(&key, AssetState::CachedLocally);
                self.metrics.downloads.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cached");
                file_uri(&path.to_string_lossy())
            }
            Err(e) => {
                self.metrics.download_failures.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.store.remove(&staging).await {
                    debug!(key = %key, error = %e, "staging file cleanup failed");
                }

                // A concurrent resolve of the same key may have succeeded.
                if self.state(&key) == AssetState::CachedLocally {
                    debug!(key = %key, error = %e, "download failed, serving sibling copy");
                    return file_uri(&path.to_string_lossy());
                }

                self.transition(&key, AssetState::Unresolved);
                warn!(
                    key = %key,
                    error = %e,
                    retryable = e.is_retryable(),
                    "download failed, rendering remote"
                );
                url.to_string()
            }
        }
    }

    async fn download(&self, url: &str, staging: &Path, path: &Path) -> Result<(), AssetError> {
        self.dir_ready
            .get_or_try_init(|| self.store.create_dir_all(&self.config.cache_dir))
            .await?;

        let timeout_ms = self.config.download_timeout_ms;
        let status = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.store.download(url, staging),
        )
        .await
        .map_err(|_| AssetError::Timeout { timeout_ms })??;

        if !(200..300).contains(&status) {
            return Err(AssetError::Download { status });
        }
        self.store.rename(staging, path).await
    }

    fn transition(&self, key: &CacheKey, next: AssetState) {
        let mut states = self.states();
        let current = states.get(key).copied().unwrap_or_default();
        if !current.can_transition_to(next) {
            debug!(
                key = %key,
                from = current.state_name(),
                to = next.state_name(),
                "unexpected asset transition"
            );
        }
        states.insert(key.clone(), next);
    }

    fn states(&self) -> MutexGuard<'_, HashMap<CacheKey, AssetState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
