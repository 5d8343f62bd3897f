use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::asset_cache::{AssetState, CacheKey};
use crate::collection::Collection;
use crate::config::CoreConfig;
use crate::event::ListId;
use crate::grouping::{flat_rows, group_runs, layout_rows, CollapsePolicy, Group, Row};
use crate::record::Record;
use crate::rpc::Filters;
use crate::AppError;

/// One mounted infinite-scroll list.
#[derive(Debug, Clone)]
pub struct ListState {
    pub endpoint: String,
    pub filters: Filters,
    pub group_by: Option<String>,
    pub collection: Collection<Record>,
    /// `start` index of every section the user expanded.
    pub expanded: BTreeSet<usize>,
    /// Only set for a first-page failure; later failures are silent.
    pub error: Option<AppError>,
    pub open: bool,
}

impl ListState {
    pub fn new(endpoint: impl Into<String>, filters: Filters, group_by: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            filters,
            group_by,
            collection: Collection::new(),
            expanded: BTreeSet::new(),
            error: None,
            open: true,
        }
    }

    /// Empties the list and invalidates any response still in flight.
    pub fn reset(&mut self) {
        self.collection.reset();
        self.expanded.clear();
        self.error = None;
    }

    pub fn toggle_group(&mut self, start: usize) {
        if !self.expanded.remove(&start) {
            self.expanded.insert(start);
        }
    }

    pub fn groups(&self) -> Option<Vec<Group<Value>>> {
        let field = self.group_by.as_deref()?;
        Some(group_runs(self.collection.items(), |record| {
            record.key_of(field)
        }))
    }

    pub fn rows(&self, policy: CollapsePolicy) -> Vec<Row<Value>> {
        match self.groups() {
            Some(groups) => layout_rows(&groups, &self.expanded, policy),
            None => flat_rows(self.collection.len()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetEntry {
    /// `None` when the URL has no cache key.
    pub key: Option<CacheKey>,
    pub state: AssetState,
    /// What the view should render right now; `None` until first resolved.
    pub uri: Option<String>,
    pub in_flight: bool,
    /// Staging file of the download in flight; the only path a failed
    /// download may remove.
    pub staging: Option<String>,
}

impl AssetEntry {
    pub fn remote(url: &str) -> Self {
        Self {
            key: None,
            state: AssetState::Unresolved,
            uri: Some(url.to_string()),
            in_flight: false,
            staging: None,
        }
    }
}

#[derive(Default)]
pub struct Model {
    pub config: Option<CoreConfig>,
    pub lists: HashMap<ListId, ListState>,
    pub assets: HashMap<String, AssetEntry>,
    pub asset_dir_ready: bool,
    pub error: Option<AppError>,
}

impl Model {
    /// Whether another picture URL sharing `key` already has the file.
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.assets
            .values()
            .any(|e| e.key.as_ref() == Some(key) && e.state == AssetState::CachedLocally)
    }

    pub fn collapse_policy(&self) -> CollapsePolicy {
        self.config
            .as_ref()
            .map(CoreConfig::collapse_policy)
            .unwrap_or_default()
    }
}
