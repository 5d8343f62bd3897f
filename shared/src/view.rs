use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::asset_cache::AssetState;
use crate::grouping::Row;
use crate::model::{AssetEntry, ListState, Model};
use crate::record::Record;
use crate::rpc::Filters;
use crate::{CollapsePolicy, UserFacingError};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ViewModel {
    pub is_configured: bool,
    pub error: Option<UserFacingError>,
    /// Open lists by list id.
    pub lists: BTreeMap<String, ListView>,
    /// Pictures by the remote URL the screen asked for.
    pub assets: BTreeMap<String, AssetView>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ListView {
    pub items: Vec<Record>,
    /// Display rows; `Item` rows index into `items`.
    pub rows: Vec<Row<Value>>,
    pub has_more: bool,
    pub is_loading: bool,
    pub error: Option<UserFacingError>,
    pub filters: Filters,
}

impl ListView {
    fn build(list: &ListState, policy: CollapsePolicy) -> Self {
        Self {
            items: list.collection.items().to_vec(),
            rows: list.rows(policy),
            has_more: list.collection.has_more(),
            is_loading: list.collection.is_busy(),
            error: list.error.as_ref().map(UserFacingError::from),
            filters: list.filters.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AssetView {
    /// Local `file://` URI or the remote URL; `None` while the first
    /// lookup is pending.
    pub uri: Option<String>,
    pub state: AssetState,
}

impl From<&AssetEntry> for AssetView {
    fn from(entry: &AssetEntry) -> Self {
        Self {
            uri: entry.uri.clone(),
            state: entry.state,
        }
    }
}

impl From<&Model> for ViewModel {
    fn from(model: &Model) -> Self {
        let policy = model.collapse_policy();

        Self {
            is_configured: model.config.is_some(),
            error: model.error.as_ref().map(UserFacingError::from),
            lists: model
                .lists
                .iter()
                .filter(|(_, list)| list.open)
                .map(|(id, list)| (id.to_string(), ListView::build(list, policy)))
                .collect(),
            assets: model
                .assets
                .iter()
                .map(|(url, entry)| (url.clone(), AssetView::from(entry)))
                .collect(),
        }
    }
}
