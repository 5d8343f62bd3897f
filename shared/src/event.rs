use serde::{Deserialize, Serialize};
use std::fmt;

use crate::asset_cache::{AssetError, CacheKey};
use crate::collection::{FetchTicket, Page};
use crate::config::CoreConfig;
use crate::record::Record;
use crate::rpc::{FetchError, Filters};

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

// Screen-chosen name of one infinite-scroll list, e.g. "collections" or "leads".
typed_id!(ListId);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    Configure(Box<CoreConfig>),

    // Lists
    ListOpened {
        list: ListId,
        endpoint: String,
        filters: Filters,
        /// Record field whose adjacent equal values collapse into one section.
        group_by: Option<String>,
    },
    ListClosed {
        list: ListId,
    },
    FiltersChanged {
        list: ListId,
        filters: Filters,
    },
    RefreshRequested {
        list: ListId,
    },
    LoadMoreRequested {
        list: ListId,
    },
    GroupToggled {
        list: ListId,
        start: usize,
    },

    // Pictures
    AssetRequested {
        url: String,
    },

    // Capability responses; never sent by the shell.
    #[serde(skip)]
    PageFetched {
        list: ListId,
        ticket: FetchTicket,
        result: Box<Result<Page<Record>, FetchError>>,
    },
    #[serde(skip)]
    AssetProbed {
        url: String,
        key: CacheKey,
        result: Result<bool, AssetError>,
    },
    #[serde(skip)]
    AssetFetched {
        url: String,
        key: CacheKey,
        result: Result<(), AssetError>,
    },
    #[serde(skip)]
    AssetCleanedUp {
        key: CacheKey,
        result: Result<(), AssetError>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Configure(_) => "configure",
            Event::ListOpened { .. } => "list_opened",
            Event::ListClosed { .. } => "list_closed",
            Event::FiltersChanged { .. } => "filters_changed",
            Event::RefreshRequested { .. } => "refresh_requested",
            Event::LoadMoreRequested { .. } => "load_more_requested",
            Event::GroupToggled { .. } => "group_toggled",
            Event::AssetRequested { .. } => "asset_requested",
            Event::PageFetched { .. } => "page_fetched",
            Event::AssetProbed { .. } => "asset_probed",
            Event::AssetFetched { .. } => "asset_fetched",
            Event::AssetCleanedUp { .. } => "asset_cleaned_up",
        }
    }

    pub fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Event::ListOpened { .. }
                | Event::ListClosed { .. }
                | Event::FiltersChanged { .. }
                | Event::RefreshRequested { .. }
                | Event::LoadMoreRequested { .. }
                | Event::GroupToggled { .. }
        )
    }
}
