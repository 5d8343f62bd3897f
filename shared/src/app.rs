use tracing::{debug, info, warn};

use crate::asset_cache::{
    cache_path, derive_key, file_uri, staging_path, AssetError, AssetState, CacheKey,
};
use crate::capabilities::Capabilities;
use crate::collection::{FetchTicket, LoadOutcome, LoadSkipped, Page};
use crate::config::{ConfigError, CoreConfig};
use crate::event::{Event, ListId};
use crate::model::{AssetEntry, ListState, Model};
use crate::record::Record;
use crate::rpc::{page_from_http, truncate_url, ApiEnvelope, FetchError, PageRequest};
use crate::view::ViewModel;
use crate::AppError;

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        debug!(event = event.name(), user = event.is_user_initiated(), "update");

        match event {
            Event::Configure(config) => {
                Self::configure(*config, model);
                caps.render.render();
            }

            Event::ListOpened {
                list,
                endpoint,
                filters,
                group_by,
            } => {
                match model.lists.get_mut(&list) {
                    Some(state) => {
                        state.reset();
                        state.endpoint = endpoint;
                        state.filters = filters;
                        state.group_by = group_by;
                        state.open = true;
                    }
                    None => {
                        model
                            .lists
                            .insert(list.clone(), ListState::new(endpoint, filters, group_by));
                    }
                }

                Self::load_next_page(&list, model, caps);
                caps.render.render();
            }

            Event::ListClosed { list } => {
                if let Some(state) = model.lists.get_mut(&list) {
                    state.reset();
                    state.open = false;
                }
                caps.render.render();
            }

            Event::FiltersChanged { list, filters } => {
                let Some(state) = model.lists.get_mut(&list) else {
                    debug!(list = %list, "filters for unknown list");
                    return;
                };
                state.reset();
                state.filters = filters;

                Self::load_next_page(&list, model, caps);
                caps.render.render();
            }

            Event::RefreshRequested { list } => {
                let Some(state) = model.lists.get_mut(&list) else {
                    return;
                };
                state.reset();

                Self::load_next_page(&list, model, caps);
                caps.render.render();
            }

            Event::LoadMoreRequested { list } => {
                if Self::load_next_page(&list, model, caps) {
                    caps.render.render();
                }
            }

            Event::GroupToggled { list, start } => {
                if let Some(state) = model.lists.get_mut(&list) {
                    state.toggle_group(start);
                    caps.render.render();
                }
            }

            Event::PageFetched {
                list,
                ticket,
                result,
            } => {
                Self::apply_page(&list, ticket, *result, model);
                caps.render.render();
            }

            Event::AssetRequested { url } => {
                Self::request_asset(url, model, caps);
                caps.render.render();
            }

            Event::AssetProbed { url, key, result } => {
                Self::asset_probed(url, key, result, model, caps);
                caps.render.render();
            }

            Event::AssetFetched { url, key, result } => {
                let Some(path) = Self::asset_path(model, &key) else {
                    return;
                };
                let sibling_cached = model.is_cached(&key);
                let Some(entry) = model.assets.get_mut(&url) else {
                    debug!(key = %key, "download finished for a forgotten picture");
                    return;
                };
                entry.in_flight = false;
                let staging = entry.staging.take();

                match result {
                    Ok(()) => {
                        model.asset_dir_ready = true;
                        entry.state = AssetState::CachedLocally;
                        entry.uri = Some(file_uri(&path));
                        debug!(key = %key, "picture cached");
                    }
                    Err(e) => {
                        if sibling_cached {
                            debug!(key = %key, error = %e, "download failed, serving sibling copy");
                            entry.state = AssetState::CachedLocally;
                            entry.uri = Some(file_uri(&path));
                        } else {
                            warn!(
                                key = %key,
                                error = %e,
                                retryable = e.is_retryable(),
                                "picture download failed, rendering remote"
                            );
                            entry.state = AssetState::Unresolved;
                            entry.uri = Some(url);
                        }
                        if let Some(staging) = staging {
                            caps.asset_fs.remove(staging, move |result| {
                                Event::AssetCleanedUp { key, result }
                            });
                        }
                    }
                }
                caps.render.render();
            }

            Event::AssetCleanedUp { key, result } => {
                if let Err(e) = result {
                    debug!(key = %key, error = %e, "staging file cleanup failed");
                }
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        ViewModel::from(model)
    }
}

impl App {
    fn configure(config: CoreConfig, model: &mut Model) {
        if let Err(e) = config.validate() {
            warn!(error = %e, "rejected configuration");
            model.error = Some(AppError::from(e));
            return;
        }

        let dir_changed = model
            .config
            .as_ref()
            .map_or(true, |old| old.asset_cache_dir != config.asset_cache_dir);
        if dir_changed {
            model.assets.clear();
            model.asset_dir_ready = false;
        }

        info!(
            base_url = %truncate_url(&config.api_base_url),
            page_limit = config.page_limit,
            "core configured"
        );
        model.config = Some(config);
        model.error = None;
    }

    /// Dispatches the next page request for `list` unless one is already in
    /// flight or the list is exhausted. Returns whether the model changed.
    fn load_next_page(list: &ListId, model: &mut Model, caps: &Capabilities) -> bool {
        let Some(state) = model.lists.get_mut(list) else {
            debug!(list = %list, "load for unknown list");
            return false;
        };
        if !state.open {
            return false;
        }
        let Some(config) = model.config.as_ref() else {
            state.error = Some(AppError::from(ConfigError::Missing));
            return true;
        };

        let ticket = match state.collection.begin_load(config.page_limit) {
            Ok(ticket) => ticket,
            Err(LoadSkipped::Busy) => {
                debug!(list = %list, "load already in flight, dropping request");
                return false;
            }
            Err(LoadSkipped::Exhausted) => {
                debug!(list = %list, "no more pages");
                return false;
            }
        };

        let request = PageRequest::new(&state.endpoint, ticket, &state.filters);
        let url = match request.url(&config.api_base_url) {
            Ok(url) => url,
            Err(e) => {
                let outcome = state.collection.complete(ticket, Err(e));
                Self::record_outcome(list, state, outcome);
                return true;
            }
        };

        debug!(
            list = %list,
            page = ticket.page,
            generation = ticket.generation,
            request_id = %request.request_id,
            "fetching page"
        );

        let list = list.clone();
        caps.http
            .get(url.as_str())
            .header("X-Request-Id", request.request_id.as_str())
            .expect_json::<ApiEnvelope>()
            .send(move |result| Event::PageFetched {
                list,
                ticket,
                result: Box::new(page_from_http(result, ticket.limit)),
            });

        true
    }

    fn apply_page(
        list: &ListId,
        ticket: FetchTicket,
        result: Result<Page<Record>, FetchError>,
        model: &mut Model,
    ) {
        let Some(state) = model.lists.get_mut(list) else {
            debug!(list = %list, "page for unknown list dropped");
            return;
        };
        let outcome = state.collection.complete(ticket, result);
        Self::record_outcome(list, state, outcome);
    }

    fn record_outcome(list: &ListId, state: &mut ListState, outcome: LoadOutcome<FetchError>) {
        match outcome {
            LoadOutcome::Merged {
                added,
                dropped,
                has_more,
            } => {
                state.error = None;
                debug!(list = %list, added, dropped, has_more, "page merged");
            }
            LoadOutcome::Stale => {
                debug!(list = %list, "discarding stale page");
            }
            LoadOutcome::Failed { error, terminal } => {
                warn!(list = %list, terminal, error = %error, "page fetch failed");
                if terminal {
                    state.error = Some(AppError::from(error).with_context("list", list.as_str()));
                }
            }
            LoadOutcome::Skipped(_) => {}
        }
    }

    fn request_asset(url: String, model: &mut Model, caps: &Capabilities) {
        if let Some(entry) = model.assets.get(&url) {
            if entry.in_flight || entry.state == AssetState::CachedLocally {
                return;
            }
        }

        let Some(key) = derive_key(&url) else {
            debug!(url = %truncate_url(&url), "no cache key, rendering remote");
            model.assets.insert(url.clone(), AssetEntry::remote(&url));
            return;
        };
        let Some(path) = Self::asset_path(model, &key) else {
            model.assets.insert(url.clone(), AssetEntry::remote(&url));
            return;
        };

        let entry = model.assets.entry(url.clone()).or_default();
        entry.key = Some(key.clone());
        entry.in_flight = true;

        caps.asset_fs.exists(path, move |result| Event::AssetProbed { url, key, result });
    }

    fn asset_probed(
        url: String,
        key: CacheKey,
        result: Result<bool, AssetError>,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let Some(config) = model.config.as_ref() else {
            return;
        };
        let path = cache_path(&config.asset_cache_dir, &key);
        let staging = staging_path(&config.asset_cache_dir, &key);
        let create_dir = (!model.asset_dir_ready).then(|| config.asset_cache_dir.clone());
        let Some(entry) = model.assets.get_mut(&url) else {
            return;
        };

        match result {
            Ok(true) => {
                entry.state = AssetState::CachedLocally;
                entry.uri = Some(file_uri(&path));
                entry.in_flight = false;
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(key = %key, error = %e, "cache lookup failed, downloading"),
        }

        entry.state = AssetState::Downloading;
        entry.staging = Some(staging.clone());
        caps.asset_fs
            .download(create_dir, url.clone(), staging, path, move |result| {
                Event::AssetFetched { url, key, result }
            });
    }

    fn asset_path(model: &Model, key: &CacheKey) -> Option<String> {
        model
            .config
            .as_ref()
            .map(|config| cache_path(&config.asset_cache_dir, key))
    }
}
