//! Render and HTTP come straight from Crux; picture storage is our own.

mod asset_fs;

pub use self::asset_fs::{AssetFs, AssetFsOperation, AssetFsOutput};
pub use crux_core::render::Render;
pub use crux_http::Http;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub render: Render<Event>,
    pub asset_fs: AssetFs<Event>,
}
