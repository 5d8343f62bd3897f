//! Shell-side file storage for cached pictures.
//!
//! The shell owns the filesystem and the download stack; the core only asks
//! whether a cache file exists, to create the cache directory, to download a
//! URL to a file, to move a file into place, and to remove a file.

use crux_core::capability::{CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::asset_cache::AssetError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssetFsOperation {
    Exists { path: String },
    CreateDir { path: String },
    Download { from_url: String, to_file: String },
    /// Replaces `to` with `from` if it already exists.
    Rename { from: String, to: String },
    Remove { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssetFsOutput {
    Exists(bool),
    DirCreated,
    Downloaded { status_code: u16 },
    Renamed,
    Removed,
    Failed { message: String },
}

impl Operation for AssetFsOperation {
    type Output = AssetFsOutput;
}

impl AssetFsOperation {
    fn path(&self) -> &str {
        match self {
            AssetFsOperation::Exists { path }
            | AssetFsOperation::CreateDir { path }
            | AssetFsOperation::Remove { path } => path,
            AssetFsOperation::Download { to_file, .. } => to_file,
            AssetFsOperation::Rename { to, .. } => to,
        }
    }

    fn unexpected(&self, output: &AssetFsOutput) -> AssetError {
        AssetError::Storage {
            path: self.path().to_string(),
            message: format!("unexpected shell output {output:?}"),
        }
    }
}

#[derive(crux_core::macros::Capability)]
pub struct AssetFs<Ev> {
    context: CapabilityContext<AssetFsOperation, Ev>,
}

impl<Ev> AssetFs<Ev> {
    pub fn new(context: CapabilityContext<AssetFsOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> AssetFs<Ev>
where
    Ev: Send + 'static,
{
    pub fn exists<F>(&self, path: String, make_event: F)
    where
        F: FnOnce(Result<bool, AssetError>) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let operation = AssetFsOperation::Exists { path };
            let result = match context.request_from_shell(operation.clone()).await {
                AssetFsOutput::Exists(found) => Ok(found),
                AssetFsOutput::Failed { message } => Err(AssetError::Storage {
                    path: operation.path().to_string(),
                    message,
                }),
                other => Err(operation.unexpected(&other)),
            };
            context.update_app(make_event(result));
        });
    }

    /// Downloads `from_url` into `staging` and renames it to `to_file`,
    /// creating `create_dir` first when given. Any non-2xx status is an error
    /// and leaves `to_file` untouched.
    pub fn download<F>(
        &self,
        create_dir: Option<String>,
        from_url: String,
        staging: String,
        to_file: String,
        make_event: F,
    ) where
        F: FnOnce(Result<(), AssetError>) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            if let Some(path) = create_dir {
                let operation = AssetFsOperation::CreateDir { path };
                let created = match context.request_from_shell(operation.clone()).await {
                    AssetFsOutput::DirCreated => Ok(()),
                    AssetFsOutput::Failed { message } => Err(AssetError::Storage {
                        path: operation.path().to_string(),
                        message,
                    }),
                    other => Err(operation.unexpected(&other)),
                };
                if let Err(e) = created {
                    context.update_app(make_event(Err(e)));
                    return;
                }
            }

            let operation = AssetFsOperation::Download {
                from_url,
                to_file: staging.clone(),
            };
            let downloaded = match context.request_from_shell(operation.clone()).await {
                AssetFsOutput::Downloaded { status_code } if (200..300).contains(&status_code) => {
                    Ok(())
                }
                AssetFsOutput::Downloaded { status_code } => {
                    Err(AssetError::Download { status: status_code })
                }
                AssetFsOutput::Failed { message } => Err(AssetError::Transfer { message }),
                other => Err(operation.unexpected(&other)),
            };
            if let Err(e) = downloaded {
                context.update_app(make_event(Err(e)));
                return;
            }

            let operation = AssetFsOperation::Rename {
                from: staging,
                to: to_file,
            };
            let result = match context.request_from_shell(operation.clone()).await {
                AssetFsOutput::Renamed => Ok(()),
                AssetFsOutput::Failed { message } => Err(AssetError::Storage {
                    path: operation.path().to_string(),
                    message,
                }),
                other => Err(operation.unexpected(&other)),
            };
            context.update_app(make_event(result));
        });
    }

    pub fn remove<F>(&self, path: String, make_event: F)
    where
        F: FnOnce(Result<(), AssetError>) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let operation = AssetFsOperation::Remove { path };
            let result = match context.request_from_shell(operation.clone()).await {
                AssetFsOutput::Removed => Ok(()),
                AssetFsOutput::Failed { message } => Err(AssetError::Storage {
                    path: operation.path().to_string(),
                    message,
                }),
                other => Err(operation.unexpected(&other)),
            };
            context.update_app(make_event(result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_round_trip_through_json() {
        let op = AssetFsOperation::Download {
            from_url: "https://cdn.example.com/leads/L-9/photo.png".into(),
            to_file: "/cache/abc_photo.png".into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(serde_json::from_str::<AssetFsOperation>(&json).unwrap(), op);
    }

    #[test]
    fn rename_errors_name_the_cache_file() {
        let op = AssetFsOperation::Rename {
            from: "/cache/k.1f2e.part".into(),
            to: "/cache/k".into(),
        };
        assert_eq!(op.path(), "/cache/k");
    }

    #[test]
    fn download_path_is_the_target_file() {
        let op = AssetFsOperation::Download {
            from_url: "https://x/y/z.png".into(),
            to_file: "/cache/k".into(),
        };
        assert_eq!(op.path(), "/cache/k");
        assert!(matches!(
            op.unexpected(&AssetFsOutput::Removed),
            AssetError::Storage { path, .. } if path == "/cache/k"
        ));
    }
}
