use std::{
    io,
    path::{Path, PathBuf},
};

use futures::TryFutureExt;
use tokio::fs;

/// Write `body` to `path`, creating missing parent directories and replacing existing content.
pub(crate) async fn write_output(path: &Path, body: &[u8]) -> Result<(), FilesystemError> {
    // A bare file name has an empty parent, which is the working directory.
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| FilesystemError::new("create directory", parent, error))
            .await?;
    }

    fs::write(path, body)
        .map_err(|error| FilesystemError::new("write", path, error))
        .await
}

/// The output file or one of its parent directories couldn't be written.
#[derive(Debug, thiserror::Error)]
#[error("failed to {action} {}", .path.display())]
pub struct FilesystemError {
    action: &'static str,
    path: PathBuf,
    #[source]
    error: io::Error,
}

impl FilesystemError {
    fn new(action: &'static str, path: &Path, error: io::Error) -> Self {
        Self {
            action,
            path: path.to_path_buf(),
            error,
        }
    }

    /// The path that couldn't be written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
