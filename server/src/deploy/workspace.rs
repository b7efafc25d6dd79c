//! Per-run scratch directory
//!
//! A workspace lives at `<temp>/<environment>/<image>-<suffix>` and is removed
//! when the run ends, whichever way it ends. [`Workspace::release`] is the
//! normal path; `Drop` catches early returns and panics.

use std::path::Path;

use tracing::{debug, warn};

use crate::errors::ServerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils::random_string;

/// Length of the random directory suffix
pub const SUFFIX_LEN: usize = 16;

#[derive(Debug)]
pub struct Workspace {
    dir: Dir,
    released: bool,
}

impl Workspace {
    /// Create a fresh, uniquely named workspace directory
    pub async fn create(
        temp_root: &Path,
        environment: &str,
        image_name: &str,
    ) -> Result<Self, ServerError> {
        let name = format!("{}-{}", image_name, random_string(SUFFIX_LEN));
        let dir = Dir::new(temp_root.join(environment).join(name));
        dir.create().await?;
        debug!("Created workspace {}", dir.path().display());

        Ok(Self {
            dir,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path as passed to deploy scripts
    pub fn arg(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    pub fn file(&self, name: &str) -> File {
        self.dir.file(name)
    }

    /// Remove the directory tree. On failure `Drop` tries once more.
    pub async fn release(mut self) -> Result<(), ServerError> {
        let result = self.dir.delete().await;
        self.released = result.is_ok();
        result
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.dir.delete_blocking() {
            warn!(
                "Failed to remove workspace {}: {}",
                self.dir.path().display(),
                e
            );
        }
    }
}
