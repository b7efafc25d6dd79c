//! Metadata lookups inside a workspace
//!
//! Layout after the metadata download step:
//! `<ws>/<repo>/roles/<image>/meta` and `<ws>/<repo>/roles/common/meta`.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::metadata::{KeyRecord, RoleMeta};

/// Role holding metadata shared by every image
pub const COMMON_ROLE: &str = "common";

const EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// Meta directories for one image
#[derive(Debug, Clone)]
pub struct MetadataLayout {
    image: Dir,
    common: Dir,
}

impl MetadataLayout {
    pub fn new(workspace: &Path, git_repo: &str, image_name: &str) -> Self {
        let roles = Dir::new(workspace.join(git_repo).join("roles"));
        Self {
            image: roles.subdir(image_name).subdir("meta"),
            common: roles.subdir(COMMON_ROLE).subdir("meta"),
        }
    }

    pub fn image_dir(&self) -> &Dir {
        &self.image
    }

    pub fn common_dir(&self) -> &Dir {
        &self.common
    }

    /// Container count for an environment: image override, then common
    /// override, then `default`
    pub async fn container_count(&self, environment: &str, default: i64) -> i64 {
        for dir in [&self.image, &self.common] {
            let meta: Option<RoleMeta> = read_first(dir, "main").await;
            if let Some(count) = meta.and_then(|m| m.containers_for(environment)) {
                debug!("Container override {} from {}", count, dir.path().display());
                return count;
            }
        }
        default
    }

    /// Key records, common first, then image-specific
    pub async fn key_records(&self, environment: &str) -> (Vec<KeyRecord>, Vec<KeyRecord>) {
        let base = format!("{}.etcd2", environment);
        let common = read_first(&self.common, &base).await.unwrap_or_default();
        let image = read_first(&self.image, &base).await.unwrap_or_default();
        (common, image)
    }
}

fn candidates(dir: &Dir, base: &str) -> Vec<File> {
    EXTENSIONS
        .iter()
        .map(|ext| dir.file(&format!("{}.{}", base, ext)))
        .collect()
}

/// Parse the first existing `<base>.<ext>`; malformed files yield `None`
async fn read_first<T: DeserializeOwned>(dir: &Dir, base: &str) -> Option<T> {
    for file in candidates(dir, base) {
        if !file.exists().await {
            continue;
        }
        return match file.read_yaml::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring {}: {}", file.path().display(), e);
                None
            }
        };
    }
    None
}
