//! Managed directory of uploaded face images.
//!
//! Images are stored as `<uuid><extension>` directly under the base
//! directory. Only names this store generated are ever resolved, so a
//! record or request can never point outside the directory.

use std::path::{Component, Path, PathBuf};

use jarvis_shared::constants::DEFAULT_IMAGE_EXTENSION;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

/// Accept `.png`, `png`, `.JPG`...; produce a lowercase extension with a
/// leading dot.
fn normalize_extension(extension: Option<&str>) -> Result<String, ServerError> {
    let Some(raw) = extension.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(DEFAULT_IMAGE_EXTENSION.to_string());
    };
    let bare = raw.strip_prefix('.').unwrap_or(raw);
    if bare.is_empty() || bare.len() > 8 || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ServerError::InvalidExtension(raw.to_string()));
    }
    Ok(format!(".{}", bare.to_ascii_lowercase()))
}

/// Where a freshly written image ended up.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub id: Uuid,
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FaceStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FaceStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::FaceStorage(format!(
                "Failed to create faces directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Face store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn store_image(
        &self,
        data: &[u8],
        extension: Option<&str>,
    ) -> Result<StoredImage, ServerError> {
        if data.is_empty() {
            return Err(ServerError::EmptyImage);
        }
        if data.len() > self.max_size {
            return Err(ServerError::ImageTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let extension = normalize_extension(extension)?;
        let id = Uuid::new_v4();
        let filename = format!("{id}{extension}");
        let path = self.safe_path(&filename)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::FaceStorage(format!("Failed to write image {}: {}", filename, e))
        })?;

        debug!(id = %id, size = data.len(), "Stored face image");
        Ok(StoredImage { id, filename, path })
    }

    pub async fn read_image(&self, filename: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(filename)?;

        if !path.exists() {
            return Err(ServerError::ImageNotFound(filename.to_string()));
        }

        fs::read(&path).await.map_err(|e| {
            ServerError::FaceStorage(format!("Failed to read image {}: {}", filename, e))
        })
    }

    pub async fn delete_image(&self, filename: &str) -> Result<(), ServerError> {
        let path = self.safe_path(filename)?;

        if !path.exists() {
            return Err(ServerError::ImageNotFound(filename.to_string()));
        }

        fs::remove_file(&path).await.map_err(|e| {
            ServerError::FaceStorage(format!("Failed to delete image {}: {}", filename, e))
        })?;

        debug!(filename, "Deleted face image");
        Ok(())
    }

    /// Resolve a bare file name inside the managed directory.
    fn safe_path(&self, filename: &str) -> Result<PathBuf, ServerError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(ServerError::BadRequest(
                "Path traversal detected".to_string(),
            ));
        }
        ensure_within(&self.base_path, &self.base_path.join(filename))
    }
}
