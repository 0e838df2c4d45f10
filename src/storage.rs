use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{error, warn};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::models::{is_content_hash, ImageFormat};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Binary image store keyed by content hash and format.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Overwrites silently; identical identity means identical bytes.
    async fn save(&self, id: &str, format: ImageFormat, bytes: &[u8]) -> Result<(), BlobError>;
    async fn load(&self, id: &str, format: ImageFormat) -> Result<Vec<u8>, BlobError>;
    async fn exists(&self, id: &str, format: ImageFormat) -> Result<bool, BlobError>;
    async fn delete(&self, id: &str, format: ImageFormat) -> Result<(), BlobError>;
}

// ---------------- Filesystem implementation ----------------
/// One file per artwork, `{root}/{id}.{ext}`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str, format: ImageFormat) -> Result<PathBuf, BlobError> {
        // identities come from URLs; never let one escape the root
        if !is_content_hash(id) {
            return Err(BlobError::NotFound);
        }
        Ok(self.root.join(format!("{id}.{}", format.extension())))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, id: &str, format: ImageFormat, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(id, format)?;
        let tmp = path.with_extension(format!("{}.part", format.extension()));
        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            error!("blob write failed id={id} path={}: {e}", path.display());
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(&self, id: &str, format: ImageFormat) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(id, format)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, id: &str, format: ImageFormat) -> Result<bool, BlobError> {
        let path = self.path_for(id, format)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, id: &str, format: ImageFormat) -> Result<(), BlobError> {
        let path = self.path_for(id, format)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("blob already absent id={id}");
                Err(BlobError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }
}
