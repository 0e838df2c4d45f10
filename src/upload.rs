use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::models::*;
use crate::repo::{Repo, RepoError};
use crate::storage::BlobStore;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 41_943_040;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("image exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("{} isn't a valid file type; choose among: {}", detected.as_deref().unwrap_or("unknown"), ImageFormat::ACCEPTED_MIME.join(", "))]
    UnsupportedFormat { detected: Option<String> },
    #[error("artwork already published")]
    Duplicate,
    /// The tombstone was purged between lookup and revival; a retry publishes afresh.
    #[error("artwork is being reclaimed, retry")]
    Reclaimed,
    #[error("catalog: {0}")]
    Catalog(#[from] RepoError),
    #[error("storage: {0}")]
    Storage(String),
}

pub struct Upload {
    pub author: UserId,
    pub kind: ArtworkType,
    pub title: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub id: ArtworkId,
    pub format: ImageFormat,
    pub updated: DateTime<Utc>,
    pub resurrected: bool,
}

/// Content identity of a payload: lowercase hex SHA-256.
pub fn content_id(bytes: &[u8]) -> ArtworkId {
    hex::encode(Sha256::digest(bytes))
}

/// Sniffs the payload and maps it onto an accepted format.
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, UploadError> {
    let mime = infer::get(bytes).map(|t| t.mime_type());
    mime.and_then(ImageFormat::from_mime)
        .ok_or_else(|| UploadError::UnsupportedFormat { detected: mime.map(str::to_string) })
}

/// Publishes uploads: catalog row first, blob second, compensating the row
/// when the blob cannot be written.
#[derive(Clone)]
pub struct UploadPipeline {
    repo: Arc<dyn Repo>,
    blobs: Arc<dyn BlobStore>,
    max_bytes: usize,
}

impl UploadPipeline {
    pub fn new(repo: Arc<dyn Repo>, blobs: Arc<dyn BlobStore>, max_bytes: usize) -> Self {
        Self { repo, blobs, max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn publish(&self, upload: Upload) -> Result<Published, UploadError> {
        if upload.bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge { limit: self.max_bytes });
        }
        let format = detect_format(&upload.bytes)?;
        let id = content_id(&upload.bytes);
        let at = now();

        match self.repo.find_artwork(&id).await {
            Ok(existing) if existing.deleted && existing.author_id == upload.author => {
                return self.resurrect(&id, existing.format, upload, at).await;
            }
            Ok(_) => return Err(UploadError::Duplicate),
            Err(RepoError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let new = NewArtwork { id: id.clone(), author_id: upload.author, kind: upload.kind, format, title: upload.title, added: at };
        let artwork = match self.repo.insert_artwork(new).await {
            Ok(a) => a,
            Err(RepoError::Conflict) => return Err(UploadError::Duplicate),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.write_blob(&id, format, &upload.bytes, false).await {
            if let Err(undo) = self.repo.purge_artwork(&id, upload.author).await {
                error!(artwork = %id, "failed to roll back catalog row after blob failure: {undo}");
            }
            return Err(e);
        }
        info!(artwork = %id, author = %upload.author, %format, "artwork published");
        Ok(Published { id, format, updated: artwork.updated, resurrected: false })
    }

    async fn resurrect(
        &self,
        id: &str,
        format: ImageFormat,
        upload: Upload,
        at: DateTime<Utc>,
    ) -> Result<Published, UploadError> {
        let artwork = match self.repo.resurrect_artwork(id, upload.author, upload.kind, upload.title, at).await {
            Ok(a) => a,
            Err(RepoError::NotFound) => {
                warn!(artwork = %id, "tombstone vanished before revival");
                return Err(UploadError::Reclaimed);
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = self.write_blob(id, format, &upload.bytes, true).await {
            if let Err(undo) = self.repo.soft_delete_artwork(id, upload.author, at).await {
                error!(artwork = %id, "failed to re-tombstone after blob failure: {undo}");
            }
            return Err(e);
        }
        info!(artwork = %id, author = %upload.author, "artwork resurrected");
        Ok(Published { id: id.to_string(), format, updated: artwork.updated, resurrected: true })
    }

    /// A revived artwork keeps the blob it still has on disk; a fresh one
    /// always writes, since a leftover file may be mid-reclaim.
    async fn write_blob(&self, id: &str, format: ImageFormat, bytes: &[u8], reuse: bool) -> Result<(), UploadError> {
        if reuse {
            match self.blobs.exists(id, format).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => warn!(artwork = %id, "blob existence check failed, writing anyway: {e}"),
            }
        }
        self.blobs.save(id, format, bytes).await.map_err(|e| {
            error!(artwork = %id, "blob write failed: {e}");
            UploadError::Storage(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_is_sha256_hex() {
        assert_eq!(content_id(b"abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert!(is_content_hash(&content_id(b"")));
    }

    #[test]
    fn unsupported_format_lists_accepted_types() {
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
        let err = detect_format(gif).unwrap_err();
        assert_eq!(
            err.to_string(),
            "image/gif isn't a valid file type; choose among: image/jpeg, image/png, image/webp"
        );
        assert!(matches!(detect_format(b"plain text"), Err(UploadError::UnsupportedFormat { detected: None })));
    }

    #[test]
    fn detects_accepted_formats() {
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]).unwrap(), ImageFormat::Jpg);
        assert_eq!(detect_format(b"RIFF\x00\x00\x00\x00WEBPVP8 ").unwrap(), ImageFormat::Webp);
        assert_eq!(detect_format(b"\x89PNG\r\n\x1a\n").unwrap(), ImageFormat::Png);
    }
}
