use std::sync::Arc;

use tracing::info;

use crate::models::*;
use crate::repo::{Repo, RepoError, RepoResult};
use crate::storage::{BlobError, BlobStore};
use crate::users::UserDirectory;

/// Loads a live artwork that `viewer` is allowed to see. Deleted rows and
/// rows hidden by a ban both read as absent.
pub async fn visible_artwork(
    repo: &dyn Repo,
    users: &dyn UserDirectory,
    id: &str,
    viewer: UserId,
) -> RepoResult<Artwork> {
    let artwork = repo.find_artwork(id).await?;
    if artwork.deleted || !users.is_visible_to(artwork.author_id, viewer).await? {
        return Err(RepoError::NotFound);
    }
    Ok(artwork)
}

#[derive(Clone)]
pub struct Catalog {
    repo: Arc<dyn Repo>,
    users: Arc<dyn UserDirectory>,
    blobs: Arc<dyn BlobStore>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error(transparent)]
    Catalog(#[from] RepoError),
    #[error(transparent)]
    Blob(#[from] BlobError),
}

impl Catalog {
    pub fn new(repo: Arc<dyn Repo>, users: Arc<dyn UserDirectory>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { repo, users, blobs }
    }

    pub async fn get(&self, id: &str, viewer: UserId) -> RepoResult<ArtworkDetail> {
        let artwork = visible_artwork(self.repo.as_ref(), self.users.as_ref(), id, viewer).await?;
        let author = self.users.get_user(artwork.author_id).await?;
        let (comments, reactions) = self.repo.feedback_counts(id).await?;
        Ok(ArtworkDetail {
            id: artwork.id,
            title: artwork.title,
            description: artwork.description,
            year: artwork.year,
            location: artwork.location,
            kind: artwork.kind,
            format: artwork.format,
            created: artwork.created,
            added: artwork.added,
            updated: artwork.updated,
            author_alias: author.alias,
            author_name: author.name,
            comments,
            reactions,
        })
    }

    pub async fn image(&self, id: &str, viewer: UserId) -> Result<(Vec<u8>, ImageFormat), ImageError> {
        let artwork = visible_artwork(self.repo.as_ref(), self.users.as_ref(), id, viewer).await?;
        let bytes = self.blobs.load(id, artwork.format).await?;
        Ok((bytes, artwork.format))
    }

    /// Soft delete by the owner. The blob stays until reconciliation.
    pub async fn delete(&self, id: &str, owner: UserId) -> RepoResult<()> {
        self.repo.soft_delete_artwork(id, owner, now()).await?;
        info!(artwork = %id, "artwork tombstoned");
        Ok(())
    }

    pub async fn set_title(&self, id: &str, owner: UserId, title: &str) -> RepoResult<Change> {
        self.update(id, owner, &ArtworkPatch::title(title)).await
    }

    pub async fn update(&self, id: &str, owner: UserId, patch: &ArtworkPatch) -> RepoResult<Change> {
        patch.validate().map_err(RepoError::Invalid)?;
        self.repo.update_artwork(id, owner, patch, now()).await
    }
}
