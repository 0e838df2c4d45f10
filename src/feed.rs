use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::*;
use crate::repo::{Repo, RepoError, RepoResult};
use crate::users::{AuthorCache, UserDirectory};

/// Backfill page size.
pub const PAGE_SIZE: usize = 12;

/// Client-held sync position. `since` bounds the trusted local cache from
/// below, `latest` is the newest item the client already holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub since: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    /// Identity of the last item at `since`, to resume inside a timestamp tie.
    pub since_id: Option<ArtworkId>,
}

impl Cursor {
    pub fn new(since: DateTime<Utc>, latest: DateTime<Utc>) -> Self {
        Self { since, latest, since_id: None }
    }

    pub fn is_ordered(&self) -> bool {
        self.since <= self.latest
    }
}

#[derive(Default)]
struct Window {
    backfill: Vec<ArtworkSummary>,
    new: Vec<ArtworkSummary>,
    tombstones: Vec<ArtworkId>,
}

/// Stateless two-cursor sync over the catalog.
#[derive(Clone)]
pub struct FeedEngine {
    repo: Arc<dyn Repo>,
    users: Arc<dyn UserDirectory>,
    page_size: usize,
}

impl FeedEngine {
    pub fn new(repo: Arc<dyn Repo>, users: Arc<dyn UserDirectory>) -> Self {
        Self { repo, users, page_size: PAGE_SIZE }
    }

    /// Artworks of everyone `requester` follows and can see.
    pub async fn stream(&self, requester: UserId, cursor: &Cursor) -> RepoResult<Stream> {
        let mut authors = Vec::new();
        for author in self.users.followed(requester).await? {
            if self.users.is_visible_to(author, requester).await? {
                authors.push(author);
            }
        }
        let w = self.window(&authors, cursor).await?;
        Ok(Stream { artworks: w.backfill, new_artworks: w.new, deleted_ids: w.tombstones })
    }

    /// One author's artworks with the same windows, plus their live total.
    pub async fn author_artworks(&self, requester: UserId, alias: &str, cursor: &Cursor) -> RepoResult<AuthorArtworks> {
        let author = self.users.find_by_alias(alias).await?;
        if !self.users.is_visible_to(author.id, requester).await? {
            return Err(RepoError::NotFound);
        }
        let w = self.window(&[author.id], cursor).await?;
        let total = self.repo.count_live(author.id).await?;
        Ok(AuthorArtworks { artworks: w.backfill, new_artworks: w.new, deleted_ids: w.tombstones, total })
    }

    async fn window(&self, authors: &[UserId], cursor: &Cursor) -> RepoResult<Window> {
        if authors.is_empty() {
            return Ok(Window::default());
        }
        let backfill = if cursor.is_ordered() {
            self.repo.backfill(authors, cursor.since, cursor.since_id.as_deref(), self.page_size).await?
        } else {
            Vec::new()
        };
        let new = self.repo.added_after(authors, cursor.latest).await?;
        let tombstones = self.repo.deleted_between(authors, cursor.latest, cursor.since).await?;

        let mut cache = AuthorCache::new(self.users.as_ref());
        Ok(Window {
            backfill: summarize(&mut cache, backfill).await?,
            new: summarize(&mut cache, new).await?,
            tombstones,
        })
    }
}

async fn summarize(cache: &mut AuthorCache<'_>, entries: Vec<ArtworkEntry>) -> RepoResult<Vec<ArtworkSummary>> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let author = match cache.get(entry.artwork.author_id).await {
            Ok(u) => u,
            Err(RepoError::NotFound) => {
                warn!(artwork = %entry.artwork.id, "author missing from directory, skipping entry");
                continue;
            }
            Err(e) => return Err(e),
        };
        out.push(ArtworkSummary {
            id: entry.artwork.id,
            title: entry.artwork.title,
            author_alias: author.alias,
            author_name: author.name,
            format: entry.artwork.format,
            added: entry.artwork.added,
            comments: entry.comments,
            reactions: entry.reactions,
        });
    }
    Ok(out)
}
