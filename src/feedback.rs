use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::visible_artwork;
use crate::models::*;
use crate::repo::{Repo, RepoError, RepoResult};
use crate::users::{AuthorCache, UserDirectory};

/// Comments and reactions, with the same ban visibility as the catalog.
#[derive(Clone)]
pub struct Feedback {
    repo: Arc<dyn Repo>,
    users: Arc<dyn UserDirectory>,
}

impl Feedback {
    pub fn new(repo: Arc<dyn Repo>, users: Arc<dyn UserDirectory>) -> Self {
        Self { repo, users }
    }

    pub async fn set_reaction(&self, artwork: &str, user: UserId, kind: ReactionKind) -> RepoResult<Change> {
        visible_artwork(self.repo.as_ref(), self.users.as_ref(), artwork, user).await?;
        let change = self.repo.set_reaction(artwork, user, kind, now()).await?;
        debug!(%artwork, %user, reaction = kind.as_str(), ?change, "reaction set");
        Ok(change)
    }

    pub async fn remove_reaction(&self, artwork: &str, user: UserId) -> RepoResult<()> {
        self.repo.remove_reaction(artwork, user).await
    }

    pub async fn add_comment(&self, artwork: &str, user: UserId, text: String) -> RepoResult<Comment> {
        AddCommentRequest { comment: text.clone() }.validate().map_err(RepoError::Invalid)?;
        visible_artwork(self.repo.as_ref(), self.users.as_ref(), artwork, user).await?;
        let comment = Comment { id: Uuid::new_v4(), artwork_id: artwork.to_string(), author_id: user, text, date: now() };
        self.repo.add_comment(comment).await
    }

    pub async fn delete_comment(&self, artwork: &str, comment: Uuid, user: UserId) -> RepoResult<()> {
        self.repo.delete_comment(artwork, comment, user).await
    }

    pub async fn comments(&self, artwork: &str, viewer: UserId) -> RepoResult<Vec<CommentView>> {
        visible_artwork(self.repo.as_ref(), self.users.as_ref(), artwork, viewer).await?;
        let mut cache = AuthorCache::new(self.users.as_ref());
        let mut out = Vec::new();
        for c in self.repo.list_comments(artwork).await? {
            if !self.users.is_visible_to(c.author_id, viewer).await? {
                continue;
            }
            let Some(author) = listed_author(&mut cache, c.author_id).await? else { continue };
            out.push(CommentView { id: c.id, author_alias: author.alias, author_name: author.name, comment: c.text, date: c.date });
        }
        Ok(out)
    }

    pub async fn reactions(&self, artwork: &str, viewer: UserId) -> RepoResult<Vec<ReactionView>> {
        visible_artwork(self.repo.as_ref(), self.users.as_ref(), artwork, viewer).await?;
        let mut cache = AuthorCache::new(self.users.as_ref());
        let mut out = Vec::new();
        for r in self.repo.list_reactions(artwork).await? {
            if !self.users.is_visible_to(r.user_id, viewer).await? {
                continue;
            }
            let Some(author) = listed_author(&mut cache, r.user_id).await? else { continue };
            out.push(ReactionView { author_alias: author.alias, author_name: author.name, reaction: r.kind, date: r.date });
        }
        Ok(out)
    }
}

/// Authors gone from the directory drop out of listings; any other lookup
/// failure fails the listing.
async fn listed_author(cache: &mut AuthorCache<'_>, id: UserId) -> RepoResult<Option<User>> {
    match cache.get(id).await {
        Ok(user) => Ok(Some(user)),
        Err(RepoError::NotFound) => {
            warn!(user = %id, "author missing from directory, skipping entry");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
