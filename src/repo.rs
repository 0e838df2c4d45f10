use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::*;
use crate::storage::{BlobError, BlobStore};

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("invalid: {0}")] Invalid(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Outcome of purging one tombstone together with its blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purge {
    /// The row was no longer tombstoned; nothing was touched.
    Skipped,
    /// Row and blob are gone. `blob_found` is false when the file was already absent.
    Purged { blob_found: bool },
    /// The blob could not be removed; the row stays tombstoned for the next pass.
    BlobFailed(String),
}

/// Catalog of artwork metadata. Rows are keyed by content hash and carry a
/// soft-delete flag; only `purge_*` removes them physically.
#[async_trait]
pub trait ArtworkRepo: Send + Sync {
    /// Fails with `Conflict` when a row with the same identity exists, deleted or not.
    async fn insert_artwork(&self, new: NewArtwork) -> RepoResult<Artwork>;
    /// Any state, tombstoned rows included.
    async fn find_artwork(&self, id: &str) -> RepoResult<Artwork>;
    /// Clears the tombstone of a row owned by `author`, resetting its metadata
    /// and dropping the feedback of its previous life. `NotFound` unless the
    /// row is currently deleted and owned.
    async fn resurrect_artwork(
        &self,
        id: &str,
        author: UserId,
        kind: ArtworkType,
        title: Option<String>,
        at: DateTime<Utc>,
    ) -> RepoResult<Artwork>;
    async fn soft_delete_artwork(&self, id: &str, author: UserId, at: DateTime<Utc>) -> RepoResult<()>;
    /// `Unchanged` when the patch is empty or the row is missing, deleted or
    /// owned by someone else; `updated` only moves on a real edit.
    async fn update_artwork(
        &self,
        id: &str,
        author: UserId,
        patch: &ArtworkPatch,
        at: DateTime<Utc>,
    ) -> RepoResult<Change>;
    /// Physical removal regardless of state; used to undo a failed publish.
    async fn purge_artwork(&self, id: &str, author: UserId) -> RepoResult<()>;
    async fn list_deleted(&self) -> RepoResult<Vec<Artwork>>;
    /// Physically removes a still-tombstoned row and deletes its blob as one
    /// step: an insert or revival of the same id waits until both are done.
    async fn purge_deleted(&self, id: &str, blobs: &dyn BlobStore) -> RepoResult<Purge>;
    /// (comments, reactions)
    async fn feedback_counts(&self, id: &str) -> RepoResult<(i64, i64)>;

    /// Live rows older than the cursor, newest first.
    async fn backfill(
        &self,
        authors: &[UserId],
        since: DateTime<Utc>,
        since_id: Option<&str>,
        limit: usize,
    ) -> RepoResult<Vec<ArtworkEntry>>;
    /// Live rows strictly newer than `latest`, newest first.
    async fn added_after(&self, authors: &[UserId], latest: DateTime<Utc>) -> RepoResult<Vec<ArtworkEntry>>;
    /// Tombstoned identities with `latest < added < since`, newest first.
    async fn deleted_between(
        &self,
        authors: &[UserId],
        latest: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> RepoResult<Vec<ArtworkId>>;
    async fn count_live(&self, author: UserId) -> RepoResult<i64>;
}

#[async_trait]
pub trait FeedbackRepo: Send + Sync {
    /// `NotFound` when the artwork is missing or deleted.
    async fn set_reaction(
        &self,
        artwork: &str,
        user: UserId,
        kind: ReactionKind,
        at: DateTime<Utc>,
    ) -> RepoResult<Change>;
    async fn remove_reaction(&self, artwork: &str, user: UserId) -> RepoResult<()>;
    async fn list_reactions(&self, artwork: &str) -> RepoResult<Vec<Reaction>>;
    async fn add_comment(&self, comment: Comment) -> RepoResult<Comment>;
    async fn delete_comment(&self, artwork: &str, comment: Uuid, user: UserId) -> RepoResult<()>;
    async fn list_comments(&self, artwork: &str) -> RepoResult<Vec<Comment>>;
}

pub trait Repo: ArtworkRepo + FeedbackRepo {}

impl<T> Repo for T where T: ArtworkRepo + FeedbackRepo {}

/// Feed ordering: `added` descending, identity descending on ties.
pub fn newest_first(a: &Artwork, b: &Artwork) -> Ordering {
    b.added.cmp(&a.added).then_with(|| b.id.cmp(&a.id))
}

/// Whether `artwork` sorts strictly after the `(since, since_id)` cursor.
pub fn precedes_cursor(artwork: &Artwork, since: DateTime<Utc>, since_id: Option<&str>) -> bool {
    match since_id {
        Some(sid) => artwork.added < since || (artwork.added == since && artwork.id.as_str() < sid),
        None => artwork.added < since,
    }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    #[derive(Default)]
    struct State {
        artworks: HashMap<ArtworkId, Artwork>,
        comments: HashMap<Uuid, Comment>,
        reactions: HashMap<(ArtworkId, UserId), Reaction>,
    }

    impl State {
        fn live(&self, id: &str) -> bool {
            self.artworks.get(id).map(|a| !a.deleted).unwrap_or(false)
        }

        fn drop_feedback(&mut self, id: &str) {
            self.comments.retain(|_, c| c.artwork_id != id);
            self.reactions.retain(|(artwork, _), _| artwork != id);
        }

        fn entry(&self, artwork: &Artwork) -> ArtworkEntry {
            let (comments, reactions) = self.counts(&artwork.id);
            ArtworkEntry { artwork: artwork.clone(), comments, reactions }
        }

        fn counts(&self, id: &str) -> (i64, i64) {
            let comments = self.comments.values().filter(|c| c.artwork_id == id).count() as i64;
            let reactions = self.reactions.keys().filter(|(artwork, _)| artwork == id).count() as i64;
            (comments, reactions)
        }

        fn by_authors<'a>(&'a self, authors: &'a [UserId]) -> impl Iterator<Item = &'a Artwork> + 'a {
            self.artworks.values().filter(move |a| authors.contains(&a.author_id))
        }
    }

    /// Process-local catalog and feedback store; cheap to clone.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        /// Held by purges across the blob delete, and by anything that can
        /// bring an identity back to life.
        purge_lock: Arc<tokio::sync::Mutex<()>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }
    }

    #[async_trait]
    impl ArtworkRepo for InMemRepo {
        async fn insert_artwork(&self, new: NewArtwork) -> RepoResult<Artwork> {
            let _purge = self.purge_lock.lock().await;
            let mut s = self.write()?;
            if s.artworks.contains_key(&new.id) {
                return Err(RepoError::Conflict);
            }
            let artwork = Artwork {
                id: new.id,
                author_id: new.author_id,
                kind: new.kind,
                format: new.format,
                title: new.title,
                description: None,
                year: None,
                location: None,
                created: None,
                added: new.added,
                updated: new.added,
                deleted: false,
            };
            s.artworks.insert(artwork.id.clone(), artwork.clone());
            Ok(artwork)
        }

        async fn find_artwork(&self, id: &str) -> RepoResult<Artwork> {
            self.read()?.artworks.get(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn resurrect_artwork(
            &self,
            id: &str,
            author: UserId,
            kind: ArtworkType,
            title: Option<String>,
            at: DateTime<Utc>,
        ) -> RepoResult<Artwork> {
            let _purge = self.purge_lock.lock().await;
            let mut s = self.write()?;
            let artwork = s
                .artworks
                .get_mut(id)
                .filter(|a| a.deleted && a.author_id == author)
                .ok_or(RepoError::NotFound)?;
            artwork.deleted = false;
            artwork.kind = kind;
            artwork.title = title;
            artwork.description = None;
            artwork.year = None;
            artwork.location = None;
            artwork.created = None;
            artwork.added = at;
            artwork.updated = at;
            let revived = artwork.clone();
            s.drop_feedback(id);
            Ok(revived)
        }

        async fn soft_delete_artwork(&self, id: &str, author: UserId, at: DateTime<Utc>) -> RepoResult<()> {
            let mut s = self.write()?;
            let artwork = s
                .artworks
                .get_mut(id)
                .filter(|a| !a.deleted && a.author_id == author)
                .ok_or(RepoError::NotFound)?;
            artwork.deleted = true;
            artwork.updated = at;
            Ok(())
        }

        async fn update_artwork(
            &self,
            id: &str,
            author: UserId,
            patch: &ArtworkPatch,
            at: DateTime<Utc>,
        ) -> RepoResult<Change> {
            if patch.is_empty() {
                return Ok(Change::Unchanged);
            }
            let mut s = self.write()?;
            let Some(artwork) = s.artworks.get_mut(id).filter(|a| !a.deleted && a.author_id == author) else {
                return Ok(Change::Unchanged);
            };
            if let Some(title) = &patch.title { artwork.title = Some(title.clone()); }
            if let Some(desc) = &patch.description { artwork.description = Some(desc.clone()); }
            if let Some(year) = patch.year { artwork.year = Some(year); }
            if let Some(location) = &patch.location { artwork.location = Some(location.clone()); }
            if let Some(kind) = patch.kind { artwork.kind = kind; }
            if let Some(created) = patch.created { artwork.created = Some(created); }
            artwork.updated = at;
            Ok(Change::Changed(at))
        }

        async fn purge_artwork(&self, id: &str, author: UserId) -> RepoResult<()> {
            let mut s = self.write()?;
            match s.artworks.get(id) {
                Some(a) if a.author_id == author => {
                    s.artworks.remove(id);
                    s.drop_feedback(id);
                    Ok(())
                }
                _ => Err(RepoError::NotFound),
            }
        }

        async fn list_deleted(&self) -> RepoResult<Vec<Artwork>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.artworks.values().filter(|a| a.deleted).cloned().collect();
            v.sort_by(|a, b| a.added.cmp(&b.added));
            Ok(v)
        }

        async fn purge_deleted(&self, id: &str, blobs: &dyn BlobStore) -> RepoResult<Purge> {
            let _purge = self.purge_lock.lock().await;
            let removed = {
                let mut s = self.write()?;
                if s.artworks.get(id).is_some_and(|a| a.deleted) { s.artworks.remove(id) } else { None }
            };
            let Some(artwork) = removed else { return Ok(Purge::Skipped) };
            let blob_found = match blobs.delete(id, artwork.format).await {
                Ok(()) => true,
                Err(BlobError::NotFound) => false,
                Err(e) => {
                    self.write()?.artworks.insert(artwork.id.clone(), artwork);
                    return Ok(Purge::BlobFailed(e.to_string()));
                }
            };
            self.write()?.drop_feedback(id);
            Ok(Purge::Purged { blob_found })
        }

        async fn feedback_counts(&self, id: &str) -> RepoResult<(i64, i64)> {
            Ok(self.read()?.counts(id))
        }

        async fn backfill(
            &self,
            authors: &[UserId],
            since: DateTime<Utc>,
            since_id: Option<&str>,
            limit: usize,
        ) -> RepoResult<Vec<ArtworkEntry>> {
            let s = self.read()?;
            let mut v: Vec<_> = s
                .by_authors(authors)
                .filter(|a| !a.deleted && precedes_cursor(a, since, since_id))
                .collect();
            v.sort_by(|a, b| newest_first(a, b));
            Ok(v.into_iter().take(limit).map(|a| s.entry(a)).collect())
        }

        async fn added_after(&self, authors: &[UserId], latest: DateTime<Utc>) -> RepoResult<Vec<ArtworkEntry>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.by_authors(authors).filter(|a| !a.deleted && a.added > latest).collect();
            v.sort_by(|a, b| newest_first(a, b));
            Ok(v.into_iter().map(|a| s.entry(a)).collect())
        }

        async fn deleted_between(
            &self,
            authors: &[UserId],
            latest: DateTime<Utc>,
            since: DateTime<Utc>,
        ) -> RepoResult<Vec<ArtworkId>> {
            let s = self.read()?;
            let mut v: Vec<_> = s
                .by_authors(authors)
                .filter(|a| a.deleted && latest < a.added && a.added < since)
                .collect();
            v.sort_by(|a, b| newest_first(a, b));
            Ok(v.into_iter().map(|a| a.id.clone()).collect())
        }

        async fn count_live(&self, author: UserId) -> RepoResult<i64> {
            let s = self.read()?;
            Ok(s.artworks.values().filter(|a| a.author_id == author && !a.deleted).count() as i64)
        }
    }

    #[async_trait]
    impl FeedbackRepo for InMemRepo {
        async fn set_reaction(
            &self,
            artwork: &str,
            user: UserId,
            kind: ReactionKind,
            at: DateTime<Utc>,
        ) -> RepoResult<Change> {
            let mut s = self.write()?;
            if !s.live(artwork) {
                return Err(RepoError::NotFound);
            }
            let key = (artwork.to_string(), user);
            if s.reactions.get(&key).map(|r| r.kind == kind).unwrap_or(false) {
                return Ok(Change::Unchanged);
            }
            s.reactions.insert(key, Reaction { artwork_id: artwork.to_string(), user_id: user, kind, date: at });
            Ok(Change::Changed(at))
        }

        async fn remove_reaction(&self, artwork: &str, user: UserId) -> RepoResult<()> {
            let mut s = self.write()?;
            s.reactions.remove(&(artwork.to_string(), user)).map(|_| ()).ok_or(RepoError::NotFound)
        }

        async fn list_reactions(&self, artwork: &str) -> RepoResult<Vec<Reaction>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.reactions.values().filter(|r| r.artwork_id == artwork).cloned().collect();
            v.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.user_id.cmp(&a.user_id)));
            Ok(v)
        }

        async fn add_comment(&self, comment: Comment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.live(&comment.artwork_id) {
                return Err(RepoError::NotFound);
            }
            s.comments.insert(comment.id, comment.clone());
            Ok(comment)
        }

        async fn delete_comment(&self, artwork: &str, comment: Uuid, user: UserId) -> RepoResult<()> {
            let mut s = self.write()?;
            match s.comments.get(&comment) {
                Some(c) if c.artwork_id == artwork && c.author_id == user => {
                    s.comments.remove(&comment);
                    Ok(())
                }
                _ => Err(RepoError::NotFound),
            }
        }

        async fn list_comments(&self, artwork: &str) -> RepoResult<Vec<Comment>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.comments.values().filter(|c| c.artwork_id == artwork).cloned().collect();
            v.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
            Ok(v)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use log::warn;
    use sqlx::{FromRow, Pool, Postgres};

    const ARTWORK_COLUMNS: &str =
        "id, author_id, type AS kind, format, title, description, year, location, created, added, updated, deleted";
    const COUNT_COLUMNS: &str = "(SELECT COUNT(*) FROM artwork_comments c WHERE c.artwork_id = artworks.id) AS comments, \
         (SELECT COUNT(*) FROM artwork_reactions r WHERE r.artwork_id = artworks.id) AS reactions";

    #[derive(FromRow)]
    struct ArtworkRow {
        id: String,
        author_id: Uuid,
        kind: String,
        format: String,
        title: Option<String>,
        description: Option<String>,
        year: Option<i32>,
        location: Option<String>,
        created: Option<DateTime<Utc>>,
        added: DateTime<Utc>,
        updated: DateTime<Utc>,
        deleted: bool,
    }

    impl TryFrom<ArtworkRow> for Artwork {
        type Error = ParseEnumError;

        fn try_from(r: ArtworkRow) -> Result<Self, Self::Error> {
            Ok(Artwork {
                kind: r.kind.parse()?,
                format: r.format.parse()?,
                id: r.id,
                author_id: r.author_id,
                title: r.title,
                description: r.description,
                year: r.year,
                location: r.location,
                created: r.created,
                added: r.added,
                updated: r.updated,
                deleted: r.deleted,
            })
        }
    }

    #[derive(FromRow)]
    struct EntryRow {
        #[sqlx(flatten)]
        artwork: ArtworkRow,
        comments: i64,
        reactions: i64,
    }

    impl TryFrom<EntryRow> for ArtworkEntry {
        type Error = ParseEnumError;

        fn try_from(r: EntryRow) -> Result<Self, Self::Error> {
            Ok(ArtworkEntry { artwork: r.artwork.try_into()?, comments: r.comments, reactions: r.reactions })
        }
    }

    #[derive(FromRow)]
    struct ReactionRow {
        artwork_id: String,
        user_id: Uuid,
        reaction: String,
        date: DateTime<Utc>,
    }

    impl TryFrom<ReactionRow> for Reaction {
        type Error = ParseEnumError;

        fn try_from(r: ReactionRow) -> Result<Self, Self::Error> {
            Ok(Reaction { kind: r.reaction.parse()?, artwork_id: r.artwork_id, user_id: r.user_id, date: r.date })
        }
    }

    #[derive(FromRow)]
    struct CommentRow {
        id: Uuid,
        artwork_id: String,
        user_id: Uuid,
        comment: String,
        date: DateTime<Utc>,
    }

    impl From<CommentRow> for Comment {
        fn from(r: CommentRow) -> Self {
            Comment { id: r.id, artwork_id: r.artwork_id, author_id: r.user_id, text: r.comment, date: r.date }
        }
    }

    /// Keeps every row that decodes; a bad row is logged rather than failing the page.
    fn decode_rows<R, T>(rows: Vec<R>) -> Vec<T>
    where
        T: TryFrom<R, Error = ParseEnumError>,
    {
        rows.into_iter()
            .filter_map(|row| match T::try_from(row) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("skipping undecodable row: {e}");
                    None
                }
            })
            .collect()
    }

    pub(crate) fn db_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => RepoError::NotFound,
            sqlx::Error::Database(ref db) if db.is_check_violation() => RepoError::Invalid(db.message().to_string()),
            other => RepoError::Internal(other.to_string()),
        }
    }

    fn corrupt(e: ParseEnumError) -> RepoError {
        RepoError::Internal(format!("corrupt row: {e}"))
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    #[async_trait]
    impl ArtworkRepo for PgRepo {
        async fn insert_artwork(&self, new: NewArtwork) -> RepoResult<Artwork> {
            let sql = format!(
                "INSERT INTO artworks (id, author_id, type, format, title, added, updated, deleted) \
                 VALUES ($1, $2, $3, $4, $5, $6, $6, FALSE) RETURNING {ARTWORK_COLUMNS}"
            );
            let row = sqlx::query_as::<_, ArtworkRow>(&sql)
                .bind(&new.id)
                .bind(new.author_id)
                .bind(new.kind.as_str())
                .bind(new.format.extension())
                .bind(new.title.as_deref())
                .bind(new.added)
                .fetch_one(&self.pool).await.map_err(db_err)?;
            row.try_into().map_err(corrupt)
        }

        async fn find_artwork(&self, id: &str) -> RepoResult<Artwork> {
            let sql = format!("SELECT {ARTWORK_COLUMNS} FROM artworks WHERE id = $1");
            let row = sqlx::query_as::<_, ArtworkRow>(&sql)
                .bind(id)
                .fetch_one(&self.pool).await.map_err(db_err)?;
            row.try_into().map_err(corrupt)
        }

        async fn resurrect_artwork(
            &self,
            id: &str,
            author: UserId,
            kind: ArtworkType,
            title: Option<String>,
            at: DateTime<Utc>,
        ) -> RepoResult<Artwork> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let sql = format!(
                "UPDATE artworks SET deleted = FALSE, type = $3, title = $4, description = NULL, year = NULL, \
                 location = NULL, created = NULL, added = $5, updated = $5 \
                 WHERE id = $1 AND author_id = $2 AND deleted RETURNING {ARTWORK_COLUMNS}"
            );
            let row = sqlx::query_as::<_, ArtworkRow>(&sql)
                .bind(id)
                .bind(author)
                .bind(kind.as_str())
                .bind(title.as_deref())
                .bind(at)
                .fetch_one(&mut *tx).await.map_err(db_err)?;
            sqlx::query("DELETE FROM artwork_comments WHERE artwork_id = $1")
                .bind(id)
                .execute(&mut *tx).await.map_err(db_err)?;
            sqlx::query("DELETE FROM artwork_reactions WHERE artwork_id = $1")
                .bind(id)
                .execute(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            row.try_into().map_err(corrupt)
        }

        async fn soft_delete_artwork(&self, id: &str, author: UserId, at: DateTime<Utc>) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE artworks SET deleted = TRUE, updated = $3 WHERE id = $1 AND author_id = $2 AND NOT deleted",
            )
            .bind(id)
            .bind(author)
            .bind(at)
            .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn update_artwork(
            &self,
            id: &str,
            author: UserId,
            patch: &ArtworkPatch,
            at: DateTime<Utc>,
        ) -> RepoResult<Change> {
            if patch.is_empty() {
                return Ok(Change::Unchanged);
            }
            let res = sqlx::query(
                "UPDATE artworks SET title = COALESCE($3, title), description = COALESCE($4, description), \
                 year = COALESCE($5, year), location = COALESCE($6, location), type = COALESCE($7, type), \
                 created = COALESCE($8, created), updated = $9 \
                 WHERE id = $1 AND author_id = $2 AND NOT deleted",
            )
            .bind(id)
            .bind(author)
            .bind(patch.title.as_deref())
            .bind(patch.description.as_deref())
            .bind(patch.year)
            .bind(patch.location.as_deref())
            .bind(patch.kind.map(|k| k.as_str()))
            .bind(patch.created)
            .bind(at)
            .execute(&self.pool).await.map_err(db_err)?;
            Ok(if res.rows_affected() == 0 { Change::Unchanged } else { Change::Changed(at) })
        }

        async fn purge_artwork(&self, id: &str, author: UserId) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM artworks WHERE id = $1 AND author_id = $2")
                .bind(id)
                .bind(author)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn list_deleted(&self) -> RepoResult<Vec<Artwork>> {
            let sql = format!("SELECT {ARTWORK_COLUMNS} FROM artworks WHERE deleted ORDER BY added ASC");
            let rows = sqlx::query_as::<_, ArtworkRow>(&sql)
                .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(decode_rows(rows))
        }

        async fn purge_deleted(&self, id: &str, blobs: &dyn BlobStore) -> RepoResult<Purge> {
            // the deleted row stays locked until commit, so a concurrent
            // INSERT of the same id blocks behind the blob removal
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let format: Option<String> = sqlx::query_scalar("DELETE FROM artworks WHERE id = $1 AND deleted RETURNING format")
                .bind(id)
                .fetch_optional(&mut *tx).await.map_err(db_err)?;
            let Some(format) = format else { return Ok(Purge::Skipped) };
            let format: ImageFormat = format.parse().map_err(corrupt)?;
            let blob_found = match blobs.delete(id, format).await {
                Ok(()) => true,
                Err(BlobError::NotFound) => false,
                Err(e) => {
                    tx.rollback().await.map_err(db_err)?;
                    return Ok(Purge::BlobFailed(e.to_string()));
                }
            };
            // comments and reactions go with it (ON DELETE CASCADE)
            tx.commit().await.map_err(db_err)?;
            Ok(Purge::Purged { blob_found })
        }

        async fn feedback_counts(&self, id: &str) -> RepoResult<(i64, i64)> {
            sqlx::query_as::<_, (i64, i64)>(
                "SELECT (SELECT COUNT(*) FROM artwork_comments WHERE artwork_id = $1), \
                        (SELECT COUNT(*) FROM artwork_reactions WHERE artwork_id = $1)",
            )
            .bind(id)
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn backfill(
            &self,
            authors: &[UserId],
            since: DateTime<Utc>,
            since_id: Option<&str>,
            limit: usize,
        ) -> RepoResult<Vec<ArtworkEntry>> {
            let sql = format!(
                "SELECT {ARTWORK_COLUMNS}, {COUNT_COLUMNS} FROM artworks \
                 WHERE author_id = ANY($1) AND NOT deleted \
                   AND (added < $2 OR ($3::TEXT IS NOT NULL AND added = $2 AND id < $3)) \
                 ORDER BY added DESC, id DESC LIMIT $4"
            );
            let rows = sqlx::query_as::<_, EntryRow>(&sql)
                .bind(authors)
                .bind(since)
                .bind(since_id)
                .bind(limit as i64)
                .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(decode_rows(rows))
        }

        async fn added_after(&self, authors: &[UserId], latest: DateTime<Utc>) -> RepoResult<Vec<ArtworkEntry>> {
            let sql = format!(
                "SELECT {ARTWORK_COLUMNS}, {COUNT_COLUMNS} FROM artworks \
                 WHERE author_id = ANY($1) AND NOT deleted AND added > $2 \
                 ORDER BY added DESC, id DESC"
            );
            let rows = sqlx::query_as::<_, EntryRow>(&sql)
                .bind(authors)
                .bind(latest)
                .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(decode_rows(rows))
        }

        async fn deleted_between(
            &self,
            authors: &[UserId],
            latest: DateTime<Utc>,
            since: DateTime<Utc>,
        ) -> RepoResult<Vec<ArtworkId>> {
            sqlx::query_scalar::<_, String>(
                "SELECT id FROM artworks \
                 WHERE author_id = ANY($1) AND deleted AND added > $2 AND added < $3 \
                 ORDER BY added DESC, id DESC",
            )
            .bind(authors)
            .bind(latest)
            .bind(since)
            .fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn count_live(&self, author: UserId) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM artworks WHERE author_id = $1 AND NOT deleted")
                .bind(author)
                .fetch_one(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl FeedbackRepo for PgRepo {
        async fn set_reaction(
            &self,
            artwork: &str,
            user: UserId,
            kind: ReactionKind,
            at: DateTime<Utc>,
        ) -> RepoResult<Change> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            // row lock keeps reconciliation from purging the artwork mid-upsert
            sqlx::query("SELECT 1 FROM artworks WHERE id = $1 AND NOT deleted FOR SHARE")
                .bind(artwork)
                .fetch_optional(&mut *tx).await.map_err(db_err)?
                .ok_or(RepoError::NotFound)?;
            let res = sqlx::query(
                "INSERT INTO artwork_reactions (artwork_id, user_id, reaction, date) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (artwork_id, user_id) DO UPDATE SET reaction = EXCLUDED.reaction, date = EXCLUDED.date \
                 WHERE artwork_reactions.reaction <> EXCLUDED.reaction",
            )
            .bind(artwork)
            .bind(user)
            .bind(kind.as_str())
            .bind(at)
            .execute(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(if res.rows_affected() == 0 { Change::Unchanged } else { Change::Changed(at) })
        }

        async fn remove_reaction(&self, artwork: &str, user: UserId) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM artwork_reactions WHERE artwork_id = $1 AND user_id = $2")
                .bind(artwork)
                .bind(user)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn list_reactions(&self, artwork: &str) -> RepoResult<Vec<Reaction>> {
            let rows = sqlx::query_as::<_, ReactionRow>(
                "SELECT artwork_id, user_id, reaction, date FROM artwork_reactions \
                 WHERE artwork_id = $1 ORDER BY date DESC, user_id DESC",
            )
            .bind(artwork)
            .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(decode_rows(rows))
        }

        async fn add_comment(&self, comment: Comment) -> RepoResult<Comment> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query("SELECT 1 FROM artworks WHERE id = $1 AND NOT deleted FOR SHARE")
                .bind(&comment.artwork_id)
                .fetch_optional(&mut *tx).await.map_err(db_err)?
                .ok_or(RepoError::NotFound)?;
            sqlx::query("INSERT INTO artwork_comments (id, artwork_id, user_id, comment, date) VALUES ($1, $2, $3, $4, $5)")
                .bind(comment.id)
                .bind(&comment.artwork_id)
                .bind(comment.author_id)
                .bind(&comment.text)
                .bind(comment.date)
                .execute(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(comment)
        }

        async fn delete_comment(&self, artwork: &str, comment: Uuid, user: UserId) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM artwork_comments WHERE id = $1 AND artwork_id = $2 AND user_id = $3")
                .bind(comment)
                .bind(artwork)
                .bind(user)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn list_comments(&self, artwork: &str) -> RepoResult<Vec<Comment>> {
            let rows = sqlx::query_as::<_, CommentRow>(
                "SELECT id, artwork_id, user_id, comment, date FROM artwork_comments \
                 WHERE artwork_id = $1 ORDER BY date DESC, id DESC",
            )
            .bind(artwork)
            .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(rows.into_iter().map(Comment::from).collect())
        }
    }
}
