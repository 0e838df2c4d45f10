use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{User, UserId};
use crate::repo::{RepoError, RepoResult};

/// Read-only view of accounts and the social graph (follows and bans).
/// Account management itself lives outside this service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: UserId) -> RepoResult<User>;
    async fn find_by_alias(&self, alias: &str) -> RepoResult<User>;
    /// Whether `source` has banned `target`.
    async fn is_banning(&self, source: UserId, target: UserId) -> RepoResult<bool>;
    async fn is_following(&self, follower: UserId, target: UserId) -> RepoResult<bool>;
    /// Users followed by `user`.
    async fn followed(&self, user: UserId) -> RepoResult<Vec<UserId>>;

    /// Content by `author` is hidden from `viewer` when either one has banned the other.
    async fn is_visible_to(&self, author: UserId, viewer: UserId) -> RepoResult<bool> {
        if author == viewer {
            return Ok(true);
        }
        Ok(!self.is_banning(author, viewer).await? && !self.is_banning(viewer, author).await?)
    }
}

/// Per-request memo of author lookups, so a page of twelve artworks by the
/// same artist costs one directory hit.
pub struct AuthorCache<'a> {
    users: &'a dyn UserDirectory,
    seen: HashMap<UserId, User>,
}

impl<'a> AuthorCache<'a> {
    pub fn new(users: &'a dyn UserDirectory) -> Self {
        Self { users, seen: HashMap::new() }
    }

    pub async fn get(&mut self, id: UserId) -> RepoResult<User> {
        if let Some(u) = self.seen.get(&id) {
            return Ok(u.clone());
        }
        let user = self.users.get_user(id).await?;
        self.seen.insert(id, user.clone());
        Ok(user)
    }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::{Arc, RwLock};

    #[derive(Default, Deserialize)]
    #[serde(default)]
    struct Directory {
        users: Vec<User>,
        /// (follower, target)
        follows: HashSet<(UserId, UserId)>,
        /// (source, target)
        bans: HashSet<(UserId, UserId)>,
    }

    #[derive(Clone, Default)]
    pub struct InMemUsers {
        state: Arc<RwLock<Directory>>,
    }

    impl InMemUsers {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds the directory from a JSON document of the form
        /// `{"users": [{"id", "alias", "name"}], "follows": [[follower, target]], "bans": [[source, target]]}`.
        pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
            let raw = std::fs::read_to_string(path.as_ref())?;
            let dir: Directory = serde_json::from_str(&raw)?;
            Ok(Self { state: Arc::new(RwLock::new(dir)) })
        }

        fn with<R>(&self, f: impl FnOnce(&Directory) -> R) -> RepoResult<R> {
            let dir = self.state.read().map_err(|_| RepoError::Internal("directory lock poisoned".into()))?;
            Ok(f(&dir))
        }

        fn with_mut<R>(&self, f: impl FnOnce(&mut Directory) -> R) -> RepoResult<R> {
            let mut dir = self.state.write().map_err(|_| RepoError::Internal("directory lock poisoned".into()))?;
            Ok(f(&mut dir))
        }

        pub fn add_user(&self, alias: &str, name: &str) -> RepoResult<User> {
            let user = User { id: uuid::Uuid::new_v4(), alias: alias.to_string(), name: name.to_string() };
            self.with_mut(|d| {
                if d.users.iter().any(|u| u.alias == user.alias) {
                    return Err(RepoError::Conflict);
                }
                d.users.push(user.clone());
                Ok(user)
            })?
        }

        pub fn follow(&self, follower: UserId, target: UserId) -> RepoResult<()> {
            self.with_mut(|d| {
                d.follows.insert((follower, target));
            })
        }

        pub fn unfollow(&self, follower: UserId, target: UserId) -> RepoResult<()> {
            self.with_mut(|d| {
                d.follows.remove(&(follower, target));
            })
        }

        /// Banning also drops the target's follow of the source.
        pub fn ban(&self, source: UserId, target: UserId) -> RepoResult<()> {
            self.with_mut(|d| {
                d.bans.insert((source, target));
                d.follows.remove(&(target, source));
            })
        }

        pub fn unban(&self, source: UserId, target: UserId) -> RepoResult<()> {
            self.with_mut(|d| {
                d.bans.remove(&(source, target));
            })
        }
    }

    #[async_trait]
    impl UserDirectory for InMemUsers {
        async fn get_user(&self, id: UserId) -> RepoResult<User> {
            self.with(|d| d.users.iter().find(|u| u.id == id).cloned())?.ok_or(RepoError::NotFound)
        }

        async fn find_by_alias(&self, alias: &str) -> RepoResult<User> {
            self.with(|d| d.users.iter().find(|u| u.alias == alias).cloned())?.ok_or(RepoError::NotFound)
        }

        async fn is_banning(&self, source: UserId, target: UserId) -> RepoResult<bool> {
            self.with(|d| d.bans.contains(&(source, target)))
        }

        async fn is_following(&self, follower: UserId, target: UserId) -> RepoResult<bool> {
            self.with(|d| d.follows.contains(&(follower, target)))
        }

        async fn followed(&self, user: UserId) -> RepoResult<Vec<UserId>> {
            self.with(|d| d.follows.iter().filter(|(f, _)| *f == user).map(|(_, t)| *t).collect())
        }
    }
}

#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::repo::pg::db_err;
    use sqlx::{Pool, Postgres};

    #[derive(Clone)]
    pub struct PgUsers { pool: Pool<Postgres> }

    impl PgUsers {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    #[async_trait]
    impl UserDirectory for PgUsers {
        async fn get_user(&self, id: UserId) -> RepoResult<User> {
            sqlx::query_as::<_, (UserId, String, String)>("SELECT id, alias, name FROM users WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await
                .map(|(id, alias, name)| User { id, alias, name })
                .map_err(db_err)
        }

        async fn find_by_alias(&self, alias: &str) -> RepoResult<User> {
            sqlx::query_as::<_, (UserId, String, String)>("SELECT id, alias, name FROM users WHERE alias = $1")
                .bind(alias)
                .fetch_one(&self.pool).await
                .map(|(id, alias, name)| User { id, alias, name })
                .map_err(db_err)
        }

        async fn is_banning(&self, source: UserId, target: UserId) -> RepoResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM bans WHERE source = $1 AND target = $2)")
                .bind(source)
                .bind(target)
                .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn is_following(&self, follower: UserId, target: UserId) -> RepoResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM followers WHERE follower = $1 AND target = $2)")
                .bind(follower)
                .bind(target)
                .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn followed(&self, user: UserId) -> RepoResult<Vec<UserId>> {
            sqlx::query_scalar::<_, UserId>("SELECT target FROM followers WHERE follower = $1")
                .bind(user)
                .fetch_all(&self.pool).await.map_err(db_err)
        }
    }
}
