use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Filter + window for user search. `search` matches username or name,
/// case-insensitively; empty matches everyone.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub search: String,
    pub exclude: Option<UserId>,
    pub offset: i64,
    pub limit: i64,
}

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_user(&self, id: &str) -> RepoResult<User>;
    /// Users found among `ids`; unknown ids are skipped.
    async fn get_users(&self, ids: &[UserId]) -> RepoResult<Vec<User>>;
    /// Insert or update profile fields and mark onboarded. Username clash with
    /// another user is `Conflict`.
    async fn upsert_user(&self, upd: UpsertUser) -> RepoResult<User>;
    async fn search_users(&self, q: &UserQuery) -> RepoResult<(Vec<User>, i64)>;
}

#[async_trait]
pub trait ThreadRepo: Send + Sync {
    /// Top-level post; also appended to the author's thread list.
    async fn create_thread(&self, new: NewThread) -> RepoResult<Thread>;
    /// Reply; the new id is appended to the parent's children in the same unit of work.
    async fn create_comment(&self, new: NewComment) -> RepoResult<Thread>;
    async fn get_thread(&self, id: Id) -> RepoResult<Thread>;
    /// Threads found among `ids`, in the order of `ids`.
    async fn get_threads(&self, ids: &[Id]) -> RepoResult<Vec<Thread>>;
    /// Top-level threads newest first plus the total top-level count.
    async fn list_top_level(&self, offset: i64, limit: i64) -> RepoResult<(Vec<Thread>, i64)>;
    async fn list_threads_by_author(&self, author: &str) -> RepoResult<Vec<Thread>>;
}

#[async_trait]
pub trait CommunityRepo: Send + Sync {
    /// Creator becomes the first member.
    async fn create_community(&self, new: NewCommunity) -> RepoResult<Community>;
    async fn get_communities(&self, ids: &[Id]) -> RepoResult<Vec<Community>>;
    async fn add_member(&self, community_id: Id, user_id: &str) -> RepoResult<()>;
}

pub trait Repo: UserRepo + ThreadRepo + CommunityRepo {}

impl<T> Repo for T where T: UserRepo + ThreadRepo + CommunityRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};
    use std::sync::{RwLockReadGuard, RwLockWriteGuard};
    use tracing::{info, warn};

    /// Usernames and community handles are unique case-insensitively.
    fn same_handle(a: &str, b: &str) -> bool {
        a.to_lowercase() == b.to_lowercase()
    }

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<UserId, User>,
        threads: HashMap<Id, Thread>,
        communities: HashMap<Id, Community>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }
    }

    /// Whole store behind one lock, so every multi-document write is atomic.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Ephemeral store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Store backed by a JSON snapshot under `dir`, loaded now and rewritten after each write.
        pub fn with_snapshot_dir(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join("state.json");
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    info!("no snapshot at '{}' ({e}); starting empty", path.display());
                    State::default()
                }
            }
        }

        /// Rewrite the snapshot from `state`. Called with the write guard still
        /// held so snapshots land on disk in commit order.
        fn persist(&self, state: &State) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = match serde_json::to_vec_pretty(state) {
                Ok(b) => b,
                Err(e) => { warn!("snapshot encode failed: {e}"); return; }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(path, bytes) {
                warn!("failed to write snapshot '{}': {e}", path.display());
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn get_user(&self, id: &str) -> RepoResult<User> {
            self.read()?.users.get(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_users(&self, ids: &[UserId]) -> RepoResult<Vec<User>> {
            let s = self.read()?;
            Ok(ids.iter().filter_map(|id| s.users.get(id).cloned()).collect())
        }

        async fn upsert_user(&self, upd: UpsertUser) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.users.values().any(|u| u.id != upd.id && same_handle(&u.username, &upd.username)) {
                return Err(RepoError::Conflict);
            }
            let user = s.users.entry(upd.id.clone()).or_insert_with(|| User {
                id: upd.id.clone(),
                username: String::new(),
                name: String::new(),
                bio: String::new(),
                image: String::new(),
                onboarded: false,
                threads: Vec::new(),
                communities: Vec::new(),
                created_at: Utc::now(),
            });
            user.username = upd.username;
            user.name = upd.name;
            user.bio = upd.bio;
            user.image = upd.image;
            user.onboarded = true;
            let user = user.clone();
            self.persist(&s);
            Ok(user)
        }

        async fn search_users(&self, q: &UserQuery) -> RepoResult<(Vec<User>, i64)> {
            let s = self.read()?;
            let needle = q.search.trim().to_lowercase();
            let mut hits: Vec<&User> = s
                .users
                .values()
                .filter(|u| q.exclude.as_deref() != Some(u.id.as_str()))
                .filter(|u| {
                    needle.is_empty()
                        || u.username.to_lowercase().contains(&needle)
                        || u.name.to_lowercase().contains(&needle)
                })
                .collect();
            hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
            let total = hits.len() as i64;
            let page = hits
                .into_iter()
                .skip(q.offset.max(0) as usize)
                .take(q.limit.max(0) as usize)
                .cloned()
                .collect();
            Ok((page, total))
        }
    }

    #[async_trait]
    impl ThreadRepo for InMemRepo {
        async fn create_thread(&self, new: NewThread) -> RepoResult<Thread> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.author) { return Err(RepoError::NotFound); }
            if let Some(c) = new.community {
                if !s.communities.contains_key(&c) { return Err(RepoError::NotFound); }
            }
            let id = s.next_id();
            let thread = Thread {
                id,
                text: new.text,
                author: new.author.clone(),
                community: new.community,
                created_at: Utc::now(),
                parent_id: None,
                children: Vec::new(),
            };
            s.threads.insert(id, thread.clone());
            if let Some(author) = s.users.get_mut(&new.author) {
                author.threads.push(id);
            }
            self.persist(&s);
            Ok(thread)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Thread> {
            let mut s = self.write()?;
            let community = s.threads.get(&new.parent_id).ok_or(RepoError::NotFound)?.community;
            if !s.users.contains_key(&new.author) { return Err(RepoError::NotFound); }
            let id = s.next_id();
            let reply = Thread {
                id,
                text: new.text,
                author: new.author,
                community,
                created_at: Utc::now(),
                parent_id: Some(new.parent_id),
                children: Vec::new(),
            };
            // child first, then the link
            s.threads.insert(id, reply.clone());
            if let Some(parent) = s.threads.get_mut(&new.parent_id) {
                parent.children.push(id);
            }
            self.persist(&s);
            Ok(reply)
        }

        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            self.read()?.threads.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_threads(&self, ids: &[Id]) -> RepoResult<Vec<Thread>> {
            let s = self.read()?;
            Ok(ids.iter().filter_map(|id| s.threads.get(id).cloned()).collect())
        }

        async fn list_top_level(&self, offset: i64, limit: i64) -> RepoResult<(Vec<Thread>, i64)> {
            let s = self.read()?;
            let mut v: Vec<&Thread> = s.threads.values().filter(|t| t.is_top_level()).collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))); // newest first
            let total = v.len() as i64;
            let page = v
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .cloned()
                .collect();
            Ok((page, total))
        }

        async fn list_threads_by_author(&self, author: &str) -> RepoResult<Vec<Thread>> {
            let s = self.read()?;
            let mut v: Vec<Thread> = s.threads.values().filter(|t| t.author == author).cloned().collect();
            v.sort_by_key(|t| t.id);
            Ok(v)
        }
    }

    #[async_trait]
    impl CommunityRepo for InMemRepo {
        async fn create_community(&self, new: NewCommunity) -> RepoResult<Community> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.created_by) { return Err(RepoError::NotFound); }
            if s.communities.values().any(|c| same_handle(&c.username, &new.username)) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let community = Community {
                id,
                username: new.username,
                name: new.name,
                image: new.image,
                bio: new.bio,
                created_by: new.created_by.clone(),
                created_at: Utc::now(),
            };
            s.communities.insert(id, community.clone());
            if let Some(u) = s.users.get_mut(&new.created_by) {
                u.communities.push(id);
            }
            self.persist(&s);
            Ok(community)
        }

        async fn get_communities(&self, ids: &[Id]) -> RepoResult<Vec<Community>> {
            let s = self.read()?;
            Ok(ids.iter().filter_map(|id| s.communities.get(id).cloned()).collect())
        }

        async fn add_member(&self, community_id: Id, user_id: &str) -> RepoResult<()> {
            let mut s = self.write()?;
            if !s.communities.contains_key(&community_id) { return Err(RepoError::NotFound); }
            let user = s.users.get_mut(user_id).ok_or(RepoError::NotFound)?;
            if user.communities.contains(&community_id) {
                return Ok(());
            }
            user.communities.push(community_id);
            self.persist(&s);
            Ok(())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const USER_COLS: &str = "id, username, name, bio, image, onboarded, threads, communities, created_at";
    const THREAD_COLS: &str = "id, text, author, community, created_at, parent_id, children";
    const COMMUNITY_COLS: &str = "id, username, name, image, bio, created_by, created_at";

    /// sqlx failures onto the repo taxonomy: unique violation → Conflict,
    /// foreign-key violation or missing row → NotFound.
    pub(crate) fn map_sqlx(e: sqlx::Error) -> RepoError {
        if let sqlx::Error::RowNotFound = e {
            return RepoError::NotFound;
        }
        if let sqlx::Error::Database(db) = &e {
            match db.code().as_deref() {
                Some("23505") => return RepoError::Conflict,
                Some("23503") => return RepoError::NotFound,
                _ => {}
            }
        }
        RepoError::Internal(e.to_string())
    }

    /// `%` and `_` are literal in a search term.
    fn like_pattern(term: &str) -> String {
        let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        format!("%{escaped}%")
    }

    fn reorder<K, T>(ids: &[K], rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T>
    where
        K: std::hash::Hash + Eq + Clone,
    {
        let mut by_id: HashMap<K, T> = rows.into_iter().map(|r| (key(&r), r)).collect();
        ids.iter().filter_map(|id| by_id.remove(id)).collect()
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub fn pool(&self) -> &Pool<Postgres> { &self.pool }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn get_user(&self, id: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_sqlx)
        }

        async fn get_users(&self, ids: &[UserId]) -> RepoResult<Vec<User>> {
            if ids.is_empty() { return Ok(Vec::new()); }
            let rows = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(&self.pool).await.map_err(map_sqlx)?;
            Ok(reorder(ids, rows, |u| u.id.clone()))
        }

        async fn upsert_user(&self, upd: UpsertUser) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(r#"
                INSERT INTO users (id, username, name, bio, image, onboarded)
                VALUES ($1, $2, $3, $4, $5, TRUE)
                ON CONFLICT (id) DO UPDATE
                   SET username = EXCLUDED.username,
                       name = EXCLUDED.name,
                       bio = EXCLUDED.bio,
                       image = EXCLUDED.image,
                       onboarded = TRUE
                RETURNING {USER_COLS}
            "#))
                .bind(&upd.id).bind(&upd.username).bind(&upd.name).bind(&upd.bio).bind(&upd.image)
                .fetch_one(&self.pool).await.map_err(map_sqlx)
        }

        async fn search_users(&self, q: &UserQuery) -> RepoResult<(Vec<User>, i64)> {
            let term = q.search.trim();
            let pattern = like_pattern(term);
            let filter = "($1 = '' OR username ILIKE $2 OR name ILIKE $2) AND ($3::TEXT IS NULL OR id <> $3)";
            let users = sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLS} FROM users WHERE {filter} ORDER BY created_at DESC, id ASC LIMIT $4 OFFSET $5"
            ))
                .bind(term).bind(&pattern).bind(q.exclude.as_deref())
                .bind(q.limit.max(0)).bind(q.offset.max(0))
                .fetch_all(&self.pool).await.map_err(map_sqlx)?;
            let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM users WHERE {filter}"))
                .bind(term).bind(&pattern).bind(q.exclude.as_deref())
                .fetch_one(&self.pool).await.map_err(map_sqlx)?;
            Ok((users, total))
        }
    }

    #[async_trait]
    impl ThreadRepo for PgRepo {
        async fn create_thread(&self, new: NewThread) -> RepoResult<Thread> {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            let thread = sqlx::query_as::<_, Thread>(&format!(
                "INSERT INTO threads (text, author, community) VALUES ($1, $2, $3) RETURNING {THREAD_COLS}"
            ))
                .bind(&new.text).bind(&new.author).bind(new.community)
                .fetch_one(&mut *tx).await.map_err(map_sqlx)?;
            let linked = sqlx::query("UPDATE users SET threads = array_append(threads, $1) WHERE id = $2")
                .bind(thread.id).bind(&new.author)
                .execute(&mut *tx).await.map_err(map_sqlx)?;
            if linked.rows_affected() == 0 {
                return Err(RepoError::NotFound); // tx dropped → rollback
            }
            tx.commit().await.map_err(map_sqlx)?;
            Ok(thread)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Thread> {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            // lock the parent so concurrent replies append in commit order
            let parent = sqlx::query_as::<_, Thread>(&format!("SELECT {THREAD_COLS} FROM threads WHERE id = $1 FOR UPDATE"))
                .bind(new.parent_id)
                .fetch_optional(&mut *tx).await.map_err(map_sqlx)?
                .ok_or(RepoError::NotFound)?;
            let reply = sqlx::query_as::<_, Thread>(&format!(
                "INSERT INTO threads (text, author, community, parent_id) VALUES ($1, $2, $3, $4) RETURNING {THREAD_COLS}"
            ))
                .bind(&new.text).bind(&new.author).bind(parent.community).bind(parent.id)
                .fetch_one(&mut *tx).await.map_err(map_sqlx)?;
            sqlx::query("UPDATE threads SET children = array_append(children, $1) WHERE id = $2")
                .bind(reply.id).bind(parent.id)
                .execute(&mut *tx).await.map_err(map_sqlx)?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(reply)
        }

        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            sqlx::query_as::<_, Thread>(&format!("SELECT {THREAD_COLS} FROM threads WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_sqlx)
        }

        async fn get_threads(&self, ids: &[Id]) -> RepoResult<Vec<Thread>> {
            if ids.is_empty() { return Ok(Vec::new()); }
            let rows = sqlx::query_as::<_, Thread>(&format!("SELECT {THREAD_COLS} FROM threads WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(&self.pool).await.map_err(map_sqlx)?;
            Ok(reorder(ids, rows, |t| t.id))
        }

        async fn list_top_level(&self, offset: i64, limit: i64) -> RepoResult<(Vec<Thread>, i64)> {
            let threads = sqlx::query_as::<_, Thread>(&format!(r#"
                SELECT {THREAD_COLS} FROM threads
                WHERE parent_id IS NULL
                ORDER BY created_at DESC, id DESC
                LIMIT $1 OFFSET $2
            "#))
                .bind(limit.max(0)).bind(offset.max(0))
                .fetch_all(&self.pool).await.map_err(map_sqlx)?;
            let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM threads WHERE parent_id IS NULL")
                .fetch_one(&self.pool).await.map_err(map_sqlx)?;
            Ok((threads, total))
        }

        async fn list_threads_by_author(&self, author: &str) -> RepoResult<Vec<Thread>> {
            sqlx::query_as::<_, Thread>(&format!("SELECT {THREAD_COLS} FROM threads WHERE author = $1 ORDER BY id"))
                .bind(author)
                .fetch_all(&self.pool).await.map_err(map_sqlx)
        }
    }

    #[async_trait]
    impl CommunityRepo for PgRepo {
        async fn create_community(&self, new: NewCommunity) -> RepoResult<Community> {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            let community = sqlx::query_as::<_, Community>(&format!(
                "INSERT INTO communities (username, name, image, bio, created_by) VALUES ($1, $2, $3, $4, $5) RETURNING {COMMUNITY_COLS}"
            ))
                .bind(&new.username).bind(&new.name).bind(&new.image).bind(&new.bio).bind(&new.created_by)
                .fetch_one(&mut *tx).await.map_err(map_sqlx)?;
            sqlx::query("UPDATE users SET communities = array_append(communities, $1) WHERE id = $2")
                .bind(community.id).bind(&new.created_by)
                .execute(&mut *tx).await.map_err(map_sqlx)?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(community)
        }

        async fn get_communities(&self, ids: &[Id]) -> RepoResult<Vec<Community>> {
            if ids.is_empty() { return Ok(Vec::new()); }
            let rows = sqlx::query_as::<_, Community>(&format!("SELECT {COMMUNITY_COLS} FROM communities WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(&self.pool).await.map_err(map_sqlx)?;
            Ok(reorder(ids, rows, |c| c.id))
        }

        async fn add_member(&self, community_id: Id, user_id: &str) -> RepoResult<()> {
            let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM communities WHERE id = $1")
                .bind(community_id)
                .fetch_optional(&self.pool).await.map_err(map_sqlx)?;
            if exists.is_none() { return Err(RepoError::NotFound); }
            let res = sqlx::query(
                "UPDATE users SET communities = array_append(communities, $1) WHERE id = $2 AND NOT ($1 = ANY(communities))"
            )
                .bind(community_id).bind(user_id)
                .execute(&self.pool).await.map_err(map_sqlx)?;
            if res.rows_affected() == 0 {
                // either unknown user or already a member
                self.get_user(user_id).await?;
            }
            Ok(())
        }
    }

}
