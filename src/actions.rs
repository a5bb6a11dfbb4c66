//! Data-access operations behind every page and form.
//!
//! Reads return plain populated views; writes validate, persist through the
//! repository and then revalidate the affected route.

use tracing::info;

use crate::error::ApiError;
use crate::models::*;
use crate::populate::populate;
use crate::repo::{Repo, RepoError, UserQuery};
use crate::revalidate::PageCache;
use crate::validation;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
/// Feed shows each post with its direct replies.
pub const FEED_DEPTH: usize = 1;
/// Thread page shows replies and replies-to-replies.
pub const THREAD_DEPTH: usize = 2;
pub const FEED_PATH: &str = "/";
pub const PROFILE_EDIT_PATH: &str = "/profile/edit";

/// 1-based page window after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
}

impl Page {
    /// `number < 1` becomes 1; `size <= 0` becomes the default; `size` is capped.
    pub fn clamp(number: i64, size: i64) -> Self {
        let size = if size <= 0 { DEFAULT_PAGE_SIZE } else { size.min(MAX_PAGE_SIZE) };
        Self { number: number.max(1), size }
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1).saturating_mul(self.size)
    }

    fn is_next(&self, total: i64, returned: usize) -> bool {
        total > self.offset().saturating_add(returned as i64)
    }
}

/// Evict `path`, and the feed as well since every post and reply shows up there.
async fn revalidate_with_feed(cache: &dyn PageCache, path: &str) {
    cache.revalidate_path(path).await;
    if path != FEED_PATH {
        cache.revalidate_path(FEED_PATH).await;
    }
}

#[derive(Debug, Clone)]
pub struct CreateThread {
    pub text: String,
    pub author: UserId,
    pub community_id: Option<Id>,
    pub path: String,
}

pub async fn create_thread(repo: &dyn Repo, cache: &dyn PageCache, req: CreateThread) -> Result<Thread, ApiError> {
    validation::validate_thread_text(&req.text, &req.path)?;
    let thread = repo
        .create_thread(NewThread { text: req.text, author: req.author, community: req.community_id })
        .await?;
    info!(thread_id = thread.id, author = %thread.author, "thread created");
    revalidate_with_feed(cache, &req.path).await;
    Ok(thread)
}

#[derive(Debug, Clone)]
pub struct AddComment {
    pub text: String,
    pub author: UserId,
    pub path: String,
}

pub async fn add_comment_to_thread(
    repo: &dyn Repo,
    cache: &dyn PageCache,
    thread_id: Id,
    req: AddComment,
) -> Result<Thread, ApiError> {
    validation::validate_thread_text(&req.text, &req.path)?;
    let reply = repo
        .create_comment(NewComment { parent_id: thread_id, text: req.text, author: req.author })
        .await?;
    info!(thread_id, reply_id = reply.id, author = %reply.author, "comment added");
    revalidate_with_feed(cache, &req.path).await;
    Ok(reply)
}

pub async fn fetch_posts(repo: &dyn Repo, page_number: i64, page_size: i64) -> Result<PostsPage, ApiError> {
    let page = Page::clamp(page_number, page_size);
    let (roots, total) = repo.list_top_level(page.offset(), page.size).await?;
    let posts = populate(repo, &roots, FEED_DEPTH).await?;
    let is_next = page.is_next(total, posts.len());
    Ok(PostsPage { posts, total, is_next })
}

pub async fn fetch_thread_by_id(repo: &dyn Repo, id: Id) -> Result<ThreadView, ApiError> {
    let thread = repo.get_thread(id).await?;
    let mut views = populate(repo, std::slice::from_ref(&thread), THREAD_DEPTH).await?;
    views.pop().ok_or(ApiError::NotFound)
}

/// Look up a user, treating absence as `None`.
async fn find_user(repo: &dyn Repo, id: &str) -> Result<Option<User>, ApiError> {
    match repo.get_user(id).await {
        Ok(u) => Ok(Some(u)),
        Err(RepoError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_user(repo: &dyn Repo, id: &str) -> Result<Option<UserProfile>, ApiError> {
    let Some(user) = find_user(repo, id).await? else { return Ok(None) };
    let communities = repo.get_communities(&user.communities).await?;
    Ok(Some(UserProfile {
        id: user.id,
        username: user.username,
        name: user.name,
        bio: user.bio,
        image: user.image,
        onboarded: user.onboarded,
        threads: user.threads,
        communities: communities.iter().map(CommunityRef::from).collect(),
        created_at: user.created_at,
    }))
}

pub async fn fetch_user_posts(repo: &dyn Repo, account_id: &str) -> Result<Option<UserThreads>, ApiError> {
    let Some(user) = find_user(repo, account_id).await? else { return Ok(None) };
    let mut threads = repo.get_threads(&user.threads).await?;
    threads.retain(Thread::is_top_level);
    threads.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    let threads = populate(repo, &threads, FEED_DEPTH).await?;
    Ok(Some(UserThreads { id: user.id, username: user.username, name: user.name, image: user.image, threads }))
}

#[derive(Debug, Clone, Default)]
pub struct UserSearch {
    pub search: String,
    pub exclude: Option<UserId>,
    pub page: i64,
    pub size: i64,
}

pub async fn fetch_users(repo: &dyn Repo, req: UserSearch) -> Result<UsersPage, ApiError> {
    let page = Page::clamp(req.page, req.size);
    let query = UserQuery { search: req.search, exclude: req.exclude, offset: page.offset(), limit: page.size };
    let (users, total) = repo.search_users(&query).await?;
    let is_next = page.is_next(total, users.len());
    Ok(UsersPage { users: users.iter().map(UserSummary::from).collect(), total, is_next })
}

/// Replies other people left on anything `user_id` wrote, newest first.
pub async fn get_activity(repo: &dyn Repo, user_id: &str) -> Result<Vec<ThreadView>, ApiError> {
    let own = repo.list_threads_by_author(user_id).await?;
    let child_ids: Vec<Id> = own.iter().flat_map(|t| t.children.iter().copied()).collect();
    let mut replies = repo.get_threads(&child_ids).await?;
    replies.retain(|r| r.author != user_id);
    replies.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    Ok(populate(repo, &replies, 0).await?)
}

#[derive(Debug, Clone)]
pub struct UpdateUser {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: String,
    pub path: String,
}

pub async fn update_user(repo: &dyn Repo, cache: &dyn PageCache, req: UpdateUser) -> Result<ProfileUpdated, ApiError> {
    validation::validate_profile(&req.username, &req.name, &req.bio, &req.image, &req.path)?;
    let user = repo
        .upsert_user(UpsertUser {
            id: req.user_id,
            username: req.username.trim().to_string(),
            name: req.name.trim().to_string(),
            bio: req.bio,
            image: req.image,
        })
        .await?;
    info!(user_id = %user.id, username = %user.username, "profile saved");
    // feed entries carry the author's name and image
    revalidate_with_feed(cache, &req.path).await;
    let redirect = if req.path == PROFILE_EDIT_PATH { Redirect::Back } else { Redirect::Home };
    Ok(ProfileUpdated { user, redirect })
}

#[derive(Debug, Clone)]
pub struct CreateCommunity {
    pub username: String,
    pub name: String,
    pub image: String,
    pub bio: String,
    pub created_by: UserId,
}

pub async fn create_community(repo: &dyn Repo, req: CreateCommunity) -> Result<Community, ApiError> {
    validation::validate_community(&req.username, &req.name, &req.image)?;
    let community = repo
        .create_community(NewCommunity {
            username: req.username.trim().to_string(),
            name: req.name.trim().to_string(),
            image: req.image,
            bio: req.bio,
            created_by: req.created_by,
        })
        .await?;
    info!(community_id = community.id, "community created");
    Ok(community)
}

pub async fn join_community(repo: &dyn Repo, community_id: Id, user_id: &str) -> Result<(), ApiError> {
    repo.add_member(community_id, user_id).await?;
    Ok(())
}
