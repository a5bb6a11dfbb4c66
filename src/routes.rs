use std::sync::Arc;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::actions::{self, Page, FEED_PATH};
use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::revalidate::PageCache;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/posts").route(web::get().to(list_posts)))
            .service(web::resource("/threads").route(web::post().to(create_thread)))
            .service(web::resource("/threads/{id}").route(web::get().to(get_thread)))
            .service(web::resource("/threads/{id}/comments").route(web::post().to(add_comment)))
            .service(web::resource("/users").route(web::get().to(list_users)))
            .service(web::resource("/users/{id}").route(web::get().to(get_user)))
            .service(web::resource("/users/{id}/threads").route(web::get().to(get_user_threads)))
            .service(web::resource("/users/{id}/activity").route(web::get().to(get_user_activity)))
            .service(web::resource("/profile").route(web::put().to(update_profile)))
            .service(web::resource("/me").route(web::get().to(me)))
            .service(web::resource("/communities").route(web::post().to(create_community)))
            .service(web::resource("/communities/{id}/members").route(web::post().to(join_community))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub cache: Arc<dyn PageCache>,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    fn throttle(&self, allow: impl FnOnce(&RateLimiterFacade) -> bool) -> Result<(), ApiError> {
        match &self.rate_limiter {
            Some(rl) if !allow(rl) => Err(ApiError::TooManyRequests),
            _ => Ok(()),
        }
    }
}

fn default_path() -> String {
    FEED_PATH.to_string()
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// Cache key for a feed page. Always under `/` so revalidating the feed evicts it.
fn feed_key(page: &Page) -> String {
    format!("{FEED_PATH}?page={}&size={}", page.number, page.size)
}

#[utoipa::path(
    get,
    path = "/api/v1/posts",
    params(PageQuery),
    responses(
        (status = 200, description = "Top-level posts, newest first", body = PostsPage)
    )
)]
pub async fn list_posts(data: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let page = Page::clamp(query.page.unwrap_or(1), query.size.unwrap_or(0));
    let key = feed_key(&page);
    if let Some(body) = data.cache.get(&key).await {
        return Ok(HttpResponse::Ok().json(body));
    }
    let posts = actions::fetch_posts(data.repo.as_ref(), page.number, page.size).await?;
    let in_range = page.number == 1 || !posts.posts.is_empty();
    let body = serde_json::to_value(&posts).map_err(|e| {
        log::error!("serialising feed page failed: {e}");
        ApiError::Internal
    })?;
    // pages past the end are not cached: the key space is client controlled
    if in_range {
        data.cache.put(&key, body.clone()).await;
    }
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewThreadRequest {
    pub text: String,
    pub community_id: Option<Id>,
    /// Route the post was written from; revalidated afterwards.
    #[serde(default = "default_path")]
    pub path: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/threads",
    request_body = NewThreadRequest,
    responses(
        (status = 201, description = "Thread created", body = Thread),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Author or community not found"),
        (status = 422, description = "Validation failed"),
        (status = 429, description = "Rate limited")
    ),
    security(("bearer" = []))
)]
pub async fn create_thread(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewThreadRequest>,
) -> Result<HttpResponse, ApiError> {
    data.throttle(|rl| rl.allow_post(auth.user_id()))?;
    let NewThreadRequest { text, community_id, path } = payload.into_inner();
    let req = actions::CreateThread { text, author: auth.0.sub, community_id, path };
    let thread = actions::create_thread(data.repo.as_ref(), data.cache.as_ref(), req).await?;
    Ok(HttpResponse::Created().json(thread))
}

#[utoipa::path(
    get,
    path = "/api/v1/threads/{id}",
    params(("id" = Id, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread with two levels of replies", body = ThreadView),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn get_thread(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let view = actions::fetch_thread_by_id(data.repo.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentRequest {
    pub text: String,
    /// Defaults to the thread page.
    pub path: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/threads/{id}/comments",
    params(("id" = Id, Path, description = "Parent thread id")),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Reply created", body = Thread),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Parent thread or author not found"),
        (status = 422, description = "Validation failed"),
        (status = 429, description = "Rate limited")
    ),
    security(("bearer" = []))
)]
pub async fn add_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let thread_id = path.into_inner();
    data.throttle(|rl| rl.allow_comment(auth.user_id()))?;
    let CommentRequest { text, path } = payload.into_inner();
    let path = path.unwrap_or_else(|| format!("/thread/{thread_id}"));
    let req = actions::AddComment { text, author: auth.0.sub, path };
    let reply = actions::add_comment_to_thread(data.repo.as_ref(), data.cache.as_ref(), thread_id, req).await?;
    Ok(HttpResponse::Created().json(reply))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UsersQuery {
    /// Case-insensitive match on username or name
    pub search: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(UsersQuery),
    responses(
        (status = 200, description = "Matching users, newest first; the caller is left out", body = UsersPage)
    )
)]
pub async fn list_users(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<UsersQuery>,
) -> Result<HttpResponse, ApiError> {
    let UsersQuery { search, page, size } = query.into_inner();
    let req = actions::UserSearch {
        search: search.unwrap_or_default(),
        exclude: auth.map(|a| a.0.sub),
        page: page.unwrap_or(1),
        size: size.unwrap_or(0),
    };
    let users = actions::fetch_users(data.repo.as_ref(), req).await?;
    Ok(HttpResponse::Ok().json(users))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let profile = actions::fetch_user(data.repo.as_ref(), &path).await?.ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/threads",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "The user's top-level threads, newest first", body = UserThreads),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_threads(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let threads = actions::fetch_user_posts(data.repo.as_ref(), &path).await?.ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(threads))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/activity",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Replies by others to the user's threads, newest first", body = [ThreadView])
    )
)]
pub async fn get_user_activity(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let replies = actions::get_activity(data.repo.as_ref(), &path).await?;
    Ok(HttpResponse::Ok().json(replies))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProfileRequest {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: String,
    /// `/profile/edit` when editing, anything else while onboarding.
    pub path: String,
}

#[utoipa::path(
    put,
    path = "/api/v1/profile",
    request_body = ProfileRequest,
    responses(
        (status = 200, description = "Profile saved", body = ProfileUpdated),
        (status = 401, description = "Missing or invalid token"),
        (status = 409, description = "Username taken"),
        (status = 422, description = "Validation failed"),
        (status = 429, description = "Rate limited")
    ),
    security(("bearer" = []))
)]
pub async fn update_profile(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<ProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    data.throttle(|rl| rl.allow_profile(auth.user_id()))?;
    let ProfileRequest { username, name, bio, image, path } = payload.into_inner();
    let req = actions::UpdateUser { user_id: auth.0.sub, username, name, bio, image, path };
    let updated = actions::update_user(data.repo.as_ref(), data.cache.as_ref(), req).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "Stored profile, or an onboarding draft prefilled from the token", body = UserProfile),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
pub async fn me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    if let Some(profile) = actions::fetch_user(data.repo.as_ref(), auth.user_id()).await? {
        return Ok(HttpResponse::Ok().json(profile));
    }
    let claims = auth.0;
    let draft = UserProfile {
        id: claims.sub,
        username: String::new(),
        name: claims.name.unwrap_or_default(),
        bio: String::new(),
        image: claims.picture.unwrap_or_default(),
        onboarded: false,
        threads: Vec::new(),
        communities: Vec::new(),
        created_at: chrono::Utc::now(),
    };
    Ok(HttpResponse::Ok().json(draft))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommunityRequest {
    pub username: String,
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub bio: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/communities",
    request_body = CommunityRequest,
    responses(
        (status = 201, description = "Community created; the creator is its first member", body = Community),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Creator has no profile"),
        (status = 409, description = "Handle taken"),
        (status = 422, description = "Validation failed")
    ),
    security(("bearer" = []))
)]
pub async fn create_community(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CommunityRequest>,
) -> Result<HttpResponse, ApiError> {
    let CommunityRequest { username, name, image, bio } = payload.into_inner();
    let req = actions::CreateCommunity { username, name, image, bio, created_by: auth.0.sub };
    let community = actions::create_community(data.repo.as_ref(), req).await?;
    Ok(HttpResponse::Created().json(community))
}

#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/members",
    params(("id" = Id, Path, description = "Community id")),
    responses(
        (status = 204, description = "Caller is a member"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Community or user not found")
    ),
    security(("bearer" = []))
)]
pub async fn join_community(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    actions::join_community(data.repo.as_ref(), path.into_inner(), auth.user_id()).await?;
    Ok(HttpResponse::NoContent().finish())
}
