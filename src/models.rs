use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Row id for threads and communities.
pub type Id = i64;
/// Users are keyed by the identity provider's subject.
pub type UserId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: String,
    pub onboarded: bool,
    pub threads: Vec<Id>,     // owned top-level threads, oldest first
    pub communities: Vec<Id>, // memberships, join order
    pub created_at: DateTime<Utc>,
}

/// Fields written by a profile submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpsertUser {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Thread {
    pub id: Id,
    pub text: String,
    pub author: UserId,
    pub community: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<Id>, // None for top-level posts
    pub children: Vec<Id>,     // direct replies in reply order
}

impl Thread {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewThread {
    pub text: String,
    pub author: UserId,
    pub community: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub parent_id: Id,
    pub text: String,
    pub author: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Community {
    pub id: Id,
    pub username: String,
    pub name: String,
    pub image: String,
    pub bio: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCommunity {
    pub username: String,
    pub name: String,
    pub image: String,
    pub bio: String,
    pub created_by: UserId,
}

// ---------------- populated read views -----------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthorRef {
    pub id: UserId,
    pub name: String,
    pub image: String,
}

impl AuthorRef {
    /// Attribution for an author row that could not be loaded.
    pub fn unknown(id: &str) -> Self {
        Self { id: id.to_string(), name: String::new(), image: String::new() }
    }
}

impl From<&User> for AuthorRef {
    fn from(u: &User) -> Self {
        Self { id: u.id.clone(), name: u.name.clone(), image: u.image.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommunityRef {
    pub id: Id,
    pub name: String,
    pub image: String,
}

impl From<&Community> for CommunityRef {
    fn from(c: &Community) -> Self {
        Self { id: c.id, name: c.name.clone(), image: c.image.clone() }
    }
}

/// A thread with author, community and (depth-limited) replies resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ThreadView {
    pub id: Id,
    pub text: String,
    pub parent_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub author: AuthorRef,
    pub community: Option<CommunityRef>,
    pub reply_count: usize,
    pub children: Vec<ThreadView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostsPage {
    pub posts: Vec<ThreadView>,
    pub total: i64,
    pub is_next: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: String,
    pub onboarded: bool,
    pub threads: Vec<Id>,
    pub communities: Vec<CommunityRef>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserThreads {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub image: String,
    pub threads: Vec<ThreadView>,
}

/// Public listing entry for user search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub image: String,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        Self { id: u.id.clone(), username: u.username.clone(), name: u.name.clone(), image: u.image.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsersPage {
    pub users: Vec<UserSummary>,
    pub total: i64,
    pub is_next: bool,
}

/// Where the client should go after a profile submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Redirect {
    Back,
    Home,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileUpdated {
    pub user: User,
    pub redirect: Redirect,
}
