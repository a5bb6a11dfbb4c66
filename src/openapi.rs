use crate::models::{
    AuthorRef, Community, CommunityRef, PostsPage, ProfileUpdated, Redirect, Thread, ThreadView, User,
    UserProfile, UserSummary, UserThreads, UsersPage,
};
use crate::validation::{FieldError, ValidationErrors};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::create_thread,
        crate::routes::get_thread,
        crate::routes::add_comment,
        crate::routes::list_users,
        crate::routes::get_user,
        crate::routes::get_user_threads,
        crate::routes::get_user_activity,
        crate::routes::update_profile,
        crate::routes::me,
        crate::routes::create_community,
        crate::routes::join_community,
    ),
    components(schemas(
        Thread, ThreadView, AuthorRef, CommunityRef, PostsPage,
        User, UserProfile, UserThreads, UserSummary, UsersPage,
        Community, Redirect, ProfileUpdated, FieldError, ValidationErrors,
        crate::routes::NewThreadRequest, crate::routes::CommentRequest,
        crate::routes::ProfileRequest, crate::routes::CommunityRequest
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "threads", description = "Posts and replies"),
        (name = "users", description = "Profiles and onboarding"),
        (name = "communities", description = "Community membership"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}
