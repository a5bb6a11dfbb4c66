#![cfg(feature = "inmem-store")]

use threadline::actions::{self, AddComment, CreateCommunity, CreateThread, UpdateUser, UserSearch};
use threadline::error::ApiError;
use threadline::models::*;
use threadline::repo::inmem::InMemRepo;
use threadline::repo::ThreadRepo;
use threadline::revalidate::{InMemoryPageCache, PageCache};

struct Fixture {
    repo: InMemRepo,
    cache: InMemoryPageCache,
}

impl Fixture {
    fn new() -> Self {
        Self { repo: InMemRepo::new(), cache: InMemoryPageCache::new() }
    }

    async fn onboard(&self, id: &str, username: &str) -> User {
        actions::update_user(&self.repo, &self.cache, profile(id, username, "/onboarding")).await.unwrap().user
    }

    async fn post(&self, text: &str, author: &str) -> Thread {
        let req = CreateThread { text: text.into(), author: author.into(), community_id: None, path: "/".into() };
        actions::create_thread(&self.repo, &self.cache, req).await.unwrap()
    }

    async fn reply(&self, parent: Id, text: &str, author: &str) -> Thread {
        let req = AddComment { text: text.into(), author: author.into(), path: "/".into() };
        actions::add_comment_to_thread(&self.repo, &self.cache, parent, req).await.unwrap()
    }
}

fn profile(id: &str, username: &str, path: &str) -> UpdateUser {
    UpdateUser {
        user_id: id.into(),
        username: username.into(),
        name: format!("Name {username}"),
        bio: "just testing".into(),
        image: "https://img.example/me.png".into(),
        path: path.into(),
    }
}

#[tokio::test]
async fn created_post_appears_in_feed_with_author() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    let t = f.post("hello", "U1").await;
    assert!(t.parent_id.is_none());
    assert_eq!(t.author, "U1");

    let page = actions::fetch_posts(&f.repo, 1, 10).await.unwrap();
    let hello = page.posts.iter().find(|p| p.text == "hello").expect("hello in feed");
    assert_eq!(hello.author.id, "U1");
    assert_eq!(hello.author.name, "Name user_one");
}

#[tokio::test]
async fn comment_shows_as_single_child_in_feed() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    f.onboard("U2", "user_two").await;
    let t1 = f.post("original", "U1").await;
    let c = f.reply(t1.id, "nice post", "U2").await;
    assert_eq!(c.parent_id, Some(t1.id));

    let stored = f.repo.get_thread(t1.id).await.unwrap();
    assert_eq!(stored.children.iter().filter(|&&id| id == c.id).count(), 1);

    let page = actions::fetch_posts(&f.repo, 1, 10).await.unwrap();
    let entry = page.posts.iter().find(|p| p.id == t1.id).unwrap();
    assert_eq!(entry.children.len(), 1);
    assert_eq!(entry.children[0].text, "nice post");
    assert_eq!(entry.children[0].author.id, "U2");
    assert_eq!(entry.reply_count, 1);
}

#[tokio::test]
async fn feed_is_top_level_newest_first_and_bounded() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    for i in 0..4 {
        let t = f.post(&format!("post number {i}"), "U1").await;
        f.reply(t.id, "a reply", "U1").await;
    }
    let page = actions::fetch_posts(&f.repo, 1, 3).await.unwrap();
    assert_eq!(page.posts.len(), 3);
    assert_eq!(page.total, 4);
    assert!(page.is_next);
    assert!(page.posts.iter().all(|p| p.parent_id.is_none()));
    assert!(page.posts.windows(2).all(|w| (w[0].created_at, w[0].id) > (w[1].created_at, w[1].id)));

    let last = actions::fetch_posts(&f.repo, 2, 3).await.unwrap();
    assert_eq!(last.posts.len(), 1);
    assert!(!last.is_next);
}

#[tokio::test]
async fn out_of_range_paging_is_clamped() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    f.post("only post", "U1").await;
    let page = actions::fetch_posts(&f.repo, -5, 0).await.unwrap();
    assert_eq!(page.posts.len(), 1);
    let far = actions::fetch_posts(&f.repo, i64::MAX, i64::MAX).await.unwrap();
    assert!(far.posts.is_empty());
}

#[tokio::test]
async fn thread_page_has_two_levels_of_replies() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    f.onboard("U2", "user_two").await;
    let root = f.post("root post", "U1").await;
    let c = f.reply(root.id, "child", "U2").await;
    f.reply(c.id, "grandchild", "U1").await;

    let view = actions::fetch_thread_by_id(&f.repo, root.id).await.unwrap();
    assert_eq!(view.children[0].children[0].text, "grandchild");
    assert!(matches!(actions::fetch_thread_by_id(&f.repo, 404).await, Err(ApiError::NotFound)));
}

#[tokio::test]
async fn missing_user_is_none() {
    let f = Fixture::new();
    assert!(actions::fetch_user(&f.repo, "nobody").await.unwrap().is_none());
    assert!(actions::fetch_user_posts(&f.repo, "nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn update_user_twice_is_idempotent() {
    let f = Fixture::new();
    let first = actions::update_user(&f.repo, &f.cache, profile("U1", "user_one", "/profile/edit")).await.unwrap();
    let second = actions::update_user(&f.repo, &f.cache, profile("U1", "user_one", "/profile/edit")).await.unwrap();
    assert_eq!(first.user, second.user);
    assert_eq!(second.redirect, Redirect::Back);
    let users = actions::fetch_users(&f.repo, UserSearch::default()).await.unwrap();
    assert_eq!(users.total, 1);
}

#[tokio::test]
async fn onboarding_redirects_home() {
    let f = Fixture::new();
    let done = actions::update_user(&f.repo, &f.cache, profile("U1", "user_one", "/onboarding")).await.unwrap();
    assert_eq!(done.redirect, Redirect::Home);
    assert!(done.user.onboarded);
}

#[tokio::test]
async fn duplicate_username_conflicts() {
    let f = Fixture::new();
    f.onboard("U1", "taken").await;
    let err = actions::update_user(&f.repo, &f.cache, profile("U2", "Taken", "/onboarding")).await;
    assert!(matches!(err, Err(ApiError::Conflict)));
}

#[tokio::test]
async fn invalid_profile_lists_every_field() {
    let f = Fixture::new();
    let mut req = profile("U1", "a b", "nope");
    req.name = "x".into();
    req.bio = String::new();
    req.image = "not-a-url".into();
    match actions::update_user(&f.repo, &f.cache, req).await {
        Err(ApiError::Validation(v)) => {
            for field in ["username", "name", "bio", "image", "path"] {
                assert!(v.has(field), "{field} not reported");
            }
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(actions::fetch_user(&f.repo, "U1").await.unwrap().is_none());
}

#[tokio::test]
async fn comment_on_missing_thread_is_not_found() {
    let f = Fixture::new();
    f.onboard("U2", "user_two").await;
    let req = AddComment { text: "into the void".into(), author: "U2".into(), path: "/".into() };
    let err = actions::add_comment_to_thread(&f.repo, &f.cache, 12345, req).await;
    assert!(matches!(err, Err(ApiError::NotFound)));
    assert!(actions::fetch_posts(&f.repo, 1, 10).await.unwrap().posts.is_empty());
}

#[tokio::test]
async fn writes_evict_cached_feed() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    f.cache.put("/?page=1&size=20", serde_json::json!({"posts": []})).await;
    let before = f.cache.revalidations();
    f.post("fresh", "U1").await;
    assert!(!f.cache.contains("/?page=1&size=20"));
    assert!(f.cache.revalidations() > before);
}

#[tokio::test]
async fn profile_edit_refreshes_feed() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    f.cache.put("/?page=1&size=20", serde_json::json!(1)).await;
    actions::update_user(&f.repo, &f.cache, profile("U1", "user_one", "/profile/edit")).await.unwrap();
    assert!(!f.cache.contains("/?page=1&size=20"));
}

#[tokio::test]
async fn comment_from_thread_page_also_refreshes_feed() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    let t = f.post("root post", "U1").await;
    f.cache.put("/", serde_json::json!(1)).await;
    f.cache.put(&format!("/thread/{}", t.id), serde_json::json!(2)).await;
    let req = AddComment { text: "from the page".into(), author: "U1".into(), path: format!("/thread/{}", t.id) };
    actions::add_comment_to_thread(&f.repo, &f.cache, t.id, req).await.unwrap();
    assert!(!f.cache.contains("/"));
    assert!(!f.cache.contains(&format!("/thread/{}", t.id)));
}

#[tokio::test]
async fn user_posts_are_newest_first_with_replies() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    f.onboard("U2", "user_two").await;
    let old = f.post("older post", "U1").await;
    let new = f.post("newer post", "U1").await;
    f.reply(old.id, "reply here", "U2").await;

    let mine = actions::fetch_user_posts(&f.repo, "U1").await.unwrap().unwrap();
    assert_eq!(mine.threads.iter().map(|t| t.id).collect::<Vec<_>>(), vec![new.id, old.id]);
    assert_eq!(mine.threads[1].children[0].author.id, "U2");
}

#[tokio::test]
async fn activity_is_others_replies_only() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    f.onboard("U2", "user_two").await;
    let t = f.post("root post", "U1").await;
    f.reply(t.id, "self reply", "U1").await;
    let theirs = f.reply(t.id, "their reply", "U2").await;

    let activity = actions::get_activity(&f.repo, "U1").await.unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].id, theirs.id);
    assert_eq!(activity[0].author.id, "U2");
}

#[tokio::test]
async fn community_shows_on_profile_and_posts() {
    let f = Fixture::new();
    f.onboard("U1", "user_one").await;
    let c = actions::create_community(
        &f.repo,
        CreateCommunity {
            username: "makers".into(),
            name: "Makers".into(),
            image: "https://img.example/m.png".into(),
            bio: String::new(),
            created_by: "U1".into(),
        },
    )
    .await
    .unwrap();
    let req = CreateThread { text: "community post".into(), author: "U1".into(), community_id: Some(c.id), path: "/".into() };
    actions::create_thread(&f.repo, &f.cache, req).await.unwrap();

    let profile = actions::fetch_user(&f.repo, "U1").await.unwrap().unwrap();
    assert_eq!(profile.communities[0].name, "Makers");
    let feed = actions::fetch_posts(&f.repo, 1, 10).await.unwrap();
    assert_eq!(feed.posts[0].community.as_ref().map(|c| c.id), Some(c.id));
}
