#![cfg(feature = "inmem-store")]

use threadline::models::*;
use threadline::repo::inmem::InMemRepo;
use threadline::repo::{CommunityRepo, RepoError, ThreadRepo, UserQuery, UserRepo};

fn repo() -> InMemRepo {
    InMemRepo::new()
}

fn profile(id: &str, username: &str) -> UpsertUser {
    UpsertUser {
        id: id.into(),
        username: username.into(),
        name: format!("Name of {username}"),
        bio: "hello there".into(),
        image: "https://img.example/a.png".into(),
    }
}

async fn seeded() -> InMemRepo {
    let r = repo();
    r.upsert_user(profile("u1", "alice")).await.unwrap();
    r.upsert_user(profile("u2", "bob")).await.unwrap();
    r
}

#[tokio::test]
async fn thread_is_linked_to_author() {
    let r = seeded().await;
    let t = r.create_thread(NewThread { text: "hello".into(), author: "u1".into(), community: None }).await.unwrap();
    assert!(t.is_top_level());
    assert!(t.children.is_empty());
    let u = r.get_user("u1").await.unwrap();
    assert_eq!(u.threads, vec![t.id]);
}

#[tokio::test]
async fn thread_by_unknown_author_is_rejected() {
    let r = repo();
    let err = r.create_thread(NewThread { text: "hello".into(), author: "ghost".into(), community: None }).await;
    assert!(matches!(err, Err(RepoError::NotFound)));
    let (all, total) = r.list_top_level(0, 10).await.unwrap();
    assert!(all.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn replies_are_linked_once_in_reply_order() {
    let r = seeded().await;
    let root = r.create_thread(NewThread { text: "root".into(), author: "u1".into(), community: None }).await.unwrap();
    let a = r.create_comment(NewComment { parent_id: root.id, text: "first".into(), author: "u2".into() }).await.unwrap();
    let b = r.create_comment(NewComment { parent_id: root.id, text: "second".into(), author: "u1".into() }).await.unwrap();
    assert_eq!(a.parent_id, Some(root.id));

    let root = r.get_thread(root.id).await.unwrap();
    assert_eq!(root.children, vec![a.id, b.id]);

    // replies are not top-level and do not land in the author's thread list
    let (top, total) = r.list_top_level(0, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(top[0].id, root.id);
    assert_eq!(r.get_user("u2").await.unwrap().threads, Vec::<Id>::new());
}

#[tokio::test]
async fn reply_to_missing_parent_leaves_no_orphan() {
    let r = seeded().await;
    let err = r.create_comment(NewComment { parent_id: 999, text: "lost".into(), author: "u2".into() }).await;
    assert!(matches!(err, Err(RepoError::NotFound)));
    assert!(r.list_threads_by_author("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn reply_inherits_parent_community() {
    let r = seeded().await;
    let c = r
        .create_community(NewCommunity {
            username: "rust".into(),
            name: "Rustaceans".into(),
            image: "https://img.example/c.png".into(),
            bio: String::new(),
            created_by: "u1".into(),
        })
        .await
        .unwrap();
    let root = r.create_thread(NewThread { text: "in c".into(), author: "u1".into(), community: Some(c.id) }).await.unwrap();
    let reply = r.create_comment(NewComment { parent_id: root.id, text: "yes".into(), author: "u2".into() }).await.unwrap();
    assert_eq!(reply.community, Some(c.id));
}

#[tokio::test]
async fn upsert_is_idempotent_and_preserves_lists() {
    let r = seeded().await;
    let t = r.create_thread(NewThread { text: "hello".into(), author: "u1".into(), community: None }).await.unwrap();
    let first = r.get_user("u1").await.unwrap();
    let again = r.upsert_user(profile("u1", "alice")).await.unwrap();
    assert_eq!(again.threads, vec![t.id]);
    assert_eq!(again.created_at, first.created_at);
    assert!(again.onboarded);
    let (_, total) = r.search_users(&UserQuery { limit: 10, ..Default::default() }).await.unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn username_is_unique_ignoring_case() {
    let r = seeded().await;
    let err = r.upsert_user(profile("u3", "ALICE")).await;
    assert!(matches!(err, Err(RepoError::Conflict)));
    // the owner can keep it
    assert!(r.upsert_user(profile("u1", "Alice")).await.is_ok());
}

#[tokio::test]
async fn top_level_pagination_reports_total() {
    let r = seeded().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        let t = r.create_thread(NewThread { text: format!("post {i}"), author: "u1".into(), community: None }).await.unwrap();
        ids.push(t.id);
    }
    let (page, total) = r.list_top_level(2, 2).await.unwrap();
    assert_eq!(total, 5);
    // newest first: ids[4], ids[3] | ids[2], ids[1] | ids[0]
    assert_eq!(page.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    let (past_end, _) = r.list_top_level(10, 2).await.unwrap();
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn search_matches_username_or_name_and_excludes() {
    let r = seeded().await;
    let q = UserQuery { search: "BO".into(), exclude: None, offset: 0, limit: 10 };
    let (hits, total) = r.search_users(&q).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(hits[0].id, "u2");

    let q = UserQuery { search: String::new(), exclude: Some("u1".into()), offset: 0, limit: 10 };
    let (hits, _) = r.search_users(&q).await.unwrap();
    assert!(hits.iter().all(|u| u.id != "u1"));
}

#[tokio::test]
async fn community_membership() {
    let r = seeded().await;
    let new = |handle: &str| NewCommunity {
        username: handle.into(),
        name: "Gardeners".into(),
        image: "https://img.example/g.png".into(),
        bio: String::new(),
        created_by: "u1".into(),
    };
    let c = r.create_community(new("garden")).await.unwrap();
    assert_eq!(r.get_user("u1").await.unwrap().communities, vec![c.id]);
    assert!(matches!(r.create_community(new("Garden")).await, Err(RepoError::Conflict)));

    r.add_member(c.id, "u2").await.unwrap();
    r.add_member(c.id, "u2").await.unwrap();
    assert_eq!(r.get_user("u2").await.unwrap().communities, vec![c.id]);
    assert!(matches!(r.add_member(c.id, "ghost").await, Err(RepoError::NotFound)));
    assert!(matches!(r.add_member(4242, "u2").await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let r = InMemRepo::with_snapshot_dir(dir.path());
        r.upsert_user(profile("u1", "alice")).await.unwrap();
        r.create_thread(NewThread { text: "persisted".into(), author: "u1".into(), community: None }).await.unwrap().id
    };
    let r = InMemRepo::with_snapshot_dir(dir.path());
    assert_eq!(r.get_thread(id).await.unwrap().text, "persisted");
    assert_eq!(r.get_user("u1").await.unwrap().threads, vec![id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_all_reach_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let r = InMemRepo::with_snapshot_dir(dir.path());
    r.upsert_user(profile("u1", "alice")).await.unwrap();

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let r = r.clone();
            tokio::spawn(async move {
                r.create_thread(NewThread { text: format!("post {i}"), author: "u1".into(), community: None }).await.unwrap().id
            })
        })
        .collect();
    let mut ids = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap());
    }

    let reloaded = InMemRepo::with_snapshot_dir(dir.path());
    for id in &ids {
        assert!(reloaded.get_thread(*id).await.is_ok(), "thread {id} missing after reload");
    }
    assert_eq!(reloaded.get_user("u1").await.unwrap().threads.len(), 50);
}
