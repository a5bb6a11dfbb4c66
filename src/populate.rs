//! Turns raw thread rows into [`ThreadView`] trees.
//!
//! Replies are fetched one level at a time and authors/communities in one batch
//! each, so a page costs `depth + 2` lookups regardless of how many posts it has.

use std::collections::{HashMap, HashSet};

use crate::models::*;
use crate::repo::{Repo, RepoResult};

fn unique<T: Clone + Eq + std::hash::Hash>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

struct Lookup {
    replies: HashMap<Id, Thread>,
    authors: HashMap<UserId, AuthorRef>,
    communities: HashMap<Id, CommunityRef>,
}

impl Lookup {
    fn view(&self, t: &Thread, depth: usize) -> ThreadView {
        let children = if depth == 0 {
            Vec::new()
        } else {
            // dangling ids (reply row missing) are skipped
            t.children.iter().filter_map(|c| self.replies.get(c)).map(|c| self.view(c, depth - 1)).collect()
        };
        ThreadView {
            id: t.id,
            text: t.text.clone(),
            parent_id: t.parent_id,
            created_at: t.created_at,
            author: self.authors.get(&t.author).cloned().unwrap_or_else(|| AuthorRef::unknown(&t.author)),
            community: t.community.and_then(|c| self.communities.get(&c).cloned()),
            reply_count: t.children.len(),
            children,
        }
    }
}

/// Views for `roots` with `depth` levels of replies attached (0 = none).
pub async fn populate(repo: &dyn Repo, roots: &[Thread], depth: usize) -> RepoResult<Vec<ThreadView>> {
    let mut replies: HashMap<Id, Thread> = HashMap::new();
    let mut frontier: Vec<Id> = unique(roots.iter().flat_map(|t| t.children.iter().copied()));
    for _ in 0..depth {
        if frontier.is_empty() {
            break;
        }
        let level = repo.get_threads(&frontier).await?;
        frontier = unique(level.iter().flat_map(|t| t.children.iter().copied()));
        replies.extend(level.into_iter().map(|t| (t.id, t)));
    }

    let everything = || roots.iter().chain(replies.values());
    let author_ids = unique(everything().map(|t| t.author.clone()));
    let community_ids = unique(everything().filter_map(|t| t.community));

    let authors = repo
        .get_users(&author_ids)
        .await?
        .iter()
        .map(|u| (u.id.clone(), AuthorRef::from(u)))
        .collect();
    let communities = repo
        .get_communities(&community_ids)
        .await?
        .iter()
        .map(|c| (c.id, CommunityRef::from(c)))
        .collect();

    let lookup = Lookup { replies, authors, communities };
    Ok(roots.iter().map(|t| lookup.view(t, depth)).collect())
}
