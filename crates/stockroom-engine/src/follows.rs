//! Directed follow edges with a per-edge alert switch.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use stockroom_types::UserId;
use stockroom_types::events::{Envelope, GatewayEvent};
use stockroom_types::models::{FollowEdge, Page};

use crate::error::{Conflict, Result};
use crate::sink::EventSink;

#[derive(Default)]
struct Graph {
    /// (follower, followee) -> alerts enabled
    edges: BTreeMap<(UserId, UserId), bool>,
    /// followee -> followers
    followers: BTreeMap<UserId, BTreeSet<UserId>>,
    /// follower -> followees
    following: BTreeMap<UserId, BTreeSet<UserId>>,
}

impl Graph {
    fn edge(&self, follower: &UserId, followee: &UserId) -> Option<FollowEdge> {
        self.edges
            .get(&(follower.clone(), followee.clone()))
            .map(|alerts_enabled| FollowEdge {
                follower_id: follower.clone(),
                followee_id: followee.clone(),
                alerts_enabled: *alerts_enabled,
            })
    }
}

pub struct FollowGraph {
    graph: RwLock<Graph>,
    max_page_size: usize,
    sink: Arc<dyn EventSink>,
}

impl FollowGraph {
    pub fn new(max_page_size: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            max_page_size,
            sink,
        }
    }

    /// Returns false if the edge already existed; its alert setting is kept.
    pub async fn follow(&self, follower: &UserId, followee: &UserId) -> Result<bool> {
        if follower == followee {
            return Err(Conflict::InvalidSelfFollow.into());
        }

        let mut graph = self.graph.write().await;
        let key = (follower.clone(), followee.clone());
        if graph.edges.contains_key(&key) {
            return Ok(false);
        }

        graph.edges.insert(key, false);
        graph
            .followers
            .entry(followee.clone())
            .or_default()
            .insert(follower.clone());
        graph
            .following
            .entry(follower.clone())
            .or_default()
            .insert(followee.clone());

        info!("{} now follows {}", follower, followee);
        self.sink.publish(Envelope::user(
            followee.clone(),
            GatewayEvent::NewFollower {
                follower_id: follower.clone(),
            },
        ));
        Ok(true)
    }

    /// Returns false if there was nothing to remove.
    pub async fn unfollow(&self, follower: &UserId, followee: &UserId) -> bool {
        let mut graph = self.graph.write().await;
        if graph.edges.remove(&(follower.clone(), followee.clone())).is_none() {
            return false;
        }
        if let Some(set) = graph.followers.get_mut(followee) {
            set.remove(follower);
            if set.is_empty() {
                graph.followers.remove(followee);
            }
        }
        if let Some(set) = graph.following.get_mut(follower) {
            set.remove(followee);
            if set.is_empty() {
                graph.following.remove(follower);
            }
        }
        info!("{} unfollowed {}", follower, followee);
        true
    }

    pub async fn set_alerts(
        &self,
        follower: &UserId,
        followee: &UserId,
        enabled: bool,
    ) -> Result<FollowEdge> {
        let mut graph = self.graph.write().await;
        let Some(alerts) = graph.edges.get_mut(&(follower.clone(), followee.clone())) else {
            return Err(Conflict::EdgeNotFound {
                follower: follower.clone(),
                followee: followee.clone(),
            }
            .into());
        };
        *alerts = enabled;
        debug!("Alerts from {} to {} set to {}", followee, follower, enabled);

        Ok(FollowEdge {
            follower_id: follower.clone(),
            followee_id: followee.clone(),
            alerts_enabled: enabled,
        })
    }

    pub async fn edge(&self, follower: &UserId, followee: &UserId) -> Option<FollowEdge> {
        self.graph.read().await.edge(follower, followee)
    }

    pub async fn followers(
        &self,
        user_id: &UserId,
        after: Option<&UserId>,
        limit: usize,
    ) -> Page<UserId> {
        let graph = self.graph.read().await;
        paginate(graph.followers.get(user_id), after, limit.clamp(1, self.max_page_size))
    }

    pub async fn following(
        &self,
        user_id: &UserId,
        after: Option<&UserId>,
        limit: usize,
    ) -> Page<UserId> {
        let graph = self.graph.read().await;
        paginate(graph.following.get(user_id), after, limit.clamp(1, self.max_page_size))
    }

    pub async fn follower_count(&self, user_id: &UserId) -> usize {
        self.graph
            .read()
            .await
            .followers
            .get(user_id)
            .map_or(0, BTreeSet::len)
    }

    /// Followers of `author` who switched alerts on.
    pub async fn alert_recipients(&self, author: &UserId) -> Vec<UserId> {
        let graph = self.graph.read().await;
        let Some(followers) = graph.followers.get(author) else {
            return Vec::new();
        };
        followers
            .iter()
            .filter(|follower| {
                graph
                    .edges
                    .get(&((*follower).clone(), author.clone()))
                    .copied()
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

/// Ordered by user id; `after` is the last id of the previous page.
fn paginate(set: Option<&BTreeSet<UserId>>, after: Option<&UserId>, limit: usize) -> Page<UserId> {
    let Some(set) = set else {
        return Page {
            items: Vec::new(),
            next_cursor: None,
        };
    };

    let lower = match after {
        Some(after) => Bound::Excluded(after.clone()),
        None => Bound::Unbounded,
    };
    let mut range = set.range((lower, Bound::Unbounded));
    let items: Vec<UserId> = range.by_ref().take(limit).cloned().collect();
    let next_cursor = match (range.next(), items.last()) {
        (Some(_), Some(last)) => Some(last.to_string()),
        _ => None,
    };

    Page { items, next_cursor }
}
