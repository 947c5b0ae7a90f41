//! Room metadata, membership and live presence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use stockroom_types::events::{Envelope, GatewayEvent};
use stockroom_types::models::{Actor, RoomKind, RoomSummary};
use stockroom_types::{RoomId, UserId};

use crate::error::{Conflict, EngineError, NotFound, Result};
use crate::sink::EventSink;

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,
    /// Upper-cased ticker for `RoomKind::Ticker` rooms
    pub symbol: Option<String>,
    pub requires_verification: bool,
    pub member_ids: HashSet<UserId>,
    pub online_user_ids: HashSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            symbol: self.symbol.clone(),
            requires_verification: self.requires_verification,
            member_count: self.member_ids.len(),
            online_count: self.online_user_ids.len(),
        }
    }

    fn check_verification(&self, actor: &Actor) -> Result<()> {
        if self.requires_verification && !actor.verified {
            return Err(EngineError::access_denied(format!(
                "room {} requires a verified account",
                self.id
            )));
        }
        Ok(())
    }
}

/// Point-in-time view of what a user may do in a room. Other components
/// consult this instead of holding the registry lock.
#[derive(Debug, Clone)]
pub struct RoomAccess {
    pub room_id: RoomId,
    pub kind: RoomKind,
    pub is_member: bool,
    pub member_count: usize,
}

impl RoomAccess {
    /// Private rooms are visible to members and moderators only.
    pub fn can_view(&self, actor: &Actor) -> bool {
        self.kind != RoomKind::Private || self.is_member || actor.can_moderate()
    }
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Room>>,
    max_name_chars: usize,
    sink: Arc<dyn EventSink>,
}

impl RoomRegistry {
    pub fn new(max_name_chars: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_name_chars,
            sink,
        }
    }

    /// Admin-only room creation.
    pub async fn create(
        &self,
        actor: &Actor,
        name: &str,
        kind: RoomKind,
        symbol: Option<&str>,
    ) -> Result<RoomSummary> {
        if !actor.role.is_admin() {
            return Err(EngineError::access_denied("only admins can create rooms"));
        }
        self.create_unchecked(name, kind, symbol).await
    }

    /// Room creation on behalf of the system (startup seeding).
    pub async fn create_unchecked(
        &self,
        name: &str,
        kind: RoomKind,
        symbol: Option<&str>,
    ) -> Result<RoomSummary> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > self.max_name_chars {
            return Err(EngineError::validation(format!(
                "room name must be 1-{} characters",
                self.max_name_chars
            )));
        }

        let symbol = symbol
            .map(|s| s.trim().trim_start_matches('$').to_uppercase())
            .filter(|s| !s.is_empty());
        if let Some(s) = &symbol {
            if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
                return Err(EngineError::validation(format!("invalid ticker symbol '{}'", s)));
            }
        }
        if kind == RoomKind::Ticker && symbol.is_none() {
            return Err(EngineError::validation("ticker rooms need a symbol"));
        }

        let slug = slug(name);
        if slug.is_empty() {
            return Err(EngineError::validation(format!(
                "room name '{}' needs at least one letter or digit",
                name
            )));
        }
        let id = RoomId::new(slug);
        let room = Room {
            id: id.clone(),
            name: name.to_string(),
            kind,
            symbol,
            requires_verification: kind == RoomKind::Vip,
            member_ids: HashSet::new(),
            online_user_ids: HashSet::new(),
            created_at: Utc::now(),
        };

        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&id) {
            return Err(Conflict::RoomExists(id).into());
        }
        let summary = room.summary();
        rooms.insert(id.clone(), room);

        info!("Room {} created ({:?})", id, kind);
        Ok(summary)
    }

    pub async fn get(&self, room_id: &RoomId) -> Result<RoomSummary> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(Room::summary)
            .ok_or_else(|| NotFound::Room(room_id.clone()).into())
    }

    pub async fn list(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> =
            self.rooms.read().await.values().map(Room::summary).collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    pub async fn access(&self, room_id: &RoomId, user_id: &UserId) -> Result<RoomAccess> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(room_id)
            .ok_or_else(|| NotFound::Room(room_id.clone()))?;
        Ok(RoomAccess {
            room_id: room.id.clone(),
            kind: room.kind,
            is_member: room.member_ids.contains(user_id),
            member_count: room.member_ids.len(),
        })
    }

    /// Add `user_id` to the member list. Anyone may join open rooms
    /// themselves; private rooms are invite-only via moderators.
    /// Returns false if the user was already a member.
    pub async fn add_member(
        &self,
        actor: &Actor,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| NotFound::Room(room_id.clone()))?;

        let is_self = &actor.user_id == user_id;
        match room.kind {
            RoomKind::Private if !actor.can_moderate() => {
                return Err(EngineError::access_denied(format!(
                    "room {} is invite-only",
                    room_id
                )));
            }
            _ if !is_self && !actor.can_moderate() => {
                return Err(EngineError::access_denied("cannot add other users"));
            }
            _ => {}
        }
        if is_self {
            room.check_verification(actor)?;
        }

        let added = room.member_ids.insert(user_id.clone());
        if added {
            debug!("{} is now a member of {}", user_id, room_id);
        }
        Ok(added)
    }

    pub async fn remove_member(
        &self,
        actor: &Actor,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<bool> {
        if &actor.user_id != user_id && !actor.can_moderate() {
            return Err(EngineError::access_denied("cannot remove other users"));
        }
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| NotFound::Room(room_id.clone()))?;
        Ok(room.member_ids.remove(user_id))
    }

    /// Mark the actor online in a room. Joining twice is a no-op.
    /// Returns the online count.
    pub async fn join(&self, room_id: &RoomId, actor: &Actor) -> Result<usize> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| NotFound::Room(room_id.clone()))?;

        room.check_verification(actor)?;
        if room.kind == RoomKind::Private
            && !room.member_ids.contains(&actor.user_id)
            && !actor.can_moderate()
        {
            return Err(EngineError::access_denied(format!(
                "room {} is members-only",
                room_id
            )));
        }

        if room.online_user_ids.insert(actor.user_id.clone()) {
            let online_count = room.online_user_ids.len();
            debug!("{} joined {} ({} online)", actor.user_id, room_id, online_count);
            self.sink.publish(Envelope::room(
                room_id.clone(),
                GatewayEvent::PresenceChanged {
                    room_id: room_id.clone(),
                    user_id: actor.user_id.clone(),
                    delta: 1,
                    online_count,
                },
            ));
        }
        Ok(room.online_user_ids.len())
    }

    /// Mark a user offline. Leaving a room you are not in is a no-op, so
    /// the count never goes negative. Returns the online count.
    pub async fn leave(&self, room_id: &RoomId, user_id: &UserId) -> Result<usize> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| NotFound::Room(room_id.clone()))?;

        if room.online_user_ids.remove(user_id) {
            let online_count = room.online_user_ids.len();
            debug!("{} left {} ({} online)", user_id, room_id, online_count);
            self.sink.publish(Envelope::room(
                room_id.clone(),
                GatewayEvent::PresenceChanged {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                    delta: -1,
                    online_count,
                },
            ));
        }
        Ok(room.online_user_ids.len())
    }

    pub async fn presence_count(&self, room_id: &RoomId) -> Result<usize> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.online_user_ids.len())
            .ok_or_else(|| NotFound::Room(room_id.clone()).into())
    }
}

/// `"Stocks & Options"` -> `"stocks-options"`
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
