//! Message lifecycle per room: create, edit, pin, soft delete.
//!
//! Ids come from one counter assigned under the store's write lock, so a
//! room's feed order is total and never depends on wall-clock time.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use stockroom_types::events::{Envelope, GatewayEvent};
use stockroom_types::models::{Actor, Entities, MessageView, ReactionGroup, ReviewState};
use stockroom_types::{MessageId, RoomId, UserId};

use crate::error::{Conflict, EngineError, NotFound, Result};
use crate::sink::EventSink;

/// Shown instead of content a moderator has removed.
pub const REMOVED_PLACEHOLDER: &str = "[removed by moderation]";

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    /// Pin sequence; higher was pinned later
    pub pinned_at: Option<u64>,
    pub entities: Entities,
    pub tombstoned: bool,
    pub sentiment: Option<f32>,
}

impl Message {
    pub fn pinned(&self) -> bool {
        self.pinned_at.is_some()
    }

    /// Build the outward view. Deleted messages lose their body; upheld
    /// ones show the moderation placeholder and read as tombstoned.
    pub fn view(&self, review_state: ReviewState, reactions: Vec<ReactionGroup>) -> MessageView {
        let hidden = self.tombstoned || review_state.hides_content();
        let body = if self.tombstoned {
            String::new()
        } else if review_state.hides_content() {
            REMOVED_PLACEHOLDER.to_string()
        } else {
            self.body.clone()
        };

        MessageView {
            id: self.id,
            room_id: self.room_id.clone(),
            author_id: self.author_id.clone(),
            body,
            created_at: self.created_at,
            edited_at: self.edited_at,
            pinned: self.pinned(),
            tombstoned: hidden,
            entities: if hidden {
                Entities::default()
            } else {
                self.entities.clone()
            },
            review_state,
            needs_review: review_state.needs_review(),
            sentiment: if hidden { None } else { self.sentiment },
            reactions,
        }
    }
}

/// Everything `create` needs besides validation.
#[derive(Debug, Clone)]
pub struct Draft {
    pub room_id: RoomId,
    pub author_id: UserId,
    pub body: String,
    pub entities: Entities,
    pub sentiment: Option<f32>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Created {
    New(Message),
    /// The idempotency key matched an earlier post; nothing was written.
    Replayed(Message),
}

impl Created {
    pub fn message(&self) -> &Message {
        match self {
            Created::New(m) | Created::Replayed(m) => m,
        }
    }
}

/// An author's most recent idempotency keys, oldest first. Keys pushed out
/// of the window no longer replay.
#[derive(Default)]
struct RecentKeys {
    ids: HashMap<String, MessageId>,
    order: VecDeque<String>,
}

impl RecentKeys {
    fn remember(&mut self, key: String, id: MessageId, cap: usize) {
        if self.ids.insert(key.clone(), id).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > cap {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

#[derive(Default)]
struct StoreInner {
    next_id: u64,
    next_pin: u64,
    messages: HashMap<MessageId, Message>,
    by_room: HashMap<RoomId, BTreeSet<MessageId>>,
    idempotency: HashMap<UserId, RecentKeys>,
}

impl StoreInner {
    fn get_mut(&mut self, id: MessageId) -> Result<&mut Message> {
        self.messages
            .get_mut(&id)
            .ok_or_else(|| NotFound::Message(id).into())
    }
}

pub struct MessageStore {
    inner: RwLock<StoreInner>,
    max_body_chars: usize,
    max_idempotency_keys: usize,
    sink: Arc<dyn EventSink>,
}

impl MessageStore {
    pub fn new(
        max_body_chars: usize,
        max_idempotency_keys: usize,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            max_body_chars,
            max_idempotency_keys: max_idempotency_keys.max(1),
            sink,
        }
    }

    /// Trim and length-check a body. Length is counted in chars.
    pub fn validate_body(&self, body: &str) -> Result<String> {
        let body = body.trim();
        if body.is_empty() {
            return Err(EngineError::validation("message body is empty"));
        }
        let len = body.chars().count();
        if len > self.max_body_chars {
            return Err(EngineError::validation(format!(
                "message body is {} characters, limit is {}",
                len, self.max_body_chars
            )));
        }
        Ok(body.to_string())
    }

    /// Store a new message. Membership is the caller's concern; this only
    /// validates, assigns the id and emits `MessageCreated`.
    pub async fn create(&self, draft: Draft) -> Result<Created> {
        let body = self.validate_body(&draft.body)?;

        let mut inner = self.inner.write().await;

        if let Some(key) = &draft.idempotency_key {
            let existing = inner
                .idempotency
                .get(&draft.author_id)
                .and_then(|recent| recent.ids.get(key))
                .and_then(|id| inner.messages.get(id));
            if let Some(existing) = existing {
                debug!("Replaying message {} for idempotency key {}", existing.id, key);
                return Ok(Created::Replayed(existing.clone()));
            }
        }

        inner.next_id += 1;
        let id = MessageId::new(inner.next_id);
        let message = Message {
            id,
            room_id: draft.room_id,
            author_id: draft.author_id,
            body,
            created_at: Utc::now(),
            edited_at: None,
            pinned_at: None,
            entities: draft.entities,
            tombstoned: false,
            sentiment: draft.sentiment,
        };

        inner.messages.insert(id, message.clone());
        inner
            .by_room
            .entry(message.room_id.clone())
            .or_default()
            .insert(id);
        if let Some(key) = draft.idempotency_key {
            let cap = self.max_idempotency_keys;
            inner
                .idempotency
                .entry(message.author_id.clone())
                .or_default()
                .remember(key, id, cap);
        }

        info!("Message {} created in {} by {}", id, message.room_id, message.author_id);
        self.sink.publish(Envelope::room(
            message.room_id.clone(),
            GatewayEvent::MessageCreated {
                message: message.view(ReviewState::Clean, Vec::new()),
            },
        ));

        Ok(Created::New(message))
    }

    /// Author-only edit. Reactions and review state are untouched.
    pub async fn edit(
        &self,
        id: MessageId,
        editor_id: &UserId,
        body: &str,
        entities: Entities,
        sentiment: Option<f32>,
    ) -> Result<Message> {
        let body = self.validate_body(body)?;

        let mut inner = self.inner.write().await;
        let message = inner.get_mut(id)?;
        if message.tombstoned {
            return Err(Conflict::MessageRemoved(id).into());
        }
        if &message.author_id != editor_id {
            return Err(EngineError::access_denied("only the author can edit a message"));
        }

        let edited_at = Utc::now();
        message.body = body;
        message.entities = entities;
        message.sentiment = sentiment;
        message.edited_at = Some(edited_at);
        let message = message.clone();

        debug!("Message {} edited", id);
        self.sink.publish(Envelope::room(
            message.room_id.clone(),
            GatewayEvent::MessageEdited {
                message_id: id,
                room_id: message.room_id.clone(),
                body: message.body.clone(),
                entities: message.entities.clone(),
                edited_at,
            },
        ));

        Ok(message)
    }

    /// Moderator-only. Pinning an already pinned message is a no-op.
    pub async fn pin(&self, id: MessageId, actor: &Actor) -> Result<Message> {
        self.set_pinned(id, actor, true).await
    }

    pub async fn unpin(&self, id: MessageId, actor: &Actor) -> Result<Message> {
        self.set_pinned(id, actor, false).await
    }

    async fn set_pinned(&self, id: MessageId, actor: &Actor, pinned: bool) -> Result<Message> {
        if !actor.can_moderate() {
            return Err(EngineError::access_denied("only moderators can pin messages"));
        }

        let mut inner = self.inner.write().await;
        let pin_seq = inner.next_pin + 1;
        let message = inner.get_mut(id)?;
        if message.tombstoned {
            return Err(Conflict::MessageRemoved(id).into());
        }
        if message.pinned() == pinned {
            return Ok(message.clone());
        }

        message.pinned_at = pinned.then_some(pin_seq);
        let message = message.clone();
        if pinned {
            inner.next_pin = pin_seq;
        }

        info!("Message {} {} by {}", id, if pinned { "pinned" } else { "unpinned" }, actor.user_id);
        self.sink.publish(Envelope::room(
            message.room_id.clone(),
            GatewayEvent::MessagePinned {
                message_id: id,
                room_id: message.room_id.clone(),
                pinned,
            },
        ));

        Ok(message)
    }

    /// Author or moderator. The id stays addressable so reactions and
    /// replies keep pointing somewhere; deleting twice is a no-op.
    pub async fn soft_delete(&self, id: MessageId, actor: &Actor) -> Result<Message> {
        let mut inner = self.inner.write().await;
        let message = inner.get_mut(id)?;
        if message.author_id != actor.user_id && !actor.can_moderate() {
            return Err(EngineError::access_denied(
                "only the author or a moderator can delete a message",
            ));
        }
        if message.tombstoned {
            return Ok(message.clone());
        }

        message.tombstoned = true;
        message.pinned_at = None;
        let message = message.clone();

        info!("Message {} deleted by {}", id, actor.user_id);
        self.sink.publish(Envelope::room(
            message.room_id.clone(),
            GatewayEvent::MessageDeleted {
                message_id: id,
                room_id: message.room_id.clone(),
            },
        ));

        Ok(message)
    }

    pub async fn get(&self, id: MessageId) -> Result<Message> {
        self.inner
            .read()
            .await
            .messages
            .get(&id)
            .cloned()
            .ok_or_else(|| NotFound::Message(id).into())
    }

    /// Newest first, strictly older than `before` when given.
    pub async fn list(
        &self,
        room_id: &RoomId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Vec<Message> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_room.get(room_id) else {
            return Vec::new();
        };

        let ids: Box<dyn Iterator<Item = &MessageId>> = match before {
            Some(before) => Box::new(ids.range(..before).rev()),
            None => Box::new(ids.iter().rev()),
        };
        ids.take(limit)
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect()
    }

    /// Live pinned messages, most recently pinned first.
    pub async fn pinned(&self, room_id: &RoomId) -> Vec<Message> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_room.get(room_id) else {
            return Vec::new();
        };

        let mut pinned: Vec<Message> = ids
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| m.pinned() && !m.tombstoned)
            .cloned()
            .collect();
        pinned.sort_by(|a, b| b.pinned_at.cmp(&a.pinned_at));
        pinned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use stockroom_types::models::Role;

    fn store() -> (MessageStore, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (MessageStore::new(2000, 2, sink.clone()), sink)
    }

    fn draft(room: &str, author: &str, body: &str) -> Draft {
        Draft {
            room_id: RoomId::new(room),
            author_id: UserId::new(author),
            body: body.to_string(),
            entities: Entities::default(),
            sentiment: None,
            idempotency_key: None,
        }
    }

    fn moderator() -> Actor {
        Actor::new("mod", "mod", Role::Moderator)
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_bodies() {
        let (store, _) = store();
        assert_eq!(
            store.create(draft("r", "a", "   ")).await.unwrap_err().code(),
            "validation_error"
        );
        let long = "x".repeat(2001);
        assert_eq!(
            store.create(draft("r", "a", &long)).await.unwrap_err().code(),
            "validation_error"
        );
        let exact = "é".repeat(2000);
        assert!(store.create(draft("r", "a", &exact)).await.is_ok());
    }

    #[tokio::test]
    async fn bodies_are_trimmed() {
        let (store, _) = store();
        let created = store.create(draft("r", "a", "  hello  ")).await.unwrap();
        assert_eq!(created.message().body, "hello");
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_feed_is_newest_first() {
        let (store, _) = store();
        let mut ids = Vec::new();
        for i in 0..5 {
            let m = store.create(draft("r", "a", &format!("m{}", i))).await.unwrap();
            ids.push(m.message().id);
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let page = store.list(&RoomId::new("r"), None, 2).await;
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        let older = store.list(&RoomId::new("r"), Some(ids[3]), 10).await;
        assert_eq!(
            older.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1], ids[0]]
        );
    }

    #[tokio::test]
    async fn idempotency_key_replays_without_second_write() {
        let (store, sink) = store();
        let mut first = draft("r", "a", "once");
        first.idempotency_key = Some("k1".into());
        let a = store.create(first.clone()).await.unwrap();
        let b = store.create(first).await.unwrap();

        assert!(matches!(a, Created::New(_)));
        assert!(matches!(b, Created::Replayed(_)));
        assert_eq!(a.message().id, b.message().id);
        assert_eq!(store.list(&RoomId::new("r"), None, 10).await.len(), 1);
        assert_eq!(sink.take().len(), 1);
    }

    #[tokio::test]
    async fn idempotency_keys_are_capped_per_author() {
        let (store, _) = store();
        let keyed = |author: &str, key: &str| {
            let mut d = draft("r", author, key);
            d.idempotency_key = Some(key.into());
            d
        };
        let k1 = store.create(keyed("a", "k1")).await.unwrap().message().id;
        store.create(keyed("a", "k2")).await.unwrap();
        store.create(keyed("b", "k9")).await.unwrap();
        let k3 = store.create(keyed("a", "k3")).await.unwrap();
        assert!(matches!(k3, Created::New(_)));

        // k1 fell out of a's window; b's keys do not count against a
        let again = store.create(keyed("a", "k1")).await.unwrap();
        assert!(matches!(again, Created::New(_)));
        assert_ne!(again.message().id, k1);
        assert!(matches!(store.create(keyed("a", "k3")).await.unwrap(), Created::Replayed(_)));
    }

    #[tokio::test]
    async fn only_author_edits() {
        let (store, _) = store();
        let id = store.create(draft("r", "a", "v1")).await.unwrap().message().id;

        let err = store
            .edit(id, &UserId::new("b"), "hack", Entities::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "access_denied");

        let edited = store
            .edit(id, &UserId::new("a"), "v2", Entities::default(), None)
            .await
            .unwrap();
        assert_eq!(edited.body, "v2");
        assert!(edited.edited_at.is_some());
    }

    #[tokio::test]
    async fn pins_are_moderator_only_and_newest_first() {
        let (store, _) = store();
        let first = store.create(draft("r", "a", "one")).await.unwrap().message().id;
        let second = store.create(draft("r", "a", "two")).await.unwrap().message().id;

        let author = Actor::new("a", "a", Role::User);
        assert_eq!(store.pin(first, &author).await.unwrap_err().code(), "access_denied");

        store.pin(second, &moderator()).await.unwrap();
        store.pin(first, &moderator()).await.unwrap();
        let pinned: Vec<MessageId> =
            store.pinned(&RoomId::new("r")).await.iter().map(|m| m.id).collect();
        assert_eq!(pinned, vec![first, second]);

        store.unpin(first, &moderator()).await.unwrap();
        let pinned: Vec<MessageId> =
            store.pinned(&RoomId::new("r")).await.iter().map(|m| m.id).collect();
        assert_eq!(pinned, vec![second]);
    }

    #[tokio::test]
    async fn soft_delete_keeps_id_addressable() {
        let (store, sink) = store();
        let id = store.create(draft("r", "a", "secret")).await.unwrap().message().id;
        sink.take();

        let stranger = Actor::new("b", "b", Role::User);
        assert_eq!(store.soft_delete(id, &stranger).await.unwrap_err().code(), "access_denied");

        let author = Actor::new("a", "a", Role::User);
        store.soft_delete(id, &author).await.unwrap();
        store.soft_delete(id, &author).await.unwrap();
        assert_eq!(sink.take().len(), 1);

        let message = store.get(id).await.unwrap();
        assert!(message.tombstoned);
        let view = message.view(ReviewState::Clean, Vec::new());
        assert!(view.body.is_empty());
        assert!(view.tombstoned);

        let err = store
            .edit(id, &UserId::new("a"), "again", Entities::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "message_removed");
    }

    #[test]
    fn upheld_view_uses_placeholder() {
        let message = Message {
            id: MessageId::new(1),
            room_id: RoomId::new("r"),
            author_id: UserId::new("a"),
            body: "spam".into(),
            created_at: Utc::now(),
            edited_at: None,
            pinned_at: None,
            entities: Entities::default(),
            tombstoned: false,
            sentiment: Some(0.4),
        };
        let view = message.view(ReviewState::Upheld, Vec::new());
        assert_eq!(view.body, REMOVED_PLACEHOLDER);
        assert!(view.tombstoned);
        assert!(view.sentiment.is_none());

        let flagged = message.view(ReviewState::Flagged, Vec::new());
        assert_eq!(flagged.body, "spam");
        assert!(flagged.needs_review);
    }
}
