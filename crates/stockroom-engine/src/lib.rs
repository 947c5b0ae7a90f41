//! The room messaging engine.
//!
//! Each component owns its records behind one lock and publishes events to an
//! [`EventSink`] while that lock is held. [`Engine`] composes them: checks
//! that span components read snapshots from one and then act on another, so
//! no two component locks are ever held together.

pub mod config;
pub mod credibility;
pub mod entities;
pub mod error;
pub mod follows;
pub mod messages;
pub mod moderation;
pub mod reactions;
pub mod rooms;
pub mod sentiment;
pub mod sink;
pub mod users;

use std::sync::Arc;

use tracing::debug;

use stockroom_types::events::{Envelope, GatewayEvent};
use stockroom_types::models::{
    Actor, CredibilityView, FollowEdge, MessageView, Page, ReviewCase, ReviewFlag, ReviewState,
    RoomKind, RoomSummary, Verdict,
};
use stockroom_types::{MessageId, RoomId, UserId};

pub use config::EngineConfig;
pub use error::{Conflict, EngineError, NotFound, Result};
pub use sentiment::{NeutralScorer, SentimentScorer};
pub use sink::{EventSink, NullSink, RecordingSink};

use credibility::Reception;
use follows::FollowGraph;
use messages::{Created, Draft, Message, MessageStore};
use moderation::{FlagOutcome, MessageRef, ModerationEngine, Resolution};
use reactions::{ReactionAggregator, ToggleOutcome};
use rooms::{RoomAccess, RoomRegistry};
use users::UserDirectory;

pub struct Engine {
    config: Arc<EngineConfig>,
    users: UserDirectory,
    rooms: RoomRegistry,
    messages: MessageStore,
    reactions: ReactionAggregator,
    moderation: ModerationEngine,
    follows: FollowGraph,
    scorer: Arc<dyn SentimentScorer>,
    sink: Arc<dyn EventSink>,
}

impl Engine {
    pub fn new(config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        let config = Arc::new(config);
        Self {
            users: UserDirectory::new(),
            rooms: RoomRegistry::new(config.max_room_name_chars, sink.clone()),
            messages: MessageStore::new(
                config.max_body_chars,
                config.max_idempotency_keys,
                sink.clone(),
            ),
            reactions: ReactionAggregator::new(config.max_emoji_chars, sink.clone()),
            moderation: ModerationEngine::new(config.clone(), sink.clone()),
            follows: FollowGraph::new(config.max_page_size, sink.clone()),
            scorer: Arc::new(NeutralScorer),
            config,
            sink,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SentimentScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Record an authenticated actor so `@username` mentions resolve.
    pub async fn observe(&self, actor: &Actor) {
        self.users.observe(actor).await;
    }

    // -- Rooms --

    pub async fn create_room(
        &self,
        actor: &Actor,
        name: &str,
        kind: RoomKind,
        symbol: Option<&str>,
    ) -> Result<RoomSummary> {
        self.rooms.create(actor, name, kind, symbol).await
    }

    /// Startup seeding; no actor involved.
    pub async fn seed_room(
        &self,
        name: &str,
        kind: RoomKind,
        symbol: Option<&str>,
    ) -> Result<RoomSummary> {
        self.rooms.create_unchecked(name, kind, symbol).await
    }

    /// Rooms the actor may see, by name.
    pub async fn list_rooms(&self, actor: &Actor) -> Vec<RoomSummary> {
        let mut visible = Vec::new();
        for room in self.rooms.list().await {
            if room.kind != RoomKind::Private || self.can_view_room(actor, &room.id).await.is_ok() {
                visible.push(room);
            }
        }
        visible
    }

    pub async fn room(&self, actor: &Actor, room_id: &RoomId) -> Result<RoomSummary> {
        self.can_view_room(actor, room_id).await?;
        self.rooms.get(room_id).await
    }

    pub async fn add_member(
        &self,
        actor: &Actor,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<bool> {
        self.rooms.add_member(actor, room_id, user_id).await
    }

    pub async fn remove_member(
        &self,
        actor: &Actor,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<bool> {
        self.rooms.remove_member(actor, room_id, user_id).await
    }

    pub async fn join_room(&self, room_id: &RoomId, actor: &Actor) -> Result<usize> {
        self.rooms.join(room_id, actor).await
    }

    pub async fn leave_room(&self, room_id: &RoomId, user_id: &UserId) -> Result<usize> {
        self.rooms.leave(room_id, user_id).await
    }

    pub async fn presence_count(&self, actor: &Actor, room_id: &RoomId) -> Result<usize> {
        self.can_view_room(actor, room_id).await?;
        self.rooms.presence_count(room_id).await
    }

    /// Snapshot of the actor's standing in a room; fails if they may not
    /// read it.
    pub async fn can_view_room(&self, actor: &Actor, room_id: &RoomId) -> Result<RoomAccess> {
        let access = self.rooms.access(room_id, &actor.user_id).await?;
        if !access.can_view(actor) {
            return Err(EngineError::access_denied(format!("room {} is members-only", room_id)));
        }
        Ok(access)
    }

    // -- Messages --

    /// Post to a room the author is a member of. A repeated idempotency key
    /// returns the first post and sends no alerts.
    pub async fn post_message(
        &self,
        author: &Actor,
        room_id: &RoomId,
        body: &str,
        idempotency_key: Option<String>,
    ) -> Result<MessageView> {
        let access = self.rooms.access(room_id, &author.user_id).await?;
        if !access.is_member {
            return Err(EngineError::access_denied(format!(
                "{} is not a member of {}",
                author.user_id, room_id
            )));
        }

        let body = self.messages.validate_body(body)?;
        let entities = self.users.parse(&body).await;
        let sentiment = self.scorer.score(&body);

        let created = self
            .messages
            .create(Draft {
                room_id: room_id.clone(),
                author_id: author.user_id.clone(),
                body,
                entities,
                sentiment,
                idempotency_key,
            })
            .await?;

        match created {
            Created::New(message) => {
                let view = message.view(ReviewState::Clean, Vec::new());
                self.send_alerts(&access, &view).await;
                Ok(view)
            }
            Created::Replayed(message) => Ok(self.compose(&message).await),
        }
    }

    /// Push a new post to followers who switched alerts on for its author.
    /// Private-room posts only reach followers who are members.
    async fn send_alerts(&self, access: &RoomAccess, view: &MessageView) {
        for follower in self.follows.alert_recipients(&view.author_id).await {
            if access.kind == RoomKind::Private {
                let member = self
                    .rooms
                    .access(&access.room_id, &follower)
                    .await
                    .map(|a| a.is_member)
                    .unwrap_or(false);
                if !member {
                    continue;
                }
            }
            debug!("Alerting {} about message {}", follower, view.id);
            self.sink.publish(Envelope::user(
                follower,
                GatewayEvent::FollowAlert {
                    message: view.clone(),
                },
            ));
        }
    }

    pub async fn edit_message(
        &self,
        editor: &Actor,
        message_id: MessageId,
        body: &str,
    ) -> Result<MessageView> {
        if self.moderation.review_state(message_id).await == ReviewState::Upheld {
            return Err(Conflict::MessageRemoved(message_id).into());
        }
        let body = self.messages.validate_body(body)?;
        let entities = self.users.parse(&body).await;
        let sentiment = self.scorer.score(&body);

        let message = self
            .messages
            .edit(message_id, &editor.user_id, &body, entities, sentiment)
            .await?;
        Ok(self.compose(&message).await)
    }

    pub async fn delete_message(
        &self,
        actor: &Actor,
        message_id: MessageId,
    ) -> Result<MessageView> {
        let message = self.messages.soft_delete(message_id, actor).await?;
        Ok(self.compose(&message).await)
    }

    pub async fn pin_message(&self, actor: &Actor, message_id: MessageId) -> Result<MessageView> {
        if self.moderation.review_state(message_id).await == ReviewState::Upheld {
            return Err(Conflict::MessageRemoved(message_id).into());
        }
        let message = self.messages.pin(message_id, actor).await?;
        Ok(self.compose(&message).await)
    }

    pub async fn unpin_message(&self, actor: &Actor, message_id: MessageId) -> Result<MessageView> {
        let message = self.messages.unpin(message_id, actor).await?;
        Ok(self.compose(&message).await)
    }

    pub async fn message(&self, actor: &Actor, message_id: MessageId) -> Result<MessageView> {
        let message = self.messages.get(message_id).await?;
        self.can_view_room(actor, &message.room_id).await?;
        Ok(self.compose(&message).await)
    }

    /// Newest first. `next_cursor` is the id to pass as `before` for the
    /// following page.
    pub async fn feed(
        &self,
        actor: &Actor,
        room_id: &RoomId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Page<MessageView>> {
        self.can_view_room(actor, room_id).await?;
        let limit = limit.clamp(1, self.config.max_page_size);

        let messages = self.messages.list(room_id, before, limit).await;
        let next_cursor = match messages.last() {
            Some(last) if messages.len() == limit => Some(last.id.to_string()),
            _ => None,
        };
        Ok(Page {
            items: self.compose_all(&messages).await,
            next_cursor,
        })
    }

    /// Pinned messages, newest pin first. Moderation-upheld ones are left out.
    pub async fn pinned(&self, actor: &Actor, room_id: &RoomId) -> Result<Vec<MessageView>> {
        self.can_view_room(actor, room_id).await?;
        let messages = self.messages.pinned(room_id).await;
        Ok(self
            .compose_all(&messages)
            .await
            .into_iter()
            .filter(|view| !view.review_state.hides_content())
            .collect())
    }

    async fn compose(&self, message: &Message) -> MessageView {
        let review_state = self.moderation.review_state(message.id).await;
        let reactions = self.reactions.tallies(message.id).await;
        message.view(review_state, reactions)
    }

    async fn compose_all(&self, messages: &[Message]) -> Vec<MessageView> {
        let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
        let states = self.moderation.review_states(&ids).await;
        let mut tallies = self.reactions.tallies_for(&ids).await;
        messages
            .iter()
            .map(|m| {
                m.view(
                    states.get(&m.id).copied().unwrap_or_default(),
                    tallies.remove(&m.id).unwrap_or_default(),
                )
            })
            .collect()
    }

    // -- Reactions --

    /// Toggle a reaction. Deleted and moderation-removed messages read as
    /// missing. Crossing the reception bar rewards the author once.
    pub async fn toggle_reaction(
        &self,
        actor: &Actor,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<ToggleOutcome> {
        let message = self.messages.get(message_id).await?;
        if message.tombstoned
            || self.moderation.review_state(message_id).await == ReviewState::Upheld
        {
            return Err(NotFound::Message(message_id).into());
        }
        let access = self.can_view_room(actor, &message.room_id).await?;

        let outcome = self
            .reactions
            .toggle(&message.room_id, message_id, &actor.user_id, emoji)
            .await?;

        if outcome.user_reacted && actor.user_id != message.author_id {
            let reactors = self
                .reactions
                .distinct_reactors(message_id, &message.author_id)
                .await;
            let author_followers = self.follows.follower_count(&message.author_id).await;
            self.moderation
                .record_reception(Reception {
                    message_id,
                    author_id: message.author_id.clone(),
                    reactors,
                    room_members: access.member_count,
                    author_followers,
                })
                .await;
        }

        Ok(outcome)
    }

    // -- Moderation --

    pub async fn flag_message(
        &self,
        reporter: &Actor,
        message_id: MessageId,
        reason: &str,
    ) -> Result<FlagOutcome> {
        let message = self.messages.get(message_id).await?;
        if message.tombstoned {
            return Err(Conflict::MessageRemoved(message_id).into());
        }
        self.can_view_room(reporter, &message.room_id).await?;

        self.moderation
            .flag(
                &MessageRef {
                    id: message.id,
                    room_id: message.room_id,
                    author_id: message.author_id,
                },
                reporter,
                reason,
            )
            .await
    }

    pub async fn resolve_review(
        &self,
        moderator: &Actor,
        message_id: MessageId,
        verdict: Verdict,
    ) -> Result<Resolution> {
        self.messages.get(message_id).await?;
        self.moderation.resolve(message_id, moderator, verdict).await
    }

    pub async fn review_queue(&self, moderator: &Actor) -> Result<Vec<ReviewCase>> {
        self.moderation.queue(moderator).await
    }

    pub async fn flags_for(
        &self,
        moderator: &Actor,
        message_id: MessageId,
    ) -> Result<Vec<ReviewFlag>> {
        self.messages.get(message_id).await?;
        self.moderation.flags_for(message_id, moderator).await
    }

    pub async fn credibility(&self, user_id: &UserId) -> CredibilityView {
        self.moderation.credibility(user_id).await
    }

    // -- Follows --

    pub async fn follow(&self, actor: &Actor, followee: &UserId) -> Result<FollowEdge> {
        self.follows.follow(&actor.user_id, followee).await?;
        self.follows
            .edge(&actor.user_id, followee)
            .await
            .ok_or_else(|| {
                Conflict::EdgeNotFound {
                    follower: actor.user_id.clone(),
                    followee: followee.clone(),
                }
                .into()
            })
    }

    pub async fn unfollow(&self, actor: &Actor, followee: &UserId) -> bool {
        self.follows.unfollow(&actor.user_id, followee).await
    }

    pub async fn set_alerts(
        &self,
        actor: &Actor,
        followee: &UserId,
        enabled: bool,
    ) -> Result<FollowEdge> {
        self.follows.set_alerts(&actor.user_id, followee, enabled).await
    }

    pub async fn followers(
        &self,
        user_id: &UserId,
        after: Option<&UserId>,
        limit: usize,
    ) -> Page<UserId> {
        self.follows.followers(user_id, after, limit).await
    }

    pub async fn following(
        &self,
        user_id: &UserId,
        after: Option<&UserId>,
        limit: usize,
    ) -> Page<UserId> {
        self.follows.following(user_id, after, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_types::models::Role;

    async fn engine() -> (Engine, Arc<RecordingSink>, RoomId) {
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(EngineConfig::default(), sink.clone());
        let room = engine.seed_room("stocks", RoomKind::General, None).await.unwrap();
        (engine, sink, room.id)
    }

    async fn member(engine: &Engine, room: &RoomId, name: &str) -> Actor {
        let actor = Actor::new(name, name, Role::User);
        engine.observe(&actor).await;
        engine.add_member(&actor, room, &actor.user_id).await.unwrap();
        actor
    }

    fn moderator() -> Actor {
        Actor::new("mod", "mod", Role::Moderator)
    }

    #[tokio::test]
    async fn non_members_cannot_post() {
        let (engine, _, room) = engine().await;
        let outsider = Actor::new("x", "x", Role::User);
        let err = engine.post_message(&outsider, &room, "hi", None).await.unwrap_err();
        assert_eq!(err.code(), "access_denied");
    }

    #[tokio::test]
    async fn post_resolves_mentions_and_scores_sentiment() {
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(EngineConfig::default(), sink)
            .with_scorer(Arc::new(|text: &str| text.contains("moon").then_some(0.8_f32)));
        let room = engine.seed_room("stocks", RoomKind::General, None).await.unwrap().id;
        let alice = member(&engine, &room, "alice").await;
        let bob = member(&engine, &room, "bob").await;

        let view = engine
            .post_message(&alice, &room, "@bob $tsla to the moon", None)
            .await
            .unwrap();
        assert_eq!(view.entities.mentions[0].user_id, Some(bob.user_id));
        assert_eq!(view.entities.tickers, vec!["TSLA"]);
        assert_eq!(view.sentiment, Some(0.8));
    }

    #[tokio::test]
    async fn alerts_reach_only_opted_in_followers() {
        let (engine, sink, room) = engine().await;
        let author = member(&engine, &room, "author").await;
        let fan = Actor::new("fan", "fan", Role::User);
        let lurker = Actor::new("lurker", "lurker", Role::User);

        engine.follow(&fan, &author.user_id).await.unwrap();
        engine.follow(&lurker, &author.user_id).await.unwrap();
        engine.set_alerts(&fan, &author.user_id, true).await.unwrap();
        sink.take();

        engine.post_message(&author, &room, "new idea", None).await.unwrap();
        let alerted: Vec<UserId> = sink
            .take()
            .into_iter()
            .filter(|e| matches!(e.event, GatewayEvent::FollowAlert { .. }))
            .filter_map(|e| match e.scope {
                stockroom_types::events::Scope::User(user) => Some(user),
                _ => None,
            })
            .collect();
        assert_eq!(alerted, vec![fan.user_id]);
    }

    #[tokio::test]
    async fn private_room_alerts_skip_non_members() {
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(EngineConfig::default(), sink.clone());
        let room = engine.seed_room("desk", RoomKind::Private, None).await.unwrap().id;
        let author = Actor::new("author", "author", Role::User);
        engine.add_member(&moderator(), &room, &author.user_id).await.unwrap();

        let fan = Actor::new("fan", "fan", Role::User);
        engine.follow(&fan, &author.user_id).await.unwrap();
        engine.set_alerts(&fan, &author.user_id, true).await.unwrap();
        sink.take();

        engine.post_message(&author, &room, "members only", None).await.unwrap();
        assert!(
            !sink
                .take()
                .iter()
                .any(|e| matches!(e.event, GatewayEvent::FollowAlert { .. }))
        );
    }

    #[tokio::test]
    async fn replayed_post_sends_no_second_alert() {
        let (engine, sink, room) = engine().await;
        let author = member(&engine, &room, "author").await;
        let fan = Actor::new("fan", "fan", Role::User);
        engine.follow(&fan, &author.user_id).await.unwrap();
        engine.set_alerts(&fan, &author.user_id, true).await.unwrap();
        sink.take();

        let first = engine
            .post_message(&author, &room, "once", Some("k".into()))
            .await
            .unwrap();
        let again = engine
            .post_message(&author, &room, "once", Some("k".into()))
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(sink.take().len(), 2); // MessageCreated + FollowAlert
    }

    #[tokio::test]
    async fn deleted_messages_reject_reactions() {
        let (engine, _, room) = engine().await;
        let author = member(&engine, &room, "author").await;
        let view = engine.post_message(&author, &room, "oops", None).await.unwrap();
        engine.delete_message(&author, view.id).await.unwrap();

        let err = engine.toggle_reaction(&author, view.id, "👍").await.unwrap_err();
        assert_eq!(err.code(), "message_not_found");
    }

    #[tokio::test]
    async fn upheld_messages_are_hidden_and_frozen() {
        let (engine, _, room) = engine().await;
        let author = member(&engine, &room, "author").await;
        let view = engine.post_message(&author, &room, "pump it", None).await.unwrap();

        engine.flag_message(&moderator(), view.id, "manipulation").await.unwrap();
        engine.resolve_review(&moderator(), view.id, Verdict::Upheld).await.unwrap();

        let hidden = engine.message(&author, view.id).await.unwrap();
        assert_eq!(hidden.body, messages::REMOVED_PLACEHOLDER);
        assert!(hidden.tombstoned);

        assert_eq!(
            engine.edit_message(&author, view.id, "edited").await.unwrap_err().code(),
            "message_removed"
        );
        assert_eq!(
            engine.toggle_reaction(&author, view.id, "👍").await.unwrap_err().code(),
            "message_not_found"
        );
        assert!(engine.credibility(&author.user_id).await.score < 5.0);
    }

    #[tokio::test]
    async fn well_received_post_rewards_author_once() {
        let (engine, _, room) = engine().await;
        let author = member(&engine, &room, "author").await;
        let mut fans = Vec::new();
        for name in ["a", "b", "c", "d"] {
            fans.push(member(&engine, &room, name).await);
        }
        let view = engine.post_message(&author, &room, "great call", None).await.unwrap();

        for fan in &fans {
            engine.toggle_reaction(fan, view.id, "🚀").await.unwrap();
        }
        let credibility = engine.credibility(&author.user_id).await;
        assert!(credibility.score > 5.0);
        assert_eq!(credibility.sample_count, 1);
    }

    #[tokio::test]
    async fn feed_pages_with_composed_views() {
        let (engine, _, room) = engine().await;
        let author = member(&engine, &room, "author").await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let body = format!("m{}", i);
            ids.push(engine.post_message(&author, &room, &body, None).await.unwrap().id);
        }
        engine.toggle_reaction(&author, ids[4], "👍").await.unwrap();

        let page = engine.feed(&author, &room, None, 3).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0].id, ids[4]);
        assert_eq!(page.items[0].reactions[0].count, 1);
        assert_eq!(page.next_cursor, Some(ids[2].to_string()));

        let rest = engine.feed(&author, &room, Some(ids[2]), 3).await.unwrap();
        assert_eq!(rest.items.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[1], ids[0]]);
        assert!(rest.next_cursor.is_none());
    }

    #[tokio::test]
    async fn private_rooms_hidden_from_outsiders() {
        let (engine, _, _) = engine().await;
        engine.seed_room("desk", RoomKind::Private, None).await.unwrap();
        let outsider = Actor::new("x", "x", Role::User);

        let names: Vec<String> =
            engine.list_rooms(&outsider).await.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["stocks"]);
        assert_eq!(engine.list_rooms(&moderator()).await.len(), 2);
        assert_eq!(
            engine.feed(&outsider, &RoomId::new("desk"), None, 10).await.unwrap_err().code(),
            "access_denied"
        );
    }
}
