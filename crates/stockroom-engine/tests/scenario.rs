use std::sync::Arc;

use stockroom_engine::entities::{self, NoUsers};
use stockroom_engine::{Engine, EngineConfig, RecordingSink};
use stockroom_types::events::GatewayEvent;
use stockroom_types::models::{Actor, ReviewState, Role, RoomKind, Verdict};
use stockroom_types::{RoomId, UserId};

struct Fixture {
    engine: Arc<Engine>,
    sink: Arc<RecordingSink>,
    room: RoomId,
}

async fn fixture() -> Fixture {
    let sink = Arc::new(RecordingSink::new());
    let engine = Arc::new(Engine::new(EngineConfig::default(), sink.clone()));
    let room = engine
        .seed_room("stocks", RoomKind::General, None)
        .await
        .unwrap()
        .id;
    Fixture { engine, sink, room }
}

impl Fixture {
    async fn member(&self, name: &str) -> Actor {
        let actor = Actor::new(name, name, Role::User);
        self.engine.observe(&actor).await;
        self.engine
            .add_member(&actor, &self.room, &actor.user_id)
            .await
            .unwrap();
        actor
    }
}

#[tokio::test]
async fn post_react_flag_dismiss() {
    let f = fixture().await;
    let a = f.member("a").await;
    let b = f.member("b").await;
    let moderator = Actor::new("mod", "mod", Role::Moderator);

    let posted = f
        .engine
        .post_message(&a, &f.room, "$TSLA breaking out 🚀", None)
        .await
        .unwrap();
    assert_eq!(posted.entities.tickers, vec!["TSLA"]);
    let id = posted.id;

    let reacted = f.engine.toggle_reaction(&b, id, "🚀").await.unwrap();
    assert_eq!(reacted.new_count, 1);
    assert!(reacted.user_reacted);

    let mut outcomes = Vec::new();
    for reporter in ["r1", "r2", "r3"] {
        let reporter = f.member(reporter).await;
        outcomes.push(f.engine.flag_message(&reporter, id, "spam").await.unwrap());
    }
    assert_eq!(
        outcomes.iter().filter(|o| o.escalated).count(),
        1,
        "flagged exactly once"
    );
    assert_eq!(f.engine.message(&a, id).await.unwrap().review_state, ReviewState::Flagged);

    let before = f.engine.credibility(&a.user_id).await;
    let resolution = f
        .engine
        .resolve_review(&moderator, id, Verdict::Dismissed)
        .await
        .unwrap();
    assert_eq!(resolution.review_state, ReviewState::Dismissed);

    let view = f.engine.message(&a, id).await.unwrap();
    assert_eq!(view.review_state, ReviewState::Dismissed);
    assert!(!view.needs_review);
    assert_eq!(view.body, "$TSLA breaking out 🚀");
    assert_eq!(view.reactions.len(), 1);
    assert_eq!(view.reactions[0].emoji, "🚀");
    assert_eq!(view.reactions[0].user_ids, vec![b.user_id.clone()]);
    assert_eq!(f.engine.credibility(&a.user_id).await, before);

    let events = f.sink.take();
    assert!(events
        .iter()
        .any(|e| matches!(e.event, GatewayEvent::MessageCreated { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e.event, GatewayEvent::ReactionChanged { new_count: 1, .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e.event, GatewayEvent::CredibilityChanged { .. })));
}

#[tokio::test]
async fn ids_order_the_feed() {
    let f = fixture().await;
    let a = f.member("a").await;
    let first = f.engine.post_message(&a, &f.room, "one", None).await.unwrap();
    let second = f.engine.post_message(&a, &f.room, "two", None).await.unwrap();
    assert!(first.id < second.id);
    assert!(first.created_at <= second.created_at);
}

#[tokio::test]
async fn body_length_bounds() {
    let f = fixture().await;
    let a = f.member("a").await;
    for body in ["", "   ", "x".repeat(2001).as_str()] {
        let err = f.engine.post_message(&a, &f.room, body, None).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
    let max = f
        .engine
        .post_message(&a, &f.room, &"x".repeat(2000), None)
        .await
        .unwrap();
    assert_eq!(max.body.chars().count(), 2000);
}

#[tokio::test]
async fn dismissed_then_one_new_flag_reopens() {
    let f = fixture().await;
    let a = f.member("a").await;
    let moderator = Actor::new("mod", "mod", Role::Moderator);
    let id = f.engine.post_message(&a, &f.room, "hmm", None).await.unwrap().id;

    for reporter in ["r1", "r2", "r3"] {
        let reporter = f.member(reporter).await;
        f.engine.flag_message(&reporter, id, "spam").await.unwrap();
    }
    f.engine
        .resolve_review(&moderator, id, Verdict::Dismissed)
        .await
        .unwrap();

    let late = f.member("r4").await;
    let outcome = f.engine.flag_message(&late, id, "still spam").await.unwrap();
    assert!(outcome.escalated);
    assert_eq!(outcome.review_state, ReviewState::Flagged);
}

#[tokio::test]
async fn alerts_do_not_survive_unfollow() {
    let f = fixture().await;
    let a = Actor::new("a", "a", Role::User);
    let b = UserId::new("b");

    f.engine.follow(&a, &b).await.unwrap();
    assert!(f.engine.unfollow(&a, &b).await);
    let err = f.engine.set_alerts(&a, &b, true).await.unwrap_err();
    assert_eq!(err.code(), "edge_not_found");

    let edge = f.engine.follow(&a, &b).await.unwrap();
    assert!(!edge.alerts_enabled);
}

#[tokio::test]
async fn presence_under_concurrent_sessions() {
    let f = fixture().await;
    let mut tasks = Vec::new();
    for i in 0..40 {
        let engine = f.engine.clone();
        let room = f.room.clone();
        tasks.push(tokio::spawn(async move {
            let actor = Actor::new(format!("u{}", i % 10), "u", Role::User);
            engine.join_room(&room, &actor).await.unwrap();
            engine.join_room(&room, &actor).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let viewer = Actor::new("u0", "u0", Role::User);
    assert_eq!(f.engine.presence_count(&viewer, &f.room).await.unwrap(), 10);

    for i in 0..10 {
        let user = UserId::new(format!("u{}", i));
        f.engine.leave_room(&f.room, &user).await.unwrap();
        f.engine.leave_room(&f.room, &user).await.unwrap();
    }
    assert_eq!(f.engine.presence_count(&viewer, &f.room).await.unwrap(), 0);
}

#[test]
fn parsing_is_pure() {
    let text = "Hey @bob check $AAPL #earnings";
    let first = entities::parse(text, &NoUsers);
    assert_eq!(first, entities::parse(text, &NoUsers));
    assert_eq!(first.mentions[0].raw, "bob");
    assert_eq!(first.tickers, vec!["AAPL"]);
    assert_eq!(first.hashtags, vec!["earnings"]);
}
