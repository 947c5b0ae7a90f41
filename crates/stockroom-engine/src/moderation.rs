//! Review lifecycle of messages and the credibility consequences of a
//! moderator's verdict.
//!
//! ```text
//! clean ──(threshold distinct reporters | privileged flag)──> flagged
//! flagged ──upheld──> upheld      (terminal, content hidden, author penalised)
//! flagged ──dismissed──> dismissed (terminal for those flags)
//! dismissed ──(new distinct reporter, threshold met)──> flagged
//! ```
//!
//! A transition is only ever evaluated when a new flag arrives, so a
//! dismissed message can not drift back to flagged from the flags that were
//! already dismissed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use stockroom_types::events::{Envelope, GatewayEvent};
use stockroom_types::models::{
    Actor, CredibilityView, FlagResolution, ReviewCase, ReviewFlag, ReviewState, Verdict,
};
use stockroom_types::{FlagId, MessageId, RoomId, UserId};

use crate::config::EngineConfig;
use crate::credibility::{CredibilityLedger, Reception};
use crate::error::{Conflict, EngineError, Result};
use crate::sink::EventSink;

/// The facts about a message moderation needs, taken from a store snapshot.
#[derive(Debug, Clone)]
pub struct MessageRef {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author_id: UserId,
}

#[derive(Debug, Clone)]
struct Case {
    room_id: RoomId,
    author_id: UserId,
    state: ReviewState,
    flags: Vec<ReviewFlag>,
}

impl Case {
    fn distinct_reporters(&self) -> usize {
        // one flag per reporter is enforced on insert
        self.flags.len()
    }

    fn resolve_pending(&mut self, resolution: FlagResolution) {
        for flag in self
            .flags
            .iter_mut()
            .filter(|f| f.resolution == FlagResolution::Pending)
        {
            flag.resolution = resolution;
        }
    }

    fn to_review_case(&self, message_id: MessageId) -> ReviewCase {
        ReviewCase {
            message_id,
            room_id: self.room_id.clone(),
            author_id: self.author_id.clone(),
            review_state: self.state,
            flags: self.flags.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlagOutcome {
    pub flag: ReviewFlag,
    pub review_state: ReviewState,
    /// True when this flag moved the message into `flagged`
    pub escalated: bool,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub review_state: ReviewState,
    /// The author's score after an upheld verdict
    pub penalty: Option<CredibilityView>,
}

pub struct ModerationEngine {
    config: Arc<EngineConfig>,
    cases: RwLock<HashMap<MessageId, Case>>,
    ledger: CredibilityLedger,
    sink: Arc<dyn EventSink>,
}

impl ModerationEngine {
    pub fn new(config: Arc<EngineConfig>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            ledger: CredibilityLedger::new(config.clone(), sink.clone()),
            config,
            cases: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Report a message. Each user may flag a given message once.
    pub async fn flag(
        &self,
        message: &MessageRef,
        reporter: &Actor,
        reason: &str,
    ) -> Result<FlagOutcome> {
        let reason = reason.trim();
        if reason.is_empty() || reason.chars().count() > self.config.max_reason_chars {
            return Err(EngineError::validation(format!(
                "flag reason must be 1-{} characters",
                self.config.max_reason_chars
            )));
        }
        if reporter.user_id == message.author_id {
            return Err(Conflict::CannotFlagOwnMessage.into());
        }

        let mut cases = self.cases.write().await;
        let case = cases.entry(message.id).or_insert_with(|| Case {
            room_id: message.room_id.clone(),
            author_id: message.author_id.clone(),
            state: ReviewState::Clean,
            flags: Vec::new(),
        });

        if case.state == ReviewState::Upheld {
            return Err(Conflict::MessageRemoved(message.id).into());
        }
        if case.flags.iter().any(|f| f.reporter_id == reporter.user_id) {
            return Err(Conflict::AlreadyFlagged(message.id).into());
        }

        let flag = ReviewFlag {
            id: FlagId::generate(),
            message_id: message.id,
            reporter_id: reporter.user_id.clone(),
            reason: reason.to_string(),
            created_at: Utc::now(),
            resolution: FlagResolution::Pending,
        };
        case.flags.push(flag.clone());

        let open = matches!(case.state, ReviewState::Clean | ReviewState::Dismissed);
        let escalated = open
            && (reporter.can_moderate() || case.distinct_reporters() >= self.config.flag_threshold);

        if escalated {
            case.state = ReviewState::Flagged;
            info!(
                "Message {} flagged for review ({} reporters{})",
                message.id,
                case.distinct_reporters(),
                if reporter.can_moderate() { ", privileged" } else { "" }
            );
            self.publish_state(message.id, case);
        } else {
            debug!("Message {} has {} flags", message.id, case.distinct_reporters());
        }

        Ok(FlagOutcome {
            flag,
            review_state: case.state,
            escalated,
        })
    }

    /// A moderator's verdict on a flagged message.
    pub async fn resolve(
        &self,
        message_id: MessageId,
        moderator: &Actor,
        verdict: Verdict,
    ) -> Result<Resolution> {
        if !moderator.can_moderate() {
            return Err(EngineError::access_denied("only moderators can resolve flags"));
        }

        let author_id = {
            let mut cases = self.cases.write().await;
            let Some(case) = cases.get_mut(&message_id) else {
                return Err(Conflict::InvalidReviewTransition {
                    message_id,
                    state: ReviewState::Clean,
                }
                .into());
            };
            if case.state != ReviewState::Flagged {
                return Err(Conflict::InvalidReviewTransition {
                    message_id,
                    state: case.state,
                }
                .into());
            }

            let (state, resolution) = match verdict {
                Verdict::Upheld => (ReviewState::Upheld, FlagResolution::Upheld),
                Verdict::Dismissed => (ReviewState::Dismissed, FlagResolution::Dismissed),
            };
            case.state = state;
            case.resolve_pending(resolution);

            info!("Message {} review resolved as {:?} by {}", message_id, state, moderator.user_id);
            self.publish_state(message_id, case);
            case.author_id.clone()
        };

        // The case lock is released before touching the author's record.
        let penalty = match verdict {
            Verdict::Upheld => {
                Some(self.ledger.apply(&author_id, self.config.upheld_penalty).await)
            }
            Verdict::Dismissed => None,
        };

        Ok(Resolution {
            review_state: match verdict {
                Verdict::Upheld => ReviewState::Upheld,
                Verdict::Dismissed => ReviewState::Dismissed,
            },
            penalty,
        })
    }

    pub async fn review_state(&self, message_id: MessageId) -> ReviewState {
        self.cases
            .read()
            .await
            .get(&message_id)
            .map(|case| case.state)
            .unwrap_or_default()
    }

    pub async fn review_states(&self, ids: &[MessageId]) -> HashMap<MessageId, ReviewState> {
        let cases = self.cases.read().await;
        ids.iter()
            .filter_map(|id| cases.get(id).map(|case| (*id, case.state)))
            .collect()
    }

    pub async fn flags_for(&self, message_id: MessageId, actor: &Actor) -> Result<Vec<ReviewFlag>> {
        if !actor.can_moderate() {
            return Err(EngineError::access_denied("only moderators can read flags"));
        }
        Ok(self
            .cases
            .read()
            .await
            .get(&message_id)
            .map(|case| case.flags.clone())
            .unwrap_or_default())
    }

    /// Messages awaiting a verdict, oldest first.
    pub async fn queue(&self, actor: &Actor) -> Result<Vec<ReviewCase>> {
        if !actor.can_moderate() {
            return Err(EngineError::access_denied("only moderators can read the review queue"));
        }
        let cases = self.cases.read().await;
        let mut queue: Vec<ReviewCase> = cases
            .iter()
            .filter(|(_, case)| case.state == ReviewState::Flagged)
            .map(|(id, case)| case.to_review_case(*id))
            .collect();
        queue.sort_by_key(|case| case.message_id);
        Ok(queue)
    }

    pub async fn credibility(&self, user_id: &UserId) -> CredibilityView {
        self.ledger.get(user_id).await
    }

    pub async fn record_reception(&self, reception: Reception) -> Option<CredibilityView> {
        if self.review_state(reception.message_id).await == ReviewState::Upheld {
            return None;
        }
        self.ledger.record_reception(reception).await
    }

    fn publish_state(&self, message_id: MessageId, case: &Case) {
        self.sink.publish(Envelope::room(
            case.room_id.clone(),
            GatewayEvent::ReviewStateChanged {
                message_id,
                room_id: case.room_id.clone(),
                review_state: case.state,
                needs_review: case.state.needs_review(),
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use stockroom_types::models::Role;

    fn engine() -> (ModerationEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (
            ModerationEngine::new(Arc::new(EngineConfig::default()), sink.clone()),
            sink,
        )
    }

    fn message() -> MessageRef {
        MessageRef {
            id: MessageId::new(1),
            room_id: RoomId::new("stocks"),
            author_id: UserId::new("author"),
        }
    }

    fn user(name: &str) -> Actor {
        Actor::new(name, name, Role::User)
    }

    fn moderator() -> Actor {
        Actor::new("mod", "mod", Role::Moderator)
    }

    fn state_changes(sink: &RecordingSink) -> Vec<ReviewState> {
        sink.take()
            .into_iter()
            .filter_map(|e| match e.event {
                GatewayEvent::ReviewStateChanged { review_state, .. } => Some(review_state),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn threshold_of_distinct_reporters_flags_once() {
        let (moderation, sink) = engine();
        let m = message();

        assert!(!moderation.flag(&m, &user("r1"), "spam").await.unwrap().escalated);
        assert!(!moderation.flag(&m, &user("r2"), "spam").await.unwrap().escalated);
        assert_eq!(moderation.review_state(m.id).await, ReviewState::Clean);

        let third = moderation.flag(&m, &user("r3"), "spam").await.unwrap();
        assert!(third.escalated);
        assert_eq!(third.review_state, ReviewState::Flagged);

        let fourth = moderation.flag(&m, &user("r4"), "spam").await.unwrap();
        assert!(!fourth.escalated);
        assert_eq!(state_changes(&sink), vec![ReviewState::Flagged]);
    }

    #[tokio::test]
    async fn repeat_and_self_flags_are_rejected() {
        let (moderation, _) = engine();
        let m = message();
        moderation.flag(&m, &user("r1"), "spam").await.unwrap();
        assert_eq!(
            moderation.flag(&m, &user("r1"), "again").await.unwrap_err().code(),
            "already_flagged"
        );
        assert_eq!(
            moderation.flag(&m, &user("author"), "me").await.unwrap_err().code(),
            "cannot_flag_own_message"
        );
        assert_eq!(
            moderation.flag(&m, &user("r2"), "  ").await.unwrap_err().code(),
            "validation_error"
        );
    }

    #[tokio::test]
    async fn privileged_flag_escalates_alone() {
        let (moderation, _) = engine();
        let outcome = moderation.flag(&message(), &moderator(), "scam link").await.unwrap();
        assert!(outcome.escalated);
        assert_eq!(outcome.review_state, ReviewState::Flagged);
    }

    #[tokio::test]
    async fn dismissal_clears_flags_without_penalty() {
        let (moderation, _) = engine();
        let m = message();
        for r in ["r1", "r2", "r3"] {
            moderation.flag(&m, &user(r), "spam").await.unwrap();
        }

        let resolution = moderation.resolve(m.id, &moderator(), Verdict::Dismissed).await.unwrap();
        assert_eq!(resolution.review_state, ReviewState::Dismissed);
        assert!(resolution.penalty.is_none());

        let flags = moderation.flags_for(m.id, &moderator()).await.unwrap();
        assert!(flags.iter().all(|f| f.resolution == FlagResolution::Dismissed));
        assert_eq!(moderation.credibility(&m.author_id).await.sample_count, 0);
    }

    #[tokio::test]
    async fn new_flag_after_dismissal_reopens() {
        let (moderation, sink) = engine();
        let m = message();
        for r in ["r1", "r2", "r3"] {
            moderation.flag(&m, &user(r), "spam").await.unwrap();
        }
        moderation.resolve(m.id, &moderator(), Verdict::Dismissed).await.unwrap();

        let reopened = moderation.flag(&m, &user("r4"), "still spam").await.unwrap();
        assert!(reopened.escalated);
        assert_eq!(
            state_changes(&sink),
            vec![ReviewState::Flagged, ReviewState::Dismissed, ReviewState::Flagged]
        );
    }

    #[tokio::test]
    async fn upheld_penalises_author_and_is_terminal() {
        let (moderation, _) = engine();
        let m = message();
        moderation.flag(&m, &moderator(), "pump and dump").await.unwrap();

        let resolution = moderation.resolve(m.id, &moderator(), Verdict::Upheld).await.unwrap();
        let penalty = resolution.penalty.unwrap();
        assert!(penalty.score < 5.0);
        assert_eq!(penalty.sample_count, 1);

        assert_eq!(
            moderation.flag(&m, &user("r9"), "spam").await.unwrap_err().code(),
            "message_removed"
        );
        assert_eq!(
            moderation.resolve(m.id, &moderator(), Verdict::Dismissed).await.unwrap_err().code(),
            "invalid_review_transition"
        );
    }

    #[tokio::test]
    async fn only_moderators_resolve_and_read_queue() {
        let (moderation, _) = engine();
        let m = message();
        moderation.flag(&m, &moderator(), "x").await.unwrap();

        assert_eq!(
            moderation.resolve(m.id, &user("r1"), Verdict::Upheld).await.unwrap_err().code(),
            "access_denied"
        );
        assert_eq!(moderation.queue(&user("r1")).await.unwrap_err().code(), "access_denied");

        let queue = moderation.queue(&moderator()).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].message_id, m.id);
    }

    #[tokio::test]
    async fn clean_message_cannot_be_resolved() {
        let (moderation, _) = engine();
        let err = moderation
            .resolve(MessageId::new(5), &moderator(), Verdict::Upheld)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_review_transition");
    }
}
