//! Per-user credibility scores.
//!
//! `score' = clamp(score + weight / max(1, warmup - samples), 0, 10)`: the
//! first few updates move a user less, and the damping factor only ever
//! grows toward 1 as samples accumulate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use stockroom_types::events::{Envelope, GatewayEvent};
use stockroom_types::models::CredibilityView;
use stockroom_types::{MessageId, UserId};

use crate::config::EngineConfig;
use crate::sink::EventSink;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CredibilityRecord {
    pub user_id: UserId,
    pub score: f64,
    pub sample_count: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

impl CredibilityRecord {
    pub fn new(user_id: UserId, initial_score: f64) -> Self {
        Self {
            user_id,
            score: initial_score.clamp(MIN_SCORE, MAX_SCORE),
            sample_count: 0,
            last_updated: None,
        }
    }

    /// Apply one weighted update and return the effective delta.
    pub fn apply(&mut self, weight: f64, warmup_samples: u32, now: DateTime<Utc>) -> f64 {
        let before = self.score;
        let effective = damped(weight, self.sample_count, warmup_samples);
        self.score = (self.score + effective).clamp(MIN_SCORE, MAX_SCORE);
        self.sample_count = self.sample_count.saturating_add(1);
        self.last_updated = Some(now);
        self.score - before
    }

    pub fn view(&self, config: &EngineConfig) -> CredibilityView {
        CredibilityView {
            user_id: self.user_id.clone(),
            score: self.score,
            sample_count: self.sample_count,
            last_updated: self.last_updated,
            community_favorite: community_favorite(self.score, config),
        }
    }
}

pub fn damped(weight: f64, sample_count: u32, warmup_samples: u32) -> f64 {
    let divisor = warmup_samples.saturating_sub(sample_count).max(1);
    weight / f64::from(divisor)
}

/// Derived badge; never stored.
pub fn community_favorite(score: f64, config: &EngineConfig) -> bool {
    score >= config.community_favorite_score
}

/// Reward multiplier from the author's follower count, in
/// `[1, 1 + trust_bonus]` and non-decreasing in followers.
pub fn follower_trust(followers: usize, config: &EngineConfig) -> f64 {
    if config.trust_follower_cap == 0 {
        return 1.0;
    }
    let share = followers.min(config.trust_follower_cap) as f64 / config.trust_follower_cap as f64;
    1.0 + config.trust_bonus * share
}

/// Inputs for judging whether a message was well received.
#[derive(Debug, Clone)]
pub struct Reception {
    pub message_id: MessageId,
    pub author_id: UserId,
    /// Distinct reactors other than the author
    pub reactors: usize,
    pub room_members: usize,
    pub author_followers: usize,
}

pub struct CredibilityLedger {
    config: Arc<EngineConfig>,
    records: RwLock<HashMap<UserId, CredibilityRecord>>,
    /// Messages that already earned their author a reward
    rewarded: RwLock<HashSet<MessageId>>,
    sink: Arc<dyn EventSink>,
}

impl CredibilityLedger {
    pub fn new(config: Arc<EngineConfig>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            rewarded: RwLock::new(HashSet::new()),
            sink,
        }
    }

    pub async fn get(&self, user_id: &UserId) -> CredibilityView {
        match self.records.read().await.get(user_id) {
            Some(record) => record.view(&self.config),
            None => CredibilityRecord::new(user_id.clone(), self.config.initial_score)
                .view(&self.config),
        }
    }

    /// Apply a weighted update to one user's record and push the new score
    /// to that user's sessions.
    pub async fn apply(&self, user_id: &UserId, weight: f64) -> CredibilityView {
        let mut records = self.records.write().await;
        let record = records
            .entry(user_id.clone())
            .or_insert_with(|| CredibilityRecord::new(user_id.clone(), self.config.initial_score));

        let delta = record.apply(weight, self.config.warmup_samples, Utc::now());
        let view = record.view(&self.config);

        info!(
            "Credibility of {} moved {:+.3} to {:.3} ({} samples)",
            user_id, delta, view.score, view.sample_count
        );
        self.sink.publish(Envelope::user(
            user_id.clone(),
            GatewayEvent::CredibilityChanged {
                credibility: view.clone(),
            },
        ));
        view
    }

    /// Reward the author once per message, the first time its reactions
    /// clear both the absolute and the relative bar.
    pub async fn record_reception(&self, reception: Reception) -> Option<CredibilityView> {
        let config = &self.config;
        if reception.reactors < config.favorite_min_reactors {
            return None;
        }
        let ratio = reception.reactors as f64 / reception.room_members.max(1) as f64;
        if ratio < config.favorite_ratio {
            return None;
        }
        if !self.rewarded.write().await.insert(reception.message_id) {
            return None;
        }

        let weight = config.favorite_weight * follower_trust(reception.author_followers, config);
        Some(self.apply(&reception.author_id, weight).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;

    fn ledger() -> (CredibilityLedger, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (
            CredibilityLedger::new(Arc::new(EngineConfig::default()), sink.clone()),
            sink,
        )
    }

    #[test]
    fn damping_grows_monotonically_to_full_weight() {
        let steps: Vec<f64> = (0..8).map(|n| damped(1.0, n, 5)).collect();
        assert_eq!(steps[0], 0.2);
        assert!(steps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(steps[4], 1.0);
        assert_eq!(steps[7], 1.0);
    }

    #[test]
    fn score_stays_in_bounds() {
        let mut record = CredibilityRecord::new(UserId::new("u"), 5.0);
        for _ in 0..50 {
            record.apply(-3.0, 5, Utc::now());
        }
        assert_eq!(record.score, MIN_SCORE);
        for _ in 0..50 {
            record.apply(3.0, 5, Utc::now());
        }
        assert_eq!(record.score, MAX_SCORE);
        assert_eq!(record.sample_count, 100);
    }

    #[test]
    fn trust_is_bounded() {
        let config = EngineConfig::default();
        assert_eq!(follower_trust(0, &config), 1.0);
        assert!(follower_trust(50, &config) < follower_trust(100, &config));
        assert_eq!(follower_trust(10_000, &config), 1.0 + config.trust_bonus);
    }

    #[tokio::test]
    async fn unknown_users_start_at_initial_score() {
        let (ledger, _) = ledger();
        let view = ledger.get(&UserId::new("new")).await;
        assert_eq!(view.score, 5.0);
        assert_eq!(view.sample_count, 0);
        assert!(!view.community_favorite);
    }

    #[tokio::test]
    async fn reception_rewards_once_per_message() {
        let (ledger, sink) = ledger();
        let reception = Reception {
            message_id: MessageId::new(1),
            author_id: UserId::new("a"),
            reactors: 3,
            room_members: 10,
            author_followers: 0,
        };
        let view = ledger.record_reception(reception.clone()).await.unwrap();
        assert!(view.score > 5.0);
        assert!(ledger.record_reception(reception).await.is_none());
        assert_eq!(sink.take().len(), 1);
    }

    #[tokio::test]
    async fn thin_reception_earns_nothing() {
        let (ledger, _) = ledger();
        let too_few = Reception {
            message_id: MessageId::new(1),
            author_id: UserId::new("a"),
            reactors: 2,
            room_members: 2,
            author_followers: 0,
        };
        assert!(ledger.record_reception(too_few).await.is_none());

        let diluted = Reception {
            message_id: MessageId::new(2),
            author_id: UserId::new("a"),
            reactors: 3,
            room_members: 100,
            author_followers: 0,
        };
        assert!(ledger.record_reception(diluted).await.is_none());
    }
}
