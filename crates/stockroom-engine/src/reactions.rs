//! Per-message emoji tallies. A tally's count is always the size of its
//! reactor set, so the two cannot drift apart.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use stockroom_types::events::{Envelope, GatewayEvent};
use stockroom_types::models::ReactionGroup;
use stockroom_types::{MessageId, RoomId, UserId};

use crate::error::{EngineError, Result};
use crate::sink::EventSink;

/// emoji -> users holding that reaction
type Tallies = BTreeMap<String, BTreeSet<UserId>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub emoji: String,
    pub new_count: usize,
    /// Whether the user holds the reaction after the toggle
    pub user_reacted: bool,
}

pub struct ReactionAggregator {
    tallies: RwLock<HashMap<MessageId, Tallies>>,
    max_emoji_chars: usize,
    sink: Arc<dyn EventSink>,
}

impl ReactionAggregator {
    pub fn new(max_emoji_chars: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            tallies: RwLock::new(HashMap::new()),
            max_emoji_chars,
            sink,
        }
    }

    fn validate_emoji(&self, emoji: &str) -> Result<String> {
        let emoji = emoji.trim();
        if emoji.is_empty()
            || emoji.chars().count() > self.max_emoji_chars
            || emoji.chars().any(char::is_whitespace)
        {
            return Err(EngineError::validation(format!("invalid reaction '{}'", emoji)));
        }
        Ok(emoji.to_string())
    }

    /// Add the reaction if the user lacks it, remove it otherwise. Applying
    /// the same toggle twice restores the original tally, so a client retry
    /// after a lost ack cannot double count.
    ///
    /// The caller has already checked that the message exists and is live.
    pub async fn toggle(
        &self,
        room_id: &RoomId,
        message_id: MessageId,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<ToggleOutcome> {
        let emoji = self.validate_emoji(emoji)?;

        let mut tallies = self.tallies.write().await;
        let message = tallies.entry(message_id).or_default();
        let reactors = message.entry(emoji.clone()).or_default();

        let user_reacted = if reactors.remove(user_id) {
            false
        } else {
            reactors.insert(user_id.clone());
            true
        };
        let new_count = reactors.len();
        if new_count == 0 {
            message.remove(&emoji);
        }

        debug!(
            "{} {} {} on message {} (now {})",
            user_id,
            if user_reacted { "added" } else { "removed" },
            emoji,
            message_id,
            new_count
        );
        self.sink.publish(Envelope::room(
            room_id.clone(),
            GatewayEvent::ReactionChanged {
                message_id,
                emoji: emoji.clone(),
                new_count,
                user_id: user_id.clone(),
                user_reacted,
            },
        ));

        Ok(ToggleOutcome {
            emoji,
            new_count,
            user_reacted,
        })
    }

    pub async fn tallies(&self, message_id: MessageId) -> Vec<ReactionGroup> {
        self.tallies
            .read()
            .await
            .get(&message_id)
            .map(groups)
            .unwrap_or_default()
    }

    /// Batch lookup for feed pages.
    pub async fn tallies_for(&self, ids: &[MessageId]) -> HashMap<MessageId, Vec<ReactionGroup>> {
        let tallies = self.tallies.read().await;
        ids.iter()
            .filter_map(|id| tallies.get(id).map(|t| (*id, groups(t))))
            .collect()
    }

    /// Users with at least one reaction on the message, excluding `exclude`
    /// (normally the author).
    pub async fn distinct_reactors(&self, message_id: MessageId, exclude: &UserId) -> usize {
        let tallies = self.tallies.read().await;
        let Some(message) = tallies.get(&message_id) else {
            return 0;
        };
        message
            .values()
            .flatten()
            .filter(|user| *user != exclude)
            .collect::<HashSet<_>>()
            .len()
    }
}

fn groups(tallies: &Tallies) -> Vec<ReactionGroup> {
    tallies
        .iter()
        .map(|(emoji, users)| ReactionGroup {
            emoji: emoji.clone(),
            count: users.len(),
            user_ids: users.iter().cloned().collect(),
        })
        .collect()
}
