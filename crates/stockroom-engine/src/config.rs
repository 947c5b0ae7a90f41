/// Tunables for the engine. `Default` gives the production values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a message body, counted in chars after trimming
    pub max_body_chars: usize,
    pub max_emoji_chars: usize,
    pub max_reason_chars: usize,
    pub max_room_name_chars: usize,
    /// Largest page any listing returns
    pub max_page_size: usize,
    /// Idempotency keys remembered per author; older keys stop replaying
    pub max_idempotency_keys: usize,

    /// Distinct reporters needed to move a clean message to flagged
    pub flag_threshold: usize,

    pub initial_score: f64,
    /// Updates are damped while a user has fewer samples than this
    pub warmup_samples: u32,
    /// A message counts as well received once it has at least this many
    /// distinct reactors...
    pub favorite_min_reactors: usize,
    /// ...and they make up at least this share of the room's members
    pub favorite_ratio: f64,
    pub favorite_weight: f64,
    pub upheld_penalty: f64,
    /// Followers beyond this count add no further trust
    pub trust_follower_cap: usize,
    /// Largest multiplier bonus the follower trust signal can add to a reward
    pub trust_bonus: f64,
    pub community_favorite_score: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_body_chars: 2000,
            max_emoji_chars: 32,
            max_reason_chars: 500,
            max_room_name_chars: 100,
            max_page_size: 200,
            max_idempotency_keys: 256,
            flag_threshold: 3,
            initial_score: 5.0,
            warmup_samples: 5,
            favorite_min_reactors: 3,
            favorite_ratio: 0.2,
            favorite_weight: 0.5,
            upheld_penalty: -2.0,
            trust_follower_cap: 100,
            trust_bonus: 0.5,
            community_favorite_score: 8.0,
        }
    }
}
