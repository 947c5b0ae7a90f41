/// Display-only sentiment tag for a message body, in `[-1, 1]`.
///
/// Scores are stored next to the message and shown to clients. Nothing in
/// the engine branches on them.
pub trait SentimentScorer: Send + Sync {
    fn score(&self, text: &str) -> Option<f32>;
}

/// Tags nothing.
pub struct NeutralScorer;

impl SentimentScorer for NeutralScorer {
    fn score(&self, _text: &str) -> Option<f32> {
        None
    }
}

impl<F> SentimentScorer for F
where
    F: Fn(&str) -> Option<f32> + Send + Sync,
{
    fn score(&self, text: &str) -> Option<f32> {
        self(text).map(|s| s.clamp(-1.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_scorers_and_get_clamped() {
        let bullish = |text: &str| text.contains("moon").then_some(3.0_f32);
        assert_eq!(bullish.score("to the moon"), Some(1.0));
        assert_eq!(bullish.score("flat day"), None);
        assert_eq!(NeutralScorer.score("to the moon"), None);
    }
}
