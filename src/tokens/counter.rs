//! Token counter implementations.

use crate::types::Message;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Sum of the per-message content counts. Roles carry no weight, so the
    /// estimate depends on what was said rather than how it was framed.
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count(&m.content)).sum()
    }
}

/// Fast approximation: one token per `chars_per_token` bytes, rounded up.
#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}

impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }

    pub fn with_ratio(r: f64) -> Self {
        Self { chars_per_token: r }
    }
}

impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        if self.chars_per_token <= 0.0 {
            return 0;
        }
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_estimate_rounds_up() {
        let c = CharacterEstimator::new();
        assert_eq!(c.count(""), 0);
        assert_eq!(c.count("abc"), 1);
        assert_eq!(c.count("abcd"), 1);
        assert_eq!(c.count("abcde"), 2);
    }

    #[test]
    fn test_count_messages_ignores_role() {
        let c = CharacterEstimator::new();
        let a = [Message::user("12345678")];
        let b = [Message::system("12345678")];
        assert_eq!(c.count_messages(&a), 2);
        assert_eq!(c.count_messages(&a), c.count_messages(&b));
        assert_eq!(c.count_messages(&[]), 0);
    }

    #[test]
    fn test_custom_ratio() {
        assert_eq!(CharacterEstimator::with_ratio(2.0).count("abcd"), 2);
        assert_eq!(CharacterEstimator::with_ratio(0.0).count("abcd"), 0);
    }
}
