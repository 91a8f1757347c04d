use crate::config::DecayConfig;
use crate::models::{Annotation, MemoryItem, RetentionTier};

/// Erodes short-term scores as turns pass without reinforcement.
#[derive(Debug, Clone)]
pub struct DecayProcessor {
    grace_turns: u32,
    rate: f64,
    floor: f64,
}

impl DecayProcessor {
    /// `rate` points are lost per turn beyond `grace_turns`; an item whose
    /// score falls below `floor` is downgraded to immediate.
    pub fn new(grace_turns: u32, rate: f64, floor: f64) -> Self {
        Self {
            grace_turns,
            rate,
            floor,
        }
    }

    pub fn from_config(config: &DecayConfig) -> Self {
        Self::new(config.grace_turns, config.rate, config.floor)
    }

    /// Score lost by an item mentioned `turns_ago` turns back.
    pub fn decay_for(&self, turns_ago: u32) -> f64 {
        turns_ago.saturating_sub(self.grace_turns) as f64 * self.rate
    }

    /// Apply decay to every short-term item. Returns how many were downgraded.
    pub fn apply(&self, items: &mut [MemoryItem], total_turns: u32) -> usize {
        let mut downgraded = 0;
        for item in items
            .iter_mut()
            .filter(|item| item.retention == RetentionTier::ShortTerm)
        {
            let turns_ago = total_turns.saturating_sub(item.turn_number);
            let decay = self.decay_for(turns_ago);
            if decay <= 0.0 {
                continue;
            }

            item.importance_score -= decay;
            if item.importance_score < self.floor {
                item.retention = RetentionTier::Immediate;
                item.annotate(Annotation::Decayed, "Too many turns ago");
                downgraded += 1;
            }
        }
        if downgraded > 0 {
            tracing::debug!(downgraded, total_turns, "Decayed stale short-term items");
        }
        downgraded
    }
}

impl Default for DecayProcessor {
    fn default() -> Self {
        Self::new(5, 0.5, 3.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_term(score: f64, turn: u32) -> MemoryItem {
        MemoryItem::new(
            "I have a meeting with the team",
            RetentionTier::ShortTerm,
            score,
            turn,
            vec!["logistics".to_string()],
            "Contextual: logistics",
        )
    }

    #[test]
    fn test_decay_keeps_tier_above_floor() {
        let mut items = vec![short_term(6.0, 1)];
        DecayProcessor::default().apply(&mut items, 11);
        assert_eq!(items[0].importance_score, 3.5);
        assert_eq!(items[0].retention, RetentionTier::ShortTerm);
        assert!(items[0].annotations.is_empty());
    }

    #[test]
    fn test_decay_below_floor_downgrades() {
        let mut items = vec![short_term(6.0, 1)];
        let downgraded = DecayProcessor::default().apply(&mut items, 13);
        assert_eq!(downgraded, 1);
        assert_eq!(items[0].importance_score, 2.5);
        assert_eq!(items[0].retention, RetentionTier::Immediate);
        assert!(items[0].has_annotation(Annotation::Decayed));
        assert!(items[0].reasoning.ends_with(" | DECAYED: Too many turns ago"));
    }

    #[test]
    fn test_no_decay_within_grace_period() {
        let processor = DecayProcessor::default();
        for turns_ago in 0..=5 {
            assert_eq!(processor.decay_for(turns_ago), 0.0);
        }
        let mut items = vec![short_term(6.0, 10)];
        processor.apply(&mut items, 15);
        assert_eq!(items[0].importance_score, 6.0);
    }

    #[test]
    fn test_decay_is_monotonic() {
        let processor = DecayProcessor::default();
        let mut previous = f64::INFINITY;
        for total in 1..40 {
            let mut items = vec![short_term(8.0, 1)];
            processor.apply(&mut items, total);
            assert!(items[0].importance_score <= previous);
            previous = items[0].importance_score;
        }
    }

    #[test]
    fn test_long_term_and_immediate_never_decay() {
        let mut items = vec![
            MemoryItem::new("a", RetentionTier::LongTerm, 20.0, 1, vec![], "x"),
            MemoryItem::new("b", RetentionTier::Immediate, 1.0, 1, vec![], "x"),
        ];
        DecayProcessor::default().apply(&mut items, 100);
        assert_eq!(items[0].importance_score, 20.0);
        assert_eq!(items[1].importance_score, 1.0);
        assert!(items.iter().all(|i| i.annotations.is_empty()));
    }
}
