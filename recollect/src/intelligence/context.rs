use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::intelligence::utils::snippet;
use crate::models::RetentionTier;

const RATIONALE_MARKER: &str = "Context evidence → ";
const MAX_EVIDENCE: usize = 3;
const SNIPPET_GRAPHEMES: usize = 80;

/// One classified statement remembered by the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEvidence {
    pub turn_number: u32,
    pub content: String,
    pub categories: Vec<String>,
    pub retention: RetentionTier,
}

/// Fixed-capacity window of recent statements, used to explain a new item by
/// the earlier ones it shares categories with.
#[derive(Debug, Clone)]
pub struct ContextReasoner {
    window: VecDeque<ContextEvidence>,
    capacity: usize,
}

impl ContextReasoner {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn update(
        &mut self,
        turn_number: u32,
        content: &str,
        categories: &[String],
        retention: RetentionTier,
    ) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(ContextEvidence {
            turn_number,
            content: content.to_string(),
            categories: categories.to_vec(),
            retention,
        });
    }

    /// Empty when nothing in the window shares a category with `categories`.
    pub fn build_rationale(&self, categories: &[String]) -> String {
        let relevant: Vec<&ContextEvidence> = self
            .window
            .iter()
            .filter(|entry| entry.categories.iter().any(|c| categories.contains(c)))
            .collect();
        if relevant.is_empty() {
            return String::new();
        }

        let start = relevant.len().saturating_sub(MAX_EVIDENCE);
        let snippets: Vec<String> = relevant[start..]
            .iter()
            .map(|entry| {
                format!(
                    "Turn {}: {}",
                    entry.turn_number,
                    snippet(&entry.content, SNIPPET_GRAPHEMES)
                )
            })
            .collect();
        format!("{RATIONALE_MARKER}{}", snippets.join(" | "))
    }

    /// Current window, oldest first.
    pub fn summarize_window(&self) -> Vec<ContextEvidence> {
        self.window.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl Default for ContextReasoner {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_window_has_no_rationale() {
        let reasoner = ContextReasoner::default();
        assert_eq!(reasoner.build_rationale(&cats(&["medical"])), "");
    }

    #[test]
    fn test_rationale_uses_last_three_overlapping_entries() {
        let mut reasoner = ContextReasoner::default();
        for turn in 1..=5 {
            reasoner.update(turn, &format!("statement {turn}"), &cats(&["medical"]), RetentionTier::LongTerm);
        }
        reasoner.update(6, "unrelated", &cats(&["career"]), RetentionTier::ShortTerm);

        let rationale = reasoner.build_rationale(&cats(&["medical"]));
        assert_eq!(
            rationale,
            "Context evidence → Turn 3: statement 3 | Turn 4: statement 4 | Turn 5: statement 5"
        );
    }

    #[test]
    fn test_no_overlap_no_rationale() {
        let mut reasoner = ContextReasoner::default();
        reasoner.update(1, "I work at a bank", &cats(&["career"]), RetentionTier::ShortTerm);
        assert!(reasoner.build_rationale(&cats(&["medical"])).is_empty());
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut reasoner = ContextReasoner::new(2);
        reasoner.update(1, "one", &cats(&["a"]), RetentionTier::Immediate);
        reasoner.update(2, "two", &cats(&["a"]), RetentionTier::Immediate);
        reasoner.update(3, "three", &cats(&["a"]), RetentionTier::Immediate);

        let window = reasoner.summarize_window();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].turn_number, 2);
        assert_eq!(window[1].turn_number, 3);
    }

    #[test]
    fn test_snippets_are_truncated() {
        let mut reasoner = ContextReasoner::default();
        let long = "x".repeat(200);
        reasoner.update(1, &long, &cats(&["a"]), RetentionTier::ShortTerm);
        let rationale = reasoner.build_rationale(&cats(&["a"]));
        assert_eq!(rationale, format!("Context evidence → Turn 1: {}", "x".repeat(80)));
    }
}
