use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

/// Suffixes stripped by [`word_stems`], longest first so a word loses at most one.
const STEM_SUFFIXES: &[&str] = &["ning", "ing", "ied", "ed", "ary", "ian", "ly", "es", "s"];

/// Lowercased whitespace-separated words with surrounding punctuation removed.
/// Apostrophes are kept so contractions survive ("don't").
pub fn normalized_words(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Every word plus its crude stem ("running" -> "run", "married" -> "marri").
pub fn word_stems(words: &HashSet<String>) -> HashSet<String> {
    let mut stems = HashSet::with_capacity(words.len() * 2);
    for word in words {
        if word.chars().count() > 4 {
            if let Some(stem) = STEM_SUFFIXES
                .iter()
                .find_map(|suffix| word.strip_suffix(suffix))
            {
                stems.insert(stem.to_string());
            }
        }
        stems.insert(word.clone());
    }
    stems
}

/// Number of stems two texts share.
pub fn stem_overlap(a: &str, b: &str) -> usize {
    let stems_a = word_stems(&normalized_words(a));
    let stems_b = word_stems(&normalized_words(b));
    stems_a.intersection(&stems_b).count()
}

/// Whether `phrase` occurs in `text` on word boundaries. Both are expected lowercase.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let is_word_char = |c: char| c.is_alphanumeric() || c == '\'';
    text.match_indices(phrase).any(|(start, matched)| {
        let before_ok = text[..start].chars().next_back().map_or(true, |c| !is_word_char(c));
        let after_ok = text[start + matched.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        before_ok && after_ok
    })
}

/// Jaccard similarity between two sets. Two empty sets score 0.
pub fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// First `max` graphemes of `text`.
pub fn snippet(text: &str, max: usize) -> String {
    text.graphemes(true).take(max).collect()
}

/// Round to three decimals.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_words_strip_punctuation() {
        let words = normalized_words("Actually, I don't like pizza!");
        assert!(words.contains("actually"));
        assert!(words.contains("don't"));
        assert!(words.contains("pizza"));
    }

    #[test]
    fn test_word_stems_strip_one_suffix() {
        let words: HashSet<String> = ["running", "cats", "run"].iter().map(|s| s.to_string()).collect();
        let stems = word_stems(&words);
        assert!(stems.contains("run"));
        assert!(stems.contains("cat"));
        assert!(stems.contains("running"));
    }

    #[test]
    fn test_short_words_are_not_stemmed() {
        let words: HashSet<String> = ["is", "was"].iter().map(|s| s.to_string()).collect();
        let stems = word_stems(&words);
        assert_eq!(stems.len(), 2);
    }

    #[test]
    fn test_stem_overlap_counts_shared_stems() {
        assert_eq!(stem_overlap("I love pizza", "Actually I don't like pizza anymore"), 2);
        assert!(stem_overlap("I started running", "I stopped running") >= 2);
    }

    #[test]
    fn test_contains_phrase_respects_boundaries() {
        assert!(contains_phrase("what if it rains", "if"));
        assert!(!contains_phrase("my life is different", "if"));
        assert!(contains_phrase("i'm planning to move", "planning to"));
        assert!(!contains_phrase("wouldn't", "would"));
    }

    #[test]
    fn test_jaccard() {
        let a: HashSet<&str> = ["a", "b", "c"].into_iter().collect();
        let b: HashSet<&str> = ["b", "c", "d"].into_iter().collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < f64::EPSILON);
        assert_eq!(jaccard(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn test_snippet_counts_graphemes() {
        assert_eq!(snippet("héllo wörld", 5), "héllo");
        assert_eq!(snippet("short", 80), "short");
    }
}
