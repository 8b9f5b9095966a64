use std::collections::HashSet;

/// Padded character trigrams of a lowercased string, pg_trgm style: two
/// leading blanks and one trailing blank per word, so short strings still
/// produce a meaningful set.
pub fn trigrams(s: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    for word in s.to_lowercase().split_whitespace() {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Jaccard similarity over trigram sets. 1.0 iff the normalized strings
/// are equal, 0.0 when nothing overlaps.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return if a.to_lowercase() == b.to_lowercase() { 1.0 } else { 0.0 };
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - intersection;
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(similarity("alice", "alice"), 1.0);
        assert_eq!(similarity("Alice", "alice"), 1.0);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(similarity("alice", "zzz"), 0.0);
    }

    #[test]
    fn near_matches_score_between() {
        let s = similarity("alice", "alce");
        assert!(s > 0.0 && s < 1.0, "got {}", s);
        // Closer strings score higher
        assert!(similarity("alice", "alicia") > similarity("alice", "bob"));
    }

    #[test]
    fn threshold_one_degenerates_to_exact_match() {
        assert!(similarity("doc.md", "doc.md") >= 1.0);
        assert!(similarity("doc.md", "doc.txt") < 1.0);
        assert!(similarity("doc.md", "doc.m") < 1.0);
    }

    #[test]
    fn empty_strings() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("", "alice"), 0.0);
    }

    #[test]
    fn multi_word_keys_share_word_trigrams() {
        assert!(similarity("deep learning", "deep learning basics") > 0.3);
    }
}
