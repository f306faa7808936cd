//! Topic pattern matching.
//!
//! Routing keys and patterns are `.`-separated words. In a pattern `*`
//! matches exactly one word and `#` matches zero or more words.

/// Returns `true` when `routing_key` matches the topic `pattern`.
#[must_use]
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && matches_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && matches_words(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::topic_matches;

    #[test]
    fn test_star_matches_exactly_one_word() {
        assert!(topic_matches("reservation.*", "reservation.created"));
        assert!(topic_matches("reservation.*", "reservation.expired"));
        assert!(!topic_matches("reservation.*", "reservation"));
        assert!(!topic_matches("reservation.*", "reservation.created.v2"));
    }

    #[test]
    fn test_hash_matches_zero_or_more_words() {
        assert!(topic_matches("reservation.#", "reservation"));
        assert!(topic_matches("reservation.#", "reservation.created.v2"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("#.expired", "reservation.expired"));
    }

    #[test]
    fn test_literal_words_must_match() {
        assert!(topic_matches("reservation.created", "reservation.created"));
        assert!(!topic_matches("reservation.created", "reservation.confirmed"));
        assert!(!topic_matches("reservation.*", "like.created"));
    }
}
