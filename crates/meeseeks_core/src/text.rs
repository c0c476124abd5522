//! Shared lightweight text tokenization.
//!
//! Produces the lowercase word tokens used by the TF-IDF vectorizer and
//! the keyword side of context analysis. Deliberately simple: no stemming,
//! no unicode segmentation, just word characters and a closed stop-list.

/// Common English stopwords filtered during tokenization.
pub const STOP_WORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "as", "at", "be", "been", "but",
    "by", "can", "could", "did", "for", "from", "had", "has", "have", "her",
    "his", "how", "i", "if", "in", "into", "is", "it", "its", "may", "more",
    "most", "my", "no", "not", "now", "of", "on", "or", "our", "out", "she",
    "so", "some", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "to", "was", "we", "were", "what",
    "when", "where", "which", "who", "will", "with", "would", "you", "your",
];

/// Minimum token length kept by [`tokenize`]. Shorter tokens carry almost
/// no signal for retrieval and inflate the vocabulary.
const MIN_TOKEN_LEN: usize = 3;

/// Return whether `word` is a stopword.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Tokenize text into lowercase word tokens.
///
/// Every character that is not alphanumeric or `_` acts as a separator,
/// tokens shorter than three characters and stopwords are dropped.
/// Pure and idempotent: `tokenize(tokens.join(" ")) == tokens`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .filter(|w| !is_stop_word(w))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_basic() {
        let tokens = tokenize("Servers respond to HTTP requests.");
        assert_eq!(tokens, vec!["servers", "respond", "http", "requests"]);
    }

    #[test]
    fn tokenize_strips_punctuation_and_case() {
        let tokens = tokenize("Hello, WORLD!! foo_bar baz-qux");
        assert_eq!(tokens, vec!["hello", "world", "foo_bar", "baz", "qux"]);
    }

    #[test]
    fn tokenize_drops_short_tokens() {
        let tokens = tokenize("go to db io xyz");
        assert_eq!(tokens, vec!["xyz"]);
    }

    #[test]
    fn tokenize_drops_stopwords() {
        let tokens = tokenize("the cat and the dog were there");
        // "the", "and", "were", "there" are stopwords; "cat"/"dog" kept.
        assert_eq!(tokens, vec!["cat", "dog"]);
    }

    #[test]
    fn tokenize_empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \n\t  ").is_empty());
        assert!(tokenize("a an the").is_empty());
    }

    #[test]
    fn tokenize_idempotent() {
        let first = tokenize("Dogs are loyal companions; dogs bark.");
        let second = tokenize(&first.join(" "));
        assert_eq!(first, second);
    }

    #[test]
    fn stop_list_is_lowercase_and_sorted() {
        for pair in STOP_WORDS.windows(2) {
            assert!(pair[0] < pair[1], "{:?} out of order", pair);
        }
        for w in STOP_WORDS {
            assert_eq!(*w, w.to_lowercase());
        }
    }
}
