use std::collections::HashSet;

use rust_stemmers::{Algorithm, Stemmer};

/// Lowercasing, stop-word-filtering, stemming tokenizer used for descriptions
/// and comment bodies.
pub struct TextNormalizer {
    stop_words: HashSet<String>,
    stemmer: Stemmer,
}

impl TextNormalizer {
    pub fn new() -> Self {
        let stop_words = stop_words::get(stop_words::LANGUAGE::English)
            .into_iter()
            .collect();

        Self {
            stop_words,
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Splits on non-alphanumeric boundaries, lowercases, drops stop words,
    /// and stems what remains.
    pub fn normalize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(|token| token.to_lowercase())
            .filter(|token| !self.stop_words.contains(token))
            .map(|token| self.stemmer.stem(&token).into_owned())
            .collect()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_stems() {
        let normalizer = TextNormalizer::new();
        let tokens = normalizer.normalize("Running GUITARS loudly");
        assert_eq!(tokens, vec!["run", "guitar", "loud"]);
    }

    #[test]
    fn normalize_drops_stop_words() {
        let normalizer = TextNormalizer::new();
        let tokens = normalizer.normalize("the cat and the hat");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"and".to_string()));
        assert!(tokens.contains(&"cat".to_string()));
        assert!(tokens.contains(&"hat".to_string()));
    }

    #[test]
    fn normalize_handles_punctuation_and_empty_input() {
        let normalizer = TextNormalizer::new();
        assert!(normalizer.normalize("").is_empty());
        assert!(normalizer.normalize("...!!!").is_empty());

        let tokens = normalizer.normalize("rock-n-roll, drums!");
        assert!(tokens.contains(&"rock".to_string()));
        assert!(tokens.contains(&"drum".to_string()));
    }
}
