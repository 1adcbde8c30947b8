use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

/// Index 0 is reserved for out-of-vocabulary ids, mirroring a string-lookup
/// layer with a default OOV bucket.
pub const OOV_INDEX: usize = 0;

/// Id-to-index lookup built from the corpus in ingestion order.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    index: HashMap<String, usize>,
    ids: Vec<String>,
}

impl Vocabulary {
    /// Builds the vocabulary from an id stream, deduplicating while keeping
    /// first-seen order. Slot 0 is the OOV bucket.
    pub fn build<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index = HashMap::new();
        let mut ordered = vec!["[OOV]".to_string()];

        for id in ids {
            if !index.contains_key(id) {
                index.insert(id.to_string(), ordered.len());
                ordered.push(id.to_string());
            }
        }

        Self {
            index,
            ids: ordered,
        }
    }

    pub fn lookup(&self, id: &str) -> usize {
        self.index.get(id).copied().unwrap_or(OOV_INDEX)
    }

    pub fn id_at(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// Vocabulary size including the OOV slot
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.len() <= 1
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// One embedding tower: a vocabulary and its learned embedding rows.
#[derive(Debug, Clone)]
pub struct EmbeddingTower {
    pub vocab: Vocabulary,
    /// (vocab len) x (embedding dim)
    pub weights: Array2<f32>,
}

impl EmbeddingTower {
    /// Random uniform init in [-0.05, 0.05]
    pub fn new<R: Rng>(vocab: Vocabulary, dim: usize, rng: &mut R) -> Self {
        let mut weights = Array2::<f32>::zeros((vocab.len(), dim));
        for value in weights.iter_mut() {
            *value = rng.gen_range(-0.05..0.05);
        }

        Self { vocab, weights }
    }

    pub fn embed(&self, id: &str) -> ArrayView1<'_, f32> {
        self.weights.row(self.vocab.lookup(id))
    }

    pub fn dim(&self) -> usize {
        self.weights.ncols()
    }
}

/// Per-row Adagrad state for an embedding table.
pub struct Adagrad {
    learning_rate: f32,
    accumulator: Array2<f32>,
    epsilon: f32,
}

impl Adagrad {
    pub fn new(learning_rate: f32, rows: usize, cols: usize) -> Self {
        Self {
            learning_rate,
            accumulator: Array2::zeros((rows, cols)),
            epsilon: 1e-7,
        }
    }

    /// Applies one gradient to one embedding row.
    pub fn apply(&mut self, weights: &mut Array2<f32>, row: usize, gradient: &Array1<f32>) {
        for (col, &g) in gradient.iter().enumerate() {
            let slot = &mut self.accumulator[[row, col]];
            *slot += g * g;
            weights[[row, col]] -= self.learning_rate * g / (slot.sqrt() + self.epsilon);
        }
    }
}

/// Bounded bag-of-ids text vectorizer for the auxiliary description path:
/// vocabulary capped by corpus frequency, sequences padded or truncated to a
/// fixed length. Index 0 doubles as both padding and OOV.
#[derive(Debug, Clone)]
pub struct TextVectorizer {
    index: HashMap<String, usize>,
    pub max_tokens: usize,
    pub sequence_length: usize,
}

impl TextVectorizer {
    /// Fits the vocabulary over tokenized documents, keeping the most
    /// frequent `max_tokens - 1` tokens (slot 0 is reserved).
    pub fn fit(docs: &[Vec<String>], max_tokens: usize, sequence_length: usize) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for doc in docs {
            for token in doc {
                *counts.entry(token.as_str()).or_default() += 1;
            }
        }

        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(max_tokens.saturating_sub(1));

        let index = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (token, _))| (token.to_string(), i + 1))
            .collect();

        Self {
            index,
            max_tokens,
            sequence_length,
        }
    }

    /// Number of distinct tokens kept, excluding the reserved slot
    pub fn vocab_len(&self) -> usize {
        self.index.len()
    }

    pub fn vectorize(&self, tokens: &[String]) -> Vec<usize> {
        let mut sequence: Vec<usize> = tokens
            .iter()
            .take(self.sequence_length)
            .map(|token| self.index.get(token).copied().unwrap_or(0))
            .collect();
        sequence.resize(self.sequence_length, 0);
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn vocabulary_dedupes_and_reserves_oov() {
        let ids = ["u1", "u2", "u1", "u3"];
        let vocab = Vocabulary::build(ids);

        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.lookup("u1"), 1);
        assert_eq!(vocab.lookup("u3"), 3);
        assert_eq!(vocab.lookup("unknown"), OOV_INDEX);
        assert_eq!(vocab.id_at(2), "u2");
    }

    #[test]
    fn tower_embeds_unknown_ids_through_the_oov_row() {
        let vocab = Vocabulary::build(["u1"]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let tower = EmbeddingTower::new(vocab, 8, &mut rng);

        assert_eq!(tower.dim(), 8);
        assert_eq!(tower.embed("nobody"), tower.weights.row(OOV_INDEX));
        assert_ne!(tower.embed("u1"), tower.weights.row(OOV_INDEX));
    }

    #[test]
    fn adagrad_steps_shrink_for_repeated_gradients() {
        let mut weights = Array2::<f32>::zeros((1, 1));
        let mut optimizer = Adagrad::new(0.1, 1, 1);
        let gradient = Array1::from_elem(1, 1.0);

        optimizer.apply(&mut weights, 0, &gradient);
        let first_step = -weights[[0, 0]];

        optimizer.apply(&mut weights, 0, &gradient);
        let second_step = -weights[[0, 0]] - first_step;

        assert!(first_step > 0.0);
        assert!(second_step > 0.0);
        assert!(second_step < first_step);
    }

    #[test]
    fn vectorizer_pads_truncates_and_caps_vocab() {
        let docs = vec![
            vec!["a".to_string(), "b".to_string(), "a".to_string()],
            vec!["a".to_string(), "c".to_string()],
        ];

        let vectorizer = TextVectorizer::fit(&docs, 3, 4);
        // Cap of 3 leaves room for 2 real tokens beside the reserved slot
        assert_eq!(vectorizer.vocab_len(), 2);

        let sequence = vectorizer.vectorize(&["a".to_string(), "zzz".to_string()]);
        assert_eq!(sequence.len(), 4);
        assert_ne!(sequence[0], 0);
        assert_eq!(sequence[1], 0);
        assert_eq!(&sequence[2..], &[0, 0]);

        let long: Vec<String> = (0..10).map(|_| "a".to_string()).collect();
        assert_eq!(vectorizer.vectorize(&long).len(), 4);
    }
}
