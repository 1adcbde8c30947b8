use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::models::TopicTerms;

const DOC_TOPIC_PRIOR: f64 = 0.1;
const TOPIC_WORD_PRIOR: f64 = 0.01;

/// Per-record topic model over one record's comments.
///
/// Collapsed Gibbs sampling with a fixed seed, so the same comments always
/// yield the same topics. The dictionary is limited to the record's own
/// comment corpus.
pub struct TopicModel {
    pub num_topics: usize,
    pub num_terms: usize,
    pub passes: usize,
    pub seed: u64,
}

impl Default for TopicModel {
    fn default() -> Self {
        Self {
            num_topics: 5,
            num_terms: 4,
            passes: 15,
            seed: 42,
        }
    }
}

impl TopicModel {
    /// Fits the model over normalized comment token sequences and returns the
    /// weighted representative terms per topic. Zero or one comment yields an
    /// empty or trivial topic set; never panics.
    pub fn comment_topics(&self, docs: &[Vec<String>]) -> Vec<TopicTerms> {
        let mut vocab: Vec<String> = Vec::new();
        let mut vocab_index: HashMap<String, usize> = HashMap::new();
        let mut doc_words: Vec<Vec<usize>> = Vec::with_capacity(docs.len());

        for doc in docs {
            let mut words = Vec::with_capacity(doc.len());
            for token in doc {
                let id = match vocab_index.get(token) {
                    Some(&id) => id,
                    None => {
                        let id = vocab.len();
                        vocab.push(token.clone());
                        vocab_index.insert(token.clone(), id);
                        id
                    }
                };
                words.push(id);
            }
            doc_words.push(words);
        }

        let vocab_len = vocab.len();
        let total_tokens: usize = doc_words.iter().map(|d| d.len()).sum();
        if vocab_len == 0 || total_tokens == 0 {
            return Vec::new();
        }

        let k = self.num_topics;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let mut doc_topic = vec![vec![0usize; k]; doc_words.len()];
        let mut topic_word = vec![vec![0usize; vocab_len]; k];
        let mut topic_total = vec![0usize; k];
        let mut assignments: Vec<Vec<usize>> = Vec::with_capacity(doc_words.len());

        for (d, words) in doc_words.iter().enumerate() {
            let mut doc_assignments = Vec::with_capacity(words.len());
            for &w in words {
                let topic = rng.gen_range(0..k);
                doc_topic[d][topic] += 1;
                topic_word[topic][w] += 1;
                topic_total[topic] += 1;
                doc_assignments.push(topic);
            }
            assignments.push(doc_assignments);
        }

        let mut weights = vec![0.0f64; k];
        for _ in 0..self.passes {
            for (d, words) in doc_words.iter().enumerate() {
                for (i, &w) in words.iter().enumerate() {
                    let old = assignments[d][i];
                    doc_topic[d][old] -= 1;
                    topic_word[old][w] -= 1;
                    topic_total[old] -= 1;

                    let mut total = 0.0;
                    for (t, weight) in weights.iter_mut().enumerate() {
                        *weight = (doc_topic[d][t] as f64 + DOC_TOPIC_PRIOR)
                            * (topic_word[t][w] as f64 + TOPIC_WORD_PRIOR)
                            / (topic_total[t] as f64 + vocab_len as f64 * TOPIC_WORD_PRIOR);
                        total += *weight;
                    }

                    let mut target = rng.gen::<f64>() * total;
                    let mut new = k - 1;
                    for (t, &weight) in weights.iter().enumerate() {
                        if target < weight {
                            new = t;
                            break;
                        }
                        target -= weight;
                    }

                    doc_topic[d][new] += 1;
                    topic_word[new][w] += 1;
                    topic_total[new] += 1;
                    assignments[d][i] = new;
                }
            }
        }

        let mut topics = Vec::new();
        for t in 0..k {
            if topic_total[t] == 0 {
                continue;
            }

            let denominator = topic_total[t] as f64 + vocab_len as f64 * TOPIC_WORD_PRIOR;
            let mut ranked: Vec<(usize, f64)> = topic_word[t]
                .iter()
                .enumerate()
                .filter(|(_, &count)| count > 0)
                .map(|(w, &count)| (w, (count as f64 + TOPIC_WORD_PRIOR) / denominator))
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            ranked.truncate(self.num_terms);

            let terms = ranked
                .iter()
                .map(|(w, weight)| format!("{:.3}*\"{}\"", weight, vocab[*w]))
                .collect::<Vec<_>>()
                .join(" + ");

            topics.push(TopicTerms { topic_id: t, terms });
        }

        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn no_comments_yields_no_topics() {
        let model = TopicModel::default();
        assert!(model.comment_topics(&[]).is_empty());
    }

    #[test]
    fn single_comment_does_not_panic() {
        let model = TopicModel::default();
        let topics = model.comment_topics(&[doc(&["guitar", "solo"])]);
        assert!(!topics.is_empty());
        assert!(topics.len() <= model.num_topics);
    }

    #[test]
    fn empty_token_sequences_yield_no_topics() {
        let model = TopicModel::default();
        let topics = model.comment_topics(&[vec![], vec![]]);
        assert!(topics.is_empty());
    }

    #[test]
    fn topics_are_deterministic_for_fixed_seed() {
        let model = TopicModel::default();
        let docs = vec![
            doc(&["guitar", "riff", "amp"]),
            doc(&["drum", "beat", "snare"]),
            doc(&["guitar", "amp", "pedal"]),
        ];

        let first = model.comment_topics(&docs);
        let second = model.comment_topics(&docs);
        assert_eq!(first, second);
    }

    #[test]
    fn terms_are_capped_and_weighted() {
        let model = TopicModel::default();
        let docs = vec![
            doc(&["a", "b", "c", "d", "e", "f"]),
            doc(&["a", "b", "c", "d", "e", "f"]),
        ];

        for topic in model.comment_topics(&docs) {
            let parts: Vec<&str> = topic.terms.split(" + ").collect();
            assert!(parts.len() <= model.num_terms);
            for part in parts {
                assert!(part.contains('*'), "term missing weight: {}", part);
            }
        }
    }
}
