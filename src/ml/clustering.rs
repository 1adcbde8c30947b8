use linfa::prelude::*;
use linfa_clustering::KMeans;
use ndarray::Array2;
use rand_chacha::ChaCha8Rng;
use rand::SeedableRng;

use crate::{
    error::{PipelineError, PipelineResult},
    models::InteractionRecord,
};

/// Engagement feature width: retention, views, impressions, likes, comments
const FEATURE_WIDTH: usize = 5;

/// Derives a discrete engagement-cluster label per record via k-means.
///
/// The seed is fixed so retrains over the same corpus reproduce the same
/// labels. When the corpus holds fewer records than `clusters`, k is reduced
/// to the record count; an empty corpus yields no labels.
pub fn cluster_engagement(
    records: &[InteractionRecord],
    clusters: usize,
    seed: u64,
) -> PipelineResult<Vec<usize>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let k = clusters.min(records.len()).max(1);

    let mut features = Array2::<f64>::zeros((records.len(), FEATURE_WIDTH));
    for (i, record) in records.iter().enumerate() {
        features[[i, 0]] = record.retention;
        features[[i, 1]] = record.views as f64;
        features[[i, 2]] = record.impressions as f64;
        features[[i, 3]] = record.likes as f64;
        features[[i, 4]] = record.comments_count as f64;
    }

    let dataset = DatasetBase::from(features);
    let rng = ChaCha8Rng::seed_from_u64(seed);

    let model = KMeans::params_with_rng(k, rng)
        .max_n_iterations(300)
        .tolerance(1e-4)
        .fit(&dataset)
        .map_err(|e| PipelineError::Training(format!("k-means failed: {}", e)))?;

    let assigned = model.predict(dataset);
    let labels: Vec<usize> = assigned.targets().iter().copied().collect();

    tracing::debug!(
        records = records.len(),
        clusters = k,
        "Derived engagement clusters"
    );

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SentimentScore;

    fn record(retention: f64, views: u64, impressions: u64) -> InteractionRecord {
        InteractionRecord {
            user_id: "u".to_string(),
            video_id: "v".to_string(),
            interests: vec![],
            watched_views: vec![],
            tags: vec![],
            description: vec!["token".to_string()],
            retention,
            likes: views / 2,
            comments_count: 1,
            comments: vec![],
            impressions,
            views,
            description_sentiment: SentimentScore::default(),
            comments_sentiment: vec![],
            comments_topics: vec![],
        }
    }

    #[test]
    fn empty_corpus_yields_no_labels() {
        let labels = cluster_engagement(&[], 5, 0).unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn fewer_records_than_clusters_reduces_k() {
        let records = vec![record(10.0, 5, 50), record(90.0, 450, 500)];
        let labels = cluster_engagement(&records, 5, 0).unwrap();
        assert_eq!(labels.len(), 2);
        assert!(labels.iter().all(|&l| l < 2));
    }

    #[test]
    fn labels_are_deterministic_for_fixed_seed() {
        let records: Vec<_> = (0..20)
            .map(|i| record((i * 5) as f64, i * 3, 100))
            .collect();

        let first = cluster_engagement(&records, 5, 0).unwrap();
        let second = cluster_engagement(&records, 5, 0).unwrap();
        assert_eq!(first, second);
        assert!(first.iter().all(|&l| l < 5));
    }

    #[test]
    fn separated_groups_land_in_distinct_clusters() {
        let mut records = Vec::new();
        for _ in 0..5 {
            records.push(record(1.0, 1, 100));
        }
        for _ in 0..5 {
            records.push(record(99.0, 9900, 10000));
        }

        let labels = cluster_engagement(&records, 2, 0).unwrap();
        assert_eq!(labels[0..5].iter().collect::<std::collections::HashSet<_>>().len(), 1);
        assert_eq!(labels[5..10].iter().collect::<std::collections::HashSet<_>>().len(), 1);
        assert_ne!(labels[0], labels[9]);
    }
}
