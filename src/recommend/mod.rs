use std::cmp::Ordering;

use crate::ml::HybridModel;

/// Scores each candidate video against the user's combined embedding and
/// returns the top `top_k` video ids.
///
/// Scores are inner products of the persisted embeddings. Ordering is fully
/// deterministic: highest score first, equal scores broken by ascending video
/// id. Asking for more candidates than exist returns them all, still ranked.
pub fn recommend(
    user_id: &str,
    model: &HybridModel,
    candidates: &[String],
    top_k: usize,
) -> Vec<String> {
    let user = model.embed_user(user_id);

    let mut scored: Vec<(f32, &String)> = candidates
        .iter()
        .map(|video_id| (user.dot(&model.embed_video(video_id)), video_id))
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored.truncate(top_k);

    scored.into_iter().map(|(_, id)| id.clone()).collect()
}
