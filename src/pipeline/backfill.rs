use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::{
    db::cache::{self, CacheKey},
    error::PipelineResult,
    features::normalize_watched_id,
    recommend::recommend,
};

use super::Orchestrator;

/// One backfill sweep: find users that appeared since the last sweep and seed
/// their discover bucket so they never face an empty feed while waiting for
/// the next full pipeline tick. Returns the number of users backfilled.
///
/// Without a trained model there is nothing useful to seed, so the sweep
/// waits for one rather than writing arbitrary lists.
pub async fn check_for_new_users(orchestrator: &Orchestrator) -> PipelineResult<usize> {
    let model = match orchestrator.current_model().await {
        Some(model) => model,
        None => return Ok(0),
    };

    let all_users = orchestrator.store.list_user_ids().await?;
    let known: Vec<String> = cache::get_as(orchestrator.cache.as_ref(), &CacheKey::KnownUsers)
        .await?
        .unwrap_or_default();
    let known_set: HashSet<&str> = known.iter().map(String::as_str).collect();

    let fresh: Vec<&String> = all_users
        .iter()
        .filter(|id| !known_set.contains(id.as_str()))
        .collect();
    if fresh.is_empty() {
        return Ok(0);
    }

    let catalog = orchestrator.store.list_video_ids().await?;
    let target = orchestrator.config.backfill_list_len;

    for user_id in &fresh {
        orchestrator.store.ensure_discover_bucket(user_id).await?;

        let watched: HashSet<String> = orchestrator
            .store
            .watched_views(user_id)
            .await?
            .iter()
            .map(|id| normalize_watched_id(id))
            .collect();

        let candidates: Vec<String> = catalog
            .iter()
            .filter(|id| !watched.contains(id.as_str()))
            .cloned()
            .collect();
        let mut seed_list = recommend(user_id, &model, &candidates, target);

        // Small catalogs cannot fill the target length from unwatched videos
        // alone; pad with a random sample of whatever else exists.
        if seed_list.len() < target {
            let mut leftover: Vec<String> = catalog
                .iter()
                .filter(|id| !seed_list.contains(id))
                .cloned()
                .collect();
            leftover.shuffle(&mut rand::thread_rng());
            let needed = target - seed_list.len();
            seed_list.extend(leftover.into_iter().take(needed));
        }

        orchestrator
            .store
            .union_discover_bucket(user_id, seed_list)
            .await?;
        tracing::info!(user_id = %user_id, "Backfilled new user's discover bucket");
    }

    let backfilled = fresh.len();
    cache::set_as(
        orchestrator.cache.as_ref(),
        &CacheKey::KnownUsers,
        &all_users,
        orchestrator.config.cache_ttl,
    )
    .await?;

    Ok(backfilled)
}

/// Fast sweep loop that runs alongside the main scheduler. Stops when the
/// shutdown flag flips.
pub async fn backfill_loop(orchestrator: Arc<Orchestrator>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(orchestrator.config.backfill_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        backfill_seconds = orchestrator.config.backfill_seconds,
        "New-user backfill sweep started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match check_for_new_users(&orchestrator).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "Backfill sweep complete"),
                    Err(e) => tracing::error!(error = %e, "Backfill sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("Backfill sweep stopping");
                    break;
                }
            }
        }
    }
}
