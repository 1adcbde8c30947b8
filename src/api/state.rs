use std::sync::Arc;

use tokio::sync::watch;

use crate::pipeline::Orchestrator;

/// Shared application state
///
/// The orchestrator owns all pipeline state; handlers borrow it through the
/// `Arc`. The shutdown sender is the same channel the scheduler and backfill
/// loops watch, so the shutdown endpoint stops everything at once.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, shutdown_tx: watch::Sender<bool>) -> Self {
        Self {
            orchestrator,
            shutdown_tx,
        }
    }
}
