//! Scheduled video-recommendation pipeline.
//!
//! Fetches user and video documents from a document store, featurizes them
//! (text normalization, sentiment, comment topics), trains a hybrid
//! two-tower + matrix-factorization retrieval model on a fixed schedule, and
//! writes each user's ranked recommendations back into their per-user
//! discover bucket. A thin HTTP layer exposes manual pipeline triggers and an
//! on-demand scoring endpoint.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod middleware;
pub mod ml;
pub mod models;
pub mod pipeline;
pub mod recommend;
pub mod store;
