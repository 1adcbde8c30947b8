use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

const USER_TOWER_DIR: &str = "user_model";
const VIDEO_TOWER_DIR: &str = "video_model";
const ARTIFACT_FILE: &str = "model.json";

/// Serialized form of one tower: row i of `weights` is the combined scoring
/// embedding of `ids[i]` (learned tower embedding followed by SVD factors).
#[derive(Debug, Serialize, Deserialize)]
struct TowerArtifact {
    version: String,
    ids: Vec<String>,
    dim: usize,
    weights: Array2<f32>,
}

/// Runtime id-to-embedding index for one tower.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    weights: Array2<f32>,
}

impl EmbeddingIndex {
    fn new(ids: Vec<String>, weights: Array2<f32>) -> Self {
        let index = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self {
            ids,
            index,
            weights,
        }
    }

    /// Unknown ids fall back to row 0 (the OOV slot of the trained vocab).
    fn embed(&self, id: &str) -> ArrayView1<'_, f32> {
        let row = self.index.get(id).copied().unwrap_or(0);
        self.weights.row(row)
    }
}

/// A trained hybrid retrieval model: one combined-embedding index per role.
/// Immutable once constructed; superseded models are replaced wholesale.
#[derive(Debug, Clone)]
pub struct HybridModel {
    pub version: String,
    users: EmbeddingIndex,
    videos: EmbeddingIndex,
}

impl HybridModel {
    pub fn from_parts(
        version: String,
        user_ids: Vec<String>,
        user_weights: Array2<f32>,
        video_ids: Vec<String>,
        video_weights: Array2<f32>,
    ) -> Self {
        Self {
            version,
            users: EmbeddingIndex::new(user_ids, user_weights),
            videos: EmbeddingIndex::new(video_ids, video_weights),
        }
    }

    pub fn embed_user(&self, user_id: &str) -> ArrayView1<'_, f32> {
        self.users.embed(user_id)
    }

    pub fn embed_video(&self, video_id: &str) -> ArrayView1<'_, f32> {
        self.videos.embed(video_id)
    }

    /// Width of the combined scoring embedding
    pub fn embedding_dim(&self) -> usize {
        self.users.weights.ncols()
    }

    /// Persists both towers under `model_dir`, each staged to a temp file and
    /// renamed into place so readers never observe a half-written artifact.
    pub fn save(&self, model_dir: &Path) -> PipelineResult<()> {
        let staged = [
            (USER_TOWER_DIR, &self.users),
            (VIDEO_TOWER_DIR, &self.videos),
        ]
        .map(|(dir, tower)| {
            let artifact = TowerArtifact {
                version: self.version.clone(),
                ids: tower.ids.clone(),
                dim: tower.weights.ncols(),
                weights: tower.weights.clone(),
            };
            stage_tower(model_dir, dir, &artifact)
        });

        for result in &staged {
            if let Err(e) = result {
                return Err(PipelineError::Persistence(e.to_string()));
            }
        }

        for result in staged {
            let (temp_path, final_path) = result.expect("staging errors handled above");
            fs::rename(&temp_path, &final_path).map_err(|e| {
                PipelineError::Persistence(format!(
                    "failed to swap {} into place: {}",
                    final_path.display(),
                    e
                ))
            })?;
        }

        tracing::info!(
            model_dir = %model_dir.display(),
            version = %self.version,
            "Saved user and video towers"
        );

        Ok(())
    }

    /// Loads both towers; a missing artifact on either side means the model
    /// has not been trained yet.
    pub fn load(model_dir: &Path) -> PipelineResult<Self> {
        if !model_exists(model_dir) {
            return Err(PipelineError::ModelUnavailable);
        }

        let users = load_tower(model_dir, USER_TOWER_DIR)?;
        let videos = load_tower(model_dir, VIDEO_TOWER_DIR)?;

        Ok(Self {
            version: users.version.clone(),
            users: EmbeddingIndex::new(users.ids, users.weights),
            videos: EmbeddingIndex::new(videos.ids, videos.weights),
        })
    }
}

/// Both tower artifacts present means a trained model exists.
pub fn model_exists(model_dir: &Path) -> bool {
    model_dir.join(USER_TOWER_DIR).join(ARTIFACT_FILE).exists()
        && model_dir.join(VIDEO_TOWER_DIR).join(ARTIFACT_FILE).exists()
}

fn stage_tower(
    model_dir: &Path,
    tower_dir: &str,
    artifact: &TowerArtifact,
) -> std::io::Result<(std::path::PathBuf, std::path::PathBuf)> {
    let dir = model_dir.join(tower_dir);
    fs::create_dir_all(&dir)?;

    let final_path = dir.join(ARTIFACT_FILE);
    let temp_path = dir.join(format!("{}.tmp", ARTIFACT_FILE));

    let json = serde_json::to_string(artifact)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(&temp_path, json)?;

    Ok((temp_path, final_path))
}

fn load_tower(model_dir: &Path, tower_dir: &str) -> PipelineResult<TowerArtifact> {
    let path = model_dir.join(tower_dir).join(ARTIFACT_FILE);
    let json = fs::read_to_string(&path)
        .map_err(|e| PipelineError::Persistence(format!("{}: {}", path.display(), e)))?;

    serde_json::from_str(&json)
        .map_err(|e| PipelineError::Persistence(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_model() -> HybridModel {
        HybridModel::from_parts(
            "test-version".to_string(),
            vec!["[OOV]".to_string(), "u1".to_string()],
            array![[0.0_f32, 0.0], [1.0, 2.0]],
            vec!["[OOV]".to_string(), "v1".to_string(), "v2".to_string()],
            array![[0.0_f32, 0.0], [3.0, 4.0], [5.0, 6.0]],
        )
    }

    #[test]
    fn unknown_ids_embed_through_row_zero() {
        let model = small_model();
        assert_eq!(model.embed_user("u1"), array![1.0_f32, 2.0]);
        assert_eq!(model.embed_user("stranger"), array![0.0_f32, 0.0]);
        assert_eq!(model.embed_video("v2"), array![5.0_f32, 6.0]);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let model = small_model();
        model.save(dir.path()).unwrap();

        assert!(model_exists(dir.path()));

        let loaded = HybridModel::load(dir.path()).unwrap();
        assert_eq!(loaded.version, "test-version");
        assert_eq!(loaded.embedding_dim(), 2);
        assert_eq!(loaded.embed_user("u1"), model.embed_user("u1"));
        assert_eq!(loaded.embed_video("v2"), model.embed_video("v2"));
    }

    #[test]
    fn missing_either_artifact_means_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!model_exists(dir.path()));
        assert!(matches!(
            HybridModel::load(dir.path()),
            Err(PipelineError::ModelUnavailable)
        ));

        let model = small_model();
        model.save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(VIDEO_TOWER_DIR).join(ARTIFACT_FILE)).unwrap();

        assert!(!model_exists(dir.path()));
        assert!(matches!(
            HybridModel::load(dir.path()),
            Err(PipelineError::ModelUnavailable)
        ));
    }

    #[test]
    fn save_overwrites_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        small_model().save(dir.path()).unwrap();

        let updated = HybridModel::from_parts(
            "v2".to_string(),
            vec!["[OOV]".to_string()],
            array![[9.0_f32]],
            vec!["[OOV]".to_string()],
            array![[8.0_f32]],
        );
        updated.save(dir.path()).unwrap();

        let loaded = HybridModel::load(dir.path()).unwrap();
        assert_eq!(loaded.version, "v2");
        assert_eq!(loaded.embedding_dim(), 1);
    }
}
