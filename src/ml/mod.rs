pub mod clustering;
pub mod model;
pub mod svd;
pub mod towers;
pub mod trainer;

pub use model::{model_exists, HybridModel};
pub use trainer::{HybridTrainer, TrainerConfig};
