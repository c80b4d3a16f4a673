pub mod config;
pub mod loader;
pub mod manager;

pub use config::{KvCacheQuantization, ModelConfig, RopeScalingType};
pub use loader::{ModelLoader, ModelMetadata};
pub use manager::{ModelInfo, ModelManager};
