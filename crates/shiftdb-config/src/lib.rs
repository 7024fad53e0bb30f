pub mod loader;
pub mod model;

pub use loader::{ConfigFormat, ConfigLoader};
pub use model::{AppConfig, FieldConfig, ModelConfig};
