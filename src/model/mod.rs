//! Model files: download, cache, and ONNX session creation.

mod loader;

pub use loader::{ModelCache, ModelType, MODEL_ID};

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Use CUDA when available, otherwise the CPU.
    #[default]
    Auto,
    /// Always use the CPU.
    Cpu,
}
