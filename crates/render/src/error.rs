use crate::gpu::IncompleteReason;
use orrery_assets::AssetError;
use orrery_common::EntityType;

/// Errors raised while building or running the pipeline. None of them are
/// recoverable: they abort initialization or the current frame.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("framebuffer '{label}' incomplete: {reason}")]
    FramebufferIncomplete {
        label: &'static str,
        reason: IncompleteReason,
    },
    #[error("{count} light sources submitted, capacity is {capacity}")]
    TooManyLightSources { count: usize, capacity: usize },
    #[error("asset load failed: {0}")]
    AssetLoad(#[from] AssetError),
    #[error("instance batch for {kind} inconsistent: {message}")]
    InstanceBatchInconsistency { kind: EntityType, message: String },
    #[error("draw issued with no active render target")]
    NoActiveTarget,
    #[error("program '{name}' failed to build: {reason}")]
    ProgramCreation { name: String, reason: String },
    #[error("no pass of the requested type at index {index}")]
    PassLookup { index: usize },
    #[error("readback failed: {0}")]
    ReadbackFailed(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;
