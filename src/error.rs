//! Error types for the render pipeline

use thiserror::Error;

use crate::backend::BackendError;
use crate::uniform::BlockName;

/// Errors surfaced by the renderer. Any of these aborts the current frame or pass.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Framebuffer '{label}' is incomplete: {reason}")]
    IncompleteFramebuffer { label: String, reason: String },

    #[error("Write of {len} bytes at offset {offset} overflows {block:?} block of {capacity} bytes")]
    UniformOverflow {
        block: BlockName,
        offset: u64,
        len: u64,
        capacity: u64,
    },

    #[error("{block:?} block ran out of its {slots} records for this submission")]
    SlotsExhausted { block: BlockName, slots: u32 },

    #[error("Scene has {count} {kind} lights, the limit is {max}")]
    LightCapExceeded {
        kind: &'static str,
        count: usize,
        max: usize,
    },

    #[error("Shader '{program}' failed to parse: {message}")]
    ShaderParse { program: String, message: String },

    #[error("Shader '{program}' declares {block:?} at group {group} binding {binding}, expected group 0 binding {expected}")]
    BlockBindingMismatch {
        program: String,
        block: BlockName,
        group: u32,
        binding: u32,
        expected: u32,
    },

    #[error("Invalid renderer configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Debug readback is disabled in the renderer configuration")]
    DebugReadbackDisabled,

    #[error("Failed to load texture: {0}")]
    TextureLoad(#[from] image::ImageError),
}

pub type RenderResult<T> = Result<T, RenderError>;
