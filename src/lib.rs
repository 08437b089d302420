//! Voxel Pipeline - a forward renderer that keeps a voxelized copy of its scene
//!
//! Rendering goes through the [`GraphicsBackend`] trait, implemented by:
//! - **wgpu**: window surface rendering via [`WgpuBackend`]
//! - **headless**: no GPU, records commands and resource state ([`HeadlessBackend`])
//!
//! # Features
//! - Uniform blocks with fixed binding points and bounds-checked record updates
//! - Lit forward pass with material maps and up to 16 point and 16 directional lights
//! - Slice-based scene voxelization into a double-buffered 64x64x64 volume with mips
//! - World-position pass and voxel debug overlay
//! - Light debug markers

pub mod backend;
pub mod error;
pub mod frame_resource;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shader;
pub mod uniform;
pub mod voxel;

pub use backend::{GraphicsBackend, HeadlessBackend, WgpuBackend};
pub use error::{RenderError, RenderResult};
pub use frame_resource::FrameResource;
pub use renderer::{DebugConfig, LightOverflow, Renderer, RendererConfig};
pub use scene::{Camera, CameraView, Scene, SceneObject};
pub use voxel::{VoxelConfig, VoxelOccupancy, VoxelPolicy, VoxelState};

/// Initialize `env_logger` for binaries and tests.
///
/// `filter` uses `RUST_LOG` syntax and is applied on top of the environment; repeated calls
/// are ignored.
pub fn init_logging(filter: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = filter {
        builder.parse_filters(filter);
    }
    let _ = builder.is_test(cfg!(test)).try_init();
}
