//! Resource management
//!
//! Meshes, textures and materials the scene hands to the renderer.

mod bindings;
mod material;
mod mesh;
mod texture;

pub use bindings::*;
pub use material::*;
pub use mesh::*;
pub use texture::*;
