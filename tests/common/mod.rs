//! Shared fixtures for the headless pipeline tests.

#![allow(dead_code)]

use glam::Vec3;

use voxel_pipeline::backend::headless::Command;
use voxel_pipeline::resources::{GpuMesh, Material, Mesh};
use voxel_pipeline::scene::Transform;
use voxel_pipeline::uniform::BlockName;
use voxel_pipeline::{Camera, HeadlessBackend, Renderer, RendererConfig, SceneObject};

pub const SURFACE_WIDTH: u32 = 320;
pub const SURFACE_HEIGHT: u32 = 240;

pub fn renderer(config: RendererConfig) -> Renderer<HeadlessBackend> {
    Renderer::initialize(HeadlessBackend::new(SURFACE_WIDTH, SURFACE_HEIGHT), config)
        .expect("renderer should initialize on the headless backend")
}

pub fn camera() -> Camera {
    Camera::new(Vec3::new(0.0, 1.0, 4.0), Vec3::ZERO)
}

/// Cube with edge `size` centered at `position`
pub fn cube(
    renderer: &mut Renderer<HeadlessBackend>,
    name: &str,
    position: Vec3,
    size: f32,
) -> SceneObject {
    let mesh = GpuMesh::upload(renderer.backend_mut(), &Mesh::cube(size)).unwrap();
    SceneObject::new(name, mesh, Material::colored(name, Vec3::ONE))
        .with_transform(Transform::from_position(position))
}

/// Current GPU contents of one uniform block
pub fn block_bytes(renderer: &Renderer<HeadlessBackend>, name: BlockName) -> Vec<u8> {
    let buffer = renderer.blocks().block(name).buffer();
    renderer
        .backend()
        .buffer_contents(buffer)
        .expect("uniform buffer should exist")
        .to_vec()
}

/// Uniform uploads recorded since the last `clear_commands`, in order
pub fn uniform_writes(renderer: &Renderer<HeadlessBackend>) -> Vec<(BlockName, u64, Vec<u8>)> {
    renderer
        .backend()
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::WriteBuffer { buffer, offset, data } => BlockName::ALL
                .iter()
                .find(|name| renderer.blocks().block(**name).buffer() == *buffer)
                .map(|name| (*name, *offset, data.clone())),
            _ => None,
        })
        .collect()
}

pub fn count_commands(
    renderer: &Renderer<HeadlessBackend>,
    predicate: impl Fn(&Command) -> bool,
) -> usize {
    renderer
        .backend()
        .commands()
        .iter()
        .filter(|c| predicate(c))
        .count()
}

/// Commands recorded after the last render pass with `label` began
pub fn commands_after_pass<'a>(
    renderer: &'a Renderer<HeadlessBackend>,
    label: &str,
) -> &'a [Command] {
    let commands = renderer.backend().commands();
    let start = commands
        .iter()
        .rposition(|c| matches!(c, Command::BeginRenderPass { label: Some(l), .. } if l == label))
        .expect("pass should have been recorded");
    &commands[start + 1..]
}

pub fn words(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|word| f32::from_le_bytes(word.try_into().unwrap()))
        .collect()
}
