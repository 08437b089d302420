//! Voxel scene demo
//!
//! A few lit objects orbited by the camera, voxelized on startup and whenever `R` is pressed.
//!
//! ```bash
//! cargo run --example voxel_scene -- --debug-pass --scale 2.0
//! ```

use std::sync::Arc;

use clap::Parser;
use glam::Vec3;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use voxel_pipeline::resources::{GpuMesh, Material, Mesh, Texture, TextureData};
use voxel_pipeline::scene::{DirectionalLight, PointLight, Transform};
use voxel_pipeline::{
    Camera, DebugConfig, GraphicsBackend, Renderer, RendererConfig, Scene, SceneObject,
    VoxelConfig, WgpuBackend,
};

/// Orbit speed of the camera in radians per frame
const ORBIT_STEP: f32 = 0.005;

#[derive(Parser, Debug)]
#[command(name = "voxel_scene", about = "Forward rendering with a voxelized scene copy")]
struct Args {
    /// Draw the world-position pass and the voxel overlay
    #[arg(long)]
    debug_pass: bool,

    /// Physical pixels per logical pixel (defaults to the window's scale factor)
    #[arg(long)]
    pixel_ratio: Option<f32>,

    /// Half edge length of the voxelized region
    #[arg(long, default_value = "1.5")]
    scale: f32,

    /// Initial logical window width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial logical window height
    #[arg(long, default_value = "720")]
    height: u32,
}

fn build_scene<B: GraphicsBackend>(backend: &mut B) -> voxel_pipeline::RenderResult<Scene> {
    let cube = GpuMesh::upload(backend, &Mesh::cube(0.6))?;
    let sphere = GpuMesh::upload(backend, &Mesh::sphere(0.4, 32, 16))?;
    let floor = GpuMesh::upload(backend, &Mesh::plane(2.8, 2.8))?;
    let checker = Texture::upload(
        backend,
        &TextureData::checkerboard(64, [200, 200, 200, 255], [60, 60, 60, 255]),
    )?;

    let mut scene = Scene::new();
    scene.add_object(
        SceneObject::new(
            "floor",
            floor,
            Material::colored("floor", Vec3::ONE).with_diffuse_map(checker),
        )
        .with_transform(Transform::from_position(Vec3::new(0.0, -0.6, 0.0))),
    );
    scene.add_object(
        SceneObject::new("cube", cube, Material::colored("red", Vec3::new(0.9, 0.2, 0.2)))
            .with_transform(Transform::from_components(
                Vec3::new(-0.6, -0.3, 0.2),
                Vec3::new(0.0, 30f32.to_radians(), 0.0),
                Vec3::ONE,
            )),
    );
    scene.add_object(
        SceneObject::new(
            "sphere",
            sphere,
            Material::colored("blue", Vec3::new(0.2, 0.3, 0.9)),
        )
        .with_transform(Transform::from_position(Vec3::new(0.6, -0.2, -0.3))),
    );

    scene.add_point_light(
        PointLight::new(Vec3::new(0.0, 1.0, 1.0), Vec3::new(1.0, 0.9, 0.7), 2.0).with_debug(true),
    );
    scene.add_point_light(PointLight::new(
        Vec3::new(-1.2, 0.5, -1.0),
        Vec3::new(0.4, 0.6, 1.0),
        1.0,
    ));
    scene.add_directional_light(DirectionalLight::new(
        Vec3::new(-0.3, -1.0, -0.4),
        Vec3::ONE,
        0.6,
    ));
    Ok(scene)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    voxel_pipeline::init_logging(None);
    let args = Args::parse();

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Voxel Scene")
            .with_inner_size(LogicalSize::new(args.width, args.height))
            .build(&event_loop)?,
    );
    let pixel_ratio = args
        .pixel_ratio
        .unwrap_or(window.scale_factor() as f32);

    let mut backend = WgpuBackend::new(Arc::clone(&window), true)?;
    let scene = build_scene(&mut backend)?;
    let config = RendererConfig {
        pixel_ratio,
        debug_pass: args.debug_pass,
        voxel: VoxelConfig {
            scene_scale: args.scale,
            ..Default::default()
        },
        debug: DebugConfig {
            readback: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut renderer = Renderer::initialize(backend, config)?;
    renderer.set_size(args.width, args.height)?;

    let mut camera = Camera::new(Vec3::new(0.0, 1.2, 3.5), Vec3::ZERO);
    camera.set_aspect(args.width as f32, args.height as f32);

    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => elwt.exit(),
                WindowEvent::Resized(size) if size.width > 0 && size.height > 0 => {
                    let logical = size.to_logical::<u32>(f64::from(renderer.config().pixel_ratio));
                    camera.set_aspect(logical.width as f32, logical.height as f32);
                    if let Err(err) = renderer.set_size(logical.width, logical.height) {
                        log::error!("Resize failed: {}", err);
                    }
                }
                WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                    match event.logical_key {
                        Key::Named(NamedKey::Escape) => elwt.exit(),
                        Key::Character(c) if c.as_str() == "r" => {
                            renderer.mark_voxels_stale();
                            log::info!("Voxels marked stale");
                        }
                        Key::Character(c) if c.as_str() == "o" => {
                            match renderer.debug_voxel_occupancy() {
                                Ok(occupancy) => log::info!(
                                    "{} occupied voxels in layers {:?}",
                                    occupancy.total(),
                                    occupancy.occupied_layers()
                                ),
                                Err(err) => log::warn!("Occupancy readback failed: {}", err),
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                camera.orbit(ORBIT_STEP);
                if let Err(err) = renderer.render_frame(&scene, &camera) {
                    log::error!("Frame failed: {}", err);
                }
                window.request_redraw();
            }
            _ => {}
        }
    })?;

    Ok(())
}
