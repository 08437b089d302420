//! Double-buffered 3D voxel texture.

use crate::backend::*;
use crate::error::RenderResult;
use crate::shader::ProgramLibrary;

use super::{VOXEL_FORMAT, VOXEL_MIP_LEVELS, VOXEL_RESOLUTION};

#[derive(Debug)]
struct VolumeBuffer {
    texture: TextureHandle,
    /// Full view followed by one view per mip level
    views: Vec<TextureViewHandle>,
    sample_bind_group: BindGroupHandle,
    /// `mip_bind_groups[l - 1]` reads level `l - 1` and writes level `l`
    mip_bind_groups: Vec<BindGroupHandle>,
}

impl VolumeBuffer {
    fn new<B: GraphicsBackend>(
        backend: &mut B,
        library: &ProgramLibrary,
        sampler: SamplerHandle,
        label: &str,
    ) -> RenderResult<Self> {
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            width: VOXEL_RESOLUTION,
            height: VOXEL_RESOLUTION,
            depth: VOXEL_RESOLUTION,
            mip_levels: VOXEL_MIP_LEVELS,
            dimension: TextureDimension::D3,
            format: VOXEL_FORMAT,
            usage: TextureUsage::TEXTURE_BINDING
                | TextureUsage::STORAGE_BINDING
                | TextureUsage::COPY_DST
                | TextureUsage::COPY_SRC,
        })?;

        let full_view = backend.create_texture_view(texture, &TextureViewDescriptor::volume())?;
        let sample_bind_group = backend.create_bind_group(
            library.voxel_volume_layout(),
            &[
                (0, BindGroupEntry::Texture(full_view)),
                (1, BindGroupEntry::Sampler(sampler)),
            ],
        )?;

        let mut level_views = Vec::with_capacity(VOXEL_MIP_LEVELS as usize);
        for level in 0..VOXEL_MIP_LEVELS {
            level_views.push(
                backend.create_texture_view(texture, &TextureViewDescriptor::volume_mip(level))?,
            );
        }
        let mut mip_bind_groups = Vec::with_capacity(level_views.len() - 1);
        for pair in level_views.windows(2) {
            mip_bind_groups.push(backend.create_bind_group(
                library.voxel_mip_layout(),
                &[
                    (0, BindGroupEntry::Texture(pair[0])),
                    (1, BindGroupEntry::StorageTexture(pair[1])),
                ],
            )?);
        }

        let mut views = Vec::with_capacity(level_views.len() + 1);
        views.push(full_view);
        views.extend(level_views);

        Ok(Self {
            texture,
            views,
            sample_bind_group,
            mip_bind_groups,
        })
    }

    fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_bind_group(self.sample_bind_group);
        for bind_group in self.mip_bind_groups {
            backend.destroy_bind_group(bind_group);
        }
        for view in self.views {
            backend.destroy_texture_view(view);
        }
        backend.destroy_texture(self.texture);
    }
}

/// Two voxel textures: the front one is sampled, the back one is written by voxelization and
/// becomes the front once complete.
#[derive(Debug)]
pub struct VoxelVolume {
    buffers: [VolumeBuffer; 2],
    front: usize,
}

impl VoxelVolume {
    pub fn new<B: GraphicsBackend>(backend: &mut B, library: &ProgramLibrary) -> RenderResult<Self> {
        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("Voxel Sampler".into()),
            ..Default::default()
        })?;
        let buffers = [
            VolumeBuffer::new(backend, library, sampler, "Voxel Volume A")?,
            VolumeBuffer::new(backend, library, sampler, "Voxel Volume B")?,
        ];
        log::debug!(
            "Created voxel volume ({}^3, {} mips, double buffered)",
            VOXEL_RESOLUTION,
            VOXEL_MIP_LEVELS
        );
        Ok(Self { buffers, front: 0 })
    }

    /// Texture the shaders sample
    pub fn front_texture(&self) -> TextureHandle {
        self.buffers[self.front].texture
    }

    /// Texture voxelization writes into
    pub fn back_texture(&self) -> TextureHandle {
        self.buffers[1 - self.front].texture
    }

    /// Bind group sampling the front texture with all mips
    pub fn front_bind_group(&self) -> BindGroupHandle {
        self.buffers[self.front].sample_bind_group
    }

    /// Per-level downsample bind groups of the back texture
    pub(crate) fn back_mip_bind_groups(&self) -> &[BindGroupHandle] {
        &self.buffers[1 - self.front].mip_bind_groups
    }

    /// Publish the back texture.
    pub(crate) fn swap(&mut self) {
        self.front = 1 - self.front;
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        for buffer in self.buffers {
            buffer.destroy(backend);
        }
    }
}
