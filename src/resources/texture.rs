//! Texture loading and GPU upload

use std::path::Path;

use image::error::{ParameterError, ParameterErrorKind};
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, RgbaImage};

use crate::backend::*;
use crate::error::{RenderError, RenderResult};

/// Decoded RGBA8 pixels
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

fn dimension_mismatch() -> RenderError {
    RenderError::TextureLoad(ImageError::Parameter(ParameterError::from_kind(
        ParameterErrorKind::DimensionMismatch,
    )))
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path)?;
        Ok(Self::from_image(img, &name))
    }

    /// Decode an encoded image (PNG, JPEG, ...)
    pub fn from_bytes(bytes: &[u8], name: &str) -> RenderResult<Self> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_image(img, name))
    }

    /// Wrap raw RGBA8 pixels. Fails if `data` does not hold `width * height` texels.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>, name: &str) -> RenderResult<Self> {
        if width == 0 || height == 0 || data.len() != (width * height * 4) as usize {
            return Err(dimension_mismatch());
        }
        Ok(Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: name.to_string(),
        })
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let rgba = img.to_rgba8();
        Self {
            width: rgba.width(),
            height: rgba.height(),
            format: TextureFormat::Rgba8UnormSrgb,
            data: rgba.into_raw(),
            name: name.to_string(),
        }
    }

    /// Create a 1x1 texture of one color
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Create a checkerboard of 8x8 texel cells
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let data = (0..size * size)
            .flat_map(|i| {
                let (x, y) = (i % size, i / size);
                if ((x / 8) + (y / 8)) % 2 == 0 {
                    color1
                } else {
                    color2
                }
            })
            .collect();

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }

    /// Treat the texels as linear data (bump, specular and alpha maps).
    pub fn linear(mut self) -> Self {
        self.format = TextureFormat::Rgba8Unorm;
        self
    }

    pub fn is_power_of_two(&self) -> bool {
        self.width.is_power_of_two() && self.height.is_power_of_two()
    }

    /// Number of levels in a full mip chain
    pub fn full_mip_count(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }

    /// Mip chain down to 1x1, level 0 first
    fn mip_chain(&self) -> RenderResult<Vec<RgbaImage>> {
        let base = RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(dimension_mismatch)?;
        let mut levels = vec![base];
        for level in 1..self.full_mip_count() {
            let width = (self.width >> level).max(1);
            let height = (self.height >> level).max(1);
            let previous = &levels[levels.len() - 1];
            let next = image::imageops::resize(previous, width, height, FilterType::Triangle);
            levels.push(next);
        }
        Ok(levels)
    }
}

/// A sampled texture on the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub sampler: SamplerHandle,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

impl Texture {
    /// Upload `data`.
    ///
    /// Power-of-two images get a full mip chain and repeat addressing. Other sizes get a
    /// single level, clamp-to-edge addressing and linear filtering.
    pub fn upload<B: GraphicsBackend>(backend: &mut B, data: &TextureData) -> RenderResult<Self> {
        let levels = if data.is_power_of_two() {
            data.mip_chain()?
        } else {
            let base = RgbaImage::from_raw(data.width, data.height, data.data.clone())
                .ok_or_else(dimension_mismatch)?;
            vec![base]
        };
        let mip_levels = levels.len() as u32;

        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            mip_levels,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        for (level, image) in levels.iter().enumerate() {
            backend.write_texture(texture, level as u32, image.as_raw(), image.width(), image.height());
        }
        let view = backend.create_texture_view(texture, &TextureViewDescriptor::default())?;

        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some(format!("{} Sampler", data.name)),
            address_mode: if mip_levels > 1 {
                AddressMode::Repeat
            } else {
                AddressMode::ClampToEdge
            },
            ..Default::default()
        })?;

        log::debug!(
            "Uploaded texture '{}' ({}x{}, {} mips)",
            data.name,
            data.width,
            data.height,
            mip_levels
        );

        Ok(Self {
            texture,
            view,
            sampler,
            width: data.width,
            height: data.height,
            mip_levels,
        })
    }

    /// 1x1 opaque white, bound in place of missing material maps
    pub fn white<B: GraphicsBackend>(backend: &mut B) -> RenderResult<Self> {
        Self::upload(backend, &TextureData::solid_color([255; 4], "white").linear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_texture_gets_mip_chain() {
        let mut backend = HeadlessBackend::new(4, 4);
        let data = TextureData::checkerboard(16, [255, 0, 0, 255], [0, 0, 255, 255]);
        let texture = Texture::upload(&mut backend, &data).unwrap();

        assert_eq!(texture.mip_levels, 5);
        assert_eq!(backend.subresource(texture.texture, 4, 0).data.len(), 4);
        assert_eq!(backend.subresource(texture.texture, 0, 0).data, data.data);
    }

    #[test]
    fn odd_sized_texture_has_single_level() {
        let mut backend = HeadlessBackend::new(4, 4);
        let data = TextureData::from_rgba8(3, 5, vec![128; 3 * 5 * 4], "odd").unwrap();
        let texture = Texture::upload(&mut backend, &data).unwrap();
        assert_eq!(texture.mip_levels, 1);
        assert_eq!(
            backend.texture_descriptor(texture.texture).map(|d| d.mip_levels),
            Some(1)
        );
    }

    #[test]
    fn short_pixel_buffer_is_rejected() {
        assert!(matches!(
            TextureData::from_rgba8(4, 4, vec![0; 10], "short"),
            Err(RenderError::TextureLoad(_))
        ));
    }

    #[test]
    fn full_mip_count_uses_larger_side() {
        let data = TextureData::from_rgba8(8, 2, vec![0; 64], "wide").unwrap();
        assert_eq!(data.full_mip_count(), 4);
    }
}
