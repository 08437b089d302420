//! Phong materials

use glam::Vec3;

use crate::scene::UiParams;
use crate::uniform::layout::flag;
use crate::uniform::MaterialChunk;

use super::Texture;

/// Surface colors and shininess
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialData {
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub specular_exponent: f32,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            ambient: Vec3::splat(0.1),
            diffuse: Vec3::splat(0.8),
            specular: Vec3::splat(0.5),
            specular_exponent: 32.0,
        }
    }
}

/// Material of one mesh part: colors plus optional texture maps
#[derive(Debug, Clone, Default)]
pub struct Material {
    pub name: String,
    pub data: MaterialData,
    pub diffuse_map: Option<Texture>,
    pub bump_map: Option<Texture>,
    pub specular_map: Option<Texture>,
    pub alpha_map: Option<Texture>,
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Plain colored material without maps
    pub fn colored(name: &str, diffuse: Vec3) -> Self {
        Self::new(name).with_data(MaterialData {
            ambient: diffuse * 0.1,
            diffuse,
            ..Default::default()
        })
    }

    pub fn with_data(mut self, data: MaterialData) -> Self {
        self.data = data;
        self
    }

    pub fn with_diffuse_map(mut self, texture: Texture) -> Self {
        self.diffuse_map = Some(texture);
        self
    }

    pub fn with_bump_map(mut self, texture: Texture) -> Self {
        self.bump_map = Some(texture);
        self
    }

    pub fn with_specular_map(mut self, texture: Texture) -> Self {
        self.specular_map = Some(texture);
        self
    }

    pub fn with_alpha_map(mut self, texture: Texture) -> Self {
        self.alpha_map = Some(texture);
        self
    }

    /// Maps in binding order: diffuse, bump, specular, alpha
    pub fn maps(&self) -> [Option<Texture>; 4] {
        [
            self.diffuse_map,
            self.bump_map,
            self.specular_map,
            self.alpha_map,
        ]
    }

    /// Material record with the UI switches folded in
    pub fn chunk(&self, ui: &UiParams) -> MaterialChunk {
        let data = &self.data;
        MaterialChunk {
            ambient: data.ambient.to_array(),
            _pad0: 0.0,
            diffuse: data.diffuse.to_array(),
            _pad1: 0.0,
            specular: data.specular.to_array(),
            _pad2: 0.0,
            specular_exponent: data.specular_exponent,
            bump_intensity: ui.bump_intensity,
            has_diffuse_map: flag(self.diffuse_map.is_some()),
            has_bump_map: flag(self.bump_map.is_some()),
            has_specular_map: flag(self.specular_map.is_some()),
            has_alpha_map: flag(self.alpha_map.is_some()),
            display_bump: flag(ui.display_bump),
            display_specular: flag(ui.display_specular),
        }
    }
}
