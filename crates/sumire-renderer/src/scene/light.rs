//! Punctual lights and the ordered light collection.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use std::collections::BTreeMap;

pub type LightId = u32;

/// Ordered so the map can be uploaded directly as a storage-buffer array.
pub type LightMap = BTreeMap<LightId, Light>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LightKind {
    Point = 0,
    Spot = 1,
    Directional = 2,
}

#[derive(Debug, Clone)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub translation: Vec3,
    /// Euler rotation (radians); the light points down +z rotated by this.
    pub rotation: Vec3,
    pub color: Vec4,
    /// Influence radius for point and spot lights.
    pub range: f32,
    pub inner_cone_angle: f32,
    pub outer_cone_angle: f32,
}

impl Light {
    fn with_kind(kind: LightKind) -> Self {
        Self {
            name: String::from("Unnamed Light"),
            kind,
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            color: Vec4::ONE,
            range: 1.0,
            inner_cone_angle: 0.0,
            outer_cone_angle: std::f32::consts::FRAC_PI_4,
        }
    }

    pub fn point(translation: Vec3, range: f32) -> Self {
        Self {
            translation,
            range,
            ..Self::with_kind(LightKind::Point)
        }
    }

    pub fn spot(translation: Vec3, range: f32, inner_cone_angle: f32, outer_cone_angle: f32) -> Self {
        Self {
            translation,
            range,
            inner_cone_angle,
            outer_cone_angle,
            ..Self::with_kind(LightKind::Spot)
        }
    }

    pub fn directional(rotation: Vec3) -> Self {
        Self {
            rotation,
            ..Self::with_kind(LightKind::Directional)
        }
    }

    /// Forward direction from the light's rotation (YXZ order).
    pub fn direction(&self) -> Vec3 {
        let rot = glam::Quat::from_euler(glam::EulerRot::YXZ, self.rotation.y, self.rotation.x, self.rotation.z);
        rot * Vec3::Z
    }

    pub fn shader_data(&self) -> LightShaderData {
        let (angle_scale, angle_offset) = cone_to_light_angle(self.inner_cone_angle, self.outer_cone_angle);
        LightShaderData {
            color: self.color.to_array(),
            translation: self.translation.to_array(),
            _pad0: 0.0,
            direction: self.direction().to_array(),
            kind: self.kind as u32,
            range: self.range,
            light_angle_scale: angle_scale,
            light_angle_offset: angle_offset,
            _pad1: 0.0,
        }
    }
}

/// Spot cone angles to the scale/offset pair used for smooth attenuation.
fn cone_to_light_angle(inner: f32, outer: f32) -> (f32, f32) {
    let cos_outer = outer.cos();
    let scale = 1.0 / (inner.cos() - cos_outer).max(1e-3);
    (scale, -cos_outer * scale)
}

/// Per-light storage-buffer record (std430).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightShaderData {
    pub color: [f32; 4],
    pub translation: [f32; 3],
    pub _pad0: f32,
    pub direction: [f32; 3],
    pub kind: u32,
    pub range: f32,
    pub light_angle_scale: f32,
    pub light_angle_offset: f32,
    pub _pad1: f32,
}

/// Owns a light map and hands out monotonically increasing ids.
#[derive(Debug, Default)]
pub struct LightRegistry {
    lights: LightMap,
    next_id: LightId,
}

impl LightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut light: Light) -> LightId {
        let id = self.next_id;
        self.next_id += 1;
        if light.name == "Unnamed Light" {
            light.name = format!("Unnamed Light {id}");
        }
        self.lights.insert(id, light);
        id
    }

    pub fn remove(&mut self, id: LightId) -> Option<Light> {
        self.lights.remove(&id)
    }

    pub fn get_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights.get_mut(&id)
    }

    pub fn lights(&self) -> &LightMap {
        &self.lights
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    /// Shader records in id order.
    pub fn shader_data(&self) -> Vec<LightShaderData> {
        self.lights.values().map(Light::shader_data).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_data_is_std430_sized() {
        assert_eq!(std::mem::size_of::<LightShaderData>(), 64);
        assert_eq!(std::mem::offset_of!(LightShaderData, translation), 16);
        assert_eq!(std::mem::offset_of!(LightShaderData, direction), 32);
        assert_eq!(std::mem::offset_of!(LightShaderData, kind), 44);
    }

    #[test]
    fn test_registry_ids_are_monotonic() {
        let mut reg = LightRegistry::new();
        let a = reg.insert(Light::point(Vec3::ZERO, 1.0));
        let b = reg.insert(Light::point(Vec3::ONE, 2.0));
        reg.remove(a);
        let c = reg.insert(Light::point(Vec3::X, 3.0));
        assert!(a < b && b < c);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.lights()[&c].name, format!("Unnamed Light {c}"));
    }

    #[test]
    fn test_default_direction_is_forward_z() {
        let light = Light::directional(Vec3::ZERO);
        assert!((light.direction() - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_point_light_shader_kind() {
        let data = Light::point(Vec3::new(1.0, 2.0, 3.0), 7.5).shader_data();
        assert_eq!(data.kind, LightKind::Point as u32);
        assert_eq!(data.range, 7.5);
        assert_eq!(data.translation, [1.0, 2.0, 3.0]);
    }
}
