//! Per-frame view-space light list, sorted for binning.

use glam::{Mat4, Vec3};

use crate::math::orthogonal_view_space_depth;
use crate::scene::{Light, LightId, LightMap};

/// A light transformed into view space for one frame.
///
/// Holds a borrowed reference into the light map, so the list cannot outlive
/// the lights it was built from.
#[derive(Debug, Clone, Copy)]
pub struct ViewSpaceLight<'a> {
    pub id: LightId,
    pub light: &'a Light,
    pub view_space_position: Vec3,
    pub view_space_depth: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl<'a> ViewSpaceLight<'a> {
    pub fn new(id: LightId, light: &'a Light, view: Mat4) -> Self {
        let (depth, position) = orthogonal_view_space_depth(light.translation, view);
        Self {
            id,
            light,
            view_space_position: position,
            view_space_depth: depth,
            min_depth: depth - light.range,
            max_depth: depth + light.range,
        }
    }

    #[inline]
    pub fn range(&self) -> f32 {
        self.light.range
    }
}

/// Transform every light into view space and sort ascending by `min_depth`.
///
/// Map iteration order carries no meaning for binning; the sort is what the
/// zBin relies on for its incremental min/max tracking.
pub fn sort_lights_by_view_space_depth(lights: &LightMap, view: Mat4) -> Vec<ViewSpaceLight<'_>> {
    let mut view_lights: Vec<_> = lights
        .iter()
        .map(|(&id, light)| ViewSpaceLight::new(id, light, view))
        .collect();

    view_lights.sort_by(|a, b| a.min_depth.total_cmp(&b.min_depth));
    view_lights
}
