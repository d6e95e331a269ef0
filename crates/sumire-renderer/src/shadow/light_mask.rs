//! Screen-space light mask: one bit per light per 32x32 pixel tile.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use rayon::prelude::*;

use super::view_space_light::ViewSpaceLight;
use crate::error::{RenderError, RenderResult};
use crate::math::frustum::TileFrustum;
use crate::math::screen_to_view;
use crate::scene::Camera;

/// Tile edge length in pixels.
pub const LIGHT_MASK_TILE_SIZE: u32 = 32;

/// Maximum number of lights a tile can address (32 groups of 32).
pub const LIGHT_MASK_CAPACITY: usize = 1024;

/// One tile's bitset, laid out as 33 consecutive u32 words on the GPU.
///
/// Word 0 has one bit per group of 32 lights so shaders can skip empty
/// groups; words 1..=32 hold the per-light bits.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct LightMaskTile {
    pub groups: u32,
    pub lights: [u32; 32],
}

impl Default for LightMaskTile {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl LightMaskTile {
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::zeroed();
    }

    #[inline]
    pub fn set_light_bit(&mut self, light_idx: u32) {
        debug_assert!((light_idx as usize) < LIGHT_MASK_CAPACITY);
        let group = light_idx / 32;
        let bit = light_idx - 32 * group;
        self.groups |= 1 << group;
        self.lights[group as usize] |= 1 << bit;
    }

    #[inline]
    pub fn test_light_bit(&self, light_idx: u32) -> bool {
        let group = light_idx / 32;
        let bit = light_idx - 32 * group;
        (self.lights[group as usize] >> bit) & 1 == 1
    }

    #[inline]
    pub fn group_is_set(&self, group: u32) -> bool {
        (self.groups >> group) & 1 == 1
    }

    /// Number of lights set in this tile.
    pub fn light_count(&self) -> u32 {
        self.lights.iter().map(|w| w.count_ones()).sum()
    }

    /// Indices of the set lights, ascending.
    pub fn iter_lights(&self) -> impl Iterator<Item = u32> + '_ {
        (0..32u32)
            .filter(move |&g| self.group_is_set(g))
            .flat_map(move |g| {
                let word = self.lights[g as usize];
                (0..32u32).filter(move |b| (word >> b) & 1 == 1).map(move |b| g * 32 + b)
            })
    }
}

/// Per-frame light mask for the current screen resolution.
#[derive(Debug, Clone)]
pub struct LightMask {
    pub width: u32,
    pub height: u32,
    pub num_tiles_x: u32,
    pub num_tiles_y: u32,
    pub tiles: Vec<LightMaskTile>,
}

impl LightMask {
    pub fn new(width: u32, height: u32) -> Self {
        let num_tiles_x = width.div_ceil(LIGHT_MASK_TILE_SIZE);
        let num_tiles_y = height.div_ceil(LIGHT_MASK_TILE_SIZE);
        Self {
            width,
            height,
            num_tiles_x,
            num_tiles_y,
            tiles: vec![LightMaskTile::default(); (num_tiles_x * num_tiles_y) as usize],
        }
    }

    pub fn clear(&mut self) {
        self.tiles.fill(LightMaskTile::default());
    }

    pub fn tile(&self, x: u32, y: u32) -> &LightMaskTile {
        &self.tiles[(x + y * self.num_tiles_x) as usize]
    }

    pub fn tile_mut(&mut self, x: u32, y: u32) -> &mut LightMaskTile {
        &mut self.tiles[(x + y * self.num_tiles_x) as usize]
    }

    pub fn resolution(&self) -> [u32; 2] {
        [self.num_tiles_x, self.num_tiles_y]
    }

    /// Rebuild the mask from the depth-sorted light list.
    ///
    /// Bit `i` of tile `(x, y)` is set when light `i`'s sphere touches all four
    /// side planes of the tile frustum and overlaps the camera depth range.
    pub fn generate(&mut self, lights: &[ViewSpaceLight<'_>], camera: &Camera) -> RenderResult<()> {
        if lights.len() > LIGHT_MASK_CAPACITY {
            return Err(RenderError::LightCapacityExceeded {
                count: lights.len(),
                capacity: LIGHT_MASK_CAPACITY,
            });
        }

        self.clear();

        let near = camera.near();
        let far = camera.far();
        let inv_projection = camera.inverse_projection();
        let screen_dim = Vec2::new(self.width as f32, self.height as f32);
        let num_tiles_x = self.num_tiles_x;

        let corner_to_view = |x: u32, y: u32| -> Vec3 {
            let screen = Vec4::new(
                (x * LIGHT_MASK_TILE_SIZE) as f32,
                (y * LIGHT_MASK_TILE_SIZE) as f32,
                -1.0,
                1.0,
            );
            screen_to_view(screen, screen_dim, inv_projection).xyz()
        };

        self.tiles.par_iter_mut().enumerate().for_each(|(idx, tile)| {
            let x = idx as u32 % num_tiles_x;
            let y = idx as u32 / num_tiles_x;

            let frustum = TileFrustum::from_corners(
                corner_to_view(x, y),
                corner_to_view(x + 1, y),
                corner_to_view(x, y + 1),
                corner_to_view(x + 1, y + 1),
            );

            for (i, light) in lights.iter().enumerate() {
                let r = light.range();
                let in_depth_range = light.view_space_depth + r > near && light.view_space_depth - r < far;
                if in_depth_range && frustum.intersects_sphere(light.view_space_position, r) {
                    tile.set_light_bit(i as u32);
                }
            }
        });

        Ok(())
    }

    /// Raw bytes for upload into the light mask storage buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Light;

    // ============================================================
    // Tile bitset
    // ============================================================

    #[test]
    fn test_tile_layout_is_33_words() {
        assert_eq!(std::mem::size_of::<LightMaskTile>(), 33 * 4);
    }

    #[test]
    fn test_set_light_bit_sets_group_and_light() {
        let mut tile = LightMaskTile::default();
        tile.set_light_bit(0);
        tile.set_light_bit(33);
        tile.set_light_bit(1023);

        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&tile));
        assert_eq!(words[0], (1 << 0) | (1 << 1) | (1 << 31));
        assert_eq!(words[1], 1);
        assert_eq!(words[2], 1 << 1);
        assert_eq!(words[32], 1 << 31);

        assert!(tile.test_light_bit(33));
        assert!(!tile.test_light_bit(32));
        assert_eq!(tile.light_count(), 3);
        assert_eq!(tile.iter_lights().collect::<Vec<_>>(), vec![0, 33, 1023]);
    }

    #[test]
    fn test_set_is_idempotent_and_clear_resets() {
        let mut tile = LightMaskTile::default();
        tile.set_light_bit(5);
        let once = tile;
        tile.set_light_bit(5);
        assert_eq!(once, tile);
        tile.clear();
        assert_eq!(tile, LightMaskTile::default());
    }

    #[test]
    fn test_tile_counts_round_up() {
        let mask = LightMask::new(1920, 1080);
        assert_eq!(mask.resolution(), [60, 34]);
        assert_eq!(mask.tiles.len(), 60 * 34);
        assert_eq!(mask.as_bytes().len(), 60 * 34 * 132);
    }

    // ============================================================
    // Generation
    // ============================================================

    /// 90 degree square camera on a 64x64 screen: 2x2 tiles, one per quadrant.
    fn quadrant_camera() -> Camera {
        Camera::perspective(90f32.to_radians(), 1.0, 0.1, 1000.0)
    }

    fn view_light(light: &Light, pos: Vec3) -> ViewSpaceLight<'_> {
        let depth = -pos.z;
        ViewSpaceLight {
            id: 0,
            light,
            view_space_position: pos,
            view_space_depth: depth,
            min_depth: depth - light.range,
            max_depth: depth + light.range,
        }
    }

    fn set_tiles(mask: &LightMask, light_idx: u32) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for y in 0..mask.num_tiles_y {
            for x in 0..mask.num_tiles_x {
                if mask.tile(x, y).test_light_bit(light_idx) {
                    out.push((x, y));
                }
            }
        }
        out
    }

    #[test]
    fn test_light_inside_one_quadrant() {
        let light = Light::point(Vec3::ZERO, 1.0);
        let lights = [view_light(&light, Vec3::new(-5.0, 5.0, -10.0))];
        let mut mask = LightMask::new(64, 64);
        mask.generate(&lights, &quadrant_camera()).unwrap();
        // Up and left is the top-left tile
        assert_eq!(set_tiles(&mask, 0), vec![(0, 0)]);
    }

    #[test]
    fn test_light_straddling_tile_edge() {
        let light = Light::point(Vec3::ZERO, 1.0);
        let lights = [view_light(&light, Vec3::new(0.5, 5.0, -10.0))];
        let mut mask = LightMask::new(64, 64);
        mask.generate(&lights, &quadrant_camera()).unwrap();
        assert_eq!(set_tiles(&mask, 0), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_light_on_axis_touches_every_tile() {
        let light = Light::point(Vec3::ZERO, 0.5);
        let lights = [view_light(&light, Vec3::new(0.0, 0.0, -10.0))];
        let mut mask = LightMask::new(64, 64);
        mask.generate(&lights, &quadrant_camera()).unwrap();
        assert_eq!(set_tiles(&mask, 0).len(), 4);
    }

    #[test]
    fn test_depth_range_rejects_lights() {
        let light = Light::point(Vec3::ZERO, 1.0);
        let lights = [
            view_light(&light, Vec3::new(0.0, 0.0, -2000.0)),
            view_light(&light, Vec3::new(0.0, 0.0, 5.0)),
        ];
        let mut mask = LightMask::new(64, 64);
        mask.generate(&lights, &quadrant_camera()).unwrap();
        assert!(set_tiles(&mask, 0).is_empty());
        assert!(set_tiles(&mask, 1).is_empty());
    }

    #[test]
    fn test_offscreen_light_sets_nothing() {
        let light = Light::point(Vec3::ZERO, 1.0);
        let lights = [view_light(&light, Vec3::new(50.0, 0.0, -10.0))];
        let mut mask = LightMask::new(64, 64);
        mask.generate(&lights, &quadrant_camera()).unwrap();
        assert!(set_tiles(&mask, 0).is_empty());
    }

    #[test]
    fn test_matches_analytic_sphere_tests() {
        // Compare every (tile, light) pair against an independent angular test
        // on a symmetric 90 degree frustum, where each tile spans a fixed range
        // of x/z and y/z slopes.
        let owned: Vec<(Light, Vec3)> = (0..40)
            .map(|i| {
                let t = i as f32;
                let pos = Vec3::new((t * 1.7).sin() * 12.0, (t * 0.9).cos() * 12.0, -5.0 - t * 0.8);
                (Light::point(Vec3::ZERO, 0.3 + (t * 0.37).fract() * 2.0), pos)
            })
            .collect();
        let lights: Vec<_> = owned.iter().map(|(l, p)| view_light(l, *p)).collect();

        let mut mask = LightMask::new(128, 128);
        mask.generate(&lights, &quadrant_camera()).unwrap();

        let tiles = mask.num_tiles_x as f32;
        for ty in 0..mask.num_tiles_y {
            for tx in 0..mask.num_tiles_x {
                // Slopes of the tile edges (x/-z grows right, y/-z grows up)
                let sx0 = tx as f32 / tiles * 2.0 - 1.0;
                let sx1 = (tx + 1) as f32 / tiles * 2.0 - 1.0;
                let sy1 = 1.0 - ty as f32 / tiles * 2.0;
                let sy0 = 1.0 - (ty + 1) as f32 / tiles * 2.0;

                for (i, l) in lights.iter().enumerate() {
                    let p = l.view_space_position;
                    let r = l.range();
                    let d = -p.z;
                    // Signed distance to the plane x = s * d, outward normal (1, 0, s)/len
                    let right = (p.x - sx1 * d) / (1.0 + sx1 * sx1).sqrt();
                    let left = (sx0 * d - p.x) / (1.0 + sx0 * sx0).sqrt();
                    let top = (p.y - sy1 * d) / (1.0 + sy1 * sy1).sqrt();
                    let bottom = (sy0 * d - p.y) / (1.0 + sy0 * sy0).sqrt();
                    let expected = right < r && left < r && top < r && bottom < r;

                    // Skip pairs within float noise of a plane
                    let margin = [right, left, top, bottom].iter().map(|s| (s - r).abs()).fold(f32::MAX, f32::min);
                    if margin < 1e-3 {
                        continue;
                    }
                    assert_eq!(
                        mask.tile(tx, ty).test_light_bit(i as u32),
                        expected,
                        "tile ({tx}, {ty}) light {i} at {p:?} r {r}"
                    );
                }
            }
        }
    }

    // ============================================================
    // Capacity
    // ============================================================

    #[test]
    fn test_capacity_boundary() {
        let light = Light::point(Vec3::ZERO, 1.0);
        let camera = quadrant_camera();
        let mut mask = LightMask::new(64, 64);

        let full: Vec<_> = (0..LIGHT_MASK_CAPACITY)
            .map(|_| view_light(&light, Vec3::new(0.0, 0.0, -10.0)))
            .collect();
        mask.generate(&full, &camera).unwrap();
        assert_eq!(mask.tile(0, 0).light_count(), 1024);
        assert_eq!(mask.tile(0, 0).groups, u32::MAX);

        let over: Vec<_> = (0..=LIGHT_MASK_CAPACITY)
            .map(|_| view_light(&light, Vec3::new(0.0, 0.0, -10.0)))
            .collect();
        let err = mask.generate(&over, &camera).unwrap_err();
        assert!(matches!(err, RenderError::LightCapacityExceeded { count: 1025, capacity: 1024 }));
    }
}
