//! Push-constant blocks for the three shadow compute shaders.

use bytemuck::{Pod, Zeroable};

use super::tiles::ShadowTileLayout;
use super::zbin::NUM_SLICES;

/// Approximate light culling (phase 2).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FindLightsApproxPush {
    pub screen_resolution: [u32; 2],
    pub shadow_tile_resolution: [u32; 2],
    pub tile_group_resolution: [u32; 2],
    pub light_mask_resolution: [u32; 2],
    pub num_zbin_slices: u32,
    pub camera_near: f32,
    pub camera_far: f32,
}

impl FindLightsApproxPush {
    pub fn new(layout: &ShadowTileLayout, camera_near: f32, camera_far: f32) -> Self {
        Self {
            screen_resolution: layout.screen_resolution(),
            shadow_tile_resolution: layout.shadow_tiles.as_array(),
            tile_group_resolution: layout.tile_groups.as_array(),
            light_mask_resolution: layout.light_mask_tiles.as_array(),
            num_zbin_slices: NUM_SLICES as u32,
            camera_near,
            camera_far,
        }
    }
}

/// Shared by accurate light culling (phase 3) and deferred shadows (phase 4).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TileResolutionPush {
    pub screen_resolution: [u32; 2],
    pub shadow_tile_resolution: [u32; 2],
    pub tile_group_resolution: [u32; 2],
    pub light_mask_resolution: [u32; 2],
    pub num_zbin_slices: u32,
}

impl TileResolutionPush {
    pub fn new(layout: &ShadowTileLayout) -> Self {
        Self {
            screen_resolution: layout.screen_resolution(),
            shadow_tile_resolution: layout.shadow_tiles.as_array(),
            tile_group_resolution: layout.tile_groups.as_array(),
            light_mask_resolution: layout.light_mask_tiles.as_array(),
            num_zbin_slices: NUM_SLICES as u32,
        }
    }
}

pub type FindLightsAccuratePush = TileResolutionPush;
pub type GenDeferredShadowsPush = TileResolutionPush;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(std::mem::size_of::<FindLightsApproxPush>(), 44);
        assert_eq!(std::mem::size_of::<FindLightsAccuratePush>(), 36);
        assert_eq!(std::mem::size_of::<GenDeferredShadowsPush>(), 36);
    }

    #[test]
    fn test_approx_push_fields() {
        let layout = ShadowTileLayout::new(1920, 1080);
        let push = FindLightsApproxPush::new(&layout, 0.1, 1000.0);
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&push));
        assert_eq!(&words[..9], &[1920, 1080, 240, 135, 30, 17, 60, 34, 1024]);
        assert_eq!(f32::from_bits(words[9]), 0.1);
        assert_eq!(f32::from_bits(words[10]), 1000.0);
    }
}
