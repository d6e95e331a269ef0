//! Resolution-dependent tile counts and buffer sizes for the shadow mapper.

use ash::vk;

use super::light_mask::{LightMaskTile, LIGHT_MASK_TILE_SIZE};
use super::zbin::{ZBinSlice, NUM_SLICES};

/// Pixel edge of a shadow tile (one accurate-pass work group).
pub const SHADOW_TILE_SIZE: u32 = 8;
/// Pixel edge of a tile group (one approximate-pass work group).
pub const TILE_GROUP_SIZE: u32 = 64;

const LIGHT_MASK_TILE_BYTES: vk::DeviceSize = std::mem::size_of::<LightMaskTile>() as vk::DeviceSize;

/// Tile grid dimensions for one screen resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub x: u32,
    pub y: u32,
}

impl TileGrid {
    fn new(width: u32, height: u32, tile_size: u32) -> Self {
        Self {
            x: width.div_ceil(tile_size),
            y: height.div_ceil(tile_size),
        }
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.x * self.y
    }

    #[inline]
    pub fn as_array(&self) -> [u32; 2] {
        [self.x, self.y]
    }
}

/// Everything the shadow mapper sizes from the screen resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowTileLayout {
    pub width: u32,
    pub height: u32,
    pub shadow_tiles: TileGrid,
    pub tile_groups: TileGrid,
    pub light_mask_tiles: TileGrid,
}

impl ShadowTileLayout {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            shadow_tiles: TileGrid::new(width, height, SHADOW_TILE_SIZE),
            tile_groups: TileGrid::new(width, height, TILE_GROUP_SIZE),
            light_mask_tiles: TileGrid::new(width, height, LIGHT_MASK_TILE_SIZE),
        }
    }

    pub fn screen_resolution(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    pub fn zbin_size(&self) -> vk::DeviceSize {
        (NUM_SLICES * std::mem::size_of::<ZBinSlice>()) as vk::DeviceSize
    }

    pub fn light_mask_size(&self) -> vk::DeviceSize {
        self.light_mask_tiles.count() as vk::DeviceSize * LIGHT_MASK_TILE_BYTES
    }

    pub fn tile_group_light_mask_size(&self) -> vk::DeviceSize {
        self.tile_groups.count() as vk::DeviceSize * LIGHT_MASK_TILE_BYTES
    }

    pub fn tile_shadow_slot_ids_size(&self) -> vk::DeviceSize {
        self.shadow_tiles.count() as vk::DeviceSize * 4
    }

    pub fn tile_shadow_slot_counters_size(&self) -> vk::DeviceSize {
        self.tile_groups.count() as vk::DeviceSize * 4
    }

    /// Size of each of the early/final light list and count buffers.
    pub fn tile_light_list_size(&self) -> vk::DeviceSize {
        self.shadow_tiles.count() as vk::DeviceSize * 4
    }

    /// One byte per pixel.
    pub fn tile_light_visibility_size(&self) -> vk::DeviceSize {
        self.width as vk::DeviceSize * self.height as vk::DeviceSize
    }

    pub fn approximate_dispatch(&self) -> [u32; 3] {
        [self.tile_groups.x, self.tile_groups.y, 1]
    }

    pub fn accurate_dispatch(&self) -> [u32; 3] {
        [self.shadow_tiles.x, self.shadow_tiles.y, 1]
    }

    pub fn deferred_shadows_dispatch(&self) -> [u32; 3] {
        self.accurate_dispatch()
    }
}
