//! Tiled many-light shadow mapping.
//!
//! The CPU builds a depth-binned light index (`ZBin`) and a per-screen-tile
//! light bitset (`LightMask`); three compute passes refine these into per-tile
//! light lists and a per-pixel visibility mask.

pub mod bindings;
pub mod debug;
pub mod light_mask;
pub mod mapper;
pub mod push_constants;
pub mod tiles;
pub mod view_space_light;
pub mod zbin;

pub use bindings::{BufferSlot, DescriptorWrite, ShadowDescriptorPlan};
pub use debug::{LightCountSource, LightMaskStats, ShadowDebugView};
pub use light_mask::{LightMask, LightMaskTile, LIGHT_MASK_CAPACITY, LIGHT_MASK_TILE_SIZE};
pub use mapper::{HighQualityShadowMapper, ShadowInputs};
pub use tiles::{ShadowTileLayout, TileGrid, SHADOW_TILE_SIZE, TILE_GROUP_SIZE};
pub use view_space_light::{sort_lights_by_view_space_depth, ViewSpaceLight};
pub use zbin::{SliceMapping, ZBin, ZBinSlice, NUM_SLICES};
