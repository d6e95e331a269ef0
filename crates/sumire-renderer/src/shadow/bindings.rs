//! Descriptor binding tables for the shadow compute passes.

use ash::vk;

use super::tiles::ShadowTileLayout;
use crate::error::{RenderResult, VkResultExt};

/// Resources the shadow passes bind, in the order the shaders declare them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowResource {
    Hzb,
    ZBuffer,
    WorldPosition,
    ZBin,
    LightMask,
    TileGroupLightMask,
    TileShadowSlotIds,
    TileShadowSlotCounters,
    TileLightListEarly,
    TileLightCountEarly,
    TileLightListFinal,
    TileLightCountFinal,
    TileLightVisibility,
}

impl ShadowResource {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::Hzb | Self::ZBuffer | Self::WorldPosition => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            _ => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    /// Layout the sampled image is in when the pass runs. `None` for buffers.
    pub fn image_layout(self) -> Option<vk::ImageLayout> {
        match self {
            Self::Hzb => Some(vk::ImageLayout::GENERAL),
            Self::ZBuffer => Some(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
            Self::WorldPosition => Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            _ => None,
        }
    }

    /// Byte size of the buffer behind this resource. `None` for images.
    pub fn buffer_size(self, layout: &ShadowTileLayout) -> Option<vk::DeviceSize> {
        Some(match self {
            Self::Hzb | Self::ZBuffer | Self::WorldPosition => return None,
            Self::ZBin => layout.zbin_size(),
            Self::LightMask => layout.light_mask_size(),
            Self::TileGroupLightMask => layout.tile_group_light_mask_size(),
            Self::TileShadowSlotIds => layout.tile_shadow_slot_ids_size(),
            Self::TileShadowSlotCounters => layout.tile_shadow_slot_counters_size(),
            Self::TileLightListEarly
            | Self::TileLightCountEarly
            | Self::TileLightListFinal
            | Self::TileLightCountFinal => layout.tile_light_list_size(),
            Self::TileLightVisibility => layout.tile_light_visibility_size(),
        })
    }

    /// Rewritten by the CPU every frame, so kept once per frame in flight.
    pub fn is_host_written(self) -> bool {
        matches!(self, Self::ZBin | Self::LightMask)
    }
}

/// Phase 2: approximate culling against the HZB.
pub const FIND_LIGHTS_APPROX_BINDINGS: [ShadowResource; 6] = [
    ShadowResource::Hzb,
    ShadowResource::TileGroupLightMask,
    ShadowResource::TileShadowSlotIds,
    ShadowResource::TileShadowSlotCounters,
    ShadowResource::ZBin,
    ShadowResource::LightMask,
];

/// Phase 3: accurate per-shadow-tile culling.
pub const FIND_LIGHTS_ACCURATE_BINDINGS: [ShadowResource; 6] = [
    ShadowResource::ZBuffer,
    ShadowResource::WorldPosition,
    ShadowResource::TileGroupLightMask,
    ShadowResource::TileShadowSlotIds,
    ShadowResource::TileLightListEarly,
    ShadowResource::TileLightCountEarly,
];

/// Phase 4: deferred shadow generation.
pub const GEN_DEFERRED_SHADOWS_BINDINGS: [ShadowResource; 9] = [
    ShadowResource::ZBuffer,
    ShadowResource::WorldPosition,
    ShadowResource::TileShadowSlotIds,
    ShadowResource::TileShadowSlotCounters,
    ShadowResource::TileLightListEarly,
    ShadowResource::TileLightCountEarly,
    ShadowResource::TileLightListFinal,
    ShadowResource::TileLightCountFinal,
    ShadowResource::TileLightVisibility,
];

pub const SHADOW_DESCRIPTOR_MAX_SETS: u32 = 21;

/// Layout bindings for a table, binding index = position, compute stage only.
pub fn layout_bindings(table: &[ShadowResource]) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    table
        .iter()
        .enumerate()
        .map(|(i, res)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(i as u32)
                .descriptor_type(res.descriptor_type())
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
        })
        .collect()
}

/// Pool sizes covering `sets_per_table` sets of each of the three tables.
pub fn pool_sizes(sets_per_table: u32) -> [vk::DescriptorPoolSize; 2] {
    let tables: [&[ShadowResource]; 3] = [
        &FIND_LIGHTS_APPROX_BINDINGS,
        &FIND_LIGHTS_ACCURATE_BINDINGS,
        &GEN_DEFERRED_SHADOWS_BINDINGS,
    ];
    let count = |ty: vk::DescriptorType| {
        tables
            .iter()
            .flat_map(|t| t.iter())
            .filter(|r| r.descriptor_type() == ty)
            .count() as u32
            * sets_per_table
    };
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: count(vk::DescriptorType::STORAGE_BUFFER),
        },
    ]
}

/// One binding of a descriptor set and the buffer size it is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub resource: ShadowResource,
    /// `None` for sampled images.
    pub size: Option<vk::DeviceSize>,
}

pub fn descriptor_writes(table: &[ShadowResource], layout: &ShadowTileLayout) -> Vec<DescriptorWrite> {
    table
        .iter()
        .enumerate()
        .map(|(i, &resource)| DescriptorWrite {
            binding: i as u32,
            resource,
            size: resource.buffer_size(layout),
        })
        .collect()
}

/// A buffer the shadow passes need. Host-written resources get one slot per
/// frame in flight, everything else a single shared slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlot {
    pub resource: ShadowResource,
    pub size: vk::DeviceSize,
    pub frame: Option<usize>,
}

impl BufferSlot {
    pub fn serves(&self, resource: ShadowResource, frame: usize) -> bool {
        self.resource == resource && self.frame.map_or(true, |f| f == frame)
    }
}

/// Everything the shadow passes bind at one resolution.
///
/// Two plans compare equal exactly when the buffers and descriptor writes
/// they produce are identical, so a resize to the current size is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowDescriptorPlan {
    pub layout: ShadowTileLayout,
    pub approximate: Vec<DescriptorWrite>,
    pub accurate: Vec<DescriptorWrite>,
    pub deferred_shadows: Vec<DescriptorWrite>,
}

impl ShadowDescriptorPlan {
    pub fn new(width: u32, height: u32) -> Self {
        let layout = ShadowTileLayout::new(width, height);
        Self {
            layout,
            approximate: descriptor_writes(&FIND_LIGHTS_APPROX_BINDINGS, &layout),
            accurate: descriptor_writes(&FIND_LIGHTS_ACCURATE_BINDINGS, &layout),
            deferred_shadows: descriptor_writes(&GEN_DEFERRED_SHADOWS_BINDINGS, &layout),
        }
    }

    pub fn tables(&self) -> [&[DescriptorWrite]; 3] {
        [&self.approximate, &self.accurate, &self.deferred_shadows]
    }

    /// Buffers to allocate, in first-use order.
    pub fn buffer_slots(&self, frames: usize) -> Vec<BufferSlot> {
        let mut slots: Vec<BufferSlot> = Vec::new();
        for write in self.tables().into_iter().flatten() {
            let Some(size) = write.size else {
                continue;
            };
            if slots.iter().any(|slot| slot.resource == write.resource) {
                continue;
            }

            if write.resource.is_host_written() {
                slots.extend((0..frames).map(|frame| BufferSlot {
                    resource: write.resource,
                    size,
                    frame: Some(frame),
                }));
            } else {
                slots.push(BufferSlot {
                    resource: write.resource,
                    size,
                    frame: None,
                });
            }
        }
        slots
    }
}

pub unsafe fn create_set_layout(
    device: &ash::Device,
    table: &[ShadowResource],
    name: &str,
) -> RenderResult<vk::DescriptorSetLayout> {
    let bindings = layout_bindings(table);
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    device
        .create_descriptor_set_layout(&info, None)
        .context(&format!("[Sumire::HighQualityShadowMapper] Failed to create {name} descriptor set layout."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_match_tables() {
        let sizes = pool_sizes(1);
        assert_eq!(sizes[0].descriptor_count, 1 + 2 + 2);
        assert_eq!(sizes[1].descriptor_count, 5 + 4 + 7);

        let sizes = pool_sizes(2);
        assert_eq!(sizes[0].descriptor_count, 10);
        assert_eq!(sizes[1].descriptor_count, 32);
        assert!(3 * 2 <= SHADOW_DESCRIPTOR_MAX_SETS);
    }

    #[test]
    fn test_binding_indices_follow_table_order() {
        let bindings = layout_bindings(&GEN_DEFERRED_SHADOWS_BINDINGS);
        assert_eq!(bindings.len(), 9);
        for (i, b) in bindings.iter().enumerate() {
            assert_eq!(b.binding, i as u32);
            assert_eq!(b.descriptor_count, 1);
            assert_eq!(b.stage_flags, vk::ShaderStageFlags::COMPUTE);
        }
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[8].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
    }

    #[test]
    fn test_approx_pass_reads_hzb_first() {
        assert_eq!(FIND_LIGHTS_APPROX_BINDINGS[0], ShadowResource::Hzb);
        assert_eq!(FIND_LIGHTS_APPROX_BINDINGS[4], ShadowResource::ZBin);
        assert_eq!(FIND_LIGHTS_APPROX_BINDINGS[5], ShadowResource::LightMask);
        assert_eq!(ShadowResource::Hzb.image_layout(), Some(vk::ImageLayout::GENERAL));
        assert_eq!(
            ShadowResource::ZBuffer.image_layout(),
            Some(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
        );
        assert_eq!(ShadowResource::ZBin.image_layout(), None);
    }

    // ========================================================================
    // Descriptor plan
    // ========================================================================

    #[test]
    fn test_plan_sizes_follow_layout() {
        let plan = ShadowDescriptorPlan::new(1920, 1080);
        let layout = ShadowTileLayout::new(1920, 1080);

        assert_eq!(plan.approximate[0].size, None);
        assert_eq!(plan.approximate[4].size, Some(layout.zbin_size()));
        assert_eq!(plan.approximate[5].size, Some(layout.light_mask_size()));
        assert_eq!(plan.deferred_shadows[8].size, Some(1920 * 1080));
        for (i, write) in plan.accurate.iter().enumerate() {
            assert_eq!(write.binding, i as u32);
        }
    }

    #[test]
    fn test_resize_round_trip_restores_plan() {
        let a = ShadowDescriptorPlan::new(1280, 720);
        let b = ShadowDescriptorPlan::new(800, 600);
        assert_ne!(a, b);
        assert_ne!(a.buffer_slots(2), b.buffer_slots(2));

        let back = ShadowDescriptorPlan::new(1280, 720);
        assert_eq!(back, a);
        assert_eq!(back.buffer_slots(2), a.buffer_slots(2));
    }

    #[test]
    fn test_same_size_resize_changes_nothing() {
        let current = ShadowDescriptorPlan::new(1600, 900);
        let requested = ShadowDescriptorPlan::new(1600, 900);
        assert_eq!(current, requested);
        for (old, new) in current.tables().into_iter().zip(requested.tables()) {
            assert_eq!(old, new);
        }
    }

    #[test]
    fn test_uploads_get_a_slot_per_frame() {
        let slots = ShadowDescriptorPlan::new(1920, 1080).buffer_slots(2);

        for resource in [ShadowResource::ZBin, ShadowResource::LightMask] {
            let frames: Vec<_> = slots.iter().filter(|s| s.resource == resource).map(|s| s.frame).collect();
            assert_eq!(frames, vec![Some(0), Some(1)]);
        }

        let shared: Vec<_> = slots.iter().filter(|s| s.frame.is_none()).collect();
        assert_eq!(shared.len(), 8);
        assert!(shared.iter().all(|s| !s.resource.is_host_written()));

        let zbin_1 = slots.iter().find(|s| s.serves(ShadowResource::ZBin, 1)).unwrap();
        assert_eq!(zbin_1.frame, Some(1));
        let list = slots.iter().find(|s| s.serves(ShadowResource::TileLightListFinal, 1)).unwrap();
        assert_eq!(list.frame, None);
    }
}
