//! Queue family ownership transfers for images shared across queues.
//!
//! When the source and destination families are the same the barriers are
//! skipped entirely. On split hardware they are required for correctness.

use ash::vk;

use super::frame::FrameStage;
use super::render_passes::{DEPTH_RESTING_LAYOUT, GBUFFER_RESTING_LAYOUT};

/// Stage and access masks for one half (release or acquire) of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipBarrier {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl OwnershipBarrier {
    /// Swapchain mirror handed from late compute to the present queue.
    pub const MIRROR_RELEASE: Self = Self {
        old_layout: vk::ImageLayout::GENERAL,
        new_layout: vk::ImageLayout::GENERAL,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::empty(),
        src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    };

    pub const MIRROR_ACQUIRE: Self = Self {
        old_layout: vk::ImageLayout::GENERAL,
        new_layout: vk::ImageLayout::GENERAL,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::empty(),
        src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
    };

    /// Intermediate color handed from the late scene pass to late compute.
    pub const MIRROR_TO_COMPUTE_RELEASE: Self = Self {
        old_layout: vk::ImageLayout::GENERAL,
        new_layout: vk::ImageLayout::GENERAL,
        src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags::empty(),
        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    };

    pub const MIRROR_TO_COMPUTE_ACQUIRE: Self = Self {
        old_layout: vk::ImageLayout::GENERAL,
        new_layout: vk::ImageLayout::GENERAL,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::from_raw(
            vk::AccessFlags::SHADER_READ.as_raw() | vk::AccessFlags::SHADER_WRITE.as_raw(),
        ),
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
    };

    /// Gbuffer attachment (`layout`) written by the gbuffer pass, handed to early compute.
    pub const fn attachment_to_compute_release(layout: vk::ImageLayout, src_access: vk::AccessFlags) -> Self {
        Self {
            old_layout: layout,
            new_layout: layout,
            src_access,
            dst_access: vk::AccessFlags::empty(),
            src_stage: vk::PipelineStageFlags::from_raw(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
            ),
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }
    }

    /// Gbuffer attachment only read by the scene pass, handed to late compute.
    pub const fn attachment_read_to_compute_release(layout: vk::ImageLayout) -> Self {
        Self {
            old_layout: layout,
            new_layout: layout,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::empty(),
            src_stage: vk::PipelineStageFlags::from_raw(
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw(),
            ),
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }
    }

    pub const fn attachment_to_compute_acquire(layout: vk::ImageLayout) -> Self {
        Self {
            old_layout: layout,
            new_layout: layout,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        }
    }

    /// Gbuffer attachment read by early compute, handed back to late graphics.
    pub const fn attachment_to_graphics_release(layout: vk::ImageLayout) -> Self {
        Self {
            old_layout: layout,
            new_layout: layout,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::empty(),
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }
    }

    pub const fn attachment_to_graphics_acquire(layout: vk::ImageLayout, dst_access: vk::AccessFlags) -> Self {
        Self {
            old_layout: layout,
            new_layout: layout,
            src_access: vk::AccessFlags::empty(),
            dst_access,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::from_raw(
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw(),
            ),
        }
    }
}

/// Gbuffer targets the shadow passes sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowInput {
    Depth,
    WorldPosition,
}

impl ShadowInput {
    pub const ALL: [ShadowInput; 2] = [ShadowInput::Depth, ShadowInput::WorldPosition];

    /// Layout the image stays in between the gbuffer pass and the next frame.
    pub fn resting_layout(self) -> vk::ImageLayout {
        match self {
            ShadowInput::Depth => DEPTH_RESTING_LAYOUT,
            ShadowInput::WorldPosition => GBUFFER_RESTING_LAYOUT,
        }
    }

    /// How the gbuffer pass writes it.
    pub fn attachment_write(self) -> vk::AccessFlags {
        match self {
            ShadowInput::Depth => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ShadowInput::WorldPosition => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        }
    }

    /// How the scene pass reads it.
    pub fn attachment_read(self) -> vk::AccessFlags {
        match self {
            ShadowInput::Depth => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            ShadowInput::WorldPosition => vk::AccessFlags::INPUT_ATTACHMENT_READ,
        }
    }
}

/// Each queue hop the shadow inputs make within a frame.
///
/// Gbuffer (graphics) -> phases 2-3 (compute) -> scene pass (graphics)
/// -> phase 4 (compute). The next frame's gbuffer pass starts from an
/// undefined layout, so no hop back to graphics is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowInputHandoff {
    GbufferToEarlyCompute,
    EarlyComputeToScene,
    SceneToLateCompute,
}

impl ShadowInputHandoff {
    pub const ALL: [ShadowInputHandoff; 3] = [
        ShadowInputHandoff::GbufferToEarlyCompute,
        ShadowInputHandoff::EarlyComputeToScene,
        ShadowInputHandoff::SceneToLateCompute,
    ];

    /// Releasing and acquiring frame stage.
    pub fn stages(self) -> (FrameStage, FrameStage) {
        match self {
            ShadowInputHandoff::GbufferToEarlyCompute => (FrameStage::EarlyGraphics, FrameStage::EarlyCompute),
            ShadowInputHandoff::EarlyComputeToScene => (FrameStage::EarlyCompute, FrameStage::LateGraphics),
            ShadowInputHandoff::SceneToLateCompute => (FrameStage::LateGraphics, FrameStage::LateCompute),
        }
    }

    pub fn release(self, input: ShadowInput) -> OwnershipBarrier {
        let layout = input.resting_layout();
        match self {
            ShadowInputHandoff::GbufferToEarlyCompute => {
                OwnershipBarrier::attachment_to_compute_release(layout, input.attachment_write())
            }
            ShadowInputHandoff::EarlyComputeToScene => OwnershipBarrier::attachment_to_graphics_release(layout),
            ShadowInputHandoff::SceneToLateCompute => OwnershipBarrier::attachment_read_to_compute_release(layout),
        }
    }

    pub fn acquire(self, input: ShadowInput) -> OwnershipBarrier {
        let layout = input.resting_layout();
        match self {
            ShadowInputHandoff::GbufferToEarlyCompute | ShadowInputHandoff::SceneToLateCompute => {
                OwnershipBarrier::attachment_to_compute_acquire(layout)
            }
            ShadowInputHandoff::EarlyComputeToScene => {
                OwnershipBarrier::attachment_to_graphics_acquire(layout, input.attachment_read())
            }
        }
    }
}

/// Move of one image between two queue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOwnershipTransfer {
    pub src_family: u32,
    pub dst_family: u32,
}

impl QueueOwnershipTransfer {
    pub fn new(src_family: u32, dst_family: u32) -> Self {
        Self { src_family, dst_family }
    }

    pub fn is_required(&self) -> bool {
        self.src_family != self.dst_family
    }

    /// Image barrier for one half of the transfer; `None` when families match.
    pub fn image_barrier(
        &self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        masks: &OwnershipBarrier,
    ) -> Option<vk::ImageMemoryBarrier<'static>> {
        if !self.is_required() {
            return None;
        }

        Some(
            vk::ImageMemoryBarrier::default()
                .image(image)
                .old_layout(masks.old_layout)
                .new_layout(masks.new_layout)
                .src_access_mask(masks.src_access)
                .dst_access_mask(masks.dst_access)
                .src_queue_family_index(self.src_family)
                .dst_queue_family_index(self.dst_family)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                }),
        )
    }

    /// Record one half of the transfer into `cmd`. No-op when families match.
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        masks: &OwnershipBarrier,
    ) {
        if let Some(barrier) = self.image_barrier(image, aspect_mask, masks) {
            device.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}
