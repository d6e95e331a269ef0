//! Command pools per queue role and image layout transitions.

use ash::vk;

use super::{BoundPipeline, VulkanContext};
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Which queue a command buffer is recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Compute,
    Present,
}

/// One resettable command pool for each queue role.
pub struct CommandPools {
    pub graphics: vk::CommandPool,
    pub compute: vk::CommandPool,
    pub present: vk::CommandPool,
}

impl CommandPools {
    pub unsafe fn new(ctx: &VulkanContext) -> RenderResult<Self> {
        let create = |family: u32, role: &str| {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            ctx.device
                .create_command_pool(&pool_info, None)
                .context(&format!("[Sumire::CommandPools] Failed to create {role} command pool."))
        };

        Ok(Self {
            graphics: create(ctx.graphics_family, "graphics")?,
            compute: create(ctx.compute_family, "compute")?,
            present: create(ctx.present_family, "present")?,
        })
    }

    pub fn pool(&self, role: QueueRole) -> vk::CommandPool {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Present => self.present,
        }
    }

    /// Allocate `count` primary command buffers from the pool for `role`.
    pub unsafe fn allocate(
        &self,
        ctx: &VulkanContext,
        role: QueueRole,
        count: u32,
    ) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool(role))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        ctx.device
            .allocate_command_buffers(&alloc_info)
            .context("[Sumire::CommandPools] Failed to allocate command buffers.")
    }

    pub unsafe fn free(&self, ctx: &VulkanContext, role: QueueRole, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            ctx.device.free_command_buffers(self.pool(role), buffers);
        }
    }

    /// Begin a one-shot command buffer on the graphics pool.
    pub unsafe fn begin_single_time(&self, ctx: &VulkanContext) -> RenderResult<vk::CommandBuffer> {
        let cmd = self.allocate(ctx, QueueRole::Graphics, 1)?[0];

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        ctx.device
            .begin_command_buffer(cmd, &begin_info)
            .context("[Sumire::CommandPools] Failed to begin single time command buffer.")?;

        Ok(cmd)
    }

    /// End and submit a one-shot command buffer, waiting for completion.
    pub unsafe fn end_single_time(&self, ctx: &VulkanContext, cmd: vk::CommandBuffer) -> RenderResult<()> {
        ctx.device
            .end_command_buffer(cmd)
            .context("[Sumire::CommandPools] Failed to end single time command buffer.")?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        ctx.device
            .queue_submit(ctx.graphics_queue, &[submit_info], vk::Fence::null())
            .context("[Sumire::CommandPools] Failed to submit single time command buffer.")?;

        ctx.device
            .queue_wait_idle(ctx.graphics_queue)
            .context("[Sumire::CommandPools] Failed to wait for graphics queue.")?;

        self.free(ctx, QueueRole::Graphics, &command_buffers);

        Ok(())
    }

    pub unsafe fn destroy(&mut self, ctx: &VulkanContext) {
        ctx.device.destroy_command_pool(self.graphics, None);
        ctx.device.destroy_command_pool(self.compute, None);
        ctx.device.destroy_command_pool(self.present, None);
    }
}

/// A command buffer being recorded, with its own bind cache.
#[derive(Debug, Clone, Copy)]
pub struct CommandRecording {
    pub handle: vk::CommandBuffer,
    pub bound_pipeline: BoundPipeline,
}

impl CommandRecording {
    /// Reset and begin `handle` for one submission.
    pub unsafe fn begin(device: &ash::Device, handle: vk::CommandBuffer) -> RenderResult<Self> {
        device
            .reset_command_buffer(handle, vk::CommandBufferResetFlags::empty())
            .context("[Sumire::CommandPools] Failed to reset command buffer.")?;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device
            .begin_command_buffer(handle, &begin_info)
            .context("[Sumire::CommandPools] Failed to begin recording command buffer.")?;

        Ok(Self {
            handle,
            bound_pipeline: BoundPipeline::new(),
        })
    }

    pub unsafe fn end(&self, device: &ash::Device) -> RenderResult<()> {
        device
            .end_command_buffer(self.handle)
            .context("[Sumire::CommandPools] Failed to record command buffer.")
    }

    pub unsafe fn bind_compute_pipeline(&mut self, device: &ash::Device, pipeline: vk::Pipeline) {
        self.bound_pipeline
            .bind(device, self.handle, vk::PipelineBindPoint::COMPUTE, pipeline);
    }

    pub unsafe fn bind_graphics_pipeline(&mut self, device: &ash::Device, pipeline: vk::Pipeline) {
        self.bound_pipeline
            .bind(device, self.handle, vk::PipelineBindPoint::GRAPHICS, pipeline);
    }
}

/// Access and stage masks for one image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the supported transitions. Anything else is rejected.
pub fn layout_transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> RenderResult<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER),
        (L::UNDEFINED, L::TRANSFER_SRC_OPTIMAL) => (A::empty(), A::TRANSFER_READ, S::TOP_OF_PIPE, S::TRANSFER),
        (L::UNDEFINED, L::GENERAL) => (
            A::empty(),
            A::SHADER_READ | A::SHADER_WRITE,
            S::TOP_OF_PIPE,
            S::COMPUTE_SHADER,
        ),
        (L::TRANSFER_SRC_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => {
            (A::TRANSFER_READ, A::TRANSFER_WRITE, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        _ => return Err(RenderError::UnsupportedLayoutTransition { old, new }),
    };

    Ok(TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Record a single-queue layout transition for all mips and layers of `image`.
pub unsafe fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    aspect_mask: vk::ImageAspectFlags,
) -> RenderResult<()> {
    let masks = layout_transition_masks(old_layout, new_layout)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    device.cmd_pipeline_barrier(
        cmd,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Layout transition whitelist
    // ========================================================================

    #[test]
    fn test_hzb_preparation_transition() {
        let masks = layout_transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL).unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    }

    #[test]
    fn test_upload_transitions() {
        let masks = layout_transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let masks = layout_transition_masks(
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_every_whitelisted_pair_accepted() {
        use vk::ImageLayout as L;
        let pairs = [
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
            (L::UNDEFINED, L::TRANSFER_SRC_OPTIMAL),
            (L::UNDEFINED, L::GENERAL),
            (L::TRANSFER_SRC_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
            (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
        ];
        for (old, new) in pairs {
            assert!(layout_transition_masks(old, new).is_ok(), "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn test_unlisted_transition_rejected() {
        let err = layout_transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RenderError::UnsupportedLayoutTransition {
                old: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                new: vk::ImageLayout::PRESENT_SRC_KHR,
            }
        ));

        // Reverse direction of a supported pair is not implied.
        assert!(layout_transition_masks(vk::ImageLayout::GENERAL, vk::ImageLayout::UNDEFINED).is_err());
    }
}
