//! Per-frame command buffers and the semaphore chain that orders them.
//!
//! Every frame submits six command buffers, each waiting on the semaphore
//! its predecessor signals:
//!
//! ```text
//! image available -> predraw compute -> early graphics -> early compute
//!                 -> late graphics -> late compute -> present -> render finished
//! ```

use ash::vk;

use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::vulkan::{CommandPools, QueueRole, VulkanContext};

pub const FRAME_STAGE_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameStage {
    /// HZB preparation.
    PredrawCompute,
    /// Gbuffer fill.
    EarlyGraphics,
    /// Shadow phases 1-3.
    EarlyCompute,
    /// Gbuffer resolve and forward pass.
    LateGraphics,
    /// Shadow phase 4 and post processing.
    LateCompute,
    /// Composition into the swapchain image.
    Present,
}

impl FrameStage {
    pub const ALL: [FrameStage; FRAME_STAGE_COUNT] = [
        FrameStage::PredrawCompute,
        FrameStage::EarlyGraphics,
        FrameStage::EarlyCompute,
        FrameStage::LateGraphics,
        FrameStage::LateCompute,
        FrameStage::Present,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn queue_role(self) -> QueueRole {
        match self {
            FrameStage::PredrawCompute | FrameStage::EarlyCompute | FrameStage::LateCompute => QueueRole::Compute,
            FrameStage::EarlyGraphics | FrameStage::LateGraphics => QueueRole::Graphics,
            FrameStage::Present => QueueRole::Present,
        }
    }

    /// Pipeline stage at which this submission waits for its predecessor.
    pub fn wait_stage(self) -> vk::PipelineStageFlags {
        match self {
            FrameStage::PredrawCompute | FrameStage::EarlyCompute | FrameStage::LateCompute => {
                vk::PipelineStageFlags::COMPUTE_SHADER
            }
            FrameStage::EarlyGraphics | FrameStage::LateGraphics => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            FrameStage::Present => vk::PipelineStageFlags::FRAGMENT_SHADER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameStage::PredrawCompute => "pre-draw compute",
            FrameStage::EarlyGraphics => "early graphics",
            FrameStage::EarlyCompute => "early compute",
            FrameStage::LateGraphics => "late graphics",
            FrameStage::LateCompute => "late compute",
            FrameStage::Present => "present",
        }
    }
}

/// The six command buffers of one frame slot, indexed by `FrameStage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCommandBuffers {
    pub buffers: [vk::CommandBuffer; FRAME_STAGE_COUNT],
}

impl FrameCommandBuffers {
    pub unsafe fn allocate(ctx: &VulkanContext, pools: &CommandPools) -> RenderResult<Self> {
        let mut buffers = [vk::CommandBuffer::null(); FRAME_STAGE_COUNT];
        for stage in FrameStage::ALL {
            buffers[stage.index()] = pools.allocate(ctx, stage.queue_role(), 1)?[0];
        }
        Ok(Self { buffers })
    }

    pub fn get(&self, stage: FrameStage) -> vk::CommandBuffer {
        self.buffers[stage.index()]
    }

    pub unsafe fn free(&self, ctx: &VulkanContext, pools: &CommandPools) {
        for stage in FrameStage::ALL {
            pools.free(ctx, stage.queue_role(), &[self.get(stage)]);
        }
    }
}

/// Semaphores signalled by the first five stages of one frame slot.
///
/// Image-available and render-finished belong to the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSemaphores {
    pub predraw_compute_finished: vk::Semaphore,
    pub early_graphics_finished: vk::Semaphore,
    pub early_compute_finished: vk::Semaphore,
    pub late_graphics_finished: vk::Semaphore,
    pub late_compute_finished: vk::Semaphore,
}

impl FrameSemaphores {
    pub unsafe fn new(device: &ash::Device) -> RenderResult<Self> {
        let info = vk::SemaphoreCreateInfo::default();
        let create = |stage: &str| {
            device
                .create_semaphore(&info, None)
                .context(&format!("[Sumire::Renderer] Failed to create {stage} signaling semaphore."))
        };

        Ok(Self {
            predraw_compute_finished: create("pre-draw compute")?,
            early_graphics_finished: create("early graphics")?,
            early_compute_finished: create("early compute")?,
            late_graphics_finished: create("late graphics")?,
            late_compute_finished: create("late compute")?,
        })
    }

    /// Semaphore signalled when `stage` completes. `None` for the present stage.
    pub fn signalled_by(&self, stage: FrameStage) -> Option<vk::Semaphore> {
        match stage {
            FrameStage::PredrawCompute => Some(self.predraw_compute_finished),
            FrameStage::EarlyGraphics => Some(self.early_graphics_finished),
            FrameStage::EarlyCompute => Some(self.early_compute_finished),
            FrameStage::LateGraphics => Some(self.late_graphics_finished),
            FrameStage::LateCompute => Some(self.late_compute_finished),
            FrameStage::Present => None,
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.predraw_compute_finished, None);
        device.destroy_semaphore(self.early_graphics_finished, None);
        device.destroy_semaphore(self.early_compute_finished, None);
        device.destroy_semaphore(self.late_graphics_finished, None);
        device.destroy_semaphore(self.late_compute_finished, None);
    }
}

/// One queue submission in the frame chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSubmit {
    pub stage: FrameStage,
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    /// Non-null only on the final submission.
    pub fence: vk::Fence,
}

/// Wire the six submissions of a frame into a single linear chain.
pub fn build_submit_chain(
    commands: &FrameCommandBuffers,
    semaphores: &FrameSemaphores,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
) -> [StageSubmit; FRAME_STAGE_COUNT] {
    let mut wait = image_available;

    FrameStage::ALL.map(|stage| {
        let (signal, fence) = match semaphores.signalled_by(stage) {
            Some(semaphore) => (semaphore, vk::Fence::null()),
            None => (render_finished, in_flight),
        };

        let submit = StageSubmit {
            stage,
            command_buffer: commands.get(stage),
            wait_semaphore: wait,
            wait_stage: stage.wait_stage(),
            signal_semaphore: signal,
            fence,
        };
        wait = signal;
        submit
    })
}

/// Sink for frame submissions, implemented by the device and by test recorders.
pub trait QueueSubmitter {
    fn submit(&mut self, submit: &StageSubmit) -> RenderResult<()>;
}

impl QueueSubmitter for VulkanContext {
    fn submit(&mut self, submit: &StageSubmit) -> RenderResult<()> {
        let queue = match submit.stage.queue_role() {
            QueueRole::Graphics => self.graphics_queue,
            QueueRole::Compute => self.compute_queue,
            QueueRole::Present => self.present_queue,
        };

        let command_buffers = [submit.command_buffer];
        let wait_semaphores = [submit.wait_semaphore];
        let wait_stages = [submit.wait_stage];
        let signal_semaphores = [submit.signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: every handle in the submission belongs to this device and the
        // command buffer has finished recording.
        unsafe { self.device.queue_submit(queue, &[submit_info], submit.fence) }.map_err(|result| {
            RenderError::vulkan(
                format!("[Sumire::Renderer] Could not submit {} command buffer.", submit.stage.name()),
                result,
            )
        })
    }
}

/// Submit a whole chain in order, stopping at the first failure.
pub fn submit_chain<S: QueueSubmitter + ?Sized>(submitter: &mut S, chain: &[StageSubmit]) -> RenderResult<()> {
    chain.iter().try_for_each(|submit| submitter.submit(submit))
}
