//! Frame orchestrator.
//!
//! A frame is six command buffers recorded between `begin_frame` and
//! `end_frame` and submitted as one linear semaphore chain:
//!
//! | stage           | queue    | recorded by the caller between                         |
//! |-----------------|----------|--------------------------------------------------------|
//! | pre-draw compute| compute  | HZB preparation (recorded by `begin_frame`)            |
//! | early graphics  | graphics | `begin_gbuffer_render_pass` / `end_gbuffer_render_pass`|
//! | early compute   | compute  | `begin_early_compute` / `end_early_compute`            |
//! | late graphics   | graphics | `begin_scene_render_pass` / `end_scene_render_pass`    |
//! | late compute    | compute  | `begin_late_compute` / `end_late_compute`              |
//! | present         | present  | `begin_composite_render_pass` / `end_composite_...`    |
//!
//! Images crossing queue families get release/acquire barrier pairs; on
//! devices where the families coincide those barriers are skipped.

use ash::vk;
use std::mem::ManuallyDrop;

use super::attachments::{self, GBuffer};
use super::frame::{build_submit_chain, submit_chain, FrameCommandBuffers, FrameSemaphores, FrameStage};
use super::global::GlobalResources;
use super::ownership::{OwnershipBarrier, QueueOwnershipTransfer, ShadowInput, ShadowInputHandoff};
use super::render_passes::{self, create_framebuffer, RenderPass};
use crate::config::RendererConfig;
use crate::error::RenderResult;
use crate::scene::{Camera, LightMap};
use crate::shadow::ShadowInputs;
use crate::vulkan::{
    memory::barrier_aspect_mask, transition_image_layout, AcquireOutcome, CommandPools, CommandRecording, Image,
    MemoryManager, PresentOutcome, QueueRole, Swapchain, VulkanContext, VulkanSurface, MAX_FRAMES_IN_FLIGHT,
};
use crate::window::WindowProvider;

/// Recording state of one frame, handed out by `begin_frame`.
pub struct FrameContext {
    pub frame_index: usize,
    pub image_index: u32,
    pub predraw_compute: CommandRecording,
    pub early_graphics: CommandRecording,
    pub early_compute: CommandRecording,
    pub late_graphics: CommandRecording,
    pub late_compute: CommandRecording,
    pub present: CommandRecording,
}

impl FrameContext {
    pub fn recording(&mut self, stage: FrameStage) -> &mut CommandRecording {
        match stage {
            FrameStage::PredrawCompute => &mut self.predraw_compute,
            FrameStage::EarlyGraphics => &mut self.early_graphics,
            FrameStage::EarlyCompute => &mut self.early_compute,
            FrameStage::LateGraphics => &mut self.late_graphics,
            FrameStage::LateCompute => &mut self.late_compute,
            FrameStage::Present => &mut self.present,
        }
    }
}

struct RenderPasses {
    gbuffer: RenderPass,
    scene: RenderPass,
    composition: RenderPass,
}

impl RenderPasses {
    unsafe fn new(device: &ash::Device, swapchain_format: vk::Format, depth_format: vk::Format) -> RenderResult<Self> {
        Ok(Self {
            gbuffer: RenderPass::new(device, &render_passes::gbuffer_pass_desc(depth_format))?,
            scene: RenderPass::new(
                device,
                &render_passes::scene_pass_desc(attachments::INTERMEDIATE_COLOR_FORMAT, depth_format),
            )?,
            composition: RenderPass::new(device, &render_passes::composition_pass_desc(swapchain_format))?,
        })
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        self.gbuffer.destroy(device);
        self.scene.destroy(device);
        self.composition.destroy(device);
    }
}

/// Everything sized to the swapchain extent.
struct ScreenTargets {
    /// One per frame in flight; post-processed in place by late compute.
    intermediate: Vec<Image>,
    gbuffer: GBuffer,
    hzb: Image,
    gbuffer_framebuffer: vk::Framebuffer,
    /// One per frame in flight.
    scene_framebuffers: Vec<vk::Framebuffer>,
    /// One per swapchain image.
    swapchain_framebuffers: Vec<vk::Framebuffer>,
}

impl ScreenTargets {
    unsafe fn new(
        ctx: &VulkanContext,
        memory: &MemoryManager,
        swapchain: &Swapchain,
        passes: &RenderPasses,
    ) -> RenderResult<Self> {
        let extent = swapchain.extent;
        let device = &ctx.device;

        let intermediate = attachments::create_intermediate_colors(ctx, memory, extent)?;
        let gbuffer = GBuffer::new(memory, extent, swapchain.depth_format)?;
        let hzb = attachments::create_hzb(memory, extent)?;

        let gbuffer_framebuffer = create_framebuffer(device, &passes.gbuffer, &gbuffer.attachment_views(), extent)?;

        let [position, normal, albedo, ao, depth] = gbuffer.attachment_views();
        let scene_framebuffers = intermediate
            .iter()
            .map(|color| {
                create_framebuffer(
                    device,
                    &passes.scene,
                    &[color.view, position, normal, albedo, ao, depth],
                    extent,
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let swapchain_framebuffers = swapchain
            .image_views
            .iter()
            .map(|&view| create_framebuffer(device, &passes.composition, &[view], extent))
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            intermediate,
            gbuffer,
            hzb,
            gbuffer_framebuffer,
            scene_framebuffers,
            swapchain_framebuffers,
        })
    }

    unsafe fn destroy(self, device: &ash::Device, memory: &MemoryManager) {
        for framebuffer in self
            .swapchain_framebuffers
            .into_iter()
            .chain(self.scene_framebuffers)
            .chain(std::iter::once(self.gbuffer_framebuffer))
        {
            device.destroy_framebuffer(framebuffer, None);
        }

        for image in self.intermediate {
            memory.destroy_image(image);
        }
        self.gbuffer.destroy(memory);
        memory.destroy_image(self.hzb);
    }
}

/// Owns the device, swapchain and frame resources and drives the frame chain.
pub struct Renderer<W: WindowProvider> {
    window: W,
    vsync: bool,
    needs_recreate: bool,
    recreated: bool,

    surface: VulkanSurface,
    swapchain: Swapchain,
    pools: CommandPools,
    commands: Vec<FrameCommandBuffers>,
    semaphores: Vec<FrameSemaphores>,
    passes: RenderPasses,
    targets: ManuallyDrop<ScreenTargets>,
    global: ManuallyDrop<GlobalResources>,

    // Dropped after everything above and before the device.
    memory: MemoryManager,
    ctx: VulkanContext,
}

impl<W: WindowProvider> Renderer<W> {
    pub fn new(window: W, config: &RendererConfig) -> RenderResult<Self> {
        let (display_handle, window_handle) = window.raw_handles()?;

        // SAFETY: the window owns the handles and outlives the renderer,
        // which stores it.
        unsafe {
            let ctx = VulkanContext::new(display_handle, window_handle, config.enable_validation)?;
            let memory = MemoryManager::new(&ctx)?;

            let surface = VulkanSurface::query(&ctx, config.vsync)?;
            let swapchain = Swapchain::new(&ctx, &surface, window.extent())?;

            let pools = CommandPools::new(&ctx)?;
            let commands = (0..MAX_FRAMES_IN_FLIGHT)
                .map(|_| FrameCommandBuffers::allocate(&ctx, &pools))
                .collect::<RenderResult<Vec<_>>>()?;
            let semaphores = (0..MAX_FRAMES_IN_FLIGHT)
                .map(|_| FrameSemaphores::new(&ctx.device))
                .collect::<RenderResult<Vec<_>>>()?;

            let passes = RenderPasses::new(&ctx.device, swapchain.image_format, swapchain.depth_format)?;
            let targets = ScreenTargets::new(&ctx, &memory, &swapchain, &passes)?;
            let global = GlobalResources::new(&ctx.device, &memory)?;

            log::info!(
                "Renderer ready: {}x{}, {} swapchain images, families graphics={} compute={} present={}",
                swapchain.extent.width,
                swapchain.extent.height,
                swapchain.image_count(),
                ctx.graphics_family,
                ctx.compute_family,
                ctx.present_family
            );

            Ok(Self {
                window,
                vsync: config.vsync,
                needs_recreate: false,
                recreated: false,
                surface,
                swapchain,
                pools,
                commands,
                semaphores,
                passes,
                targets: ManuallyDrop::new(targets),
                global: ManuallyDrop::new(global),
                memory,
                ctx,
            })
        }
    }

    // ========================================================================
    // Frame boundaries
    // ========================================================================

    /// Acquire an image and begin all six command buffers.
    ///
    /// Returns `None` when the swapchain had to be rebuilt (or cannot be,
    /// because the window is minimized); the caller skips the frame.
    pub fn begin_frame(&mut self) -> RenderResult<Option<FrameContext>> {
        if self.needs_recreate {
            self.recreate_render_objects()?;
            return Ok(None);
        }

        let image_index = match unsafe { self.swapchain.acquire_next_image(&self.ctx)? } {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::warn!("Swapchain suboptimal for image {image_index}");
                }
                image_index
            }
            AcquireOutcome::Stale => {
                self.recreate_render_objects()?;
                return Ok(None);
            }
        };

        let frame_index = self.swapchain.current_frame;
        let buffers = self.commands[frame_index];
        let device = &self.ctx.device;

        // SAFETY: the frame slot fence was waited in `acquire_next_image`, so
        // none of these buffers is still executing.
        let frame = unsafe {
            let begin = |stage| CommandRecording::begin(device, buffers.get(stage));
            FrameContext {
                frame_index,
                image_index,
                predraw_compute: begin(FrameStage::PredrawCompute)?,
                early_graphics: begin(FrameStage::EarlyGraphics)?,
                early_compute: begin(FrameStage::EarlyCompute)?,
                late_graphics: begin(FrameStage::LateGraphics)?,
                late_compute: begin(FrameStage::LateCompute)?,
                present: begin(FrameStage::Present)?,
            }
        };

        unsafe {
            transition_image_layout(
                device,
                frame.predraw_compute.handle,
                self.targets.hzb.handle,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                vk::ImageAspectFlags::COLOR,
            )?;
        }

        Ok(Some(frame))
    }

    /// End recording, submit the chain and present.
    pub fn end_frame(&mut self, frame: FrameContext) -> RenderResult<()> {
        let device = &self.ctx.device;

        unsafe {
            for stage in FrameStage::ALL {
                let recording = match stage {
                    FrameStage::PredrawCompute => &frame.predraw_compute,
                    FrameStage::EarlyGraphics => &frame.early_graphics,
                    FrameStage::EarlyCompute => &frame.early_compute,
                    FrameStage::LateGraphics => &frame.late_graphics,
                    FrameStage::LateCompute => &frame.late_compute,
                    FrameStage::Present => &frame.present,
                };
                recording.end(device)?;
            }
        }

        let in_flight = unsafe { self.swapchain.claim_image(&self.ctx, frame.image_index)? };
        let sync = self.swapchain.current_sync();
        let chain = build_submit_chain(
            &self.commands[frame.frame_index],
            &self.semaphores[frame.frame_index],
            sync.image_available,
            sync.render_finished,
            in_flight,
        );
        submit_chain(&mut self.ctx, &chain)?;

        let outcome = unsafe { self.swapchain.present(&self.ctx, frame.image_index)? };
        if outcome == PresentOutcome::Stale || self.window.was_resized() {
            self.window.reset_resized_flag();
            self.recreate_render_objects()?;
        }

        self.swapchain.advance_frame();
        Ok(())
    }

    // ========================================================================
    // Early graphics: gbuffer
    // ========================================================================

    pub fn begin_gbuffer_render_pass(&mut self, frame: &mut FrameContext) {
        // Attachments load from UNDEFINED, so the previous frame's late
        // compute hold on depth and position needs no acquire here.
        unsafe {
            self.passes.gbuffer.begin(
                &self.ctx.device,
                frame.early_graphics.handle,
                self.targets.gbuffer_framebuffer,
                self.swapchain.extent,
            );
        }
    }

    /// End the gbuffer pass and hand depth and position to the compute queue.
    pub fn end_gbuffer_render_pass(&mut self, frame: &mut FrameContext) {
        let cmd = frame.early_graphics.handle;
        unsafe {
            self.passes.gbuffer.end(&self.ctx.device, cmd);
            self.transfer_shadow_inputs(cmd, ShadowInputHandoff::GbufferToEarlyCompute, ShadowInputHandoff::release);
        }
    }

    // ========================================================================
    // Early compute: shadow phases 1-3
    // ========================================================================

    pub fn begin_early_compute(&mut self, frame: &mut FrameContext) {
        unsafe {
            self.transfer_shadow_inputs(
                frame.early_compute.handle,
                ShadowInputHandoff::GbufferToEarlyCompute,
                ShadowInputHandoff::acquire,
            );
        }
    }

    pub fn end_early_compute(&mut self, frame: &mut FrameContext) {
        unsafe {
            self.transfer_shadow_inputs(
                frame.early_compute.handle,
                ShadowInputHandoff::EarlyComputeToScene,
                ShadowInputHandoff::release,
            );
        }
    }

    // ========================================================================
    // Late graphics: resolve and forward
    // ========================================================================

    pub fn begin_scene_render_pass(&mut self, frame: &mut FrameContext) {
        let cmd = frame.late_graphics.handle;
        unsafe {
            self.transfer_shadow_inputs(cmd, ShadowInputHandoff::EarlyComputeToScene, ShadowInputHandoff::acquire);

            self.passes.scene.begin(
                &self.ctx.device,
                cmd,
                self.targets.scene_framebuffers[frame.frame_index],
                self.swapchain.extent,
            );
        }
    }

    /// Move from the resolve subpass to the forward subpass.
    pub fn next_subpass(&mut self, frame: &mut FrameContext) -> RenderResult<()> {
        unsafe { self.passes.scene.next_subpass(&self.ctx.device, frame.late_graphics.handle) }
    }

    pub fn end_scene_render_pass(&mut self, frame: &mut FrameContext) {
        let cmd = frame.late_graphics.handle;
        unsafe {
            self.passes.scene.end(&self.ctx.device, cmd);
            self.transfer_shadow_inputs(cmd, ShadowInputHandoff::SceneToLateCompute, ShadowInputHandoff::release);
            self.transfer_intermediate(
                cmd,
                frame.frame_index,
                QueueRole::Graphics,
                QueueRole::Compute,
                &OwnershipBarrier::MIRROR_TO_COMPUTE_RELEASE,
            );
        }
    }

    // ========================================================================
    // Late compute: deferred shadows and post processing
    // ========================================================================

    /// Acquire depth, position and the intermediate color on the compute queue.
    pub fn begin_late_compute(&mut self, frame: &mut FrameContext) {
        unsafe {
            self.transfer_shadow_inputs(
                frame.late_compute.handle,
                ShadowInputHandoff::SceneToLateCompute,
                ShadowInputHandoff::acquire,
            );
            self.transfer_intermediate(
                frame.late_compute.handle,
                frame.frame_index,
                QueueRole::Graphics,
                QueueRole::Compute,
                &OwnershipBarrier::MIRROR_TO_COMPUTE_ACQUIRE,
            );
        }
    }

    /// Release the swapchain mirror from compute to present.
    pub fn end_late_compute(&mut self, frame: &mut FrameContext) {
        unsafe {
            self.transfer_intermediate(
                frame.late_compute.handle,
                frame.frame_index,
                QueueRole::Compute,
                QueueRole::Present,
                &OwnershipBarrier::MIRROR_RELEASE,
            );
        }
    }

    // ========================================================================
    // Present: composition
    // ========================================================================

    /// Acquire the swapchain mirror on the present queue and begin composition.
    pub fn begin_composite_render_pass(&mut self, frame: &mut FrameContext) {
        let cmd = frame.present.handle;
        unsafe {
            self.transfer_intermediate(
                cmd,
                frame.frame_index,
                QueueRole::Compute,
                QueueRole::Present,
                &OwnershipBarrier::MIRROR_ACQUIRE,
            );

            self.passes.composition.begin(
                &self.ctx.device,
                cmd,
                self.targets.swapchain_framebuffers[frame.image_index as usize],
                self.swapchain.extent,
            );
        }
    }

    pub fn end_composite_render_pass(&mut self, frame: &mut FrameContext) {
        unsafe { self.passes.composition.end(&self.ctx.device, frame.present.handle) }
    }

    // ========================================================================
    // Ownership transfers
    // ========================================================================

    fn family(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.ctx.graphics_family,
            QueueRole::Compute => self.ctx.compute_family,
            QueueRole::Present => self.ctx.present_family,
        }
    }

    /// One half of `handoff` for depth and world position, the gbuffer
    /// targets the shadow passes read.
    unsafe fn transfer_shadow_inputs(
        &self,
        cmd: vk::CommandBuffer,
        handoff: ShadowInputHandoff,
        half: fn(ShadowInputHandoff, ShadowInput) -> OwnershipBarrier,
    ) {
        let (src, dst) = handoff.stages();
        let transfer = QueueOwnershipTransfer::new(self.family(src.queue_role()), self.family(dst.queue_role()));
        if !transfer.is_required() {
            return;
        }

        let gbuffer = &self.targets.gbuffer;
        for input in ShadowInput::ALL {
            let image = match input {
                ShadowInput::Depth => &gbuffer.depth,
                ShadowInput::WorldPosition => gbuffer.position(),
            };
            transfer.record(
                &self.ctx.device,
                cmd,
                image.handle,
                barrier_aspect_mask(image.format),
                &half(handoff, input),
            );
        }
    }

    unsafe fn transfer_intermediate(
        &self,
        cmd: vk::CommandBuffer,
        frame_index: usize,
        src: QueueRole,
        dst: QueueRole,
        masks: &OwnershipBarrier,
    ) {
        QueueOwnershipTransfer::new(self.family(src), self.family(dst)).record(
            &self.ctx.device,
            cmd,
            self.targets.intermediate[frame_index].handle,
            vk::ImageAspectFlags::COLOR,
            masks,
        );
    }

    // ========================================================================
    // Recreation
    // ========================================================================

    /// Rebuild the swapchain and every resolution-dependent target.
    ///
    /// While the window is minimized nothing is rebuilt and the request stays
    /// pending for the next `begin_frame`.
    pub fn recreate_render_objects(&mut self) -> RenderResult<()> {
        let extent = self.window.extent();
        if extent.width == 0 || extent.height == 0 {
            self.needs_recreate = true;
            log::debug!("Window minimized, deferring swapchain recreation");
            return Ok(());
        }

        unsafe {
            self.surface = VulkanSurface::query(&self.ctx, self.vsync)?;
            self.swapchain.recreate(&self.ctx, &self.surface, extent)?;

            let targets = ScreenTargets::new(&self.ctx, &self.memory, &self.swapchain, &self.passes)?;
            std::mem::replace(&mut *self.targets, targets).destroy(&self.ctx.device, &self.memory);
        }

        self.needs_recreate = false;
        self.recreated = true;
        self.window.reset_resized_flag();
        Ok(())
    }

    /// Switch present mode; takes effect on the next frame.
    pub fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            log::info!("Vsync {}", if vsync { "enabled" } else { "disabled" });
            self.vsync = vsync;
            self.needs_recreate = true;
        }
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// True once after every successful recreation.
    pub fn take_recreated_flag(&mut self) -> bool {
        std::mem::take(&mut self.recreated)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Views the shadow mapper samples; replaced on every recreation.
    pub fn shadow_inputs(&self) -> ShadowInputs {
        ShadowInputs {
            hzb_view: self.targets.hzb.view,
            zbuffer_view: self.targets.gbuffer.depth.view,
            world_position_view: self.targets.gbuffer.position().view,
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.swapchain.extent;
        extent.width as f32 / extent.height.max(1) as f32
    }

    pub fn global_set_layout(&self) -> vk::DescriptorSetLayout {
        self.global.set_layout
    }

    pub fn global_descriptor_set(&self, frame: &FrameContext) -> vk::DescriptorSet {
        self.global.descriptor_set(frame.frame_index)
    }

    /// Upload camera and lights for this frame's global set.
    pub fn update_globals(&self, frame: &FrameContext, camera: &Camera, lights: &LightMap) -> RenderResult<()> {
        self.global.update(frame.frame_index, camera, lights)
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn context(&self) -> &VulkanContext {
        &self.ctx
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn device(&self) -> &ash::Device {
        &self.ctx.device
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        self.ctx.wait_idle()
    }
}

impl<W: WindowProvider> Drop for Renderer<W> {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            log::warn!("Device wait failed during shutdown: {e}");
        }

        unsafe {
            let device = &self.ctx.device;

            ManuallyDrop::take(&mut self.global).destroy(device, &self.memory);
            ManuallyDrop::take(&mut self.targets).destroy(device, &self.memory);
            self.passes.destroy(device);

            for semaphores in &self.semaphores {
                semaphores.destroy(device);
            }
            for commands in &self.commands {
                commands.free(&self.ctx, &self.pools);
            }
            self.pools.destroy(&self.ctx);
            self.swapchain.destroy(&self.ctx);
        }

        log::info!("Renderer shut down");
    }
}
