//! Vulkan swapchain with per-frame and per-image synchronization.

use ash::vk;

use super::{VulkanContext, VulkanSurface};
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Per-frame synchronization primitives.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Result of `acquire_next_image`. A stale swapchain is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Stale,
}

/// Map a raw acquire result. Only OUT_OF_DATE is recoverable here.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RenderResult<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
        Err(e) => Err(RenderError::vulkan("[Sumire::Swapchain] Failed to acquire swap chain image.", e)),
    }
}

/// Map a raw present result. Suboptimal and out-of-date both request recreation.
pub fn classify_present(result: Result<bool, vk::Result>) -> RenderResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => {
            Ok(PresentOutcome::Stale)
        }
        Err(e) => Err(RenderError::vulkan("[Sumire::Swapchain] Failed to present swap chain image.", e)),
    }
}

/// Recreation must keep the formats every render pass was built against.
pub fn ensure_formats_unchanged(
    old_image: vk::Format,
    old_depth: vk::Format,
    new_image: vk::Format,
    new_depth: vk::Format,
) -> RenderResult<()> {
    if old_image != new_image || old_depth != new_depth {
        return Err(RenderError::UnsupportedFormat(format!(
            "swap chain format changed on recreation ({old_image:?}/{old_depth:?} -> {new_image:?}/{new_depth:?})"
        )));
    }
    Ok(())
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub image_format: vk::Format,
    pub depth_format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub frame_sync: Vec<FrameSync>,
    /// Fence of the frame that last rendered to each image, null if none.
    pub images_in_flight: Vec<vk::Fence>,
    pub current_frame: usize,
}

impl Swapchain {
    pub unsafe fn new(ctx: &VulkanContext, surface: &VulkanSurface, desired: vk::Extent2D) -> RenderResult<Self> {
        let (handle, extent) = Self::create_handle(ctx, surface, desired, vk::SwapchainKHR::null())?;
        let (images, image_views) = Self::create_images(ctx, handle, surface.format.format)?;
        let frame_sync = Self::create_sync_objects(ctx)?;
        let depth_format = ctx.find_depth_format()?;

        log::info!(
            "Swapchain created: {}x{} {:?} {:?}, {} images",
            extent.width,
            extent.height,
            surface.format.format,
            surface.present_mode,
            images.len()
        );

        Ok(Self {
            handle,
            images_in_flight: vec![vk::Fence::null(); images.len()],
            images,
            image_views,
            image_format: surface.format.format,
            depth_format,
            extent,
            present_mode: surface.present_mode,
            frame_sync,
            current_frame: 0,
        })
    }

    unsafe fn create_handle(
        ctx: &VulkanContext,
        surface: &VulkanSurface,
        desired: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<(vk::SwapchainKHR, vk::Extent2D)> {
        let extent = surface.extent(desired);

        let caps = &surface.capabilities;
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let family_indices = [ctx.graphics_family, ctx.present_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface.format.format)
            .image_color_space(surface.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(surface.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if ctx.graphics_present_split() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let handle = ctx
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .context("[Sumire::Swapchain] Failed to create swap chain.")?;

        Ok((handle, extent))
    }

    unsafe fn create_images(
        ctx: &VulkanContext,
        handle: vk::SwapchainKHR,
        format: vk::Format,
    ) -> RenderResult<(Vec<vk::Image>, Vec<vk::ImageView>)> {
        let images = ctx
            .swapchain_loader
            .get_swapchain_images(handle)
            .context("[Sumire::Swapchain] Failed to get swap chain images.")?;

        let image_views = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                ctx.device
                    .create_image_view(&create_info, None)
                    .context("[Sumire::Swapchain] Failed to create swap chain image view.")
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok((images, image_views))
    }

    unsafe fn create_sync_objects(ctx: &VulkanContext) -> RenderResult<Vec<FrameSync>> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| {
                Ok(FrameSync {
                    image_available: ctx
                        .device
                        .create_semaphore(&semaphore_info, None)
                        .context("[Sumire::Swapchain] Failed to create swap chain wait semaphores.")?,
                    render_finished: ctx
                        .device
                        .create_semaphore(&semaphore_info, None)
                        .context("[Sumire::Swapchain] Failed to create swap chain signaling semaphores.")?,
                    in_flight: ctx
                        .device
                        .create_fence(&fence_info, None)
                        .context("[Sumire::Swapchain] Failed to create swap chain frame fences.")?,
                })
            })
            .collect()
    }

    /// Wait for the current frame slot, then acquire the next image.
    pub unsafe fn acquire_next_image(&mut self, ctx: &VulkanContext) -> RenderResult<AcquireOutcome> {
        let sync = &self.frame_sync[self.current_frame];

        ctx.device
            .wait_for_fences(&[sync.in_flight], true, u64::MAX)
            .context("[Sumire::Swapchain] Failed to wait for frame fence.")?;

        let result = ctx
            .swapchain_loader
            .acquire_next_image(self.handle, u64::MAX, sync.image_available, vk::Fence::null());

        classify_acquire(result)
    }

    /// Block until no earlier frame still renders to `image_index`, claim it
    /// for the current frame, and return the reset fence to submit with.
    pub unsafe fn claim_image(&mut self, ctx: &VulkanContext, image_index: u32) -> RenderResult<vk::Fence> {
        let in_flight = self.frame_sync[self.current_frame].in_flight;
        let previous = self.images_in_flight[image_index as usize];

        if previous != vk::Fence::null() {
            ctx.device
                .wait_for_fences(&[previous], true, u64::MAX)
                .context("[Sumire::Swapchain] Failed to wait for image fence.")?;
        }
        self.images_in_flight[image_index as usize] = in_flight;

        ctx.device
            .reset_fences(&[in_flight])
            .context("[Sumire::Swapchain] Failed to reset frame fence.")?;

        Ok(in_flight)
    }

    /// Present `image_index` once the current frame's render-finished semaphore signals.
    pub unsafe fn present(&mut self, ctx: &VulkanContext, image_index: u32) -> RenderResult<PresentOutcome> {
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let wait_semaphores = [self.frame_sync[self.current_frame].render_finished];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = ctx.swapchain_loader.queue_present(ctx.present_queue, &present_info);
        classify_present(result)
    }

    /// Move to the next frame slot.
    pub fn advance_frame(&mut self) {
        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
    }

    pub fn current_sync(&self) -> &FrameSync {
        &self.frame_sync[self.current_frame]
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Rebuild with the old swapchain as base. Sync objects are kept.
    pub unsafe fn recreate(
        &mut self,
        ctx: &VulkanContext,
        surface: &VulkanSurface,
        desired: vk::Extent2D,
    ) -> RenderResult<()> {
        ctx.wait_idle()?;

        let (handle, extent) = Self::create_handle(ctx, surface, desired, self.handle)?;

        for view in self.image_views.drain(..) {
            ctx.device.destroy_image_view(view, None);
        }
        ctx.swapchain_loader.destroy_swapchain(self.handle, None);
        self.handle = handle;

        let depth_format = ctx.find_depth_format()?;
        ensure_formats_unchanged(self.image_format, self.depth_format, surface.format.format, depth_format)?;

        let (images, image_views) = Self::create_images(ctx, handle, surface.format.format)?;
        self.images_in_flight = vec![vk::Fence::null(); images.len()];
        self.images = images;
        self.image_views = image_views;
        self.extent = extent;
        self.present_mode = surface.present_mode;

        log::info!(
            "Swapchain recreated: {}x{} {:?}",
            extent.width,
            extent.height,
            surface.present_mode
        );

        Ok(())
    }

    pub unsafe fn destroy(&mut self, ctx: &VulkanContext) {
        for sync in self.frame_sync.drain(..) {
            ctx.device.destroy_semaphore(sync.image_available, None);
            ctx.device.destroy_semaphore(sync.render_finished, None);
            ctx.device.destroy_fence(sync.in_flight, None);
        }

        for view in self.image_views.drain(..) {
            ctx.device.destroy_image_view(view, None);
        }

        ctx.swapchain_loader.destroy_swapchain(self.handle, None);
        self.handle = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_classification() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired { image_index: 2, suboptimal: false }
        );
        assert_eq!(
            classify_acquire(Ok((1, true))).unwrap(),
            AcquireOutcome::Acquired { image_index: 1, suboptimal: true }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::Stale
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn test_present_classification() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Stale);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale
        );
        let err = classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap_err();
        assert!(err.to_string().starts_with("[Sumire::Swapchain]"));
    }

    #[test]
    fn test_format_change_rejected() {
        let srgb = vk::Format::B8G8R8A8_SRGB;
        let d32 = vk::Format::D32_SFLOAT;
        assert!(ensure_formats_unchanged(srgb, d32, srgb, d32).is_ok());
        assert!(matches!(
            ensure_formats_unchanged(srgb, d32, vk::Format::B8G8R8A8_UNORM, d32),
            Err(RenderError::UnsupportedFormat(_))
        ));
        assert!(ensure_formats_unchanged(srgb, d32, srgb, vk::Format::D24_UNORM_S8_UINT).is_err());
    }
}
