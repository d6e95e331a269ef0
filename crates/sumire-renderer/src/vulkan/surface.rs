//! Surface capability queries and format / present mode selection.

use ash::vk;

use super::VulkanContext;
use crate::error::{RenderResult, VkResultExt};

/// Snapshot of what the window surface supports.
pub struct VulkanSurface {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl VulkanSurface {
    pub unsafe fn query(ctx: &VulkanContext, vsync: bool) -> RenderResult<Self> {
        let capabilities = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
            .context("[Sumire::Swapchain] Failed to get surface capabilities.")?;

        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
            .context("[Sumire::Swapchain] Failed to get surface formats.")?;

        let present_modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
            .context("[Sumire::Swapchain] Failed to get present modes.")?;

        Ok(Self {
            format: choose_surface_format(&formats),
            present_mode: choose_present_mode(&present_modes, vsync),
            capabilities,
            present_modes,
        })
    }

    /// Current extent, or the desired one clamped to the surface limits.
    pub fn extent(&self, desired: vk::Extent2D) -> vk::Extent2D {
        choose_extent(&self.capabilities, desired)
    }
}

/// Prefer 8-bit sRGB BGRA; otherwise the first advertised format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
}

/// FIFO with vsync; otherwise mailbox, then immediate, then FIFO.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }

    if modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        return vk::PresentModeKHR::IMMEDIATE;
    }

    vk::PresentModeKHR::FIFO
}

pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired
                .width
                .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: desired
                .height
                .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_selection() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&all[..2], false), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(choose_present_mode(&all[..1], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_surface_format_prefers_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choose_surface_format(&formats[..1]).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_extent_clamped_when_undefined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        };
        let e = choose_extent(&caps, vk::Extent2D { width: 5000, height: 600 });
        assert_eq!((e.width, e.height), (4096, 600));
    }
}
