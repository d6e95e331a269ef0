//! Screen-sized images: gbuffer, per-frame intermediate color and the HZB.
//!
//! All of them are rebuilt whenever the swapchain extent changes.

use ash::vk;

use super::render_passes::GBUFFER_COLOR_FORMATS;
use crate::error::{RenderError, RenderResult};
use crate::vulkan::{Image, MemoryManager, VulkanContext, MAX_FRAMES_IN_FLIGHT};

/// Scene color written by the late graphics pass and post-processed in place.
pub const INTERMEDIATE_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_UNORM;

pub const INTERMEDIATE_COLOR_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw(),
);

pub const INTERMEDIATE_COLOR_FEATURES: vk::FormatFeatureFlags = vk::FormatFeatureFlags::from_raw(
    vk::FormatFeatureFlags::STORAGE_IMAGE.as_raw()
        | vk::FormatFeatureFlags::COLOR_ATTACHMENT.as_raw()
        | vk::FormatFeatureFlags::SAMPLED_IMAGE.as_raw(),
);

pub const GBUFFER_COLOR_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::INPUT_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw(),
);

pub const DEPTH_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::INPUT_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw(),
);

/// Hierarchical z-buffer, one level at full z-buffer resolution.
pub const HZB_FORMAT: vk::Format = vk::Format::R16_UNORM;

pub const HZB_USAGE: vk::ImageUsageFlags =
    vk::ImageUsageFlags::from_raw(vk::ImageUsageFlags::STORAGE.as_raw() | vk::ImageUsageFlags::SAMPLED.as_raw());

const GBUFFER_NAMES: [&str; 4] = [
    "gbuffer position",
    "gbuffer normal",
    "gbuffer albedo",
    "gbuffer ao metal rough",
];

/// Deferred geometry targets shared by every frame in flight.
pub struct GBuffer {
    pub colors: [Image; 4],
    pub depth: Image,
}

impl GBuffer {
    pub unsafe fn new(memory: &MemoryManager, extent: vk::Extent2D, depth_format: vk::Format) -> RenderResult<Self> {
        let [position, normal, albedo, ao] = GBUFFER_NAMES;
        let colors = [
            memory.create_image(extent, GBUFFER_COLOR_FORMATS[0], GBUFFER_COLOR_USAGE, position)?,
            memory.create_image(extent, GBUFFER_COLOR_FORMATS[1], GBUFFER_COLOR_USAGE, normal)?,
            memory.create_image(extent, GBUFFER_COLOR_FORMATS[2], GBUFFER_COLOR_USAGE, albedo)?,
            memory.create_image(extent, GBUFFER_COLOR_FORMATS[3], GBUFFER_COLOR_USAGE, ao)?,
        ];
        let depth = memory.create_image(extent, depth_format, DEPTH_USAGE, "gbuffer depth")?;

        log::debug!("Gbuffer created at {}x{}", extent.width, extent.height);
        Ok(Self { colors, depth })
    }

    pub fn position(&self) -> &Image {
        &self.colors[0]
    }

    /// Color views followed by depth, in gbuffer pass attachment order.
    pub fn attachment_views(&self) -> [vk::ImageView; 5] {
        [
            self.colors[0].view,
            self.colors[1].view,
            self.colors[2].view,
            self.colors[3].view,
            self.depth.view,
        ]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.depth.extent_2d()
    }

    pub unsafe fn destroy(self, memory: &MemoryManager) {
        for image in self.colors {
            memory.destroy_image(image);
        }
        memory.destroy_image(self.depth);
    }
}

/// Fail unless optimal tiling supports storage, attachment and sampling.
pub fn ensure_intermediate_color_supported(ctx: &VulkanContext) -> RenderResult<()> {
    ctx.find_supported_format(
        &[INTERMEDIATE_COLOR_FORMAT],
        vk::ImageTiling::OPTIMAL,
        INTERMEDIATE_COLOR_FEATURES,
    )
    .map(|_| ())
    .map_err(|_| {
        RenderError::UnsupportedFormat(format!(
            "{INTERMEDIATE_COLOR_FORMAT:?} lacks {INTERMEDIATE_COLOR_FEATURES:?} for the intermediate color attachment"
        ))
    })
}

/// One intermediate color image per frame in flight.
pub unsafe fn create_intermediate_colors(
    ctx: &VulkanContext,
    memory: &MemoryManager,
    extent: vk::Extent2D,
) -> RenderResult<Vec<Image>> {
    ensure_intermediate_color_supported(ctx)?;

    (0..MAX_FRAMES_IN_FLIGHT)
        .map(|i| {
            memory.create_image(
                extent,
                INTERMEDIATE_COLOR_FORMAT,
                INTERMEDIATE_COLOR_USAGE,
                &format!("intermediate color {i}"),
            )
        })
        .collect()
}

pub unsafe fn create_hzb(memory: &MemoryManager, extent: vk::Extent2D) -> RenderResult<Image> {
    memory.create_image(extent, HZB_FORMAT, HZB_USAGE, "hzb")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediate_usage_covers_compute_writes() {
        assert!(INTERMEDIATE_COLOR_USAGE.contains(vk::ImageUsageFlags::STORAGE));
        assert!(INTERMEDIATE_COLOR_USAGE.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(INTERMEDIATE_COLOR_FEATURES.contains(vk::FormatFeatureFlags::STORAGE_IMAGE));
    }

    #[test]
    fn test_gbuffer_targets_readable_as_inputs() {
        for usage in [GBUFFER_COLOR_USAGE, DEPTH_USAGE] {
            assert!(usage.contains(vk::ImageUsageFlags::INPUT_ATTACHMENT));
            assert!(usage.contains(vk::ImageUsageFlags::SAMPLED));
        }
        assert!(HZB_USAGE.contains(vk::ImageUsageFlags::STORAGE));
    }
}
