//! Renderer error handling.
//!
//! Every native Vulkan failure is fatal and carries a component-prefixed
//! message such as `[Sumire::Renderer] Failed to submit present command buffer.`
//! Swapchain staleness is not an error; see `AcquireOutcome` and `PresentOutcome`.

use ash::vk;
use std::path::PathBuf;

/// Errors that can occur while building or driving the renderer.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// Unexpected Vulkan result from a creation or submission call.
    #[error("{context} ({result:?})")]
    Vulkan {
        context: String,
        result: vk::Result,
    },

    /// Memory allocator failure.
    #[error("Allocation error: {0}")]
    Allocation(String),

    /// Layout transition outside the supported table.
    #[error("Unsupported image layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// More lights than the light mask can address.
    #[error("Light count {count} exceeds light mask capacity of {capacity}")]
    LightCapacityExceeded { count: usize, capacity: usize },

    /// Missing format support or a format that changed under us.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// `next_subpass` called past the last subpass.
    #[error("Subpass index {current} out of range for render pass with {count} subpasses")]
    SubpassOutOfRange { current: u32, count: u32 },

    /// SPIR-V could not be read or parsed.
    #[error("Failed to load shader {path:?}: {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Window or surface handle problem.
    #[error("Window error: {0}")]
    Window(String),
}

impl RenderError {
    pub fn vulkan<T: ToString>(context: T, result: vk::Result) -> Self {
        RenderError::Vulkan { context: context.to_string(), result }
    }

    pub fn allocation<T: ToString>(msg: T) -> Self {
        RenderError::Allocation(msg.to_string())
    }

    /// True for failures a caller can never recover from by rebuilding.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::LightCapacityExceeded { .. })
    }
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Attach a component-prefixed message to a raw Vulkan result.
pub trait VkResultExt<T> {
    fn context(self, msg: &str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn context(self, msg: &str) -> RenderResult<T> {
        self.map_err(|result| RenderError::vulkan(msg, result))
    }
}

impl From<gpu_allocator::AllocationError> for RenderError {
    fn from(e: gpu_allocator::AllocationError) -> Self {
        RenderError::Allocation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_error_keeps_component_prefix() {
        let res: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = res
            .context("[Sumire::HighQualityShadowMapper] Failed to create zBin buffer.")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("[Sumire::HighQualityShadowMapper]"));
        assert!(msg.contains("ERROR_OUT_OF_DEVICE_MEMORY"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_layout_transition_error_is_distinct() {
        let err = RenderError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        assert!(matches!(err, RenderError::UnsupportedLayoutTransition { .. }));
        assert!(err.to_string().contains("PRESENT_SRC_KHR"));
    }

    #[test]
    fn test_capacity_error_not_fatal() {
        let err = RenderError::LightCapacityExceeded { count: 1025, capacity: 1024 };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("1025"));
    }
}
