//! Thin Vulkan layer: device, surface, swapchain, memory, commands and pipelines.

pub mod commands;
pub mod context;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;

pub use commands::{
    layout_transition_masks, transition_image_layout, CommandPools, CommandRecording, QueueRole, TransitionMasks,
};
pub use context::{QueueFamilyIndices, VulkanContext};
pub use memory::{Buffer, Image, MemoryManager};
pub use pipeline::BoundPipeline;
pub use surface::VulkanSurface;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain, MAX_FRAMES_IN_FLIGHT};

use ash::vk;
use std::ffi::CStr;

pub const REQUIRED_VK_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

pub const APP_NAME: &CStr = c"Sumire";

pub const ENGINE_NAME: &CStr = c"Sumire Engine";

pub const ENGINE_VERSION: u32 = vk::make_api_version(0, 0, 1, 0);
