//! Vulkan context: instance, surface, physical device, logical device, and queues.

use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::os::raw::c_char;

use super::{APP_NAME, ENGINE_NAME, ENGINE_VERSION, REQUIRED_VK_VERSION};
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices found during device selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    /// Dedicated compute family, if the device has one.
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Pick families from `(queue flags, supports present)` per family.
    ///
    /// Presentation prefers the graphics family; compute prefers a family
    /// without graphics support.
    pub fn select(families: &[(vk::QueueFlags, bool)]) -> Self {
        let mut indices = Self::default();

        for (i, &(flags, present)) in families.iter().enumerate() {
            let i = i as u32;
            let graphics = flags.contains(vk::QueueFlags::GRAPHICS);

            if graphics && indices.graphics.is_none() {
                indices.graphics = Some(i);
                if present {
                    indices.present = Some(i);
                }
            }

            if present && indices.present.is_none() {
                indices.present = Some(i);
            }

            if flags.contains(vk::QueueFlags::COMPUTE) && !graphics && indices.compute.is_none() {
                indices.compute = Some(i);
            }
        }

        indices
    }

    /// Compute family with the graphics fallback applied.
    pub fn compute_or_graphics(&self) -> Option<u32> {
        self.compute.or(self.graphics)
    }
}

/// Instance, device and the three queues the frame chain submits to.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,

    pub graphics_family: u32,
    pub compute_family: u32,
    pub present_family: u32,

    pub graphics_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub surface_loader: surface::Instance,
    pub swapchain_loader: swapchain::Device,

    pub device_properties: vk::PhysicalDeviceProperties,

    #[cfg(debug_assertions)]
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    #[cfg(debug_assertions)]
    debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
}

impl VulkanContext {
    /// Create the instance, the window surface and a device that can present to it.
    ///
    /// # Safety
    /// The window handles must be valid and outlive the context.
    pub unsafe fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        enable_validation: bool,
    ) -> RenderResult<Self> {
        let entry = Entry::linked();

        let api_version = entry
            .try_enumerate_instance_version()
            .context("[Sumire::Device] Failed to enumerate instance version.")?
            .unwrap_or(vk::API_VERSION_1_0);

        if api_version < REQUIRED_VK_VERSION {
            return Err(RenderError::vulkan(
                format!(
                    "[Sumire::Device] Vulkan 1.3 required, but only {}.{}.{} available.",
                    vk::api_version_major(api_version),
                    vk::api_version_minor(api_version),
                    vk::api_version_patch(api_version)
                ),
                vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            ));
        }

        let instance = Self::create_instance(&entry, display_handle, enable_validation)?;

        #[cfg(debug_assertions)]
        let (debug_utils_loader, debug_messenger) = if enable_validation {
            Self::setup_debug_messenger(&entry, &instance)?
        } else {
            (None, None)
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
            .context("[Sumire::Device] Failed to create window surface.")?;

        let (physical_device, queue_families) = Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let device_properties = instance.get_physical_device_properties(physical_device);

        let (graphics_family, present_family) = match (queue_families.graphics, queue_families.present) {
            (Some(g), Some(p)) => (g, p),
            _ => {
                return Err(RenderError::vulkan(
                    "[Sumire::Device] Selected GPU has no graphics/present queue family.",
                    vk::Result::ERROR_FEATURE_NOT_PRESENT,
                ))
            }
        };
        let compute_family = queue_families.compute.unwrap_or(graphics_family);

        let device = Self::create_logical_device(
            &instance,
            physical_device,
            &[graphics_family, compute_family, present_family],
        )?;

        let graphics_queue = device.get_device_queue(graphics_family, 0);
        let compute_queue = device.get_device_queue(compute_family, 0);
        let present_queue = device.get_device_queue(present_family, 0);

        let swapchain_loader = swapchain::Device::new(&instance, &device);

        log::info!(
            "Queue families: graphics {}, compute {}{}, present {}",
            graphics_family,
            compute_family,
            if queue_families.compute.is_some() { "" } else { " (graphics fallback)" },
            present_family
        );

        Ok(Self {
            entry,
            instance,
            surface,
            physical_device,
            device,
            graphics_family,
            compute_family,
            present_family,
            graphics_queue,
            compute_queue,
            present_queue,
            surface_loader,
            swapchain_loader,
            device_properties,
            #[cfg(debug_assertions)]
            debug_messenger,
            #[cfg(debug_assertions)]
            debug_utils_loader,
        })
    }

    unsafe fn create_instance(
        entry: &Entry,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> RenderResult<Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(ENGINE_VERSION)
            .api_version(REQUIRED_VK_VERSION);

        #[allow(unused_mut)]
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("[Sumire::Device] Failed to get required surface extensions.")?
            .to_vec();

        #[cfg(debug_assertions)]
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names: Vec<*const c_char> = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        entry
            .create_instance(&create_info, None)
            .context("[Sumire::Device] Failed to create Vulkan instance.")
    }

    #[cfg(debug_assertions)]
    unsafe fn setup_debug_messenger(
        entry: &Entry,
        instance: &Instance,
    ) -> RenderResult<(Option<ash::ext::debug_utils::Instance>, Option<vk::DebugUtilsMessengerEXT>)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = debug_utils
            .create_debug_utils_messenger(&create_info, None)
            .context("[Sumire::Device] Failed to create debug messenger.")?;

        Ok((Some(debug_utils), Some(messenger)))
    }

    unsafe fn pick_physical_device(
        instance: &Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = instance
            .enumerate_physical_devices()
            .context("[Sumire::Device] Failed to enumerate physical devices.")?;

        let best = devices
            .iter()
            .filter_map(|&device| {
                let score = Self::rate_device(instance, device, surface_loader, surface);
                (score > 0).then_some((device, score))
            })
            .max_by_key(|&(_, score)| score);

        let Some((physical_device, _)) = best else {
            return Err(RenderError::vulkan(
                "[Sumire::Device] Failed to find a suitable GPU.",
                vk::Result::ERROR_INITIALIZATION_FAILED,
            ));
        };

        let queue_families = Self::find_queue_families(instance, physical_device, surface_loader, surface);

        let props = instance.get_physical_device_properties(physical_device);
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        log::info!("Selected GPU: {}", name);

        Ok((physical_device, queue_families))
    }

    /// Rate a physical device (higher is better, 0 is unusable).
    unsafe fn rate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> u64 {
        let queue_families = Self::find_queue_families(instance, device, surface_loader, surface);
        if !queue_families.is_complete() {
            return 0;
        }

        let has_swapchain = instance
            .enumerate_device_extension_properties(device)
            .map(|exts| {
                exts.iter()
                    .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
            })
            .unwrap_or(false);
        if !has_swapchain {
            return 0;
        }

        let props = instance.get_physical_device_properties(device);
        let mut score = 1u64;
        if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 10000;
        } else if props.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 1000;
        }

        let memory_props = instance.get_physical_device_memory_properties(device);
        for heap in &memory_props.memory_heaps[..memory_props.memory_heap_count as usize] {
            if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
                score += heap.size / (1024 * 1024);
            }
        }

        score
    }

    unsafe fn find_queue_families(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> QueueFamilyIndices {
        let families: Vec<_> = instance
            .get_physical_device_queue_family_properties(device)
            .iter()
            .enumerate()
            .map(|(i, family)| {
                let present = surface_loader
                    .get_physical_device_surface_support(device, i as u32, surface)
                    .unwrap_or(false);
                (family.queue_flags, present)
            })
            .collect();

        QueueFamilyIndices::select(&families)
    }

    unsafe fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        families: &[u32],
    ) -> RenderResult<Device> {
        let mut unique_families: Vec<u32> = Vec::with_capacity(families.len());
        for &family in families {
            if !unique_families.contains(&family) {
                unique_families.push(family);
            }
        }

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: [*const c_char; 1] = [swapchain::NAME.as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&device_features);

        instance
            .create_device(physical_device, &create_info, None)
            .context("[Sumire::Device] Failed to create logical device.")
    }

    /// First candidate whose tiling features contain `features`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RenderResult<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let props = unsafe {
                    self.instance
                        .get_physical_device_format_properties(self.physical_device, format)
                };
                let supported = match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features,
                    _ => props.optimal_tiling_features,
                };
                supported.contains(features)
            })
            .ok_or_else(|| RenderError::UnsupportedFormat(format!("none of {candidates:?} support {features:?}")))
    }

    pub fn find_depth_format(&self) -> RenderResult<vk::Format> {
        self.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// True when graphics work and presentation run on different families.
    pub fn graphics_present_split(&self) -> bool {
        self.graphics_family != self.present_family
    }

    /// Block until every queue on the device is idle.
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.context("[Sumire::Device] Failed to wait for device idle.")
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            #[cfg(debug_assertions)]
            if let (Some(loader), Some(messenger)) = (&self.debug_utils_loader, self.debug_messenger) {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Routes validation layer messages into the log.
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[VK] {}", message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[VK] {}", message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
    const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;

    #[test]
    fn test_dedicated_compute_family_preferred() {
        let families = [(G | C | T, true), (C | T, false), (T, false)];
        let idx = QueueFamilyIndices::select(&families);
        assert_eq!(idx.graphics, Some(0));
        assert_eq!(idx.present, Some(0));
        assert_eq!(idx.compute, Some(1));
        assert_eq!(idx.compute_or_graphics(), Some(1));
    }

    #[test]
    fn test_compute_falls_back_to_graphics() {
        let families = [(G | C | T, true)];
        let idx = QueueFamilyIndices::select(&families);
        assert_eq!(idx.compute, None);
        assert_eq!(idx.compute_or_graphics(), Some(0));
        assert!(idx.is_complete());
    }

    #[test]
    fn test_separate_present_family() {
        let families = [(G | C, false), (T, true)];
        let idx = QueueFamilyIndices::select(&families);
        assert_eq!(idx.graphics, Some(0));
        assert_eq!(idx.present, Some(1));
    }
}
