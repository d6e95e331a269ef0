//! Buffer and image allocation backed by gpu-allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

use super::VulkanContext;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Buffer handle with its allocation and optional host mapping.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Host pointer for CPU-visible buffers.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation.as_ref().and_then(|a| a.mapped_ptr()).map(|p| p.as_ptr() as *mut u8)
    }

    /// Copy `data` to the start of a host-visible buffer.
    pub fn write_bytes(&self, data: &[u8]) -> RenderResult<()> {
        if data.len() as vk::DeviceSize > self.size {
            return Err(RenderError::allocation(format!(
                "write of {} bytes exceeds buffer size {}",
                data.len(),
                self.size
            )));
        }

        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| RenderError::allocation("buffer is not host visible"))?;

        // SAFETY: the mapping is live for the allocation's lifetime and the
        // length was checked against the buffer size above.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        }
        Ok(())
    }
}

/// GPU image with a single-level default view.
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

impl Image {
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

/// View aspect for a format; depth-stencil formats view only the depth plane.
pub fn aspect_mask_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM
        | vk::Format::D32_SFLOAT
        | vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect for barriers on the whole image: both planes of a depth-stencil format.
pub fn barrier_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil_component(format) {
        aspect_mask_for(format) | vk::ImageAspectFlags::STENCIL
    } else {
        aspect_mask_for(format)
    }
}

/// Shared allocator for every buffer and image the renderer creates.
pub struct MemoryManager {
    allocator: Arc<Mutex<Allocator>>,
    device: ash::Device,
}

impl MemoryManager {
    pub unsafe fn new(ctx: &VulkanContext) -> RenderResult<Self> {
        let mut debug_settings = gpu_allocator::AllocatorDebugSettings::default();
        debug_settings.log_memory_information = cfg!(debug_assertions);
        debug_settings.log_leaks_on_shutdown = true;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            device: ctx.device.clone(),
        })
    }

    /// Buffer of `size` bytes with `usage`, allocated in `location`.
    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> RenderResult<Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = self
            .device
            .create_buffer(&buffer_info, None)
            .context(&format!("[Sumire::MemoryManager] Failed to create buffer '{name}'."))?;

        let requirements = self.device.get_buffer_memory_requirements(handle);

        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(a) => a,
            Err(e) => {
                self.device.destroy_buffer(handle, None);
                return Err(e.into());
            }
        };

        self.device
            .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
            .context(&format!("[Sumire::MemoryManager] Failed to bind memory for buffer '{name}'."))?;

        Ok(Buffer {
            handle,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Device-local storage buffer written and read only by shaders.
    pub unsafe fn create_storage_buffer(&self, size: vk::DeviceSize, name: &str) -> RenderResult<Buffer> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )
    }

    /// Persistently mapped storage buffer the CPU rewrites every frame.
    pub unsafe fn create_host_storage_buffer(&self, size: vk::DeviceSize, name: &str) -> RenderResult<Buffer> {
        self.create_buffer(size, vk::BufferUsageFlags::STORAGE_BUFFER, MemoryLocation::CpuToGpu, name)
    }

    /// Create a 2D single-mip image with a matching view.
    pub unsafe fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        name: &str,
    ) -> RenderResult<Image> {
        let extent = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = self
            .device
            .create_image(&image_info, None)
            .context(&format!("[Sumire::MemoryManager] Failed to create image '{name}'."))?;

        let requirements = self.device.get_image_memory_requirements(handle);

        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(a) => a,
            Err(e) => {
                self.device.destroy_image(handle, None);
                return Err(e.into());
            }
        };

        self.device
            .bind_image_memory(handle, allocation.memory(), allocation.offset())
            .context(&format!("[Sumire::MemoryManager] Failed to bind memory for image '{name}'."))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask_for(format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = self
            .device
            .create_image_view(&view_info, None)
            .context(&format!("[Sumire::MemoryManager] Failed to create view for image '{name}'."))?;

        Ok(Image {
            handle,
            view,
            allocation: Some(allocation),
            format,
            extent,
        })
    }

    pub unsafe fn destroy_buffer(&self, buffer: Buffer) {
        self.device.destroy_buffer(buffer.handle, None);
        if let Some(allocation) = buffer.allocation {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::warn!("Failed to free buffer allocation: {e}");
            }
        }
    }

    pub unsafe fn destroy_image(&self, image: Image) {
        self.device.destroy_image_view(image.view, None);
        self.device.destroy_image(image.handle, None);
        if let Some(allocation) = image.allocation {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::warn!("Failed to free image allocation: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats_use_depth_aspect() {
        assert_eq!(aspect_mask_for(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_mask_for(vk::Format::D32_SFLOAT_S8_UINT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_mask_for(vk::Format::D24_UNORM_S8_UINT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_mask_for(vk::Format::R16_UNORM), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_mask_for(vk::Format::R16G16B16A16_SFLOAT), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_stencil_detection() {
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_barriers_cover_stencil_plane() {
        assert_eq!(
            barrier_aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            barrier_aspect_mask(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(barrier_aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(barrier_aspect_mask(vk::Format::R16_UNORM), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_write_rejects_unmapped_buffer() {
        let buffer = Buffer {
            handle: vk::Buffer::null(),
            allocation: None,
            size: 16,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
        };
        assert!(buffer.write_bytes(&[0u8; 8]).is_err());
        assert!(matches!(buffer.write_bytes(&[0u8; 32]), Err(RenderError::Allocation(_))));
    }
}
