//! Global descriptor set: camera uniforms and the light storage buffer.
//!
//! Bound at set 0 by every pipeline that needs scene-wide data, including
//! the deferred shadow generation pass.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use gpu_allocator::MemoryLocation;

use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::scene::{Camera, LightMap, LightShaderData};
use crate::shadow::{sort_lights_by_view_space_depth, LIGHT_MASK_CAPACITY};
use crate::vulkan::{Buffer, MemoryManager, MAX_FRAMES_IN_FLIGHT};

/// Camera block at binding 0 (std140).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GlobalUniforms {
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub inverse_view: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub near: f32,
    pub far: f32,
    pub num_lights: u32,
    pub _pad: u32,
}

impl GlobalUniforms {
    pub fn new(camera: &Camera, num_lights: u32) -> Self {
        let view = camera.view();
        Self {
            projection: camera.projection().to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            inverse_view: view.inverse().to_cols_array_2d(),
            inverse_projection: camera.inverse_projection().to_cols_array_2d(),
            near: camera.near(),
            far: camera.far(),
            num_lights,
            _pad: 0,
        }
    }
}

/// Light records in the order the shadow mapper indexes them.
///
/// zBin and light-mask indices refer to positions in the view-depth sorted
/// list, so the storage buffer is uploaded in that same order.
pub fn sorted_light_data(lights: &LightMap, camera: &Camera) -> RenderResult<Vec<LightShaderData>> {
    if lights.len() > LIGHT_MASK_CAPACITY {
        return Err(RenderError::LightCapacityExceeded {
            count: lights.len(),
            capacity: LIGHT_MASK_CAPACITY,
        });
    }

    Ok(sort_lights_by_view_space_depth(lights, camera.view())
        .iter()
        .map(|light| light.light.shader_data())
        .collect())
}

struct FrameGlobals {
    uniforms: Buffer,
    lights: Buffer,
    descriptor_set: vk::DescriptorSet,
}

pub struct GlobalResources {
    pub set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    frames: Vec<FrameGlobals>,
}

impl GlobalResources {
    pub unsafe fn new(device: &ash::Device, memory: &MemoryManager) -> RenderResult<Self> {
        let stages = vk::ShaderStageFlags::ALL;
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(stages),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(stages),
        ];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = device
            .create_descriptor_set_layout(&layout_info, None)
            .context("[Sumire::Renderer] Failed to create global descriptor set layout.")?;

        let frame_count = MAX_FRAMES_IN_FLIGHT as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: frame_count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: frame_count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(frame_count)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = device
            .create_descriptor_pool(&pool_info, None)
            .context("[Sumire::Renderer] Failed to create global descriptor pool.")?;

        let layouts = vec![set_layout; MAX_FRAMES_IN_FLIGHT];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&layouts);
        let sets = device
            .allocate_descriptor_sets(&alloc_info)
            .context("[Sumire::Renderer] Failed to allocate global descriptor sets.")?;

        let light_buffer_size = (LIGHT_MASK_CAPACITY * std::mem::size_of::<LightShaderData>()) as vk::DeviceSize;

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for (i, descriptor_set) in sets.into_iter().enumerate() {
            let uniforms = memory.create_buffer(
                std::mem::size_of::<GlobalUniforms>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("global uniforms {i}"),
            )?;
            let lights = memory.create_host_storage_buffer(light_buffer_size, &format!("global lights {i}"))?;

            let uniform_info = [vk::DescriptorBufferInfo {
                buffer: uniforms.handle,
                offset: 0,
                range: vk::WHOLE_SIZE,
            }];
            let light_info = [vk::DescriptorBufferInfo {
                buffer: lights.handle,
                offset: 0,
                range: vk::WHOLE_SIZE,
            }];
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&uniform_info),
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(&light_info),
            ];
            device.update_descriptor_sets(&writes, &[]);

            frames.push(FrameGlobals {
                uniforms,
                lights,
                descriptor_set,
            });
        }

        log::debug!("Global descriptor sets created for {} frames", frames.len());

        Ok(Self {
            set_layout,
            descriptor_pool,
            frames,
        })
    }

    pub fn descriptor_set(&self, frame: usize) -> vk::DescriptorSet {
        self.frames[frame].descriptor_set
    }

    /// Upload camera and lights for `frame`.
    pub fn update(&self, frame: usize, camera: &Camera, lights: &LightMap) -> RenderResult<()> {
        let light_data = sorted_light_data(lights, camera)?;
        let uniforms = GlobalUniforms::new(camera, light_data.len() as u32);

        let frame = &self.frames[frame];
        frame.uniforms.write_bytes(bytemuck::bytes_of(&uniforms))?;
        frame.lights.write_bytes(bytemuck::cast_slice(&light_data))
    }

    pub unsafe fn destroy(self, device: &ash::Device, memory: &MemoryManager) {
        for frame in self.frames {
            memory.destroy_buffer(frame.uniforms);
            memory.destroy_buffer(frame.lights);
        }
        device.destroy_descriptor_pool(self.descriptor_pool, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Light;
    use glam::Vec3;

    fn camera() -> Camera {
        let mut camera = Camera::perspective(50f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        camera.set_view_direction(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        camera
    }

    #[test]
    fn test_uniform_block_size() {
        // Four matrices plus one vec4 worth of scalars.
        assert_eq!(std::mem::size_of::<GlobalUniforms>(), 4 * 64 + 16);
    }

    #[test]
    fn test_lights_uploaded_in_view_depth_order() {
        let mut lights = LightMap::new();
        lights.insert(0, Light::point(Vec3::new(0.0, 0.0, -40.0), 1.0));
        lights.insert(1, Light::point(Vec3::new(0.0, 0.0, -5.0), 1.0));
        lights.insert(2, Light::point(Vec3::new(0.0, 0.0, -20.0), 1.0));

        let data = sorted_light_data(&lights, &camera()).unwrap();
        let z: Vec<f32> = data.iter().map(|d| d.translation[2]).collect();
        assert_eq!(z, vec![-5.0, -20.0, -40.0]);
    }

    #[test]
    fn test_light_upload_rejects_overflow() {
        let lights: LightMap = (0..=LIGHT_MASK_CAPACITY as u32)
            .map(|id| (id, Light::point(Vec3::new(0.0, 0.0, -1.0), 1.0)))
            .collect();
        assert!(matches!(
            sorted_light_data(&lights, &camera()),
            Err(RenderError::LightCapacityExceeded { count: 1025, .. })
        ));
    }

    #[test]
    fn test_uniforms_carry_clip_planes() {
        let uniforms = GlobalUniforms::new(&camera(), 3);
        assert_eq!(uniforms.near, 0.1);
        assert_eq!(uniforms.far, 100.0);
        assert_eq!(uniforms.num_lights, 3);
    }
}
