//! High quality shadow mapper.
//!
//! Four phases per frame, invoked by the frame orchestrator in this order:
//!
//! 1. `prepare` (CPU): sort lights by view depth, build the zBin and light
//!    mask, upload both.
//! 2. `find_lights_approximate` (compute, one workgroup per 64x64 tile group):
//!    coarse culling against the HZB.
//! 3. `find_lights_accurate` (compute, one workgroup per 8x8 shadow tile):
//!    early per-tile light lists.
//! 4. `generate_deferred_shadows` (compute, one workgroup per shadow tile):
//!    final light lists and per-pixel visibility.
//!
//! Phase ordering is the caller's responsibility. Every buffer and descriptor
//! set exists from construction onwards, so phases can never observe missing
//! resources.

use ash::vk;
use std::path::{Path, PathBuf};

use super::bindings::{
    self, BufferSlot, DescriptorWrite, ShadowDescriptorPlan, ShadowResource, FIND_LIGHTS_ACCURATE_BINDINGS,
    FIND_LIGHTS_APPROX_BINDINGS, GEN_DEFERRED_SHADOWS_BINDINGS, SHADOW_DESCRIPTOR_MAX_SETS,
};
use super::light_mask::LightMask;
use super::push_constants::{FindLightsAccuratePush, FindLightsApproxPush, GenDeferredShadowsPush};
use super::tiles::ShadowTileLayout;
use super::view_space_light::sort_lights_by_view_space_depth;
use super::zbin::ZBin;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::scene::{Camera, LightMap};
use crate::vulkan::{pipeline, Buffer, CommandRecording, MemoryManager, VulkanContext, MAX_FRAMES_IN_FLIGHT};

const SHADER_SUBDIR: &str = "high_quality_shadow_mapping";

/// Attachment views the shadow passes sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowInputs {
    pub hzb_view: vk::ImageView,
    pub zbuffer_view: vk::ImageView,
    pub world_position_view: vk::ImageView,
}

/// Create one value per key, releasing the ones already made if any fails.
fn create_all_or_release<K: Copy, T>(
    keys: &[K],
    mut create: impl FnMut(K) -> RenderResult<T>,
    mut release: impl FnMut(T),
) -> RenderResult<Vec<(K, T)>> {
    let mut created = Vec::with_capacity(keys.len());
    for &key in keys {
        match create(key) {
            Ok(value) => created.push((key, value)),
            Err(e) => {
                for (_, value) in created.into_iter().rev() {
                    release(value);
                }
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// Every storage buffer of one descriptor plan.
struct ShadowBuffers {
    slots: Vec<(BufferSlot, Buffer)>,
}

impl ShadowBuffers {
    unsafe fn new(memory: &MemoryManager, plan: &ShadowDescriptorPlan) -> RenderResult<Self> {
        let slots = create_all_or_release(
            &plan.buffer_slots(MAX_FRAMES_IN_FLIGHT),
            |slot| Self::create_buffer(memory, &slot),
            |buffer| memory.destroy_buffer(buffer),
        )?;
        Ok(Self { slots })
    }

    /// zBin and light mask are host-visible and written through the mapping,
    /// the rest live in device memory.
    unsafe fn create_buffer(memory: &MemoryManager, slot: &BufferSlot) -> RenderResult<Buffer> {
        let name = match slot.frame {
            Some(frame) => format!("hqsm {:?} {frame}", slot.resource),
            None => format!("hqsm {:?}", slot.resource),
        };

        if slot.resource.is_host_written() {
            memory.create_host_storage_buffer(slot.size, &name)
        } else {
            memory.create_storage_buffer(slot.size, &name)
        }
    }

    fn get(&self, resource: ShadowResource, frame: usize) -> Option<&Buffer> {
        self.slots
            .iter()
            .find(|(slot, _)| slot.serves(resource, frame))
            .map(|(_, buffer)| buffer)
    }

    unsafe fn destroy(self, memory: &MemoryManager) {
        for (_, buffer) in self.slots {
            memory.destroy_buffer(buffer);
        }
    }
}

/// Descriptor payload for one binding.
enum DescriptorInfo {
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
}

/// Layout, pipeline and per-frame descriptor sets of one compute phase.
#[derive(Default)]
struct ComputePhase {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl ComputePhase {
    /// Null handles are skipped by the driver, so a half-built phase is fine.
    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.pipeline_layout, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
    }
}

pub struct HighQualityShadowMapper {
    device: ash::Device,
    plan: ShadowDescriptorPlan,
    inputs: ShadowInputs,

    zbin: ZBin,
    light_mask: LightMask,

    buffers: ShadowBuffers,

    attachment_sampler: vk::Sampler,
    descriptor_pool: vk::DescriptorPool,

    lights_approx: ComputePhase,
    lights_accurate: ComputePhase,
    deferred_shadows: ComputePhase,
}

impl HighQualityShadowMapper {
    pub unsafe fn new(
        ctx: &VulkanContext,
        memory: &MemoryManager,
        width: u32,
        height: u32,
        inputs: ShadowInputs,
        global_set_layout: vk::DescriptorSetLayout,
        shader_dir: &Path,
    ) -> RenderResult<Self> {
        let plan = ShadowDescriptorPlan::new(width, height);
        let buffers = ShadowBuffers::new(memory, &plan)?;

        let mut mapper = Self {
            device: ctx.device.clone(),
            plan,
            inputs,
            zbin: ZBin::new(),
            light_mask: LightMask::new(width, height),
            buffers,
            attachment_sampler: vk::Sampler::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            lights_approx: ComputePhase::default(),
            lights_accurate: ComputePhase::default(),
            deferred_shadows: ComputePhase::default(),
        };

        if let Err(e) = mapper.create_pipelines(global_set_layout, shader_dir) {
            mapper.destroy(memory);
            return Err(e);
        }
        mapper.write_all_descriptor_sets();

        let layout = mapper.plan.layout;
        log::debug!(
            "High quality shadow mapper created: {}x{} shadow tiles, {}x{} tile groups",
            layout.shadow_tiles.x,
            layout.shadow_tiles.y,
            layout.tile_groups.x,
            layout.tile_groups.y
        );

        Ok(mapper)
    }

    /// Sampler, pool and the three phases. Fills fields in place so a failure
    /// part way leaves only handles `destroy` can release.
    unsafe fn create_pipelines(&mut self, global_set_layout: vk::DescriptorSetLayout, shader_dir: &Path) -> RenderResult<()> {
        self.attachment_sampler = Self::create_attachment_sampler(&self.device)?;
        self.descriptor_pool = Self::create_descriptor_pool(&self.device)?;

        let shader_path = |name: &str| -> PathBuf { shader_dir.join(SHADER_SUBDIR).join(format!("{name}.comp.spv")) };

        Self::create_phase(
            &self.device,
            self.descriptor_pool,
            &mut self.lights_approx,
            &FIND_LIGHTS_APPROX_BINDINGS,
            "lights approx (Phase 2)",
            &[],
            std::mem::size_of::<FindLightsApproxPush>() as u32,
            &shader_path("find_lights_approximate"),
        )?;

        Self::create_phase(
            &self.device,
            self.descriptor_pool,
            &mut self.lights_accurate,
            &FIND_LIGHTS_ACCURATE_BINDINGS,
            "lights accurate (Phase 3)",
            &[],
            std::mem::size_of::<FindLightsAccuratePush>() as u32,
            &shader_path("find_lights_accurate"),
        )?;

        Self::create_phase(
            &self.device,
            self.descriptor_pool,
            &mut self.deferred_shadows,
            &GEN_DEFERRED_SHADOWS_BINDINGS,
            "deferred shadows (Phase 4)",
            &[global_set_layout],
            std::mem::size_of::<GenDeferredShadowsPush>() as u32,
            &shader_path("generate_deferred_shadows"),
        )
    }

    unsafe fn create_attachment_sampler(device: &ash::Device) -> RenderResult<vk::Sampler> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(0.0);

        device
            .create_sampler(&sampler_info, None)
            .context("[Sumire::HighQualityShadowMapper] Failed to create attachment sampler.")
    }

    unsafe fn create_descriptor_pool(device: &ash::Device) -> RenderResult<vk::DescriptorPool> {
        let pool_sizes = bindings::pool_sizes(MAX_FRAMES_IN_FLIGHT as u32);
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(SHADOW_DESCRIPTOR_MAX_SETS);

        device
            .create_descriptor_pool(&pool_info, None)
            .context("[Sumire::HighQualityShadowMapper] Failed to create descriptor pool.")
    }

    /// Set layout, pipeline layout (`leading_layouts` first), pipeline and one
    /// descriptor set per frame in flight.
    unsafe fn create_phase(
        device: &ash::Device,
        pool: vk::DescriptorPool,
        phase: &mut ComputePhase,
        table: &[ShadowResource],
        name: &str,
        leading_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
        shader: &Path,
    ) -> RenderResult<()> {
        phase.set_layout = bindings::create_set_layout(device, table, name)?;

        let mut set_layouts = leading_layouts.to_vec();
        set_layouts.push(phase.set_layout);
        phase.pipeline_layout = pipeline::create_pipeline_layout(device, &set_layouts, push_constant_size)?;

        phase.pipeline = pipeline::create_compute_pipeline(device, phase.pipeline_layout, shader)?;

        let alloc_layouts = vec![phase.set_layout; MAX_FRAMES_IN_FLIGHT];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&alloc_layouts);
        phase.descriptor_sets = device
            .allocate_descriptor_sets(&alloc_info)
            .context(&format!("[Sumire::HighQualityShadowMapper] Failed to allocate {name} descriptor sets."))?;

        Ok(())
    }

    fn descriptor_info(&self, write: &DescriptorWrite, frame: usize) -> Option<DescriptorInfo> {
        let image = |view: vk::ImageView| {
            write.resource.image_layout().map(|image_layout| {
                DescriptorInfo::Image(vk::DescriptorImageInfo {
                    sampler: self.attachment_sampler,
                    image_view: view,
                    image_layout,
                })
            })
        };

        match write.resource {
            ShadowResource::Hzb => image(self.inputs.hzb_view),
            ShadowResource::ZBuffer => image(self.inputs.zbuffer_view),
            ShadowResource::WorldPosition => image(self.inputs.world_position_view),
            resource => self.buffers.get(resource, frame).map(|buffer| {
                DescriptorInfo::Buffer(vk::DescriptorBufferInfo {
                    buffer: buffer.handle,
                    offset: 0,
                    range: write.size.unwrap_or(vk::WHOLE_SIZE),
                })
            }),
        }
    }

    unsafe fn write_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite], frame: usize) {
        let infos: Vec<(&DescriptorWrite, DescriptorInfo)> = writes
            .iter()
            .filter_map(|write| self.descriptor_info(write, frame).map(|info| (write, info)))
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .map(|(write, info)| {
                let descriptor = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .descriptor_type(write.resource.descriptor_type());
                match info {
                    DescriptorInfo::Image(image) => descriptor.image_info(std::slice::from_ref(image)),
                    DescriptorInfo::Buffer(buffer) => descriptor.buffer_info(std::slice::from_ref(buffer)),
                }
            })
            .collect();

        self.device.update_descriptor_sets(&writes, &[]);
    }

    unsafe fn write_all_descriptor_sets(&self) {
        let phases = [
            (&self.lights_approx, &self.plan.approximate),
            (&self.lights_accurate, &self.plan.accurate),
            (&self.deferred_shadows, &self.plan.deferred_shadows),
        ];
        for (phase, writes) in phases {
            for (frame, &set) in phase.descriptor_sets.iter().enumerate() {
                self.write_descriptor_set(set, writes, frame);
            }
        }
    }

    // ========================================================================
    // Phase 1: Prepare (CPU)
    // ========================================================================

    /// Sort lights, build zBin and light mask and upload both into the
    /// buffers of frame slot `frame`.
    pub fn prepare(&mut self, frame: usize, lights: &LightMap, camera: &Camera) -> RenderResult<()> {
        let sorted = sort_lights_by_view_space_depth(lights, camera.view());

        self.zbin.generate(&sorted, camera.near(), camera.far());
        self.light_mask.generate(&sorted, camera)?;

        self.upload_buffer(ShadowResource::ZBin, frame)?
            .write_bytes(self.zbin.as_bytes())?;
        self.upload_buffer(ShadowResource::LightMask, frame)?
            .write_bytes(self.light_mask.as_bytes())?;

        log::trace!(
            "Shadow prepare: {} lights, zbin slices [{}, {}]",
            sorted.len(),
            self.zbin.first_full_idx,
            self.zbin.last_full_idx
        );

        Ok(())
    }

    fn upload_buffer(&self, resource: ShadowResource, frame: usize) -> RenderResult<&Buffer> {
        self.buffers
            .get(resource, frame)
            .ok_or_else(|| RenderError::allocation(format!("no {resource:?} upload buffer for frame slot {frame}")))
    }

    // ========================================================================
    // Phase 2: Find lights approximate
    // ========================================================================

    /// Reads the zBin and light mask `prepare` uploaded for `frame`.
    pub unsafe fn find_lights_approximate(&self, recording: &mut CommandRecording, frame: usize, near: f32, far: f32) {
        let layout = &self.plan.layout;
        let push = FindLightsApproxPush::new(layout, near, far);
        self.dispatch(
            recording,
            &self.lights_approx,
            &[self.lights_approx.descriptor_sets[frame]],
            bytemuck::bytes_of(&push),
            layout.approximate_dispatch(),
        );
    }

    // ========================================================================
    // Phase 3: Find lights accurate
    // ========================================================================

    /// Must follow `find_lights_approximate` in the same recording.
    pub unsafe fn find_lights_accurate(&self, recording: &mut CommandRecording, frame: usize) {
        // Reads the tile group mask the approximate pass just wrote.
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);
        self.device.cmd_pipeline_barrier(
            recording.handle,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );

        let layout = &self.plan.layout;
        let push = FindLightsAccuratePush::new(layout);
        self.dispatch(
            recording,
            &self.lights_accurate,
            &[self.lights_accurate.descriptor_sets[frame]],
            bytemuck::bytes_of(&push),
            layout.accurate_dispatch(),
        );
    }

    // ========================================================================
    // Phase 4: Generate deferred shadows
    // ========================================================================

    pub unsafe fn generate_deferred_shadows(
        &self,
        recording: &mut CommandRecording,
        frame: usize,
        global_set: vk::DescriptorSet,
    ) {
        let layout = &self.plan.layout;
        let push = GenDeferredShadowsPush::new(layout);
        self.dispatch(
            recording,
            &self.deferred_shadows,
            &[global_set, self.deferred_shadows.descriptor_sets[frame]],
            bytemuck::bytes_of(&push),
            layout.deferred_shadows_dispatch(),
        );
    }

    unsafe fn dispatch(
        &self,
        recording: &mut CommandRecording,
        phase: &ComputePhase,
        sets: &[vk::DescriptorSet],
        push: &[u8],
        groups: [u32; 3],
    ) {
        recording.bind_compute_pipeline(&self.device, phase.pipeline);

        self.device.cmd_push_constants(
            recording.handle,
            phase.pipeline_layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            push,
        );

        self.device.cmd_bind_descriptor_sets(
            recording.handle,
            vk::PipelineBindPoint::COMPUTE,
            phase.pipeline_layout,
            0,
            sets,
            &[],
        );

        self.device.cmd_dispatch(recording.handle, groups[0], groups[1], groups[2]);
    }

    // ========================================================================
    // Resize
    // ========================================================================

    /// Point the passes at a new resolution and new attachment views.
    ///
    /// Buffers are rebuilt only when the descriptor plan changes; new views
    /// alone just rewrite the descriptor sets. The caller must ensure the
    /// device is idle.
    pub unsafe fn update_screen_bounds(
        &mut self,
        memory: &MemoryManager,
        width: u32,
        height: u32,
        inputs: ShadowInputs,
    ) -> RenderResult<()> {
        let plan = ShadowDescriptorPlan::new(width, height);
        if plan == self.plan && inputs == self.inputs {
            log::debug!("Shadow mapper already at {width}x{height}");
            return Ok(());
        }

        if plan != self.plan {
            let buffers = ShadowBuffers::new(memory, &plan)?;
            std::mem::replace(&mut self.buffers, buffers).destroy(memory);
            self.light_mask = LightMask::new(width, height);
            self.plan = plan;
        }
        self.inputs = inputs;

        self.write_all_descriptor_sets();

        log::info!(
            "Shadow mapper resized to {}x{} ({} shadow tiles, {} tile groups)",
            width,
            height,
            self.plan.layout.shadow_tiles.count(),
            self.plan.layout.tile_groups.count()
        );

        Ok(())
    }

    pub fn layout(&self) -> &ShadowTileLayout {
        &self.plan.layout
    }

    pub fn plan(&self) -> &ShadowDescriptorPlan {
        &self.plan
    }

    pub fn zbin(&self) -> &ZBin {
        &self.zbin
    }

    pub fn light_mask(&self) -> &LightMask {
        &self.light_mask
    }

    pub unsafe fn destroy(self, memory: &MemoryManager) {
        self.lights_approx.destroy(&self.device);
        self.lights_accurate.destroy(&self.device);
        self.deferred_shadows.destroy(&self.device);

        self.device.destroy_descriptor_pool(self.descriptor_pool, None);
        self.device.destroy_sampler(self.attachment_sampler, None);

        self.buffers.destroy(memory);
    }
}
