//! Render pass layouts for the gbuffer, scene and composition passes.
//!
//! Each pass is first described as plain data (`RenderPassDesc`) so the
//! attachment and dependency tables can be checked without a device, then
//! turned into a `RenderPass` handle that tracks its current subpass.

use ash::vk;

use crate::error::{RenderError, RenderResult, VkResultExt};

/// Gbuffer color attachments in framebuffer order.
pub const GBUFFER_POSITION_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const GBUFFER_NORMAL_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const GBUFFER_ALBEDO_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const GBUFFER_AO_METAL_ROUGH_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub const GBUFFER_COLOR_FORMATS: [vk::Format; 4] = [
    GBUFFER_POSITION_FORMAT,
    GBUFFER_NORMAL_FORMAT,
    GBUFFER_ALBEDO_FORMAT,
    GBUFFER_AO_METAL_ROUGH_FORMAT,
];

/// Layout the gbuffer color attachments rest in between passes.
pub const GBUFFER_RESTING_LAYOUT: vk::ImageLayout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
/// Layout the depth attachment rests in between passes.
pub const DEPTH_RESTING_LAYOUT: vk::ImageLayout = vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL;

/// Subpasses of the scene pass.
pub const SCENE_RESOLVE_SUBPASS: u32 = 0;
pub const SCENE_FORWARD_SUBPASS: u32 = 1;

/// Attachments and subpass references of one subpass.
#[derive(Debug, Clone, Default)]
pub struct SubpassDesc {
    pub color: Vec<vk::AttachmentReference>,
    pub input: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
}

/// Device-independent description of a render pass.
#[derive(Clone)]
pub struct RenderPassDesc {
    pub name: &'static str,
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
    pub clear_values: Vec<vk::ClearValue>,
}

fn attachment(
    format: vk::Format,
    load_op: vk::AttachmentLoadOp,
    initial_layout: vk::ImageLayout,
    final_layout: vk::ImageLayout,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(initial_layout)
        .final_layout(final_layout)
}

fn reference(index: u32, layout: vk::ImageLayout) -> vk::AttachmentReference {
    vk::AttachmentReference { attachment: index, layout }
}

fn color_clear(float32: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32 },
    }
}

fn depth_clear(depth: f32) -> vk::ClearValue {
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
    }
}

const EXTERNAL_COLOR_DEPENDENCY: vk::SubpassDependency = vk::SubpassDependency {
    src_subpass: vk::SUBPASS_EXTERNAL,
    dst_subpass: 0,
    src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
    src_access_mask: vk::AccessFlags::empty(),
    dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    dependency_flags: vk::DependencyFlags::empty(),
};

/// Early graphics: fills the four gbuffer targets and depth.
///
/// Attachments 0-3 are the gbuffer colors, 4 is depth. Everything is
/// cleared and stored, then left in the read-only layouts the shadow
/// passes and the scene pass consume.
pub fn gbuffer_pass_desc(depth_format: vk::Format) -> RenderPassDesc {
    let mut attachments: Vec<_> = GBUFFER_COLOR_FORMATS
        .iter()
        .map(|&format| {
            attachment(
                format,
                vk::AttachmentLoadOp::CLEAR,
                vk::ImageLayout::UNDEFINED,
                GBUFFER_RESTING_LAYOUT,
            )
        })
        .collect();
    attachments.push(attachment(
        depth_format,
        vk::AttachmentLoadOp::CLEAR,
        vk::ImageLayout::UNDEFINED,
        DEPTH_RESTING_LAYOUT,
    ));

    let subpass = SubpassDesc {
        color: (0..4)
            .map(|i| reference(i, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect(),
        input: Vec::new(),
        depth: Some(reference(4, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
    };

    let fragment_tests = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let dependencies = vec![
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: fragment_tests,
            dst_stage_mask: fragment_tests,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        },
        EXTERNAL_COLOR_DEPENDENCY,
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        },
    ];

    let clear_values = vec![
        color_clear([0.0; 4]),
        color_clear([0.0; 4]),
        color_clear([0.0; 4]),
        // AO defaults to unoccluded.
        color_clear([1.0, 0.0, 0.0, 0.0]),
        depth_clear(1.0),
    ];

    RenderPassDesc {
        name: "gbuffer",
        attachments,
        subpasses: vec![subpass],
        dependencies,
        clear_values,
    }
}

/// Late graphics: gbuffer resolve (subpass 0) then forward (subpass 1).
///
/// Attachment 0 is the frame's intermediate color, 1-4 the gbuffer
/// targets read as input attachments, 5 read-only depth.
pub fn scene_pass_desc(intermediate_format: vk::Format, depth_format: vk::Format) -> RenderPassDesc {
    let mut attachments = vec![attachment(
        intermediate_format,
        vk::AttachmentLoadOp::CLEAR,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::GENERAL,
    )];
    attachments.extend(GBUFFER_COLOR_FORMATS.iter().map(|&format| {
        attachment(
            format,
            vk::AttachmentLoadOp::LOAD,
            GBUFFER_RESTING_LAYOUT,
            GBUFFER_RESTING_LAYOUT,
        )
    }));
    attachments.push(attachment(
        depth_format,
        vk::AttachmentLoadOp::LOAD,
        DEPTH_RESTING_LAYOUT,
        DEPTH_RESTING_LAYOUT,
    ));

    let color = vec![reference(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let depth = Some(reference(5, DEPTH_RESTING_LAYOUT));

    let resolve = SubpassDesc {
        color: color.clone(),
        input: (1..5).map(|i| reference(i, GBUFFER_RESTING_LAYOUT)).collect(),
        depth,
    };
    let forward = SubpassDesc {
        color,
        input: Vec::new(),
        depth,
    };

    let dependencies = vec![
        EXTERNAL_COLOR_DEPENDENCY,
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: SCENE_RESOLVE_SUBPASS,
            src_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::INPUT_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        },
        vk::SubpassDependency {
            src_subpass: SCENE_RESOLVE_SUBPASS,
            dst_subpass: SCENE_FORWARD_SUBPASS,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
        vk::SubpassDependency {
            src_subpass: SCENE_FORWARD_SUBPASS,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ,
            dst_access_mask: vk::AccessFlags::MEMORY_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
    ];

    // Loaded attachments still need an entry to keep indices aligned.
    let mut clear_values = vec![color_clear([0.01, 0.01, 0.01, 1.0])];
    clear_values.extend((0..4).map(|_| color_clear([0.0; 4])));
    clear_values.push(depth_clear(1.0));

    RenderPassDesc {
        name: "scene",
        attachments,
        subpasses: vec![resolve, forward],
        dependencies,
        clear_values,
    }
}

/// Present: draws the post-processed intermediate into the swapchain image.
pub fn composition_pass_desc(swapchain_format: vk::Format) -> RenderPassDesc {
    RenderPassDesc {
        name: "composition",
        attachments: vec![attachment(
            swapchain_format,
            vk::AttachmentLoadOp::CLEAR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )],
        subpasses: vec![SubpassDesc {
            color: vec![reference(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)],
            ..Default::default()
        }],
        dependencies: vec![EXTERNAL_COLOR_DEPENDENCY],
        clear_values: vec![color_clear([0.0; 4])],
    }
}

/// Next subpass index, or an error past the last one.
pub fn advance_subpass(current: u32, count: u32) -> RenderResult<u32> {
    let next = current + 1;
    if next >= count {
        return Err(RenderError::SubpassOutOfRange { current, count });
    }
    Ok(next)
}

/// Full-extent viewport with y flipped so +y points up in clip space.
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// A created render pass and the subpass currently being recorded.
pub struct RenderPass {
    pub handle: vk::RenderPass,
    name: &'static str,
    subpass_count: u32,
    current_subpass: u32,
    clear_values: Vec<vk::ClearValue>,
}

impl RenderPass {
    pub unsafe fn new(device: &ash::Device, desc: &RenderPassDesc) -> RenderResult<Self> {
        let subpasses: Vec<vk::SubpassDescription> = desc
            .subpasses
            .iter()
            .map(|subpass| {
                let mut description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&subpass.color)
                    .input_attachments(&subpass.input);
                if let Some(depth) = subpass.depth.as_ref() {
                    description = description.depth_stencil_attachment(depth);
                }
                description
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&desc.attachments)
            .subpasses(&subpasses)
            .dependencies(&desc.dependencies);

        let handle = device
            .create_render_pass(&create_info, None)
            .context(&format!("[Sumire::Renderer] Failed to create {} render pass.", desc.name))?;

        log::debug!(
            "Created {} render pass ({} attachments, {} subpasses)",
            desc.name,
            desc.attachments.len(),
            subpasses.len()
        );

        Ok(Self {
            handle,
            name: desc.name,
            subpass_count: subpasses.len() as u32,
            current_subpass: 0,
            clear_values: desc.clear_values.clone(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn current_subpass(&self) -> u32 {
        self.current_subpass
    }

    /// Begin the pass on `framebuffer` and set a flipped viewport and scissor.
    pub unsafe fn begin(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.handle)
            .framebuffer(framebuffer)
            .render_area(full_scissor(extent))
            .clear_values(&self.clear_values);

        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        self.current_subpass = 0;

        device.cmd_set_viewport(cmd, 0, &[flipped_viewport(extent)]);
        device.cmd_set_scissor(cmd, 0, &[full_scissor(extent)]);
    }

    pub unsafe fn next_subpass(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) -> RenderResult<()> {
        self.current_subpass = advance_subpass(self.current_subpass, self.subpass_count)?;
        device.cmd_next_subpass(cmd, vk::SubpassContents::INLINE);
        Ok(())
    }

    pub unsafe fn end(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_end_render_pass(cmd);
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_render_pass(self.handle, None);
    }
}

pub unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: &RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> RenderResult<vk::Framebuffer> {
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass.handle)
        .attachments(views)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    device
        .create_framebuffer(&create_info, None)
        .context(&format!("[Sumire::Renderer] Failed to create {} framebuffer.", render_pass.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;
    const INTERMEDIATE: vk::Format = vk::Format::R16G16B16A16_UNORM;

    fn clear_color(value: &vk::ClearValue) -> [f32; 4] {
        unsafe { value.color.float32 }
    }

    fn clear_depth(value: &vk::ClearValue) -> f32 {
        unsafe { value.depth_stencil.depth }
    }

    // ========================================================================
    // Gbuffer pass
    // ========================================================================

    #[test]
    fn test_gbuffer_pass_layout() {
        let desc = gbuffer_pass_desc(DEPTH);

        assert_eq!(desc.attachments.len(), 5);
        assert_eq!(desc.subpasses.len(), 1);
        assert_eq!(desc.clear_values.len(), desc.attachments.len());

        for color in &desc.attachments[..4] {
            assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
            assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
            assert_eq!(color.final_layout, GBUFFER_RESTING_LAYOUT);
        }
        assert_eq!(desc.attachments[4].format, DEPTH);
        assert_eq!(desc.attachments[4].final_layout, DEPTH_RESTING_LAYOUT);

        let subpass = &desc.subpasses[0];
        assert_eq!(subpass.color.len(), 4);
        assert_eq!(subpass.depth.map(|d| d.attachment), Some(4));
    }

    #[test]
    fn test_gbuffer_clear_values() {
        let desc = gbuffer_pass_desc(DEPTH);
        assert_eq!(clear_color(&desc.clear_values[0]), [0.0; 4]);
        assert_eq!(clear_color(&desc.clear_values[3]), [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(clear_depth(&desc.clear_values[4]), 1.0);
    }

    #[test]
    fn test_gbuffer_outputs_visible_to_compute() {
        let desc = gbuffer_pass_desc(DEPTH);
        let outgoing = desc
            .dependencies
            .iter()
            .find(|d| d.dst_subpass == vk::SUBPASS_EXTERNAL)
            .unwrap();
        assert!(outgoing.dst_stage_mask.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert_eq!(outgoing.dst_access_mask, vk::AccessFlags::SHADER_READ);
    }

    // ========================================================================
    // Scene pass
    // ========================================================================

    #[test]
    fn test_scene_pass_layout() {
        let desc = scene_pass_desc(INTERMEDIATE, DEPTH);

        assert_eq!(desc.attachments.len(), 6);
        assert_eq!(desc.subpasses.len(), 2);
        assert_eq!(desc.clear_values.len(), 6);

        let intermediate = &desc.attachments[0];
        assert_eq!(intermediate.format, INTERMEDIATE);
        assert_eq!(intermediate.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(intermediate.final_layout, vk::ImageLayout::GENERAL);
        assert_eq!(clear_color(&desc.clear_values[0]), [0.01, 0.01, 0.01, 1.0]);

        // Gbuffer contents from the early pass are preserved.
        for loaded in &desc.attachments[1..] {
            assert_eq!(loaded.load_op, vk::AttachmentLoadOp::LOAD);
            assert_eq!(loaded.initial_layout, loaded.final_layout);
        }

        let resolve = &desc.subpasses[SCENE_RESOLVE_SUBPASS as usize];
        assert_eq!(resolve.input.iter().map(|r| r.attachment).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        let forward = &desc.subpasses[SCENE_FORWARD_SUBPASS as usize];
        assert!(forward.input.is_empty());
        assert_eq!(forward.depth.map(|d| d.layout), Some(DEPTH_RESTING_LAYOUT));
    }

    #[test]
    fn test_scene_subpass_chain() {
        let desc = scene_pass_desc(INTERMEDIATE, DEPTH);
        let between = desc
            .dependencies
            .iter()
            .find(|d| d.src_subpass == SCENE_RESOLVE_SUBPASS && d.dst_subpass == SCENE_FORWARD_SUBPASS)
            .unwrap();
        assert_eq!(between.dependency_flags, vk::DependencyFlags::BY_REGION);
    }

    // ========================================================================
    // Composition pass
    // ========================================================================

    #[test]
    fn test_composition_pass_targets_present() {
        let desc = composition_pass_desc(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(desc.attachments.len(), 1);
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(clear_color(&desc.clear_values[0]), [0.0; 4]);
        assert_eq!(desc.dependencies.len(), 1);
        assert_eq!(desc.dependencies[0].src_subpass, vk::SUBPASS_EXTERNAL);
    }

    // ========================================================================
    // Subpasses and viewport
    // ========================================================================

    #[test]
    fn test_advance_subpass() {
        assert_eq!(advance_subpass(0, 2).unwrap(), 1);
        assert!(matches!(
            advance_subpass(1, 2),
            Err(RenderError::SubpassOutOfRange { current: 1, count: 2 })
        ));
        assert!(advance_subpass(0, 1).is_err());
    }

    #[test]
    fn test_flipped_viewport() {
        let viewport = flipped_viewport(vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(viewport.y, 720.0);
        assert_eq!(viewport.height, -720.0);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }
}
