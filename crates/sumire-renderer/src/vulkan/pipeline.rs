//! Shader loading, compute pipelines and bind tracking.

use ash::vk;
use std::fs::File;
use std::path::Path;

use crate::error::{RenderError, RenderResult, VkResultExt};

/// Read a SPIR-V binary from disk.
pub fn load_spirv(path: &Path) -> RenderResult<Vec<u32>> {
    let shader_error = |source| RenderError::Shader {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(shader_error)?;
    ash::util::read_spv(&mut file).map_err(shader_error)
}

pub unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> RenderResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    device
        .create_shader_module(&create_info, None)
        .context("[Sumire::Pipeline] Failed to create shader module.")
}

pub unsafe fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_size: u32,
) -> RenderResult<vk::PipelineLayout> {
    let push_ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::COMPUTE,
        offset: 0,
        size: push_constant_size,
    }];

    let mut layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
    if push_constant_size > 0 {
        layout_info = layout_info.push_constant_ranges(&push_ranges);
    }

    device
        .create_pipeline_layout(&layout_info, None)
        .context("[Sumire::Pipeline] Failed to create pipeline layout.")
}

/// Build a compute pipeline from a SPIR-V file with entry point `main`.
pub unsafe fn create_compute_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    shader_path: &Path,
) -> RenderResult<vk::Pipeline> {
    let code = load_spirv(shader_path)?;
    let module = create_shader_module(device, &code)?;

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(c"main");

    let create_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

    let result = device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None);

    // The module is only needed during creation.
    device.destroy_shader_module(module, None);

    let pipelines = result
        .map_err(|(_, e)| e)
        .context(&format!("[Sumire::Pipeline] Failed to create compute pipeline {shader_path:?}."))?;

    log::debug!("Compute pipeline created from {shader_path:?}");
    Ok(pipelines[0])
}

/// Last pipeline bound in one command buffer recording session.
///
/// Skips redundant `vkCmdBindPipeline` calls. Call `reset` whenever a new
/// recording begins.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BoundPipeline {
    current: Option<(vk::PipelineBindPoint, vk::Pipeline)>,
}

impl BoundPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Record `pipeline` as bound. Returns false if it already was.
    pub fn track(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> bool {
        if self.current == Some((bind_point, pipeline)) {
            return false;
        }
        self.current = Some((bind_point, pipeline));
        true
    }

    pub unsafe fn bind(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        if self.track(bind_point, pipeline) {
            device.cmd_bind_pipeline(cmd, bind_point, pipeline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_bound_pipeline_skips_rebind() {
        let a = vk::Pipeline::from_raw(1);
        let b = vk::Pipeline::from_raw(2);
        let mut bound = BoundPipeline::new();

        assert!(bound.track(vk::PipelineBindPoint::COMPUTE, a));
        assert!(!bound.track(vk::PipelineBindPoint::COMPUTE, a));
        assert!(bound.track(vk::PipelineBindPoint::COMPUTE, b));
        assert!(bound.track(vk::PipelineBindPoint::GRAPHICS, b));

        bound.reset();
        assert!(bound.track(vk::PipelineBindPoint::GRAPHICS, b));
    }

    #[test]
    fn test_missing_shader_reports_path() {
        let path = Path::new("does/not/exist.comp.spv");
        let err = load_spirv(path).unwrap_err();
        match err {
            RenderError::Shader { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reads_spirv_words() {
        let path = std::env::temp_dir().join(format!("sumire-spirv-{}.spv", std::process::id()));
        // Magic number followed by one word.
        let words: [u32; 2] = [0x0723_0203, 0x0001_0000];
        std::fs::write(&path, bytemuck::cast_slice(&words)).unwrap();

        let code = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(code, words);
    }
}
