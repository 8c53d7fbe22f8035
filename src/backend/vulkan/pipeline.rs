// Render passes and pipelines
//
// A render pass here bundles the vk::RenderPass with the framebuffers it
// draws into: one per swapchain image, or a single one for an offscreen
// attachment. Graphics pipelines keep viewport, scissor and line width
// dynamic so one pipeline survives swapchain resizes.

use std::ffi::CStr;

use anyhow::{Context, Result};
use ash::vk;

use super::descriptor::create_set_layout;
use super::memory::DEPTH_FORMAT;
use super::shader::{create_shader_module, vk_stages};
use super::translate::vk_layout;
use crate::resource::{
    ComputePipelineDesc, CullMode, DescriptorSetDesc, GraphicsPipelineDesc, LoadOp, PushConstantRange,
    RenderPassDesc, ShaderStages, Topology, VertexFormat, VertexLayout,
};

const ENTRY_POINT: &CStr = c"main";

pub struct VulkanRenderPass {
    pub raw: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
    pub clear_values: Vec<vk::ClearValue>,
}

pub struct VulkanPipeline {
    pub raw: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub bind_point: vk::PipelineBindPoint,
}

fn vk_load_op(load: LoadOp) -> vk::AttachmentLoadOp {
    match load {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

impl VulkanRenderPass {
    /// Build the pass and one framebuffer per entry of `color_views`.
    pub fn new(
        device: &ash::Device,
        desc: &RenderPassDesc,
        format: vk::Format,
        color_views: &[vk::ImageView],
        depth_view: Option<vk::ImageView>,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let raw = create_render_pass(device, desc, format, depth_view.is_some())?;

        let framebuffers = color_views
            .iter()
            .map(|&color| {
                let mut attachments = vec![color];
                attachments.extend(depth_view);
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(raw)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                unsafe { device.create_framebuffer(&framebuffer_info, None) }
                    .with_context(|| format!("Failed to create framebuffer for '{}'", desc.name))
            })
            .collect::<Result<Vec<_>>>();

        let framebuffers = match framebuffers {
            Ok(framebuffers) => framebuffers,
            Err(err) => {
                unsafe { device.destroy_render_pass(raw, None) };
                return Err(err);
            }
        };

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: desc.clear_color,
            },
        }];
        if depth_view.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        }

        Ok(Self {
            raw,
            framebuffers,
            extent,
            clear_values,
        })
    }

    pub fn has_depth(&self) -> bool {
        self.clear_values.len() > 1
    }

    /// Framebuffer for `image_index`; offscreen passes only have one.
    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        let index = (image_index as usize).min(self.framebuffers.len().saturating_sub(1));
        self.framebuffers[index]
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            for framebuffer in self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.raw, None);
        }
    }
}

fn create_render_pass(
    device: &ash::Device,
    desc: &RenderPassDesc,
    format: vk::Format,
    with_depth: bool,
) -> Result<vk::RenderPass> {
    let mut attachments = vec![vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk_load_op(desc.load))
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk_layout(desc.initial_layout))
        .final_layout(vk_layout(desc.final_layout))
        .build()];

    if with_depth {
        // Depth is cleared every pass and never read back
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(DEPTH_FORMAT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
    }

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if with_depth {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }
    let subpasses = [subpass.build()];

    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .build()];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }
        .with_context(|| format!("Failed to create render pass '{}'", desc.name))
}

fn vk_vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float => vk::Format::R32_SFLOAT,
        VertexFormat::Vec2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Vec3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint => vk::Format::R32_UINT,
        VertexFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
    }
}

fn vertex_input(
    layout: Option<&VertexLayout>,
) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    let Some(layout) = layout else {
        return (Vec::new(), Vec::new());
    };

    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: layout.stride,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = layout
        .attributes
        .iter()
        .map(|attr| vk::VertexInputAttributeDescription {
            location: attr.location,
            binding: 0,
            format: vk_vertex_format(attr.format),
            offset: attr.offset,
        })
        .collect();

    (vec![binding], attributes)
}

/// Layout shared by both pipeline kinds. On failure nothing is leaked.
fn create_layout(
    device: &ash::Device,
    sets: &[DescriptorSetDesc],
    push_constants: Option<PushConstantRange>,
) -> Result<(vk::PipelineLayout, Vec<vk::DescriptorSetLayout>)> {
    let mut set_layouts = Vec::with_capacity(sets.len());
    for set in sets {
        match create_set_layout(device, set) {
            Ok(layout) => set_layouts.push(layout),
            Err(err) => {
                destroy_set_layouts(device, &set_layouts);
                return Err(err);
            }
        }
    }

    let ranges: Vec<_> = push_constants
        .map(|range| vk::PushConstantRange {
            stage_flags: vk_stages(range.stages),
            offset: 0,
            size: range.size,
        })
        .into_iter()
        .collect();

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&ranges);

    match unsafe { device.create_pipeline_layout(&layout_info, None) } {
        Ok(layout) => Ok((layout, set_layouts)),
        Err(err) => {
            destroy_set_layouts(device, &set_layouts);
            Err(err).context("Failed to create pipeline layout")
        }
    }
}

fn destroy_set_layouts(device: &ash::Device, layouts: &[vk::DescriptorSetLayout]) {
    for &layout in layouts {
        unsafe { device.destroy_descriptor_set_layout(layout, None) };
    }
}

impl VulkanPipeline {
    pub fn graphics(device: &ash::Device, desc: &GraphicsPipelineDesc, pass: &VulkanRenderPass) -> Result<Self> {
        let mut modules = Vec::new();
        let mut stages = Vec::new();
        for (stage, code) in desc.shader.stages() {
            if stage == ShaderStages::COMPUTE {
                continue;
            }
            let module = match create_shader_module(device, code) {
                Ok(module) => module,
                Err(err) => {
                    destroy_modules(device, &modules);
                    return Err(err).with_context(|| format!("Pipeline '{}'", desc.name));
                }
            };
            modules.push(module);
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk_stages(stage))
                    .module(module)
                    .name(ENTRY_POINT)
                    .build(),
            );
        }

        let result = Self::build_graphics(device, desc, pass, &stages);
        destroy_modules(device, &modules);
        result
    }

    fn build_graphics(
        device: &ash::Device,
        desc: &GraphicsPipelineDesc,
        pass: &VulkanRenderPass,
        stages: &[vk::PipelineShaderStageCreateInfo],
    ) -> Result<Self> {
        let (bindings, attributes) = vertex_input(desc.vertex_layout.as_ref());
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let topology = match desc.topology {
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(topology)
            .primitive_restart_enable(false);

        // Counts only; the values are set per command buffer
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let cull_mode = match desc.cull {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Back => vk::CullModeFlags::BACK,
            CullMode::Front => vk::CullModeFlags::FRONT,
        };
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_test = desc.depth_test && pass.has_depth();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(depth_test)
            .depth_write_enable(depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachment = if desc.blend {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        };
        let blend_attachments = [blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let (layout, set_layouts) = create_layout(device, &desc.descriptor_sets, desc.push_constants)?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(pass.raw)
            .subpass(0)
            .build();

        let created = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = Self {
            raw: vk::Pipeline::null(),
            layout,
            set_layouts,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        };
        match created {
            Ok(pipelines) => Ok(Self {
                raw: pipelines[0],
                ..pipeline
            }),
            Err((_, err)) => {
                pipeline.destroy(device);
                Err(err).with_context(|| format!("Failed to create graphics pipeline '{}'", desc.name))
            }
        }
    }

    pub fn compute(device: &ash::Device, desc: &ComputePipelineDesc) -> Result<Self> {
        let code = desc
            .shader
            .stage(ShaderStages::COMPUTE)
            .with_context(|| format!("Compute pipeline '{}' has no compute stage", desc.name))?;
        let module = create_shader_module(device, code)?;

        let (layout, set_layouts) = match create_layout(device, &desc.descriptor_sets, desc.push_constants) {
            Ok(created) => created,
            Err(err) => {
                destroy_modules(device, &[module]);
                return Err(err);
            }
        };

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(ENTRY_POINT)
            .build();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();

        let created = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        destroy_modules(device, &[module]);

        let pipeline = Self {
            raw: vk::Pipeline::null(),
            layout,
            set_layouts,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        };
        match created {
            Ok(pipelines) => Ok(Self {
                raw: pipelines[0],
                ..pipeline
            }),
            Err((_, err)) => {
                pipeline.destroy(device);
                Err(err).with_context(|| format!("Failed to create compute pipeline '{}'", desc.name))
            }
        }
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            if self.raw != vk::Pipeline::null() {
                device.destroy_pipeline(self.raw, None);
            }
            device.destroy_pipeline_layout(self.layout, None);
        }
        destroy_set_layouts(device, &self.set_layouts);
    }
}

fn destroy_modules(device: &ash::Device, modules: &[vk::ShaderModule]) {
    for &module in modules {
        unsafe { device.destroy_shader_module(module, None) };
    }
}
