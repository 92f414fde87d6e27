// SPDX-License-Identifier: CEPL-1.0
//! The spinning triangle: one render pass, one pipeline, a static vertex
//! buffer and a uniform rewritten every frame.

use std::io::Cursor;
use std::mem::size_of;
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use spintri_core::FrameClock;
use spintri_math::{spin_angle, SpinUniform};
use spintri_render_vk::error::VkResultExt;
use spintri_render_vk::swapchain::SURFACE_FORMAT;
use spintri_render_vk::{BufferUsage, GpuBuffer, GpuError, RenderRecipe, VkContext};
use tracing::info;

use crate::vertex::{Vertex, TRIANGLE};

const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub struct SpinRecipe {
    ctx: Arc<VkContext>,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    desc_pool: vk::DescriptorPool,
    desc_set: vk::DescriptorSet,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    vertices: GpuBuffer,
    uniform: GpuBuffer,
    clock: FrameClock,
    speed: f32,
}

unsafe fn create_render_pass(device: &ash::Device) -> Result<vk::RenderPass, GpuError> {
    let color = vk::AttachmentDescription {
        format: SURFACE_FORMAT,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    // The acquire semaphore is waited at COLOR_ATTACHMENT_OUTPUT; the layout
    // transition must not start before it.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rp_info, None) }.op("vkCreateRenderPass")
}

unsafe fn create_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout, GpuError> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    unsafe { device.create_descriptor_set_layout(&ci, None) }.op("vkCreateDescriptorSetLayout")
}

unsafe fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool, GpuError> {
    let size = vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
    };
    let ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: 1,
        pool_size_count: 1,
        p_pool_sizes: &size,
        ..Default::default()
    };
    unsafe { device.create_descriptor_pool(&ci, None) }.op("vkCreateDescriptorPool")
}

unsafe fn create_shader_module(device: &ash::Device, spv: &[u8]) -> Result<vk::ShaderModule> {
    let code = read_spv(&mut Cursor::new(spv)).context("reading SPIR-V")?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(unsafe { device.create_shader_module(&ci, None) }.op("vkCreateShaderModule")?)
}

unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline> {
    let vs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/spin.vert.spv"));
    let fs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/spin.frag.spv"));
    let vs = unsafe { create_shader_module(device, vs_bytes) }?;
    let fs = match unsafe { create_shader_module(device, fs_bytes) } {
        Ok(m) => m,
        Err(e) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };
    let entry = c"main";

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let vb = Vertex::binding();
    let va = Vertex::attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    // Spinning shows both faces.
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let created = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
    };
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }
    let pipelines = created.map_err(|(_, err)| GpuError::vulkan("vkCreateGraphicsPipelines", err))?;
    Ok(pipelines[0])
}

impl SpinRecipe {
    /// `speed` is in radians per second.
    pub fn new(ctx: &Arc<VkContext>, speed: f32) -> Result<Self> {
        let mut vertices = GpuBuffer::new(
            ctx,
            std::mem::size_of_val(&TRIANGLE) as vk::DeviceSize,
            BufferUsage::Vertex,
            HOST_MEMORY,
        )
        .context("vertex buffer")?;
        vertices.upload(bytemuck::cast_slice(&TRIANGLE))?;

        let mut uniform = GpuBuffer::new(
            ctx,
            size_of::<SpinUniform>() as vk::DeviceSize,
            BufferUsage::Uniform,
            HOST_MEMORY,
        )
        .context("uniform buffer")?;
        uniform.map_persistent()?;
        uniform.write_pod(&SpinUniform::identity())?;

        // Null handles are valid to destroy, so Drop cleans up whatever
        // was created before a failure below.
        let mut recipe = SpinRecipe {
            ctx: ctx.clone(),
            render_pass: vk::RenderPass::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            desc_pool: vk::DescriptorPool::null(),
            desc_set: vk::DescriptorSet::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            vertices,
            uniform,
            clock: FrameClock::start(),
            speed,
        };
        unsafe { recipe.build_objects() }?;
        info!("spin recipe ready ({} rad/s)", speed);
        Ok(recipe)
    }

    unsafe fn build_objects(&mut self) -> Result<()> {
        let device = self.ctx.device();
        unsafe {
            self.render_pass = create_render_pass(device)?;
            self.set_layout = create_set_layout(device)?;
            self.desc_pool = create_descriptor_pool(device)?;

            let alloc = vk::DescriptorSetAllocateInfo {
                s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
                descriptor_pool: self.desc_pool,
                descriptor_set_count: 1,
                p_set_layouts: &self.set_layout,
                ..Default::default()
            };
            self.desc_set = device
                .allocate_descriptor_sets(&alloc)
                .op("vkAllocateDescriptorSets")?[0];

            let buffer_info = vk::DescriptorBufferInfo {
                buffer: self.uniform.handle(),
                offset: 0,
                range: size_of::<SpinUniform>() as vk::DeviceSize,
            };
            let write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: self.desc_set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &buffer_info,
                ..Default::default()
            };
            device.update_descriptor_sets(&[write], &[]);

            let layout_info = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                set_layout_count: 1,
                p_set_layouts: &self.set_layout,
                ..Default::default()
            };
            self.layout = device
                .create_pipeline_layout(&layout_info, None)
                .op("vkCreatePipelineLayout")?;
            self.pipeline = create_pipeline(device, self.render_pass, self.layout)?;
        }
        Ok(())
    }

    /// A factory for `VkRenderer::new`.
    pub fn factory(speed: f32) -> impl FnOnce(&Arc<VkContext>) -> Result<Box<dyn RenderRecipe>> {
        move |ctx| Ok(Box::new(SpinRecipe::new(ctx, speed)?) as Box<dyn RenderRecipe>)
    }
}

impl RenderRecipe for SpinRecipe {
    fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    fn prepare_frame(&mut self) -> spintri_render_vk::Result<()> {
        let angle = spin_angle(self.clock.elapsed_secs(), self.speed);
        self.uniform.write_pod(&SpinUniform::at_angle(angle))
    }

    unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.handle()], &[0]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                0,
                &[self.desc_set],
                &[],
            );
            device.cmd_draw(cmd, TRIANGLE.len() as u32, 1, 0, 0);
        }
    }
}

impl Drop for SpinRecipe {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.device_wait_idle().ok();
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            // Frees the descriptor set with it.
            device.destroy_descriptor_pool(self.desc_pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}
