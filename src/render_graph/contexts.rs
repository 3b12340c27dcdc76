//! Execution contexts (§4.8).
//!
//! Thin facades handed to pass callbacks. They are the only API surface
//! pass-authoring code ever touches — the raw `vk::CommandBuffer` is never
//! exposed directly, mirroring the teacher's RHI boundary
//! (`rhi_traits::CommandList`) but specialized per pass kind instead of
//! generic over a graphics API, since this graph only ever targets Vulkan.

use ash::vk;

/// Facade handed to a graphics pass's callback, already inside a dynamic
/// rendering scope with the pipeline and descriptor sets 0/1/(2) bound.
pub struct GraphicsExecutionContext<'a> {
    pub(crate) device: &'a ash::Device,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) push_constant_stages: vk::ShaderStageFlags,
}

impl<'a> GraphicsExecutionContext<'a> {
    /// Raw command buffer, for collaborator-recorded draws (§6 "Scene
    /// collaborator: render_meshes(graphics_execution_context)"). Only the
    /// scene collaborator's mesh walk uses this; ordinary pass code should
    /// prefer the typed helpers below.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn push_constants(&self, data: &[u8]) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                self.pipeline_layout,
                self.push_constant_stages,
                0,
                data,
            );
        }
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw(self.command_buffer, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    pub fn draw_indexed(&self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Issues a single full-screen triangle draw (3 vertices, no bound vertex
    /// buffer) — the common case for post-process / lighting composite passes.
    pub fn draw_fullscreen_triangle(&self) {
        self.draw(3, 1, 0, 0);
    }

    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.device.cmd_bind_vertex_buffers(self.command_buffer, first_binding, buffers, offsets);
        }
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device.cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type);
        }
    }
}

/// Facade handed to a compute pass's callback.
pub struct ComputeExecutionContext<'a> {
    pub(crate) device: &'a ash::Device,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) push_constant_stages: vk::ShaderStageFlags,
    /// Kernel pipelines keyed by name, for passes with more than one kernel
    /// (§4.8: "bind descriptor sets at slot 2 when the pass callback
    /// resolves a specific pipeline within its kernel list").
    pub(crate) kernel_pipelines: &'a std::collections::HashMap<String, vk::Pipeline>,
}

impl<'a> ComputeExecutionContext<'a> {
    /// Binds the named kernel's pipeline object. Single-kernel compute
    /// passes may skip this and dispatch directly against the pipeline the
    /// executor already bound.
    pub fn bind(&self, kernel_name: &str) {
        if let Some(&pipeline) = self.kernel_pipelines.get(kernel_name) {
            unsafe {
                self.device
                    .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
            }
        }
    }

    pub fn push_constants(&self, data: &[u8]) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                self.pipeline_layout,
                self.push_constant_stages,
                0,
                data,
            );
        }
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe {
            self.device.cmd_dispatch(self.command_buffer, x, y, z);
        }
    }
}

/// Facade handed to a raytracing pass's callback.
pub struct RaytracingExecutionContext<'a> {
    pub(crate) device: &'a ash::Device,
    pub(crate) raytracing_pipeline_ext: &'a ash::extensions::khr::RayTracingPipeline,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) push_constant_stages: vk::ShaderStageFlags,
    pub(crate) raygen_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) miss_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) hit_region: vk::StridedDeviceAddressRegionKHR,
}

impl<'a> RaytracingExecutionContext<'a> {
    pub fn push_constants(&self, data: &[u8]) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                self.pipeline_layout,
                self.push_constant_stages,
                0,
                data,
            );
        }
    }

    /// Invokes `vkCmdTraceRaysKHR` with the cached SBT regions for raygen,
    /// miss, and hit, and an empty callable region (§4.7).
    pub fn trace_rays(&self, width: u32, height: u32) {
        let empty_region = vk::StridedDeviceAddressRegionKHR::default();
        unsafe {
            self.raytracing_pipeline_ext.cmd_trace_rays(
                self.command_buffer,
                &self.raygen_region,
                &self.miss_region,
                &self.hit_region,
                &empty_region,
                width,
                height,
                1,
            );
        }
    }
}
