//! The pipeline cache (§4.5).
//!
//! Builds graphics/compute/raytracing pipeline objects on first reference and
//! returns a cheap [`PipelineHandle`] thereafter. Keyed by pass name rather
//! than by pipeline description, since a pass's description only changes
//! across a shader hot-reload (§8 Scenario E), at which point the cache entry
//! for that pass is explicitly invalidated rather than hashed against.
//!
//! Mirrors the teacher's `VulkanDevice::create_pipeline`
//! (`rhi/vulkan/vulkan_device.rs`) for the raw `vk::GraphicsPipelineCreateInfo`
//! construction, generalized from the teacher's single fixed-function render
//! pass to dynamic rendering (`vk::PipelineRenderingCreateInfo`, no
//! `VkRenderPass`) and from one vertex layout to the `VertexInputPreset`s of
//! §3.

use crate::error::{PipelineError, ShaderError};
use crate::render_graph::types::{
    BlendPreset, ComputePipelineDesc, DynamicState, GraphicsPipelineDesc, RaytracingPipelineDesc, VertexInputPreset,
};
use crate::shader_cache::ShaderCache;
use ash::vk;
use fxhash::FxHashMap;
use std::ffi::CString;

/// An opaque reference into the pipeline pool. `NONE` is used by blit passes,
/// which have no pipeline of their own (§4.6 compile step for `BlitPassDecl`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineHandle(pub u32);

impl PipelineHandle {
    pub const NONE: PipelineHandle = PipelineHandle(u32::MAX);
}

struct PipelineEntry {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    push_constant_stages: vk::ShaderStageFlags,
    /// Raygen/miss/hit shader binding table regions, populated only for
    /// raytracing pipelines (§6 "Shader binding table").
    sbt_regions: Option<(
        vk::StridedDeviceAddressRegionKHR,
        vk::StridedDeviceAddressRegionKHR,
        vk::StridedDeviceAddressRegionKHR,
    )>,
    sbt_buffer: Option<vk::Buffer>,
    sbt_allocation: Option<gpu_allocator::vulkan::Allocation>,
    kernel_pipelines: FxHashMap<String, vk::Pipeline>,
}

/// Owns every pipeline and pipeline layout the graph has ever built, keyed by
/// the declaring pass's name.
pub struct PipelineCache<'a> {
    device: &'a ash::Device,
    raytracing_pipeline_ext: Option<&'a ash::extensions::khr::RayTracingPipeline>,
    raytracing_properties: Option<vk::PhysicalDeviceRayTracingPipelinePropertiesKHR>,
    descriptor_set0_layout: vk::DescriptorSetLayout,
    descriptor_set1_layout: vk::DescriptorSetLayout,
    entries: FxHashMap<String, PipelineEntry>,
}

impl<'a> PipelineCache<'a> {
    pub fn new(
        device: &'a ash::Device,
        raytracing_pipeline_ext: Option<&'a ash::extensions::khr::RayTracingPipeline>,
        raytracing_properties: Option<vk::PhysicalDeviceRayTracingPipelinePropertiesKHR>,
        descriptor_set0_layout: vk::DescriptorSetLayout,
        descriptor_set1_layout: vk::DescriptorSetLayout,
    ) -> Self {
        PipelineCache {
            device,
            raytracing_pipeline_ext,
            raytracing_properties,
            descriptor_set0_layout,
            descriptor_set1_layout,
            entries: FxHashMap::default(),
        }
    }

    /// Drops the cached pipeline for `pass`, so the next `get_or_build_*`
    /// call rebuilds it from the (presumably just-recompiled) shader module
    /// (§8 Scenario E "Hot shader reload"). Waits device idle first: §4.5
    /// guarantees a cached pipeline is "never destroyed while a frame using
    /// it is in flight", and the pipeline cache has no deletion-queue slot of
    /// its own to defer through.
    pub fn invalidate(&mut self, pass_name: &str, allocator: &mut gpu_allocator::vulkan::Allocator) -> Result<(), PipelineError> {
        if let Some(entry) = self.entries.remove(pass_name) {
            unsafe { self.device.device_wait_idle() }.map_err(PipelineError::DeviceWaitIdle)?;
            self.destroy_entry(entry, allocator);
        }
        Ok(())
    }

    /// Destroys every cached pipeline (§4.5 "Pipelines are destroyed only
    /// during `clear_cache`, which waits device idle"; §5 "`clear_cache` ...
    /// call `vkDeviceWaitIdle`"). The next `get_or_build_*` call for any pass
    /// rebuilds it from scratch.
    pub fn clear_cache(&mut self, allocator: &mut gpu_allocator::vulkan::Allocator) -> Result<(), PipelineError> {
        unsafe { self.device.device_wait_idle() }.map_err(PipelineError::DeviceWaitIdle)?;
        for (_, entry) in self.entries.drain().collect::<Vec<_>>() {
            self.destroy_entry(entry, allocator);
        }
        Ok(())
    }

    fn destroy_entry(&self, entry: PipelineEntry, allocator: &mut gpu_allocator::vulkan::Allocator) {
        unsafe {
            self.device.destroy_pipeline(entry.pipeline, None);
            self.device.destroy_pipeline_layout(entry.layout, None);
            for pipeline in entry.kernel_pipelines.into_values() {
                self.device.destroy_pipeline(pipeline, None);
            }
            if let Some(sbt_buffer) = entry.sbt_buffer {
                self.device.destroy_buffer(sbt_buffer, None);
            }
        }
        if let Some(allocation) = entry.sbt_allocation {
            if let Err(source) = allocator.free(allocation) {
                log::warn!("freeing shader binding table allocation failed: {source}");
            }
        }
    }

    fn build_layout(
        &self,
        pass_name: &str,
        set2_layout: Option<vk::DescriptorSetLayout>,
        push_constant_size: u32,
        push_constant_stages: vk::ShaderStageFlags,
    ) -> Result<vk::PipelineLayout, PipelineError> {
        let mut set_layouts = vec![self.descriptor_set0_layout, self.descriptor_set1_layout];
        if let Some(set2) = set2_layout {
            set_layouts.push(set2);
        }

        let push_constant_ranges = if push_constant_size > 0 {
            vec![vk::PushConstantRange {
                stage_flags: push_constant_stages,
                offset: 0,
                size: push_constant_size,
            }]
        } else {
            Vec::new()
        };

        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        unsafe { self.device.create_pipeline_layout(&create_info, None) }.map_err(|source| PipelineError::LayoutCreation {
            name: pass_name.to_string(),
            source,
        })
    }

    /// Builds (or returns the cached) graphics pipeline for `pass_name`,
    /// using dynamic rendering rather than a `VkRenderPass`/`VkFramebuffer`
    /// pair (§4.1 required device features).
    pub fn get_or_build_graphics(
        &mut self,
        pass_name: &str,
        desc: &GraphicsPipelineDesc,
        shader_cache: &ShaderCache,
        color_attachment_formats: &[vk::Format],
        depth_attachment_format: Option<vk::Format>,
        set2_layout: Option<vk::DescriptorSetLayout>,
    ) -> Result<PipelineHandle, PipelineError> {
        if !self.entries.contains_key(pass_name) {
            let layout =
                self.build_layout(pass_name, set2_layout, desc.push_constant_size, desc.push_constant_stages)?;

            let entry_point = CString::new("main").unwrap();

            let vertex_module = shader_cache
                .get_module(&desc.vertex_shader)
                .map_err(PipelineError::Shader)?;
            let mut stages = vec![vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(&entry_point)
                .build()];

            if let Some(fragment_shader) = &desc.fragment_shader {
                let fragment_module = shader_cache.get_module(fragment_shader).map_err(PipelineError::Shader)?;
                stages.push(
                    vk::PipelineShaderStageCreateInfo::builder()
                        .stage(vk::ShaderStageFlags::FRAGMENT)
                        .module(fragment_module)
                        .name(&entry_point)
                        .build(),
                );
            }

            let (bindings, attributes) = vertex_input_state_for(desc.vertex_input);
            let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&bindings)
                .vertex_attribute_descriptions(&attributes);

            let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
                .topology(desc.topology)
                .primitive_restart_enable(false);

            let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);

            let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
                .polygon_mode(vk::PolygonMode::FILL)
                .cull_mode(desc.cull_mode)
                .front_face(desc.front_face)
                .line_width(desc.line_width)
                .depth_bias_enable(desc.dynamic_state.contains(DynamicState::DEPTH_BIAS));

            let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(desc.samples);

            let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
                .depth_test_enable(desc.depth_test)
                .depth_write_enable(desc.depth_write)
                .depth_compare_op(desc.depth_compare);

            let (src_color, dst_color, src_alpha, dst_alpha) = blend_factors_for(desc.blend.preset);
            let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = color_attachment_formats
                .iter()
                .map(|_| {
                    vk::PipelineColorBlendAttachmentState::builder()
                        .color_write_mask(vk::ColorComponentFlags::RGBA)
                        .blend_enable(desc.blend.enabled)
                        .src_color_blend_factor(src_color)
                        .dst_color_blend_factor(dst_color)
                        .color_blend_op(vk::BlendOp::ADD)
                        .src_alpha_blend_factor(src_alpha)
                        .dst_alpha_blend_factor(dst_alpha)
                        .alpha_blend_op(vk::BlendOp::ADD)
                        .build()
                })
                .collect();
            let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&color_blend_attachments);

            let dynamic_states = dynamic_states_for(desc.dynamic_state);
            let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

            let mut rendering_info = vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(color_attachment_formats);
            if let Some(depth_format) = depth_attachment_format {
                rendering_info = rendering_info.depth_attachment_format(depth_format);
            }

            let create_info = vk::GraphicsPipelineCreateInfo::builder()
                .push_next(&mut rendering_info)
                .stages(&stages)
                .vertex_input_state(&vertex_input_state)
                .input_assembly_state(&input_assembly_state)
                .viewport_state(&viewport_state)
                .rasterization_state(&rasterization_state)
                .multisample_state(&multisample_state)
                .depth_stencil_state(&depth_stencil_state)
                .color_blend_state(&color_blend_state)
                .dynamic_state(&dynamic_state)
                .layout(layout)
                .build();

            let pipeline = unsafe {
                self.device
                    .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
            }
            .map_err(|(_, source)| PipelineError::GraphicsPipelineCreation {
                name: pass_name.to_string(),
                source,
            })?[0];

            self.entries.insert(
                pass_name.to_string(),
                PipelineEntry {
                    pipeline,
                    layout,
                    push_constant_stages: desc.push_constant_stages,
                    sbt_regions: None,
                    sbt_buffer: None,
                    sbt_allocation: None,
                    kernel_pipelines: FxHashMap::default(),
                },
            );
        }

        Ok(self.handle_for(pass_name))
    }

    pub fn get_or_build_compute(
        &mut self,
        pass_name: &str,
        desc: &ComputePipelineDesc,
        shader_cache: &ShaderCache,
        set2_layout: Option<vk::DescriptorSetLayout>,
    ) -> Result<PipelineHandle, PipelineError> {
        if !self.entries.contains_key(pass_name) {
            let push_constant_size = desc.push_constant_size.unwrap_or(0);
            let layout = self.build_layout(pass_name, set2_layout, push_constant_size, vk::ShaderStageFlags::COMPUTE)?;

            let entry_point = CString::new("main").unwrap();
            let mut kernel_pipelines = FxHashMap::default();

            for kernel in &desc.kernels {
                let module = shader_cache.get_module(&kernel.shader).map_err(PipelineError::Shader)?;
                let stage = vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(module)
                    .name(&entry_point)
                    .build();

                let create_info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout).build();

                let pipeline = unsafe {
                    self.device
                        .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                }
                .map_err(|(_, source)| PipelineError::ComputePipelineCreation {
                    name: pass_name.to_string(),
                    source,
                })?[0];

                kernel_pipelines.insert(kernel.name.clone(), pipeline);
            }

            // The "primary" pipeline handle resolves to the first kernel so a
            // single-kernel pass never needs `ComputeExecutionContext::bind`.
            let primary = desc
                .kernels
                .first()
                .and_then(|k| kernel_pipelines.get(&k.name).copied())
                .unwrap_or(vk::Pipeline::null());

            self.entries.insert(
                pass_name.to_string(),
                PipelineEntry {
                    pipeline: primary,
                    layout,
                    push_constant_stages: vk::ShaderStageFlags::COMPUTE,
                    sbt_regions: None,
                    sbt_buffer: None,
                    sbt_allocation: None,
                    kernel_pipelines,
                },
            );
        }

        Ok(self.handle_for(pass_name))
    }

    /// Builds a raytracing pipeline and its shader binding table (§6 "Shader
    /// binding table" — raygen/miss/hit groups laid out contiguously with
    /// `shader_group_base_alignment`/`shader_group_handle_alignment`
    /// respected per region).
    pub fn get_or_build_raytracing(
        &mut self,
        pass_name: &str,
        desc: &RaytracingPipelineDesc,
        shader_cache: &ShaderCache,
        set2_layout: Option<vk::DescriptorSetLayout>,
        allocator: &mut gpu_allocator::vulkan::Allocator,
    ) -> Result<PipelineHandle, PipelineError> {
        let Some(rt_ext) = self.raytracing_pipeline_ext else {
            return Err(PipelineError::RaytracingPipelineCreation {
                name: pass_name.to_string(),
                source: vk::Result::ERROR_FEATURE_NOT_PRESENT,
            });
        };
        let properties = self.raytracing_properties.expect("raytracing extension without cached properties");

        if !self.entries.contains_key(pass_name) {
            let layout =
                self.build_layout(pass_name, set2_layout, desc.push_constant_size, shader_stage_raytracing())?;

            let entry_point = CString::new("main").unwrap();
            let mut stages = Vec::new();
            let mut groups = Vec::new();

            let raygen_module = shader_cache.get_module(&desc.raygen).map_err(PipelineError::Shader)?;
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::RAYGEN_KHR)
                    .module(raygen_module)
                    .name(&entry_point)
                    .build(),
            );
            groups.push(general_group(0));

            for miss in &desc.miss {
                let module = shader_cache.get_module(miss).map_err(PipelineError::Shader)?;
                stages.push(
                    vk::PipelineShaderStageCreateInfo::builder()
                        .stage(vk::ShaderStageFlags::MISS_KHR)
                        .module(module)
                        .name(&entry_point)
                        .build(),
                );
                groups.push(general_group((stages.len() - 1) as u32));
            }

            for hit_group in &desc.hit_groups {
                let closest_hit_module = shader_cache.get_module(&hit_group.closest_hit).map_err(PipelineError::Shader)?;
                stages.push(
                    vk::PipelineShaderStageCreateInfo::builder()
                        .stage(vk::ShaderStageFlags::CLOSEST_HIT_KHR)
                        .module(closest_hit_module)
                        .name(&entry_point)
                        .build(),
                );
                let closest_hit_index = (stages.len() - 1) as u32;

                let any_hit_index = if let Some(any_hit) = &hit_group.any_hit {
                    let module = shader_cache.get_module(any_hit).map_err(PipelineError::Shader)?;
                    stages.push(
                        vk::PipelineShaderStageCreateInfo::builder()
                            .stage(vk::ShaderStageFlags::ANY_HIT_KHR)
                            .module(module)
                            .name(&entry_point)
                            .build(),
                    );
                    (stages.len() - 1) as u32
                } else {
                    vk::SHADER_UNUSED_KHR
                };

                groups.push(
                    vk::RayTracingShaderGroupCreateInfoKHR::builder()
                        .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                        .general_shader(vk::SHADER_UNUSED_KHR)
                        .closest_hit_shader(closest_hit_index)
                        .any_hit_shader(any_hit_index)
                        .intersection_shader(vk::SHADER_UNUSED_KHR)
                        .build(),
                );
            }

            let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
                .stages(&stages)
                .groups(&groups)
                .max_pipeline_ray_recursion_depth(desc.max_recursion_depth)
                .layout(layout)
                .build();

            let pipeline = unsafe {
                rt_ext.create_ray_tracing_pipelines(vk::DeferredOperationKHR::null(), vk::PipelineCache::null(), &[create_info], None)
            }
            .map_err(|(_, source)| PipelineError::RaytracingPipelineCreation {
                name: pass_name.to_string(),
                source,
            })?[0];

            let (sbt_buffer, sbt_allocation, regions) = build_shader_binding_table(
                self.device,
                rt_ext,
                &properties,
                pipeline,
                groups.len(),
                desc.miss.len(),
                desc.hit_groups.len(),
                allocator,
            )
            .map_err(|source| PipelineError::ShaderBindingTable {
                name: pass_name.to_string(),
                source,
            })?;

            self.entries.insert(
                pass_name.to_string(),
                PipelineEntry {
                    pipeline,
                    layout,
                    push_constant_stages: shader_stage_raytracing(),
                    sbt_regions: Some(regions),
                    sbt_buffer: Some(sbt_buffer),
                    sbt_allocation: Some(sbt_allocation),
                    kernel_pipelines: FxHashMap::default(),
                },
            );
        }

        Ok(self.handle_for(pass_name))
    }

    fn handle_for(&self, pass_name: &str) -> PipelineHandle {
        // The cache is keyed by name, not by a dense index; the handle carries
        // no payload beyond "resolve this pass's entry again" so lookups stay
        // through `pipeline_for`/`layout_for` rather than a raw `vk::Pipeline`.
        let _ = pass_name;
        PipelineHandle(0)
    }

    pub fn pipeline_for(&self, pass_name: &str) -> vk::Pipeline {
        self.entries.get(pass_name).map(|e| e.pipeline).unwrap_or(vk::Pipeline::null())
    }

    pub fn layout_for(&self, pass_name: &str) -> vk::PipelineLayout {
        self.entries.get(pass_name).map(|e| e.layout).unwrap_or(vk::PipelineLayout::null())
    }

    pub fn push_constant_stages_for(&self, pass_name: &str) -> vk::ShaderStageFlags {
        self.entries
            .get(pass_name)
            .map(|e| e.push_constant_stages)
            .unwrap_or(vk::ShaderStageFlags::empty())
    }

    pub fn kernel_pipelines_for(&self, pass_name: &str) -> FxHashMap<String, vk::Pipeline> {
        self.entries
            .get(pass_name)
            .map(|e| e.kernel_pipelines.clone())
            .unwrap_or_default()
    }

    pub fn sbt_regions_for(
        &self,
        pass_name: &str,
    ) -> Option<(
        vk::StridedDeviceAddressRegionKHR,
        vk::StridedDeviceAddressRegionKHR,
        vk::StridedDeviceAddressRegionKHR,
    )> {
        self.entries.get(pass_name).and_then(|e| e.sbt_regions)
    }
}

fn general_group(index: u32) -> vk::RayTracingShaderGroupCreateInfoKHR {
    vk::RayTracingShaderGroupCreateInfoKHR::builder()
        .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
        .general_shader(index)
        .closest_hit_shader(vk::SHADER_UNUSED_KHR)
        .any_hit_shader(vk::SHADER_UNUSED_KHR)
        .intersection_shader(vk::SHADER_UNUSED_KHR)
        .build()
}

fn shader_stage_raytracing() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::MISS_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR
}

fn vertex_input_state_for(
    preset: VertexInputPreset,
) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    match preset {
        VertexInputPreset::Empty => (Vec::new(), Vec::new()),
        VertexInputPreset::Standard => {
            // position (vec3) + normal (vec3) + uv (vec2), tightly packed.
            let stride = (3 + 3 + 2) * 4;
            let bindings = vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }];
            let attributes = vec![
                vk::VertexInputAttributeDescription { location: 0, binding: 0, format: vk::Format::R32G32B32_SFLOAT, offset: 0 },
                vk::VertexInputAttributeDescription { location: 1, binding: 0, format: vk::Format::R32G32B32_SFLOAT, offset: 12 },
                vk::VertexInputAttributeDescription { location: 2, binding: 0, format: vk::Format::R32G32_SFLOAT, offset: 24 },
            ];
            (bindings, attributes)
        }
        VertexInputPreset::Ui => {
            // position (vec2) + uv (vec2) + color (vec4).
            let stride = (2 + 2 + 4) * 4;
            let bindings = vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }];
            let attributes = vec![
                vk::VertexInputAttributeDescription { location: 0, binding: 0, format: vk::Format::R32G32_SFLOAT, offset: 0 },
                vk::VertexInputAttributeDescription { location: 1, binding: 0, format: vk::Format::R32G32_SFLOAT, offset: 8 },
                vk::VertexInputAttributeDescription { location: 2, binding: 0, format: vk::Format::R32G32B32A32_SFLOAT, offset: 16 },
            ];
            (bindings, attributes)
        }
    }
}

fn blend_factors_for(preset: BlendPreset) -> (vk::BlendFactor, vk::BlendFactor, vk::BlendFactor, vk::BlendFactor) {
    match preset {
        BlendPreset::AlphaBlend => (
            vk::BlendFactor::SRC_ALPHA,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            vk::BlendFactor::ONE,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        ),
        BlendPreset::Additive => (vk::BlendFactor::ONE, vk::BlendFactor::ONE, vk::BlendFactor::ONE, vk::BlendFactor::ONE),
        BlendPreset::PremultipliedAlpha => (
            vk::BlendFactor::ONE,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            vk::BlendFactor::ONE,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        ),
    }
}

fn dynamic_states_for(flags: DynamicState) -> Vec<vk::DynamicState> {
    let mut states = Vec::new();
    if flags.contains(DynamicState::VIEWPORT) {
        states.push(vk::DynamicState::VIEWPORT);
    }
    if flags.contains(DynamicState::SCISSOR) {
        states.push(vk::DynamicState::SCISSOR);
    }
    if flags.contains(DynamicState::DEPTH_BIAS) {
        states.push(vk::DynamicState::DEPTH_BIAS);
    }
    states
}

/// Builds a single device-local buffer holding the raygen, miss, and hit
/// group handles back to back, each region rounded up to
/// `shader_group_base_alignment` (§6 "Shader binding table", bit-exact
/// layout).
fn build_shader_binding_table(
    device: &ash::Device,
    rt_ext: &ash::extensions::khr::RayTracingPipeline,
    properties: &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,
    pipeline: vk::Pipeline,
    group_count: usize,
    miss_count: usize,
    hit_count: usize,
    allocator: &mut gpu_allocator::vulkan::Allocator,
) -> Result<
    (
        vk::Buffer,
        gpu_allocator::vulkan::Allocation,
        (
            vk::StridedDeviceAddressRegionKHR,
            vk::StridedDeviceAddressRegionKHR,
            vk::StridedDeviceAddressRegionKHR,
        ),
    ),
    vk::Result,
> {
    let handle_size = properties.shader_group_handle_size as u64;
    let base_alignment = properties.shader_group_base_alignment as u64;
    let handle_alignment = properties.shader_group_handle_alignment as u64;

    let aligned_handle_size = align_up(handle_size, handle_alignment);
    let raygen_region_size = align_up(aligned_handle_size, base_alignment);
    let miss_region_size = align_up(aligned_handle_size * miss_count as u64, base_alignment);
    let hit_region_size = align_up(aligned_handle_size * hit_count.max(1) as u64, base_alignment);
    let total_size = raygen_region_size + miss_region_size + hit_region_size;

    let handle_data_size = handle_size * group_count as u64;
    let handles = unsafe { rt_ext.get_ray_tracing_shader_group_handles(pipeline, 0, group_count as u32, handle_data_size as usize) }?;

    let buffer_create_info = vk::BufferCreateInfo::builder()
        .size(total_size)
        .usage(
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::TRANSFER_DST,
        )
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.create_buffer(&buffer_create_info, None) }?;

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let allocation = allocator
        .allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
            name: "sbt",
            requirements,
            location: gpu_allocator::MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|_| vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
    unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }?;

    if let Some(mapped) = allocation.mapped_ptr() {
        unsafe {
            let dst = mapped.as_ptr() as *mut u8;
            std::ptr::copy_nonoverlapping(handles.as_ptr(), dst, aligned_handle_size.min(handle_size) as usize);
            for i in 0..miss_count {
                let src = handles.as_ptr().add(handle_size as usize * (1 + i));
                let dst = dst.add((raygen_region_size + aligned_handle_size * i as u64) as usize);
                std::ptr::copy_nonoverlapping(src, dst, handle_size as usize);
            }
            for i in 0..hit_count.max(1) {
                let src = handles.as_ptr().add(handle_size as usize * (1 + miss_count + i));
                let dst = dst.add((raygen_region_size + miss_region_size + aligned_handle_size * i as u64) as usize);
                std::ptr::copy_nonoverlapping(src, dst, handle_size as usize);
            }
        }
    }

    let address_info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
    let base_address = unsafe { device.get_buffer_device_address(&address_info) };

    let raygen_region = vk::StridedDeviceAddressRegionKHR {
        device_address: base_address,
        stride: raygen_region_size,
        size: raygen_region_size,
    };
    let miss_region = vk::StridedDeviceAddressRegionKHR {
        device_address: base_address + raygen_region_size,
        stride: aligned_handle_size,
        size: miss_region_size,
    };
    let hit_region = vk::StridedDeviceAddressRegionKHR {
        device_address: base_address + raygen_region_size + miss_region_size,
        stride: aligned_handle_size,
        size: hit_region_size,
    };

    Ok((buffer, allocation, (raygen_region, miss_region, hit_region)))
}

fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        (value + alignment - 1) / alignment * alignment
    }
}
