//! The render graph executor (§4.7).
//!
//! Walks a [`CompiledGraph`]'s execution order once per frame, inserting
//! barriers ahead of each pass and recording its draws/dispatches/traces/
//! blits through the matching [`super::contexts`] facade.

use super::contexts::{ComputeExecutionContext, GraphicsExecutionContext, RaytracingExecutionContext};
use super::types::*;
use ash::vk;
use std::collections::HashMap;

/// The required (layout, access, stage) triple for a resource usage,
/// resolved against the pass's pipeline family where the usage is
/// shader-visible (§4.7 Barrier insertion bullet list).
fn required_access(usage: ImageUsageKind, family: PipelineFamily) -> RequiredAccess {
    match usage {
        ImageUsageKind::ColorAttachment => RequiredAccess {
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        },
        ImageUsageKind::DepthAttachment => RequiredAccess {
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            stage_mask: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
        },
        ImageUsageKind::Sampled => RequiredAccess {
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            access_mask: vk::AccessFlags2::SHADER_READ,
            stage_mask: shader_stage_for(family),
        },
        ImageUsageKind::Storage => RequiredAccess {
            layout: vk::ImageLayout::GENERAL,
            access_mask: vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
            stage_mask: shader_stage_for(family),
        },
    }
}

fn shader_stage_for(family: PipelineFamily) -> vk::PipelineStageFlags2 {
    match family {
        PipelineFamily::Graphics => vk::PipelineStageFlags2::FRAGMENT_SHADER,
        PipelineFamily::Compute => vk::PipelineStageFlags2::COMPUTE_SHADER,
        PipelineFamily::Raytracing => vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
    }
}

/// A conservative, "always correct" barrier policy (§9 "Barrier precision"):
/// all commands to all commands, memory-write to memory-read|write. Good
/// enough for a first implementation; per-stage precision is a future
/// optimization the spec explicitly defers.
fn conservative_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    aspect_mask: vk::ImageAspectFlags,
) -> vk::ImageMemoryBarrier2 {
    vk::ImageMemoryBarrier2::builder()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .build()
}

fn aspect_for(usage: ImageUsageKind, format: vk::Format) -> vk::ImageAspectFlags {
    let is_depth_stencil = matches!(
        format,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    );
    match usage {
        ImageUsageKind::DepthAttachment if is_depth_stencil => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        ImageUsageKind::DepthAttachment => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Resolves which `ImageUsageKind` a pass uses a given resource with, from
/// the compiled pass's own records (attachments for graphics, storage
/// bindings for compute/raytracing, sampled otherwise). Never called for
/// blit passes — their source/destination use the transfer layouts computed
/// directly in [`GraphExecutor::insert_barriers`], not a shader-usage kind.
fn usage_kind_for(pass: &CompiledPass, resource: &str, descriptors: &HashMap<String, ImageDescriptor>) -> ImageUsageKind {
    match &pass.kind {
        CompiledPassKind::Graphics { color_attachments, depth_attachment } => {
            if depth_attachment.as_deref() == Some(resource) {
                return ImageUsageKind::DepthAttachment;
            }
            if color_attachments.iter().any(|n| n == resource) {
                return ImageUsageKind::ColorAttachment;
            }
            ImageUsageKind::Sampled
        }
        CompiledPassKind::Compute { .. } | CompiledPassKind::Raytracing => {
            if pass.outputs.iter().any(|o| o == resource) {
                descriptors
                    .get(resource)
                    .map(|d| d.usage)
                    .unwrap_or(ImageUsageKind::Storage)
            } else {
                ImageUsageKind::Sampled
            }
        }
        CompiledPassKind::Blit { .. } => unreachable!("blit passes resolve barriers directly, not through usage_kind_for"),
    }
}

/// The required access for a blit source (§4.7 Blit: "transition source to
/// `TRANSFER_SRC_OPTIMAL`").
fn transfer_src_access() -> RequiredAccess {
    RequiredAccess {
        layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        access_mask: vk::AccessFlags2::TRANSFER_READ,
        stage_mask: vk::PipelineStageFlags2::TRANSFER,
    }
}

/// The required access for a blit destination (§4.7 Blit: "transition
/// destination to `TRANSFER_DST_OPTIMAL`", "destination may be a swapchain
/// image").
fn transfer_dst_access() -> RequiredAccess {
    RequiredAccess {
        layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        access_mask: vk::AccessFlags2::TRANSFER_WRITE,
        stage_mask: vk::PipelineStageFlags2::TRANSFER,
    }
}

/// The final transition every `RENDER_OUTPUT` physical image receives once
/// the execution order has finished replaying (§4.9 end_frame step 1:
/// "Transition the swapchain image to `PRESENT_SRC_KHR`"), folded into the
/// graph's own barrier tracking rather than the frame scheduler's, since the
/// graph is what knows `RENDER_OUTPUT`'s actual last-used layout (a direct
/// color-attachment write and a blit destination leave it in different
/// states).
fn present_access() -> RequiredAccess {
    RequiredAccess {
        layout: vk::ImageLayout::PRESENT_SRC_KHR,
        access_mask: vk::AccessFlags2::NONE,
        stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
    }
}

/// A cheaply-cloned snapshot of `CompiledPass::kind`, taken so the pass's
/// kind can be inspected without holding a borrow across the mutable borrow
/// `execute` needs to hand the pass's callback a `&mut` execution context.
enum PassKindSnapshot {
    Graphics(Vec<String>, Option<String>),
    Compute,
    Raytracing,
    Blit(String, String),
}

/// Executes a compiled graph into `command_buffer` for the given frame and
/// swapchain image (§4.7 entry point). The UI/overlay collaborator contract
/// of §6 (invoked after the terminal pass's attachment transitions but
/// before the present transition) is wired by [`crate::frame_scheduler::FrameScheduler::end_frame`],
/// not here — this executor only knows about declared passes.
pub struct GraphExecutor<'a> {
    pub device: &'a ash::Device,
    pub raytracing_pipeline_ext: Option<&'a ash::extensions::khr::RayTracingPipeline>,
    pub descriptor_set0: vk::DescriptorSet,
    pub descriptor_set1: vk::DescriptorSet,
    pub image_descriptors: &'a HashMap<String, ImageDescriptor>,
    pub pipelines: &'a HashMap<String, vk::Pipeline>,
    pub kernel_pipelines: &'a HashMap<String, HashMap<String, vk::Pipeline>>,
    pub pipeline_layouts: &'a HashMap<String, vk::PipelineLayout>,
    pub push_constant_stages: &'a HashMap<String, vk::ShaderStageFlags>,
    pub sbt_regions: &'a HashMap<
        String,
        (
            vk::StridedDeviceAddressRegionKHR,
            vk::StridedDeviceAddressRegionKHR,
            vk::StridedDeviceAddressRegionKHR,
        ),
    >,
    pub timestamp_period: f32,
}

impl<'a> GraphExecutor<'a> {
    pub fn execute(
        &self,
        graph: &mut CompiledGraph,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) {
        unsafe {
            self.device
                .cmd_reset_query_pool(command_buffer, graph.timestamp_pool, 0, 2 * graph.execution_order.len() as u32);
        }

        let pass_count = graph.execution_order.len();
        for pass_position in 0..pass_count {
            self.insert_barriers(graph, pass_position, command_buffer);

            unsafe {
                self.device.cmd_write_timestamp2(
                    command_buffer,
                    vk::PipelineStageFlags2::TOP_OF_PIPE,
                    graph.timestamp_pool,
                    2 * pass_position as u32,
                );
            }

            // Split borrow: `insert_barriers` only touched `graph.image_access`/
            // `graph.resource_to_physical`/`graph.physical_images`, so the pass
            // itself can now be borrowed mutably to hand its callback a `&mut`
            // execution context, alongside separate immutable borrows of the
            // graph's other (disjoint) fields.
            let kind_snapshot = match &graph.execution_order[pass_position].kind {
                CompiledPassKind::Graphics { color_attachments, depth_attachment } => {
                    PassKindSnapshot::Graphics(color_attachments.clone(), depth_attachment.clone())
                }
                CompiledPassKind::Compute { .. } => PassKindSnapshot::Compute,
                CompiledPassKind::Raytracing => PassKindSnapshot::Raytracing,
                CompiledPassKind::Blit { source, destination } => {
                    PassKindSnapshot::Blit(source.clone(), destination.clone())
                }
            };

            let pass = &mut graph.execution_order[pass_position];
            match kind_snapshot {
                PassKindSnapshot::Graphics(color_attachments, depth_attachment) => {
                    self.record_graphics_pass(
                        &graph.resource_to_physical,
                        &graph.physical_images,
                        pass,
                        &color_attachments,
                        depth_attachment.as_deref(),
                        command_buffer,
                        extent,
                    );
                }
                PassKindSnapshot::Compute => {
                    self.record_compute_pass(pass, command_buffer);
                }
                PassKindSnapshot::Raytracing => {
                    self.record_raytracing_pass(pass, command_buffer);
                }
                PassKindSnapshot::Blit(source, destination) => {
                    self.record_blit_pass(
                        &graph.resource_to_physical,
                        &graph.physical_images,
                        &source,
                        &destination,
                        command_buffer,
                        extent,
                    );
                }
            }

            unsafe {
                self.device.cmd_write_timestamp2(
                    command_buffer,
                    vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                    graph.timestamp_pool,
                    2 * pass_position as u32 + 1,
                );
            }
        }
    }

    /// Transitions `RENDER_OUTPUT` to `PRESENT_SRC_KHR` (§4.9 end_frame step
    /// 1). Deliberately **not** called from [`GraphExecutor::execute`]: §6's
    /// UI/overlay collaborator contract requires the overlay to draw onto
    /// `RENDER_OUTPUT` *before* this transition, and `execute` returns before
    /// the overlay runs. `FrameScheduler::end_frame` calls this itself, right
    /// after invoking the overlay and right before submitting.
    pub fn finish_present_transition(&self, graph: &mut CompiledGraph, command_buffer: vk::CommandBuffer) {
        self.insert_present_transition(graph, command_buffer);
    }

    /// Converts a pair of raw timestamp query values into milliseconds,
    /// per the bit-exact formula in §6.
    pub fn timestamp_delta_ms(&self, t0: u64, t1: u64) -> f64 {
        (t1 as f64 - t0 as f64) * self.timestamp_period as f64 / 1_000_000.0
    }

    fn insert_barriers(&self, graph: &mut CompiledGraph, pass_position: usize, command_buffer: vk::CommandBuffer) {
        // Resolve each touched resource's required usage while `pass` is
        // still borrowed, then drop that borrow before touching
        // `graph.image_access`/`graph.physical_images` mutably — these are
        // disjoint fields of the same `CompiledGraph` but `usage_kind_for`
        // needs the pass's `kind`, which can't be held across the mutation.
        let pass = &graph.execution_order[pass_position];
        let family = pass.family;

        // Blit passes don't go through the attachment/shader-usage model at
        // all (§4.7 Blit): source is read via TRANSFER_SRC_OPTIMAL,
        // destination written via TRANSFER_DST_OPTIMAL, regardless of what
        // `usage_kind_for` would otherwise infer from pass.inputs/outputs.
        let touched: Vec<(String, RequiredAccess, ImageUsageKind)> = match &pass.kind {
            CompiledPassKind::Blit { source, destination } => {
                vec![
                    (source.clone(), transfer_src_access(), ImageUsageKind::Sampled),
                    (destination.clone(), transfer_dst_access(), ImageUsageKind::Sampled),
                ]
            }
            _ => pass
                .inputs
                .iter()
                .chain(pass.outputs.iter())
                .map(|name| {
                    let usage = usage_kind_for(pass, name, self.image_descriptors);
                    (name.clone(), required_access(usage, family), usage)
                })
                .collect(),
        };

        let mut barriers = Vec::new();

        for (resource, required, usage) in touched {
            let Some(&physical) = graph.resource_to_physical.get(&resource) else {
                continue; // external resources (TLAS, persistent-owned) are not barrier-tracked here.
            };

            let current = &mut graph.image_access[physical.0 as usize];

            if current.layout == required.layout
                && current.access_mask == required.access_mask
                && current.stage_mask == required.stage_mask
            {
                continue;
            }

            let image = graph.physical_images[physical.0 as usize].graph_image.image;
            let format = graph.physical_images[physical.0 as usize].graph_image.format;
            let aspect = aspect_for(usage, format);

            barriers.push(conservative_barrier(image, current.layout, required.layout, aspect));

            *current = ImageAccess {
                layout: required.layout,
                access_mask: required.access_mask,
                stage_mask: required.stage_mask,
            };
        }

        if !barriers.is_empty() {
            self.record_barriers(command_buffer, &barriers);
        }
    }

    /// Transitions the `RENDER_OUTPUT` physical image to `PRESENT_SRC_KHR`
    /// after the execution order has fully replayed (§4.9 end_frame step 1).
    /// Whatever pass last wrote `RENDER_OUTPUT` — a direct color attachment
    /// or a blit destination — left it in a different tracked layout, so
    /// this always runs, diffing against whatever that layout was.
    fn insert_present_transition(&self, graph: &mut CompiledGraph, command_buffer: vk::CommandBuffer) {
        let physical = graph.render_output_physical;
        let required = present_access();
        let current = &mut graph.image_access[physical.0 as usize];

        if current.layout == required.layout {
            return;
        }

        let image = graph.physical_images[physical.0 as usize].graph_image.image;
        let barrier = conservative_barrier(image, current.layout, required.layout, vk::ImageAspectFlags::COLOR);

        *current = ImageAccess {
            layout: required.layout,
            access_mask: required.access_mask,
            stage_mask: required.stage_mask,
        };

        self.record_barriers(command_buffer, &[barrier]);
    }

    /// Issues the accumulated barriers as a single `vkCmdPipelineBarrier2`
    /// call. Split from `insert_barriers` so the access-state bookkeeping
    /// above stays testable without a live command buffer.
    fn record_barriers(&self, command_buffer: vk::CommandBuffer, barriers: &[vk::ImageMemoryBarrier2]) {
        let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(command_buffer, &dependency_info);
        }
    }

    fn record_graphics_pass(
        &self,
        resource_to_physical: &HashMap<String, PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
        pass: &mut CompiledPass,
        color_attachments: &[String],
        depth_attachment: Option<&str>,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) {
        let color_infos: Vec<vk::RenderingAttachmentInfo> = color_attachments
            .iter()
            .map(|name| {
                let view = self.view_for(resource_to_physical, physical_images, name);
                let clear = self
                    .image_descriptors
                    .get(name)
                    .and_then(|d| d.clear)
                    .map(clear_value)
                    .unwrap_or_default();
                vk::RenderingAttachmentInfo::builder()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(clear)
                    .build()
            })
            .collect();

        let depth_info = depth_attachment.map(|name| {
            let view = self.view_for(resource_to_physical, physical_images, name);
            let clear = self
                .image_descriptors
                .get(name)
                .and_then(|d| d.clear)
                .map(clear_value)
                .unwrap_or_default();
            vk::RenderingAttachmentInfo::builder()
                .image_view(view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear)
                .build()
        });

        let mut rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth) = depth_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.device.cmd_begin_rendering(command_buffer, &rendering_info);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            let scissor = vk::Rect2D { offset: vk::Offset2D::default(), extent };
            self.device.cmd_set_scissor(command_buffer, 0, &[scissor]);

            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipelines[&pass.name]);

            let layout = self.pipeline_layouts[&pass.name];
            let mut sets = vec![self.descriptor_set0, self.descriptor_set1];
            if let Some(set2) = pass.set2 {
                sets.push(set2);
            }
            self.device
                .cmd_bind_descriptor_sets(command_buffer, vk::PipelineBindPoint::GRAPHICS, layout, 0, &sets, &[]);
        }

        let mut ctx = GraphicsExecutionContext {
            device: self.device,
            command_buffer,
            pipeline_layout: self.pipeline_layouts[&pass.name],
            push_constant_stages: self.push_constant_stages.get(&pass.name).copied().unwrap_or_default(),
        };
        if let PassCallback::Graphics(callback) = &mut pass.callback {
            callback(&mut ctx);
        }

        unsafe {
            self.device.cmd_end_rendering(command_buffer);
        }
    }

    fn record_compute_pass(&self, pass: &mut CompiledPass, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, self.pipelines[&pass.name]);

            let layout = self.pipeline_layouts[&pass.name];
            let mut sets = vec![self.descriptor_set0, self.descriptor_set1];
            if let Some(set2) = pass.set2 {
                sets.push(set2);
            }
            self.device
                .cmd_bind_descriptor_sets(command_buffer, vk::PipelineBindPoint::COMPUTE, layout, 0, &sets, &[]);
        }

        let empty = HashMap::new();
        let kernels = self.kernel_pipelines.get(&pass.name).unwrap_or(&empty);
        let mut ctx = ComputeExecutionContext {
            device: self.device,
            command_buffer,
            pipeline_layout: self.pipeline_layouts[&pass.name],
            push_constant_stages: self.push_constant_stages.get(&pass.name).copied().unwrap_or_default(),
            kernel_pipelines: kernels,
        };
        if let PassCallback::Compute(callback) = &mut pass.callback {
            callback(&mut ctx);
        }
    }

    fn record_raytracing_pass(&self, pass: &mut CompiledPass, command_buffer: vk::CommandBuffer) {
        let Some(rt_ext) = self.raytracing_pipeline_ext else {
            return;
        };

        unsafe {
            self.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipelines[&pass.name],
            );

            let layout = self.pipeline_layouts[&pass.name];
            let mut sets = vec![self.descriptor_set0, self.descriptor_set1];
            if let Some(set2) = pass.set2 {
                sets.push(set2);
            }
            self.device
                .cmd_bind_descriptor_sets(command_buffer, vk::PipelineBindPoint::RAY_TRACING_KHR, layout, 0, &sets, &[]);
        }

        let (raygen, miss, hit) = self.sbt_regions[&pass.name];
        let mut ctx = RaytracingExecutionContext {
            device: self.device,
            raytracing_pipeline_ext: rt_ext,
            command_buffer,
            pipeline_layout: self.pipeline_layouts[&pass.name],
            push_constant_stages: self.push_constant_stages.get(&pass.name).copied().unwrap_or_default(),
            raygen_region: raygen,
            miss_region: miss,
            hit_region: hit,
        };
        if let PassCallback::Raytracing(callback) = &mut pass.callback {
            callback(&mut ctx);
        }
    }

    fn record_blit_pass(
        &self,
        resource_to_physical: &HashMap<String, PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
        source: &str,
        destination: &str,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) {
        let src_image = self.resolve_image(resource_to_physical, physical_images, source);
        let dst_image = self.resolve_image(resource_to_physical, physical_images, destination);

        let blit = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D { x: extent.width as i32, y: extent.height as i32, z: 1 },
            ],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D { x: extent.width as i32, y: extent.height as i32, z: 1 },
            ],
        };

        unsafe {
            self.device.cmd_blit_image(
                command_buffer,
                src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }
    }

    fn view_for(
        &self,
        resource_to_physical: &HashMap<String, PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
        resource: &str,
    ) -> vk::ImageView {
        let physical = resource_to_physical[resource];
        physical_images[physical.0 as usize].graph_image.view
    }

    fn resolve_image(
        &self,
        resource_to_physical: &HashMap<String, PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
        resource: &str,
    ) -> vk::Image {
        let physical = resource_to_physical[resource];
        physical_images[physical.0 as usize].graph_image.image
    }
}

fn clear_value(clear: ClearValue) -> vk::ClearValue {
    match clear {
        ClearValue::Color(color) => vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_access_matches_spec_table() {
        let color = required_access(ImageUsageKind::ColorAttachment, PipelineFamily::Graphics);
        assert_eq!(color.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(color.access_mask, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);

        let depth = required_access(ImageUsageKind::DepthAttachment, PipelineFamily::Graphics);
        assert_eq!(depth.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let sampled_compute = required_access(ImageUsageKind::Sampled, PipelineFamily::Compute);
        assert_eq!(sampled_compute.stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);

        let storage_rt = required_access(ImageUsageKind::Storage, PipelineFamily::Raytracing);
        assert_eq!(storage_rt.layout, vk::ImageLayout::GENERAL);
        assert_eq!(storage_rt.stage_mask, vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR);
    }
}
