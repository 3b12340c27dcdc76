//! The frame scheduler (spec.md §4.9, §5).
//!
//! Owns the per-frame-slot synchronization primitives (fence, pair of
//! semaphores, command buffer) and drives the `begin_frame`/`end_frame`
//! bracket around one render-graph execution. Frame slots rotate modulo
//! [`crate::config::DEFAULT_FRAMES_IN_FLIGHT`]; a slot is only reused once
//! its fence has signaled, which is what makes it safe for a resource
//! written in frame *k* to be read in frame *k+1* without extra barriers
//! across the frame boundary.

use crate::deletion_queue::DeletionQueue;
use crate::error::{GpuContextError, RenderGraphError};
use crate::gpu_context::GpuContext;
use crate::resource_manager::ResourceManager;
use ash::vk;

/// Everything a caller needs to record one frame's graph execution and
/// overlay draws, handed out by [`FrameScheduler::begin_frame`].
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    pub frame_index: u32,
}

pub struct FrameScheduler {
    frames_in_flight: u32,
    current_frame: u32,
    command_buffers: Vec<vk::CommandBuffer>,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    in_flight_fences: Vec<vk::Fence>,
    resize_pending: bool,
    graph_dirty: bool,
}

impl FrameScheduler {
    pub fn new(gpu_context: &GpuContext, frames_in_flight: u32) -> Result<Self, GpuContextError> {
        let device = gpu_context.device();

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(gpu_context.primary_command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight);
        let command_buffers = unsafe { device.allocate_command_buffers(&allocate_info) }.map_err(GpuContextError::Vulkan)?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let mut image_available = Vec::with_capacity(frames_in_flight as usize);
        let mut render_finished = Vec::with_capacity(frames_in_flight as usize);
        let mut in_flight_fences = Vec::with_capacity(frames_in_flight as usize);
        for _ in 0..frames_in_flight {
            image_available.push(unsafe { device.create_semaphore(&semaphore_info, None) }.map_err(GpuContextError::Vulkan)?);
            render_finished.push(unsafe { device.create_semaphore(&semaphore_info, None) }.map_err(GpuContextError::Vulkan)?);
            in_flight_fences.push(unsafe { device.create_fence(&fence_info, None) }.map_err(GpuContextError::Vulkan)?);
        }

        Ok(FrameScheduler {
            frames_in_flight,
            current_frame: 0,
            command_buffers,
            image_available,
            render_finished,
            in_flight_fences,
            resize_pending: false,
            graph_dirty: false,
        })
    }

    /// Called by the windowing collaborator when it observes a resize; the
    /// next `begin_frame` recreates the swapchain instead of rendering.
    pub fn request_resize(&mut self) {
        self.resize_pending = true;
    }

    /// True once a pending resize (or an `OUT_OF_DATE` acquire/present) has
    /// invalidated the currently compiled graph, until the caller rebuilds it.
    pub fn graph_needs_rebuild(&self) -> bool {
        self.graph_dirty
    }

    pub fn clear_graph_dirty(&mut self) {
        self.graph_dirty = false;
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Step 1-7 of §4.9. Returns `Ok(None)` when the frame should be
    /// skipped (pending resize, or the swapchain came back `OUT_OF_DATE`).
    pub fn begin_frame(
        &mut self,
        gpu_context: &mut GpuContext,
        deletion_queue: &mut DeletionQueue,
        resource_manager: &mut ResourceManager,
    ) -> Result<Option<FrameContext>, RenderGraphError> {
        if self.resize_pending {
            gpu_context.recreate_swapchain()?;
            self.resize_pending = false;
            self.graph_dirty = true;
            return Ok(None);
        }

        let frame = self.current_frame;
        let device = gpu_context.device();
        let fence = self.in_flight_fences[frame as usize];

        unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }.map_err(GpuContextError::Vulkan)?;

        deletion_queue.flush_frame(frame);
        resource_manager.reset_transient_descriptor_pool().map_err(RenderGraphError::Resource)?;

        let acquire = unsafe {
            gpu_context.swapchain_loader().acquire_next_image(
                gpu_context.swapchain_handle(),
                u64::MAX,
                self.image_available[frame as usize],
                vk::Fence::null(),
            )
        };

        let image_index = match acquire {
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.resize_pending = true;
                self.graph_dirty = true;
                return Ok(None);
            }
            Err(source) => return Err(RenderGraphError::GpuContext(GpuContextError::Vulkan(source))),
        };

        unsafe { device.reset_fences(&[fence]) }.map_err(GpuContextError::Vulkan)?;

        let command_buffer = self.command_buffers[frame as usize];
        unsafe { device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }.map_err(GpuContextError::Vulkan)?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }.map_err(GpuContextError::Vulkan)?;

        // No swapchain-image transition here: `RenderGraph::execute` owns
        // `RENDER_OUTPUT`'s whole layout lifecycle (it binds this frame's
        // acquired image fresh from `UNDEFINED` and barriers it to whatever
        // each pass needs, including the final `PRESENT_SRC_KHR` step).
        // Transitioning it here too would race the graph's own tracked
        // access state against reality.

        Ok(Some(FrameContext {
            command_buffer,
            image_index,
            frame_index: frame,
        }))
    }

    /// Steps 1-4 of §4.9. `overlay`, if given, is invoked with the frame's
    /// command buffer after the render graph's own passes have recorded but
    /// before `RENDER_OUTPUT` transitions to `PRESENT_SRC_KHR`, per the
    /// UI/overlay collaborator contract (§6) — that ordering is why this
    /// function, not [`crate::render_graph::RenderGraph::execute`],
    /// is the one that calls
    /// [`RenderGraph::finish_present_transition`](crate::render_graph::RenderGraph::finish_present_transition):
    /// it runs the overlay first, then the transition, then submits.
    pub fn end_frame(
        &mut self,
        gpu_context: &GpuContext,
        frame: FrameContext,
        render_graph: &mut crate::render_graph::RenderGraph,
        executor: &crate::render_graph::executor::GraphExecutor<'_>,
        overlay: Option<impl FnOnce(vk::CommandBuffer)>,
    ) -> Result<(), RenderGraphError> {
        let device = gpu_context.device();

        if let Some(overlay) = overlay {
            overlay(frame.command_buffer);
        }

        render_graph.finish_present_transition(executor, frame.command_buffer);

        unsafe { device.end_command_buffer(frame.command_buffer) }.map_err(GpuContextError::Vulkan)?;

        let wait_semaphores = [self.image_available[frame.frame_index as usize]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished[frame.frame_index as usize]];
        let command_buffers = [frame.command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                gpu_context.graphics_queue(),
                std::slice::from_ref(&submit_info),
                self.in_flight_fences[frame.frame_index as usize],
            )
        }
        .map_err(GpuContextError::Vulkan)?;

        let swapchains = [gpu_context.swapchain_handle()];
        let image_indices = [frame.image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let present_result = unsafe { gpu_context.swapchain_loader().queue_present(gpu_context.graphics_queue(), &present_info) };

        match present_result {
            Ok(suboptimal) if suboptimal => {
                self.resize_pending = true;
                self.graph_dirty = true;
            }
            Ok(_) => {}
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.resize_pending = true;
                self.graph_dirty = true;
            }
            Err(source) => return Err(RenderGraphError::GpuContext(GpuContextError::Vulkan(source))),
        }

        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        Ok(())
    }

    /// Destroys every per-frame-slot primitive. Caller must have waited the
    /// device idle first (mirrors `GpuContext::drop`'s ordering).
    pub fn destroy(&mut self, device: &ash::Device) {
        for &semaphore in self.image_available.iter().chain(self.render_finished.iter()) {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
        for &fence in &self.in_flight_fences {
            unsafe { device.destroy_fence(fence, None) };
        }
    }
}
