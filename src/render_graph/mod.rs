//! The render graph (spec.md §3-§4).
//!
//! This module is the public façade an application links against: build a
//! [`RenderGraph`] by declaring passes in any order, call [`RenderGraph::build`]
//! once per graph shape change to run the compiler (`compiler.rs`), then each
//! frame call [`RenderGraph::execute`] to record it via the executor
//! (`executor.rs`) and hand the graph and executor to
//! `FrameScheduler::end_frame`, which runs the UI/overlay collaborator's
//! draws (§6) and [`RenderGraph::finish_present_transition`] in the order §6
//! requires before submitting. The declaration/compiled split mirrors the
//! teacher's `rendergraph.rs`, generalized from a `VkRenderPass`-backed
//! graphics-only graph to the dynamic-rendering, multi-family graph this
//! engine compiles.

pub mod compiler;
pub mod contexts;
pub mod executor;
pub mod types;

use crate::deletion_queue::DeletionQueue;
use crate::error::{GraphBuildError, RenderGraphError};
use crate::pipeline_cache::PipelineCache;
use crate::resource_manager::ResourceManager;
use crate::shader_cache::ShaderCache;
use ash::vk;
use compiler::GraphCompiler;
use executor::GraphExecutor;
use types::{
    AccelerationStructureRef, BlitPassDecl, ComputeCallback, ComputePassDecl, ComputePipelineDesc, CompiledGraph,
    GraphicsCallback, GraphicsPassDecl, GraphicsPipelineDesc, ImageDescriptor, PassDecl, RaytracingCallback,
    RaytracingPassDecl, RaytracingPipelineDesc, ResourceInput,
};

/// A declared-but-not-yet-compiled render graph.
///
/// Holds the application's pass declarations until [`build`](RenderGraph::build)
/// turns them into a [`CompiledGraph`]; rebuilding (on a resize, or whenever the
/// declared shape changes) replaces the previous compiled graph, tearing down
/// whatever physical images it owned first (§4.6, §8 Scenario D).
#[derive(Default)]
pub struct RenderGraph {
    passes: Vec<PassDecl>,
    compiled: Option<CompiledGraph>,
}

impl RenderGraph {
    pub fn new() -> Self {
        RenderGraph::default()
    }

    /// Declares a graphics pass. `callback` is invoked once per execution
    /// with a [`contexts::GraphicsExecutionContext`] (§4.8).
    pub fn add_graphics_pass(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<ResourceInput>,
        outputs: Vec<ImageDescriptor>,
        pipeline: GraphicsPipelineDesc,
        callback: impl FnMut(&mut contexts::GraphicsExecutionContext<'_>) + Send + 'static,
    ) -> &mut Self {
        self.passes.push(PassDecl::Graphics(GraphicsPassDecl {
            name: name.into(),
            inputs,
            outputs,
            pipeline,
            callback: Box::new(callback) as GraphicsCallback,
        }));
        self
    }

    /// Declares a compute pass, possibly with several named kernels sharing
    /// one descriptor layout (§3 Pipeline description: Compute).
    pub fn add_compute_pass(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<ResourceInput>,
        outputs: Vec<ImageDescriptor>,
        pipeline: ComputePipelineDesc,
        callback: impl FnMut(&mut contexts::ComputeExecutionContext<'_>) + Send + 'static,
    ) -> &mut Self {
        self.passes.push(PassDecl::Compute(ComputePassDecl {
            name: name.into(),
            inputs,
            outputs,
            pipeline,
            callback: Box::new(callback) as ComputeCallback,
        }));
        self
    }

    /// Declares a raytracing pass. Building a graph with a raytracing pass
    /// on hardware without the pipeline extension fails the whole build
    /// (§4.6(a), §9 "Raytracing fallback").
    pub fn add_raytracing_pass(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<ResourceInput>,
        outputs: Vec<ImageDescriptor>,
        acceleration_structures: Vec<AccelerationStructureRef>,
        pipeline: RaytracingPipelineDesc,
        callback: impl FnMut(&mut contexts::RaytracingExecutionContext<'_>) + Send + 'static,
    ) -> &mut Self {
        self.passes.push(PassDecl::Raytracing(RaytracingPassDecl {
            name: name.into(),
            inputs,
            outputs,
            acceleration_structures,
            pipeline,
            callback: Box::new(callback) as RaytracingCallback,
        }));
        self
    }

    /// Declares a blit pass: a bare image copy with no pipeline or descriptors.
    pub fn add_blit_pass(&mut self, name: impl Into<String>, source: impl Into<String>, destination: impl Into<String>) -> &mut Self {
        self.passes.push(PassDecl::Blit(BlitPassDecl {
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
        }));
        self
    }

    /// Returns true once [`build`](RenderGraph::build) has produced a
    /// compiled graph that hasn't since been torn down.
    pub fn is_built(&self) -> bool {
        self.compiled.is_some()
    }

    /// Number of passes declared since the last `build()`, awaiting compilation.
    pub fn declared_pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Compiles the declared passes into a [`CompiledGraph`] (§4.6). If a
    /// graph was already compiled, waits the device idle and tears down its
    /// physical images first (§5 "graph rebuild calls `vkDeviceWaitIdle`"),
    /// so this is safe to call again after a swapchain resize or a pass-list
    /// edit (§8 Scenario D). Pass callbacks are moved into the compiled
    /// graph, so the caller must re-declare every pass with `add_*_pass`
    /// before each `build()` call, not just the first.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &mut self,
        resource_manager: &mut ResourceManager,
        pipeline_cache: &mut PipelineCache<'_>,
        shader_cache: &ShaderCache,
        allocator: &mut gpu_allocator::vulkan::Allocator,
        deletion_queue: &mut DeletionQueue,
        swapchain_extent: vk::Extent2D,
        swapchain_format: vk::Format,
        raytracing_supported: bool,
    ) -> Result<(), RenderGraphError> {
        if self.passes.is_empty() {
            return Err(RenderGraphError::Build(GraphBuildError::NoRenderOutputWriter));
        }

        if self.compiled.is_some() {
            unsafe { resource_manager.device().device_wait_idle() }
                .map_err(|source| RenderGraphError::GpuContext(crate::error::GpuContextError::Vulkan(source)))?;
        }
        self.teardown(resource_manager, deletion_queue);

        let mut compiler = GraphCompiler {
            resource_manager,
            pipeline_cache,
            shader_cache,
            allocator,
            swapchain_extent,
            swapchain_format,
            raytracing_supported,
        };

        let compiled = compiler.build(self.passes.drain(..).collect())?;
        self.compiled = Some(compiled);
        Ok(())
    }

    /// Records the compiled graph into `command_buffer` for this frame
    /// (§4.7). `swapchain_image`/`swapchain_view` are this frame's acquired
    /// presentation image, bound to the `RENDER_OUTPUT` physical slot before
    /// replay; its access state resets to `UNDEFINED` every call (§4.9 step
    /// 7). No-op if [`build`](RenderGraph::build) hasn't run yet.
    ///
    /// Does **not** transition `RENDER_OUTPUT` to `PRESENT_SRC_KHR` —
    /// [`crate::frame_scheduler::FrameScheduler::end_frame`] calls
    /// [`finish_present_transition`](RenderGraph::finish_present_transition)
    /// for that, after the UI/overlay collaborator (§6) has recorded its
    /// draws into the same command buffer.
    pub fn execute(
        &mut self,
        executor: &GraphExecutor<'_>,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
        swapchain_image: vk::Image,
        swapchain_view: vk::ImageView,
    ) {
        if let Some(graph) = &mut self.compiled {
            graph.bind_swapchain_image(swapchain_image, swapchain_view, extent);
            executor.execute(graph, command_buffer, extent);
        }
    }

    /// Transitions `RENDER_OUTPUT` to `PRESENT_SRC_KHR` (§4.9 end_frame step
    /// 1). No-op if [`build`](RenderGraph::build) hasn't run yet. See
    /// [`execute`](RenderGraph::execute) for why this is a separate call.
    pub fn finish_present_transition(&mut self, executor: &GraphExecutor<'_>, command_buffer: vk::CommandBuffer) {
        if let Some(graph) = &mut self.compiled {
            executor.finish_present_transition(graph, command_buffer);
        }
    }

    /// The timestamp query pool backing the currently compiled graph, if any
    /// (§6 per-pass GPU timing).
    pub fn timestamp_pool(&self) -> Option<vk::QueryPool> {
        self.compiled.as_ref().map(|graph| graph.timestamp_pool)
    }

    /// Number of passes in the currently compiled execution order.
    pub fn pass_count(&self) -> usize {
        self.compiled.as_ref().map(|graph| graph.execution_order.len()).unwrap_or(0)
    }

    /// Destroys the physical images and timestamp pool owned by the current
    /// compiled graph, if any (used on rebuild, §8 Scenario D).
    fn teardown(&mut self, resource_manager: &mut ResourceManager, deletion_queue: &mut DeletionQueue) {
        let Some(graph) = self.compiled.take() else {
            return;
        };

        for entry in graph.physical_images {
            if entry.graph_image.is_external {
                continue;
            }
            resource_manager.destroy_graph_image(entry.graph_image, deletion_queue, None);
        }

        let device = resource_manager.device().clone();
        let pool = graph.timestamp_pool;
        deletion_queue.push_global(Box::new(move || unsafe { device.destroy_query_pool(pool, None) }));
    }
}
