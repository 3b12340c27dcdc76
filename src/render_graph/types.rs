//! Render graph data model (spec.md §3).
//!
//! Split into three groups: the *declaration* types an application builds
//! when it calls `add_graphics_pass`/`add_compute_pass`/etc, the *compiled*
//! types the compiler (`compiler.rs`) produces from those declarations, and
//! the small handle/key types shared by both.

use ash::vk;
use std::collections::HashMap;

/// The one resource name every graph must have exactly one writer for.
/// That writer (or a blit derived from it) is the last pass in execution
/// order (§3 invariants).
pub const RENDER_OUTPUT: &str = "RENDER_OUTPUT";

/// An opaque handle to a graph-declared resource, resolved from its name at
/// build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u32);

/// An opaque handle into the physical-image pool (§4.6(d)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalImageHandle(pub u32);

// ---------------------------------------------------------------------
// Declaration types
// ---------------------------------------------------------------------

/// A clear value attached to an image output.
#[derive(Debug, Clone, Copy)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// How an image resource is used, which in turn drives the layout/access/stage
/// triple the executor transitions it to (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageUsageKind {
    ColorAttachment,
    DepthAttachment,
    Sampled,
    Storage,
}

/// Declares a transient (or persistent-external, §9) image resource.
///
/// `width`/`height` of `0` mean "swapchain-sized" and are resolved at build
/// time (§4.6(c), §8 boundary behavior).
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub name: String,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub usage: ImageUsageKind,
    pub samples: vk::SampleCountFlags,
    pub clear: Option<ClearValue>,
    /// Explicit set-2 binding slot; `None` assigns the next free slot (§4.6(e)).
    pub explicit_binding: Option<u32>,
    /// If true, this resource survives across frames and is owned by the
    /// resource manager rather than aliased by the graph (§9 Open Question,
    /// resolved explicit).
    pub persistent: bool,
}

impl ImageDescriptor {
    pub fn is_depth_format(&self) -> bool {
        matches!(
            self.format,
            vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
                | vk::Format::X8_D24_UNORM_PACK32
        )
    }
}

/// Declares a transient buffer resource (§3 Transient resource descriptor).
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub name: String,
    pub stride: u64,
    pub count: u64,
    pub usage: vk::BufferUsageFlags,
    pub persistent: bool,
}

impl BufferDescriptor {
    pub fn size(&self) -> u64 {
        self.stride * self.count
    }
}

/// A read-only acceleration-structure reference provided by the scene
/// collaborator (§3, §6).
#[derive(Debug, Clone)]
pub struct AccelerationStructureRef {
    pub name: String,
}

/// A named reference to an existing resource, used for pass inputs.
#[derive(Debug, Clone)]
pub struct ResourceInput {
    pub name: String,
    /// Explicit set-2 binding slot; `None` assigns the next free slot.
    pub explicit_binding: Option<u32>,
}

impl ResourceInput {
    pub fn new(name: impl Into<String>) -> Self {
        ResourceInput {
            name: name.into(),
            explicit_binding: None,
        }
    }

    pub fn at_binding(name: impl Into<String>, binding: u32) -> Self {
        ResourceInput {
            name: name.into(),
            explicit_binding: Some(binding),
        }
    }
}

/// One named compute kernel within a compute pass's pipeline (§3 Pipeline description).
#[derive(Debug, Clone)]
pub struct Kernel {
    pub name: String,
    pub shader: String,
}

/// One hit group within a raytracing pipeline.
#[derive(Debug, Clone)]
pub struct HitGroup {
    pub closest_hit: String,
    pub any_hit: Option<String>,
    pub intersection: Option<String>,
}

/// Vertex-input layout preset; concrete attribute descriptions are resolved
/// by the pipeline cache when it builds the `VkPipelineVertexInputStateCreateInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputPreset {
    Standard,
    Ui,
    Empty,
}

/// Blend state; `enabled == false` ignores `preset`.
#[derive(Debug, Clone, Copy)]
pub struct BlendState {
    pub enabled: bool,
    pub preset: BlendPreset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendPreset {
    AlphaBlend,
    Additive,
    PremultipliedAlpha,
}

bitflags::bitflags! {
    /// Which pieces of fixed-function state are set dynamically per draw
    /// rather than baked into the pipeline object.
    pub struct DynamicState: u32 {
        const VIEWPORT = 0b0000_0001;
        const SCISSOR  = 0b0000_0010;
        const DEPTH_BIAS = 0b0000_0100;
    }
}

impl Default for DynamicState {
    fn default() -> Self {
        DynamicState::VIEWPORT | DynamicState::SCISSOR
    }
}

/// Graphics pipeline description (§3 Pipeline description: Graphics).
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub vertex_shader: String,
    pub fragment_shader: Option<String>,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub blend: BlendState,
    pub samples: vk::SampleCountFlags,
    pub dynamic_state: DynamicState,
    pub push_constant_size: u32,
    pub push_constant_stages: vk::ShaderStageFlags,
    pub vertex_input: VertexInputPreset,
}

/// Compute pipeline description (§3 Pipeline description: Compute).
#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub kernels: Vec<Kernel>,
    pub push_constant_size: Option<u32>,
}

/// Raytracing pipeline description (§3 Pipeline description: Raytracing).
#[derive(Debug, Clone)]
pub struct RaytracingPipelineDesc {
    pub raygen: String,
    pub miss: Vec<String>,
    pub hit_groups: Vec<HitGroup>,
    pub max_recursion_depth: u32,
    pub push_constant_size: u32,
}

/// A graphics execution callback: records draws into the command buffer via
/// the facade handed to it (§4.8). `FnMut` because the same callback may be
/// invoked once per frame across many frames.
pub type GraphicsCallback = Box<dyn FnMut(&mut crate::render_graph::contexts::GraphicsExecutionContext<'_>) + Send>;
pub type ComputeCallback = Box<dyn FnMut(&mut crate::render_graph::contexts::ComputeExecutionContext<'_>) + Send>;
pub type RaytracingCallback =
    Box<dyn FnMut(&mut crate::render_graph::contexts::RaytracingExecutionContext<'_>) + Send>;

/// A declared graphics pass: one dynamic-rendering "subpass" over its outputs.
pub struct GraphicsPassDecl {
    pub name: String,
    pub inputs: Vec<ResourceInput>,
    pub outputs: Vec<ImageDescriptor>,
    pub pipeline: GraphicsPipelineDesc,
    pub callback: GraphicsCallback,
}

/// A declared compute pass.
pub struct ComputePassDecl {
    pub name: String,
    pub inputs: Vec<ResourceInput>,
    pub outputs: Vec<ImageDescriptor>,
    pub pipeline: ComputePipelineDesc,
    pub callback: ComputeCallback,
}

/// A declared raytracing pass.
pub struct RaytracingPassDecl {
    pub name: String,
    pub inputs: Vec<ResourceInput>,
    pub outputs: Vec<ImageDescriptor>,
    pub acceleration_structures: Vec<AccelerationStructureRef>,
    pub pipeline: RaytracingPipelineDesc,
    pub callback: RaytracingCallback,
}

/// A declared blit pass: a direct image copy with no descriptors and no pipeline.
pub struct BlitPassDecl {
    pub name: String,
    pub source: String,
    pub destination: String,
}

/// The closed set of pass kinds (§4.6, §9 "Dynamic dispatch over pass kinds" —
/// a sum type rather than trait objects, since the set of kinds never grows).
pub enum PassDecl {
    Graphics(GraphicsPassDecl),
    Compute(ComputePassDecl),
    Raytracing(RaytracingPassDecl),
    Blit(BlitPassDecl),
}

impl PassDecl {
    pub fn name(&self) -> &str {
        match self {
            PassDecl::Graphics(p) => &p.name,
            PassDecl::Compute(p) => &p.name,
            PassDecl::Raytracing(p) => &p.name,
            PassDecl::Blit(p) => &p.name,
        }
    }

    /// Names of every resource this pass reads.
    pub fn input_names(&self) -> Vec<&str> {
        match self {
            PassDecl::Graphics(p) => p.inputs.iter().map(|i| i.name.as_str()).collect(),
            PassDecl::Compute(p) => p.inputs.iter().map(|i| i.name.as_str()).collect(),
            PassDecl::Raytracing(p) => p
                .inputs
                .iter()
                .map(|i| i.name.as_str())
                .chain(p.acceleration_structures.iter().map(|a| a.name.as_str()))
                .collect(),
            PassDecl::Blit(p) => vec![p.source.as_str()],
        }
    }

    /// Names of every resource this pass writes.
    pub fn output_names(&self) -> Vec<&str> {
        match self {
            PassDecl::Graphics(p) => p.outputs.iter().map(|o| o.name.as_str()).collect(),
            PassDecl::Compute(p) => p.outputs.iter().map(|o| o.name.as_str()).collect(),
            PassDecl::Raytracing(p) => p.outputs.iter().map(|o| o.name.as_str()).collect(),
            PassDecl::Blit(p) => vec![p.destination.as_str()],
        }
    }
}

// ---------------------------------------------------------------------
// Compiled types
// ---------------------------------------------------------------------

/// A concrete, allocated image and the metadata the executor needs to
/// transition it (§3 Compiled resources: Graph image).
#[derive(Debug, Clone)]
pub struct GraphImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    /// True for resources the graph does not own (e.g. swapchain images);
    /// these are never aliased or destroyed by the graph.
    pub is_external: bool,
}

/// One entry in the physical-image aliasing pool (§3, §4.6(d)).
pub struct PhysicalImagePoolEntry {
    pub graph_image: GraphImage,
    pub last_used_pass: usize,
}

/// Per-physical-image synchronization state, tracked across the whole
/// execution (§3 Invariants, §8 property 1).
#[derive(Debug, Clone, Copy)]
pub struct ImageAccess {
    pub layout: vk::ImageLayout,
    pub access_mask: vk::AccessFlags2,
    pub stage_mask: vk::PipelineStageFlags2,
}

impl Default for ImageAccess {
    fn default() -> Self {
        ImageAccess {
            layout: vk::ImageLayout::UNDEFINED,
            access_mask: vk::AccessFlags2::NONE,
            stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
        }
    }
}

/// The required (layout, access, stage) triple for a given usage, independent
/// of pipeline family, plus the stage mask for shader-visible usages, which
/// does depend on pipeline family (§4.7 Barrier insertion).
#[derive(Debug, Clone, Copy)]
pub struct RequiredAccess {
    pub layout: vk::ImageLayout,
    pub access_mask: vk::AccessFlags2,
    pub stage_mask: vk::PipelineStageFlags2,
}

/// Which family of pipeline a pass belongs to, used to pick the shader stage
/// mask for sampled/storage barrier requirements (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFamily {
    Graphics,
    Compute,
    Raytracing,
}

/// A single set-2 descriptor binding resolved during pass construction
/// (§4.6(e)).
#[derive(Debug, Clone)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resource_name: String,
    pub required_layout: vk::ImageLayout,
}

/// The kind-specific part of a compiled pass.
pub enum CompiledPassKind {
    Graphics {
        color_attachments: Vec<String>,
        depth_attachment: Option<String>,
    },
    Compute {
        kernels: Vec<Kernel>,
    },
    Raytracing,
    Blit {
        source: String,
        destination: String,
    },
}

/// The pass callback, moved out of its declaration at compile time and
/// invoked by the executor once per frame (§4.8, §9 "Dynamic dispatch over
/// pass kinds").
pub enum PassCallback {
    Graphics(GraphicsCallback),
    Compute(ComputeCallback),
    Raytracing(RaytracingCallback),
    None,
}

/// A pass with all build-time decisions resolved: descriptor-set layout,
/// allocated descriptor set, pipeline handle, and the input/output lists
/// copied from the declaration (§3 Compiled pass).
pub struct CompiledPass {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub bindings: Vec<DescriptorBinding>,
    pub set2_layout: Option<vk::DescriptorSetLayout>,
    pub set2: Option<vk::DescriptorSet>,
    pub pipeline: crate::pipeline_cache::PipelineHandle,
    pub family: PipelineFamily,
    pub kind: CompiledPassKind,
    pub shader_names: Vec<String>,
    pub callback: PassCallback,
}

/// The fully compiled, ready-to-execute graph (§4.6 `build()` result).
pub struct CompiledGraph {
    pub execution_order: Vec<CompiledPass>,
    pub physical_images: Vec<PhysicalImagePoolEntry>,
    /// Maps a resource name to the physical image backing it this build.
    pub resource_to_physical: HashMap<String, PhysicalImageHandle>,
    pub image_access: Vec<ImageAccess>,
    pub timestamp_pool: vk::QueryPool,
    /// The physical slot standing in for the swapchain image `RENDER_OUTPUT`
    /// resolves to. Its `vk::Image`/`vk::ImageView` are unknown at compile
    /// time (the swapchain image index rotates independently of the graph)
    /// and are patched in once per frame by [`CompiledGraph::bind_swapchain_image`]
    /// before `execute()` runs.
    pub render_output_physical: PhysicalImageHandle,
}

impl CompiledGraph {
    /// Patches the `RENDER_OUTPUT` physical slot with this frame's acquired
    /// swapchain image/view and resets its tracked access state to
    /// `UNDEFINED` (§4.9 step 7: "deliberately from `UNDEFINED` — the
    /// contents are discarded each frame"). Must run before `execute()`.
    pub fn bind_swapchain_image(&mut self, image: vk::Image, view: vk::ImageView, extent: vk::Extent2D) {
        let slot = self.render_output_physical.0 as usize;
        let entry = &mut self.physical_images[slot];
        entry.graph_image.image = image;
        entry.graph_image.view = view;
        entry.graph_image.extent = extent;
        self.image_access[slot] = ImageAccess::default();
    }
}
