//! Crate-wide error types.
//!
//! Mirrors the error-kind taxonomy from the teacher's `rhi_enums.rs`: one
//! small `thiserror` enum per concern, composed into [`RenderGraphError`] at
//! the application boundary. Fatal-init errors are expected to terminate the
//! caller; `Build` errors leave the previously compiled graph usable.

use ash::vk;
use thiserror::Error;

/// Errors that occur while creating or recreating the GPU context (§4.1, §7 "Fatal init").
#[derive(Error, Debug)]
pub enum GpuContextError {
    #[error("no suitable Vulkan physical device was found")]
    NoSuitablePhysicalDevice,

    #[error("required device feature `{0}` is not supported by this physical device")]
    MissingFeature(&'static str),

    #[error("failed to create Vulkan instance: {0}")]
    InstanceCreation(vk::Result),

    #[error("failed to create Vulkan device: {0}")]
    DeviceCreation(vk::Result),

    #[error("failed to create or recreate the swapchain: {0}")]
    SwapchainCreation(vk::Result),

    #[error("no memory type matches the requested allocation requirements")]
    NoSuitableMemoryType,

    #[error(transparent)]
    Vulkan(#[from] vk::Result),
}

/// Errors from image/buffer/sampler creation and destruction (§4.3, §7 "Resource creation").
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("failed to allocate GPU memory for resource `{name}`: {source}")]
    Allocation {
        name: String,
        source: gpu_allocator::AllocationError,
    },

    #[error("failed to create image `{name}`: {source}")]
    ImageCreation { name: String, source: vk::Result },

    #[error("failed to create buffer `{name}`: {source}")]
    BufferCreation { name: String, source: vk::Result },

    #[error("the bindless texture array is full (capacity {capacity})")]
    BindlessArrayFull { capacity: u32 },

    #[error("texture `{path}` could not be loaded: {reason}")]
    TextureLoadFailed { path: String, reason: String },
}

/// Errors raised while compiling a render graph (§4.6, §7 "Build").
#[derive(Error, Debug)]
pub enum GraphBuildError {
    #[error("no declared pass writes the sentinel resource `RENDER_OUTPUT`")]
    NoRenderOutputWriter,

    #[error(
        "resource `{name}` is declared as both {first_kind} (by pass `{first_pass}`) and \
         {second_kind} (by pass `{second_pass}`)"
    )]
    ResourceTypeMismatch {
        name: String,
        first_pass: String,
        first_kind: &'static str,
        second_pass: String,
        second_kind: &'static str,
    },

    #[error(
        "resource `{name}` has multiple writers ({writers:?}) with no declared write-after-write order"
    )]
    AmbiguousWriteOrder { name: String, writers: Vec<String> },

    #[error("pass `{pass}` references shader `{shader}`, which was not found")]
    UnknownShader { pass: String, shader: String },

    #[error(
        "pass `{pass}` uses an acceleration-structure resource `{resource}`, but this device has no raytracing support"
    )]
    RaytracingUnsupported { pass: String, resource: String },

    #[error("pass `{pass}` was declared more than once")]
    DuplicatePass { pass: String },

    #[error("resource `{resource}` is never written by any pass that declares it as output")]
    UnwrittenResource { resource: String },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Errors from shader loading and reflection (§4.4, §7 "Shader").
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("shader module `{0}` was not found under the shader source/SPIR-V roots")]
    ModuleNotFound(String),

    #[error("failed to read shader module `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to reflect SPIR-V module `{module}`: {reason}")]
    ReflectionFailed { module: String, reason: String },

    #[error("shader compile script failed for `{module}`: {reason}")]
    CompileScriptFailed { module: String, reason: String },
}

/// Errors from pipeline construction (§4.5, §7 "Resource creation").
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to create pipeline layout for `{name}`: {source}")]
    LayoutCreation { name: String, source: vk::Result },

    #[error("failed to create graphics pipeline `{name}`: {source}")]
    GraphicsPipelineCreation { name: String, source: vk::Result },

    #[error("failed to create compute pipeline `{name}`: {source}")]
    ComputePipelineCreation { name: String, source: vk::Result },

    #[error("failed to create raytracing pipeline `{name}`: {source}")]
    RaytracingPipelineCreation { name: String, source: vk::Result },

    #[error("failed to build the shader binding table for `{name}`: {source}")]
    ShaderBindingTable { name: String, source: vk::Result },

    #[error("device-idle wait before pipeline cache teardown failed: {0}")]
    DeviceWaitIdle(vk::Result),

    #[error(transparent)]
    Shader(#[from] ShaderError),
}

/// Top-level error type propagated to the application boundary.
#[derive(Error, Debug)]
pub enum RenderGraphError {
    #[error(transparent)]
    GpuContext(#[from] GpuContextError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Build(#[from] GraphBuildError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A transient, recoverable condition — swapchain out of date/suboptimal.
    /// The frame scheduler translates this into "skip this frame" control flow
    /// rather than propagating it further (§7).
    #[error("swapchain is out of date or suboptimal and must be recreated")]
    SwapchainOutOfDate,
}

pub type Result<T> = std::result::Result<T, RenderGraphError>;
