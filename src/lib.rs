//! A single-queue Vulkan render graph.
//!
//! Declares graphics/compute/raytracing/blit passes by resource name,
//! compiles them into an execution order with aliased transient images and
//! automatic `vkCmdPipelineBarrier2` placement, and replays the result every
//! frame through dynamic rendering. Windowing, scene data, and shader
//! compilation to SPIR-V are external collaborators (see [`surface`],
//! [`mesh`], and [`shader_cache`] respectively) — this crate owns the
//! render graph core only.
#![deny(nonstandard_style)]
#![deny(future_incompatible)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs)]
#![warn(unused)]

pub mod config;
pub mod deletion_queue;
pub mod error;
pub mod frame_scheduler;
pub mod gpu_context;
pub mod mesh;
pub mod pipeline_cache;
pub mod render_graph;
pub mod resource_manager;
pub mod shader_cache;
pub mod surface;

pub use error::{RenderGraphError, Result};
