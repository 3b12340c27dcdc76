//! The scene collaborator contract (spec.md §6).
//!
//! Meshes, materials, and acceleration structures are out of scope for this
//! crate (§1 Non-goals) — uploading and packing them is the host
//! application's job. What the render graph core needs from a scene is
//! narrow: a handful of buffer device addresses bindless shaders index into,
//! a TLAS for raytraced passes, a draw walk to invoke from inside a graphics
//! pass callback, and the small fixed GPU-struct data every pass wants
//! (skybox index, sun light). [`Scene`] is that seam.

use crate::render_graph::contexts::GraphicsExecutionContext;
use ash::vk;
use cgmath::Vector3;

/// The buffer handles a scene exposes to bindless shaders, each carried
/// alongside its `vkGetBufferDeviceAddress` result so pass callbacks can push
/// addresses as constants without round-tripping through descriptor binds
/// (§4.6(e) "buffer device address").
#[derive(Debug, Clone, Copy)]
pub struct SceneBuffers {
    pub vertex_buffer: vk::Buffer,
    pub vertex_buffer_address: vk::DeviceAddress,
    pub index_buffer: vk::Buffer,
    pub index_buffer_address: vk::DeviceAddress,
    pub material_buffer: vk::Buffer,
    pub material_buffer_address: vk::DeviceAddress,
    pub instance_buffer: vk::Buffer,
    pub instance_buffer_address: vk::DeviceAddress,
}

/// Directional light GPU-struct (§6), laid out for scalar block layout so it
/// can be pushed or uploaded byte-for-byte with no `std140` padding rules.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DirectionalLight {
    pub direction: Vector3<f32>,
    pub color: Vector3<f32>,
    pub intensity: f32,
}

/// What the render graph core needs from the application's scene to record
/// a frame. The host implements this over whatever mesh/material/TLAS
/// representation it chooses; the graph only ever sees this trait.
pub trait Scene {
    /// Buffer handles and device addresses for vertex/index/material/instance data.
    fn buffers(&self) -> SceneBuffers;

    /// The top-level acceleration structure raytracing passes trace against.
    fn tlas(&self) -> vk::AccelerationStructureKHR;

    /// Walks the scene's draw list, issuing `draw_indexed` calls through
    /// `context` for every visible instance (§6 `render_meshes`).
    fn render_meshes(&self, context: &mut GraphicsExecutionContext<'_>);

    /// Bindless index of the skybox cubemap/panorama, for passes that sample
    /// it directly instead of going through material lookup.
    fn skybox_texture_index(&self) -> u32;

    /// The scene's single directional light.
    fn directional_light(&self) -> DirectionalLight;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directional_light_is_plain_old_data() {
        let light = DirectionalLight {
            direction: Vector3::new(0.0, -1.0, 0.0),
            color: Vector3::new(1.0, 1.0, 1.0),
            intensity: 4.0,
        };
        let copy = light;
        assert_eq!(copy.intensity, 4.0);
    }
}
