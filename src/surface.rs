//! The windowing collaborator contract (spec.md §6).
//!
//! The engine core never owns a window. This module is the seam: it wraps
//! `ash-window`'s surface creation over any `raw-window-handle` window, and
//! carries the small bits of window state the frame scheduler and camera
//! code need without pulling a windowing toolkit into this crate. Hover and
//! focus are reported here because the windowing layer is where they
//! naturally live, but the render graph itself never reads them (§6: "not
//! the graph's concern") — camera/input code consumes [`InputFocusState`]
//! directly.

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::os::raw::c_char;

/// Lists the instance extensions `ash-window` needs to create a surface for
/// `window`'s display backend (X11/Wayland/Win32/...), for use when building
/// the `vk::InstanceCreateInfo` before a [`GpuContext`](crate::gpu_context::GpuContext) exists.
pub fn required_instance_extensions(window: &impl HasRawDisplayHandle) -> Result<&'static [*const c_char], vk::Result> {
    ash_window::enumerate_required_extensions(window.raw_display_handle())
}

/// Creates the `VkSurfaceKHR` for `window`. The caller owns the returned
/// handle and is responsible for destroying it (normally via
/// [`GpuContext`](crate::gpu_context::GpuContext)'s surface loader) before the instance is destroyed.
pub fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &(impl HasRawDisplayHandle + HasRawWindowHandle),
) -> Result<vk::SurfaceKHR, vk::Result> {
    unsafe { ash_window::create_surface(entry, instance, window.raw_display_handle(), window.raw_window_handle(), None) }
}

/// A resize the windowing collaborator observed since the last frame. The
/// frame scheduler only needs to know that a resize happened, not by how
/// much — the new extent is re-queried from the surface's capabilities when
/// the swapchain is recreated (§4.9 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    pub width: u32,
    pub height: u32,
}

/// Hover/focus state the windowing collaborator reports for camera/input
/// code. Never consumed by the render graph (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputFocusState {
    pub hovered: bool,
    pub focused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_focus_state_defaults_to_unfocused() {
        let state = InputFocusState::default();
        assert!(!state.hovered);
        assert!(!state.focused);
    }
}
