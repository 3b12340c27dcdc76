//! The GPU context (§4.1).
//!
//! Owns the instance, debug messenger, physical/logical device, the single
//! graphics+present queue, the GPU allocator, the surface, the swapchain,
//! and a primary command pool. Everything else in the crate borrows from
//! this root rather than reaching for a process-wide singleton (§9 "Global
//! singletons": construct explicitly in `main`, pass down by borrow).
//!
//! Feature negotiation follows §4.1 exactly: buffer device address, dynamic
//! rendering, synchronization-2, scalar block layout, and descriptor
//! indexing (partially-bound, update-after-bind, variable-count,
//! non-uniform-indexed sampled images) are required. Raytracing
//! (acceleration structures + the raytracing pipeline) is optional and
//! recorded as `None` when the device doesn't support it; declaring a
//! raytracing pass against such a device is a build error
//! (`GraphBuildError::RaytracingUnsupported`), not a panic here.

use crate::deletion_queue::DeletionQueue;
use crate::error::GpuContextError;
use ash::extensions::{ext::DebugUtils, khr};
use ash::vk;
use std::ffi::{CStr, CString};

/// Raytracing-pipeline properties the pipeline cache needs to lay out the
/// shader binding table (§6 "Bit-exact constraints").
#[derive(Debug, Clone, Copy)]
pub struct RaytracingSupport {
    pub pipeline_ext_present: bool,
    pub properties: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,
}

struct SwapchainState {
    loader: khr::Swapchain,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

/// Owns the device and everything with a lifetime tied to it. `'_` borrows
/// handed out to other components (resource manager, pipeline cache,
/// executor) live no longer than this value.
pub struct GpuContext {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<DebugUtils>,
    debug_messenger: vk::DebugUtilsMessengerEXT,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    queue_family_index: u32,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
    swapchain: SwapchainState,
    primary_command_pool: vk::CommandPool,
    raytracing_pipeline_ext: Option<khr::RayTracingPipeline>,
    raytracing: Option<RaytracingSupport>,
    msaa_samples: vk::SampleCountFlags,
    timestamp_period: f32,
    validation_enabled: bool,
    deletion_queue: DeletionQueue,
}

impl GpuContext {
    /// Builds the context against an already-created `VkSurfaceKHR`
    /// (surface/window acquisition is the windowing collaborator's job, §6).
    ///
    /// `frames_in_flight` sizes the deletion queue (§4.2).
    pub fn new(
        entry: ash::Entry,
        instance: ash::Instance,
        surface_loader: khr::Surface,
        surface: vk::SurfaceKHR,
        enable_validation: bool,
        frames_in_flight: u32,
    ) -> Result<Self, GpuContextError> {
        let physical_device = Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let queue_family_index = Self::pick_queue_family(&instance, &surface_loader, surface, physical_device)?;

        let (device, raytracing_pipeline_ext, raytracing) =
            Self::create_device(&instance, physical_device, queue_family_index)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let (debug_utils, debug_messenger) = if enable_validation {
            Self::create_debug_messenger(&entry, &instance)
        } else {
            (None, vk::DebugUtilsMessengerEXT::null())
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let msaa_samples = Self::max_usable_sample_count(&properties);
        let timestamp_period = properties.limits.timestamp_period;

        let swapchain_loader = khr::Swapchain::new(&instance, &device);
        let swapchain = Self::create_swapchain(
            &instance,
            physical_device,
            &device,
            &surface_loader,
            surface,
            swapchain_loader,
            None,
        )?;

        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let primary_command_pool = unsafe { device.create_command_pool(&pool_create_info, None) }
            .map_err(GpuContextError::Vulkan)?;

        Ok(GpuContext {
            entry,
            instance,
            debug_utils,
            debug_messenger,
            physical_device,
            device,
            graphics_queue,
            queue_family_index,
            surface_loader,
            surface,
            swapchain,
            primary_command_pool,
            raytracing_pipeline_ext,
            raytracing,
            msaa_samples,
            timestamp_period,
            validation_enabled: enable_validation,
            deletion_queue: DeletionQueue::new(frames_in_flight),
        })
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::PhysicalDevice, GpuContextError> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(GpuContextError::Vulkan)?;

        devices
            .into_iter()
            .find(|&device| Self::device_is_suitable(instance, surface_loader, surface, device))
            .ok_or(GpuContextError::NoSuitablePhysicalDevice)
    }

    fn device_is_suitable(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> bool {
        let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let has_graphics_present = queue_family_props.iter().enumerate().any(|(index, props)| {
            props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && unsafe { surface_loader.get_physical_device_surface_support(device, index as u32, surface) }.unwrap_or(false)
        });

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }.unwrap_or_default();
        let has_swapchain = extensions.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == khr::Swapchain::name()
        });

        has_graphics_present && has_swapchain
    }

    fn pick_queue_family(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<u32, GpuContextError> {
        let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(device) };
        queue_family_props
            .iter()
            .enumerate()
            .find(|(index, props)| {
                props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && unsafe { surface_loader.get_physical_device_surface_support(device, *index as u32, surface) }.unwrap_or(false)
            })
            .map(|(index, _)| index as u32)
            .ok_or(GpuContextError::NoSuitablePhysicalDevice)
    }

    /// Enables the required-feature chain of §4.1 and, if the physical
    /// device also reports acceleration-structure + raytracing-pipeline
    /// support, opts into those too.
    fn create_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<(ash::Device, Option<khr::RayTracingPipeline>, Option<RaytracingSupport>), GpuContextError> {
        let available_extensions =
            unsafe { instance.enumerate_device_extension_properties(physical_device) }.map_err(GpuContextError::Vulkan)?;
        let extension_supported = |name: &CStr| {
            available_extensions
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
        };

        let raytracing_supported = extension_supported(khr::AccelerationStructure::name())
            && extension_supported(khr::RayTracingPipeline::name())
            && extension_supported(khr::DeferredHostOperations::name());

        let mut extension_names: Vec<*const i8> = vec![khr::Swapchain::name().as_ptr()];
        if raytracing_supported {
            extension_names.push(khr::AccelerationStructure::name().as_ptr());
            extension_names.push(khr::RayTracingPipeline::name().as_ptr());
            extension_names.push(khr::DeferredHostOperations::name().as_ptr());
        }

        let mut descriptor_indexing_features = vk::PhysicalDeviceDescriptorIndexingFeatures::builder()
            .shader_sampled_image_array_non_uniform_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_variable_descriptor_count(true)
            .runtime_descriptor_array(true);

        let mut dynamic_rendering_features = vk::PhysicalDeviceDynamicRenderingFeatures::builder().dynamic_rendering(true);
        let mut sync2_features = vk::PhysicalDeviceSynchronization2Features::builder().synchronization2(true);
        let mut scalar_layout_features = vk::PhysicalDeviceScalarBlockLayoutFeatures::builder().scalar_block_layout(true);
        let mut buffer_address_features = vk::PhysicalDeviceBufferDeviceAddressFeatures::builder().buffer_device_address(true);

        let mut accel_structure_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder().acceleration_structure(true);
        let mut raytracing_pipeline_features =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder().ray_tracing_pipeline(true);

        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)
            .build();

        let mut device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extension_names)
            .push_next(&mut descriptor_indexing_features)
            .push_next(&mut dynamic_rendering_features)
            .push_next(&mut sync2_features)
            .push_next(&mut scalar_layout_features)
            .push_next(&mut buffer_address_features);

        if raytracing_supported {
            device_create_info = device_create_info
                .push_next(&mut accel_structure_features)
                .push_next(&mut raytracing_pipeline_features);
        }

        let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
            .map_err(GpuContextError::DeviceCreation)?;

        let (raytracing_pipeline_ext, raytracing) = if raytracing_supported {
            let ext = khr::RayTracingPipeline::new(instance, &device);
            let mut properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut properties2 = vk::PhysicalDeviceProperties2::builder().push_next(&mut properties);
            unsafe { instance.get_physical_device_properties2(physical_device, &mut properties2) };

            (
                Some(ext),
                Some(RaytracingSupport {
                    pipeline_ext_present: true,
                    properties,
                }),
            )
        } else {
            (None, None)
        };

        Ok((device, raytracing_pipeline_ext, raytracing))
    }

    fn max_usable_sample_count(properties: &vk::PhysicalDeviceProperties) -> vk::SampleCountFlags {
        let counts = properties.limits.framebuffer_color_sample_counts & properties.limits.framebuffer_depth_sample_counts;
        for candidate in [
            vk::SampleCountFlags::TYPE_64,
            vk::SampleCountFlags::TYPE_32,
            vk::SampleCountFlags::TYPE_16,
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_2,
        ] {
            if counts.contains(candidate) {
                return candidate;
            }
        }
        vk::SampleCountFlags::TYPE_1
    }

    fn create_debug_messenger(entry: &ash::Entry, instance: &ash::Instance) -> (Option<DebugUtils>, vk::DebugUtilsMessengerEXT) {
        let debug_utils = DebugUtils::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        match unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) } {
            Ok(messenger) => (Some(debug_utils), messenger),
            Err(source) => {
                log::warn!("failed to create debug messenger: {source}");
                (None, vk::DebugUtilsMessengerEXT::null())
            }
        }
    }

    fn create_swapchain(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        swapchain_loader: khr::Swapchain,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<SwapchainState, GpuContextError> {
        let capabilities =
            unsafe { surface_loader.get_physical_device_surface_capabilities(physical_device, surface) }.map_err(GpuContextError::Vulkan)?;
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface) }.map_err(GpuContextError::Vulkan)?;
        let present_modes = unsafe { surface_loader.get_physical_device_surface_present_modes(physical_device, surface) }
            .map_err(GpuContextError::Vulkan)?;

        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .copied()
            .unwrap_or(formats[0]);

        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&m| m == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        // `current_extent.width == u32::MAX` means the platform defers the
        // surface size to us (Wayland, mainly); clamp to whatever bounds the
        // surface reports since we have no window-size channel into this
        // function. Every other platform reports its actual size directly.
        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: capabilities.max_image_extent.width.max(capabilities.min_image_extent.width),
                height: capabilities.max_image_extent.height.max(capabilities.min_image_extent.height),
            }
        };

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        if let Some(old) = old_swapchain {
            create_info = create_info.old_swapchain(old);
        }

        let handle = unsafe { swapchain_loader.create_swapchain(&create_info, None) }.map_err(GpuContextError::SwapchainCreation)?;
        let images = unsafe { swapchain_loader.get_swapchain_images(handle) }.map_err(GpuContextError::Vulkan)?;

        let views = images
            .iter()
            .map(|&image| {
                let view_create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { device.create_image_view(&view_create_info, None) }
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(GpuContextError::Vulkan)?;

        Ok(SwapchainState {
            loader: swapchain_loader,
            handle,
            images,
            views,
            format: surface_format.format,
            extent,
        })
    }

    /// Called on window resize or swapchain-out-of-date (§4.1, §8 Scenario
    /// D). Waits device idle, destroys the dependent image views and old
    /// swapchain, and rebuilds at the current surface extent.
    pub fn recreate_swapchain(&mut self) -> Result<(), GpuContextError> {
        unsafe { self.device.device_wait_idle() }.map_err(GpuContextError::Vulkan)?;

        for &view in &self.swapchain.views {
            unsafe { self.device.destroy_image_view(view, None) };
        }
        let old_handle = self.swapchain.handle;

        let swapchain_loader = khr::Swapchain::new(&self.instance, &self.device);
        self.swapchain = Self::create_swapchain(
            &self.instance,
            self.physical_device,
            &self.device,
            &self.surface_loader,
            self.surface,
            swapchain_loader,
            Some(old_handle),
        )?;

        unsafe { self.swapchain.loader.destroy_swapchain(old_handle, None) };
        Ok(())
    }

    /// Attaches a debug label via `VK_EXT_debug_utils`. A no-op when
    /// validation is disabled or the debug-utils loader is unavailable,
    /// matching §4.1's "must be a no-op in release builds".
    pub fn set_debug_name(&self, handle: u64, kind: vk::ObjectType, name: &str) {
        if !self.validation_enabled {
            return;
        }
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(c_name) = CString::new(name) else {
            return;
        };

        let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(kind)
            .object_handle(handle)
            .object_name(&c_name);

        if let Err(source) = unsafe { debug_utils.set_debug_utils_object_name(self.device.handle(), &name_info) } {
            log::warn!("failed to set debug name `{name}`: {source}");
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn queue_family_indices(&self) -> u32 {
        self.queue_family_index
    }

    pub fn raytracing_properties(&self) -> Option<RaytracingSupport> {
        self.raytracing
    }

    pub fn raytracing_pipeline_ext(&self) -> Option<&khr::RayTracingPipeline> {
        self.raytracing_pipeline_ext.as_ref()
    }

    pub fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.msaa_samples
    }

    pub fn timestamp_period(&self) -> f32 {
        self.timestamp_period
    }

    pub fn primary_command_pool(&self) -> vk::CommandPool {
        self.primary_command_pool
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format
    }

    pub fn swapchain_loader(&self) -> &khr::Swapchain {
        &self.swapchain.loader
    }

    pub fn swapchain_handle(&self) -> vk::SwapchainKHR {
        self.swapchain.handle
    }

    pub fn swapchain_image(&self, index: usize) -> vk::Image {
        self.swapchain.images[index]
    }

    pub fn swapchain_view(&self, index: usize) -> vk::ImageView {
        self.swapchain.views[index]
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    /// The per-frame deferred-destruction facility (§4.2).
    pub fn deletion_queue(&mut self) -> &mut DeletionQueue {
        &mut self.deletion_queue
    }

    /// Submits `record` on a private, immediately-waited-on command buffer.
    /// Used only outside the render loop (e.g. the resource manager's
    /// one-shot image-layout transitions and texture uploads, §5 "Blocking/
    /// suspension points").
    pub fn submit_one_shot(&self, record: impl FnOnce(vk::CommandBuffer)) -> Result<(), GpuContextError> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.primary_command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(GpuContextError::Vulkan)?[0];

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(command_buffer, &begin_info).map_err(GpuContextError::Vulkan)?;
            record(command_buffer);
            self.device.end_command_buffer(command_buffer).map_err(GpuContextError::Vulkan)?;
        }

        let submit_info = vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(&command_buffer));
        let fence_create_info = vk::FenceCreateInfo::builder();
        let fence = unsafe { self.device.create_fence(&fence_create_info, None) }.map_err(GpuContextError::Vulkan)?;

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&submit_info), fence)
                .map_err(GpuContextError::Vulkan)?;
            self.device
                .wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)
                .map_err(GpuContextError::Vulkan)?;
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(self.primary_command_pool, std::slice::from_ref(&command_buffer));
        }

        Ok(())
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*callback_data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {message}");
    } else {
        log::warn!("[vulkan] {message}");
    }
    vk::FALSE
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.deletion_queue.flush_all();
            for &view in &self.swapchain.views {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain.loader.destroy_swapchain(self.swapchain.handle, None);
            self.device.destroy_command_pool(self.primary_command_pool, None);
            if let Some(debug_utils) = &self.debug_utils {
                if self.debug_messenger != vk::DebugUtilsMessengerEXT::null() {
                    debug_utils.destroy_debug_utils_messenger(self.debug_messenger, None);
                }
            }
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        let _ = &self.entry;
    }
}
