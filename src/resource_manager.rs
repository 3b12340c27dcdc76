//! The resource manager (§4.3).
//!
//! Owns the descriptor-set layouts for set 0 (global, per-frame uniforms)
//! and set 1 (scene: geometry/material buffers, TLAS, bindless textures),
//! the transient descriptor pool that set 2 is allocated from and that is
//! reset at the start of every frame, the persistent samplers, and the
//! bindless 2D texture array. It is also where the render graph compiler
//! (`render_graph::compiler`) turns an [`crate::render_graph::compiler::AliasPlan`]
//! into concrete GPU images.

use crate::deletion_queue::DeletionQueue;
use crate::error::ResourceError;
use crate::render_graph::compiler::{AliasPlan, ResourceLifetime};
use crate::render_graph::types::{DescriptorBinding, GraphImage, ImageDescriptor, PhysicalImagePoolEntry};
use ash::vk;
use fxhash::FxHashMap;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use std::collections::HashMap;

/// Capacity of the bindless 2D texture array (§4.3: "capacity 1024+,
/// partially-bound"). Overridable via [`crate::config::EngineConfig::bindless_texture_capacity`].
pub const DEFAULT_BINDLESS_CAPACITY: u32 = 1024;

/// Persistent samplers the resource manager creates once at construction
/// (§4.3: "default linear-repeat, shadow compare, bilinear-clamp").
pub struct PersistentSamplers {
    pub linear_repeat: vk::Sampler,
    pub shadow_compare: vk::Sampler,
    pub bilinear_clamp: vk::Sampler,
}

struct AllocatedImage {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
}

/// Owns the bindless combined-image-sampler array and its free-slot
/// bookkeeping. Writes use `UPDATE_AFTER_BIND` (§5 "Shared resources");
/// slot allocation is a simple free-list since slot identity, not a
/// generational key, is what shaders index by.
struct BindlessTextures {
    capacity: u32,
    next_free: u32,
    free_list: Vec<u32>,
    checkerboard_index: u32,
}

impl BindlessTextures {
    fn allocate(&mut self) -> Option<u32> {
        if let Some(slot) = self.free_list.pop() {
            return Some(slot);
        }
        if self.next_free < self.capacity {
            let slot = self.next_free;
            self.next_free += 1;
            return Some(slot);
        }
        None
    }
}

pub struct ResourceManager {
    device: ash::Device,
    allocator: Allocator,
    queue: vk::Queue,
    one_shot_pool: vk::CommandPool,

    descriptor_set0_layout: vk::DescriptorSetLayout,
    descriptor_set1_layout: vk::DescriptorSetLayout,
    persistent_pool: vk::DescriptorPool,
    global_descriptor_sets: Vec<vk::DescriptorSet>,
    scene_descriptor_sets: Vec<vk::DescriptorSet>,

    transient_pool: vk::DescriptorPool,
    set2_layout_cache: FxHashMap<Vec<(u32, vk::DescriptorType)>, vk::DescriptorSetLayout>,
    /// Structural dedup key (view, sampler, layout per binding) -> already
    /// allocated+written set within the current build (§4.6(f)).
    set2_dedup: FxHashMap<Vec<(u64, u64, i32)>, vk::DescriptorSet>,

    samplers: PersistentSamplers,
    bindless: BindlessTextures,
    /// Tracks the [`Allocation`] backing every image this manager created, so
    /// `destroy_graph_image` and `Drop` can hand memory back to the allocator
    /// instead of leaking it (`gpu_allocator::vulkan::Allocation` must be
    /// explicitly freed; dropping it just warns).
    images: FxHashMap<vk::Image, AllocatedImage>,
    /// Named, build-to-build-surviving images (§3 "Persistent external
    /// resources", §9 Open Question). Keyed by the resource name given to
    /// [`Self::get_or_create_persistent_image`]; the backing allocation is
    /// also tracked in `images` above and freed the normal way on `Drop`.
    persistent_images: FxHashMap<String, GraphImage>,
}

impl ResourceManager {
    pub fn new(
        device: ash::Device,
        queue: vk::Queue,
        queue_family_index: u32,
        allocator: Allocator,
        frames_in_flight: u32,
        bindless_capacity: u32,
    ) -> Result<Self, ResourceError> {
        let one_shot_pool = Self::create_one_shot_pool(&device, queue_family_index)?;
        let samplers = Self::create_samplers(&device)?;

        let descriptor_set0_layout = Self::create_set0_layout(&device)?;
        let descriptor_set1_layout = Self::create_set1_layout(&device, bindless_capacity)?;

        let persistent_pool = Self::create_persistent_pool(&device, frames_in_flight, bindless_capacity)?;
        let (global_descriptor_sets, scene_descriptor_sets) = Self::allocate_frame_sets(
            &device,
            persistent_pool,
            descriptor_set0_layout,
            descriptor_set1_layout,
            frames_in_flight,
            bindless_capacity,
        )?;

        let transient_pool = Self::create_transient_pool(&device)?;

        Ok(ResourceManager {
            device,
            allocator,
            queue,
            one_shot_pool,
            descriptor_set0_layout,
            descriptor_set1_layout,
            persistent_pool,
            global_descriptor_sets,
            scene_descriptor_sets,
            transient_pool,
            set2_layout_cache: FxHashMap::default(),
            set2_dedup: FxHashMap::default(),
            samplers,
            bindless: BindlessTextures {
                capacity: bindless_capacity,
                next_free: 0,
                free_list: Vec::new(),
                checkerboard_index: 0,
            },
            images: FxHashMap::default(),
            persistent_images: FxHashMap::default(),
        })
    }

    fn create_one_shot_pool(device: &ash::Device, queue_family_index: u32) -> Result<vk::CommandPool, ResourceError> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        unsafe { device.create_command_pool(&create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: "one-shot-command-pool".into(),
            source,
        })
    }

    fn create_samplers(device: &ash::Device) -> Result<PersistentSamplers, ResourceError> {
        let make = |info: &vk::SamplerCreateInfoBuilder<'_>, label: &str| {
            unsafe { device.create_sampler(info, None) }.map_err(|source| ResourceError::ImageCreation {
                name: label.into(),
                source,
            })
        };

        let linear_repeat = make(
            &vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .max_lod(vk::LOD_CLAMP_NONE),
            "sampler-linear-repeat",
        )?;

        let shadow_compare = make(
            &vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .compare_enable(true)
                .compare_op(vk::CompareOp::LESS_OR_EQUAL)
                .max_lod(vk::LOD_CLAMP_NONE),
            "sampler-shadow-compare",
        )?;

        let bilinear_clamp = make(
            &vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .max_lod(vk::LOD_CLAMP_NONE),
            "sampler-bilinear-clamp",
        )?;

        Ok(PersistentSamplers {
            linear_repeat,
            shadow_compare,
            bilinear_clamp,
        })
    }

    /// Set 0: per-frame global uniforms (camera, time, exposure, ...).
    fn create_set0_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout, ResourceError> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::ALL)
            .build()];
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        unsafe { device.create_descriptor_set_layout(&create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: "set0-layout".into(),
            source,
        })
    }

    /// Set 1: scene data (§6 Scene collaborator) — geometry/material/
    /// instance storage buffers, the TLAS, and the bindless texture array
    /// as a variable-count, partially-bound, update-after-bind binding.
    fn create_set1_layout(device: &ash::Device, bindless_capacity: u32) -> Result<vk::DescriptorSetLayout, ResourceError> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(3)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(4)
                .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(5)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(bindless_capacity)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build(),
        ];

        let binding_flags = [
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
        ];
        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&binding_flags);

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut binding_flags_info);

        unsafe { device.create_descriptor_set_layout(&create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: "set1-layout".into(),
            source,
        })
    }

    fn create_persistent_pool(
        device: &ash::Device,
        frames_in_flight: u32,
        bindless_capacity: u32,
    ) -> Result<vk::DescriptorPool, ResourceError> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: frames_in_flight,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 4 * frames_in_flight,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: frames_in_flight,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: bindless_capacity * frames_in_flight,
            },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(2 * frames_in_flight)
            .pool_sizes(&pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND);
        unsafe { device.create_descriptor_pool(&create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: "persistent-descriptor-pool".into(),
            source,
        })
    }

    fn allocate_frame_sets(
        device: &ash::Device,
        pool: vk::DescriptorPool,
        set0_layout: vk::DescriptorSetLayout,
        set1_layout: vk::DescriptorSetLayout,
        frames_in_flight: u32,
        bindless_capacity: u32,
    ) -> Result<(Vec<vk::DescriptorSet>, Vec<vk::DescriptorSet>), ResourceError> {
        let set0_layouts = vec![set0_layout; frames_in_flight as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder().descriptor_pool(pool).set_layouts(&set0_layouts);
        let global_sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|source| ResourceError::ImageCreation {
            name: "set0-alloc".into(),
            source,
        })?;

        let set1_layouts = vec![set1_layout; frames_in_flight as usize];
        let counts = vec![bindless_capacity; frames_in_flight as usize];
        let mut variable_count_info = vk::DescriptorSetVariableDescriptorCountAllocateInfo::builder().descriptor_counts(&counts);
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set1_layouts)
            .push_next(&mut variable_count_info);
        let scene_sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|source| ResourceError::ImageCreation {
            name: "set1-alloc".into(),
            source,
        })?;

        Ok((global_sets, scene_sets))
    }

    fn create_transient_pool(device: &ash::Device) -> Result<vk::DescriptorPool, ResourceError> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 256,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 256,
            },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(128)
            .pool_sizes(&pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        unsafe { device.create_descriptor_pool(&create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: "transient-descriptor-pool".into(),
            source,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn descriptor_set0_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set0_layout
    }

    pub fn descriptor_set1_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set1_layout
    }

    pub fn get_global_descriptor_set(&self, frame: u32) -> vk::DescriptorSet {
        self.global_descriptor_sets[frame as usize]
    }

    pub fn get_scene_descriptor_set(&self, frame: u32) -> vk::DescriptorSet {
        self.scene_descriptor_sets[frame as usize]
    }

    pub fn samplers(&self) -> &PersistentSamplers {
        &self.samplers
    }

    /// Called by the frame scheduler at the start of each frame (§4.9
    /// `begin_frame` step 4). Invalidates every descriptor set previously
    /// allocated from the transient pool, including the set-2 dedup cache
    /// from any prior `build()` (§3 invariant: "A transient descriptor set
    /// is valid only within the frame in which it was allocated").
    pub fn reset_transient_descriptor_pool(&mut self) -> Result<(), ResourceError> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.transient_pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(|source| ResourceError::ImageCreation {
            name: "transient-descriptor-pool-reset".into(),
            source,
        })?;
        self.set2_dedup.clear();
        Ok(())
    }

    /// Allocates (or creates and caches) a physical image and view directly
    /// from the GPU allocator, transitioning it to `initial_layout` via a
    /// one-shot command buffer when that layout isn't `UNDEFINED` (§4.3).
    pub fn create_graph_image(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        initial_layout: vk::ImageLayout,
        samples: vk::SampleCountFlags,
        debug_name: &str,
    ) -> Result<GraphImage, ResourceError> {
        let extent = vk::Extent3D { width, height, depth: 1 };
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: debug_name.to_string(),
            source,
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = self
            .allocator
            .allocate(&AllocationCreateDesc {
                name: debug_name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|source| ResourceError::Allocation {
                name: debug_name.to_string(),
                source,
            })?;

        unsafe { self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) }.map_err(|source| {
            ResourceError::ImageCreation {
                name: debug_name.to_string(),
                source,
            }
        })?;

        let is_depth = matches!(
            format,
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
        );
        let aspect_mask = if is_depth {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&view_create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: debug_name.to_string(),
            source,
        })?;

        if initial_layout != vk::ImageLayout::UNDEFINED {
            self.transition_image(image, vk::ImageLayout::UNDEFINED, initial_layout, aspect_mask)?;
        }

        self.images.insert(
            image,
            AllocatedImage {
                image,
                view,
                allocation: Some(allocation),
            },
        );

        Ok(GraphImage {
            image,
            view,
            format,
            extent: vk::Extent2D { width, height },
            usage,
            is_external: false,
        })
    }

    /// Looks up a resource registered under `name` by an earlier
    /// [`Self::get_or_create_persistent_image`] call, e.g. to resolve a
    /// pass input naming the previous build's value of a persistent output
    /// (§9 Open Question: "a resource that is read by pass *a* in frame *n*
    /// and written by pass *b* in frame *n-1*"). Returns `None` if nothing
    /// has registered that name yet — the first graph build that touches a
    /// persistent history resource has nothing to read back.
    pub fn get_persistent_image(&self, name: &str) -> Option<GraphImage> {
        self.persistent_images.get(name).cloned()
    }

    /// Returns the image already registered under `name`, or creates and
    /// registers a fresh one if this is the first build to touch it
    /// (§4.6(d) "physical aliasing" never reuses a persistent slot, so this
    /// is the only path that can hand one back across builds).
    pub fn get_or_create_persistent_image(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        samples: vk::SampleCountFlags,
    ) -> Result<GraphImage, ResourceError> {
        if let Some(existing) = self.persistent_images.get(name) {
            return Ok(existing.clone());
        }
        let image = self.create_graph_image(width, height, format, usage, vk::ImageLayout::UNDEFINED, samples, name)?;
        self.persistent_images.insert(name.to_string(), image.clone());
        Ok(image)
    }

    fn transition_image(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<(), ResourceError> {
        self.submit_one_shot(|command_buffer| {
            let barrier = vk::ImageMemoryBarrier2::builder()
                .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .src_access_mask(vk::AccessFlags2::NONE)
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
                .build();
            let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));
            unsafe { self.device.cmd_pipeline_barrier2(command_buffer, &dependency_info) };
        })
    }

    /// A private command buffer, submitted and waited-on immediately (§4.3,
    /// §5 "Resource-manager one-shot transitions"). Used only outside the
    /// render loop: initial image transitions and texture uploads.
    fn submit_one_shot(&self, record: impl FnOnce(vk::CommandBuffer)) -> Result<(), ResourceError> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.one_shot_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(|source| ResourceError::ImageCreation {
            name: "one-shot-cmd".into(),
            source,
        })?[0];

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(|source| ResourceError::ImageCreation {
                    name: "one-shot-begin".into(),
                    source,
                })?;
            record(command_buffer);
            self.device
                .end_command_buffer(command_buffer)
                .map_err(|source| ResourceError::ImageCreation {
                    name: "one-shot-end".into(),
                    source,
                })?;
        }

        let submit_info = vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(&command_buffer));
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::builder(), None) }.map_err(|source| {
            ResourceError::ImageCreation {
                name: "one-shot-fence".into(),
                source,
            }
        })?;

        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit_info), fence)
                .map_err(|source| ResourceError::ImageCreation {
                    name: "one-shot-submit".into(),
                    source,
                })?;
            self.device
                .wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)
                .map_err(|source| ResourceError::ImageCreation {
                    name: "one-shot-wait".into(),
                    source,
                })?;
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(self.one_shot_pool, std::slice::from_ref(&command_buffer));
        }

        Ok(())
    }

    /// Enqueues an image's view and image for destruction on the given
    /// frame's deletion queue (or, outside a frame, runs immediately).
    /// Views are pushed after the image so the LIFO flush destroys the view
    /// first (§4.2 "derived resources release before the image they view").
    /// The backing [`Allocation`] is always freed immediately: the caller of
    /// the `None` path has already waited device idle (graph rebuild,
    /// `Drop`), and the `Some` path only defers the raw Vulkan handles, which
    /// don't need the memory to still be live by the time they're destroyed.
    pub fn destroy_graph_image(&mut self, graph_image: GraphImage, deletion_queue: &mut DeletionQueue, frame_index: Option<u32>) {
        let device = self.device.clone();
        let image = graph_image.image;
        let view = graph_image.view;

        if let Some(AllocatedImage { allocation: Some(allocation), .. }) = self.images.remove(&image) {
            if let Err(source) = self.allocator.free(allocation) {
                log::warn!("freeing allocation for image `{image:?}` failed: {source}");
            }
        }

        let destroy_image = move || unsafe { device.destroy_image(image, None) };
        let device2 = self.device.clone();
        let destroy_view = move || unsafe { device2.destroy_image_view(view, None) };

        match frame_index {
            Some(frame) => {
                deletion_queue.push(frame, destroy_image);
                deletion_queue.push(frame, destroy_view);
            }
            None => {
                destroy_image();
                destroy_view();
            }
        }
    }

    /// Turns an [`AliasPlan`] into concrete physical images (§4.6(d)).
    /// `lifetimes` supplies the `last_used_pass` bookkeeping field on each
    /// pool entry (informational — already folded into the alias decision
    /// itself — but kept so §8 property 3 is directly inspectable on the
    /// compiled graph).
    pub fn materialize_physical_images(
        &mut self,
        alias_plan: &AliasPlan,
        descriptors: &FxHashMap<&str, &ImageDescriptor>,
        lifetimes: &FxHashMap<String, ResourceLifetime>,
    ) -> Result<Vec<PhysicalImagePoolEntry>, ResourceError> {
        let mut entries = Vec::with_capacity(alias_plan.slot_keys.len());

        for (slot_index, key) in alias_plan.slot_keys.iter().enumerate() {
            let mapped_names: Vec<&str> = alias_plan
                .resource_to_slot
                .iter()
                .filter(|(_, &slot)| slot == slot_index)
                .map(|(name, _)| name.as_str())
                .collect();

            let representative = mapped_names.first().and_then(|name| descriptors.get(name).copied());
            let samples = representative.map(|d| d.samples).unwrap_or(vk::SampleCountFlags::TYPE_1);
            let debug_name = mapped_names.first().copied().unwrap_or("graph_image");

            // Persistent resources (§9 Open Question, resolved explicit) survive
            // past this build's teardown: the first build that touches one
            // creates it and registers it by name; every later rebuild reuses
            // the same physical image instead of allocating a fresh one, and
            // the graph never destroys it (`is_external` makes
            // `RenderGraph::teardown` skip it — ownership genuinely belongs to
            // this resource manager, matching §9's "owned by the resource
            // manager rather than the graph").
            let graph_image = if representative.map(|d| d.persistent).unwrap_or(false) {
                let mut image = self.get_or_create_persistent_image(debug_name, key.width, key.height, key.format, key.usage, samples)?;
                image.is_external = true;
                image
            } else {
                self.create_graph_image(
                    key.width,
                    key.height,
                    key.format,
                    key.usage,
                    vk::ImageLayout::UNDEFINED,
                    samples,
                    debug_name,
                )?
            };

            let last_used_pass = mapped_names
                .iter()
                .filter_map(|name| lifetimes.get(*name))
                .map(|lt| lt.last_pass)
                .max()
                .unwrap_or(0);

            entries.push(PhysicalImagePoolEntry { graph_image, last_used_pass });
        }

        Ok(entries)
    }

    /// Allocates 2 × `pass_count` timestamp queries for the compiled graph
    /// (§4.6(g)).
    pub fn create_timestamp_pool(&self, query_count: u32) -> vk::QueryPool {
        let create_info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(query_count.max(2));
        unsafe { self.device.create_query_pool(&create_info, None) }.expect("timestamp query pool creation should not fail")
    }

    /// Builds (or reuses, via the structural dedup key of §4.6(f)) a set-2
    /// descriptor set for one pass's resolved bindings. Returns `(None, None)`
    /// for passes with no set-2 bindings (e.g. blit passes never call this).
    pub fn allocate_pass_descriptor_set(
        &mut self,
        bindings: &[DescriptorBinding],
        resource_to_physical: &HashMap<String, crate::render_graph::types::PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
    ) -> Result<(Option<vk::DescriptorSetLayout>, Option<vk::DescriptorSet>), ResourceError> {
        if bindings.is_empty() {
            return Ok((None, None));
        }

        let layout_key: Vec<(u32, vk::DescriptorType)> = bindings.iter().map(|b| (b.binding, b.descriptor_type)).collect();
        let layout = match self.set2_layout_cache.get(&layout_key) {
            Some(&layout) => layout,
            None => {
                let layout = self.build_set2_layout(bindings)?;
                self.set2_layout_cache.insert(layout_key, layout);
                layout
            }
        };

        let image_infos: Vec<(u32, vk::DescriptorType, vk::DescriptorImageInfo)> = bindings
            .iter()
            .map(|binding| {
                let physical = resource_to_physical[&binding.resource_name];
                let view = physical_images[physical.0 as usize].graph_image.view;
                let sampler = if binding.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER {
                    self.samplers.linear_repeat
                } else {
                    vk::Sampler::null()
                };
                let info = vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: binding.required_layout,
                };
                (binding.binding, binding.descriptor_type, info)
            })
            .collect();

        let dedup_key: Vec<(u64, u64, i32)> = image_infos
            .iter()
            .map(|(_, _, info)| (info.image_view.as_raw(), info.sampler.as_raw(), info.image_layout.as_raw()))
            .collect();

        if let Some(&existing) = self.set2_dedup.get(&dedup_key) {
            return Ok((Some(layout), Some(existing)));
        }

        let set = self.allocate_transient_set(layout)?;

        let writes: Vec<vk::WriteDescriptorSet> = image_infos
            .iter()
            .map(|(binding, descriptor_type, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type)
                    .image_info(std::slice::from_ref(info))
                    .build()
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        self.set2_dedup.insert(dedup_key, set);

        Ok((Some(layout), Some(set)))
    }

    fn build_set2_layout(&self, bindings: &[DescriptorBinding]) -> Result<vk::DescriptorSetLayout, ResourceError> {
        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL)
                    .build()
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        unsafe { self.device.create_descriptor_set_layout(&create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: "set2-layout".into(),
            source,
        })
    }

    fn allocate_transient_set(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet, ResourceError> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.transient_pool)
            .set_layouts(&layouts);
        Ok(unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(|source| ResourceError::ImageCreation {
            name: "set2-alloc".into(),
            source,
        })?[0])
    }

    /// Stages a texture file through a CPU-visible buffer, transitions
    /// `UNDEFINED -> TRANSFER_DST -> SHADER_READ_ONLY_OPTIMAL`, generates
    /// mipmaps via successive blits, and writes the result into the
    /// bindless array at the next free slot (§4.3). On any failure, logs a
    /// warning and returns the checkerboard fallback's slot instead of
    /// propagating the error.
    pub fn load_texture(&mut self, path: &std::path::Path) -> u32 {
        match self.load_texture_inner(path) {
            Ok(slot) => slot,
            Err(reason) => {
                log::warn!("texture `{}` could not be loaded: {reason}; using checkerboard fallback", path.display());
                self.bindless.checkerboard_index
            }
        }
    }

    fn load_texture_inner(&mut self, path: &std::path::Path) -> Result<u32, ResourceError> {
        let load_error = |reason: String| ResourceError::TextureLoadFailed {
            path: path.display().to_string(),
            reason,
        };
        let image = image::open(path).map_err(|e| load_error(e.to_string()))?.into_rgba8();
        let (width, height) = image.dimensions();
        let mip_levels = (32 - (width.max(height)).leading_zeros()).max(1);

        let staging = self.create_staging_buffer(image.as_raw())?;

        let extent = vk::Extent3D { width, height, depth: 1 };
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let texture_image = unsafe { self.device.create_image(&create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: path.display().to_string(),
            source,
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(texture_image) };
        let allocation = self
            .allocator
            .allocate(&AllocationCreateDesc {
                name: &path.to_string_lossy(),
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|source| ResourceError::Allocation {
                name: path.display().to_string(),
                source,
            })?;
        unsafe { self.device.bind_image_memory(texture_image, allocation.memory(), allocation.offset()) }.map_err(|source| {
            ResourceError::ImageCreation {
                name: path.display().to_string(),
                source,
            }
        })?;

        self.upload_and_generate_mips(texture_image, staging.0, width, height, mip_levels)?;

        unsafe {
            self.device.destroy_buffer(staging.0, None);
        }
        self.allocator.free(staging.1).map_err(|source| ResourceError::Allocation {
            name: "texture-staging".into(),
            source,
        })?;

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(texture_image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&view_create_info, None) }.map_err(|source| ResourceError::ImageCreation {
            name: path.display().to_string(),
            source,
        })?;

        let slot = self.bindless.allocate().ok_or(ResourceError::BindlessArrayFull {
            capacity: self.bindless.capacity,
        })?;

        let image_info = vk::DescriptorImageInfo {
            sampler: self.samplers.linear_repeat,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.scene_descriptor_sets[0])
            .dst_binding(5)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info));
        unsafe { self.device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };

        self.images.insert(
            texture_image,
            AllocatedImage {
                image: texture_image,
                view,
                allocation: Some(allocation),
            },
        );

        Ok(slot)
    }

    fn create_staging_buffer(&mut self, data: &[u8]) -> Result<(vk::Buffer, Allocation), ResourceError> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(data.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }.map_err(|source| ResourceError::BufferCreation {
            name: "texture-staging".into(),
            source,
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let mut allocation = self
            .allocator
            .allocate(&AllocationCreateDesc {
                name: "texture-staging",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|source| ResourceError::Allocation {
                name: "texture-staging".into(),
                source,
            })?;

        unsafe { self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }.map_err(|source| {
            ResourceError::BufferCreation {
                name: "texture-staging".into(),
                source,
            }
        })?;

        if let Some(mapped) = allocation.mapped_slice_mut() {
            mapped[..data.len()].copy_from_slice(data);
        }

        Ok((buffer, allocation))
    }

    fn upload_and_generate_mips(
        &self,
        image: vk::Image,
        staging_buffer: vk::Buffer,
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> Result<(), ResourceError> {
        self.submit_one_shot(|command_buffer| unsafe {
            Self::transition_for_copy(&self.device, command_buffer, image, mip_levels);

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D { width, height, depth: 1 },
            };
            self.device.cmd_copy_buffer_to_image(
                command_buffer,
                staging_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );

            Self::blit_mip_chain(&self.device, command_buffer, image, width, height, mip_levels);
        })
    }

    unsafe fn transition_for_copy(device: &ash::Device, command_buffer: vk::CommandBuffer, image: vk::Image, mip_levels: u32) {
        let barrier = vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();
        let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));
        device.cmd_pipeline_barrier2(command_buffer, &dependency_info);
    }

    /// Generates the mip chain via successive `vkCmdBlitImage` calls from
    /// each level to the next, transitioning each source level to
    /// `SHADER_READ_ONLY_OPTIMAL` once it has been read, and the final
    /// level the same way once written (§4.3 "generates mipmaps by
    /// successive blit").
    unsafe fn blit_mip_chain(device: &ash::Device, command_buffer: vk::CommandBuffer, image: vk::Image, width: u32, height: u32, mip_levels: u32) {
        let mut mip_width = width as i32;
        let mut mip_height = height as i32;

        for level in 1..mip_levels {
            let to_src_barrier = vk::ImageMemoryBarrier2::builder()
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: level - 1,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .build();
            let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&to_src_barrier));
            device.cmd_pipeline_barrier2(command_buffer, &dependency_info);

            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);
            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                src_offsets: [vk::Offset3D::default(), vk::Offset3D { x: mip_width, y: mip_height, z: 1 }],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                dst_offsets: [vk::Offset3D::default(), vk::Offset3D { x: next_width, y: next_height, z: 1 }],
            };
            device.cmd_blit_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&blit),
                vk::Filter::LINEAR,
            );

            let to_read_barrier = vk::ImageMemoryBarrier2::builder()
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags2::SHADER_READ)
                .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: level - 1,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .build();
            let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&to_read_barrier));
            device.cmd_pipeline_barrier2(command_buffer, &dependency_info);

            mip_width = next_width;
            mip_height = next_height;
        }

        let last_level_barrier = vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags2::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: mip_levels - 1,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();
        let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&last_level_barrier));
        device.cmd_pipeline_barrier2(command_buffer, &dependency_info);
    }
}

/// Destroys every long-lived Vulkan object this manager created: samplers,
/// the global/scene/transient descriptor infrastructure, the set-2 layout
/// cache, and any image still tracked in `images` (bindless textures have no
/// individual unload path, so their lifetime is the manager's). The caller
/// must have waited the device idle first, same as `GpuContext::drop`.
impl Drop for ResourceManager {
    fn drop(&mut self) {
        unsafe {
            for (_, allocated) in self.images.drain() {
                self.device.destroy_image_view(allocated.view, None);
                self.device.destroy_image(allocated.image, None);
                if let Some(allocation) = allocated.allocation {
                    if let Err(source) = self.allocator.free(allocation) {
                        log::warn!("freeing allocation during resource manager teardown failed: {source}");
                    }
                }
            }

            for &layout in self.set2_layout_cache.values() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }

            self.device.destroy_descriptor_pool(self.transient_pool, None);
            self.device.destroy_descriptor_pool(self.persistent_pool, None);
            self.device.destroy_descriptor_set_layout(self.descriptor_set1_layout, None);
            self.device.destroy_descriptor_set_layout(self.descriptor_set0_layout, None);

            self.device.destroy_sampler(self.samplers.linear_repeat, None);
            self.device.destroy_sampler(self.samplers.shadow_compare, None);
            self.device.destroy_sampler(self.samplers.bilinear_clamp, None);

            self.device.destroy_command_pool(self.one_shot_pool, None);
        }
    }
}
