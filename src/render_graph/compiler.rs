//! The render graph compiler (§4.6).
//!
//! `build()` is split into the pure, host-side algorithms named in spec.md
//! §4.6(a)-(d) — execution ordering, lifetime analysis, resource
//! description, and physical aliasing — which take only pass declarations
//! and resource descriptors and so are unit-testable without a GPU, and the
//! GPU-touching steps (e)-(g) — descriptor-set construction, pipeline
//! lookup, and timestamp pool allocation — which are thin wrappers around
//! [`crate::resource_manager::ResourceManager`] and
//! [`crate::pipeline_cache::PipelineCache`].

use super::types::*;
use crate::error::GraphBuildError;
use crate::pipeline_cache::PipelineCache;
use crate::resource_manager::ResourceManager;
use crate::shader_cache::ShaderCache;
use ash::vk;
use fxhash::FxHashMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// `[first_pass, last_pass]` inclusive index range a resource is touched in,
/// within the compiled execution order (§3 Lifetimes, §4.6(b)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub first_pass: usize,
    pub last_pass: usize,
}

/// Walks backward from the pass that writes [`RENDER_OUTPUT`] through each
/// dependency's writer, producing a topological order that respects
/// write-before-read (§4.6(a)).
///
/// Multiple writers for one resource without an explicit order is an error
/// (§9 Open Question, resolved: build fails — see
/// [`GraphBuildError::AmbiguousWriteOrder`]).
pub fn compute_execution_order(passes: &[PassDecl]) -> Result<Vec<usize>, GraphBuildError> {
    let mut writers: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    for (index, pass) in passes.iter().enumerate() {
        for output in pass.output_names() {
            writers.entry(output).or_default().push(index);
        }
    }

    for (name, indices) in &writers {
        if indices.len() > 1 {
            return Err(GraphBuildError::AmbiguousWriteOrder {
                name: (*name).to_string(),
                writers: indices.iter().map(|&i| passes[i].name().to_string()).collect(),
            });
        }
    }

    let root = *writers
        .get(RENDER_OUTPUT)
        .and_then(|v| v.first())
        .ok_or(GraphBuildError::NoRenderOutputWriter)?;

    // Breadth-first walk from the `RENDER_OUTPUT` writer back through each
    // dependency's writer, pushing every producer encountered *unconditionally*
    // — a producer reachable through two different consumers is pushed twice,
    // with no visited-set gating the push. Only after the whole walk is
    // reversed are duplicates pruned, keeping the first (i.e. most deeply
    // nested, so most-dependency-respecting) occurrence. This mirrors the
    // original engine's two-phase `FindExecutionOrder` (push with
    // multiplicity, reverse, then prune) rather than deduplicating at
    // discovery time: gating the push on a `seen` set would let a producer
    // with two consumers at different stack depths get recorded as soon as
    // the first consumer reaches it, before the second consumer (and
    // anything *it* depends on) has been walked, which can schedule the
    // producer after only one of its consumers has been explored.
    let mut execution_order = vec![root];
    let mut queue: VecDeque<usize> = VecDeque::from([root]);

    while let Some(index) = queue.pop_front() {
        let pass = &passes[index];
        for input in pass.input_names() {
            if let Some(producers) = writers.get(input) {
                for &producer in producers {
                    execution_order.push(producer);
                    queue.push_back(producer);
                }
            }
        }
    }

    execution_order.reverse();

    let mut found: HashSet<usize> = HashSet::new();
    execution_order.retain(|index| found.insert(*index));

    Ok(execution_order)
}

/// For each resource touched by any pass, finds the first and last index
/// (within `order`) of a pass that reads or writes it (§4.6(b)).
pub fn analyze_lifetimes(
    order: &[usize],
    passes: &[PassDecl],
) -> FxHashMap<String, ResourceLifetime> {
    let mut lifetimes: FxHashMap<String, ResourceLifetime> = FxHashMap::default();

    for (position, &pass_index) in order.iter().enumerate() {
        let pass = &passes[pass_index];
        let touched = pass.input_names().into_iter().chain(pass.output_names());
        for name in touched {
            lifetimes
                .entry(name.to_string())
                .and_modify(|lt| {
                    lt.first_pass = lt.first_pass.min(position);
                    lt.last_pass = lt.last_pass.max(position);
                })
                .or_insert(ResourceLifetime {
                    first_pass: position,
                    last_pass: position,
                });
        }
    }

    lifetimes
}

/// The (width, height, format, usage) structural key two physical images
/// must share for one to be reused by the other (§4.6(d)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// The outcome of the aliasing pass: which pool slot index each resource
/// name maps to, and how many physical images are needed in total.
#[derive(Debug, Clone, Default)]
pub struct AliasPlan {
    pub resource_to_slot: FxHashMap<String, usize>,
    pub slot_keys: Vec<ImageKey>,
}

/// Walks resources in ascending `first_pass` order and assigns each to an
/// existing pool slot whose `last_used_pass < first_pass` of the incoming
/// resource and whose structural key matches exactly, or allocates a fresh
/// slot (§4.6(d), §8 property 3: aliased intervals are disjoint by
/// construction since a slot is only reused once its previous occupant's
/// `last_pass` has gone by).
///
/// Persistent resources (§9) are never aliased: each gets its own slot for
/// the lifetime of the graph.
pub fn plan_aliasing(
    resources: &[(String, ImageKey, bool)], // (name, key, persistent)
    lifetimes: &FxHashMap<String, ResourceLifetime>,
) -> AliasPlan {
    let mut ordered: Vec<&(String, ImageKey, bool)> = resources.iter().collect();
    ordered.sort_by_key(|(name, _, _)| lifetimes[name].first_pass);

    struct Slot {
        key: ImageKey,
        last_used_pass: usize,
        persistent: bool,
    }

    let mut slots: Vec<Slot> = Vec::new();
    let mut resource_to_slot = FxHashMap::default();

    for (name, key, persistent) in ordered {
        let lifetime = lifetimes[name];

        let reusable = if *persistent {
            None
        } else {
            slots.iter().position(|slot| {
                !slot.persistent && slot.key == *key && slot.last_used_pass < lifetime.first_pass
            })
        };

        let slot_index = match reusable {
            Some(index) => {
                slots[index].last_used_pass = lifetime.last_pass;
                index
            }
            None => {
                slots.push(Slot {
                    key: *key,
                    last_used_pass: lifetime.last_pass,
                    persistent: *persistent,
                });
                slots.len() - 1
            }
        };

        resource_to_slot.insert(name.clone(), slot_index);
    }

    AliasPlan {
        resource_to_slot,
        slot_keys: slots.into_iter().map(|s| s.key).collect(),
    }
}

/// Derives the usage-kind bits for an image resource from its format, per
/// §4.6(c): depth formats get a depth-attachment usage kind, everything else
/// defaults to the kind carried on the declaration (color attachment,
/// sampled, or storage), and swapchain-sized (`0 x 0`) dimensions are
/// resolved against the current swapchain extent.
pub fn resolve_image_dimensions(descriptor: &ImageDescriptor, swapchain_extent: vk::Extent2D) -> (u32, u32) {
    if descriptor.width == 0 && descriptor.height == 0 {
        (swapchain_extent.width, swapchain_extent.height)
    } else {
        (descriptor.width, descriptor.height)
    }
}

pub fn vulkan_usage_for(descriptor: &ImageDescriptor) -> vk::ImageUsageFlags {
    let base = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    match descriptor.usage {
        ImageUsageKind::DepthAttachment => {
            base | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        }
        ImageUsageKind::ColorAttachment => {
            base | vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE
        }
        ImageUsageKind::Sampled => base | vk::ImageUsageFlags::SAMPLED,
        ImageUsageKind::Storage => base | vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
    }
}

/// Validates that every resource name is used with a single, consistent
/// resource kind across all passes that touch it (§4.6 errors:
/// "mismatched resource types between passes").
pub fn validate_resource_kinds(passes: &[PassDecl]) -> Result<(), GraphBuildError> {
    #[derive(PartialEq, Eq, Clone, Copy)]
    enum Kind {
        Image,
        AccelerationStructure,
    }

    let mut seen: FxHashMap<String, (Kind, String)> = FxHashMap::default();

    let mut record = |name: &str, kind: Kind, pass: &str, seen: &mut FxHashMap<String, (Kind, String)>| {
        if let Some((existing_kind, existing_pass)) = seen.get(name) {
            if *existing_kind != kind {
                return Err(GraphBuildError::ResourceTypeMismatch {
                    name: name.to_string(),
                    first_pass: existing_pass.clone(),
                    first_kind: kind_name(*existing_kind),
                    second_pass: pass.to_string(),
                    second_kind: kind_name(kind),
                });
            }
        } else {
            seen.insert(name.to_string(), (kind, pass.to_string()));
        }
        Ok(())
    };

    fn kind_name(kind: Kind) -> &'static str {
        match kind {
            Kind::Image => "image",
            Kind::AccelerationStructure => "acceleration structure",
        }
    }

    for pass in passes {
        if let PassDecl::Raytracing(rt) = pass {
            for accel in &rt.acceleration_structures {
                record(&accel.name, Kind::AccelerationStructure, &rt.name, &mut seen)?;
            }
        }
        for name in pass.input_names() {
            record(name, Kind::Image, pass.name(), &mut seen)?;
        }
        for name in pass.output_names() {
            record(name, Kind::Image, pass.name(), &mut seen)?;
        }
    }

    Ok(())
}

/// Collects every `ImageDescriptor` declared as an output across all passes,
/// by name.
pub fn collect_image_descriptors<'a>(passes: &'a [PassDecl]) -> FxHashMap<&'a str, &'a ImageDescriptor> {
    let mut descriptors: FxHashMap<&str, &ImageDescriptor> = FxHashMap::default();
    for pass in passes {
        let outputs: &[ImageDescriptor] = match pass {
            PassDecl::Graphics(p) => &p.outputs,
            PassDecl::Compute(p) => &p.outputs,
            PassDecl::Raytracing(p) => &p.outputs,
            PassDecl::Blit(_) => &[],
        };
        for descriptor in outputs {
            descriptors.insert(&descriptor.name, descriptor);
        }
    }
    descriptors
}

/// Names every acceleration-structure resource referenced by any raytracing
/// pass, so the "unwritten resource" check below doesn't mistake a TLAS
/// reference (which is never an `ImageDescriptor` output — it's supplied by
/// the scene collaborator, §6) for a missing image.
fn acceleration_structure_names(passes: &[PassDecl]) -> HashSet<&str> {
    let mut names = HashSet::new();
    for pass in passes {
        if let PassDecl::Raytracing(rt) = pass {
            names.extend(rt.acceleration_structures.iter().map(|a| a.name.as_str()));
        }
    }
    names
}

/// Validates that every image resource any pass reads either has a writer
/// in this build's `descriptors` map, is `RENDER_OUTPUT` (resolved
/// separately against the swapchain), or is already registered with the
/// resource manager as a persistent external resource (§9 Open Question:
/// a history image written by a previous build, e.g. `ShadowHistPrev`) — a
/// resource that is none of these is a build error (§8 boundary behavior).
pub fn validate_resource_availability(
    passes: &[PassDecl],
    descriptors: &FxHashMap<&str, &ImageDescriptor>,
    resource_manager: &ResourceManager,
) -> Result<(), GraphBuildError> {
    let accel_names = acceleration_structure_names(passes);

    for pass in passes {
        for input in pass.input_names() {
            if input == RENDER_OUTPUT || accel_names.contains(input) || descriptors.contains_key(input) {
                continue;
            }
            if resource_manager.get_persistent_image(input).is_some() {
                continue;
            }
            return Err(GraphBuildError::UnwrittenResource { resource: input.to_string() });
        }
    }

    Ok(())
}

/// Ties the pure algorithms above together with the resource manager and
/// pipeline cache to produce a fully compiled, GPU-resident graph
/// (§4.6(e)-(g)).
pub struct GraphCompiler<'a, 'b> {
    pub resource_manager: &'a mut ResourceManager,
    pub pipeline_cache: &'a mut PipelineCache<'b>,
    pub shader_cache: &'a ShaderCache,
    pub allocator: &'a mut gpu_allocator::vulkan::Allocator,
    pub swapchain_extent: vk::Extent2D,
    pub swapchain_format: vk::Format,
    pub raytracing_supported: bool,
}

impl<'a, 'b> GraphCompiler<'a, 'b> {
    pub fn build(&mut self, passes: Vec<PassDecl>) -> Result<CompiledGraph, GraphBuildError> {
        validate_resource_kinds(&passes)?;

        if !self.raytracing_supported {
            for pass in &passes {
                if let PassDecl::Raytracing(rt) = pass {
                    if let Some(first) = rt.acceleration_structures.first() {
                        return Err(GraphBuildError::RaytracingUnsupported {
                            pass: rt.name.clone(),
                            resource: first.name.clone(),
                        });
                    }
                }
            }
        }

        let order = compute_execution_order(&passes)?;
        let lifetimes = analyze_lifetimes(&order, &passes);
        let descriptors = collect_image_descriptors(&passes);
        validate_resource_availability(&passes, &descriptors, self.resource_manager)?;

        let mut keyed_resources = Vec::new();
        for (name, descriptor) in &descriptors {
            let (width, height) = resolve_image_dimensions(descriptor, self.swapchain_extent);
            let key = ImageKey {
                width,
                height,
                format: descriptor.format,
                usage: vulkan_usage_for(descriptor),
            };
            keyed_resources.push(((*name).to_string(), key, descriptor.persistent));
        }

        let alias_plan = plan_aliasing(&keyed_resources, &lifetimes);

        let mut physical_images = self
            .resource_manager
            .materialize_physical_images(&alias_plan, &descriptors, &lifetimes)?;

        // `CompiledGraph::resource_to_physical` is a plain `HashMap`, not an
        // `FxHashMap` like the host-side algorithms above — it's handed to
        // `ResourceManager::allocate_pass_descriptor_set` and the executor,
        // neither of which depend on fxhash's faster-but-non-DoS-resistant
        // hasher for what's a handful of lookups per pass.
        let mut resource_to_physical: HashMap<String, PhysicalImageHandle> = HashMap::new();
        for (name, slot) in &alias_plan.resource_to_slot {
            resource_to_physical.insert(name.clone(), PhysicalImageHandle(*slot as u32));
        }

        // Resources read by some pass but never written this build, resolved
        // against the resource manager's persistent-image registry in
        // `validate_resource_availability` above: give each its own
        // external, never-aliased physical slot pointing at the image a
        // previous build registered under that name (§9 Open Question).
        let accel_names = acceleration_structure_names(&passes);
        for pass in &passes {
            for input in pass.input_names() {
                if input == RENDER_OUTPUT || accel_names.contains(input) || resource_to_physical.contains_key(input) {
                    continue;
                }
                let Some(image) = self.resource_manager.get_persistent_image(input) else {
                    continue;
                };
                let slot = physical_images.len();
                physical_images.push(PhysicalImagePoolEntry {
                    graph_image: image,
                    last_used_pass: lifetimes.get(input).map(|lt| lt.last_pass).unwrap_or(0),
                });
                resource_to_physical.insert(input.to_string(), PhysicalImageHandle(slot as u32));
            }
        }

        // `RENDER_OUTPUT` always resolves to whichever swapchain image this
        // frame acquired, which isn't known until `begin_frame` runs (§4.9).
        // Reserve its physical slot now with a null image/view;
        // `CompiledGraph::bind_swapchain_image` patches it in per frame.
        let render_output_slot = physical_images.len();
        physical_images.push(PhysicalImagePoolEntry {
            graph_image: GraphImage {
                image: vk::Image::null(),
                view: vk::ImageView::null(),
                format: self.swapchain_format,
                extent: self.swapchain_extent,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                is_external: true,
            },
            last_used_pass: order.len().saturating_sub(1),
        });
        resource_to_physical.insert(RENDER_OUTPUT.to_string(), PhysicalImageHandle(render_output_slot as u32));
        let render_output_physical = PhysicalImageHandle(render_output_slot as u32);

        let mut passes: Vec<Option<PassDecl>> = passes.into_iter().map(Some).collect();
        let mut execution_order = Vec::with_capacity(order.len());
        for &pass_index in &order {
            let pass = passes[pass_index].take().expect("each pass index appears once in execution order");
            let compiled = self.compile_pass(pass, &resource_to_physical, &physical_images)?;
            execution_order.push(compiled);
        }

        let image_access = vec![ImageAccess::default(); physical_images.len()];
        let timestamp_pool = self.resource_manager.create_timestamp_pool(2 * order.len() as u32);

        Ok(CompiledGraph {
            execution_order,
            physical_images,
            resource_to_physical,
            image_access,
            timestamp_pool,
            render_output_physical,
        })
    }

    fn compile_pass(
        &mut self,
        pass: PassDecl,
        resource_to_physical: &HashMap<String, PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
    ) -> Result<CompiledPass, GraphBuildError> {
        match pass {
            PassDecl::Graphics(decl) => self.compile_graphics_pass(decl, resource_to_physical, physical_images),
            PassDecl::Compute(decl) => self.compile_compute_pass(decl, resource_to_physical, physical_images),
            PassDecl::Raytracing(decl) => self.compile_raytracing_pass(decl, resource_to_physical, physical_images),
            PassDecl::Blit(decl) => Ok(CompiledPass {
                name: decl.name.clone(),
                inputs: vec![decl.source.clone()],
                outputs: vec![decl.destination.clone()],
                bindings: Vec::new(),
                set2_layout: None,
                set2: None,
                pipeline: crate::pipeline_cache::PipelineHandle::NONE,
                family: PipelineFamily::Graphics,
                kind: CompiledPassKind::Blit {
                    source: decl.source.clone(),
                    destination: decl.destination,
                },
                shader_names: Vec::new(),
                callback: PassCallback::None,
            }),
        }
    }

    fn compile_graphics_pass(
        &mut self,
        decl: GraphicsPassDecl,
        resource_to_physical: &HashMap<String, PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
    ) -> Result<CompiledPass, GraphBuildError> {
        let bindings = build_sampled_bindings(&decl.inputs);

        let color_attachment_formats: Vec<vk::Format> = decl
            .outputs
            .iter()
            .filter(|o| !o.is_depth_format())
            .map(|o| o.format)
            .collect();
        let depth_attachment_format = decl.outputs.iter().find(|o| o.is_depth_format()).map(|o| o.format);

        let (set2_layout, set2) = self.resource_manager.allocate_pass_descriptor_set(
            &bindings,
            resource_to_physical,
            physical_images,
        )?;

        let pipeline = self.pipeline_cache.get_or_build_graphics(
            &decl.name,
            &decl.pipeline,
            self.shader_cache,
            &color_attachment_formats,
            depth_attachment_format,
            set2_layout,
        )?;

        let color_attachments = decl
            .outputs
            .iter()
            .filter(|o| !o.is_depth_format())
            .map(|o| o.name.clone())
            .collect();
        let depth_attachment = decl.outputs.iter().find(|o| o.is_depth_format()).map(|o| o.name.clone());
        let shader_names = shader_names_for_graphics(&decl.pipeline);
        let name = decl.name.clone();
        let inputs = decl.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs = decl.outputs.iter().map(|o| o.name.clone()).collect();

        Ok(CompiledPass {
            name,
            inputs,
            outputs,
            bindings,
            set2_layout,
            set2,
            pipeline,
            family: PipelineFamily::Graphics,
            kind: CompiledPassKind::Graphics {
                color_attachments,
                depth_attachment,
            },
            shader_names,
            callback: PassCallback::Graphics(decl.callback),
        })
    }

    fn compile_compute_pass(
        &mut self,
        decl: ComputePassDecl,
        resource_to_physical: &HashMap<String, PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
    ) -> Result<CompiledPass, GraphBuildError> {
        let mut bindings = build_sampled_bindings(&decl.inputs);
        bindings.extend(build_storage_bindings(&decl.outputs, bindings.len() as u32));

        let (set2_layout, set2) = self.resource_manager.allocate_pass_descriptor_set(
            &bindings,
            resource_to_physical,
            physical_images,
        )?;

        let pipeline = self
            .pipeline_cache
            .get_or_build_compute(&decl.name, &decl.pipeline, self.shader_cache, set2_layout)?;

        let name = decl.name.clone();
        let inputs = decl.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs = decl.outputs.iter().map(|o| o.name.clone()).collect();
        let shader_names = decl.pipeline.kernels.iter().map(|k| k.shader.clone()).collect();
        let kernels = decl.pipeline.kernels.clone();

        Ok(CompiledPass {
            name,
            inputs,
            outputs,
            bindings,
            set2_layout,
            set2,
            pipeline,
            family: PipelineFamily::Compute,
            kind: CompiledPassKind::Compute { kernels },
            shader_names,
            callback: PassCallback::Compute(decl.callback),
        })
    }

    fn compile_raytracing_pass(
        &mut self,
        decl: RaytracingPassDecl,
        resource_to_physical: &HashMap<String, PhysicalImageHandle>,
        physical_images: &[PhysicalImagePoolEntry],
    ) -> Result<CompiledPass, GraphBuildError> {
        let mut bindings = build_sampled_bindings(&decl.inputs);
        bindings.extend(build_storage_bindings(&decl.outputs, bindings.len() as u32));

        let (set2_layout, set2) = self.resource_manager.allocate_pass_descriptor_set(
            &bindings,
            resource_to_physical,
            physical_images,
        )?;

        let pipeline = self.pipeline_cache.get_or_build_raytracing(
            &decl.name,
            &decl.pipeline,
            self.shader_cache,
            set2_layout,
            self.allocator,
        )?;

        let mut shader_names = vec![decl.pipeline.raygen.clone()];
        shader_names.extend(decl.pipeline.miss.iter().cloned());
        for group in &decl.pipeline.hit_groups {
            shader_names.push(group.closest_hit.clone());
            shader_names.extend(group.any_hit.clone());
            shader_names.extend(group.intersection.clone());
        }

        let name = decl.name.clone();
        let inputs = decl.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs = decl.outputs.iter().map(|o| o.name.clone()).collect();

        Ok(CompiledPass {
            name,
            inputs,
            outputs,
            bindings,
            set2_layout,
            set2,
            pipeline,
            family: PipelineFamily::Raytracing,
            kind: CompiledPassKind::Raytracing,
            shader_names,
            callback: PassCallback::Raytracing(decl.callback),
        })
    }
}

fn build_sampled_bindings(inputs: &[ResourceInput]) -> Vec<DescriptorBinding> {
    let mut next_binding = 0u32;
    inputs
        .iter()
        .map(|input| {
            let binding = input.explicit_binding.unwrap_or_else(|| {
                let b = next_binding;
                next_binding += 1;
                b
            });
            DescriptorBinding {
                binding,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                resource_name: input.name.clone(),
                required_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        })
        .collect()
}

fn build_storage_bindings(outputs: &[ImageDescriptor], start_binding: u32) -> Vec<DescriptorBinding> {
    outputs
        .iter()
        .filter(|o| o.usage == ImageUsageKind::Storage)
        .enumerate()
        .map(|(i, output)| DescriptorBinding {
            binding: output.explicit_binding.unwrap_or(start_binding + i as u32),
            descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
            resource_name: output.name.clone(),
            required_layout: vk::ImageLayout::GENERAL,
        })
        .collect()
}

fn shader_names_for_graphics(pipeline: &GraphicsPipelineDesc) -> Vec<String> {
    let mut names = vec![pipeline.vertex_shader.clone()];
    names.extend(pipeline.fragment_shader.clone());
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blit_to_render_output(source: &str) -> PassDecl {
        PassDecl::Blit(BlitPassDecl {
            name: "Blit".into(),
            source: source.into(),
            destination: RENDER_OUTPUT.into(),
        })
    }

    fn graphics_pass(name: &str, inputs: &[&str], outputs: &[&str]) -> PassDecl {
        PassDecl::Graphics(GraphicsPassDecl {
            name: name.into(),
            inputs: inputs.iter().map(|n| ResourceInput::new(*n)).collect(),
            outputs: outputs
                .iter()
                .map(|n| ImageDescriptor {
                    name: (*n).into(),
                    format: vk::Format::R8G8B8A8_UNORM,
                    width: 0,
                    height: 0,
                    usage: ImageUsageKind::ColorAttachment,
                    samples: vk::SampleCountFlags::TYPE_1,
                    clear: Some(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
                    explicit_binding: None,
                    persistent: false,
                })
                .collect(),
            pipeline: GraphicsPipelineDesc {
                vertex_shader: "fullscreen.vert".into(),
                fragment_shader: Some(format!("{name}.frag")),
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                cull_mode: vk::CullModeFlags::BACK,
                front_face: vk::FrontFace::CLOCKWISE,
                line_width: 1.0,
                depth_test: false,
                depth_write: false,
                depth_compare: vk::CompareOp::LESS,
                blend: BlendState {
                    enabled: false,
                    preset: BlendPreset::AlphaBlend,
                },
                samples: vk::SampleCountFlags::TYPE_1,
                dynamic_state: DynamicState::default(),
                push_constant_size: 0,
                push_constant_stages: vk::ShaderStageFlags::empty(),
                vertex_input: VertexInputPreset::Empty,
            },
            callback: Box::new(|_| {}),
        })
    }

    fn compute_pass(name: &str, inputs: &[&str], outputs: &[&str]) -> PassDecl {
        PassDecl::Compute(ComputePassDecl {
            name: name.into(),
            inputs: inputs.iter().map(|n| ResourceInput::new(*n)).collect(),
            outputs: outputs
                .iter()
                .map(|n| ImageDescriptor {
                    name: (*n).into(),
                    format: vk::Format::R16G16B16A16_SFLOAT,
                    width: 0,
                    height: 0,
                    usage: ImageUsageKind::Storage,
                    samples: vk::SampleCountFlags::TYPE_1,
                    clear: None,
                    explicit_binding: None,
                    persistent: false,
                })
                .collect(),
            pipeline: ComputePipelineDesc {
                kernels: vec![Kernel {
                    name: "main".into(),
                    shader: format!("{name}.comp"),
                }],
                push_constant_size: None,
            },
            callback: Box::new(|_| {}),
        })
    }

    #[test]
    fn scenario_a_single_forward_pass_order() {
        let passes = vec![graphics_pass("ForwardOpaque", &[], &["Albedo", "Depth"]), blit_to_render_output("Albedo")];

        let order = compute_execution_order(&passes).unwrap();
        let names: Vec<&str> = order.iter().map(|&i| passes[i].name()).collect();
        assert_eq!(names, vec!["ForwardOpaque", "Blit"]);
    }

    #[test]
    fn scenario_b_gbuffer_lighting_order() {
        let passes = vec![
            graphics_pass("GBuffer", &[], &["Albedo", "Normal", "Material", "Depth"]),
            compute_pass("Lighting", &["Albedo", "Normal", "Material", "Depth"], &["LitColor"]),
            blit_to_render_output("LitColor"),
        ];

        let order = compute_execution_order(&passes).unwrap();
        let names: Vec<&str> = order.iter().map(|&i| passes[i].name()).collect();
        assert_eq!(names, vec!["GBuffer", "Lighting", "Blit"]);
    }

    #[test]
    fn missing_render_output_writer_fails_build() {
        let passes = vec![graphics_pass("ForwardOpaque", &[], &["Albedo"])];
        let err = compute_execution_order(&passes).unwrap_err();
        assert!(matches!(err, GraphBuildError::NoRenderOutputWriter));
    }

    #[test]
    fn ambiguous_write_order_fails_build() {
        let passes = vec![
            graphics_pass("A", &[], &["Shared"]),
            graphics_pass("B", &[], &["Shared"]),
            blit_to_render_output("Shared"),
        ];
        let err = compute_execution_order(&passes).unwrap_err();
        assert!(matches!(err, GraphBuildError::AmbiguousWriteOrder { .. }));
    }

    #[test]
    fn single_pass_writing_render_output_directly_executes_alone() {
        let passes = vec![graphics_pass("Only", &[], &[RENDER_OUTPUT])];
        let order = compute_execution_order(&passes).unwrap();
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn lifetimes_cover_first_and_last_touching_pass() {
        let passes = vec![
            graphics_pass("GBuffer", &[], &["Albedo", "Normal", "Material", "Depth"]),
            compute_pass("Lighting", &["Albedo", "Normal", "Material", "Depth"], &["LitColor"]),
            blit_to_render_output("LitColor"),
        ];
        let order = compute_execution_order(&passes).unwrap();
        let lifetimes = analyze_lifetimes(&order, &passes);

        assert_eq!(lifetimes["Albedo"], ResourceLifetime { first_pass: 0, last_pass: 1 });
        assert_eq!(lifetimes["LitColor"], ResourceLifetime { first_pass: 1, last_pass: 2 });
    }

    #[test]
    fn aliasing_reuses_slots_with_disjoint_lifetimes() {
        // Three images of the same key; A and B never overlap, C overlaps both.
        let mut lifetimes = FxHashMap::default();
        lifetimes.insert("A".to_string(), ResourceLifetime { first_pass: 0, last_pass: 0 });
        lifetimes.insert("B".to_string(), ResourceLifetime { first_pass: 1, last_pass: 1 });
        lifetimes.insert("C".to_string(), ResourceLifetime { first_pass: 0, last_pass: 1 });

        let key = ImageKey {
            width: 1920,
            height: 1080,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        };

        let resources = vec![
            ("A".to_string(), key, false),
            ("C".to_string(), key, false),
            ("B".to_string(), key, false),
        ];

        let plan = plan_aliasing(&resources, &lifetimes);

        // A and B may share a slot (disjoint intervals); C must not share with either.
        assert_ne!(plan.resource_to_slot["A"], plan.resource_to_slot["C"]);
        assert_ne!(plan.resource_to_slot["B"], plan.resource_to_slot["C"]);
        assert_eq!(plan.slot_keys.len(), 2);
    }

    #[test]
    fn persistent_resources_are_never_aliased() {
        let mut lifetimes = FxHashMap::default();
        lifetimes.insert("A".to_string(), ResourceLifetime { first_pass: 0, last_pass: 0 });
        lifetimes.insert("B".to_string(), ResourceLifetime { first_pass: 1, last_pass: 1 });

        let key = ImageKey {
            width: 1920,
            height: 1080,
            format: vk::Format::R16_SFLOAT,
            usage: vk::ImageUsageFlags::STORAGE,
        };

        let resources = vec![("A".to_string(), key, true), ("B".to_string(), key, true)];
        let plan = plan_aliasing(&resources, &lifetimes);

        assert_ne!(plan.resource_to_slot["A"], plan.resource_to_slot["B"]);
        assert_eq!(plan.slot_keys.len(), 2);
    }

    #[test]
    fn zero_dimensions_resolve_to_swapchain_extent() {
        let descriptor = ImageDescriptor {
            name: "Albedo".into(),
            format: vk::Format::R8G8B8A8_UNORM,
            width: 0,
            height: 0,
            usage: ImageUsageKind::ColorAttachment,
            samples: vk::SampleCountFlags::TYPE_1,
            clear: None,
            explicit_binding: None,
            persistent: false,
        };
        let extent = vk::Extent2D { width: 1920, height: 1080 };
        assert_eq!(resolve_image_dimensions(&descriptor, extent), (1920, 1080));
    }

    #[test]
    fn resource_type_mismatch_is_rejected() {
        let passes = vec![
            graphics_pass("A", &[], &["Shared"]),
            PassDecl::Raytracing(RaytracingPassDecl {
                name: "B".into(),
                inputs: vec![],
                outputs: vec![],
                acceleration_structures: vec![AccelerationStructureRef { name: "Shared".into() }],
                pipeline: RaytracingPipelineDesc {
                    raygen: "rg.rgen".into(),
                    miss: vec![],
                    hit_groups: vec![],
                    max_recursion_depth: 1,
                    push_constant_size: 0,
                },
                callback: Box::new(|_| {}),
            }),
            blit_to_render_output("Shared"),
        ];

        let err = validate_resource_kinds(&passes).unwrap_err();
        assert!(matches!(err, GraphBuildError::ResourceTypeMismatch { .. }));
    }
}
