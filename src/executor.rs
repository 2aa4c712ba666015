//! Frame execution: draws the resolved node list in dependency order, one
//! full-screen-quad pass per node, with the correct input textures and
//! uniform/parameter buffers bound.
//!
//! All submission happens synchronously on the thread that owns the GPU
//! context. A node without a compiled pipeline is skipped for the frame
//! (downstream readers see its last successfully rendered contents); nothing
//! in here aborts the frame loop.

use wgpu::util::DeviceExt;

use crate::assets::{AssetId, AssetKind, AssetStore, SLOT_COUNT};
use crate::compiler::{CompiledShader, ValidatedShader};
use crate::gpu::{GpuContext, TARGET_FORMAT};
use crate::graph;
use crate::targets::{RenderTargetCache, TargetMode, PREVIEW_SIZE};

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniforms {
    resolution: [f32; 2],
    time: f32,
    frame: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    tex_coord: [f32; 2],
}

// Two triangles, six vertices, covering clip space.
const QUAD_VERTICES: [QuadVertex; 6] = [
    QuadVertex { position: [-1.0, -1.0], tex_coord: [0.0, 1.0] },
    QuadVertex { position: [1.0, -1.0], tex_coord: [1.0, 1.0] },
    QuadVertex { position: [1.0, 1.0], tex_coord: [1.0, 0.0] },
    QuadVertex { position: [-1.0, -1.0], tex_coord: [0.0, 1.0] },
    QuadVertex { position: [1.0, 1.0], tex_coord: [1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0], tex_coord: [0.0, 0.0] },
];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

pub struct FrameExecutor {
    quad_buffer: wgpu::Buffer,
    frame_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

impl FrameExecutor {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let quad_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fragforge-quad"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fragforge-frame-uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("fragforge-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fragforge-uniforms-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let mut texture_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..SLOT_COUNT as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        texture_entries.push(wgpu::BindGroupLayoutEntry {
            binding: SLOT_COUNT as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fragforge-textures-layout"),
            entries: &texture_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fragforge-pipeline-layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        Self {
            quad_buffer,
            frame_buffer,
            sampler,
            uniform_layout,
            texture_layout,
            pipeline_layout,
        }
    }

    /// Build the GPU pipeline for a validated shader. Runs on the GPU
    /// thread; the WGSL has already passed naga validation on the worker.
    pub fn create_pipeline(&self, gpu: &GpuContext, validated: &ValidatedShader) -> CompiledShader {
        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("fragforge-shader"),
                source: wgpu::ShaderSource::Wgsl(validated.wgsl.as_str().into()),
            });

        // Source-alpha over, for both color and alpha channels.
        let blend = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        };

        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("fragforge-node-pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<QuadVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &QUAD_ATTRIBUTES,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        let param_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("fragforge-params"),
                contents: bytemuck::cast_slice(&[[0.0f32; 4]; crate::assets::MAX_PARAMS]),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        CompiledShader {
            pipeline,
            param_buffer,
            inputs: validated.inputs.clone(),
            params: validated.params.clone(),
        }
    }

    /// Render one frame of the graph rooted at `root` and return the id of
    /// the node whose target is the frame's visible result, or `None` when
    /// the root resolves to nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn render_frame(
        &self,
        gpu: &GpuContext,
        store: &AssetStore,
        targets: &mut RenderTargetCache,
        root: AssetId,
        resolution: (u32, u32),
        time: f32,
        frame: u32,
        mode: TargetMode,
    ) -> Option<AssetId> {
        let order = graph::collect(store, root);
        if order.is_empty() {
            return None;
        }

        let size = match mode {
            TargetMode::Full => resolution,
            TargetMode::Preview => PREVIEW_SIZE,
        };
        if mode == TargetMode::Full {
            targets.note_full_resolution(size.0, size.1);
        }

        // Allocation phase: every target, image upload, and output sink must
        // exist before any pass is recorded.
        for id in &order {
            targets.ensure(gpu, *id, mode, size.0, size.1);
            let Some(asset) = store.get(*id) else { continue };
            for slot in asset.slots.iter().flatten() {
                match store.get(*slot).map(|a| a.kind) {
                    Some(AssetKind::Image) => {
                        let bytes = store.get(*slot).map(|a| a.data.clone()).unwrap_or_default();
                        targets.ensure_image(gpu, *slot, &bytes);
                    }
                    Some(AssetKind::Texture) => {
                        targets.ensure(gpu, *slot, mode, size.0, size.1);
                    }
                    _ => {}
                }
            }
            if let Some(out) = asset.output {
                if store.get_kind(out, AssetKind::Texture).is_some() {
                    targets.ensure(gpu, out, mode, size.0, size.1);
                }
            }
        }

        let uniforms = FrameUniforms {
            resolution: [size.0 as f32, size.1 as f32],
            time,
            frame,
        };
        gpu.queue
            .write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&uniforms));
        for id in &order {
            if let Some(shader) = store.get(*id).and_then(|a| a.shader.as_ref()) {
                let values = store.get(*id).map(|a| a.param_values).unwrap_or_default();
                gpu.queue
                    .write_buffer(&shader.param_buffer, 0, bytemuck::cast_slice(&values));
            }
        }

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fragforge-frame"),
            });

        for id in &order {
            let Some(asset) = store.get(*id) else { continue };
            let Some(shader) = asset.shader.as_ref() else {
                log::warn!("skipping node '{}': no compiled pipeline", asset.name);
                continue;
            };
            let Some(target) = targets.get(*id, mode) else {
                log::error!("no render target for node '{}'", asset.name);
                continue;
            };

            let views: Vec<&wgpu::TextureView> = (0..SLOT_COUNT)
                .map(|slot| self.resolve_input(store, targets, *id, asset.slots[slot], mode))
                .collect();

            let uniform_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("fragforge-uniforms"),
                layout: &self.uniform_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.frame_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: shader.param_buffer.as_entire_binding(),
                    },
                ],
            });
            let mut texture_entries: Vec<wgpu::BindGroupEntry> = views
                .iter()
                .enumerate()
                .map(|(binding, view)| wgpu::BindGroupEntry {
                    binding: binding as u32,
                    resource: wgpu::BindingResource::TextureView(view),
                })
                .collect();
            texture_entries.push(wgpu::BindGroupEntry {
                binding: SLOT_COUNT as u32,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
            let texture_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("fragforge-textures"),
                layout: &self.texture_layout,
                entries: &texture_entries,
            });

            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("fragforge-node-pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&shader.pipeline);
                pass.set_bind_group(0, &uniform_group, &[]);
                pass.set_bind_group(1, &texture_group, &[]);
                pass.set_vertex_buffer(0, self.quad_buffer.slice(..));
                pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
            }

            // Output designation: mirror the node's result into its terminal
            // texture sink so other nodes can read it through their slots.
            if let Some(out) = asset.output {
                if store.get_kind(out, AssetKind::Texture).is_some() {
                    if let Some(sink) = targets.get(out, mode) {
                        if sink.size == target.size {
                            encoder.copy_texture_to_texture(
                                target.texture.as_image_copy(),
                                sink.texture.as_image_copy(),
                                wgpu::Extent3d {
                                    width: target.size.0,
                                    height: target.size.1,
                                    depth_or_array_layers: 1,
                                },
                            );
                        }
                    }
                }
            }
        }

        gpu.queue.submit(std::iter::once(encoder.finish()));
        order.last().copied()
    }

    /// Resolve one slot to a bindable texture view, degrading to the shared
    /// black texture for unset, dangling, wrong-kind, or self-referential
    /// inputs.
    fn resolve_input<'a>(
        &self,
        store: &AssetStore,
        targets: &'a RenderTargetCache,
        node: AssetId,
        slot: Option<AssetId>,
        mode: TargetMode,
    ) -> &'a wgpu::TextureView {
        let black = &targets.black().view;
        let Some(id) = slot else { return black };
        if id == node {
            // A node cannot sample its own target while rendering into it.
            log::warn!("node {node:?} references itself; binding black");
            return black;
        }
        let Some(asset) = store.get(id) else { return black };
        match asset.kind {
            AssetKind::Shader | AssetKind::Texture => targets
                .get(id, mode)
                .map(|t| &t.view)
                .unwrap_or(black),
            AssetKind::Image => targets.get_image(id).map(|t| &t.view).unwrap_or(black),
            AssetKind::Audio => black,
        }
    }
}
