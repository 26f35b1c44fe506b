use std::borrow::Cow;
use std::sync::{mpsc, Arc};

use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::cell::{self, Cell, InstanceAttributes, ModelMatrix, QUAD_INDICES, QUAD_VERTICES};
use crate::coords::Uniforms;
use crate::hit::workgroup_count;

/// Distance multiplier applied to each cell's velocity per exploding frame.
pub const EXPLODE_STEP: f32 = 4.0;

/// CPU-owned mirror of the instance buffer, index-aligned with the cells.
///
/// `attributes` is what gets uploaded. `model_matrices` only ever holds what
/// the transform pass produced and is never sent back to the device.
#[derive(Debug, Clone)]
pub struct InstanceStaging {
    attributes: Vec<InstanceAttributes>,
    model_matrices: Vec<ModelMatrix>,
}

impl InstanceStaging {
    pub fn new(count: usize) -> Self {
        Self {
            attributes: vec![InstanceAttributes::default(); count],
            model_matrices: vec![Mat4::IDENTITY.to_cols_array_2d(); count],
        }
    }

    /// Staging already filled from `cells`, ready for upload.
    pub fn for_cells(cells: &[Cell]) -> Self {
        let mut staging = Self::new(cells.len());
        for (cell, slot) in cells.iter().zip(staging.attributes.iter_mut()) {
            write_slot(slot, cell);
        }
        staging
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// The bytes handed to the instance buffer.
    pub fn upload(&self) -> &[u8] {
        bytemuck::cast_slice(&self.attributes)
    }

    /// Frame-start sync: moves exploding cells, writes each cell's logical
    /// fields into its slot and hands the last read-back model matrix to the cell.
    pub fn sync(&mut self, cells: &mut [Cell], exploding: bool) {
        debug_assert_eq!(cells.len(), self.attributes.len());
        let slots = self.attributes.iter_mut().zip(&self.model_matrices);
        for (cell, (slot, model)) in cells.iter_mut().zip(slots) {
            if exploding {
                cell.advance(EXPLODE_STEP);
            }
            write_slot(slot, cell);
            cell.cache_model_matrix(Mat4::from_cols_array_2d(model));
        }
    }

    /// Takes the model matrices out of a completed GPU readback.
    pub fn apply_readback(&mut self, readback: &[ModelMatrix]) {
        for (slot, read) in self.model_matrices.iter_mut().zip(readback) {
            *slot = *read;
        }
    }
}

fn write_slot(slot: &mut InstanceAttributes, cell: &Cell) {
    slot.center = cell.center().to_array();
    slot.scale_matrix = cell.scale_matrix().to_cols_array_2d();
    slot.color = cell.color().to_array();
}

/// Staging buffer for pulling model matrices back from the GPU.
///
/// Only one copy is in flight at a time; the buffer is not written again
/// until the previous mapping has been delivered and unmapped.
struct ModelReadback {
    buffer: Arc<wgpu::Buffer>,
    size: wgpu::BufferAddress,
    rx: Option<mpsc::Receiver<Vec<ModelMatrix>>>,
}

impl ModelReadback {
    fn new(device: &wgpu::Device, size: wgpu::BufferAddress) -> Self {
        Self {
            buffer: Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("model matrix readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })),
            size,
            rx: None,
        }
    }

    fn is_pending(&self) -> bool {
        self.rx.is_some()
    }

    fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, src: &wgpu::Buffer) {
        encoder.copy_buffer_to_buffer(src, 0, &self.buffer, 0, self.size);
    }

    /// Must run after the copy has been submitted.
    fn start(&mut self) {
        let buffer = Arc::clone(&self.buffer);
        let (tx, rx) = mpsc::channel();
        async_std::task::spawn(async move {
            let slice = buffer.slice(..);
            if let Err(err) = slice.map_async(wgpu::MapMode::Read).await {
                log::warn!("model matrix readback failed: {:?}", err);
                return;
            }
            let models = bytemuck::cast_slice::<u8, ModelMatrix>(&slice.get_mapped_range()).to_vec();
            buffer.unmap();
            let _ = tx.send(models);
        });
        self.rx = Some(rx);
    }

    fn take(&mut self) -> Option<Vec<ModelMatrix>> {
        let rx = self.rx.as_ref()?;
        match rx.try_recv() {
            Ok(models) => {
                self.rx = None;
                Some(models)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.rx = None;
                None
            }
        }
    }
}

/// Buffers sized for one grid.
struct InstanceBuffers {
    instances: wgpu::Buffer,
    models: wgpu::Buffer,
    // held for the bind group
    _transform_params: wgpu::Buffer,
    transform_bind_group: wgpu::BindGroup,
    readback: ModelReadback,
}

/// Owns the instance buffer and everything needed to draw the grid from it.
pub struct InstanceRenderer {
    staging: InstanceStaging,
    buffers: InstanceBuffers,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,

    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    render_pipeline: wgpu::RenderPipeline,

    transform_pipeline: wgpu::ComputePipeline,
    transform_bind_group_layout: wgpu::BindGroupLayout,

    readback_encoded: bool,
}

impl InstanceRenderer {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, format: wgpu::TextureFormat, cells: &[Cell]) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad indices"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniforms"),
            size: std::mem::size_of::<Uniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniform bind group layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    count: None,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                }],
            });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let shader = device.create_shader_module(&wgpu::ShaderModuleDescriptor {
            label: Some("instance shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("shader.wgsl"))),
        });
        let render_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("instance pipeline layout"),
                bind_group_layouts: &[&uniform_bind_group_layout],
                push_constant_ranges: &[],
            });
        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("instance pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[cell::quad_desc(), InstanceAttributes::desc()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[format.into()],
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let transform_shader = device.create_shader_module(&wgpu::ShaderModuleDescriptor {
            label: Some("transform shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("transform.wgsl"))),
        });
        let transform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("transform bind group layout"),
                entries: &[
                    compute_entry(0, wgpu::BufferBindingType::Storage { read_only: true }),
                    compute_entry(1, wgpu::BufferBindingType::Storage { read_only: false }),
                    compute_entry(2, wgpu::BufferBindingType::Uniform),
                ],
            });
        let transform_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("transform pipeline layout"),
                bind_group_layouts: &[&transform_bind_group_layout],
                push_constant_ranges: &[],
            });
        let transform_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("transform pipeline"),
            layout: Some(&transform_pipeline_layout),
            module: &transform_shader,
            entry_point: "compute_transform",
        });

        let staging = InstanceStaging::for_cells(cells);
        let buffers = InstanceBuffers::allocate(device, &transform_bind_group_layout, cells.len());
        queue.write_buffer(&buffers.instances, 0, staging.upload());

        Self {
            staging,
            buffers,
            vertex_buffer,
            index_buffer,
            uniform_buffer,
            uniform_bind_group,
            render_pipeline,
            transform_pipeline,
            transform_bind_group_layout,
            readback_encoded: false,
        }
    }

    /// Reallocates every per-instance resource for a rebuilt grid and uploads
    /// it right away, so hit tests issued before the next frame see the new
    /// cells.
    pub fn reallocate(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, cells: &[Cell]) {
        self.staging = InstanceStaging::for_cells(cells);
        self.buffers = InstanceBuffers::allocate(device, &self.transform_bind_group_layout, cells.len());
        queue.write_buffer(&self.buffers.instances, 0, self.staging.upload());
        self.readback_encoded = false;
        log::debug!("instance buffer reallocated for {} cells", cells.len());
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffers.instances
    }

    pub fn len(&self) -> usize {
        self.staging.len()
    }

    /// Step 1 of a frame: pick up finished readbacks, sync the cells and
    /// upload them together with the uniforms.
    pub fn sync(&mut self, queue: &wgpu::Queue, cells: &mut [Cell], exploding: bool, uniforms: &Uniforms) {
        if let Some(models) = self.buffers.readback.take() {
            self.staging.apply_readback(&models);
        }
        self.staging.sync(cells, exploding);
        queue.write_buffer(&self.buffers.instances, 0, self.staging.upload());
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    /// Step 2: one instanced draw of the shared quad.
    pub fn draw<'a>(&'a self, render_pass: &mut wgpu::RenderPass<'a>) {
        render_pass.push_debug_group("Cell Instances");
        render_pass.set_pipeline(&self.render_pipeline);
        render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_vertex_buffer(1, self.buffers.instances.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        render_pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..self.staging.len() as u32);
        render_pass.pop_debug_group();
    }

    /// Step 3, encoded after the render pass: recompute model matrices for the
    /// next frame and, when the readback slot is free, copy them out.
    pub fn compute_transforms(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let count = self.staging.len() as u32;
        if count == 0 {
            return;
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("transform"),
            });
            pass.set_pipeline(&self.transform_pipeline);
            pass.set_bind_group(0, &self.buffers.transform_bind_group, &[]);
            pass.dispatch(workgroup_count(count), 1, 1);
        }
        if !self.buffers.readback.is_pending() {
            self.buffers.readback.copy_from(encoder, &self.buffers.models);
            self.readback_encoded = true;
        }
    }

    /// Call once the frame's command buffer has been submitted.
    pub fn frame_submitted(&mut self) {
        if self.readback_encoded {
            self.buffers.readback.start();
            self.readback_encoded = false;
        }
    }
}

impl InstanceBuffers {
    fn allocate(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, count: usize) -> Self {
        // wgpu rejects zero-sized bindings, so keep at least one slot around
        let slots = count.max(1);
        let instances = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cell instances"),
            size: (slots * std::mem::size_of::<InstanceAttributes>()) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let models_size = (slots * std::mem::size_of::<ModelMatrix>()) as wgpu::BufferAddress;
        let models = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cell model matrices"),
            size: models_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params: [u32; 4] = [count as u32, 0, 0, 0];
        let transform_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transform params"),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let transform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transform bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: instances.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: models.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: transform_params.as_entire_binding(),
                },
            ],
        });
        let readback = ModelReadback::new(device, models_size);

        Self {
            instances,
            models,
            _transform_params: transform_params,
            transform_bind_group,
            readback,
        }
    }
}

fn compute_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        count: None,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    }
}
