use std::borrow::Cow;
use std::sync::mpsc;

use glam::Vec2;
use wgpu::util::DeviceExt;

/// Threads per workgroup for every compute kernel in the crate.
pub const WORKGROUP_SIZE: u32 = 64;

/// Half-width of a cell footprint as a fraction of the cell size.
pub const FOOTPRINT_HALF: f32 = 0.5;

/// Delivers the resolved cell index, or `None` on a miss. Closes without a
/// value when the dispatch could not complete.
pub type HitReceiver = mpsc::Receiver<Option<u32>>;

/// Anything that can resolve a world-space point to a cell index.
pub trait CellLocator {
    /// Starts a lookup. Returns `None` when nothing could be dispatched.
    fn locate(&mut self, point: Vec2) -> Option<HitReceiver>;
}

/// Workgroups needed to cover `instances` threads.
pub fn workgroup_count(instances: u32) -> u32 {
    (instances + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE
}

/// Cell footprints as seen by the hit kernel.
///
/// Each axis of a footprint is the half-open `[center - half, center + half)`,
/// so a point on a shared edge belongs to the cell whose lower edge it is.
/// Cells reaching the far rim of the grid, `extent`, also own the rim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub half: f32,
    pub extent: Vec2,
}

impl Footprint {
    pub fn new(dimension: f32, extent: Vec2) -> Self {
        Self {
            half: dimension * FOOTPRINT_HALF,
            extent,
        }
    }

    /// Same test as `covers` in `hit.wgsl`, for both axes.
    #[cfg(test)]
    pub(crate) fn contains(&self, center: Vec2, point: Vec2) -> bool {
        let covers = |point: f32, center: f32, extent: f32| {
            let lower = center - self.half;
            let upper = center + self.half;
            if point < lower {
                return false;
            }
            if point < upper {
                return true;
            }
            upper + self.half > extent && point <= upper.max(extent)
        };
        covers(point.x, center.x, self.extent.x) && covers(point.y, center.y, self.extent.y)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct HitParams {
    point: [f32; 2],
    extent: [f32; 2],
    half: f32,
    count: u32,
    _pad: [u32; 2],
}

impl HitParams {
    fn new(point: Vec2, footprint: Footprint, count: u32) -> Self {
        Self {
            point: point.to_array(),
            extent: footprint.extent.to_array(),
            half: footprint.half,
            count,
            _pad: [0; 2],
        }
    }
}

/// Resolves points to cells with one compute thread per instance.
pub struct GridHitTester {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl GridHitTester {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(&wgpu::ShaderModuleDescriptor {
            label: Some("hit test shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("hit.wgsl"))),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("hit test bind group layout"),
            entries: &[
                storage_entry(0, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    count: None,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                },
                storage_entry(2, false),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("hit test pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("hit test pipeline"),
            layout: Some(&layout),
            module: &shader,
            entry_point: "compute_hit",
        });

        Self {
            pipeline,
            bind_group_layout,
        }
    }

    /// Submits one lookup against `instances` and returns immediately.
    ///
    /// The result lands on the receiver once the GPU is done and the device
    /// has been polled. Each call owns its own result and staging buffers, so
    /// any number of lookups can be in flight.
    pub fn dispatch(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        instances: &wgpu::Buffer,
        count: u32,
        point: Vec2,
        footprint: Footprint,
    ) -> Option<HitReceiver> {
        if count == 0 {
            return None;
        }

        let params = HitParams::new(point, footprint, count);
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("hit params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let result_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("hit result"),
            contents: bytemuck::bytes_of(&0u32),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hit readback"),
            size: std::mem::size_of::<u32>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hit test bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: instances.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: result_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("hit test encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("hit test"),
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch(workgroup_count(count), 1, 1);
        }
        encoder.copy_buffer_to_buffer(
            &result_buffer,
            0,
            &readback,
            0,
            std::mem::size_of::<u32>() as wgpu::BufferAddress,
        );
        queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        async_std::task::spawn(async move {
            let slice = readback.slice(..);
            if let Err(err) = slice.map_async(wgpu::MapMode::Read).await {
                log::warn!("hit test readback failed: {:?}", err);
                return;
            }
            let raw = *bytemuck::from_bytes::<u32>(&slice.get_mapped_range());
            readback.unmap();
            // 0 is the miss sentinel, anything else is index + 1
            let _ = tx.send(raw.checked_sub(1));
        });
        Some(rx)
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        count: None,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    }
}

/// [`CellLocator`] backed by the GPU kernel and the live instance buffer.
pub struct GpuLocator<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub tester: &'a GridHitTester,
    pub instances: &'a wgpu::Buffer,
    pub count: u32,
    pub footprint: Footprint,
}

impl CellLocator for GpuLocator<'_> {
    fn locate(&mut self, point: Vec2) -> Option<HitReceiver> {
        self.tester.dispatch(
            self.device,
            self.queue,
            self.instances,
            self.count,
            point,
            self.footprint,
        )
    }
}

/// CPU rendition of `compute_hit`: the highest index whose footprint
/// contains the point.
#[cfg(test)]
pub(crate) fn locate_on_cpu(centers: &[Vec2], point: Vec2, footprint: &Footprint) -> Option<u32> {
    centers
        .iter()
        .enumerate()
        .filter(|(_, center)| footprint.contains(**center, point))
        .map(|(index, _)| index as u32)
        .max()
}
