//! Shader checks: every WGSL module must parse and validate with naga, the
//! `Instance` struct must line up with `InstanceAttributes`, and the compute
//! kernels are run for real when the machine has a usable adapter.

use std::sync::mpsc;
use std::time::Duration;

use glam::{Mat4, Vec2};
use rand::{rngs::StdRng, SeedableRng};
use wgpu::util::DeviceExt;

use crate::cell::{Cell, InstanceAttributes};
use crate::config::GridConfig;
use crate::hit::{Footprint, GridHitTester, HitReceiver};
use crate::instances::{InstanceRenderer, InstanceStaging};

const SHADERS: [(&str, &str); 3] = [
    ("shader.wgsl", include_str!("shader.wgsl")),
    ("hit.wgsl", include_str!("hit.wgsl")),
    ("transform.wgsl", include_str!("transform.wgsl")),
];

fn parse(name: &str, source: &str) -> naga::Module {
    match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(err) => panic!("{} failed to parse:\n{}", name, err.emit_to_string(source)),
    }
}

/// `(member offsets, span)` of the struct called `name`.
fn struct_layout(module: &naga::Module, name: &str) -> (Vec<u32>, u32) {
    let (_, ty) = module
        .types
        .iter()
        .find(|(_, ty)| ty.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("no struct {}", name));
    match ty.inner {
        naga::TypeInner::Struct {
            ref members, span, ..
        } => (members.iter().map(|member| member.offset).collect(), span),
        ref other => panic!("{} is not a struct: {:?}", name, other),
    }
}

/// Headless device, or `None` when the machine has no adapter.
fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    async_std::task::block_on(async {
        let instance = wgpu::Instance::new(wgpu::Backends::all());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("test device"),
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .ok()
    })
}

fn grid(config: &GridConfig) -> Vec<Cell> {
    let mut rng = StdRng::seed_from_u64(5);
    (0..config.rows)
        .flat_map(|row| (0..config.columns).map(move |col| (col, row)))
        .map(|(col, row)| Cell::new(config.cell_size(), config.levels, config.cell_center(col, row), &mut rng))
        .collect()
}

fn footprint(config: &GridConfig) -> Footprint {
    Footprint::new(config.cell_size(), config.extent())
}

/// Polls until the hit lands. `None` stands for a closed channel.
fn wait_for(device: &wgpu::Device, rx: HitReceiver) -> Option<Option<u32>> {
    for _ in 0..500 {
        device.poll(wgpu::Maintain::Wait);
        match rx.try_recv() {
            Ok(hit) => return Some(hit),
            Err(mpsc::TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(2)),
            Err(mpsc::TryRecvError::Disconnected) => return None,
        }
    }
    panic!("hit test never completed");
}

#[test]
fn all_shaders_validate() {
    for (name, source) in SHADERS {
        let module = parse(name, source);
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        );
        if let Err(err) = validator.validate(&module) {
            panic!("{} failed validation: {:?}", name, err);
        }
    }
}

#[test]
fn instance_struct_matches_uploaded_record() {
    let expected = (
        vec![
            bytemuck::offset_of!(InstanceAttributes::default(), InstanceAttributes, center) as u32,
            bytemuck::offset_of!(InstanceAttributes::default(), InstanceAttributes, scale_matrix) as u32,
            bytemuck::offset_of!(InstanceAttributes::default(), InstanceAttributes, color) as u32,
        ],
        std::mem::size_of::<InstanceAttributes>() as u32,
    );
    assert_eq!(expected, (vec![0, 16, 80], 96));
    for (name, source) in &SHADERS[1..] {
        assert_eq!(struct_layout(&parse(name, source), "Instance"), expected, "{}", name);
    }
}

#[test]
fn hit_params_match_kernel_layout() {
    let module = parse("hit.wgsl", SHADERS[1].1);
    assert_eq!(
        struct_layout(&module, "HitParams"),
        (vec![0, 8, 16, 20, 24, 28], 32)
    );
}

#[test]
fn hit_kernel_resolves_cells_on_the_gpu() {
    let (device, queue) = match test_device() {
        Some(device) => device,
        None => {
            eprintln!("no adapter, skipping");
            return;
        }
    };
    let config = GridConfig::default();
    let cells = grid(&config);
    let staging = InstanceStaging::for_cells(&cells);
    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("test instances"),
        contents: staging.upload(),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::VERTEX,
    });
    let tester = GridHitTester::new(&device);
    let footprint = footprint(&config);
    let count = cells.len() as u32;
    let locate = |point: Vec2| {
        let rx = tester
            .dispatch(&device, &queue, &buffer, count, point, footprint)
            .expect("dispatch");
        wait_for(&device, rx).expect("hit channel closed")
    };

    assert_eq!(locate(config.cell_center(25, 73)), Some(73 * 100 + 25));
    assert_eq!(locate(config.cell_center(0, 0)), Some(0));
    let lower_edge = cells[37 * 100 + 20].center() - glam::vec2(footprint.half, 0.0);
    assert_eq!(locate(lower_edge), Some(37 * 100 + 20));
    let y = config.cell_center(0, 37).y;
    assert_eq!(locate(glam::vec2(0.199995, y)), Some(37 * 100 + 19));
    assert_eq!(locate(glam::vec2(1.0, 1.0)), Some(9_999));
    assert_eq!(locate(glam::vec2(-0.000005, 0.5)), None);
    assert_eq!(locate(glam::vec2(1.5, 0.5)), None);

    assert!(tester
        .dispatch(&device, &queue, &buffer, 0, Vec2::ZERO, footprint)
        .is_none());
}

#[test]
fn transform_kernel_fills_model_matrices() {
    let (device, queue) = match test_device() {
        Some(device) => device,
        None => {
            eprintln!("no adapter, skipping");
            return;
        }
    };
    let config = GridConfig {
        columns: 10,
        rows: 7,
        ..GridConfig::default()
    };
    let mut cells = grid(&config);
    let mut renderer = InstanceRenderer::new(
        &device,
        &queue,
        wgpu::TextureFormat::Rgba8UnormSrgb,
        &cells,
    );
    let uniforms = crate::coords::Camera::new(100.0, 100.0).uniforms();

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("test transform"),
    });
    renderer.sync(&queue, &mut cells, false, &uniforms);
    renderer.compute_transforms(&mut encoder);
    queue.submit(std::iter::once(encoder.finish()));
    renderer.frame_submitted();

    let last = cells.len() - 1;
    for _ in 0..500 {
        device.poll(wgpu::Maintain::Wait);
        renderer.sync(&queue, &mut cells, false, &uniforms);
        if cells[last].model_matrix() != Mat4::IDENTITY {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    for cell in &cells {
        let center = cell.center();
        let expected = Mat4::from_translation(glam::vec3(center.x, center.y, 0.0)) * cell.scale_matrix();
        assert!(
            cell.model_matrix().abs_diff_eq(expected, 1e-6),
            "{:?} vs {:?}",
            cell.model_matrix(),
            expected
        );
    }
}

#[test]
fn hits_right_after_reallocation_see_the_new_grid() {
    let (device, queue) = match test_device() {
        Some(device) => device,
        None => {
            eprintln!("no adapter, skipping");
            return;
        }
    };
    let before = GridConfig {
        columns: 4,
        rows: 4,
        ..GridConfig::default()
    };
    let after = GridConfig {
        columns: 8,
        rows: 8,
        ..GridConfig::default()
    };
    let mut renderer = InstanceRenderer::new(
        &device,
        &queue,
        wgpu::TextureFormat::Rgba8UnormSrgb,
        &grid(&before),
    );
    let cells = grid(&after);
    renderer.reallocate(&device, &queue, &cells);

    let tester = GridHitTester::new(&device);
    let rx = tester
        .dispatch(
            &device,
            &queue,
            renderer.buffer(),
            renderer.len() as u32,
            after.cell_center(0, 0),
            footprint(&after),
        )
        .expect("dispatch");
    assert_eq!(wait_for(&device, rx), Some(Some(0)));
}
