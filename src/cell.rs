use glam::{Mat4, Vec2, Vec3};
use rand::Rng;

/// Per-instance record the CPU uploads into the GPU instance buffer.
///
/// Layout matches the `Instance` struct in the WGSL shaders: `center` at 0,
/// `scale_matrix` at 16, `color` at 80, stride 96. Model matrices live in a
/// separate buffer that only the transform compute pass writes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceAttributes {
    pub center: [f32; 2],
    pub _pad0: [f32; 2],
    pub scale_matrix: [[f32; 4]; 4],
    pub color: [f32; 3],
    pub _pad1: f32,
}

/// Column-major model matrix as laid out in the GPU model buffer.
pub type ModelMatrix = [[f32; 4]; 4];

impl InstanceAttributes {
    const ATTRIBS: [wgpu::VertexAttribute; 6] = [
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: 1,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x4,
            offset: 16,
            shader_location: 2,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x4,
            offset: 32,
            shader_location: 3,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x4,
            offset: 48,
            shader_location: 4,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x4,
            offset: 64,
            shader_location: 5,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x3,
            offset: 80,
            shader_location: 6,
        },
    ];

    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceAttributes>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Unit quad shared by every instance, centered on the origin.
pub const QUAD_VERTICES: [[f32; 2]; 4] = [[-0.5, -0.5], [-0.5, 0.5], [0.5, 0.5], [0.5, -0.5]];
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

const QUAD_ATTRIBS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

pub fn quad_desc<'a>() -> wgpu::VertexBufferLayout<'a> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &QUAD_ATTRIBS,
    }
}

/// One grid square: a tap level, its gray shade and where it is drawn.
#[derive(Debug, Clone)]
pub struct Cell {
    center: Vec2,
    velocity: Vec2,
    base_scale: f32,
    level_max: u32,
    current_level: u32,
    color: Vec3,
    model_matrix: Mat4,
}

impl Cell {
    pub fn new<R: Rng>(base_scale: f32, total_levels: u32, center: Vec2, rng: &mut R) -> Self {
        debug_assert!(base_scale > 0.0, "cell scale must be positive");
        let velocity = glam::vec2(
            rng.gen_range(0.0001f32..=0.001) - 0.0005,
            rng.gen_range(0.0001f32..=0.001) - 0.0005,
        );
        Self {
            center,
            velocity,
            base_scale,
            level_max: total_levels.max(1),
            current_level: 0,
            color: Vec3::ONE,
            model_matrix: Mat4::IDENTITY,
        }
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    #[cfg(test)]
    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    #[cfg(test)]
    pub fn level_max(&self) -> u32 {
        self.level_max
    }

    #[cfg(test)]
    pub fn current_level(&self) -> u32 {
        self.current_level
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    #[cfg(test)]
    pub fn base_scale(&self) -> f32 {
        self.base_scale
    }

    pub fn scale_matrix(&self) -> Mat4 {
        Mat4::from_scale(Vec3::splat(self.base_scale))
    }

    /// Last model matrix read back from the transform pass.
    pub fn model_matrix(&self) -> Mat4 {
        self.model_matrix
    }

    /// Raises the level by one, saturating at the level cap. Returns the new level.
    pub fn tapped(&mut self) -> u32 {
        self.set_current_level(self.current_level.saturating_add(1))
    }

    pub fn reset(&mut self) {
        self.set_current_level(0);
    }

    /// Changes the level cap, keeping the proportion of levels reached.
    /// Returns the rescaled level.
    pub fn set_level_max(&mut self, level_max: u32) -> u32 {
        let old_max = self.level_max;
        let scale = level_max as f32 / (old_max as f32 + 1.0);
        self.level_max = level_max;
        self.set_current_level((self.current_level as f32 * scale) as u32)
    }

    pub(crate) fn advance(&mut self, step: f32) {
        self.center += self.velocity * step;
    }

    pub(crate) fn cache_model_matrix(&mut self, model_matrix: Mat4) {
        self.model_matrix = model_matrix;
    }

    fn set_current_level(&mut self, level: u32) -> u32 {
        self.current_level = level.min(self.level_max);
        let value = if self.level_max == 0 {
            1.0
        } else {
            (255.0 - self.current_level as f32 * (255.0 / self.level_max as f32)) / 255.0
        };
        self.color = Vec3::splat(value.clamp(0.0, 1.0));
        self.current_level
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.center == other.center
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn cell(levels: u32) -> Cell {
        let mut rng = StdRng::seed_from_u64(7);
        Cell::new(0.01, levels, glam::vec2(0.005, 0.005), &mut rng)
    }

    #[test]
    fn instance_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<InstanceAttributes>(), 96);
        assert_eq!(bytemuck::offset_of!(InstanceAttributes::default(), InstanceAttributes, center), 0);
        assert_eq!(bytemuck::offset_of!(InstanceAttributes::default(), InstanceAttributes, scale_matrix), 16);
        assert_eq!(bytemuck::offset_of!(InstanceAttributes::default(), InstanceAttributes, color), 80);
        assert_eq!(std::mem::align_of::<InstanceAttributes>(), 4);
    }

    #[test]
    fn level_stays_within_cap() {
        for levels in 1..8 {
            let mut cell = cell(levels);
            for step in 0..40 {
                if step % 11 == 10 {
                    cell.reset();
                } else {
                    cell.tapped();
                }
                assert!(cell.current_level() <= cell.level_max());
            }
        }
    }

    #[test]
    fn tapping_saturates() {
        let mut cell = cell(3);
        let levels: Vec<u32> = (0..5).map(|_| cell.tapped()).collect();
        assert_eq!(levels, vec![1, 2, 3, 3, 3]);
    }

    #[test]
    fn color_darkens_with_level() {
        let mut cell = cell(5);
        assert_eq!(cell.color(), Vec3::ONE);
        let mut previous = cell.color().x;
        for _ in 0..5 {
            cell.tapped();
            let value = cell.color().x;
            assert!(value < previous);
            assert!((0.0..=1.0).contains(&value));
            assert_eq!(cell.color(), Vec3::splat(value));
            previous = value;
        }
        assert!(previous.abs() < 1e-6);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut cell = cell(5);
        cell.tapped();
        cell.tapped();
        cell.reset();
        cell.reset();
        assert_eq!(cell.current_level(), 0);
        assert_eq!(cell.color(), Vec3::ONE);
    }

    #[test]
    fn level_cap_change_keeps_proportion() {
        let mut cell = cell(5);
        for _ in 0..4 {
            cell.tapped();
        }
        // 4 * 10 / 6 = 6.67, truncated
        assert_eq!(cell.set_level_max(10), 6);
        assert_eq!(cell.level_max(), 10);
        // 6 * 2 / 11 = 1.09
        assert_eq!(cell.set_level_max(2), 1);
        assert!(cell.current_level() <= cell.level_max());
    }

    #[test]
    fn zero_level_cap_is_tolerated() {
        let mut cell = cell(2);
        cell.tapped();
        assert_eq!(cell.set_level_max(0), 0);
        assert_eq!(cell.color(), Vec3::ONE);
        assert_eq!(cell.tapped(), 0);
        assert_eq!(cell.set_level_max(4), 0);
        assert_eq!(cell.tapped(), 1);
    }

    #[test]
    fn velocity_is_small_and_signed() {
        let mut rng = StdRng::seed_from_u64(42);
        let cells: Vec<Cell> = (0..200)
            .map(|_| Cell::new(0.01, 5, Vec2::ZERO, &mut rng))
            .collect();
        for cell in &cells {
            let v = cell.velocity();
            assert!(v.x >= -0.0004 - 1e-7 && v.x <= 0.0005 + 1e-7);
            assert!(v.y >= -0.0004 - 1e-7 && v.y <= 0.0005 + 1e-7);
        }
        assert!(cells.iter().any(|c| c.velocity().x < 0.0));
        assert!(cells.iter().any(|c| c.velocity().x > 0.0));
    }

    #[test]
    fn cells_compare_by_center() {
        let mut a = cell(5);
        let b = cell(2);
        a.tapped();
        assert_eq!(a, b);
        a.advance(4.0);
        assert_ne!(a, b);
    }
}
