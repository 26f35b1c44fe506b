//! Coordinate spaces between pointer pixels and the unit grid.
//!
//! device (pixels, y down) -> NDC ([-1, 1], y up) -> view -> world ([0, 1]²).
//! Every step takes `is_vector`: vectors carry `w = 0` and skip translation,
//! points carry `w = 1`. Each step has an exact inverse.

use glam::{Mat4, Vec2, Vec3, Vec4};

const NDC_SPAN: [f32; 2] = [2.0, 2.0];
const CAMERA_CENTER: [f32; 3] = [0.5, 0.5, 0.0];
const CAMERA_ZOOM: f32 = 2.0;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Uniforms {
    /// Identity; per-instance transforms live in the instance buffer.
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

/// Scales y by the viewport aspect ratio.
pub fn projection_matrix(width: f32, height: f32) -> Mat4 {
    let aspect = width / height;
    Mat4::from_scale(glam::vec3(1.0, aspect, 1.0))
}

/// Puts the middle of the unit grid at the origin and zooms in around it so
/// the grid spans the viewport.
pub fn view_matrix() -> Mat4 {
    let center = Vec3::from(CAMERA_CENTER);
    let translation = Mat4::from_translation(center).inverse();
    let pivot = Mat4::from_translation(center);
    let zoom = Mat4::from_scale(glam::vec3(CAMERA_ZOOM, CAMERA_ZOOM, 1.0));
    translation * pivot * zoom * pivot.inverse()
}

#[derive(Debug, Clone)]
pub struct Camera {
    viewport: Vec2,
    projection: Mat4,
    view: Mat4,
}

impl Camera {
    /// A degenerate size falls back to a 1x1 viewport until the next resize.
    pub fn new(width: f32, height: f32) -> Self {
        let mut camera = Self {
            viewport: Vec2::ONE,
            projection: projection_matrix(1.0, 1.0),
            view: view_matrix(),
        };
        camera.resize(width, height);
        camera
    }

    #[cfg(test)]
    pub fn viewport(&self) -> Vec2 {
        self.viewport
    }

    /// Ignores degenerate sizes, e.g. a minimized window.
    pub fn resize(&mut self, width: f32, height: f32) {
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        self.viewport = glam::vec2(width, height);
        self.projection = projection_matrix(width, height);
    }

    pub fn reset_view(&mut self) {
        self.view = view_matrix();
    }

    pub fn uniforms(&self) -> Uniforms {
        Uniforms {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            view: self.view.to_cols_array_2d(),
            projection: self.projection.to_cols_array_2d(),
        }
    }

    pub fn device_to_ndc(&self, point: Vec2, is_vector: bool) -> Vec2 {
        let mut ndc = point / self.viewport * Vec2::from(NDC_SPAN);
        if !is_vector {
            ndc -= Vec2::ONE;
        }
        ndc.y = -ndc.y;
        ndc
    }

    #[cfg(test)]
    pub fn ndc_to_device(&self, ndc: Vec2, is_vector: bool) -> Vec2 {
        let mut point = glam::vec2(ndc.x, -ndc.y);
        if !is_vector {
            point += Vec2::ONE;
        }
        point / Vec2::from(NDC_SPAN) * self.viewport
    }

    pub fn ndc_to_view(&self, ndc: Vec2, is_vector: bool) -> Vec2 {
        apply(self.projection.inverse(), ndc, is_vector)
    }

    #[cfg(test)]
    pub fn view_to_ndc(&self, view: Vec2, is_vector: bool) -> Vec2 {
        apply(self.projection, view, is_vector)
    }

    pub fn view_to_world(&self, view: Vec2, is_vector: bool) -> Vec2 {
        apply(self.view.inverse(), view, is_vector)
    }

    #[cfg(test)]
    pub fn world_to_view(&self, world: Vec2, is_vector: bool) -> Vec2 {
        apply(self.view, world, is_vector)
    }

    pub fn device_to_world(&self, point: Vec2, is_vector: bool) -> Vec2 {
        let ndc = self.device_to_ndc(point, is_vector);
        let view = self.ndc_to_view(ndc, is_vector);
        self.view_to_world(view, is_vector)
    }

    #[cfg(test)]
    pub fn world_to_device(&self, world: Vec2, is_vector: bool) -> Vec2 {
        let view = self.world_to_view(world, is_vector);
        let ndc = self.view_to_ndc(view, is_vector);
        self.ndc_to_device(ndc, is_vector)
    }
}

fn apply(matrix: Mat4, value: Vec2, is_vector: bool) -> Vec2 {
    let w = if is_vector { 0.0 } else { 1.0 };
    let out = matrix * Vec4::new(value.x, value.y, 0.0, w);
    glam::vec2(out.x, out.y)
}
