use std::collections::VecDeque;
use std::sync::mpsc::TryRecvError;

use glam::Vec2;
use rand::{rngs::StdRng, SeedableRng};

use crate::cell::Cell;
use crate::config::GridConfig;
use crate::coords::{Camera, Uniforms};
use crate::hit::{CellLocator, HitReceiver};
use crate::input::PointerEvent;
use crate::instances::InstanceRenderer;
use crate::interpolator::points_between;

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.95,
    g: 0.95,
    b: 0.95,
    a: 1.0,
};

enum PendingHit {
    Tap(HitReceiver),
    Stroke(HitReceiver),
    /// Clears the stroke's last cell once every hit queued before it is in.
    StrokeEnd,
}

impl PendingHit {
    /// `None` while the answer is still on its way.
    fn poll(&self) -> Option<Option<u32>> {
        match self {
            PendingHit::StrokeEnd => Some(None),
            PendingHit::Tap(rx) | PendingHit::Stroke(rx) => match rx.try_recv() {
                Ok(hit) => Some(hit),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    log::debug!("hit test produced no result, dropping it");
                    Some(None)
                }
            },
        }
    }
}

/// The grid of cells plus everything that turns pointer input into taps.
pub struct Scene {
    config: GridConfig,
    rng: StdRng,
    cells: Vec<Cell>,
    level_max: u32,
    camera: Camera,
    exploding: bool,

    last_stroke_point: Option<Vec2>,
    last_stroke_cell: Option<usize>,
    pending: VecDeque<PendingHit>,
}

impl Scene {
    pub fn new(config: GridConfig, width: f32, height: f32) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut scene = Self {
            level_max: config.levels,
            config,
            rng,
            cells: Vec::new(),
            camera: Camera::new(width, height),
            exploding: false,
            last_stroke_point: None,
            last_stroke_cell: None,
            pending: VecDeque::new(),
        };
        scene.reset();
        scene
    }

    /// Throws the grid away and builds a fresh one. Hits still in flight are
    /// forgotten. The instance buffer has to be reallocated to match.
    pub fn reset(&mut self) {
        let size = self.config.cell_size();
        let mut cells = Vec::with_capacity(self.config.cell_count());
        for row in 0..self.config.rows {
            for col in 0..self.config.columns {
                let center = self.config.cell_center(col, row);
                cells.push(Cell::new(size, self.level_max, center, &mut self.rng));
            }
        }
        self.cells = cells;
        self.last_stroke_point = None;
        self.last_stroke_cell = None;
        self.pending.clear();
        self.camera.reset_view();
        log::debug!(
            "grid reset: {}x{} cells, {} levels",
            self.config.columns,
            self.config.rows,
            self.level_max
        );
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.camera.resize(width, height);
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[cfg(test)]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn uniforms(&self) -> Uniforms {
        self.camera.uniforms()
    }

    pub fn is_exploding(&self) -> bool {
        self.exploding
    }

    pub fn toggle_explode(&mut self) -> bool {
        self.exploding = !self.exploding;
        self.exploding
    }

    pub fn level_max(&self) -> u32 {
        self.level_max
    }

    /// Returns every cell to level 0 without touching positions.
    pub fn clear_levels(&mut self) {
        for cell in &mut self.cells {
            cell.reset();
        }
    }

    /// Changes the level cap of every cell, keeping each one's progress.
    pub fn set_level_max(&mut self, level_max: u32) {
        self.level_max = level_max;
        for cell in &mut self.cells {
            cell.set_level_max(level_max);
        }
        log::debug!("level cap set to {}", level_max);
    }

    /// Hits dispatched but not yet applied.
    pub fn pending_hits(&self) -> usize {
        self.pending
            .iter()
            .filter(|hit| !matches!(hit, PendingHit::StrokeEnd))
            .count()
    }

    /// Routes a device-space gesture into world space.
    pub fn handle_pointer(&mut self, event: PointerEvent, locator: &mut impl CellLocator) {
        match event {
            PointerEvent::Tap { point } => {
                let world = self.camera.device_to_world(point, false);
                self.tap_at(world, locator);
            }
            PointerEvent::Drag { point, is_end } => {
                let world = self.camera.device_to_world(point, false);
                self.stroke_to(world, is_end, locator);
            }
        }
    }

    pub fn tap_at(&mut self, point: Vec2, locator: &mut impl CellLocator) {
        match locator.locate(point) {
            Some(rx) => self.pending.push_back(PendingHit::Tap(rx)),
            None => log::debug!("tap at {:?} could not be dispatched", point),
        }
    }

    /// Extends the current stroke to `point`.
    ///
    /// Samples the previous point and evenly spaced points up to this one, plus
    /// this one when the stroke ends. Each cell the stroke enters is tapped
    /// once per entry.
    pub fn stroke_to(&mut self, point: Vec2, is_end: bool, locator: &mut impl CellLocator) {
        let mut samples = Vec::new();
        if let Some(last) = self.last_stroke_point {
            samples.push(last);
            samples.extend(points_between(last, point, self.config.stroke_spacing));
        }
        if is_end {
            samples.push(point);
        }

        for sample in samples {
            match locator.locate(sample) {
                Some(rx) => self.pending.push_back(PendingHit::Stroke(rx)),
                None => log::debug!("stroke sample {:?} could not be dispatched", sample),
            }
        }

        if is_end {
            self.last_stroke_point = None;
            self.pending.push_back(PendingHit::StrokeEnd);
        } else {
            self.last_stroke_point = Some(point);
        }
    }

    /// Applies every answered hit, oldest first, stopping at the first one
    /// still in flight. Never blocks. Returns how many cells were tapped.
    pub fn resolve_hits(&mut self) -> usize {
        let mut taps = 0;
        while let Some(hit) = self.pending.front().and_then(PendingHit::poll) {
            let tapped = match (self.pending.pop_front(), hit) {
                (Some(PendingHit::StrokeEnd), _) => {
                    self.last_stroke_cell = None;
                    false
                }
                (Some(PendingHit::Tap(_)), Some(index)) => self.tap_cell(index as usize),
                (Some(PendingHit::Stroke(_)), Some(index)) => self.enter_stroke_cell(index as usize),
                _ => false,
            };
            if tapped {
                taps += 1;
            }
        }
        taps
    }

    fn tap_cell(&mut self, index: usize) -> bool {
        match self.cells.get_mut(index) {
            Some(cell) => {
                let level = cell.tapped();
                log::trace!(
                    "cell {} at level {}, drawn at {:?}",
                    index,
                    level,
                    cell.model_matrix().w_axis
                );
                true
            }
            None => false,
        }
    }

    fn enter_stroke_cell(&mut self, index: usize) -> bool {
        let cell = match self.cells.get(index) {
            Some(cell) => cell,
            None => return false,
        };
        let last = self.last_stroke_cell.and_then(|last| self.cells.get(last));
        if last == Some(cell) {
            return false;
        }
        self.last_stroke_cell = Some(index);
        self.tap_cell(index)
    }

    /// Encodes one frame: sync and upload the cells, draw them, then queue the
    /// transform pass for the next frame.
    pub fn encode_frame(
        &mut self,
        instances: &mut InstanceRenderer,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
    ) {
        let uniforms = self.uniforms();
        instances.sync(queue, &mut self.cells, self.exploding, &uniforms);
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("grid"),
                color_attachments: &[wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: true,
                    },
                }],
                depth_stencil_attachment: None,
            });
            instances.draw(&mut render_pass);
        }
        instances.compute_transforms(encoder);
    }
}
