use std::str::FromStr;

/// Grid and input settings fixed for the lifetime of a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct GridConfig {
    pub columns: u32,
    pub rows: u32,
    /// Level capacity each cell starts with.
    pub levels: u32,
    /// World-space distance between interpolated stroke samples.
    pub stroke_spacing: f32,
    /// Maximum pointer travel, in pixels, for a press to count as a tap.
    pub tap_slop: f32,
    /// Fixes cell velocities when set.
    pub seed: Option<u64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 100,
            rows: 100,
            levels: 5,
            stroke_spacing: 0.01,
            tap_slop: 5.0,
            seed: None,
        }
    }
}

impl GridConfig {
    /// Defaults overridden by `GRID_COLUMNS`, `GRID_ROWS`, `GRID_LEVELS` and `GRID_SEED`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(columns) = env_value::<u32>("GRID_COLUMNS").filter(|&c| c > 0) {
            config.columns = columns;
        }
        if let Some(rows) = env_value::<u32>("GRID_ROWS").filter(|&r| r > 0) {
            config.rows = rows;
        }
        if let Some(levels) = env_value::<u32>("GRID_LEVELS").filter(|&l| l > 0) {
            config.levels = levels;
        }
        if let Some(seed) = env_value::<u64>("GRID_SEED") {
            config.seed = Some(seed);
        }
        config
    }

    pub fn cell_count(&self) -> usize {
        (self.columns * self.rows) as usize
    }

    /// Side length of one cell in world units.
    pub fn cell_size(&self) -> f32 {
        1.0 / self.columns as f32
    }

    /// Far corner of the grid; the near corner is the origin.
    pub fn extent(&self) -> glam::Vec2 {
        let size = self.cell_size();
        glam::vec2(self.columns as f32 * size, self.rows as f32 * size)
    }

    /// World-space center of cell `(col, row)`.
    pub fn cell_center(&self, col: u32, row: u32) -> glam::Vec2 {
        let size = self.cell_size();
        let half = size / 2.0;
        glam::vec2(col as f32 * size + half, row as f32 * size + half)
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
