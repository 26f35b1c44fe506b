use glam::Vec2;

/// Pointer gesture in device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Tap { point: Vec2 },
    Drag { point: Vec2, is_end: bool },
}

/// Splits raw press/move/release input into taps and drag strokes.
///
/// A press that travels no further than `slop` pixels before release is a tap
/// at the press position. Travelling further turns it into a stroke which
/// starts at the press position and ends on release.
#[derive(Debug, Clone)]
pub struct PointerTracker {
    slop: f32,
    position: Vec2,
    press: Option<Vec2>,
    dragging: bool,
}

impl PointerTracker {
    pub fn new(slop: f32) -> Self {
        Self {
            slop,
            position: Vec2::ZERO,
            press: None,
            dragging: false,
        }
    }

    #[cfg(test)]
    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn pressed(&mut self) {
        self.press = Some(self.position);
        self.dragging = false;
    }

    pub fn moved(&mut self, position: Vec2) -> Option<PointerEvent> {
        self.position = position;
        let start = self.press?;
        if self.dragging {
            return Some(PointerEvent::Drag {
                point: position,
                is_end: false,
            });
        }
        if start.distance(position) > self.slop {
            self.dragging = true;
            return Some(PointerEvent::Drag {
                point: start,
                is_end: false,
            });
        }
        None
    }

    pub fn released(&mut self) -> Option<PointerEvent> {
        let start = self.press.take()?;
        if std::mem::take(&mut self.dragging) {
            Some(PointerEvent::Drag {
                point: self.position,
                is_end: true,
            })
        } else if start.distance(self.position) <= self.slop {
            Some(PointerEvent::Tap { point: start })
        } else {
            None
        }
    }
}
