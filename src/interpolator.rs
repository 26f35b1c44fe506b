use glam::Vec2;

/// Evenly spaced points strictly between `a` and `b`.
///
/// Yields `floor(|b - a| / spacing)` points, so fast drags still sample every
/// cell they cross. Nothing is yielded when the endpoints are closer than
/// `spacing` or the spacing is not positive.
pub fn points_between(a: Vec2, b: Vec2, spacing: f32) -> impl Iterator<Item = Vec2> + Clone {
    let distance = a.distance(b);
    let count = if spacing > 0.0 && distance >= spacing {
        (distance / spacing).floor() as u32
    } else {
        0
    };
    (1..=count).map(move |i| a.lerp(b, i as f32 / (count + 1) as f32))
}
