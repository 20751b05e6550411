use ndarray::Array3;
use rand::Rng;

/// Random geometric augmentation applied to training images.
///
/// Each call draws a rotation about the image centre and a translation,
/// resamples with nearest-neighbour lookup (out-of-range coordinates take the
/// nearest edge pixel) and then mirrors the result half of the time.
#[derive(Debug, Clone, Copy)]
pub struct Augmenter {
    /// Maximum rotation in degrees, either direction.
    pub rotation_range: f32,
    /// Maximum horizontal shift as a fraction of the width.
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of the height.
    pub height_shift: f32,
    pub horizontal_flip: bool,
}

impl Default for Augmenter {
    fn default() -> Self {
        Self {
            rotation_range: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            horizontal_flip: true,
        }
    }
}

impl Augmenter {
    pub fn apply(&self, pixels: &Array3<f32>, rng: &mut impl Rng) -> Array3<f32> {
        let (height, width, _) = pixels.dim();
        let angle = symmetric(rng, self.rotation_range).to_radians();
        let shift_x = symmetric(rng, self.width_shift) * width as f32;
        let shift_y = symmetric(rng, self.height_shift) * height as f32;
        let flip = self.horizontal_flip && rng.random_bool(0.5);

        warp(pixels, angle, shift_x, shift_y, flip)
    }
}

fn symmetric(rng: &mut impl Rng, range: f32) -> f32 {
    if range > 0.0 {
        rng.random_range(-range..=range)
    } else {
        0.0
    }
}

/// Rotates by `angle` radians about the centre, translates by
/// `(shift_x, shift_y)` pixels and optionally mirrors horizontally.
pub fn warp(pixels: &Array3<f32>, angle: f32, shift_x: f32, shift_y: f32, flip: bool) -> Array3<f32> {
    let (height, width, channels) = pixels.dim();
    let centre_x = (width as f32 - 1.0) / 2.0;
    let centre_y = (height as f32 - 1.0) / 2.0;
    let (sin, cos) = angle.sin_cos();
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;

    Array3::from_shape_fn((height, width, channels), |(y, x, channel)| {
        let x = if flip { width - 1 - x } else { x };
        // inverse mapping from output to source coordinates
        let dx = x as f32 - shift_x - centre_x;
        let dy = y as f32 - shift_y - centre_y;
        let source_x = (cos * dx + sin * dy + centre_x).round().clamp(0.0, max_x);
        let source_y = (-sin * dx + cos * dy + centre_y).round().clamp(0.0, max_y);
        pixels[[source_y as usize, source_x as usize, channel]]
    })
}
