//! Random geometric augmentation for training batches
//!
//! Every transform is applied as one inverse affine map from output pixel to
//! source pixel with nearest-neighbour sampling. Source coordinates outside the
//! image are clamped to the border (nearest fill).

use ndarray::Array3;
use rand::Rng;

/// Augmentation ranges
#[derive(Debug, Clone, PartialEq)]
pub struct Augmentation {
    /// Max rotation in degrees, either direction
    pub rotation_range: f32,
    pub horizontal_flip: bool,
    /// Max shift as a fraction of width
    pub width_shift_range: f32,
    /// Max shift as a fraction of height
    pub height_shift_range: f32,
    /// Max shear angle in degrees
    pub shear_range: f32,
    /// Zoom factors are drawn from `[1 - zoom_range, 1 + zoom_range]` per axis
    pub zoom_range: f32,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            rotation_range: 40.0,
            horizontal_flip: true,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
        }
    }
}

impl Augmentation {
    /// No-op ranges; `apply` returns the input unchanged
    pub fn identity() -> Self {
        Self {
            rotation_range: 0.0,
            horizontal_flip: false,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
        }
    }

    /// Apply one random transform to an HWC image
    pub fn apply<R: Rng + ?Sized>(&self, image: &Array3<f32>, rng: &mut R) -> Array3<f32> {
        let (h, w, c) = image.dim();
        if h == 0 || w == 0 {
            return image.clone();
        }

        let theta = symmetric(rng, self.rotation_range).to_radians();
        let shear = symmetric(rng, self.shear_range).to_radians();
        let ty = symmetric(rng, self.height_shift_range) * h as f32;
        let tx = symmetric(rng, self.width_shift_range) * w as f32;
        let (zy, zx) = if self.zoom_range > 0.0 {
            (
                rng.random_range(1.0 - self.zoom_range..=1.0 + self.zoom_range),
                rng.random_range(1.0 - self.zoom_range..=1.0 + self.zoom_range),
            )
        } else {
            (1.0, 1.0)
        };
        let flip = self.horizontal_flip && rng.random_bool(0.5);

        // Output (y, x) -> source (y, x): rotation * shear * zoom about the
        // image centre, followed by the shift.
        let (sin, cos) = theta.sin_cos();
        let (sin_s, cos_s) = shear.sin_cos();
        let m = [
            [cos * zy, (-cos * sin_s - sin * cos_s) * zx],
            [sin * zy, (cos * cos_s - sin * sin_s) * zx],
        ];

        let cy = (h as f32 - 1.0) / 2.0;
        let cx = (w as f32 - 1.0) / 2.0;

        let mut out = Array3::zeros((h, w, c));
        for y in 0..h {
            for x in 0..w {
                let xo = if flip { w - 1 - x } else { x };
                let dy = y as f32 - cy;
                let dx = xo as f32 - cx;
                let sy = m[0][0] * dy + m[0][1] * dx + cy + ty;
                let sx = m[1][0] * dy + m[1][1] * dx + cx + tx;
                let sy = (sy.round().max(0.0) as usize).min(h - 1);
                let sx = (sx.round().max(0.0) as usize).min(w - 1);
                for ch in 0..c {
                    out[[y, x, ch]] = image[[sy, sx, ch]];
                }
            }
        }
        out
    }
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.random_range(-range..=range)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((h, w, 3), |(y, x, c)| (y * w + x) as f32 + c as f32 * 0.1)
    }

    #[test]
    fn test_identity_leaves_image_unchanged() {
        let image = gradient(9, 7);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(Augmentation::identity().apply(&image, &mut rng), image);
    }

    #[test]
    fn test_forced_flip_mirrors_columns() {
        let image = gradient(4, 5);
        let flip_only = Augmentation {
            horizontal_flip: true,
            ..Augmentation::identity()
        };
        let mut rng = StdRng::seed_from_u64(7);

        // Over a few draws both outcomes appear, and each is exact
        let mut saw_flip = false;
        for _ in 0..32 {
            let out = flip_only.apply(&image, &mut rng);
            if out != image {
                saw_flip = true;
                for y in 0..4 {
                    for x in 0..5 {
                        assert_eq!(out[[y, x, 0]], image[[y, 4 - x, 0]]);
                    }
                }
            }
        }
        assert!(saw_flip);
    }

    #[test]
    fn test_output_values_come_from_input() {
        let image = gradient(16, 16);
        let mut rng = StdRng::seed_from_u64(42);
        let out = Augmentation::default().apply(&image, &mut rng);

        assert_eq!(out.dim(), image.dim());
        for v in out.iter() {
            assert!(image.iter().any(|u| u == v));
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let image = gradient(12, 12);
        let a = Augmentation::default().apply(&image, &mut StdRng::seed_from_u64(3));
        let b = Augmentation::default().apply(&image, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }
}
