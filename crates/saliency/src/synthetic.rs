//! Deterministic face-region map used when no real map can be computed

use image::{ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use ndarray::Array2;

const EYE_AMPLITUDE: f32 = 0.7;
const MOUTH_AMPLITUDE: f32 = 0.6;
const SMOOTHING_SIGMA: f32 = 2.0;

/// Gaussian blobs at the eyes (⅓ height, ⅓ and ⅔ width) and the mouth
/// (⅔ height, center), smoothed and normalized to [0,1]
pub fn synthetic_map(height: usize, width: usize) -> Array2<f32> {
    let (height, width) = (height.max(1), width.max(1));
    let (h, w) = (height as f32, width as f32);

    // (center y, center x, sigma y, sigma x, amplitude)
    let blobs = [
        (h / 3.0, w / 3.0, h / 15.0, w / 10.0, EYE_AMPLITUDE),
        (h / 3.0, 2.0 * w / 3.0, h / 15.0, w / 10.0, EYE_AMPLITUDE),
        (2.0 * h / 3.0, w / 2.0, h / 20.0, w / 12.0, MOUTH_AMPLITUDE),
    ];

    let raw: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            let (px, py) = (x as f32, y as f32);
            let v = blobs
                .iter()
                .map(|&(cy, cx, sy, sx, amp)| {
                    let dy = (py - cy) / sy.max(1.0);
                    let dx = (px - cx) / sx.max(1.0);
                    amp * (-0.5 * (dx * dx + dy * dy)).exp()
                })
                .fold(0.0_f32, f32::max);
            Luma([v])
        });

    let smoothed = gaussian_blur_f32(&raw, SMOOTHING_SIGMA);
    let max = smoothed.pixels().map(|p| p[0]).fold(0.0_f32, f32::max);
    Array2::from_shape_fn((height, width), |(y, x)| {
        let v = smoothed.get_pixel(x as u32, y as u32)[0];
        if max > 0.0 {
            (v / max).clamp(0.0, 1.0)
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    #[test]
    fn test_range_and_size() {
        let map = synthetic_map(120, 90);
        assert_eq!(map.dim(), (120, 90));
        assert!(map.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!((map.iter().copied().fold(0.0, f32::max) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_face_regions_outweigh_corners() {
        let map = synthetic_map(150, 150);
        let eye = map.slice(s![45..55, 45..55]).mean().unwrap();
        let mouth = map.slice(s![95..105, 70..80]).mean().unwrap();
        let corner = map.slice(s![0..10, 0..10]).mean().unwrap();
        assert!(eye > corner);
        assert!(mouth > corner);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(synthetic_map(64, 64), synthetic_map(64, 64));
    }
}
