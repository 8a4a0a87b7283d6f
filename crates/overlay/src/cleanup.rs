//! Heatmap cleanup: morphological opening, gaussian blur, then local
//! contrast enhancement (tiled, clip-limited histogram equalization)

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::open;
use ndarray::Array2;

/// 5×5 square structuring element
const OPEN_RADIUS: u8 = 2;
const BLUR_SIGMA: f32 = 1.5;
pub const CLAHE_CLIP_LIMIT: f32 = 3.0;
pub const CLAHE_TILES: usize = 8;

/// Open, blur and equalize a [0,1] intensity map
pub fn clean_intensity(intensity: &Array2<f32>) -> Array2<f32> {
    let (h, w) = intensity.dim();
    if h == 0 || w == 0 {
        return intensity.clone();
    }

    let gray = to_gray(intensity);
    let opened = open(&gray, Norm::LInf, OPEN_RADIUS);

    let as_f32: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(w as u32, h as u32, |x, y| Luma([f32::from(opened.get_pixel(x, y)[0])]));
    let blurred = gaussian_blur_f32(&as_f32, BLUR_SIGMA);
    let blurred = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        Luma([blurred.get_pixel(x, y)[0].round().clamp(0.0, 255.0) as u8])
    });

    let equalized = clahe(&blurred, CLAHE_CLIP_LIMIT, CLAHE_TILES);
    Array2::from_shape_fn((h, w), |(y, x)| f32::from(equalized.get_pixel(x as u32, y as u32)[0]) / 255.0)
}

fn to_gray(intensity: &Array2<f32>) -> GrayImage {
    let (h, w) = intensity.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let v = intensity[[y as usize, x as usize]];
        Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8])
    })
}

/// Contrast-limited adaptive histogram equalization
///
/// Each tile of a `tiles × tiles` grid gets a clipped, equalized lookup table;
/// pixels interpolate bilinearly between the four nearest tile centers.
pub fn clahe(image: &GrayImage, clip_limit: f32, tiles: usize) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }
    let tiles_x = tiles.clamp(1, w);
    let tiles_y = tiles.clamp(1, h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            luts[ty * tiles_x + tx] = tile_lut(image, x0, y0, x1, y1, clip_limit);
        }
    }

    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let v = image.get_pixel(x, y)[0] as usize;

        // position relative to tile centers
        let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f32) as usize;
        let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f32) as usize;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let ax = (fx - tx0 as f32).clamp(0.0, 1.0);
        let ay = (fy - ty0 as f32).clamp(0.0, 1.0);

        let lut = |tx: usize, ty: usize| f32::from(luts[ty * tiles_x + tx][v]);
        let top = lut(tx0, ty0) * (1.0 - ax) + lut(tx1, ty0) * ax;
        let bottom = lut(tx0, ty1) * (1.0 - ax) + lut(tx1, ty1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(image: &GrayImage, x0: usize, y0: usize, x1: usize, y1: usize, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[image.get_pixel(x as u32, y as u32)[0] as usize] += 1;
        }
    }
    let pixels = ((x1 - x0) * (y1 - y0)) as u32;
    let mut lut = [0u8; 256];
    if pixels == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    // clip and redistribute the excess uniformly
    let limit = ((clip_limit * pixels as f32) / 256.0).max(1.0) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = ((cdf as f32 / pixels as f32) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
