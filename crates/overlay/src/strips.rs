//! Legend strip and side-by-side comparison images

use crate::compositor::TIERS;
use image::{imageops, Rgb, RgbImage};

const LEGEND_BACKGROUND: Rgb<u8> = Rgb([32, 32, 32]);
const SEPARATOR: Rgb<u8> = Rgb([255, 255, 255]);
const SEPARATOR_WIDTH: u32 = 10;

/// Append a strip of tier swatches (low → high, left to right) below `image`
pub fn with_legend(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let strip_h = (h / 12).max(16);
    let mut out = RgbImage::from_pixel(w, h + strip_h, LEGEND_BACKGROUND);
    imageops::replace(&mut out, image, 0, 0);

    let margin = (strip_h / 4).max(2);
    let slots = TIERS.len() as u32;
    let slot_w = w / slots;
    // tiers are ordered high → low, the legend reads low → high
    for (i, tier) in TIERS.iter().rev().enumerate() {
        let x0 = i as u32 * slot_w + margin;
        let x1 = ((i as u32 + 1) * slot_w).saturating_sub(margin);
        for x in x0..x1.min(w) {
            for y in (h + margin)..(h + strip_h - margin) {
                out.put_pixel(x, y, Rgb(tier.color));
            }
        }
    }
    out
}

/// Place overlays next to each other, separated by a white bar
pub fn comparison_strip(images: &[&RgbImage]) -> RgbImage {
    let height = images.iter().map(|i| i.height()).max().unwrap_or(0);
    let width = images.iter().map(|i| i.width()).sum::<u32>()
        + SEPARATOR_WIDTH * images.len().saturating_sub(1) as u32;

    let mut out = RgbImage::from_pixel(width.max(1), height.max(1), SEPARATOR);
    let mut x = 0i64;
    for image in images {
        imageops::replace(&mut out, *image, x, 0);
        x += i64::from(image.width() + SEPARATOR_WIDTH);
    }
    out
}
