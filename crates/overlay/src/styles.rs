//! Continuous-colormap renderings of a normalized intensity map

use image::{Rgb, RgbImage};
use imageproc::contours::find_contours;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const STYLE_THRESHOLD: f32 = 0.5;
const CONTOUR_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayStyle {
    /// 0.6 image + 0.4 colormap
    Standard,
    /// 0.4 image + 0.6 colormap
    HighContrast,
    /// Colormap only where intensity > 0.5
    Masked,
    /// Yellow outline of regions > 0.5
    Contour,
}

impl OverlayStyle {
    pub const ALL: [OverlayStyle; 4] = [
        OverlayStyle::Standard,
        OverlayStyle::HighContrast,
        OverlayStyle::Masked,
        OverlayStyle::Contour,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OverlayStyle::Standard => "standard",
            OverlayStyle::HighContrast => "high_contrast",
            OverlayStyle::Masked => "masked",
            OverlayStyle::Contour => "contour",
        }
    }
}

impl fmt::Display for OverlayStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OverlayStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OverlayStyle::ALL
            .into_iter()
            .find(|style| style.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown overlay style '{s}'"))
    }
}

/// Blue → cyan → yellow → red ramp for v in [0,1]
pub fn colormap(v: f32) -> Rgb<u8> {
    let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let channel = |center: f32| ((1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

fn blend(base: Rgb<u8>, over: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let mix = |b: u8, o: u8| {
        (f32::from(b) * (1.0 - alpha) + f32::from(o) * alpha)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([mix(base[0], over[0]), mix(base[1], over[1]), mix(base[2], over[2])])
}

/// Render `style` over `image`; `intensity` must match the image's H×W
pub fn render_style(image: &RgbImage, intensity: &Array2<f32>, style: OverlayStyle) -> RgbImage {
    match style {
        OverlayStyle::Standard => blend_colormap(image, intensity, 0.4),
        OverlayStyle::HighContrast => blend_colormap(image, intensity, 0.6),
        OverlayStyle::Masked => {
            let mut out = image.clone();
            for (x, y, pixel) in out.enumerate_pixels_mut() {
                let v = intensity[[y as usize, x as usize]];
                if v > STYLE_THRESHOLD {
                    *pixel = colormap(v);
                }
            }
            out
        }
        OverlayStyle::Contour => draw_contours(image, intensity),
    }
}

fn blend_colormap(image: &RgbImage, intensity: &Array2<f32>, alpha: f32) -> RgbImage {
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let v = intensity[[y as usize, x as usize]];
        *pixel = blend(*pixel, colormap(v), alpha);
    }
    out
}

fn draw_contours(image: &RgbImage, intensity: &Array2<f32>) -> RgbImage {
    let mask = image::GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = intensity[[y as usize, x as usize]];
        image::Luma([if v > STYLE_THRESHOLD { 255 } else { 0 }])
    });

    let mut out = image.clone();
    for contour in find_contours::<u32>(&mask) {
        for point in contour.points {
            if point.x < out.width() && point.y < out.height() {
                out.put_pixel(point.x, point.y, CONTOUR_COLOR);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colormap_endpoints() {
        assert_eq!(colormap(0.0), Rgb([0, 0, 128]));
        assert_eq!(colormap(1.0), Rgb([128, 0, 0]));
        let mid = colormap(0.5);
        assert_eq!(mid[1], 255);
    }

    #[test]
    fn test_styles_keep_dimensions() {
        let img = RgbImage::from_pixel(40, 30, Rgb([100, 100, 100]));
        let intensity = Array2::from_shape_fn((30, 40), |(_, x)| x as f32 / 39.0);
        for style in OverlayStyle::ALL {
            let out = render_style(&img, &intensity, style);
            assert_eq!(out.dimensions(), (40, 30), "{style}");
        }
    }

    #[test]
    fn test_masked_leaves_low_regions() {
        let img = RgbImage::from_pixel(10, 10, Rgb([1, 2, 3]));
        let intensity = Array2::from_shape_fn((10, 10), |(_, x)| if x < 5 { 0.1 } else { 0.9 });
        let out = render_style(&img, &intensity, OverlayStyle::Masked);
        assert_eq!(out.get_pixel(0, 0), &Rgb([1, 2, 3]));
        assert_ne!(out.get_pixel(9, 9), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_contour_outlines_region() {
        let img = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        let intensity =
            Array2::from_shape_fn((20, 20), |(y, x)| if (5..15).contains(&x) && (5..15).contains(&y) { 1.0 } else { 0.0 });
        let out = render_style(&img, &intensity, OverlayStyle::Contour);
        assert_eq!(out.get_pixel(5, 5), &CONTOUR_COLOR);
        assert_eq!(out.get_pixel(10, 10), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_style_parsing() {
        assert_eq!("high_contrast".parse::<OverlayStyle>().unwrap(), OverlayStyle::HighContrast);
        assert!("neon".parse::<OverlayStyle>().is_err());
    }
}
