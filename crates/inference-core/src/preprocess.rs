//! Classifier input preparation
//!
//! Each ensemble member declares an [`InputSpec`]. `prepare_all` builds one
//! tensor per distinct spec so members with equal specs share it.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Pixel scaling applied after resizing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// [0,1]
    #[default]
    Unit,
    /// [-1,1]
    Symmetric,
    /// ImageNet mean/std per channel
    Imagenet,
}

impl Normalization {
    #[inline]
    fn apply(self, value: u8, rgb_channel: usize) -> f32 {
        let v = f32::from(value) / 255.0;
        match self {
            Normalization::Unit => v,
            Normalization::Symmetric => v * 2.0 - 1.0,
            Normalization::Imagenet => (v - IMAGENET_MEAN[rgb_channel]) / IMAGENET_STD[rgb_channel],
        }
    }
}

/// Expected input of a classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSpec {
    /// Square input resolution
    pub size: u32,
    pub layout: TensorLayout,
    pub channel_order: ChannelOrder,
    pub normalization: Normalization,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            size: 299,
            layout: TensorLayout::Nhwc,
            channel_order: ChannelOrder::Rgb,
            normalization: Normalization::Unit,
        }
    }
}

impl InputSpec {
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn shape(&self) -> [usize; 4] {
        let s = self.size as usize;
        match self.layout {
            TensorLayout::Nhwc => [1, s, s, 3],
            TensorLayout::Nchw => [1, 3, s, s],
        }
    }
}

/// Resize (Lanczos3), reorder channels, normalize and lay out as a batch of one
pub fn prepare(image: &RgbImage, spec: &InputSpec) -> Array4<f32> {
    let size = spec.size;
    let resized = if image.dimensions() == (size, size) {
        image.clone()
    } else {
        image::imageops::resize(image, size, size, FilterType::Lanczos3)
    };

    let mut tensor = Array4::<f32>::zeros(spec.shape());
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for rgb_channel in 0..3 {
            let value = spec.normalization.apply(pixel[rgb_channel], rgb_channel);
            let c = match spec.channel_order {
                ChannelOrder::Rgb => rgb_channel,
                ChannelOrder::Bgr => 2 - rgb_channel,
            };
            match spec.layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
            }
        }
    }
    tensor
}

/// One prepared tensor per distinct spec
pub fn prepare_all<'a, I>(image: &RgbImage, specs: I) -> HashMap<InputSpec, Array4<f32>>
where
    I: IntoIterator<Item = &'a InputSpec>,
{
    let mut tensors = HashMap::new();
    for spec in specs {
        tensors
            .entry(*spec)
            .or_insert_with(|| prepare(image, spec));
    }
    tensors
}
