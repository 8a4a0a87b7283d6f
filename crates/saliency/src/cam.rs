//! Class activation map algorithms over an (H,W,C) activation `A` and its
//! gradient `G`

use ndarray::{Array1, Array2, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaliencyMethod {
    GradCam,
    GradCamPlusPlus,
    LayerCam,
    GuidedGradCam,
}

impl SaliencyMethod {
    pub fn name(self) -> &'static str {
        match self {
            SaliencyMethod::GradCam => "gradcam",
            SaliencyMethod::GradCamPlusPlus => "gradcam++",
            SaliencyMethod::LayerCam => "layercam",
            SaliencyMethod::GuidedGradCam => "guided",
        }
    }

    /// File-name safe variant of [`SaliencyMethod::name`]
    pub fn slug(self) -> &'static str {
        match self {
            SaliencyMethod::GradCamPlusPlus => "gradcam_pp",
            other => other.name(),
        }
    }
}

impl fmt::Display for SaliencyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw (unnormalized) map for `method`; without a gradient every method
/// reduces to the unweighted channel mean
pub fn compute(
    method: SaliencyMethod,
    activation: ArrayView3<f32>,
    gradient: Option<ArrayView3<f32>>,
) -> Array2<f32> {
    let Some(gradient) = gradient else {
        return channel_mean(activation);
    };
    match method {
        SaliencyMethod::GradCam => grad_cam(activation, gradient),
        SaliencyMethod::GradCamPlusPlus => grad_cam_plus_plus(activation, gradient),
        SaliencyMethod::LayerCam => layer_cam(activation, gradient),
        SaliencyMethod::GuidedGradCam => guided_grad_cam(activation, gradient),
    }
}

pub fn channel_mean(activation: ArrayView3<f32>) -> Array2<f32> {
    let (h, w, _) = activation.dim();
    activation
        .mean_axis(Axis(2))
        .unwrap_or_else(|| Array2::zeros((h, w)))
}

/// `Σ_c w_c A[.., c]`
fn weighted_sum(activation: ArrayView3<f32>, weights: &Array1<f32>) -> Array2<f32> {
    let (h, w, _) = activation.dim();
    let mut map = Array2::<f32>::zeros((h, w));
    for (c, weight) in weights.iter().enumerate() {
        map.scaled_add(*weight, &activation.index_axis(Axis(2), c));
    }
    map
}

fn spatial_mean(values: ArrayView3<f32>) -> Array1<f32> {
    let channels = values.dim().2;
    values
        .mean_axis(Axis(0))
        .and_then(|m| m.mean_axis(Axis(0)))
        .unwrap_or_else(|| Array1::zeros(channels))
}

fn grad_cam(activation: ArrayView3<f32>, gradient: ArrayView3<f32>) -> Array2<f32> {
    weighted_sum(activation, &spatial_mean(gradient))
}

fn grad_cam_plus_plus(activation: ArrayView3<f32>, gradient: ArrayView3<f32>) -> Array2<f32> {
    let channels = activation.dim().2;
    let mut weights = Array1::<f32>::zeros(channels);

    for c in 0..channels {
        let a = activation.index_axis(Axis(2), c);
        let g = gradient.index_axis(Axis(2), c);
        let sum_a_g3: f32 = Zip::from(&a).and(&g).fold(0.0, |acc, &a, &g| acc + a * g.powi(3));

        weights[c] = Zip::from(&g).fold(0.0, |acc, &g| {
            let g2 = g * g;
            let denom = 2.0 * g2 + sum_a_g3;
            let alpha = if denom != 0.0 { g2 / denom } else { 0.0 };
            acc + alpha * g.max(0.0)
        });
    }

    weighted_sum(activation, &weights)
}

fn layer_cam(activation: ArrayView3<f32>, gradient: ArrayView3<f32>) -> Array2<f32> {
    let mut gated = activation.to_owned();
    Zip::from(&mut gated).and(&gradient).for_each(|a, &g| {
        *a = if *a > 0.0 { g.max(0.0) * *a } else { 0.0 };
    });
    gated.sum_axis(Axis(2))
}

fn guided_grad_cam(activation: ArrayView3<f32>, gradient: ArrayView3<f32>) -> Array2<f32> {
    let mut guided = gradient.to_owned();
    Zip::from(&mut guided).and(&activation).for_each(|g, &a| {
        if *g <= 0.0 || a <= 0.0 {
            *g = 0.0;
        }
    });
    weighted_sum(activation, &spatial_mean(guided.view()))
}
