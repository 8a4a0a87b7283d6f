//! Target layer discovery
//!
//! Strategies run in [`LayerStrategy::ORDER`]; the first one returning a layer
//! wins.

use crate::SaliencyError;
use authenticity_inference_core::{LayerInfo, LayerKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStrategy {
    LastConv2d,
    LastNamedConv,
    LastRank4,
    SecondToLastWithShape,
    LastSpatial,
    SecondToLast,
}

impl LayerStrategy {
    pub const ORDER: [LayerStrategy; 6] = [
        LayerStrategy::LastConv2d,
        LayerStrategy::LastNamedConv,
        LayerStrategy::LastRank4,
        LayerStrategy::SecondToLastWithShape,
        LayerStrategy::LastSpatial,
        LayerStrategy::SecondToLast,
    ];

    pub fn select<'a>(self, layers: &'a [LayerInfo]) -> Option<&'a LayerInfo> {
        match self {
            // depthwise convolutions count as 2D convolutions
            LayerStrategy::LastConv2d => layers
                .iter()
                .rev()
                .find(|l| matches!(l.kind, LayerKind::Conv2d | LayerKind::DepthwiseConv2d)),
            LayerStrategy::LastNamedConv => layers
                .iter()
                .rev()
                .find(|l| l.name.to_ascii_lowercase().contains("conv")),
            LayerStrategy::LastRank4 => layers.iter().rev().find(|l| l.output_rank == Some(4)),
            LayerStrategy::SecondToLastWithShape => second_to_last(layers)
                .filter(|l| l.output_shape.is_some()),
            LayerStrategy::LastSpatial => layers.iter().rev().find(|l| !l.kind.is_head()),
            LayerStrategy::SecondToLast => second_to_last(layers),
        }
    }
}

fn second_to_last(layers: &[LayerInfo]) -> Option<&LayerInfo> {
    layers.len().checked_sub(2).map(|i| &layers[i])
}

/// Pick the layer to explain
pub fn select_layer(layers: &[LayerInfo]) -> Result<(&LayerInfo, LayerStrategy), SaliencyError> {
    LayerStrategy::ORDER
        .iter()
        .find_map(|strategy| strategy.select(layers).map(|l| (l, *strategy)))
        .ok_or(SaliencyError::NoSuitableLayer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str, kind: LayerKind) -> LayerInfo {
        LayerInfo::new(name, kind)
    }

    #[test]
    fn test_last_conv_wins() {
        let layers = vec![
            layer("block1_conv1", LayerKind::Conv2d),
            layer("block14_sepconv2", LayerKind::Conv2d),
            layer("block14_sepconv2_act", LayerKind::Activation),
            layer("avg_pool", LayerKind::GlobalPooling),
            layer("predictions", LayerKind::Dense),
        ];
        let (chosen, strategy) = select_layer(&layers).unwrap();
        assert_eq!(chosen.name, "block14_sepconv2");
        assert_eq!(strategy, LayerStrategy::LastConv2d);
    }

    #[test]
    fn test_depthwise_conv_counts_as_conv2d() {
        let layers = vec![
            layer("stem_conv", LayerKind::Conv2d),
            layer("block7a_dwconv", LayerKind::DepthwiseConv2d),
            layer("block7a_activation", LayerKind::Activation),
            layer("top_pool", LayerKind::GlobalPooling),
            layer("predictions", LayerKind::Dense),
        ];
        let (chosen, strategy) = select_layer(&layers).unwrap();
        assert_eq!(chosen.name, "block7a_dwconv");
        assert_eq!(strategy, LayerStrategy::LastConv2d);
    }

    #[test]
    fn test_name_match_case_insensitive() {
        let layers = vec![
            layer("Mixed_CONV_7", LayerKind::Other),
            layer("head", LayerKind::Dense),
        ];
        let (chosen, strategy) = select_layer(&layers).unwrap();
        assert_eq!(chosen.name, "Mixed_CONV_7");
        assert_eq!(strategy, LayerStrategy::LastNamedConv);
    }

    #[test]
    fn test_rank4_then_shape() {
        let layers = vec![
            layer("features", LayerKind::Other).with_shape(vec![1, 10, 10, 64]),
            layer("pool", LayerKind::GlobalPooling).with_shape(vec![1, 64]),
            layer("head", LayerKind::Dense),
        ];
        let (chosen, strategy) = select_layer(&layers).unwrap();
        assert_eq!(chosen.name, "features");
        assert_eq!(strategy, LayerStrategy::LastRank4);

        let layers = vec![
            layer("a", LayerKind::Other),
            layer("b", LayerKind::Other).with_shape(vec![1, 128]),
            layer("c", LayerKind::Dense),
        ];
        let (chosen, strategy) = select_layer(&layers).unwrap();
        assert_eq!(chosen.name, "b");
        assert_eq!(strategy, LayerStrategy::SecondToLastWithShape);
    }

    #[test]
    fn test_skips_head_layers_scanning_backward() {
        let layers = vec![
            layer("mixed", LayerKind::Normalization),
            layer("a", LayerKind::Dense),
            layer("flatten", LayerKind::Flatten),
            layer("drop", LayerKind::Dropout),
        ];
        let (chosen, strategy) = select_layer(&layers).unwrap();
        assert_eq!(chosen.name, "mixed");
        assert_eq!(strategy, LayerStrategy::LastSpatial);
    }

    #[test]
    fn test_second_to_last_unconditionally() {
        let layers = vec![layer("x", LayerKind::Dense), layer("y", LayerKind::Dropout)];
        let (chosen, strategy) = select_layer(&layers).unwrap();
        assert_eq!(chosen.name, "x");
        assert_eq!(strategy, LayerStrategy::SecondToLast);
    }

    #[test]
    fn test_no_suitable_layer() {
        assert!(matches!(select_layer(&[]), Err(SaliencyError::NoSuitableLayer)));
        let single = vec![layer("only", LayerKind::Dense)];
        assert!(matches!(select_layer(&single), Err(SaliencyError::NoSuitableLayer)));
    }
}
