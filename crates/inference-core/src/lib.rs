//! Authenticity Inference Core - model loading and input preparation
//!
//! Decodes uploads, prepares classifier inputs and hosts the [`Classifier`]
//! seam with its ONNX Runtime implementation and the member registry.

pub mod context;
pub mod error;
pub mod image_io;
pub mod model;
pub mod onnx_model;
pub mod onnx_utils;
pub mod preprocess;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use context::{CancellationToken, Context, ExecutionMode};
pub use error::ModelError;
pub use image_io::{decode_image, load_image, save_image, ImageError};
pub use model::{Classifier, Device, LayerInfo, LayerKind, LayerProbe, ModelConfig, ModelHandle};
pub use onnx_model::OnnxClassifier;
pub use preprocess::{prepare, prepare_all, ChannelOrder, InputSpec, Normalization, TensorLayout};
pub use registry::{ModelRegistry, ModelStatus};
