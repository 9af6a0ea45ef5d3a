//! Validated model description: code scheme, input shape, feature layers and dense head.
pub mod loader;
pub mod random;

use log::debug;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{QcnnError, Result};
use crate::quant::{Code, CodeScheme, ThresholdBank};
use crate::stage::{ConvParams, ConvStage, DenseParams, DenseStage, MaxPoolStage, Stage, WindowGeometry};
use crate::tensor::{ClassWeights, QuantizedTensor, Shape, WeightKernel};

/// Unvalidated layer description; input shapes are inferred while chaining.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv { weights: WeightKernel, thresholds: ThresholdBank, stride: usize, padding: usize },
    MaxPool,
    Dense { classes: usize, weights: Vec<Code> },
}

impl Layer {
    /// Stride 1, no padding.
    pub fn conv(weights: WeightKernel, thresholds: ThresholdBank) -> Self {
        Layer::Conv { weights, thresholds, stride: 1, padding: 0 }
    }

    /// Shape this layer produces from `input`; only the geometry is checked.
    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        match self {
            Layer::Conv { weights, stride, padding, .. } => {
                let g = WindowGeometry { input, kernel: weights.kernel(), stride: *stride, padding: *padding };
                g.validate()?;
                Ok(g.output_shape(weights.filters()))
            }
            Layer::MaxPool => {
                if input.height < 2 || input.width < 2 {
                    return Err(QcnnError::geometry(format!("cannot pool {}", input)));
                }
                Ok(MaxPoolStage::pooled(input))
            }
            Layer::Dense { classes, .. } => Ok(Shape::new(1, 1, *classes)),
        }
    }
}

/// A validated feature layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureLayer {
    Conv(Arc<ConvParams>),
    MaxPool { input: Shape },
}

impl FeatureLayer {
    pub fn input_shape(&self) -> Shape {
        match self {
            FeatureLayer::Conv(p) => p.input_shape(),
            FeatureLayer::MaxPool { input } => *input,
        }
    }

    pub fn output_shape(&self) -> Shape {
        match self {
            FeatureLayer::Conv(p) => p.output_shape(),
            FeatureLayer::MaxPool { input } => MaxPoolStage::pooled(*input),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeatureLayer::Conv(_) => "conv2d",
            FeatureLayer::MaxPool { .. } => "maxpool2x2",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Model {
    scheme: Arc<CodeScheme>,
    input: Shape,
    features: Vec<FeatureLayer>,
    head: Arc<DenseParams>,
}

impl Model {
    /// Chain `layers` from `input`, validating every shape, ladder and code.
    /// The sequence must end with exactly one dense layer.
    pub fn new(scheme: CodeScheme, input: Shape, layers: Vec<Layer>) -> Result<Self> {
        if input.is_empty() {
            return Err(QcnnError::geometry(format!("empty input shape {}", input)));
        }
        let mut shape = input;
        let mut features = Vec::new();
        let mut head = None;
        for (i, layer) in layers.into_iter().enumerate() {
            if head.is_some() {
                return Err(QcnnError::LayerSequence(format!("layer {} follows the dense head", i)));
            }
            match layer {
                Layer::Conv { weights, thresholds, stride, padding } => {
                    let geometry = WindowGeometry { input: shape, kernel: weights.kernel(), stride, padding };
                    let p = ConvParams::new(geometry, weights, thresholds, &scheme)?;
                    shape = p.output_shape();
                    features.push(FeatureLayer::Conv(Arc::new(p)));
                }
                Layer::MaxPool => {
                    if shape.height < 2 || shape.width < 2 {
                        return Err(QcnnError::geometry(format!("layer {}: cannot pool {}", i, shape)));
                    }
                    features.push(FeatureLayer::MaxPool { input: shape });
                    shape = MaxPoolStage::pooled(shape);
                }
                Layer::Dense { classes, weights } => {
                    let w = ClassWeights::new(classes, shape, weights)?;
                    head = Some(Arc::new(DenseParams::new(shape, w, &scheme)?));
                }
            }
        }
        let head = head.ok_or_else(|| QcnnError::LayerSequence("missing dense head".into()))?;
        debug!("model {} -> {} layers -> {} classes", input, features.len(), head.classes());
        Ok(Self { scheme: Arc::new(scheme), input, features, head })
    }

    #[inline]
    pub fn scheme(&self) -> &Arc<CodeScheme> { &self.scheme }
    #[inline]
    pub fn input_shape(&self) -> Shape { self.input }
    #[inline]
    pub fn features(&self) -> &[FeatureLayer] { &self.features }
    #[inline]
    pub fn head(&self) -> &Arc<DenseParams> { &self.head }
    #[inline]
    pub fn classes(&self) -> usize { self.head.classes() }

    /// Fail fast on an input that does not match this model.
    pub fn check_image(&self, image: &QuantizedTensor) -> Result<()> {
        if image.data().len() != self.input.len() {
            return Err(QcnnError::ImageSize { expected: self.input.len(), actual: image.data().len() });
        }
        if image.shape() != self.input {
            return Err(QcnnError::shape("image", self.input, image.shape()));
        }
        image.check(&self.scheme)
    }

    /// Shape entering the dense head.
    pub fn feature_shape(&self) -> Shape { self.head.input_shape() }

    /// Fresh stage chain sharing this model's parameters.
    pub fn build_stages(&self) -> Result<(Vec<Box<dyn Stage>>, DenseStage)> {
        let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(self.features.len());
        for f in &self.features {
            match f {
                FeatureLayer::Conv(p) => stages.push(Box::new(ConvStage::new(p.clone(), self.scheme.clone())?)),
                FeatureLayer::MaxPool { input } => stages.push(Box::new(MaxPoolStage::new(*input)?)),
            }
        }
        Ok((stages, DenseStage::new(self.head.clone(), self.scheme.clone())))
    }

    pub fn summary(&self) -> ModelSummary {
        let mut layers: Vec<LayerSummary> = self.features.iter().map(|f| {
            let (kernel, ladder_steps) = match f {
                FeatureLayer::Conv(p) => (Some(p.geometry.kernel), Some(p.thresholds.steps())),
                FeatureLayer::MaxPool { .. } => (None, None),
            };
            LayerSummary { kind: f.kind(), input: f.input_shape(), output: f.output_shape(), kernel, ladder_steps }
        }).collect();
        layers.push(LayerSummary {
            kind: "dense",
            input: self.feature_shape(),
            output: Shape::new(1, 1, self.classes()),
            kernel: None,
            ladder_steps: None,
        });
        ModelSummary {
            magnitude_bits: self.scheme.magnitude_bits(),
            levels: self.scheme.levels().to_vec(),
            input: self.input,
            classes: self.classes(),
            layers,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub kind: &'static str,
    pub input: Shape,
    pub output: Shape,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ladder_steps: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub magnitude_bits: u8,
    pub levels: Vec<i32>,
    pub input: Shape,
    pub classes: usize,
    pub layers: Vec<LayerSummary>,
}
