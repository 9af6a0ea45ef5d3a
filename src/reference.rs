//! Whole-tensor evaluation with plain nested loops.
//!
//! Computes exactly what the streaming pipeline computes, without windowing,
//! reduction trees or channels. Used for parity checks and debugging.

use crate::error::{QcnnError, Result};
use crate::model::{FeatureLayer, Model};
use crate::quant::mac::Acc;
use crate::quant::{Code, CodeScheme};
use crate::stage::{ClassScores, ConvParams, DenseParams};
use crate::tensor::{QuantizedTensor, Shape};

/// Raw accumulators of a convolution, laid out H'×W'×F.
pub fn conv_accumulators(scheme: &CodeScheme, params: &ConvParams, input: &QuantizedTensor) -> Result<Vec<Acc>> {
    let g = &params.geometry;
    if input.shape() != g.input {
        return Err(QcnnError::shape("conv input", g.input, input.shape()));
    }
    let out = params.output_shape();
    let (h, w) = (g.input.height as isize, g.input.width as isize);
    let mut accs = Vec::with_capacity(out.len());
    for oy in 0..out.height {
        for ox in 0..out.width {
            for z in 0..out.channels {
                let mut acc: Acc = 0;
                for ky in 0..g.kernel {
                    let iy = (oy * g.stride + ky) as isize - g.padding as isize;
                    if iy < 0 || iy >= h { continue; }
                    for kx in 0..g.kernel {
                        let ix = (ox * g.stride + kx) as isize - g.padding as isize;
                        if ix < 0 || ix >= w { continue; }
                        for c in 0..g.input.channels {
                            let x = input.get(iy as usize, ix as usize, c);
                            acc += scheme.multiply(x, params.weights.get(z, ky, kx, c));
                        }
                    }
                }
                accs.push(acc);
            }
        }
    }
    Ok(accs)
}

pub fn conv_forward(scheme: &CodeScheme, params: &ConvParams, input: &QuantizedTensor) -> Result<QuantizedTensor> {
    let accs = conv_accumulators(scheme, params, input)?;
    let f = params.weights.filters();
    let codes = accs.iter().enumerate().map(|(i, &a)| Code::positive(params.thresholds.ladder(i % f).quantize(a))).collect();
    QuantizedTensor::from_codes(params.output_shape(), codes)
}

/// 2×2 stride-2 max over the four inputs of each output position.
pub fn pool_forward(input: &QuantizedTensor) -> QuantizedTensor {
    let s = input.shape();
    let out_shape = Shape::new(s.height / 2, s.width / 2, s.channels);
    let mut out = QuantizedTensor::zeros(out_shape);
    for y in 0..out_shape.height {
        for x in 0..out_shape.width {
            for c in 0..s.channels {
                let m = input.get(2 * y, 2 * x, c)
                    .max(input.get(2 * y, 2 * x + 1, c))
                    .max(input.get(2 * y + 1, 2 * x, c))
                    .max(input.get(2 * y + 1, 2 * x + 1, c));
                out.set(y, x, c, m);
            }
        }
    }
    out
}

pub fn dense_scores(scheme: &CodeScheme, params: &DenseParams, input: &QuantizedTensor) -> Result<ClassScores> {
    if input.shape() != params.input_shape() {
        return Err(QcnnError::shape("dense input", params.input_shape(), input.shape()));
    }
    let scores = (0..params.classes())
        .map(|c| {
            params.weights.class(c).iter().zip(input.data()).map(|(&w, &x)| scheme.multiply(x, w)).sum::<Acc>()
        })
        .collect();
    Ok(ClassScores(scores))
}

/// Tensor entering the dense head.
pub fn features(model: &Model, image: &QuantizedTensor) -> Result<QuantizedTensor> {
    model.check_image(image)?;
    let scheme = model.scheme();
    let mut t = image.clone();
    for layer in model.features() {
        t = match layer {
            FeatureLayer::Conv(p) => conv_forward(scheme, p, &t)?,
            FeatureLayer::MaxPool { .. } => pool_forward(&t),
        };
    }
    Ok(t)
}

pub fn scores(model: &Model, image: &QuantizedTensor) -> Result<ClassScores> {
    let t = features(model, image)?;
    dense_scores(model.scheme(), model.head(), &t)
}

pub fn classify(model: &Model, image: &QuantizedTensor) -> Result<usize> {
    Ok(scores(model, image)?.argmax())
}
