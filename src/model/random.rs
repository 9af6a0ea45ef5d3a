//! Seeded random models for benchmarks, tooling and parity tests.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{QcnnError, Result};
use crate::model::{Layer, Model};
use crate::quant::mac::Acc;
use crate::quant::{Code, CodeScheme, ThresholdBank};
use crate::tensor::{Shape, WeightKernel};

/// Topology of a random Conv -> Pool -> ... -> Dense model.
#[derive(Debug, Clone)]
pub struct RandomSpec {
    pub magnitude_bits: u8,
    pub input: Shape,
    /// (filters, kernel) per conv block; every conv is followed by a 2x2 pool.
    pub convs: Vec<(usize, usize)>,
    pub ladder_steps: usize,
    pub classes: usize,
    /// Std-dev of the weight magnitude index before rounding.
    pub weight_sigma: f64,
    pub seed: u64,
}

impl Default for RandomSpec {
    /// LeNet-like digit classifier on 28x28 grayscale.
    fn default() -> Self {
        Self {
            magnitude_bits: 3,
            input: Shape::new(28, 28, 1),
            convs: vec![(6, 5), (16, 5)],
            ladder_steps: 3,
            classes: 10,
            weight_sigma: 1.2,
            seed: 0x5eed,
        }
    }
}

fn random_codes(rng: &mut SmallRng, normal: &Normal<f64>, n: usize, max: u8) -> Vec<Code> {
    (0..n)
        .map(|_| {
            let x: f64 = normal.sample(&mut *rng);
            let mag = (x.abs().round() as u8).min(max);
            Code::new(x < 0.0, mag)
        })
        .collect()
}

pub fn random_model(spec: &RandomSpec) -> Result<Model> {
    let scheme = CodeScheme::power_of_two(spec.magnitude_bits)?;
    let mut rng = SmallRng::seed_from_u64(spec.seed);
    let normal = Normal::new(0.0, spec.weight_sigma.max(1e-3))
        .map_err(|e| QcnnError::InvalidScheme(format!("weight distribution: {}", e)))?;
    let max = scheme.max_magnitude();
    let mean_level = scheme.levels().iter().take(3).map(|&l| l as f64).sum::<f64>() / 3.0;

    let mut layers = Vec::with_capacity(spec.convs.len() * 2 + 1);
    let mut shape = spec.input;
    for &(filters, kernel) in &spec.convs {
        let weights = WeightKernel::new(filters, kernel, shape.channels, random_codes(&mut rng, &normal, filters * kernel * kernel * shape.channels, max))?;
        let terms = (kernel * kernel * shape.channels) as f64;
        let step = (terms.sqrt() * mean_level * mean_level).max(1.0) as Acc;
        let ladders = (0..filters)
            .map(|_| {
                let base: Acc = rng.gen_range(-step..=step);
                (0..spec.ladder_steps as Acc).map(|i| base + i * step).collect()
            })
            .collect();
        let thresholds = ThresholdBank::new(spec.ladder_steps, ladders)?;
        let layer = Layer::conv(weights, thresholds);
        shape = layer.output_shape(shape)?;
        layers.push(layer);
        shape = Layer::MaxPool.output_shape(shape)?;
        layers.push(Layer::MaxPool);
    }
    let dense = random_codes(&mut rng, &normal, spec.classes * shape.len(), max);
    layers.push(Layer::Dense { classes: spec.classes, weights: dense });
    Model::new(scheme, spec.input, layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_builds_lenet_shapes() {
        let m = random_model(&RandomSpec::default()).unwrap();
        assert_eq!(m.features().len(), 4);
        assert_eq!(m.feature_shape(), Shape::new(4, 4, 16));
        assert_eq!(m.classes(), 10);
    }

    #[test]
    fn same_seed_same_model() {
        let a = random_model(&RandomSpec::default()).unwrap();
        let b = random_model(&RandomSpec::default()).unwrap();
        assert_eq!(a.head().weights, b.head().weights);
        let c = random_model(&RandomSpec { seed: 7, ..RandomSpec::default() }).unwrap();
        assert_ne!(a.head().weights, c.head().weights);
    }
}
