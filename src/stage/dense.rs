//! Dense classification head and arg-max.

use log::debug;
use std::sync::Arc;

use crate::error::{QcnnError, Result};
use crate::quant::mac::{check_accumulator, Acc, MacReducer};
use crate::quant::{Code, CodeScheme};
use crate::tensor::{ClassWeights, Shape};

/// Immutable dense-layer parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseParams {
    pub weights: ClassWeights,
}

impl DenseParams {
    pub fn new(input: Shape, weights: ClassWeights, scheme: &CodeScheme) -> Result<Self> {
        if weights.inputs() != input {
            return Err(QcnnError::shape("dense input", input, weights.inputs()));
        }
        if weights.classes() == 0 {
            return Err(QcnnError::geometry("dense layer without classes"));
        }
        weights.data().iter().try_for_each(|&c| scheme.check(c))?;
        check_accumulator("dense", input.len(), scheme)?;
        Ok(Self { weights })
    }

    #[inline]
    pub fn input_shape(&self) -> Shape { self.weights.inputs() }

    #[inline]
    pub fn classes(&self) -> usize { self.weights.classes() }
}

/// Index of the largest score; the earliest index wins ties.
pub fn argmax(scores: &[Acc]) -> Option<usize> {
    let mut best: Option<(usize, Acc)> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

/// Final per-class sums for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassScores(pub Vec<Acc>);

impl ClassScores {
    #[inline]
    pub fn scores(&self) -> &[Acc] { &self.0 }

    /// Predicted class. Scores are never empty for a validated head.
    #[inline]
    pub fn argmax(&self) -> usize { argmax(&self.0).unwrap_or(0) }
}

/// Sink stage: one running accumulator per class, fed one channel vector at a time.
pub struct DenseStage {
    params: Arc<DenseParams>,
    scheme: Arc<CodeScheme>,
    scores: Vec<Acc>,
    seen: Vec<bool>,
    next: usize,
    count: usize,
    mac: MacReducer,
}

impl DenseStage {
    pub fn new(params: Arc<DenseParams>, scheme: Arc<CodeScheme>) -> Self {
        let input = params.input_shape();
        debug!("dense stage {} -> {} classes", input, params.classes());
        Self {
            scores: vec![0; params.classes()],
            seen: vec![false; input.pixels()],
            next: 0,
            count: 0,
            mac: MacReducer::new(input.channels),
            params,
            scheme,
        }
    }

    pub fn reset(&mut self) {
        self.scores.fill(0);
        self.seen.fill(false);
        self.next = 0;
        self.count = 0;
    }

    /// Accept the channel vector at the next raster position.
    pub fn accept(&mut self, pixel: &[Code]) -> Result<()> {
        let pos = self.next;
        self.accept_at(pos, pixel)?;
        self.next += 1;
        Ok(())
    }

    /// Accept the channel vector for flat spatial position `pos`, in any order.
    pub fn accept_at(&mut self, pos: usize, pixel: &[Code]) -> Result<()> {
        let input = self.params.input_shape();
        if pixel.len() != input.channels {
            return Err(QcnnError::shape("dense pixel", input.channels, pixel.len()));
        }
        if pos >= input.pixels() || self.seen[pos] {
            return Err(QcnnError::ImageSize { expected: input.len(), actual: (self.count + 1) * input.channels });
        }
        for c in 0..self.scores.len() {
            self.scores[c] += self.mac.mac(&self.scheme, pixel, self.params.weights.chunk(c, pos));
        }
        self.seen[pos] = true;
        self.count += 1;
        Ok(())
    }

    /// Scores once every position has been accepted; resets for the next image.
    pub fn finish(&mut self) -> Result<ClassScores> {
        let input = self.params.input_shape();
        if self.count != input.pixels() {
            return Err(QcnnError::ImageSize { expected: input.len(), actual: self.count * input.channels });
        }
        let out = ClassScores(self.scores.clone());
        self.reset();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_earliest_wins() {
        assert_eq!(argmax(&[10, 7]), Some(0));
        assert_eq!(argmax(&[7, 7]), Some(0));
        assert_eq!(argmax(&[-3, 2, 2, -1]), Some(1));
        assert_eq!(argmax(&[i32::MIN, i32::MIN]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn finish_requires_every_position() {
        let s = Arc::new(CodeScheme::power_of_two(3).unwrap());
        let input = Shape::new(1, 2, 1);
        let w = ClassWeights::new(2, input, vec![Code::positive(1); 4]).unwrap();
        let p = Arc::new(DenseParams::new(input, w, &s).unwrap());
        let mut d = DenseStage::new(p, s);
        d.accept(&[Code::positive(2)]).unwrap();
        assert!(d.finish().is_err());
        d.accept(&[Code::positive(2)]).unwrap();
        assert_eq!(d.finish().unwrap().scores(), &[4, 4]);
    }

    #[test]
    fn duplicate_position_rejected() {
        let s = Arc::new(CodeScheme::power_of_two(3).unwrap());
        let input = Shape::new(1, 2, 1);
        let w = ClassWeights::new(1, input, vec![Code::positive(1); 2]).unwrap();
        let mut d = DenseStage::new(Arc::new(DenseParams::new(input, w, &s).unwrap()), s);
        d.accept_at(1, &[Code::positive(1)]).unwrap();
        assert!(d.accept_at(1, &[Code::positive(1)]).is_err());
    }
}
