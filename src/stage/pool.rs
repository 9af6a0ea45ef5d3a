//! 2×2 stride-2 max pooling as two streaming passes.
//!
//! The horizontal pass holds one pixel and emits the max of each column pair;
//! the vertical pass holds one row of those results and emits the max of each
//! row pair. A trailing odd column or row is dropped.

use log::debug;

use crate::error::{QcnnError, Result};
use crate::quant::Code;
use crate::stage::{Pixel, Stage};
use crate::tensor::Shape;

/// Elementwise max of two channel vectors into `dst`.
#[inline]
pub fn max_into(dst: &mut [Code], a: &[Code], b: &[Code]) {
    for ((d, &x), &y) in dst.iter_mut().zip(a).zip(b) { *d = x.max(y); }
}

pub struct MaxPoolStage {
    input: Shape,
    held: Vec<Code>,
    // one horizontally reduced row, (width / 2) x channels
    row: Vec<Code>,
    x: usize,
    y: usize,
}

impl MaxPoolStage {
    pub fn new(input: Shape) -> Result<Self> {
        if input.height < 2 || input.width < 2 || input.channels == 0 {
            return Err(QcnnError::geometry(format!("2x2 pooling needs at least 2x2 input, got {}", input)));
        }
        debug!("maxpool stage {} -> {}", input, Self::pooled(input));
        Ok(Self {
            input,
            held: vec![Code::ZERO; input.channels],
            row: vec![Code::ZERO; (input.width / 2) * input.channels],
            x: 0,
            y: 0,
        })
    }

    /// Output extent for `input`.
    #[inline]
    pub fn pooled(input: Shape) -> Shape { Shape::new(input.height / 2, input.width / 2, input.channels) }
}

impl Stage for MaxPoolStage {
    fn name(&self) -> &'static str { "maxpool2x2" }

    fn input_shape(&self) -> Shape { self.input }

    fn output_shape(&self) -> Shape { Self::pooled(self.input) }

    fn reset(&mut self) {
        self.x = 0;
        self.y = 0;
    }

    fn push(&mut self, pixel: &[Code], emit: &mut dyn FnMut(Pixel) -> Result<()>) -> Result<()> {
        let Shape { height, width, channels } = self.input;
        if pixel.len() != channels {
            return Err(QcnnError::shape("maxpool pixel", channels, pixel.len()));
        }
        if self.y == height {
            return Err(QcnnError::ImageSize { expected: self.input.len(), actual: self.input.len() + channels });
        }
        let (x, y) = (self.x, self.y);
        self.x += 1;
        if self.x == width {
            self.x = 0;
            self.y += 1;
        }
        // Odd trailing column / row
        if x / 2 == width / 2 || y / 2 == height / 2 { return Ok(()); }

        if x % 2 == 0 {
            self.held.copy_from_slice(pixel);
            return Ok(());
        }
        let xo = x / 2;
        let slot = &mut self.row[xo * channels..(xo + 1) * channels];
        if y % 2 == 0 {
            max_into(slot, &self.held, pixel);
            return Ok(());
        }
        let mut h = vec![Code::ZERO; channels];
        max_into(&mut h, &self.held, pixel);
        let mut out = vec![Code::ZERO; channels];
        max_into(&mut out, slot, &h);
        emit(out)
    }
}
