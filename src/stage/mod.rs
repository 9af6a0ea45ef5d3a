//! Streaming pipeline stages.
//!
//! A feature stage consumes channel vectors in raster order and emits its own
//! output vectors in raster order as soon as they are complete. The dense head
//! is a sink and lives outside the [`Stage`] trait.
pub mod window;
pub mod conv;
pub mod pool;
pub mod dense;

use crate::error::Result;
use crate::quant::Code;
use crate::tensor::{QuantizedTensor, Shape};

pub use conv::{ConvParams, ConvStage};
pub use dense::{argmax, ClassScores, DenseParams, DenseStage};
pub use pool::MaxPoolStage;
pub use window::{Window, WindowGeometry, Windower};

/// One channel vector travelling between stages.
pub type Pixel = Vec<Code>;

pub trait Stage: Send {
    fn name(&self) -> &'static str;
    fn input_shape(&self) -> Shape;
    fn output_shape(&self) -> Shape;

    /// Drop per-image state.
    fn reset(&mut self);

    /// Accept the next input vector; every output vector it completes is passed to `emit`.
    fn push(&mut self, pixel: &[Code], emit: &mut dyn FnMut(Pixel) -> Result<()>) -> Result<()>;

    /// Stream a whole tensor through the stage.
    fn forward(&mut self, input: &QuantizedTensor) -> Result<QuantizedTensor> {
        let want = self.input_shape();
        if input.shape() != want {
            return Err(crate::error::QcnnError::shape(self.name(), want, input.shape()));
        }
        self.reset();
        let out_shape = self.output_shape();
        let mut out = Vec::with_capacity(out_shape.len());
        for px in input.pixels() {
            self.push(px, &mut |v| {
                out.extend_from_slice(&v);
                Ok(())
            })?;
        }
        QuantizedTensor::from_codes(out_shape, out)
    }
}
