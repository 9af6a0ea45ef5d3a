//! Conv2D: windower + MAC + threshold quantizer per output channel.

use log::debug;
use std::sync::Arc;

use crate::error::{QcnnError, Result};
use crate::quant::mac::{check_accumulator, Acc, MacReducer};
use crate::quant::{Code, CodeScheme, ThresholdBank};
use crate::stage::window::{Window, WindowGeometry, Windower};
use crate::stage::{Pixel, Stage};
use crate::tensor::{Shape, WeightKernel};

/// Immutable parameters of one convolution layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvParams {
    pub geometry: WindowGeometry,
    pub weights: WeightKernel,
    pub thresholds: ThresholdBank,
}

impl ConvParams {
    /// Validate every shape against the input and the code scheme.
    pub fn new(geometry: WindowGeometry, weights: WeightKernel, thresholds: ThresholdBank, scheme: &CodeScheme) -> Result<Self> {
        geometry.validate()?;
        if weights.kernel() != geometry.kernel {
            return Err(QcnnError::shape("conv kernel edge", geometry.kernel, weights.kernel()));
        }
        if weights.channels() != geometry.input.channels {
            return Err(QcnnError::shape("conv input channels", geometry.input.channels, weights.channels()));
        }
        if weights.filters() == 0 {
            return Err(QcnnError::geometry("conv layer without filters"));
        }
        if thresholds.channels() != weights.filters() {
            return Err(QcnnError::shape("threshold ladders", weights.filters(), thresholds.channels()));
        }
        if thresholds.steps() > scheme.max_magnitude() as usize {
            return Err(QcnnError::InvalidScheme(format!(
                "{} threshold steps produce codes above max magnitude {}", thresholds.steps(), scheme.max_magnitude()
            )));
        }
        weights.data().iter().try_for_each(|&c| scheme.check(c))?;
        check_accumulator("conv", weights.filter_len(), scheme)?;
        Ok(Self { geometry, weights, thresholds })
    }

    #[inline]
    pub fn input_shape(&self) -> Shape { self.geometry.input }

    #[inline]
    pub fn output_shape(&self) -> Shape { self.geometry.output_shape(self.weights.filters()) }
}

/// Streaming convolution. All output channels of a position come from the
/// same window before the next window is taken.
pub struct ConvStage {
    params: Arc<ConvParams>,
    scheme: Arc<CodeScheme>,
    windower: Windower,
    mac: MacReducer,
}

impl ConvStage {
    pub fn new(params: Arc<ConvParams>, scheme: Arc<CodeScheme>) -> Result<Self> {
        let windower = Windower::new(params.geometry)?;
        let mac = MacReducer::new(params.weights.filter_len());
        debug!("conv stage {} -> {} (k={}, stride={}, pad={})",
            params.input_shape(), params.output_shape(), params.geometry.kernel, params.geometry.stride, params.geometry.padding);
        Ok(Self { params, scheme, windower, mac })
    }

    #[inline]
    pub fn params(&self) -> &ConvParams { &self.params }

    /// Raw accumulator of every output channel for `window`.
    pub fn accumulate(&mut self, window: &Window, out: &mut Vec<Acc>) {
        out.clear();
        for z in 0..self.params.weights.filters() {
            out.push(self.mac.mac(&self.scheme, window.values(), self.params.weights.filter(z)));
        }
    }

    fn quantize_window(&mut self, window: &Window) -> Pixel {
        let filters = self.params.weights.filters();
        let mut out = Vec::with_capacity(filters);
        for z in 0..filters {
            let acc = self.mac.mac(&self.scheme, window.values(), self.params.weights.filter(z));
            out.push(Code::positive(self.params.thresholds.ladder(z).quantize(acc)));
        }
        out
    }
}

impl Stage for ConvStage {
    fn name(&self) -> &'static str { "conv2d" }

    fn input_shape(&self) -> Shape { self.params.input_shape() }

    fn output_shape(&self) -> Shape { self.params.output_shape() }

    fn reset(&mut self) { self.windower.reset(); }

    fn push(&mut self, pixel: &[Code], emit: &mut dyn FnMut(Pixel) -> Result<()>) -> Result<()> {
        self.windower.push(pixel)?;
        while let Some(win) = self.windower.pop() {
            let out = self.quantize_window(&win);
            emit(out)?;
        }
        Ok(())
    }
}
