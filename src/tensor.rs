//! Quantized tensors and weight containers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QcnnError, Result};
use crate::quant::{Code, CodeScheme};

/// Spatial extent and channel depth of an activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Shape {
    pub const fn new(height: usize, width: usize, channels: usize) -> Self { Self { height, width, channels } }

    #[inline]
    pub fn len(&self) -> usize { self.height * self.width * self.channels }

    #[inline]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    #[inline]
    pub fn pixels(&self) -> usize { self.height * self.width }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// H×W×C grid of codes, channel fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedTensor {
    shape: Shape,
    data: Vec<Code>,
}

impl QuantizedTensor {
    pub fn zeros(shape: Shape) -> Self { Self { shape, data: vec![Code::ZERO; shape.len()] } }

    pub fn from_codes(shape: Shape, data: Vec<Code>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(QcnnError::ImageSize { expected: shape.len(), actual: data.len() });
        }
        Ok(Self { shape, data })
    }

    /// Non-negative codes from raw magnitudes; handy for images.
    pub fn from_magnitudes(shape: Shape, mags: &[u8]) -> Result<Self> {
        Self::from_codes(shape, mags.iter().map(|&m| Code::positive(m)).collect())
    }

    #[inline]
    pub fn shape(&self) -> Shape { self.shape }

    #[inline]
    pub fn data(&self) -> &[Code] { &self.data }

    pub fn into_data(self) -> Vec<Code> { self.data }

    #[inline]
    fn index(&self, y: usize, x: usize, c: usize) -> usize { (y * self.shape.width + x) * self.shape.channels + c }

    #[inline]
    pub fn get(&self, y: usize, x: usize, c: usize) -> Code { self.data[self.index(y, x, c)] }

    #[inline]
    pub fn set(&mut self, y: usize, x: usize, c: usize, v: Code) {
        let i = self.index(y, x, c);
        self.data[i] = v;
    }

    /// Channel vector at (y, x).
    #[inline]
    pub fn pixel(&self, y: usize, x: usize) -> &[Code] {
        let i = self.index(y, x, 0);
        &self.data[i..i + self.shape.channels]
    }

    /// Channel vectors in raster order.
    pub fn pixels(&self) -> std::slice::Chunks<'_, Code> { self.data.chunks(self.shape.channels.max(1)) }

    pub fn check(&self, scheme: &CodeScheme) -> Result<()> {
        self.data.iter().try_for_each(|&c| scheme.check(c))
    }
}

/// F×K×K×C convolution weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightKernel {
    filters: usize,
    kernel: usize,
    channels: usize,
    data: Vec<Code>,
}

impl WeightKernel {
    pub fn new(filters: usize, kernel: usize, channels: usize, data: Vec<Code>) -> Result<Self> {
        let expected = filters * kernel * kernel * channels;
        if data.len() != expected {
            return Err(QcnnError::shape("conv weights", format!("{}x{}x{}x{}", filters, kernel, kernel, channels), format!("{} codes", data.len())));
        }
        Ok(Self { filters, kernel, channels, data })
    }

    /// Every weight set to `w`.
    pub fn constant(filters: usize, kernel: usize, channels: usize, w: Code) -> Self {
        Self { filters, kernel, channels, data: vec![w; filters * kernel * kernel * channels] }
    }

    #[inline]
    pub fn filters(&self) -> usize { self.filters }
    #[inline]
    pub fn kernel(&self) -> usize { self.kernel }
    #[inline]
    pub fn channels(&self) -> usize { self.channels }
    #[inline]
    pub fn data(&self) -> &[Code] { &self.data }

    #[inline]
    pub fn filter_len(&self) -> usize { self.kernel * self.kernel * self.channels }

    /// K×K×C slice for output channel `z`, laid out like a window.
    #[inline]
    pub fn filter(&self, z: usize) -> &[Code] {
        let n = self.filter_len();
        &self.data[z * n..(z + 1) * n]
    }

    #[inline]
    pub fn get(&self, z: usize, ky: usize, kx: usize, c: usize) -> Code {
        self.data[((z * self.kernel + ky) * self.kernel + kx) * self.channels + c]
    }
}

/// Class-major dense weights: one flattened H×W×C vector per class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassWeights {
    classes: usize,
    inputs: Shape,
    data: Vec<Code>,
}

impl ClassWeights {
    pub fn new(classes: usize, inputs: Shape, data: Vec<Code>) -> Result<Self> {
        if data.len() != classes * inputs.len() {
            return Err(QcnnError::shape("dense weights", format!("{}x{}", classes, inputs), format!("{} codes", data.len())));
        }
        Ok(Self { classes, inputs, data })
    }

    #[inline]
    pub fn classes(&self) -> usize { self.classes }
    #[inline]
    pub fn inputs(&self) -> Shape { self.inputs }
    #[inline]
    pub fn data(&self) -> &[Code] { &self.data }

    #[inline]
    pub fn class(&self, c: usize) -> &[Code] {
        let n = self.inputs.len();
        &self.data[c * n..(c + 1) * n]
    }

    /// Weights of class `c` that meet the channel vector at flat position `pos`.
    #[inline]
    pub fn chunk(&self, c: usize, pos: usize) -> &[Code] {
        let ch = self.inputs.channels;
        let base = c * self.inputs.len() + pos * ch;
        &self.data[base..base + ch]
    }
}

/// Two codes per byte, low nibble first. Requires a scheme packing into 4 bits.
pub fn pack_nibbles(scheme: &CodeScheme, codes: &[Code]) -> Result<Vec<u8>> {
    if scheme.packed_bits() > 4 {
        return Err(QcnnError::InvalidScheme(format!("{}-bit codes do not fit a nibble", scheme.packed_bits())));
    }
    let mut out = vec![0u8; (codes.len() + 1) / 2];
    for (i, &c) in codes.iter().enumerate() {
        scheme.check(c)?;
        let nib = scheme.pack(c) & 0x0F;
        if i % 2 == 0 { out[i / 2] |= nib; } else { out[i / 2] |= nib << 4; }
    }
    Ok(out)
}

pub fn unpack_nibbles(scheme: &CodeScheme, bytes: &[u8], n: usize) -> Result<Vec<Code>> {
    if scheme.packed_bits() > 4 {
        return Err(QcnnError::InvalidScheme(format!("{}-bit codes do not fit a nibble", scheme.packed_bits())));
    }
    if bytes.len() * 2 < n {
        return Err(QcnnError::shape("packed codes", format!("{} bytes", (n + 1) / 2), format!("{} bytes", bytes.len())));
    }
    (0..n)
        .map(|i| {
            let b = bytes[i / 2];
            let nib = if i % 2 == 0 { b & 0x0F } else { b >> 4 };
            scheme.unpack(nib)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hwc_indexing() {
        let mut t = QuantizedTensor::zeros(Shape::new(2, 3, 2));
        t.set(1, 2, 1, Code::positive(5));
        assert_eq!(t.data()[(1 * 3 + 2) * 2 + 1], Code::positive(5));
        assert_eq!(t.pixel(1, 2), &[Code::ZERO, Code::positive(5)]);
        assert_eq!(t.pixels().count(), 6);
    }

    #[test]
    fn size_checks() {
        assert!(matches!(
            QuantizedTensor::from_codes(Shape::new(2, 2, 1), vec![Code::ZERO; 3]),
            Err(QcnnError::ImageSize { expected: 4, actual: 3 })
        ));
        assert!(WeightKernel::new(2, 3, 1, vec![Code::ZERO; 17]).is_err());
        assert!(ClassWeights::new(10, Shape::new(4, 4, 2), vec![Code::ZERO; 320]).is_ok());
    }

    #[test]
    fn kernel_filter_layout() {
        let data: Vec<Code> = (0..2 * 9).map(|i| Code::positive((i % 8) as u8)).collect();
        let k = WeightKernel::new(2, 3, 1, data).unwrap();
        assert_eq!(k.filter(1)[0], k.get(1, 0, 0, 0));
        assert_eq!(k.filter(1)[5], k.get(1, 1, 2, 0));
    }

    #[test]
    fn nibble_packing() {
        let s = CodeScheme::power_of_two(3).unwrap();
        let codes = vec![Code::positive(1), Code::negative(7), Code::ZERO];
        let packed = pack_nibbles(&s, &codes).unwrap();
        assert_eq!(packed, vec![0xF1, 0x00]);
        assert_eq!(unpack_nibbles(&s, &packed, 3).unwrap(), codes);
        let wide = CodeScheme::linear(4).unwrap();
        assert!(pack_nibbles(&wide, &codes).is_err());
    }
}
