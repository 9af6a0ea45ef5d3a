//! Line buffer + sliding window over a raster pixel stream.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{QcnnError, Result};
use crate::quant::Code;
use crate::tensor::Shape;

/// Input extent and sliding-window parameters for one convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub input: Shape,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl WindowGeometry {
    /// Stride 1, no padding.
    pub fn valid(input: Shape, kernel: usize) -> Self { Self { input, kernel, stride: 1, padding: 0 } }

    pub fn validate(&self) -> Result<()> {
        if self.kernel == 0 || self.kernel % 2 == 0 {
            return Err(QcnnError::geometry(format!("kernel edge must be odd, got {}", self.kernel)));
        }
        if self.stride == 0 {
            return Err(QcnnError::geometry("stride must be positive"));
        }
        if self.input.is_empty() {
            return Err(QcnnError::geometry(format!("empty input {}", self.input)));
        }
        if self.padded_height() < self.kernel || self.padded_width() < self.kernel {
            return Err(QcnnError::geometry(format!(
                "kernel {} larger than padded input {}x{}", self.kernel, self.padded_height(), self.padded_width()
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn padded_height(&self) -> usize { self.input.height + 2 * self.padding }
    #[inline]
    pub fn padded_width(&self) -> usize { self.input.width + 2 * self.padding }
    #[inline]
    pub fn output_height(&self) -> usize { (self.padded_height() - self.kernel) / self.stride + 1 }
    #[inline]
    pub fn output_width(&self) -> usize { (self.padded_width() - self.kernel) / self.stride + 1 }

    /// Output spatial extent with `channels` output channels.
    pub fn output_shape(&self, channels: usize) -> Shape { Shape::new(self.output_height(), self.output_width(), channels) }

    /// Codes in one K×K×C window.
    #[inline]
    pub fn window_len(&self) -> usize { self.kernel * self.kernel * self.input.channels }
}

/// K×K×C neighborhood ending at output position (row, col), laid out
/// (ky, kx, c) like a [`crate::tensor::WeightKernel`] filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub row: usize,
    pub col: usize,
    kernel: usize,
    channels: usize,
    data: Vec<Code>,
}

impl Window {
    #[inline]
    pub fn values(&self) -> &[Code] { &self.data }

    #[inline]
    pub fn get(&self, ky: usize, kx: usize, c: usize) -> Code { self.data[(ky * self.kernel + kx) * self.channels + c] }
}

/// Streaming windower. Keeps K-1 rows of padded history plus a K×K window
/// register; windows become available once enough history has been seen.
///
/// Zero padding is injected around the logical image; the caller only pushes
/// the H×W real pixels.
pub struct Windower {
    geom: WindowGeometry,
    // (K-1) rows of the padded frame, slot = row % (K-1)
    lines: Vec<Code>,
    window: Vec<Code>,
    column: Vec<Code>,
    zero: Vec<Code>,
    row: usize,
    col: usize,
    received: usize,
    emitted: usize,
    ready: VecDeque<Window>,
}

impl Windower {
    pub fn new(geom: WindowGeometry) -> Result<Self> {
        geom.validate()?;
        let k = geom.kernel;
        let ch = geom.input.channels;
        Ok(Self {
            geom,
            lines: vec![Code::ZERO; (k - 1) * geom.padded_width() * ch],
            window: vec![Code::ZERO; k * k * ch],
            column: vec![Code::ZERO; k * ch],
            zero: vec![Code::ZERO; ch],
            row: 0,
            col: 0,
            received: 0,
            emitted: 0,
            ready: VecDeque::new(),
        })
    }

    #[inline]
    pub fn geometry(&self) -> &WindowGeometry { &self.geom }

    /// Forget all history; the next push starts a new image.
    pub fn reset(&mut self) {
        self.lines.fill(Code::ZERO);
        self.window.fill(Code::ZERO);
        self.row = 0;
        self.col = 0;
        self.received = 0;
        self.emitted = 0;
        self.ready.clear();
    }

    /// Real pixels accepted since the last reset.
    #[inline]
    pub fn received(&self) -> usize { self.received }

    /// Windows produced since the last reset, popped or not.
    #[inline]
    pub fn emitted(&self) -> usize { self.emitted }

    #[inline]
    pub fn is_complete(&self) -> bool { self.received == self.geom.input.pixels() }

    /// Windows waiting to be popped.
    #[inline]
    pub fn pending(&self) -> usize { self.ready.len() }

    pub fn pop(&mut self) -> Option<Window> { self.ready.pop_front() }

    /// Accept the next channel vector in raster order.
    pub fn push(&mut self, pixel: &[Code]) -> Result<()> {
        let Shape { height, width, channels } = self.geom.input;
        if pixel.len() != channels {
            return Err(QcnnError::shape("windower pixel", channels, pixel.len()));
        }
        if self.received == height * width {
            return Err(QcnnError::ImageSize { expected: height * width * channels, actual: (self.received + 1) * channels });
        }
        let pad = self.geom.padding;
        let pw = self.geom.padded_width();
        if self.received == 0 {
            for _ in 0..pad * pw { self.feed_zero(); }
        }
        if self.received % width == 0 {
            for _ in 0..pad { self.feed_zero(); }
        }
        self.feed(pixel);
        self.received += 1;
        if self.received % width == 0 {
            for _ in 0..pad { self.feed_zero(); }
        }
        if self.received == height * width {
            for _ in 0..pad * pw { self.feed_zero(); }
        }
        Ok(())
    }

    /// Lazy window sequence over `pixels`. Consumes the windower.
    pub fn windows<I, P>(self, pixels: I) -> WindowStream<I::IntoIter>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[Code]>,
    {
        WindowStream { windower: self, pixels: pixels.into_iter(), failed: false }
    }

    fn feed_zero(&mut self) {
        let zero = std::mem::take(&mut self.zero);
        self.feed(&zero);
        self.zero = zero;
    }

    fn feed(&mut self, px: &[Code]) {
        let k = self.geom.kernel;
        let ch = self.geom.input.channels;
        let pw = self.geom.padded_width();
        let (r, c) = (self.row, self.col);
        let hist = k - 1;

        // Column c of rows r-K+1 ..= r, oldest first
        for i in 0..hist {
            let slot = (r + i) % hist;
            let src = (slot * pw + c) * ch;
            self.column[i * ch..(i + 1) * ch].copy_from_slice(&self.lines[src..src + ch]);
        }
        self.column[hist * ch..].copy_from_slice(px);
        if hist > 0 {
            let dst = ((r % hist) * pw + c) * ch;
            self.lines[dst..dst + ch].copy_from_slice(px);
        }

        let row_len = k * ch;
        for ky in 0..k {
            let row = &mut self.window[ky * row_len..(ky + 1) * row_len];
            row.copy_within(ch.., 0);
            row[row_len - ch..].copy_from_slice(&self.column[ky * ch..(ky + 1) * ch]);
        }

        let s = self.geom.stride;
        if r >= hist && c >= hist && (r - hist) % s == 0 && (c - hist) % s == 0 {
            self.ready.push_back(Window {
                row: (r - hist) / s,
                col: (c - hist) / s,
                kernel: k,
                channels: ch,
                data: self.window.clone(),
            });
            self.emitted += 1;
        }

        self.col += 1;
        if self.col == pw {
            self.col = 0;
            self.row += 1;
        }
    }
}

/// Iterator returned by [`Windower::windows`]. Finite and not restartable.
pub struct WindowStream<I> {
    windower: Windower,
    pixels: I,
    failed: bool,
}

impl<I, P> Iterator for WindowStream<I>
where
    I: Iterator<Item = P>,
    P: AsRef<[Code]>,
{
    type Item = Result<Window>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(w) = self.windower.pop() { return Some(Ok(w)); }
            if self.failed { return None; }
            let px = self.pixels.next()?;
            if let Err(e) = self.windower.push(px.as_ref()) {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}
