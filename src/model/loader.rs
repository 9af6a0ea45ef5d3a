use anyhow::{bail, Context, Result};
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::model::{FeatureLayer, Layer, Model};
use crate::quant::{Code, CodeScheme, ThresholdBank};
use crate::tensor::{Shape, WeightKernel};

pub const MODEL_MAGIC: &[u8; 8] = b"QCNNMOD1";
pub const MODEL_VERSION: u32 = 1;

const TAG_CONV: u8 = 1;
const TAG_POOL: u8 = 2;
const TAG_DENSE: u8 = 3;

// Upper bound on any single table, guards against garbage headers.
const MAX_ELEMS: usize = 1 << 26;

/// Product of header dimensions, rejected on overflow or past [`MAX_ELEMS`].
fn elems(dims: &[usize], what: &str) -> Result<usize> {
    let n = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .with_context(|| format!("{} size overflows", what))?;
    if n > MAX_ELEMS { bail!("{}: {} elements is implausibly large", what, n); }
    Ok(n)
}

struct Reader<R> {
    r: R,
}

impl<R: Read> Reader<R> {
    fn u8(&mut self, what: &str) -> Result<u8> {
        let mut b = [0u8; 1];
        self.r.read_exact(&mut b).with_context(|| format!("read {}", what))?;
        Ok(b[0])
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let mut b = [0u8; 4];
        self.r.read_exact(&mut b).with_context(|| format!("read {}", what))?;
        Ok(u32::from_le_bytes(b))
    }

    fn dim(&mut self, what: &str) -> Result<usize> {
        let v = self.u32(what)? as usize;
        if v > MAX_ELEMS { bail!("{} = {} is implausibly large", what, v); }
        Ok(v)
    }

    fn i32s(&mut self, n: usize, what: &str) -> Result<Vec<i32>> {
        if n > MAX_ELEMS { bail!("{}: {} values is implausibly large", what, n); }
        let mut buf = vec![0u8; n * 4];
        self.r.read_exact(&mut buf).with_context(|| format!("read {} ({} i32s)", what, n))?;
        Ok(buf.chunks_exact(4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
    }

    fn codes(&mut self, scheme: &CodeScheme, n: usize, what: &str) -> Result<Vec<Code>> {
        if n > MAX_ELEMS { bail!("{}: {} codes is implausibly large", what, n); }
        let mut buf = vec![0u8; n];
        self.r.read_exact(&mut buf).with_context(|| format!("read {} ({} codes)", what, n))?;
        buf.into_iter()
            .enumerate()
            .map(|(i, b)| scheme.unpack(b).with_context(|| format!("{} code #{}", what, i)))
            .collect()
    }
}

impl Model {
    /// Read a `QCNNMOD1` model file. Truncated files are rejected; the full
    /// model validation runs before returning.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(&path).with_context(|| format!("open model file: {}", path.as_ref().display()))?;
        let m = Self::read_from(BufReader::new(f)).with_context(|| format!("load model: {}", path.as_ref().display()))?;
        info!("loaded model {} -> {} classes from {}", m.input_shape(), m.classes(), path.as_ref().display());
        Ok(m)
    }

    pub fn read_from<R: Read>(r: R) -> Result<Self> {
        let mut r = Reader { r };
        let mut magic = [0u8; 8];
        r.r.read_exact(&mut magic).context("read magic")?;
        if &magic != MODEL_MAGIC { bail!("bad model magic"); }
        let version = r.u32("version")?;
        if version != MODEL_VERSION { bail!("unsupported model version {}", version); }

        let magnitude_bits = r.u8("magnitude_bits")?;
        let n_levels = r.dim("level count")?;
        let levels = r.i32s(n_levels, "levels")?;
        let scheme = CodeScheme::new(magnitude_bits, levels).context("code scheme")?;

        let input = Shape::new(r.dim("input height")?, r.dim("input width")?, r.dim("input channels")?);
        elems(&[input.height, input.width, input.channels], "input shape")?;
        let n_layers = r.dim("layer count")?;

        let mut layers = Vec::with_capacity(n_layers.min(64));
        let mut shape = input;
        for li in 0..n_layers {
            let layer = match r.u8("layer tag")? {
                TAG_CONV => {
                    let filters = r.dim("filters")?;
                    let kernel = r.dim("kernel")?;
                    let stride = r.dim("stride")?;
                    let padding = r.dim("padding")?;
                    let steps = r.dim("ladder length")?;
                    let codes = r.codes(&scheme, elems(&[filters, kernel, kernel, shape.channels], "conv weights")?, "conv weights")?;
                    let cuts = r.i32s(elems(&[filters, steps], "thresholds")?, "thresholds")?;
                    let weights = WeightKernel::new(filters, kernel, shape.channels, codes).with_context(|| format!("layer {}", li))?;
                    let thresholds = ThresholdBank::from_flat(filters, steps, &cuts).with_context(|| format!("layer {}", li))?;
                    Layer::Conv { weights, thresholds, stride, padding }
                }
                TAG_POOL => Layer::MaxPool,
                TAG_DENSE => {
                    let classes = r.dim("classes")?;
                    let weights = r.codes(&scheme, elems(&[classes, shape.len()], "dense weights")?, "dense weights")?;
                    Layer::Dense { classes, weights }
                }
                t => bail!("layer {}: unknown tag {}", li, t),
            };
            shape = layer.output_shape(shape).with_context(|| format!("layer {}", li))?;
            elems(&[shape.height, shape.width, shape.channels], "layer output").with_context(|| format!("layer {}", li))?;
            layers.push(layer);
        }
        Ok(Model::new(scheme, input, layers)?)
    }

    /// Write the `QCNNMOD1` form read by [`Model::load`].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let f = File::create(&path).with_context(|| format!("create model file: {}", path.as_ref().display()))?;
        let mut w = BufWriter::new(f);
        self.write_to(&mut w)?;
        w.flush().context("flush model file")?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let scheme = self.scheme();
        let u32le = |v: usize| (v as u32).to_le_bytes();
        w.write_all(MODEL_MAGIC)?;
        w.write_all(&MODEL_VERSION.to_le_bytes())?;
        w.write_all(&[scheme.magnitude_bits()])?;
        w.write_all(&u32le(scheme.levels().len()))?;
        for &l in scheme.levels() { w.write_all(&l.to_le_bytes())?; }
        let input = self.input_shape();
        for d in [input.height, input.width, input.channels] { w.write_all(&u32le(d))?; }
        w.write_all(&u32le(self.features().len() + 1))?;
        for f in self.features() {
            match f {
                FeatureLayer::Conv(p) => {
                    w.write_all(&[TAG_CONV])?;
                    let g = &p.geometry;
                    for d in [p.weights.filters(), g.kernel, g.stride, g.padding, p.thresholds.steps()] { w.write_all(&u32le(d))?; }
                    let packed: Vec<u8> = p.weights.data().iter().map(|&c| scheme.pack(c)).collect();
                    w.write_all(&packed)?;
                    for ladder in p.thresholds.iter() {
                        for &t in ladder.cuts() { w.write_all(&t.to_le_bytes())?; }
                    }
                }
                FeatureLayer::MaxPool { .. } => w.write_all(&[TAG_POOL])?,
            }
        }
        let head = self.head();
        w.write_all(&[TAG_DENSE])?;
        w.write_all(&u32le(head.classes()))?;
        let packed: Vec<u8> = head.weights.data().iter().map(|&c| scheme.pack(c)).collect();
        w.write_all(&packed).context("write dense weights")?;
        Ok(())
    }
}
