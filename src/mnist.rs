//! IDX image/label files and grayscale-to-code conversion.

use anyhow::{bail, Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use crate::quant::mac::Acc;
use crate::quant::{Code, CodeScheme, ThresholdLadder};
use crate::tensor::{QuantizedTensor, Shape};

const IDX_IMAGES: u32 = 0x0000_0803;
const IDX_LABELS: u32 = 0x0000_0801;

fn read_be_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let b = data.get(*offset..*offset + 4).context("truncated IDX header")?;
    *offset += 4;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Raw 8-bit grayscale images from an IDX3 file.
#[derive(Debug, Clone)]
pub struct IdxImages {
    pub count: usize,
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<u8>,
}

impl IdxImages {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut off = 0usize;
        let magic = read_be_u32(data, &mut off)?;
        if magic != IDX_IMAGES { bail!("bad IDX image magic {:#010x}", magic); }
        let count = read_be_u32(data, &mut off)? as usize;
        let rows = read_be_u32(data, &mut off)? as usize;
        let cols = read_be_u32(data, &mut off)? as usize;
        let need = count
            .checked_mul(rows)
            .and_then(|n| n.checked_mul(cols))
            .context("IDX image dimensions overflow")?;
        let body = &data[off..];
        if body.len() < need {
            bail!("IDX image body has {} bytes, header promises {}", body.len(), need);
        }
        Ok(Self { count, rows, cols, pixels: body[..need].to_vec() })
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(&path).with_context(|| format!("read IDX images: {}", path.as_ref().display()))?;
        let imgs = Self::parse(&data).with_context(|| format!("parse IDX images: {}", path.as_ref().display()))?;
        info!("read {} images of {}x{} from {}", imgs.count, imgs.rows, imgs.cols, path.as_ref().display());
        Ok(imgs)
    }

    /// Gray bytes of image `i`, or `None` past the last image.
    pub fn image(&self, i: usize) -> Option<&[u8]> {
        let n = self.rows * self.cols;
        if i >= self.count { return None; }
        self.pixels.get(i * n..(i + 1) * n)
    }

    pub fn to_tensors(&self, q: &GrayQuantizer) -> crate::error::Result<Vec<QuantizedTensor>> {
        let n = (self.rows * self.cols).max(1);
        self.pixels.chunks_exact(n).take(self.count).map(|img| q.image(self.rows, self.cols, img)).collect()
    }
}

pub fn parse_labels(data: &[u8]) -> Result<Vec<u8>> {
    let mut off = 0usize;
    let magic = read_be_u32(data, &mut off)?;
    if magic != IDX_LABELS { bail!("bad IDX label magic {:#010x}", magic); }
    let count = read_be_u32(data, &mut off)? as usize;
    let body = &data[off..];
    if body.len() < count {
        bail!("IDX label body has {} bytes, header promises {}", body.len(), count);
    }
    Ok(body[..count].to_vec())
}

pub fn read_labels<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let data = fs::read(&path).with_context(|| format!("read IDX labels: {}", path.as_ref().display()))?;
    parse_labels(&data).with_context(|| format!("parse IDX labels: {}", path.as_ref().display()))
}

/// Predictions that match their label. Every prediction needs a label.
pub fn count_correct(predictions: &[Option<usize>], labels: &[u8]) -> Result<usize> {
    if predictions.len() != labels.len() {
        bail!("{} predictions but {} labels", predictions.len(), labels.len());
    }
    Ok(predictions.iter().zip(labels).filter(|&(p, &y)| *p == Some(y as usize)).count())
}

/// Maps 8-bit grayscale to non-negative codes through a threshold ladder.
#[derive(Debug, Clone)]
pub struct GrayQuantizer {
    ladder: ThresholdLadder,
}

impl GrayQuantizer {
    pub fn new(ladder: ThresholdLadder, scheme: &CodeScheme) -> crate::error::Result<Self> {
        if ladder.len() > scheme.max_magnitude() as usize {
            return Err(crate::error::QcnnError::LadderLength { channel: 0, expected: scheme.max_magnitude() as usize, actual: ladder.len() });
        }
        Ok(Self { ladder })
    }

    /// Evenly spaced cuts over 0..=255 using every magnitude of `scheme`.
    pub fn uniform(scheme: &CodeScheme) -> crate::error::Result<Self> {
        let m = scheme.max_magnitude() as Acc;
        let cuts = (1..=m).map(|i| i * 256 / (m + 1)).collect();
        Self::new(ThresholdLadder::new(cuts)?, scheme)
    }

    #[inline]
    pub fn code(&self, gray: u8) -> Code { Code::positive(self.ladder.quantize(gray as Acc)) }

    pub fn image(&self, rows: usize, cols: usize, gray: &[u8]) -> crate::error::Result<QuantizedTensor> {
        QuantizedTensor::from_codes(Shape::new(rows, cols, 1), gray.iter().map(|&g| self.code(g)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx_images(count: u32, rows: u32, cols: u32, body: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        for x in [IDX_IMAGES, count, rows, cols] { v.extend_from_slice(&x.to_be_bytes()); }
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn parses_images_and_labels() {
        let data = idx_images(2, 2, 2, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let imgs = IdxImages::parse(&data).unwrap();
        assert_eq!((imgs.count, imgs.rows, imgs.cols), (2, 2, 2));
        assert_eq!(imgs.image(1), Some(&[4u8, 5, 6, 7][..]));
        assert_eq!(imgs.image(2), None);

        let mut lab = Vec::new();
        lab.extend_from_slice(&IDX_LABELS.to_be_bytes());
        lab.extend_from_slice(&3u32.to_be_bytes());
        lab.extend_from_slice(&[7, 2, 1]);
        assert_eq!(parse_labels(&lab).unwrap(), vec![7, 2, 1]);
    }

    #[test]
    fn rejects_truncated_body() {
        let data = idx_images(2, 2, 2, &[0, 1, 2]);
        assert!(IdxImages::parse(&data).is_err());
        assert!(parse_labels(&[0, 0]).is_err());
    }

    #[test]
    fn correct_count_needs_a_label_per_prediction() {
        let preds = [Some(7), None, Some(1)];
        assert_eq!(count_correct(&preds, &[7, 2, 0]).unwrap(), 1);
        assert!(count_correct(&preds, &[7, 2]).is_err());
        assert!(count_correct(&preds[..2], &[7, 2, 1]).is_err());
    }

    #[test]
    fn tensors_stop_at_header_count() {
        let s = CodeScheme::power_of_two(3).unwrap();
        let q = GrayQuantizer::uniform(&s).unwrap();
        let imgs = IdxImages::parse(&idx_images(2, 1, 2, &[0, 255, 255, 0, 9, 9])).unwrap();
        let t = imgs.to_tensors(&q).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t[1].data(), &[Code::positive(7), Code::ZERO]);
    }

    #[test]
    fn uniform_gray_levels() {
        let s = CodeScheme::power_of_two(3).unwrap();
        let q = GrayQuantizer::uniform(&s).unwrap();
        assert_eq!(q.code(0), Code::ZERO);
        assert_eq!(q.code(31), Code::ZERO);
        assert_eq!(q.code(32), Code::positive(1));
        assert_eq!(q.code(255), Code::positive(7));
    }
}
