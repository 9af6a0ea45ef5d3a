//! Threshold ladders: scale, bias and staircase activation fused into one lookup.

use crate::error::{QcnnError, Result};
use crate::quant::mac::{tree_reduce, Acc};

/// Longest ladder supported; the output level must fit a 7-bit magnitude.
pub const MAX_LADDER_LEN: usize = 127;

/// Strictly ascending cut points for one output channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdLadder {
    cuts: Vec<Acc>,
}

impl ThresholdLadder {
    pub fn new(cuts: Vec<Acc>) -> Result<Self> { Self::for_channel(0, cuts) }

    /// Same as [`ThresholdLadder::new`], reporting `channel` on failure.
    pub fn for_channel(channel: usize, cuts: Vec<Acc>) -> Result<Self> {
        if cuts.len() > MAX_LADDER_LEN {
            return Err(QcnnError::LadderLength { channel, expected: MAX_LADDER_LEN, actual: cuts.len() });
        }
        if let Some(i) = cuts.windows(2).position(|w| w[0] >= w[1]) {
            return Err(QcnnError::NonMonotonicLadder { channel, index: i + 1 });
        }
        Ok(Self { cuts })
    }

    /// `m` cuts at `start`, `start + step`, ...
    pub fn uniform(start: Acc, step: Acc, m: usize) -> Result<Self> {
        if step <= 0 && m > 1 {
            return Err(QcnnError::NonMonotonicLadder { channel: 0, index: 1 });
        }
        if m > MAX_LADDER_LEN {
            return Err(QcnnError::LadderLength { channel: 0, expected: MAX_LADDER_LEN, actual: m });
        }
        let cuts = (0..m as Acc)
            .map(|i| {
                i.checked_mul(step)
                    .and_then(|d| start.checked_add(d))
                    .ok_or_else(|| QcnnError::InvalidScheme(format!("ladder cut {} overflows the accumulator", i)))
            })
            .collect::<Result<Vec<Acc>>>()?;
        Self::new(cuts)
    }

    #[inline]
    pub fn len(&self) -> usize { self.cuts.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.cuts.is_empty() }

    #[inline]
    pub fn cuts(&self) -> &[Acc] { &self.cuts }

    /// Number of cuts that `acc` meets or exceeds.
    #[inline]
    pub fn quantize(&self, acc: Acc) -> u8 { quantize(acc, &self.cuts) }
}

/// Comparator cascade: every `acc >= cut` test is independent, the hit flags
/// are then summed by the reduction tree. For an ascending ladder the count
/// equals the index of the highest cut reached plus one.
#[inline]
pub fn quantize(acc: Acc, cuts: &[Acc]) -> u8 {
    let n = cuts.len().min(MAX_LADDER_LEN);
    let mut hits = [0 as Acc; MAX_LADDER_LEN];
    for (h, &t) in hits[..n].iter_mut().zip(cuts) { *h = (acc >= t) as Acc; }
    tree_reduce(&mut hits[..n]) as u8
}

/// One ladder per output channel, all of the same length M.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdBank {
    steps: usize,
    ladders: Vec<ThresholdLadder>,
}

impl ThresholdBank {
    pub fn new(steps: usize, ladders: Vec<Vec<Acc>>) -> Result<Self> {
        let mut out = Vec::with_capacity(ladders.len());
        for (ch, cuts) in ladders.into_iter().enumerate() {
            if cuts.len() != steps {
                return Err(QcnnError::LadderLength { channel: ch, expected: steps, actual: cuts.len() });
            }
            out.push(ThresholdLadder::for_channel(ch, cuts)?);
        }
        Ok(Self { steps, ladders: out })
    }

    /// Channel-major flat table of `channels * steps` cuts.
    pub fn from_flat(channels: usize, steps: usize, flat: &[Acc]) -> Result<Self> {
        if flat.len() != channels * steps {
            return Err(QcnnError::shape("threshold table", channels * steps, flat.len()));
        }
        let ladders = if steps == 0 { vec![Vec::new(); channels] } else { flat.chunks(steps).map(|c| c.to_vec()).collect() };
        Self::new(steps, ladders)
    }

    #[inline]
    pub fn steps(&self) -> usize { self.steps }

    #[inline]
    pub fn channels(&self) -> usize { self.ladders.len() }

    #[inline]
    pub fn ladder(&self, channel: usize) -> &ThresholdLadder { &self.ladders[channel] }

    pub fn iter(&self) -> impl Iterator<Item = &ThresholdLadder> { self.ladders.iter() }
}
