//! Quantized multiply-accumulate with a balanced reduction tree.

use crate::error::{QcnnError, Result};
use crate::quant::code::{Code, CodeScheme};

/// Accumulator type for every MAC in the pipeline.
pub type Acc = i32;

/// Bits available in [`Acc`], sign included.
pub const ACC_BITS: u32 = Acc::BITS;

/// Bits (sign included) needed to hold a sum of `terms` products of at most
/// `max_product` in magnitude.
pub fn required_bits(terms: usize, max_product: i64) -> u32 {
    let worst = (terms as u128) * (max_product.unsigned_abs() as u128);
    (u128::BITS - worst.leading_zeros()) + 1
}

/// Reject a layer whose worst-case sum would not fit [`Acc`].
pub fn check_accumulator(what: &str, terms: usize, scheme: &CodeScheme) -> Result<()> {
    let required = required_bits(terms, scheme.max_product());
    if required > ACC_BITS {
        return Err(QcnnError::AccumulatorTooNarrow { what: what.to_string(), required, available: ACC_BITS });
    }
    Ok(())
}

/// Depth of the reduction tree over `n` leaves, i.e. ceil(log2 n).
pub fn tree_depth(n: usize) -> u32 {
    if n <= 1 { 0 } else { usize::BITS - (n - 1).leading_zeros() }
}

/// Pairwise in-place sum: at each level, slot i absorbs slot i + stride, and
/// the stride doubles. The total ends up in `buf[0]`.
#[inline]
pub fn tree_reduce(buf: &mut [Acc]) -> Acc {
    let n = buf.len();
    if n == 0 { return 0; }
    let mut stride = 1usize;
    while stride < n {
        let mut i = 0usize;
        while i + stride < n {
            buf[i] += buf[i + stride];
            i += 2 * stride;
        }
        stride *= 2;
    }
    buf[0]
}

/// Sequential reference; only the summation order differs from [`tree_reduce`].
#[inline]
pub fn dot_codes(scheme: &CodeScheme, xs: &[Code], ws: &[Code]) -> Acc {
    let mut acc: Acc = 0;
    for i in 0..xs.len().min(ws.len()) { acc += scheme.multiply(xs[i], ws[i]); }
    acc
}

/// MAC unit with a reusable product buffer.
#[derive(Debug, Clone, Default)]
pub struct MacReducer {
    scratch: Vec<Acc>,
}

impl MacReducer {
    pub fn new(len: usize) -> Self { Self { scratch: Vec::with_capacity(len) } }

    /// Dot product of `xs` and `ws` (equal lengths), products summed by tree.
    /// No clamping: the caller sizes the accumulator with [`check_accumulator`].
    pub fn mac(&mut self, scheme: &CodeScheme, xs: &[Code], ws: &[Code]) -> Acc {
        debug_assert_eq!(xs.len(), ws.len());
        self.scratch.clear();
        self.scratch.extend(xs.iter().zip(ws).map(|(&x, &w)| scheme.multiply(x, w)));
        tree_reduce(&mut self.scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_depths() {
        assert_eq!(tree_depth(1), 0);
        assert_eq!(tree_depth(2), 1);
        assert_eq!(tree_depth(3), 2);
        assert_eq!(tree_depth(8), 3);
        assert_eq!(tree_depth(9), 4);
        assert_eq!(tree_depth(25 * 6), 8);
    }

    #[test]
    fn tree_reduce_odd_lengths() {
        for n in 0..40 {
            let mut v: Vec<Acc> = (0..n as i32).map(|i| i * 3 - 7).collect();
            let expect: Acc = v.iter().sum();
            assert_eq!(tree_reduce(&mut v), expect, "n={}", n);
        }
    }

    #[test]
    fn mac_equals_sequential_dot() {
        let s = CodeScheme::power_of_two(3).unwrap();
        let xs: Vec<Code> = (0..27).map(|i| Code::new(i % 3 == 0, (i % 8) as u8)).collect();
        let ws: Vec<Code> = (0..27).map(|i| Code::new(i % 2 == 0, ((i * 5) % 8) as u8)).collect();
        let mut m = MacReducer::new(27);
        assert_eq!(m.mac(&s, &xs, &ws), dot_codes(&s, &xs, &ws));
    }

    #[test]
    fn accumulator_sizing() {
        // 9 terms of at most 1: sum <= 9 needs 4 magnitude bits + sign
        assert_eq!(required_bits(9, 1), 5);
        assert_eq!(required_bits(0, 100), 1);
        let s = CodeScheme::power_of_two(3).unwrap();
        assert!(check_accumulator("small", 5 * 5 * 16, &s).is_ok());
        let wide = CodeScheme::linear(7).unwrap();
        assert!(check_accumulator("huge", 1 << 20, &wide).is_err());
    }
}
