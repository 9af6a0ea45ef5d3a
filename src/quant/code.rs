//! Sign-magnitude quantized codes and the level table they index.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{QcnnError, Result};

/// One quantized activation or weight.
///
/// The magnitude is an index into a [`CodeScheme`] level table, not a linear
/// integer. Negative zero is normalized away so that equal values compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Code {
    sign: bool,
    magnitude: u8,
}

impl Code {
    pub const ZERO: Code = Code { sign: false, magnitude: 0 };

    #[inline]
    pub fn new(sign: bool, magnitude: u8) -> Self {
        Self { sign: sign && magnitude != 0, magnitude }
    }

    #[inline]
    pub fn positive(magnitude: u8) -> Self { Self::new(false, magnitude) }

    #[inline]
    pub fn negative(magnitude: u8) -> Self { Self::new(true, magnitude) }

    #[inline]
    pub fn sign(self) -> bool { self.sign }

    #[inline]
    pub fn magnitude(self) -> u8 { self.magnitude }

    #[inline]
    pub fn is_zero(self) -> bool { self.magnitude == 0 }

    /// Signed level index. Monotonic with the decoded value because scheme
    /// levels are strictly ascending.
    #[inline]
    fn key(self) -> i16 {
        if self.sign { -(self.magnitude as i16) } else { self.magnitude as i16 }
    }
}

impl Ord for Code {
    fn cmp(&self, other: &Self) -> Ordering { self.key().cmp(&other.key()) }
}

impl PartialOrd for Code {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sign { write!(f, "-{}", self.magnitude) } else { write!(f, "{}", self.magnitude) }
    }
}

/// Maximum magnitude field width; the packed form (sign + magnitude) must fit a byte.
pub const MAX_MAGNITUDE_BITS: u8 = 7;

/// Level table for a code family plus its precomputed magnitude product table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeScheme {
    magnitude_bits: u8,
    levels: Vec<i32>,
    // levels.len() x levels.len(), row-major
    products: Vec<i32>,
}

impl CodeScheme {
    /// Build a scheme from an explicit level table.
    ///
    /// `levels[0]` must be 0, the table must be strictly ascending and must
    /// fit in `magnitude_bits`.
    pub fn new(magnitude_bits: u8, levels: Vec<i32>) -> Result<Self> {
        if magnitude_bits == 0 || magnitude_bits > MAX_MAGNITUDE_BITS {
            return Err(QcnnError::InvalidScheme(format!("magnitude bits must be 1..={}, got {}", MAX_MAGNITUDE_BITS, magnitude_bits)));
        }
        if levels.is_empty() {
            return Err(QcnnError::InvalidScheme("empty level table".into()));
        }
        let cap = 1usize << magnitude_bits;
        if levels.len() > cap {
            return Err(QcnnError::InvalidScheme(format!("{} levels do not fit in {} bits", levels.len(), magnitude_bits)));
        }
        if levels[0] != 0 {
            return Err(QcnnError::InvalidScheme(format!("level 0 must be zero, got {}", levels[0])));
        }
        if let Some(i) = levels.windows(2).position(|w| w[0] >= w[1]) {
            return Err(QcnnError::InvalidScheme(format!("levels not strictly ascending at index {}", i + 1)));
        }
        // Products of the largest levels must fit the product table
        let top = *levels.last().unwrap_or(&0) as i64;
        if top * top > i32::MAX as i64 {
            return Err(QcnnError::InvalidScheme(format!("level {} squared overflows i32", top)));
        }
        let n = levels.len();
        let mut products = vec![0i32; n * n];
        for i in 0..n {
            for j in 0..n { products[i * n + j] = levels[i] * levels[j]; }
        }
        Ok(Self { magnitude_bits, levels, products })
    }

    /// Levels {0, 1, 2, 4, ...}: magnitude m > 0 encodes 2^(m-1).
    pub fn power_of_two(magnitude_bits: u8) -> Result<Self> {
        if magnitude_bits == 0 || magnitude_bits > 4 {
            return Err(QcnnError::InvalidScheme(format!("power-of-two scheme supports 1..=4 magnitude bits, got {}", magnitude_bits)));
        }
        let n = 1usize << magnitude_bits;
        let mut levels = Vec::with_capacity(n);
        levels.push(0);
        for m in 1..n { levels.push(1i32 << (m - 1)); }
        Self::new(magnitude_bits, levels)
    }

    /// Levels {0, 1, 2, ..., 2^bits - 1}.
    pub fn linear(magnitude_bits: u8) -> Result<Self> {
        if magnitude_bits == 0 || magnitude_bits > MAX_MAGNITUDE_BITS {
            return Err(QcnnError::InvalidScheme(format!("magnitude bits must be 1..={}, got {}", MAX_MAGNITUDE_BITS, magnitude_bits)));
        }
        Self::new(magnitude_bits, (0..(1i32 << magnitude_bits)).collect())
    }

    #[inline]
    pub fn magnitude_bits(&self) -> u8 { self.magnitude_bits }

    /// Width of the packed form: one sign bit plus the magnitude field.
    #[inline]
    pub fn packed_bits(&self) -> u8 { self.magnitude_bits + 1 }

    #[inline]
    pub fn levels(&self) -> &[i32] { &self.levels }

    #[inline]
    pub fn max_magnitude(&self) -> u8 { (self.levels.len() - 1) as u8 }

    /// Largest absolute product of two codes.
    pub fn max_product(&self) -> i64 {
        let top = *self.levels.last().unwrap_or(&0) as i64;
        top * top
    }

    pub fn check(&self, code: Code) -> Result<()> {
        if code.magnitude() > self.max_magnitude() {
            return Err(QcnnError::CodeOutOfRange { magnitude: code.magnitude(), max: self.max_magnitude() });
        }
        Ok(())
    }

    pub fn code(&self, sign: bool, magnitude: u8) -> Result<Code> {
        let c = Code::new(sign, magnitude);
        self.check(c)?;
        Ok(c)
    }

    /// Decoded numeric value.
    #[inline]
    pub fn value(&self, code: Code) -> i32 {
        let v = self.levels[code.magnitude() as usize];
        if code.sign() { -v } else { v }
    }

    /// Product of two codes by table lookup; the sign is the XOR of both signs.
    ///
    /// Codes must have been checked against this scheme.
    #[inline]
    pub fn multiply(&self, a: Code, b: Code) -> i32 {
        let n = self.levels.len();
        let p = self.products[a.magnitude() as usize * n + b.magnitude() as usize];
        if a.sign() ^ b.sign() { -p } else { p }
    }

    /// Packed integer form: `sign << magnitude_bits | magnitude`.
    #[inline]
    pub fn pack(&self, code: Code) -> u8 {
        ((code.sign() as u8) << self.magnitude_bits) | code.magnitude()
    }

    pub fn unpack(&self, raw: u8) -> Result<Code> {
        if self.packed_bits() < 8 && raw >> self.packed_bits() != 0 {
            return Err(QcnnError::InvalidScheme(format!("packed code {:#04x} wider than {} bits", raw, self.packed_bits())));
        }
        let magnitude = raw & ((1u8 << self.magnitude_bits) - 1);
        let sign = (raw >> self.magnitude_bits) & 1 == 1;
        self.code(sign, magnitude)
    }
}
