//! In-place radix-2 FFT and window functions
//!
//! The plan (bit-reversal table and twiddle factors) is computed once per
//! size and shared by every frame of an analysis.

use crate::error::{Result, ShowError};
use num_complex::Complex32;
use std::f32::consts::PI;

/// Precomputed radix-2 Cooley-Tukey transform for one size
#[derive(Debug, Clone)]
pub struct Radix2Fft {
    size: usize,
    bit_reversed: Vec<usize>,
    twiddles: Vec<Complex32>,
}

impl Radix2Fft {
    /// Plan a transform; `size` must be a power of two of at least 2
    pub fn new(size: usize) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(ShowError::input(format!(
                "FFT size must be a power of two >= 2, got {}",
                size
            )));
        }

        let bits = size.trailing_zeros();
        let bit_reversed = (0..size)
            .map(|i| i.reverse_bits() >> (usize::BITS - bits))
            .collect();

        let twiddles = (0..size / 2)
            .map(|k| {
                let angle = -2.0 * PI * k as f32 / size as f32;
                Complex32::new(angle.cos(), angle.sin())
            })
            .collect();

        Ok(Self {
            size,
            bit_reversed,
            twiddles,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform of `buffer` in place
    ///
    /// `buffer.len()` must equal the planned size.
    pub fn process(&self, buffer: &mut [Complex32]) {
        let n = self.size;
        debug_assert_eq!(buffer.len(), n);

        // Bit-reversal permutation
        for i in 0..n {
            let j = self.bit_reversed[i];
            if j > i {
                buffer.swap(i, j);
            }
        }

        // Butterfly passes
        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let stride = n / len;
            for start in (0..n).step_by(len) {
                for k in 0..half {
                    let w = self.twiddles[k * stride];
                    let a = buffer[start + k];
                    let b = buffer[start + k + half] * w;
                    buffer[start + k] = a + b;
                    buffer[start + k + half] = a - b;
                }
            }
            len <<= 1;
        }
    }
}

/// Symmetric Hamming window of `len` points
pub fn hamming_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f32;
    (0..len)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / denom).cos())
        .collect()
}
