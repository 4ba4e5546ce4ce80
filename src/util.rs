/*!
Miscellaneous utilities for `airburn`
*/

use chrono::{Duration, NaiveDate};
use num::{Float, NumCast};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A 64-bit FNV-1a hash, stable across processes and platforms
pub fn stable_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Fold a sequence of floats into a stable fingerprint
pub fn fingerprint<I: IntoIterator<Item = f64>>(values: I) -> u64 {
    values.into_iter().fold(FNV_OFFSET, |hash, value| {
        value
            .to_bits()
            .to_le_bytes()
            .iter()
            .fold(hash, |hash, &byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
    })
}

/// `n` evenly spaced values from `start` to `end`, both inclusive
pub fn linspace<F: Float>(start: F, end: F, n: usize) -> Vec<F> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let last: F = NumCast::from(n - 1).unwrap_or_else(F::one);
            (0..n)
                .map(|i| {
                    let i: F = NumCast::from(i).unwrap_or_else(F::zero);
                    start + (end - start) * i / last
                })
                .collect()
        }
    }
}

/// `n` consecutive calendar days ending at (and including) `end`
pub fn date_range(end: NaiveDate, n: usize) -> Vec<NaiveDate> {
    (0..n)
        .rev()
        .map(|back| end - Duration::days(back as i64))
        .collect()
}

/// Round to one decimal place, for display
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
