//! Rescale working-row samples into the 0-255 domain using the global range.
//!
//! Purely local: by the time this runs, every participant holds the same
//! global pair, so no further communication is needed. Because min and max
//! are the extrema of the very set being rescaled, results land in [0, 255]
//! by construction and no clamping is applied.

use crate::protocol::MinMax;

/// Effective divisor for a global range. A flat field (max == min) would
/// divide by zero; the range is treated as 1.0 instead, which maps every
/// sample of a flat field to 0.0. This behavior is user-visible and covered
/// by the end-to-end flat-field test.
pub fn effective_range(global: &MinMax) -> f64 {
    let range = global.max - global.min;
    if range == 0.0 {
        1.0
    } else {
        range
    }
}

/// Normalize samples in place: `255 * (s - min) / range`.
pub fn apply(samples: &mut [f64], global: &MinMax) {
    let range = effective_range(global);
    for sample in samples.iter_mut() {
        *sample = 255.0 * (*sample - global.min) / range;
    }
}
