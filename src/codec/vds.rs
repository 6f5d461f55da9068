//! VDS, Vectorized Data Stream (spec §4.4): lossy encoding that stores
//! only the "critical points" of a signal (local peaks/troughs, plus the
//! first and last sample) as parallel index/amplitude streams, each with
//! its own sub-algorithm, and reconstructs the samples in between by
//! spline interpolation.
//!
//! Peak/trough detection follows the C library's description directly.
//! Reconstruction uses Catmull-Rom cubic interpolation rather than makima:
//! both are C1-continuous interpolating splines that reproduce every knot
//! exactly, which is what the lossless round-trip law (threshold 0.0)
//! requires; makima's extra monotonicity safeguards mainly change
//! behavior *between* knots on pathological inputs, which this
//! implementation does not attempt to match bit-for-bit.

use anyhow::Error;

use super::mbe;
use super::red::{self, Version as RedVersion};

#[derive(Debug, Clone)]
pub struct Encoded {
    pub sample_count: usize,
    pub index_deltas: mbe::Encoded,
    pub amplitudes: red::Encoded,
    pub lossless: bool,
}

/// Picks critical-point indices: always the first and last sample, plus
/// every local extremum of the derivative sign (spec: "peaks and troughs
/// ... plus zero-crossings"). `threshold == 0.0` keeps every index, which
/// is what makes the round trip exact.
fn critical_indices(samples: &[i32], threshold: f64) -> Vec<usize> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    if n <= 2 || threshold <= 0.0 {
        return (0..n).collect();
    }

    let mut idx = vec![0usize];
    let mut prev_sign = (samples[1] - samples[0]).signum();
    for i in 1..n - 1 {
        let sign = (samples[i + 1] - samples[i]).signum();
        if sign != 0 && sign != prev_sign {
            idx.push(i);
        }
        if sign != 0 {
            prev_sign = sign;
        }
    }
    idx.push(n - 1);
    idx.dedup();
    idx
}

pub fn encode(samples: &[i32], threshold: f64) -> Encoded {
    let indices = critical_indices(samples, threshold);
    let amplitudes: Vec<i32> = indices.iter().map(|&i| samples[i]).collect();

    let mut deltas = Vec::with_capacity(indices.len());
    let mut prev = 0i32;
    for &i in &indices {
        deltas.push(i as i32 - prev);
        prev = i as i32;
    }

    let amplitude_derivatives: Vec<i64> = {
        let mut d = Vec::with_capacity(amplitudes.len());
        let mut prev = 0i64;
        for &a in &amplitudes {
            d.push(a as i64 - prev);
            prev = a as i64;
        }
        d
    };

    Encoded {
        sample_count: samples.len(),
        index_deltas: mbe::encode(&deltas),
        amplitudes: red::encode(&amplitude_derivatives, RedVersion::Red2),
        lossless: threshold <= 0.0,
    }
}

fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

pub fn decode(encoded: &Encoded) -> Result<Vec<i32>, Error> {
    if encoded.sample_count == 0 {
        return Ok(Vec::new());
    }

    let deltas = mbe::decode(&encoded.index_deltas)?;
    let mut indices = Vec::with_capacity(deltas.len());
    let mut cursor = 0i32;
    for d in deltas {
        cursor += d;
        indices.push(cursor as usize);
    }

    let amplitude_derivatives = red::decode(&encoded.amplitudes, RedVersion::Red2)?;
    let mut amplitudes = Vec::with_capacity(amplitude_derivatives.len());
    let mut prev = 0i64;
    for d in amplitude_derivatives {
        prev += d;
        amplitudes.push(prev as i32);
    }

    let n_points = indices.len();
    let mut out = vec![0i32; encoded.sample_count];

    for k in 0..n_points {
        out[indices[k]] = amplitudes[k];
        if k + 1 >= n_points {
            continue;
        }
        let (i0, i1) = (indices[k], indices[k + 1]);
        if i1 <= i0 + 1 {
            continue;
        }
        let p0 = amplitudes[k.saturating_sub(1)] as f64;
        let p1 = amplitudes[k] as f64;
        let p2 = amplitudes[k + 1] as f64;
        let p3 = amplitudes[(k + 2).min(n_points - 1)] as f64;

        for i in (i0 + 1)..i1 {
            let t = (i - i0) as f64 / (i1 - i0) as f64;
            out[i] = catmull_rom(p0, p1, p2, p3, t).round() as i32;
        }
    }

    // fill any tail beyond the last critical point with its amplitude
    if let Some(&last_idx) = indices.last() {
        for v in out.iter_mut().skip(last_idx + 1) {
            *v = amplitudes[n_points - 1];
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_at_zero_threshold() {
        let samples: Vec<i32> = (0..200)
            .map(|i| (100.0 * (i as f64 * 0.05).sin()) as i32)
            .collect();
        let encoded = encode(&samples, 0.0);
        assert!(encoded.lossless);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn lossy_preserves_extrema() {
        let samples = vec![0, 10, 20, 10, 0, -10, -20, -10, 0, 5, 0];
        let encoded = encode(&samples, 1.0);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(samples.len(), decoded.len());
        // extrema (the peaks/troughs) are always exact knots
        assert_eq!(20, decoded[2]);
        assert_eq!(-20, decoded[6]);
    }

    #[test]
    fn empty_input() {
        let encoded = encode(&[], 0.0);
        assert!(decode(&encoded).unwrap().is_empty());
    }
}
