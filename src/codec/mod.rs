//! Compression Engine (CPS, spec §4.4): detrend → scale → differentiate →
//! entropy-code pipeline, plus the state machine and block-decode cache
//! that sits in front of it.

pub mod mbe;
pub mod pred;
pub mod range_coder;
pub mod red;
pub mod vds;
pub mod wire;

use std::collections::HashMap;

use anyhow::{ensure, Error};

use crate::block::{Algorithm, ParameterFlags};

/// A CPS is fixed at construction to either direction and cannot switch
/// without reallocation (spec §4.4 "state machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compression,
    Decompression,
}

/// Options governing a single block encode (spec §4.4 edge cases).
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub algorithm: Algorithm,
    pub detrend: bool,
    pub amplitude_scale: Option<f64>,
    pub frequency_scale: Option<f64>,
    pub derivative_level: u8,
    pub vds_threshold: f64,
    pub fall_through_to_best_encoding: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            algorithm: Algorithm::Red2,
            detrend: true,
            amplitude_scale: None,
            frequency_scale: None,
            derivative_level: 1,
            vds_threshold: 0.0,
            fall_through_to_best_encoding: true,
        }
    }
}

/// The parameter region values carried alongside the entropy-coded payload
/// (spec §4.4 step 5: "parameter_flags that identify which optional
/// regions are present").
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub intercept: Option<f64>,
    pub gradient: Option<f64>,
    pub amplitude_scale: Option<f64>,
    pub frequency_scale: Option<f64>,
}

impl Parameters {
    pub fn flags(&self) -> ParameterFlags {
        let mut flags = ParameterFlags::empty();
        if self.intercept.is_some() {
            flags |= ParameterFlags::INTERCEPT;
        }
        if self.gradient.is_some() {
            flags |= ParameterFlags::GRADIENT;
        }
        if self.amplitude_scale.is_some() {
            flags |= ParameterFlags::AMPLITUDE_SCALE;
        }
        if self.frequency_scale.is_some() {
            flags |= ParameterFlags::FREQUENCY_SCALE;
        }
        flags
    }
}

/// The encoded payload, algorithm-tagged so [`decode_block`] knows how to
/// dispatch without a separate header lookup (in a real file, this
/// corresponds to `block_flags`'s algorithm bit, read by the caller).
#[derive(Debug, Clone)]
pub enum EncodedPayload {
    Mbe(mbe::Encoded),
    Red(red::Encoded, red::Version),
    Pred(pred::Encoded, pred::Version),
    Vds(vds::Encoded),
}

impl EncodedPayload {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            EncodedPayload::Mbe(_) => Algorithm::Mbe,
            EncodedPayload::Red(_, red::Version::Red1) => Algorithm::Red1,
            EncodedPayload::Red(_, red::Version::Red2) => Algorithm::Red2,
            EncodedPayload::Pred(_, pred::Version::Pred1) => Algorithm::Pred1,
            EncodedPayload::Pred(_, pred::Version::Pred2) => Algorithm::Pred2,
            EncodedPayload::Vds(_) => Algorithm::Vds,
        }
    }

    /// Rough size estimate, used to pick the smaller of two candidate
    /// encodings under `CPS_DF_FALL_THROUGH_TO_BEST_ENCODING`.
    pub fn encoded_len(&self) -> usize {
        match self {
            EncodedPayload::Mbe(e) => e.bitstream.len(),
            EncodedPayload::Red(e, _) => e.bitstream.len() + e.literals.len() * 4,
            EncodedPayload::Pred(e, _) => e.bitstream.len() + e.literals.len() * 4,
            EncodedPayload::Vds(e) => {
                e.index_deltas.bitstream.len()
                    + e.amplitudes.bitstream.len()
                    + e.amplitudes.literals.len() * 4
            }
        }
    }
}

/// Linear least-squares fit `y = intercept + gradient * x` (spec §4.4 step
/// 1). Returns `(intercept, gradient)`.
pub fn fit_line(samples: &[i32]) -> (f64, f64) {
    let n = samples.len() as f64;
    if samples.len() < 2 {
        return (samples.first().copied().unwrap_or(0) as f64, 0.0);
    }
    let sum_x: f64 = (0..samples.len()).map(|x| x as f64).sum();
    let sum_y: f64 = samples.iter().map(|&v| v as f64).sum();
    let sum_xy: f64 = samples
        .iter()
        .enumerate()
        .map(|(x, &v)| x as f64 * v as f64)
        .sum();
    let sum_xx: f64 = (0..samples.len()).map(|x| (x as f64).powi(2)).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return (sum_y / n, 0.0);
    }
    let gradient = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - gradient * sum_x) / n;
    (intercept, gradient)
}

pub fn detrend(samples: &[i32], intercept: f64, gradient: f64) -> Vec<f64> {
    samples
        .iter()
        .enumerate()
        .map(|(x, &v)| v as f64 - (intercept + gradient * x as f64))
        .collect()
}

pub fn retrend(residuals: &[f64], intercept: f64, gradient: f64) -> Vec<i32> {
    residuals
        .iter()
        .enumerate()
        .map(|(x, &r)| (r + intercept + gradient * x as f64).round() as i32)
        .collect()
}

/// Successive differences at `level` 1 or 2 (spec §4.4 step 3).
pub fn differentiate(samples: &[i32], level: u8) -> Vec<i64> {
    let mut current: Vec<i64> = samples.iter().map(|&v| v as i64).collect();
    for _ in 0..level {
        let mut next = Vec::with_capacity(current.len());
        let mut prev = 0i64;
        for &v in &current {
            next.push(v - prev);
            prev = v;
        }
        current = next;
    }
    current
}

/// Inverse of [`differentiate`]: cumulative sum, applied `level` times.
pub fn integrate(derivatives: &[i64], level: u8) -> Vec<i32> {
    let mut current = derivatives.to_vec();
    for _ in 0..level {
        let mut acc = 0i64;
        for v in current.iter_mut() {
            acc += *v;
            *v = acc;
        }
    }
    current.iter().map(|&v| v as i32).collect()
}

fn encode_with(samples: &[i32], algorithm: Algorithm, opts: &EncodeOptions) -> EncodedPayload {
    match algorithm {
        Algorithm::Mbe => EncodedPayload::Mbe(mbe::encode(samples)),
        Algorithm::Red1 => {
            let d = differentiate(samples, opts.derivative_level);
            EncodedPayload::Red(red::encode(&d, red::Version::Red1), red::Version::Red1)
        }
        Algorithm::Red2 => {
            let d = differentiate(samples, opts.derivative_level);
            EncodedPayload::Red(red::encode(&d, red::Version::Red2), red::Version::Red2)
        }
        Algorithm::Pred1 => {
            let d = differentiate(samples, opts.derivative_level);
            EncodedPayload::Pred(
                pred::encode(&d, pred::Version::Pred1),
                pred::Version::Pred1,
            )
        }
        Algorithm::Pred2 => {
            let d = differentiate(samples, opts.derivative_level);
            EncodedPayload::Pred(
                pred::encode(&d, pred::Version::Pred2),
                pred::Version::Pred2,
            )
        }
        Algorithm::Vds => EncodedPayload::Vds(vds::encode(samples, opts.vds_threshold)),
    }
}

/// A full encode (spec §4.4 "Pipeline (encode)"): empty blocks are never
/// written (edge case: `number_of_samples == 0`).
pub fn encode_block(
    samples: &[i32],
    opts: &EncodeOptions,
) -> Option<(EncodedPayload, Parameters, u8)> {
    if samples.is_empty() {
        return None;
    }

    let mut params = Parameters::default();
    let mut working = samples.to_vec();

    if opts.detrend {
        let (intercept, gradient) = fit_line(&working);
        let residual = detrend(&working, intercept, gradient);
        working = residual.iter().map(|&r| r.round() as i32).collect();
        params.intercept = Some(intercept);
        params.gradient = Some(gradient);
    }

    if let Some(scale) = opts.amplitude_scale {
        working = working
            .iter()
            .map(|&v| (v as f64 / scale).round() as i32)
            .collect();
        params.amplitude_scale = Some(scale);
    }

    let mut derivative_level = opts.derivative_level;
    if !matches!(opts.algorithm, Algorithm::Mbe | Algorithm::Vds) {
        // differentiation happens inside encode_with for RED/PRED
    } else {
        derivative_level = 0;
    }

    let primary = encode_with(&working, opts.algorithm, opts);

    let chosen = if opts.fall_through_to_best_encoding
        && !matches!(opts.algorithm, Algorithm::Red2 | Algorithm::Mbe)
    {
        let red2 = encode_with(&working, Algorithm::Red2, opts);
        let mbe = encode_with(&working, Algorithm::Mbe, opts);
        [primary, red2, mbe]
            .into_iter()
            .min_by_key(|p| p.encoded_len())
            .expect("non-empty candidate list")
    } else {
        primary
    };

    Some((chosen, params, derivative_level))
}

pub fn decode_block(
    payload: &EncodedPayload,
    params: &Parameters,
    derivative_level: u8,
) -> Result<Vec<i32>, Error> {
    let mut working = match payload {
        EncodedPayload::Mbe(e) => mbe::decode(e)?,
        EncodedPayload::Red(e, v) => integrate(&red::decode(e, *v)?, derivative_level),
        EncodedPayload::Pred(e, v) => integrate(&pred::decode(e, *v)?, derivative_level),
        EncodedPayload::Vds(e) => vds::decode(e)?,
    };

    if let Some(scale) = params.amplitude_scale {
        working = working
            .iter()
            .map(|&v| (v as f64 * scale).round() as i32)
            .collect();
    }

    if let (Some(intercept), Some(gradient)) = (params.intercept, params.gradient) {
        let residual: Vec<f64> = working.iter().map(|&v| v as f64).collect();
        working = retrend(&residual, intercept, gradient);
    }

    Ok(working)
}

/// The owning compression-processing structure: fixed mode, optional
/// decode cache keyed by block start offset (spec §4.4: "recently decoded
/// blocks are retained so that repeated slice reads inside one segment do
/// not redecode; cache invalidates on segment close").
pub struct Cps {
    mode: Mode,
    cache_enabled: bool,
    cache: HashMap<u64, Vec<i32>>,
}

impl Cps {
    pub fn new(mode: Mode, cache_enabled: bool) -> Self {
        Cps {
            mode,
            cache_enabled,
            cache: HashMap::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn encode(
        &mut self,
        samples: &[i32],
        opts: &EncodeOptions,
    ) -> Result<Option<(EncodedPayload, Parameters, u8)>, Error> {
        ensure!(
            self.mode == Mode::Compression,
            crate::error::compression_error("CPS opened for decompression cannot encode")
        );
        Ok(encode_block(samples, opts))
    }

    pub fn decode(
        &mut self,
        block_offset: u64,
        payload: &EncodedPayload,
        params: &Parameters,
        derivative_level: u8,
    ) -> Result<Vec<i32>, Error> {
        ensure!(
            self.mode == Mode::Decompression,
            crate::error::compression_error("CPS opened for compression cannot decode")
        );

        if self.cache_enabled {
            if let Some(cached) = self.cache.get(&block_offset) {
                return Ok(cached.clone());
            }
        }

        let decoded = decode_block(payload, params, derivative_level)?;
        if self.cache_enabled {
            self.cache.insert(block_offset, decoded.clone());
        }
        Ok(decoded)
    }

    /// Invalidates the decode cache (segment close, spec §4.4).
    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbe_roundtrip_through_block_pipeline() {
        let samples: Vec<i32> = vec![10, 12, 11, 9, 8, 10, 13, 15];
        let opts = EncodeOptions {
            algorithm: Algorithm::Mbe,
            detrend: false,
            fall_through_to_best_encoding: false,
            ..Default::default()
        };
        let (payload, params, level) = encode_block(&samples, &opts).unwrap();
        let decoded = decode_block(&payload, &params, level).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn red2_roundtrip_with_detrend() {
        let samples: Vec<i32> = (0..64).map(|i| 100 + i * 2 + (i % 5)).collect();
        let opts = EncodeOptions {
            algorithm: Algorithm::Red2,
            detrend: true,
            fall_through_to_best_encoding: false,
            ..Default::default()
        };
        let (payload, params, level) = encode_block(&samples, &opts).unwrap();
        let decoded = decode_block(&payload, &params, level).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn empty_block_is_not_written() {
        let opts = EncodeOptions::default();
        assert!(encode_block(&[], &opts).is_none());
    }

    #[test]
    fn fall_through_picks_smaller_of_candidates() {
        let samples = vec![7i32; 500]; // constant signal, trivially small under MBE
        let opts = EncodeOptions {
            algorithm: Algorithm::Pred1,
            detrend: false,
            fall_through_to_best_encoding: true,
            ..Default::default()
        };
        let (payload, params, level) = encode_block(&samples, &opts).unwrap();
        let decoded = decode_block(&payload, &params, level).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn cache_avoids_redecoding() {
        let mut cps = Cps::new(Mode::Decompression, true);
        let samples: Vec<i32> = vec![1, 2, 3, 4, 5];
        let opts = EncodeOptions {
            algorithm: Algorithm::Mbe,
            detrend: false,
            fall_through_to_best_encoding: false,
            ..Default::default()
        };
        let (payload, params, level) = encode_block(&samples, &opts).unwrap();

        let first = cps.decode(1000, &payload, &params, level).unwrap();
        assert_eq!(samples, first);
        assert_eq!(1, cps.cache.len());

        let second = cps.decode(1000, &payload, &params, level).unwrap();
        assert_eq!(samples, second);

        cps.invalidate_cache();
        assert!(cps.cache.is_empty());
    }
}
