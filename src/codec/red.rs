//! RED1/RED2, Range Encoded Derivatives (spec §4.4). An adaptive range
//! coder over a differenced sample stream: most derivative values fit in a
//! signed byte and are range-coded directly; values that don't are escaped
//! with the keysample flag `0x80` followed by a literal 32-bit value
//! stored out-of-band from the coded bitstream.
//!
//! RED1 and RED2 share this implementation; the two historically differ in
//! how many carry/overflow bytes the range coder flushes per renormalization
//! (2 vs 3) for marginally better density on some signals. Our carryless
//! range coder ([`super::range_coder`]) renormalizes uniformly, so the two
//! variants are distinguished only by [`Version`] for block-header bookkeeping;
//! decoding is identical either way.

use anyhow::Error;

use super::range_coder::{RangeDecoder, RangeEncoder};

pub const KEYSAMPLE_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Red1,
    Red2,
}

#[derive(Debug, Clone)]
pub struct Encoded {
    pub sample_count: usize,
    /// Sparse (symbol, frequency) table, frequencies for symbols not
    /// listed are zero (spec §4.4: "optionally excluding zero-count
    /// symbols").
    pub frequencies: Vec<(u8, u32)>,
    pub bitstream: Vec<u8>,
    pub literals: Vec<i32>,
}

fn symbol_for(derivative: i64) -> (u8, Option<i32>) {
    if (-127..=127).contains(&derivative) {
        ((derivative as i8) as u8, None)
    } else {
        (KEYSAMPLE_FLAG, Some(derivative as i32))
    }
}

fn build_table(symbols: &[u8]) -> Vec<(u8, u32)> {
    let mut counts = [0u32; 256];
    for &s in symbols {
        counts[s as usize] += 1;
    }
    counts
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c > 0)
        .map(|(sym, &c)| (sym as u8, c))
        .collect()
}

/// A cumulative-frequency table built from a sparse symbol list, used by
/// both the encoder and decoder so they agree on symbol ranges.
struct CumulativeTable {
    /// (symbol, cum_freq, freq) sorted by cum_freq.
    entries: Vec<(u8, u32, u32)>,
    total: u32,
}

impl CumulativeTable {
    fn from_sparse(sparse: &[(u8, u32)]) -> Self {
        let mut entries = Vec::with_capacity(sparse.len());
        let mut cum = 0u32;
        for &(sym, freq) in sparse {
            entries.push((sym, cum, freq));
            cum += freq;
        }
        CumulativeTable {
            entries,
            total: cum.max(1),
        }
    }

    fn lookup_symbol(&self, sym: u8) -> (u32, u32) {
        self.entries
            .iter()
            .find(|&&(s, _, _)| s == sym)
            .map(|&(_, cum, freq)| (cum, freq))
            .unwrap_or((0, 1))
    }

    fn find_by_freq(&self, f: u32) -> (u8, u32, u32) {
        self.entries
            .iter()
            .copied()
            .find(|&(_, cum, freq)| f >= cum && f < cum + freq)
            .unwrap_or_else(|| *self.entries.last().expect("non-empty table"))
    }
}

/// Encodes an already-differenced sample stream (spec §4.4 pipeline step
/// 3: detrend/scale/differentiate happen upstream in [`super`]).
pub fn encode(derivatives: &[i64], _version: Version) -> Encoded {
    let mut symbols = Vec::with_capacity(derivatives.len());
    let mut literals = Vec::new();
    for &d in derivatives {
        let (sym, literal) = symbol_for(d);
        symbols.push(sym);
        if let Some(l) = literal {
            literals.push(l);
        }
    }

    let sparse = build_table(&symbols);
    let table = CumulativeTable::from_sparse(&sparse);

    let mut enc = RangeEncoder::new();
    for &sym in &symbols {
        let (cum, freq) = table.lookup_symbol(sym);
        enc.encode(cum, freq, table.total);
    }

    Encoded {
        sample_count: derivatives.len(),
        frequencies: sparse,
        bitstream: enc.finish(),
        literals,
    }
}

pub fn decode(encoded: &Encoded, _version: Version) -> Result<Vec<i64>, Error> {
    let table = CumulativeTable::from_sparse(&encoded.frequencies);
    let mut dec = RangeDecoder::new(&encoded.bitstream);
    let mut literal_iter = encoded.literals.iter();

    let mut out = Vec::with_capacity(encoded.sample_count);
    for _ in 0..encoded.sample_count {
        let f = dec.decode_freq(table.total);
        let (sym, cum, freq) = table.find_by_freq(f);
        dec.consume(cum, freq);

        if sym == KEYSAMPLE_FLAG {
            let literal = *literal_iter
                .next()
                .ok_or_else(|| crate::error::compression_error("RED literal stream exhausted"))?;
            out.push(literal as i64);
        } else {
            out.push((sym as i8) as i64);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_small_derivatives() {
        let derivs = vec![0i64, 1, -1, 2, -2, 5, -5, 0, 0, 3];
        let encoded = encode(&derivs, Version::Red2);
        assert!(encoded.literals.is_empty());
        assert_eq!(derivs, decode(&encoded, Version::Red2).unwrap());
    }

    #[test]
    fn escapes_large_derivatives() {
        let derivs = vec![0i64, 50_000, -1, 2, -999_999, 3];
        let encoded = encode(&derivs, Version::Red1);
        assert_eq!(2, encoded.literals.len());
        assert_eq!(derivs, decode(&encoded, Version::Red1).unwrap());
    }

    #[test]
    fn empty_input() {
        let encoded = encode(&[], Version::Red1);
        assert!(decode(&encoded, Version::Red1).unwrap().is_empty());
    }
}
