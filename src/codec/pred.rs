//! PRED1/PRED2, Predictive RED (spec §4.4): three conditional statistics
//! tables, selected by whether the *previous* derivative symbol was zero,
//! positive, or negative. Biological signals tend to have runs of
//! same-signed derivatives, so conditioning the symbol table on the prior
//! sign improves compressibility over plain RED.

use anyhow::Error;

use super::range_coder::{RangeDecoder, RangeEncoder};
use super::red::{Version as RedVersion, KEYSAMPLE_FLAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Pred1,
    Pred2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Context {
    Zero,
    Positive,
    Negative,
}

impl Context {
    fn of(symbol: u8) -> Context {
        let v = symbol as i8;
        if v == 0 {
            Context::Zero
        } else if v > 0 {
            Context::Positive
        } else {
            Context::Negative
        }
    }

    fn index(self) -> usize {
        match self {
            Context::Zero => 0,
            Context::Positive => 1,
            Context::Negative => 2,
        }
    }
}

fn symbol_for(derivative: i64) -> (u8, Option<i32>) {
    if (-127..=127).contains(&derivative) {
        ((derivative as i8) as u8, None)
    } else {
        (KEYSAMPLE_FLAG, Some(derivative as i32))
    }
}

#[derive(Debug, Clone)]
pub struct Encoded {
    pub sample_count: usize,
    /// One sparse (symbol, frequency) table per conditioning context
    /// (zero / positive / negative previous symbol).
    pub tables: [Vec<(u8, u32)>; 3],
    pub bitstream: Vec<u8>,
    pub literals: Vec<i32>,
}

struct CumulativeTable {
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

    let mut per_context: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut prev = Context::Zero;
    for &sym in &symbols {
        per_context[prev.index()].push(sym);
        prev = Context::of(sym);
    }

    let sparse_tables = [
        build_table(&per_context[0]),
        build_table(&per_context[1]),
        build_table(&per_context[2]),
    ];
    let tables = [
        CumulativeTable::from_sparse(&sparse_tables[0]),
        CumulativeTable::from_sparse(&sparse_tables[1]),
        CumulativeTable::from_sparse(&sparse_tables[2]),
    ];

    let mut enc = RangeEncoder::new();
    let mut prev = Context::Zero;
    for &sym in &symbols {
        let table = &tables[prev.index()];
        let (cum, freq) = table.lookup_symbol(sym);
        enc.encode(cum, freq, table.total);
        prev = Context::of(sym);
    }

    Encoded {
        sample_count: derivatives.len(),
        tables: sparse_tables,
        bitstream: enc.finish(),
        literals,
    }
}

pub fn decode(encoded: &Encoded, _version: Version) -> Result<Vec<i64>, Error> {
    let tables = [
        CumulativeTable::from_sparse(&encoded.tables[0]),
        CumulativeTable::from_sparse(&encoded.tables[1]),
        CumulativeTable::from_sparse(&encoded.tables[2]),
    ];
    let mut dec = RangeDecoder::new(&encoded.bitstream);
    let mut literal_iter = encoded.literals.iter();

    let mut out = Vec::with_capacity(encoded.sample_count);
    let mut prev = Context::Zero;
    for _ in 0..encoded.sample_count {
        let table = &tables[prev.index()];
        let f = dec.decode_freq(table.total);
        let (sym, cum, freq) = table.find_by_freq(f);
        dec.consume(cum, freq);
        prev = Context::of(sym);

        if sym == KEYSAMPLE_FLAG {
            let literal = *literal_iter.next().ok_or_else(|| {
                crate::error::compression_error("PRED literal stream exhausted")
            })?;
            out.push(literal as i64);
        } else {
            out.push((sym as i8) as i64);
        }
    }
    Ok(out)
}

/// Maps to the equivalent plain-RED version for callers that fall back
/// (spec §4.4 edge cases: "falls back to whichever of {RED2, MBE}").
pub fn as_red_version(version: Version) -> RedVersion {
    match version {
        Version::Pred1 => RedVersion::Red1,
        Version::Pred2 => RedVersion::Red2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_with_sign_runs() {
        let derivs = vec![0i64, 1, 1, 2, 1, -1, -2, -1, 0, 3, 3];
        let encoded = encode(&derivs, Version::Pred2);
        assert_eq!(derivs, decode(&encoded, Version::Pred2).unwrap());
    }

    #[test]
    fn escapes_large_derivatives() {
        let derivs = vec![0i64, 200_000, -1, -300_000, 2];
        let encoded = encode(&derivs, Version::Pred1);
        assert_eq!(2, encoded.literals.len());
        assert_eq!(derivs, decode(&encoded, Version::Pred1).unwrap());
    }
}
