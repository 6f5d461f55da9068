//! On-disk serialization for [`super::EncodedPayload`] and
//! [`super::Parameters`] (spec §3.1 "model region" / "parameter region").
//! Each candidate algorithm keeps its own frequency tables and bitstream
//! alongside the block rather than relying on a shared, file-wide symbol
//! table, so a block can be decoded in isolation, the same self-description
//! principle an ext4 extent header uses: each extent carries its own length
//! rather than pointing at a global table.

use anyhow::{ensure, Error};

use super::{mbe, pred, red, vds, EncodedPayload, Parameters};
use crate::block::Algorithm;
use crate::error::compression_error;

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn put_i32_slice(out: &mut Vec<u8>, values: &[i32]) {
    put_u32(out, values.len() as u32);
    for &v in values {
        put_i32(out, v);
    }
}

fn put_freq_table(out: &mut Vec<u8>, table: &[(u8, u32)]) {
    put_u32(out, table.len() as u32);
    for &(sym, freq) in table {
        out.push(sym);
        put_u32(out, freq);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), Error> {
        ensure!(
            self.pos + n <= self.buf.len(),
            compression_error("block wire format truncated")
        );
        Ok(())
    }

    fn u32(&mut self) -> Result<u32, Error> {
        self.need(4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn i32(&mut self) -> Result<i32, Error> {
        self.need(4)?;
        let v = i32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn f64(&mut self) -> Result<f64, Error> {
        self.need(8)?;
        let v = f64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(v)
    }

    fn i32_vec(&mut self) -> Result<Vec<i32>, Error> {
        let len = self.u32()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.i32()?);
        }
        Ok(out)
    }

    fn freq_table(&mut self) -> Result<Vec<(u8, u32)>, Error> {
        let len = self.u32()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            self.need(1)?;
            let sym = self.buf[self.pos];
            self.pos += 1;
            let freq = self.u32()?;
            out.push((sym, freq));
        }
        Ok(out)
    }
}

fn write_mbe(out: &mut Vec<u8>, e: &mbe::Encoded) {
    put_i32(out, e.min);
    put_u32(out, e.bits_per_sample);
    put_u32(out, e.sample_count as u32);
    put_bytes(out, &e.bitstream);
}

fn read_mbe(r: &mut Reader) -> Result<mbe::Encoded, Error> {
    Ok(mbe::Encoded {
        min: r.i32()?,
        bits_per_sample: r.u32()?,
        sample_count: r.u32()? as usize,
        bitstream: r.bytes()?,
    })
}

fn write_red(out: &mut Vec<u8>, e: &red::Encoded) {
    put_u32(out, e.sample_count as u32);
    put_freq_table(out, &e.frequencies);
    put_bytes(out, &e.bitstream);
    put_i32_slice(out, &e.literals);
}

fn read_red(r: &mut Reader) -> Result<red::Encoded, Error> {
    Ok(red::Encoded {
        sample_count: r.u32()? as usize,
        frequencies: r.freq_table()?,
        bitstream: r.bytes()?,
        literals: r.i32_vec()?,
    })
}

fn write_pred(out: &mut Vec<u8>, e: &pred::Encoded) {
    put_u32(out, e.sample_count as u32);
    for table in &e.tables {
        put_freq_table(out, table);
    }
    put_bytes(out, &e.bitstream);
    put_i32_slice(out, &e.literals);
}

fn read_pred(r: &mut Reader) -> Result<pred::Encoded, Error> {
    let sample_count = r.u32()? as usize;
    let tables = [r.freq_table()?, r.freq_table()?, r.freq_table()?];
    Ok(pred::Encoded {
        sample_count,
        tables,
        bitstream: r.bytes()?,
        literals: r.i32_vec()?,
    })
}

fn write_vds(out: &mut Vec<u8>, e: &vds::Encoded) {
    put_u32(out, e.sample_count as u32);
    out.push(e.lossless as u8);
    write_mbe(out, &e.index_deltas);
    write_red(out, &e.amplitudes);
}

fn read_vds(r: &mut Reader) -> Result<vds::Encoded, Error> {
    let sample_count = r.u32()? as usize;
    r.need(1)?;
    let lossless = r.buf[r.pos] != 0;
    r.pos += 1;
    let index_deltas = read_mbe(r)?;
    let amplitudes = read_red(r)?;
    Ok(vds::Encoded {
        sample_count,
        index_deltas,
        amplitudes,
        lossless,
    })
}

/// Serializes a payload (version tag folded in where the algorithm has
/// more than one, e.g. RED1 vs RED2) to the bytes that belong in a block's
/// model region. The algorithm itself is not re-stored here: a block's
/// `block_flags` already names it, and [`read_payload`] takes that as a
/// parameter so the two always agree.
pub fn write_payload(payload: &EncodedPayload) -> Vec<u8> {
    let mut out = Vec::new();
    match payload {
        EncodedPayload::Mbe(e) => write_mbe(&mut out, e),
        EncodedPayload::Red(e, _) => write_red(&mut out, e),
        EncodedPayload::Pred(e, _) => write_pred(&mut out, e),
        EncodedPayload::Vds(e) => write_vds(&mut out, e),
    }
    out
}

pub fn read_payload(bytes: &[u8], algorithm: Algorithm) -> Result<EncodedPayload, Error> {
    let mut r = Reader::new(bytes);
    Ok(match algorithm {
        Algorithm::Mbe => EncodedPayload::Mbe(read_mbe(&mut r)?),
        Algorithm::Red1 => EncodedPayload::Red(read_red(&mut r)?, red::Version::Red1),
        Algorithm::Red2 => EncodedPayload::Red(read_red(&mut r)?, red::Version::Red2),
        Algorithm::Pred1 => EncodedPayload::Pred(read_pred(&mut r)?, pred::Version::Pred1),
        Algorithm::Pred2 => EncodedPayload::Pred(read_pred(&mut r)?, pred::Version::Pred2),
        Algorithm::Vds => EncodedPayload::Vds(read_vds(&mut r)?),
    })
}

/// Serializes a block's parameter region (spec §4.4 step 5): only the
/// fields named by `parameter_flags` are present, in flag-declaration
/// order, each as a plain `f64`.
pub fn write_parameters(params: &Parameters) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(v) = params.intercept {
        put_f64(&mut out, v);
    }
    if let Some(v) = params.gradient {
        put_f64(&mut out, v);
    }
    if let Some(v) = params.amplitude_scale {
        put_f64(&mut out, v);
    }
    if let Some(v) = params.frequency_scale {
        put_f64(&mut out, v);
    }
    out
}

pub fn read_parameters(
    bytes: &[u8],
    flags: crate::block::ParameterFlags,
) -> Result<Parameters, Error> {
    use crate::block::ParameterFlags as PF;
    let mut r = Reader::new(bytes);
    Ok(Parameters {
        intercept: flags.contains(PF::INTERCEPT).then(|| r.f64()).transpose()?,
        gradient: flags.contains(PF::GRADIENT).then(|| r.f64()).transpose()?,
        amplitude_scale: flags
            .contains(PF::AMPLITUDE_SCALE)
            .then(|| r.f64())
            .transpose()?,
        frequency_scale: flags
            .contains(PF::FREQUENCY_SCALE)
            .then(|| r.f64())
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncodeOptions;

    #[test]
    fn mbe_payload_roundtrips_through_wire() {
        let samples = vec![10, 12, 11, 9, 8];
        let opts = EncodeOptions {
            algorithm: Algorithm::Mbe,
            detrend: false,
            fall_through_to_best_encoding: false,
            ..Default::default()
        };
        let (payload, _, _) = super::super::encode_block(&samples, &opts).unwrap();
        let bytes = write_payload(&payload);
        let back = read_payload(&bytes, Algorithm::Mbe).unwrap();
        let decoded = mbe::decode(match &back {
            EncodedPayload::Mbe(e) => e,
            _ => panic!("expected Mbe"),
        })
        .unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn red2_payload_roundtrips_through_wire() {
        let samples = vec![10, 12, 11, 9, 8, 50_000, -3];
        let opts = EncodeOptions {
            algorithm: Algorithm::Red2,
            detrend: false,
            fall_through_to_best_encoding: false,
            ..Default::default()
        };
        let (payload, params, level) = super::super::encode_block(&samples, &opts).unwrap();
        let bytes = write_payload(&payload);
        let back = read_payload(&bytes, Algorithm::Red2).unwrap();
        let decoded = super::super::decode_block(&back, &params, level).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn parameters_roundtrip_only_present_fields() {
        let params = Parameters {
            intercept: Some(1.5),
            gradient: None,
            amplitude_scale: Some(2.0),
            frequency_scale: None,
        };
        let bytes = write_parameters(&params);
        let back = read_parameters(&bytes, params.flags()).unwrap();
        assert_eq!(Some(1.5), back.intercept);
        assert_eq!(None, back.gradient);
        assert_eq!(Some(2.0), back.amplitude_scale);
    }
}
