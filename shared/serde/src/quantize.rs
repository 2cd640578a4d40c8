//! Range/quantum codes for fixed-point wire encoding.

use crate::{bit_reader::BitReader, bit_writer::BitWrite, error::SerdeErr};

/// Encodes values in `[min, max]` as unsigned multiples of `quantum`,
/// packed into the smallest number of bits that can represent
/// `(max - min) / quantum`.
///
/// Encoding clamps into range first; decoding is `min + code * quantum`, so
/// a round trip is within half a quantum of the original value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    min: f64,
    quantum: f64,
    max_code: u64,
    bits: u32,
}

impl Quantizer {
    /// Builds a quantizer for the given range and quantum.
    ///
    /// The quantum must be positive and the range non-inverted; callers
    /// normalize both before reaching this point.
    pub fn new(min: f64, max: f64, quantum: f64) -> Self {
        debug_assert!(quantum > 0.0);
        debug_assert!(min <= max);
        let span = (max - min).max(0.0);
        let max_code = (span / quantum).round() as u64;
        let bits = (64 - max_code.leading_zeros()).max(1);
        Self {
            min,
            quantum,
            max_code,
            bits,
        }
    }

    /// Width of one codeword in bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn encode(&self, value: f64) -> u64 {
        let offset = (value - self.min) / self.quantum;
        if offset <= 0.0 {
            return 0;
        }
        (offset.round() as u64).min(self.max_code)
    }

    pub fn decode(&self, code: u64) -> f64 {
        self.min + code as f64 * self.quantum
    }

    pub fn ser(&self, value: f64, writer: &mut dyn BitWrite) -> Result<(), SerdeErr> {
        writer.write_bits(self.encode(value), self.bits)
    }

    pub fn de(&self, reader: &mut BitReader) -> Result<f64, SerdeErr> {
        Ok(self.decode(reader.read_bits(self.bits)?))
    }
}
