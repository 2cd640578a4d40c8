//! # Mirra Serde
//! Bit-granular serialization shared by the mirra replication crates.
//!
//! Everything here is cursor-based: `BitWriter`/`BitReader` pack bits
//! least-significant-first within each byte, and every read or write that
//! would run off the end of the buffer reports an error instead of
//! panicking, so a full bitstream surfaces as a dropped payload.

mod bit_reader;
mod bit_writer;
mod error;
mod half;
mod quantize;
mod serde;

pub use bit_reader::BitReader;
pub use bit_writer::{BitWrite, BitWriter, MTU_SIZE_BITS, MTU_SIZE_BYTES};
pub use error::SerdeErr;
pub use half::{f16_bits_to_f32, f32_to_f16_bits, F16_MAX};
pub use quantize::Quantizer;
pub use serde::Serde;
