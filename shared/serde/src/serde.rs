use crate::{bit_reader::BitReader, bit_writer::BitWrite, error::SerdeErr};

/// A type that knows how to serialize itself to and from a bitstream.
pub trait Serde: Sized + Clone + PartialEq {
    /// Serialize into the given writer.
    fn ser(&self, writer: &mut dyn BitWrite) -> Result<(), SerdeErr>;

    /// Deserialize from the given reader.
    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr>;

    /// Exact number of bits `ser` will emit for this value.
    fn bit_length(&self) -> u32;
}

impl Serde for bool {
    fn ser(&self, writer: &mut dyn BitWrite) -> Result<(), SerdeErr> {
        writer.write_bit(*self)
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_bit()
    }

    fn bit_length(&self) -> u32 {
        1
    }
}

macro_rules! impl_serde_unsigned {
    ($type:ty, $bits:expr) => {
        impl Serde for $type {
            fn ser(&self, writer: &mut dyn BitWrite) -> Result<(), SerdeErr> {
                writer.write_bits(*self as u64, $bits)
            }

            fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
                Ok(reader.read_bits($bits)? as $type)
            }

            fn bit_length(&self) -> u32 {
                $bits
            }
        }
    };
}

impl_serde_unsigned!(u8, 8);
impl_serde_unsigned!(u16, 16);
impl_serde_unsigned!(u32, 32);
impl_serde_unsigned!(u64, 64);

macro_rules! impl_serde_signed {
    ($type:ty, $unsigned:ty, $bits:expr) => {
        impl Serde for $type {
            fn ser(&self, writer: &mut dyn BitWrite) -> Result<(), SerdeErr> {
                writer.write_bits(*self as $unsigned as u64, $bits)
            }

            fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
                Ok(reader.read_bits($bits)? as $unsigned as $type)
            }

            fn bit_length(&self) -> u32 {
                $bits
            }
        }
    };
}

impl_serde_signed!(i8, u8, 8);
impl_serde_signed!(i16, u16, 16);
impl_serde_signed!(i32, u32, 32);
impl_serde_signed!(i64, u64, 64);

impl Serde for f32 {
    fn ser(&self, writer: &mut dyn BitWrite) -> Result<(), SerdeErr> {
        writer.write_bits(self.to_bits() as u64, 32)
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(f32::from_bits(reader.read_bits(32)? as u32))
    }

    fn bit_length(&self) -> u32 {
        32
    }
}

impl Serde for f64 {
    fn ser(&self, writer: &mut dyn BitWrite) -> Result<(), SerdeErr> {
        writer.write_bits(self.to_bits(), 64)
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(f64::from_bits(reader.read_bits(64)?))
    }

    fn bit_length(&self) -> u32 {
        64
    }
}

/// Strings are u16-length-prefixed UTF-8. Payloads longer than `u16::MAX`
/// bytes cannot be represented and fail the write.
impl Serde for String {
    fn ser(&self, writer: &mut dyn BitWrite) -> Result<(), SerdeErr> {
        let bytes = self.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(SerdeErr::WriteOverflow);
        }
        (bytes.len() as u16).ser(writer)?;
        for byte in bytes {
            writer.write_byte(*byte)?;
        }
        Ok(())
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let length = u16::de(reader)? as usize;
        let mut bytes = Vec::with_capacity(length);
        for _ in 0..length {
            bytes.push(reader.read_byte()?);
        }
        String::from_utf8(bytes).map_err(|_| SerdeErr::Malformed)
    }

    fn bit_length(&self) -> u32 {
        16 + (self.len() as u32) * 8
    }
}
