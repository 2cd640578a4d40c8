//! The typed value replicated by the engine.

mod kind;
mod scalar;

pub use kind::{KindInfo, KindRegistry, ValueKind, ALL_KINDS};
pub use scalar::{inverse_lerp_clamped, Scalar};

use std::fmt;
use std::hash::{Hash, Hasher};

use mirra_serde::{BitReader, BitWrite, Serde, SerdeErr};

/// A tagged union over the closed kind set.
///
/// `Empty` is the sentinel for "no value": user getters return it when a
/// value is unreadable, and engine operations on it no-op per the error
/// policy. Arithmetic variants store their members inline; strings own
/// their bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Bool(bool),
    Char(u8),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    IntVec2([i32; 2]),
    IntVec3([i32; 3]),
    IntVec4([i32; 4]),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Quat([f32; 4]),
    Mat2([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Empty => ValueKind::Unknown,
            Value::Bool(_) => ValueKind::Bool,
            Value::Char(_) => ValueKind::Char,
            Value::Int8(_) => ValueKind::Int8,
            Value::Int16(_) => ValueKind::Int16,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Uint8(_) => ValueKind::Uint8,
            Value::Uint16(_) => ValueKind::Uint16,
            Value::Uint32(_) => ValueKind::Uint32,
            Value::Uint64(_) => ValueKind::Uint64,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::IntVec2(_) => ValueKind::IntVec2,
            Value::IntVec3(_) => ValueKind::IntVec3,
            Value::IntVec4(_) => ValueKind::IntVec4,
            Value::Vec2(_) => ValueKind::Vec2,
            Value::Vec3(_) => ValueKind::Vec3,
            Value::Vec4(_) => ValueKind::Vec4,
            Value::Quat(_) => ValueKind::Quat,
            Value::Mat2(_) => ValueKind::Mat2,
            Value::Mat3(_) => ValueKind::Mat3,
            Value::Mat4(_) => ValueKind::Mat4,
            Value::Str(_) => ValueKind::Str,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_not_empty(&self) -> bool {
        !self.is_empty()
    }

    /// Default-constructs a value of the given kind (zeroed members, empty
    /// string). `Unknown` yields `Empty`.
    pub fn default_of(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Unknown => Value::Empty,
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Char => Value::Char(0),
            ValueKind::Int8 => Value::Int8(0),
            ValueKind::Int16 => Value::Int16(0),
            ValueKind::Int32 => Value::Int32(0),
            ValueKind::Int64 => Value::Int64(0),
            ValueKind::Uint8 => Value::Uint8(0),
            ValueKind::Uint16 => Value::Uint16(0),
            ValueKind::Uint32 => Value::Uint32(0),
            ValueKind::Uint64 => Value::Uint64(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Double => Value::Double(0.0),
            ValueKind::IntVec2 => Value::IntVec2([0; 2]),
            ValueKind::IntVec3 => Value::IntVec3([0; 3]),
            ValueKind::IntVec4 => Value::IntVec4([0; 4]),
            ValueKind::Vec2 => Value::Vec2([0.0; 2]),
            ValueKind::Vec3 => Value::Vec3([0.0; 3]),
            ValueKind::Vec4 => Value::Vec4([0.0; 4]),
            ValueKind::Quat => Value::Quat([0.0; 4]),
            ValueKind::Mat2 => Value::Mat2([0.0; 4]),
            ValueKind::Mat3 => Value::Mat3([0.0; 9]),
            ValueKind::Mat4 => Value::Mat4([0.0; 16]),
            ValueKind::Str => Value::Str(String::new()),
        }
    }

    /// Constructs a value of `kind` with every primitive member set to
    /// `scalar` (cast into the member type). Non-arithmetic kinds return
    /// the kind default.
    pub fn splat(kind: ValueKind, scalar: Scalar) -> Value {
        let mut value = Value::default_of(kind);
        for i in 0..kind.primitive_count() {
            value.set_member(i, scalar);
        }
        value
    }

    pub fn primitive_count(&self) -> usize {
        self.kind().primitive_count()
    }

    /// Reads primitive member `index`, erased to a [`Scalar`]. `None` for
    /// out-of-range indices and for kinds without member access.
    pub fn member(&self, index: usize) -> Option<Scalar> {
        fn scalar_i(values: &[i32], index: usize) -> Option<Scalar> {
            values.get(index).map(|v| Scalar::Int(*v as i128))
        }
        fn scalar_f(values: &[f32], index: usize) -> Option<Scalar> {
            values.get(index).map(|v| Scalar::Float(*v as f64))
        }
        match self {
            Value::Empty | Value::Bool(_) | Value::Str(_) => None,
            Value::Char(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Int8(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Int16(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Int32(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Int64(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Uint8(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Uint16(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Uint32(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Uint64(v) => (index == 0).then_some(Scalar::Int(*v as i128)),
            Value::Float(v) => (index == 0).then_some(Scalar::Float(*v as f64)),
            Value::Double(v) => (index == 0).then_some(Scalar::Float(*v)),
            Value::IntVec2(a) => scalar_i(a, index),
            Value::IntVec3(a) => scalar_i(a, index),
            Value::IntVec4(a) => scalar_i(a, index),
            Value::Vec2(a) => scalar_f(a, index),
            Value::Vec3(a) => scalar_f(a, index),
            Value::Vec4(a) => scalar_f(a, index),
            Value::Quat(a) => scalar_f(a, index),
            Value::Mat2(a) => scalar_f(a, index),
            Value::Mat3(a) => scalar_f(a, index),
            Value::Mat4(a) => scalar_f(a, index),
        }
    }

    /// Writes primitive member `index`, casting the scalar into the member
    /// type with primitive-cast semantics (truncate toward zero, wrap on
    /// overflow). Out-of-range indices and member-less kinds are ignored.
    pub fn set_member(&mut self, index: usize, scalar: Scalar) {
        fn store_i(values: &mut [i32], index: usize, scalar: Scalar) {
            if let Some(slot) = values.get_mut(index) {
                *slot = scalar.as_i128() as i32;
            }
        }
        fn store_f(values: &mut [f32], index: usize, scalar: Scalar) {
            if let Some(slot) = values.get_mut(index) {
                *slot = scalar.as_f64() as f32;
            }
        }
        match self {
            Value::Empty | Value::Bool(_) | Value::Str(_) => {}
            Value::Char(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as u8;
                }
            }
            Value::Int8(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as i8;
                }
            }
            Value::Int16(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as i16;
                }
            }
            Value::Int32(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as i32;
                }
            }
            Value::Int64(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as i64;
                }
            }
            Value::Uint8(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as u8;
                }
            }
            Value::Uint16(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as u16;
                }
            }
            Value::Uint32(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as u32;
                }
            }
            Value::Uint64(v) => {
                if index == 0 {
                    *v = scalar.as_i128() as u64;
                }
            }
            Value::Float(v) => {
                if index == 0 {
                    *v = scalar.as_f64() as f32;
                }
            }
            Value::Double(v) => {
                if index == 0 {
                    *v = scalar.as_f64();
                }
            }
            Value::IntVec2(a) => store_i(a, index, scalar),
            Value::IntVec3(a) => store_i(a, index, scalar),
            Value::IntVec4(a) => store_i(a, index, scalar),
            Value::Vec2(a) => store_f(a, index, scalar),
            Value::Vec3(a) => store_f(a, index, scalar),
            Value::Vec4(a) => store_f(a, index, scalar),
            Value::Quat(a) => store_f(a, index, scalar),
            Value::Mat2(a) => store_f(a, index, scalar),
            Value::Mat3(a) => store_f(a, index, scalar),
            Value::Mat4(a) => store_f(a, index, scalar),
        }
    }

    /// Converts members of `self` into `destination` member-by-member,
    /// leaving destination members past our member count untouched.
    ///
    /// Returns false (destination untouched) when either side lacks member
    /// access. Both sides keep their kinds; only member values move.
    pub fn convert_into(&self, destination: &mut Value) -> bool {
        let source_kind = self.kind();
        let destination_kind = destination.kind();
        if !source_kind.is_per_member() || !destination_kind.is_per_member() {
            return false;
        }
        let count = source_kind
            .primitive_count()
            .min(destination_kind.primitive_count());
        for i in 0..count {
            if let Some(member) = self.member(i) {
                destination.set_member(i, member);
            }
        }
        true
    }

    /// Converts this value to another arithmetic kind, defaulting members
    /// past our member count. `None` when conversion is not possible.
    pub fn convert(&self, kind: ValueKind) -> Option<Value> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        let mut destination = Value::default_of(kind);
        if self.convert_into(&mut destination) {
            Some(destination)
        } else {
            None
        }
    }

    /// Whether any primitive member of `self` is less than the matching
    /// member of `other`. False when kinds differ or lack member access.
    pub fn any_member_less_than(&self, other: &Value) -> bool {
        if self.kind() != other.kind() || !self.kind().is_per_member() {
            return false;
        }
        for i in 0..self.primitive_count() {
            match (self.member(i), other.member(i)) {
                (Some(Scalar::Int(a)), Some(Scalar::Int(b))) if a < b => return true,
                (Some(a), Some(b)) if !a.is_integral() || !b.is_integral() => {
                    if a.as_f64() < b.as_f64() {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// Normalizes every member to a positive, non-zero magnitude; used for
    /// delta and snap thresholds so change detection can never stall.
    pub fn normalize_threshold(&mut self) {
        const FLOATING_EPSILON: f64 = 1e-6;
        for i in 0..self.primitive_count() {
            if let Some(member) = self.member(i) {
                self.set_member(i, member.non_zero_abs(FLOATING_EPSILON));
            }
        }
    }

    /// Serializes the whole value: members at native width, strings
    /// length-prefixed, booleans as one bit. The kind itself is not
    /// written; both sides know it from configuration.
    pub fn ser(&self, writer: &mut dyn BitWrite) -> Result<(), SerdeErr> {
        match self {
            Value::Empty => Err(SerdeErr::Malformed),
            Value::Bool(v) => v.ser(writer),
            Value::Str(v) => v.ser(writer),
            _ => {
                let prim = self.kind().primitive_kind();
                for i in 0..self.primitive_count() {
                    let member = self.member(i).ok_or(SerdeErr::Malformed)?;
                    write_member(writer, prim, member)?;
                }
                Ok(())
            }
        }
    }

    /// Deserializes a whole value of the given kind.
    pub fn de(kind: ValueKind, reader: &mut BitReader) -> Result<Value, SerdeErr> {
        match kind {
            ValueKind::Unknown => Err(SerdeErr::Malformed),
            ValueKind::Bool => Ok(Value::Bool(bool::de(reader)?)),
            ValueKind::Str => Ok(Value::Str(String::de(reader)?)),
            _ => {
                let prim = kind.primitive_kind();
                let mut value = Value::default_of(kind);
                for i in 0..kind.primitive_count() {
                    value.set_member(i, read_member(reader, prim)?);
                }
                Ok(value)
            }
        }
    }

    /// Exact number of bits [`Value::ser`] emits for this value.
    pub fn bit_length(&self) -> u32 {
        match self {
            Value::Empty => 0,
            Value::Bool(_) => 1,
            Value::Str(v) => v.bit_length(),
            _ => {
                (self.primitive_count() * self.kind().primitive_kind().size_bytes() * 8) as u32
            }
        }
    }
}

/// Writes one primitive member at its native width.
pub(crate) fn write_member(
    writer: &mut dyn BitWrite,
    primitive_kind: ValueKind,
    member: Scalar,
) -> Result<(), SerdeErr> {
    match primitive_kind {
        ValueKind::Char | ValueKind::Uint8 => (member.as_i128() as u8).ser(writer),
        ValueKind::Int8 => (member.as_i128() as i8).ser(writer),
        ValueKind::Int16 => (member.as_i128() as i16).ser(writer),
        ValueKind::Int32 => (member.as_i128() as i32).ser(writer),
        ValueKind::Int64 => (member.as_i128() as i64).ser(writer),
        ValueKind::Uint16 => (member.as_i128() as u16).ser(writer),
        ValueKind::Uint32 => (member.as_i128() as u32).ser(writer),
        ValueKind::Uint64 => (member.as_i128() as u64).ser(writer),
        ValueKind::Float => (member.as_f64() as f32).ser(writer),
        ValueKind::Double => member.as_f64().ser(writer),
        _ => Err(SerdeErr::Malformed),
    }
}

/// Reads one primitive member at its native width.
pub(crate) fn read_member(
    reader: &mut BitReader,
    primitive_kind: ValueKind,
) -> Result<Scalar, SerdeErr> {
    let member = match primitive_kind {
        ValueKind::Char | ValueKind::Uint8 => Scalar::Int(u8::de(reader)? as i128),
        ValueKind::Int8 => Scalar::Int(i8::de(reader)? as i128),
        ValueKind::Int16 => Scalar::Int(i16::de(reader)? as i128),
        ValueKind::Int32 => Scalar::Int(i32::de(reader)? as i128),
        ValueKind::Int64 => Scalar::Int(i64::de(reader)? as i128),
        ValueKind::Uint16 => Scalar::Int(u16::de(reader)? as i128),
        ValueKind::Uint32 => Scalar::Int(u32::de(reader)? as i128),
        ValueKind::Uint64 => Scalar::Int(u64::de(reader)? as i128),
        ValueKind::Float => Scalar::Float(f32::de(reader)? as f64),
        ValueKind::Double => Scalar::Float(f64::de(reader)?),
        _ => return Err(SerdeErr::Malformed),
    };
    Ok(member)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
            write!(f, "[")?;
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{value}")?;
            }
            write!(f, "]")
        }
        match self {
            Value::Empty => write!(f, "(empty)"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{}", *v as char),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Uint8(v) => write!(f, "{v}"),
            Value::Uint16(v) => write!(f, "{v}"),
            Value::Uint32(v) => write!(f, "{v}"),
            Value::Uint64(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::IntVec2(a) => list(f, a),
            Value::IntVec3(a) => list(f, a),
            Value::IntVec4(a) => list(f, a),
            Value::Vec2(a) => list(f, a),
            Value::Vec3(a) => list(f, a),
            Value::Vec4(a) => list(f, a),
            Value::Quat(a) => list(f, a),
            Value::Mat2(a) => list(f, a),
            Value::Mat3(a) => list(f, a),
            Value::Mat4(a) => list(f, a),
            Value::Str(v) => write!(f, "{v}"),
        }
    }
}

// Hashing uses bit patterns for floating members so a Value can key a map;
// NaN payload differences hash differently, which is acceptable for the
// identity use this serves.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Empty => {}
            Value::Bool(v) => v.hash(state),
            Value::Str(v) => v.hash(state),
            _ => {
                for i in 0..self.primitive_count() {
                    match self.member(i) {
                        Some(Scalar::Int(v)) => v.hash(state),
                        Some(Scalar::Float(v)) => v.to_bits().hash(state),
                        None => {}
                    }
                }
            }
        }
    }
}
