//! The closed set of replicable element kinds and their runtime descriptors.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Runtime tag identifying an element type.
///
/// Vector kinds are i32/f32 forms; quaternions and matrices are f32. `Bool`
/// is arithmetic but never takes the per-member replication path (a single
/// flag bit has nothing to gain from member gating).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Unknown,
    Bool,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    IntVec2,
    IntVec3,
    IntVec4,
    Vec2,
    Vec3,
    Vec4,
    Quat,
    Mat2,
    Mat3,
    Mat4,
    Str,
}

/// Every kind, in stable-id order.
pub const ALL_KINDS: [ValueKind; 24] = [
    ValueKind::Unknown,
    ValueKind::Bool,
    ValueKind::Char,
    ValueKind::Int8,
    ValueKind::Int16,
    ValueKind::Int32,
    ValueKind::Int64,
    ValueKind::Uint8,
    ValueKind::Uint16,
    ValueKind::Uint32,
    ValueKind::Uint64,
    ValueKind::Float,
    ValueKind::Double,
    ValueKind::IntVec2,
    ValueKind::IntVec3,
    ValueKind::IntVec4,
    ValueKind::Vec2,
    ValueKind::Vec3,
    ValueKind::Vec4,
    ValueKind::Quat,
    ValueKind::Mat2,
    ValueKind::Mat3,
    ValueKind::Mat4,
    ValueKind::Str,
];

/// Runtime record describing one element kind.
#[derive(Debug, Clone, Copy)]
pub struct KindInfo {
    /// Process-wide runtime id, minted at registry initialization.
    pub runtime_id: u32,
    pub kind: ValueKind,
    pub name: &'static str,
    /// Inline payload size; zero for heap-backed and sentinel kinds.
    pub size_bytes: usize,
    pub is_arithmetic: bool,
    pub is_integral: bool,
    pub is_floating_point: bool,
    pub is_multi_primitive: bool,
    /// Scalar kind of each primitive member (`Unknown` for non-arithmetic).
    pub primitive_kind: ValueKind,
    pub primitive_count: usize,
}

pub struct KindRegistry {
    infos: [KindInfo; ALL_KINDS.len()],
}

static REGISTRY: OnceLock<KindRegistry> = OnceLock::new();
static NEXT_RUNTIME_ID: AtomicU32 = AtomicU32::new(0);

fn registry() -> &'static KindRegistry {
    REGISTRY.get_or_init(KindRegistry::build)
}

impl KindRegistry {
    pub fn get() -> &'static KindRegistry {
        registry()
    }

    fn build() -> Self {
        let infos = ALL_KINDS.map(|kind| {
            let (name, prim, count, size) = kind.layout();
            KindInfo {
                runtime_id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                name,
                size_bytes: size,
                is_arithmetic: kind.is_arithmetic(),
                is_integral: kind.is_integral(),
                is_floating_point: kind.is_floating_point(),
                is_multi_primitive: count > 1,
                primitive_kind: prim,
                primitive_count: count,
            }
        });
        Self { infos }
    }

    pub fn info(&self, kind: ValueKind) -> &KindInfo {
        &self.infos[kind as usize]
    }

    pub fn by_runtime_id(&self, runtime_id: u32) -> Option<ValueKind> {
        self.infos
            .iter()
            .find(|info| info.runtime_id == runtime_id)
            .map(|info| info.kind)
    }

    pub fn by_name(&self, name: &str) -> Option<ValueKind> {
        self.infos
            .iter()
            .find(|info| info.name == name)
            .map(|info| info.kind)
    }
}

impl ValueKind {
    /// Name, primitive-member kind and count, and inline size.
    fn layout(self) -> (&'static str, ValueKind, usize, usize) {
        use ValueKind::*;
        match self {
            Unknown => ("Unknown", Unknown, 0, 0),
            Bool => ("Bool", Bool, 1, 1),
            Char => ("Char", Char, 1, 1),
            Int8 => ("Int8", Int8, 1, 1),
            Int16 => ("Int16", Int16, 1, 2),
            Int32 => ("Int32", Int32, 1, 4),
            Int64 => ("Int64", Int64, 1, 8),
            Uint8 => ("Uint8", Uint8, 1, 1),
            Uint16 => ("Uint16", Uint16, 1, 2),
            Uint32 => ("Uint32", Uint32, 1, 4),
            Uint64 => ("Uint64", Uint64, 1, 8),
            Float => ("Float", Float, 1, 4),
            Double => ("Double", Double, 1, 8),
            IntVec2 => ("IntVec2", Int32, 2, 8),
            IntVec3 => ("IntVec3", Int32, 3, 12),
            IntVec4 => ("IntVec4", Int32, 4, 16),
            Vec2 => ("Vec2", Float, 2, 8),
            Vec3 => ("Vec3", Float, 3, 12),
            Vec4 => ("Vec4", Float, 4, 16),
            Quat => ("Quat", Float, 4, 16),
            Mat2 => ("Mat2", Float, 4, 16),
            Mat3 => ("Mat3", Float, 9, 36),
            Mat4 => ("Mat4", Float, 16, 64),
            Str => ("Str", Unknown, 0, 0),
        }
    }

    pub fn info(self) -> &'static KindInfo {
        registry().info(self)
    }

    pub fn name(self) -> &'static str {
        self.layout().0
    }

    pub fn from_name(name: &str) -> Option<Self> {
        registry().by_name(name)
    }

    pub fn is_arithmetic(self) -> bool {
        !matches!(self, ValueKind::Unknown | ValueKind::Str)
    }

    pub fn is_integral(self) -> bool {
        use ValueKind::*;
        matches!(
            self,
            Bool | Char
                | Int8
                | Int16
                | Int32
                | Int64
                | Uint8
                | Uint16
                | Uint32
                | Uint64
                | IntVec2
                | IntVec3
                | IntVec4
        )
    }

    pub fn is_floating_point(self) -> bool {
        use ValueKind::*;
        matches!(
            self,
            Float | Double | Vec2 | Vec3 | Vec4 | Quat | Mat2 | Mat3 | Mat4
        )
    }

    pub fn is_multi_primitive(self) -> bool {
        self.primitive_count() > 1
    }

    /// Scalar kind of each primitive member.
    pub fn primitive_kind(self) -> ValueKind {
        self.layout().1
    }

    pub fn primitive_count(self) -> usize {
        self.layout().2
    }

    pub fn size_bytes(self) -> usize {
        self.layout().3
    }

    /// Whether replication treats this kind member-by-member (delta
    /// thresholds, change bits, quantization, convergence).
    pub fn is_per_member(self) -> bool {
        self.is_arithmetic() && self != ValueKind::Bool
    }

    /// Whether a received-value curve can be maintained for this kind.
    /// The curve set holds at most four member curves.
    pub fn supports_interpolation(self) -> bool {
        self.is_per_member() && self.primitive_count() <= 4
    }
}

impl Serialize for ValueKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ValueKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        ValueKind::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown value kind `{name}`")))
    }
}
