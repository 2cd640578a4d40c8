//! # Mirra Shared
//! The replicated-property engine: keeps attribute values of distributed
//! objects coherent across peers through threshold change detection,
//! bit-level delta serialization, and time-based smoothing of the remote
//! estimate.

#![deny(unstable_features, unused_import_braces)]

pub use mirra_serde::{
    BitReader, BitWrite, BitWriter, Quantizer, Serde, SerdeErr, MTU_SIZE_BITS, MTU_SIZE_BYTES,
};

mod collaborators;
mod config;
mod curve;
mod property;
mod types;
mod value;

pub use collaborators::{PropertyChangeEvent, ReplicaChannel, Replicator};
pub use config::{ConfigError, PropertyTypeConfig};
pub use curve::{CurveType, SampleCurve};
pub use property::{
    ConvergenceState, Property, PropertyError, PropertyType, SharedValue, ValueAccess,
};
pub use types::{
    seconds_to_time_ms, time_ms_to_seconds, AuthorityMode, Direction, FrameId, ReplicationPhase,
    Role, SerializationMode, TimeMs, INVALID_TIMESTAMP, ONE_SECOND_MS,
};
pub use value::{
    inverse_lerp_clamped, KindInfo, KindRegistry, Scalar, Value, ValueKind, ALL_KINDS,
};
