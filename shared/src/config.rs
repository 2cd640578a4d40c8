//! Persisted property-type configuration.
//!
//! A name-tagged record mirroring every §-configurable knob of a
//! [`PropertyType`], loadable from TOML. Typed fields written under one
//! kind load cleanly under another: they are converted member-by-member
//! into the target kind, with the target's defaults filling the gaps.

use std::fmt;
use std::path::Path;

use serde::de::{SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::curve::CurveType;
use crate::property::{PropertyError, PropertyType};
use crate::types::{seconds_to_time_ms, time_ms_to_seconds, SerializationMode};
use crate::value::{Scalar, Value, ValueKind};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("configuration rejected: {0}")]
    Rejected(#[from] PropertyError),
}

/// The on-disk property-type record. Missing fields take the engine
/// defaults; typed fields may be written under any arithmetic kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PropertyTypeConfig {
    pub basic_net_type: ValueKind,
    pub use_delta_threshold: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_threshold: Option<Value>,
    pub serialization_mode: SerializationMode,
    pub use_half_floats: bool,
    pub use_quantization: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization_range_min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization_range_max: Option<Value>,
    pub use_interpolation: bool,
    /// Accepted for forward compatibility; loading always forces Linear.
    pub interpolation_curve: CurveType,
    /// Seconds.
    pub sample_time_offset: f32,
    /// Seconds.
    pub extrapolation_limit: f32,
    pub use_convergence: bool,
    pub event_on_convergence_state_change: bool,
    pub active_convergence_weight: f32,
    /// Seconds.
    pub resting_convergence_duration: f32,
    /// Frames.
    pub convergence_interval: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snap_threshold: Option<Value>,
}

impl Default for PropertyTypeConfig {
    fn default() -> Self {
        Self {
            basic_net_type: ValueKind::Float,
            use_delta_threshold: false,
            delta_threshold: None,
            serialization_mode: SerializationMode::All,
            use_half_floats: false,
            use_quantization: false,
            quantization_range_min: None,
            quantization_range_max: None,
            use_interpolation: false,
            interpolation_curve: CurveType::Linear,
            sample_time_offset: 0.1,
            extrapolation_limit: 1.0,
            use_convergence: false,
            event_on_convergence_state_change: false,
            active_convergence_weight: 0.1,
            resting_convergence_duration: 0.05,
            convergence_interval: 1,
            snap_threshold: None,
        }
    }
}

/// Per-kind defaults for the typed fields.
fn default_delta_threshold(kind: ValueKind) -> Value {
    Value::splat(kind, Scalar::Float(1.0))
}

fn default_quantization_range_min(kind: ValueKind) -> Value {
    Value::splat(kind, Scalar::Float(-1.0))
}

fn default_quantization_range_max(kind: ValueKind) -> Value {
    Value::splat(kind, Scalar::Float(1.0))
}

fn default_snap_threshold(kind: ValueKind) -> Value {
    Value::splat(kind, Scalar::Float(10.0))
}

/// Converts a loaded typed field into `kind`, starting from that kind's
/// default so members the source cannot fill stay at their default.
fn translate(field: &Option<Value>, kind: ValueKind, default: Value) -> Value {
    let mut result = default;
    if let Some(value) = field {
        value.convert_into(&mut result);
    }
    result
}

impl PropertyTypeConfig {
    /// Loads a record from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&content)?)
    }

    /// Parses a record from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(content)?;
        // Non-linear bases are declared but not loadable.
        config.interpolation_curve = CurveType::Linear;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Applies this record to an inactive property type, converting typed
    /// fields into the type's kind. No-op for non-arithmetic kinds on
    /// either side (their replication has no tunable settings).
    pub fn apply_to(&self, property_type: &PropertyType) -> Result<(), ConfigError> {
        let kind = property_type.kind();
        if !self.basic_net_type.is_per_member() || !kind.is_per_member() {
            return Ok(());
        }

        if !property_type.is_valid() {
            let delta_threshold =
                translate(&self.delta_threshold, kind, default_delta_threshold(kind));
            let range_min = translate(
                &self.quantization_range_min,
                kind,
                default_quantization_range_min(kind),
            );
            let range_max = translate(
                &self.quantization_range_max,
                kind,
                default_quantization_range_max(kind),
            );
            let snap_threshold =
                translate(&self.snap_threshold, kind, default_snap_threshold(kind));

            property_type.set_delta_threshold(delta_threshold)?;
            property_type.set_use_delta_threshold(self.use_delta_threshold)?;
            property_type.set_serialization_mode(self.serialization_mode)?;
            if kind.is_floating_point() {
                property_type.set_use_half_floats(self.use_half_floats)?;
            }
            property_type.set_use_quantization(self.use_quantization)?;
            property_type.set_quantization_range_min(range_min)?;
            property_type.set_quantization_range_max(range_max)?;
            if kind.supports_interpolation() {
                property_type.set_use_interpolation(self.use_interpolation)?;
            }
            property_type.set_interpolation_curve(self.interpolation_curve)?;
            property_type
                .set_sample_time_offset(seconds_to_time_ms(self.sample_time_offset))?;
            property_type
                .set_extrapolation_limit(seconds_to_time_ms(self.extrapolation_limit))?;
            property_type.set_use_convergence(self.use_convergence)?;
            property_type
                .set_active_convergence_weight(self.active_convergence_weight)?;
            property_type.set_resting_convergence_duration(seconds_to_time_ms(
                self.resting_convergence_duration,
            ))?;
            property_type.set_convergence_interval(self.convergence_interval)?;
            property_type.set_snap_threshold(snap_threshold)?;
        }

        property_type
            .set_notify_on_convergence_state_change(self.event_on_convergence_state_change);
        Ok(())
    }

    /// Captures a property type's current configuration into a record.
    pub fn capture_from(property_type: &PropertyType) -> Self {
        fn typed(value: Value) -> Option<Value> {
            value.is_not_empty().then_some(value)
        }
        Self {
            basic_net_type: property_type.kind(),
            use_delta_threshold: property_type.use_delta_threshold(),
            delta_threshold: typed(property_type.delta_threshold()),
            serialization_mode: property_type.serialization_mode(),
            use_half_floats: property_type.use_half_floats(),
            use_quantization: property_type.use_quantization(),
            quantization_range_min: typed(property_type.quantization_range_min()),
            quantization_range_max: typed(property_type.quantization_range_max()),
            use_interpolation: property_type.use_interpolation(),
            interpolation_curve: property_type.interpolation_curve(),
            sample_time_offset: time_ms_to_seconds(property_type.sample_time_offset()),
            extrapolation_limit: time_ms_to_seconds(property_type.extrapolation_limit()),
            use_convergence: property_type.use_convergence(),
            event_on_convergence_state_change: property_type
                .notify_on_convergence_state_change(),
            active_convergence_weight: property_type.active_convergence_weight(),
            resting_convergence_duration: time_ms_to_seconds(
                property_type.resting_convergence_duration(),
            ),
            convergence_interval: property_type.convergence_interval(),
            snap_threshold: typed(property_type.snap_threshold()),
        }
    }
}

impl Serialize for SerializationMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SerializationMode::All => serializer.serialize_str("All"),
            SerializationMode::Changed => serializer.serialize_str("Changed"),
        }
    }
}

impl<'de> Deserialize<'de> for SerializationMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        match name.as_str() {
            "All" => Ok(SerializationMode::All),
            "Changed" => Ok(SerializationMode::Changed),
            other => Err(serde::de::Error::custom(format!(
                "unknown serialization mode `{other}`"
            ))),
        }
    }
}

// Typed config values are written in their natural TOML shape: booleans,
// integers, floats, strings, or arrays of numbers. The kind is recovered
// from the shape; a mismatch against the property type is resolved by
// member conversion at apply time.

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        fn seq_i<S: Serializer>(serializer: S, values: &[i32]) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter())
        }
        fn seq_f<S: Serializer>(serializer: S, values: &[f32]) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter())
        }
        match self {
            Value::Empty => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Char(v) => serializer.serialize_i64(*v as i64),
            Value::Int8(v) => serializer.serialize_i64(*v as i64),
            Value::Int16(v) => serializer.serialize_i64(*v as i64),
            Value::Int32(v) => serializer.serialize_i64(*v as i64),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::Uint8(v) => serializer.serialize_i64(*v as i64),
            Value::Uint16(v) => serializer.serialize_i64(*v as i64),
            Value::Uint32(v) => serializer.serialize_i64(*v as i64),
            Value::Uint64(v) => serializer.serialize_u64(*v),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::IntVec2(a) => seq_i(serializer, a),
            Value::IntVec3(a) => seq_i(serializer, a),
            Value::IntVec4(a) => seq_i(serializer, a),
            Value::Vec2(a) => seq_f(serializer, a),
            Value::Vec3(a) => seq_f(serializer, a),
            Value::Vec4(a) => seq_f(serializer, a),
            Value::Quat(a) => seq_f(serializer, a),
            Value::Mat2(a) => seq_f(serializer, a),
            Value::Mat3(a) => seq_f(serializer, a),
            Value::Mat4(a) => seq_f(serializer, a),
            Value::Str(v) => serializer.serialize_str(v),
        }
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NumberVisitor;
        impl Visitor<'_> for NumberVisitor {
            type Value = Number;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a number")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Number, E> {
                Ok(Number::Int(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Number, E> {
                i64::try_from(v)
                    .map(Number::Int)
                    .map_err(|_| E::custom("integer out of range"))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Number, E> {
                Ok(Number::Float(v))
            }
        }
        deserializer.deserialize_any(NumberVisitor)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;
        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a boolean, number, string, or array of numbers")
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Int64(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Value, E> {
                Ok(match i64::try_from(v) {
                    Ok(signed) => Value::Int64(signed),
                    Err(_) => Value::Uint64(v),
                })
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Double(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Str(v.to_owned()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                let mut numbers: Vec<Number> = Vec::new();
                while let Some(number) = seq.next_element::<Number>()? {
                    numbers.push(number);
                }
                let all_integral = numbers.iter().all(|n| matches!(n, Number::Int(_)));
                let kind = match (numbers.len(), all_integral) {
                    (2, true) => ValueKind::IntVec2,
                    (3, true) => ValueKind::IntVec3,
                    (4, true) => ValueKind::IntVec4,
                    (2, false) => ValueKind::Vec2,
                    (3, false) => ValueKind::Vec3,
                    (4, false) => ValueKind::Vec4,
                    (9, _) => ValueKind::Mat3,
                    (16, _) => ValueKind::Mat4,
                    (len, _) => {
                        return Err(serde::de::Error::custom(format!(
                            "array of {len} numbers is not a replicable value"
                        )))
                    }
                };
                let mut value = Value::default_of(kind);
                for (i, number) in numbers.iter().enumerate() {
                    let member = match number {
                        Number::Int(v) => Scalar::Int(*v as i128),
                        Number::Float(v) => Scalar::Float(*v),
                    };
                    value.set_member(i, member);
                }
                Ok(value)
            }
        }
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_engine_defaults() {
        let config = PropertyTypeConfig::default();
        assert_eq!(config.basic_net_type, ValueKind::Float);
        assert_eq!(config.serialization_mode, SerializationMode::All);
        assert_eq!(config.sample_time_offset, 0.1);
        assert_eq!(config.extrapolation_limit, 1.0);
        assert_eq!(config.active_convergence_weight, 0.1);
        assert_eq!(config.resting_convergence_duration, 0.05);
        assert_eq!(config.convergence_interval, 1);
    }

    #[test]
    fn parses_a_full_record() {
        let config = PropertyTypeConfig::from_toml(
            r#"
            BasicNetType = "Vec3"
            UseDeltaThreshold = true
            DeltaThreshold = [0.1, 0.1, 0.1]
            SerializationMode = "Changed"
            UseQuantization = true
            QuantizationRangeMin = [-100.0, -100.0, -100.0]
            QuantizationRangeMax = [100.0, 100.0, 100.0]
            UseInterpolation = true
            InterpolationCurve = "CatmullRom"
            SampleTimeOffset = 0.2
            ExtrapolationLimit = 0.5
            UseConvergence = true
            EventOnConvergenceStateChange = true
            ActiveConvergenceWeight = 0.25
            RestingConvergenceDuration = 0.1
            ConvergenceInterval = 4
            SnapThreshold = [5.0, 5.0, 5.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.basic_net_type, ValueKind::Vec3);
        assert!(config.use_quantization);
        assert_eq!(config.delta_threshold, Some(Value::Vec3([0.1, 0.1, 0.1])));
        assert_eq!(config.convergence_interval, 4);
        // Declared curve types still load as Linear.
        assert_eq!(config.interpolation_curve, CurveType::Linear);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config = PropertyTypeConfig::from_toml("BasicNetType = \"Float\"").unwrap();
        assert!(!config.use_delta_threshold);
        assert_eq!(config.sample_time_offset, 0.1);
        assert_eq!(config.delta_threshold, None);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(PropertyTypeConfig::from_toml("BasicNetType = \"Telepathy\"").is_err());
    }

    #[test]
    fn applies_with_kind_conversion() {
        // Record written for a scalar float, applied to a Vec3 type: the
        // scalar lands in member 0, remaining members keep their defaults.
        let config = PropertyTypeConfig::from_toml(
            r#"
            BasicNetType = "Float"
            UseDeltaThreshold = true
            DeltaThreshold = 0.5
            UseConvergence = true
            SnapThreshold = 20.0
            "#,
        )
        .unwrap();
        let property_type = PropertyType::new("position", ValueKind::Vec3);
        config.apply_to(&property_type).unwrap();
        assert!(property_type.use_delta_threshold());
        assert_eq!(
            property_type.delta_threshold(),
            Value::Vec3([0.5, 1.0, 1.0])
        );
        assert_eq!(
            property_type.snap_threshold(),
            Value::Vec3([20.0, 10.0, 10.0])
        );
        assert!(property_type.use_convergence());
    }

    #[test]
    fn apply_is_a_no_op_for_non_arithmetic_kinds() {
        let config = PropertyTypeConfig {
            basic_net_type: ValueKind::Float,
            use_delta_threshold: true,
            ..Default::default()
        };
        let property_type = PropertyType::new("label", ValueKind::Str);
        config.apply_to(&property_type).unwrap();
        assert!(!property_type.use_delta_threshold());
    }

    #[test]
    fn capture_round_trips_through_toml() {
        let property_type = PropertyType::new("health", ValueKind::Float);
        property_type.set_use_delta_threshold(true).unwrap();
        property_type.set_delta_threshold(Value::Float(0.25)).unwrap();
        property_type.set_use_convergence(true).unwrap();
        property_type.set_convergence_interval(7).unwrap();

        let captured = PropertyTypeConfig::capture_from(&property_type);
        let text = captured.to_toml().unwrap();
        let reloaded = PropertyTypeConfig::from_toml(&text).unwrap();

        let restored = PropertyType::new("health", ValueKind::Float);
        reloaded.apply_to(&restored).unwrap();
        assert!(restored.use_delta_threshold());
        assert_eq!(restored.delta_threshold(), Value::Float(0.25));
        assert!(restored.use_convergence());
        assert_eq!(restored.convergence_interval(), 7);
    }

    #[test]
    fn quantization_coupling_survives_apply() {
        let config = PropertyTypeConfig::from_toml(
            r#"
            BasicNetType = "Float"
            UseQuantization = true
            QuantizationRangeMin = -1.0
            QuantizationRangeMax = 1.0
            DeltaThreshold = 0.01
            "#,
        )
        .unwrap();
        let property_type = PropertyType::new("angle", ValueKind::Float);
        config.apply_to(&property_type).unwrap();
        assert!(property_type.use_quantization());
        assert!(property_type.use_delta_threshold());
        assert!(!property_type.use_half_floats());
        assert_eq!(property_type.quantization_range_min(), Value::Float(-1.0));
        assert_eq!(property_type.quantization_range_max(), Value::Float(1.0));
    }
}
