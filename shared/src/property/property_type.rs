//! Shared, freeze-after-activation configuration for a family of properties,
//! plus the convergence scheduler those properties register with.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{error, warn};

use super::error::PropertyError;
use super::index::PropertyIndex;
use super::{ConvergenceState, Property, PropertyInner};
use crate::collaborators::Replicator;
use crate::curve::CurveType;
use crate::types::{AuthorityMode, FrameId, SerializationMode, TimeMs, INVALID_TIMESTAMP, ONE_SECOND_MS};
use crate::value::{Value, ValueKind};

/// Immutable-after-activation configuration shared by every property of one
/// kind/profile, and owner of the frame-striped convergence indices.
///
/// Cheap to clone; clones share the same underlying record.
#[derive(Clone)]
pub struct PropertyType {
    inner: Arc<RwLock<PropertyTypeInner>>,
}

impl std::fmt::Debug for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyType").field("name", &self.name()).finish()
    }
}

// Property types compare and order by name, the identity they are looked
// up under within a replicator.
impl PartialEq for PropertyType {
    fn eq(&self, other: &Self) -> bool {
        self.same_type(other) || self.name() == other.name()
    }
}

impl PartialOrd for PropertyType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.name().cmp(&other.name()))
    }
}

pub(super) struct PropertyTypeInner {
    name: String,
    kind: ValueKind,
    replicator: Option<Arc<dyn Replicator>>,

    use_delta_threshold: bool,
    delta_threshold: Value,
    serialization_mode: SerializationMode,
    use_half_floats: bool,
    use_quantization: bool,
    quantization_range_min: Value,
    quantization_range_max: Value,
    use_interpolation: bool,
    interpolation_curve: CurveType,
    sample_time_offset: TimeMs,
    extrapolation_limit: TimeMs,
    use_convergence: bool,
    notify_on_convergence_state_change: bool,
    active_convergence_weight: f32,
    resting_convergence_duration: TimeMs,
    convergence_interval: u32,
    snap_threshold: Value,

    active_index: PropertyIndex,
    resting_index: PropertyIndex,
    last_tick_time: TimeMs,
}

/// A read-consistent copy of the configuration, taken once per engine
/// operation so property algorithms never hold the type lock.
#[derive(Clone)]
pub(crate) struct TypeSnapshot {
    pub kind: ValueKind,
    pub replicator: Option<Arc<dyn Replicator>>,
    pub use_delta_threshold: bool,
    pub delta_threshold: Value,
    pub serialization_mode: SerializationMode,
    pub use_half_floats: bool,
    pub use_quantization: bool,
    pub quantization_range_min: Value,
    pub quantization_range_max: Value,
    pub use_interpolation: bool,
    pub sample_time_offset: TimeMs,
    pub extrapolation_limit: TimeMs,
    pub use_convergence: bool,
    pub notify_on_convergence_state_change: bool,
    pub active_convergence_weight: f32,
    pub resting_convergence_duration: TimeMs,
    pub snap_threshold: Value,
}

impl TypeSnapshot {
    /// Quantization applies only when every parameter it needs is present.
    pub fn should_quantize(&self) -> bool {
        self.use_quantization
            && self.quantization_range_min.is_not_empty()
            && self.quantization_range_max.is_not_empty()
            && self.delta_threshold.is_not_empty()
    }
}

impl PropertyType {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PropertyTypeInner {
                name: name.into(),
                kind,
                replicator: None,
                use_delta_threshold: false,
                delta_threshold: Value::Empty,
                serialization_mode: SerializationMode::All,
                use_half_floats: false,
                use_quantization: false,
                quantization_range_min: Value::Empty,
                quantization_range_max: Value::Empty,
                use_interpolation: false,
                interpolation_curve: CurveType::Linear,
                sample_time_offset: ONE_SECOND_MS / 10,
                extrapolation_limit: ONE_SECOND_MS,
                use_convergence: false,
                notify_on_convergence_state_change: false,
                active_convergence_weight: 0.1,
                resting_convergence_duration: ONE_SECOND_MS / 20,
                convergence_interval: 1,
                snap_threshold: Value::Empty,
                active_index: PropertyIndex::new(),
                resting_index: PropertyIndex::new(),
                last_tick_time: INVALID_TIMESTAMP,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PropertyTypeInner> {
        self.inner.read().expect("property type lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, PropertyTypeInner> {
        self.inner.write().expect("property type lock poisoned")
    }

    /// Whether `self` and `other` are handles to the same record.
    pub fn same_type(&self, other: &PropertyType) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn kind(&self) -> ValueKind {
        self.read().kind
    }

    /// Activated property types are bound to a replicator and frozen.
    pub fn is_valid(&self) -> bool {
        self.read().replicator.is_some()
    }

    /// Binds this property type to its replicator, allocating the
    /// convergence stripes. Freezes all non-runtime configuration.
    pub fn activate(&self, replicator: Arc<dyn Replicator>) -> Result<(), PropertyError> {
        let mut inner = self.write();
        if inner.replicator.is_some() {
            error!("property type `{}` activated twice", inner.name);
            return Err(PropertyError::AlreadyActivated {
                name: inner.name.clone(),
            });
        }
        let stripes = inner.convergence_interval as usize;
        inner.active_index.create_lists(stripes);
        inner.resting_index.create_lists(stripes);
        inner.replicator = Some(replicator);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> TypeSnapshot {
        let inner = self.read();
        TypeSnapshot {
            kind: inner.kind,
            replicator: inner.replicator.clone(),
            use_delta_threshold: inner.use_delta_threshold,
            delta_threshold: inner.delta_threshold.clone(),
            serialization_mode: inner.serialization_mode,
            use_half_floats: inner.use_half_floats,
            use_quantization: inner.use_quantization,
            quantization_range_min: inner.quantization_range_min.clone(),
            quantization_range_max: inner.quantization_range_max.clone(),
            use_interpolation: inner.use_interpolation,
            sample_time_offset: inner.sample_time_offset,
            extrapolation_limit: inner.extrapolation_limit,
            use_convergence: inner.use_convergence,
            notify_on_convergence_state_change: inner.notify_on_convergence_state_change,
            active_convergence_weight: inner.active_convergence_weight,
            resting_convergence_duration: inner.resting_convergence_duration,
            snap_threshold: inner.snap_threshold.clone(),
        }
    }

    // Configuration

    /// Refuses configuration writes once activated.
    fn frozen_check(inner: &PropertyTypeInner) -> Result<(), PropertyError> {
        if inner.replicator.is_some() {
            error!(
                "property type `{}` is already activated, unable to modify configuration",
                inner.name
            );
            return Err(PropertyError::Frozen {
                name: inner.name.clone(),
            });
        }
        Ok(())
    }

    fn arithmetic_check(
        inner: &PropertyTypeInner,
        operation: &'static str,
    ) -> Result<(), PropertyError> {
        if !inner.kind.is_per_member() {
            warn!(
                "`{operation}` requires an arithmetic kind, but `{}` is {:?}",
                inner.name, inner.kind
            );
            return Err(PropertyError::NonArithmetic {
                name: inner.name.clone(),
                kind: inner.kind,
                operation,
            });
        }
        Ok(())
    }

    fn typed_value_check(
        inner: &PropertyTypeInner,
        value: &Value,
        operation: &'static str,
    ) -> Result<(), PropertyError> {
        Self::arithmetic_check(inner, operation)?;
        if value.kind() != inner.kind {
            warn!(
                "`{operation}` value of kind {:?} does not fit `{}` of kind {:?}",
                value.kind(),
                inner.name,
                inner.kind
            );
            return Err(PropertyError::KindMismatch {
                name: inner.name.clone(),
                kind: inner.kind,
                value_kind: value.kind(),
            });
        }
        Ok(())
    }

    /// Restores every configuration field to its default. Only the
    /// notification flag survives activation.
    pub fn reset_config(&self) {
        if !self.is_valid() {
            let _ = self.set_use_delta_threshold(false);
            let _ = self.set_delta_threshold(Value::Empty);
            let _ = self.set_serialization_mode(SerializationMode::All);
            let _ = self.set_use_half_floats(false);
            let _ = self.set_use_quantization(false);
            let _ = self.set_quantization_range_min(Value::Empty);
            let _ = self.set_quantization_range_max(Value::Empty);
            let _ = self.set_use_interpolation(false);
            let _ = self.set_interpolation_curve(CurveType::Linear);
            let _ = self.set_sample_time_offset(ONE_SECOND_MS / 10);
            let _ = self.set_extrapolation_limit(ONE_SECOND_MS);
            let _ = self.set_use_convergence(false);
            let _ = self.set_active_convergence_weight(0.1);
            let _ = self.set_resting_convergence_duration(ONE_SECOND_MS / 20);
            let _ = self.set_convergence_interval(1);
            let _ = self.set_snap_threshold(Value::Empty);
        }
        self.set_notify_on_convergence_state_change(false);
    }

    pub fn set_use_delta_threshold(&self, use_delta_threshold: bool) -> Result<(), PropertyError> {
        let mut inner = self.write();
        if use_delta_threshold {
            Self::arithmetic_check(&inner, "use_delta_threshold")?;
        }
        Self::frozen_check(&inner)?;
        inner.use_delta_threshold = use_delta_threshold;
        if !use_delta_threshold {
            inner.use_quantization = false;
        } else if inner.delta_threshold.is_empty() {
            // Default threshold: the kind's default value, floored positive.
            let mut threshold = Value::default_of(inner.kind);
            threshold.normalize_threshold();
            inner.delta_threshold = threshold;
        }
        Ok(())
    }

    pub fn use_delta_threshold(&self) -> bool {
        self.read().use_delta_threshold
    }

    pub fn set_delta_threshold(&self, delta_threshold: Value) -> Result<(), PropertyError> {
        let mut inner = self.write();
        if delta_threshold.is_not_empty() {
            Self::typed_value_check(&inner, &delta_threshold, "delta_threshold")?;
        }
        Self::frozen_check(&inner)?;
        let mut threshold = delta_threshold;
        threshold.normalize_threshold();
        inner.delta_threshold = threshold;
        Ok(())
    }

    pub fn delta_threshold(&self) -> Value {
        self.read().delta_threshold.clone()
    }

    pub fn set_serialization_mode(&self, mode: SerializationMode) -> Result<(), PropertyError> {
        let mut inner = self.write();
        if mode == SerializationMode::Changed {
            Self::arithmetic_check(&inner, "serialization_mode")?;
        }
        Self::frozen_check(&inner)?;
        // Single-member kinds gain nothing from member gating: the overall
        // has-changed check already decided the payload is worth sending.
        inner.serialization_mode = if inner.kind.primitive_count() <= 1 {
            SerializationMode::All
        } else {
            mode
        };
        Ok(())
    }

    pub fn serialization_mode(&self) -> SerializationMode {
        self.read().serialization_mode
    }

    pub fn set_use_half_floats(&self, use_half_floats: bool) -> Result<(), PropertyError> {
        let mut inner = self.write();
        if use_half_floats && !inner.kind.is_floating_point() {
            warn!(
                "half floats require a floating-point kind, but `{}` is {:?}",
                inner.name, inner.kind
            );
            return Err(PropertyError::NonFloatingPoint {
                name: inner.name.clone(),
                kind: inner.kind,
            });
        }
        Self::frozen_check(&inner)?;
        inner.use_half_floats = use_half_floats;
        if use_half_floats {
            inner.use_quantization = false;
        }
        Ok(())
    }

    pub fn use_half_floats(&self) -> bool {
        self.read().use_half_floats
    }

    pub fn set_use_quantization(&self, use_quantization: bool) -> Result<(), PropertyError> {
        {
            let inner = self.read();
            if use_quantization {
                Self::arithmetic_check(&inner, "use_quantization")?;
            }
            Self::frozen_check(&inner)?;
        }
        if use_quantization {
            // Quantization reuses the delta threshold as its quantum and
            // replaces half-float encoding.
            self.set_use_delta_threshold(true)?;
            self.set_use_half_floats(false)?;
        }
        self.write().use_quantization = use_quantization;
        Ok(())
    }

    pub fn use_quantization(&self) -> bool {
        self.read().use_quantization
    }

    pub fn set_quantization_range_min(&self, range_min: Value) -> Result<(), PropertyError> {
        {
            let mut inner = self.write();
            if range_min.is_not_empty() {
                Self::typed_value_check(&inner, &range_min, "quantization_range_min")?;
            }
            Self::frozen_check(&inner)?;
            inner.quantization_range_min = range_min;
        }
        let (min, max) = {
            let inner = self.read();
            (
                inner.quantization_range_min.clone(),
                inner.quantization_range_max.clone(),
            )
        };
        if max.kind() != min.kind() || max.any_member_less_than(&min) {
            self.set_quantization_range_max(min)?;
        }
        Ok(())
    }

    pub fn quantization_range_min(&self) -> Value {
        self.read().quantization_range_min.clone()
    }

    pub fn set_quantization_range_max(&self, range_max: Value) -> Result<(), PropertyError> {
        {
            let mut inner = self.write();
            if range_max.is_not_empty() {
                Self::typed_value_check(&inner, &range_max, "quantization_range_max")?;
            }
            Self::frozen_check(&inner)?;
            inner.quantization_range_max = range_max;
        }
        let (min, max) = {
            let inner = self.read();
            (
                inner.quantization_range_min.clone(),
                inner.quantization_range_max.clone(),
            )
        };
        if max.kind() != min.kind() || max.any_member_less_than(&min) {
            self.set_quantization_range_min(max)?;
        }
        Ok(())
    }

    pub fn quantization_range_max(&self) -> Value {
        self.read().quantization_range_max.clone()
    }

    pub fn set_use_interpolation(&self, use_interpolation: bool) -> Result<(), PropertyError> {
        let mut inner = self.write();
        if use_interpolation {
            Self::arithmetic_check(&inner, "use_interpolation")?;
            if !inner.kind.supports_interpolation() {
                warn!(
                    "interpolation supports at most four primitive members, but `{}` is {:?}",
                    inner.name, inner.kind
                );
                return Err(PropertyError::TooManyMembers {
                    name: inner.name.clone(),
                    kind: inner.kind,
                });
            }
        }
        Self::frozen_check(&inner)?;
        inner.use_interpolation = use_interpolation;
        Ok(())
    }

    pub fn use_interpolation(&self) -> bool {
        self.read().use_interpolation
    }

    pub fn set_interpolation_curve(&self, curve: CurveType) -> Result<(), PropertyError> {
        let mut inner = self.write();
        Self::frozen_check(&inner)?;
        inner.interpolation_curve = curve;
        Ok(())
    }

    pub fn interpolation_curve(&self) -> CurveType {
        self.read().interpolation_curve
    }

    pub fn set_sample_time_offset(&self, offset: TimeMs) -> Result<(), PropertyError> {
        let mut inner = self.write();
        Self::frozen_check(&inner)?;
        inner.sample_time_offset = offset.clamp(-ONE_SECOND_MS, ONE_SECOND_MS);
        Ok(())
    }

    pub fn sample_time_offset(&self) -> TimeMs {
        self.read().sample_time_offset
    }

    pub fn set_extrapolation_limit(&self, limit: TimeMs) -> Result<(), PropertyError> {
        let mut inner = self.write();
        Self::frozen_check(&inner)?;
        inner.extrapolation_limit = limit.clamp(0, ONE_SECOND_MS);
        Ok(())
    }

    pub fn extrapolation_limit(&self) -> TimeMs {
        self.read().extrapolation_limit
    }

    pub fn set_use_convergence(&self, use_convergence: bool) -> Result<(), PropertyError> {
        let mut inner = self.write();
        if use_convergence {
            Self::arithmetic_check(&inner, "use_convergence")?;
        }
        Self::frozen_check(&inner)?;
        inner.use_convergence = use_convergence;
        Ok(())
    }

    pub fn use_convergence(&self) -> bool {
        self.read().use_convergence
    }

    /// The one runtime-writable flag: stays settable after activation.
    pub fn set_notify_on_convergence_state_change(&self, notify: bool) {
        self.write().notify_on_convergence_state_change = notify;
    }

    pub fn notify_on_convergence_state_change(&self) -> bool {
        self.read().notify_on_convergence_state_change
    }

    pub fn set_active_convergence_weight(&self, weight: f32) -> Result<(), PropertyError> {
        let mut inner = self.write();
        Self::frozen_check(&inner)?;
        inner.active_convergence_weight = weight.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn active_convergence_weight(&self) -> f32 {
        self.read().active_convergence_weight
    }

    pub fn set_resting_convergence_duration(&self, duration: TimeMs) -> Result<(), PropertyError> {
        let mut inner = self.write();
        Self::frozen_check(&inner)?;
        inner.resting_convergence_duration = duration.clamp(0, ONE_SECOND_MS);
        Ok(())
    }

    pub fn resting_convergence_duration(&self) -> TimeMs {
        self.read().resting_convergence_duration
    }

    pub fn set_convergence_interval(&self, interval: u32) -> Result<(), PropertyError> {
        let mut inner = self.write();
        Self::frozen_check(&inner)?;
        inner.convergence_interval = interval.clamp(1, 100);
        Ok(())
    }

    pub fn convergence_interval(&self) -> u32 {
        self.read().convergence_interval
    }

    pub fn set_snap_threshold(&self, snap_threshold: Value) -> Result<(), PropertyError> {
        let mut inner = self.write();
        if snap_threshold.is_not_empty() {
            Self::typed_value_check(&inner, &snap_threshold, "snap_threshold")?;
        }
        Self::frozen_check(&inner)?;
        let mut threshold = snap_threshold;
        threshold.normalize_threshold();
        inner.snap_threshold = threshold;
        Ok(())
    }

    pub fn snap_threshold(&self) -> Value {
        self.read().snap_threshold.clone()
    }

    // Scheduling

    /// Total properties currently indexed, for debugging invariants.
    pub fn scheduled_property_count(&self) -> usize {
        let inner = self.read();
        inner.active_index.total() + inner.resting_index.total()
    }

    /// Registers a property in the index matching its convergence state.
    /// Called with the property's lock held by the property itself.
    pub(super) fn schedule(&self, property: &mut PropertyInner) {
        let replicator = {
            let inner = self.read();
            match &inner.replicator {
                Some(replicator) => replicator.clone(),
                None => {
                    warn!(
                        "property `{}` cannot be scheduled before `{}` is activated",
                        property.name, inner.name
                    );
                    return;
                }
            }
        };
        if !self.read().use_convergence {
            return;
        }
        let Some(channel) = property.channel.clone() else {
            return;
        };
        // A fixed-authority property we are authoritative over has nothing
        // to converge toward.
        if channel.authority() == replicator.role()
            && channel.authority_mode() == AuthorityMode::Fixed
        {
            return;
        }
        if property.sched.is_some() {
            warn!("property `{}` is already scheduled", property.name);
            return;
        }
        let resting = match property.convergence_state {
            ConvergenceState::Active => false,
            ConvergenceState::Resting => true,
            ConvergenceState::None => {
                debug_assert!(false, "scheduling a property with no convergence state");
                return;
            }
        };
        let mut inner = self.write();
        let index = if resting {
            &mut inner.resting_index
        } else {
            &mut inner.active_index
        };
        if let Some(slot) = index.insert(property.self_ref.clone()) {
            property.sched = Some(super::SchedEntry { resting, slot });
        }
    }

    /// Removes a property from whichever index holds it. No-op when the
    /// property is not scheduled.
    pub(super) fn unschedule(&self, property: &mut PropertyInner) {
        let Some(entry) = property.sched.take() else {
            return;
        };
        let mut inner = self.write();
        let index = if entry.resting {
            &mut inner.resting_index
        } else {
            &mut inner.active_index
        };
        index.remove(entry.slot);
    }

    /// One scheduler tick: visits the stripe `frame_id` selects in both
    /// indices and converges each property there, skipping properties that
    /// already converged this frame by receiving a change.
    pub fn converge_now(&self) {
        let (replicator, use_convergence) = {
            let inner = self.read();
            (inner.replicator.clone(), inner.use_convergence)
        };
        let Some(replicator) = replicator else {
            warn!("property type `{}` ticked before activation", self.name());
            return;
        };
        if !use_convergence {
            return;
        }
        let now = replicator.local_time();
        let frame_id = replicator.local_frame_id();
        {
            let mut inner = self.write();
            if inner.last_tick_time != INVALID_TIMESTAMP && now < inner.last_tick_time {
                error!(
                    "local time moved backwards ({} -> {}) while ticking `{}`",
                    inner.last_tick_time, now, inner.name
                );
            }
            inner.last_tick_time = now;
        }
        self.converge_index(false, frame_id);
        self.converge_index(true, frame_id);
    }

    fn converge_index(&self, resting: bool, frame_id: FrameId) {
        let scheduled = {
            let mut inner = self.write();
            let index = if resting {
                &mut inner.resting_index
            } else {
                &mut inner.active_index
            };
            index.collect_stripe(frame_id)
        };
        for strong in scheduled {
            let property = Property::from_shared(strong);
            // A change received this frame already converged this property;
            // converging again would double-step it.
            if property.last_received_change_frame_id() == frame_id {
                continue;
            }
            if resting {
                property.converge_resting_now();
            } else {
                property.converge_active_now();
            }
        }
    }
}
