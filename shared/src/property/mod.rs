//! Replicated property instances.
//!
//! A [`Property`] binds a live value owned by user code to a shared
//! [`PropertyType`] configuration. It detects changes against the last
//! transmitted snapshot, emits and applies bit-level payloads, maintains
//! per-member received-value curves, and walks the convergence state
//! machine that smooths the remote estimate into the local value.

mod error;
mod index;
mod property_type;

pub use error::PropertyError;
pub use property_type::PropertyType;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use log::{error, warn};

use mirra_serde::{f16_bits_to_f32, f32_to_f16_bits, BitReader, BitWrite, Quantizer, Serde, SerdeErr};

use crate::collaborators::{PropertyChangeEvent, ReplicaChannel};
use crate::curve::SampleCurve;
use crate::types::{
    time_ms_to_seconds, Direction, FrameId, ReplicationPhase, SerializationMode, TimeMs,
    INVALID_TIMESTAMP, ONE_SECOND_MS,
};
use crate::value::{read_member, write_member, Scalar, Value};

use index::IndexSlot;
use property_type::TypeSnapshot;

/// Where a property sits in the convergence state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergenceState {
    /// Not converging; unscheduled.
    #[default]
    None,
    /// Changes are arriving within the extrapolation window.
    Active,
    /// The remote stream went quiet; winding down onto the last value.
    Resting,
}

/// Owner-supplied access to the live property value.
pub trait ValueAccess: Send + Sync {
    /// Returns the current value, or `Empty` when it cannot be read; the
    /// engine then substitutes the last transmitted value.
    fn get(&self) -> Value;

    /// Stores a new value. Must not fail: the engine guarantees the value
    /// is non-empty and of the property's kind.
    fn set(&mut self, value: Value);
}

/// [`ValueAccess`] backed by a shared cell, for owners that keep the value
/// in plain data. Clones observe the same cell.
#[derive(Clone)]
pub struct SharedValue {
    cell: Arc<RwLock<Value>>,
}

impl SharedValue {
    pub fn new(value: Value) -> Self {
        Self {
            cell: Arc::new(RwLock::new(value)),
        }
    }

    pub fn get(&self) -> Value {
        self.cell.read().expect("value cell poisoned").clone()
    }

    pub fn set(&self, value: Value) {
        *self.cell.write().expect("value cell poisoned") = value;
    }
}

impl ValueAccess for SharedValue {
    fn get(&self) -> Value {
        SharedValue::get(self)
    }

    fn set(&mut self, value: Value) {
        SharedValue::set(self, value)
    }
}

/// A property's registration in a scheduling index.
pub(crate) struct SchedEntry {
    resting: bool,
    slot: IndexSlot,
}

pub(crate) struct PropertyInner {
    name: String,
    property_type: PropertyType,
    channel: Option<Arc<dyn ReplicaChannel>>,
    access: Box<dyn ValueAccess>,

    last_value: Value,
    last_change_timestamp: TimeMs,
    last_received_change_value: Value,
    last_received_change_timestamp: TimeMs,
    last_received_change_frame_id: FrameId,

    curves: Vec<SampleCurve>,
    convergence_state: ConvergenceState,
    sched: Option<SchedEntry>,
    self_ref: Weak<RwLock<PropertyInner>>,
}

/// One replicated attribute instance. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Property {
    inner: Arc<RwLock<PropertyInner>>,
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property").field("name", &self.name()).finish()
    }
}

// Properties compare and order by name, the identity they are looked up
// under within a channel.
impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl PartialOrd for Property {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.name().cmp(&other.name()))
    }
}

impl Property {
    pub fn new(
        name: impl Into<String>,
        property_type: &PropertyType,
        access: Box<dyn ValueAccess>,
    ) -> Self {
        let kind = property_type.kind();
        let curves = if kind.supports_interpolation() {
            vec![SampleCurve::new(property_type.interpolation_curve()); kind.primitive_count()]
        } else {
            Vec::new()
        };
        let inner = Arc::new_cyclic(|self_ref| {
            RwLock::new(PropertyInner {
                name: name.into(),
                property_type: property_type.clone(),
                channel: None,
                access,
                last_value: Value::Empty,
                last_change_timestamp: INVALID_TIMESTAMP,
                last_received_change_value: Value::Empty,
                last_received_change_timestamp: INVALID_TIMESTAMP,
                last_received_change_frame_id: 0,
                curves,
                convergence_state: ConvergenceState::None,
                sched: None,
                self_ref: self_ref.clone(),
            })
        });
        Self { inner }
    }

    pub(crate) fn from_shared(inner: Arc<RwLock<PropertyInner>>) -> Self {
        Self { inner }
    }

    fn read(&self) -> RwLockReadGuard<'_, PropertyInner> {
        self.inner.read().expect("property lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, PropertyInner> {
        self.inner.write().expect("property lock poisoned")
    }

    fn type_snapshot(&self) -> TypeSnapshot {
        let property_type = self.read().property_type.clone();
        property_type.snapshot()
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn property_type(&self) -> PropertyType {
        self.read().property_type.clone()
    }

    /// Attaches the owning channel. The channel outlives replication use of
    /// this property.
    pub fn set_channel(&self, channel: Arc<dyn ReplicaChannel>) {
        self.write().channel = Some(channel);
    }

    pub fn clear_channel(&self) {
        self.write().channel = None;
    }

    /// A property is valid once its type is activated and it sits on a
    /// channel.
    pub fn is_valid(&self) -> bool {
        self.read().channel.is_some() && self.property_type().is_valid()
    }

    pub fn is_scheduled(&self) -> bool {
        self.read().sched.is_some()
    }

    pub fn convergence_state(&self) -> ConvergenceState {
        self.read().convergence_state
    }

    /// Reads the live value through the owner's accessor, substituting the
    /// last transmitted value when the accessor cannot produce one.
    pub fn value(&self) -> Value {
        self.read().value()
    }

    /// Writes the live value through the owner's accessor.
    pub fn set_value(&self, value: Value) -> Result<(), PropertyError> {
        let snapshot = self.type_snapshot();
        let mut inner = self.write();
        if value.is_empty() {
            error!("empty value set on property `{}`", inner.name);
            return Err(PropertyError::EmptyValue {
                name: inner.name.clone(),
            });
        }
        if value.kind() != snapshot.kind {
            error!(
                "value of kind {:?} set on property `{}` of kind {:?}",
                value.kind(),
                inner.name,
                snapshot.kind
            );
            return Err(PropertyError::KindMismatch {
                name: inner.name.clone(),
                kind: snapshot.kind,
                value_kind: value.kind(),
            });
        }
        inner.access.set(value);
        Ok(())
    }

    pub fn last_value(&self) -> Value {
        self.read().last_value.clone()
    }

    pub fn last_change_timestamp(&self) -> TimeMs {
        self.read().last_change_timestamp
    }

    pub fn last_received_change_value(&self) -> Value {
        self.read().last_received_change_value.clone()
    }

    pub fn last_received_change_timestamp(&self) -> TimeMs {
        self.read().last_received_change_timestamp
    }

    pub fn last_received_change_frame_id(&self) -> FrameId {
        self.read().last_received_change_frame_id
    }

    /// Whole-value inequality between the live value and the last
    /// transmitted snapshot.
    pub fn has_changed_at_all(&self) -> bool {
        self.read().has_changed_at_all()
    }

    /// Change detection for steady-state outgoing replication: arithmetic
    /// kinds honor the delta threshold, everything else falls back to
    /// whole-value inequality.
    pub fn has_changed(&self) -> bool {
        let snapshot = self.type_snapshot();
        self.read().has_changed(&snapshot)
    }

    /// Re-snapshots the last transmitted value. Without `force_all`,
    /// members still inside their delta threshold keep their old snapshot
    /// so the threshold gate is preserved per member.
    pub fn update_last_value(&self, force_all: bool) {
        let snapshot = self.type_snapshot();
        self.write().update_last_value(force_all, &snapshot);
    }

    /// Emits this property's payload. A write failure means the bitstream
    /// is full; the caller discards the payload.
    pub fn serialize(
        &self,
        writer: &mut dyn BitWrite,
        phase: ReplicationPhase,
        _timestamp: TimeMs,
    ) -> Result<(), SerdeErr> {
        let snapshot = self.type_snapshot();
        let inner = self.read();
        inner.serialize(writer, &snapshot, phase)
    }

    /// Applies an incoming payload stamped with the sender's change
    /// timestamp. A read failure abandons the update without touching
    /// state.
    pub fn deserialize(
        &self,
        reader: &mut BitReader,
        phase: ReplicationPhase,
        timestamp: TimeMs,
    ) -> Result<(), SerdeErr> {
        let snapshot = self.type_snapshot();
        let mut inner = self.write();
        inner.deserialize(reader, &snapshot, phase, timestamp)
    }

    /// Outbound/inbound change hook: detects a change, dispatches the
    /// channel notification, and snapshots the last value + timestamps.
    pub fn react_to_changes(
        &self,
        timestamp: TimeMs,
        phase: ReplicationPhase,
        direction: Direction,
        generate_notification: bool,
        set_last_value: bool,
    ) {
        let snapshot = self.type_snapshot();
        let mut inner = self.write();

        let has_changed = if phase == ReplicationPhase::Initialization
            || direction == Direction::Incoming
        {
            inner.has_changed_at_all()
        } else {
            inner.has_changed(&snapshot)
        };
        if !has_changed {
            return;
        }

        if generate_notification {
            let should_notify = match (&inner.channel, direction) {
                (Some(channel), Direction::Incoming) => channel.notify_on_incoming_property_change(),
                (Some(channel), Direction::Outgoing) => channel.notify_on_outgoing_property_change(),
                (None, _) => false,
            };
            if should_notify {
                if let Some(replicator) = &snapshot.replicator {
                    replicator.on_property_change(PropertyChangeEvent {
                        property_name: &inner.name,
                        timestamp,
                        phase,
                        direction,
                    });
                }
            }
        }

        if set_last_value {
            // The initialization phase snapshots every member so the last
            // value starts complete.
            inner.update_last_value(phase == ReplicationPhase::Initialization, &snapshot);
            // This timestamp may be chronologically older than the current
            // one when changes arrive out of order; it is stored anyway.
            inner.last_change_timestamp = timestamp;
            if let Some(channel) = &inner.channel {
                channel.note_change_timestamp(timestamp);
            }
        }
    }

    /// The time the remote estimate is sampled at: local time plus the
    /// sample offset, capped at the last received change plus the
    /// extrapolation limit.
    pub fn current_sample_time(&self) -> Option<TimeMs> {
        let snapshot = self.type_snapshot();
        let replicator = snapshot.replicator.clone()?;
        Some(self.read().current_sample_time(replicator.local_time(), &snapshot))
    }

    /// Samples the received-value curves at the current sample time.
    /// `Empty` before the first received change.
    pub fn current_sampled_value(&self) -> Value {
        let snapshot = self.type_snapshot();
        let Some(replicator) = snapshot.replicator.clone() else {
            return Value::Empty;
        };
        let inner = self.read();
        let sample_time = inner.current_sample_time(replicator.local_time(), &snapshot);
        inner.sample_curves(sample_time, &snapshot)
    }

    /// Whether the current sample time has outrun the received stream.
    pub fn is_resting(&self) -> bool {
        let snapshot = self.type_snapshot();
        let Some(replicator) = snapshot.replicator.clone() else {
            return false;
        };
        self.read().is_resting(replicator.local_time(), &snapshot)
    }

    /// Replaces the live value with the remote target in one step.
    pub fn snap_now(&self) {
        let snapshot = self.type_snapshot();
        let Some(replicator) = snapshot.replicator.clone() else {
            return;
        };
        self.write().snap_now(replicator.local_time(), &snapshot);
    }

    /// One active-convergence step. Detects the transition to resting.
    pub fn converge_active_now(&self) {
        let snapshot = self.type_snapshot();
        let Some(replicator) = snapshot.replicator.clone() else {
            return;
        };
        let mut inner = self.write();
        if inner.convergence_state != ConvergenceState::Active {
            warn!(
                "active convergence on property `{}` in state {:?}",
                inner.name, inner.convergence_state
            );
            return;
        }
        inner.converge_active_now(replicator.local_time(), &snapshot);
    }

    /// One resting-convergence step; reaches `None` when the resting
    /// duration has elapsed.
    pub fn converge_resting_now(&self) {
        let snapshot = self.type_snapshot();
        let Some(replicator) = snapshot.replicator.clone() else {
            return;
        };
        let mut inner = self.write();
        if inner.convergence_state != ConvergenceState::Resting {
            warn!(
                "resting convergence on property `{}` in state {:?}",
                inner.name, inner.convergence_state
            );
            return;
        }
        inner.converge_resting_now(replicator.local_time(), &snapshot);
    }

    /// Timestamps, in seconds, of the retained received-value control
    /// points for one primitive member's curve.
    pub fn received_sample_times(&self, member: usize) -> Vec<f32> {
        self.read()
            .curves
            .get(member)
            .map(|curve| curve.control_times().collect())
            .unwrap_or_default()
    }

    /// Takes this property out of the convergence machinery; owners call
    /// this before dropping a scheduled property.
    pub fn unschedule(&self) {
        let snapshot = self.type_snapshot();
        self.write()
            .set_convergence_state(ConvergenceState::None, &snapshot);
    }
}

impl PropertyInner {
    fn value(&self) -> Value {
        let value = self.access.get();
        if value.is_empty() {
            return self.last_value.clone();
        }
        value
    }

    fn set_value(&mut self, value: Value) {
        debug_assert!(value.is_not_empty());
        self.access.set(value);
    }

    fn has_changed_at_all(&self) -> bool {
        self.value() != self.last_value
    }

    fn has_changed(&self, snapshot: &TypeSnapshot) -> bool {
        if !snapshot.kind.is_per_member() {
            return self.has_changed_at_all();
        }
        let current = self.value();
        if current.is_empty() || self.last_value.is_empty() {
            return current != self.last_value;
        }
        let use_threshold =
            snapshot.use_delta_threshold && snapshot.delta_threshold.is_not_empty();
        for i in 0..snapshot.kind.primitive_count() {
            let (Some(current_member), Some(last_member)) =
                (current.member(i), self.last_value.member(i))
            else {
                continue;
            };
            let changed = if use_threshold {
                let threshold = snapshot
                    .delta_threshold
                    .member(i)
                    .unwrap_or(Scalar::Float(0.0));
                current_member.abs_diff_exceeds(last_member, threshold)
            } else {
                current_member.differs(last_member)
            };
            if changed {
                return true;
            }
        }
        false
    }

    fn update_last_value(&mut self, force_all: bool, snapshot: &TypeSnapshot) {
        let current = self.value();
        let per_member_gate = !force_all
            && snapshot.serialization_mode == SerializationMode::Changed
            && snapshot.use_delta_threshold
            && snapshot.kind.is_per_member()
            && self.last_value.is_not_empty();
        if !per_member_gate {
            self.last_value = current;
            return;
        }
        // Members still inside their threshold keep the old snapshot: a
        // member only advances once it is considered changed.
        let mut next = current;
        for i in 0..snapshot.kind.primitive_count() {
            let (Some(current_member), Some(last_member)) =
                (next.member(i), self.last_value.member(i))
            else {
                continue;
            };
            let threshold = snapshot
                .delta_threshold
                .member(i)
                .unwrap_or(Scalar::Float(0.0));
            if !current_member.abs_diff_exceeds(last_member, threshold) {
                next.set_member(i, last_member);
            }
        }
        self.last_value = next;
    }

    fn member_quantizer(snapshot: &TypeSnapshot, member: usize) -> Quantizer {
        let min = snapshot
            .quantization_range_min
            .member(member)
            .map(Scalar::as_f64)
            .unwrap_or(0.0);
        let max = snapshot
            .quantization_range_max
            .member(member)
            .map(Scalar::as_f64)
            .unwrap_or(0.0);
        let quantum = snapshot
            .delta_threshold
            .member(member)
            .map(Scalar::as_f64)
            .unwrap_or(1.0);
        Quantizer::new(min, max.max(min), quantum)
    }

    fn write_encoded_member(
        writer: &mut dyn BitWrite,
        snapshot: &TypeSnapshot,
        quantize: bool,
        member_index: usize,
        member: Scalar,
    ) -> Result<(), SerdeErr> {
        if quantize {
            Self::member_quantizer(snapshot, member_index).ser(member.as_f64(), writer)
        } else if snapshot.use_half_floats {
            f32_to_f16_bits(member.as_f64() as f32).ser(writer)
        } else {
            write_member(writer, snapshot.kind.primitive_kind(), member)
        }
    }

    fn read_encoded_member(
        reader: &mut BitReader,
        snapshot: &TypeSnapshot,
        quantize: bool,
        member_index: usize,
    ) -> Result<Scalar, SerdeErr> {
        if quantize {
            Ok(Scalar::Float(
                Self::member_quantizer(snapshot, member_index).de(reader)?,
            ))
        } else if snapshot.use_half_floats {
            Ok(Scalar::Float(f16_bits_to_f32(u16::de(reader)?) as f64))
        } else {
            read_member(reader, snapshot.kind.primitive_kind())
        }
    }

    fn serialize(
        &self,
        writer: &mut dyn BitWrite,
        snapshot: &TypeSnapshot,
        phase: ReplicationPhase,
    ) -> Result<(), SerdeErr> {
        let force_all = phase == ReplicationPhase::Initialization;

        if !snapshot.kind.is_per_member() {
            return self.value().ser(writer);
        }

        let current = self.value();
        let quantize = snapshot.should_quantize();
        let emit_all = force_all || snapshot.serialization_mode == SerializationMode::All;
        let use_threshold =
            snapshot.use_delta_threshold && snapshot.delta_threshold.is_not_empty();

        for i in 0..snapshot.kind.primitive_count() {
            let member = current.member(i).ok_or(SerdeErr::Malformed)?;
            if emit_all {
                Self::write_encoded_member(writer, snapshot, quantize, i, member)?;
                continue;
            }
            let changed = match self.last_value.member(i) {
                Some(last_member) => {
                    if use_threshold {
                        let threshold = snapshot
                            .delta_threshold
                            .member(i)
                            .unwrap_or(Scalar::Float(0.0));
                        member.abs_diff_exceeds(last_member, threshold)
                    } else {
                        member.differs(last_member)
                    }
                }
                None => true,
            };
            writer.write_bit(changed)?;
            if changed {
                Self::write_encoded_member(writer, snapshot, quantize, i, member)?;
            }
        }
        Ok(())
    }

    fn deserialize(
        &mut self,
        reader: &mut BitReader,
        snapshot: &TypeSnapshot,
        phase: ReplicationPhase,
        timestamp: TimeMs,
    ) -> Result<(), SerdeErr> {
        let force_all = phase == ReplicationPhase::Initialization;

        if !snapshot.kind.is_per_member() {
            // Whole-value kinds apply immediately; there is no smoothing to
            // route them through.
            let new_value = Value::de(snapshot.kind, reader)?;
            self.set_value(new_value);
            return Ok(());
        }

        let quantize = snapshot.should_quantize();
        let read_all = force_all || snapshot.serialization_mode == SerializationMode::All;
        let count = snapshot.kind.primitive_count();

        let mut new_value;
        if read_all {
            new_value = Value::default_of(snapshot.kind);
            for i in 0..count {
                let member = Self::read_encoded_member(reader, snapshot, quantize, i)?;
                new_value.set_member(i, member);
            }
        } else {
            // Members absent from the payload carry the remote-estimated
            // value at the payload's instant; before any sample exists the
            // local value stands in.
            let sampled = self.sample_curves(timestamp, snapshot);
            new_value = if sampled.is_not_empty() {
                sampled
            } else {
                let current = self.value();
                if current.is_not_empty() {
                    current
                } else {
                    Value::default_of(snapshot.kind)
                }
            };
            for i in 0..count {
                if reader.read_bit()? {
                    let member = Self::read_encoded_member(reader, snapshot, quantize, i)?;
                    new_value.set_member(i, member);
                }
            }
        }

        let frame_id = snapshot
            .replicator
            .as_ref()
            .map(|replicator| replicator.local_frame_id())
            .unwrap_or(0);

        if snapshot.use_convergence {
            self.set_convergence_state(ConvergenceState::Active, snapshot);
        }

        if snapshot.use_interpolation {
            self.update_curve(timestamp, &new_value, snapshot);
        } else {
            self.last_received_change_value = new_value.clone();
        }

        self.last_received_change_timestamp = timestamp;
        self.last_received_change_frame_id = frame_id;

        let now = snapshot
            .replicator
            .as_ref()
            .map(|replicator| replicator.local_time())
            .unwrap_or(timestamp);

        if phase == ReplicationPhase::Initialization {
            // Initialization applies the exact value; smoothing starts with
            // the next change.
            self.set_value(new_value);
        } else if snapshot.use_convergence {
            self.converge_active_now(now, snapshot);
        } else {
            self.snap_now(now, snapshot);
        }
        Ok(())
    }

    fn update_curve(&mut self, timestamp: TimeMs, value: &Value, snapshot: &TypeSnapshot) {
        let Some(replicator) = snapshot.replicator.as_ref() else {
            return;
        };
        let now = replicator.local_time();
        let min_time = time_ms_to_seconds(now - ONE_SECOND_MS);
        let point_time = time_ms_to_seconds(timestamp);
        // Late or jitter-delayed samples behind the window are dropped.
        if point_time < min_time {
            return;
        }
        for (i, curve) in self.curves.iter_mut().enumerate() {
            let Some(member) = value.member(i) else {
                continue;
            };
            curve.collect_garbage(min_time);
            curve.insert(point_time, member.as_f64() as f32);
            curve.bake();
        }
    }

    fn sample_curves(&self, sample_time: TimeMs, snapshot: &TypeSnapshot) -> Value {
        if self.curves.is_empty() || self.curves[0].is_empty() {
            return Value::Empty;
        }
        let time = time_ms_to_seconds(sample_time);
        let mut result = Value::default_of(snapshot.kind);
        for (i, curve) in self.curves.iter().enumerate() {
            let Some(sampled) = curve.sample(time) else {
                continue;
            };
            result.set_member(i, Scalar::Float(sampled as f64));
        }
        result
    }

    fn max_sample_time(&self, snapshot: &TypeSnapshot) -> TimeMs {
        self.last_received_change_timestamp
            .saturating_add(snapshot.extrapolation_limit)
    }

    fn current_sample_time(&self, now: TimeMs, snapshot: &TypeSnapshot) -> TimeMs {
        let sample_time = now.saturating_add(snapshot.sample_time_offset);
        sample_time.min(self.max_sample_time(snapshot))
    }

    fn is_resting(&self, now: TimeMs, snapshot: &TypeSnapshot) -> bool {
        now.saturating_add(snapshot.sample_time_offset) > self.max_sample_time(snapshot)
    }

    fn resting_interpolant(&self, now: TimeMs, snapshot: &TypeSnapshot) -> f32 {
        let sample_time = now.saturating_add(snapshot.sample_time_offset);
        let elapsed = sample_time.saturating_sub(self.max_sample_time(snapshot));
        crate::value::inverse_lerp_clamped(
            time_ms_to_seconds(elapsed),
            0.0,
            time_ms_to_seconds(snapshot.resting_convergence_duration),
        )
    }

    fn convergence_target(&self, now: TimeMs, snapshot: &TypeSnapshot) -> Value {
        if snapshot.use_interpolation {
            self.sample_curves(self.current_sample_time(now, snapshot), snapshot)
        } else {
            self.last_received_change_value.clone()
        }
    }

    fn snap_now(&mut self, now: TimeMs, snapshot: &TypeSnapshot) {
        let target = self.convergence_target(now, snapshot);
        // Nothing received yet: nothing to snap to.
        if target.is_empty() {
            return;
        }
        self.set_value(target);
    }

    fn set_value_using_convergence(
        &mut self,
        target: &Value,
        target_weight: f32,
        snapshot: &TypeSnapshot,
    ) {
        let mut current = self.value();
        if current.is_empty() {
            return;
        }
        for i in 0..snapshot.kind.primitive_count() {
            let (Some(current_member), Some(target_member)) =
                (current.member(i), target.member(i))
            else {
                continue;
            };
            let converged = current_member.converge(target_member, target_weight);
            // An empty snap threshold never snaps.
            let should_snap = match snapshot.snap_threshold.member(i) {
                Some(threshold) => current_member.abs_diff_exceeds(target_member, threshold),
                None => false,
            };
            current.set_member(i, if should_snap { target_member } else { converged });
        }
        self.set_value(current);
    }

    fn converge_active_now(&mut self, now: TimeMs, snapshot: &TypeSnapshot) {
        if self.is_resting(now, snapshot) {
            self.set_convergence_state(ConvergenceState::Resting, snapshot);
            self.converge_resting_now(now, snapshot);
            return;
        }
        let target = self.convergence_target(now, snapshot);
        if target.is_empty() {
            return;
        }
        self.set_value_using_convergence(&target, snapshot.active_convergence_weight, snapshot);
    }

    fn converge_resting_now(&mut self, now: TimeMs, snapshot: &TypeSnapshot) {
        let weight = self.resting_interpolant(now, snapshot);
        let target = self.last_received_change_value.clone();
        if target.is_not_empty() {
            self.set_value_using_convergence(&target, weight, snapshot);
        }
        if weight >= 1.0 {
            self.set_convergence_state(ConvergenceState::None, snapshot);
        }
    }

    fn set_convergence_state(&mut self, state: ConvergenceState, snapshot: &TypeSnapshot) {
        if self.convergence_state == state {
            return;
        }
        let property_type = self.property_type.clone();
        property_type.unschedule(self);
        self.convergence_state = state;
        if state != ConvergenceState::None {
            property_type.schedule(self);
        }
        if snapshot.notify_on_convergence_state_change {
            if let Some(replicator) = &snapshot.replicator {
                replicator.on_convergence_state_change(&self.name, state);
            }
        }
    }
}
