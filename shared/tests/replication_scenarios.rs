//! End-to-end replication scenarios: a sender peer and a receiver peer
//! exchanging property payloads through in-memory bitstreams.

use std::sync::{Arc, Mutex, RwLock};

use mirra_shared::{
    AuthorityMode, BitReader, BitWriter, ConvergenceState, Direction, FrameId, Property,
    PropertyType, ReplicaChannel, ReplicationPhase, Replicator, Role, SerializationMode,
    SharedValue, TimeMs, Value, ValueKind,
};

struct TestReplicator {
    clock: RwLock<(TimeMs, FrameId)>,
    role: Role,
    convergence_events: Mutex<Vec<ConvergenceState>>,
}

impl TestReplicator {
    fn new(role: Role) -> Arc<Self> {
        Arc::new(Self {
            clock: RwLock::new((0, 0)),
            role,
            convergence_events: Mutex::new(Vec::new()),
        })
    }

    fn advance_to(&self, time: TimeMs, frame: FrameId) {
        *self.clock.write().unwrap() = (time, frame);
    }
}

impl Replicator for TestReplicator {
    fn local_time(&self) -> TimeMs {
        self.clock.read().unwrap().0
    }

    fn local_frame_id(&self) -> FrameId {
        self.clock.read().unwrap().1
    }

    fn role(&self) -> Role {
        self.role
    }

    fn on_convergence_state_change(&self, _property_name: &str, state: ConvergenceState) {
        self.convergence_events.lock().unwrap().push(state);
    }
}

struct TestChannel {
    authority: Role,
    mode: AuthorityMode,
}

impl ReplicaChannel for TestChannel {
    fn authority(&self) -> Role {
        self.authority
    }

    fn authority_mode(&self) -> AuthorityMode {
        self.mode
    }
}

struct Peer {
    replicator: Arc<TestReplicator>,
    property_type: PropertyType,
    property: Property,
    cell: SharedValue,
}

/// Builds one peer holding one property. The channel authority is the
/// server under fixed authority, so server peers never schedule their own
/// convergence while client peers do.
fn peer(kind: ValueKind, role: Role, configure: &dyn Fn(&PropertyType)) -> Peer {
    let property_type = PropertyType::new("scenario", kind);
    configure(&property_type);
    let replicator = TestReplicator::new(role);
    property_type.activate(replicator.clone()).unwrap();

    let cell = SharedValue::new(Value::default_of(kind));
    let property = Property::new("scenario", &property_type, Box::new(cell.clone()));
    property.set_channel(Arc::new(TestChannel {
        authority: Role::Server,
        mode: AuthorityMode::Fixed,
    }));

    Peer {
        replicator,
        property_type,
        property,
        cell,
    }
}

fn sender_receiver(kind: ValueKind, configure: &dyn Fn(&PropertyType)) -> (Peer, Peer) {
    (
        peer(kind, Role::Server, configure),
        peer(kind, Role::Client, configure),
    )
}

/// Serializes the sender's property, updates its last value, and applies
/// the payload on the receiver. Returns the payload width in bits.
fn transfer(sender: &Peer, receiver: &Peer, phase: ReplicationPhase, timestamp: TimeMs) -> usize {
    let mut writer = BitWriter::new();
    sender.property.serialize(&mut writer, phase, timestamp).unwrap();
    sender
        .property
        .react_to_changes(timestamp, phase, Direction::Outgoing, false, true);
    let bits = writer.bit_count();
    let bytes = writer.to_bytes();
    let mut reader = BitReader::new(&bytes);
    receiver
        .property
        .deserialize(&mut reader, phase, timestamp)
        .unwrap();
    bits
}

fn assert_float_near(value: &Value, expected: f32) {
    let Value::Float(actual) = value else {
        panic!("expected a Float, got {value:?}");
    };
    assert!((actual - expected).abs() < 1e-4, "{actual} != {expected}");
}

#[test]
fn delta_gating_holds_last_value_until_threshold_crossed() {
    let configure = |property_type: &PropertyType| {
        property_type.set_use_delta_threshold(true).unwrap();
        property_type.set_delta_threshold(Value::Float(0.5)).unwrap();
        property_type
            .set_serialization_mode(SerializationMode::Changed)
            .unwrap();
    };
    let (sender, receiver) = sender_receiver(ValueKind::Float, &configure);

    sender.cell.set(Value::Float(1.0));
    transfer(&sender, &receiver, ReplicationPhase::Initialization, 100);
    assert_eq!(sender.property.last_value(), Value::Float(1.0));
    assert_eq!(receiver.cell.get(), Value::Float(1.0));

    // Within the threshold: no change detected, nothing is sent, and the
    // last value holds.
    sender.cell.set(Value::Float(1.3));
    assert!(!sender.property.has_changed());
    sender
        .property
        .react_to_changes(200, ReplicationPhase::Change, Direction::Outgoing, false, true);
    assert_eq!(sender.property.last_value(), Value::Float(1.0));

    // Past the threshold: the change flows and the last value becomes 1.6,
    // never 1.3.
    sender.cell.set(Value::Float(1.6));
    assert!(sender.property.has_changed());
    transfer(&sender, &receiver, ReplicationPhase::Change, 300);
    assert_eq!(sender.property.last_value(), Value::Float(1.6));
    assert_eq!(receiver.cell.get(), Value::Float(1.6));
}

#[test]
fn changed_vector_emits_per_member_change_bits() {
    let configure = |property_type: &PropertyType| {
        property_type.set_use_delta_threshold(true).unwrap();
        property_type
            .set_delta_threshold(Value::Vec3([0.1, 0.1, 0.1]))
            .unwrap();
        property_type
            .set_serialization_mode(SerializationMode::Changed)
            .unwrap();
    };
    let (sender, receiver) = sender_receiver(ValueKind::Vec3, &configure);

    sender.cell.set(Value::Vec3([0.0, 0.0, 0.0]));
    transfer(&sender, &receiver, ReplicationPhase::Initialization, 100);

    sender.cell.set(Value::Vec3([0.0, 5.0, 0.0]));
    let mut writer = BitWriter::new();
    sender
        .property
        .serialize(&mut writer, ReplicationPhase::Change, 200)
        .unwrap();
    assert_eq!(writer.bit_count(), 35);

    // Expected bit layout: 0 | 1 f32(5.0) | 0
    let bytes = writer.to_bytes();
    let mut reader = BitReader::new(&bytes);
    assert!(!reader.read_bit().unwrap());
    assert!(reader.read_bit().unwrap());
    assert_eq!(reader.read_bits(32).unwrap() as u32, 5.0f32.to_bits());
    assert!(!reader.read_bit().unwrap());

    let mut reader = BitReader::new(&bytes);
    receiver
        .property
        .deserialize(&mut reader, ReplicationPhase::Change, 200)
        .unwrap();
    assert_eq!(receiver.cell.get(), Value::Vec3([0.0, 5.0, 0.0]));
}

#[test]
fn last_value_members_hold_until_their_own_threshold_crosses() {
    let configure = |property_type: &PropertyType| {
        property_type.set_use_delta_threshold(true).unwrap();
        property_type
            .set_delta_threshold(Value::Vec3([0.1, 0.1, 0.1]))
            .unwrap();
        property_type
            .set_serialization_mode(SerializationMode::Changed)
            .unwrap();
    };
    let (sender, receiver) = sender_receiver(ValueKind::Vec3, &configure);

    sender.cell.set(Value::Vec3([0.0, 0.0, 0.0]));
    transfer(&sender, &receiver, ReplicationPhase::Initialization, 100);

    // Member 1 crosses its threshold, member 0 drifts within it: only
    // member 1 advances in the last-value snapshot.
    sender.cell.set(Value::Vec3([0.05, 5.0, 0.0]));
    transfer(&sender, &receiver, ReplicationPhase::Change, 200);
    assert_eq!(sender.property.last_value(), Value::Vec3([0.0, 5.0, 0.0]));

    // The drifting member keeps comparing against its original snapshot,
    // so a later crossing is measured from 0.0, not from 0.05.
    sender.cell.set(Value::Vec3([0.12, 5.0, 0.0]));
    transfer(&sender, &receiver, ReplicationPhase::Change, 300);
    assert_eq!(sender.property.last_value(), Value::Vec3([0.12, 5.0, 0.0]));
    assert_eq!(receiver.cell.get(), Value::Vec3([0.12, 5.0, 0.0]));
}

#[test]
fn quantized_round_trip_stays_within_half_a_quantum() {
    let configure = |property_type: &PropertyType| {
        property_type.set_use_quantization(true).unwrap();
        property_type.set_delta_threshold(Value::Float(0.01)).unwrap();
        property_type
            .set_quantization_range_min(Value::Float(-1.0))
            .unwrap();
        property_type
            .set_quantization_range_max(Value::Float(1.0))
            .unwrap();
    };
    let (sender, receiver) = sender_receiver(ValueKind::Float, &configure);

    sender.cell.set(Value::Float(0.374));
    let bits = transfer(&sender, &receiver, ReplicationPhase::Initialization, 100);
    // 201 codes fit in ceil(log2(201)) = 8 bits.
    assert_eq!(bits, 8);

    let Value::Float(received) = receiver.cell.get() else {
        panic!("expected a Float");
    };
    assert!((0.370..=0.380).contains(&received), "{received}");
}

fn convergence_configure(property_type: &PropertyType) {
    property_type.set_use_convergence(true).unwrap();
    property_type.set_sample_time_offset(0).unwrap();
    property_type.set_active_convergence_weight(0.25).unwrap();
    property_type.set_snap_threshold(Value::Float(10.0)).unwrap();
}

#[test]
fn far_targets_snap_while_near_targets_converge() {
    // Far beyond the snap threshold: one step lands on the target.
    let (sender, receiver) = sender_receiver(ValueKind::Float, &convergence_configure);
    receiver.replicator.advance_to(1000, 1);
    sender.cell.set(Value::Float(100.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 1000);
    assert_float_near(&receiver.cell.get(), 100.0);

    // Inside the snap threshold: one weighted step.
    let (sender, receiver) = sender_receiver(ValueKind::Float, &convergence_configure);
    receiver.replicator.advance_to(1000, 1);
    sender.cell.set(Value::Float(4.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 1000);
    assert_float_near(&receiver.cell.get(), 1.0);
}

#[test]
fn integral_convergence_reaches_its_target() {
    let configure = |property_type: &PropertyType| {
        property_type.set_use_convergence(true).unwrap();
        property_type.set_sample_time_offset(0).unwrap();
        property_type.set_active_convergence_weight(0.1).unwrap();
    };
    let (sender, receiver) = sender_receiver(ValueKind::Int32, &configure);

    receiver.replicator.advance_to(1000, 1);
    sender.cell.set(Value::Int32(5));
    transfer(&sender, &receiver, ReplicationPhase::Change, 1000);
    // The receive step is the first of five: the lerp rounds to zero but
    // integral progress bumps the value by one.
    assert_eq!(receiver.cell.get(), Value::Int32(1));

    for frame in 2..=5 {
        receiver.replicator.advance_to(1000, frame);
        receiver.property_type.converge_now();
    }
    assert_eq!(receiver.cell.get(), Value::Int32(5));

    // Converged properties stay put on further ticks.
    receiver.replicator.advance_to(1000, 6);
    receiver.property_type.converge_now();
    assert_eq!(receiver.cell.get(), Value::Int32(5));
}

#[test]
fn quiet_streams_rest_then_return_to_none() {
    let configure = |property_type: &PropertyType| {
        property_type.set_use_convergence(true).unwrap();
        property_type.set_sample_time_offset(0).unwrap();
        property_type.set_extrapolation_limit(250).unwrap();
        property_type.set_resting_convergence_duration(250).unwrap();
        property_type.set_active_convergence_weight(0.5).unwrap();
    };
    let (sender, receiver) = sender_receiver(ValueKind::Float, &configure);

    receiver.cell.set(Value::Float(40.0));
    receiver.replicator.advance_to(10_000, 1);
    sender.cell.set(Value::Float(42.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 10_000);
    assert_eq!(receiver.property.convergence_state(), ConvergenceState::Active);
    assert!(receiver.property.is_scheduled());

    // Past the extrapolation limit the stream is quiet: active convergence
    // hands off to resting.
    receiver.replicator.advance_to(10_300, 2);
    receiver.property_type.converge_now();
    assert_eq!(receiver.property.convergence_state(), ConvergenceState::Resting);
    assert!(receiver.property.is_scheduled());

    // Once the resting duration elapses the property lands exactly on the
    // last received value and leaves the state machine.
    receiver.replicator.advance_to(10_550, 3);
    receiver.property_type.converge_now();
    assert_eq!(receiver.property.convergence_state(), ConvergenceState::None);
    assert!(!receiver.property.is_scheduled());
    assert_float_near(&receiver.cell.get(), 42.0);
}

#[test]
fn initialization_round_trips_every_kind() {
    let samples = [
        Value::Bool(true),
        Value::Char(b'k'),
        Value::Int8(-8),
        Value::Int16(-1600),
        Value::Int32(-320_000),
        Value::Int64(-64_000_000_000),
        Value::Uint8(250),
        Value::Uint16(65_000),
        Value::Uint32(4_000_000_000),
        Value::Uint64(u64::MAX - 1),
        Value::Float(1.25),
        Value::Double(-2.5e-9),
        Value::IntVec2([1, -2]),
        Value::IntVec3([3, -4, 5]),
        Value::IntVec4([-6, 7, -8, 9]),
        Value::Vec2([0.5, -0.5]),
        Value::Vec3([1.0, 2.0, 3.0]),
        Value::Vec4([4.0, 5.0, 6.0, 7.0]),
        Value::Quat([0.0, 0.0, 0.0, 1.0]),
        Value::Mat2([1.0, 0.0, 0.0, 1.0]),
        Value::Mat3([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        Value::Mat4([0.25; 16]),
        Value::Str("replicated".into()),
    ];
    for sample in samples {
        let (sender, receiver) = sender_receiver(sample.kind(), &|_| {});
        sender.cell.set(sample.clone());
        transfer(&sender, &receiver, ReplicationPhase::Initialization, 100);
        assert_eq!(receiver.cell.get(), sample);
    }
}

#[test]
fn half_floats_shrink_the_payload() {
    let configure = |property_type: &PropertyType| {
        property_type.set_use_half_floats(true).unwrap();
    };
    let (sender, receiver) = sender_receiver(ValueKind::Vec2, &configure);
    sender.cell.set(Value::Vec2([1.5, -0.25]));
    let bits = transfer(&sender, &receiver, ReplicationPhase::Initialization, 100);
    assert_eq!(bits, 32); // two 16-bit members
    assert_eq!(receiver.cell.get(), Value::Vec2([1.5, -0.25]));
}

#[test]
fn scheduling_parity_follows_the_state_machine() {
    let (sender, receiver) = sender_receiver(ValueKind::Float, &convergence_configure);
    assert_eq!(receiver.property_type.scheduled_property_count(), 0);

    receiver.replicator.advance_to(1000, 1);
    sender.cell.set(Value::Float(2.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 1000);
    assert_eq!(receiver.property.convergence_state(), ConvergenceState::Active);
    assert!(receiver.property.is_scheduled());
    assert_eq!(receiver.property_type.scheduled_property_count(), 1);

    receiver.property.unschedule();
    assert_eq!(receiver.property.convergence_state(), ConvergenceState::None);
    assert!(!receiver.property.is_scheduled());
    assert_eq!(receiver.property_type.scheduled_property_count(), 0);
}

#[test]
fn authoritative_fixed_properties_never_schedule() {
    // The sender's channel authority matches its own role under fixed
    // authority; receiving a change must not schedule convergence.
    let sender = peer(ValueKind::Float, Role::Server, &convergence_configure);
    let helper = peer(ValueKind::Float, Role::Server, &convergence_configure);

    helper.cell.set(Value::Float(9.0));
    let mut writer = BitWriter::new();
    helper
        .property
        .serialize(&mut writer, ReplicationPhase::Change, 500)
        .unwrap();
    let bytes = writer.to_bytes();
    let mut reader = BitReader::new(&bytes);
    sender
        .property
        .deserialize(&mut reader, ReplicationPhase::Change, 500)
        .unwrap();

    assert_eq!(sender.property.convergence_state(), ConvergenceState::Active);
    assert!(!sender.property.is_scheduled());
    assert_eq!(sender.property_type.scheduled_property_count(), 0);
}

#[test]
fn dropped_properties_are_pruned_from_the_scheduler() {
    let (sender, receiver) = sender_receiver(ValueKind::Float, &convergence_configure);
    receiver.replicator.advance_to(1000, 1);
    sender.cell.set(Value::Float(3.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 1000);
    assert_eq!(receiver.property_type.scheduled_property_count(), 1);

    drop(receiver.property);
    receiver.replicator.advance_to(1100, 2);
    receiver.property_type.converge_now();
    assert_eq!(receiver.property_type.scheduled_property_count(), 0);
}

fn interpolation_configure(property_type: &PropertyType) {
    property_type.set_use_convergence(true).unwrap();
    property_type.set_use_interpolation(true).unwrap();
    property_type.set_sample_time_offset(0).unwrap();
    property_type.set_active_convergence_weight(1.0).unwrap();
}

#[test]
fn curve_window_retains_at_most_one_stale_sentinel() {
    let (sender, receiver) = sender_receiver(ValueKind::Float, &interpolation_configure);

    let mut frame = 1;
    let mut timestamp = 0;
    while timestamp <= 2500 {
        receiver.replicator.advance_to(timestamp, frame);
        sender.cell.set(Value::Float(timestamp as f32 / 1000.0));
        transfer(&sender, &receiver, ReplicationPhase::Change, timestamp);
        timestamp += 250;
        frame += 1;
    }

    // The window at the last update started at 2.5 s - 1 s = 1.5 s; at
    // most one retained control point may predate it.
    let times = receiver.property.received_sample_times(0);
    assert!(!times.is_empty());
    let stale = times.iter().filter(|time| **time < 1.5).count();
    assert!(stale <= 1, "stale control points: {times:?}");
}

#[test]
fn samples_behind_the_window_are_dropped() {
    let (sender, receiver) = sender_receiver(ValueKind::Float, &interpolation_configure);

    receiver.replicator.advance_to(5000, 1);
    sender.cell.set(Value::Float(1.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 5000);
    assert_eq!(receiver.property.received_sample_times(0).len(), 1);

    // A payload stamped more than a second behind local time is late
    // jitter; its sample never enters the curve.
    receiver.replicator.advance_to(6500, 2);
    sender.cell.set(Value::Float(2.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 5200);
    assert_eq!(receiver.property.received_sample_times(0).len(), 1);
}

#[test]
fn interpolated_receivers_track_the_sampled_curve() {
    let (sender, receiver) = sender_receiver(ValueKind::Float, &interpolation_configure);

    receiver.replicator.advance_to(1000, 1);
    sender.cell.set(Value::Float(0.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 1000);

    receiver.replicator.advance_to(1500, 2);
    sender.cell.set(Value::Float(10.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 1500);

    // With full convergence weight, the value lands on the curve sample at
    // the current sample time (the newest control point).
    let sampled = receiver.property.current_sampled_value();
    assert_eq!(receiver.cell.get(), sampled);
    assert_float_near(&sampled, 10.0);
}

#[test]
fn convergence_state_changes_notify_when_opted_in() {
    let (sender, receiver) = sender_receiver(ValueKind::Float, &|property_type| {
        convergence_configure(property_type);
        property_type.set_extrapolation_limit(250).unwrap();
        property_type.set_resting_convergence_duration(250).unwrap();
    });
    receiver
        .property_type
        .set_notify_on_convergence_state_change(true);

    receiver.replicator.advance_to(1000, 1);
    sender.cell.set(Value::Float(1.0));
    transfer(&sender, &receiver, ReplicationPhase::Change, 1000);

    receiver.replicator.advance_to(1300, 2);
    receiver.property_type.converge_now();
    receiver.replicator.advance_to(1600, 3);
    receiver.property_type.converge_now();

    let events = receiver.replicator.convergence_events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            ConvergenceState::Active,
            ConvergenceState::Resting,
            ConvergenceState::None
        ]
    );
}
