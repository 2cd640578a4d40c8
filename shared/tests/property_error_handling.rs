//! Tests for Property contract enforcement: value access rules, bitstream
//! failure handling, and change notifications.

use std::sync::{Arc, Mutex, RwLock};

use mirra_shared::{
    AuthorityMode, BitReader, BitWriter, Direction, FrameId, Property, PropertyChangeEvent,
    PropertyError, PropertyType, ReplicaChannel, ReplicationPhase, Replicator, Role, SharedValue,
    TimeMs, Value, ValueAccess, ValueKind, INVALID_TIMESTAMP,
};

struct StubReplicator {
    changes: Mutex<Vec<(String, Direction)>>,
}

impl StubReplicator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            changes: Mutex::new(Vec::new()),
        })
    }
}

impl Replicator for StubReplicator {
    fn local_time(&self) -> TimeMs {
        1000
    }

    fn local_frame_id(&self) -> FrameId {
        1
    }

    fn role(&self) -> Role {
        Role::Client
    }

    fn on_property_change(&self, event: PropertyChangeEvent<'_>) {
        self.changes
            .lock()
            .unwrap()
            .push((event.property_name.to_owned(), event.direction));
    }
}

struct NotifyingChannel;

impl ReplicaChannel for NotifyingChannel {
    fn authority(&self) -> Role {
        Role::Server
    }

    fn authority_mode(&self) -> AuthorityMode {
        AuthorityMode::Fixed
    }

    fn notify_on_outgoing_property_change(&self) -> bool {
        true
    }
}

/// Accessor whose readability can be toggled, for the getter-fallback
/// contract.
#[derive(Clone)]
struct FlakyAccess {
    value: Arc<RwLock<Value>>,
    readable: Arc<RwLock<bool>>,
}

impl FlakyAccess {
    fn new(value: Value) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            readable: Arc::new(RwLock::new(true)),
        }
    }

    fn set_readable(&self, readable: bool) {
        *self.readable.write().unwrap() = readable;
    }
}

impl ValueAccess for FlakyAccess {
    fn get(&self) -> Value {
        if *self.readable.read().unwrap() {
            self.value.read().unwrap().clone()
        } else {
            Value::Empty
        }
    }

    fn set(&mut self, value: Value) {
        *self.value.write().unwrap() = value;
    }
}

fn activated_type(kind: ValueKind) -> (PropertyType, Arc<StubReplicator>) {
    let property_type = PropertyType::new("prop", kind);
    let replicator = StubReplicator::new();
    property_type.activate(replicator.clone()).unwrap();
    (property_type, replicator)
}

#[test]
fn set_value_refuses_empty_values() {
    let (property_type, _) = activated_type(ValueKind::Float);
    let cell = SharedValue::new(Value::Float(1.0));
    let property = Property::new("prop", &property_type, Box::new(cell.clone()));

    let result = property.set_value(Value::Empty);
    assert!(matches!(result, Err(PropertyError::EmptyValue { .. })));
    assert_eq!(cell.get(), Value::Float(1.0));
}

#[test]
fn set_value_refuses_mismatched_kinds() {
    let (property_type, _) = activated_type(ValueKind::Float);
    let cell = SharedValue::new(Value::Float(1.0));
    let property = Property::new("prop", &property_type, Box::new(cell.clone()));

    let result = property.set_value(Value::Int32(3));
    assert!(matches!(result, Err(PropertyError::KindMismatch { .. })));
    assert_eq!(cell.get(), Value::Float(1.0));

    property.set_value(Value::Float(2.0)).unwrap();
    assert_eq!(cell.get(), Value::Float(2.0));
}

#[test]
fn unreadable_values_fall_back_to_the_last_value() {
    let (property_type, _) = activated_type(ValueKind::Float);
    let access = FlakyAccess::new(Value::Float(7.0));
    let property = Property::new("prop", &property_type, Box::new(access.clone()));

    // Snapshot 7.0 into the last value, then make the getter fail.
    property.update_last_value(true);
    access.set_readable(false);
    assert_eq!(property.value(), Value::Float(7.0));

    // An unreadable value equals the last value: no change detected.
    assert!(!property.has_changed_at_all());
}

#[test]
fn serialize_overflow_fails_without_panicking() {
    let (property_type, _) = activated_type(ValueKind::Vec3);
    let cell = SharedValue::new(Value::Vec3([1.0, 2.0, 3.0]));
    let property = Property::new("prop", &property_type, Box::new(cell));

    // Three f32 members cannot fit in two bytes.
    let mut writer = BitWriter::with_capacity(2);
    let result = property.serialize(&mut writer, ReplicationPhase::Initialization, 100);
    assert!(result.is_err());
}

#[test]
fn truncated_payloads_abandon_the_update() {
    let (property_type, _) = activated_type(ValueKind::Vec3);
    let cell = SharedValue::new(Value::Vec3([1.0, 2.0, 3.0]));
    let property = Property::new("prop", &property_type, Box::new(cell));

    let mut writer = BitWriter::new();
    property
        .serialize(&mut writer, ReplicationPhase::Initialization, 100)
        .unwrap();
    let bytes = writer.to_bytes();

    let receiver_cell = SharedValue::new(Value::Vec3([9.0, 9.0, 9.0]));
    let receiver = Property::new("prop", &property_type, Box::new(receiver_cell.clone()));

    // Half the payload is missing: the read fails and no state changes.
    let truncated = &bytes[..bytes.len() / 2];
    let mut reader = BitReader::new(truncated);
    let result = receiver.deserialize(&mut reader, ReplicationPhase::Initialization, 100);
    assert!(result.is_err());
    assert_eq!(receiver_cell.get(), Value::Vec3([9.0, 9.0, 9.0]));
    assert_eq!(receiver.last_received_change_timestamp(), INVALID_TIMESTAMP);
}

#[test]
fn outgoing_changes_notify_when_the_channel_asks() {
    let (property_type, replicator) = activated_type(ValueKind::Float);
    let cell = SharedValue::new(Value::Float(0.0));
    let property = Property::new("prop", &property_type, Box::new(cell.clone()));
    property.set_channel(Arc::new(NotifyingChannel));

    // Initialization: the first value counts as a change.
    property.react_to_changes(
        100,
        ReplicationPhase::Initialization,
        Direction::Outgoing,
        true,
        true,
    );
    // Unchanged value: no notification.
    property.react_to_changes(200, ReplicationPhase::Change, Direction::Outgoing, true, true);
    // Changed value: notification.
    cell.set(Value::Float(5.0));
    property.react_to_changes(300, ReplicationPhase::Change, Direction::Outgoing, true, true);

    let changes = replicator.changes.lock().unwrap().clone();
    assert_eq!(
        changes,
        vec![
            ("prop".to_owned(), Direction::Outgoing),
            ("prop".to_owned(), Direction::Outgoing)
        ]
    );
    assert_eq!(property.last_change_timestamp(), 300);
}

#[test]
fn validity_requires_channel_and_activation() {
    let property_type = PropertyType::new("prop", ValueKind::Float);
    let cell = SharedValue::new(Value::Float(0.0));
    let property = Property::new("prop", &property_type, Box::new(cell));
    assert!(!property.is_valid());

    property.set_channel(Arc::new(NotifyingChannel));
    assert!(!property.is_valid());

    property_type.activate(StubReplicator::new()).unwrap();
    assert!(property.is_valid());

    property.clear_channel();
    assert!(!property.is_valid());
}

#[test]
fn properties_compare_by_name() {
    let (property_type, _) = activated_type(ValueKind::Float);
    let a = Property::new(
        "alpha",
        &property_type,
        Box::new(SharedValue::new(Value::Float(0.0))),
    );
    let a2 = Property::new(
        "alpha",
        &property_type,
        Box::new(SharedValue::new(Value::Float(1.0))),
    );
    let b = Property::new(
        "beta",
        &property_type,
        Box::new(SharedValue::new(Value::Float(0.0))),
    );
    assert_eq!(a, a2);
    assert_ne!(a, b);
}
