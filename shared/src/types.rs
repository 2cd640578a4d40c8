/// Engine timestamp, in milliseconds of the peer's local clock.
pub type TimeMs = i64;

/// Peer-local frame counter.
pub type FrameId = u64;

/// Timestamp value meaning "never happened".
pub const INVALID_TIMESTAMP: TimeMs = TimeMs::MIN;

/// One second, in engine time units.
pub const ONE_SECOND_MS: TimeMs = 1000;

/// Converts engine time to floating-point seconds.
pub fn time_ms_to_seconds(time: TimeMs) -> f32 {
    time as f32 / 1000.0
}

/// Converts floating-point seconds to engine time.
pub fn seconds_to_time_ms(seconds: f32) -> TimeMs {
    (seconds * 1000.0) as TimeMs
}

/// Which replication pass a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationPhase {
    /// First transfer of a property to a peer; all primitive members are
    /// emitted so the receiver starts from a complete value.
    Initialization,
    /// Steady-state change replication.
    Change,
}

/// Which way a payload is traveling relative to the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Peer role within a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn invert(self) -> Self {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }
}

/// How channel authority may move between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityMode {
    /// Authority is pinned to one role for the channel's lifetime.
    Fixed,
    /// Authority may be transferred at runtime.
    Dynamic,
}

/// Whether steady-state payloads carry every primitive member or only the
/// members that crossed their change threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationMode {
    #[default]
    All,
    Changed,
}
