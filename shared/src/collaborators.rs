//! Contracts for the external collaborators the engine is driven by.
//!
//! The transport peer, the channel layer, and the replicator live outside
//! this crate; the engine only sees them through these traits.

use crate::property::ConvergenceState;
use crate::types::{AuthorityMode, Direction, FrameId, ReplicationPhase, Role, TimeMs};

/// One observed property change, handed to the notification hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyChangeEvent<'a> {
    pub property_name: &'a str,
    pub timestamp: TimeMs,
    pub phase: ReplicationPhase,
    pub direction: Direction,
}

/// The per-peer owner of all property types and the tick loop.
///
/// Supplies wall-clock time and frame ids, and receives the engine's
/// notifications. Local time is expected to be monotonic; regressions are
/// reported as errors by the tick.
pub trait Replicator: Send + Sync {
    /// Peer-local wall-clock time.
    fn local_time(&self) -> TimeMs;

    /// Peer-local frame counter.
    fn local_frame_id(&self) -> FrameId;

    /// This peer's role in the session.
    fn role(&self) -> Role;

    /// Called when a watched property changes, per the channel's
    /// notification flags.
    fn on_property_change(&self, _event: PropertyChangeEvent<'_>) {}

    /// Called on convergence state transitions for property types that
    /// opted in.
    fn on_convergence_state_change(&self, _property_name: &str, _state: ConvergenceState) {}
}

/// The grouping above properties, referenced for authority, notification
/// policy, and timestamp propagation only.
pub trait ReplicaChannel: Send + Sync {
    /// Which role currently holds authority over this channel's values.
    fn authority(&self) -> Role;

    /// Whether that authority is pinned or transferable.
    fn authority_mode(&self) -> AuthorityMode;

    fn notify_on_incoming_property_change(&self) -> bool {
        false
    }

    fn notify_on_outgoing_property_change(&self) -> bool {
        false
    }

    /// Receives last-change timestamps so the channel and its replica can
    /// track recency. Timestamps may arrive out of order; implementations
    /// must not reject older ones.
    fn note_change_timestamp(&self, _timestamp: TimeMs) {}
}
