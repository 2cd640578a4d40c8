use thiserror::Error;

use crate::value::ValueKind;

/// Contract violations reported by properties and property types.
///
/// These are programming errors, not wire errors: state is left unchanged
/// and the violation is also logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// Attempted to reconfigure a property type after activation
    #[error("property type `{name}` is already activated, configuration is frozen")]
    Frozen { name: String },

    /// Attempted to activate a property type twice
    #[error("property type `{name}` is already activated")]
    AlreadyActivated { name: String },

    /// Attempted an operation that requires activation first
    #[error("property type `{name}` is not activated")]
    NotActivated { name: String },

    /// A setting only meaningful for arithmetic kinds was enabled on a
    /// non-arithmetic property type
    #[error("`{operation}` requires an arithmetic kind, but `{name}` is {kind:?}")]
    NonArithmetic {
        name: String,
        kind: ValueKind,
        operation: &'static str,
    },

    /// Half-floats were enabled on a non-floating-point property type
    #[error("half floats require a floating-point kind, but `{name}` is {kind:?}")]
    NonFloatingPoint { name: String, kind: ValueKind },

    /// Interpolation was enabled on a kind with too many primitive members
    /// for the received-value curve set
    #[error("interpolation supports at most four primitive members, but `{name}` is {kind:?}")]
    TooManyMembers { name: String, kind: ValueKind },

    /// A typed configuration value did not match the property type's kind
    #[error("value of kind {value_kind:?} does not fit property type `{name}` of kind {kind:?}")]
    KindMismatch {
        name: String,
        kind: ValueKind,
        value_kind: ValueKind,
    },

    /// An empty value was passed where a concrete value is required
    #[error("empty value set on property `{name}`")]
    EmptyValue { name: String },
}
