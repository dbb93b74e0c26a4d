#![forbid(unsafe_code)]

//! Error types shared across the statetree crates.
//!
//! - [`ConfigurationError`]: fatal, raised while building a tree or parsing
//!   configuration. Never recovered internally.
//! - [`MutationError`]: raised by a mutator function. Propagated to the
//!   caller unmodified; the cell it targeted is left untouched.
//! - [`ControllerError`]: what `Controller::call` returns.

/// Child names that collide with a holder's own accessor surface.
pub const RESERVED_KEYS: [&str; 2] = ["state", "changes"];

/// Whether `key` collides with a reserved accessor name.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Construction-time configuration failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// A child key equals a reserved accessor name.
    #[error(
        "cannot create the child controller \"{key}\": the name clashes with the {key} property, use another name for the controller"
    )]
    ReservedKey { key: String },
    /// A merge policy name did not match any built-in policy.
    #[error("unknown merge policy \"{name}\" (expected shallow-assign or deep-merge-with-delete)")]
    UnknownMergePolicy { name: String },
}

/// Failure reported by a mutator function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct MutationError {
    message: String,
}

impl MutationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors returned when invoking a named controller operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("unknown mutator \"{0}\"")]
    UnknownMutator(String),
    #[error(transparent)]
    Mutation(#[from] MutationError),
}
