#![forbid(unsafe_code)]

//! Core types for statetree: the dynamic [`Value`] model, pluggable
//! [`MergePolicy`] functions, and the error types raised by the runtime.
//!
//! This crate has no notion of cells or subscriptions; see
//! `statetree-runtime` for the reactive engine built on top of it.

pub mod error;
pub mod merge;
pub mod value;

pub use error::{ConfigurationError, ControllerError, MutationError, RESERVED_KEYS, is_reserved_key};
pub use merge::{MergePolicy, MergePolicyKind, deep_merge_with_delete, shallow_assign};
pub use value::{Map, Value};
