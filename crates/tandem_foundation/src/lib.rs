//! Identifiers, values, errors, and modification events for Tandem.
//!
//! This crate provides:
//! - [`ObjectId`], [`ClassId`], [`PropertyId`], [`EndpointRef`] - Identifiers
//! - [`Value`] - Totally ordered scalar values
//! - [`Type`] - Type descriptors for scalar validation
//! - [`Error`] - Rich error types with context
//! - [`Modification`] and [`ModificationEvent`] - The change/event model

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod object;
pub mod types;
pub mod value;

pub use error::{Error, ErrorContext, ErrorKind};
pub use event::{
    EventKind, Modification, ModificationEvent, ModificationType, PropertyVersion, Slot,
};
pub use object::{ClassId, EndpointRef, ObjectId, PropertyId};
pub use types::Type;
pub use value::Value;

/// Result type alias using the Tandem error type.
pub type Result<T> = std::result::Result<T, Error>;
