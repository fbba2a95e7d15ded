//! Schemas, association endpoints, and peer synchronization for Tandem.
//!
//! This crate provides:
//! - [`Schema`] - Immutable class and property metadata, built from
//!   [`ClassSchema`] declarations
//! - [`Model`] - Instances of a schema whose bidirectional associations keep
//!   both ends in sync
//! - [`ModificationListener`] and [`Validator`] - Observers and guards of
//!   association changes
//! - [`ScalarLoader`] and [`AssociationLoader`] - Lazy-loading collaborators
//! - [`SchemaRegistry`] - Process-wide cache of built schemas

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod frozen;
pub mod listener;
pub mod loader;
pub mod metadata;
pub mod registry;
pub mod schema;
pub mod validator;

mod endpoint;
mod model;
mod object;

pub use config::{ListenerErrorMode, ModelConfig};
pub use endpoint::LoadState;
pub use frozen::FrozenContext;
pub use listener::{ListenerList, ModificationListener};
pub use loader::{
    AssociationLoader, AssociationRequest, LoadedAssociation, ScalarLoader, ScalarRequest,
    ScalarRow,
};
pub use metadata::{
    AssociationShape, ElementOrdering, KeyPath, ModelClass, ModelProperty, PropertyKind, Schema,
    SchemaBuilder,
};
pub use model::{ElementCursor, KeyCursor, Model};
pub use registry::SchemaRegistry;
pub use schema::{ClassSchema, OrderBy, PropertyDecl, SortPart};
pub use validator::{CustomValidator, Validator, ValidatorChain};
