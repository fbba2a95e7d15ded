//! Tandem - Object models with self-synchronizing associations
//!
//! This crate re-exports all layers of the Tandem system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 1: tandem_model      — Schemas, endpoints, peer synchronization, loading
//! Layer 0: tandem_foundation — Core types (Value, ObjectId, Error, events)
//! ```

pub use tandem_foundation as foundation;
pub use tandem_model as model;
