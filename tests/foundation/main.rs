//! Integration tests for Layer 0: Foundation
//!
//! Tests for core types: Value, ObjectId, Error, and modification events.

mod errors;
