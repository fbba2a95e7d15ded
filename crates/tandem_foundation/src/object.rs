//! Identifiers for object-model instances, classes, and properties.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Object identifier with generational index for stale reference detection.
///
/// The generation counter increments when an object slot is reused after the
/// object was destroyed, so an id held by a dead association never aliases a
/// newer object.
///
/// # Layout
/// - `index`: 64-bit index into object storage
/// - `generation`: 32-bit generation counter
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObjectId {
    /// Index into object storage.
    pub index: u64,
    /// Generation counter for stale reference detection.
    pub generation: u32,
}

impl ObjectId {
    /// Creates a new object ID with the given index and generation.
    #[must_use]
    pub const fn new(index: u64, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.index)
    }
}

/// Identifier of a class in a built schema.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassId(pub u32);

impl ClassId {
    /// Returns the id as a table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

/// Identifier of a property in a built schema.
///
/// Property ids are stable for the lifetime of the schema and unique across
/// all of its classes. Inherited properties keep the id of their declaration.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PropertyId(pub u32);

impl PropertyId {
    /// Returns the id as a table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyId({})", self.0)
    }
}

/// Identity of one association endpoint: a property of one instance.
///
/// Two refs built separately for the same owner and property compare equal,
/// so they can key listener tables, frozen-context registrations, and
/// suspension counts.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EndpointRef {
    /// The instance owning the endpoint.
    pub owner: ObjectId,
    /// The property the endpoint stores.
    pub property: PropertyId,
}

impl EndpointRef {
    /// Creates a new endpoint ref.
    #[must_use]
    pub const fn new(owner: ObjectId, property: PropertyId) -> Self {
        Self { owner, property }
    }
}
