//! Object lifecycle management with generational indices.
//!
//! The `ObjectStore` owns every object model of a [`Model`](crate::Model)
//! and tracks generations to detect stale references to destroyed objects.

// Allow u64 to usize casts - we target 64-bit systems
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;

use tandem_foundation::{ClassId, EndpointRef, Error, ObjectId, PropertyId, Result, Value};

use crate::endpoint::Endpoint;
use crate::frozen::FrozenContext;
use crate::listener::ListenerList;

/// A scalar property value plus whether it has been loaded.
#[derive(Clone, Debug)]
pub(crate) struct ScalarSlot {
    pub value: Value,
    pub loaded: bool,
}

/// The state behind one instance: scalars, association endpoints, frozen
/// contexts, embedding link and scalar listeners.
#[derive(Clone, Debug)]
pub(crate) struct ObjectModel {
    pub class: ClassId,
    pub scalars: HashMap<PropertyId, ScalarSlot>,
    /// Keyed by storage property, so covariant views share an endpoint.
    pub endpoints: HashMap<PropertyId, Endpoint>,
    pub frozen: HashMap<PropertyId, FrozenContext>,
    /// The parent slot, for embedded instances.
    pub embedded_in: Option<EndpointRef>,
    pub listeners: ListenerList,
}

impl ObjectModel {
    pub fn new(class: ClassId) -> Self {
        Self {
            class,
            scalars: HashMap::new(),
            endpoints: HashMap::new(),
            frozen: HashMap::new(),
            embedded_in: None,
            listeners: ListenerList::new(),
        }
    }
}

/// Manages object lifecycle and generation tracking.
///
/// Objects are allocated from a free list when available, otherwise
/// new indices are allocated. When an object is destroyed, its index
/// is added to the free list and its generation is incremented.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectStore {
    /// Generation counter for each object index.
    /// Even generations are free, odd generations are alive.
    generations: Vec<u32>,
    /// Object state, `None` for free slots.
    slots: Vec<Option<ObjectModel>>,
    /// Free list of indices available for reuse.
    free_list: Vec<u64>,
    /// Count of live objects.
    live_count: usize,
}

impl ObjectStore {
    /// Creates a new empty object store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new object, returns its ID.
    ///
    /// Reuses indices from the free list when available.
    pub fn spawn(&mut self, object: ObjectModel) -> ObjectId {
        self.live_count += 1;

        if let Some(index) = self.free_list.pop() {
            let idx = index as usize;
            // Was even/free, now odd/alive
            self.generations[idx] += 1;
            self.slots[idx] = Some(object);
            ObjectId::new(index, self.generations[idx])
        } else {
            let index = self.generations.len() as u64;
            // New objects start at generation 1 (odd = alive)
            self.generations.push(1);
            self.slots.push(Some(object));
            ObjectId::new(index, 1)
        }
    }

    /// Removes an object and returns its state.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is stale or already destroyed.
    pub fn destroy(&mut self, id: ObjectId) -> Result<ObjectModel> {
        self.validate(id)?;

        let idx = id.index as usize;
        // Was odd/alive, now even/free
        self.generations[idx] += 1;
        self.free_list.push(id.index);
        self.live_count -= 1;

        self.slots[idx]
            .take()
            .ok_or_else(|| Error::object_not_found(id))
    }

    /// Checks if an object exists and is not stale.
    pub fn exists(&self, id: ObjectId) -> bool {
        let idx = id.index as usize;
        if idx >= self.generations.len() {
            return false;
        }
        self.generations[idx] == id.generation && id.generation % 2 == 1
    }

    /// Validates that an object is live.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is stale or never existed.
    pub fn validate(&self, id: ObjectId) -> Result<()> {
        let idx = id.index as usize;

        if idx >= self.generations.len() {
            return Err(Error::object_not_found(id));
        }

        let current_gen = self.generations[idx];

        if current_gen != id.generation {
            // Destroyed and possibly reused
            return Err(Error::stale_object(id));
        }

        if current_gen % 2 == 0 {
            return Err(Error::object_not_found(id));
        }

        Ok(())
    }

    /// Returns the state of a live object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is stale or never existed.
    pub fn get(&self, id: ObjectId) -> Result<&ObjectModel> {
        self.validate(id)?;
        self.slots[id.index as usize]
            .as_ref()
            .ok_or_else(|| Error::object_not_found(id))
    }

    /// Returns the mutable state of a live object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is stale or never existed.
    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut ObjectModel> {
        self.validate(id)?;
        self.slots[id.index as usize]
            .as_mut()
            .ok_or_else(|| Error::object_not_found(id))
    }

    /// Returns the total number of live objects.
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Iterates over all live object IDs.
    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.generations
            .iter()
            .enumerate()
            .filter(|(_, generation)| *generation % 2 == 1)
            .map(|(idx, generation)| ObjectId::new(idx as u64, *generation))
    }

    /// Returns the current generation for an index, if it exists.
    pub fn generation(&self, index: u64) -> Option<u32> {
        self.generations.get(index as usize).copied()
    }
}
