//! Fail-fast cursors over collections and maps.
//!
//! A cursor remembers the endpoint's modification count. Any change made
//! other than through the cursor itself makes the next cursor call fail with
//! a concurrent-modification error.

use std::sync::Arc;

use tandem_foundation::{
    EndpointRef, Error, ErrorKind, Modification, ObjectId, PropertyId, Result, Value,
};

use super::{Deferred, Model};
use crate::endpoint::{Endpoint, EndpointData};

fn check(endpoint: &Endpoint, expected: u64) -> Result<()> {
    if endpoint.mod_count == expected {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::ConcurrentModification))
    }
}

/// Walks the elements of a list or set.
#[derive(Clone, Debug)]
pub struct ElementCursor {
    endpoint: EndpointRef,
    position: usize,
    last: Option<ObjectId>,
    expected_mod_count: u64,
}

impl ElementCursor {
    /// Returns the next element, or `None` at the end.
    ///
    /// # Errors
    ///
    /// Returns a concurrent-modification error if the collection changed
    /// since the cursor was created or last removed through.
    pub fn next(&mut self, model: &Model) -> Result<Option<ObjectId>> {
        let endpoint = model.endpoint(self.endpoint)?;
        check(endpoint, self.expected_mod_count)?;
        let element = endpoint.element_at(self.position);
        if element.is_some() {
            self.position += 1;
        }
        self.last = element;
        Ok(element)
    }

    /// Removes the element last returned by [`Self::next`], with the usual
    /// peer updates.
    ///
    /// # Errors
    ///
    /// Returns an invalid-state error if there is no such element, a
    /// concurrent-modification error as for `next`, and any error of the
    /// removal itself.
    pub fn remove(&mut self, model: &mut Model) -> Result<()> {
        let Some(element) = self.last else {
            return Err(Error::invalid_state("cursor has no element to remove"));
        };
        check(model.endpoint(self.endpoint)?, self.expected_mod_count)?;
        let association = model.association(self.endpoint.owner, self.endpoint.property)?;
        model.prepare_peers(&association, &[element])?;

        let modification = Arc::new(Modification::CursorRemove);
        let mut deferred = Deferred::default();
        model.remove_core(self.endpoint, element, true, &modification, &mut deferred)?;
        self.last = None;
        self.position = self.position.saturating_sub(1);
        self.expected_mod_count = model.endpoint(self.endpoint)?.mod_count;
        deferred.finish()
    }
}

/// Walks the entries of a map.
#[derive(Clone, Debug)]
pub struct KeyCursor {
    endpoint: EndpointRef,
    position: usize,
    last: Option<Value>,
    expected_mod_count: u64,
}

impl KeyCursor {
    /// Returns the next entry, or `None` at the end.
    ///
    /// # Errors
    ///
    /// Returns a concurrent-modification error if the map changed since the
    /// cursor was created or last removed through.
    pub fn next(&mut self, model: &Model) -> Result<Option<(Value, ObjectId)>> {
        let endpoint = model.endpoint(self.endpoint)?;
        check(endpoint, self.expected_mod_count)?;
        let entry = match &endpoint.data {
            EndpointData::Map(map) => map
                .key_at(self.position)
                .and_then(|key| map.get(&key).map(|element| (key, element))),
            _ => None,
        };
        if entry.is_some() {
            self.position += 1;
        }
        self.last = entry.as_ref().map(|(key, _)| key.clone());
        Ok(entry)
    }

    /// Removes the entry last returned by [`Self::next`].
    ///
    /// # Errors
    ///
    /// Same as [`ElementCursor::remove`].
    pub fn remove(&mut self, model: &mut Model) -> Result<()> {
        let Some(key) = self.last.clone() else {
            return Err(Error::invalid_state("cursor has no entry to remove"));
        };
        let endpoint = model.endpoint(self.endpoint)?;
        check(endpoint, self.expected_mod_count)?;
        let element = match &endpoint.data {
            EndpointData::Map(map) => map.get(&key),
            _ => None,
        };
        let association = model.association(self.endpoint.owner, self.endpoint.property)?;
        model.prepare_peers(&association, &element.into_iter().collect::<Vec<_>>())?;

        let modification = Arc::new(Modification::CursorRemove);
        let mut deferred = Deferred::default();
        model.remove_key_core(self.endpoint, &key, &modification, &mut deferred)?;
        self.last = None;
        self.position = self.position.saturating_sub(1);
        self.expected_mod_count = model.endpoint(self.endpoint)?.mod_count;
        deferred.finish()
    }
}

impl Model {
    /// Opens a cursor over a list or set.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not a collection of the object or
    /// its contents cannot be loaded.
    pub fn cursor(&mut self, owner: ObjectId, property: PropertyId) -> Result<ElementCursor> {
        let association = self.association(owner, property)?;
        if !association.shape.is_collection() {
            return Err(self.wrong_shape(property, &association, "a collection"));
        }
        self.ensure_loaded(association.endpoint)?;
        Ok(ElementCursor {
            endpoint: association.endpoint,
            position: 0,
            last: None,
            expected_mod_count: self.endpoint(association.endpoint)?.mod_count,
        })
    }

    /// Opens a cursor over the entries of a map.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not a map of the object or its
    /// contents cannot be loaded.
    pub fn key_cursor(&mut self, owner: ObjectId, property: PropertyId) -> Result<KeyCursor> {
        let association = self.association(owner, property)?;
        if !association.shape.is_map() {
            return Err(self.wrong_shape(property, &association, "a map"));
        }
        self.ensure_loaded(association.endpoint)?;
        Ok(KeyCursor {
            endpoint: association.endpoint,
            position: 0,
            last: None,
            expected_mod_count: self.endpoint(association.endpoint)?.mod_count,
        })
    }
}
