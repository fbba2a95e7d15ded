//! Map association ends.
//!
//! Keys are scalars; values are unique, so an element appears under at most
//! one key. Putting an element that is already present under another key
//! moves it, and putting under a taken key evicts the previous value.

use std::sync::Arc;

use tandem_foundation::{
    EndpointRef, Error, EventKind, Modification, ObjectId, PropertyId, Result, Slot, Value,
};
use tracing::trace;

use super::sync::PeerSlot;
use super::{change_event, Association, Deferred, Model};
use crate::endpoint::{ElementMap, EndpointData};
use crate::listener::Phase;

impl Model {
    /// Entries of a map, in key order for sorted maps and insertion order
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not a map of the object or its
    /// contents cannot be loaded.
    pub fn entries(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
    ) -> Result<Vec<(Value, ObjectId)>> {
        let association = self.map_association(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        Ok(self.raw_map(association.endpoint)?.entries())
    }

    /// Keys of a map, in iteration order.
    ///
    /// # Errors
    ///
    /// Same as [`Self::entries`].
    pub fn keys(&mut self, owner: ObjectId, property: PropertyId) -> Result<Vec<Value>> {
        let association = self.map_association(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        Ok(self.raw_map(association.endpoint)?.keys())
    }

    /// The element stored under `key`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::entries`].
    pub fn get(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        key: &Value,
    ) -> Result<Option<ObjectId>> {
        let association = self.map_association(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        Ok(self.raw_map(association.endpoint)?.get(key))
    }

    /// Stores `element` under `key`. Returns the element that was under `key`
    /// before, which is removed from the map.
    ///
    /// # Errors
    ///
    /// Returns a type-mismatch error for a key of the wrong type, and an
    /// error if the element does not fit or a validator or listener refuses.
    pub fn put(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        key: Value,
        element: ObjectId,
    ) -> Result<Option<ObjectId>> {
        let association = self.map_association(owner, property)?;
        association.check_key(&key)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        self.check_element(&association, element)?;
        let displaced = self.raw_map(endpoint)?.get(&key).filter(|d| *d != element);
        let touched: Vec<ObjectId> = displaced.into_iter().chain(Some(element)).collect();
        self.prepare_peers(&association, &touched)?;

        let modification = Arc::new(Modification::Put {
            key: key.clone(),
            element,
        });
        let mut deferred = Deferred::default();
        self.put_core(endpoint, key, element, &modification, &mut deferred)?;
        deferred.finish()?;
        Ok(displaced)
    }

    /// Stores several entries. Every key and element is validated before
    /// the first is stored.
    ///
    /// # Errors
    ///
    /// Same as [`Self::put`].
    pub fn put_all(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        entries: &[(Value, ObjectId)],
    ) -> Result<()> {
        let association = self.map_association(owner, property)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        for (key, element) in entries {
            association.check_key(key)?;
            self.check_element(&association, *element)?;
        }
        let map = self.raw_map(endpoint)?;
        let touched: Vec<ObjectId> = entries
            .iter()
            .flat_map(|(key, element)| map.get(key).into_iter().chain(Some(*element)))
            .collect();
        self.prepare_peers(&association, &touched)?;

        let modification = Arc::new(Modification::PutAll { count: entries.len() });
        let mut deferred = Deferred::default();
        for (key, element) in entries {
            self.put_core(endpoint, key.clone(), *element, &modification, &mut deferred)?;
        }
        deferred.finish()
    }

    /// Removes the entry under `key`; returns its element.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener refuses or a peer cannot be updated.
    pub fn remove_key(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        key: &Value,
    ) -> Result<Option<ObjectId>> {
        let association = self.map_association(owner, property)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        let Some(element) = self.raw_map(endpoint)?.get(key) else {
            return Ok(None);
        };
        self.prepare_peers(&association, &[element])?;

        let modification = Arc::new(Modification::RemoveKey { key: key.clone() });
        let mut deferred = Deferred::default();
        self.remove_key_core(endpoint, key, &modification, &mut deferred)?;
        deferred.finish()?;
        Ok(Some(element))
    }

    /// Removes the entry holding `element`; returns its key.
    ///
    /// # Errors
    ///
    /// Same as [`Self::remove_key`].
    pub fn remove_value(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        element: ObjectId,
    ) -> Result<Option<Value>> {
        let association = self.map_association(owner, property)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        let Some(key) = self.raw_map(endpoint)?.key_of(element).cloned() else {
            return Ok(None);
        };
        self.prepare_peers(&association, &[element])?;

        let modification = Arc::new(Modification::RemoveValue { element });
        let mut deferred = Deferred::default();
        self.remove_key_core(endpoint, &key, &modification, &mut deferred)?;
        deferred.finish()?;
        Ok(Some(key))
    }

    fn map_association(&self, owner: ObjectId, property: PropertyId) -> Result<Association> {
        let association = self.association(owner, property)?;
        if !association.shape.is_map() {
            return Err(self.wrong_shape(property, &association, "a map"));
        }
        Ok(association)
    }

    fn raw_map(&self, endpoint: EndpointRef) -> Result<ElementMap> {
        match &self.endpoint(endpoint)?.data {
            EndpointData::Map(map) => Ok(map.clone()),
            _ => Err(Error::invalid_argument(format!(
                "{} is not a map",
                self.schema.qualified_name(endpoint.property)
            ))),
        }
    }

    fn map_mut(&mut self, endpoint: EndpointRef) -> Result<&mut ElementMap> {
        let endpoint = self.endpoint_mut(endpoint)?;
        endpoint.touch();
        match &mut endpoint.data {
            EndpointData::Map(map) => Ok(map),
            _ => Err(Error::invalid_state("endpoint is not a map")),
        }
    }

    /// Binds `key` to `element`, moving the element off any previous key and
    /// evicting the previous holder of `key`.
    pub(crate) fn put_core(
        &mut self,
        endpoint: EndpointRef,
        key: Value,
        element: ObjectId,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        self.ensure_loaded(endpoint)?;
        let map = self.raw_map(endpoint)?;
        let previous_key = map.key_of(element).cloned();
        if previous_key.as_ref() == Some(&key) {
            return Ok(());
        }
        let displaced = map.get(&key);

        let event = change_event(
            endpoint,
            EventKind::Element,
            modification,
            previous_key
                .clone()
                .map(|k| Slot::object(element).with_key(Some(k))),
            Some(Slot::object(element).with_key(Some(key.clone()))),
        );
        let evicted = displaced.map(|displaced| {
            change_event(
                endpoint,
                EventKind::Element,
                modification,
                Some(Slot::object(displaced).with_key(Some(key.clone()))),
                None,
            )
        });
        self.fire(endpoint, Phase::Modifying, &event)?;
        if let Some(evicted) = &evicted {
            self.fire(endpoint, Phase::Modifying, evicted)?;
        }
        trace!(map = ?endpoint, key = %key, element = %element, displaced = ?displaced, "put");

        let map = self.map_mut(endpoint)?;
        if let Some(previous_key) = &previous_key {
            map.remove_key(previous_key);
        }
        map.insert(key.clone(), element);

        let suspended = self.suspend(endpoint)?;
        if let Some(opposite) = self.opposite_of(endpoint)? {
            if let Some(displaced) = displaced {
                let peer = EndpointRef::new(displaced, opposite);
                if let Err(err) = self.detach_peer(peer, endpoint.owner, modification, deferred) {
                    if let Ok(map) = self.map_mut(endpoint) {
                        map.insert(key, displaced);
                        if let Some(previous_key) = previous_key {
                            map.insert(previous_key, element);
                        }
                    }
                    self.restore(endpoint, suspended);
                    return Err(err);
                }
            }
            let peer = EndpointRef::new(element, opposite);
            if let Err(err) = self.attach_peer(
                peer,
                endpoint.owner,
                PeerSlot::key(key.clone()),
                modification,
                deferred,
            ) {
                if let Ok(map) = self.map_mut(endpoint) {
                    map.remove_key(&key);
                    if let Some(previous_key) = previous_key {
                        map.insert(previous_key, element);
                    }
                }
                self.restore(endpoint, suspended);
                return Err(err);
            }
        }
        self.restore(endpoint, suspended);

        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        if let Some(evicted) = &evicted {
            deferred.record(self.fire(endpoint, Phase::Modified, evicted));
        }
        Ok(())
    }

    /// Removes the entry under `key`, if any.
    pub(crate) fn remove_key_core(
        &mut self,
        endpoint: EndpointRef,
        key: &Value,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        self.ensure_loaded(endpoint)?;
        let Some(element) = self.raw_map(endpoint)?.get(key) else {
            return Ok(());
        };
        let event = change_event(
            endpoint,
            EventKind::Element,
            modification,
            Some(Slot::object(element).with_key(Some(key.clone()))),
            None,
        );
        self.fire(endpoint, Phase::Modifying, &event)?;
        trace!(map = ?endpoint, key = %key, "remove key");

        self.map_mut(endpoint)?.remove_key(key);
        let suspended = self.suspend(endpoint)?;
        if let Some(opposite) = self.opposite_of(endpoint)? {
            let peer = EndpointRef::new(element, opposite);
            if let Err(err) = self.detach_peer(peer, endpoint.owner, modification, deferred) {
                if let Ok(map) = self.map_mut(endpoint) {
                    map.insert(key.clone(), element);
                }
                self.restore(endpoint, suspended);
                return Err(err);
            }
        }
        self.restore(endpoint, suspended);

        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }
}
