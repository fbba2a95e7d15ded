//! Multi-valued association ends: lists, sets and navigable sets.
//!
//! Collections write their own contents first and then update the opposite
//! end of each affected element. Lists additionally keep every indexed
//! reference on the other side in step with its position.

use std::sync::Arc;

use im::Vector;
use tandem_foundation::{
    EndpointRef, Error, EventKind, Modification, ObjectId, PropertyId, Result, Slot, Value,
};
use tracing::trace;

use super::sync::PeerSlot;
use super::{change_event, Association, Deferred, Model};
use crate::endpoint::{ElementSet, EndpointData, SortKey, Storage};
use crate::listener::Phase;
use crate::metadata::AssociationShape;

impl Model {
    /// Every element of an association, in iteration order.
    ///
    /// Maps yield their values; references yield zero or one element.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object
    /// or its contents cannot be loaded.
    pub fn elements(&mut self, owner: ObjectId, property: PropertyId) -> Result<Vec<ObjectId>> {
        let association = self.association(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        Ok(self.endpoint(association.endpoint)?.elements())
    }

    /// Number of elements of an association.
    ///
    /// # Errors
    ///
    /// Same as [`Self::elements`].
    pub fn len(&mut self, owner: ObjectId, property: PropertyId) -> Result<usize> {
        let association = self.association(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        Ok(self.endpoint(association.endpoint)?.len())
    }

    /// Returns true if the association currently links to `element`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::elements`].
    pub fn contains_element(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        element: ObjectId,
    ) -> Result<bool> {
        let association = self.association(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        Ok(self.endpoint(association.endpoint)?.holds(element))
    }

    /// Adds an element to a list (appending) or a set.
    ///
    /// A sorted or field-keyed set evicts the member holding the same key.
    /// Returns false if the element was already present.
    ///
    /// # Errors
    ///
    /// Returns an unsupported error if the opposite end is a map, and an
    /// error if the element does not fit or a validator or listener refuses.
    pub fn add(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        element: ObjectId,
    ) -> Result<bool> {
        let association = self.collection(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        self.check_attachable(&association)?;
        self.check_element(&association, element)?;
        if self.endpoint(association.endpoint)?.holds(element) {
            return Ok(false);
        }
        self.prepare_peers(&association, &[element])?;

        let modification = Arc::new(Modification::Add { element });
        let mut deferred = Deferred::default();
        self.add_core(association.endpoint, element, None, &modification, &mut deferred)?;
        deferred.finish()?;
        Ok(true)
    }

    /// Inserts an element into a list at `index`. An element already in the
    /// list moves there.
    ///
    /// # Errors
    ///
    /// Returns an index-out-of-bounds error if `index` exceeds the length,
    /// plus the errors of [`Self::add`].
    pub fn insert(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        index: usize,
        element: ObjectId,
    ) -> Result<()> {
        let association = self.list_association(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        let len = self.endpoint(association.endpoint)?.len();
        if index > len {
            return Err(
                Error::index_out_of_bounds(index, len).with_context(
                    self.context(association.endpoint),
                ),
            );
        }
        self.check_element(&association, element)?;
        self.prepare_peers(&association, &[element])?;

        let modification = Arc::new(Modification::Insert { index, element });
        let mut deferred = Deferred::default();
        self.add_core(association.endpoint, element, Some(index), &modification, &mut deferred)?;
        deferred.finish()
    }

    /// Replaces the list element at `index`; returns the replaced element.
    ///
    /// # Errors
    ///
    /// Returns an index-out-of-bounds error if `index` is not a position of
    /// the list, plus the errors of [`Self::add`].
    pub fn set_at(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        index: usize,
        element: ObjectId,
    ) -> Result<ObjectId> {
        let association = self.list_association(owner, property)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        let list = self.raw_list(endpoint)?;
        let Some(old) = list.get(index).copied() else {
            return Err(
                Error::index_out_of_bounds(index, list.len()).with_context(self.context(endpoint)),
            );
        };
        if old == element {
            return Ok(old);
        }
        self.check_element(&association, element)?;
        self.prepare_peers(&association, &[old, element])?;

        let modification = Arc::new(Modification::SetAt { index, element });
        let mut deferred = Deferred::default();
        self.remove_core(endpoint, old, true, &modification, &mut deferred)?;
        self.add_core(endpoint, element, Some(index), &modification, &mut deferred)?;
        deferred.finish()?;
        Ok(old)
    }

    /// Removes an element from a collection, or the entry holding it from a
    /// map. Returns false if it was not present.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener refuses or a peer cannot be updated.
    pub fn remove(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        element: ObjectId,
    ) -> Result<bool> {
        let association = self.multi(owner, property)?;
        if association.shape.is_map() {
            return Ok(self.remove_value(owner, property, element)?.is_some());
        }
        self.ensure_loaded(association.endpoint)?;
        if !self.endpoint(association.endpoint)?.holds(element) {
            return Ok(false);
        }
        self.prepare_peers(&association, &[element])?;

        let modification = Arc::new(Modification::Remove { element });
        let mut deferred = Deferred::default();
        self.remove_core(association.endpoint, element, true, &modification, &mut deferred)?;
        deferred.finish()?;
        Ok(true)
    }

    /// Removes and returns the list element at `index`.
    ///
    /// # Errors
    ///
    /// Returns an index-out-of-bounds error if `index` is not a position of
    /// the list, plus the errors of [`Self::remove`].
    pub fn remove_at(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        index: usize,
    ) -> Result<ObjectId> {
        let association = self.list_association(owner, property)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        let list = self.raw_list(endpoint)?;
        let Some(element) = list.get(index).copied() else {
            return Err(
                Error::index_out_of_bounds(index, list.len()).with_context(self.context(endpoint)),
            );
        };
        self.prepare_peers(&association, &[element])?;

        let modification = Arc::new(Modification::RemoveAt { index });
        let mut deferred = Deferred::default();
        self.remove_core(endpoint, element, true, &modification, &mut deferred)?;
        deferred.finish()?;
        Ok(element)
    }

    /// Removes every element of a collection or map.
    ///
    /// # Errors
    ///
    /// Returns the first refusal; elements removed before it stay removed.
    pub fn clear(&mut self, owner: ObjectId, property: PropertyId) -> Result<()> {
        let association = self.multi(owner, property)?;
        self.ensure_loaded(association.endpoint)?;
        let elements = self.endpoint(association.endpoint)?.elements();
        self.prepare_peers(&association, &elements)?;

        let modification = Arc::new(Modification::Clear);
        let mut deferred = Deferred::default();
        self.clear_core(association.endpoint, &modification, &mut deferred)?;
        deferred.finish()
    }

    /// Adds several elements. Every element is validated before the first
    /// is added. Returns true if anything changed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add`].
    pub fn add_all(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        elements: &[ObjectId],
    ) -> Result<bool> {
        let association = self.collection(owner, property)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        self.check_attachable(&association)?;
        for &element in elements {
            self.check_element(&association, element)?;
        }
        self.prepare_peers(&association, elements)?;

        let modification = Arc::new(Modification::AddAll { count: elements.len() });
        let mut deferred = Deferred::default();
        let before = self.endpoint(endpoint)?.mod_count;
        for &element in elements {
            if !self.endpoint(endpoint)?.holds(element) {
                self.add_core(endpoint, element, None, &modification, &mut deferred)?;
            }
        }
        let changed = self.endpoint(endpoint)?.mod_count != before;
        deferred.finish()?;
        Ok(changed)
    }

    /// Removes every element not in `keep`. Returns true if anything changed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::remove`].
    pub fn retain(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        keep: &[ObjectId],
    ) -> Result<bool> {
        let association = self.multi(owner, property)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        let doomed: Vec<ObjectId> = self
            .endpoint(endpoint)?
            .elements()
            .into_iter()
            .filter(|element| !keep.contains(element))
            .collect();
        if doomed.is_empty() {
            return Ok(false);
        }
        self.prepare_peers(&association, &doomed)?;

        let modification = Arc::new(Modification::Retain { count: keep.len() });
        let mut deferred = Deferred::default();
        for element in doomed {
            self.remove_core(endpoint, element, true, &modification, &mut deferred)?;
        }
        deferred.finish()?;
        Ok(true)
    }

    /// Removes the list elements in `from..to`, renumbering the rest once.
    ///
    /// # Errors
    ///
    /// Returns an index-out-of-bounds error for an invalid range, plus the
    /// errors of [`Self::remove`].
    pub fn sub_list_clear(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        from: usize,
        to: usize,
    ) -> Result<()> {
        let association = self.list_association(owner, property)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        let list = self.raw_list(endpoint)?;
        if from > to || to > list.len() {
            return Err(
                Error::index_out_of_bounds(to, list.len()).with_context(self.context(endpoint)),
            );
        }
        let doomed: Vec<ObjectId> = list.iter().skip(from).take(to - from).copied().collect();
        self.prepare_peers(&association, &doomed)?;

        let modification = Arc::new(Modification::SubListClear { from, to });
        let mut deferred = Deferred::default();
        for element in doomed {
            self.remove_core(endpoint, element, false, &modification, &mut deferred)?;
        }
        let renumbered = self.renumber(endpoint, from, &modification, &mut deferred);
        deferred.record(renumbered);
        deferred.finish()
    }

    fn collection(&self, owner: ObjectId, property: PropertyId) -> Result<Association> {
        let association = self.association(owner, property)?;
        if !association.shape.is_collection() {
            return Err(self.wrong_shape(property, &association, "a collection"));
        }
        Ok(association)
    }

    fn list_association(&self, owner: ObjectId, property: PropertyId) -> Result<Association> {
        let association = self.association(owner, property)?;
        if !matches!(association.shape, AssociationShape::List) {
            return Err(self.wrong_shape(property, &association, "a list"));
        }
        Ok(association)
    }

    /// A collection or map.
    pub(crate) fn multi(&self, owner: ObjectId, property: PropertyId) -> Result<Association> {
        let association = self.association(owner, property)?;
        if association.shape.is_reference() {
            return Err(self.wrong_shape(property, &association, "a collection or map"));
        }
        Ok(association)
    }

    pub(crate) fn wrong_shape(
        &self,
        property: PropertyId,
        association: &Association,
        expected: &str,
    ) -> Error {
        Error::invalid_argument(format!(
            "{} is a {}, not {expected}",
            self.schema.qualified_name(property),
            association.shape.name()
        ))
    }

    fn raw_list(&self, endpoint: EndpointRef) -> Result<Vector<ObjectId>> {
        match &self.endpoint(endpoint)?.data {
            EndpointData::List(list) => Ok(list.clone()),
            _ => Err(Error::invalid_argument(format!(
                "{} is not a list",
                self.schema.qualified_name(endpoint.property)
            ))),
        }
    }

    fn list_mut(&mut self, endpoint: EndpointRef) -> Result<&mut Vector<ObjectId>> {
        let endpoint = self.endpoint_mut(endpoint)?;
        endpoint.touch();
        match &mut endpoint.data {
            EndpointData::List(list) => Ok(list),
            _ => Err(Error::invalid_state("endpoint is not a list")),
        }
    }

    pub(crate) fn set_mut(&mut self, endpoint: EndpointRef) -> Result<&mut ElementSet> {
        let endpoint = self.endpoint_mut(endpoint)?;
        endpoint.touch();
        match &mut endpoint.data {
            EndpointData::Set(set) => Ok(set),
            _ => Err(Error::invalid_state("endpoint is not a set")),
        }
    }

    /// Adds `element` to a list or set. `position` places it in a list;
    /// `None` appends.
    pub(crate) fn add_core(
        &mut self,
        endpoint: EndpointRef,
        element: ObjectId,
        position: Option<usize>,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        self.ensure_loaded(endpoint)?;
        match self.endpoint(endpoint)?.storage() {
            Storage::List => self.list_insert(endpoint, element, position, modification, deferred),
            Storage::Set => self.set_add(endpoint, element, modification, deferred),
            _ => Err(Error::invalid_argument(format!(
                "{} is not a collection",
                self.schema.qualified_name(endpoint.property)
            ))),
        }
    }

    fn list_insert(
        &mut self,
        endpoint: EndpointRef,
        element: ObjectId,
        position: Option<usize>,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let list = self.raw_list(endpoint)?;
        if list.index_of(&element).is_some() {
            return match position {
                Some(position) => {
                    self.list_move(endpoint, element, position, modification, deferred)
                }
                None => Ok(()),
            };
        }
        let index = position.unwrap_or(list.len()).min(list.len());
        let event = change_event(
            endpoint,
            EventKind::Element,
            modification,
            None,
            Some(Slot::object(element).with_index(Some(index))),
        );
        self.fire(endpoint, Phase::Modifying, &event)?;
        trace!(list = ?endpoint, element = %element, index, "list insert");

        self.list_mut(endpoint)?.insert(index, element);
        let suspended = self.suspend(endpoint)?;
        if let Some(opposite) = self.opposite_of(endpoint)? {
            let peer = EndpointRef::new(element, opposite);
            if let Err(err) = self.attach_peer(
                peer,
                endpoint.owner,
                PeerSlot::index(Some(index)),
                modification,
                deferred,
            ) {
                if let Ok(list) = self.list_mut(endpoint) {
                    if let Some(at) = list.index_of(&element) {
                        list.remove(at);
                    }
                }
                self.restore(endpoint, suspended);
                return Err(err);
            }
        }
        self.restore(endpoint, suspended);

        let renumbered = self.renumber(endpoint, index + 1, modification, deferred);
        deferred.record(renumbered);
        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }

    /// Moves a list element to `position` (clamped to the last slot).
    pub(crate) fn list_move(
        &mut self,
        endpoint: EndpointRef,
        element: ObjectId,
        position: usize,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let list = self.raw_list(endpoint)?;
        let Some(from) = list.index_of(&element) else {
            return Err(Error::invalid_argument(format!("{element} is not in the list")));
        };
        let to = position.min(list.len() - 1);
        if from == to {
            return Ok(());
        }
        let event = change_event(
            endpoint,
            EventKind::Element,
            modification,
            Some(Slot::object(element).with_index(Some(from))),
            Some(Slot::object(element).with_index(Some(to))),
        );
        self.fire(endpoint, Phase::Modifying, &event)?;

        let list = self.list_mut(endpoint)?;
        list.remove(from);
        list.insert(to, element);

        let renumbered = self.renumber(endpoint, from.min(to), modification, deferred);
        deferred.record(renumbered);
        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }

    /// Brings the indexed references of list elements from `from` onwards in
    /// line with their positions.
    ///
    /// Per-element failures are recorded in `deferred`; the list itself has
    /// already changed.
    fn renumber(
        &mut self,
        endpoint: EndpointRef,
        from: usize,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let Some(opposite) = self.opposite_of(endpoint)? else {
            return Ok(());
        };
        let list = self.raw_list(endpoint)?;
        let suspended = self.suspend(endpoint)?;
        for (position, element) in list.iter().enumerate().skip(from) {
            let peer = EndpointRef::new(*element, opposite);
            if self.is_suspended(peer) {
                continue;
            }
            let stale = match self.endpoint(peer).map(|peer| &peer.data) {
                Ok(EndpointData::Indexed { target, index }) => {
                    *target == Some(endpoint.owner) && *index != Some(position)
                }
                _ => false,
            };
            if stale {
                let result = self.indexed_core(
                    peer,
                    Some(endpoint.owner),
                    Some(position),
                    modification,
                    deferred,
                );
                deferred.record(result);
            }
        }
        self.restore(endpoint, suspended);
        Ok(())
    }

    fn set_add(
        &mut self,
        endpoint: EndpointRef,
        element: ObjectId,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let key = match self.ordering_of(endpoint)? {
            Some(ordering) => self.member_key(element, &ordering, None)?,
            None => SortKey::identity(element),
        };
        let (present, holder, holder_position) = match &self.endpoint(endpoint)?.data {
            EndpointData::Set(set) => {
                let holder = set.holder(&key).filter(|holder| *holder != element);
                (set.contains(element), holder, holder.and_then(|h| set.position(h)))
            }
            _ => return Err(Error::invalid_state("endpoint is not a set")),
        };
        if present {
            return Ok(());
        }
        let event = change_event(
            endpoint,
            EventKind::Element,
            modification,
            holder.map(Slot::object),
            Some(Slot::object(element)),
        );
        self.fire(endpoint, Phase::Modifying, &event)?;
        trace!(set = ?endpoint, element = %element, evicts = ?holder, "set add");

        self.set_mut(endpoint)?.insert(element, key.clone(), holder_position);
        self.freeze(element, endpoint);
        if let Some(holder) = holder {
            self.unfreeze(holder, endpoint);
        }

        let suspended = self.suspend(endpoint)?;
        if let Some(opposite) = self.opposite_of(endpoint)? {
            if let Some(holder) = holder {
                let peer = EndpointRef::new(holder, opposite);
                if let Err(err) = self.detach_peer(peer, endpoint.owner, modification, deferred) {
                    if let Ok(set) = self.set_mut(endpoint) {
                        set.remove(element);
                        set.insert(holder, key, holder_position);
                    }
                    self.unfreeze(element, endpoint);
                    self.freeze(holder, endpoint);
                    self.restore(endpoint, suspended);
                    return Err(err);
                }
            }
            let peer = EndpointRef::new(element, opposite);
            if let Err(err) = self.attach_peer(
                peer,
                endpoint.owner,
                PeerSlot::default(),
                modification,
                deferred,
            ) {
                if let Ok(set) = self.set_mut(endpoint) {
                    set.remove(element);
                }
                self.unfreeze(element, endpoint);
                self.restore(endpoint, suspended);
                return Err(err);
            }
        }
        self.restore(endpoint, suspended);

        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }

    /// Removes `element` from a collection, or its entry from a map.
    ///
    /// `renumber` is false when the caller renumbers a list once afterwards.
    pub(crate) fn remove_core(
        &mut self,
        endpoint: EndpointRef,
        element: ObjectId,
        renumber: bool,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        self.ensure_loaded(endpoint)?;
        let current = match &self.endpoint(endpoint)?.data {
            EndpointData::List(list) => Removal::List(list.index_of(&element)),
            EndpointData::Set(set) => {
                Removal::Set(set.position(element), set.key_of(element).cloned())
            }
            EndpointData::Map(map) => Removal::Map(map.key_of(element).cloned()),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "{} is not a collection",
                    self.schema.qualified_name(endpoint.property)
                )))
            }
        };
        let (index, key) = match current {
            Removal::List(Some(index)) => (Some(index), None),
            Removal::Set(position, Some(key)) => (position, Some(key)),
            Removal::Map(Some(key)) => {
                return self.remove_key_core(endpoint, &key, modification, deferred)
            }
            _ => return Ok(()),
        };
        let is_list = key.is_none();

        let event = change_event(
            endpoint,
            EventKind::Element,
            modification,
            Some(Slot::object(element).with_index(index.filter(|_| is_list))),
            None,
        );
        self.fire(endpoint, Phase::Modifying, &event)?;
        trace!(collection = ?endpoint, element = %element, "remove");

        if is_list {
            self.list_mut(endpoint)?.retain(|e| *e != element);
        } else {
            self.set_mut(endpoint)?.remove(element);
            self.unfreeze(element, endpoint);
        }

        let suspended = self.suspend(endpoint)?;
        if let Some(opposite) = self.opposite_of(endpoint)? {
            let peer = EndpointRef::new(element, opposite);
            if let Err(err) = self.detach_peer(peer, endpoint.owner, modification, deferred) {
                match key {
                    None => {
                        if let (Ok(list), Some(index)) = (self.list_mut(endpoint), index) {
                            list.insert(index, element);
                        }
                    }
                    Some(key) => {
                        if let Ok(set) = self.set_mut(endpoint) {
                            set.insert(element, key, index);
                        }
                        self.freeze(element, endpoint);
                    }
                }
                self.restore(endpoint, suspended);
                return Err(err);
            }
        }
        self.restore(endpoint, suspended);

        if let (true, true, Some(index)) = (is_list, renumber, index) {
            let renumbered = self.renumber(endpoint, index, modification, deferred);
            deferred.record(renumbered);
        }
        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }

    fn clear_core(
        &mut self,
        endpoint: EndpointRef,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let data = self.endpoint(endpoint)?.data.clone();
        match data {
            EndpointData::Reference { .. } => {
                self.reference_core(endpoint, None, modification, deferred)
            }
            EndpointData::Indexed { .. } => {
                self.indexed_core(endpoint, None, None, modification, deferred)
            }
            EndpointData::Keyed { .. } => {
                self.keyed_core(endpoint, None, None, modification, deferred)
            }
            // From the back, so nothing needs renumbering
            EndpointData::List(list) => {
                for element in list.iter().rev() {
                    self.remove_core(endpoint, *element, false, modification, deferred)?;
                }
                Ok(())
            }
            EndpointData::Set(set) => {
                for element in set.elements() {
                    self.remove_core(endpoint, element, true, modification, deferred)?;
                }
                Ok(())
            }
            EndpointData::Map(map) => {
                for key in map.keys() {
                    self.remove_key_core(endpoint, &key, modification, deferred)?;
                }
                Ok(())
            }
        }
    }

    /// Unlinks everything an endpoint holds, with peer updates. Used when
    /// its owner is destroyed.
    pub(crate) fn detach_all(
        &mut self,
        endpoint: EndpointRef,
        deferred: &mut Deferred,
    ) -> Result<()> {
        if self.endpoint(endpoint)?.len() == 0 {
            return Ok(());
        }
        let modification = Arc::new(Modification::Clear);
        self.clear_core(endpoint, &modification, deferred)
    }
}

/// Where an element sat before removal.
enum Removal {
    List(Option<usize>),
    Set(Option<usize>, Option<SortKey>),
    Map(Option<Value>),
}
