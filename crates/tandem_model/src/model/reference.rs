//! Single-valued association ends: plain, indexed and keyed references.
//!
//! A reference updates its peers before writing its own value. Indexed
//! references additionally mirror their position in the opposite list, and
//! keyed references their key in the opposite map.

use std::sync::Arc;

use tandem_foundation::{
    EndpointRef, Error, EventKind, Modification, ObjectId, PropertyId, Result, Slot, Value,
};
use tracing::trace;

use super::sync::PeerSlot;
use super::{change_event, Association, Deferred, Model};
use crate::endpoint::EndpointData;
use crate::listener::Phase;
use crate::metadata::AssociationShape;

impl Model {
    /// The target of a reference of any single-valued shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not a reference of the object or
    /// its contents cannot be loaded.
    pub fn reference(&mut self, owner: ObjectId, property: PropertyId) -> Result<Option<ObjectId>> {
        let association = self.single(owner, property, AssociationShape::is_reference)?;
        self.ensure_loaded(association.endpoint)?;
        Ok(self.endpoint(association.endpoint)?.target())
    }

    /// Points a reference at `target`, or clears it.
    ///
    /// The opposite end follows: the new target links back to `owner`, the
    /// previous target stops doing so, and a single-valued opposite that
    /// pointed elsewhere is taken over. An indexed reference keeps its
    /// requested index; a keyed reference needs a key to attach.
    ///
    /// # Errors
    ///
    /// Returns an error if the target does not fit the association, a
    /// validator or listener refuses the change, or a peer cannot be loaded.
    pub fn set_reference(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        target: Option<ObjectId>,
    ) -> Result<()> {
        let association = self.single(owner, property, AssociationShape::is_reference)?;
        self.ensure_loaded(association.endpoint)?;
        if target.is_some() {
            self.check_attachable(&association)?;
        }
        self.prepare_single(&association, target)?;

        let modification = Arc::new(Modification::SetReference { target });
        let mut deferred = Deferred::default();
        let endpoint = association.endpoint;
        let data = self.endpoint(endpoint)?.data.clone();
        match data {
            EndpointData::Reference { .. } => {
                self.reference_core(endpoint, target, &modification, &mut deferred)?;
            }
            EndpointData::Indexed { index, .. } => {
                self.indexed_core(endpoint, target, index, &modification, &mut deferred)?;
            }
            EndpointData::Keyed { key, .. } => {
                self.keyed_core(endpoint, target, key, &modification, &mut deferred)?;
            }
            _ => {}
        }
        deferred.finish()
    }

    /// Position of an indexed reference in its target list, or `None` while
    /// it is detached.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an indexed reference.
    pub fn index(&mut self, owner: ObjectId, property: PropertyId) -> Result<Option<usize>> {
        let association = self.single(owner, property, is_indexed)?;
        self.ensure_loaded(association.endpoint)?;
        let (target, index) = self.indexed_state(association.endpoint)?;
        Ok(target.and(index))
    }

    /// Moves an indexed reference within its list.
    ///
    /// `None` detaches it from the list. While detached the index is only
    /// remembered and used as the position of the next attach.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an indexed reference or a
    /// listener refuses the change.
    pub fn set_index(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        index: Option<usize>,
    ) -> Result<()> {
        let association = self.single(owner, property, is_indexed)?;
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        let (target, _) = self.indexed_state(endpoint)?;

        let Some(target) = target else {
            self.write_single(endpoint, None, index, None);
            return Ok(());
        };
        self.prepare_peers(&association, &[target])?;
        let modification = Arc::new(Modification::SetIndex { index });
        let mut deferred = Deferred::default();
        match index {
            Some(_) => {
                self.indexed_core(endpoint, Some(target), index, &modification, &mut deferred)?
            }
            None => self.indexed_core(endpoint, None, None, &modification, &mut deferred)?,
        }
        deferred.finish()
    }

    /// Assigns the target and position of an indexed reference together.
    ///
    /// # Errors
    ///
    /// Same as [`Self::set_reference`].
    pub fn set_indexed(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        target: Option<ObjectId>,
        index: Option<usize>,
    ) -> Result<()> {
        let association = self.single(owner, property, is_indexed)?;
        self.ensure_loaded(association.endpoint)?;
        self.prepare_single(&association, target)?;

        let modification = Arc::new(Modification::SetIndexed { index, target });
        let mut deferred = Deferred::default();
        self.indexed_core(association.endpoint, target, index, &modification, &mut deferred)?;
        deferred.finish()
    }

    /// Key of a keyed reference in its target map, or `None` while detached.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not a keyed reference.
    pub fn key(&mut self, owner: ObjectId, property: PropertyId) -> Result<Option<Value>> {
        let association = self.single(owner, property, is_keyed)?;
        self.ensure_loaded(association.endpoint)?;
        let (target, key) = self.keyed_state(association.endpoint)?;
        Ok(if target.is_some() { key } else { None })
    }

    /// Re-keys a keyed reference in its map.
    ///
    /// `None` detaches it. While detached the key is only remembered for the
    /// next attach.
    ///
    /// # Errors
    ///
    /// Returns an error if the key has the wrong type or a listener refuses
    /// the change.
    pub fn set_key(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        key: Option<Value>,
    ) -> Result<()> {
        let association = self.single(owner, property, is_keyed)?;
        if let Some(key) = &key {
            association.check_key(key)?;
        }
        let endpoint = association.endpoint;
        self.ensure_loaded(endpoint)?;
        let (target, _) = self.keyed_state(endpoint)?;

        let Some(target) = target else {
            self.write_single(endpoint, None, None, key);
            return Ok(());
        };
        self.prepare_peers(&association, &[target])?;
        let modification = Arc::new(Modification::SetKey { key: key.clone() });
        let mut deferred = Deferred::default();
        let target = key.is_some().then_some(target);
        self.keyed_core(endpoint, target, key, &modification, &mut deferred)?;
        deferred.finish()
    }

    /// Assigns the target and key of a keyed reference together.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error when attaching without a key, plus
    /// the errors of [`Self::set_reference`].
    pub fn set_keyed(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        target: Option<ObjectId>,
        key: Option<Value>,
    ) -> Result<()> {
        let association = self.single(owner, property, is_keyed)?;
        if let Some(key) = &key {
            association.check_key(key)?;
        }
        self.ensure_loaded(association.endpoint)?;
        self.prepare_single(&association, target)?;

        let modification = Arc::new(Modification::SetKeyed {
            key: key.clone(),
            target,
        });
        let mut deferred = Deferred::default();
        self.keyed_core(association.endpoint, target, key, &modification, &mut deferred)?;
        deferred.finish()
    }

    fn single(
        &self,
        owner: ObjectId,
        property: PropertyId,
        accepts: fn(&AssociationShape) -> bool,
    ) -> Result<Association> {
        let association = self.association(owner, property)?;
        if !accepts(&association.shape) {
            return Err(Error::invalid_argument(format!(
                "{} is a {}",
                self.schema.qualified_name(property),
                association.shape.name()
            )));
        }
        Ok(association)
    }

    /// Validates a new target and loads every endpoint the change touches.
    fn prepare_single(
        &mut self,
        association: &Association,
        target: Option<ObjectId>,
    ) -> Result<()> {
        let current = self.endpoint(association.endpoint)?.target();
        if let Some(target) = target {
            self.check_element(association, target)?;
        }
        let touched: Vec<ObjectId> = current.into_iter().chain(target).collect();
        self.prepare_peers(association, &touched)
    }

    fn indexed_state(&self, endpoint: EndpointRef) -> Result<(Option<ObjectId>, Option<usize>)> {
        match &self.endpoint(endpoint)?.data {
            EndpointData::Indexed { target, index } => Ok((*target, *index)),
            _ => Err(Error::invalid_argument(format!(
                "{} is not an indexed reference",
                self.schema.qualified_name(endpoint.property)
            ))),
        }
    }

    fn keyed_state(&self, endpoint: EndpointRef) -> Result<(Option<ObjectId>, Option<Value>)> {
        match &self.endpoint(endpoint)?.data {
            EndpointData::Keyed { target, key } => Ok((*target, key.clone())),
            _ => Err(Error::invalid_argument(format!(
                "{} is not a keyed reference",
                self.schema.qualified_name(endpoint.property)
            ))),
        }
    }

    fn required_opposite(&self, endpoint: EndpointRef) -> Result<PropertyId> {
        self.opposite_of(endpoint)?.ok_or_else(|| {
            Error::invalid_program(
                self.schema.qualified_name(endpoint.property),
                "positional references need an opposite",
            )
        })
    }

    /// Raw write of a single-valued endpoint. Never fires or syncs.
    fn write_single(
        &mut self,
        endpoint: EndpointRef,
        target: Option<ObjectId>,
        index: Option<usize>,
        key: Option<Value>,
    ) {
        let Ok(endpoint) = self.endpoint_mut(endpoint) else {
            return;
        };
        match &mut endpoint.data {
            EndpointData::Reference { target: t } => *t = target,
            EndpointData::Indexed { target: t, index: i } => {
                *t = target;
                *i = index;
            }
            EndpointData::Keyed { target: t, key: k } => {
                *t = target;
                *k = key;
            }
            _ => return,
        }
        endpoint.touch();
    }

    /// The old target, if its opposite end still links back to `owner`.
    fn still_linked(
        &self,
        old: Option<ObjectId>,
        opposite: PropertyId,
        owner: ObjectId,
    ) -> Option<ObjectId> {
        old.filter(|old| {
            self.endpoint(EndpointRef::new(*old, opposite))
                .is_ok_and(|peer| peer.holds(owner))
        })
    }

    /// Detaches `owner` from the old target's opposite end, then attaches it
    /// to the new one.
    #[allow(clippy::too_many_arguments)]
    fn relink_peers(
        &mut self,
        owner: ObjectId,
        opposite: PropertyId,
        old: Option<ObjectId>,
        new: Option<ObjectId>,
        slot: PeerSlot,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        if let Some(old) = old {
            self.detach_peer(EndpointRef::new(old, opposite), owner, modification, deferred)?;
        }
        if let Some(new) = new {
            self.attach_peer(EndpointRef::new(new, opposite), owner, slot, modification, deferred)?;
        }
        Ok(())
    }

    pub(crate) fn reference_core(
        &mut self,
        endpoint: EndpointRef,
        target: Option<ObjectId>,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        self.ensure_loaded(endpoint)?;
        let old = self.endpoint(endpoint)?.target();
        if old == target {
            return Ok(());
        }
        let opposite = self.opposite_of(endpoint)?;
        let event = change_event(
            endpoint,
            EventKind::Reference,
            modification,
            old.map(Slot::object),
            target.map(Slot::object),
        );
        self.fire(endpoint, Phase::Modifying, &event)?;
        trace!(endpoint = ?endpoint, old = ?old, new = ?target, "set reference");

        let suspended = self.suspend(endpoint)?;
        if let Some(opposite) = opposite {
            let owner = endpoint.owner;
            if let Err(err) = self.relink_peers(
                owner,
                opposite,
                old,
                target,
                PeerSlot::default(),
                modification,
                deferred,
            ) {
                let keep = self.still_linked(old, opposite, owner);
                if keep != old {
                    self.write_single(endpoint, keep, None, None);
                }
                self.restore(endpoint, suspended);
                return Err(err);
            }
        }
        self.write_single(endpoint, target, None, None);
        self.restore(endpoint, suspended);

        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }

    /// Sets an indexed reference. `index` is the requested position; it is
    /// clamped to an append when out of range.
    pub(crate) fn indexed_core(
        &mut self,
        endpoint: EndpointRef,
        target: Option<ObjectId>,
        index: Option<usize>,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        self.ensure_loaded(endpoint)?;
        let (old, old_index) = self.indexed_state(endpoint)?;
        let opposite = self.required_opposite(endpoint)?;
        match (old, target) {
            (None, None) => {
                self.write_single(endpoint, None, index, None);
                return Ok(());
            }
            (Some(current), Some(new)) if current == new => {
                return self.reindex(
                    endpoint,
                    current,
                    old_index,
                    index,
                    opposite,
                    modification,
                    deferred,
                );
            }
            _ => {}
        }

        let position = match target {
            Some(new) => {
                let list = EndpointRef::new(new, opposite);
                self.ensure_loaded(list)?;
                let len = self.endpoint(list)?.len();
                Some(index.unwrap_or(len).min(len))
            }
            None => index,
        };
        let event = change_event(
            endpoint,
            EventKind::Reference,
            modification,
            old.map(|o| Slot::object(o).with_index(old_index)),
            target.map(|t| Slot::object(t).with_index(position)),
        );
        self.fire(endpoint, Phase::Modifying, &event)?;

        let owner = endpoint.owner;
        let suspended = self.suspend(endpoint)?;
        if let Err(err) = self.relink_peers(
            owner,
            opposite,
            old,
            target,
            PeerSlot::index(position),
            modification,
            deferred,
        ) {
            if self.still_linked(old, opposite, owner).is_none() && old.is_some() {
                self.write_single(endpoint, None, None, None);
            }
            self.restore(endpoint, suspended);
            return Err(err);
        }
        self.write_single(endpoint, target, position, None);
        self.restore(endpoint, suspended);

        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }

    /// Moves an attached indexed reference within its current list.
    #[allow(clippy::too_many_arguments)]
    fn reindex(
        &mut self,
        endpoint: EndpointRef,
        list_owner: ObjectId,
        old_index: Option<usize>,
        index: Option<usize>,
        opposite: PropertyId,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let Some(requested) = index else {
            return Ok(());
        };
        let list = EndpointRef::new(list_owner, opposite);
        self.ensure_loaded(list)?;
        let len = self.endpoint(list)?.len();
        let position = requested.min(len.saturating_sub(1));
        if old_index == Some(position) {
            return Ok(());
        }

        let event = change_event(
            endpoint,
            EventKind::Reference,
            modification,
            Some(Slot::object(list_owner).with_index(old_index)),
            Some(Slot::object(list_owner).with_index(Some(position))),
        );
        self.fire(endpoint, Phase::Modifying, &event)?;

        let suspended = self.suspend(endpoint)?;
        if !self.is_suspended(list) {
            if let Err(err) = self.list_move(
                list,
                endpoint.owner,
                position,
                modification,
                deferred,
            ) {
                self.restore(endpoint, suspended);
                return Err(err);
            }
        }
        self.write_single(endpoint, Some(list_owner), Some(position), None);
        self.restore(endpoint, suspended);

        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }

    /// Sets a keyed reference. Attaching requires a key.
    pub(crate) fn keyed_core(
        &mut self,
        endpoint: EndpointRef,
        target: Option<ObjectId>,
        key: Option<Value>,
        modification: &Arc<Modification>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        self.ensure_loaded(endpoint)?;
        let (old, old_key) = self.keyed_state(endpoint)?;
        let opposite = self.required_opposite(endpoint)?;
        if target.is_some() && key.is_none() {
            return Err(Error::invalid_argument(format!(
                "{} needs a key to attach",
                self.schema.qualified_name(endpoint.property)
            ))
            .with_context(self.context(endpoint)));
        }
        match (old, target) {
            (None, None) => {
                self.write_single(endpoint, None, None, key);
                return Ok(());
            }
            (Some(current), Some(new)) if current == new && old_key == key => return Ok(()),
            _ => {}
        }

        let event = change_event(
            endpoint,
            EventKind::Reference,
            modification,
            old.map(|o| Slot::object(o).with_key(old_key.clone())),
            target.map(|t| Slot::object(t).with_key(key.clone())),
        );
        self.fire(endpoint, Phase::Modifying, &event)?;

        let owner = endpoint.owner;
        let slot = PeerSlot {
            index: None,
            key: key.clone(),
        };
        let suspended = self.suspend(endpoint)?;
        let relinked = match (old, target) {
            // Same map, new key
            (Some(current), Some(new)) if current == new => {
                self.attach_peer(
                    EndpointRef::new(new, opposite),
                    owner,
                    slot,
                    modification,
                    deferred,
                )
            }
            _ => self.relink_peers(owner, opposite, old, target, slot, modification, deferred),
        };
        if let Err(err) = relinked {
            if self.still_linked(old, opposite, owner).is_none() && old.is_some() {
                self.write_single(endpoint, None, None, old_key);
            }
            self.restore(endpoint, suspended);
            return Err(err);
        }
        self.write_single(endpoint, target, None, key);
        self.restore(endpoint, suspended);

        deferred.record(self.fire(endpoint, Phase::Modified, &event));
        Ok(())
    }
}

fn is_indexed(shape: &AssociationShape) -> bool {
    matches!(shape, AssociationShape::IndexedReference)
}

fn is_keyed(shape: &AssociationShape) -> bool {
    matches!(shape, AssociationShape::KeyedReference { .. })
}
