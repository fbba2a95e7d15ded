//! Scalar properties, embedded instances and frozen-context refreshes.
//!
//! A scalar write fires on the object and then bubbles through every
//! embedding parent. Sets keyed by a field the write touches are refreshed
//! around it: the element is taken out before the write and reinserted with
//! its new key afterwards. A reinsertion whose key is already taken evicts
//! the current holder.

use std::sync::Arc;

use tandem_foundation::{
    ClassId, EndpointRef, Error, ErrorKind, EventKind, Modification, ModificationEvent, ObjectId,
    PropertyId, Result, Slot, Type, Value,
};
use tracing::{debug, trace};

use super::{change_event, Deferred, Model};
use crate::endpoint::{EndpointData, KeyPart, SortKey};
use crate::frozen::FrozenContext;
use crate::listener::Phase;
use crate::metadata::{ElementOrdering, PropertyKind};
use crate::object::ScalarSlot;

/// A pending scalar value that member keys should see before it is written.
type Override<'a> = Option<(ObjectId, PropertyId, &'a Value)>;

/// A member that must be re-sorted in a container around a scalar write.
struct Refresh {
    container: EndpointRef,
    element: ObjectId,
    event: Arc<ModificationEvent>,
}

impl Model {
    /// The value of a scalar or embedded property, loading it first if
    /// necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not a scalar of the object, or
    /// if it is unloaded and cannot be loaded.
    pub fn scalar(&mut self, object: ObjectId, property: PropertyId) -> Result<Value> {
        self.scalar_kind(object, property)?;
        self.scalar_value(object, property)
    }

    /// Returns true if the scalar has been loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not a scalar of the object.
    pub fn is_scalar_loaded(&self, object: ObjectId, property: PropertyId) -> Result<bool> {
        self.scalar_kind(object, property)?;
        Ok(self
            .objects
            .get(object)?
            .scalars
            .get(&property)
            .is_some_and(|slot| slot.loaded))
    }

    /// The parent slot an embedded instance currently lives in.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    pub fn embedded_owner(&self, object: ObjectId) -> Result<Option<EndpointRef>> {
        Ok(self.objects.get(object)?.embedded_in)
    }

    /// Assigns a scalar or embedded property.
    ///
    /// Scalar listeners of the object and of every embedding ancestor see
    /// the change, and sets ordered by the changed field re-sort the object.
    /// Assigning the current value does nothing.
    ///
    /// # Errors
    ///
    /// Returns a type-mismatch error for a value of the wrong type, an
    /// invalid-argument error for an embedded instance that already has
    /// another parent or would create a cycle, and a modification error if a
    /// listener refuses.
    pub fn set_scalar(
        &mut self,
        object: ObjectId,
        property: PropertyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let kind = self.scalar_kind(object, property)?;
        let embedded = match &kind {
            PropertyKind::Scalar(ty) => {
                if !ty.accepts(&value.value_type()) {
                    return Err(Error::type_mismatch(ty.clone(), value.value_type())
                        .with_context(self.context(EndpointRef::new(object, property))));
                }
                false
            }
            PropertyKind::Embedded(class) => {
                if let Some(child) = value.as_object() {
                    self.check_embeddable(object, property, child, *class)?;
                } else if !value.is_nil() {
                    return Err(Error::type_mismatch(Type::Object, value.value_type()));
                }
                true
            }
            PropertyKind::Association { .. } => {
                return Err(Error::invalid_argument(format!(
                    "{} is an association",
                    self.schema.qualified_name(property)
                )))
            }
        };

        let old = self.scalar_value(object, property)?;
        if old == value {
            return Ok(());
        }

        let modification = Arc::new(Modification::SetScalar { value: value.clone() });
        let levels = self.bubble_levels(object, property, &old, &value, &modification)?;
        for (source, event) in &levels {
            self.fire_scalar(source.owner, Phase::Modifying, event)?;
        }

        let refreshes = self.plan_refreshes(&levels, (object, property, &value))?;
        for refresh in &refreshes {
            self.fire(refresh.container, Phase::Modifying, &refresh.event)?;
        }
        trace!(object = %object, property = ?property, refreshes = refreshes.len(), "set scalar");

        let mut previous = Vec::with_capacity(refreshes.len());
        for refresh in &refreshes {
            let mut key = None;
            if self.suspensions.suspend(refresh.container, refresh.element) {
                let position = match self.set_mut(refresh.container) {
                    Ok(set) => {
                        key = set.key_of(refresh.element).cloned();
                        set.remove(refresh.element)
                    }
                    Err(_) => None,
                };
                self.suspensions
                    .set_position(refresh.container, refresh.element, position);
            }
            previous.push(key);
        }
        // Every suspended member goes back in, even if the write failed
        let written = self.write_scalar(object, property, &old, value, embedded);
        let mut evictions = Vec::new();
        let mut resumed = Ok(());
        for (refresh, previous) in refreshes.iter().zip(previous) {
            let result = self.resume_member(refresh, previous, &mut evictions);
            if resumed.is_ok() {
                resumed = result;
            }
        }

        let mut deferred = Deferred::default();
        let cause = levels.first().map(|(_, event)| Arc::clone(event));
        for (container, evicted) in evictions {
            self.evict(container, evicted, cause.clone(), &mut deferred);
        }
        written?;
        resumed?;
        for refresh in &refreshes {
            deferred.record(self.fire(refresh.container, Phase::Modified, &refresh.event));
        }
        for (source, event) in &levels {
            deferred.record(self.fire_scalar(source.owner, Phase::Modified, event));
        }
        deferred.finish()
    }

    /// Reinserts a refreshed member under its new key. If the new key
    /// cannot be computed the member returns under its previous key.
    fn resume_member(
        &mut self,
        refresh: &Refresh,
        previous: Option<SortKey>,
        evictions: &mut Vec<(EndpointRef, ObjectId)>,
    ) -> Result<()> {
        let Some(suspension) = self.suspensions.resume(refresh.container, refresh.element)? else {
            return Ok(());
        };
        let fresh = match self.ordering_of(refresh.container) {
            Ok(Some(ordering)) => self.member_key(refresh.element, &ordering, None),
            Ok(None) => Err(Error::invalid_state("refreshed container has no ordering")),
            Err(err) => Err(err),
        };
        let (key, result) = match (fresh, previous) {
            (Ok(key), _) => (key, Ok(())),
            (Err(err), Some(previous)) => (previous, Err(err)),
            (Err(err), None) => return Err(err),
        };
        let evicted = self
            .set_mut(refresh.container)?
            .insert(refresh.element, key, suspension.position);
        if let Some(evicted) = evicted {
            evictions.push((refresh.container, evicted));
        }
        result
    }

    fn scalar_kind(&self, object: ObjectId, property: PropertyId) -> Result<PropertyKind> {
        let class = self.class_of(object)?;
        if !self.schema.has_property(class, property) {
            return Err(Error::invalid_argument(format!(
                "{} has no property {}",
                self.schema.class(class)?.name,
                self.schema.qualified_name(property)
            )));
        }
        let kind = self.schema.property(property)?.kind.clone();
        if matches!(kind, PropertyKind::Association { .. }) {
            return Err(Error::invalid_argument(format!(
                "{} is an association",
                self.schema.qualified_name(property)
            )));
        }
        Ok(kind)
    }

    /// Reads a scalar, loading it through the scalar loader when unloaded.
    pub(crate) fn scalar_value(&mut self, object: ObjectId, property: PropertyId) -> Result<Value> {
        let loaded = self.scalar_slot(object, property)?.loaded;
        if !loaded {
            self.batch_load(&[object], &[property])?;
        }
        let slot = self.scalar_slot(object, property)?;
        if slot.loaded {
            Ok(slot.value.clone())
        } else {
            Err(Error::new(ErrorKind::Loader(format!(
                "no value was loaded for {} of {object}",
                self.schema.qualified_name(property)
            ))))
        }
    }

    fn scalar_slot(&self, object: ObjectId, property: PropertyId) -> Result<&ScalarSlot> {
        self.objects.get(object)?.scalars.get(&property).ok_or_else(|| {
            Error::invalid_argument(format!(
                "{object} has no scalar {}",
                self.schema.qualified_name(property)
            ))
        })
    }

    fn check_embeddable(
        &self,
        object: ObjectId,
        property: PropertyId,
        child: ObjectId,
        class: ClassId,
    ) -> Result<()> {
        let child_class = self.class_of(child)?;
        if !self.schema.is_subclass(child_class, class) {
            return Err(Error::invalid_argument(format!(
                "{child} is a {}, not a {}",
                self.schema.class(child_class)?.name,
                self.schema.class(class)?.name
            )));
        }
        let slot = EndpointRef::new(object, property);
        if let Some(parent) = self.objects.get(child)?.embedded_in {
            if parent != slot {
                return Err(Error::invalid_argument(format!(
                    "{child} is already embedded in {}",
                    parent.owner
                )));
            }
        }
        let mut current = Some(object);
        while let Some(ancestor) = current {
            if ancestor == child {
                return Err(Error::invalid_argument(format!(
                    "embedding {child} in {object} would create a cycle"
                )));
            }
            current = self.objects.get(ancestor)?.embedded_in.map(|parent| parent.owner);
        }
        Ok(())
    }

    /// The scalar event and its bubbled copies, innermost first, each with
    /// the (object, property) it is fired on.
    fn bubble_levels(
        &self,
        object: ObjectId,
        property: PropertyId,
        old: &Value,
        new: &Value,
        modification: &Arc<Modification>,
    ) -> Result<Vec<(EndpointRef, Arc<ModificationEvent>)>> {
        let source = EndpointRef::new(object, property);
        let event = Arc::new(change_event(
            source,
            EventKind::Scalar,
            modification,
            Some(Slot::value(old.clone())),
            Some(Slot::value(new.clone())),
        ));
        let mut levels = vec![(source, event)];

        let mut current = object;
        while let Some(parent) = self.objects.get(current)?.embedded_in {
            let inner = Arc::clone(&levels[levels.len() - 1].1);
            let event = Arc::new(ModificationEvent::bubbled(parent, current, inner));
            levels.push((parent, event));
            current = parent.owner;
        }
        Ok(levels)
    }

    /// Finds every set whose key for some level's object changes with the
    /// pending write.
    fn plan_refreshes(
        &mut self,
        levels: &[(EndpointRef, Arc<ModificationEvent>)],
        pending: (ObjectId, PropertyId, &Value),
    ) -> Result<Vec<Refresh>> {
        let refresh = Arc::new(Modification::Refresh);
        let mut plan = Vec::new();
        for (source, cause) in levels {
            let element = source.owner;
            let frozen = &self.objects.get(element)?.frozen;
            let containers: Vec<EndpointRef> = match frozen.get(&source.property) {
                Some(context) => context.containers().to_vec(),
                None => continue,
            };
            // Prune containers whose owner is gone
            let alive: Vec<ObjectId> = containers
                .iter()
                .map(|container| container.owner)
                .filter(|owner| self.objects.exists(*owner))
                .collect();
            if alive.len() < containers.len() {
                let frozen = &mut self.objects.get_mut(element)?.frozen;
                if let Some(context) = frozen.get_mut(&source.property) {
                    context.retain_alive(|owner| alive.contains(&owner));
                }
            }
            for container in containers {
                let Some(ordering) = self.ordering_of(container)? else {
                    continue;
                };
                let current = match self.endpoint(container).map(|e| &e.data) {
                    Ok(EndpointData::Set(set)) => set.key_of(element).cloned(),
                    _ => None,
                };
                let Some(current) = current else {
                    continue;
                };
                let projected = self.member_key(element, &ordering, Some(pending))?;
                if projected == current {
                    continue;
                }
                let (from, to) = match &self.endpoint(container)?.data {
                    EndpointData::Set(set) => {
                        let holder = set.holder(&projected).filter(|holder| *holder != element);
                        let excluded: Vec<ObjectId> = holder.into_iter().collect();
                        (
                            set.position(element),
                            set.projected_position(element, &projected, &excluded),
                        )
                    }
                    _ => continue,
                };
                let event = change_event(
                    container,
                    EventKind::Element,
                    &refresh,
                    Some(Slot::object(element).with_index(from)),
                    Some(Slot::object(element).with_index(to)),
                )
                .with_cause(Arc::clone(cause));
                plan.push(Refresh {
                    container,
                    element,
                    event: Arc::new(event),
                });
            }
        }
        Ok(plan)
    }

    /// Raw scalar write, relinking embedded instances.
    fn write_scalar(
        &mut self,
        object: ObjectId,
        property: PropertyId,
        old: &Value,
        value: Value,
        embedded: bool,
    ) -> Result<()> {
        if embedded {
            if let Some(previous) = old.as_object() {
                if let Ok(child) = self.objects.get_mut(previous) {
                    child.embedded_in = None;
                }
            }
            if let Some(child) = value.as_object() {
                self.objects.get_mut(child)?.embedded_in = Some(EndpointRef::new(object, property));
            }
        }
        if let Some(slot) = self.objects.get_mut(object)?.scalars.get_mut(&property) {
            slot.value = value;
            slot.loaded = true;
        }
        Ok(())
    }

    /// Crowds `evicted` out of `container` after a refresh reinserted another
    /// member under its key. The opposite end is cleared as usual.
    fn evict(
        &mut self,
        container: EndpointRef,
        evicted: ObjectId,
        cause: Option<Arc<ModificationEvent>>,
        deferred: &mut Deferred,
    ) {
        self.unfreeze(evicted, container);
        let modification = Arc::new(Modification::Evict);
        let mut event = change_event(
            container,
            EventKind::Element,
            &modification,
            Some(Slot::object(evicted)),
            None,
        );
        if let Some(cause) = cause {
            event = event.with_cause(cause);
        }
        debug!(container = ?container, evicted = %evicted, "crowded out");

        deferred.record(self.fire(container, Phase::Modifying, &event));
        if let Ok(Some(opposite)) = self.opposite_of(container) {
            match self.suspend(container) {
                Ok(suspended) => {
                    let peer = EndpointRef::new(evicted, opposite);
                    let result = self.detach_peer(peer, container.owner, &modification, deferred);
                    deferred.record(result);
                    self.restore(container, suspended);
                }
                Err(err) => deferred.record(Err(err)),
            }
        }
        deferred.record(self.fire(container, Phase::Modified, &event));
    }

    /// The key `element` sorts under in a container with `ordering`.
    pub(crate) fn member_key(
        &mut self,
        element: ObjectId,
        ordering: &ElementOrdering,
        pending: Override<'_>,
    ) -> Result<SortKey> {
        let mut parts = Vec::with_capacity(ordering.parts.len());
        for part in &ordering.parts {
            parts.push(KeyPart {
                value: self.path_value(element, &part.path, pending)?,
                descending: part.descending,
            });
        }
        Ok(SortKey(parts))
    }

    /// Follows a property path through embedded instances. A nil link
    /// yields nil.
    fn path_value(
        &mut self,
        element: ObjectId,
        path: &[PropertyId],
        pending: Override<'_>,
    ) -> Result<Value> {
        let mut current = element;
        let mut value = Value::Nil;
        for (depth, &property) in path.iter().enumerate() {
            value = match pending {
                Some((object, pending_property, pending_value))
                    if object == current && pending_property == property =>
                {
                    pending_value.clone()
                }
                _ => self.scalar_value(current, property)?,
            };
            if depth + 1 < path.len() {
                match value.as_object() {
                    Some(next) => current = next,
                    None => return Ok(Value::Nil),
                }
            }
        }
        Ok(value)
    }

    /// Records `container` in the frozen contexts of the fields its ordering
    /// reads from `element`.
    pub(crate) fn freeze(&mut self, element: ObjectId, container: EndpointRef) {
        let Ok(Some(ordering)) = self.ordering_of(container) else {
            return;
        };
        let Ok(object) = self.objects.get_mut(element) else {
            return;
        };
        for property in ordering.frozen_properties() {
            object
                .frozen
                .entry(property)
                .or_insert_with(FrozenContext::new)
                .combine(container);
        }
        trace!(element = %element, container = ?container, "frozen");
    }

    pub(crate) fn unfreeze(&mut self, element: ObjectId, container: EndpointRef) {
        if let Ok(object) = self.objects.get_mut(element) {
            for context in object.frozen.values_mut() {
                context.remove(container);
            }
            object.frozen.retain(|_, context| !context.is_empty());
        }
    }
}
