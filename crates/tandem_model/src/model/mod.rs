//! The object model and its synchronization engine.
//!
//! A [`Model`] owns every instance created from one [`Schema`]. Mutations
//! go through `&mut Model` methods addressed by object and property id; each
//! one updates the endpoint it was called on and then pushes the mirror
//! update to the opposite endpoint of every affected element, so both ends
//! of a bidirectional association agree when the call returns.
//!
//! # Peer synchronization
//!
//! While an endpoint pushes a change to its peers it is *suspended*. A peer
//! that would in turn update a suspended endpoint skips that step: the
//! endpoint that started the exchange applies its own half itself.
//!
//! References update their peers before writing their own value; collections
//! and maps write first and then update their peers. If a peer refuses a
//! single-element change, the initiating endpoint restores its own raw state
//! and the peer's error is returned.

mod collection;
mod cursor;
mod load;
mod map;
mod reference;
mod scalar;
mod sync;

use std::fmt;
use std::sync::Arc;

use tandem_foundation::{
    ClassId, EndpointRef, Error, ErrorContext, ErrorKind, EventKind, Modification,
    ModificationEvent, ObjectId, PropertyId, Result, Slot, Type, Value,
};
use tracing::{debug, trace};

pub use cursor::{ElementCursor, KeyCursor};

use crate::config::ModelConfig;
use crate::endpoint::Endpoint;
use crate::frozen::SuspensionTable;
use crate::listener::{ListenerList, ModificationListener, Phase};
use crate::loader::{AssociationLoader, ScalarLoader};
use crate::metadata::{AssociationShape, ElementOrdering, PropertyKind, Schema};
use crate::object::{ObjectModel, ObjectStore, ScalarSlot};
use crate::validator::Validator;

/// A set of instances of one schema, with synchronized associations.
pub struct Model {
    schema: Arc<Schema>,
    config: ModelConfig,
    objects: ObjectStore,
    suspensions: SuspensionTable,
    scalar_loader: Option<Arc<dyn ScalarLoader>>,
    association_loader: Option<Arc<dyn AssociationLoader>>,
}

/// A resolved association property of one object.
#[derive(Clone, Debug)]
pub(crate) struct Association {
    /// The storage endpoint (shared by covariant views).
    pub endpoint: EndpointRef,
    /// Shape of the storage property.
    pub shape: AssociationShape,
    /// Element class of the requested view.
    pub target: ClassId,
    pub opposite: Option<PropertyId>,
}

impl Association {
    /// Rejects keys of the wrong type for a map or keyed reference.
    pub fn check_key(&self, key: &Value) -> Result<()> {
        match &self.shape {
            AssociationShape::KeyedReference { key: ty }
            | AssociationShape::Map { key: ty, .. } => check_key(ty, key),
            _ => Ok(()),
        }
    }
}

/// Errors raised after a change was applied.
///
/// Post-change work keeps running; the first error is reported once
/// everything has run.
#[derive(Debug, Default)]
pub(crate) struct Deferred {
    first: Option<Error>,
}

impl Deferred {
    pub fn record(&mut self, result: Result<()>) {
        if let Err(err) = result {
            if self.first.is_none() {
                self.first = Some(committed(err));
            }
        }
    }

    pub fn finish(self) -> Result<()> {
        self.first.map_or(Ok(()), Err)
    }
}

/// Marks a listener failure as having happened after the change.
fn committed(err: Error) -> Error {
    match err.kind {
        ErrorKind::Modification {
            modified: false,
            event,
            cause,
        } => Error::new(ErrorKind::Modification {
            modified: true,
            event,
            cause,
        }),
        kind => Error {
            kind,
            context: err.context,
        },
    }
}

fn missing_endpoint(schema: &Schema, endpoint: EndpointRef) -> Error {
    Error::invalid_argument(format!(
        "{} has no endpoint {}",
        endpoint.owner,
        schema.qualified_name(endpoint.property)
    ))
}

/// Builds an event from its optional halves.
pub(crate) fn change_event(
    source: EndpointRef,
    kind: EventKind,
    modification: &Arc<Modification>,
    detached: Option<Slot>,
    attached: Option<Slot>,
) -> ModificationEvent {
    let mut event = ModificationEvent::new(source, kind, Arc::clone(modification));
    if let Some(slot) = detached {
        event = event.with_detached(slot);
    }
    if let Some(slot) = attached {
        event = event.with_attached(slot);
    }
    event
}

/// Rejects keys the key type does not accept.
fn check_key(ty: &Type, key: &Value) -> Result<()> {
    if key.is_nil() {
        return Err(Error::invalid_argument("keys cannot be nil"));
    }
    if ty.accepts(&key.value_type()) {
        Ok(())
    } else {
        Err(Error::type_mismatch(ty.clone(), key.value_type()))
    }
}

/// The value a freshly created scalar starts with.
fn default_value(ty: &Type) -> Value {
    match ty {
        Type::Bool => Value::Bool(false),
        Type::Int => Value::Int(0),
        Type::Float => Value::Float(0.0),
        Type::String => Value::from(""),
        _ => Value::Nil,
    }
}

impl Model {
    /// Creates an empty model with the default configuration.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_config(schema, ModelConfig::default())
    }

    /// Creates an empty model.
    #[must_use]
    pub fn with_config(schema: Arc<Schema>, config: ModelConfig) -> Self {
        Self {
            schema,
            config,
            objects: ObjectStore::new(),
            suspensions: SuspensionTable::default(),
            scalar_loader: None,
            association_loader: None,
        }
    }

    /// The schema instances are created from.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The model's configuration.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Creates a fully loaded instance with default scalar values and empty
    /// associations.
    ///
    /// # Errors
    ///
    /// Returns an error if the class is not part of the schema.
    pub fn create(&mut self, class: ClassId) -> Result<ObjectId> {
        self.instantiate(class, true)
    }

    /// Creates an instance whose scalars and associations are all unloaded.
    ///
    /// The first access to each property goes through the configured loaders.
    ///
    /// # Errors
    ///
    /// Returns an error if the class is not part of the schema.
    pub fn create_unloaded(&mut self, class: ClassId) -> Result<ObjectId> {
        self.instantiate(class, false)
    }

    fn instantiate(&mut self, class: ClassId, loaded: bool) -> Result<ObjectId> {
        let schema = Arc::clone(&self.schema);
        let model_class = schema.class(class)?;
        let mut object = ObjectModel::new(class);
        let mut narrowed = Vec::new();

        for &id in &model_class.properties {
            let property = schema.property(id)?;
            match &property.kind {
                PropertyKind::Scalar(ty) => {
                    object.scalars.insert(
                        id,
                        ScalarSlot {
                            value: default_value(ty),
                            loaded,
                        },
                    );
                }
                PropertyKind::Embedded(_) => {
                    object.scalars.insert(
                        id,
                        ScalarSlot {
                            value: Value::Nil,
                            loaded,
                        },
                    );
                }
                PropertyKind::Association { shape, target } => {
                    if property.covariant_of.is_some() {
                        narrowed.push((property.storage, *target));
                    } else {
                        object.endpoints.insert(id, Endpoint::new(shape, loaded));
                    }
                }
            }
        }

        // Covariant views validate through the shared storage endpoint
        for (storage, target) in narrowed {
            if let Some(endpoint) = object.endpoints.get_mut(&storage) {
                endpoint.validators.combine(Validator::InstanceOf(target));
            }
        }

        let id = self.objects.spawn(object);
        trace!(object = %id, class = %model_class.name, loaded, "created");
        Ok(id)
    }

    /// Destroys an instance.
    ///
    /// Loaded associations are cleared first, with the usual peer updates, so
    /// no surviving object keeps a bidirectional link to it. Embedded
    /// instances it owns are destroyed with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist or a listener vetoes
    /// clearing one of its associations.
    pub fn destroy(&mut self, object: ObjectId) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let class = self.class_of(object)?;
        let mut deferred = Deferred::default();

        for &id in &schema.class(class)?.properties {
            let property = schema.property(id)?;
            match &property.kind {
                PropertyKind::Association { .. } if property.covariant_of.is_none() => {
                    let endpoint = EndpointRef::new(object, id);
                    if self.endpoint(endpoint)?.is_usable() {
                        self.detach_all(endpoint, &mut deferred)?;
                    }
                }
                PropertyKind::Embedded(_) => {
                    let child = self
                        .objects
                        .get(object)?
                        .scalars
                        .get(&id)
                        .and_then(|slot| slot.value.as_object());
                    if let Some(child) = child.filter(|c| self.objects.exists(*c)) {
                        self.destroy(child)?;
                    }
                }
                _ => {}
            }
        }

        let state = self.objects.destroy(object)?;
        if let Some(parent) = state.embedded_in {
            if let Ok(owner) = self.objects.get_mut(parent.owner) {
                if let Some(slot) = owner.scalars.get_mut(&parent.property) {
                    slot.value = Value::Nil;
                }
            }
        }
        self.forget_unsynced(object);

        debug!(object = %object, "destroyed");
        deferred.finish()
    }

    /// Drops a destroyed object from associations without an opposite,
    /// which peer synchronization never reaches.
    fn forget_unsynced(&mut self, object: ObjectId) {
        let schema = Arc::clone(&self.schema);
        let holders: Vec<ObjectId> = self.objects.iter().collect();
        for holder in holders {
            let Ok(state) = self.objects.get_mut(holder) else {
                continue;
            };
            for (property, endpoint) in state.endpoints.iter_mut() {
                let unsynced = schema
                    .property(*property)
                    .is_ok_and(|property| property.opposite.is_none());
                if unsynced && endpoint.forget(object) {
                    trace!(holder = %holder, property = ?property, object = %object, "forgot");
                }
            }
        }
    }

    /// Returns true if the object exists.
    #[must_use]
    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.exists(object)
    }

    /// The class of an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    pub fn class_of(&self, object: ObjectId) -> Result<ClassId> {
        Ok(self.objects.get(object)?.class)
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Registers a listener on an association endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn add_listener(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        listener: Arc<dyn ModificationListener>,
    ) -> Result<()> {
        let association = self.association(owner, property)?;
        self.endpoint_mut(association.endpoint)?
            .listeners
            .combine(listener);
        Ok(())
    }

    /// Unregisters the last registration of a listener. Returns false if it
    /// was not registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn remove_listener(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        listener: &Arc<dyn ModificationListener>,
    ) -> Result<bool> {
        let association = self.association(owner, property)?;
        Ok(self
            .endpoint_mut(association.endpoint)?
            .listeners
            .remove(listener))
    }

    /// Registers a listener for scalar changes of an object, including
    /// changes bubbling up from embedded instances.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    pub fn add_scalar_listener(
        &mut self,
        object: ObjectId,
        listener: Arc<dyn ModificationListener>,
    ) -> Result<()> {
        self.objects.get_mut(object)?.listeners.combine(listener);
        Ok(())
    }

    /// Unregisters a scalar listener. Returns false if it was not registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the object does not exist.
    pub fn remove_scalar_listener(
        &mut self,
        object: ObjectId,
        listener: &Arc<dyn ModificationListener>,
    ) -> Result<bool> {
        Ok(self.objects.get_mut(object)?.listeners.remove(listener))
    }

    /// Adds a validator to an association endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn add_validator(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        validator: Validator,
    ) -> Result<()> {
        let association = self.association(owner, property)?;
        self.endpoint_mut(association.endpoint)?
            .validators
            .combine(validator);
        Ok(())
    }

    /// Drops one reference to a validator. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn remove_validator(
        &mut self,
        owner: ObjectId,
        property: PropertyId,
        validator: &Validator,
    ) -> Result<bool> {
        let association = self.association(owner, property)?;
        Ok(self
            .endpoint_mut(association.endpoint)?
            .validators
            .remove(validator))
    }
}

// Internal plumbing shared by the operation modules.
impl Model {
    pub(crate) fn association(&self, owner: ObjectId, property: PropertyId) -> Result<Association> {
        let class = self.class_of(owner)?;
        if !self.schema.has_property(class, property) {
            return Err(Error::invalid_argument(format!(
                "{} has no property {}",
                self.schema.class(class)?.name,
                self.schema.qualified_name(property)
            )));
        }
        let requested = self.schema.property(property)?;
        let Some((_, target)) = requested.association() else {
            return Err(Error::invalid_argument(format!(
                "{} is not an association",
                self.schema.qualified_name(property)
            )));
        };
        let storage = self.schema.property(requested.storage)?;
        let shape = storage
            .association()
            .map(|(shape, _)| shape.clone())
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal("covariant storage is not an association".into()))
            })?;
        Ok(Association {
            endpoint: EndpointRef::new(owner, requested.storage),
            shape,
            target,
            opposite: storage.opposite,
        })
    }

    pub(crate) fn endpoint(&self, endpoint: EndpointRef) -> Result<&Endpoint> {
        self.objects
            .get(endpoint.owner)?
            .endpoints
            .get(&endpoint.property)
            .ok_or_else(|| missing_endpoint(&self.schema, endpoint))
    }

    pub(crate) fn endpoint_mut(&mut self, endpoint: EndpointRef) -> Result<&mut Endpoint> {
        let schema = &self.schema;
        self.objects
            .get_mut(endpoint.owner)?
            .endpoints
            .get_mut(&endpoint.property)
            .ok_or_else(|| missing_endpoint(schema, endpoint))
    }

    pub(crate) fn opposite_of(&self, endpoint: EndpointRef) -> Result<Option<PropertyId>> {
        Ok(self.schema.property(endpoint.property)?.opposite)
    }

    pub(crate) fn ordering_of(&self, endpoint: EndpointRef) -> Result<Option<ElementOrdering>> {
        Ok(self
            .schema
            .property(endpoint.property)?
            .association()
            .and_then(|(shape, _)| shape.ordering().cloned()))
    }

    pub(crate) fn is_suspended(&self, endpoint: EndpointRef) -> bool {
        self.endpoint(endpoint).is_ok_and(|e| e.suspended)
    }

    /// Suspends an endpoint and returns its previous flag for [`Self::restore`].
    pub(crate) fn suspend(&mut self, endpoint: EndpointRef) -> Result<bool> {
        let endpoint = self.endpoint_mut(endpoint)?;
        Ok(std::mem::replace(&mut endpoint.suspended, true))
    }

    pub(crate) fn restore(&mut self, endpoint: EndpointRef, suspended: bool) {
        if let Ok(endpoint) = self.endpoint_mut(endpoint) {
            endpoint.suspended = suspended;
        }
    }

    pub(crate) fn fire(
        &self,
        endpoint: EndpointRef,
        phase: Phase,
        event: &ModificationEvent,
    ) -> Result<()> {
        let listeners = &self.endpoint(endpoint)?.listeners;
        if listeners.is_empty() {
            return Ok(());
        }
        listeners.fire(phase, event, self.config.listener_errors)
    }

    pub(crate) fn fire_scalar(
        &self,
        object: ObjectId,
        phase: Phase,
        event: &ModificationEvent,
    ) -> Result<()> {
        let listeners: &ListenerList = &self.objects.get(object)?.listeners;
        if listeners.is_empty() {
            return Ok(());
        }
        listeners.fire(phase, event, self.config.listener_errors)
    }

    /// Rejects elements that do not fit an association, before any change.
    pub(crate) fn check_element(&self, association: &Association, element: ObjectId) -> Result<()> {
        let class = self.class_of(element)?;
        if !self.schema.is_subclass(class, association.target) {
            return Err(Error::invalid_argument(format!(
                "{element} is a {}, not a {}",
                self.schema.class(class)?.name,
                self.schema.class(association.target)?.name
            ))
            .with_context(self.context(association.endpoint)));
        }
        self.endpoint(association.endpoint)?
            .validators
            .validate(element, class, &self.schema)?;

        if let Some(opposite) = association.opposite {
            let owner = association.endpoint.owner;
            let owner_class = self.class_of(owner)?;
            self.endpoint(EndpointRef::new(element, opposite))?
                .validators
                .validate(owner, owner_class, &self.schema)?;
        }
        Ok(())
    }

    /// Rejects attaches whose opposite is a map, since the key is unknown.
    /// Keyed references carry their own key.
    pub(crate) fn check_attachable(&self, association: &Association) -> Result<()> {
        let Some(opposite) = association.opposite else {
            return Ok(());
        };
        if matches!(association.shape, AssociationShape::KeyedReference { .. }) {
            return Ok(());
        }
        let opposite_is_map = self
            .schema
            .property(opposite)?
            .association()
            .is_some_and(|(shape, _)| shape.is_map());
        if opposite_is_map {
            return Err(Error::unsupported(format!(
                "elements can only be attached through the map {}",
                self.schema.qualified_name(opposite)
            ))
            .with_context(self.context(association.endpoint)));
        }
        Ok(())
    }

    pub(crate) fn context(&self, endpoint: EndpointRef) -> ErrorContext {
        ErrorContext::new()
            .with_object(endpoint.owner)
            .with_property(self.schema.qualified_name(endpoint.property))
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("objects", &self.objects.len())
            .field("config", &self.config)
            .field("scalar_loader", &self.scalar_loader.is_some())
            .field("association_loader", &self.association_loader.is_some())
            .finish_non_exhaustive()
    }
}
