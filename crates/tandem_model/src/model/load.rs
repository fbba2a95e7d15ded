//! Load state, loader plumbing and batched scalar loading.
//!
//! Loading never fires events and never touches peers: loaded contents are
//! assumed to already agree with the other side.

use std::collections::BTreeMap;
use std::sync::Arc;

use tandem_foundation::{EndpointRef, Error, ErrorKind, ObjectId, PropertyId, Result, Value};
use tracing::debug;

use super::Model;
use crate::endpoint::{EndpointData, LoadState, SortKey};
use crate::loader::{
    partition, AssociationLoader, AssociationRequest, LoadedAssociation, ScalarLoader,
    ScalarRequest,
};
use crate::metadata::PropertyKind;

impl Model {
    /// Installs the loader used for unloaded scalars.
    pub fn set_scalar_loader(&mut self, loader: Arc<dyn ScalarLoader>) {
        self.scalar_loader = Some(loader);
    }

    /// Installs the loader used for unloaded or disabled associations.
    pub fn set_association_loader(&mut self, loader: Arc<dyn AssociationLoader>) {
        self.association_loader = Some(loader);
    }

    /// Load state of an association endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn load_state(&self, owner: ObjectId, property: PropertyId) -> Result<LoadState> {
        let association = self.association(owner, property)?;
        Ok(self.endpoint(association.endpoint)?.load)
    }

    /// Returns true if the association's contents are present.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn is_loaded(&self, owner: ObjectId, property: PropertyId) -> Result<bool> {
        Ok(self.load_state(owner, property)? == LoadState::Loaded)
    }

    /// Returns true if the association is excluded from this view.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn is_disabled(&self, owner: ObjectId, property: PropertyId) -> Result<bool> {
        let association = self.association(owner, property)?;
        Ok(self.endpoint(association.endpoint)?.disabled)
    }

    /// Excludes an association from this view. The next access reloads it.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn disable(&mut self, owner: ObjectId, property: PropertyId) -> Result<()> {
        let association = self.association(owner, property)?;
        self.endpoint_mut(association.endpoint)?.disabled = true;
        Ok(())
    }

    /// Includes a disabled association again, keeping its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is not an association of the object.
    pub fn enable(&mut self, owner: ObjectId, property: PropertyId) -> Result<()> {
        let association = self.association(owner, property)?;
        self.endpoint_mut(association.endpoint)?.disabled = false;
        Ok(())
    }

    /// Loads an association now rather than on first access.
    ///
    /// # Errors
    ///
    /// Returns a lazy-initialization error if no association loader is
    /// installed, or the loader's error.
    pub fn load(&mut self, owner: ObjectId, property: PropertyId) -> Result<()> {
        let association = self.association(owner, property)?;
        self.ensure_loaded(association.endpoint)
    }

    /// Loads properties of several objects of one class.
    ///
    /// Associations are loaded one endpoint at a time. Scalars are grouped
    /// by which of the requested properties each object still lacks, and
    /// each group is fetched in chunks no larger than the batch size.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error if the objects do not share a class
    /// or a property does not belong to it, a lazy-initialization error if
    /// a needed loader is missing, and any loader error.
    pub fn batch_load(&mut self, objects: &[ObjectId], properties: &[PropertyId]) -> Result<()> {
        let Some(&first) = objects.first() else {
            return Ok(());
        };
        let class = self.class_of(first)?;
        for &object in objects {
            if self.class_of(object)? != class {
                return Err(Error::invalid_argument(format!(
                    "batch loads need objects of one class, {object} is not a {}",
                    self.schema.class(class)?.name
                )));
            }
        }

        let mut scalars = Vec::new();
        let mut associations = Vec::new();
        for &property in properties {
            if !self.schema.has_property(class, property) {
                return Err(Error::invalid_argument(format!(
                    "{} has no property {}",
                    self.schema.class(class)?.name,
                    self.schema.qualified_name(property)
                )));
            }
            let model_property = self.schema.property(property)?;
            if model_property.is_scalar() {
                scalars.push(property);
            } else if !associations.contains(&model_property.storage) {
                associations.push(model_property.storage);
            }
        }

        for storage in associations {
            for &object in objects {
                self.ensure_loaded(EndpointRef::new(object, storage))?;
            }
        }

        // Objects lacking the same properties share a request
        let mut groups: BTreeMap<Vec<PropertyId>, Vec<ObjectId>> = BTreeMap::new();
        for &object in objects {
            let state = self.objects.get(object)?;
            let missing: Vec<PropertyId> = scalars
                .iter()
                .copied()
                .filter(|property| state.scalars.get(property).is_some_and(|slot| !slot.loaded))
                .collect();
            if !missing.is_empty() {
                groups.entry(missing).or_default().push(object);
            }
        }
        if groups.is_empty() {
            return Ok(());
        }

        let Some(loader) = self.scalar_loader.clone() else {
            let property = groups.keys().next().and_then(|missing| missing.first().copied());
            let name = match property {
                Some(property) => self.schema.property(property)?.name.to_string(),
                None => String::new(),
            };
            return Err(Error::lazy_initialization(&*self.schema.class(class)?.name, name));
        };
        let batch_size = self
            .config
            .batch_size
            .or(loader.max_batch_size())
            .unwrap_or(usize::MAX)
            .max(1);

        for (missing, group) in &groups {
            for chunk in partition(group, batch_size) {
                debug!(
                    class = ?class,
                    objects = chunk.len(),
                    properties = missing.len(),
                    "batch load"
                );
                let request = ScalarRequest {
                    class,
                    objects: chunk,
                    properties: missing,
                };
                for row in loader.load(&request)? {
                    if !chunk.contains(&row.object) {
                        return Err(Error::new(ErrorKind::Loader(format!(
                            "loader returned {}, which was not requested",
                            row.object
                        ))));
                    }
                    for (property, value) in row.values {
                        if missing.contains(&property) {
                            self.apply_loaded(row.object, property, value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes a loaded scalar without events.
    fn apply_loaded(&mut self, object: ObjectId, property: PropertyId, value: Value) -> Result<()> {
        match &self.schema.property(property)?.kind {
            PropertyKind::Scalar(ty) if !ty.accepts(&value.value_type()) => {
                return Err(Error::type_mismatch(ty.clone(), value.value_type())
                    .with_context(self.context(EndpointRef::new(object, property))));
            }
            PropertyKind::Embedded(_) => {
                if let Some(child) = value.as_object() {
                    self.objects.get_mut(child)?.embedded_in = Some(
                        EndpointRef::new(object, property),
                    );
                }
            }
            _ => {}
        }
        if let Some(slot) = self.objects.get_mut(object)?.scalars.get_mut(&property) {
            slot.value = value;
            slot.loaded = true;
        }
        Ok(())
    }

    /// Makes an endpoint usable, going through the association loader if it
    /// is unloaded or disabled.
    pub(crate) fn ensure_loaded(&mut self, endpoint: EndpointRef) -> Result<()> {
        let state = self.endpoint(endpoint)?;
        let previous = state.load;
        match (previous, state.disabled) {
            (LoadState::Loaded, false) => return Ok(()),
            (LoadState::Loading, _) => {
                return Err(Error::invalid_state(format!(
                    "{} of {} is already loading",
                    self.schema.qualified_name(endpoint.property),
                    endpoint.owner
                )))
            }
            _ => {}
        }

        let class = self.class_of(endpoint.owner)?;
        let Some(loader) = self.association_loader.clone() else {
            return Err(Error::lazy_initialization(
                &*self.schema.class(class)?.name,
                &*self.schema.property(endpoint.property)?.name,
            )
            .with_context(self.context(endpoint)));
        };

        self.endpoint_mut(endpoint)?.load = LoadState::Loading;
        debug!(endpoint = ?endpoint, "loading association");
        let request = AssociationRequest {
            owner: endpoint.owner,
            class,
            property: endpoint.property,
        };
        let loaded = loader.load(&request).and_then(|contents| self.install(endpoint, contents));
        if loaded.is_err() {
            if let Ok(state) = self.endpoint_mut(endpoint) {
                state.load = previous;
            }
        }
        loaded
    }

    /// Replaces an endpoint's contents with loaded ones.
    fn install(&mut self, endpoint: EndpointRef, contents: LoadedAssociation) -> Result<()> {
        let shape = self
            .schema
            .property(endpoint.property)?
            .association()
            .map(|(shape, _)| shape.clone())
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal("loaded endpoint is not an association".into()))
            })?;
        let ordering = shape.ordering().cloned();
        let mut data = EndpointData::empty(&shape);

        match (&mut data, contents) {
            (EndpointData::Reference { target }, LoadedAssociation::Reference(loaded)) => {
                *target = loaded
            }
            (
                EndpointData::Indexed { target, index },
                LoadedAssociation::Indexed {
                    target: loaded,
                    index: loaded_index,
                },
            ) => {
                *target = loaded;
                *index = loaded_index;
            }
            (
                EndpointData::Keyed { target, key },
                LoadedAssociation::Keyed {
                    target: loaded,
                    key: loaded_key,
                },
            ) => {
                *target = loaded;
                *key = loaded_key;
            }
            (EndpointData::List(list), LoadedAssociation::Elements(elements)) => {
                for element in elements {
                    if list.index_of(&element).is_none() {
                        list.push_back(element);
                    }
                }
            }
            (EndpointData::Set(set), LoadedAssociation::Elements(elements)) => {
                for element in elements {
                    let key = match &ordering {
                        Some(ordering) => self.member_key(element, ordering, None)?,
                        None => SortKey::identity(element),
                    };
                    set.insert(element, key, None);
                }
            }
            (EndpointData::Map(map), LoadedAssociation::Entries(entries)) => {
                for (key, element) in entries {
                    map.insert(key, element);
                }
            }
            (_, contents) => {
                return Err(Error::new(ErrorKind::Loader(format!(
                    "loader returned {contents:?} for the {} {}",
                    shape.name(),
                    self.schema.qualified_name(endpoint.property)
                ))));
            }
        }

        let previous = self.endpoint(endpoint)?.elements();
        for element in previous {
            self.unfreeze(element, endpoint);
        }
        let state = self.endpoint_mut(endpoint)?;
        state.data = data;
        state.load = LoadState::Loaded;
        state.disabled = false;
        state.touch();
        if ordering.is_some() {
            for element in self.endpoint(endpoint)?.elements() {
                self.freeze(element, endpoint);
            }
        }
        Ok(())
    }
}
