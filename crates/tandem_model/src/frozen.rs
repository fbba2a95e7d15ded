//! Frozen contexts: which containers must re-sort an element when one of
//! its fields changes.
//!
//! A sorted or field-keyed container *freezes* each member on the fields its
//! ordering reads. When such a field is about to change, every container in
//! the field's context *suspends* the member (takes it out under its old
//! key); after the change the containers *resume* it (put it back under the
//! new key). Contexts hold [`EndpointRef`]s only, so a container whose owner
//! was destroyed simply drops out.

use std::collections::HashMap;

use tandem_foundation::{EndpointRef, Error, ObjectId, Result};

/// Containers that have frozen one property of one instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrozenContext {
    containers: Vec<EndpointRef>,
}

impl FrozenContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container. Registering the same container twice is a no-op.
    pub fn combine(&mut self, container: EndpointRef) {
        if !self.containers.contains(&container) {
            self.containers.push(container);
        }
    }

    /// Unregisters a container. Returns false if it was not registered.
    pub fn remove(&mut self, container: EndpointRef) -> bool {
        match self.containers.iter().position(|c| *c == container) {
            Some(position) => {
                self.containers.remove(position);
                true
            }
            None => false,
        }
    }

    /// Drops containers whose owner is no longer alive.
    pub fn retain_alive(&mut self, mut alive: impl FnMut(ObjectId) -> bool) {
        self.containers.retain(|c| alive(c.owner));
    }

    /// Registered containers, in registration order.
    #[must_use]
    pub fn containers(&self) -> &[EndpointRef] {
        &self.containers
    }

    /// Returns true if no container is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Where a suspended element used to be, for reinsertion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Suspension {
    count: usize,
    /// Position in an insertion-ordered container.
    pub position: Option<usize>,
}

/// Reference-counted suspensions, one per (container, element).
///
/// Only the first suspend takes the element out and only the matching last
/// resume puts it back, so nested changes to several frozen fields of the
/// same element re-sort it once.
#[derive(Clone, Debug, Default)]
pub(crate) struct SuspensionTable {
    entries: HashMap<(EndpointRef, ObjectId), Suspension>,
}

impl SuspensionTable {
    /// Records a suspension. Returns true if this is the outermost one, in
    /// which case the caller removes the element and reports its position.
    pub fn suspend(&mut self, container: EndpointRef, element: ObjectId) -> bool {
        let entry = self
            .entries
            .entry((container, element))
            .or_insert(Suspension {
                count: 0,
                position: None,
            });
        entry.count += 1;
        entry.count == 1
    }

    /// Remembers where the outermost suspension removed the element from.
    pub fn set_position(
        &mut self,
        container: EndpointRef,
        element: ObjectId,
        position: Option<usize>,
    ) {
        if let Some(entry) = self.entries.get_mut(&(container, element)) {
            entry.position = position;
        }
    }

    /// Returns true if the element is currently suspended from the container.
    pub fn is_suspended(&self, container: EndpointRef, element: ObjectId) -> bool {
        self.entries.contains_key(&(container, element))
    }

    /// Releases a suspension. Returns the record when this was the outermost
    /// one, in which case the caller reinserts the element.
    ///
    /// # Errors
    ///
    /// Returns an invalid-state error if the element was not suspended.
    pub fn resume(
        &mut self,
        container: EndpointRef,
        element: ObjectId,
    ) -> Result<Option<Suspension>> {
        let key = (container, element);
        let Some(entry) = self.entries.get_mut(&key) else {
            return Err(Error::invalid_state(format!(
                "cannot resume {element} in {:?}: it was not suspended",
                container
            )));
        };
        entry.count -= 1;
        if entry.count == 0 {
            Ok(self.entries.remove(&key))
        } else {
            Ok(None)
        }
    }

    /// Number of live suspensions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
