//! Modification intents and the events fired around them.
//!
//! Every change to an object model is described twice: once as a
//! [`Modification`] (what the caller asked for) and once per affected
//! endpoint as a [`ModificationEvent`] (what actually changed there). The
//! same event value is delivered to `modifying` listeners before the change
//! and to `modified` listeners after it.

use std::fmt;
use std::sync::Arc;

use crate::object::{EndpointRef, ObjectId};
use crate::value::Value;

/// The intent behind a change, shared by every event it produces.
#[derive(Clone, Debug, PartialEq)]
pub enum Modification {
    /// A scalar property was assigned.
    SetScalar {
        /// The assigned value.
        value: Value,
    },
    /// A reference was assigned.
    SetReference {
        /// The new target, if any.
        target: Option<ObjectId>,
    },
    /// The index of an indexed reference was assigned.
    SetIndex {
        /// The requested index; `None` detaches.
        index: Option<usize>,
    },
    /// An indexed reference was assigned together with its index.
    SetIndexed {
        /// The requested index.
        index: Option<usize>,
        /// The new target, if any.
        target: Option<ObjectId>,
    },
    /// The key of a keyed reference was assigned.
    SetKey {
        /// The requested key; `None` detaches.
        key: Option<Value>,
    },
    /// A keyed reference was assigned together with its key.
    SetKeyed {
        /// The requested key.
        key: Option<Value>,
        /// The new target, if any.
        target: Option<ObjectId>,
    },
    /// An element was appended or added.
    Add {
        /// The added element.
        element: ObjectId,
    },
    /// An element was inserted at a position.
    Insert {
        /// The requested position.
        index: usize,
        /// The inserted element.
        element: ObjectId,
    },
    /// The element at a position was replaced.
    SetAt {
        /// The replaced position.
        index: usize,
        /// The new element.
        element: ObjectId,
    },
    /// An element was removed by identity.
    Remove {
        /// The removed element.
        element: ObjectId,
    },
    /// The element at a position was removed.
    RemoveAt {
        /// The removed position.
        index: usize,
    },
    /// A collection or map was cleared.
    Clear,
    /// Several elements were added in one call.
    AddAll {
        /// Number of elements requested.
        count: usize,
    },
    /// Elements not in the retained set were removed.
    Retain {
        /// Number of elements retained by the caller's set.
        count: usize,
    },
    /// A contiguous range of a list was cleared.
    SubListClear {
        /// Start of the range (inclusive).
        from: usize,
        /// End of the range (exclusive).
        to: usize,
    },
    /// The last element returned by a cursor was removed.
    CursorRemove,
    /// A map entry was put.
    Put {
        /// The entry key.
        key: Value,
        /// The entry value.
        element: ObjectId,
    },
    /// Several map entries were put in one call.
    PutAll {
        /// Number of entries requested.
        count: usize,
    },
    /// A map entry was removed by key.
    RemoveKey {
        /// The removed key.
        key: Value,
    },
    /// A map entry was removed by value.
    RemoveValue {
        /// The removed value.
        element: ObjectId,
    },
    /// A frozen element was removed and reinserted because its sort key changed.
    Refresh,
    /// A member was crowded out by another element with the same key.
    Evict,
}

/// Which half of a change a value belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyVersion {
    /// The state before the change.
    Detach,
    /// The state after the change.
    Attach,
}

/// The shape of a change, derived from which halves are present.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModificationType {
    /// Only the attach half is present.
    Attach,
    /// Only the detach half is present.
    Detach,
    /// Both halves are present.
    Replace,
}

/// The kind of endpoint an event was fired on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A scalar property.
    Scalar,
    /// A reference, indexed reference, or keyed reference.
    Reference,
    /// An element of a list, set, or map.
    Element,
}

/// One half of a change: a value plus its index or key, where relevant.
#[derive(Clone, Debug, PartialEq)]
pub struct Slot {
    /// The value (an object reference for associations).
    pub value: Value,
    /// Position in a list or indexed reference.
    pub index: Option<usize>,
    /// Key in a map or keyed reference.
    pub key: Option<Value>,
}

impl Slot {
    /// Creates a slot holding only a value.
    #[must_use]
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            index: None,
            key: None,
        }
    }

    /// Creates a slot holding an object reference.
    #[must_use]
    pub fn object(id: ObjectId) -> Self {
        Self::value(Value::Object(id))
    }

    /// Sets the index.
    #[must_use]
    pub fn with_index(mut self, index: Option<usize>) -> Self {
        self.index = index;
        self
    }

    /// Sets the key.
    #[must_use]
    pub fn with_key(mut self, key: Option<Value>) -> Self {
        self.key = key;
        self
    }
}

/// A change observed on one endpoint.
#[derive(Clone, Debug)]
pub struct ModificationEvent {
    source: EndpointRef,
    kind: EventKind,
    modification: Arc<Modification>,
    detached: Option<Slot>,
    attached: Option<Slot>,
    cause: Option<Arc<ModificationEvent>>,
}

impl ModificationEvent {
    /// Creates an event with neither half set.
    #[must_use]
    pub fn new(source: EndpointRef, kind: EventKind, modification: Arc<Modification>) -> Self {
        Self {
            source,
            kind,
            modification,
            detached: None,
            attached: None,
            cause: None,
        }
    }

    /// Sets the detach half.
    #[must_use]
    pub fn with_detached(mut self, slot: Slot) -> Self {
        self.detached = Some(slot);
        self
    }

    /// Sets the attach half.
    #[must_use]
    pub fn with_attached(mut self, slot: Slot) -> Self {
        self.attached = Some(slot);
        self
    }

    /// Sets the event this one was derived from.
    #[must_use]
    pub fn with_cause(mut self, cause: Arc<ModificationEvent>) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Builds the event an owner observes when `inner` changes something it
    /// owns through `source`.
    ///
    /// Both halves carry the owned object, so the owner sees a replace of the
    /// object with itself whose cause explains what changed inside.
    #[must_use]
    pub fn bubbled(source: EndpointRef, owned: ObjectId, inner: Arc<ModificationEvent>) -> Self {
        let modification = Arc::clone(&inner.modification);
        Self::new(source, EventKind::Scalar, modification)
            .with_detached(Slot::object(owned))
            .with_attached(Slot::object(owned))
            .with_cause(inner)
    }

    /// The endpoint the event was fired on.
    #[must_use]
    pub fn source(&self) -> EndpointRef {
        self.source
    }

    /// The kind of endpoint the event was fired on.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The intent that produced this event.
    #[must_use]
    pub fn modification(&self) -> &Modification {
        &self.modification
    }

    /// The shared intent, for deriving further events from the same change.
    #[must_use]
    pub fn shared_modification(&self) -> Arc<Modification> {
        Arc::clone(&self.modification)
    }

    /// The requested half, if present.
    #[must_use]
    pub fn slot(&self, version: PropertyVersion) -> Option<&Slot> {
        match version {
            PropertyVersion::Detach => self.detached.as_ref(),
            PropertyVersion::Attach => self.attached.as_ref(),
        }
    }

    /// The value of the requested half; nil when that half is absent.
    #[must_use]
    pub fn value(&self, version: PropertyVersion) -> &Value {
        const NIL: &Value = &Value::Nil;
        self.slot(version).map_or(NIL, |slot| &slot.value)
    }

    /// The object reference of the requested half, if it holds one.
    #[must_use]
    pub fn object(&self, version: PropertyVersion) -> Option<ObjectId> {
        self.value(version).as_object()
    }

    /// The index of the requested half.
    #[must_use]
    pub fn index(&self, version: PropertyVersion) -> Option<usize> {
        self.slot(version).and_then(|slot| slot.index)
    }

    /// The key of the requested half.
    #[must_use]
    pub fn key(&self, version: PropertyVersion) -> Option<&Value> {
        self.slot(version).and_then(|slot| slot.key.as_ref())
    }

    /// Whether this event attaches, detaches, or replaces.
    #[must_use]
    pub fn modification_type(&self) -> ModificationType {
        match (&self.detached, &self.attached) {
            (None, Some(_)) => ModificationType::Attach,
            (Some(_), None) => ModificationType::Detach,
            _ => ModificationType::Replace,
        }
    }

    /// The event this one was derived from, if it was bubbled.
    #[must_use]
    pub fn cause(&self) -> Option<&ModificationEvent> {
        self.cause.as_deref()
    }

    /// The innermost event of the cause chain.
    ///
    /// For a bubbled event this is the change as it happened on the nested
    /// object, with its own source property and values.
    #[must_use]
    pub fn origin(&self) -> &ModificationEvent {
        let mut event = self;
        while let Some(cause) = event.cause() {
            event = cause;
        }
        event
    }
}

impl fmt::Display for ModificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} on {}.{:?}: {:?}",
            self.modification_type(),
            self.source.owner,
            self.source.property,
            self.modification
        )
    }
}
