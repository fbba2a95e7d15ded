//! Association endpoint storage.
//!
//! Every (object, association property) pair owns exactly one [`Endpoint`].
//! The endpoint holds the raw contents plus the per-endpoint state the
//! synchronization engine needs: load state, the disabled flag, the
//! suspended flag used to stop peer updates from echoing back, a
//! modification counter for cursors, validators and listeners.
//!
//! Raw operations here never fire events or touch peers.

use im::{HashMap, OrdMap, Vector};
use tandem_foundation::{ObjectId, Value};

use crate::listener::ListenerList;
use crate::metadata::AssociationShape;
use crate::validator::ValidatorChain;

/// Whether an endpoint's contents have been materialized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Contents have not been loaded.
    Unloaded,
    /// A loader call is in progress.
    Loading,
    /// Contents are present.
    Loaded,
}

/// One ordering component of a member's key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct KeyPart {
    pub value: Value,
    pub descending: bool,
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.descending {
            other.value.cmp(&self.value)
        } else {
            self.value.cmp(&other.value)
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The key a set member is stored under.
///
/// Members of sets without an ordering are keyed by identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SortKey(pub Vec<KeyPart>);

impl SortKey {
    pub fn identity(element: ObjectId) -> Self {
        Self(vec![KeyPart {
            value: Value::Object(element),
            descending: false,
        }])
    }
}

/// Members of a set or navigable set.
///
/// Sorted sets iterate in key order; other sets keep insertion order.
/// Keys are unique: inserting a member whose key is taken evicts the
/// current holder.
#[derive(Clone, Debug)]
pub(crate) struct ElementSet {
    sorted: bool,
    order: Vector<ObjectId>,
    by_key: OrdMap<SortKey, ObjectId>,
    key_of: HashMap<ObjectId, SortKey>,
}

impl ElementSet {
    pub fn new(sorted: bool) -> Self {
        Self {
            sorted,
            order: Vector::new(),
            by_key: OrdMap::new(),
            key_of: HashMap::new(),
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn len(&self) -> usize {
        self.key_of.len()
    }

    pub fn contains(&self, element: ObjectId) -> bool {
        self.key_of.contains_key(&element)
    }

    pub fn key_of(&self, element: ObjectId) -> Option<&SortKey> {
        self.key_of.get(&element)
    }

    pub fn holder(&self, key: &SortKey) -> Option<ObjectId> {
        self.by_key.get(key).copied()
    }

    pub fn elements(&self) -> Vec<ObjectId> {
        if self.sorted {
            self.by_key.values().copied().collect()
        } else {
            self.order.iter().copied().collect()
        }
    }

    pub fn get(&self, position: usize) -> Option<ObjectId> {
        if self.sorted {
            self.by_key.values().nth(position).copied()
        } else {
            self.order.get(position).copied()
        }
    }

    pub fn position(&self, element: ObjectId) -> Option<usize> {
        let key = self.key_of.get(&element)?;
        if self.sorted {
            Some(self.by_key.range(..key.clone()).count())
        } else {
            self.order.index_of(&element)
        }
    }

    /// Where `element` would land under `key`, ignoring `excluded` members.
    pub fn projected_position(
        &self,
        element: ObjectId,
        key: &SortKey,
        excluded: &[ObjectId],
    ) -> Option<usize> {
        if self.sorted {
            Some(
                self.by_key
                    .range(..key.clone())
                    .filter(|(_, member)| **member != element && !excluded.contains(member))
                    .count(),
            )
        } else {
            let position = self.order.index_of(&element)?;
            let shift = excluded
                .iter()
                .filter_map(|member| self.order.index_of(member))
                .filter(|p| *p < position)
                .count();
            Some(position - shift)
        }
    }

    /// Inserts a member; returns the member it crowded out, if any.
    ///
    /// `position` only matters for insertion-ordered sets (`None` appends).
    pub fn insert(
        &mut self,
        element: ObjectId,
        key: SortKey,
        position: Option<usize>,
    ) -> Option<ObjectId> {
        let evicted = self.holder(&key).filter(|holder| *holder != element);
        if let Some(evicted) = evicted {
            self.remove(evicted);
        }
        self.remove(element);
        self.by_key.insert(key.clone(), element);
        self.key_of.insert(element, key);
        if !self.sorted {
            let at = position.unwrap_or(self.order.len()).min(self.order.len());
            self.order.insert(at, element);
        }
        evicted
    }

    /// Removes a member; returns where it was.
    pub fn remove(&mut self, element: ObjectId) -> Option<usize> {
        let position = self.position(element)?;
        if let Some(key) = self.key_of.remove(&element) {
            self.by_key.remove(&key);
        }
        if !self.sorted {
            self.order.remove(position);
        }
        Some(position)
    }
}

/// Entries of a map. Values are unique as well as keys.
#[derive(Clone, Debug)]
pub(crate) struct ElementMap {
    sorted: bool,
    order: Vector<Value>,
    entries: OrdMap<Value, ObjectId>,
    key_of: HashMap<ObjectId, Value>,
}

impl ElementMap {
    pub fn new(sorted: bool) -> Self {
        Self {
            sorted,
            order: Vector::new(),
            entries: OrdMap::new(),
            key_of: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &Value) -> Option<ObjectId> {
        self.entries.get(key).copied()
    }

    pub fn key_of(&self, element: ObjectId) -> Option<&Value> {
        self.key_of.get(&element)
    }

    pub fn keys(&self) -> Vec<Value> {
        if self.sorted {
            self.entries.keys().cloned().collect()
        } else {
            self.order.iter().cloned().collect()
        }
    }

    pub fn entries(&self) -> Vec<(Value, ObjectId)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|element| (key, element)))
            .collect()
    }

    pub fn key_at(&self, position: usize) -> Option<Value> {
        if self.sorted {
            self.entries.keys().nth(position).cloned()
        } else {
            self.order.get(position).cloned()
        }
    }

    /// Binds `key` to `element`. The element must not be present under
    /// another key. Returns the element previously bound to `key`.
    pub fn insert(&mut self, key: Value, element: ObjectId) -> Option<ObjectId> {
        let displaced = self.remove_key(&key);
        self.entries.insert(key.clone(), element);
        self.key_of.insert(element, key.clone());
        if !self.sorted {
            self.order.push_back(key);
        }
        displaced
    }

    pub fn remove_key(&mut self, key: &Value) -> Option<ObjectId> {
        let element = self.entries.remove(key)?;
        self.key_of.remove(&element);
        if !self.sorted {
            if let Some(position) = self.order.index_of(key) {
                self.order.remove(position);
            }
        }
        Some(element)
    }
}

/// Raw contents of an endpoint, by shape.
#[derive(Clone, Debug)]
pub(crate) enum EndpointData {
    Reference {
        target: Option<ObjectId>,
    },
    Indexed {
        target: Option<ObjectId>,
        /// Actual position while attached, requested position otherwise.
        index: Option<usize>,
    },
    Keyed {
        target: Option<ObjectId>,
        /// Kept while detached; hidden from readers.
        key: Option<Value>,
    },
    List(Vector<ObjectId>),
    Set(ElementSet),
    Map(ElementMap),
}

impl EndpointData {
    pub fn empty(shape: &AssociationShape) -> Self {
        match shape {
            AssociationShape::Reference => Self::Reference { target: None },
            AssociationShape::IndexedReference => Self::Indexed {
                target: None,
                index: None,
            },
            AssociationShape::KeyedReference { .. } => Self::Keyed {
                target: None,
                key: None,
            },
            AssociationShape::List => Self::List(Vector::new()),
            AssociationShape::Set { .. } => Self::Set(ElementSet::new(false)),
            AssociationShape::NavigableSet { .. } => Self::Set(ElementSet::new(true)),
            AssociationShape::Map { sorted, .. } => Self::Map(ElementMap::new(*sorted)),
        }
    }
}

/// Which raw layout an endpoint uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Storage {
    Reference,
    Indexed,
    Keyed,
    List,
    Set,
    Map,
}

/// Runtime state of one association property of one object.
#[derive(Clone, Debug)]
pub(crate) struct Endpoint {
    pub data: EndpointData,
    pub load: LoadState,
    pub disabled: bool,
    /// Set while this endpoint is pushing a change to its peers.
    pub suspended: bool,
    pub mod_count: u64,
    pub validators: ValidatorChain,
    pub listeners: ListenerList,
}

impl Endpoint {
    pub fn new(shape: &AssociationShape, loaded: bool) -> Self {
        Self {
            data: EndpointData::empty(shape),
            load: if loaded { LoadState::Loaded } else { LoadState::Unloaded },
            disabled: false,
            suspended: false,
            mod_count: 0,
            validators: ValidatorChain::new(),
            listeners: ListenerList::new(),
        }
    }

    pub fn storage(&self) -> Storage {
        match &self.data {
            EndpointData::Reference { .. } => Storage::Reference,
            EndpointData::Indexed { .. } => Storage::Indexed,
            EndpointData::Keyed { .. } => Storage::Keyed,
            EndpointData::List(_) => Storage::List,
            EndpointData::Set(_) => Storage::Set,
            EndpointData::Map(_) => Storage::Map,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.load == LoadState::Loaded && !self.disabled
    }

    pub fn touch(&mut self) {
        self.mod_count += 1;
    }

    /// The single target of a reference endpoint.
    pub fn target(&self) -> Option<ObjectId> {
        match &self.data {
            EndpointData::Reference { target }
            | EndpointData::Indexed { target, .. }
            | EndpointData::Keyed { target, .. } => *target,
            _ => None,
        }
    }

    /// Every element, in iteration order.
    pub fn elements(&self) -> Vec<ObjectId> {
        match &self.data {
            EndpointData::Reference { target }
            | EndpointData::Indexed { target, .. }
            | EndpointData::Keyed { target, .. } => target.iter().copied().collect(),
            EndpointData::List(list) => list.iter().copied().collect(),
            EndpointData::Set(set) => set.elements(),
            EndpointData::Map(map) => map.entries().into_iter().map(|(_, e)| e).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            EndpointData::Reference { target }
            | EndpointData::Indexed { target, .. }
            | EndpointData::Keyed { target, .. } => usize::from(target.is_some()),
            EndpointData::List(list) => list.len(),
            EndpointData::Set(set) => set.len(),
            EndpointData::Map(map) => map.len(),
        }
    }

    /// Returns true if the endpoint currently links to `element`.
    pub fn holds(&self, element: ObjectId) -> bool {
        match &self.data {
            EndpointData::Reference { target }
            | EndpointData::Indexed { target, .. }
            | EndpointData::Keyed { target, .. } => *target == Some(element),
            EndpointData::List(list) => list.index_of(&element).is_some(),
            EndpointData::Set(set) => set.contains(element),
            EndpointData::Map(map) => map.key_of(element).is_some(),
        }
    }

    /// Drops `element` without events or peer updates. Returns true if it
    /// was held.
    pub fn forget(&mut self, element: ObjectId) -> bool {
        let forgotten = match &mut self.data {
            EndpointData::Reference { target }
            | EndpointData::Indexed { target, .. }
            | EndpointData::Keyed { target, .. } => {
                let held = *target == Some(element);
                if held {
                    *target = None;
                }
                held
            }
            EndpointData::List(list) => match list.index_of(&element) {
                Some(position) => {
                    list.remove(position);
                    true
                }
                None => false,
            },
            EndpointData::Set(set) => set.remove(element).is_some(),
            EndpointData::Map(map) => match map.key_of(element).cloned() {
                Some(key) => map.remove_key(&key).is_some(),
                None => false,
            },
        };
        if forgotten {
            self.touch();
        }
        forgotten
    }

    /// Element at a position of a collection or map, for cursors.
    pub fn element_at(&self, position: usize) -> Option<ObjectId> {
        match &self.data {
            EndpointData::List(list) => list.get(position).copied(),
            EndpointData::Set(set) => set.get(position),
            EndpointData::Map(map) => map.key_at(position).and_then(|key| map.get(&key)),
            _ => None,
        }
    }
}
