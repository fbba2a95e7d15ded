//! Loader collaborators for lazily loaded scalars and associations.
//!
//! Models never fetch data themselves. Objects created with
//! [`Model::create_unloaded`](crate::Model::create_unloaded) start with
//! every property unloaded; the first access asks the configured loader.

use tandem_foundation::{ClassId, ObjectId, PropertyId, Result, Value};

/// A request for scalar values of several objects of the same class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalarRequest<'a> {
    /// Class shared by every object.
    pub class: ClassId,
    /// Objects to load, at most the batch size.
    pub objects: &'a [ObjectId],
    /// Properties to load for every object.
    pub properties: &'a [PropertyId],
}

/// Loaded scalar values of one object.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarRow {
    /// The object the values belong to.
    pub object: ObjectId,
    /// Property values.
    pub values: Vec<(PropertyId, Value)>,
}

impl ScalarRow {
    /// Creates an empty row.
    #[must_use]
    pub fn new(object: ObjectId) -> Self {
        Self {
            object,
            values: Vec::new(),
        }
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, property: PropertyId, value: impl Into<Value>) -> Self {
        self.values.push((property, value.into()));
        self
    }
}

/// Loads scalar values in batches.
pub trait ScalarLoader: Send + Sync {
    /// Largest number of objects per call, if limited.
    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    /// Loads the requested properties of the requested objects.
    ///
    /// # Errors
    ///
    /// Any error aborts the batch load.
    fn load(&self, request: &ScalarRequest<'_>) -> Result<Vec<ScalarRow>>;
}

/// A request for the contents of one association endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssociationRequest {
    /// The owning object.
    pub owner: ObjectId,
    /// Its class.
    pub class: ClassId,
    /// The association to load.
    pub property: PropertyId,
}

/// Loaded contents of one association endpoint.
///
/// Contents are installed as-is: the loader is responsible for loading the
/// opposite endpoints consistently.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadedAssociation {
    /// Contents of a reference.
    Reference(Option<ObjectId>),
    /// Contents of an indexed reference.
    Indexed {
        /// The target.
        target: Option<ObjectId>,
        /// Position in the target's list.
        index: Option<usize>,
    },
    /// Contents of a keyed reference.
    Keyed {
        /// The target.
        target: Option<ObjectId>,
        /// Key in the target's map.
        key: Option<Value>,
    },
    /// Members of a list or set, in order.
    Elements(Vec<ObjectId>),
    /// Entries of a map, in order.
    Entries(Vec<(Value, ObjectId)>),
}

/// Loads association endpoints one at a time.
pub trait AssociationLoader: Send + Sync {
    /// Loads the endpoint's contents.
    ///
    /// # Errors
    ///
    /// Any error leaves the endpoint unloaded.
    fn load(&self, request: &AssociationRequest) -> Result<LoadedAssociation>;
}

/// Splits `objects` into chunks of at most `batch_size` (zero means one chunk).
pub(crate) fn partition(
    objects: &[ObjectId],
    batch_size: usize,
) -> impl Iterator<Item = &[ObjectId]> {
    let size = if batch_size == 0 { objects.len().max(1) } else { batch_size };
    objects.chunks(size)
}
