//! Resolved, immutable class and property metadata.
//!
//! A [`Schema`] is built once from [`ClassSchema`] declarations and then
//! shared (usually through an `Arc`) by every model that uses it. Building
//! checks the declarations and rejects malformed ones with
//! [`ErrorKind::InvalidProgram`](tandem_foundation::ErrorKind::InvalidProgram).

use std::collections::HashMap;
use std::sync::Arc;

use tandem_foundation::{ClassId, Error, PropertyId, Result, Type};

use crate::schema::{ClassSchema, OrderBy, PropertyDecl, PropertyKindDecl};

/// One resolved ordering component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPath {
    /// Property ids from the element down to a scalar.
    pub path: Vec<PropertyId>,
    /// Whether this component sorts in descending order.
    pub descending: bool,
}

/// Resolved ordering or equality definition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementOrdering {
    /// Components, most significant first.
    pub parts: Vec<KeyPath>,
}

impl ElementOrdering {
    /// Properties of the element whose changes can move it in a container.
    ///
    /// These are the first segments of every path, without duplicates.
    #[must_use]
    pub fn frozen_properties(&self) -> Vec<PropertyId> {
        let mut properties: Vec<PropertyId> = Vec::new();
        for part in &self.parts {
            if let Some(first) = part.path.first() {
                if !properties.contains(first) {
                    properties.push(*first);
                }
            }
        }
        properties
    }
}

/// The storage shape of an association endpoint.
#[derive(Clone, Debug, PartialEq)]
pub enum AssociationShape {
    /// Single-valued.
    Reference,
    /// Single-valued, with the position in the opposite list.
    IndexedReference,
    /// Single-valued, with the key in the opposite map.
    KeyedReference {
        /// Key type.
        key: Type,
    },
    /// Ordered, duplicate-free collection.
    List,
    /// Insertion-ordered set.
    Set {
        /// Field-based equality; identity when absent.
        equality: Option<ElementOrdering>,
    },
    /// Sorted set.
    NavigableSet {
        /// Sort definition.
        ordering: ElementOrdering,
    },
    /// Map from scalar keys to elements.
    Map {
        /// Key type.
        key: Type,
        /// Whether keys are kept sorted instead of in insertion order.
        sorted: bool,
    },
}

impl AssociationShape {
    /// Returns true for list, set, and navigable-set shapes.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::List | Self::Set { .. } | Self::NavigableSet { .. })
    }

    /// Returns true for the single-valued shapes.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Reference | Self::IndexedReference | Self::KeyedReference { .. }
        )
    }

    /// Returns true for map shapes.
    #[must_use]
    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map { .. })
    }

    /// The ordering members are keyed by, if any.
    #[must_use]
    pub fn ordering(&self) -> Option<&ElementOrdering> {
        match self {
            Self::Set { equality } => equality.as_ref(),
            Self::NavigableSet { ordering } => Some(ordering),
            _ => None,
        }
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::IndexedReference => "indexed reference",
            Self::KeyedReference { .. } => "keyed reference",
            Self::List => "list",
            Self::Set { .. } => "set",
            Self::NavigableSet { .. } => "navigable set",
            Self::Map { .. } => "map",
        }
    }

    fn same_family(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// What a resolved property stores.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyKind {
    /// A plain scalar.
    Scalar(Type),
    /// An embedded value object of the given class.
    Embedded(ClassId),
    /// An association to instances of `target`.
    Association {
        /// Storage shape.
        shape: AssociationShape,
        /// Declared element class.
        target: ClassId,
    },
}

/// Resolved metadata for one property.
#[derive(Clone, Debug)]
pub struct ModelProperty {
    /// Stable id.
    pub id: PropertyId,
    /// Declared name.
    pub name: Arc<str>,
    /// The class that declares the property.
    pub declaring_class: ClassId,
    /// What the property stores.
    pub kind: PropertyKind,
    /// The opposite association, for bidirectional associations.
    pub opposite: Option<PropertyId>,
    /// The inherited association this property narrows.
    pub covariant_of: Option<PropertyId>,
    /// The property whose endpoint actually stores the data. Equal to `id`
    /// except for covariant properties.
    pub storage: PropertyId,
}

impl ModelProperty {
    /// Returns true for scalar and embedded properties.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(self.kind, PropertyKind::Scalar(_) | PropertyKind::Embedded(_))
    }

    /// Returns the association shape and target, if this is an association.
    #[must_use]
    pub fn association(&self) -> Option<(&AssociationShape, ClassId)> {
        match &self.kind {
            PropertyKind::Association { shape, target } => Some((shape, *target)),
            _ => None,
        }
    }
}

/// Resolved metadata for one class.
#[derive(Clone, Debug)]
pub struct ModelClass {
    /// Stable id.
    pub id: ClassId,
    /// Declared name.
    pub name: Arc<str>,
    /// Superclass, if any.
    pub superclass: Option<ClassId>,
    /// Whether instances may be embedded.
    pub embeddable: bool,
    /// Every property of the class, inherited ones first, in declaration order.
    pub properties: Vec<PropertyId>,
}

/// Immutable metadata for a set of classes.
#[derive(Clone, Debug)]
pub struct Schema {
    classes: Vec<ModelClass>,
    properties: Vec<ModelProperty>,
    class_names: HashMap<Arc<str>, ClassId>,
}

impl Schema {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Returns the class metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the id does not belong to this schema.
    pub fn class(&self, id: ClassId) -> Result<&ModelClass> {
        self.classes
            .get(id.index())
            .ok_or_else(|| Error::invalid_argument(format!("unknown class {id:?}")))
    }

    /// Returns the property metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the id does not belong to this schema.
    pub fn property(&self, id: PropertyId) -> Result<&ModelProperty> {
        self.properties
            .get(id.index())
            .ok_or_else(|| Error::invalid_argument(format!("unknown property {id:?}")))
    }

    /// Looks up a class by name.
    ///
    /// # Errors
    ///
    /// Returns an error if no class has that name.
    pub fn class_id(&self, name: &str) -> Result<ClassId> {
        self.class_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::invalid_argument(format!("unknown class {name}")))
    }

    /// Looks up a property of a class (including inherited ones) by name.
    ///
    /// A covariant property shadows the inherited property of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the class has no such property.
    pub fn property_id(&self, class: ClassId, name: &str) -> Result<PropertyId> {
        let model_class = self.class(class)?;
        model_class
            .properties
            .iter()
            .rev()
            .copied()
            .find(|id| &*self.properties[id.index()].name == name)
            .ok_or_else(|| {
                Error::invalid_argument(format!("unknown property {}.{name}", model_class.name))
            })
    }

    /// Returns true if `class` is `ancestor` or one of its subclasses.
    #[must_use]
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.classes.get(id.index()).and_then(|c| c.superclass);
        }
        false
    }

    /// Returns true if instances of `class` have `property`.
    #[must_use]
    pub fn has_property(&self, class: ClassId, property: PropertyId) -> bool {
        self.classes
            .get(class.index())
            .is_some_and(|c| c.properties.contains(&property))
    }

    /// `Class.property`, for diagnostics.
    #[must_use]
    pub fn qualified_name(&self, property: PropertyId) -> String {
        match self.properties.get(property.index()) {
            Some(p) => format!("{}.{}", self.classes[p.declaring_class.index()].name, p.name),
            None => format!("{property:?}"),
        }
    }

    /// Iterates over all classes.
    pub fn classes(&self) -> impl Iterator<Item = &ModelClass> {
        self.classes.iter()
    }

    /// Iterates over all properties.
    pub fn properties(&self) -> impl Iterator<Item = &ModelProperty> {
        self.properties.iter()
    }
}

/// Collects class declarations and builds a [`Schema`].
#[derive(Clone, Debug, Default)]
pub struct SchemaBuilder {
    classes: Vec<ClassSchema>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class declaration.
    #[must_use]
    pub fn with_class(mut self, class: ClassSchema) -> Self {
        self.classes.push(class);
        self
    }

    /// Resolves and checks all declarations.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProgram` for duplicate or unknown classes and
    /// properties, inheritance cycles, embedded properties whose class is
    /// not embeddable, orderings that do not end in a scalar, covariant
    /// properties that do not narrow an inherited association, and opposite
    /// declarations that are missing, one-sided, or of incompatible shapes.
    pub fn build(self) -> Result<Schema> {
        let mut class_names: HashMap<Arc<str>, ClassId> = HashMap::new();
        for (index, decl) in self.classes.iter().enumerate() {
            let id = ClassId(u32::try_from(index).map_err(|_| {
                Error::invalid_program(&*decl.name, "too many classes")
            })?);
            if class_names.insert(Arc::clone(&decl.name), id).is_some() {
                return Err(Error::invalid_program(&*decl.name, "class declared twice"));
            }
        }

        let mut superclasses = Vec::with_capacity(self.classes.len());
        for decl in &self.classes {
            let superclass = match &decl.superclass {
                Some(name) => Some(class_names.get(name).copied().ok_or_else(|| {
                    Error::invalid_program(&*decl.name, format!("unknown superclass {name}"))
                })?),
                None => None,
            };
            superclasses.push(superclass);
        }

        let order = inheritance_order(&self.classes, &superclasses)?;

        let mut schema = Schema {
            classes: self
                .classes
                .iter()
                .enumerate()
                .map(|(index, decl)| ModelClass {
                    id: ClassId(u32::try_from(index).unwrap_or(u32::MAX)),
                    name: Arc::clone(&decl.name),
                    superclass: superclasses[index],
                    embeddable: decl.embeddable,
                    properties: Vec::new(),
                })
                .collect(),
            properties: Vec::new(),
            class_names,
        };

        // Pass 1: allocate ids and resolve kinds without orderings.
        let mut pending: Vec<(PropertyId, PropertyDecl)> = Vec::new();
        for class_index in order {
            let decl = &self.classes[class_index];
            let class_id = schema.classes[class_index].id;
            let mut properties = match superclasses[class_index] {
                Some(parent) => schema.classes[parent.index()].properties.clone(),
                None => Vec::new(),
            };
            let inherited = properties.len();

            for property in &decl.properties {
                let clashes = properties
                    .iter()
                    .enumerate()
                    .any(|(i, id)| schema.properties[id.index()].name == property.name && {
                        i >= inherited || property.covariant_of.as_deref() != Some(&*property.name)
                    });
                if clashes {
                    return Err(Error::invalid_program(
                        &*decl.name,
                        format!("property {} declared twice", property.name),
                    ));
                }

                let id = PropertyId(u32::try_from(schema.properties.len()).map_err(|_| {
                    Error::invalid_program(&*decl.name, "too many properties")
                })?);
                let kind = schema.resolve_kind(&decl.name, property)?;
                schema.properties.push(ModelProperty {
                    id,
                    name: Arc::clone(&property.name),
                    declaring_class: class_id,
                    kind,
                    opposite: None,
                    covariant_of: None,
                    storage: id,
                });
                properties.push(id);
                pending.push((id, property.clone()));
            }
            schema.classes[class_index].properties = properties;
        }

        // Pass 2: orderings and covariance, in inheritance order.
        for (id, decl) in &pending {
            schema.resolve_ordering(*id, decl)?;
            schema.resolve_covariance(*id, decl)?;
        }

        // Pass 3: opposites.
        let declared: HashMap<PropertyId, Option<Arc<str>>> = pending
            .iter()
            .map(|(id, decl)| (*id, decl.opposite.clone()))
            .collect();
        for (id, decl) in &pending {
            schema.resolve_opposite(*id, decl, &declared)?;
        }

        Ok(schema)
    }
}

impl Schema {
    fn class_name(&self, id: ClassId) -> Arc<str> {
        Arc::clone(&self.classes[id.index()].name)
    }

    fn lookup_class(&self, owner: &str, name: &str) -> Result<ClassId> {
        self.class_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::invalid_program(owner, format!("unknown class {name}")))
    }

    fn resolve_kind(&self, owner: &str, decl: &PropertyDecl) -> Result<PropertyKind> {
        let association = |shape: AssociationShape, target: &str| -> Result<PropertyKind> {
            Ok(PropertyKind::Association {
                shape,
                target: self.lookup_class(owner, target)?,
            })
        };
        match &decl.kind {
            PropertyKindDecl::Scalar(ty) => Ok(PropertyKind::Scalar(ty.clone())),
            PropertyKindDecl::Embedded(class) => {
                let id = self.lookup_class(owner, class)?;
                if !self.classes[id.index()].embeddable {
                    return Err(Error::invalid_program(
                        owner,
                        format!("{} embeds {class}, which is not embeddable", decl.name),
                    ));
                }
                Ok(PropertyKind::Embedded(id))
            }
            PropertyKindDecl::Reference(target) => association(AssociationShape::Reference, target),
            PropertyKindDecl::IndexedReference(target) => {
                association(AssociationShape::IndexedReference, target)
            }
            PropertyKindDecl::KeyedReference(target, key) => {
                association(AssociationShape::KeyedReference { key: key.clone() }, target)
            }
            PropertyKindDecl::List(target) => association(AssociationShape::List, target),
            PropertyKindDecl::Set(target, equality) => association(
                AssociationShape::Set {
                    equality: equality.as_ref().map(|_| ElementOrdering::default()),
                },
                target,
            ),
            PropertyKindDecl::NavigableSet(target, _) => association(
                AssociationShape::NavigableSet {
                    ordering: ElementOrdering::default(),
                },
                target,
            ),
            PropertyKindDecl::Map(key, target) => association(
                AssociationShape::Map {
                    key: key.clone(),
                    sorted: false,
                },
                target,
            ),
            PropertyKindDecl::NavigableMap(key, target) => association(
                AssociationShape::Map {
                    key: key.clone(),
                    sorted: true,
                },
                target,
            ),
        }
    }

    fn resolve_ordering(&mut self, id: PropertyId, decl: &PropertyDecl) -> Result<()> {
        let order: &OrderBy = match &decl.kind {
            PropertyKindDecl::Set(_, Some(order)) | PropertyKindDecl::NavigableSet(_, order) => {
                order
            }
            _ => return Ok(()),
        };
        let property = &self.properties[id.index()];
        let owner = self.class_name(property.declaring_class);
        let Some((_, target)) = property.association() else {
            return Ok(());
        };
        if order.parts.is_empty() {
            return Err(Error::invalid_program(
                &*owner,
                format!("{} needs at least one ordering property", decl.name),
            ));
        }

        let mut parts = Vec::with_capacity(order.parts.len());
        for part in &order.parts {
            let mut class = target;
            let mut path = Vec::with_capacity(part.path.len());
            for (depth, segment) in part.path.iter().enumerate() {
                let segment_id = self.property_id(class, segment).map_err(|_| {
                    Error::invalid_program(
                        &*owner,
                        format!("ordering of {} names unknown property {segment}", decl.name),
                    )
                })?;
                let last = depth + 1 == part.path.len();
                match (&self.properties[segment_id.index()].kind, last) {
                    (PropertyKind::Scalar(_), true) => {}
                    (PropertyKind::Embedded(inner), false) => class = *inner,
                    _ => {
                        return Err(Error::invalid_program(
                            &*owner,
                            format!(
                                "ordering path of {} must run through embedded properties",
                                decl.name
                            ),
                        ));
                    }
                }
                path.push(segment_id);
            }
            if path.is_empty() {
                return Err(Error::invalid_program(
                    &*owner,
                    format!("ordering of {} has an empty path", decl.name),
                ));
            }
            parts.push(KeyPath {
                path,
                descending: part.descending,
            });
        }

        let resolved = ElementOrdering { parts };
        if let PropertyKind::Association { shape, .. } = &mut self.properties[id.index()].kind {
            match shape {
                AssociationShape::Set { equality } => *equality = Some(resolved),
                AssociationShape::NavigableSet { ordering } => *ordering = resolved,
                _ => {}
            }
        }
        Ok(())
    }

    fn resolve_covariance(&mut self, id: PropertyId, decl: &PropertyDecl) -> Result<()> {
        let Some(base_name) = &decl.covariant_of else {
            return Ok(());
        };
        let property = &self.properties[id.index()];
        let owner = self.class_name(property.declaring_class);
        let invalid = |message: String| Error::invalid_program(&*owner, message);

        if decl.opposite.is_some() {
            return Err(invalid(format!(
                "covariant property {} inherits its opposite and cannot declare one",
                decl.name
            )));
        }
        let Some((shape, target)) = property.association() else {
            return Err(invalid(format!("covariant property {} must be an association", decl.name)));
        };
        let superclass = self.classes[property.declaring_class.index()]
            .superclass
            .ok_or_else(|| {
                invalid(format!(
                    "{} narrows {base_name} but the class has no superclass",
                    decl.name
                ))
            })?;
        let base_id = self
            .property_id(superclass, base_name)
            .map_err(|_| invalid(format!("{} narrows unknown property {base_name}", decl.name)))?;
        let base = &self.properties[base_id.index()];
        let Some((base_shape, base_target)) = base.association() else {
            return Err(invalid(format!(
                "{} narrows {base_name}, which is not an association",
                decl.name
            )));
        };
        if !shape.same_family(base_shape) {
            return Err(invalid(format!(
                "{} is a {} but {base_name} is a {}",
                decl.name,
                shape.name(),
                base_shape.name()
            )));
        }
        if !self.is_subclass(target, base_target) {
            return Err(invalid(format!(
                "{} must narrow the target of {base_name} to a subclass",
                decl.name
            )));
        }

        let storage = base.storage;
        let property = &mut self.properties[id.index()];
        property.covariant_of = Some(base_id);
        property.storage = storage;
        Ok(())
    }

    fn resolve_opposite(
        &mut self,
        id: PropertyId,
        decl: &PropertyDecl,
        declared: &HashMap<PropertyId, Option<Arc<str>>>,
    ) -> Result<()> {
        let property = &self.properties[id.index()];
        if property.covariant_of.is_some() {
            let storage = property.storage;
            let opposite = self.properties[storage.index()].opposite;
            self.properties[id.index()].opposite = opposite;
            return Ok(());
        }
        let owner = self.class_name(property.declaring_class);
        let Some((shape, target)) = property.association() else {
            return Ok(());
        };
        let shape = shape.clone();

        let Some(opposite_name) = &decl.opposite else {
            if matches!(
                shape,
                AssociationShape::IndexedReference | AssociationShape::KeyedReference { .. }
            ) {
                return Err(Error::invalid_program(
                    &*owner,
                    format!("{} is a {} and needs an opposite", decl.name, shape.name()),
                ));
            }
            return Ok(());
        };

        let opposite_id = self.property_id(target, opposite_name).map_err(|_| {
            Error::invalid_program(
                &*owner,
                format!("opposite {opposite_name} of {} does not exist", decl.name),
            )
        })?;
        let opposite = &self.properties[opposite_id.index()];
        let Some((opposite_shape, opposite_target)) = opposite.association() else {
            return Err(Error::invalid_program(
                &*owner,
                format!("opposite {opposite_name} of {} is not an association", decl.name),
            ));
        };
        if opposite.covariant_of.is_some() {
            return Err(Error::invalid_program(
                &*owner,
                format!("opposite {opposite_name} of {} is covariant", decl.name),
            ));
        }
        if !self.is_subclass(property.declaring_class, opposite_target) {
            return Err(Error::invalid_program(
                &*owner,
                format!("opposite {opposite_name} of {} targets another class", decl.name),
            ));
        }
        if declared.get(&opposite_id).and_then(Option::as_deref) != Some(&*decl.name) {
            return Err(Error::invalid_program(
                &*owner,
                format!("opposite {opposite_name} of {} does not point back", decl.name),
            ));
        }
        if !compatible(&shape, opposite_shape) {
            return Err(Error::invalid_program(
                &*owner,
                format!(
                    "{} ({}) cannot be the opposite of {opposite_name} ({})",
                    decl.name,
                    shape.name(),
                    opposite_shape.name()
                ),
            ));
        }
        use AssociationShape as S;
        if let (S::KeyedReference { key }, S::Map { key: map_key, .. })
        | (S::Map { key: map_key, .. }, S::KeyedReference { key }) = (&shape, opposite_shape)
        {
            if key != map_key {
                return Err(Error::invalid_program(
                    &*owner,
                    format!("{} and {opposite_name} disagree on the key type", decl.name),
                ));
            }
        }

        self.properties[id.index()].opposite = Some(opposite_id);
        Ok(())
    }
}

fn compatible(a: &AssociationShape, b: &AssociationShape) -> bool {
    use AssociationShape as S;
    match (a, b) {
        (S::IndexedReference, other) | (other, S::IndexedReference) => matches!(other, S::List),
        (S::KeyedReference { .. }, other) | (other, S::KeyedReference { .. }) => other.is_map(),
        (S::Map { .. }, S::Map { .. }) => false,
        (S::Map { .. }, other) | (other, S::Map { .. }) => {
            matches!(other, S::Reference | S::Set { .. } | S::NavigableSet { .. })
        }
        _ => true,
    }
}

/// Orders class indices so every superclass precedes its subclasses.
fn inheritance_order(
    classes: &[ClassSchema],
    superclasses: &[Option<ClassId>],
) -> Result<Vec<usize>> {
    let mut order = Vec::with_capacity(classes.len());
    let mut placed = vec![false; classes.len()];
    for start in 0..classes.len() {
        let mut chain = Vec::new();
        let mut current = Some(start);
        while let Some(index) = current {
            if placed[index] {
                break;
            }
            if chain.contains(&index) {
                return Err(Error::invalid_program(
                    &*classes[start].name,
                    "inheritance cycle",
                ));
            }
            chain.push(index);
            current = superclasses[index].map(ClassId::index);
        }
        for index in chain.into_iter().rev() {
            placed[index] = true;
            order.push(index);
        }
    }
    Ok(order)
}
