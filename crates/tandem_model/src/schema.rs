//! Declarative class and property definitions.
//!
//! Declarations name classes and properties by string. They are resolved
//! and checked once by [`SchemaBuilder::build`](crate::SchemaBuilder::build),
//! which produces the immutable [`Schema`](crate::Schema) metadata.

use std::sync::Arc;

use tandem_foundation::Type;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One component of an element ordering: a property path plus a direction.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SortPart {
    /// Property names from the element down to a scalar.
    pub path: Vec<Arc<str>>,
    /// Whether this component sorts in descending order.
    pub descending: bool,
}

/// Ordering or equality definition for set and navigable-set members.
///
/// Each part reads a scalar from the element (possibly through embedded
/// objects). Containers using an ordering freeze their members on the first
/// property of every path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderBy {
    /// Ordering components, most significant first.
    pub parts: Vec<SortPart>,
}

impl OrderBy {
    /// Orders by a single property, ascending.
    #[must_use]
    pub fn by(property: &str) -> Self {
        Self::default().then(property)
    }

    /// Orders by a property path, ascending.
    #[must_use]
    pub fn by_path(path: &[&str]) -> Self {
        Self::default().then_path(path, false)
    }

    /// Adds an ascending component.
    #[must_use]
    pub fn then(self, property: &str) -> Self {
        self.then_path(&[property], false)
    }

    /// Adds a descending component.
    #[must_use]
    pub fn then_desc(self, property: &str) -> Self {
        self.then_path(&[property], true)
    }

    /// Adds a component for a property path.
    #[must_use]
    pub fn then_path(mut self, path: &[&str], descending: bool) -> Self {
        self.parts.push(SortPart {
            path: path.iter().map(|p| Arc::from(*p)).collect(),
            descending,
        });
        self
    }
}

/// What a property stores, with class names still unresolved.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PropertyKindDecl {
    /// A plain scalar value.
    Scalar(Type),
    /// A value object of an embeddable class, owned by the declaring instance.
    Embedded(Arc<str>),
    /// A single-valued association.
    Reference(Arc<str>),
    /// A single-valued association that also knows its position in the
    /// opposite list.
    IndexedReference(Arc<str>),
    /// A single-valued association that also knows its key in the
    /// opposite map.
    KeyedReference(Arc<str>, Type),
    /// An ordered collection without duplicates.
    List(Arc<str>),
    /// An insertion-ordered set, optionally with field-based equality.
    Set(Arc<str>, Option<OrderBy>),
    /// A set sorted by element fields.
    NavigableSet(Arc<str>, OrderBy),
    /// An insertion-ordered map from scalar keys to elements.
    Map(Type, Arc<str>),
    /// A key-sorted map from scalar keys to elements.
    NavigableMap(Type, Arc<str>),
}

/// Declaration of a single property.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PropertyDecl {
    /// Property name, unique within its class hierarchy unless covariant.
    pub name: Arc<str>,
    /// What the property stores.
    pub kind: PropertyKindDecl,
    /// Name of the opposite property on the target class.
    pub opposite: Option<Arc<str>>,
    /// Name of the inherited association this property narrows.
    pub covariant_of: Option<Arc<str>>,
}

impl PropertyDecl {
    fn new(name: &str, kind: PropertyKindDecl) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            opposite: None,
            covariant_of: None,
        }
    }

    /// Declares a scalar property.
    #[must_use]
    pub fn scalar(name: &str, ty: Type) -> Self {
        Self::new(name, PropertyKindDecl::Scalar(ty))
    }

    /// Declares an embedded value-object property.
    #[must_use]
    pub fn embedded(name: &str, class: &str) -> Self {
        Self::new(name, PropertyKindDecl::Embedded(Arc::from(class)))
    }

    /// Declares a reference.
    #[must_use]
    pub fn reference(name: &str, target: &str) -> Self {
        Self::new(name, PropertyKindDecl::Reference(Arc::from(target)))
    }

    /// Declares an indexed reference (the opposite must be a list).
    #[must_use]
    pub fn indexed_reference(name: &str, target: &str) -> Self {
        Self::new(name, PropertyKindDecl::IndexedReference(Arc::from(target)))
    }

    /// Declares a keyed reference (the opposite must be a map).
    #[must_use]
    pub fn keyed_reference(name: &str, target: &str, key: Type) -> Self {
        Self::new(name, PropertyKindDecl::KeyedReference(Arc::from(target), key))
    }

    /// Declares a list.
    #[must_use]
    pub fn list(name: &str, target: &str) -> Self {
        Self::new(name, PropertyKindDecl::List(Arc::from(target)))
    }

    /// Declares an identity set.
    #[must_use]
    pub fn set(name: &str, target: &str) -> Self {
        Self::new(name, PropertyKindDecl::Set(Arc::from(target), None))
    }

    /// Declares a set whose members are equal when the given fields are.
    #[must_use]
    pub fn set_by(name: &str, target: &str, equality: OrderBy) -> Self {
        Self::new(name, PropertyKindDecl::Set(Arc::from(target), Some(equality)))
    }

    /// Declares a navigable (sorted) set.
    #[must_use]
    pub fn navigable_set(name: &str, target: &str, ordering: OrderBy) -> Self {
        Self::new(name, PropertyKindDecl::NavigableSet(Arc::from(target), ordering))
    }

    /// Declares an insertion-ordered map.
    #[must_use]
    pub fn map(name: &str, key: Type, target: &str) -> Self {
        Self::new(name, PropertyKindDecl::Map(key, Arc::from(target)))
    }

    /// Declares a key-sorted map.
    #[must_use]
    pub fn navigable_map(name: &str, key: Type, target: &str) -> Self {
        Self::new(name, PropertyKindDecl::NavigableMap(key, Arc::from(target)))
    }

    /// Names the opposite property on the target class.
    #[must_use]
    pub fn with_opposite(mut self, opposite: &str) -> Self {
        self.opposite = Some(Arc::from(opposite));
        self
    }

    /// Narrows an inherited association of the same kind.
    ///
    /// The property shares storage with the inherited one and inherits its
    /// opposite; its target must be a subclass of the inherited target.
    #[must_use]
    pub fn covariant(mut self, inherited: &str) -> Self {
        self.covariant_of = Some(Arc::from(inherited));
        self
    }

    /// Returns true if this declares an association.
    #[must_use]
    pub fn is_association(&self) -> bool {
        !matches!(
            self.kind,
            PropertyKindDecl::Scalar(_) | PropertyKindDecl::Embedded(_)
        )
    }
}

/// Declaration of a class.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassSchema {
    /// Class name, unique in the schema.
    pub name: Arc<str>,
    /// Name of the superclass, if any.
    pub superclass: Option<Arc<str>>,
    /// Whether instances may be embedded in other instances.
    pub embeddable: bool,
    /// Declared properties, in declaration order.
    pub properties: Vec<PropertyDecl>,
}

impl ClassSchema {
    /// Creates a new class declaration.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            superclass: None,
            embeddable: false,
            properties: Vec::new(),
        }
    }

    /// Creates an embeddable (value-object) class declaration.
    #[must_use]
    pub fn embeddable(name: &str) -> Self {
        Self {
            embeddable: true,
            ..Self::new(name)
        }
    }

    /// Sets the superclass.
    #[must_use]
    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(Arc::from(superclass));
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, property: PropertyDecl) -> Self {
        self.properties.push(property);
        self
    }

    /// Returns the declared property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|p| &*p.name == name)
    }
}
