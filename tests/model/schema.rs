//! Integration tests for schema building
//!
//! Tests resolution of classes and properties and rejection of malformed
//! declarations.

use tandem_foundation::{ErrorKind, Type};
use tandem_model::{AssociationShape, ClassSchema, OrderBy, PropertyDecl, PropertyKind, Schema};

use crate::fixtures::{class, list_schema, prop};

fn rejects(builder: tandem_model::SchemaBuilder, fragment: &str) {
    let err = builder.build().unwrap_err();
    match err.kind {
        ErrorKind::InvalidProgram { message, .. } => {
            assert!(message.contains(fragment), "unexpected message: {message}");
        }
        other => panic!("expected an invalid program, got {other:?}"),
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn opposites_resolve_both_ways() {
    let schema = list_schema();
    let employees = prop(&schema, "Department", "employees");
    let department = prop(&schema, "Employee", "department");

    assert_eq!(schema.property(employees).unwrap().opposite, Some(department));
    assert_eq!(schema.property(department).unwrap().opposite, Some(employees));
    assert_eq!(schema.qualified_name(employees), "Department.employees");
}

#[test]
fn association_kinds_resolve() {
    let schema = list_schema();
    let employee = class(&schema, "Employee");
    let employees = schema.property(prop(&schema, "Department", "employees")).unwrap();
    let department = schema.property(prop(&schema, "Employee", "department")).unwrap();

    assert_eq!(
        employees.kind,
        PropertyKind::Association {
            shape: AssociationShape::List,
            target: employee,
        }
    );
    assert!(matches!(
        department.association(),
        Some((AssociationShape::IndexedReference, _))
    ));
    assert!(schema.property(prop(&schema, "Employee", "name")).unwrap().is_scalar());
}

#[test]
fn subclasses_inherit_properties() {
    let schema = Schema::builder()
        .with_class(
            ClassSchema::new("Person").with_property(PropertyDecl::scalar("name", Type::String)),
        )
        .with_class(
            ClassSchema::new("Manager")
                .extends("Person")
                .with_property(PropertyDecl::scalar("level", Type::Int)),
        )
        .build()
        .unwrap();
    let person = class(&schema, "Person");
    let manager = class(&schema, "Manager");

    assert!(schema.is_subclass(manager, person));
    assert!(!schema.is_subclass(person, manager));
    assert_eq!(
        schema.property_id(manager, "name").unwrap(),
        schema.property_id(person, "name").unwrap()
    );
    assert_eq!(schema.class(manager).unwrap().properties.len(), 2);
    assert!(schema.property_id(person, "level").is_err());
}

#[test]
fn orderings_resolve_through_embedded_properties() {
    let schema = crate::fixtures::address_schema();
    let people = schema.property(prop(&schema, "Registry", "people")).unwrap();
    let ordering = people.association().and_then(|(shape, _)| shape.ordering()).unwrap();

    assert_eq!(ordering.parts.len(), 2);
    assert_eq!(
        ordering.parts[0].path,
        vec![prop(&schema, "Person", "address"), prop(&schema, "Address", "city")]
    );
    assert_eq!(
        ordering.frozen_properties(),
        vec![prop(&schema, "Person", "address"), prop(&schema, "Person", "name")]
    );
}

#[test]
fn covariant_property_shares_storage() {
    let schema = Schema::builder()
        .with_class(ClassSchema::new("Employee").with_property(
            PropertyDecl::reference("department", "Department").with_opposite("employees"),
        ))
        .with_class(ClassSchema::new("Manager").extends("Employee"))
        .with_class(
            ClassSchema::new("Department").with_property(
                PropertyDecl::set("employees", "Employee").with_opposite("department"),
            ),
        )
        .with_class(
            ClassSchema::new("Board")
                .extends("Department")
                .with_property(PropertyDecl::set("employees", "Manager").covariant("employees")),
        )
        .build()
        .unwrap();

    let base = prop(&schema, "Department", "employees");
    let narrowed = prop(&schema, "Board", "employees");
    assert_ne!(base, narrowed);

    let property = schema.property(narrowed).unwrap();
    assert_eq!(property.storage, base);
    assert_eq!(property.covariant_of, Some(base));
    assert_eq!(property.opposite, Some(prop(&schema, "Employee", "department")));
}

// =============================================================================
// Rejection
// =============================================================================

#[test]
fn rejects_duplicate_class() {
    rejects(
        Schema::builder()
            .with_class(ClassSchema::new("A"))
            .with_class(ClassSchema::new("A")),
        "declared twice",
    );
}

#[test]
fn rejects_duplicate_property() {
    rejects(
        Schema::builder().with_class(
            ClassSchema::new("A")
                .with_property(PropertyDecl::scalar("x", Type::Int))
                .with_property(PropertyDecl::scalar("x", Type::String)),
        ),
        "declared twice",
    );
}

#[test]
fn rejects_inheritance_cycle() {
    rejects(
        Schema::builder()
            .with_class(ClassSchema::new("A").extends("B"))
            .with_class(ClassSchema::new("B").extends("A")),
        "inheritance cycle",
    );
}

#[test]
fn rejects_unknown_target() {
    rejects(
        Schema::builder().with_class(
            ClassSchema::new("A").with_property(PropertyDecl::reference("b", "Nowhere")),
        ),
        "unknown class Nowhere",
    );
}

#[test]
fn rejects_one_sided_opposite() {
    rejects(
        Schema::builder()
            .with_class(
                ClassSchema::new("A").with_property(
                    PropertyDecl::reference("b", "B").with_opposite("a"),
                ),
            )
            .with_class(ClassSchema::new("B").with_property(PropertyDecl::set("a", "A"))),
        "does not point back",
    );
}

#[test]
fn rejects_missing_opposite() {
    rejects(
        Schema::builder()
            .with_class(
                ClassSchema::new("A").with_property(
                    PropertyDecl::reference("b", "B").with_opposite("missing"),
                ),
            )
            .with_class(ClassSchema::new("B")),
        "does not exist",
    );
}

#[test]
fn rejects_indexed_reference_without_list() {
    rejects(
        Schema::builder()
            .with_class(
                ClassSchema::new("A").with_property(
                    PropertyDecl::indexed_reference("b", "B").with_opposite("a"),
                ),
            )
            .with_class(
                ClassSchema::new("B").with_property(PropertyDecl::set("a", "A").with_opposite("b")),
            ),
        "cannot be the opposite",
    );
}

#[test]
fn rejects_indexed_reference_without_opposite() {
    rejects(
        Schema::builder()
            .with_class(
                ClassSchema::new("A").with_property(PropertyDecl::indexed_reference("b", "B")),
            )
            .with_class(ClassSchema::new("B")),
        "needs an opposite",
    );
}

#[test]
fn rejects_disagreeing_key_types() {
    rejects(
        Schema::builder()
            .with_class(
                ClassSchema::new("A")
                    .with_property(
                        PropertyDecl::keyed_reference("b", "B", Type::Int).with_opposite("a"),
                    ),
            )
            .with_class(
                ClassSchema::new("B").with_property(
                    PropertyDecl::map("a", Type::String, "A").with_opposite("b"),
                ),
            ),
        "disagree on the key type",
    );
}

#[test]
fn rejects_embedding_non_embeddable_class() {
    rejects(
        Schema::builder()
            .with_class(ClassSchema::new("Address"))
            .with_class(
                ClassSchema::new("Person").with_property(
                    PropertyDecl::embedded("address", "Address"),
                ),
            ),
        "not embeddable",
    );
}

#[test]
fn rejects_ordering_on_unknown_property() {
    rejects(
        Schema::builder()
            .with_class(
                ClassSchema::new("A").with_property(
                    PropertyDecl::navigable_set("bs", "B", OrderBy::by("rank")),
                ),
            )
            .with_class(ClassSchema::new("B")),
        "unknown property rank",
    );
}

#[test]
fn rejects_ordering_that_stops_short_of_a_scalar() {
    rejects(
        Schema::builder()
            .with_class(
                ClassSchema::new("A").with_property(
                    PropertyDecl::navigable_set("bs", "B", OrderBy::by("friend")),
                ),
            )
            .with_class(
                ClassSchema::new("B").with_property(PropertyDecl::reference("friend", "B")),
            ),
        "must run through embedded properties",
    );
}

#[test]
fn rejects_covariant_property_that_widens() {
    rejects(
        Schema::builder()
            .with_class(ClassSchema::new("Animal"))
            .with_class(ClassSchema::new("Dog").extends("Animal"))
            .with_class(ClassSchema::new("Kennel").with_property(PropertyDecl::set("pets", "Dog")))
            .with_class(
                ClassSchema::new("Zoo")
                    .extends("Kennel")
                    .with_property(PropertyDecl::set("pets", "Animal").covariant("pets")),
            ),
        "must narrow",
    );
}

#[test]
fn rejects_covariant_property_of_another_shape() {
    rejects(
        Schema::builder()
            .with_class(ClassSchema::new("Dog"))
            .with_class(ClassSchema::new("Kennel").with_property(PropertyDecl::set("pets", "Dog")))
            .with_class(
                ClassSchema::new("Zoo")
                    .extends("Kennel")
                    .with_property(PropertyDecl::list("pets", "Dog").covariant("pets")),
            ),
        "is a list but pets is a set",
    );
}
