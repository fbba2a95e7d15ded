//! Integration tests for maps and keyed references
//!
//! Tests that map entries and the keyed references opposite them agree on
//! both target and key.

use tandem_foundation::{ErrorKind, ObjectId, PropertyId, Value};
use tandem_model::Model;

use crate::fixtures::{class, map_schema, model, portfolio_schema, prop};

fn setup() -> (Model, ObjectId, Vec<ObjectId>, PropertyId, PropertyId) {
    let schema = map_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let staff = prop(&schema, "Department", "staff");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let people = (0..3).map(|_| model.create(employee).unwrap()).collect();
    (model, d, people, staff, works_in)
}

fn badge(n: u32) -> Value {
    Value::from(format!("E-{n}"))
}

// =============================================================================
// Map Side
// =============================================================================

#[test]
fn put_links_keyed_reference() {
    let (mut model, d, people, staff, works_in) = setup();

    assert_eq!(model.put(d, staff, badge(1), people[0]).unwrap(), None);

    assert_eq!(model.get(d, staff, &badge(1)).unwrap(), Some(people[0]));
    assert_eq!(model.reference(people[0], works_in).unwrap(), Some(d));
    assert_eq!(model.key(people[0], works_in).unwrap(), Some(badge(1)));
}

#[test]
fn put_on_taken_key_evicts_holder() {
    let (mut model, d, people, staff, works_in) = setup();
    model.put(d, staff, badge(1), people[0]).unwrap();

    assert_eq!(model.put(d, staff, badge(1), people[1]).unwrap(), Some(people[0]));

    assert_eq!(model.entries(d, staff).unwrap(), vec![(badge(1), people[1])]);
    assert_eq!(model.reference(people[0], works_in).unwrap(), None);
    assert_eq!(model.key(people[0], works_in).unwrap(), None);
    assert_eq!(model.key(people[1], works_in).unwrap(), Some(badge(1)));
}

#[test]
fn put_existing_element_under_new_key_moves_it() {
    let (mut model, d, people, staff, works_in) = setup();
    model.put(d, staff, badge(1), people[0]).unwrap();

    model.put(d, staff, badge(9), people[0]).unwrap();

    assert_eq!(model.keys(d, staff).unwrap(), vec![badge(9)]);
    assert_eq!(model.key(people[0], works_in).unwrap(), Some(badge(9)));
}

#[test]
fn put_rejects_wrong_key_type() {
    let (mut model, d, people, staff, _) = setup();

    let err = model.put(d, staff, Value::Int(1), people[0]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));

    let err = model.put(d, staff, Value::Nil, people[0]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
    assert!(model.entries(d, staff).unwrap().is_empty());
}

#[test]
fn remove_key_detaches() {
    let (mut model, d, people, staff, works_in) = setup();
    model.put(d, staff, badge(1), people[0]).unwrap();
    model.put(d, staff, badge(2), people[1]).unwrap();

    assert_eq!(model.remove_key(d, staff, &badge(1)).unwrap(), Some(people[0]));
    assert_eq!(model.remove_key(d, staff, &badge(1)).unwrap(), None);

    assert_eq!(model.reference(people[0], works_in).unwrap(), None);
    assert_eq!(model.entries(d, staff).unwrap(), vec![(badge(2), people[1])]);
}

#[test]
fn remove_value_returns_key() {
    let (mut model, d, people, staff, works_in) = setup();
    model.put(d, staff, badge(1), people[0]).unwrap();

    assert_eq!(model.remove_value(d, staff, people[0]).unwrap(), Some(badge(1)));
    assert!(!model.remove(d, staff, people[0]).unwrap());
    assert_eq!(model.reference(people[0], works_in).unwrap(), None);
}

#[test]
fn put_all_and_clear() {
    let (mut model, d, people, staff, works_in) = setup();
    let entries: Vec<(Value, ObjectId)> =
        people.iter().zip(0..).map(|(e, n)| (badge(n), *e)).collect();

    model.put_all(d, staff, &entries).unwrap();
    assert_eq!(model.len(d, staff).unwrap(), 3);
    assert_eq!(model.elements(d, staff).unwrap(), people);

    model.clear(d, staff).unwrap();
    assert!(model.entries(d, staff).unwrap().is_empty());
    for e in people {
        assert_eq!(model.reference(e, works_in).unwrap(), None);
    }
}

#[test]
fn adding_through_map_without_key_is_not_possible() {
    let (mut model, d, people, staff, _) = setup();

    let err = model.add(d, staff, people[0]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
}

// =============================================================================
// Keyed Reference Side
// =============================================================================

#[test]
fn set_keyed_puts_into_map() {
    let (mut model, d, people, staff, works_in) = setup();

    model.set_keyed(people[0], works_in, Some(d), Some(badge(1))).unwrap();

    assert_eq!(model.get(d, staff, &badge(1)).unwrap(), Some(people[0]));
}

#[test]
fn set_keyed_requires_key_to_attach() {
    let (mut model, d, people, staff, works_in) = setup();

    let err = model.set_keyed(people[0], works_in, Some(d), None).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
    let err = model.set_reference(people[0], works_in, Some(d)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
    assert!(model.entries(d, staff).unwrap().is_empty());
}

#[test]
fn remembered_key_is_used_by_set_reference() {
    let (mut model, d, people, staff, works_in) = setup();

    model.set_key(people[0], works_in, Some(badge(7))).unwrap();
    assert_eq!(model.key(people[0], works_in).unwrap(), None);
    model.set_reference(people[0], works_in, Some(d)).unwrap();

    assert_eq!(model.get(d, staff, &badge(7)).unwrap(), Some(people[0]));
    assert_eq!(model.key(people[0], works_in).unwrap(), Some(badge(7)));
}

#[test]
fn set_key_rekeys_entry() {
    let (mut model, d, people, staff, works_in) = setup();
    model.set_keyed(people[0], works_in, Some(d), Some(badge(1))).unwrap();

    model.set_key(people[0], works_in, Some(badge(2))).unwrap();

    assert_eq!(model.entries(d, staff).unwrap(), vec![(badge(2), people[0])]);
    assert_eq!(model.key(people[0], works_in).unwrap(), Some(badge(2)));
}

#[test]
fn set_key_none_detaches() {
    let (mut model, d, people, staff, works_in) = setup();
    model.set_keyed(people[0], works_in, Some(d), Some(badge(1))).unwrap();

    model.set_key(people[0], works_in, None).unwrap();

    assert!(model.entries(d, staff).unwrap().is_empty());
    assert_eq!(model.reference(people[0], works_in).unwrap(), None);
}

#[test]
fn keyed_reference_seizes_taken_key() {
    let (mut model, d, people, staff, works_in) = setup();
    model.set_keyed(people[0], works_in, Some(d), Some(badge(1))).unwrap();

    model.set_keyed(people[1], works_in, Some(d), Some(badge(1))).unwrap();

    assert_eq!(model.entries(d, staff).unwrap(), vec![(badge(1), people[1])]);
    assert_eq!(model.reference(people[0], works_in).unwrap(), None);
}

#[test]
fn keyed_reference_moves_between_maps() {
    let (mut model, d, people, staff, works_in) = setup();
    let other = model.create(model.class_of(d).unwrap()).unwrap();
    model.set_keyed(people[0], works_in, Some(d), Some(badge(1))).unwrap();

    model.set_reference(people[0], works_in, Some(other)).unwrap();

    assert!(model.entries(d, staff).unwrap().is_empty());
    assert_eq!(model.entries(other, staff).unwrap(), vec![(badge(1), people[0])]);
}

// =============================================================================
// Map Opposite a Set
// =============================================================================

fn portfolio() -> (Model, Vec<ObjectId>, Vec<ObjectId>, PropertyId, PropertyId) {
    let schema = portfolio_schema();
    let company = class(&schema, "Company");
    let investor = class(&schema, "Investor");
    let investors = prop(&schema, "Company", "investors");
    let companies = prop(&schema, "Investor", "companies");
    let mut model = model(schema);

    let firms = (0..2).map(|_| model.create(company).unwrap()).collect();
    let backers = (0..2).map(|_| model.create(investor).unwrap()).collect();
    (model, firms, backers, investors, companies)
}

#[test]
fn set_side_cannot_attach_to_a_map() {
    let (mut model, firms, backers, investors, companies) = portfolio();

    let err = model.add(backers[0], companies, firms[0]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Unsupported(_)));
    let err = model.add_all(backers[0], companies, &firms).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Unsupported(_)));

    assert!(model.elements(backers[0], companies).unwrap().is_empty());
    assert!(model.entries(firms[0], investors).unwrap().is_empty());
    assert!(model.entries(firms[1], investors).unwrap().is_empty());
}

#[test]
fn map_put_fills_the_set_side() {
    let (mut model, firms, backers, investors, companies) = portfolio();

    model.put(firms[0], investors, Value::from("a"), backers[0]).unwrap();
    model.put(firms[1], investors, Value::from("a"), backers[0]).unwrap();
    model.put(firms[0], investors, Value::from("b"), backers[1]).unwrap();

    assert_eq!(model.elements(backers[0], companies).unwrap(), vec![firms[0], firms[1]]);
    assert_eq!(model.elements(backers[1], companies).unwrap(), vec![firms[0]]);
}

#[test]
fn set_side_remove_clears_the_map_entry() {
    let (mut model, firms, backers, investors, companies) = portfolio();
    model.put(firms[0], investors, Value::from("a"), backers[0]).unwrap();
    model.put(firms[0], investors, Value::from("b"), backers[1]).unwrap();

    assert!(model.remove(backers[0], companies, firms[0]).unwrap());
    assert!(model.elements(backers[0], companies).unwrap().is_empty());
    assert_eq!(model.entries(firms[0], investors).unwrap(), vec![(Value::from("b"), backers[1])]);
    assert!(!model.remove(backers[0], companies, firms[0]).unwrap());
}

#[test]
fn taken_key_drops_the_displaced_investor() {
    let (mut model, firms, backers, investors, companies) = portfolio();
    model.put(firms[0], investors, Value::from("a"), backers[0]).unwrap();

    model.put(firms[0], investors, Value::from("a"), backers[1]).unwrap();
    assert_eq!(model.entries(firms[0], investors).unwrap(), vec![(Value::from("a"), backers[1])]);
    assert!(model.elements(backers[0], companies).unwrap().is_empty());
    assert_eq!(model.elements(backers[1], companies).unwrap(), vec![firms[0]]);
}
