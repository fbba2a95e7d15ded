//! Listener delivery, vetoes, and validators.

use std::sync::Arc;

use tandem_foundation::{
    EndpointRef, Error, ErrorKind, Modification, ModificationType, PropertyVersion,
};
use tandem_model::{
    ClassSchema, ListenerErrorMode, Model, ModelConfig, ModificationListener, PropertyDecl, Schema,
    Validator,
};

use crate::fixtures::{class, list_schema, model, prop, set_schema, Recorder};

// =============================================================================
// Event delivery
// =============================================================================

#[test]
fn list_insert_event_carries_the_index() {
    let schema = list_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let a = model.create(employee).unwrap();
    let b = model.create(employee).unwrap();
    model.add(d, employees, a).unwrap();

    let on_list = Recorder::new();
    let on_a = Recorder::new();
    model.add_listener(d, employees, on_list.clone()).unwrap();
    model.add_listener(a, works_in, on_a.clone()).unwrap();

    model.insert(d, employees, 0, b).unwrap();

    let before = on_list.before();
    let after = on_list.after();
    assert_eq!(before.len(), 1);
    assert_eq!(after.len(), 1);
    let event = &after[0];
    assert_eq!(event.source(), EndpointRef::new(d, employees));
    assert_eq!(event.modification_type(), ModificationType::Attach);
    assert_eq!(event.object(PropertyVersion::Attach), Some(b));
    assert_eq!(event.index(PropertyVersion::Attach), Some(0));
    assert!(matches!(event.modification(), Modification::Insert { index: 0, .. }));

    // The shifted employee hears about its new position
    let shifted = on_a.after();
    assert_eq!(shifted.len(), 1);
    assert_eq!(shifted[0].modification_type(), ModificationType::Replace);
    assert_eq!(shifted[0].index(PropertyVersion::Detach), Some(0));
    assert_eq!(shifted[0].index(PropertyVersion::Attach), Some(1));
    assert_eq!(shifted[0].object(PropertyVersion::Attach), Some(d));
}

#[test]
fn peer_events_share_the_intent() {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    let on_set = Recorder::new();
    let on_reference = Recorder::new();
    model.add_listener(d, employees, on_set.clone()).unwrap();
    model.add_listener(e, works_in, on_reference.clone()).unwrap();

    model.add(d, employees, e).unwrap();

    let set_events = on_set.after();
    let reference_events = on_reference.after();
    let (set_event, reference_event) = (&set_events[0], &reference_events[0]);
    assert!(Arc::ptr_eq(
        &set_event.shared_modification(),
        &reference_event.shared_modification()
    ));
    assert_eq!(reference_event.object(PropertyVersion::Attach), Some(d));
    assert_eq!(reference_event.object(PropertyVersion::Detach), None);
}

#[test]
fn removed_listener_stops_hearing() {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    let recorder = Recorder::new();
    let listener: Arc<dyn ModificationListener> = recorder.clone();
    model.add_listener(d, employees, Arc::clone(&listener)).unwrap();

    assert!(model.remove_listener(d, employees, &listener).unwrap());
    assert!(!model.remove_listener(d, employees, &listener).unwrap());
    model.add(d, employees, e).unwrap();
    assert!(recorder.after().is_empty());
}

// =============================================================================
// Vetoes and late failures
// =============================================================================

#[test]
fn veto_leaves_both_sides_untouched() {
    let schema = list_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    model.add_listener(d, employees, Recorder::vetoing()).unwrap();

    let err = model.add(d, employees, e).unwrap_err();
    assert!(!err.is_modified());
    assert_eq!(err.event().map(|event| event.source()), Some(EndpointRef::new(d, employees)));
    assert!(matches!(
        &err.kind,
        ErrorKind::Modification { cause, .. } if matches!(cause.kind, ErrorKind::Vetoed(_))
    ));

    assert!(model.elements(d, employees).unwrap().is_empty());
    assert_eq!(model.reference(e, works_in).unwrap(), None);
}

#[test]
fn peer_veto_rolls_back_the_collection() {
    let schema = list_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let kept = model.create(employee).unwrap();
    let e = model.create(employee).unwrap();
    model.add(d, employees, kept).unwrap();
    model.add_listener(e, works_in, Recorder::vetoing()).unwrap();

    let err = model.insert(d, employees, 0, e).unwrap_err();
    assert!(!err.is_modified());
    assert_eq!(model.elements(d, employees).unwrap(), vec![kept]);
    assert_eq!(model.index(kept, works_in).unwrap(), Some(0));
    assert_eq!(model.reference(e, works_in).unwrap(), None);
}

#[test]
fn veto_from_the_old_target_keeps_the_link() {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d1 = model.create(department).unwrap();
    let d2 = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    model.set_reference(e, works_in, Some(d1)).unwrap();
    model.add_listener(d1, employees, Recorder::vetoing()).unwrap();

    assert!(model.set_reference(e, works_in, Some(d2)).is_err());
    assert_eq!(model.reference(e, works_in).unwrap(), Some(d1));
    assert_eq!(model.elements(d1, employees).unwrap(), vec![e]);
    assert!(model.elements(d2, employees).unwrap().is_empty());
}

#[test]
fn veto_from_the_new_target_leaves_both_ends_agreeing() {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d1 = model.create(department).unwrap();
    let d2 = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    model.set_reference(e, works_in, Some(d1)).unwrap();
    model.add_listener(d2, employees, Recorder::vetoing()).unwrap();

    // The old link is already gone when the new target refuses
    assert!(model.set_reference(e, works_in, Some(d2)).is_err());
    assert_eq!(model.reference(e, works_in).unwrap(), None);
    assert!(model.elements(d1, employees).unwrap().is_empty());
    assert!(model.elements(d2, employees).unwrap().is_empty());
}

#[test]
fn late_failure_keeps_the_change() {
    let schema = list_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    model.add_listener(d, employees, Recorder::failing_after()).unwrap();

    let err = model.add(d, employees, e).unwrap_err();
    assert!(err.is_modified());
    assert!(err.to_string().starts_with("modification failed (applied)"));
    assert_eq!(model.elements(d, employees).unwrap(), vec![e]);
    assert_eq!(model.reference(e, works_in).unwrap(), Some(d));
}

fn failing_twice(config: ModelConfig) -> (Arc<Recorder>, Arc<Recorder>) {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let mut model = Model::with_config(Arc::new(schema), config);

    let d = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    let first = Recorder::failing_after();
    let second = Recorder::failing_after();
    model.add_listener(d, employees, first.clone()).unwrap();
    model.add_listener(d, employees, second.clone()).unwrap();

    assert!(model.add(d, employees, e).unwrap_err().is_modified());
    (first, second)
}

#[test]
fn stop_on_error_skips_later_listeners() {
    let (first, second) = failing_twice(ModelConfig::new());
    assert_eq!(first.after().len(), 1);
    assert!(second.after().is_empty());
}

#[test]
fn continue_on_error_reaches_every_listener() {
    let (first, second) =
        failing_twice(ModelConfig::new().with_listener_errors(ListenerErrorMode::ContinueOnError));
    assert_eq!(first.after().len(), 1);
    assert_eq!(second.after().len(), 1);
}

// =============================================================================
// Validators
// =============================================================================

#[test]
fn custom_validator_rejects_before_any_change() {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let welcome = model.create(employee).unwrap();
    let banned = model.create(employee).unwrap();
    let validator: Validator = Validator::custom("not-banned", move |element, _| {
        if element == banned {
            Err(Error::vetoed("banned"))
        } else {
            Ok(())
        }
    })
    .into();
    model.add_validator(d, employees, validator.clone()).unwrap();

    assert!(model.add(d, employees, welcome).unwrap());
    let err = model.add(d, employees, banned).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Vetoed(_)));
    assert_eq!(model.reference(banned, works_in).unwrap(), None);

    // Adding through the other side is checked too
    assert!(model.set_reference(banned, works_in, Some(d)).is_err());

    assert!(model.remove_validator(d, employees, &validator).unwrap());
    assert!(model.add(d, employees, banned).unwrap());
}

#[test]
fn validators_are_reference_counted() {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    let closed: Validator = Validator::custom("closed", |_, _| Err(Error::vetoed("closed"))).into();
    model.add_validator(d, employees, closed.clone()).unwrap();
    model.add_validator(d, employees, closed.clone()).unwrap();

    assert!(model.remove_validator(d, employees, &closed).unwrap());
    assert!(model.add(d, employees, e).is_err());
    assert!(model.remove_validator(d, employees, &closed).unwrap());
    assert!(!model.remove_validator(d, employees, &closed).unwrap());
    assert!(model.add(d, employees, e).unwrap());
}

#[test]
fn suppressing_validator_replaces_the_suppressed_one() {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    let strict: Validator = Validator::custom("strict", |_, _| Err(Error::vetoed("strict"))).into();
    let relaxed: Validator = Validator::custom("relaxed", |_, _| Ok(()))
        .suppressing("strict")
        .into();

    model.add_validator(d, employees, strict).unwrap();
    assert!(model.add(d, employees, e).is_err());

    model.add_validator(d, employees, relaxed.clone()).unwrap();
    assert!(model.add(d, employees, e).unwrap());

    model.remove(d, employees, e).unwrap();
    model.remove_validator(d, employees, &relaxed).unwrap();
    assert!(model.add(d, employees, e).is_err());
}

#[test]
fn validator_on_the_reference_side_guards_the_owner() {
    let schema = set_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let employees = prop(&schema, "Department", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let d = model.create(department).unwrap();
    let e = model.create(employee).unwrap();
    let loyal: Validator = Validator::custom("loyal", |_, _| Err(Error::vetoed("loyal"))).into();
    model.add_validator(e, works_in, loyal).unwrap();

    assert!(model.add(d, employees, e).is_err());
    assert!(model.elements(d, employees).unwrap().is_empty());
}

// =============================================================================
// Covariant properties
// =============================================================================

fn board_schema() -> Schema {
    Schema::builder()
        .with_class(ClassSchema::new("Employee").with_property(
            PropertyDecl::reference("department", "Department").with_opposite("employees"),
        ))
        .with_class(ClassSchema::new("Manager").extends("Employee"))
        .with_class(
            ClassSchema::new("Department")
                .with_property(
                    PropertyDecl::set("employees", "Employee").with_opposite("department"),
                ),
        )
        .with_class(
            ClassSchema::new("Board")
                .extends("Department")
                .with_property(PropertyDecl::set("employees", "Manager").covariant("employees")),
        )
        .build()
        .unwrap()
}

#[test]
fn narrowed_property_only_accepts_the_subclass() {
    let schema = board_schema();
    let employee = class(&schema, "Employee");
    let manager = class(&schema, "Manager");
    let board = class(&schema, "Board");
    let base = prop(&schema, "Department", "employees");
    let narrowed = prop(&schema, "Board", "employees");
    let works_in = prop(&schema, "Employee", "department");
    let mut model = model(schema);

    let b = model.create(board).unwrap();
    let clerk = model.create(employee).unwrap();
    let boss = model.create(manager).unwrap();

    assert!(matches!(
        model.add(b, narrowed, clerk).unwrap_err().kind,
        ErrorKind::InvalidArgument(_)
    ));
    // The inherited view shares the storage and its check
    assert!(model.add(b, base, clerk).is_err());
    assert!(model.set_reference(clerk, works_in, Some(b)).is_err());

    assert!(model.add(b, narrowed, boss).unwrap());
    assert_eq!(model.elements(b, base).unwrap(), vec![boss]);
    assert_eq!(model.reference(boss, works_in).unwrap(), Some(b));
}
