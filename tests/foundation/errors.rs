//! Integration tests for error types
//!
//! Tests error construction, display, context, and modification wrapping.

use std::error::Error as _;
use std::sync::Arc;

use tandem_foundation::{
    EndpointRef, Error, ErrorContext, ErrorKind, EventKind, Modification, ModificationEvent,
    ObjectId, PropertyId, Slot, Type,
};

fn sample_event() -> ModificationEvent {
    let employee = ObjectId::new(1, 1);
    let department = ObjectId::new(2, 1);
    ModificationEvent::new(
        EndpointRef::new(employee, PropertyId(3)),
        EventKind::Reference,
        Arc::new(Modification::SetReference {
            target: Some(department),
        }),
    )
    .with_attached(Slot::object(department))
}

// =============================================================================
// Display
// =============================================================================

#[test]
fn display_messages() {
    assert_eq!(
        Error::type_mismatch(Type::String, Type::Int).to_string(),
        "type mismatch: expected string, got int"
    );
    assert_eq!(
        Error::index_out_of_bounds(5, 3).to_string(),
        "index out of bounds: 5 (length 3)"
    );
    assert_eq!(
        Error::lazy_initialization("Department", "employees").to_string(),
        "lazy initialization failed for Department.employees: no loader available"
    );
    assert_eq!(
        Error::invalid_program("Employee", "missing opposite").to_string(),
        "invalid program in class Employee: missing opposite"
    );
    assert_eq!(Error::vetoed("frozen").to_string(), "vetoed: frozen");
    assert_eq!(
        Error::new(ErrorKind::ConcurrentModification).to_string(),
        "concurrent modification detected"
    );
}

#[test]
fn object_errors_name_the_id() {
    let id = ObjectId::new(7, 3);
    assert_eq!(Error::stale_object(id).to_string(), "stale object reference: ObjectId(7v3)");
    assert_eq!(Error::object_not_found(id).to_string(), "object not found: ObjectId(7v3)");
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn context_display() {
    let context = ErrorContext::new()
        .with_object(ObjectId::new(4, 1))
        .with_property("Employee.department")
        .with_frame("set_reference")
        .with_frame("attach peer");
    assert_eq!(
        context.to_string(),
        "at Employee.department of Object(4)\n  in set_reference\n  in attach peer\n"
    );
}

#[test]
fn context_object_only() {
    let context = ErrorContext::new().with_object(ObjectId::new(4, 1));
    assert_eq!(context.to_string(), "at Object(4)");
}

#[test]
fn context_does_not_change_kind() {
    let err = Error::invalid_argument("no key").with_context(
        ErrorContext::new().with_property("A.b"),
    );
    assert!(matches!(err.kind, ErrorKind::InvalidArgument(ref m) if m == "no key"));
    assert_eq!(err.context.as_ref().and_then(|c| c.property.as_deref()), Some("A.b"));
}

// =============================================================================
// Modification Errors
// =============================================================================

#[test]
fn modification_before_change() {
    let err = Error::modification(false, sample_event(), Error::vetoed("no"));
    assert!(!err.is_modified());
    assert!(err.event().is_some());
    assert!(err.to_string().starts_with("modification failed (not applied)"));
}

#[test]
fn modification_after_change() {
    let err = Error::modification(true, sample_event(), Error::invalid_state("listener broke"));
    assert!(err.is_modified());
    assert!(err.to_string().starts_with("modification failed (applied)"));

    let event = err.event().map(ModificationEvent::source);
    assert_eq!(event, Some(EndpointRef::new(ObjectId::new(1, 1), PropertyId(3))));
}

#[test]
fn modification_exposes_cause_as_source() {
    let err = Error::modification(false, sample_event(), Error::vetoed("no"));
    let source = err.kind.source().map(ToString::to_string);
    assert_eq!(source.as_deref(), Some("vetoed: no"));
}

#[test]
fn plain_errors_are_not_modified() {
    let err = Error::unsupported("add from map side");
    assert!(!err.is_modified());
    assert!(err.event().is_none());
}
