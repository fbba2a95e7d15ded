//! Integration tests for lists and indexed references
//!
//! Tests that every list mutation keeps the opposite indexed references'
//! targets and positions in step.

use tandem_foundation::{ErrorKind, ObjectId};
use tandem_model::Model;

use crate::fixtures::{class, list_schema, model, prop};

struct Company {
    model: Model,
    department: tandem_foundation::ClassId,
    employee: tandem_foundation::ClassId,
    employees: tandem_foundation::PropertyId,
    works_in: tandem_foundation::PropertyId,
}

impl Company {
    fn new() -> Self {
        let schema = list_schema();
        Self {
            department: class(&schema, "Department"),
            employee: class(&schema, "Employee"),
            employees: prop(&schema, "Department", "employees"),
            works_in: prop(&schema, "Employee", "department"),
            model: model(schema),
        }
    }

    fn department_with(&mut self, count: usize) -> (ObjectId, Vec<ObjectId>) {
        let d = self.model.create(self.department).unwrap();
        let staff: Vec<ObjectId> = (0..count)
            .map(|_| self.model.create(self.employee).unwrap())
            .collect();
        for e in &staff {
            self.model.add(d, self.employees, *e).unwrap();
        }
        (d, staff)
    }

    fn hire(&mut self) -> ObjectId {
        self.model.create(self.employee).unwrap()
    }

    fn list(&mut self, d: ObjectId) -> Vec<ObjectId> {
        self.model.elements(d, self.employees).unwrap()
    }

    /// Every member points back at `d` with its own position.
    fn assert_in_step(&mut self, d: ObjectId) {
        for (position, e) in self.list(d).into_iter().enumerate() {
            assert_eq!(self.model.reference(e, self.works_in).unwrap(), Some(d));
            assert_eq!(self.model.index(e, self.works_in).unwrap(), Some(position));
        }
    }

    fn assert_detached(&mut self, e: ObjectId) {
        assert_eq!(self.model.reference(e, self.works_in).unwrap(), None);
        assert_eq!(self.model.index(e, self.works_in).unwrap(), None);
    }
}

// =============================================================================
// List Side
// =============================================================================

#[test]
fn add_appends_with_positions() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);

    assert_eq!(c.list(d), staff);
    c.assert_in_step(d);
}

#[test]
fn add_existing_element_is_a_no_op() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(2);

    assert!(!c.model.add(d, c.employees, staff[0]).unwrap());
    assert_eq!(c.list(d), staff);
}

#[test]
fn insert_at_front_renumbers_the_rest() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(2);
    let newcomer = c.hire();

    c.model.insert(d, c.employees, 0, newcomer).unwrap();

    assert_eq!(c.list(d), vec![newcomer, staff[0], staff[1]]);
    c.assert_in_step(d);
}

#[test]
fn insert_existing_element_moves_it() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);

    c.model.insert(d, c.employees, 0, staff[2]).unwrap();

    assert_eq!(c.list(d), vec![staff[2], staff[0], staff[1]]);
    c.assert_in_step(d);
}

#[test]
fn insert_past_the_end_is_out_of_bounds() {
    let mut c = Company::new();
    let (d, _) = c.department_with(2);
    let newcomer = c.hire();

    let err = c.model.insert(d, c.employees, 3, newcomer).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IndexOutOfBounds { index: 3, length: 2 }));
    c.assert_detached(newcomer);
}

#[test]
fn remove_at_detaches_and_renumbers() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);

    assert_eq!(c.model.remove_at(d, c.employees, 0).unwrap(), staff[0]);

    assert_eq!(c.list(d), vec![staff[1], staff[2]]);
    c.assert_detached(staff[0]);
    c.assert_in_step(d);
}

#[test]
fn remove_by_identity() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);
    let outsider = c.hire();

    assert!(c.model.remove(d, c.employees, staff[1]).unwrap());
    assert!(!c.model.remove(d, c.employees, outsider).unwrap());

    assert_eq!(c.list(d), vec![staff[0], staff[2]]);
    c.assert_detached(staff[1]);
    c.assert_in_step(d);
}

#[test]
fn set_at_replaces_element() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);
    let newcomer = c.hire();

    assert_eq!(c.model.set_at(d, c.employees, 1, newcomer).unwrap(), staff[1]);

    assert_eq!(c.list(d), vec![staff[0], newcomer, staff[2]]);
    c.assert_detached(staff[1]);
    c.assert_in_step(d);
}

#[test]
fn sub_list_clear_removes_range() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(4);

    c.model.sub_list_clear(d, c.employees, 1, 3).unwrap();

    assert_eq!(c.list(d), vec![staff[0], staff[3]]);
    c.assert_detached(staff[1]);
    c.assert_detached(staff[2]);
    c.assert_in_step(d);
}

#[test]
fn sub_list_clear_rejects_bad_range() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);

    assert!(c.model.sub_list_clear(d, c.employees, 2, 1).is_err());
    assert!(c.model.sub_list_clear(d, c.employees, 0, 4).is_err());
    assert_eq!(c.list(d), staff);
}

#[test]
fn clear_detaches_everyone() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);

    c.model.clear(d, c.employees).unwrap();

    assert!(c.list(d).is_empty());
    for e in staff {
        c.assert_detached(e);
    }
}

#[test]
fn retain_keeps_listed_elements() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(4);

    assert!(c.model.retain(d, c.employees, &[staff[1], staff[3]]).unwrap());
    assert!(!c.model.retain(d, c.employees, &[staff[1], staff[3]]).unwrap());

    assert_eq!(c.list(d), vec![staff[1], staff[3]]);
    c.assert_detached(staff[0]);
    c.assert_in_step(d);
}

// =============================================================================
// Indexed Reference Side
// =============================================================================

#[test]
fn setting_reference_appends_to_list() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(2);
    let newcomer = c.hire();

    c.model.set_reference(newcomer, c.works_in, Some(d)).unwrap();

    assert_eq!(c.list(d), vec![staff[0], staff[1], newcomer]);
    c.assert_in_step(d);
}

#[test]
fn set_index_moves_within_list() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(4);

    c.model.set_index(staff[3], c.works_in, Some(0)).unwrap();

    assert_eq!(c.list(d), vec![staff[3], staff[0], staff[1], staff[2]]);
    c.assert_in_step(d);
}

#[test]
fn set_index_clamps_to_last_position() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);

    c.model.set_index(staff[0], c.works_in, Some(10)).unwrap();

    assert_eq!(c.list(d), vec![staff[1], staff[2], staff[0]]);
    c.assert_in_step(d);
}

#[test]
fn set_index_none_detaches() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);

    c.model.set_index(staff[0], c.works_in, None).unwrap();

    assert_eq!(c.list(d), vec![staff[1], staff[2]]);
    c.assert_detached(staff[0]);
    c.assert_in_step(d);
}

#[test]
fn remembered_index_places_next_attach() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(2);
    let newcomer = c.hire();

    c.model.set_index(newcomer, c.works_in, Some(0)).unwrap();
    assert_eq!(c.model.index(newcomer, c.works_in).unwrap(), None);
    c.model.set_reference(newcomer, c.works_in, Some(d)).unwrap();

    assert_eq!(c.list(d), vec![newcomer, staff[0], staff[1]]);
    c.assert_in_step(d);
}

#[test]
fn set_indexed_inserts_at_position() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);
    let newcomer = c.hire();

    c.model.set_indexed(newcomer, c.works_in, Some(d), Some(1)).unwrap();

    assert_eq!(c.list(d), vec![staff[0], newcomer, staff[1], staff[2]]);
    c.assert_in_step(d);
}

#[test]
fn moving_to_another_department_renumbers_both() {
    let mut c = Company::new();
    let (d1, staff) = c.department_with(3);
    let (d2, _) = c.department_with(0);

    c.model.set_reference(staff[0], c.works_in, Some(d2)).unwrap();

    assert_eq!(c.list(d1), vec![staff[1], staff[2]]);
    assert_eq!(c.list(d2), vec![staff[0]]);
    c.assert_in_step(d1);
    c.assert_in_step(d2);
}

#[test]
fn adding_to_another_list_seizes_element() {
    let mut c = Company::new();
    let (d1, staff) = c.department_with(2);
    let (d2, others) = c.department_with(1);

    c.model.insert(d2, c.employees, 0, staff[1]).unwrap();

    assert_eq!(c.list(d1), vec![staff[0]]);
    assert_eq!(c.list(d2), vec![staff[1], others[0]]);
    c.assert_in_step(d1);
    c.assert_in_step(d2);
}

#[test]
fn clearing_reference_leaves_list() {
    let mut c = Company::new();
    let (d, staff) = c.department_with(3);

    c.model.set_reference(staff[1], c.works_in, None).unwrap();

    assert_eq!(c.list(d), vec![staff[0], staff[2]]);
    c.assert_detached(staff[1]);
    c.assert_in_step(d);
}
