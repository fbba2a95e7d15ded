//! Random operation sequences: both ends of every association must agree
//! after each step.

use proptest::prelude::*;
use tandem_foundation::{ObjectId, PropertyId, Value};
use tandem_model::Model;

use crate::fixtures::{class, list_schema, many_schema, model, prop, sorted_schema};

const DEPARTMENTS: usize = 3;
const EMPLOYEES: usize = 6;

// =============================================================================
// Lists against indexed references
// =============================================================================

#[derive(Clone, Debug)]
enum ListOp {
    Add(usize, usize),
    Insert(usize, usize, usize),
    RemoveAt(usize, usize),
    Assign(usize, Option<usize>),
    Reindex(usize, usize),
    Clear(usize),
}

fn list_op() -> impl Strategy<Value = ListOp> {
    let d = 0..DEPARTMENTS;
    let e = 0..EMPLOYEES;
    prop_oneof![
        (d.clone(), e.clone()).prop_map(|(d, e)| ListOp::Add(d, e)),
        (d.clone(), 0..8usize, e.clone()).prop_map(|(d, at, e)| ListOp::Insert(d, at, e)),
        (d.clone(), 0..8usize).prop_map(|(d, at)| ListOp::RemoveAt(d, at)),
        (e.clone(), proptest::option::of(d.clone())).prop_map(|(e, d)| ListOp::Assign(e, d)),
        (e, 0..8usize).prop_map(|(e, at)| ListOp::Reindex(e, at)),
        d.prop_map(ListOp::Clear),
    ]
}

struct ListWorld {
    model: Model,
    departments: Vec<ObjectId>,
    employees: Vec<ObjectId>,
    list: PropertyId,
    reference: PropertyId,
}

impl ListWorld {
    fn new() -> Self {
        let schema = list_schema();
        let department = class(&schema, "Department");
        let employee = class(&schema, "Employee");
        let list = prop(&schema, "Department", "employees");
        let reference = prop(&schema, "Employee", "department");
        let mut model = model(schema);
        let departments = (0..DEPARTMENTS).map(|_| model.create(department).unwrap()).collect();
        let employees = (0..EMPLOYEES).map(|_| model.create(employee).unwrap()).collect();
        Self {
            model,
            departments,
            employees,
            list,
            reference,
        }
    }

    fn apply(&mut self, op: &ListOp) {
        let model = &mut self.model;
        match *op {
            ListOp::Add(d, e) => {
                model.add(self.departments[d], self.list, self.employees[e]).unwrap();
            }
            ListOp::Insert(d, at, e) => {
                let len = model.len(self.departments[d], self.list).unwrap();
                model
                    .insert(self.departments[d], self.list, at % (len + 1), self.employees[e])
                    .unwrap();
            }
            ListOp::RemoveAt(d, at) => {
                let len = model.len(self.departments[d], self.list).unwrap();
                if len > 0 {
                    model.remove_at(self.departments[d], self.list, at % len).unwrap();
                }
            }
            ListOp::Assign(e, d) => {
                let target = d.map(|d| self.departments[d]);
                model.set_reference(self.employees[e], self.reference, target).unwrap();
            }
            ListOp::Reindex(e, at) => {
                model.set_index(self.employees[e], self.reference, Some(at)).unwrap();
            }
            ListOp::Clear(d) => model.clear(self.departments[d], self.list).unwrap(),
        }
    }

    fn check(&mut self) {
        let mut placed = Vec::new();
        for &d in &self.departments {
            let elements = self.model.elements(d, self.list).unwrap();
            for (position, e) in elements.into_iter().enumerate() {
                assert!(!placed.contains(&e), "{e} is in two lists");
                placed.push(e);
                assert_eq!(self.model.reference(e, self.reference).unwrap(), Some(d));
                assert_eq!(self.model.index(e, self.reference).unwrap(), Some(position));
            }
        }
        for &e in &self.employees {
            if !placed.contains(&e) {
                assert_eq!(self.model.reference(e, self.reference).unwrap(), None);
            }
        }
    }
}

// =============================================================================
// Sorted sets against references, with renames
// =============================================================================

#[derive(Clone, Debug)]
enum SortedOp {
    Add(usize, usize),
    Remove(usize, usize),
    Assign(usize, Option<usize>),
    Rename(usize, &'static str),
}

fn sorted_op() -> impl Strategy<Value = SortedOp> {
    let d = 0..DEPARTMENTS;
    let e = 0..EMPLOYEES;
    prop_oneof![
        (d.clone(), e.clone()).prop_map(|(d, e)| SortedOp::Add(d, e)),
        (d.clone(), e.clone()).prop_map(|(d, e)| SortedOp::Remove(d, e)),
        (e.clone(), proptest::option::of(d)).prop_map(|(e, d)| SortedOp::Assign(e, d)),
        (e, prop::sample::select(vec!["ash", "birch", "cedar", "elm"]))
            .prop_map(|(e, name)| SortedOp::Rename(e, name)),
    ]
}

fn sorted_run(ops: &[SortedOp]) {
    let schema = sorted_schema();
    let department = class(&schema, "Department");
    let employee = class(&schema, "Employee");
    let set = prop(&schema, "Department", "employees");
    let reference = prop(&schema, "Employee", "department");
    let name = prop(&schema, "Employee", "name");
    let mut model = model(schema);
    let departments: Vec<_> = (0..DEPARTMENTS).map(|_| model.create(department).unwrap()).collect();
    let employees: Vec<_> = (0..EMPLOYEES).map(|_| model.create(employee).unwrap()).collect();

    for op in ops {
        match *op {
            SortedOp::Add(d, e) => {
                model.add(departments[d], set, employees[e]).unwrap();
            }
            SortedOp::Remove(d, e) => {
                model.remove(departments[d], set, employees[e]).unwrap();
            }
            SortedOp::Assign(e, d) => {
                let target = d.map(|d| departments[d]);
                model.set_reference(employees[e], reference, target).unwrap();
            }
            SortedOp::Rename(e, new_name) => {
                model.set_scalar(employees[e], name, new_name).unwrap()
            }
        }

        let mut members = Vec::new();
        for &d in &departments {
            let elements = model.elements(d, set).unwrap();
            let names: Vec<Value> =
                elements.iter().map(|&e| model.scalar(e, name).unwrap()).collect();
            assert!(names.windows(2).all(|pair| pair[0] < pair[1]), "unsorted: {names:?}");
            for e in elements {
                assert_eq!(model.reference(e, reference).unwrap(), Some(d));
                members.push(e);
            }
        }
        for &e in &employees {
            if !members.contains(&e) {
                assert_eq!(model.reference(e, reference).unwrap(), None);
            }
        }
    }
}

// =============================================================================
// Many-to-many sets
// =============================================================================

#[derive(Clone, Debug)]
enum ManyOp {
    Join(usize, usize),
    Leave(usize, usize),
    Enlist(usize, usize),
    Retain(usize, Vec<bool>),
    Clear(usize),
}

fn many_op() -> impl Strategy<Value = ManyOp> {
    let p = 0..DEPARTMENTS;
    let x = 0..EMPLOYEES;
    prop_oneof![
        (p.clone(), x.clone()).prop_map(|(p, x)| ManyOp::Join(p, x)),
        (p.clone(), x.clone()).prop_map(|(p, x)| ManyOp::Leave(p, x)),
        (x, p.clone()).prop_map(|(x, p)| ManyOp::Enlist(x, p)),
        (p.clone(), prop::collection::vec(any::<bool>(), EMPLOYEES))
            .prop_map(|(p, keep)| ManyOp::Retain(p, keep)),
        p.prop_map(ManyOp::Clear),
    ]
}

fn many_run(ops: &[ManyOp]) {
    let schema = many_schema();
    let project = class(&schema, "Project");
    let person = class(&schema, "Person");
    let members = prop(&schema, "Project", "members");
    let projects = prop(&schema, "Person", "projects");
    let mut model = model(schema);
    let teams: Vec<_> = (0..DEPARTMENTS).map(|_| model.create(project).unwrap()).collect();
    let people: Vec<_> = (0..EMPLOYEES).map(|_| model.create(person).unwrap()).collect();

    for op in ops {
        match op {
            ManyOp::Join(p, x) => {
                model.add(teams[*p], members, people[*x]).unwrap();
            }
            ManyOp::Leave(p, x) => {
                model.remove(teams[*p], members, people[*x]).unwrap();
            }
            ManyOp::Enlist(x, p) => {
                model.add(people[*x], projects, teams[*p]).unwrap();
            }
            ManyOp::Retain(p, keep) => {
                let kept: Vec<_> = people
                    .iter()
                    .zip(keep)
                    .filter(|(_, keep)| **keep)
                    .map(|(person, _)| *person)
                    .collect();
                model.retain(teams[*p], members, &kept).unwrap();
            }
            ManyOp::Clear(p) => model.clear(teams[*p], members).unwrap(),
        }

        for &t in &teams {
            for &x in &people {
                assert_eq!(
                    model.contains_element(t, members, x).unwrap(),
                    model.contains_element(x, projects, t).unwrap()
                );
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lists_and_indexed_references_agree(ops in prop::collection::vec(list_op(), 1..40)) {
        let mut world = ListWorld::new();
        for op in &ops {
            world.apply(op);
            world.check();
        }
    }

    #[test]
    fn sorted_sets_and_references_agree(ops in prop::collection::vec(sorted_op(), 1..40)) {
        sorted_run(&ops);
    }

    #[test]
    fn many_to_many_sets_agree(ops in prop::collection::vec(many_op(), 1..40)) {
        many_run(&ops);
    }
}
