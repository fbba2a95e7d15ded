//! Element validators with reference counting and suppression.
//!
//! Every association endpoint carries a [`ValidatorChain`]. Validators are
//! combined and removed symmetrically; adding an equal validator twice only
//! bumps its count. A validator may suppress others it makes redundant, in
//! which case only the suppressor runs.

use std::fmt;
use std::sync::Arc;

use tandem_foundation::{ClassId, Error, ObjectId, Result};

use crate::metadata::Schema;

type Check = dyn Fn(ObjectId, ClassId) -> Result<()> + Send + Sync;

/// A named validation closure.
#[derive(Clone)]
pub struct CustomValidator {
    name: Arc<str>,
    suppresses: Vec<Arc<str>>,
    check: Arc<Check>,
}

impl CustomValidator {
    /// Names of the custom validators this one makes redundant.
    #[must_use]
    pub fn suppresses(&self) -> &[Arc<str>] {
        &self.suppresses
    }

    /// Marks another custom validator as redundant while this one is active.
    #[must_use]
    pub fn suppressing(mut self, name: &str) -> Self {
        self.suppresses.push(Arc::from(name));
        self
    }
}

/// Validation applied to elements before they enter an endpoint.
#[derive(Clone)]
pub enum Validator {
    /// The element must be an instance of the class (or a subclass).
    InstanceOf(ClassId),
    /// User-defined validation, identified by name.
    Custom(CustomValidator),
}

impl Validator {
    /// Creates a custom validator.
    pub fn custom(
        name: &str,
        check: impl Fn(ObjectId, ClassId) -> Result<()> + Send + Sync + 'static,
    ) -> CustomValidator {
        CustomValidator {
            name: Arc::from(name),
            suppresses: Vec::new(),
            check: Arc::new(check),
        }
    }

    /// Returns true if this validator makes `other` redundant.
    ///
    /// An instance-of check suppresses checks for its superclasses, since
    /// the narrower class already implies them.
    #[must_use]
    pub fn suppresses(&self, other: &Validator, schema: &Schema) -> bool {
        match (self, other) {
            (Self::InstanceOf(narrow), Self::InstanceOf(wide)) => {
                narrow != wide && schema.is_subclass(*narrow, *wide)
            }
            (Self::Custom(a), Self::Custom(b)) => a.suppresses.contains(&b.name),
            _ => false,
        }
    }

    /// Runs the validator.
    ///
    /// # Errors
    ///
    /// Returns the validator's rejection.
    pub fn validate(&self, element: ObjectId, class: ClassId, schema: &Schema) -> Result<()> {
        match self {
            Self::InstanceOf(expected) => {
                if schema.is_subclass(class, *expected) {
                    Ok(())
                } else {
                    let expected_name = schema.class(*expected).map(|c| Arc::clone(&c.name))?;
                    let actual_name = schema.class(class).map(|c| Arc::clone(&c.name))?;
                    Err(Error::invalid_argument(format!(
                        "{element} is a {actual_name}, not a {expected_name}"
                    )))
                }
            }
            Self::Custom(custom) => (custom.check)(element, class),
        }
    }
}

impl PartialEq for Validator {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InstanceOf(a), Self::InstanceOf(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => a.name == b.name,
            _ => false,
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstanceOf(class) => write!(f, "InstanceOf({class:?})"),
            Self::Custom(custom) => write!(f, "Custom({})", custom.name),
        }
    }
}

impl From<CustomValidator> for Validator {
    fn from(custom: CustomValidator) -> Self {
        Self::Custom(custom)
    }
}

/// Reference-counted set of validators.
#[derive(Clone, Debug, Default)]
pub struct ValidatorChain {
    entries: Vec<(Validator, usize)>,
}

impl ValidatorChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a validator, or bumps the count of an equal one.
    pub fn combine(&mut self, validator: Validator) {
        match self.entries.iter_mut().find(|(v, _)| *v == validator) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((validator, 1)),
        }
    }

    /// Drops one reference to an equal validator. Returns false if absent.
    pub fn remove(&mut self, validator: &Validator) -> bool {
        let Some(position) = self.entries.iter().position(|(v, _)| v == validator) else {
            return false;
        };
        let count = &mut self.entries[position].1;
        *count -= 1;
        if *count == 0 {
            self.entries.remove(position);
        }
        true
    }

    /// Reference count of an equal validator (zero if absent).
    #[must_use]
    pub fn count(&self, validator: &Validator) -> usize {
        self.entries
            .iter()
            .find(|(v, _)| v == validator)
            .map_or(0, |(_, count)| *count)
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validators not suppressed by another validator in the chain.
    pub fn active<'a>(&'a self, schema: &'a Schema) -> impl Iterator<Item = &'a Validator> + 'a {
        self.entries.iter().map(|(v, _)| v).filter(move |v| {
            !self
                .entries
                .iter()
                .any(|(other, _)| other.suppresses(v, schema))
        })
    }

    /// Runs every active validator.
    ///
    /// # Errors
    ///
    /// Returns the first rejection.
    pub fn validate(&self, element: ObjectId, class: ClassId, schema: &Schema) -> Result<()> {
        for validator in self.active(schema) {
            validator.validate(element, class, schema)?;
        }
        Ok(())
    }
}
