//! Process-wide schema registry.
//!
//! Schemas are expensive to build and immutable once built, so they are
//! built once per name and shared. Lookups take a read lock; a miss takes
//! the write lock, checks again, and only then builds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tandem_foundation::{Error, Result};
use tracing::debug;

use crate::metadata::Schema;

/// Cache of built schemas, keyed by name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<Arc<str>, Arc<Schema>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached schema, if built.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn get(&self, name: &str) -> Result<Option<Arc<Schema>>> {
        let schemas = self
            .schemas
            .read()
            .map_err(|_| Error::invalid_state("schema registry lock poisoned"))?;
        Ok(schemas.get(name).cloned())
    }

    /// Returns the schema registered under `name`, building it on first use.
    ///
    /// `build` runs at most once per name even under concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns the builder's error (nothing is cached in that case) or an
    /// error if the lock is poisoned.
    pub fn get_or_build(
        &self,
        name: &str,
        build: impl FnOnce() -> Result<Schema>,
    ) -> Result<Arc<Schema>> {
        if let Some(schema) = self.get(name)? {
            return Ok(schema);
        }

        let mut schemas = self
            .schemas
            .write()
            .map_err(|_| Error::invalid_state("schema registry lock poisoned"))?;
        if let Some(schema) = schemas.get(name) {
            return Ok(Arc::clone(schema));
        }
        let schema = Arc::new(build()?);
        debug!(name, classes = schema.classes().count(), "schema built");
        schemas.insert(Arc::from(name), Arc::clone(&schema));
        Ok(schema)
    }

    /// Number of cached schemas.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self
            .schemas
            .read()
            .map_err(|_| Error::invalid_state("schema registry lock poisoned"))?
            .len())
    }
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static GLOBAL: Mutex<Option<Arc<SchemaRegistry>>> = Mutex::new(None);

/// Creates the process-wide registry. Calling it again is a no-op.
///
/// # Errors
///
/// Returns an error if the guard lock is poisoned.
pub fn init() -> Result<()> {
    if INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }
    let mut global = GLOBAL
        .lock()
        .map_err(|_| Error::invalid_state("global registry lock poisoned"))?;
    if global.is_none() {
        *global = Some(Arc::new(SchemaRegistry::new()));
        INITIALIZED.store(true, Ordering::Release);
        debug!("global schema registry initialized");
    }
    Ok(())
}

/// Returns the process-wide registry.
///
/// # Errors
///
/// Returns an invalid-state error before [`init`] or after [`teardown`].
pub fn global() -> Result<Arc<SchemaRegistry>> {
    if !INITIALIZED.load(Ordering::Acquire) {
        return Err(Error::invalid_state("global schema registry is not initialized"));
    }
    GLOBAL
        .lock()
        .map_err(|_| Error::invalid_state("global registry lock poisoned"))?
        .clone()
        .ok_or_else(|| Error::invalid_state("global schema registry is not initialized"))
}

/// Drops the process-wide registry. Schemas already handed out stay valid.
///
/// # Errors
///
/// Returns an error if the guard lock is poisoned.
pub fn teardown() -> Result<()> {
    let mut global = GLOBAL
        .lock()
        .map_err(|_| Error::invalid_state("global registry lock poisoned"))?;
    INITIALIZED.store(false, Ordering::Release);
    *global = None;
    Ok(())
}
