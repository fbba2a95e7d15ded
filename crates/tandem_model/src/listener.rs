//! Modification listeners and ordered listener lists.

use std::fmt;
use std::sync::Arc;

use tandem_foundation::{Error, ModificationEvent, Result};

use crate::config::ListenerErrorMode;

/// Observer of changes to an object model.
///
/// `modifying` runs before a change is applied and may veto it by returning
/// an error. `modified` runs after the change; an error there is reported to
/// the caller but does not undo anything.
pub trait ModificationListener: Send + Sync {
    /// Called before the change is applied.
    ///
    /// # Errors
    ///
    /// Any error vetoes the change.
    fn modifying(&self, event: &ModificationEvent) -> Result<()> {
        let _ = event;
        Ok(())
    }

    /// Called after the change is applied.
    ///
    /// # Errors
    ///
    /// Errors are reported to the caller of the mutation.
    fn modified(&self, event: &ModificationEvent) -> Result<()> {
        let _ = event;
        Ok(())
    }
}

/// Which phase of delivery is running.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Modifying,
    Modified,
}

/// Ordered multicast list of listeners.
///
/// Combining appends (the same listener may appear more than once);
/// removing drops the most recently added occurrence.
#[derive(Clone, Default)]
pub struct ListenerList {
    listeners: Vec<Arc<dyn ModificationListener>>,
}

impl ListenerList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener.
    pub fn combine(&mut self, listener: Arc<dyn ModificationListener>) {
        self.listeners.push(listener);
    }

    /// Removes the last occurrence of `listener`. Returns false if absent.
    pub fn remove(&mut self, listener: &Arc<dyn ModificationListener>) -> bool {
        match self
            .listeners
            .iter()
            .rposition(|l| Arc::ptr_eq(l, listener))
        {
            Some(position) => {
                self.listeners.remove(position);
                true
            }
            None => false,
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `event` to every listener in order.
    ///
    /// Listener errors are wrapped into a modification error carrying the
    /// event; `modified` tells whether the change was already applied.
    pub(crate) fn fire(
        &self,
        phase: Phase,
        event: &ModificationEvent,
        mode: ListenerErrorMode,
    ) -> Result<()> {
        let mut first: Option<Error> = None;
        for listener in &self.listeners {
            let outcome = match phase {
                Phase::Modifying => listener.modifying(event),
                Phase::Modified => listener.modified(event),
            };
            if let Err(err) = outcome {
                if first.is_none() {
                    first = Some(err);
                }
                if mode == ListenerErrorMode::StopOnError {
                    break;
                }
            }
        }
        match first {
            Some(err) => Err(Error::modification(
                phase == Phase::Modified,
                event.clone(),
                err,
            )),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ListenerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList")
            .field("len", &self.listeners.len())
            .finish()
    }
}
