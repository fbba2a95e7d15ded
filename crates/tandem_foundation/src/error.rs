//! Error types for the Tandem system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::event::ModificationEvent;
use crate::object::ObjectId;
use crate::types::Type;

/// The main error type for Tandem operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates an object not found error.
    #[must_use]
    pub fn object_not_found(id: ObjectId) -> Self {
        Self::new(ErrorKind::ObjectNotFound(id))
    }

    /// Creates a stale object reference error.
    #[must_use]
    pub fn stale_object(id: ObjectId) -> Self {
        Self::new(ErrorKind::StaleObject(id))
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument(message.into()))
    }

    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState(message.into()))
    }

    /// Creates an unsupported operation error.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported(message.into()))
    }

    /// Creates an index out of bounds error.
    #[must_use]
    pub fn index_out_of_bounds(index: usize, length: usize) -> Self {
        Self::new(ErrorKind::IndexOutOfBounds { index, length })
    }

    /// Creates an invalid program error for a malformed class declaration.
    #[must_use]
    pub fn invalid_program(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidProgram {
            class: class.into(),
            message: message.into(),
        })
    }

    /// Creates a veto error, raised by a listener to reject a change.
    #[must_use]
    pub fn vetoed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Vetoed(reason.into()))
    }

    /// Creates a lazy initialization error for an endpoint nobody can load.
    #[must_use]
    pub fn lazy_initialization(class: impl Into<String>, property: impl Into<String>) -> Self {
        Self::new(ErrorKind::LazyInitialization {
            class: class.into(),
            property: property.into(),
        })
    }

    /// Wraps a listener failure together with the event being delivered.
    ///
    /// `modified` is false when the failure happened before the change was
    /// applied and true when the change had already been applied.
    #[must_use]
    pub fn modification(modified: bool, event: ModificationEvent, cause: Error) -> Self {
        Self::new(ErrorKind::Modification {
            modified,
            event: Box::new(event),
            cause: Box::new(cause),
        })
    }

    /// Returns true if this error reports that state was changed before it
    /// was raised.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        matches!(self.kind, ErrorKind::Modification { modified: true, .. })
    }

    /// Returns the event carried by a modification error.
    #[must_use]
    pub fn event(&self) -> Option<&ModificationEvent> {
        match &self.kind {
            ErrorKind::Modification { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Type mismatch when assigning a scalar.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// Object was not found in the model.
    #[error("object not found: {0:?}")]
    ObjectNotFound(ObjectId),

    /// Object reference is stale (generation mismatch).
    #[error("stale object reference: {0:?}")]
    StaleObject(ObjectId),

    /// An argument was rejected (wrong class, missing key, foreign property).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The operation is not supported on this endpoint.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Index out of bounds.
    #[error("index out of bounds: {index} (length {length})")]
    IndexOutOfBounds {
        /// The index that was accessed.
        index: usize,
        /// The actual length of the collection.
        length: usize,
    },

    /// A class declaration violates the object-model contract.
    #[error("invalid program in class {class}: {message}")]
    InvalidProgram {
        /// The offending class.
        class: String,
        /// What is wrong with it.
        message: String,
    },

    /// A listener rejected a change.
    #[error("vetoed: {0}")]
    Vetoed(String),

    /// A listener failed while an event was being delivered.
    #[error("modification failed ({}) at {event}", phase(.modified))]
    Modification {
        /// Whether state had already changed.
        modified: bool,
        /// The event being delivered.
        event: Box<ModificationEvent>,
        /// The listener's error.
        #[source]
        cause: Box<Error>,
    },

    /// An unloaded or disabled endpoint was used and no loader is available.
    #[error("lazy initialization failed for {class}.{property}: no loader available")]
    LazyInitialization {
        /// The owning class.
        class: String,
        /// The property that could not be loaded.
        property: String,
    },

    /// A collection changed underneath a cursor.
    #[error("concurrent modification detected")]
    ConcurrentModification,

    /// A loader failed to produce data.
    #[error("loader failed: {0}")]
    Loader(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn phase(modified: &bool) -> &'static str {
    if *modified { "applied" } else { "not applied" }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The object involved.
    pub object: Option<ObjectId>,
    /// Qualified property name (`Class.property`).
    pub property: Option<String>,
    /// Chain of operations leading to the error, outermost first.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the object.
    #[must_use]
    pub fn with_object(mut self, object: ObjectId) -> Self {
        self.object = Some(object);
        self
    }

    /// Sets the property.
    #[must_use]
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(property) = &self.property {
            write!(f, "at {property}")?;
            if let Some(object) = self.object {
                write!(f, " of {object}")?;
            }
        } else if let Some(object) = self.object {
            write!(f, "at {object}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
