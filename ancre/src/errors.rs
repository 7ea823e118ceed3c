//! Error types for locator construction, resolution and dereference.

use std::fmt;

use ancre_runtime::HeapError;

/// Where an error occurred: the owner and element types involved.
#[derive(Clone, PartialEq, Eq)]
pub struct ErrorLocation {
    pub owner: &'static str,
    pub element: &'static str,
}

impl ErrorLocation {
    pub fn of<O: ?Sized, E: ?Sized>() -> Self {
        Self {
            owner: core::any::type_name::<O>(),
            element: core::any::type_name::<E>(),
        }
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.element, self.owner)
    }
}

impl fmt::Debug for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An error raised while building, resolving or dereferencing a locator.
#[derive(Clone, PartialEq, Eq)]
pub struct LocateError {
    pub location: ErrorLocation,
    pub kind: LocateErrorKind,
}

impl fmt::Display for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.kind, self.location)
    }
}

impl fmt::Debug for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for LocateError {}

impl LocateError {
    pub fn new(location: ErrorLocation, kind: impl Into<LocateErrorKind>) -> Self {
        Self {
            location,
            kind: kind.into(),
        }
    }

    /// Error for an owner type `O` holding elements of type `E`.
    pub fn at<O: ?Sized, E: ?Sized>(kind: impl Into<LocateErrorKind>) -> Self {
        Self::new(ErrorLocation::of::<O, E>(), kind)
    }
}

/// The kind of locate error.
#[derive(Clone, PartialEq, Eq)]
pub enum LocateErrorKind {
    /// A required owner, backing array or address is missing.
    NullOwner,
    /// A negative index where the shape only admits zero-based indexes.
    IndexNegative { index: isize },
    /// An index outside the bounds of one dimension (or of a buffer).
    IndexOutOfBounds {
        axis: usize,
        index: isize,
        lower: isize,
        length: usize,
    },
    /// The owner's runtime shape (kind or rank) is not what the descriptor expects.
    ShapeMismatch { expected: String, actual: String },
    /// The owner's element type is not exactly the locator's element type.
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Malformed path, unknown field, or a descriptor that does not fit the owner type.
    InvalidConstruction { reason: String },
    /// The operation has no meaning for this owner, or the platform cannot perform it.
    UnsupportedOperation { reason: &'static str },
}

impl LocateErrorKind {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        LocateErrorKind::InvalidConstruction {
            reason: reason.into(),
        }
    }

    pub(crate) fn rank(expected: usize, actual: usize) -> Self {
        LocateErrorKind::ShapeMismatch {
            expected: format!("rank {expected}"),
            actual: format!("rank {actual}"),
        }
    }
}

impl fmt::Display for LocateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocateErrorKind::NullOwner => write!(f, "owner is null"),
            LocateErrorKind::IndexNegative { index } => write!(f, "index {index} is negative"),
            LocateErrorKind::IndexOutOfBounds {
                axis,
                index,
                lower,
                length,
            } => write!(
                f,
                "index {index} on axis {axis} outside [{lower}, {lower} + {length})"
            ),
            LocateErrorKind::ShapeMismatch { expected, actual } => {
                write!(f, "shape mismatch: expected {expected}, got {actual}")
            }
            LocateErrorKind::TypeMismatch { expected, actual } => {
                write!(f, "element type mismatch: expected {expected}, got {actual}")
            }
            LocateErrorKind::InvalidConstruction { reason } => {
                write!(f, "invalid construction: {reason}")
            }
            LocateErrorKind::UnsupportedOperation { reason } => {
                write!(f, "unsupported operation: {reason}")
            }
        }
    }
}

impl fmt::Debug for LocateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<HeapError> for LocateErrorKind {
    fn from(err: HeapError) -> Self {
        match err {
            HeapError::RankMismatch { expected, actual } => Self::rank(expected, actual),
            HeapError::IndexOutOfBounds {
                axis,
                index,
                lower,
                length,
            } => LocateErrorKind::IndexOutOfBounds {
                axis,
                index,
                lower,
                length,
            },
            HeapError::RangeOutOfBounds {
                start,
                len,
                available,
            } => LocateErrorKind::IndexOutOfBounds {
                axis: 0,
                index: isize::try_from(start.saturating_add(len)).unwrap_or(isize::MAX),
                lower: 0,
                length: available,
            },
            HeapError::MissingArray => LocateErrorKind::NullOwner,
            other => LocateErrorKind::invalid(other.to_string()),
        }
    }
}

impl From<ancre_ir::Error> for LocateErrorKind {
    fn from(err: ancre_ir::Error) -> Self {
        match err {
            ancre_ir::Error::RankMismatch { expected, actual } => Self::rank(expected, actual),
            ancre_ir::Error::IndexOutOfBounds {
                axis,
                index,
                lower,
                length,
            } => LocateErrorKind::IndexOutOfBounds {
                axis,
                index,
                lower,
                length,
            },
            ancre_ir::Error::NullBase => LocateErrorKind::NullOwner,
            ancre_ir::Error::CodegenUnavailable => LocateErrorKind::UnsupportedOperation {
                reason: "runtime code generation is unavailable on this platform",
            },
            other @ (ancre_ir::Error::AbiMismatch { .. }
            | ancre_ir::Error::MalformedProgram { .. }) => {
                LocateErrorKind::invalid(other.to_string())
            }
        }
    }
}
