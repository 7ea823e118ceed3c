//! Errors raised by the heap itself, before any interior reference is involved.

use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub enum HeapError {
    /// The element count does not match the product of the dimension lengths.
    LengthMismatch { expected: usize, actual: usize },
    /// `lower + length` of a dimension does not fit in an `isize`.
    BoundsOverflow { axis: usize },
    /// An array needs at least one dimension.
    NoDimensions,
    RankMismatch { expected: usize, actual: usize },
    IndexOutOfBounds {
        axis: usize,
        index: isize,
        lower: isize,
        length: usize,
    },
    /// A slice or segment window does not fit in its source.
    RangeOutOfBounds {
        start: usize,
        len: usize,
        available: usize,
    },
    /// A segment without a backing array was asked for storage.
    MissingArray,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::LengthMismatch { expected, actual } => write!(
                f,
                "dimensions describe {expected} elements but {actual} were supplied"
            ),
            HeapError::BoundsOverflow { axis } => {
                write!(f, "bounds of axis {axis} overflow isize")
            }
            HeapError::NoDimensions => write!(f, "array has no dimensions"),
            HeapError::RankMismatch { expected, actual } => {
                write!(f, "expected {expected} indexes, got {actual}")
            }
            HeapError::IndexOutOfBounds {
                axis,
                index,
                lower,
                length,
            } => write!(
                f,
                "index {index} on axis {axis} outside [{lower}, {lower} + {length})"
            ),
            HeapError::RangeOutOfBounds {
                start,
                len,
                available,
            } => write!(
                f,
                "range {start}..{start} + {len} exceeds {available} available elements"
            ),
            HeapError::MissingArray => write!(f, "segment has no backing array"),
        }
    }
}

impl fmt::Debug for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for HeapError {}
