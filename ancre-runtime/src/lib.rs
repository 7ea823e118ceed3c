//! The heap that interior references point into.
//!
//! Arrays and boxes are reference-counted cells whose storage never moves while a handle is
//! alive. Buffer abstractions (segments, slices, buffer owners and managers) sit on top of them.
//! The [`Owner`] trait is how the resolution engine learns, from a type alone, how an owner lays
//! out its elements.

mod array;
mod boxed;
mod buffer;
mod error;
mod heap;
mod owner;
mod shape;

pub use ancre_ir::Dim;

pub use array::{AnyArray, MdArray, Vector};
pub use boxed::Boxed;
pub use buffer::{
    BufferManager, BufferOwner, ManagerHandle, OwnerHandle, Segment, SharedBuffer, Slice,
    SliceOwner, SliceSource, Span,
};
pub use error::HeapError;
pub use heap::{ArrayCell, ArrayKind, ArrayRef, BoxCell, BoxRef, ErasedBox, Object, box_header};
pub use owner::{Owner, OwnerKind, OwnerView};
pub use shape::{FieldToken, IShape};
