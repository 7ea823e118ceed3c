//! Heap cells: type-erased arrays and boxes, and the dynamically typed [`Object`] handle.
//!
//! Cells never move their storage while a handle is alive, so an interior address computed from
//! a cell stays valid for as long as the cell's `Rc` is reachable.

use crate::error::HeapError;
use ancre_ir::Dim;
use core::any::{Any, TypeId};
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;
use facet_core::{Facet, Shape};
use smallvec::SmallVec;
use std::rc::Rc;

// ==================================================================
// Arrays
// ==================================================================

/// How an array was created. Single-dimensional zero-based arrays are their own kind even when
/// a multi-dimensional array happens to have rank 1 and lower bound 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Vector,
    Multi,
}

pub struct ArrayCell {
    kind: ArrayKind,
    element: &'static Shape,
    data: NonNull<u8>,
    len: usize,
    dims: SmallVec<[Dim; 4]>,
    drop_elements: unsafe fn(NonNull<u8>, usize),
}

pub type ArrayRef = Rc<ArrayCell>;

unsafe fn drop_elements<T>(data: NonNull<u8>, len: usize) {
    let slice = core::ptr::slice_from_raw_parts_mut(data.as_ptr().cast::<T>(), len);
    drop(unsafe { Box::from_raw(slice) });
}

impl ArrayCell {
    pub(crate) fn vector<T>(values: Vec<T>) -> Self
    where
        T: Facet<'static> + 'static,
    {
        let len = values.len();
        Self::from_parts(ArrayKind::Vector, values, SmallVec::from_slice(&[Dim::zero_based(len)]))
    }

    pub(crate) fn multi<T>(values: Vec<T>, dims: &[Dim]) -> Result<Self, HeapError>
    where
        T: Facet<'static> + 'static,
    {
        if dims.is_empty() {
            return Err(HeapError::NoDimensions);
        }
        let mut expected = 1usize;
        for (axis, dim) in dims.iter().enumerate() {
            let len = isize::try_from(dim.length).map_err(|_| HeapError::BoundsOverflow { axis })?;
            if dim.lower.checked_add(len).is_none() {
                return Err(HeapError::BoundsOverflow { axis });
            }
            expected = expected
                .checked_mul(dim.length)
                .ok_or(HeapError::BoundsOverflow { axis })?;
        }
        if expected != values.len() {
            return Err(HeapError::LengthMismatch {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self::from_parts(
            ArrayKind::Multi,
            values,
            SmallVec::from_slice(dims),
        ))
    }

    fn from_parts<T>(kind: ArrayKind, values: Vec<T>, dims: SmallVec<[Dim; 4]>) -> Self
    where
        T: Facet<'static> + 'static,
    {
        let boxed = values.into_boxed_slice();
        let len = boxed.len();
        let data = NonNull::from(Box::leak(boxed)).cast::<u8>();
        Self {
            kind,
            element: T::SHAPE,
            data,
            len,
            dims,
            drop_elements: drop_elements::<T>,
        }
    }

    pub fn kind(&self) -> ArrayKind {
        self.kind
    }

    pub fn element_shape(&self) -> &'static Shape {
        self.element
    }

    /// Whether this array stores exactly `T` (shape identity, no covariance).
    pub fn holds<T>(&self) -> bool
    where
        T: Facet<'static>,
    {
        self.element.id == T::SHAPE.id
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of element 0.
    pub fn data(&self) -> NonNull<u8> {
        self.data
    }

    pub fn data_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Row-major position of `indexes`, each checked against its dimension's bounds.
    pub fn linear_index(&self, indexes: &[isize]) -> Result<usize, HeapError> {
        if indexes.len() != self.dims.len() {
            return Err(HeapError::RankMismatch {
                expected: self.dims.len(),
                actual: indexes.len(),
            });
        }
        let mut linear = 0usize;
        for (axis, (dim, &index)) in self.dims.iter().zip(indexes).enumerate() {
            let sub = dim.position(index).ok_or(HeapError::IndexOutOfBounds {
                axis,
                index,
                lower: dim.lower,
                length: dim.length,
            })?;
            linear = linear * dim.length + sub;
        }
        Ok(linear)
    }

    /// Typed pointer to element `linear`, `None` if `T` is not the element type or the position
    /// is past the end.
    pub fn element_ptr<T>(&self, linear: usize) -> Option<NonNull<T>>
    where
        T: Facet<'static>,
    {
        if !self.holds::<T>() || linear >= self.len {
            return None;
        }
        // In bounds of the allocation made in `from_parts`.
        Some(unsafe { self.data.cast::<T>().add(linear) })
    }
}

impl Drop for ArrayCell {
    fn drop(&mut self) {
        unsafe { (self.drop_elements)(self.data, self.len) }
    }
}

impl fmt::Debug for ArrayCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayCell")
            .field("kind", &self.kind)
            .field("element", &self.element.type_identifier)
            .field("dims", &self.dims.as_slice())
            .finish()
    }
}

// ==================================================================
// Boxes
// ==================================================================

/// A value moved to the heap so it has an identity interior references can hold on to.
#[repr(C)]
pub struct BoxCell<V> {
    type_name: &'static str,
    value: UnsafeCell<V>,
}

impl<V: 'static> BoxCell<V> {
    /// Offset of the value from the start of the cell.
    pub const PAYLOAD_OFFSET: usize = core::mem::offset_of!(BoxCell<V>, value);

    pub(crate) fn new(value: V) -> Self {
        Self {
            type_name: core::any::type_name::<V>(),
            value: UnsafeCell::new(value),
        }
    }

    pub(crate) fn value_ptr(&self) -> *mut V {
        self.value.get()
    }
}

/// Type-erased view of a [`BoxCell`].
pub trait ErasedBox: Any {
    fn value_type_id(&self) -> TypeId;

    fn value_type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

impl<V: 'static> ErasedBox for BoxCell<V> {
    fn value_type_id(&self) -> TypeId {
        TypeId::of::<V>()
    }

    fn value_type_name(&self) -> &'static str {
        self.type_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub type BoxRef = Rc<dyn ErasedBox>;

/// Address of the cell header, the base that boxed access programs start from.
pub fn box_header(cell: &BoxRef) -> *mut u8 {
    Rc::as_ptr(cell).cast::<u8>().cast_mut()
}

/// Shared view of the value inside `cell`, if it holds a `V`.
///
/// Only used for buffer descriptors (segments, slices, handles): no interior reference can
/// address the inside of those, so nothing writes to them while the view is alive.
pub(crate) fn box_value<V: 'static>(cell: &BoxRef) -> Option<&V> {
    let cell = cell.as_any().downcast_ref::<BoxCell<V>>()?;
    Some(unsafe { &*cell.value_ptr() })
}

// ==================================================================
// Object
// ==================================================================

/// A dynamically typed heap handle.
#[derive(Clone)]
pub enum Object {
    Array(ArrayRef),
    Boxed(BoxRef),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Array(cell) => match cell.kind() {
                ArrayKind::Vector => "vector",
                ArrayKind::Multi => "array",
            },
            Object::Boxed(cell) => cell.value_type_name(),
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Object::Array(cell) => Some(cell),
            Object::Boxed(_) => None,
        }
    }

    pub fn as_boxed(&self) -> Option<&BoxRef> {
        match self {
            Object::Boxed(cell) => Some(cell),
            Object::Array(_) => None,
        }
    }

    /// Whether this object is a box holding a `V`.
    pub fn is<V: 'static>(&self) -> bool {
        self.as_boxed()
            .is_some_and(|cell| cell.value_type_id() == TypeId::of::<V>())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Array(cell) => fmt::Debug::fmt(cell, f),
            Object::Boxed(cell) => write!(f, "Boxed<{}>", cell.value_type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(facet::Facet)]
    struct Tracked {
        id: u32,
    }

    thread_local! {
        static DROPS: Cell<usize> = const { Cell::new(0) };
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.with(|d| d.set(d.get() + 1));
        }
    }

    #[test]
    fn array_cell_drops_every_element_once() {
        DROPS.with(|d| d.set(0));
        let cell = ArrayCell::vector((0..5).map(|id| Tracked { id }).collect());
        let linear = cell.linear_index(&[3]).unwrap();
        let ptr = cell.element_ptr::<Tracked>(linear).unwrap();
        assert_eq!(unsafe { ptr.as_ref() }.id, 3);
        drop(cell);
        assert_eq!(DROPS.with(Cell::get), 5);
    }

    #[test]
    fn multi_rejects_inconsistent_dims() {
        let err = ArrayCell::multi(vec![0u8; 5], &[Dim::zero_based(2), Dim::zero_based(3)])
            .unwrap_err();
        assert_eq!(
            err,
            HeapError::LengthMismatch {
                expected: 6,
                actual: 5
            }
        );
        let err = ArrayCell::multi(
            vec![0u8; 2],
            &[Dim {
                length: 2,
                lower: isize::MAX,
            }],
        )
        .unwrap_err();
        assert_eq!(err, HeapError::BoundsOverflow { axis: 0 });
        assert_eq!(
            ArrayCell::multi(Vec::<u8>::new(), &[]).unwrap_err(),
            HeapError::NoDimensions
        );
    }

    #[test]
    fn linear_index_checks_each_axis() {
        let cell = ArrayCell::multi(
            vec![0u16; 12],
            &[
                Dim {
                    length: 3,
                    lower: 1,
                },
                Dim::zero_based(4),
            ],
        )
        .unwrap();
        assert_eq!(cell.linear_index(&[2, 3]).unwrap(), 7);
        assert_eq!(
            cell.linear_index(&[0, 0]).unwrap_err(),
            HeapError::IndexOutOfBounds {
                axis: 0,
                index: 0,
                lower: 1,
                length: 3
            }
        );
        assert_eq!(
            cell.linear_index(&[1]).unwrap_err(),
            HeapError::RankMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert!(cell.element_ptr::<u32>(0).is_none());
        assert!(cell.element_ptr::<u16>(12).is_none());
    }

    #[test]
    fn boxed_object_downcasts_to_its_own_type_only() {
        let cell: BoxRef = Rc::new(BoxCell::new(Tracked { id: 8 }));
        let object = Object::Boxed(cell.clone());
        assert!(object.is::<Tracked>());
        assert!(!object.is::<u32>());
        assert_eq!(box_value::<Tracked>(&cell).map(|t| t.id), Some(8));
        assert!(core::ptr::addr_eq(
            Rc::as_ptr(object.as_boxed().unwrap()),
            Rc::as_ptr(&cell)
        ));
        let header = box_header(object.as_boxed().unwrap());
        let value = header.wrapping_add(BoxCell::<Tracked>::PAYLOAD_OFFSET);
        assert_eq!(unsafe { &*value.cast::<Tracked>() }.id, 8);
    }
}
