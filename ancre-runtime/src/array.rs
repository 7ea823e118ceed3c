//! Typed handles over [`ArrayCell`]s.

use crate::buffer::Span;
use crate::error::HeapError;
use crate::heap::{ArrayCell, ArrayKind, ArrayRef, Object};
use ancre_ir::Dim;
use core::fmt;
use core::marker::PhantomData;
use facet_core::{Facet, Shape};
use std::rc::Rc;

/// A single-dimensional, zero-based array.
pub struct Vector<T> {
    cell: ArrayRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Vector<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Vector<T>
where
    T: Facet<'static> + 'static,
{
    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            cell: Rc::new(ArrayCell::vector(values)),
            _marker: PhantomData,
        }
    }

    /// Recover a typed vector from a dynamically typed object.
    pub fn from_object(object: &Object) -> Option<Self> {
        let cell = object.as_array()?;
        (cell.kind() == ArrayKind::Vector && cell.holds::<T>()).then(|| Self {
            cell: cell.clone(),
            _marker: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.cell.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Copy,
    {
        let ptr = self.cell.element_ptr::<T>(index)?;
        Some(unsafe { ptr.read() })
    }

    pub fn set(&self, index: usize, value: T) -> Result<(), HeapError> {
        self.replace(index, value).map(drop)
    }

    pub fn replace(&self, index: usize, value: T) -> Result<T, HeapError> {
        let ptr = self
            .cell
            .element_ptr::<T>(index)
            .ok_or(HeapError::IndexOutOfBounds {
                axis: 0,
                index: index as isize,
                lower: 0,
                length: self.len(),
            })?;
        Ok(unsafe { ptr.as_ptr().replace(value) })
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Copy,
    {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

impl<T> Vector<T> {
    pub fn len(&self) -> usize {
        self.cell.len()
    }

    /// The whole storage as a span; valid while this vector is alive.
    pub fn span(&self) -> Span<T> {
        // The cell owns `len` initialized elements of `T` for as long as it is alive.
        unsafe { Span::from_raw_parts(self.cell.data().cast::<T>(), self.len()) }
    }

    pub fn cell(&self) -> &ArrayRef {
        &self.cell
    }

    pub fn to_object(&self) -> Object {
        Object::Array(self.cell.clone())
    }
}

impl<T> From<Vec<T>> for Vector<T>
where
    T: Facet<'static> + 'static,
{
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

impl<T> FromIterator<T> for Vector<T>
where
    T: Facet<'static> + 'static,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T> fmt::Debug for Vector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vector<{}>[{}]",
            self.cell.element_shape().type_identifier,
            self.cell.len()
        )
    }
}

/// An array of statically known rank with per-dimension lower bounds.
///
/// `MdArray<T, 1>` is the rank-1 array whose lower bound is not guaranteed to be zero.
pub struct MdArray<T, const RANK: usize> {
    cell: ArrayRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T, const RANK: usize> Clone for MdArray<T, RANK> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, const RANK: usize> MdArray<T, RANK>
where
    T: Facet<'static> + 'static,
{
    /// Zero-based array; `values` are in row-major order.
    pub fn new(values: Vec<T>, lengths: [usize; RANK]) -> Result<Self, HeapError> {
        Self::with_bounds(values, lengths, [0; RANK])
    }

    pub fn with_bounds(
        values: Vec<T>,
        lengths: [usize; RANK],
        lowers: [isize; RANK],
    ) -> Result<Self, HeapError> {
        let dims: Vec<Dim> = lengths
            .iter()
            .zip(lowers)
            .map(|(&length, lower)| Dim { length, lower })
            .collect();
        Ok(Self {
            cell: Rc::new(ArrayCell::multi(values, &dims)?),
            _marker: PhantomData,
        })
    }

    pub fn from_object(object: &Object) -> Option<Self> {
        let cell = object.as_array()?;
        (cell.kind() == ArrayKind::Multi && cell.rank() == RANK && cell.holds::<T>()).then(|| {
            Self {
                cell: cell.clone(),
                _marker: PhantomData,
            }
        })
    }

    pub fn dims(&self) -> &[Dim] {
        self.cell.dims()
    }

    pub fn len(&self) -> usize {
        self.cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell.is_empty()
    }

    pub fn get(&self, indexes: [isize; RANK]) -> Option<T>
    where
        T: Copy,
    {
        let linear = self.cell.linear_index(&indexes).ok()?;
        let ptr = self.cell.element_ptr::<T>(linear)?;
        Some(unsafe { ptr.read() })
    }

    pub fn set(&self, indexes: [isize; RANK], value: T) -> Result<(), HeapError> {
        let linear = self.cell.linear_index(&indexes)?;
        if let Some(ptr) = self.cell.element_ptr::<T>(linear) {
            drop(unsafe { ptr.as_ptr().replace(value) });
        }
        Ok(())
    }
}

impl<T, const RANK: usize> MdArray<T, RANK> {
    pub fn cell(&self) -> &ArrayRef {
        &self.cell
    }

    pub fn to_object(&self) -> Object {
        Object::Array(self.cell.clone())
    }
}

impl<T, const RANK: usize> fmt::Debug for MdArray<T, RANK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MdArray<{}, {RANK}>{:?}",
            self.cell.element_shape().type_identifier,
            self.cell.dims()
        )
    }
}

/// An array whose element type and rank are only known at run time.
#[derive(Clone)]
pub struct AnyArray {
    cell: ArrayRef,
}

impl AnyArray {
    /// Build an array of any rank; `values` are in row-major order.
    pub fn new<T>(values: Vec<T>, dims: &[Dim]) -> Result<Self, HeapError>
    where
        T: Facet<'static> + 'static,
    {
        Ok(Self {
            cell: Rc::new(ArrayCell::multi(values, dims)?),
        })
    }

    pub fn from_object(object: &Object) -> Option<Self> {
        Some(Self {
            cell: object.as_array()?.clone(),
        })
    }

    pub fn element_shape(&self) -> &'static Shape {
        self.cell.element_shape()
    }

    pub fn rank(&self) -> usize {
        self.cell.rank()
    }

    pub fn dims(&self) -> &[Dim] {
        self.cell.dims()
    }

    pub fn cell(&self) -> &ArrayRef {
        &self.cell
    }

    pub fn to_object(&self) -> Object {
        Object::Array(self.cell.clone())
    }

    pub fn get<T>(&self, indexes: &[isize]) -> Option<T>
    where
        T: Facet<'static> + Copy,
    {
        let linear = self.cell.linear_index(indexes).ok()?;
        let ptr = self.cell.element_ptr::<T>(linear)?;
        Some(unsafe { ptr.read() })
    }
}

impl<T> From<Vector<T>> for AnyArray {
    fn from(vector: Vector<T>) -> Self {
        Self { cell: vector.cell }
    }
}

impl<T, const RANK: usize> From<MdArray<T, RANK>> for AnyArray {
    fn from(array: MdArray<T, RANK>) -> Self {
        Self { cell: array.cell }
    }
}

impl fmt::Debug for AnyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.cell, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_round_trips_through_object() {
        let vector = Vector::from_vec(vec![10u32, 20, 30]);
        let object = vector.to_object();
        let back = Vector::<u32>::from_object(&object).unwrap();
        assert!(Rc::ptr_eq(back.cell(), vector.cell()));
        back.set(1, 99).unwrap();
        assert_eq!(vector.to_vec(), vec![10, 99, 30]);
        assert!(Vector::<i32>::from_object(&object).is_none());
        assert!(MdArray::<u32, 1>::from_object(&object).is_none());
    }

    #[test]
    fn vector_set_past_end_fails() {
        let vector: Vector<u8> = (0..3).collect();
        assert!(vector.set(3, 1).is_err());
        assert_eq!(vector.get(3), None);
    }

    #[test]
    fn md_array_honours_lower_bounds() {
        let array = MdArray::with_bounds((0..8).collect::<Vec<i32>>(), [2, 4], [-1, 10]).unwrap();
        assert_eq!(array.get([-1, 10]), Some(0));
        assert_eq!(array.get([0, 13]), Some(7));
        assert_eq!(array.get([1, 10]), None);
        array.set([0, 11], 42).unwrap();
        assert_eq!(array.get([0, 11]), Some(42));
        assert!(array.set([0, 9], 1).is_err());
    }

    #[test]
    fn any_array_reads_only_its_element_type() {
        let any = AnyArray::new(vec![1.5f64, 2.5], &[Dim::zero_based(2)]).unwrap();
        assert_eq!(any.get::<f64>(&[1]), Some(2.5));
        assert_eq!(any.get::<f32>(&[1]), None);
        assert_eq!(any.rank(), 1);
    }
}
