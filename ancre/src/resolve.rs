//! Resolution: turn one owner instance and an index into a locator, per storage mode.
//!
//! Everything here validates against the instance it is handed. Functions return bare error
//! kinds; callers attach the owner and element types.

use crate::errors::{LocateError, LocateErrorKind};
use crate::locator::{Anchor, Locator, ReadOnlyLocator};
use ancre_exec::{Accessor, BackendPolicy};
use ancre_ir::AccessProgram;
use ancre_runtime::{
    AnyArray, ArrayRef, BufferManager, BufferOwner, ManagerHandle, MdArray, OwnerHandle,
    Segment, Slice, SliceOwner, SliceSource, Vector,
};
use facet_core::Facet;
use std::rc::Rc;
use std::sync::Arc;

/// Arrays of higher rank are addressed through an accessor instead of a frozen offset.
pub(crate) const MAX_FROZEN_RANK: usize = 4;

fn non_negative(index: isize) -> Result<usize, LocateErrorKind> {
    usize::try_from(index).map_err(|_| LocateErrorKind::IndexNegative { index })
}

fn out_of_bounds(index: isize, length: usize) -> LocateErrorKind {
    LocateErrorKind::IndexOutOfBounds {
        axis: 0,
        index,
        lower: 0,
        length,
    }
}

/// Check that `index` is a valid zero-based position in a region of `length` elements.
fn checked(index: isize, length: usize) -> Result<usize, LocateErrorKind> {
    let position = non_negative(index)?;
    if position >= length {
        return Err(out_of_bounds(index, length));
    }
    Ok(position)
}

pub(crate) fn array_program<E: Facet<'static>>(indexes: &[isize]) -> AccessProgram {
    AccessProgram::array(E::SHAPE.id, indexes, core::mem::size_of::<E>())
}

pub(crate) fn compile(
    program: AccessProgram,
    policy: BackendPolicy,
) -> Result<Arc<Accessor>, LocateErrorKind> {
    let accessor = ancre_exec::compile(program, policy)?;
    tracing::trace!(backend = ?accessor.backend(), "compiled accessor");
    Ok(Arc::new(accessor))
}

fn element_check<E: Facet<'static>>(cell: &ArrayRef) -> Result<(), LocateErrorKind> {
    if cell.holds::<E>() {
        return Ok(());
    }
    Err(LocateErrorKind::TypeMismatch {
        expected: E::SHAPE.type_identifier,
        actual: cell.element_shape().type_identifier,
    })
}

/// A zero-based rank-1 array: frozen element offset.
pub(crate) fn zero_based<E>(cell: &ArrayRef, index: isize) -> Result<Locator<E>, LocateErrorKind>
where
    E: Facet<'static> + 'static,
{
    element_check::<E>(cell)?;
    let linear = checked(index, cell.len())?;
    Ok(Locator::frozen(cell.clone(), linear))
}

/// Any array: row-major reduction over the instance's bounds. Low ranks get a frozen offset,
/// higher ranks an accessor built by `accessor`.
pub(crate) fn in_array<E>(
    cell: &ArrayRef,
    indexes: &[isize],
    accessor: impl FnOnce() -> Result<Arc<Accessor>, LocateErrorKind>,
) -> Result<Locator<E>, LocateErrorKind>
where
    E: Facet<'static> + 'static,
{
    element_check::<E>(cell)?;
    if cell.rank() != indexes.len() {
        return Err(LocateErrorKind::rank(indexes.len(), cell.rank()));
    }
    let linear = cell.linear_index(indexes)?;
    if cell.rank() <= MAX_FROZEN_RANK {
        return Ok(Locator::frozen(cell.clone(), linear));
    }
    Ok(Locator::with_accessor(Anchor::Array(cell.clone()), accessor()?))
}

/// A bounded segment: frozen offset into the backing array, segment offset pre-added.
pub(crate) fn segment<E>(segment: &Segment<E>, index: isize) -> Result<Locator<E>, LocateErrorKind>
where
    E: Facet<'static> + 'static,
{
    let array = segment.array().ok_or(LocateErrorKind::NullOwner)?;
    let position = checked(index, segment.count())?;
    Ok(Locator::frozen(
        array.cell().clone(),
        segment.offset() + position,
    ))
}

/// A buffer slice, dispatched on what currently backs it.
pub(crate) fn slice<E>(slice: &Slice<E>, index: isize) -> Result<Locator<E>, LocateErrorKind>
where
    E: Facet<'static> + 'static,
{
    let position = checked(index, slice.len())?;
    match slice.source() {
        // Vectors never change length, so the window checked when the slice was built holds.
        SliceSource::Array(vector) => Ok(Locator::frozen(
            vector.cell().clone(),
            slice.start() + position,
        )),
        SliceSource::Manager(manager) => manager_at(manager, slice.start() + position),
        SliceSource::Shared(_) => {
            let owner: Rc<dyn BufferOwner<E>> = Rc::new(SliceOwner::new(slice.clone()));
            owner_at(&owner, position)
        }
    }
}

/// A buffer owner: validate against the current slice, then re-resolve on every dereference.
pub(crate) fn owner<E>(
    owner: &Rc<dyn BufferOwner<E>>,
    index: isize,
) -> Result<Locator<E>, LocateErrorKind>
where
    E: Facet<'static> + 'static,
{
    owner_at(owner, non_negative(index)?)
}

fn owner_at<E>(owner: &Rc<dyn BufferOwner<E>>, position: usize) -> Result<Locator<E>, LocateErrorKind>
where
    E: Facet<'static> + 'static,
{
    // Held across the call: the owner may replace itself while handing out its slice.
    let owner = owner.clone();
    let current = owner.slice().span()?;
    if position >= current.len() {
        return Err(out_of_bounds(position as isize, current.len()));
    }
    Ok(Locator::reresolved(Anchor::Owner(owner), position))
}

/// A buffer manager: validate against the current span, then re-resolve on every dereference.
pub(crate) fn manager<E>(
    manager: &Rc<dyn BufferManager<E>>,
    index: isize,
) -> Result<Locator<E>, LocateErrorKind>
where
    E: Facet<'static> + 'static,
{
    manager_at(manager, non_negative(index)?)
}

fn manager_at<E>(
    manager: &Rc<dyn BufferManager<E>>,
    position: usize,
) -> Result<Locator<E>, LocateErrorKind>
where
    E: Facet<'static> + 'static,
{
    let manager = manager.clone();
    let current = manager.span();
    if position >= current.len() {
        return Err(out_of_bounds(position as isize, current.len()));
    }
    Ok(Locator::reresolved(Anchor::Manager(manager), position))
}

// ==================================================================
// Direct constructors
// ==================================================================

impl<T> Locator<T>
where
    T: Facet<'static> + 'static,
{
    pub fn from_vector(vector: &Vector<T>, index: isize) -> Result<Self, LocateError> {
        zero_based(vector.cell(), index).map_err(LocateError::at::<Vector<T>, T>)
    }

    pub fn from_md_array<const RANK: usize>(
        array: &MdArray<T, RANK>,
        indexes: &[isize],
    ) -> Result<Self, LocateError> {
        in_array(array.cell(), indexes, || {
            compile(array_program::<T>(indexes), BackendPolicy::from_env())
        })
        .map_err(LocateError::at::<MdArray<T, RANK>, T>)
    }

    /// Element type and rank are checked against the instance.
    pub fn from_any_array(array: &AnyArray, indexes: &[isize]) -> Result<Self, LocateError> {
        in_array(array.cell(), indexes, || {
            compile(array_program::<T>(indexes), BackendPolicy::from_env())
        })
        .map_err(LocateError::at::<AnyArray, T>)
    }

    pub fn from_segment(segment: &Segment<T>, index: isize) -> Result<Self, LocateError> {
        self::segment(segment, index).map_err(LocateError::at::<Segment<T>, T>)
    }

    pub fn from_slice(slice: &Slice<T>, index: isize) -> Result<Self, LocateError> {
        self::slice(slice, index).map_err(LocateError::at::<Slice<T>, T>)
    }

    pub fn from_owner(owner: &OwnerHandle<T>, index: isize) -> Result<Self, LocateError> {
        self::owner(owner.as_rc(), index).map_err(LocateError::at::<OwnerHandle<T>, T>)
    }

    pub fn from_manager(manager: &ManagerHandle<T>, index: isize) -> Result<Self, LocateError> {
        self::manager(manager.as_rc(), index).map_err(LocateError::at::<ManagerHandle<T>, T>)
    }
}

/// Read-only views are resolved exactly like [`Locator`]s and share their errors.
impl<T> ReadOnlyLocator<T>
where
    T: Facet<'static> + 'static,
{
    pub fn from_vector(vector: &Vector<T>, index: isize) -> Result<Self, LocateError> {
        Locator::from_vector(vector, index).map(Self::from)
    }

    pub fn from_md_array<const RANK: usize>(
        array: &MdArray<T, RANK>,
        indexes: &[isize],
    ) -> Result<Self, LocateError> {
        Locator::from_md_array(array, indexes).map(Self::from)
    }

    pub fn from_any_array(array: &AnyArray, indexes: &[isize]) -> Result<Self, LocateError> {
        Locator::from_any_array(array, indexes).map(Self::from)
    }

    pub fn from_segment(segment: &Segment<T>, index: isize) -> Result<Self, LocateError> {
        Locator::from_segment(segment, index).map(Self::from)
    }

    pub fn from_slice(slice: &Slice<T>, index: isize) -> Result<Self, LocateError> {
        Locator::from_slice(slice, index).map(Self::from)
    }

    pub fn from_owner(owner: &OwnerHandle<T>, index: isize) -> Result<Self, LocateError> {
        Locator::from_owner(owner, index).map(Self::from)
    }

    pub fn from_manager(manager: &ManagerHandle<T>, index: isize) -> Result<Self, LocateError> {
        Locator::from_manager(manager, index).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::Strategy;
    use ancre_runtime::{Dim, SharedBuffer, Span};
    use std::cell::{Cell, RefCell};

    #[test]
    fn zero_based_rejects_negative_and_past_end() {
        let vector = Vector::from_vec(vec![1u8, 2, 3]);
        assert_eq!(
            Locator::from_vector(&vector, -1).unwrap_err().kind,
            LocateErrorKind::IndexNegative { index: -1 }
        );
        assert_eq!(
            Locator::from_vector(&vector, 3).unwrap_err().kind,
            out_of_bounds(3, 3)
        );
        let locator = Locator::from_vector(&vector, 2).unwrap();
        assert_eq!(locator.strategy(), Strategy::Frozen);
        assert_eq!(locator.read(), Ok(3));
    }

    #[test]
    fn high_rank_arrays_use_an_accessor() {
        let dims = [Dim::zero_based(2); 5];
        let array = AnyArray::new((0..32u32).collect(), &dims).unwrap();
        let locator = Locator::<u32>::from_any_array(&array, &[1, 0, 1, 1, 0]).unwrap();
        assert_eq!(locator.strategy(), Strategy::Accessor);
        assert_eq!(locator.read(), Ok(0b10110));
        assert!(matches!(
            Locator::<u32>::from_any_array(&array, &[1, 0, 2, 1, 0]).unwrap_err().kind,
            LocateErrorKind::IndexOutOfBounds { axis: 2, .. }
        ));
        assert!(matches!(
            Locator::<u32>::from_any_array(&array, &[0, 0]).unwrap_err().kind,
            LocateErrorKind::ShapeMismatch { .. }
        ));
        assert!(matches!(
            Locator::<i32>::from_any_array(&array, &[0; 5]).unwrap_err().kind,
            LocateErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn segment_pre_adds_offset() {
        let vector = Vector::from_vec(vec![0i16; 6]);
        let segment = Segment::new(vector.clone(), 2, 3).unwrap();
        Locator::from_segment(&segment, 2).unwrap().write(5).unwrap();
        assert_eq!(vector.get(4), Some(5));
        assert!(Locator::from_segment(&segment, 3).is_err());
        assert_eq!(
            Locator::from_segment(&Segment::<i16>::default(), 0)
                .unwrap_err()
                .kind,
            LocateErrorKind::NullOwner
        );
    }

    struct Growable {
        data: RefCell<Vec<u64>>,
        spans: Cell<usize>,
    }

    impl BufferManager<u64> for Growable {
        fn span(&self) -> Span<u64> {
            self.spans.set(self.spans.get() + 1);
            let mut data = self.data.borrow_mut();
            let len = data.len();
            let ptr = core::ptr::NonNull::new(data.as_mut_ptr())
                .unwrap_or(core::ptr::NonNull::dangling());
            unsafe { Span::from_raw_parts(ptr, len) }
        }
    }

    #[test]
    fn manager_is_queried_on_every_dereference() {
        let growable = Rc::new(Growable {
            data: RefCell::new(vec![1, 2, 3]),
            spans: Cell::new(0),
        });
        let handle = ManagerHandle::from_rc(growable.clone());
        let locator = Locator::from_manager(&handle, 1).unwrap();
        assert_eq!(locator.strategy(), Strategy::Reresolved);
        assert_eq!(locator.read(), Ok(2));
        growable.data.borrow_mut().extend(0..100);
        assert_eq!(locator.read(), Ok(2));
        assert_eq!(growable.spans.get(), 3);
        growable.data.borrow_mut().truncate(1);
        assert!(matches!(
            locator.read().unwrap_err().kind,
            LocateErrorKind::IndexOutOfBounds { length: 1, .. }
        ));
    }

    #[test]
    fn shared_slice_gets_an_owning_adapter() {
        let buffer = SharedBuffer::from_vec(vec![7u8; 4]);
        let slice = Slice::from_shared(buffer, 1, 2).unwrap();
        let locator = Locator::from_slice(&slice, 1).unwrap();
        assert_eq!(locator.strategy(), Strategy::Reresolved);
        locator.write(9).unwrap();
        assert_eq!(slice.get(1), Some(9));
        assert!(Locator::from_slice(&slice, 2).is_err());
    }

    #[test]
    fn vector_slice_is_frozen() {
        let vector = Vector::from_vec(vec![1u32, 2, 3, 4]);
        let slice = Slice::from_vector(vector.clone(), 1, 2).unwrap();
        let locator = Locator::from_slice(&slice, 1).unwrap();
        assert_eq!(locator.strategy(), Strategy::Frozen);
        assert_eq!(locator.read(), Ok(3));
    }
}
