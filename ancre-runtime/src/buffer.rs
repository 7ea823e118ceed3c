//! Contiguous regions that are not plain arrays: bounded segments over a vector, buffer slices,
//! and the two buffer capabilities (owners that hand out slices, managers that hand out spans).
//!
//! A buffer owner or manager may return a different region on every call. Callers must re-query
//! before each access and never cache a span across calls.

use crate::array::Vector;
use crate::error::HeapError;
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;
use facet_core::Facet;
use std::rc::Rc;

/// A raw, directly addressable region of `len` elements.
pub struct Span<T> {
    ptr: NonNull<T>,
    len: usize,
}

impl<T> Clone for Span<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Span<T> {}

impl<T> Span<T> {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` initialized elements for as long as the
    /// producer of the span keeps it alive.
    pub unsafe fn from_raw_parts(ptr: NonNull<T>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Pointer to element `index`, `None` past the end.
    pub fn element(&self, index: usize) -> Option<NonNull<T>> {
        (index < self.len).then(|| unsafe { self.ptr.add(index) })
    }

    pub fn subspan(&self, start: usize, len: usize) -> Result<Self, HeapError> {
        match start.checked_add(len) {
            Some(end) if end <= self.len => Ok(Self {
                ptr: unsafe { self.ptr.add(start) },
                len,
            }),
            _ => Err(HeapError::RangeOutOfBounds {
                start,
                len,
                available: self.len,
            }),
        }
    }
}

impl<T> fmt::Debug for Span<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span({:p}, {})", self.ptr, self.len)
    }
}

/// A buffer that can hand out a directly addressable span on demand.
///
/// The span returned by [`span`](Self::span) must stay valid while the manager is reachable and
/// no other call has been made on it.
pub trait BufferManager<T>: 'static {
    fn span(&self) -> Span<T>;
}

/// A buffer that can only hand out a slice of itself. The slice may be different on every call.
pub trait BufferOwner<T>: 'static {
    fn slice(&self) -> Slice<T>;
}

// ==================================================================
// Shared buffers
// ==================================================================

/// A heap region that is neither an array nor behind a manager: the "opaque" source of a slice.
pub struct SharedBuffer<T> {
    cells: Rc<[UnsafeCell<T>]>,
}

impl<T> Clone for SharedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            cells: self.cells.clone(),
        }
    }
}

impl<T: 'static> SharedBuffer<T> {
    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            cells: values.into_iter().map(UnsafeCell::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn span(&self) -> Span<T> {
        // `UnsafeCell<T>` has the layout of `T` and permits writes through shared access.
        let ptr = NonNull::from(&*self.cells).cast::<T>();
        unsafe { Span::from_raw_parts(ptr, self.cells.len()) }
    }
}

// ==================================================================
// Slices
// ==================================================================

pub enum SliceSource<T> {
    Array(Vector<T>),
    Manager(Rc<dyn BufferManager<T>>),
    Shared(SharedBuffer<T>),
}

impl<T> Clone for SliceSource<T> {
    fn clone(&self) -> Self {
        match self {
            SliceSource::Array(vector) => SliceSource::Array(vector.clone()),
            SliceSource::Manager(manager) => SliceSource::Manager(manager.clone()),
            SliceSource::Shared(buffer) => SliceSource::Shared(buffer.clone()),
        }
    }
}

/// A window of `len` elements starting at `start` inside some source.
pub struct Slice<T> {
    source: SliceSource<T>,
    start: usize,
    len: usize,
}

impl<T> Clone for Slice<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            start: self.start,
            len: self.len,
        }
    }
}

impl<T> Slice<T>
where
    T: Facet<'static> + 'static,
{
    pub fn new(source: SliceSource<T>, start: usize, len: usize) -> Result<Self, HeapError> {
        let slice = Self { source, start, len };
        // Managers are checked when the span is taken; their size may change until then.
        if !matches!(slice.source, SliceSource::Manager(_)) {
            slice.span()?;
        }
        Ok(slice)
    }

    pub fn from_vector(vector: Vector<T>, start: usize, len: usize) -> Result<Self, HeapError> {
        Self::new(SliceSource::Array(vector), start, len)
    }

    pub fn from_shared(buffer: SharedBuffer<T>, start: usize, len: usize) -> Result<Self, HeapError> {
        Self::new(SliceSource::Shared(buffer), start, len)
    }

    pub fn from_manager(manager: Rc<dyn BufferManager<T>>, start: usize, len: usize) -> Self {
        Self {
            source: SliceSource::Manager(manager),
            start,
            len,
        }
    }

    /// Narrow this slice.
    pub fn slice(&self, start: usize, len: usize) -> Result<Self, HeapError> {
        match start.checked_add(len) {
            Some(end) if end <= self.len => Ok(Self {
                source: self.source.clone(),
                start: self.start + start,
                len,
            }),
            _ => Err(HeapError::RangeOutOfBounds {
                start,
                len,
                available: self.len,
            }),
        }
    }

    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Copy,
    {
        let ptr = self.span().ok()?.element(index)?;
        Some(unsafe { ptr.read() })
    }

    pub fn set(&self, index: usize, value: T) -> Result<(), HeapError> {
        let span = self.span()?;
        let ptr = span.element(index).ok_or(HeapError::IndexOutOfBounds {
            axis: 0,
            index: index as isize,
            lower: 0,
            length: span.len(),
        })?;
        drop(unsafe { ptr.as_ptr().replace(value) });
        Ok(())
    }
}

impl<T: 'static> Slice<T> {
    /// The current region of this slice inside its source.
    pub fn span(&self) -> Result<Span<T>, HeapError> {
        let whole = match &self.source {
            SliceSource::Array(vector) => vector.span(),
            SliceSource::Manager(manager) => manager.span(),
            SliceSource::Shared(buffer) => buffer.span(),
        };
        whole.subspan(self.start, self.len)
    }
}

impl<T> Slice<T> {
    pub fn source(&self) -> &SliceSource<T> {
        &self.source
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> From<Vector<T>> for Slice<T> {
    fn from(vector: Vector<T>) -> Self {
        let len = vector.cell().len();
        Self {
            source: SliceSource::Array(vector),
            start: 0,
            len,
        }
    }
}

impl<T> fmt::Debug for Slice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            SliceSource::Array(_) => "array",
            SliceSource::Manager(_) => "manager",
            SliceSource::Shared(_) => "shared",
        };
        write!(f, "Slice({source}, {}..+{})", self.start, self.len)
    }
}

/// Gives a slice heap identity by owning it; always hands out the same slice.
pub struct SliceOwner<T>(Slice<T>);

impl<T> SliceOwner<T> {
    pub fn new(slice: Slice<T>) -> Self {
        Self(slice)
    }
}

impl<T: 'static> BufferOwner<T> for SliceOwner<T> {
    fn slice(&self) -> Slice<T> {
        self.0.clone()
    }
}

// ==================================================================
// Segments
// ==================================================================

/// A bounded window over a vector. A default segment has no backing vector.
pub struct Segment<T> {
    array: Option<Vector<T>>,
    offset: usize,
    count: usize,
}

impl<T> Default for Segment<T> {
    fn default() -> Self {
        Self {
            array: None,
            offset: 0,
            count: 0,
        }
    }
}

impl<T> Clone for Segment<T> {
    fn clone(&self) -> Self {
        Self {
            array: self.array.clone(),
            offset: self.offset,
            count: self.count,
        }
    }
}

impl<T> Segment<T>
where
    T: Facet<'static> + 'static,
{
    pub fn new(array: Vector<T>, offset: usize, count: usize) -> Result<Self, HeapError> {
        match offset.checked_add(count) {
            Some(end) if end <= array.len() => Ok(Self {
                array: Some(array),
                offset,
                count,
            }),
            _ => Err(HeapError::RangeOutOfBounds {
                start: offset,
                len: count,
                available: array.len(),
            }),
        }
    }

    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Copy,
    {
        if index >= self.count {
            return None;
        }
        self.array.as_ref()?.get(self.offset + index)
    }

    pub fn set(&self, index: usize, value: T) -> Result<(), HeapError> {
        let array = self.array.as_ref().ok_or(HeapError::MissingArray)?;
        if index >= self.count {
            return Err(HeapError::IndexOutOfBounds {
                axis: 0,
                index: index as isize,
                lower: 0,
                length: self.count,
            });
        }
        array.set(self.offset + index, value)
    }
}

impl<T> Segment<T> {
    pub fn array(&self) -> Option<&Vector<T>> {
        self.array.as_ref()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl<T> From<Vector<T>> for Segment<T> {
    fn from(array: Vector<T>) -> Self {
        let count = array.cell().len();
        Self {
            array: Some(array),
            offset: 0,
            count,
        }
    }
}

impl<T> fmt::Debug for Segment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.array {
            Some(array) => write!(f, "Segment({array:?}, {}..+{})", self.offset, self.count),
            None => write!(f, "Segment(null)"),
        }
    }
}

// ==================================================================
// Capability handles
// ==================================================================

/// A shared handle to a [`BufferOwner`].
pub struct OwnerHandle<T>(Rc<dyn BufferOwner<T>>);

impl<T> Clone for OwnerHandle<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> OwnerHandle<T> {
    pub fn new<B: BufferOwner<T>>(owner: B) -> Self {
        Self(Rc::new(owner))
    }

    pub fn from_rc<B: BufferOwner<T>>(owner: Rc<B>) -> Self {
        Self(owner)
    }

    pub fn slice(&self) -> Slice<T> {
        self.0.slice()
    }

    pub fn as_rc(&self) -> &Rc<dyn BufferOwner<T>> {
        &self.0
    }
}

/// A shared handle to a [`BufferManager`].
pub struct ManagerHandle<T>(Rc<dyn BufferManager<T>>);

impl<T> Clone for ManagerHandle<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> ManagerHandle<T> {
    pub fn new<M: BufferManager<T>>(manager: M) -> Self {
        Self(Rc::new(manager))
    }

    pub fn from_rc<M: BufferManager<T>>(manager: Rc<M>) -> Self {
        Self(manager)
    }

    pub fn span(&self) -> Span<T> {
        self.0.span()
    }

    pub fn as_rc(&self) -> &Rc<dyn BufferManager<T>> {
        &self.0
    }
}

impl<T> fmt::Debug for OwnerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerHandle({:p})", Rc::as_ptr(&self.0).cast::<u8>())
    }
}

impl<T> fmt::Debug for ManagerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagerHandle({:p})", Rc::as_ptr(&self.0).cast::<u8>())
    }
}
