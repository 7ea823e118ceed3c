//! Typed handle over a [`BoxCell`].

use crate::heap::{BoxCell, BoxRef, Object};
use core::any::TypeId;
use core::fmt;
use core::marker::PhantomData;
use std::rc::Rc;

/// A value moved to the heap. Clones share the same cell.
pub struct Boxed<V> {
    cell: BoxRef,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for Boxed<V> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V: 'static> Boxed<V> {
    pub fn new(value: V) -> Self {
        Self {
            cell: Rc::new(BoxCell::new(value)),
            _marker: PhantomData,
        }
    }

    pub fn from_object(object: &Object) -> Option<Self> {
        let cell = object.as_boxed()?;
        (cell.value_type_id() == TypeId::of::<V>()).then(|| Self {
            cell: cell.clone(),
            _marker: PhantomData,
        })
    }

    fn value_ptr(&self) -> *mut V {
        let cell = Rc::as_ptr(&self.cell).cast::<BoxCell<V>>();
        // The erased cell was created as a `BoxCell<V>` (checked in `from_object`).
        unsafe { (*cell).value_ptr() }
    }

    pub fn get(&self) -> V
    where
        V: Copy,
    {
        unsafe { self.value_ptr().read() }
    }

    pub fn set(&self, value: V) {
        drop(self.replace(value));
    }

    pub fn replace(&self, value: V) -> V {
        unsafe { self.value_ptr().replace(value) }
    }

    /// Run `f` against the boxed value.
    ///
    /// # Safety
    ///
    /// No interior reference into this box may be written to while `f` runs.
    pub unsafe fn with<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(unsafe { &*self.value_ptr() })
    }
}

impl<V> Boxed<V> {
    pub fn cell(&self) -> &BoxRef {
        &self.cell
    }

    pub fn to_object(&self) -> Object {
        Object::Boxed(self.cell.clone())
    }
}

impl<V> fmt::Debug for Boxed<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Boxed<{}>", self.cell.value_type_name())
    }
}
