//! How an owner type organizes its storage, as seen by the classifier, and how an owner instance
//! exposes that storage at resolution time.

use crate::array::{AnyArray, MdArray, Vector};
use crate::boxed::Boxed;
use crate::buffer::{BufferManager, BufferOwner, ManagerHandle, OwnerHandle, Segment, Slice};
use crate::heap::{ArrayKind, ArrayRef, BoxCell, BoxRef, Object, box_value};
use core::any::TypeId;
use core::fmt;
use facet_core::{Facet, Shape};
use std::rc::Rc;

/// Static storage description of an owner type. Derived from the type alone.
#[derive(Clone, Copy)]
pub enum OwnerKind {
    Segment {
        element: &'static Shape,
    },
    Slice {
        element: &'static Shape,
    },
    Manager {
        element: &'static Shape,
    },
    BufferOwner {
        element: &'static Shape,
    },
    /// `element` and `rank` are `None` when only known at run time.
    Array {
        element: Option<&'static Shape>,
        rank: Option<usize>,
        zero_based: bool,
    },
    /// A plain value, addressable in place or through a box holding a copy of it.
    Value {
        shape: &'static Shape,
        payload_offset: usize,
    },
    /// A boxed value: the owner is the box itself.
    Boxed {
        shape: &'static Shape,
        payload_offset: usize,
    },
}

impl fmt::Debug for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |shape: Option<&'static Shape>| shape.map_or("?", |s| s.type_identifier);
        match *self {
            OwnerKind::Segment { element } => write!(f, "Segment<{}>", element.type_identifier),
            OwnerKind::Slice { element } => write!(f, "Slice<{}>", element.type_identifier),
            OwnerKind::Manager { element } => write!(f, "Manager<{}>", element.type_identifier),
            OwnerKind::BufferOwner { element } => {
                write!(f, "BufferOwner<{}>", element.type_identifier)
            }
            OwnerKind::Array {
                element,
                rank,
                zero_based,
            } => write!(
                f,
                "Array<{}, rank {:?}, zero_based {zero_based}>",
                name(element),
                rank
            ),
            OwnerKind::Value { shape, .. } => write!(f, "Value<{}>", shape.type_identifier),
            OwnerKind::Boxed { shape, .. } => write!(f, "Boxed<{}>", shape.type_identifier),
        }
    }
}

/// One owner instance's storage.
pub enum OwnerView<'a, E> {
    Array(&'a ArrayRef),
    Segment(&'a Segment<E>),
    Slice(&'a Slice<E>),
    BufferOwner(&'a Rc<dyn BufferOwner<E>>),
    Manager(&'a Rc<dyn BufferManager<E>>),
    Boxed(&'a BoxRef),
    /// A live value with no heap identity; it can only be borrowed.
    Value,
}

/// A type that can own elements of type `E`.
pub trait Owner<E>: 'static {
    fn kind() -> OwnerKind;

    fn view(&self) -> OwnerView<'_, E>;

    /// View a dynamically typed object as this owner type, `None` if it is not one.
    fn view_object(object: &Object) -> Option<OwnerView<'_, E>>;
}

fn boxed_view<V: 'static, E>(object: &Object) -> Option<OwnerView<'_, E>> {
    object
        .as_boxed()
        .filter(|cell| cell.value_type_id() == TypeId::of::<V>())
        .map(OwnerView::Boxed)
}

impl<O, E> Owner<E> for O
where
    O: Facet<'static> + 'static,
{
    fn kind() -> OwnerKind {
        OwnerKind::Value {
            shape: O::SHAPE,
            payload_offset: BoxCell::<O>::PAYLOAD_OFFSET,
        }
    }

    fn view(&self) -> OwnerView<'_, E> {
        OwnerView::Value
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, E>> {
        boxed_view::<O, E>(object)
    }
}

impl<V, E> Owner<E> for Boxed<V>
where
    V: Facet<'static> + 'static,
{
    fn kind() -> OwnerKind {
        OwnerKind::Boxed {
            shape: V::SHAPE,
            payload_offset: BoxCell::<V>::PAYLOAD_OFFSET,
        }
    }

    fn view(&self) -> OwnerView<'_, E> {
        OwnerView::Boxed(self.cell())
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, E>> {
        boxed_view::<V, E>(object)
    }
}

impl<T, E> Owner<E> for Vector<T>
where
    T: Facet<'static> + 'static,
{
    fn kind() -> OwnerKind {
        OwnerKind::Array {
            element: Some(T::SHAPE),
            rank: Some(1),
            zero_based: true,
        }
    }

    fn view(&self) -> OwnerView<'_, E> {
        OwnerView::Array(self.cell())
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, E>> {
        object
            .as_array()
            .filter(|cell| cell.kind() == ArrayKind::Vector && cell.holds::<T>())
            .map(OwnerView::Array)
    }
}

impl<T, E, const RANK: usize> Owner<E> for MdArray<T, RANK>
where
    T: Facet<'static> + 'static,
{
    fn kind() -> OwnerKind {
        OwnerKind::Array {
            element: Some(T::SHAPE),
            rank: Some(RANK),
            zero_based: false,
        }
    }

    fn view(&self) -> OwnerView<'_, E> {
        OwnerView::Array(self.cell())
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, E>> {
        object
            .as_array()
            .filter(|cell| {
                cell.kind() == ArrayKind::Multi && cell.rank() == RANK && cell.holds::<T>()
            })
            .map(OwnerView::Array)
    }
}

impl<E> Owner<E> for AnyArray {
    fn kind() -> OwnerKind {
        OwnerKind::Array {
            element: None,
            rank: None,
            zero_based: false,
        }
    }

    fn view(&self) -> OwnerView<'_, E> {
        OwnerView::Array(self.cell())
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, E>> {
        object.as_array().map(OwnerView::Array)
    }
}

impl<T> Owner<T> for Segment<T>
where
    T: Facet<'static> + 'static,
{
    fn kind() -> OwnerKind {
        OwnerKind::Segment { element: T::SHAPE }
    }

    fn view(&self) -> OwnerView<'_, T> {
        OwnerView::Segment(self)
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, T>> {
        box_value::<Segment<T>>(object.as_boxed()?).map(OwnerView::Segment)
    }
}

impl<T> Owner<T> for Slice<T>
where
    T: Facet<'static> + 'static,
{
    fn kind() -> OwnerKind {
        OwnerKind::Slice { element: T::SHAPE }
    }

    fn view(&self) -> OwnerView<'_, T> {
        OwnerView::Slice(self)
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, T>> {
        box_value::<Slice<T>>(object.as_boxed()?).map(OwnerView::Slice)
    }
}

impl<T> Owner<T> for OwnerHandle<T>
where
    T: Facet<'static> + 'static,
{
    fn kind() -> OwnerKind {
        OwnerKind::BufferOwner { element: T::SHAPE }
    }

    fn view(&self) -> OwnerView<'_, T> {
        OwnerView::BufferOwner(self.as_rc())
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, T>> {
        box_value::<OwnerHandle<T>>(object.as_boxed()?)
            .map(|handle| OwnerView::BufferOwner(handle.as_rc()))
    }
}

impl<T> Owner<T> for ManagerHandle<T>
where
    T: Facet<'static> + 'static,
{
    fn kind() -> OwnerKind {
        OwnerKind::Manager { element: T::SHAPE }
    }

    fn view(&self) -> OwnerView<'_, T> {
        OwnerView::Manager(self.as_rc())
    }

    fn view_object(object: &Object) -> Option<OwnerView<'_, T>> {
        box_value::<ManagerHandle<T>>(object.as_boxed()?)
            .map(|handle| OwnerView::Manager(handle.as_rc()))
    }
}
