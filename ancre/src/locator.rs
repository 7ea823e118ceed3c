//! The resolved interior reference.
//!
//! A [`Locator`] keeps three things: the heap object that keeps the storage alive, a tagged
//! payload, and an optional accessor. Exactly one addressing strategy is active per locator:
//!
//! - no owner: the payload is a raw address;
//! - owner, payload `>= 0`: a frozen element offset inside the owner's storage;
//! - owner, payload `< 0`: `!payload` is an index re-resolved through the owner's current span
//!   on every dereference;
//! - accessor: the address is computed by the accessor from the owner (or by a custom provider).
//!
//! Element access follows `Cell`: values are copied in and out, and references into the element
//! are only handed out through `unsafe` methods.

use crate::errors::{ErrorLocation, LocateError, LocateErrorKind};
use ancre_exec::Accessor;
use ancre_runtime::{ArrayRef, BoxRef, BufferManager, BufferOwner, Span, box_header};
use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

/// The addressing strategy a locator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Raw,
    Frozen,
    Reresolved,
    Accessor,
}

pub(crate) enum Anchor<T> {
    Array(ArrayRef),
    Boxed(BoxRef),
    Owner(Rc<dyn BufferOwner<T>>),
    Manager(Rc<dyn BufferManager<T>>),
    Provider(Rc<dyn Any>),
}

impl<T> Clone for Anchor<T> {
    fn clone(&self) -> Self {
        match self {
            Anchor::Array(cell) => Anchor::Array(cell.clone()),
            Anchor::Boxed(cell) => Anchor::Boxed(cell.clone()),
            Anchor::Owner(owner) => Anchor::Owner(owner.clone()),
            Anchor::Manager(manager) => Anchor::Manager(manager.clone()),
            Anchor::Provider(state) => Anchor::Provider(state.clone()),
        }
    }
}

impl<T> Anchor<T> {
    fn describe(&self) -> &'static str {
        match self {
            Anchor::Array(_) => "array",
            Anchor::Boxed(_) => "box",
            Anchor::Owner(_) => "buffer owner",
            Anchor::Manager(_) => "buffer manager",
            Anchor::Provider(_) => "provider",
        }
    }
}

type ProvideFn<T> = Rc<dyn Fn(&dyn Any, isize) -> *mut T>;

pub(crate) enum LocatorAccess<T> {
    Program(Arc<Accessor>),
    Provider(ProvideFn<T>),
}

impl<T> Clone for LocatorAccess<T> {
    fn clone(&self) -> Self {
        match self {
            LocatorAccess::Program(accessor) => LocatorAccess::Program(accessor.clone()),
            LocatorAccess::Provider(provide) => LocatorAccess::Provider(provide.clone()),
        }
    }
}

/// Encode a re-resolved index; the sign bit is the tag.
#[inline]
fn tag(index: usize) -> isize {
    !(index as isize)
}

#[inline]
fn untag(payload: isize) -> usize {
    !payload as usize
}

/// A storable reference to one element inside some owner.
pub struct Locator<T> {
    owner: Option<Anchor<T>>,
    payload: isize,
    accessor: Option<LocatorAccess<T>>,
}

impl<T> Clone for Locator<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            payload: self.payload,
            accessor: self.accessor.clone(),
        }
    }
}

impl<T> fmt::Debug for Locator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locator")
            .field("strategy", &self.strategy())
            .field("owner", &self.owner.as_ref().map(Anchor::describe))
            .field("payload", &self.payload)
            .finish()
    }
}

impl<T> Locator<T> {
    pub fn strategy(&self) -> Strategy {
        match (&self.owner, &self.accessor) {
            (_, Some(_)) => Strategy::Accessor,
            (None, None) => Strategy::Raw,
            (Some(_), None) if self.payload < 0 => Strategy::Reresolved,
            (Some(_), None) => Strategy::Frozen,
        }
    }

    /// Whether this locator keeps a heap object alive.
    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }
}

impl<T: 'static> Locator<T> {
    pub(crate) fn frozen(cell: ArrayRef, linear: usize) -> Self {
        Self {
            owner: Some(Anchor::Array(cell)),
            payload: linear as isize,
            accessor: None,
        }
    }

    pub(crate) fn reresolved(anchor: Anchor<T>, index: usize) -> Self {
        Self {
            owner: Some(anchor),
            payload: tag(index),
            accessor: None,
        }
    }

    pub(crate) fn with_accessor(anchor: Anchor<T>, accessor: Arc<Accessor>) -> Self {
        Self {
            owner: Some(anchor),
            payload: 0,
            accessor: Some(LocatorAccess::Program(accessor)),
        }
    }

    /// Address unmanaged memory directly.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for reads and writes of `T` for as long as the locator (or any clone
    /// of it) is dereferenced.
    pub unsafe fn from_raw(ptr: *mut T) -> Result<Self, LocateError> {
        if ptr.is_null() {
            return Err(LocateError::new(
                ErrorLocation {
                    owner: "raw pointer",
                    element: core::any::type_name::<T>(),
                },
                LocateErrorKind::NullOwner,
            ));
        }
        Ok(Self {
            owner: None,
            payload: ptr.expose_provenance() as isize,
            accessor: None,
        })
    }

    /// A locator whose address is computed by `provide` from `state` and `payload` on every
    /// dereference. A null result fails the dereference with `NullOwner`.
    ///
    /// # Safety
    ///
    /// A non-null pointer returned by `provide` must be valid for reads and writes of `T` for as
    /// long as `state` is alive.
    pub unsafe fn from_provider<S: 'static>(
        state: Rc<S>,
        payload: isize,
        provide: fn(&S, isize) -> *mut T,
    ) -> Self {
        let provide: ProvideFn<T> =
            Rc::new(move |state: &dyn Any, payload: isize| match state.downcast_ref::<S>() {
                Some(state) => provide(state, payload),
                None => core::ptr::null_mut(),
            });
        Self {
            owner: Some(Anchor::Provider(state)),
            payload,
            accessor: Some(LocatorAccess::Provider(provide)),
        }
    }

    fn error(&self, kind: impl Into<LocateErrorKind>) -> LocateError {
        LocateError::new(
            ErrorLocation {
                owner: self.owner.as_ref().map_or("raw pointer", Anchor::describe),
                element: core::any::type_name::<T>(),
            },
            kind,
        )
    }

    fn span_element(&self, span: Span<T>) -> Result<NonNull<T>, LocateError> {
        let index = untag(self.payload);
        span.element(index).ok_or_else(|| {
            self.error(LocateErrorKind::IndexOutOfBounds {
                axis: 0,
                index: index as isize,
                lower: 0,
                length: span.len(),
            })
        })
    }

    /// Run `f` with the element's address. Storage re-queried from a buffer owner stays alive
    /// until `f` returns.
    fn access<R>(&self, f: impl FnOnce(NonNull<T>) -> R) -> Result<R, LocateError> {
        match (&self.owner, &self.accessor) {
            (None, None) => {
                let ptr = core::ptr::with_exposed_provenance_mut::<T>(self.payload as usize);
                let ptr = NonNull::new(ptr).ok_or_else(|| self.error(LocateErrorKind::NullOwner))?;
                Ok(f(ptr))
            }
            (Some(Anchor::Array(cell)), None) => {
                let linear = self.payload as usize;
                if self.payload < 0 || linear >= cell.len() {
                    return Err(self.error(LocateErrorKind::IndexOutOfBounds {
                        axis: 0,
                        index: self.payload,
                        lower: 0,
                        length: cell.len(),
                    }));
                }
                // The element type was checked against the cell when the locator was built.
                Ok(f(unsafe { cell.data().cast::<T>().add(linear) }))
            }
            (Some(Anchor::Owner(owner)), None) => {
                let slice = owner.slice();
                let span = slice.span().map_err(|err| self.error(err))?;
                let ptr = self.span_element(span)?;
                let out = f(ptr);
                drop(slice);
                Ok(out)
            }
            (Some(Anchor::Manager(manager)), None) => {
                let ptr = self.span_element(manager.span())?;
                Ok(f(ptr))
            }
            (Some(anchor), Some(LocatorAccess::Program(accessor))) => {
                let addr = match anchor {
                    Anchor::Boxed(cell) => accessor.address(box_header(cell), &[]),
                    Anchor::Array(cell) => accessor.address(cell.data_ptr(), cell.dims()),
                    _ => {
                        return Err(self.error(LocateErrorKind::UnsupportedOperation {
                            reason: "accessor anchored to a buffer",
                        }));
                    }
                }
                .map_err(|err| self.error(err))?;
                let ptr = NonNull::new(addr.cast::<T>())
                    .ok_or_else(|| self.error(LocateErrorKind::NullOwner))?;
                Ok(f(ptr))
            }
            (Some(Anchor::Provider(state)), Some(LocatorAccess::Provider(provide))) => {
                let ptr = NonNull::new(provide(&**state, self.payload))
                    .ok_or_else(|| self.error(LocateErrorKind::NullOwner))?;
                Ok(f(ptr))
            }
            _ => Err(self.error(LocateErrorKind::UnsupportedOperation {
                reason: "provider without provider state",
            })),
        }
    }

    /// Copy the element out.
    pub fn read(&self) -> Result<T, LocateError>
    where
        T: Copy,
    {
        self.access(|ptr| unsafe { ptr.read() })
    }

    /// Overwrite the element, dropping the previous value.
    pub fn write(&self, value: T) -> Result<(), LocateError> {
        self.replace(value).map(drop)
    }

    pub fn replace(&self, value: T) -> Result<T, LocateError> {
        self.access(|ptr| unsafe { ptr.as_ptr().replace(value) })
    }

    pub fn take(&self) -> Result<T, LocateError>
    where
        T: Default,
    {
        self.replace(T::default())
    }

    /// The element's current address. For re-resolved locators it is only meaningful until the
    /// owner hands out a different span.
    pub fn as_ptr(&self) -> Result<*mut T, LocateError> {
        self.access(NonNull::as_ptr)
    }

    /// # Safety
    ///
    /// Nothing may write to the element while the reference is alive, and the owner must not
    /// swap its storage.
    pub unsafe fn as_ref(&self) -> Result<&T, LocateError> {
        self.access(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// # Safety
    ///
    /// The reference must be the only access to the element while it is alive, and the owner
    /// must not swap its storage.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut(&self) -> Result<&mut T, LocateError> {
        self.access(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    /// Run `f` against the element in place.
    ///
    /// # Safety
    ///
    /// `f` must not write to the element through another locator.
    pub unsafe fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, LocateError> {
        self.access(|ptr| f(unsafe { ptr.as_ref() }))
    }

    /// Whether both locators currently address the same element.
    pub fn same_location(&self, other: &Locator<T>) -> Result<bool, LocateError> {
        Ok(self.as_ptr()? == other.as_ptr()?)
    }

    pub fn read_only(&self) -> ReadOnlyLocator<T> {
        ReadOnlyLocator(self.clone())
    }
}

/// Computes the address of a read-only element from shared state and a payload.
///
/// Implementors only lend shared access: the element behind a returned pointer is never written
/// through a [`ReadOnlyLocator`].
pub trait ReadOnlyProvider<T>: 'static {
    /// The element for `payload`, or null when there is none.
    fn provide(&self, payload: isize) -> *const T;
}

/// A locator that can only be read through.
pub struct ReadOnlyLocator<T>(Locator<T>);

impl<T> Clone for ReadOnlyLocator<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> ReadOnlyLocator<T> {
    /// # Safety
    ///
    /// `ptr` must stay valid for reads of `T` for as long as the locator (or any clone of it) is
    /// dereferenced.
    pub unsafe fn from_raw(ptr: *const T) -> Result<Self, LocateError> {
        unsafe { Locator::from_raw(ptr.cast_mut()) }.map(Self)
    }

    /// A view whose address is computed by `state` on every dereference. A null result fails the
    /// dereference with `NullOwner`.
    ///
    /// # Safety
    ///
    /// A non-null pointer returned by `state.provide` must be valid for reads of `T` for as long
    /// as `state` is alive.
    pub unsafe fn from_provider<S>(state: Rc<S>, payload: isize) -> Self
    where
        S: ReadOnlyProvider<T>,
    {
        let provide: ProvideFn<T> =
            Rc::new(|state: &dyn Any, payload: isize| match state.downcast_ref::<S>() {
                Some(state) => state.provide(payload).cast_mut(),
                None => core::ptr::null_mut(),
            });
        Self(Locator {
            owner: Some(Anchor::Provider(state)),
            payload,
            accessor: Some(LocatorAccess::Provider(provide)),
        })
    }

    pub fn read(&self) -> Result<T, LocateError>
    where
        T: Copy,
    {
        self.0.read()
    }

    /// # Safety
    ///
    /// `f` must not write to the element through another locator.
    pub unsafe fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, LocateError> {
        unsafe { self.0.with(f) }
    }

    pub fn as_ptr(&self) -> Result<*const T, LocateError> {
        self.0.as_ptr().map(<*mut T>::cast_const)
    }

    pub fn strategy(&self) -> Strategy {
        self.0.strategy()
    }

    pub fn has_owner(&self) -> bool {
        self.0.has_owner()
    }
}

impl<T> From<Locator<T>> for ReadOnlyLocator<T> {
    fn from(locator: Locator<T>) -> Self {
        Self(locator)
    }
}

impl<T> fmt::Debug for ReadOnlyLocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnlyLocator").field(&self.0).finish()
    }
}

// ==================================================================
// Borrowed element
// ==================================================================

enum Borrowed<'a, E> {
    /// Inside a live value the caller holds exclusively.
    Live(&'a mut E),
    Located(Locator<E>, PhantomData<&'a ()>),
}

/// A call-scoped reference to an element.
///
/// Borrowed from a live value it is exclusive and converts into `&'a mut E`; borrowed from a heap
/// owner it behaves like a locator dereferenced on demand.
pub struct ElementRef<'a, E> {
    target: Borrowed<'a, E>,
}

impl<'a, E: 'static> ElementRef<'a, E> {
    pub(crate) fn live(element: &'a mut E) -> Self {
        Self {
            target: Borrowed::Live(element),
        }
    }

    pub(crate) fn located(locator: Locator<E>) -> Self {
        Self {
            target: Borrowed::Located(locator, PhantomData),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self.target, Borrowed::Live(_))
    }

    pub fn get(&self) -> Result<E, LocateError>
    where
        E: Copy,
    {
        match &self.target {
            Borrowed::Live(element) => Ok(**element),
            Borrowed::Located(locator, _) => locator.read(),
        }
    }

    pub fn set(&mut self, value: E) -> Result<(), LocateError> {
        self.replace(value).map(drop)
    }

    pub fn replace(&mut self, value: E) -> Result<E, LocateError> {
        match &mut self.target {
            Borrowed::Live(element) => Ok(core::mem::replace(*element, value)),
            Borrowed::Located(locator, _) => locator.replace(value),
        }
    }

    /// The exclusive reference, for elements borrowed from a live value.
    pub fn into_mut(self) -> Option<&'a mut E> {
        match self.target {
            Borrowed::Live(element) => Some(element),
            Borrowed::Located(..) => None,
        }
    }

    /// The underlying locator, for elements borrowed from a heap owner.
    pub fn into_locator(self) -> Option<Locator<E>> {
        match self.target {
            Borrowed::Live(_) => None,
            Borrowed::Located(locator, _) => Some(locator),
        }
    }
}

impl<E> fmt::Debug for ElementRef<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Borrowed::Live(_) => f.write_str("ElementRef(live)"),
            Borrowed::Located(locator, _) => f.debug_tuple("ElementRef").field(locator).finish(),
        }
    }
}
