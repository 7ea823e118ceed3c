//! Reusable, type-bound descriptors of one location inside an owner type.

use crate::classify::{Classified, Mode, Request, Target, classify};
use crate::errors::{LocateError, LocateErrorKind};
use crate::locator::{Anchor, ElementRef, Locator};
use crate::path::{self, PathExpr};
use crate::resolve;
use ancre_exec::{Accessor, BackendKind, BackendPolicy};
use ancre_ir::AccessProgram;
use ancre_runtime::{FieldToken, Object, Owner, OwnerView};
use arc_swap::ArcSwapOption;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use facet_core::Facet;
use std::sync::Arc;

/// Classifies `O` once and resolves the same location against any number of `O` instances.
///
/// Accessors are compiled on first use and cached in the template; `Locator`s produced from it
/// do not refer back to it.
pub struct LocatorTemplate<O, E> {
    mode: Mode,
    target: Target,
    backend: BackendPolicy,
    /// Borrow from a live value.
    value_accessor: ArcSwapOption<Accessor>,
    /// Resolve through a box, or index a runtime-ranked array.
    reference_accessor: ArcSwapOption<Accessor>,
    _marker: PhantomData<fn(&O) -> E>,
}

impl<O, E> LocatorTemplate<O, E>
where
    O: Owner<E>,
    E: Facet<'static> + 'static,
{
    fn build(request: Request<'_>) -> Result<Self, LocateError> {
        let Classified { mode, target } = classify::<O, E>(request)?;
        Ok(Self {
            mode,
            target,
            backend: BackendPolicy::from_env(),
            value_accessor: ArcSwapOption::empty(),
            reference_accessor: ArcSwapOption::empty(),
            _marker: PhantomData,
        })
    }

    /// Element `index` of a rank-1 array, buffer or inline array.
    pub fn at(index: isize) -> Result<Self, LocateError> {
        Self::build(Request::Indexes(&[index]))
    }

    /// Element at `indexes` of an array, one index per dimension.
    pub fn at_indexes(indexes: &[isize]) -> Result<Self, LocateError> {
        Self::build(Request::Indexes(indexes))
    }

    pub fn field(name: &str) -> Result<Self, LocateError> {
        Self::build(Request::Fields(&[name]))
    }

    /// A field reached through nested struct fields.
    pub fn field_path(names: &[&str]) -> Result<Self, LocateError> {
        Self::build(Request::Fields(names))
    }

    pub fn from_field(token: FieldToken) -> Result<Self, LocateError> {
        Self::build(Request::Token(token))
    }

    /// Parse `name`, `outer.inner`, `[i]` or `[i, j, ...]`.
    pub fn parse(expr: &str) -> Result<Self, LocateError> {
        match path::parse(expr) {
            Ok(PathExpr::Fields(names)) => Self::field_path(&names),
            Ok(PathExpr::Indexes(indexes)) => Self::at_indexes(&indexes),
            Err(reason) => Err(LocateError::at::<O, E>(LocateErrorKind::invalid(reason))),
        }
    }

    /// Use `policy` instead of the process default when compiling accessors. Drops any accessor
    /// already cached.
    pub fn with_backend(mut self, policy: BackendPolicy) -> Self {
        self.backend = policy;
        self.clear_cache();
        self
    }

    fn error(&self, kind: impl Into<LocateErrorKind>) -> LocateError {
        LocateError::at::<O, E>(kind)
    }

    fn index(&self) -> isize {
        match &self.target {
            Target::Indexes(indexes) => indexes.first().copied().unwrap_or_default(),
            Target::Offset { .. } => 0,
        }
    }

    fn indexes(&self) -> &[isize] {
        match &self.target {
            Target::Indexes(indexes) => indexes,
            Target::Offset { .. } => &[],
        }
    }

    /// First writer wins; a losing writer's accessor is dropped and the published one returned.
    fn cached(
        &self,
        slot: &ArcSwapOption<Accessor>,
        program: impl FnOnce() -> Result<AccessProgram, LocateErrorKind>,
    ) -> Result<Arc<Accessor>, LocateErrorKind> {
        if let Some(hit) = slot.load_full() {
            return Ok(hit);
        }
        let accessor = resolve::compile(program()?, self.backend)?;
        let previous = slot.compare_and_swap(&None::<Arc<Accessor>>, Some(accessor.clone()));
        Ok(match &*previous {
            Some(published) => published.clone(),
            None => accessor,
        })
    }

    fn value_accessor(&self) -> Result<Arc<Accessor>, LocateErrorKind> {
        self.cached(&self.value_accessor, || match self.target {
            Target::Offset { owner, offset, .. } => Ok(AccessProgram::value(owner.id, offset)),
            Target::Indexes(_) => Err(LocateErrorKind::UnsupportedOperation {
                reason: "indexed owners are not borrowed in place",
            }),
        })
    }

    fn reference_accessor(&self) -> Result<Arc<Accessor>, LocateErrorKind> {
        self.cached(&self.reference_accessor, || match &self.target {
            Target::Offset {
                owner,
                offset,
                payload_offset,
            } => Ok(AccessProgram::boxed(owner.id, *payload_offset, *offset)),
            Target::Indexes(indexes) => Ok(resolve::array_program::<E>(indexes)),
        })
    }

    fn resolve_view(&self, view: OwnerView<'_, E>) -> Result<Locator<E>, LocateError> {
        let located = match (self.mode, view) {
            (_, OwnerView::Value) => Err(LocateErrorKind::UnsupportedOperation {
                reason: "a plain value has no heap identity; borrow it or box it",
            }),
            (Mode::FieldPath | Mode::FixedCapacityInline, OwnerView::Boxed(cell)) => self
                .reference_accessor()
                .map(|accessor| Locator::with_accessor(Anchor::Boxed(cell.clone()), accessor)),
            (Mode::SingleDimZeroBased, OwnerView::Array(cell)) => {
                resolve::zero_based(cell, self.index())
            }
            (
                Mode::SingleDimArbitraryBound | Mode::FixedRankArray(_) | Mode::RuntimeTypedArray,
                OwnerView::Array(cell),
            ) => resolve::in_array(cell, self.indexes(), || self.reference_accessor()),
            (Mode::BoundedSegment, OwnerView::Segment(segment)) => {
                resolve::segment(segment, self.index())
            }
            (Mode::BufferSlice, OwnerView::Slice(slice)) => resolve::slice(slice, self.index()),
            (Mode::BufferOwnerHandle, OwnerView::BufferOwner(owner)) => {
                resolve::owner(owner, self.index())
            }
            (Mode::BufferManagerHandle, OwnerView::Manager(manager)) => {
                resolve::manager(manager, self.index())
            }
            (mode, _) => Err(LocateErrorKind::ShapeMismatch {
                expected: mode.as_str().to_owned(),
                actual: "a different owner kind".to_owned(),
            }),
        };
        located.map_err(|kind| self.error(kind))
    }

    /// A storable locator into `owner`.
    ///
    /// Plain values are rejected with `UnsupportedOperation`: box them, or [`borrow`](Self::borrow)
    /// the live value.
    pub fn resolve(&self, owner: &O) -> Result<Locator<E>, LocateError> {
        self.resolve_view(owner.view())
    }

    /// A storable locator into a dynamically typed owner, which must be an `O` (or an `O` in a box).
    pub fn resolve_boxed(&self, owner: &Object) -> Result<Locator<E>, LocateError> {
        let view = O::view_object(owner).ok_or_else(|| {
            self.error(LocateErrorKind::ShapeMismatch {
                expected: core::any::type_name::<O>().to_owned(),
                actual: owner.type_name().to_owned(),
            })
        })?;
        self.resolve_view(view)
    }

    /// A reference into `owner` for the duration of the borrow.
    ///
    /// For a live value the element is addressed in place and the reference is exclusive; for
    /// heap owners this is `resolve` dereferenced on demand.
    pub fn borrow<'a>(&self, owner: &'a mut O) -> Result<ElementRef<'a, E>, LocateError> {
        match owner.view() {
            OwnerView::Value => {}
            view => return self.resolve_view(view).map(ElementRef::located),
        }
        let accessor = self.value_accessor().map_err(|kind| self.error(kind))?;
        let base = (owner as *mut O).cast::<u8>();
        let addr = accessor
            .address(base, &[])
            .map_err(|err| self.error(err))?;
        let element = NonNull::new(addr.cast::<E>())
            .ok_or_else(|| self.error(LocateErrorKind::NullOwner))?;
        // The offset and type were validated against `O` at construction, and `owner` is
        // exclusively borrowed for 'a.
        Ok(ElementRef::live(unsafe { &mut *element.as_ptr() }))
    }

    pub fn borrow_boxed<'a>(&self, owner: &'a Object) -> Result<ElementRef<'a, E>, LocateError> {
        self.resolve_boxed(owner).map(ElementRef::located)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn backend_policy(&self) -> BackendPolicy {
        self.backend
    }

    /// Backend of whichever accessor is currently cached, if any.
    pub fn cached_backend(&self) -> Option<BackendKind> {
        self.reference_accessor
            .load_full()
            .or_else(|| self.value_accessor.load_full())
            .map(|accessor| accessor.backend())
    }

    /// Drop both cached accessors. Locators already produced keep working.
    pub fn clear_cache(&self) {
        self.value_accessor.store(None);
        self.reference_accessor.store(None);
    }
}

impl<O, E> fmt::Debug for LocatorTemplate<O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("LocatorTemplate");
        out.field("owner", &core::any::type_name::<O>())
            .field("element", &core::any::type_name::<E>())
            .field("mode", &self.mode);
        match &self.target {
            Target::Indexes(indexes) => out.field("indexes", &indexes.as_slice()),
            Target::Offset { offset, .. } => out.field("offset", offset),
        };
        out.field("backend", &self.backend).finish()
    }
}
