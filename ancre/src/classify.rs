//! Shape classification: decide once, from the owner and element types alone, how the owner
//! stores its elements and what the template will address inside it.

use crate::errors::{LocateError, LocateErrorKind};
use ancre_runtime::{FieldToken, IShape, Owner, OwnerKind};
use facet_core::{Facet, Shape};
use smallvec::{SmallVec, smallvec};

/// How an owner type organizes the storage a template addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// A named field (possibly nested) of a struct value.
    FieldPath,
    /// A rank-1 array whose lower bound is always zero.
    SingleDimZeroBased,
    /// A rank-1 array with a per-instance lower bound.
    SingleDimArbitraryBound,
    /// An array of static rank 2 to 4.
    FixedRankArray(usize),
    /// An array whose rank (or element type) is only known per instance, or of rank 5 and up.
    RuntimeTypedArray,
    BufferSlice,
    BoundedSegment,
    BufferOwnerHandle,
    BufferManagerHandle,
    /// `[E; N]` stored inline in the owner value.
    FixedCapacityInline,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::FieldPath => "field path",
            Mode::SingleDimZeroBased => "zero-based vector",
            Mode::SingleDimArbitraryBound => "rank-1 array",
            Mode::FixedRankArray(_) => "fixed-rank array",
            Mode::RuntimeTypedArray => "runtime-typed array",
            Mode::BufferSlice => "buffer slice",
            Mode::BoundedSegment => "bounded segment",
            Mode::BufferOwnerHandle => "buffer owner",
            Mode::BufferManagerHandle => "buffer manager",
            Mode::FixedCapacityInline => "inline array",
        }
    }
}

/// What the caller asked to address.
pub(crate) enum Request<'a> {
    Indexes(&'a [isize]),
    Fields(&'a [&'a str]),
    Token(FieldToken),
}

pub(crate) enum Target {
    Indexes(SmallVec<[isize; 4]>),
    /// A byte offset inside the owner value.
    Offset {
        owner: &'static Shape,
        offset: usize,
        payload_offset: usize,
    },
}

pub(crate) struct Classified {
    pub(crate) mode: Mode,
    pub(crate) target: Target,
}

pub(crate) fn classify<O, E>(request: Request<'_>) -> Result<Classified, LocateError>
where
    O: Owner<E>,
    E: Facet<'static> + 'static,
{
    let classified = classify_kind::<E>(O::kind(), request).map_err(LocateError::at::<O, E>)?;
    tracing::debug!(
        owner = core::any::type_name::<O>(),
        element = E::SHAPE.type_identifier,
        mode = classified.mode.as_str(),
        "classified owner"
    );
    Ok(classified)
}

fn classify_kind<E>(kind: OwnerKind, request: Request<'_>) -> Result<Classified, LocateErrorKind>
where
    E: Facet<'static>,
{
    match kind {
        OwnerKind::Segment { element } => buffer(Mode::BoundedSegment, element, request, E::SHAPE),
        OwnerKind::Slice { element } => buffer(Mode::BufferSlice, element, request, E::SHAPE),
        OwnerKind::Manager { element } => {
            buffer(Mode::BufferManagerHandle, element, request, E::SHAPE)
        }
        OwnerKind::BufferOwner { element } => {
            buffer(Mode::BufferOwnerHandle, element, request, E::SHAPE)
        }
        OwnerKind::Value {
            shape,
            payload_offset,
        }
        | OwnerKind::Boxed {
            shape,
            payload_offset,
        } => match (shape.array_len(), shape.array_element()) {
            (Some(capacity), Some(element)) => {
                inline(shape, capacity, element, payload_offset, request, E::SHAPE)
            }
            _ => field(shape, payload_offset, request, E::SHAPE),
        },
        OwnerKind::Array {
            element,
            rank,
            zero_based,
        } => array(element, rank, zero_based, request, E::SHAPE),
    }
}

fn type_mismatch(expected: &'static Shape, actual: &'static Shape) -> LocateErrorKind {
    LocateErrorKind::TypeMismatch {
        expected: expected.type_identifier,
        actual: actual.type_identifier,
    }
}

fn single_index(request: Request<'_>, mode: Mode) -> Result<isize, LocateErrorKind> {
    match request {
        Request::Indexes(&[index]) => Ok(index),
        Request::Indexes(indexes) => Err(LocateErrorKind::invalid(format!(
            "a {} takes one index, got {}",
            mode.as_str(),
            indexes.len()
        ))),
        Request::Fields(_) | Request::Token(_) => Err(LocateErrorKind::invalid(format!(
            "a {} is addressed by index, not by field",
            mode.as_str()
        ))),
    }
}

fn buffer(
    mode: Mode,
    element: &'static Shape,
    request: Request<'_>,
    expected: &'static Shape,
) -> Result<Classified, LocateErrorKind> {
    if !element.same_as(expected) {
        return Err(type_mismatch(expected, element));
    }
    let index = single_index(request, mode)?;
    Ok(Classified {
        mode,
        target: Target::Indexes(smallvec![index]),
    })
}

fn inline(
    owner: &'static Shape,
    capacity: usize,
    element: &'static Shape,
    payload_offset: usize,
    request: Request<'_>,
    expected: &'static Shape,
) -> Result<Classified, LocateErrorKind> {
    if !element.same_as(expected) {
        return Err(type_mismatch(expected, element));
    }
    let index = single_index(request, Mode::FixedCapacityInline)?;
    let slot = usize::try_from(index).map_err(|_| LocateErrorKind::IndexNegative { index })?;
    if slot >= capacity {
        return Err(LocateErrorKind::IndexOutOfBounds {
            axis: 0,
            index,
            lower: 0,
            length: capacity,
        });
    }
    let size = element
        .layout()
        .map(|layout| layout.size())
        .ok_or(LocateErrorKind::UnsupportedOperation {
            reason: "inline element type is unsized",
        })?;
    Ok(Classified {
        mode: Mode::FixedCapacityInline,
        target: Target::Offset {
            owner,
            offset: slot * size,
            payload_offset,
        },
    })
}

fn field(
    owner: &'static Shape,
    payload_offset: usize,
    request: Request<'_>,
    expected: &'static Shape,
) -> Result<Classified, LocateErrorKind> {
    let token = match request {
        Request::Fields(names) => FieldToken::path(owner, names).ok_or_else(|| {
            LocateErrorKind::invalid(format!(
                "no field `{}` on {}",
                names.join("."),
                owner.type_identifier
            ))
        })?,
        Request::Token(token) => {
            if !token.declaring_shape().same_as(owner) {
                return Err(LocateErrorKind::invalid(format!(
                    "field `{}` is declared on {}, not {}",
                    token.name(),
                    token.declaring_shape().type_identifier,
                    owner.type_identifier
                )));
            }
            token
        }
        Request::Indexes(_) => {
            return Err(LocateErrorKind::invalid(format!(
                "{} is not an array; address it by field",
                owner.type_identifier
            )));
        }
    };
    if !token.shape().same_as(expected) {
        return Err(LocateErrorKind::invalid(format!(
            "field `{}` holds {}, not {}",
            token.name(),
            token.shape().type_identifier,
            expected.type_identifier
        )));
    }
    Ok(Classified {
        mode: Mode::FieldPath,
        target: Target::Offset {
            owner,
            offset: token.offset(),
            payload_offset,
        },
    })
}

fn array(
    element: Option<&'static Shape>,
    rank: Option<usize>,
    zero_based: bool,
    request: Request<'_>,
    expected: &'static Shape,
) -> Result<Classified, LocateErrorKind> {
    let indexes = match request {
        Request::Indexes(indexes) => indexes,
        Request::Fields(_) | Request::Token(_) => {
            return Err(LocateErrorKind::invalid(
                "arrays are addressed by index, not by field",
            ));
        }
    };
    if let Some(element) = element {
        if !element.same_as(expected) {
            return Err(type_mismatch(expected, element));
        }
    }
    if indexes.is_empty() {
        return Err(LocateErrorKind::invalid("an array index needs at least one axis"));
    }
    if let Some(rank) = rank {
        if rank != indexes.len() {
            return Err(LocateErrorKind::rank(rank, indexes.len()));
        }
    }
    let mode = match rank {
        Some(1) if zero_based => Mode::SingleDimZeroBased,
        Some(1) => Mode::SingleDimArbitraryBound,
        Some(rank @ 2..=4) => Mode::FixedRankArray(rank),
        _ => Mode::RuntimeTypedArray,
    };
    Ok(Classified {
        mode,
        target: Target::Indexes(SmallVec::from_slice(indexes)),
    })
}
