//! Access programs: the backend-neutral description of an interior address computation.
//!
//! A program runs against a base address and a dimension table and yields the address of one
//! element. The interpreter and the JIT both execute the same program; the program is also the
//! key of the process-wide machine code cache.

use core::fmt;
use facet_core::ConstTypeId;
use smallvec::SmallVec;

pub const ACCESS_ABI_V1: u32 = 1;

/// One dimension of an array, as laid out in an array cell's dimension table.
///
/// The JIT reads this table directly, so the layout is part of the access ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim {
    pub length: usize,
    pub lower: isize,
}

impl Dim {
    pub const LENGTH_OFFSET: usize = core::mem::offset_of!(Dim, length);
    pub const LOWER_OFFSET: usize = core::mem::offset_of!(Dim, lower);
    pub const STRIDE: usize = core::mem::size_of::<Dim>();

    pub const fn zero_based(length: usize) -> Self {
        Self { length, lower: 0 }
    }

    /// Zero-based position of `index` inside this dimension, or `None` when it falls outside
    /// `[lower, lower + length)`.
    #[inline]
    pub fn position(&self, index: isize) -> Option<usize> {
        let sub = index.checked_sub(self.lower)?;
        let sub = usize::try_from(sub).ok()?;
        (sub < self.length).then_some(sub)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    AbiMismatch {
        expected: u32,
        actual: u32,
    },
    MalformedProgram {
        at: usize,
    },
    RankMismatch {
        expected: usize,
        actual: usize,
    },
    IndexOutOfBounds {
        axis: usize,
        index: isize,
        lower: isize,
        length: usize,
    },
    NullBase,
    CodegenUnavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AbiMismatch { expected, actual } => {
                write!(f, "access ABI mismatch: expected v{expected}, got v{actual}")
            }
            Error::MalformedProgram { at } => {
                write!(f, "malformed access program at instruction {at}")
            }
            Error::RankMismatch { expected, actual } => {
                write!(f, "rank mismatch: program expects {expected}, owner has {actual}")
            }
            Error::IndexOutOfBounds {
                axis,
                index,
                lower,
                length,
            } => write!(
                f,
                "index {index} on axis {axis} outside [{lower}, {lower} + {length})"
            ),
            Error::NullBase => write!(f, "access program run against a null base"),
            Error::CodegenUnavailable => {
                write!(f, "runtime code generation is unavailable on this platform")
            }
        }
    }
}

/// What the base address handed to a program points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessBase {
    /// A live, unboxed value of the owner type.
    Value,
    /// The header of a box cell; the value sits at a fixed payload offset.
    BoxHeader,
    /// Element 0 of an array cell; the dimension table is passed alongside.
    ArrayData,
}

impl AccessBase {
    pub fn as_symbol(self) -> &'static str {
        match self {
            AccessBase::Value => "value",
            AccessBase::BoxHeader => "box-header",
            AccessBase::ArrayData => "array-data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessInstr {
    /// `addr += offset`
    AddOffset { offset: usize },
    /// `linear = linear * dims[axis].length + (index - dims[axis].lower)`, failing when the
    /// sub-index is outside the dimension.
    Dim { axis: u16, index: isize },
    /// `addr += linear * size`
    ScaleElement { size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessProgram {
    pub abi_version: u32,
    pub owner_shape_id: ConstTypeId,
    pub base: AccessBase,
    pub instructions: SmallVec<[AccessInstr; 6]>,
}

impl AccessProgram {
    /// Address a byte offset inside a live value.
    pub fn value(owner_shape_id: ConstTypeId, offset: usize) -> Self {
        let mut instructions = SmallVec::new();
        instructions.push(AccessInstr::AddOffset { offset });
        Self {
            abi_version: ACCESS_ABI_V1,
            owner_shape_id,
            base: AccessBase::Value,
            instructions,
        }
    }

    /// Address a byte offset inside the value held by a box, starting from the box header.
    pub fn boxed(owner_shape_id: ConstTypeId, payload_offset: usize, offset: usize) -> Self {
        let mut instructions = SmallVec::new();
        instructions.push(AccessInstr::AddOffset {
            offset: payload_offset,
        });
        instructions.push(AccessInstr::AddOffset { offset });
        Self {
            abi_version: ACCESS_ABI_V1,
            owner_shape_id,
            base: AccessBase::BoxHeader,
            instructions,
        }
    }

    /// Address one element of an array by row-major reduction over its dimension table.
    pub fn array(element_shape_id: ConstTypeId, indexes: &[isize], element_size: usize) -> Self {
        let mut instructions: SmallVec<[AccessInstr; 6]> = indexes
            .iter()
            .enumerate()
            .map(|(axis, &index)| AccessInstr::Dim {
                axis: axis as u16,
                index,
            })
            .collect();
        instructions.push(AccessInstr::ScaleElement { size: element_size });
        Self {
            abi_version: ACCESS_ABI_V1,
            owner_shape_id: element_shape_id,
            base: AccessBase::ArrayData,
            instructions,
        }
    }

    /// Number of dimensions the program indexes.
    pub fn rank(&self) -> usize {
        self.instructions
            .iter()
            .filter(|instr| matches!(instr, AccessInstr::Dim { .. }))
            .count()
    }

    /// Check the structural rules both backends rely on: dimensions appear in axis order, a
    /// single scale closes the dimension list, and array programs index at least one axis.
    pub fn validate(&self) -> Result<(), Error> {
        if self.abi_version != ACCESS_ABI_V1 {
            return Err(Error::AbiMismatch {
                expected: ACCESS_ABI_V1,
                actual: self.abi_version,
            });
        }

        let mut next_axis = 0usize;
        let mut scaled = false;
        for (at, instr) in self.instructions.iter().enumerate() {
            match *instr {
                AccessInstr::AddOffset { .. } => {
                    if self.base == AccessBase::ArrayData {
                        return Err(Error::MalformedProgram { at });
                    }
                }
                AccessInstr::Dim { axis, .. } => {
                    if scaled || self.base != AccessBase::ArrayData || axis as usize != next_axis {
                        return Err(Error::MalformedProgram { at });
                    }
                    next_axis += 1;
                }
                AccessInstr::ScaleElement { .. } => {
                    if scaled || next_axis == 0 {
                        return Err(Error::MalformedProgram { at });
                    }
                    scaled = true;
                }
            }
        }

        if self.base == AccessBase::ArrayData && !scaled {
            return Err(Error::MalformedProgram {
                at: self.instructions.len(),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    fn to_sexp(&self) -> String {
        use core::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(&mut out, "(access-program");
        let _ = writeln!(&mut out, "  (abi {})", self.abi_version);
        let _ = writeln!(&mut out, "  (base {})", self.base.as_symbol());
        let _ = writeln!(&mut out, "  (instructions");
        for instr in &self.instructions {
            match *instr {
                AccessInstr::AddOffset { offset } => {
                    let _ = writeln!(&mut out, "    (add-offset {offset})");
                }
                AccessInstr::Dim { axis, index } => {
                    let _ = writeln!(&mut out, "    (dim (axis {axis}) (index {index}))");
                }
                AccessInstr::ScaleElement { size } => {
                    let _ = writeln!(&mut out, "    (scale-element {size})");
                }
            }
        }
        let _ = writeln!(&mut out, "  )");
        let _ = write!(&mut out, ")");
        out
    }
}
